//! SMTP/LMTP command parsing and validation (RFC 5321, RFC 2033).
//!
//! # Security
//! - Validates command syntax before processing
//! - Prevents injection attacks via strict parsing
//! - Handles malformed input gracefully

use crate::error::{MailError, Result};

/// SMTP/LMTP protocol commands.
///
/// # Examples
/// ```
/// use mail_rs::smtp::SmtpCommand;
///
/// let cmd = SmtpCommand::parse("HELO example.com").unwrap();
/// assert_eq!(cmd, SmtpCommand::Helo("example.com".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SmtpCommand {
    Helo(String),
    Ehlo(String),
    /// LMTP greeting (RFC 2033); behaves like EHLO for capability purposes.
    Lhlo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    Rset,
    Quit,
    Noop,
    /// STARTTLS command to upgrade connection to TLS
    Starttls,
    /// AUTH command with mechanism and optional initial response
    /// Format: AUTH mechanism [initial-response]
    Auth(String, Option<String>),
    Unknown(String),
}

impl SmtpCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(MailError::SyntaxError("empty command".to_string()));
        }

        let parts: Vec<&str> = line.splitn(2, ' ').collect();
        let command = parts[0].to_uppercase();
        let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

        match command.as_str() {
            "HELO" => {
                if args.is_empty() {
                    return Err(MailError::SyntaxError("HELO requires domain".to_string()));
                }
                Ok(SmtpCommand::Helo(args.to_string()))
            }
            "EHLO" => {
                if args.is_empty() {
                    return Err(MailError::SyntaxError("EHLO requires domain".to_string()));
                }
                Ok(SmtpCommand::Ehlo(args.to_string()))
            }
            "LHLO" => {
                if args.is_empty() {
                    return Err(MailError::SyntaxError("LHLO requires domain".to_string()));
                }
                Ok(SmtpCommand::Lhlo(args.to_string()))
            }
            "MAIL" => {
                let from = Self::parse_mail_from(args)?;
                Ok(SmtpCommand::MailFrom(from))
            }
            "RCPT" => {
                let to = Self::parse_rcpt_to(args)?;
                Ok(SmtpCommand::RcptTo(to))
            }
            "DATA" => Ok(SmtpCommand::Data),
            "RSET" => Ok(SmtpCommand::Rset),
            "QUIT" => Ok(SmtpCommand::Quit),
            "NOOP" => Ok(SmtpCommand::Noop),
            "STARTTLS" => Ok(SmtpCommand::Starttls),
            "AUTH" => {
                if args.is_empty() {
                    return Err(MailError::SyntaxError("AUTH requires mechanism".to_string()));
                }
                let auth_parts: Vec<&str> = args.splitn(2, ' ').collect();
                let mechanism = auth_parts[0].to_string();
                let initial_response = auth_parts.get(1).map(|s| s.to_string());
                Ok(SmtpCommand::Auth(mechanism, initial_response))
            }
            _ => Ok(SmtpCommand::Unknown(command)),
        }
    }

    /// True for the greetings (`HELO`/`EHLO`/`LHLO`) so session code can
    /// treat them uniformly where the capability list doesn't matter.
    pub fn is_greeting(&self) -> bool {
        matches!(self, SmtpCommand::Helo(_) | SmtpCommand::Ehlo(_) | SmtpCommand::Lhlo(_))
    }

    fn parse_mail_from(args: &str) -> Result<String> {
        // Expected format: FROM:<email@domain.com> [SIZE=n ...]
        if !args.to_uppercase().starts_with("FROM:") {
            return Err(MailError::SyntaxError("invalid MAIL FROM syntax".to_string()));
        }

        let rest = args[5..].trim();
        let email_part = rest.split_whitespace().next().unwrap_or(rest);
        let email = if email_part.starts_with('<') && email_part.ends_with('>') {
            &email_part[1..email_part.len() - 1]
        } else {
            email_part
        };

        Ok(email.to_string())
    }

    fn parse_rcpt_to(args: &str) -> Result<String> {
        // Expected format: TO:<email@domain.com>
        if !args.to_uppercase().starts_with("TO:") {
            return Err(MailError::SyntaxError("invalid RCPT TO syntax".to_string()));
        }

        let rest = args[3..].trim();
        let email_part = rest.split_whitespace().next().unwrap_or(rest);
        let email = if email_part.starts_with('<') && email_part.ends_with('>') {
            &email_part[1..email_part.len() - 1]
        } else {
            email_part
        };

        Ok(email.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_helo() {
        let cmd = SmtpCommand::parse("HELO example.com").unwrap();
        assert_eq!(cmd, SmtpCommand::Helo("example.com".to_string()));
    }

    #[test]
    fn test_parse_ehlo() {
        let cmd = SmtpCommand::parse("EHLO example.com").unwrap();
        assert_eq!(cmd, SmtpCommand::Ehlo("example.com".to_string()));
    }

    #[test]
    fn test_parse_lhlo() {
        let cmd = SmtpCommand::parse("LHLO example.com").unwrap();
        assert_eq!(cmd, SmtpCommand::Lhlo("example.com".to_string()));
    }

    #[test]
    fn test_parse_mail_from() {
        let cmd = SmtpCommand::parse("MAIL FROM:<sender@example.com>").unwrap();
        assert_eq!(cmd, SmtpCommand::MailFrom("sender@example.com".to_string()));
    }

    #[test]
    fn test_parse_mail_from_with_size_param() {
        let cmd = SmtpCommand::parse("MAIL FROM:<sender@example.com> SIZE=1024").unwrap();
        assert_eq!(cmd, SmtpCommand::MailFrom("sender@example.com".to_string()));
    }

    #[test]
    fn test_parse_rcpt_to() {
        let cmd = SmtpCommand::parse("RCPT TO:<recipient@example.com>").unwrap();
        assert_eq!(cmd, SmtpCommand::RcptTo("recipient@example.com".to_string()));
    }

    #[test]
    fn test_parse_data() {
        let cmd = SmtpCommand::parse("DATA").unwrap();
        assert_eq!(cmd, SmtpCommand::Data);
    }

    #[test]
    fn test_parse_quit() {
        let cmd = SmtpCommand::parse("QUIT").unwrap();
        assert_eq!(cmd, SmtpCommand::Quit);
    }

    #[test]
    fn test_parse_auth_plain_with_initial_response() {
        let cmd = SmtpCommand::parse("AUTH PLAIN AGFsaWNlAHB3").unwrap();
        assert_eq!(
            cmd,
            SmtpCommand::Auth("PLAIN".to_string(), Some("AGFsaWNlAHB3".to_string()))
        );
    }

    #[test]
    fn test_unknown_command() {
        let cmd = SmtpCommand::parse("FROB").unwrap();
        assert_eq!(cmd, SmtpCommand::Unknown("FROB".to_string()));
    }
}
