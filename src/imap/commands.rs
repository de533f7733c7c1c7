//! IMAP4rev1 command parsing (RFC 3501 §6,§9).
//!
//! Commands have the shape `tag COMMAND arguments`. A handful of
//! commands (APPEND, a literal FETCH/SEARCH argument) carry a trailing
//! `{n}` literal marker instead of inline arguments; the parser reports
//! the pending literal size back to the caller, which reads the bytes
//! off the wire itself before resuming dispatch.

use crate::error::{MailError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAlgorithm {
    OrderedSubject,
    References,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImapCommand {
    Capability,
    Id,
    Noop,
    Logout,
    Enable(Vec<String>),
    StartTls,
    Authenticate { mechanism: String, initial: Option<String> },
    Login { username: String, password: String },
    Select { mailbox: String },
    Examine { mailbox: String },
    Create { mailbox: String },
    Delete { mailbox: String },
    Rename { from: String, to: String },
    Subscribe { mailbox: String },
    Unsubscribe { mailbox: String },
    List { reference: String, mailbox: String },
    Lsub { reference: String, mailbox: String },
    Status { mailbox: String, items: Vec<String> },
    /// `size` is the literal byte count still to be read off the wire.
    Append {
        mailbox: String,
        flags: Vec<String>,
        date: Option<String>,
        size: usize,
    },
    Fetch { sequence: String, items: String, uid: bool },
    Search { criteria: String, uid: bool },
    Sort { keys: Vec<String>, reverse_keys: Vec<bool>, criteria: String, uid: bool },
    Thread { algorithm: ThreadAlgorithm, criteria: String, uid: bool },
    Store { sequence: String, operation: StoreOperation, silent: bool, flags: Vec<String>, uid: bool },
    Copy { sequence: String, mailbox: String, uid: bool },
    Move { sequence: String, mailbox: String, uid: bool },
    Expunge,
    Close,
    Done,
}

impl ImapCommand {
    /// Parses one tagged command line. Returns the tag and the command;
    /// for `APPEND`, the trailing `{n}` is captured in `Append::size` and
    /// the caller must read exactly that many octets before continuing.
    pub fn parse(line: &str) -> Result<(String, Self)> {
        let line = line.trim_end();

        if line.eq_ignore_ascii_case("DONE") {
            return Ok((String::new(), ImapCommand::Done));
        }

        let mut parts = line.splitn(3, ' ');
        let tag = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MailError::SyntaxError("missing tag".to_string()))?
            .to_string();
        let command = parts
            .next()
            .ok_or_else(|| MailError::SyntaxError("missing command".to_string()))?
            .to_uppercase();
        let rest = parts.next().unwrap_or("").trim();

        let (verb, uid) = if command == "UID" {
            let mut rest_parts = rest.splitn(2, ' ');
            let verb = rest_parts
                .next()
                .ok_or_else(|| MailError::SyntaxError("UID requires a command".to_string()))?
                .to_uppercase();
            (verb, true)
        } else {
            (command, false)
        };
        let args = if uid {
            rest.splitn(2, ' ').nth(1).unwrap_or("").trim()
        } else {
            rest
        };

        let cmd = match verb.as_str() {
            "CAPABILITY" => ImapCommand::Capability,
            "ID" => ImapCommand::Id,
            "NOOP" => ImapCommand::Noop,
            "LOGOUT" => ImapCommand::Logout,
            "STARTTLS" => ImapCommand::StartTls,
            "ENABLE" => ImapCommand::Enable(args.split_whitespace().map(str::to_string).collect()),

            "AUTHENTICATE" => {
                let mut it = args.splitn(2, ' ');
                let mechanism = it
                    .next()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| MailError::SyntaxError("AUTHENTICATE requires a mechanism".to_string()))?
                    .to_string();
                let initial = it.next().map(str::to_string);
                ImapCommand::Authenticate { mechanism, initial }
            }

            "LOGIN" => {
                let (username, password) = Self::parse_login_credentials(args)?;
                ImapCommand::Login { username, password }
            }

            "SELECT" => ImapCommand::Select { mailbox: Self::unquote(Self::require_arg(args, "SELECT")?) },
            "EXAMINE" => ImapCommand::Examine { mailbox: Self::unquote(Self::require_arg(args, "EXAMINE")?) },
            "CREATE" => ImapCommand::Create { mailbox: Self::unquote(Self::require_arg(args, "CREATE")?) },
            "DELETE" => ImapCommand::Delete { mailbox: Self::unquote(Self::require_arg(args, "DELETE")?) },
            "RENAME" => {
                let mut it = args.split_whitespace();
                let from = it
                    .next()
                    .ok_or_else(|| MailError::SyntaxError("RENAME requires two mailbox names".to_string()))?;
                let to = it
                    .next()
                    .ok_or_else(|| MailError::SyntaxError("RENAME requires two mailbox names".to_string()))?;
                ImapCommand::Rename { from: Self::unquote(from), to: Self::unquote(to) }
            }
            "SUBSCRIBE" => ImapCommand::Subscribe { mailbox: Self::unquote(Self::require_arg(args, "SUBSCRIBE")?) },
            "UNSUBSCRIBE" => {
                ImapCommand::Unsubscribe { mailbox: Self::unquote(Self::require_arg(args, "UNSUBSCRIBE")?) }
            }

            "LIST" => {
                let (reference, mailbox) = Self::parse_list_args(args)?;
                ImapCommand::List { reference, mailbox }
            }
            "LSUB" => {
                let (reference, mailbox) = Self::parse_list_args(args)?;
                ImapCommand::Lsub { reference, mailbox }
            }

            "STATUS" => {
                let mut it = args.splitn(2, ' ');
                let mailbox = Self::unquote(
                    it.next().ok_or_else(|| MailError::SyntaxError("STATUS requires a mailbox".to_string()))?,
                );
                let item_list = it.next().unwrap_or("").trim_matches(|c| c == '(' || c == ')');
                let items = item_list.split_whitespace().map(|s| s.to_uppercase()).collect();
                ImapCommand::Status { mailbox, items }
            }

            "APPEND" => Self::parse_append(args)?,

            "FETCH" => {
                let mut it = args.splitn(2, ' ');
                let sequence = it
                    .next()
                    .ok_or_else(|| MailError::SyntaxError("FETCH requires a sequence set".to_string()))?
                    .to_string();
                let items = it.next().unwrap_or("").to_string();
                ImapCommand::Fetch { sequence, items, uid }
            }

            "SEARCH" => ImapCommand::Search { criteria: args.to_string(), uid },

            "SORT" => {
                let (keys_str, rest) = Self::split_parenthesized(args)?;
                let mut rest_it = rest.trim().splitn(2, ' ');
                let _charset = rest_it.next().unwrap_or("");
                let criteria = rest_it.next().unwrap_or("").to_string();
                let mut keys = Vec::new();
                let mut reverse_keys = Vec::new();
                let mut tokens = keys_str.split_whitespace().peekable();
                while let Some(tok) = tokens.next() {
                    if tok.eq_ignore_ascii_case("REVERSE") {
                        if let Some(key) = tokens.next() {
                            keys.push(key.to_uppercase());
                            reverse_keys.push(true);
                        }
                    } else {
                        keys.push(tok.to_uppercase());
                        reverse_keys.push(false);
                    }
                }
                ImapCommand::Sort { keys, reverse_keys, criteria, uid }
            }

            "THREAD" => {
                let mut it = args.splitn(3, ' ');
                let algo = it.next().unwrap_or("").to_uppercase();
                let _charset = it.next().unwrap_or("");
                let criteria = it.next().unwrap_or("").to_string();
                let algorithm = if algo == "REFERENCES" {
                    ThreadAlgorithm::References
                } else {
                    ThreadAlgorithm::OrderedSubject
                };
                ImapCommand::Thread { algorithm, criteria, uid }
            }

            "STORE" => {
                let mut it = args.splitn(3, ' ');
                let sequence = it
                    .next()
                    .ok_or_else(|| MailError::SyntaxError("STORE requires a sequence set".to_string()))?
                    .to_string();
                let op_str = it
                    .next()
                    .ok_or_else(|| MailError::SyntaxError("STORE requires an operation".to_string()))?
                    .to_uppercase();
                let flags_str = it.next().unwrap_or("");

                let silent = op_str.ends_with(".SILENT");
                let op_str = op_str.trim_end_matches(".SILENT");
                let operation = match op_str {
                    "+FLAGS" => StoreOperation::Add,
                    "-FLAGS" => StoreOperation::Remove,
                    "FLAGS" => StoreOperation::Replace,
                    other => {
                        return Err(MailError::SyntaxError(format!("unknown STORE operation: {other}")))
                    }
                };
                let flags = Self::parse_flag_list(flags_str)?;
                ImapCommand::Store { sequence, operation, silent, flags, uid }
            }

            "COPY" => {
                let mut it = args.split_whitespace();
                let sequence = it
                    .next()
                    .ok_or_else(|| MailError::SyntaxError("COPY requires a sequence set".to_string()))?
                    .to_string();
                let mailbox = Self::unquote(
                    it.next().ok_or_else(|| MailError::SyntaxError("COPY requires a mailbox".to_string()))?,
                );
                ImapCommand::Copy { sequence, mailbox, uid }
            }

            "MOVE" => {
                let mut it = args.split_whitespace();
                let sequence = it
                    .next()
                    .ok_or_else(|| MailError::SyntaxError("MOVE requires a sequence set".to_string()))?
                    .to_string();
                let mailbox = Self::unquote(
                    it.next().ok_or_else(|| MailError::SyntaxError("MOVE requires a mailbox".to_string()))?,
                );
                ImapCommand::Move { sequence, mailbox, uid }
            }

            "EXPUNGE" => ImapCommand::Expunge,
            "CLOSE" => ImapCommand::Close,
            "UNSELECT" => ImapCommand::Close,
            "IDLE" => return Err(MailError::SyntaxError("IDLE has no UID/args form".to_string())),

            other => return Err(MailError::SyntaxError(format!("unknown command: {other}"))),
        };

        Ok((tag, cmd))
    }

    /// IDLE is parsed separately since it has no arguments and a
    /// distinct continuation protocol (`+ idling` / `DONE`).
    pub fn is_idle(line: &str) -> Option<String> {
        let mut parts = line.trim_end().splitn(2, ' ');
        let tag = parts.next()?.to_string();
        let command = parts.next()?.trim();
        command.eq_ignore_ascii_case("IDLE").then_some(tag)
    }

    fn require_arg<'a>(args: &'a str, command: &str) -> Result<&'a str> {
        if args.is_empty() {
            Err(MailError::SyntaxError(format!("{command} requires an argument")))
        } else {
            Ok(args)
        }
    }

    fn unquote(s: &str) -> String {
        s.trim_matches('"').to_string()
    }

    fn parse_login_credentials(input: &str) -> Result<(String, String)> {
        let input = input.trim();
        if let Some(rest) = input.strip_prefix('"') {
            if let Some(end) = rest.find('"') {
                let username = rest[..end].to_string();
                let remaining = rest[end + 1..].trim();
                if let Some(rest2) = remaining.strip_prefix('"') {
                    if let Some(end2) = rest2.find('"') {
                        return Ok((username, rest2[..end2].to_string()));
                    }
                }
            }
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.len() >= 2 {
            Ok((parts[0].to_string(), parts[1].to_string()))
        } else {
            Err(MailError::SyntaxError("invalid LOGIN credentials".to_string()))
        }
    }

    fn parse_list_args(args: &str) -> Result<(String, String)> {
        let mut it = args.split_whitespace();
        let reference = it.next().map(Self::unquote).unwrap_or_default();
        let mailbox = it.next().map(Self::unquote).unwrap_or_else(|| "*".to_string());
        Ok((reference, mailbox))
    }

    fn parse_flag_list(input: &str) -> Result<Vec<String>> {
        let input = input.trim();
        let inner = if input.starts_with('(') && input.ends_with(')') {
            &input[1..input.len() - 1]
        } else {
            input
        };
        Ok(inner.split_whitespace().map(str::to_string).collect())
    }

    fn split_parenthesized(input: &str) -> Result<(String, String)> {
        let input = input.trim();
        if !input.starts_with('(') {
            return Err(MailError::SyntaxError("expected a parenthesized list".to_string()));
        }
        let end = input
            .find(')')
            .ok_or_else(|| MailError::SyntaxError("unterminated parenthesized list".to_string()))?;
        Ok((input[1..end].to_string(), input[end + 1..].trim().to_string()))
    }

    fn parse_append(args: &str) -> Result<ImapCommand> {
        let mut it = args.split_whitespace().peekable();
        let mailbox = Self::unquote(
            it.next().ok_or_else(|| MailError::SyntaxError("APPEND requires a mailbox".to_string()))?,
        );

        let mut flags = Vec::new();
        let rest: Vec<&str> = it.collect();
        let mut idx = 0;
        if idx < rest.len() && rest[idx].starts_with('(') {
            let mut group = String::new();
            while idx < rest.len() {
                group.push_str(rest[idx]);
                group.push(' ');
                let closed = rest[idx].ends_with(')');
                idx += 1;
                if closed {
                    break;
                }
            }
            let group = group.trim().trim_matches(|c| c == '(' || c == ')').to_string();
            flags = group.split_whitespace().map(str::to_string).collect();
        }

        let mut date = None;
        if idx < rest.len() && rest[idx].starts_with('"') {
            let mut parts = Vec::new();
            while idx < rest.len() {
                let closed = rest[idx].ends_with('"') && !(parts.is_empty() && rest[idx].len() == 1);
                parts.push(rest[idx]);
                idx += 1;
                if closed {
                    break;
                }
            }
            date = Some(parts.join(" ").trim_matches('"').to_string());
        }

        let literal = rest
            .get(idx)
            .ok_or_else(|| MailError::SyntaxError("APPEND requires a literal {size}".to_string()))?;
        let size = literal
            .trim_start_matches('{')
            .trim_end_matches('}')
            .trim_end_matches('+')
            .parse::<usize>()
            .map_err(|_| MailError::SyntaxError(format!("invalid APPEND literal: {literal}")))?;

        Ok(ImapCommand::Append { mailbox, flags, date, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capability() {
        let (tag, cmd) = ImapCommand::parse("A001 CAPABILITY").unwrap();
        assert_eq!(tag, "A001");
        assert_eq!(cmd, ImapCommand::Capability);
    }

    #[test]
    fn test_parse_login() {
        let (tag, cmd) = ImapCommand::parse("A001 LOGIN john secret").unwrap();
        assert_eq!(tag, "A001");
        assert_eq!(cmd, ImapCommand::Login { username: "john".to_string(), password: "secret".to_string() });
    }

    #[test]
    fn test_parse_login_quoted() {
        let (_, cmd) = ImapCommand::parse(r#"A001 LOGIN "john" "my password""#).unwrap();
        assert_eq!(cmd, ImapCommand::Login { username: "john".to_string(), password: "my password".to_string() });
    }

    #[test]
    fn test_parse_select() {
        let (tag, cmd) = ImapCommand::parse("A002 SELECT INBOX").unwrap();
        assert_eq!(tag, "A002");
        assert_eq!(cmd, ImapCommand::Select { mailbox: "INBOX".to_string() });
    }

    #[test]
    fn test_parse_fetch() {
        let (_, cmd) = ImapCommand::parse("A003 FETCH 1 BODY[]").unwrap();
        assert!(matches!(cmd, ImapCommand::Fetch { uid: false, .. }));
    }

    #[test]
    fn test_parse_uid_fetch() {
        let (tag, cmd) = ImapCommand::parse("A003 UID FETCH 1:* FLAGS").unwrap();
        assert_eq!(tag, "A003");
        assert!(matches!(cmd, ImapCommand::Fetch { uid: true, .. }));
    }

    #[test]
    fn test_parse_logout() {
        let (tag, cmd) = ImapCommand::parse("A004 LOGOUT").unwrap();
        assert_eq!(tag, "A004");
        assert_eq!(cmd, ImapCommand::Logout);
    }

    #[test]
    fn test_parse_search_passes_through_criteria() {
        let (_, cmd) = ImapCommand::parse("A005 SEARCH SUBJECT hello").unwrap();
        assert_eq!(cmd, ImapCommand::Search { criteria: "SUBJECT hello".to_string(), uid: false });
    }

    #[test]
    fn test_parse_store_silent() {
        let (_, cmd) = ImapCommand::parse("A006 STORE 1 +FLAGS.SILENT (\\Seen)").unwrap();
        match cmd {
            ImapCommand::Store { operation, silent, flags, .. } => {
                assert_eq!(operation, StoreOperation::Add);
                assert!(silent);
                assert_eq!(flags, vec!["\\Seen".to_string()]);
            }
            _ => panic!("expected Store"),
        }
    }

    #[test]
    fn test_parse_append_literal() {
        let (tag, cmd) = ImapCommand::parse(r#"A007 APPEND Drafts (\Draft) {42}"#).unwrap();
        assert_eq!(tag, "A007");
        match cmd {
            ImapCommand::Append { mailbox, flags, size, .. } => {
                assert_eq!(mailbox, "Drafts");
                assert_eq!(flags, vec!["\\Draft".to_string()]);
                assert_eq!(size, 42);
            }
            _ => panic!("expected Append"),
        }
    }

    #[test]
    fn test_parse_sort() {
        let (_, cmd) = ImapCommand::parse("A008 SORT (REVERSE ARRIVAL) UTF-8 ALL").unwrap();
        match cmd {
            ImapCommand::Sort { keys, reverse_keys, criteria, .. } => {
                assert_eq!(keys, vec!["ARRIVAL".to_string()]);
                assert_eq!(reverse_keys, vec![true]);
                assert_eq!(criteria, "ALL");
            }
            _ => panic!("expected Sort"),
        }
    }

    #[test]
    fn test_is_idle() {
        assert_eq!(ImapCommand::is_idle("A009 IDLE"), Some("A009".to_string()));
        assert_eq!(ImapCommand::is_idle("A009 NOOP"), None);
    }

    #[test]
    fn test_done_has_no_tag() {
        let (tag, cmd) = ImapCommand::parse("DONE").unwrap();
        assert_eq!(tag, "");
        assert_eq!(cmd, ImapCommand::Done);
    }
}
