use crate::error::{MailError, Result};

/// Basic email validation
pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(MailError::SyntaxError("email is empty".to_string()));
    }

    if !email.contains('@') {
        return Err(MailError::SyntaxError(
            "email must contain @".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(MailError::SyntaxError("invalid email format".to_string()));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(MailError::SyntaxError(
            "email parts cannot be empty".to_string(),
        ));
    }

    if !domain.contains('.') {
        return Err(MailError::SyntaxError(
            "domain must contain a dot".to_string(),
        ));
    }

    Ok(())
}

/// Extracts the domain portion of an address already known to be valid.
pub fn domain_of(email: &str) -> &str {
    email.rsplit('@').next().unwrap_or(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_email() {
        assert!(validate_email("test@example.com").is_ok());
        assert!(validate_email("user.name@example.co.uk").is_ok());
    }

    #[test]
    fn test_invalid_email() {
        assert!(validate_email("").is_err());
        assert!(validate_email("test").is_err());
        assert!(validate_email("test@").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("test@domain").is_err());
    }
}
