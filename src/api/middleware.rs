//! Shared-token authentication for the control HTTP surface (spec §6):
//! every request is authenticated by `body.token == config.token`.

use serde::Deserialize;

use crate::error::AgentError;

/// Implemented by every request body carrying the shared token.
pub trait TokenBody {
    fn token(&self) -> &str;
}

#[derive(Debug, Deserialize)]
pub struct TokenOnly {
    pub token: String,
}

impl TokenBody for TokenOnly {
    fn token(&self) -> &str {
        &self.token
    }
}

/// Missing token → `AuthMissing` (400); mismatch → `AuthRejected` (403).
pub fn authenticate(body: &impl TokenBody, expected: &str) -> Result<(), AgentError> {
    if body.token().is_empty() {
        return Err(AgentError::AuthMissing);
    }
    if body.token() != expected {
        return Err(AgentError::AuthRejected);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_auth_missing() {
        let body = TokenOnly { token: String::new() };
        assert!(matches!(authenticate(&body, "secret"), Err(AgentError::AuthMissing)));
    }

    #[test]
    fn wrong_token_is_auth_rejected() {
        let body = TokenOnly { token: "wrong".to_string() };
        assert!(matches!(authenticate(&body, "secret"), Err(AgentError::AuthRejected)));
    }

    #[test]
    fn matching_token_succeeds() {
        let body = TokenOnly { token: "secret".to_string() };
        assert!(authenticate(&body, "secret").is_ok());
    }
}
