use thiserror::Error;

/// Maximum length for server-provided error detail in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What was wrong with a single command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentProblem {
    Missing,
    Malformed(String),
    Unexpected,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Credential store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Command already registered: {0}")]
    DuplicateCommand(String),

    #[error("{}", describe_argument(.argument, .problem))]
    Argument {
        argument: String,
        problem: ArgumentProblem,
    },

    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("Request rejected ({status}): {detail}")]
    ClientError { status: u16, detail: String },

    #[error("Server unavailable after {attempts} attempt(s): {reason}")]
    UpstreamUnavailable { attempts: u32, reason: String },

    #[error("Invalid server configuration: {0}")]
    InvalidServer(String),

    #[error("Settings unavailable: {0}")]
    SettingsUnavailable(String),
}

fn describe_argument(argument: &str, problem: &ArgumentProblem) -> String {
    match problem {
        ArgumentProblem::Missing => format!("Missing required argument '{}'", argument),
        ArgumentProblem::Malformed(why) => format!("Invalid value for '{}': {}", argument, why),
        ArgumentProblem::Unexpected => format!("Unexpected argument '{}'", argument),
    }
}

impl Error {
    pub fn missing(argument: impl Into<String>) -> Self {
        Error::Argument {
            argument: argument.into(),
            problem: ArgumentProblem::Missing,
        }
    }

    pub fn malformed(argument: impl Into<String>, why: impl Into<String>) -> Self {
        Error::Argument {
            argument: argument.into(),
            problem: ArgumentProblem::Malformed(why.into()),
        }
    }

    pub fn unexpected(argument: impl Into<String>) -> Self {
        Error::Argument {
            argument: argument.into(),
            problem: ArgumentProblem::Unexpected,
        }
    }

    pub fn client(status: u16, body: &str) -> Self {
        Error::ClientError {
            status,
            detail: truncate_body(body),
        }
    }

    /// Errors the operator can fix by retyping the command.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::UnknownCommand(_) | Error::Argument { .. })
    }
}

/// Truncate a response body to avoid logging excessive data
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body_short() {
        assert_eq!(truncate_body("bad request"), "bad request");
    }

    #[test]
    fn test_truncate_body_long() {
        let body = "x".repeat(600);
        let truncated = truncate_body(&body);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.ends_with("(truncated, 600 total bytes)"));
    }

    #[test]
    fn test_truncate_body_respects_char_boundary() {
        // 499 ASCII bytes then a 3-byte char straddling the limit
        let body = format!("{}€{}", "a".repeat(499), "b".repeat(10));
        let truncated = truncate_body(&body);
        assert!(truncated.starts_with(&"a".repeat(499)));
        assert!(!truncated.contains('€'));
    }

    #[test]
    fn test_argument_messages_name_the_argument() {
        assert_eq!(
            Error::missing("site").to_string(),
            "Missing required argument 'site'"
        );
        assert_eq!(
            Error::malformed("priority", "expected an integer").to_string(),
            "Invalid value for 'priority': expected an integer"
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::UnknownCommand("x".into()).is_recoverable());
        assert!(Error::missing("site").is_recoverable());
        assert!(!Error::AuthenticationRequired("x".into()).is_recoverable());
    }
}
