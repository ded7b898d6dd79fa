//! Cloud error types and failure classification.
//!
//! The provider reports failures as free text. Two families matter to the
//! broker: entities that are absent (or not visible yet, since a freshly
//! created account can be reported missing for several seconds) and
//! entities or limits that already exist. Everything else is generic.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Result type alias for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Meta-category of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Entity absent or not yet visible. Retryable.
    NotFound,
    /// Entity exists already, or a limit was hit.
    AlreadyExists,
    Generic,
}

/// Errors surfaced by the cloud client.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The provider rejected the call.
    #[error("{message}")]
    Api { kind: ErrorKind, message: String },

    /// The provider succeeded but its output did not have the expected shape.
    #[error("unexpected output from `{command}`: {output}")]
    Format { command: String, output: String },

    #[error("timed out waiting for {operation} after {attempts} attempts")]
    Timeout { operation: String, attempts: u32 },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON from `{command}`: {source}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CloudError {
    /// Build an API error from a raw provider message, classifying it.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        CloudError::Api {
            kind: classify(&message),
            message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CloudError::Api { kind, .. } => *kind,
            _ => ErrorKind::Generic,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

const NOT_FOUND_TOKENS: &[&str] = &["NoSuchEntity", "NotFound", "NOT_FOUND", "notFound"];

const ALREADY_EXISTS_TOKENS: &[&str] = &[
    "EntityAlreadyExists",
    "AlreadyExists",
    "ALREADY_EXISTS",
    "alreadyExists",
    "LimitExceeded",
];

// `(NoSuchEntity)` style tokens, and gcloud's `(gcloud.x.y) NOT_FOUND:` status code.
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(([A-Za-z_]+)\)|\) ([A-Z][A-Z_]+):").expect("token pattern is valid")
});

/// Classify a raw provider error message.
pub fn classify(message: &str) -> ErrorKind {
    for caps in TOKEN_RE.captures_iter(message) {
        let Some(token) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        let token = token.as_str();
        if NOT_FOUND_TOKENS.contains(&token) {
            return ErrorKind::NotFound;
        }
        if ALREADY_EXISTS_TOKENS.contains(&token) {
            return ErrorKind::AlreadyExists;
        }
    }
    ErrorKind::Generic
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_parenthesized_tokens() {
        assert_eq!(
            classify("An error occurred (NoSuchEntity) when calling the GetRole operation"),
            ErrorKind::NotFound
        );
        assert_eq!(
            classify("An error occurred (EntityAlreadyExists) when calling CreateRole"),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            classify("An error occurred (LimitExceeded) when calling CreateAccessKey"),
            ErrorKind::AlreadyExists
        );
    }

    #[test]
    fn classifies_gcloud_status_codes() {
        assert_eq!(
            classify(
                "ERROR: (gcloud.iam.service-accounts.keys.create) NOT_FOUND: \
                 Service account projects/-/serviceAccounts/x does not exist."
            ),
            ErrorKind::NotFound
        );
        assert_eq!(
            classify("ERROR: (gcloud.iam.roles.create) ALREADY_EXISTS: A role named x exists."),
            ErrorKind::AlreadyExists
        );
    }

    #[test]
    fn unknown_tokens_are_generic() {
        assert_eq!(
            classify("ERROR: (gcloud.projects.add-iam-policy-binding) PERMISSION_DENIED: nope"),
            ErrorKind::Generic
        );
        assert_eq!(classify("An error occurred (AccessDenied)"), ErrorKind::Generic);
        assert_eq!(classify(""), ErrorKind::Generic);
    }

    #[test]
    fn error_kind_accessors() {
        let err = CloudError::from_message("(NoSuchEntity) gone");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "(NoSuchEntity) gone");

        let timeout = CloudError::Timeout {
            operation: "grant".to_string(),
            attempts: 4,
        };
        assert_eq!(timeout.kind(), ErrorKind::Generic);
    }
}
