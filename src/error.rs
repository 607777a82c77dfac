use thiserror::Error;

/* ============================= TAXONOMY ============================= */

/// Every failure the toolkit surfaces to the operator.
///
/// The first group mirrors the user-visible categories (config, auth,
/// validation, remote, async). The second group wraps transport and
/// (de)serialisation errors so `?` works across library boundaries.
#[derive(Debug, Error)]
pub enum ToolkitError {
    #[error("no config.yaml found (searched: {searched})")]
    ConfigMissing { searched: String },

    #[error("invalid configuration {source_name}: {reason}")]
    ConfigInvalid { source_name: String, reason: String },

    #[error("{message}; {hint}")]
    AuthRejected { message: String, hint: String },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("{status} {reason}: {body}")]
    RemoteFailure {
        status: u16,
        reason: String,
        body: String,
    },

    #[error("{what}: {reason}")]
    AsyncTimeout { what: String, reason: String },

    #[error("{what} entered state '{state}'")]
    AsyncFailed { what: String, state: String },

    #[error("{completed} succeeded, but {failed} failed (no rollback performed): {source}")]
    PartialFailure {
        completed: String,
        failed: String,
        #[source]
        source: Box<ToolkitError>,
    },

    #[error("interrupted")]
    Interrupted,

    #[error("{command} failed: {message}")]
    Tool { command: String, message: String },

    #[error("kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ToolkitError>;

impl ToolkitError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Raised when no appVault / bucket was given and none is `available`.
    pub fn no_available_app_vault() -> Self {
        Self::Validation(
            "NoAvailableAppVault: no appVault with state 'available' was found, \
             specify one explicitly"
                .to_string(),
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Process exit code for this error: usage errors share clap's code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Interrupted => 130,
            _ => 1,
        }
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_available_app_vault_is_validation() {
        let err = ToolkitError::no_available_app_vault();
        assert!(err.is_validation());
        assert!(err.to_string().contains("NoAvailableAppVault"));
    }

    #[test]
    fn test_partial_failure_message_names_both_steps() {
        let err = ToolkitError::PartialFailure {
            completed: "appMirror creation".into(),
            failed: "replication schedule".into(),
            source: Box::new(ToolkitError::RemoteFailure {
                status: 500,
                reason: "Internal Server Error".into(),
                body: "{}".into(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("appMirror creation succeeded"));
        assert!(msg.contains("replication schedule failed"));
        assert!(msg.contains("500"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ToolkitError::validation("x").exit_code(), 2);
        assert_eq!(ToolkitError::Interrupted.exit_code(), 130);
        assert_eq!(ToolkitError::not_found("x").exit_code(), 1);
    }

    #[test]
    fn test_auth_rejected_carries_hint() {
        let err = ToolkitError::AuthRejected {
            message: "401 Unauthorized".into(),
            hint: "check the Authorization header in config.yaml".into(),
        };
        assert_eq!(
            err.to_string(),
            "401 Unauthorized; check the Authorization header in config.yaml"
        );
    }
}
