//! Error types shared by every controller.

use std::fmt;

use thiserror::Error;

/// Coarse classification used for retry decisions and metrics labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    Remote,
    InvariantViolation,
    Aggregate,
    Validation,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Remote => "remote",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::Aggregate => "aggregate",
            ErrorKind::Validation => "validation",
            ErrorKind::Other => "other",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("conflict on {kind} {name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    /// Kubernetes API error not covered by the variants above.
    #[error("kubernetes error: {0}")]
    Kube(kube::Error),

    /// A managed cluster, the registry or the identity provider failed.
    #[error("remote {target}: {message}")]
    Remote { target: String, message: String },

    /// A concurrent mutation or routing bug broke an assumption the current
    /// reconciliation relies on.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(kind: impl Into<String>, name: impl fmt::Display) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.to_string(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, name: impl fmt::Display) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.to_string(),
        }
    }

    pub fn conflict(
        kind: impl Into<String>,
        name: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub fn remote(target: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Remote {
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::Kube(_) | Error::Remote { .. } => ErrorKind::Remote,
            Error::InvariantViolation(_) => ErrorKind::InvariantViolation,
            Error::Aggregate(_) => ErrorKind::Aggregate,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Serialization(_) | Error::Other(_) => ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => Self::NotFound {
                kind: resp.reason.clone(),
                name: resp.message.clone(),
            },
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind: resp.reason.clone(),
                    name: resp.message.clone(),
                }
            }
            kube::Error::Api(resp) if resp.code == 409 => Self::Conflict {
                kind: resp.reason.clone(),
                name: String::new(),
                message: resp.message.clone(),
            },
            _ => Self::Kube(err),
        }
    }
}

/// Several independent failures collected while deleting content, returned
/// together so the caller retries the whole deletion.
#[derive(Debug, Default)]
pub struct AggregateError(pub Vec<Error>);

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: Error) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn errors(&self) -> &[Error] {
        &self.0
    }

    /// `Ok` when nothing was collected.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(self))
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            return write!(f, "{}", self.0[0]);
        }
        write!(f, "[")?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{err}")?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_renders_every_error() {
        let mut agg = AggregateError::new();
        agg.push(Error::remote("cluster cls1", "connection refused"));
        agg.push(Error::not_found("Namespace", "proj1/ns1"));
        let err = agg.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aggregate);
        assert_eq!(
            err.to_string(),
            "[remote cluster cls1: connection refused, Namespace proj1/ns1 not found]"
        );
    }

    #[test]
    fn empty_aggregate_is_ok() {
        assert!(AggregateError::new().into_result().is_ok());
    }

    #[test]
    fn kube_status_codes_are_classified() {
        let not_found = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "projects \"p\" not found".into(),
            reason: "NotFound".into(),
            code: 404,
        });
        assert!(Error::from(not_found).is_not_found());

        let conflict = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "the object has been modified".into(),
            reason: "Conflict".into(),
            code: 409,
        });
        assert!(Error::from(conflict).is_conflict());
    }
}
