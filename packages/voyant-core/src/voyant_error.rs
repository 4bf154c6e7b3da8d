//! The externally observable error boundary for the execution core (§7).
//!
//! `anyhow::Error` remains the internal transport type used inside activity
//! bodies and effects (ergonomic `?`-propagation, matching the rest of the
//! workspace). [`VoyantError`] is the only error type that crosses an
//! externally observable boundary: an emitted event, a `Job.error`, or a
//! returned [`crate::context::AdmissionApi`] result. Every variant carries
//! a short, stable `VYNT-xxxx` code so operators can grep logs for it across
//! releases, and every variant's [`VoyantError::safe_message`] has already
//! been passed through [`crate::pii::mask`] before construction.

use std::borrow::Cow;

use thiserror::Error;

use crate::error::{Categorizable, SafeErrorCategory};

/// Abstract error kinds from §7. Distinct from [`SafeErrorCategory`] (the
/// coarser category every [`Categorizable`] boundary type maps onto for
/// external exposure); `ErrorKind` is Voyant's own externally observable
/// taxonomy, with a retry policy and a stable code attached to each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    QuotaExceeded,
    CircuitOpen,
    TransientExternal,
    Timeout,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether the runtime's retry loop should re-invoke an activity that
    /// failed with this kind, absent an explicit non-retryable override.
    pub fn is_retryable_by_default(self) -> bool {
        matches!(self, ErrorKind::TransientExternal | ErrorKind::Timeout)
    }

    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VYNT-1001",
            ErrorKind::Unauthorized => "VYNT-1002",
            ErrorKind::Forbidden => "VYNT-1003",
            ErrorKind::NotFound => "VYNT-1004",
            ErrorKind::Conflict => "VYNT-1005",
            ErrorKind::QuotaExceeded => "VYNT-1006",
            ErrorKind::CircuitOpen => "VYNT-1007",
            ErrorKind::TransientExternal => "VYNT-1008",
            ErrorKind::Timeout => "VYNT-1009",
            ErrorKind::Cancelled => "VYNT-1010",
            ErrorKind::Internal => "VYNT-1011",
        }
    }
}

/// The boundary error type. Construct via the `VoyantError::*` helpers,
/// which pre-mask any interpolated detail.
#[derive(Debug, Error, Clone)]
pub enum VoyantError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("quota exceeded: {limit_name} ({current}/{max})")]
    QuotaExceeded {
        limit_name: String,
        current: u64,
        max: u64,
        retry_after_seconds: Option<u64>,
    },

    #[error("circuit open for {service}")]
    CircuitOpen { service: String },

    #[error("transient external failure: {message}")]
    TransientExternal { message: String },

    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("internal error")]
    Internal { message: String },
}

impl VoyantError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: crate::pii::mask(&message.into()),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: crate::pii::mask(&message.into()),
        }
    }

    pub fn quota_exceeded(
        limit_name: impl Into<String>,
        current: u64,
        max: u64,
        retry_after_seconds: Option<u64>,
    ) -> Self {
        Self::QuotaExceeded {
            limit_name: limit_name.into(),
            current,
            max,
            retry_after_seconds,
        }
    }

    pub fn circuit_open(service: impl Into<String>) -> Self {
        Self::CircuitOpen {
            service: service.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: crate::pii::mask(&message.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            VoyantError::Validation { .. } => ErrorKind::Validation,
            VoyantError::Unauthorized => ErrorKind::Unauthorized,
            VoyantError::Forbidden => ErrorKind::Forbidden,
            VoyantError::NotFound { .. } => ErrorKind::NotFound,
            VoyantError::Conflict { .. } => ErrorKind::Conflict,
            VoyantError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            VoyantError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            VoyantError::TransientExternal { .. } => ErrorKind::TransientExternal,
            VoyantError::Timeout { .. } => ErrorKind::Timeout,
            VoyantError::Cancelled => ErrorKind::Cancelled,
            VoyantError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// The bounded, PII-masked string fit to store in `Job.error_message`
    /// or embed in a user-facing response.
    pub fn safe_message(&self) -> String {
        crate::pii::mask(&self.to_string())
    }
}

impl Categorizable for VoyantError {
    fn category(&self) -> SafeErrorCategory {
        match self.kind() {
            ErrorKind::Validation => SafeErrorCategory::Validation,
            ErrorKind::Unauthorized | ErrorKind::Forbidden => SafeErrorCategory::Unauthorized,
            ErrorKind::NotFound => SafeErrorCategory::NotFound,
            ErrorKind::QuotaExceeded => SafeErrorCategory::RateLimited,
            ErrorKind::CircuitOpen | ErrorKind::TransientExternal | ErrorKind::Timeout => {
                SafeErrorCategory::ExternalService
            }
            ErrorKind::Conflict | ErrorKind::Cancelled | ErrorKind::Internal => {
                SafeErrorCategory::InternalError
            }
        }
    }

    fn safe_message(&self) -> Cow<'static, str> {
        Cow::Owned(self.safe_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_carries_limit_detail() {
        let err = VoyantError::quota_exceeded("jobs_per_day", 10, 10, Some(3600));
        match err.kind() {
            ErrorKind::QuotaExceeded => {}
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
        assert_eq!(err.code(), "VYNT-1006");
    }

    #[test]
    fn circuit_open_is_not_retryable_by_default() {
        assert!(!ErrorKind::CircuitOpen.is_retryable_by_default());
        assert!(ErrorKind::TransientExternal.is_retryable_by_default());
        assert!(ErrorKind::Timeout.is_retryable_by_default());
    }

    #[test]
    fn validation_message_is_masked() {
        let err = VoyantError::validation("contact me at jane@example.com");
        assert!(!err.safe_message().contains("jane@example.com"));
    }
}
