//! Sanitized error categorization shared across the crate's error types.
//!
//! `SafeErrorCategory` and `Categorizable` are the contract every boundary
//! error type in this crate implements: internal detail stays internal,
//! only a category and a reviewed safe message ever cross an external
//! surface (an event payload, an API response).
//!
//! # The Error Boundary Rule
//!
//! > **No raw internal error detail ever crosses the EventBus boundary.**
//!
//! `anyhow::Error` is internal transport, used freely inside activity and
//! effect bodies. [`crate::voyant_error::VoyantError`] is the boundary type
//! that implements [`Categorizable`] and is the only thing handed to an
//! event payload or API response.

use std::borrow::Cow;
use std::fmt;

/// Error category for sanitized failure events.
///
/// - `Validation`: safe to expose details (user input errors)
/// - `NotFound`: safe to expose (resource not found)
/// - `Unauthorized`: never expose details (auth failure)
/// - `RateLimited`: safe to expose (rate limit hit)
/// - `InternalError`: never expose details (server error)
/// - `ExternalService`: never expose details (third-party failure)
/// - `AIFailure`: expose only structured retry info, never prompts/responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeErrorCategory {
    Validation,
    NotFound,
    Unauthorized,
    RateLimited,
    InternalError,
    ExternalService,
    AIFailure,
}

impl fmt::Display for SafeErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafeErrorCategory::Validation => write!(f, "validation_error"),
            SafeErrorCategory::NotFound => write!(f, "not_found"),
            SafeErrorCategory::Unauthorized => write!(f, "unauthorized"),
            SafeErrorCategory::RateLimited => write!(f, "rate_limited"),
            SafeErrorCategory::InternalError => write!(f, "internal_error"),
            SafeErrorCategory::ExternalService => write!(f, "external_service_error"),
            SafeErrorCategory::AIFailure => write!(f, "ai_failure"),
        }
    }
}

/// Implemented by every boundary error type so it can be categorized for
/// safe external exposure.
///
/// # Safe Message Contract
///
/// - `Validation` and `NotFound` categories MAY return their display string
///   verbatim.
/// - `Unauthorized`, `InternalError`, `ExternalService` MUST return generic
///   messages.
pub trait Categorizable: std::error::Error {
    fn category(&self) -> SafeErrorCategory;
    fn safe_message(&self) -> Cow<'static, str>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    impl Categorizable for Boom {
        fn category(&self) -> SafeErrorCategory {
            SafeErrorCategory::InternalError
        }
        fn safe_message(&self) -> Cow<'static, str> {
            "An internal error occurred".into()
        }
    }

    #[test]
    fn category_display_is_stable() {
        assert_eq!(SafeErrorCategory::RateLimited.to_string(), "rate_limited");
        assert_eq!(SafeErrorCategory::AIFailure.to_string(), "ai_failure");
    }

    #[test]
    fn categorizable_hides_detail_for_internal_errors() {
        let err = Boom;
        assert_eq!(err.category(), SafeErrorCategory::InternalError);
        assert_eq!(err.safe_message(), "An internal error occurred");
    }
}
