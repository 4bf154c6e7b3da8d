//! PII masking for strings crossing the process boundary (§4.7).
//!
//! Applied once, at the boundary — never retroactively. Internal `tracing`
//! spans may still carry raw values at `debug` level (they never leave the
//! process); anything landing in `Job.error_message`, a `CommandFailed`-style
//! externalized message, or a log field flagged as user-supplied goes
//! through [`mask`] first.

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

// Bare 9-digit sequences, but only once the SSN pattern (with dashes) has
// already been masked, so a dashed SSN is never double-matched as a bare
// digit run of the same length minus separators.
static NINE_DIGIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{9}\b").unwrap());

const EMAIL_PLACEHOLDER: &str = "***@***.***";
const SSN_PLACEHOLDER: &str = "***-**-****";
const NINE_DIGIT_PLACEHOLDER: &str = "*********";

/// Replace email addresses, SSNs, and bare 9-digit sequences with
/// fixed-width placeholders.
pub fn mask(input: &str) -> String {
    let masked = EMAIL_RE.replace_all(input, EMAIL_PLACEHOLDER);
    let masked = SSN_RE.replace_all(&masked, SSN_PLACEHOLDER);
    let masked = NINE_DIGIT_RE.replace_all(&masked, NINE_DIGIT_PLACEHOLDER);
    masked.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_email() {
        let out = mask("reach me at jane.doe+alerts@example.com please");
        assert!(!out.contains("jane.doe"));
        assert!(out.contains(EMAIL_PLACEHOLDER));
    }

    #[test]
    fn masks_ssn() {
        let out = mask("ssn on file: 123-45-6789");
        assert!(!out.contains("123-45-6789"));
        assert!(out.contains(SSN_PLACEHOLDER));
    }

    #[test]
    fn masks_bare_nine_digit_sequence() {
        let out = mask("account ref 123456789 confirmed");
        assert!(!out.contains("123456789"));
        assert!(out.contains(NINE_DIGIT_PLACEHOLDER));
    }

    #[test]
    fn leaves_unrelated_text_untouched() {
        let out = mask("job abc123 completed in 42 seconds");
        assert_eq!(out, "job abc123 completed in 42 seconds");
    }
}
