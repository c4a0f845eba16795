/// How the scheduler should react to a failed render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Upstream usage limit reached; nothing further can succeed.
    QuotaExhausted,
    SafetyFilter,
    Other,
}

/// Classifies a render failure from its message.
///
/// The upstream API only reports quota exhaustion as free text, so this is a
/// case-insensitive substring match. Keep every such heuristic in here.
pub fn classify_failure(message: &str) -> FailureClass {
    let message = message.to_lowercase();
    if message.contains("quota exceeded") {
        FailureClass::QuotaExhausted
    } else if message.contains("safety filter") || message.contains("filtered") {
        FailureClass::SafetyFilter
    } else {
        FailureClass::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoryboardError;

    #[test]
    fn quota_match_ignores_case() {
        assert_eq!(classify_failure("Quota Exceeded for metric"), FailureClass::QuotaExhausted);
        assert_eq!(classify_failure("QUOTA EXCEEDED"), FailureClass::QuotaExhausted);
        assert_eq!(classify_failure("quota exceeded"), FailureClass::QuotaExhausted);
    }

    #[test]
    fn typed_errors_classify_by_their_message() {
        let quota = StoryboardError::QuotaExceeded("try tomorrow".into());
        assert_eq!(classify_failure(&quota.to_string()), FailureClass::QuotaExhausted);

        let filtered = StoryboardError::SafetyFilter("unsafe".into());
        assert_eq!(classify_failure(&filtered.to_string()), FailureClass::SafetyFilter);
    }

    #[test]
    fn unrelated_failures_are_other() {
        assert_eq!(classify_failure("connection reset"), FailureClass::Other);
        assert_eq!(classify_failure("quota almost used"), FailureClass::Other);
    }
}
