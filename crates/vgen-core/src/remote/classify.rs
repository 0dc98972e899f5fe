//! Classify HTTP status codes and remote error strings into [`ApiErrorKind`].

use super::ApiErrorKind;

/// Classify an HTTP status code for policy decisions.
pub fn classify_http_status(code: u16) -> ApiErrorKind {
    match code {
        401 | 403 => ApiErrorKind::Unauthorized,
        402 => ApiErrorKind::NoCredits,
        429 | 503 => ApiErrorKind::HeavyLoad,
        _ => ApiErrorKind::Transient,
    }
}

/// Classify a remote error payload. The service reports failures as loose
/// strings; match the known markers, most specific first.
pub fn classify_message(message: &str) -> ApiErrorKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("heavy_load") || lower.contains("heavy load") {
        ApiErrorKind::HeavyLoad
    } else if lower.contains("too_many_concurrent_tasks") || lower.contains("concurrent tasks") {
        ApiErrorKind::TooManyConcurrentTasks
    } else if lower.contains("phone_number_required") || lower.contains("phone number") {
        ApiErrorKind::PhoneRequired
    } else if lower.contains("quota") || lower.contains("credit") {
        ApiErrorKind::NoCredits
    } else if lower.contains("unauthorized") || lower.contains("token") {
        ApiErrorKind::Unauthorized
    } else {
        ApiErrorKind::Transient
    }
}

/// Combine status and body: a known body marker wins over the status code,
/// since the service reports e.g. heavy load with HTTP 200 envelopes.
pub fn classify(status: u16, body: &str) -> ApiErrorKind {
    match classify_message(body) {
        ApiErrorKind::Transient => classify_http_status(status),
        kind => kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_401_and_403_unauthorized() {
        assert_eq!(classify_http_status(401), ApiErrorKind::Unauthorized);
        assert_eq!(classify_http_status(403), ApiErrorKind::Unauthorized);
    }

    #[test]
    fn status_429_and_503_heavy_load() {
        assert_eq!(classify_http_status(429), ApiErrorKind::HeavyLoad);
        assert_eq!(classify_http_status(503), ApiErrorKind::HeavyLoad);
    }

    #[test]
    fn status_5xx_transient() {
        assert_eq!(classify_http_status(500), ApiErrorKind::Transient);
        assert_eq!(classify_http_status(502), ApiErrorKind::Transient);
    }

    #[test]
    fn message_markers() {
        assert_eq!(classify_message("Sora heavy_load, retry later"), ApiErrorKind::HeavyLoad);
        assert_eq!(
            classify_message("too_many_concurrent_tasks for this user"),
            ApiErrorKind::TooManyConcurrentTasks
        );
        assert_eq!(
            classify_message("phone_number_required"),
            ApiErrorKind::PhoneRequired
        );
        assert_eq!(classify_message("Quota exceeded"), ApiErrorKind::NoCredits);
        assert_eq!(classify_message("no credit left"), ApiErrorKind::NoCredits);
        assert_eq!(classify_message("Token Expired or Invalid"), ApiErrorKind::Unauthorized);
        assert_eq!(classify_message("connection reset"), ApiErrorKind::Transient);
    }

    #[test]
    fn body_marker_wins_over_status() {
        assert_eq!(classify(200, "heavy_load"), ApiErrorKind::HeavyLoad);
        assert_eq!(classify(400, "quota exceeded"), ApiErrorKind::NoCredits);
        assert_eq!(classify(401, "weird body"), ApiErrorKind::Unauthorized);
        assert_eq!(classify(500, ""), ApiErrorKind::Transient);
    }
}
