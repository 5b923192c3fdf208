use regex::Regex;
/// Error classification for messages coming back from the hosted backend.
///
/// The auth provider and the data API only hand back free-text messages, so
/// both network detection and user-facing auth messages work by matching
/// known substrings.
use std::sync::LazyLock;

static NETWORK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)failed to fetch|network ?error|networkerror|connection (refused|reset|closed|timed out)|timed? ?out|econnrefused|econnreset|dns|offline|error sending request",
    )
    .unwrap()
});

/// Whether an error message describes a transient connectivity failure.
pub fn is_network_message(message: &str) -> bool {
    NETWORK_RE.is_match(message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    DuplicateEmail,
    InvalidCredentials,
    EmailNotConfirmed,
    WeakPassword,
    InvalidEmail,
    RateLimited,
    Network,
    Unknown,
}

static AUTH_PATTERNS: LazyLock<Vec<(Regex, AuthErrorKind)>> = LazyLock::new(|| {
    [
        (
            r"(?i)already registered|already exists|already been registered|duplicate key",
            AuthErrorKind::DuplicateEmail,
        ),
        (
            r"(?i)invalid login credentials|invalid (email or )?password",
            AuthErrorKind::InvalidCredentials,
        ),
        (r"(?i)email not confirmed", AuthErrorKind::EmailNotConfirmed),
        (
            r"(?i)password should be at least|password is too (short|weak)",
            AuthErrorKind::WeakPassword,
        ),
        (
            r"(?i)unable to validate email|invalid email|invalid format",
            AuthErrorKind::InvalidEmail,
        ),
        (
            r"(?i)rate limit|too many requests|for security purposes",
            AuthErrorKind::RateLimited,
        ),
    ]
    .into_iter()
    .map(|(pattern, kind)| (Regex::new(pattern).unwrap(), kind))
    .collect()
});

pub fn classify_auth_error(message: &str) -> AuthErrorKind {
    AUTH_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(message))
        .map(|(_, kind)| *kind)
        .unwrap_or_else(|| {
            if is_network_message(message) {
                AuthErrorKind::Network
            } else {
                AuthErrorKind::Unknown
            }
        })
}

/// Message to show the user for a raw auth error. Unrecognized messages are
/// returned unchanged.
pub fn friendly_auth_message(message: &str) -> String {
    let friendly = match classify_auth_error(message) {
        AuthErrorKind::DuplicateEmail => {
            "An account with this email already exists. Try signing in instead."
        }
        AuthErrorKind::InvalidCredentials => "Invalid email or password.",
        AuthErrorKind::EmailNotConfirmed => {
            "Please confirm your email address before signing in. Check your inbox for the link."
        }
        AuthErrorKind::WeakPassword => "Password must be at least 6 characters long.",
        AuthErrorKind::InvalidEmail => "Please enter a valid email address.",
        AuthErrorKind::RateLimited => "Too many attempts. Please wait a moment and try again.",
        AuthErrorKind::Network => {
            "Unable to reach the server. Check your connection and try again."
        }
        AuthErrorKind::Unknown => return message.to_string(),
    };
    friendly.to_string()
}
