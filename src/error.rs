// Error handling module
// Classifies gateway failures and maps them to user-facing messages

use serde_json::Value;
use thiserror::Error;

use crate::models::FieldError;

/// Errors surfaced to callers of the API client
#[derive(Error, Debug)]
pub enum ClientError {
    /// No response was received
    #[error("Network failure ({kind}): {message}")]
    NetworkFailure { kind: &'static str, message: String },

    /// Response received with a non-2xx status that is not a recoverable auth failure
    #[error("Request failed: {status} - {message}")]
    RequestFailed {
        status: u16,
        message: String,
        body: Option<Value>,
    },

    /// The session could not be refreshed; the user must sign in again
    #[error("Authentication expired")]
    AuthenticationExpired,

    /// 4xx with structured field errors
    #[error("Validation failed: {message}")]
    ValidationFailed {
        message: String,
        errors: Vec<FieldError>,
    },

    /// Request body could not be serialized
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 2xx body did not match the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Credential store failure
    #[error("Credential store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Friendly text for error codes the API puts in `message`
fn known_message(code: &str) -> Option<&'static str> {
    let text = match code {
        // Network
        "NETWORK_ERROR" => "Please check your internet connection and try again.",
        "TIMEOUT_ERROR" => "Request timed out. Please try again.",
        "SERVER_ERROR" => "Server is temporarily unavailable. Please try again later.",

        // Auth
        "INVALID_CREDENTIALS" => "Invalid email or password. Please try again.",
        "ACCOUNT_LOCKED" => "Your account has been temporarily locked. Please contact support.",
        "EMAIL_NOT_VERIFIED" => "Please verify your email address before signing in.",
        "ACCOUNT_DISABLED" => "Your account has been disabled. Please contact support.",
        "TOKEN_EXPIRED" => "Your session has expired. Please sign in again.",

        // OTP
        "INVALID_OTP" => "Invalid verification code. Please check and try again.",
        "OTP_EXPIRED" => "Verification code has expired. Please request a new one.",
        "OTP_LIMIT_EXCEEDED" => "Too many attempts. Please wait before trying again.",

        "RATE_LIMIT_EXCEEDED" => "Too many requests. Please wait a moment before trying again.",

        // Validation
        "INVALID_EMAIL" => "Please enter a valid email address.",
        "WEAK_PASSWORD" => "Password must be at least 8 characters with uppercase, lowercase, numbers, and special characters.",
        "PASSWORDS_DONT_MATCH" => "Passwords don't match. Please try again.",

        // Google OAuth
        "GOOGLE_AUTH_CANCELLED" => "Google sign-in was cancelled.",
        "GOOGLE_AUTH_FAILED" => "Google sign-in failed. Please try again.",
        "GOOGLE_AUTH_POPUP_BLOCKED" => "Popup was blocked. Please allow popups and try again.",

        _ => return None,
    };
    Some(text)
}

fn friendly(message: &str, fallback: &str) -> String {
    if message.is_empty() {
        return fallback.to_string();
    }
    known_message(message).unwrap_or(message).to_string()
}

impl ClientError {
    /// Whether the caller must force a fresh sign-in
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ClientError::AuthenticationExpired)
    }

    /// HTTP status of the failed response, if one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short heading for the failure
    pub fn title(&self) -> &'static str {
        match self {
            ClientError::NetworkFailure { kind: "timeout", .. } => "Request Timeout",
            ClientError::NetworkFailure { .. } => "Connection Error",
            ClientError::AuthenticationExpired => "Session Expired",
            ClientError::ValidationFailed { .. } => "Validation Error",
            ClientError::RequestFailed { status, .. } => match status {
                400 => "Invalid Request",
                401 => "Authentication Failed",
                403 => "Access Denied",
                404 => "Not Found",
                409 => "Conflict",
                422 => "Validation Error",
                429 => "Too Many Requests",
                500..=599 => "Server Error",
                _ => "Error",
            },
            ClientError::InvalidRequest(_)
            | ClientError::InvalidResponse(_)
            | ClientError::Store(_) => "Error",
        }
    }

    /// Human-readable message suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self {
            ClientError::NetworkFailure { kind: "timeout", .. } => {
                "Request timed out. Please try again.".to_string()
            }
            ClientError::NetworkFailure { .. } => {
                "Please check your internet connection and try again.".to_string()
            }
            ClientError::AuthenticationExpired => {
                "Session expired. Please login again.".to_string()
            }
            ClientError::ValidationFailed { message, errors } => {
                if errors.is_empty() {
                    friendly(message, "Please check your input.")
                } else {
                    errors
                        .iter()
                        .map(|e| e.message.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                }
            }
            ClientError::RequestFailed {
                status, message, ..
            } => match status {
                400 => friendly(message, "Please check your input and try again."),
                401 => friendly(message, "Please sign in again."),
                403 => "You don't have permission to perform this action.".to_string(),
                404 => "The requested resource was not found.".to_string(),
                409 => friendly(message, "A conflict occurred with your request."),
                422 => friendly(message, "Please check your input."),
                429 => "Please wait a moment before trying again.".to_string(),
                500 | 502 | 503 | 504 => {
                    "Server is temporarily unavailable. Please try again later.".to_string()
                }
                _ => friendly(message, "An unexpected error occurred."),
            },
            ClientError::InvalidRequest(_)
            | ClientError::InvalidResponse(_)
            | ClientError::Store(_) => {
                "An unexpected error occurred. Please try again.".to_string()
            }
        }
    }
}

/// Categorize a transport error the way the logs report it
pub(crate) fn error_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::NetworkFailure {
            kind: error_kind(&e),
            message: e.to_string(),
        }
    }
}

/// Build the error for a non-2xx response from its status and parsed body
pub(crate) fn classify_response(status: u16, body: Option<Value>) -> ClientError {
    let message = body
        .as_ref()
        .and_then(|b| b.get("message"))
        .and_then(|m| m.as_str())
        .or_else(|| {
            body.as_ref()
                .and_then(|b| b.get("error"))
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
        })
        .unwrap_or_default()
        .to_string();

    if (400..500).contains(&status) {
        let field_errors = body
            .as_ref()
            .and_then(|b| b.get("error"))
            .filter(|e| e.is_array())
            .and_then(|e| serde_json::from_value::<Vec<FieldError>>(e.clone()).ok());

        if let Some(errors) = field_errors.filter(|errors| !errors.is_empty()) {
            return ClientError::ValidationFailed { message, errors };
        }
    }

    ClientError::RequestFailed {
        status,
        message,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_messages() {
        let err = ClientError::RequestFailed {
            status: 429,
            message: "Rate limit exceeded".to_string(),
            body: None,
        };
        assert_eq!(err.to_string(), "Request failed: 429 - Rate limit exceeded");

        let err = ClientError::NetworkFailure {
            kind: "timeout",
            message: "operation timed out".to_string(),
        };
        assert_eq!(err.to_string(), "Network failure (timeout): operation timed out");

        assert_eq!(
            ClientError::AuthenticationExpired.to_string(),
            "Authentication expired"
        );
    }

    #[test]
    fn test_classify_validation_errors() {
        let body = json!({
            "success": false,
            "message": "Validation failed",
            "error": [
                {"field": "email", "message": "Email is invalid", "value": "nope"},
                {"field": "password", "message": "Password is too short"}
            ]
        });

        match classify_response(422, Some(body)) {
            ClientError::ValidationFailed { message, errors } => {
                assert_eq!(message, "Validation failed");
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].field, "email");
                assert_eq!(errors[0].value.as_deref(), Some("nope"));
                assert_eq!(errors[1].value, None);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_classify_validation_error_without_field() {
        let body = json!({
            "success": false,
            "message": "Validation failed",
            "error": [
                {"message": "Request body is malformed"},
                {"field": "otp", "message": "OTP must be 6 digits"}
            ]
        });

        match classify_response(400, Some(body)) {
            ClientError::ValidationFailed { errors, .. } => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].field, "");
                assert_eq!(errors[1].field, "otp");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_classify_plain_failure() {
        let body = json!({"success": false, "message": "INVALID_CREDENTIALS"});
        let err = classify_response(400, Some(body));
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.user_message(), "Invalid email or password. Please try again.");
    }

    #[test]
    fn test_classify_nested_error_message() {
        let body = json!({"success": false, "error": {"message": "Conflict on email", "field": "email"}});
        match classify_response(409, Some(body)) {
            ClientError::RequestFailed { status, message, .. } => {
                assert_eq!(status, 409);
                assert_eq!(message, "Conflict on email");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_server_errors_never_validation() {
        let body = json!({"message": "boom", "error": [{"field": "x", "message": "y"}]});
        assert!(matches!(
            classify_response(500, Some(body)),
            ClientError::RequestFailed { status: 500, .. }
        ));
    }

    #[test]
    fn test_classify_without_body() {
        let err = classify_response(503, None);
        assert_eq!(
            err.user_message(),
            "Server is temporarily unavailable. Please try again later."
        );
        assert_eq!(err.title(), "Server Error");
    }

    #[test]
    fn test_user_messages_by_status() {
        let failed = |status| ClientError::RequestFailed {
            status,
            message: String::new(),
            body: None,
        };
        assert_eq!(
            failed(403).user_message(),
            "You don't have permission to perform this action."
        );
        assert_eq!(failed(404).user_message(), "The requested resource was not found.");
        assert_eq!(failed(401).user_message(), "Please sign in again.");
        assert_eq!(
            failed(429).user_message(),
            "Please wait a moment before trying again."
        );
        assert_eq!(failed(418).user_message(), "An unexpected error occurred.");
    }

    #[test]
    fn test_validation_user_message_joins_fields() {
        let err = ClientError::ValidationFailed {
            message: "Validation failed".to_string(),
            errors: vec![
                FieldError {
                    field: "email".to_string(),
                    message: "Email is invalid".to_string(),
                    value: None,
                },
                FieldError {
                    field: "phone".to_string(),
                    message: "Phone is invalid".to_string(),
                    value: None,
                },
            ],
        };
        assert_eq!(err.user_message(), "Email is invalid, Phone is invalid");
    }

    #[test]
    fn test_session_expired() {
        assert!(ClientError::AuthenticationExpired.is_session_expired());
        assert_eq!(
            ClientError::AuthenticationExpired.user_message(),
            "Session expired. Please login again."
        );
        assert_eq!(ClientError::AuthenticationExpired.status(), None);
    }
}
