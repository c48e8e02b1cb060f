use serde::{Deserialize, Serialize};
use serde_json::Value;

// ==================================================================================================
// Envelope
// ==================================================================================================

/// Envelope wrapping every response from the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T = Value> {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// One entry of a structured validation failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    /// Omitted by the server for errors not tied to one field
    #[serde(default)]
    pub field: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

// ==================================================================================================
// Users and sessions
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub is_email_verified: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub auth_provider: String,
    #[serde(default)]
    pub last_activity_at: String,
    #[serde(default)]
    pub created_at: String,
}

fn default_true() -> bool {
    true
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Returned by every endpoint that signs a user in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleAuthUrlResponse {
    pub auth_url: String,
}

// ==================================================================================================
// Requests
// ==================================================================================================

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Second step of the multi-step signup; same shape as a direct signup
pub type CompleteSignupRequest = SignupRequest;

#[derive(Debug, Clone, Serialize)]
pub struct EmailOnlyRequest {
    pub email: String,
}

pub type ForgotPasswordRequest = EmailOnlyRequest;

#[derive(Debug, Clone, Serialize)]
pub struct OtpLoginRequest {
    pub email: String,
    pub otp: String,
}

pub type VerifyEmailRequest = OtpLoginRequest;

#[derive(Debug, Clone, Serialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    EmailVerification,
    PasswordReset,
    Login,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResendOtpRequest {
    pub email: String,
    pub otp_type: OtpType,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoogleAuthRequest {
    pub access_token: String,
}

/// Partial profile update; unset fields are left untouched
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateProfileRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}
