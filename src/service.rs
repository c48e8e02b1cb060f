// Typed wrappers for the GoNextAuth endpoints

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{ClientError, Result};
use crate::http_client::{ApiClient, RequestOptions};
use crate::models::{
    ApiResponse, AuthResponse, CompleteSignupRequest, EmailOnlyRequest, ForgotPasswordRequest,
    GoogleAuthRequest, GoogleAuthUrlResponse, LoginRequest, OtpLoginRequest, ResendOtpRequest,
    ResetPasswordRequest, SignupRequest, UpdateProfileRequest, User, VerifyEmailRequest,
};

/// Result of [`AuthService::check_auth_status`]
#[derive(Debug, Clone)]
pub struct AuthStatus {
    pub is_authenticated: bool,
    pub user: Option<User>,
}

/// Auth endpoints of the API
///
/// Sign-in endpoints go through the public path; profile endpoints go
/// through the authenticated gateway.
pub struct AuthService {
    api: Arc<ApiClient>,
}

/// Fail on an envelope that reports `success: false` despite a 2xx status
fn ensure_success<T>(response: ApiResponse<T>) -> Result<ApiResponse<T>> {
    if response.success {
        return Ok(response);
    }
    Err(ClientError::RequestFailed {
        status: 200,
        message: response.message,
        body: response.error,
    })
}

fn require_data<T>(response: ApiResponse<T>) -> Result<T> {
    let message = response.message;
    response.data.ok_or_else(|| {
        ClientError::InvalidResponse(format!("Response has no data: {}", message))
    })
}

impl AuthService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    async fn public<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<ApiResponse<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.public_with(method, path, body, &RequestOptions::default())
            .await
    }

    async fn public_with<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: &RequestOptions,
    ) -> Result<ApiResponse<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        let response = self
            .api
            .public_request(method, path, body.as_ref(), options)
            .await?;
        ensure_success(response)
    }

    /// Store the session carried by a sign-in response
    fn sign_in(&self, response: ApiResponse<AuthResponse>) -> Result<AuthResponse> {
        let auth = require_data(response)?;
        self.api.tokens().install(&auth)?;
        Ok(auth)
    }

    // ---------------------------------------------------------------------
    // Google OAuth
    // ---------------------------------------------------------------------

    pub async fn google_auth_url(&self) -> Result<GoogleAuthUrlResponse> {
        let response = self
            .public::<(), _>(Method::GET, "/auth/google/url", None)
            .await?;
        require_data(response)
    }

    pub async fn google_auth(&self, request: &GoogleAuthRequest) -> Result<AuthResponse> {
        let response = self
            .public(Method::POST, "/auth/google/token", Some(request))
            .await?;
        self.sign_in(response)
    }

    pub async fn google_callback(&self, code: &str, state: &str) -> Result<AuthResponse> {
        let options = RequestOptions::default()
            .query("code", code)
            .query("state", state);
        let response = self
            .public_with::<(), _>(Method::GET, "/auth/google/callback", None, &options)
            .await?;
        self.sign_in(response)
    }

    // ---------------------------------------------------------------------
    // Multi-step signup and OTP login
    // ---------------------------------------------------------------------

    pub async fn initiate_signup(&self, request: &EmailOnlyRequest) -> Result<ApiResponse> {
        self.public(Method::POST, "/auth/signup/initiate", Some(request))
            .await
    }

    pub async fn complete_signup(&self, request: &CompleteSignupRequest) -> Result<User> {
        let response = self
            .public(Method::POST, "/auth/signup/complete", Some(request))
            .await?;
        require_data(response)
    }

    pub async fn initiate_email_login(&self, request: &EmailOnlyRequest) -> Result<ApiResponse> {
        self.public(Method::POST, "/auth/login/email", Some(request))
            .await
    }

    pub async fn complete_otp_login(&self, request: &OtpLoginRequest) -> Result<AuthResponse> {
        let response = self
            .public(Method::POST, "/auth/login/otp", Some(request))
            .await?;
        self.sign_in(response)
    }

    // ---------------------------------------------------------------------
    // Password flows
    // ---------------------------------------------------------------------

    pub async fn signup(&self, request: &SignupRequest) -> Result<User> {
        let response = self
            .public(Method::POST, "/auth/signup", Some(request))
            .await?;
        require_data(response)
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<AuthResponse> {
        let response = self
            .public(Method::POST, "/auth/login", Some(request))
            .await?;
        self.sign_in(response)
    }

    pub async fn verify_email(&self, request: &VerifyEmailRequest) -> Result<ApiResponse> {
        self.public(Method::POST, "/auth/verify-email", Some(request))
            .await
    }

    pub async fn forgot_password(&self, request: &ForgotPasswordRequest) -> Result<ApiResponse> {
        self.public(Method::POST, "/auth/forgot-password", Some(request))
            .await
    }

    pub async fn reset_password(&self, request: &ResetPasswordRequest) -> Result<ApiResponse> {
        self.public(Method::POST, "/auth/reset-password", Some(request))
            .await
    }

    pub async fn resend_otp(&self, request: &ResendOtpRequest) -> Result<ApiResponse> {
        self.public(Method::POST, "/auth/resend-otp", Some(request))
            .await
    }

    /// Revoke the refresh token remotely and always clear local credentials
    pub async fn logout(&self) -> Result<()> {
        let tokens = self.api.tokens();
        let refresh_token = match tokens.store().get_refresh_token() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Failed to read refresh token, signing out locally: {:#}", e);
                None
            }
        };

        let remote = match refresh_token {
            Some(refresh_token) => {
                let body = serde_json::json!({ "refresh_token": refresh_token });
                self.public::<_, serde_json::Value>(Method::POST, "/auth/logout", Some(&body))
                    .await
                    .map(|_| ())
            }
            None => Ok(()),
        };

        if let Err(ref e) = remote {
            tracing::warn!("Remote logout failed, clearing local session anyway: {}", e);
        }
        tokens.clear()?;
        tracing::info!("Signed out");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Protected
    // ---------------------------------------------------------------------

    pub async fn get_profile(&self) -> Result<User> {
        let response: ApiResponse<User> = self.api.get("/auth/profile").await?;
        let user = require_data(ensure_success(response)?)?;
        if let Err(e) = self.api.tokens().store().set_user(&user) {
            tracing::warn!("Failed to cache user profile: {:#}", e);
        }
        Ok(user)
    }

    pub async fn update_profile(&self, request: &UpdateProfileRequest) -> Result<User> {
        let response: ApiResponse<User> = self.api.put("/auth/profile", request).await?;
        let user = require_data(ensure_success(response)?)?;
        if let Err(e) = self.api.tokens().store().set_user(&user) {
            tracing::warn!("Failed to cache user profile: {:#}", e);
        }
        Ok(user)
    }

    /// Never fails: any error means "not authenticated"
    pub async fn check_auth_status(&self) -> AuthStatus {
        match self.get_profile().await {
            Ok(user) => AuthStatus {
                is_authenticated: true,
                user: Some(user),
            },
            Err(e) => {
                tracing::debug!("Auth status check failed: {}", e);
                AuthStatus {
                    is_authenticated: false,
                    user: None,
                }
            }
        }
    }
}
