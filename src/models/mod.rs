// Data models for the GoNextAuth API

pub mod auth;

pub use auth::{
    ApiResponse, AuthResponse, CompleteSignupRequest, EmailOnlyRequest, FieldError,
    ForgotPasswordRequest, GoogleAuthRequest, GoogleAuthUrlResponse, LoginRequest,
    OtpLoginRequest, OtpType, ResendOtpRequest, ResetPasswordRequest, SignupRequest,
    UpdateProfileRequest, User, VerifyEmailRequest,
};
