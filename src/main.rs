use anyhow::{Context, Result};
use dialoguer::Password;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;

use gonextauth_client::auth::{SqliteCredentialStore, TokenManager};
use gonextauth_client::config::{Command, Config};
use gonextauth_client::error::ClientError;
use gonextauth_client::http_client::{build_http_client, ApiClient, RequestOptions};
use gonextauth_client::models::{
    CompleteSignupRequest, EmailOnlyRequest, LoginRequest, OtpLoginRequest, ResetPasswordRequest,
    VerifyEmailRequest,
};
use gonextauth_client::retry::with_retry;
use gonextauth_client::service::AuthService;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        match e.downcast_ref::<ClientError>() {
            Some(client_error) => {
                eprintln!("{}: {}", client_error.title(), client_error.user_message());
                tracing::debug!("{:?}", client_error);
            }
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let (config, command) = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!("API: {}", config.api_url);
    tracing::debug!("Credentials: {}", config.credentials_db.display());

    let store = Arc::new(SqliteCredentialStore::open(
        &config.credentials_db,
        &config.token_prefix,
    )?);
    let http = build_http_client(config.connect_timeout, config.request_timeout)?;
    let tokens = Arc::new(TokenManager::new(store, http.clone(), config.api_url.clone()));
    let api = Arc::new(ApiClient::with_client(http, tokens));
    let service = AuthService::new(api);

    execute(&service, &config, command).await
}

fn prompt_password(prompt: &str) -> Result<String> {
    let password = Password::new()
        .with_prompt(prompt)
        .interact()
        .context("Failed to read password")?;
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }
    Ok(password)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn execute(service: &AuthService, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("Password")?,
            };
            let auth = service.login(&LoginRequest { email, password }).await?;
            println!("Signed in as {} <{}>", auth.user.full_name(), auth.user.email);
        }

        Command::OtpStart { email } => {
            let response = service
                .initiate_email_login(&EmailOnlyRequest { email })
                .await?;
            println!("{}", response.message);
        }

        Command::OtpVerify { email, otp } => {
            let auth = service
                .complete_otp_login(&OtpLoginRequest { email, otp })
                .await?;
            println!("Signed in as {} <{}>", auth.user.full_name(), auth.user.email);
        }

        Command::SignupStart { email } => {
            let response = service.initiate_signup(&EmailOnlyRequest { email }).await?;
            println!("{}", response.message);
        }

        Command::SignupComplete {
            email,
            first_name,
            last_name,
            phone,
        } => {
            let password = prompt_password("Choose a password")?;
            let user = service
                .complete_signup(&CompleteSignupRequest {
                    email,
                    password,
                    first_name,
                    last_name,
                    phone,
                })
                .await?;
            println!("Account created for {}", user.email);
        }

        Command::VerifyEmail { email, otp } => {
            let response = service
                .verify_email(&VerifyEmailRequest { email, otp })
                .await?;
            println!("{}", response.message);
        }

        Command::ForgotPassword { email } => {
            let response = service
                .forgot_password(&EmailOnlyRequest { email })
                .await?;
            println!("{}", response.message);
        }

        Command::ResetPassword { email, otp } => {
            let new_password = prompt_password("New password")?;
            let response = service
                .reset_password(&ResetPasswordRequest {
                    email,
                    otp,
                    new_password,
                })
                .await?;
            println!("{}", response.message);
        }

        Command::GoogleUrl => {
            let response = service.google_auth_url().await?;
            println!("{}", response.auth_url);
        }

        Command::GoogleCallback { code, state } => {
            let auth = service.google_callback(&code, &state).await?;
            println!("Signed in as {} <{}>", auth.user.full_name(), auth.user.email);
        }

        Command::Profile => {
            let user = with_retry(config.max_retries, Duration::from_secs(1), || {
                service.get_profile()
            })
            .await?;
            print_json(&user)?;
        }

        Command::Status => {
            let status = service.check_auth_status().await;
            match status.user {
                Some(user) if status.is_authenticated => {
                    println!("Signed in as {} <{}>", user.full_name(), user.email);
                    if let Some(pair) = service.api().tokens().store().get_tokens()? {
                        println!("Session valid until {}", pair.expires_at.to_rfc3339());
                    }
                }
                _ => println!("Not signed in"),
            }
        }

        Command::Logout => {
            service.logout().await?;
            println!("Signed out");
        }

        Command::Request { method, path, body } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method: {}", method))?;
            let body = body
                .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
                .transpose()
                .context("Request body must be valid JSON")?;

            let options = RequestOptions::default();

            let response: serde_json::Value = with_retry(
                config.max_retries,
                Duration::from_secs(1),
                || {
                    service
                        .api()
                        .request(method.clone(), &path, body.as_ref(), &options)
                },
            )
            .await?;
            print_json(&response)?;
        }
    }

    Ok(())
}
