use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::DEFAULT_TOKEN_PREFIX;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api/v1";

/// GoNextAuth command-line client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// API base URL
    #[arg(short = 'u', long, env = "API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// HTTP request timeout in seconds
    #[arg(short, long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub timeout: u64,

    /// Prefix for stored credential keys
    #[arg(long, env = "TOKEN_PREFIX", default_value = DEFAULT_TOKEN_PREFIX)]
    pub token_prefix: String,

    /// Path to the SQLite credentials database
    #[arg(short = 'd', long, env = "CREDENTIALS_DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Sign in with email and password
    Login {
        email: String,
        /// Prompted for when omitted
        #[arg(short, long, env = "GONEXTAUTH_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Send a one-time sign-in code
    OtpStart { email: String },
    /// Sign in with a one-time code
    OtpVerify { email: String, otp: String },
    /// Start a new account
    SignupStart { email: String },
    /// Finish creating an account
    SignupComplete {
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Confirm an email address with the code that was sent to it
    VerifyEmail { email: String, otp: String },
    /// Request a password reset code
    ForgotPassword { email: String },
    /// Set a new password using a reset code
    ResetPassword { email: String, otp: String },
    /// Print the Google sign-in URL
    GoogleUrl,
    /// Finish a Google sign-in from the callback parameters
    GoogleCallback { code: String, state: String },
    /// Show the signed-in user's profile
    Profile,
    /// Show whether a valid session is held
    Status,
    /// Sign out and clear stored credentials
    Logout,
    /// Send an authenticated request and print the JSON response
    Request {
        method: String,
        path: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // API
    pub api_url: String,

    // Timeouts
    pub request_timeout: Duration,
    pub connect_timeout: Duration,

    // Credentials
    pub token_prefix: String,
    pub credentials_db: PathBuf,

    // Retries for transient failures
    pub max_retries: u32,

    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let command = args.command.clone();
        Ok((Self::from_args(args)?, command))
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let credentials_db = match args.db_file {
            Some(path) => expand_tilde(&path),
            None => default_credentials_db()
                .context("Cannot locate a data directory; set CREDENTIALS_DB_FILE")?,
        };

        Ok(Config {
            api_url: args.api_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(args.timeout),
            connect_timeout: Duration::from_secs(env_or("HTTP_CONNECT_TIMEOUT", 10)),
            token_prefix: args.token_prefix,
            credentials_db,
            max_retries: env_or("HTTP_MAX_RETRIES", 3),
            log_level: args.log_level,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            anyhow::bail!("API_URL must be an http(s) URL: {}", self.api_url);
        }
        if self.request_timeout.is_zero() {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }
        if self.token_prefix.is_empty() {
            anyhow::bail!("TOKEN_PREFIX cannot be empty");
        }
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn default_credentials_db() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("gonextauth").join("credentials.sqlite3"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
