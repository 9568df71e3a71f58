use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_JWT_KEY: &str = "jwt-key";
pub const ARG_VERIFICATION_KEY: &str = "verification-key";

// Ten years, the longest lifetime any option accepts.
const MAX_LIFETIME_DAYS: i64 = 3650;
const MAX_LIFETIME_HOURS: i64 = MAX_LIFETIME_DAYS * 24;
const MAX_LIFETIME_MINUTES: i64 = MAX_LIFETIME_HOURS * 60;

// Encoded tokens must fit the VARCHAR(256) token columns.
const MIN_TOKEN_BYTES: i64 = 16;
const MAX_TOKEN_BYTES: i64 = 192;

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_jwt_args(command);
    let command = with_token_args(command);
    let command = with_link_args(command);
    with_password_args(command)
}

fn with_jwt_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_KEY)
                .long(ARG_JWT_KEY)
                .help("HS256 signing key for access tokens")
                .env("LATCHKEY_JWT_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("jwt-issuer")
                .long("jwt-issuer")
                .help("Issuer claim of access tokens")
                .env("LATCHKEY_JWT_ISSUER")
                .default_value("latchkey"),
        )
        .arg(
            Arg::new("jwt-audience")
                .long("jwt-audience")
                .help("Audience claim of access tokens")
                .env("LATCHKEY_JWT_AUDIENCE")
                .default_value("latchkey-clients"),
        )
        .arg(
            Arg::new("jwt-expires-in-minutes")
                .long("jwt-expires-in-minutes")
                .help("Access token lifetime in minutes")
                .env("LATCHKEY_JWT_EXPIRES_IN_MINUTES")
                .default_value("15")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_MINUTES))
        )
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("refresh-token-length")
                .long("refresh-token-length")
                .help("Random bytes per refresh token")
                .env("LATCHKEY_REFRESH_TOKEN_LENGTH")
                .default_value("64")
                .value_parser(token_bytes)
        )
        .arg(
            Arg::new("refresh-token-lifetime-hours")
                .long("refresh-token-lifetime-hours")
                .help("Refresh token lifetime in hours")
                .env("LATCHKEY_REFRESH_TOKEN_LIFETIME_HOURS")
                .default_value("168")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_HOURS))
        )
        .arg(
            Arg::new("refresh-token-purge-days")
                .long("refresh-token-purge-days")
                .help("Age in days after which dead refresh tokens are purged")
                .env("LATCHKEY_REFRESH_TOKEN_PURGE_DAYS")
                .default_value("30")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_DAYS))
        )
}

fn with_link_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERIFICATION_KEY)
                .long(ARG_VERIFICATION_KEY)
                .help("HMAC key for email verification and password reset links")
                .env("LATCHKEY_VERIFICATION_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("verification-token-size")
                .long("verification-token-size")
                .help("Random bytes per verification link token")
                .env("LATCHKEY_VERIFICATION_TOKEN_SIZE")
                .default_value("32")
                .value_parser(token_bytes)
        )
        .arg(
            Arg::new("email-verification-ttl-hours")
                .long("email-verification-ttl-hours")
                .help("Email verification link lifetime in hours")
                .env("LATCHKEY_EMAIL_VERIFICATION_TTL_HOURS")
                .default_value("24")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_HOURS))
        )
        .arg(
            Arg::new("password-reset-ttl-hours")
                .long("password-reset-ttl-hours")
                .help("Password reset link lifetime in hours")
                .env("LATCHKEY_PASSWORD_RESET_TTL_HOURS")
                .default_value("1")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_HOURS))
        )
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL used for verification and reset links")
                .env("LATCHKEY_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new("app-name")
                .long("app-name")
                .help("Application name used in email subjects")
                .env("LATCHKEY_APP_NAME")
                .default_value("Latchkey"),
        )
}

fn with_password_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("password-iterations")
                .long("password-iterations")
                .help("Argon2id iterations")
                .env("LATCHKEY_PASSWORD_ITERATIONS")
                .default_value("3")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("password-memory-kb")
                .long("password-memory-kb")
                .help("Argon2id memory cost in KiB")
                .env("LATCHKEY_PASSWORD_MEMORY_KB")
                .default_value("19456")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("password-parallelism")
                .long("password-parallelism")
                .help("Argon2id lanes")
                .env("LATCHKEY_PASSWORD_PARALLELISM")
                .default_value("1")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
}

fn token_bytes(value: &str) -> Result<usize, String> {
    let bytes: i64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if !(MIN_TOKEN_BYTES..=MAX_TOKEN_BYTES).contains(&bytes) {
        return Err(format!(
            "must be between {MIN_TOKEN_BYTES} and {MAX_TOKEN_BYTES} bytes"
        ));
    }
    usize::try_from(bytes).map_err(|e| e.to_string())
}

/// Parsed credential and token options.
#[derive(Debug)]
pub struct Options {
    pub jwt_key: SecretString,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expires_in_minutes: i64,
    pub refresh_token_length: usize,
    pub refresh_token_lifetime_hours: i64,
    pub refresh_token_purge_days: i64,
    pub verification_key: SecretString,
    pub verification_token_size: usize,
    pub email_verification_ttl_hours: i64,
    pub password_reset_ttl_hours: i64,
    pub frontend_base_url: String,
    pub app_name: String,
    pub password_iterations: u32,
    pub password_memory_kb: u32,
    pub password_parallelism: u32,
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            jwt_key: SecretString::from(required::<String>(matches, ARG_JWT_KEY)?),
            jwt_issuer: required(matches, "jwt-issuer")?,
            jwt_audience: required(matches, "jwt-audience")?,
            jwt_expires_in_minutes: required(matches, "jwt-expires-in-minutes")?,
            refresh_token_length: required(matches, "refresh-token-length")?,
            refresh_token_lifetime_hours: required(matches, "refresh-token-lifetime-hours")?,
            refresh_token_purge_days: required(matches, "refresh-token-purge-days")?,
            verification_key: SecretString::from(required::<String>(
                matches,
                ARG_VERIFICATION_KEY,
            )?),
            verification_token_size: required(matches, "verification-token-size")?,
            email_verification_ttl_hours: required(matches, "email-verification-ttl-hours")?,
            password_reset_ttl_hours: required(matches, "password-reset-ttl-hours")?,
            frontend_base_url: required(matches, "frontend-base-url")?,
            app_name: required(matches, "app-name")?,
            password_iterations: required(matches, "password-iterations")?,
            password_memory_kb: required(matches, "password-memory-kb")?,
            password_parallelism: required(matches, "password-parallelism")?,
        })
    }
}
