//! Maps validated CLI matches to an action with fully built settings.

use crate::api::AppSettings;
use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, handlers, ARG_DSN, ARG_PORT};
use crate::crypto::{JwtSettings, PasswordSettings, VerificationTokenSettings};
use crate::email::MailerConfig;
use crate::handlers::HandlerSettings;
use crate::services::{EmailVerificationSettings, PasswordResetSettings, RefreshTokenSettings};
use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;
use url::Url;

/// # Errors
/// Returns an error if required arguments are missing or invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    validate_dsn(&dsn)?;

    let auth_opts = auth::Options::parse(matches)?;
    let handler_opts = handlers::Options::parse(matches)?;

    let frontend_base_url = Url::parse(&auth_opts.frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {}", auth_opts.frontend_base_url))?;

    Ok(Action::Server(Args {
        port,
        dsn: SecretString::from(dsn),
        settings: settings(auth_opts, handler_opts, &frontend_base_url),
    }))
}

fn validate_dsn(dsn: &str) -> Result<()> {
    let parsed = Url::parse(dsn).map_err(|e| anyhow!("Invalid database connection string: {e}"))?;
    match parsed.scheme() {
        "postgres" | "postgresql" => Ok(()),
        scheme => Err(anyhow!(
            "Unsupported database scheme '{scheme}', expected postgres"
        )),
    }
}

fn settings(
    auth_opts: auth::Options,
    handler_opts: handlers::Options,
    frontend_base_url: &Url,
) -> AppSettings {
    let handler_settings = handler_opts.overrides.into_iter().fold(
        HandlerSettings::new()
            .with_minimum_password_length(handler_opts.minimum_password_length)
            .with_default_minimum_duration(handler_opts.minimum_duration),
        |settings, (operation, duration)| settings.with_minimum_duration(operation, duration),
    );

    AppSettings {
        password: PasswordSettings::new()
            .with_iterations(auth_opts.password_iterations)
            .with_memory_kb(auth_opts.password_memory_kb)
            .with_parallelism(auth_opts.password_parallelism),
        verification: VerificationTokenSettings::new(auth_opts.verification_key)
            .with_token_size(auth_opts.verification_token_size),
        jwt: JwtSettings::new(
            auth_opts.jwt_key,
            auth_opts.jwt_issuer,
            auth_opts.jwt_audience,
        )
        .with_expires_in_minutes(auth_opts.jwt_expires_in_minutes),
        refresh_tokens: RefreshTokenSettings::new()
            .with_token_length(auth_opts.refresh_token_length)
            .with_lifetime_hours(auth_opts.refresh_token_lifetime_hours)
            .with_purge_cutoff_days(auth_opts.refresh_token_purge_days),
        email_verification: EmailVerificationSettings::new(
            auth_opts.email_verification_ttl_hours,
        ),
        password_reset: PasswordResetSettings::new(auth_opts.password_reset_ttl_hours),
        handlers: handler_settings,
        mailer: MailerConfig::new(
            frontend_base_url.as_str().trim_end_matches('/').to_string(),
            auth_opts.app_name,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::Operation;
    use std::time::Duration;

    fn action(args: &[&str]) -> Result<Action> {
        let mut argv = vec![
            "latchkey",
            "--jwt-key",
            "signing-key",
            "--verification-key",
            "hmac-key",
        ];
        argv.extend_from_slice(args);
        let matches = crate::cli::commands::new().try_get_matches_from(argv)?;
        handler(&matches)
    }

    #[test]
    fn builds_server_settings() -> Result<()> {
        let Action::Server(args) = action(&[
            "--dsn",
            "postgres://user:pw@localhost:5432/latchkey",
            "--password-reset-ttl-hours",
            "3",
            "--frontend-base-url",
            "https://app.example.com/",
            "--operation-minimum-duration",
            "login=900",
        ])?;

        assert_eq!(args.port, 8080);
        assert_eq!(args.settings.password_reset.hours_to_live(), 3);
        assert_eq!(args.settings.email_verification.hours_to_live(), 24);
        assert_eq!(
            args.settings.mailer.frontend_base_url(),
            "https://app.example.com"
        );
        assert_eq!(
            args.settings.handlers.minimum_duration(Operation::Login),
            Duration::from_millis(900)
        );
        assert_eq!(
            args.settings.handlers.minimum_duration(Operation::Logout),
            Duration::from_millis(500)
        );
        Ok(())
    }

    #[test]
    fn rejects_non_postgres_dsn() {
        let result = action(&["--dsn", "mysql://user@localhost/latchkey"]);
        assert!(result.is_err());
        if let Err(err) = result {
            assert!(err.to_string().contains("Unsupported database scheme"));
        }
    }

    #[test]
    fn rejects_malformed_frontend_url() {
        let result = action(&[
            "--dsn",
            "postgres://localhost/latchkey",
            "--frontend-base-url",
            "not a url",
        ]);
        assert!(result.is_err());
    }
}
