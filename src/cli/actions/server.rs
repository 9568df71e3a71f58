use crate::{
    api::{self, AppSettings},
    cli::telemetry,
};
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub settings: AppSettings,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let result = api::new(args.port, args.dsn, args.settings).await;

    telemetry::shutdown_tracer();

    result
}

fn log_startup_args(args: &Args) {
    let settings = &args.settings;
    info!(
        port = args.port,
        dsn = %redact_dsn(args.dsn.expose_secret()),
        frontend_base_url = settings.mailer.frontend_base_url(),
        jwt_issuer = settings.jwt.issuer(),
        jwt_audience = settings.jwt.audience(),
        access_token_minutes = settings.jwt.expires_in_minutes(),
        refresh_token_hours = settings.refresh_tokens.lifetime_hours(),
        email_verification_hours = settings.email_verification.hours_to_live(),
        password_reset_hours = settings.password_reset.hours_to_live(),
        "Startup configuration"
    );
}

pub(crate) fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}
