use anyhow::{Context, Result};
use clap::{builder::ValueParser, Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;

use crate::handlers::Operation;

pub const ARG_OPERATION_MINIMUM_DURATION: &str = "operation-minimum-duration";

/// Parses `OPERATION=MILLISECONDS`, e.g. `login=800`.
#[must_use]
pub fn validator_operation_duration() -> ValueParser {
    ValueParser::from(
        move |value: &str| -> std::result::Result<(Operation, u64), String> {
            let (name, millis) = value
                .split_once('=')
                .ok_or_else(|| format!("expected OPERATION=MILLISECONDS, got '{value}'"))?;
            let operation = Operation::ALL
                .into_iter()
                .find(|operation| operation.as_str() == name.trim())
                .ok_or_else(|| format!("unknown operation '{}'", name.trim()))?;
            let millis = millis
                .trim()
                .parse::<u64>()
                .map_err(|e| format!("invalid milliseconds '{}': {e}", millis.trim()))?;
            Ok((operation, millis))
        },
    )
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("minimum-password-length")
                .long("minimum-password-length")
                .help("Shortest password accepted on registration and reset")
                .env("LATCHKEY_MINIMUM_PASSWORD_LENGTH")
                .default_value("8")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("minimum-duration-ms")
                .long("minimum-duration-ms")
                .help("Minimum response time of every auth operation, in milliseconds")
                .env("LATCHKEY_MINIMUM_DURATION_MS")
                .default_value("500")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OPERATION_MINIMUM_DURATION)
                .long(ARG_OPERATION_MINIMUM_DURATION)
                .help("Per-operation override, e.g. login=800 (repeatable)")
                .env("LATCHKEY_OPERATION_MINIMUM_DURATION")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .value_parser(validator_operation_duration()),
        )
}

#[derive(Debug)]
pub struct Options {
    pub minimum_password_length: usize,
    pub minimum_duration: Duration,
    pub overrides: Vec<(Operation, Duration)>,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let minimum_password_length = matches
            .get_one::<usize>("minimum-password-length")
            .copied()
            .context("missing required argument: --minimum-password-length")?;
        let minimum_duration = matches
            .get_one::<u64>("minimum-duration-ms")
            .copied()
            .map(Duration::from_millis)
            .context("missing required argument: --minimum-duration-ms")?;
        let overrides = matches
            .get_many::<(Operation, u64)>(ARG_OPERATION_MINIMUM_DURATION)
            .map(|values| {
                values
                    .map(|&(operation, millis)| (operation, Duration::from_millis(millis)))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            minimum_password_length,
            minimum_duration,
            overrides,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_overrides_are_parsed() {
        let command = with_args(Command::new("latchkey"));
        let matches = command.get_matches_from(vec![
            "latchkey",
            "--operation-minimum-duration",
            "login=800",
            "--operation-minimum-duration",
            "reset-password=1200",
        ]);
        let options = Options::parse(&matches).unwrap();

        assert_eq!(options.minimum_duration, Duration::from_millis(500));
        assert_eq!(
            options.overrides,
            vec![
                (Operation::Login, Duration::from_millis(800)),
                (Operation::ResetPassword, Duration::from_millis(1200)),
            ]
        );
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let command = with_args(Command::new("latchkey"));
        let result = command.try_get_matches_from(vec![
            "latchkey",
            "--operation-minimum-duration",
            "signup=800",
        ]);
        assert!(result.is_err());
    }
}
