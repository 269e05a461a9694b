//! Command line configuration
//!
//! Flags can also be set through `GANTRY_*` environment variables. Parsed
//! arguments are validated into [`Settings`] before anything starts.

use clap::{Args, Parser, Subcommand, ValueEnum};

use gantry_common::{Error, Result};

/// Default capacity of the shared event channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

const MAX_SUBDOMAIN_LEN: usize = 253;

/// Gantry - Gateway API controller
#[derive(Parser, Debug)]
#[command(name = "gantry", version, about, long_about = None)]
pub struct Cli {
    /// Mode to run in
    #[command(subcommand)]
    pub command: Commands,
}

/// Run modes
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch Gateway API resources for a single, statically configured GatewayClass
    StaticMode(StaticModeArgs),
}

/// Log line format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable text
    Text,
}

/// Flags of the `static-mode` subcommand
#[derive(Args, Debug, Clone)]
pub struct StaticModeArgs {
    /// Controller name written into GatewayClass `spec.controllerName`, e.g. `example.com/gateway-controller`
    #[arg(long = "gateway-ctlr-name", env = "GANTRY_GATEWAY_CTLR_NAME")]
    pub gateway_ctlr_name: String,

    /// Name of the GatewayClass this controller is responsible for
    #[arg(long = "gatewayclass", env = "GANTRY_GATEWAYCLASS")]
    pub gateway_class: String,

    /// Capacity of the channel between reconcilers and the event loop
    #[arg(long, env = "GANTRY_EVENT_CHANNEL_CAPACITY", default_value_t = DEFAULT_EVENT_CHANNEL_CAPACITY)]
    pub event_channel_capacity: usize,

    /// Log line format
    #[arg(long, env = "GANTRY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

/// Validated runtime settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Controller name, `<domain>/<path>`
    pub gateway_ctlr_name: String,
    /// GatewayClass this controller handles
    pub gateway_class_name: String,
    /// Capacity of the shared event channel
    pub event_channel_capacity: usize,
    /// Log line format
    pub log_format: LogFormat,
}

impl StaticModeArgs {
    /// Validate the flags into [`Settings`]
    pub fn validate(self) -> Result<Settings> {
        validate_controller_name(&self.gateway_ctlr_name)?;
        validate_subdomain("--gatewayclass", &self.gateway_class)?;
        if self.event_channel_capacity == 0 {
            return Err(Error::validation_for_field(
                "--event-channel-capacity",
                "must be at least 1",
            ));
        }

        Ok(Settings {
            gateway_ctlr_name: self.gateway_ctlr_name,
            gateway_class_name: self.gateway_class,
            event_channel_capacity: self.event_channel_capacity,
            log_format: self.log_format,
        })
    }
}

/// A controller name is a domain-prefixed path: `example.com/my-controller`
fn validate_controller_name(name: &str) -> Result<()> {
    const FIELD: &str = "--gateway-ctlr-name";

    let Some((domain, path)) = name.split_once('/') else {
        return Err(Error::validation_for_field(
            FIELD,
            format!("{name:?} must be of the form <domain>/<path>"),
        ));
    };
    if domain.is_empty() || !domain.contains('.') {
        return Err(Error::validation_for_field(
            FIELD,
            format!("domain {domain:?} of {name:?} must be a non-empty DNS domain"),
        ));
    }
    validate_subdomain(FIELD, domain)?;
    if path.is_empty() {
        return Err(Error::validation_for_field(
            FIELD,
            format!("path of {name:?} must not be empty"),
        ));
    }
    Ok(())
}

/// RFC 1123 subdomain: lowercase alphanumerics, '-' and '.', alphanumeric at both ends
fn validate_subdomain(field: &str, value: &str) -> Result<()> {
    let invalid = |reason: &str| Error::validation_for_field(field, format!("{value:?} {reason}"));

    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.len() > MAX_SUBDOMAIN_LEN {
        return Err(invalid("must be no more than 253 characters"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(invalid(
            "must consist of lower case alphanumeric characters, '-' or '.'",
        ));
    }
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    if !value.starts_with(alnum) || !value.ends_with(alnum) {
        return Err(invalid("must start and end with an alphanumeric character"));
    }
    if value.split('.').any(|label| label.is_empty()) {
        return Err(invalid("must not contain empty labels"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("gantry").chain(args.iter().copied()))
    }

    fn static_args(cli: Cli) -> StaticModeArgs {
        match cli.command {
            Commands::StaticMode(args) => args,
        }
    }

    fn args(ctlr: &str, class: &str) -> StaticModeArgs {
        StaticModeArgs {
            gateway_ctlr_name: ctlr.to_string(),
            gateway_class: class.to_string(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            log_format: LogFormat::Json,
        }
    }

    fn rejected_field(err: Error) -> Option<String> {
        match err {
            Error::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn parses_static_mode_flags() {
        let cli = parse(&[
            "static-mode",
            "--gateway-ctlr-name",
            "example.com/gateway",
            "--gatewayclass",
            "gantry",
            "--event-channel-capacity",
            "8",
            "--log-format",
            "text",
        ])
        .unwrap();

        let settings = static_args(cli).validate().unwrap();
        assert_eq!(
            settings,
            Settings {
                gateway_ctlr_name: "example.com/gateway".to_string(),
                gateway_class_name: "gantry".to_string(),
                event_channel_capacity: 8,
                log_format: LogFormat::Text,
            }
        );
    }

    #[test]
    fn subcommand_is_required() {
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn defaults_apply() {
        let cli = parse(&[
            "static-mode",
            "--gateway-ctlr-name",
            "example.com/gateway",
            "--gatewayclass",
            "gantry",
        ])
        .unwrap();
        let args = static_args(cli);
        assert_eq!(args.event_channel_capacity, DEFAULT_EVENT_CHANNEL_CAPACITY);
        assert_eq!(args.log_format, LogFormat::Json);
    }

    #[test]
    fn controller_name_needs_domain_and_path() {
        for bad in ["gateway", "example/gateway", "/gateway", "example.com/", "Example.com/gw"] {
            let err = args(bad, "gantry").validate().unwrap_err();
            assert_eq!(
                rejected_field(err).as_deref(),
                Some("--gateway-ctlr-name"),
                "{bad} should be rejected"
            );
        }
        assert!(args("gateway.example.com/a/b", "gantry").validate().is_ok());
    }

    #[test]
    fn gateway_class_must_be_a_subdomain() {
        for bad in ["", "Gantry", "-gantry", "gantry-", "gan..try", "gan_try"] {
            let err = args("example.com/gw", bad).validate().unwrap_err();
            assert_eq!(
                rejected_field(err).as_deref(),
                Some("--gatewayclass"),
                "{bad:?} should be rejected"
            );
        }
        let long = "a".repeat(254);
        assert!(args("example.com/gw", &long).validate().is_err());
        assert!(args("example.com/gw", "gantry.v1-beta").validate().is_ok());
    }

    #[test]
    fn zero_channel_capacity_is_rejected() {
        let mut a = args("example.com/gw", "gantry");
        a.event_channel_capacity = 0;
        assert_eq!(
            rejected_field(a.validate().unwrap_err()).as_deref(),
            Some("--event-channel-capacity")
        );
    }
}
