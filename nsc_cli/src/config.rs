#![doc = include_str!("../README.md")]

use crate::error::ConfigError;
use clap::{ArgAction, Args, Parser, Subcommand};
use libnsc::descriptor::ClientDefaults;
use libnsc::mechanism::UnknownMechanism;
use libnsc::request_loop::{LivenessCheck, LoopSettings, RetryPolicy};
use libnsc::runner::RunnerSettings;
use libnsc::MechanismType;
use libp2p::Multiaddr;
use std::path::PathBuf;
use std::time::Duration;

/// Network Service Mesh client.
///
/// Requests a connection to every configured network service, keeps them healthy, and closes them on exit.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Path to the identity file. The default is `$HOME/.nsc/identities.yml`.
    #[arg(long = "identity-file", short = 'c', env = "NSM_IDENTITY_FILE")]
    pub identity_file: Option<PathBuf>,
    /// Identity name to use. If omitted, the first identity in the identity file is used.
    #[arg(long = "id")]
    pub id_name: Option<String>,
    /// Log level filter. `RUST_LOG` takes precedence when it is set.
    #[arg(long = "log-level", env = "NSM_LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,
    #[command(flatten)]
    pub client: ClientOptions,
    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add, list or delete local client identities.
    #[command(subcommand, name = "id")]
    Id(IdCommand),
    /// Connect to the configured network services. This is the default command.
    #[command(name = "run", alias = "start")]
    Run,
}

#[derive(Debug, Subcommand)]
pub enum IdCommand {
    /// Create a new client identity.
    #[command(name = "new", alias = "create")]
    Create {
        /// The name of the new identity. If omitted, a random name is generated.
        name: Option<String>,
    },
    /// List all client identities.
    #[command(name = "list", alias = "ls")]
    List,
    /// Delete a client identity.
    #[command(name = "delete", alias = "del", alias = "rm")]
    Delete {
        /// The name of the identity to delete.
        name: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ClientOptions {
    /// Client name. Prefixes every connection id and names the first path segment.
    #[arg(long = "name", env = "NSM_NAME", default_value = "nsc")]
    pub name: String,
    /// Address of the mesh manager, ending in its peer id, e.g. `/ip4/10.0.0.1/tcp/5001/p2p/12D3KooW...`
    #[arg(long = "connect-to", env = "NSM_CONNECT_TO")]
    pub connect_to: Option<Multiaddr>,
    #[arg(long = "dial-timeout", env = "NSM_DIAL_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    pub dial_timeout: Duration,
    /// Timeout of a single request to the mesh manager.
    #[arg(long = "request-timeout", env = "NSM_REQUEST_TIMEOUT", default_value = "15s", value_parser = parse_duration)]
    pub request_timeout: Duration,
    /// Delay between failed request attempts.
    #[arg(long = "retry-interval", env = "NSM_RETRY_INTERVAL", default_value = "100ms", value_parser = parse_duration)]
    pub retry_interval: Duration,
    /// Overall retry budget per connection. `0s` retries until shutdown.
    #[arg(long = "retry-timeout", env = "NSM_RETRY_TIMEOUT", default_value = "0s", value_parser = parse_duration)]
    pub retry_timeout: Duration,
    /// Lifetime of the token signed into the client's path segment.
    #[arg(long = "max-token-lifetime", env = "NSM_MAX_TOKEN_LIFETIME", default_value = "10m", value_parser = parse_duration)]
    pub max_token_lifetime: Duration,
    /// Default labels as comma separated `key=value` pairs, for descriptors that do not set them.
    #[arg(long = "labels", env = "NSM_LABELS", value_delimiter = ',')]
    pub labels: Vec<String>,
    /// Default mechanism (`kernel` or `device`) for descriptors without a scheme.
    #[arg(long = "mechanism", env = "NSM_MECHANISM", default_value = "kernel", value_parser = parse_mechanism)]
    pub mechanism: MechanismType,
    /// Comma separated network service descriptors: `[mechanism://]service[/interface][?key=value&...]`.
    #[arg(long = "network-services", env = "NSM_NETWORK_SERVICES", value_delimiter = ',')]
    pub network_services: Vec<String>,
    #[arg(
        long = "liveness-check-enabled",
        env = "NSM_LIVENESS_CHECK_ENABLED",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub liveness_check_enabled: bool,
    #[arg(long = "liveness-check-interval", env = "NSM_LIVENESS_CHECK_INTERVAL", default_value = "1s", value_parser = parse_duration)]
    pub liveness_check_interval: Duration,
    #[arg(long = "liveness-check-timeout", env = "NSM_LIVENESS_CHECK_TIMEOUT", default_value = "1s", value_parser = parse_duration)]
    pub liveness_check_timeout: Duration,
}

impl ClientOptions {
    pub fn defaults(&self) -> Result<ClientDefaults, ConfigError> {
        let labels = ClientDefaults::labels_from_pairs(self.labels.iter().map(String::as_str))?;
        Ok(ClientDefaults::new(Some(self.mechanism), labels))
    }

    pub fn liveness(&self) -> Option<LivenessCheck> {
        self.liveness_check_enabled
            .then_some(LivenessCheck { interval: self.liveness_check_interval, timeout: self.liveness_check_timeout })
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        let loop_settings = LoopSettings {
            request_timeout: self.request_timeout,
            retry: RetryPolicy::new(self.retry_interval).with_timeout(self.retry_timeout),
            liveness: self.liveness(),
        };
        RunnerSettings {
            client_name: self.name.clone(),
            loop_settings,
            monitor_timeout: self.request_timeout,
            heal_interval: self.liveness_check_interval,
            teardown_timeout: self.request_timeout,
        }
    }
}

pub struct GlobalOptions {
    pub identity_file: Option<PathBuf>,
    pub id_name: Option<String>,
    pub log_level: String,
    pub client: ClientOptions,
}

impl Config {
    pub fn to_parts(self) -> (GlobalOptions, CliCommand) {
        let global = GlobalOptions {
            identity_file: self.identity_file,
            id_name: self.id_name,
            log_level: self.log_level,
            client: self.client,
        };
        (global, self.command.unwrap_or(CliCommand::Run))
    }
}

/// Parses durations like `100ms`, `15s`, `10m` or `1h`. A bare `0` is accepted as zero.
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let text = text.trim();
    let invalid = || ConfigError::InvalidDuration(text.to_string());
    let split = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: u64 = number.parse().map_err(|_| invalid())?;
    let seconds = |factor: u64| value.checked_mul(factor).map(Duration::from_secs).ok_or_else(invalid);
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => seconds(1),
        "m" => seconds(60),
        "h" => seconds(60 * 60),
        "" if value == 0 => Ok(Duration::ZERO),
        _ => Err(invalid()),
    }
}

fn parse_mechanism(text: &str) -> Result<MechanismType, UnknownMechanism> {
    text.trim().to_ascii_lowercase().parse()
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Config::command().debug_assert();
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("15s").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration(" 10m ").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
        for bad in ["", "s", "15", "1.5s", "-1s", "10d", "5 s"] {
            assert!(matches!(parse_duration(bad), Err(ConfigError::InvalidDuration(_))), "{bad} should be rejected");
        }
    }

    #[test]
    fn command_line_overrides() {
        let config = Config::try_parse_from([
            "nsc",
            "--name",
            "web",
            "--mechanism",
            "DEVICE",
            "--labels",
            "app=web,env=prod",
            "--network-services",
            "kernel://svc-a/nsm0,svc-b",
            "--liveness-check-enabled",
            "false",
            "--retry-timeout",
            "30s",
            "run",
        ])
        .unwrap();
        let (options, command) = config.to_parts();
        assert!(matches!(command, CliCommand::Run));
        let client = options.client;
        assert_eq!(client.mechanism, MechanismType::Device);
        assert_eq!(client.network_services, vec!["kernel://svc-a/nsm0".to_string(), "svc-b".to_string()]);
        let defaults = client.defaults().unwrap();
        assert_eq!(defaults.labels["env"], "prod");
        assert_eq!(defaults.mechanism, Some(MechanismType::Device));

        let settings = client.runner_settings();
        assert_eq!(settings.client_name, "web");
        assert!(settings.loop_settings.liveness.is_none());
        assert_eq!(settings.loop_settings.retry.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn default_command_is_run() {
        let config = Config::try_parse_from(["nsc"]).unwrap();
        let (options, command) = config.to_parts();
        assert!(matches!(command, CliCommand::Run));
        assert!(options.client.liveness().is_some());

        let config = Config::try_parse_from(["nsc", "id", "new", "alice"]).unwrap();
        assert!(matches!(config.to_parts().1, CliCommand::Id(IdCommand::Create { name: Some(n) }) if n == "alice"));
    }

    #[test]
    fn malformed_default_labels_are_rejected() {
        let config = Config::try_parse_from(["nsc", "--labels", "app"]).unwrap();
        assert!(matches!(config.client.defaults(), Err(ConfigError::InvalidLabels(_))));
    }
}
