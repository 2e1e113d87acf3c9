//! Daemon configuration.
//!
//! Three layers, later ones winning: built-in defaults, an optional TOML file,
//! then command-line flags (each flag also reads a `TOURNEY_*` variable).

use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tourney_core::{CoreServer, ServerAddrParseError};
use tourney_net::ScraperConfig;

pub const DEFAULT_PORT: u16 = 2052;
pub const DEFAULT_WEBSOCKET_PORT: u16 = 2053;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid master server: {0}")]
    Master(#[from] ServerAddrParseError),
}

#[derive(Debug, Clone, Parser)]
#[command(name = "tourney-daemon", version, about = "Tournament relay node")]
pub struct DaemonArgs {
    /// TOML file with the settings below
    #[arg(short, long, env = "TOURNEY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Name advertised to other nodes
    #[arg(long, env = "TOURNEY_SERVER_NAME")]
    pub server_name: Option<String>,

    /// Address other nodes should use to reach this one
    #[arg(long, env = "TOURNEY_ADDRESS")]
    pub address: Option<String>,

    /// Framed TCP port
    #[arg(short, long, env = "TOURNEY_PORT")]
    pub port: Option<u16>,

    /// WebSocket port
    #[arg(long, env = "TOURNEY_WEBSOCKET_PORT")]
    pub websocket_port: Option<u16>,

    /// Run without the WebSocket gateway
    #[arg(long, env = "TOURNEY_NO_WEBSOCKET")]
    pub no_websocket: bool,

    /// Master node to announce to (host:port)
    #[arg(long, env = "TOURNEY_MASTER")]
    pub master: Option<String>,

    /// Seconds between federation rescans, 0 to disable
    #[arg(long, env = "TOURNEY_RESCAN_INTERVAL")]
    pub rescan_interval_secs: Option<u64>,

    /// Log filter, e.g. `tourney=debug`
    #[arg(long, env = "TOURNEY_LOG")]
    pub log: Option<String>,
}

/// On-disk layer. Every field is optional so partial files work.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub server_name: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub websocket_port: Option<u16>,
    pub websocket: Option<bool>,
    pub master: Option<String>,
    pub rescan_interval_secs: Option<u64>,
    pub log: Option<String>,
    pub scraper: ScraperSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScraperSection {
    pub connect_timeout_ms: Option<u64>,
    pub response_timeout_ms: Option<u64>,
    pub max_rounds: Option<usize>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolved settings the node runs with.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub server_name: String,
    pub address: String,
    pub port: u16,
    /// `None` when the gateway is disabled.
    pub websocket_port: Option<u16>,
    pub master: Option<CoreServer>,
    /// `None` disables periodic rescans.
    pub rescan_interval: Option<Duration>,
    pub log: Option<String>,
    pub scraper: ScraperConfig,
}

impl DaemonConfig {
    /// Read the file named by `args` (if any) and layer the flags over it.
    pub fn resolve(args: &DaemonArgs) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        Self::from_layers(file, args)
    }

    pub fn from_layers(file: ConfigFile, args: &DaemonArgs) -> Result<Self, ConfigError> {
        let websocket_enabled = !args.no_websocket && file.websocket.unwrap_or(true);
        let websocket_port = args
            .websocket_port
            .or(file.websocket_port)
            .unwrap_or(DEFAULT_WEBSOCKET_PORT);

        let master = args
            .master
            .clone()
            .or(file.master)
            .map(|m| m.parse::<CoreServer>())
            .transpose()?;

        let defaults = ScraperConfig::default();
        let scraper = ScraperConfig {
            connect_timeout: file
                .scraper
                .connect_timeout_ms
                .map_or(defaults.connect_timeout, Duration::from_millis),
            response_timeout: file
                .scraper
                .response_timeout_ms
                .map_or(defaults.response_timeout, Duration::from_millis),
            max_rounds: file.scraper.max_rounds.unwrap_or(defaults.max_rounds),
        };

        Ok(Self {
            server_name: args
                .server_name
                .clone()
                .or(file.server_name)
                .unwrap_or_else(|| "Tournament Host".to_string()),
            address: args
                .address
                .clone()
                .or(file.address)
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
            websocket_port: websocket_enabled.then_some(websocket_port),
            master,
            rescan_interval: args
                .rescan_interval_secs
                .or(file.rescan_interval_secs)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            log: args.log.clone().or(file.log),
            scraper,
        })
    }

    /// How this node describes itself in `known_servers`.
    pub fn self_server(&self) -> CoreServer {
        let server = CoreServer::new(self.address.clone(), self.port).with_name(&self.server_name);
        match self.websocket_port {
            Some(port) => server.with_websocket_port(port),
            None => server,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> DaemonArgs {
        let mut full = vec!["tourney-daemon"];
        full.extend_from_slice(argv);
        DaemonArgs::try_parse_from(full).unwrap()
    }

    fn file(toml: &str) -> ConfigFile {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn defaults_without_file_or_flags() {
        let config = DaemonConfig::from_layers(ConfigFile::default(), &args(&[])).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.websocket_port, Some(DEFAULT_WEBSOCKET_PORT));
        assert!(config.master.is_none());
        assert!(config.rescan_interval.is_none());
        assert_eq!(config.scraper.connect_timeout, Duration::from_secs(4));
    }

    #[test]
    fn file_values_are_used() {
        let file = file(
            r#"
            server_name = "Moon's Server"
            address = "relay.example.net"
            port = 3000
            master = "master.example.net:2052"
            rescan_interval_secs = 120

            [scraper]
            connect_timeout_ms = 1500
            response_timeout_ms = 2500
            "#,
        );
        let config = DaemonConfig::from_layers(file, &args(&[])).unwrap();

        assert_eq!(config.server_name, "Moon's Server");
        assert_eq!(config.port, 3000);
        assert_eq!(
            config.master,
            Some(CoreServer::new("master.example.net", 2052))
        );
        assert_eq!(config.rescan_interval, Some(Duration::from_secs(120)));
        assert_eq!(config.scraper.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.scraper.response_timeout, Duration::from_millis(2500));

        let me = config.self_server();
        assert_eq!(me.to_string(), "relay.example.net:3000");
        assert_eq!(me.websocket_port, Some(DEFAULT_WEBSOCKET_PORT));
    }

    #[test]
    fn flags_override_file() {
        let file = file("port = 3000\nwebsocket_port = 3001\nrescan_interval_secs = 60");
        let config = DaemonConfig::from_layers(
            file,
            &args(&["--port", "4000", "--rescan-interval-secs", "0", "--no-websocket"]),
        )
        .unwrap();

        assert_eq!(config.port, 4000);
        assert_eq!(config.websocket_port, None);
        assert!(config.rescan_interval.is_none());
    }

    #[test]
    fn websocket_can_be_disabled_in_file() {
        let config =
            DaemonConfig::from_layers(file("websocket = false"), &args(&[])).unwrap();
        assert_eq!(config.websocket_port, None);
        assert_eq!(config.self_server().websocket_port, None);
    }

    #[test]
    fn bad_master_is_rejected() {
        let result = DaemonConfig::from_layers(ConfigFile::default(), &args(&["--master", "nope"]));
        assert!(matches!(result, Err(ConfigError::Master(_))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<ConfigFile>("prot = 2052").is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ConfigFile::load(Path::new("/nonexistent/tourney.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tourney.toml"));
    }
}
