//! CLI configuration

use serde::{Deserialize, Serialize};
use trampoline_steps::{AddressConfig, ConnectorConfig};

/// Complete configuration of the `trampoline` binary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Endpoint candidates and probing budget
    #[serde(default)]
    pub connector: ConnectorConfig,

    /// Trusted contract addresses
    #[serde(default)]
    pub addresses: AddressConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Prefix log lines with timestamps
    #[serde(default)]
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            timestamps: false,
        }
    }
}

// Default value helpers
fn default_log_level() -> String {
    "info".to_string()
}

impl CliConfig {
    /// Load configuration: built-in defaults, then the optional file, then
    /// `TRAMPOLINE_*` environment variables (`__` separates sections).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&CliConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TRAMPOLINE")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("connector.public_endpoints")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
