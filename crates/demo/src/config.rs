use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DemoConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub drain: DrainSection,
    #[serde(default)]
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    /// Upper bound on a drain request body
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DrainSection {
    /// Also write every metric as a `METRIC {...}` log line
    pub log_metrics: bool,
}

/// Statistics consumer settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StatsConfig {
    /// How often quantiles are logged (seconds)
    pub window_secs: u64,
    /// Buffered samples per stream before new ones are dropped
    pub channel_capacity: usize,
    /// Reset the load average window once it holds more samples than this
    pub load_avg_max_samples: usize,
    /// Reset the requests-per-second window once it holds more samples than this
    pub rps_max_samples: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            window_secs: 10,
            channel_capacity: 10_000,
            load_avg_max_samples: 1000,
            rps_max_samples: 600,
        }
    }
}

impl DemoConfig {
    /// Load configuration from demo.toml and environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = config::Config::try_from(&DemoConfig::default())
            .context("Failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        // 1. /etc/logtap/demo.toml (container)
        // 2. config/demo.toml (local development)
        // 3. crates/demo/config/demo.toml (workspace root)
        for path in ["/etc/logtap/demo", "config/demo", "crates/demo/config/demo"] {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Nested keys use a double underscore: LOGTAP_SERVER__PORT
        builder = builder.add_source(
            config::Environment::with_prefix("LOGTAP")
                .separator("__")
                .try_parsing(true),
        );

        // Platforms like Heroku hand out the listening port as PORT
        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port.parse().context("PORT is not a valid port number")?;
            builder = builder
                .set_override("server.port", i64::from(port))
                .context("Failed to apply PORT")?;
        }

        builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must not be 0");
        }
        if self.stats.window_secs == 0 {
            anyhow::bail!("stats.window_secs must be at least 1");
        }
        if self.stats.channel_capacity == 0 {
            anyhow::bail!("stats.channel_capacity must be at least 1");
        }
        self.socket_addr().context("Invalid server.host")?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| format!("'{}:{}' is not a socket address", self.server.host, self.server.port))
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
                request_timeout_secs: 30,
                max_body_bytes: 1024 * 1024,
            },
            logging: LoggingConfig {
                level: "info,logtap=debug,logtap_demo=debug".to_string(),
                format: LogFormat::Pretty,
            },
            drain: DrainSection::default(),
            stats: StatsConfig::default(),
        }
    }
}
