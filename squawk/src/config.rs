use chrono::{DateTime, Duration, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

/// Process-wide settings. Every recognized option has a default so a bare
/// binary runs without a config file.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Connection string for the external persistence layer.
    pub db_url: String,
    /// Tick size of the wire time encoding, in milliseconds.
    pub time_resolution_ms: u64,
    /// Epoch anchor for the wire time encoding.
    pub min_datetime: DateTime<Utc>,
    pub multicast_addr: Ipv4Addr,
    pub multicast_port: u16,
    /// Key epoch length, in minutes.
    pub key_rotation_mins: u64,
    /// Overlap padding added to each key epoch's expiration, in milliseconds.
    pub key_expiration_buffer_ms: u64,
    /// Size of the crypto compute pool.
    pub num_threads: usize,
    /// Producer cadence, in seconds.
    pub broadcast_period_secs: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_url: "sqlite://./squawk.db".to_string(),
            time_resolution_ms: 500,
            min_datetime: DateTime::parse_from_rfc3339("2020-01-01T00:00:00+00:00")
                .expect("constant datetime")
                .with_timezone(&Utc),
            multicast_addr: Ipv4Addr::new(224, 0, 0, 250),
            multicast_port: 1935,
            key_rotation_mins: 5,
            key_expiration_buffer_ms: 500,
            num_threads: 5,
            broadcast_period_secs: 1.0,
        }
    }
}

impl Settings {
    pub fn load_from_path<P: AsRef<Path>>(input_path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(input_path)?;
        let settings = serde_yaml::from_str(&contents)?;
        Ok(settings)
    }

    /// Install `settings` as the process-wide configuration. Must run before
    /// the first [`Settings::global`] call; later calls are rejected.
    pub fn init(settings: Settings) -> anyhow::Result<()> {
        SETTINGS
            .set(settings)
            .map_err(|_| anyhow::anyhow!("settings already initialized"))
    }

    pub fn global() -> &'static Settings {
        SETTINGS.get_or_init(Settings::default)
    }

    pub fn time_resolution(&self) -> Duration {
        Duration::milliseconds(self.time_resolution_ms as i64)
    }

    pub fn key_interval(&self) -> Duration {
        Duration::minutes(self.key_rotation_mins as i64)
    }

    pub fn key_expiration_buffer(&self) -> Duration {
        Duration::milliseconds(self.key_expiration_buffer_ms as i64)
    }

    pub fn broadcast_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.broadcast_period_secs)
    }
}
