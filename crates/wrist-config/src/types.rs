use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Tag stamped on every sample as its producer.
    pub source_tag: String,
    /// Motion capture settings (wearable side).
    pub sampler: SamplerConfig,
    /// Peer channel between wearable and companion.
    pub peer: PeerConfig,
    /// UDP collector the companion forwards to.
    pub collector: CollectorConfig,
    /// Rolling send-rate window.
    pub rate: RateConfig,
    /// How often the status heartbeat is logged, in milliseconds.
    pub status_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_tag: "WATCH".into(),
            sampler: SamplerConfig::default(),
            peer: PeerConfig::default(),
            collector: CollectorConfig::default(),
            rate: RateConfig::default(),
            status_interval_ms: 2000,
        }
    }
}

impl AppConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Motion update interval in milliseconds. 10 ms = 100 Hz.
    pub interval_ms: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { interval_ms: 10 }
    }
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Address the companion listens on and the wearable dials.
    pub addr: String,
    /// Delay between wearable dial attempts while the companion is unreachable.
    pub reconnect_interval_ms: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8890".into(),
            reconnect_interval_ms: 1000,
        }
    }
}

impl PeerConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Collector host name or IP address.
    pub host: String,
    /// Collector UDP port.
    pub port: u16,
    /// Delay between attempts to open the UDP socket after a failure.
    pub retry_interval_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            host: "192.168.2.130".into(),
            port: 8889,
            retry_interval_ms: 1000,
        }
    }
}

impl CollectorConfig {
    /// `host:port`, suitable for socket address resolution.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Trailing window length in seconds.
    pub window_secs: f64,
    /// Entries required in the window before a rate is reported.
    pub min_samples: usize,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            window_secs: 5.0,
            min_samples: 3,
        }
    }
}
