//! Connectivity quality classification.
//!
//! Advisory only: the engine uses it to stretch retry delays and to expose
//! an online indicator. It never blocks a call.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::config::NetworkConfig;
use crate::traits::LatencyProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Excellent,
    #[default]
    Good,
    Poor,
    Offline,
}

impl ConnectionQuality {
    pub fn is_online(&self) -> bool {
        !matches!(self, ConnectionQuality::Offline)
    }

    /// Factor applied to retry delays.
    pub fn backoff_multiplier(&self) -> u32 {
        match self {
            ConnectionQuality::Excellent | ConnectionQuality::Good => 1,
            ConnectionQuality::Poor => 2,
            ConnectionQuality::Offline => 4,
        }
    }
}

#[derive(Debug)]
pub struct NetworkMonitor {
    config: NetworkConfig,
    online: bool,
    last_rtt: Option<Duration>,
    probe_failed: bool,
}

impl NetworkMonitor {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            online: true,
            last_rtt: None,
            probe_failed: false,
        }
    }

    /// Offline dominates; an unmeasured link counts as good.
    pub fn quality(&self) -> ConnectionQuality {
        if !self.online {
            return ConnectionQuality::Offline;
        }
        if self.probe_failed {
            return ConnectionQuality::Poor;
        }
        match self.last_rtt {
            None => ConnectionQuality::Good,
            Some(rtt) if rtt < self.config.excellent_below => ConnectionQuality::Excellent,
            Some(rtt) if rtt < self.config.good_below => ConnectionQuality::Good,
            Some(_) => ConnectionQuality::Poor,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }

    /// Apply the platform online/offline signal.
    pub fn set_online(&mut self, online: bool) {
        if self.online != online {
            debug!("Network signal changed: online={}", online);
        }
        self.online = online;
    }

    pub fn record_rtt(&mut self, rtt: Duration) {
        self.last_rtt = Some(rtt);
        self.probe_failed = false;
    }

    pub fn record_probe_failure(&mut self) {
        self.probe_failed = true;
    }

    /// Run one probe and fold the result in.
    pub async fn measure(&mut self, probe: &dyn LatencyProbe) -> ConnectionQuality {
        match probe.probe().await {
            Ok(rtt) => {
                debug!("Latency probe: {}ms", rtt.as_millis());
                self.record_rtt(rtt);
            }
            Err(err) => {
                debug!("Latency probe failed: {}", err);
                self.record_probe_failure();
            }
        }
        self.quality()
    }
}
