use std::time::Duration;

/// Pass-level settings. Defaults match a controller with a one minute
/// reconcile deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Deadline for one whole pass.
    pub reconcile_timeout: Duration,
    /// Upper bound for one topology lookup.
    pub topo_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { reconcile_timeout: Duration::from_secs(60), topo_timeout: Duration::from_secs(5) }
    }
}

impl ControllerConfig {
    /// Read `VTSHARD_RECONCILE_TIMEOUT_SECS` and `VTSHARD_TOPO_TIMEOUT_MS`;
    /// missing or invalid values keep the default.
    pub fn from_env() -> Self {
        let d = Self::default();
        let reconcile_timeout = std::env::var("VTSHARD_RECONCILE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(d.reconcile_timeout);
        let topo_timeout = std::env::var("VTSHARD_TOPO_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(d.topo_timeout);
        Self { reconcile_timeout, topo_timeout }
    }

    /// The primary lookup may use at most a quarter of the pass deadline.
    pub fn primary_lookup_timeout(&self) -> Duration {
        self.topo_timeout.min(self.reconcile_timeout / 4)
    }
}
