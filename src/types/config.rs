use std::time::Duration;

/// Configuration for controller behavior
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Interval between ENTITY_DISCOVER broadcasts (default: 10 seconds)
    pub discovery_interval: Duration,

    /// Deadline for an in-flight AECP/ACMP command (default: 250ms)
    pub command_timeout: Duration,

    /// Retransmissions after the first deadline expiry (default: 1)
    pub command_retries: u8,

    /// Attempts for a transiently-failing enumeration step (default: 3)
    pub enumeration_retries: u8,

    /// Base delay for enumeration retry backoff, doubled per attempt
    /// (default: 250ms)
    pub enumeration_backoff: Duration,

    /// Walk every configuration's descriptor tree instead of only the
    /// active one (default: false)
    pub enumerate_all_configurations: bool,

    /// How long the advertising duplicate-probe listens for a conflicting
    /// entity before enabling (default: 250ms)
    pub probe_duration: Duration,

    /// valid_time advertised in our own ADP messages, in seconds,
    /// clamped to [1, 62] (default: 31)
    pub advertise_valid_time: u8,

    /// Capacity of the controller event channel (default: 256)
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(10),
            command_timeout: Duration::from_millis(250),
            command_retries: 1,
            enumeration_retries: 3,
            enumeration_backoff: Duration::from_millis(250),
            enumerate_all_configurations: false,
            probe_duration: Duration::from_millis(250),
            advertise_valid_time: 31,
            event_capacity: 256,
        }
    }
}

impl ControllerConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> ControllerConfigBuilder {
        ControllerConfigBuilder::default()
    }
}

/// Builder for `ControllerConfig`
#[derive(Debug, Clone, Default)]
pub struct ControllerConfigBuilder {
    config: ControllerConfig,
}

impl ControllerConfigBuilder {
    /// Set the ENTITY_DISCOVER broadcast interval
    #[must_use]
    pub fn discovery_interval(mut self, interval: Duration) -> Self {
        self.config.discovery_interval = interval;
        self
    }

    /// Set the in-flight command deadline
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Set the retransmission budget per command
    #[must_use]
    pub fn command_retries(mut self, retries: u8) -> Self {
        self.config.command_retries = retries;
        self
    }

    /// Set the retry budget for transient enumeration failures
    #[must_use]
    pub fn enumeration_retries(mut self, retries: u8) -> Self {
        self.config.enumeration_retries = retries;
        self
    }

    /// Enumerate every configuration instead of only the active one
    #[must_use]
    pub fn enumerate_all_configurations(mut self, enable: bool) -> Self {
        self.config.enumerate_all_configurations = enable;
        self
    }

    /// Set the advertising duplicate-probe duration
    #[must_use]
    pub fn probe_duration(mut self, duration: Duration) -> Self {
        self.config.probe_duration = duration;
        self
    }

    /// Set the advertised valid_time in seconds (clamped to [1, 62])
    #[must_use]
    pub fn advertise_valid_time(mut self, seconds: u8) -> Self {
        self.config.advertise_valid_time = seconds.clamp(1, 62);
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> ControllerConfig {
        self.config
    }
}
