use std::time::Duration;

/// Restart policy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Whether automatic restart is enabled
    pub enabled: bool,
    /// Maximum number of crash restarts over the supervisor's lifetime (0 = never)
    pub max_restarts: u32,
    /// Fixed delay between a crash and the next launch
    pub delay: Duration,
    /// Resident memory ceiling in bytes
    pub memory_limit: Option<u64>,
}

impl RestartPolicy {
    pub fn new(enabled: bool, max_restarts: u32, delay: Duration) -> Self {
        Self {
            enabled,
            max_restarts,
            delay,
            memory_limit: None,
        }
    }

    pub fn with_memory_limit(mut self, limit: Option<u64>) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Decide what happens after a crash, given how many restarts were already spent
    pub fn decide(&self, restarts: u32) -> RestartDecision {
        if !self.enabled {
            return RestartDecision::Disabled;
        }

        if restarts >= self.max_restarts {
            return RestartDecision::Exhausted;
        }

        RestartDecision::RestartAfter(self.delay)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new(true, 10, Duration::from_secs(0))
    }
}

/// Outcome of consulting the restart policy after a crash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    RestartAfter(Duration),
    Exhausted,
    Disabled,
}
