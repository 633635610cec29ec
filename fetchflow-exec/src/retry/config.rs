use std::time::Duration;

/// The single sequential retry pass run after the first dispatch pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPassConfig {
    pub enabled: bool,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPassConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPassConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before the `index`-th (0-based) retried task: `base * 2^index`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, index: usize) -> Duration {
        let exp = index.min(31) as u32;
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_then_cap() {
        let cfg = RetryPassConfig::default();
        assert_eq!(cfg.delay_for(0), Duration::from_secs(1));
        assert_eq!(cfg.delay_for(1), Duration::from_secs(2));
        assert_eq!(cfg.delay_for(4), Duration::from_secs(16));
        assert_eq!(cfg.delay_for(5), Duration::from_secs(30));
        assert_eq!(cfg.delay_for(500), Duration::from_secs(30));
    }
}
