use std::time::Duration;

/// Configuration for a [`crate::queue::SegmentQueue`].
#[derive(Debug, Clone, Copy)]
pub struct SegmentConfig {
    /// Number of slots per segment.
    pub segment_size: usize,
    /// Enable metrics collection (slight overhead).
    pub enable_metrics: bool,
}

impl SegmentConfig {
    /// Creates a new configuration with custom settings.
    ///
    /// # Panics
    ///
    /// Panics if `segment_size` is 0 or not a power of two, or greater than
    /// 2^20 slots.
    pub const fn new(segment_size: usize, enable_metrics: bool) -> Self {
        assert!(
            segment_size > 0 && segment_size.is_power_of_two(),
            "segment_size must be a non-zero power of two"
        );
        assert!(segment_size <= 1 << 20, "segment_size must be at most 2^20");

        Self {
            segment_size,
            enable_metrics,
        }
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            segment_size: 32,
            enable_metrics: false,
        }
    }
}

/// Small segments, suited to low-latency pipelines with few items in flight.
pub const LOW_LATENCY_SEGMENT_CONFIG: SegmentConfig = SegmentConfig::new(8, false);

/// Large segments, amortizing segment-transition cost under heavy load.
pub const HIGH_THROUGHPUT_SEGMENT_CONFIG: SegmentConfig = SegmentConfig::new(256, false);

/// Configuration for a [`crate::batch_queue::BatchQueue`].
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Number of items accumulated per batch before automatic rotation.
    pub batch_size: usize,
}

impl BatchConfig {
    /// Creates a new batch configuration.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is 0.
    pub const fn new(batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be non-zero");
        Self { batch_size }
    }

    /// Sets the batch size, consuming and returning `self`.
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be non-zero");
        self.batch_size = batch_size;
        self
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { batch_size: 64 }
    }
}

/// Configuration for a [`crate::timer_overlay::TimerOverlay`].
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Period between automatic flush attempts.
    pub period: Duration,
}

impl TimerConfig {
    pub const fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(10),
        }
    }
}

/// Configuration for an [`crate::exclusive_group::ExclusiveGroup`] / `take_from_any`.
#[derive(Debug, Clone, Copy)]
pub struct GroupConfig {
    /// Maximum number of collections a single group may arbitrate over.
    pub max_collections: usize,
}

impl GroupConfig {
    /// # Panics
    ///
    /// Panics if `max_collections` is 0 or greater than 32 (the bitset width).
    pub const fn new(max_collections: usize) -> Self {
        assert!(
            max_collections > 0 && max_collections <= 32,
            "max_collections must be between 1 and 32"
        );
        Self { max_collections }
    }
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self { max_collections: 32 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_config_capacity_defaults() {
        let cfg = SegmentConfig::default();
        assert_eq!(cfg.segment_size, 32);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn segment_config_rejects_non_power_of_two() {
        SegmentConfig::new(7, false);
    }

    #[test]
    #[should_panic(expected = "between 1 and 32")]
    fn group_config_rejects_oversized() {
        GroupConfig::new(33);
    }

    #[test]
    fn batch_config_builder() {
        let cfg = BatchConfig::default().with_batch_size(128);
        assert_eq!(cfg.batch_size, 128);
    }
}
