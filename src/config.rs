//! Configuration knobs with validated defaults.
//!
//! Each component takes a plain config struct. Defaults match the tuning
//! the runtime ships with; `validate` rejects values that would break an
//! invariant rather than merely perform badly.

use std::thread;
use thiserror::Error;

/// A configuration value was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The pool must have at least one worker thread.
    #[error("thread_count must be at least 1")]
    ZeroThreadCount,

    /// The queue must have at least one segment.
    #[error("n_segments must be at least 1")]
    ZeroSegments,

    /// Segments must hold at least one task.
    #[error("segment_capacity must be at least 1")]
    ZeroSegmentCapacity,

    /// The timer manager must have at least one shard.
    #[error("n_shards must be at least 1")]
    ZeroTimerShards,
}

/// Tuning for [`crate::pool::ThreadPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub thread_count: usize,
    /// Number of queue segments backing the pool.
    pub n_segments: usize,
    /// Fixed capacity of each segment before growth or eviction kicks in.
    pub segment_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let threads = thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self {
            thread_count: threads.max(1),
            n_segments: 2 * threads.max(1),
            segment_capacity: 256,
        }
    }
}

impl PoolConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_count == 0 {
            return Err(ConfigError::ZeroThreadCount);
        }
        if self.n_segments == 0 {
            return Err(ConfigError::ZeroSegments);
        }
        if self.segment_capacity == 0 {
            return Err(ConfigError::ZeroSegmentCapacity);
        }
        Ok(())
    }
}

/// Tuning for [`crate::timer::TimerManager`].
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Number of heap shards.
    pub n_shards: usize,
    /// Initial per-shard heap reservation.
    pub shard_capacity: usize,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            n_shards: 8,
            shard_capacity: 100,
        }
    }
}

impl TimerConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_shards == 0 {
            return Err(ConfigError::ZeroTimerShards);
        }
        Ok(())
    }
}

/// Tuning for [`crate::rpc::RpcAgent`].
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    /// Deadline applied to outbound calls that do not carry one.
    /// Zero means no deadline.
    pub default_deadline_millis: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_config_is_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.thread_count >= 1);
        assert_eq!(config.n_segments, 2 * config.thread_count);
        assert_eq!(config.segment_capacity, 256);
    }

    #[test]
    fn zero_knobs_are_rejected() {
        let mut config = PoolConfig::default();
        config.thread_count = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroThreadCount));

        let mut config = PoolConfig::default();
        config.n_segments = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroSegments));

        let mut config = PoolConfig::default();
        config.segment_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroSegmentCapacity));

        let timers = TimerConfig {
            n_shards: 0,
            ..TimerConfig::default()
        };
        assert_eq!(timers.validate(), Err(ConfigError::ZeroTimerShards));
    }

    #[test]
    fn default_timer_config() {
        let config = TimerConfig::default();
        assert_eq!(config.n_shards, 8);
        assert_eq!(config.shard_capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_agent_config_has_no_deadline() {
        assert_eq!(AgentConfig::default().default_deadline_millis, 0);
    }
}
