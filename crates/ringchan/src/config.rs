//! Driver configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! ```rust,ignore
//! use ringchan::config::Config;
//!
//! // Defaults with env overrides
//! let config = Config::from_env();
//!
//! // Or customize programmatically
//! let config = Config::new().sq_entries(1024).max_writes_in_flight(4);
//! ```

use crate::env::env_get;
use crate::state::Limits;

pub mod defaults {
    /// Submission queue size (power of two).
    pub const SQ_ENTRIES: u32 = 256;
    /// Cross-thread request queue capacity.
    pub const REQUEST_CAPACITY: usize = 1024;
    /// Concurrent reads per channel.
    pub const MAX_READS_IN_FLIGHT: usize = 1;
    /// Concurrent writes per channel.
    pub const MAX_WRITES_IN_FLIGHT: usize = 1;
    /// Default read buffer size.
    pub const BUFFER_SIZE: usize = 8192;
}

/// Largest SQ size the kernel accepts.
const MAX_SQ_ENTRIES: u32 = 32768;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// io_uring submission queue entries
    pub sq_entries: u32,
    /// Capacity of the `Submitter` request queue
    pub request_capacity: usize,
    /// Per-channel read limit
    pub max_reads_in_flight: usize,
    /// Per-channel write limit
    pub max_writes_in_flight: usize,
    /// Read buffer size for providers built from this config
    pub buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Config {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `RINGCHAN_SQ_ENTRIES` - Submission queue entries
    /// - `RINGCHAN_REQUEST_CAPACITY` - Request queue capacity
    /// - `RINGCHAN_MAX_READS` - Reads in flight per channel
    /// - `RINGCHAN_MAX_WRITES` - Writes in flight per channel
    /// - `RINGCHAN_BUFFER_SIZE` - Read buffer size in bytes
    pub fn from_env() -> Self {
        Self {
            sq_entries: env_get("RINGCHAN_SQ_ENTRIES", defaults::SQ_ENTRIES),
            request_capacity: env_get("RINGCHAN_REQUEST_CAPACITY", defaults::REQUEST_CAPACITY),
            max_reads_in_flight: env_get("RINGCHAN_MAX_READS", defaults::MAX_READS_IN_FLIGHT),
            max_writes_in_flight: env_get("RINGCHAN_MAX_WRITES", defaults::MAX_WRITES_IN_FLIGHT),
            buffer_size: env_get("RINGCHAN_BUFFER_SIZE", defaults::BUFFER_SIZE),
        }
    }

    /// Compile-time defaults only (no env override).
    pub fn new() -> Self {
        Self {
            sq_entries: defaults::SQ_ENTRIES,
            request_capacity: defaults::REQUEST_CAPACITY,
            max_reads_in_flight: defaults::MAX_READS_IN_FLIGHT,
            max_writes_in_flight: defaults::MAX_WRITES_IN_FLIGHT,
            buffer_size: defaults::BUFFER_SIZE,
        }
    }

    // Builder methods

    pub fn sq_entries(mut self, n: u32) -> Self {
        self.sq_entries = n;
        self
    }

    pub fn request_capacity(mut self, n: usize) -> Self {
        self.request_capacity = n;
        self
    }

    pub fn max_reads_in_flight(mut self, n: usize) -> Self {
        self.max_reads_in_flight = n;
        self
    }

    pub fn max_writes_in_flight(mut self, n: usize) -> Self {
        self.max_writes_in_flight = n;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Per-channel limits applied to every adopted channel.
    pub fn limits(&self) -> Limits {
        Limits {
            reads: self.max_reads_in_flight,
            writes: self.max_writes_in_flight,
        }
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sq_entries == 0 || !self.sq_entries.is_power_of_two() {
            return Err(ConfigError::InvalidValue("sq_entries must be a power of two"));
        }
        if self.sq_entries > MAX_SQ_ENTRIES {
            return Err(ConfigError::InvalidValue("sq_entries must be <= 32768"));
        }
        if self.request_capacity == 0 {
            return Err(ConfigError::InvalidValue("request_capacity must be > 0"));
        }
        if self.max_reads_in_flight == 0 {
            return Err(ConfigError::InvalidValue("max_reads_in_flight must be > 0"));
        }
        if self.max_writes_in_flight == 0 {
            return Err(ConfigError::InvalidValue("max_writes_in_flight must be > 0"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue("buffer_size must be > 0"));
        }
        Ok(())
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = Config::new();
        assert!(c.validate().is_ok());
        assert_eq!(c.limits(), Limits::default());
    }

    #[test]
    fn builder_overrides() {
        let c = Config::new()
            .sq_entries(64)
            .max_reads_in_flight(2)
            .max_writes_in_flight(8)
            .buffer_size(512);
        assert_eq!(c.sq_entries, 64);
        assert_eq!(c.limits(), Limits { reads: 2, writes: 8 });
        assert_eq!(c.buffer_size, 512);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::new().sq_entries(100).validate().is_err());
        assert!(Config::new().sq_entries(65536).validate().is_err());
        assert!(Config::new().request_capacity(0).validate().is_err());
        assert!(Config::new().max_reads_in_flight(0).validate().is_err());
        assert_eq!(
            Config::new().max_writes_in_flight(0).validate(),
            Err(ConfigError::InvalidValue("max_writes_in_flight must be > 0"))
        );
        assert!(Config::new().buffer_size(0).validate().is_err());
    }

    #[test]
    fn env_overrides() {
        std::env::set_var("RINGCHAN_MAX_WRITES", "4");
        let c = Config::from_env();
        std::env::remove_var("RINGCHAN_MAX_WRITES");
        assert_eq!(c.max_writes_in_flight, 4);
    }
}
