//! Detailed trace configuration
//!
//! Configuration can come from code (builder), environment variables or a
//! TOML document:
//!
//! ```toml
//! limit = 50
//! sample_rate = 0.01
//! trace_mode = "detailed"
//!
//! [backend]
//! type = "sled"
//! path = "/var/lib/app/traces"
//! ```
//!
//! # Example
//!
//! ```rust
//! use gql_trace_storage::{DetailedTraceConfig, StoreBackend, TraceStore};
//!
//! let config = DetailedTraceConfig::builder()
//!     .backend(StoreBackend::Memory)
//!     .limit(10)
//!     .sample_rate(0.5)
//!     .build()?;
//! let detailed = config.open()?;
//! assert_eq!(detailed.store().limit(), 10);
//! # Ok::<(), gql_trace_storage::StoreError>(())
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gql_trace_core::RateSampler;
use serde::{Deserialize, Serialize};

use crate::detailed::{DetailedTrace, DEFAULT_TRACE_MODE};
use crate::error::{StoreError, StoreResult};
use crate::memory::MemoryTraceStore;
use crate::sled_store::SledTraceStore;
use crate::store::TraceStore;

/// Default number of retained traces
pub const DEFAULT_LIMIT: usize = 50;

/// Where traces are kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process memory; lost on restart
    Memory,
    /// sled database at `path`
    Sled { path: PathBuf },
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend::Memory
    }
}

/// Settings for sampling and retaining detailed traces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailedTraceConfig {
    pub backend: StoreBackend,
    /// Maximum retained traces
    pub limit: usize,
    /// Probability of capturing an execution, `0.0..=1.0`
    pub sample_rate: f64,
    /// Trace mode the capture module is registered under
    pub trace_mode: String,
}

impl Default for DetailedTraceConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            limit: DEFAULT_LIMIT,
            sample_rate: 0.0,
            trace_mode: DEFAULT_TRACE_MODE.to_string(),
        }
    }
}

impl DetailedTraceConfig {
    pub fn builder() -> DetailedTraceConfigBuilder {
        DetailedTraceConfigBuilder::new()
    }

    /// Load configuration from environment variables
    ///
    /// Reads:
    /// - GQL_TRACE_BACKEND: `memory` or `sled`
    /// - GQL_TRACE_PATH: sled database directory (required for `sled`)
    /// - GQL_TRACE_LIMIT: retained traces
    /// - GQL_TRACE_SAMPLE_RATE: sampling probability
    /// - GQL_TRACE_MODE: trace mode name
    ///
    /// Unset or unparseable numbers fall back to defaults. An unknown
    /// backend, or `sled` without a path, is a configuration error.
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let path = lookup("GQL_TRACE_PATH").filter(|p| !p.is_empty());
        let backend = match (lookup("GQL_TRACE_BACKEND").as_deref(), path) {
            (Some("sled"), Some(path)) => StoreBackend::Sled { path: PathBuf::from(path) },
            (Some("sled"), None) => {
                return Err(StoreError::config("GQL_TRACE_BACKEND=sled requires GQL_TRACE_PATH"));
            }
            (Some("memory"), _) => StoreBackend::Memory,
            (Some(other), _) => {
                return Err(StoreError::config(format!(
                    "unknown GQL_TRACE_BACKEND '{}', expected 'memory' or 'sled'",
                    other
                )));
            }
            // A path alone implies a persistent store
            (None, Some(path)) => StoreBackend::Sled { path: PathBuf::from(path) },
            (None, None) => StoreBackend::Memory,
        };

        Ok(Self {
            backend,
            limit: lookup("GQL_TRACE_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.limit),
            sample_rate: lookup("GQL_TRACE_SAMPLE_RATE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sample_rate),
            trace_mode: lookup("GQL_TRACE_MODE").unwrap_or(defaults.trace_mode),
        })
    }

    /// Parse a TOML document; missing keys take defaults
    pub fn from_toml_str(content: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.limit == 0 {
            return Err(StoreError::config("limit must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(StoreError::config(format!(
                "sample_rate must be between 0 and 1, got {}",
                self.sample_rate
            )));
        }
        if self.trace_mode.trim().is_empty() {
            return Err(StoreError::config("trace_mode must not be empty"));
        }
        if let StoreBackend::Sled { path } = &self.backend {
            if path.as_os_str().is_empty() {
                return Err(StoreError::config("sled backend requires a path"));
            }
        }
        Ok(())
    }

    pub fn sampler(&self) -> RateSampler {
        RateSampler::new(self.sample_rate)
    }

    /// Open the configured backend
    pub fn open_store(&self) -> StoreResult<Arc<dyn TraceStore>> {
        self.validate()?;
        let store: Arc<dyn TraceStore> = match &self.backend {
            StoreBackend::Memory => Arc::new(MemoryTraceStore::new(self.limit)?),
            StoreBackend::Sled { path } => Arc::new(SledTraceStore::open(path, self.limit)?),
        };
        tracing::debug!(backend = store.backend(), limit = self.limit, "Trace store opened");
        Ok(store)
    }

    /// Open the store and wrap it with the configured sampler and mode
    pub fn open(&self) -> StoreResult<DetailedTrace> {
        let store = self.open_store()?;
        Ok(DetailedTrace::new(store)
            .with_sampler(self.sampler())
            .with_trace_mode(self.trace_mode.clone()))
    }
}

/// Builder for [`DetailedTraceConfig`]
#[derive(Debug, Default)]
pub struct DetailedTraceConfigBuilder {
    config: DetailedTraceConfig,
}

impl DetailedTraceConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: StoreBackend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Use a sled database at `path`
    pub fn sled(self, path: impl Into<PathBuf>) -> Self {
        self.backend(StoreBackend::Sled { path: path.into() })
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.config.limit = limit;
        self
    }

    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.config.sample_rate = rate;
        self
    }

    pub fn trace_mode(mut self, mode: impl Into<String>) -> Self {
        self.config.trace_mode = mode.into();
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> StoreResult<DetailedTraceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
