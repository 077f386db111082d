//! Trace modes and per-execution chain assembly
//!
//! A host registers observer factories once, either for every execution or
//! for a named mode, and asks for a fresh [`TraceChain`] per top-level
//! execution. When a detailed trace is enabled and its sampler picks the
//! execution, the detailed mode wins over whatever mode was requested and the
//! capture module is told to save its profile.
//!
//! # Example
//!
//! ```rust
//! use gql_trace_core::{AlwaysSample, Multiplex, Query, TraceSetup, TraceSink};
//! use std::sync::Arc;
//!
//! struct Discard;
//!
//! impl TraceSink for Discard {
//!     fn save_trace(&self, _: &str, _: u64, _: i64, _: Vec<u8>) -> Option<u64> {
//!         None
//!     }
//! }
//!
//! let mut setup = TraceSetup::new();
//! setup.enable_detailed_trace(AlwaysSample, Arc::new(Discard), "detailed")?;
//!
//! let chain = setup.new_trace(&Multiplex::single(Query::new("{ a }")), None)?;
//! assert_eq!(chain.module_names(), vec!["perfetto"]);
//! # Ok::<(), gql_trace_core::CaptureError>(())
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::args::Multiplex;
use crate::error::CaptureResult;
use crate::hooks::{TraceChain, TraceModule};
use crate::perfetto::{PerfettoOptions, PerfettoTrace};
use crate::sampling::Sampler;
use crate::wire;

/// Mode used when nothing else applies
pub const DEFAULT_MODE: &str = "default";

/// Receives finished binary traces
///
/// Implementations must not block for long or fail the caller: a trace that
/// cannot be kept is dropped and `None` returned.
pub trait TraceSink: Send + Sync {
    /// Keep one trace; returns its id when it was stored
    fn save_trace(&self, operation_name: &str, duration_ms: u64, begin_ms: i64, payload: Vec<u8>) -> Option<u64>;
}

/// What a factory learns about the chain it is building for
#[derive(Clone)]
pub struct TraceOptions {
    pub mode: String,
    /// Set when the execution was sampled for a detailed trace
    pub save_profile: bool,
    pub sink: Option<Arc<dyn TraceSink>>,
}

impl fmt::Debug for TraceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceOptions")
            .field("mode", &self.mode)
            .field("save_profile", &self.save_profile)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Builds one observer for one execution
pub type ModuleFactory = Arc<dyn Fn(&TraceOptions) -> CaptureResult<Box<dyn TraceModule>> + Send + Sync>;

#[derive(Clone)]
struct DetailedTraceHook {
    sampler: Arc<dyn Sampler>,
    sink: Arc<dyn TraceSink>,
    mode: String,
}

/// Registry of observer factories per trace mode
#[derive(Clone, Default)]
pub struct TraceSetup {
    default_modules: Vec<ModuleFactory>,
    mode_modules: HashMap<String, Vec<ModuleFactory>>,
    detailed: Option<DetailedTraceHook>,
}

impl fmt::Debug for TraceSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceSetup")
            .field("default_modules", &self.default_modules.len())
            .field("modes", &self.modes())
            .field("detailed_mode", &self.detailed.as_ref().map(|d| d.mode.as_str()))
            .finish()
    }
}

impl TraceSetup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for every execution (`mode = None`) or for one mode
    pub fn trace_with<F>(&mut self, factory: F, mode: Option<&str>) -> &mut Self
    where
        F: Fn(&TraceOptions) -> CaptureResult<Box<dyn TraceModule>> + Send + Sync + 'static,
    {
        let factory: ModuleFactory = Arc::new(factory);
        match mode {
            None => self.default_modules.push(factory),
            Some(mode) if mode == DEFAULT_MODE => self.default_modules.push(factory),
            Some(mode) => self
                .mode_modules
                .entry(mode.to_string())
                .or_default()
                .push(factory),
        }
        self
    }

    /// Attach the Perfetto capture module to `mode` and sample executions into it
    ///
    /// Fails immediately when binary encoding is not compiled in.
    pub fn enable_detailed_trace<S>(
        &mut self,
        sampler: S,
        sink: Arc<dyn TraceSink>,
        mode: impl Into<String>,
    ) -> CaptureResult<&mut Self>
    where
        S: Sampler + 'static,
    {
        wire::ensure_available()?;
        let mode = mode.into();
        self.trace_with(
            |options: &TraceOptions| {
                let mut perfetto = PerfettoOptions::default().with_save_profile(options.save_profile);
                if let Some(sink) = &options.sink {
                    perfetto = perfetto.with_sink(sink.clone());
                }
                Ok(Box::new(PerfettoTrace::new(perfetto)?) as Box<dyn TraceModule>)
            },
            Some(&mode),
        );
        self.detailed = Some(DetailedTraceHook {
            sampler: Arc::new(sampler),
            sink,
            mode,
        });
        Ok(self)
    }

    /// Named modes with registered modules, sorted
    pub fn modes(&self) -> Vec<&str> {
        let mut modes: Vec<&str> = self.mode_modules.keys().map(String::as_str).collect();
        modes.sort_unstable();
        modes
    }

    pub fn detailed_mode(&self) -> Option<&str> {
        self.detailed.as_ref().map(|d| d.mode.as_str())
    }

    /// The mode an execution runs in, and whether it was sampled
    pub fn resolve_mode(&self, multiplex: &Multiplex, requested: Option<&str>) -> (String, bool) {
        if let Some(detailed) = &self.detailed {
            if detailed.sampler.should_sample(multiplex) {
                return (detailed.mode.clone(), true);
            }
        }
        let mode = requested
            .or_else(|| multiplex.requested_mode())
            .unwrap_or(DEFAULT_MODE);
        (mode.to_string(), false)
    }

    /// Build the observer chain for one execution
    ///
    /// Default modules come first (outermost), followed by the mode's own.
    pub fn new_trace(&self, multiplex: &Multiplex, mode: Option<&str>) -> CaptureResult<TraceChain> {
        let (mode, sampled) = self.resolve_mode(multiplex, mode);
        let options = TraceOptions {
            save_profile: sampled,
            sink: self
                .detailed
                .as_ref()
                .filter(|_| sampled)
                .map(|d| d.sink.clone()),
            mode,
        };

        let mut chain = TraceChain::new();
        let mode_modules = self
            .mode_modules
            .get(&options.mode)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for factory in self.default_modules.iter().chain(mode_modules) {
            chain.push(factory(&options)?);
        }
        tracing::trace!(
            mode = %options.mode,
            sampled,
            modules = chain.len(),
            "trace chain built"
        );
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Query;
    use crate::error::CaptureError;
    use crate::hooks::Next;
    use crate::sampling::{AlwaysSample, NeverSample};
    use std::any::Any;

    struct Named(&'static str);

    impl TraceModule for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }

        fn begin_parse(&mut self, query_string: &str, next: Next<'_>) {
            next.begin_parse(query_string)
        }
    }

    struct NullSink;

    impl TraceSink for NullSink {
        fn save_trace(&self, _: &str, _: u64, _: i64, _: Vec<u8>) -> Option<u64> {
            None
        }
    }

    fn named(label: &'static str) -> impl Fn(&TraceOptions) -> CaptureResult<Box<dyn TraceModule>> {
        move |_| Ok(Box::new(Named(label)) as Box<dyn TraceModule>)
    }

    fn multiplex() -> Multiplex {
        Multiplex::single(Query::new("{ a }"))
    }

    #[test]
    fn test_default_modules_precede_mode_modules() {
        let mut setup = TraceSetup::new();
        setup
            .trace_with(named("metrics"), None)
            .trace_with(named("audit"), Some("audit"))
            .trace_with(named("log"), Some(DEFAULT_MODE));

        let chain = setup.new_trace(&multiplex(), None).unwrap();
        assert_eq!(chain.module_names(), vec!["metrics", "log"]);

        let chain = setup.new_trace(&multiplex(), Some("audit")).unwrap();
        assert_eq!(chain.module_names(), vec!["metrics", "log", "audit"]);
        assert_eq!(setup.modes(), vec!["audit"]);
    }

    #[test]
    fn test_multiplex_mode_used_as_fallback() {
        let mut setup = TraceSetup::new();
        setup.trace_with(named("audit"), Some("audit"));

        let mut m = multiplex();
        m.trace_mode = Some("audit".to_string());
        let chain = setup.new_trace(&m, None).unwrap();
        assert_eq!(chain.module_names(), vec!["audit"]);

        let chain = setup.new_trace(&m, Some("other")).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn test_sampled_execution_uses_detailed_mode() {
        let mut setup = TraceSetup::new();
        setup.trace_with(named("audit"), Some("audit"));
        setup
            .enable_detailed_trace(AlwaysSample, Arc::new(NullSink), "detailed")
            .unwrap();

        assert_eq!(setup.resolve_mode(&multiplex(), Some("audit")), ("detailed".to_string(), true));
        let chain = setup.new_trace(&multiplex(), Some("audit")).unwrap();
        assert_eq!(chain.module_names(), vec!["perfetto"]);
        let perfetto = chain.find::<PerfettoTrace>().unwrap();
        assert!(perfetto.save_profile());
    }

    #[test]
    fn test_unsampled_execution_skips_capture() {
        let mut setup = TraceSetup::new();
        setup
            .enable_detailed_trace(NeverSample, Arc::new(NullSink), "detailed")
            .unwrap();
        let chain = setup.new_trace(&multiplex(), None).unwrap();
        assert!(chain.is_empty());

        // Asking for the mode explicitly captures without saving
        let chain = setup.new_trace(&multiplex(), Some("detailed")).unwrap();
        assert!(!chain.find::<PerfettoTrace>().unwrap().save_profile());
    }

    #[test]
    fn test_factory_errors_propagate() {
        let mut setup = TraceSetup::new();
        setup.trace_with(|_| Err(CaptureError::config("broken")), None);
        let err = setup.new_trace(&multiplex(), None).unwrap_err();
        assert!(err.is_setup_error());
    }
}
