//! Lifecycle hook contract and observer composition
//!
//! The execution engine talks to a [`Trace`]: one method per lifecycle event.
//! Every method defaults to a no-op, so [`NullTrace`] is an uninstrumented
//! execution and costs nothing beyond the calls themselves.
//!
//! Independently written observers implement [`TraceModule`]. A module hook
//! receives a [`Next`] handle for the rest of the chain and decides when to
//! call through, so modules wrap each other like a decorator stack: the first
//! module attached is the outermost. Hooks a module does not override simply
//! forward, which makes attachment order irrelevant for them.
//!
//! ```rust
//! use gql_trace_core::{Multiplex, Next, Query, Trace, TraceChain, TraceModule};
//! use std::any::Any;
//!
//! struct CountMultiplexes(usize);
//!
//! impl TraceModule for CountMultiplexes {
//!     fn name(&self) -> &str { "count" }
//!     fn as_any(&self) -> &dyn Any { self }
//!     fn as_any_mut(&mut self) -> &mut dyn Any { self }
//!
//!     fn begin_execute_multiplex(&mut self, multiplex: &Multiplex, next: Next<'_>) {
//!         self.0 += 1;
//!         next.begin_execute_multiplex(multiplex);
//!     }
//! }
//!
//! let mut chain = TraceChain::new().with_module(CountMultiplexes(0));
//! chain.begin_execute_multiplex(&Multiplex::single(Query::new("{ a }")));
//! assert_eq!(chain.find::<CountMultiplexes>().map(|m| m.0), Some(1));
//! ```

use std::any::Any;
use std::fmt;

use crate::args::{
    AuthorizedCall, FiberId, FieldCall, Multiplex, Query, ResolveTypeCall, SourceRef, TypeRef,
};
use crate::value::DebugValue;

/// Handle on the observers beneath the current one
pub struct Next<'a> {
    rest: &'a mut [Box<dyn TraceModule>],
}

impl<'a> Next<'a> {
    /// Number of observers still to be called
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

macro_rules! lifecycle_hooks {
    ($( $(#[$doc:meta])* fn $hook:ident($($arg:ident: $ty:ty),*); )*) => {
        /// Engine-facing lifecycle contract
        pub trait Trace {
            $(
                $(#[$doc])*
                #[allow(unused_variables)]
                fn $hook(&mut self $(, $arg: $ty)*) {}
            )*
        }

        /// An observer attached to a [`TraceChain`]
        ///
        /// Overridden hooks must call the matching method on `next` to keep the
        /// rest of the chain informed.
        pub trait TraceModule: Send {
            /// Short name used in logs
            fn name(&self) -> &str;

            fn as_any(&self) -> &dyn Any;

            fn as_any_mut(&mut self) -> &mut dyn Any;

            $(
                $(#[$doc])*
                fn $hook(&mut self $(, $arg: $ty)*, next: Next<'_>) {
                    next.$hook($($arg),*)
                }
            )*
        }

        impl<'a> Next<'a> {
            $(
                pub fn $hook(self $(, $arg: $ty)*) {
                    if let Some((head, rest)) = self.rest.split_first_mut() {
                        head.$hook($($arg,)* Next { rest });
                    }
                }
            )*
        }

        impl Trace for TraceChain {
            $(
                fn $hook(&mut self $(, $arg: $ty)*) {
                    self.next().$hook($($arg),*)
                }
            )*
        }
    };
}

lifecycle_hooks! {
    /// A batch of queries starts executing
    fn begin_execute_multiplex(multiplex: &Multiplex);
    /// The batch finished, results are final
    fn end_execute_multiplex(multiplex: &Multiplex);
    fn begin_parse(query_string: &str);
    fn end_parse(query_string: &str);
    /// `validate` is false when the caller skipped static validation
    fn begin_validate(query: &Query, validate: bool);
    fn end_validate(query: &Query, validate: bool, errors: &[String]);
    fn begin_analyze_multiplex(multiplex: &Multiplex, analyzers: &[String]);
    fn end_analyze_multiplex(multiplex: &Multiplex, analyzers: &[String]);
    fn begin_execute_query(query: &Query);
    fn end_execute_query(query: &Query);
    /// Deferred values across the batch are being resolved
    fn begin_execute_query_lazy(multiplex: &Multiplex);
    fn end_execute_query_lazy(multiplex: &Multiplex);
    fn begin_execute_field(call: &FieldCall<'_>);
    fn end_execute_field(call: &FieldCall<'_>, result: &DebugValue);
    fn begin_authorized(call: &AuthorizedCall<'_>);
    fn end_authorized(call: &AuthorizedCall<'_>, is_authorized: bool);
    fn begin_resolve_type(call: &ResolveTypeCall<'_>);
    fn end_resolve_type(call: &ResolveTypeCall<'_>, resolved: &TypeRef);
    /// `fiber` is the fiber that runs the batched-fetch scheduler
    fn begin_dataloader(fiber: FiberId);
    fn end_dataloader(fiber: FiberId);
    /// Called on the newly spawned fiber before it runs any job
    fn dataloader_spawn_execution_fiber(fiber: FiberId, jobs: usize);
    /// Called on the newly spawned fiber before it runs any source
    fn dataloader_spawn_source_fiber(fiber: FiberId, pending_sources: usize);
    fn begin_dataloader_source(fiber: FiberId, source: &SourceRef);
    fn end_dataloader_source(fiber: FiberId, source: &SourceRef);
    /// `fiber` suspends until `source` has fetched
    fn dataloader_fiber_yield(fiber: FiberId, source: &SourceRef);
    fn dataloader_fiber_resume(fiber: FiberId, source: &SourceRef);
    fn dataloader_fiber_exit(fiber: FiberId);
}

/// The base case: an execution with nothing attached
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTrace;

impl Trace for NullTrace {}

/// An ordered stack of observers behind one [`Trace`]
#[derive(Default)]
pub struct TraceChain {
    modules: Vec<Box<dyn TraceModule>>,
}

impl fmt::Debug for TraceChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceChain")
            .field("modules", &self.module_names())
            .finish()
    }
}

impl TraceChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a module beneath the ones already attached (builder pattern)
    pub fn with_module<M: TraceModule + 'static>(mut self, module: M) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    /// Attach a module beneath the ones already attached
    pub fn push(&mut self, module: Box<dyn TraceModule>) {
        self.modules.push(module);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module names, outermost first
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// First attached module of type `M`
    pub fn find<M: TraceModule + 'static>(&self) -> Option<&M> {
        self.modules.iter().find_map(|m| m.as_any().downcast_ref::<M>())
    }

    pub fn find_mut<M: TraceModule + 'static>(&mut self) -> Option<&mut M> {
        self.modules
            .iter_mut()
            .find_map(|m| m.as_any_mut().downcast_mut::<M>())
    }

    fn next(&mut self) -> Next<'_> {
        Next {
            rest: self.modules.as_mut_slice(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records before and after calling through, to expose nesting order
    struct Recorder {
        label: &'static str,
        log: Log,
    }

    impl Recorder {
        fn push(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    impl TraceModule for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }

        fn begin_parse(&mut self, query_string: &str, next: Next<'_>) {
            self.push(format!("{}:enter", self.label));
            next.begin_parse(query_string);
            self.push(format!("{}:exit", self.label));
        }
    }

    /// Overrides nothing
    struct Silent;

    impl TraceModule for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    /// Swallows `end_parse` without calling through
    struct Swallow;

    impl TraceModule for Swallow {
        fn name(&self) -> &str {
            "swallow"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }

        fn end_parse(&mut self, _query_string: &str, _next: Next<'_>) {}
    }

    struct EndCounter(usize);

    impl TraceModule for EndCounter {
        fn name(&self) -> &str {
            "end-counter"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }

        fn end_parse(&mut self, query_string: &str, next: Next<'_>) {
            self.0 += 1;
            next.end_parse(query_string);
        }
    }

    #[test]
    fn test_outer_wraps_inner() {
        let log = Log::default();
        let mut chain = TraceChain::new()
            .with_module(Recorder { label: "outer", log: log.clone() })
            .with_module(Silent)
            .with_module(Recorder { label: "inner", log: log.clone() });

        chain.begin_parse("{ a }");

        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer:enter", "inner:enter", "inner:exit", "outer:exit"]
        );
    }

    #[test]
    fn test_default_hooks_ignore_order() {
        let log = Log::default();
        let mut chain = TraceChain::new()
            .with_module(Silent)
            .with_module(Recorder { label: "only", log: log.clone() });
        chain.begin_parse("{ a }");

        let mut reversed = TraceChain::new()
            .with_module(Recorder { label: "only", log: log.clone() })
            .with_module(Silent);
        reversed.begin_parse("{ a }");

        assert_eq!(
            *log.lock().unwrap(),
            vec!["only:enter", "only:exit", "only:enter", "only:exit"]
        );
    }

    #[test]
    fn test_module_can_stop_the_chain() {
        let mut chain = TraceChain::new()
            .with_module(Swallow)
            .with_module(EndCounter(0));
        chain.end_parse("{ a }");
        assert_eq!(chain.find::<EndCounter>().map(|c| c.0), Some(0));

        let mut chain = TraceChain::new()
            .with_module(EndCounter(0))
            .with_module(Swallow);
        chain.end_parse("{ a }");
        assert_eq!(chain.find::<EndCounter>().map(|c| c.0), Some(1));
    }

    #[test]
    fn test_empty_chain_is_noop() {
        let mut chain = TraceChain::new();
        assert!(chain.is_empty());
        chain.begin_parse("{ a }");
        chain.dataloader_fiber_exit(FiberId::MAIN);

        let mut null = NullTrace;
        null.end_parse("{ a }");
    }

    #[test]
    fn test_find_and_names() {
        let mut chain = TraceChain::new().with_module(Silent).with_module(EndCounter(4));
        assert_eq!(chain.module_names(), vec!["silent", "end-counter"]);
        assert_eq!(chain.len(), 2);

        if let Some(counter) = chain.find_mut::<EndCounter>() {
            counter.0 = 9;
        }
        assert_eq!(chain.find::<EndCounter>().map(|c| c.0), Some(9));
        assert!(chain.find::<Swallow>().is_none());
    }
}
