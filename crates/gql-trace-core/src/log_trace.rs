//! Observer that mirrors lifecycle hooks into `tracing` events
//!
//! Emits at `DEBUG` for query-level hooks and `TRACE` for the per-field and
//! per-fiber ones, under the `gql_trace::hooks` target.

use std::any::Any;
use std::time::Instant;

use crate::args::{
    path_label, AuthorizedCall, FiberId, FieldCall, Multiplex, Query, ResolveTypeCall, SourceRef,
    TypeRef,
};
use crate::hooks::{Next, TraceModule};
use crate::value::DebugValue;

const TARGET: &str = "gql_trace::hooks";

/// Logs every hook it sees, then forwards it
#[derive(Debug, Default)]
pub struct LogTrace {
    multiplex_started: Option<Instant>,
    fields: u64,
}

impl LogTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fields resolved so far in this execution
    pub fn fields_resolved(&self) -> u64 {
        self.fields
    }
}

impl TraceModule for LogTrace {
    fn name(&self) -> &str {
        "log"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn begin_execute_multiplex(&mut self, multiplex: &Multiplex, next: Next<'_>) {
        self.multiplex_started = Some(Instant::now());
        self.fields = 0;
        tracing::debug!(
            target: TARGET,
            operation_name = %multiplex.operation_label(),
            queries = multiplex.queries.len(),
            "Execute multiplex started"
        );
        next.begin_execute_multiplex(multiplex);
    }

    fn end_execute_multiplex(&mut self, multiplex: &Multiplex, next: Next<'_>) {
        let elapsed_ms = self
            .multiplex_started
            .take()
            .map(|started| started.elapsed().as_millis());
        tracing::debug!(
            target: TARGET,
            operation_name = %multiplex.operation_label(),
            fields = self.fields,
            elapsed_ms = ?elapsed_ms,
            "Execute multiplex finished"
        );
        next.end_execute_multiplex(multiplex);
    }

    fn begin_parse(&mut self, query_string: &str, next: Next<'_>) {
        tracing::debug!(target: TARGET, bytes = query_string.len(), "Parse started");
        next.begin_parse(query_string);
    }

    fn end_parse(&mut self, query_string: &str, next: Next<'_>) {
        tracing::debug!(target: TARGET, "Parse finished");
        next.end_parse(query_string);
    }

    fn begin_validate(&mut self, query: &Query, validate: bool, next: Next<'_>) {
        tracing::debug!(target: TARGET, validate, "Validate started");
        next.begin_validate(query, validate);
    }

    fn end_validate(&mut self, query: &Query, validate: bool, errors: &[String], next: Next<'_>) {
        if errors.is_empty() {
            tracing::debug!(target: TARGET, "Validate finished");
        } else {
            tracing::debug!(
                target: TARGET,
                errors = errors.len(),
                first_error = %errors[0],
                "Validate finished with errors"
            );
        }
        next.end_validate(query, validate, errors);
    }

    fn begin_analyze_multiplex(&mut self, multiplex: &Multiplex, analyzers: &[String], next: Next<'_>) {
        tracing::debug!(target: TARGET, analyzers = analyzers.len(), "Analysis started");
        next.begin_analyze_multiplex(multiplex, analyzers);
    }

    fn end_analyze_multiplex(&mut self, multiplex: &Multiplex, analyzers: &[String], next: Next<'_>) {
        tracing::debug!(target: TARGET, "Analysis finished");
        next.end_analyze_multiplex(multiplex, analyzers);
    }

    fn begin_execute_query(&mut self, query: &Query, next: Next<'_>) {
        tracing::debug!(
            target: TARGET,
            operation_name = query.operation_name.as_deref().unwrap_or("anonymous"),
            "Execute query started"
        );
        next.begin_execute_query(query);
    }

    fn end_execute_query(&mut self, query: &Query, next: Next<'_>) {
        tracing::debug!(target: TARGET, "Execute query finished");
        next.end_execute_query(query);
    }

    fn begin_execute_query_lazy(&mut self, multiplex: &Multiplex, next: Next<'_>) {
        tracing::trace!(target: TARGET, "Lazy resolution started");
        next.begin_execute_query_lazy(multiplex);
    }

    fn end_execute_query_lazy(&mut self, multiplex: &Multiplex, next: Next<'_>) {
        tracing::trace!(target: TARGET, "Lazy resolution finished");
        next.end_execute_query_lazy(multiplex);
    }

    fn begin_execute_field(&mut self, call: &FieldCall<'_>, next: Next<'_>) {
        tracing::trace!(
            target: TARGET,
            fiber = %call.fiber,
            path = %path_label(call.path),
            "Field started"
        );
        next.begin_execute_field(call);
    }

    fn end_execute_field(&mut self, call: &FieldCall<'_>, result: &DebugValue, next: Next<'_>) {
        self.fields += 1;
        tracing::trace!(
            target: TARGET,
            fiber = %call.fiber,
            path = %path_label(call.path),
            null = result.is_null(),
            "Field finished"
        );
        next.end_execute_field(call, result);
    }

    fn begin_authorized(&mut self, call: &AuthorizedCall<'_>, next: Next<'_>) {
        tracing::trace!(target: TARGET, type_name = %call.type_ref.name, "Authorization started");
        next.begin_authorized(call);
    }

    fn end_authorized(&mut self, call: &AuthorizedCall<'_>, is_authorized: bool, next: Next<'_>) {
        tracing::trace!(
            target: TARGET,
            type_name = %call.type_ref.name,
            is_authorized,
            "Authorization finished"
        );
        next.end_authorized(call, is_authorized);
    }

    fn begin_resolve_type(&mut self, call: &ResolveTypeCall<'_>, next: Next<'_>) {
        tracing::trace!(target: TARGET, abstract_type = %call.abstract_type.name, "Type resolution started");
        next.begin_resolve_type(call);
    }

    fn end_resolve_type(&mut self, call: &ResolveTypeCall<'_>, resolved: &TypeRef, next: Next<'_>) {
        tracing::trace!(
            target: TARGET,
            abstract_type = %call.abstract_type.name,
            resolved = %resolved.name,
            "Type resolution finished"
        );
        next.end_resolve_type(call, resolved);
    }

    fn begin_dataloader(&mut self, fiber: FiberId, next: Next<'_>) {
        tracing::debug!(target: TARGET, fiber = %fiber, "Dataloader started");
        next.begin_dataloader(fiber);
    }

    fn end_dataloader(&mut self, fiber: FiberId, next: Next<'_>) {
        tracing::debug!(target: TARGET, fiber = %fiber, "Dataloader finished");
        next.end_dataloader(fiber);
    }

    fn dataloader_spawn_execution_fiber(&mut self, fiber: FiberId, jobs: usize, next: Next<'_>) {
        tracing::trace!(target: TARGET, fiber = %fiber, jobs, "Execution fiber spawned");
        next.dataloader_spawn_execution_fiber(fiber, jobs);
    }

    fn dataloader_spawn_source_fiber(&mut self, fiber: FiberId, pending_sources: usize, next: Next<'_>) {
        tracing::trace!(target: TARGET, fiber = %fiber, pending_sources, "Source fiber spawned");
        next.dataloader_spawn_source_fiber(fiber, pending_sources);
    }

    fn begin_dataloader_source(&mut self, fiber: FiberId, source: &SourceRef, next: Next<'_>) {
        tracing::trace!(
            target: TARGET,
            fiber = %fiber,
            source = %source.class_name,
            keys = source.pending_keys.len(),
            "Source fetch started"
        );
        next.begin_dataloader_source(fiber, source);
    }

    fn end_dataloader_source(&mut self, fiber: FiberId, source: &SourceRef, next: Next<'_>) {
        tracing::trace!(target: TARGET, fiber = %fiber, source = %source.class_name, "Source fetch finished");
        next.end_dataloader_source(fiber, source);
    }

    fn dataloader_fiber_yield(&mut self, fiber: FiberId, source: &SourceRef, next: Next<'_>) {
        tracing::trace!(target: TARGET, fiber = %fiber, source = %source.class_name, "Fiber yielded");
        next.dataloader_fiber_yield(fiber, source);
    }

    fn dataloader_fiber_resume(&mut self, fiber: FiberId, source: &SourceRef, next: Next<'_>) {
        tracing::trace!(target: TARGET, fiber = %fiber, source = %source.class_name, "Fiber resumed");
        next.dataloader_fiber_resume(fiber, source);
    }

    fn dataloader_fiber_exit(&mut self, fiber: FiberId, next: Next<'_>) {
        tracing::trace!(target: TARGET, fiber = %fiber, "Fiber exited");
        next.dataloader_fiber_exit(fiber);
    }
}
