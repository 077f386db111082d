//! Perfetto capture module
//!
//! [`PerfettoTrace`] observes one execution and records it as a Perfetto
//! trace: a `Main Thread` track, one lane per fiber, nested slices for every
//! begin/end hook pair, instants for fiber scheduling, counter tracks for
//! allocations, active fibers and resolved fields, and flow links from a
//! suspended span to the batched fetch it was waiting for.
//!
//! When a fiber yields, its open span is closed on the lane and re-opened as a
//! copy on resume, so the lane shows the gap where other fibers ran. The span
//! stays on the fiber's stack the whole time.
//!
//! # Example
//!
//! ```rust
//! use gql_trace_core::{Multiplex, PerfettoOptions, PerfettoTrace, Query, Trace, TraceChain};
//!
//! let mut chain = TraceChain::new().with_module(PerfettoTrace::new(PerfettoOptions::default())?);
//! let multiplex = Multiplex::single(Query::new("{ a }"));
//! chain.begin_execute_multiplex(&multiplex);
//! chain.begin_parse("{ a }");
//! chain.end_parse("{ a }");
//! chain.end_execute_multiplex(&multiplex);
//!
//! let trace = chain.find::<PerfettoTrace>().expect("attached");
//! assert!(trace.is_balanced());
//! let bytes = trace.to_bytes()?;
//! assert!(!bytes.is_empty());
//! # Ok::<(), gql_trace_core::CaptureError>(())
//! ```

use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::alloc::{AllocationSource, NoAllocationTracking};
use crate::args::{
    path_label, AuthorizedCall, FiberId, FieldCall, Multiplex, Query, ResolveTypeCall, SourceRef,
    TypeRef,
};
use crate::encoder::{
    preamble_interned_data, AnnotationKey, PacketEncoder, ANNOTATION_ARGUMENTS,
    ANNOTATION_FETCH_KEYS, ANNOTATION_OBJECT, ANNOTATION_RESULT, CATEGORY_AUTHORIZED,
    CATEGORY_DATALOADER, CATEGORY_EXTERNAL_NOTIFICATIONS, CATEGORY_FIELD_EXECUTION,
    CATEGORY_RESOLVE_TYPE,
};
use crate::error::{CaptureError, CaptureResult};
use crate::fiber::{flow_id_for, Counters, FiberStacks, FlowLinks, OpenSpan, SpanKind, Unbalanced};
use crate::hooks::{Next, TraceModule};
use crate::packet::{
    self, DebugAnnotation, EventKind, TrackEvent, TrackKind, TracePacket,
    SEQ_INCREMENTAL_STATE_CLEARED, SEQ_NEEDS_INCREMENTAL_STATE,
};
use crate::setup::TraceSink;
use crate::value::DebugValue;
use crate::wire;

static NEXT_SEQUENCE_ID: AtomicU32 = AtomicU32::new(1);

fn next_sequence_id() -> u32 {
    loop {
        let id = NEXT_SEQUENCE_ID.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

/// Capture settings
#[derive(Default)]
pub struct PerfettoOptions {
    /// Hand the encoded trace to `sink` when the multiplex ends
    pub save_profile: bool,
    pub sink: Option<Arc<dyn TraceSink>>,
    /// Feeds the `Allocated Objects` counter; defaults to reporting zero
    pub allocations: Option<Box<dyn AllocationSource>>,
    /// Fixed sequence id instead of the next process-wide one
    pub sequence_id: Option<u32>,
}

impl fmt::Debug for PerfettoOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerfettoOptions")
            .field("save_profile", &self.save_profile)
            .field("sink", &self.sink.is_some())
            .field("allocations", &self.allocations.is_some())
            .field("sequence_id", &self.sequence_id)
            .finish()
    }
}

impl PerfettoOptions {
    pub fn with_save_profile(mut self, save_profile: bool) -> Self {
        self.save_profile = save_profile;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_allocations<A: AllocationSource + 'static>(mut self, source: A) -> Self {
        self.allocations = Some(Box::new(source));
        self
    }

    pub fn with_sequence_id(mut self, sequence_id: u32) -> Self {
        self.sequence_id = Some(sequence_id);
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct CoreTracks {
    thread: u64,
    main_fiber: u64,
    objects: u64,
    fibers: u64,
    fields: u64,
}

/// Records one execution as a Perfetto trace
pub struct PerfettoTrace {
    encoder: PacketEncoder,
    stacks: FiberStacks,
    flows: FlowLinks,
    counters: Counters,
    tracks: CoreTracks,
    dataloader_track: Option<u64>,
    save_profile: bool,
    sink: Option<Arc<dyn TraceSink>>,
    operation_name: Option<String>,
    began: Option<(i64, Instant)>,
    saved_trace_id: Option<u64>,
    finished: bool,
}

impl fmt::Debug for PerfettoTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerfettoTrace")
            .field("sequence_id", &self.encoder.sequence_id())
            .field("packets", &self.encoder.len())
            .field("operation_name", &self.operation_name)
            .field("save_profile", &self.save_profile)
            .field("finished", &self.finished)
            .finish()
    }
}

impl PerfettoTrace {
    /// Start a capture and write the sequence preamble
    ///
    /// Fails when binary encoding is not compiled in, or when saving is
    /// requested without a sink.
    pub fn new(options: PerfettoOptions) -> CaptureResult<Self> {
        wire::ensure_available()?;
        if options.save_profile && options.sink.is_none() {
            return Err(CaptureError::config("save_profile requires a trace sink"));
        }
        let sequence_id = match options.sequence_id {
            Some(0) => return Err(CaptureError::config("sequence id 0 is reserved")),
            Some(id) => id,
            None => next_sequence_id(),
        };

        let mut encoder = PacketEncoder::new(sequence_id);
        let thread = encoder.create_track(None, "Main Thread", TrackKind::Lane);
        if let Some(first) = encoder.packet_mut(0) {
            first.first_packet_on_sequence = true;
            first.previous_packet_dropped = true;
            first.sequence_flags = Some(SEQ_INCREMENTAL_STATE_CLEARED | SEQ_NEEDS_INCREMENTAL_STATE);
        }

        let mut preamble = TracePacket::new(sequence_id);
        preamble.sequence_flags = Some(SEQ_NEEDS_INCREMENTAL_STATE);
        preamble.interned_data = Some(preamble_interned_data());
        encoder.push_packet(preamble);

        let main_fiber = encoder.create_fiber_track(FiberId::MAIN, thread, "Main Fiber");

        let counters = Counters::new(
            options
                .allocations
                .unwrap_or_else(|| Box::new(NoAllocationTracking)),
        );
        let objects = encoder.create_track(Some(thread), "Allocated Objects", TrackKind::Counter);
        encoder.emit(counter_sample(objects, counters.allocations()));
        let fibers = encoder.create_track(Some(thread), "Active Fibers", TrackKind::Counter);
        encoder.emit(counter_sample(fibers, counters.fibers()));
        let fields = encoder.create_track(Some(thread), "Resolved Fields", TrackKind::Counter);
        encoder.emit(counter_sample(fields, counters.fields()));

        Ok(Self {
            encoder,
            stacks: FiberStacks::new(),
            flows: FlowLinks::new(),
            counters,
            tracks: CoreTracks {
                thread,
                main_fiber,
                objects,
                fibers,
                fields,
            },
            dataloader_track: None,
            save_profile: options.save_profile,
            sink: options.sink,
            operation_name: None,
            began: None,
            saved_trace_id: None,
            finished: false,
        })
    }

    pub fn sequence_id(&self) -> u32 {
        self.encoder.sequence_id()
    }

    pub fn save_profile(&self) -> bool {
        self.save_profile
    }

    /// Comma-joined operation names of the traced multiplex
    pub fn operation_name(&self) -> Option<&str> {
        self.operation_name.as_deref()
    }

    /// Id the sink returned for this trace, once saved
    pub fn saved_trace_id(&self) -> Option<u64> {
        self.saved_trace_id
    }

    /// Current time on this capture's clock, for [`Self::record_notification`]
    pub fn now_ns(&self) -> u64 {
        self.encoder.now_ns()
    }

    pub fn thread_track(&self) -> u64 {
        self.tracks.thread
    }

    /// Lane of `fiber`, if the fiber has been seen
    pub fn fiber_track(&self, fiber: FiberId) -> Option<u64> {
        self.encoder.fiber_track(fiber)
    }

    pub fn packets(&self) -> &[TracePacket] {
        self.encoder.packets()
    }

    /// No fiber has a span open
    pub fn is_balanced(&self) -> bool {
        self.stacks.is_balanced()
    }

    /// Close the capture, marking every fiber left with open spans
    ///
    /// Returns whether the capture was balanced. Calling it again has no
    /// further effect.
    pub fn finish(&mut self) -> bool {
        if self.finished {
            return self.stacks.is_balanced();
        }
        self.finished = true;

        let open = self.stacks.unbalanced();
        for &(fiber, depth) in &open {
            tracing::warn!(
                fiber = %fiber,
                open_spans = depth,
                sequence_id = self.encoder.sequence_id(),
                "Trace finished with open spans"
            );
            let track = self.track_for(fiber);
            let annotation = self.encoder.annotation(
                AnnotationKey::Name("open_spans"),
                &DebugValue::from(depth),
                false,
            );
            self.encoder.emit(
                TrackEvent::new(EventKind::Instant, track)
                    .named("Unbalanced Spans")
                    .with_annotations(vec![annotation]),
            );
        }
        self.encoder.flush_interned();
        open.is_empty()
    }

    /// Record an externally measured span on `fiber`'s lane
    ///
    /// Timestamps are on this capture's clock, see [`Self::now_ns`].
    pub fn record_notification(
        &mut self,
        fiber: FiberId,
        name: &str,
        start_ns: u64,
        finish_ns: u64,
        payload: &[(String, DebugValue)],
    ) {
        let track = self.track_for(fiber);
        let annotations: Vec<_> = payload
            .iter()
            .map(|(key, value)| self.encoder.annotation(AnnotationKey::Name(key), value, true))
            .collect();
        self.encoder.emit_at(
            TrackEvent::new(EventKind::SliceBegin, track)
                .named(name)
                .with_categories(&[CATEGORY_EXTERNAL_NOTIFICATIONS])
                .with_annotations(annotations),
            start_ns,
        );
        let objects = self.objects_sample();
        self.encoder.emit_at(
            TrackEvent::new(EventKind::SliceEnd, track).with_counters(&[objects]),
            finish_ns.max(start_ns),
        );
    }

    /// Encode as a binary Perfetto trace
    pub fn to_bytes(&self) -> CaptureResult<Vec<u8>> {
        wire::encode_trace(&self.encoder.snapshot())
    }

    /// Render as pretty-printed debug JSON
    pub fn to_debug_json(&self) -> CaptureResult<String> {
        Ok(packet::to_debug_json(&self.encoder.snapshot())?)
    }

    /// Write the trace to `path`, as debug JSON or binary
    pub fn write(&self, path: impl AsRef<Path>, debug_json: bool) -> CaptureResult<()> {
        let bytes = if debug_json {
            self.to_debug_json()?.into_bytes()
        } else {
            self.to_bytes()?
        };
        std::fs::write(path.as_ref(), bytes)?;
        Ok(())
    }

    fn track_for(&mut self, fiber: FiberId) -> u64 {
        match self.encoder.fiber_track(fiber) {
            Some(track) => track,
            None => {
                let parent = self.dataloader_track.unwrap_or(self.tracks.main_fiber);
                self.encoder
                    .create_fiber_track(fiber, parent, format!("Fiber #{}", fiber))
            }
        }
    }

    fn objects_sample(&self) -> (u64, i64) {
        (self.tracks.objects, self.counters.allocations())
    }

    fn begin_span(&mut self, fiber: FiberId, kind: SpanKind, event: TrackEvent) -> usize {
        let packet = self.encoder.emit(event);
        self.stacks.push(fiber, OpenSpan { kind, packet });
        packet
    }

    /// Pop and close the innermost span of `kind`, or mark the mismatch
    fn end_span(&mut self, fiber: FiberId, kind: SpanKind, counters: &[(u64, i64)]) -> Option<OpenSpan> {
        self.end_span_with(fiber, kind, counters, |_| Vec::new())
    }

    /// Like [`Self::end_span`], first adding `summary` to the span's begin event
    ///
    /// The summary is built only for a matched span, and before the end event
    /// is written, so whatever it interns is defined on the begin packet.
    fn end_span_with<F>(
        &mut self,
        fiber: FiberId,
        kind: SpanKind,
        counters: &[(u64, i64)],
        summary: F,
    ) -> Option<OpenSpan>
    where
        F: FnOnce(&mut PacketEncoder) -> Vec<DebugAnnotation>,
    {
        let track = self.track_for(fiber);
        match self.stacks.pop(fiber, kind) {
            Ok(span) => {
                let annotations = summary(&mut self.encoder);
                if !annotations.is_empty() {
                    self.encoder.amend(span.packet, annotations);
                }
                self.encoder
                    .emit(TrackEvent::new(EventKind::SliceEnd, track).with_counters(counters));
                Some(span)
            }
            Err(reason) => {
                self.unbalanced_end(fiber, track, kind, reason);
                None
            }
        }
    }

    fn unbalanced_end(&mut self, fiber: FiberId, track: u64, kind: SpanKind, reason: Unbalanced) {
        let found = match reason {
            Unbalanced::Empty => "nothing",
            Unbalanced::Mismatch { found, .. } => found.as_str(),
        };
        tracing::debug!(
            fiber = %fiber,
            expected = kind.as_str(),
            found,
            "End hook without a matching begin"
        );
        let expected = self.encoder.annotation(
            AnnotationKey::Name("expected"),
            &DebugValue::from(kind.as_str()),
            false,
        );
        let found = self
            .encoder
            .annotation(AnnotationKey::Name("found"), &DebugValue::from(found), false);
        self.encoder.emit(
            TrackEvent::new(EventKind::Instant, track)
                .named("Unbalanced End")
                .with_annotations(vec![expected, found]),
        );
    }

    fn slice(&mut self, fiber: FiberId) -> TrackEvent {
        let track = self.track_for(fiber);
        TrackEvent::new(EventKind::SliceBegin, track)
    }

    fn dataloader_instant(&mut self, fiber: FiberId, name: &str) -> TrackEvent {
        let track = self.track_for(fiber);
        TrackEvent::new(EventKind::Instant, track)
            .named(name)
            .with_categories(&[CATEGORY_DATALOADER])
    }

    fn spawn_fiber(&mut self, fiber: FiberId, label: &str, instant: &str, detail: (&str, usize)) {
        let parent = self.dataloader_track.unwrap_or(self.tracks.main_fiber);
        self.encoder
            .create_fiber_track(fiber, parent, format!("{} #{}", label, fiber));
        let count = self.counters.add_fibers(1);
        let objects = self.objects_sample();
        let annotation =
            self.encoder
                .annotation(AnnotationKey::Name(detail.0), &DebugValue::from(detail.1), false);
        let event = self
            .dataloader_instant(fiber, instant)
            .with_annotations(vec![annotation])
            .with_counters(&[(self.tracks.fibers, count), objects]);
        self.encoder.emit(event);
    }

    fn on_fiber_yield(&mut self, fiber: FiberId, source: &SourceRef) {
        let track = self.track_for(fiber);
        let Some(top) = self.stacks.top(fiber) else {
            tracing::debug!(fiber = %fiber, source = source.id.0, "Fiber yielded with no open span");
            let event = self.dataloader_instant(fiber, "Fiber Yield");
            self.encoder.emit(event);
            return;
        };

        let sequence_id = self.encoder.sequence_id();
        let flow_id = match self.encoder.event_mut(top.packet) {
            Some(event) => match event.flow_ids.first() {
                Some(&existing) => existing,
                None => {
                    let id = flow_id_for(sequence_id, top.packet);
                    event.flow_ids.push(id);
                    event.clear_counters();
                    id
                }
            },
            None => flow_id_for(sequence_id, top.packet),
        };
        self.flows.add(source.id, flow_id);

        self.encoder.emit(TrackEvent::new(EventKind::SliceEnd, track));
        let event = self
            .dataloader_instant(fiber, "Fiber Yield")
            .with_flow_ids(vec![flow_id]);
        self.encoder.emit(event);
    }

    fn on_fiber_resume(&mut self, fiber: FiberId) {
        let event = self.dataloader_instant(fiber, "Fiber Resume");
        self.encoder.emit(event);

        let Some(top) = self.stacks.top(fiber) else {
            return;
        };
        if let Some(mut reopened) = self.encoder.event(top.packet).cloned() {
            reopened.kind = EventKind::SliceBegin;
            let packet = self.encoder.emit(reopened);
            self.stacks.retarget_top(fiber, packet);
        }
    }

    fn save(&mut self) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let (begin_ms, duration_ms) = match self.began {
            Some((begin_ms, started)) => (
                begin_ms,
                u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            ),
            None => (chrono::Utc::now().timestamp_millis(), 0),
        };
        let payload = match self.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode trace, dropping it");
                return;
            }
        };
        let operation_name = self.operation_name.clone().unwrap_or_default();
        self.saved_trace_id = sink.save_trace(&operation_name, duration_ms, begin_ms, payload);
        tracing::debug!(
            operation_name = %operation_name,
            duration_ms,
            trace_id = ?self.saved_trace_id,
            "Detailed trace captured"
        );
    }
}

fn counter_sample(track: u64, value: i64) -> TrackEvent {
    let mut event = TrackEvent::new(EventKind::Counter, track);
    event.counter_value = Some(value);
    event
}

impl TraceModule for PerfettoTrace {
    fn name(&self) -> &str {
        "perfetto"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn begin_execute_multiplex(&mut self, multiplex: &Multiplex, next: Next<'_>) {
        self.operation_name = Some(multiplex.operation_label());
        self.began = Some((chrono::Utc::now().timestamp_millis(), Instant::now()));
        let query_string = self.encoder.annotation(
            AnnotationKey::Name("query_string"),
            &DebugValue::String(multiplex.query_strings()),
            false,
        );
        let event = self
            .slice(FiberId::MAIN)
            .named("Multiplex")
            .with_annotations(vec![query_string]);
        self.begin_span(FiberId::MAIN, SpanKind::Multiplex, event);
        next.begin_execute_multiplex(multiplex);
    }

    fn end_execute_multiplex(&mut self, multiplex: &Multiplex, next: Next<'_>) {
        self.end_span(FiberId::MAIN, SpanKind::Multiplex, &[]);
        next.end_execute_multiplex(multiplex);
        self.finish();
        if self.save_profile {
            self.save();
        }
    }

    fn begin_parse(&mut self, query_string: &str, next: Next<'_>) {
        let objects = self.objects_sample();
        let event = self.slice(FiberId::MAIN).named("Parse").with_counters(&[objects]);
        self.begin_span(FiberId::MAIN, SpanKind::Parse, event);
        next.begin_parse(query_string);
    }

    fn end_parse(&mut self, query_string: &str, next: Next<'_>) {
        let objects = self.objects_sample();
        self.end_span(FiberId::MAIN, SpanKind::Parse, &[objects]);
        next.end_parse(query_string);
    }

    fn begin_validate(&mut self, query: &Query, validate: bool, next: Next<'_>) {
        let objects = self.objects_sample();
        let flag = self
            .encoder
            .annotation(AnnotationKey::Name("validate?"), &DebugValue::Bool(validate), false);
        let event = self
            .slice(FiberId::MAIN)
            .named("Validate")
            .with_annotations(vec![flag])
            .with_counters(&[objects]);
        self.begin_span(FiberId::MAIN, SpanKind::Validate, event);
        next.begin_validate(query, validate);
    }

    fn end_validate(&mut self, query: &Query, validate: bool, errors: &[String], next: Next<'_>) {
        let objects = self.objects_sample();
        let valid = DebugValue::Bool(errors.is_empty());
        self.end_span_with(FiberId::MAIN, SpanKind::Validate, &[objects], |encoder| {
            vec![encoder.annotation(AnnotationKey::Name("valid?"), &valid, false)]
        });
        next.end_validate(query, validate, errors);
    }

    fn begin_analyze_multiplex(&mut self, multiplex: &Multiplex, analyzers: &[String], next: Next<'_>) {
        let objects = self.objects_sample();
        let count = self.encoder.annotation(
            AnnotationKey::Name("analyzers_count"),
            &DebugValue::from(analyzers.len()),
            false,
        );
        let names = self.encoder.annotation(
            AnnotationKey::Name("analyzers"),
            &DebugValue::List(analyzers.iter().map(|a| DebugValue::String(a.clone())).collect()),
            true,
        );
        let event = self
            .slice(FiberId::MAIN)
            .named("Analysis")
            .with_annotations(vec![count, names])
            .with_counters(&[objects]);
        self.begin_span(FiberId::MAIN, SpanKind::Analyze, event);
        next.begin_analyze_multiplex(multiplex, analyzers);
    }

    fn end_analyze_multiplex(&mut self, multiplex: &Multiplex, analyzers: &[String], next: Next<'_>) {
        let objects = self.objects_sample();
        self.end_span(FiberId::MAIN, SpanKind::Analyze, &[objects]);
        next.end_analyze_multiplex(multiplex, analyzers);
    }

    fn begin_execute_query(&mut self, query: &Query, next: Next<'_>) {
        let objects = self.objects_sample();
        let operation = self.encoder.annotation(
            AnnotationKey::Name("operation_name"),
            &DebugValue::from(query.operation_name.clone()),
            true,
        );
        let event = self
            .slice(FiberId::MAIN)
            .named("Execute Query")
            .with_annotations(vec![operation])
            .with_counters(&[objects]);
        self.begin_span(FiberId::MAIN, SpanKind::ExecuteQuery, event);
        next.begin_execute_query(query);
    }

    fn end_execute_query(&mut self, query: &Query, next: Next<'_>) {
        let objects = self.objects_sample();
        self.end_span(FiberId::MAIN, SpanKind::ExecuteQuery, &[objects]);
        next.end_execute_query(query);
    }

    fn begin_execute_query_lazy(&mut self, multiplex: &Multiplex, next: Next<'_>) {
        let objects = self.objects_sample();
        let event = self
            .slice(FiberId::MAIN)
            .named("Execute Query Lazy")
            .with_counters(&[objects]);
        self.begin_span(FiberId::MAIN, SpanKind::ExecuteQueryLazy, event);
        next.begin_execute_query_lazy(multiplex);
    }

    fn end_execute_query_lazy(&mut self, multiplex: &Multiplex, next: Next<'_>) {
        let objects = self.objects_sample();
        self.end_span(FiberId::MAIN, SpanKind::ExecuteQueryLazy, &[objects]);
        next.end_execute_query_lazy(multiplex);
    }

    fn begin_execute_field(&mut self, call: &FieldCall<'_>, next: Next<'_>) {
        let name = if call.path.is_empty() {
            call.field.name.to_string()
        } else {
            path_label(call.path)
        };
        let objects = self.objects_sample();
        let event = self
            .slice(call.fiber)
            .named(name)
            .with_categories(&[CATEGORY_FIELD_EXECUTION])
            .with_counters(&[objects]);
        self.begin_span(call.fiber, SpanKind::Field, event);
        next.begin_execute_field(call);
    }

    fn end_execute_field(&mut self, call: &FieldCall<'_>, result: &DebugValue, next: Next<'_>) {
        let fields = self.counters.add_field();
        let objects = self.objects_sample();
        let counters = [objects, (self.tracks.fields, fields)];
        self.end_span_with(call.fiber, SpanKind::Field, &counters, |encoder| {
            vec![
                encoder.annotation(AnnotationKey::Iid(ANNOTATION_OBJECT), call.object, true),
                encoder.annotation(AnnotationKey::Iid(ANNOTATION_ARGUMENTS), call.arguments, false),
                encoder.annotation(AnnotationKey::Iid(ANNOTATION_RESULT), result, true),
            ]
        });
        next.end_execute_field(call, result);
    }

    fn begin_authorized(&mut self, call: &AuthorizedCall<'_>, next: Next<'_>) {
        let name = self
            .encoder
            .interner()
            .authorize_name(call.type_ref.handle, &call.type_ref.name);
        let objects = self.objects_sample();
        let event = self
            .slice(call.fiber)
            .named_iid(name)
            .with_categories(&[CATEGORY_AUTHORIZED])
            .with_counters(&[objects]);
        self.begin_span(call.fiber, SpanKind::Authorized, event);
        next.begin_authorized(call);
    }

    fn end_authorized(&mut self, call: &AuthorizedCall<'_>, is_authorized: bool, next: Next<'_>) {
        let objects = self.objects_sample();
        self.end_span_with(call.fiber, SpanKind::Authorized, &[objects], |encoder| {
            vec![
                encoder.annotation(AnnotationKey::Iid(ANNOTATION_OBJECT), call.object, true),
                encoder.annotation(
                    AnnotationKey::Name("authorized?"),
                    &DebugValue::Bool(is_authorized),
                    false,
                ),
            ]
        });
        next.end_authorized(call, is_authorized);
    }

    fn begin_resolve_type(&mut self, call: &ResolveTypeCall<'_>, next: Next<'_>) {
        let name = self
            .encoder
            .interner()
            .resolve_type_name(call.abstract_type.handle, &call.abstract_type.name);
        let objects = self.objects_sample();
        let event = self
            .slice(call.fiber)
            .named_iid(name)
            .with_categories(&[CATEGORY_RESOLVE_TYPE])
            .with_counters(&[objects]);
        self.begin_span(call.fiber, SpanKind::ResolveType, event);
        next.begin_resolve_type(call);
    }

    fn end_resolve_type(&mut self, call: &ResolveTypeCall<'_>, resolved: &TypeRef, next: Next<'_>) {
        let objects = self.objects_sample();
        self.end_span_with(call.fiber, SpanKind::ResolveType, &[objects], |encoder| {
            vec![
                encoder.annotation(AnnotationKey::Iid(ANNOTATION_OBJECT), call.value, true),
                encoder.annotation(
                    AnnotationKey::Name("resolved_type"),
                    &DebugValue::Type(resolved.clone()),
                    true,
                ),
            ]
        });
        next.end_resolve_type(call, resolved);
    }

    fn begin_dataloader(&mut self, fiber: FiberId, next: Next<'_>) {
        let count = self.counters.add_fibers(1);
        self.encoder.emit(counter_sample(self.tracks.fibers, count));
        let parent = self.tracks.main_fiber;
        let track = self
            .encoder
            .create_fiber_track(fiber, parent, format!("Dataloader Fiber #{}", fiber));
        self.dataloader_track = Some(track);
        next.begin_dataloader(fiber);
    }

    fn end_dataloader(&mut self, fiber: FiberId, next: Next<'_>) {
        let count = self.counters.add_fibers(-1);
        self.encoder.emit(counter_sample(self.tracks.fibers, count));
        next.end_dataloader(fiber);
    }

    fn dataloader_spawn_execution_fiber(&mut self, fiber: FiberId, jobs: usize, next: Next<'_>) {
        self.spawn_fiber(fiber, "Exec Fiber", "Create Execution Fiber", ("jobs", jobs));
        next.dataloader_spawn_execution_fiber(fiber, jobs);
    }

    fn dataloader_spawn_source_fiber(&mut self, fiber: FiberId, pending_sources: usize, next: Next<'_>) {
        self.spawn_fiber(
            fiber,
            "Source Fiber",
            "Create Source Fiber",
            ("pending_sources", pending_sources),
        );
        next.dataloader_spawn_source_fiber(fiber, pending_sources);
    }

    fn begin_dataloader_source(&mut self, fiber: FiberId, source: &SourceRef, next: Next<'_>) {
        let name = self
            .encoder
            .interner()
            .source_name(source.class, &source.class_name);
        let flow_ids = self.flows.take(source.id);
        let mut annotations = vec![self.encoder.annotation(
            AnnotationKey::Iid(ANNOTATION_FETCH_KEYS),
            &DebugValue::List(source.pending_keys.clone()),
            true,
        )];
        for (key, value) in &source.params {
            annotations.push(self.encoder.annotation(AnnotationKey::Name(key), value, true));
        }
        let objects = self.objects_sample();
        let event = self
            .slice(fiber)
            .named_iid(name)
            .with_categories(&[CATEGORY_DATALOADER])
            .with_flow_ids(flow_ids)
            .with_annotations(annotations)
            .with_counters(&[objects]);
        self.begin_span(fiber, SpanKind::Source, event);
        next.begin_dataloader_source(fiber, source);
    }

    fn end_dataloader_source(&mut self, fiber: FiberId, source: &SourceRef, next: Next<'_>) {
        let objects = self.objects_sample();
        self.end_span(fiber, SpanKind::Source, &[objects]);
        next.end_dataloader_source(fiber, source);
    }

    fn dataloader_fiber_yield(&mut self, fiber: FiberId, source: &SourceRef, next: Next<'_>) {
        self.on_fiber_yield(fiber, source);
        next.dataloader_fiber_yield(fiber, source);
    }

    fn dataloader_fiber_resume(&mut self, fiber: FiberId, source: &SourceRef, next: Next<'_>) {
        self.on_fiber_resume(fiber);
        next.dataloader_fiber_resume(fiber, source);
    }

    fn dataloader_fiber_exit(&mut self, fiber: FiberId, next: Next<'_>) {
        let count = self.counters.add_fibers(-1);
        let event = self
            .dataloader_instant(fiber, "Fiber Exit")
            .with_counters(&[(self.tracks.fibers, count)]);
        self.encoder.emit(event);
        next.dataloader_fiber_exit(fiber);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{FieldRef, PathSegment, TypeHandle};
    use crate::hooks::{Trace, TraceChain};
    use crate::packet::{AnnotationValue, EventName, PacketData};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        saved: Mutex<Vec<(String, u64, i64, usize)>>,
    }

    impl TraceSink for RecordingSink {
        fn save_trace(&self, operation_name: &str, duration_ms: u64, begin_ms: i64, payload: Vec<u8>) -> Option<u64> {
            let mut saved = self.saved.lock().unwrap();
            saved.push((operation_name.to_string(), duration_ms, begin_ms, payload.len()));
            Some(saved.len() as u64)
        }
    }

    fn capture() -> TraceChain {
        TraceChain::new().with_module(PerfettoTrace::new(PerfettoOptions::default()).unwrap())
    }

    fn trace(chain: &TraceChain) -> &PerfettoTrace {
        chain.find::<PerfettoTrace>().unwrap()
    }

    fn events(trace: &PerfettoTrace) -> Vec<&TrackEvent> {
        trace.packets().iter().filter_map(TracePacket::track_event).collect()
    }

    fn named<'a>(trace: &'a PerfettoTrace, name: &str) -> Vec<&'a TrackEvent> {
        events(trace)
            .into_iter()
            .filter(|e| e.name == Some(EventName::Name(name.to_string())))
            .collect()
    }

    #[test]
    fn test_preamble_layout() {
        let chain = TraceChain::new().with_module(
            PerfettoTrace::new(PerfettoOptions::default().with_sequence_id(77)).unwrap(),
        );
        let packets = trace(&chain).packets();

        assert!(packets.iter().all(|p| p.trusted_packet_sequence_id == 77));
        assert!(packets[0].first_packet_on_sequence);
        assert!(packets[0].previous_packet_dropped);
        assert_eq!(packets[0].sequence_flags, Some(3));
        assert_eq!(packets[0].track_descriptor().unwrap().name, "Main Thread");

        let preamble = packets[1].interned_data.as_ref().unwrap();
        assert_eq!(preamble.event_categories.len(), 5);
        assert_eq!(packets[2].track_descriptor().unwrap().name, "Main Fiber");

        let counter_tracks: Vec<_> = packets
            .iter()
            .filter_map(TracePacket::track_descriptor)
            .filter(|d| d.kind == TrackKind::Counter)
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(counter_tracks, vec!["Allocated Objects", "Active Fibers", "Resolved Fields"]);
        assert_eq!(
            events(trace(&chain))
                .iter()
                .filter(|e| e.kind == EventKind::Counter)
                .count(),
            3
        );
    }

    #[test]
    fn test_sequence_ids_differ_between_captures() {
        let a = PerfettoTrace::new(PerfettoOptions::default()).unwrap();
        let b = PerfettoTrace::new(PerfettoOptions::default()).unwrap();
        assert_ne!(a.sequence_id(), b.sequence_id());
        assert!(PerfettoTrace::new(PerfettoOptions::default().with_sequence_id(0)).is_err());
    }

    #[test]
    fn test_save_profile_requires_sink() {
        let err = PerfettoTrace::new(PerfettoOptions::default().with_save_profile(true)).unwrap_err();
        assert!(err.is_setup_error());
    }

    #[test]
    fn test_validate_is_back_patched() {
        let mut chain = capture();
        let query = Query::new("{ a }");
        chain.begin_validate(&query, true);
        chain.end_validate(&query, true, &["Field 'b' doesn't exist".to_string()]);

        let t = trace(&chain);
        let validate = named(t, "Validate")[0];
        assert_eq!(validate.debug_annotations.len(), 2);
        assert_eq!(validate.debug_annotations[1].value, AnnotationValue::BoolValue(false));
    }

    #[test]
    fn test_field_annotations_and_counters() {
        let mut chain = capture();
        let field = FieldRef::new(1, TypeHandle(0), "user");
        let query = Query::new("{ user { id } }");
        let path = vec![PathSegment::from("user")];
        let object = DebugValue::Null;
        let arguments = DebugValue::Map(Default::default());
        let call = FieldCall {
            fiber: FiberId::MAIN,
            field: &field,
            object: &object,
            arguments: &arguments,
            path: &path,
            query: &query,
        };
        chain.begin_execute_field(&call);
        chain.end_execute_field(&call, &DebugValue::object("User", "#<User id: 1>"));

        let t = trace(&chain);
        let begin = named(t, "user")[0];
        assert_eq!(begin.category_iids, vec![CATEGORY_FIELD_EXECUTION]);
        let keys: Vec<_> = begin.debug_annotations.iter().map(|a| a.name_iid()).collect();
        assert_eq!(
            keys,
            vec![Some(ANNOTATION_OBJECT), Some(ANNOTATION_ARGUMENTS), Some(ANNOTATION_RESULT)]
        );

        let end = events(t)
            .into_iter()
            .rev()
            .find(|e| e.kind == EventKind::SliceEnd)
            .unwrap();
        assert_eq!(end.extra_counter_track_uuids.len(), 2);
        assert_eq!(end.extra_counter_values[1], 1);

        // the result was interned at end time; its strings live on the begin packet
        let begin_packet = t
            .packets()
            .iter()
            .find(|p| p.track_event().map_or(false, |e| e.name == Some(EventName::Name("user".into()))))
            .unwrap();
        let strings: Vec<_> = begin_packet
            .interned_data
            .as_ref()
            .unwrap()
            .debug_annotation_string_values
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(strings, vec!["User", "#<User id: 1>"]);
    }

    #[test]
    fn test_unbalanced_end_is_marked() {
        let mut chain = capture();
        chain.end_parse("{ a }");
        let t = trace(&chain);
        assert_eq!(named(t, "Unbalanced End").len(), 1);
        assert!(t.is_balanced());
    }

    #[test]
    fn test_finish_marks_open_spans_once() {
        let mut chain = capture();
        chain.begin_parse("{ a }");
        let t = chain.find_mut::<PerfettoTrace>().unwrap();
        assert!(!t.finish());
        assert!(!t.finish());
        let markers = named(t, "Unbalanced Spans");
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].debug_annotations[0].value, AnnotationValue::IntValue(1));
    }

    #[test]
    fn test_authorized_and_resolve_type_names_are_interned() {
        let mut chain = capture();
        let post = TypeRef::new(4, "Post");
        let node = TypeRef::new(5, "Node");
        let object = DebugValue::Null;
        let auth = AuthorizedCall {
            fiber: FiberId::MAIN,
            type_ref: &post,
            object: &object,
        };
        let resolve = ResolveTypeCall {
            fiber: FiberId::MAIN,
            abstract_type: &node,
            value: &object,
        };
        chain.begin_authorized(&auth);
        chain.end_authorized(&auth, true);
        chain.begin_authorized(&auth);
        chain.end_authorized(&auth, false);
        chain.begin_resolve_type(&resolve);
        chain.end_resolve_type(&resolve, &post);

        let t = trace(&chain);
        let interned: Vec<_> = t
            .packets()
            .iter()
            .filter_map(|p| p.interned_data.as_ref())
            .flat_map(|d| d.event_names.iter().map(|e| e.name.as_str()))
            .collect();
        assert_eq!(interned, vec!["Authorize: Post", "Resolve Type: Node"]);

        let begins: Vec<_> = events(t)
            .into_iter()
            .filter(|e| e.kind == EventKind::SliceBegin)
            .collect();
        assert_eq!(begins[0].name, begins[1].name);
        assert_eq!(begins[2].category_iids, vec![CATEGORY_RESOLVE_TYPE]);
    }

    #[test]
    fn test_notification_recorded_on_fiber_track() {
        let mut chain = capture();
        let t = chain.find_mut::<PerfettoTrace>().unwrap();
        let start = t.now_ns();
        t.record_notification(
            FiberId::MAIN,
            "sql.active_record",
            start,
            start + 1_000,
            &[("sql".to_string(), DebugValue::from("SELECT 1"))],
        );

        let main = t.fiber_track(FiberId::MAIN).unwrap();
        let begin = named(t, "sql.active_record")[0];
        assert_eq!(begin.track_uuid, main);
        assert_eq!(begin.category_iids, vec![CATEGORY_EXTERNAL_NOTIFICATIONS]);
        assert!(matches!(begin.debug_annotations[0].value, AnnotationValue::StringValueIid(_)));
        let last = t.packets().last().unwrap();
        assert_eq!(last.timestamp, Some(start + 1_000));
    }

    #[test]
    fn test_multiplex_end_saves_profile() {
        let sink = Arc::new(RecordingSink::default());
        let options = PerfettoOptions::default()
            .with_save_profile(true)
            .with_sink(sink.clone());
        let mut chain = TraceChain::new().with_module(PerfettoTrace::new(options).unwrap());
        let multiplex = Multiplex::new(vec![
            Query::new("{ a }").with_operation_name("A"),
            Query::new("{ b }"),
        ]);
        chain.begin_execute_multiplex(&multiplex);
        chain.end_execute_multiplex(&multiplex);

        let saved = sink.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "A,anonymous");
        assert!(saved[0].3 > 0);
        assert_eq!(trace(&chain).saved_trace_id(), Some(1));
    }

    #[test]
    fn test_write_debug_json() {
        let chain = capture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        trace(&chain).write(&path, true).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            json["packet"][0]["trackDescriptor"]["name"],
            serde_json::Value::String("Main Thread".to_string())
        );
        assert!(matches!(
            trace(&chain).packets()[0].data,
            Some(PacketData::TrackDescriptor(_))
        ));
    }
}
