//! Packet encoder for one capture sequence
//!
//! Owns the packet buffer together with the interning tables and track model
//! of a single sequence. Every packet written here drains whatever was newly
//! interned into its `interned_data` block, and every track created is
//! declared by a descriptor packet before anything can reference it.

use std::borrow::Cow;
use std::time::Instant;

use crate::intern::Interner;
use crate::packet::{
    AnnotationName, AnnotationValue, DebugAnnotation, InternedData, InternedEntry, PacketData,
    TrackEvent, TrackKind, TracePacket, SEQ_NEEDS_INCREMENTAL_STATE,
};
use crate::track::TrackModel;
use crate::args::FiberId;
use crate::value::DebugValue;

pub const CATEGORY_DATALOADER: u64 = 5;
pub const CATEGORY_FIELD_EXECUTION: u64 = 6;
pub const CATEGORY_EXTERNAL_NOTIFICATIONS: u64 = 7;
pub const CATEGORY_AUTHORIZED: u64 = 8;
pub const CATEGORY_RESOLVE_TYPE: u64 = 9;

pub const ANNOTATION_OBJECT: u64 = 10;
pub const ANNOTATION_RESULT: u64 = 11;
pub const ANNOTATION_ARGUMENTS: u64 = 12;
pub const ANNOTATION_FETCH_KEYS: u64 = 13;

/// Interned string value standing for null
pub const NIL_STRING_IID: u64 = 14;

/// Fixed interned entries declared once at the start of every sequence
pub fn preamble_interned_data() -> InternedData {
    InternedData {
        event_categories: vec![
            InternedEntry::new(CATEGORY_DATALOADER, "Dataloader"),
            InternedEntry::new(CATEGORY_FIELD_EXECUTION, "Field Execution"),
            InternedEntry::new(CATEGORY_EXTERNAL_NOTIFICATIONS, "External Notifications"),
            InternedEntry::new(CATEGORY_AUTHORIZED, "Authorized"),
            InternedEntry::new(CATEGORY_RESOLVE_TYPE, "Resolve Type"),
        ],
        event_names: Vec::new(),
        debug_annotation_names: vec![
            InternedEntry::new(ANNOTATION_OBJECT, "object"),
            InternedEntry::new(ANNOTATION_RESULT, "result"),
            InternedEntry::new(ANNOTATION_ARGUMENTS, "arguments"),
            InternedEntry::new(ANNOTATION_FETCH_KEYS, "fetch keys"),
        ],
        debug_annotation_string_values: vec![InternedEntry::new(NIL_STRING_IID, "(nil)")],
    }
}

/// How an annotation's key is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationKey<'a> {
    /// A fixed, already-declared key id
    Iid(u64),
    /// A key interned on first use
    Name(&'a str),
    /// Array items carry no key
    Unnamed,
}

/// Wall-clock anchored monotonic clock in nanoseconds
#[derive(Debug, Clone, Copy)]
struct Clock {
    origin: Instant,
    origin_ns: u64,
}

impl Clock {
    fn new() -> Self {
        let origin_ns = chrono::Utc::now()
            .timestamp_nanos_opt()
            .and_then(|ns| u64::try_from(ns).ok())
            .unwrap_or_default();
        Self {
            origin: Instant::now(),
            origin_ns,
        }
    }

    fn now_ns(&self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.origin_ns.saturating_add(elapsed)
    }
}

/// Writes packets for one trusted sequence
#[derive(Debug)]
pub struct PacketEncoder {
    sequence_id: u32,
    packets: Vec<TracePacket>,
    interner: Interner,
    tracks: TrackModel,
    clock: Clock,
}

impl PacketEncoder {
    pub fn new(sequence_id: u32) -> Self {
        Self {
            sequence_id,
            packets: Vec::new(),
            interner: Interner::new(),
            tracks: TrackModel::new(sequence_id),
            clock: Clock::new(),
        }
    }

    pub fn sequence_id(&self) -> u32 {
        self.sequence_id
    }

    pub fn interner(&mut self) -> &mut Interner {
        &mut self.interner
    }

    /// Current timestamp on this sequence's clock
    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    /// Create a track and write its descriptor
    pub fn create_track(&mut self, parent: Option<u64>, label: impl Into<String>, kind: TrackKind) -> u64 {
        let uuid = self.tracks.create_track(parent, label, kind);
        self.flush_descriptors();
        uuid
    }

    /// Lane for `fiber`, created under `parent` on first use
    pub fn create_fiber_track(&mut self, fiber: FiberId, parent: u64, label: impl Into<String>) -> u64 {
        let uuid = self.tracks.create_fiber_track(fiber, parent, label);
        self.flush_descriptors();
        uuid
    }

    pub fn fiber_track(&self, fiber: FiberId) -> Option<u64> {
        self.tracks.fiber_track(fiber)
    }

    /// Append a prebuilt packet as-is
    pub fn push_packet(&mut self, packet: TracePacket) -> usize {
        self.packets.push(packet);
        self.packets.len() - 1
    }

    /// Write `event` stamped with the current time; returns its packet index
    pub fn emit(&mut self, event: TrackEvent) -> usize {
        let timestamp = self.now_ns();
        self.emit_at(event, timestamp)
    }

    /// Write `event` at an explicit timestamp
    pub fn emit_at(&mut self, event: TrackEvent, timestamp: u64) -> usize {
        let mut packet = TracePacket::new(self.sequence_id);
        packet.timestamp = Some(timestamp);
        packet.sequence_flags = Some(SEQ_NEEDS_INCREMENTAL_STATE);
        packet.data = Some(PacketData::TrackEvent(event));
        packet.interned_data = self.interner.take_interned_data();
        self.push_packet(packet)
    }

    pub fn packet_mut(&mut self, index: usize) -> Option<&mut TracePacket> {
        self.packets.get_mut(index)
    }

    pub fn event(&self, index: usize) -> Option<&TrackEvent> {
        self.packets.get(index).and_then(TracePacket::track_event)
    }

    pub fn event_mut(&mut self, index: usize) -> Option<&mut TrackEvent> {
        self.packets.get_mut(index).and_then(TracePacket::track_event_mut)
    }

    /// Append annotations to a written event
    ///
    /// Entries interned while building them are defined on that same packet,
    /// since it is the one referencing them.
    pub fn amend(&mut self, index: usize, annotations: Vec<DebugAnnotation>) {
        let pending = self.interner.take_interned_data();
        if index >= self.packets.len() {
            if let Some(data) = pending {
                self.push_interned(data);
            }
            return;
        }
        let packet = &mut self.packets[index];
        if let Some(event) = packet.track_event_mut() {
            event.debug_annotations.extend(annotations);
        }
        if let Some(data) = pending {
            match packet.interned_data.as_mut() {
                Some(existing) => existing.merge(data),
                None => packet.interned_data = Some(data),
            }
        }
    }

    /// Write any still-queued interned entries as a packet of their own
    pub fn flush_interned(&mut self) -> Option<usize> {
        let data = self.interner.take_interned_data()?;
        Some(self.push_interned(data))
    }

    fn push_interned(&mut self, data: InternedData) -> usize {
        let mut packet = TracePacket::new(self.sequence_id);
        packet.timestamp = Some(self.now_ns());
        packet.sequence_flags = Some(SEQ_NEEDS_INCREMENTAL_STATE);
        packet.interned_data = Some(data);
        self.push_packet(packet)
    }

    pub fn packets(&self) -> &[TracePacket] {
        &self.packets
    }

    /// Packets as they would be written now, with queued interned entries
    /// appended in a trailing packet
    pub fn snapshot(&self) -> Cow<'_, [TracePacket]> {
        match self.interner.peek_interned_data() {
            None => Cow::Borrowed(&self.packets),
            Some(data) => {
                let mut packets = self.packets.clone();
                let mut trailing = TracePacket::new(self.sequence_id);
                trailing.timestamp = Some(self.now_ns());
                trailing.sequence_flags = Some(SEQ_NEEDS_INCREMENTAL_STATE);
                trailing.interned_data = Some(data);
                packets.push(trailing);
                Cow::Owned(packets)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Convert a value into an annotation, interning keys and optionally values
    pub fn annotation(&mut self, key: AnnotationKey<'_>, value: &DebugValue, intern_value: bool) -> DebugAnnotation {
        let name = match key {
            AnnotationKey::Iid(iid) => Some(AnnotationName::NameIid(iid)),
            AnnotationKey::Name(name) => Some(AnnotationName::NameIid(self.interner.annotation_name(name))),
            AnnotationKey::Unnamed => None,
        };
        let value = self.annotation_value(value, intern_value);
        DebugAnnotation::new(name, value)
    }

    fn annotation_value(&mut self, value: &DebugValue, intern_value: bool) -> AnnotationValue {
        match value {
            DebugValue::Null => AnnotationValue::StringValueIid(NIL_STRING_IID),
            DebugValue::Bool(v) => AnnotationValue::BoolValue(*v),
            DebugValue::Int(v) => AnnotationValue::IntValue(*v),
            DebugValue::Float(v) => AnnotationValue::DoubleValue(*v),
            DebugValue::String(s) => self.string_value(s, intern_value),
            DebugValue::Symbol(s) => AnnotationValue::StringValue(format!(":{}", s)),
            DebugValue::Object { class_name, repr } => self.object_value(class_name, repr, intern_value),
            DebugValue::Type(type_ref) => {
                if intern_value {
                    let iid = self.interner.type_name_value(type_ref.handle, &type_ref.name);
                    AnnotationValue::StringValueIid(iid)
                } else {
                    AnnotationValue::StringValue(type_ref.name.to_string())
                }
            }
            DebugValue::List(items) => AnnotationValue::ArrayValues(
                items
                    .iter()
                    .map(|item| self.annotation(AnnotationKey::Unnamed, item, intern_value))
                    .collect(),
            ),
            DebugValue::Map(entries) => AnnotationValue::DictEntries(
                entries
                    .iter()
                    .map(|(key, item)| self.annotation(AnnotationKey::Name(key), item, intern_value))
                    .collect(),
            ),
        }
    }

    /// The class name alone, or a `class`/`inspect` dict when a
    /// representation was captured
    fn object_value(&mut self, class_name: &str, repr: &str, intern_value: bool) -> AnnotationValue {
        let class = self.string_value(class_name, intern_value);
        if repr.is_empty() {
            return class;
        }
        let class_key = self.interner.annotation_name("class");
        let inspect_key = self.interner.annotation_name("inspect");
        let inspect = self.string_value(repr, intern_value);
        AnnotationValue::DictEntries(vec![
            DebugAnnotation::new(Some(AnnotationName::NameIid(class_key)), class),
            DebugAnnotation::new(Some(AnnotationName::NameIid(inspect_key)), inspect),
        ])
    }

    fn string_value(&mut self, value: &str, intern_value: bool) -> AnnotationValue {
        if intern_value {
            AnnotationValue::StringValueIid(self.interner.string_value(value))
        } else {
            AnnotationValue::StringValue(value.to_string())
        }
    }

    fn flush_descriptors(&mut self) {
        for descriptor in self.tracks.take_pending() {
            let mut packet = TracePacket::new(self.sequence_id);
            packet.sequence_flags = Some(SEQ_NEEDS_INCREMENTAL_STATE);
            packet.data = Some(PacketData::TrackDescriptor(descriptor));
            self.packets.push(packet);
        }
    }

    pub fn into_packets(self) -> Vec<TracePacket> {
        self.packets
    }
}
