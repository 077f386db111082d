//! In-memory trace packet model
//!
//! Mirrors the subset of the Perfetto `TracePacket` schema the capture module
//! produces. Packets are plain data: the wire codec turns them into protobuf
//! bytes and serde renders them as debug JSON.

use serde::Serialize;

/// `sequence_flags` bit: incremental state was reset before this packet
pub const SEQ_INCREMENTAL_STATE_CLEARED: u32 = 1;
/// `sequence_flags` bit: this packet depends on interned state
pub const SEQ_NEEDS_INCREMENTAL_STATE: u32 = 2;

/// What a track event marks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    SliceBegin,
    SliceEnd,
    Instant,
    Counter,
}

/// Literal or interned event name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventName {
    Name(String),
    NameIid(u64),
}

/// Literal or interned annotation key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AnnotationName {
    Name(String),
    NameIid(u64),
}

/// Annotation payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AnnotationValue {
    BoolValue(bool),
    IntValue(i64),
    DoubleValue(f64),
    StringValue(String),
    StringValueIid(u64),
    DictEntries(Vec<DebugAnnotation>),
    ArrayValues(Vec<DebugAnnotation>),
}

/// One key/value attached to an event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugAnnotation {
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub name: Option<AnnotationName>,
    #[serde(flatten)]
    pub value: AnnotationValue,
}

impl DebugAnnotation {
    pub fn new(name: Option<AnnotationName>, value: AnnotationValue) -> Self {
        Self { name, value }
    }

    /// Interned key id, if the key is interned
    pub fn name_iid(&self) -> Option<u64> {
        match self.name {
            Some(AnnotationName::NameIid(iid)) => Some(iid),
            _ => None,
        }
    }
}

/// A slice boundary, instant or counter sample on one track
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub track_uuid: u64,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub name: Option<EventName>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub category_iids: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub debug_annotations: Vec<DebugAnnotation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flow_ids: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter_value: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_counter_track_uuids: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_counter_values: Vec<i64>,
}

impl TrackEvent {
    pub fn new(kind: EventKind, track_uuid: u64) -> Self {
        Self {
            kind,
            track_uuid,
            name: None,
            category_iids: Vec::new(),
            debug_annotations: Vec::new(),
            flow_ids: Vec::new(),
            counter_value: None,
            extra_counter_track_uuids: Vec::new(),
            extra_counter_values: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(EventName::Name(name.into()));
        self
    }

    pub fn named_iid(mut self, iid: u64) -> Self {
        self.name = Some(EventName::NameIid(iid));
        self
    }

    pub fn with_categories(mut self, iids: &[u64]) -> Self {
        self.category_iids.extend_from_slice(iids);
        self
    }

    pub fn with_annotations(mut self, annotations: Vec<DebugAnnotation>) -> Self {
        self.debug_annotations = annotations;
        self
    }

    pub fn with_flow_ids(mut self, flow_ids: Vec<u64>) -> Self {
        self.flow_ids = flow_ids;
        self
    }

    /// Attach `(counter track, value)` samples to this event
    pub fn with_counters(mut self, samples: &[(u64, i64)]) -> Self {
        for &(track, value) in samples {
            self.extra_counter_track_uuids.push(track);
            self.extra_counter_values.push(value);
        }
        self
    }

    /// Drop the auxiliary counter samples
    pub fn clear_counters(&mut self) {
        self.extra_counter_track_uuids.clear();
        self.extra_counter_values.clear();
    }
}

/// Lane flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    /// Ordinary lane holding slices and instants
    Lane,
    /// Lane holding only numeric samples
    Counter,
}

/// How a viewer orders a track's children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChildOrdering {
    Lexicographic,
    Chronological,
    Explicit,
}

/// Declares a track once per sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDescriptor {
    pub uuid: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_uuid: Option<u64>,
    pub name: String,
    pub kind: TrackKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_ordering: Option<ChildOrdering>,
}

/// One entry of an interned-data block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InternedEntry {
    pub iid: u64,
    pub name: String,
}

impl InternedEntry {
    pub fn new(iid: u64, name: impl Into<String>) -> Self {
        Self {
            iid,
            name: name.into(),
        }
    }
}

/// Interned names introduced by a packet, one list per namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternedData {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub event_categories: Vec<InternedEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub event_names: Vec<InternedEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub debug_annotation_names: Vec<InternedEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub debug_annotation_string_values: Vec<InternedEntry>,
}

impl InternedData {
    pub fn is_empty(&self) -> bool {
        self.event_categories.is_empty()
            && self.event_names.is_empty()
            && self.debug_annotation_names.is_empty()
            && self.debug_annotation_string_values.is_empty()
    }

    /// Number of entries across all namespaces
    pub fn len(&self) -> usize {
        self.event_categories.len()
            + self.event_names.len()
            + self.debug_annotation_names.len()
            + self.debug_annotation_string_values.len()
    }

    /// Append `other`'s entries after this block's
    pub fn merge(&mut self, other: InternedData) {
        self.event_categories.extend(other.event_categories);
        self.event_names.extend(other.event_names);
        self.debug_annotation_names.extend(other.debug_annotation_names);
        self.debug_annotation_string_values
            .extend(other.debug_annotation_string_values);
    }
}

/// Packet payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PacketData {
    TrackDescriptor(TrackDescriptor),
    TrackEvent(TrackEvent),
}

/// One self-describing unit of the trace
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TracePacket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    pub trusted_packet_sequence_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_flags: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub first_packet_on_sequence: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub previous_packet_dropped: bool,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub data: Option<PacketData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interned_data: Option<InternedData>,
}

impl TracePacket {
    pub fn new(sequence_id: u32) -> Self {
        Self {
            timestamp: None,
            trusted_packet_sequence_id: sequence_id,
            sequence_flags: None,
            first_packet_on_sequence: false,
            previous_packet_dropped: false,
            data: None,
            interned_data: None,
        }
    }

    pub fn track_event(&self) -> Option<&TrackEvent> {
        match &self.data {
            Some(PacketData::TrackEvent(event)) => Some(event),
            _ => None,
        }
    }

    pub fn track_event_mut(&mut self) -> Option<&mut TrackEvent> {
        match &mut self.data {
            Some(PacketData::TrackEvent(event)) => Some(event),
            _ => None,
        }
    }

    pub fn track_descriptor(&self) -> Option<&TrackDescriptor> {
        match &self.data {
            Some(PacketData::TrackDescriptor(descriptor)) => Some(descriptor),
            _ => None,
        }
    }
}

/// Render packets as the pretty-printed debug JSON form of a trace
pub fn to_debug_json(packets: &[TracePacket]) -> serde_json::Result<String> {
    #[derive(Serialize)]
    struct Trace<'a> {
        packet: &'a [TracePacket],
    }
    serde_json::to_string_pretty(&Trace { packet: packets })
}
