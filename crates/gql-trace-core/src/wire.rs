//! Perfetto protobuf codec
//!
//! Built only with the `protobuf` feature. Without it every entry point returns
//! [`CaptureError::ProtobufUnavailable`], and the capture module refuses to be
//! constructed, so a misconfigured build fails when tracing is set up rather
//! than silently producing nothing.

use crate::error::{CaptureError, CaptureResult};
use crate::packet::TracePacket;

/// Whether this build can produce binary traces
pub const AVAILABLE: bool = cfg!(feature = "protobuf");

/// Fail unless binary encoding is compiled in
pub fn ensure_available() -> CaptureResult<()> {
    if AVAILABLE {
        Ok(())
    } else {
        Err(CaptureError::ProtobufUnavailable)
    }
}

#[cfg(not(feature = "protobuf"))]
pub fn encode_trace(_packets: &[TracePacket]) -> CaptureResult<Vec<u8>> {
    Err(CaptureError::ProtobufUnavailable)
}

#[cfg(not(feature = "protobuf"))]
pub fn decode_trace(_bytes: &[u8]) -> CaptureResult<Vec<TracePacket>> {
    Err(CaptureError::ProtobufUnavailable)
}

/// Encode packets as a serialized `perfetto.protos.Trace`
#[cfg(feature = "protobuf")]
pub fn encode_trace(packets: &[TracePacket]) -> CaptureResult<Vec<u8>> {
    use prost::Message as _;

    let trace = pb::Trace {
        packet: packets.iter().map(convert::packet_to_pb).collect(),
    };
    let mut buf = Vec::with_capacity(trace.encoded_len());
    trace
        .encode(&mut buf)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decode a serialized `perfetto.protos.Trace` back into packets
///
/// An annotation with neither a scalar nor entries decodes as an empty array.
#[cfg(feature = "protobuf")]
pub fn decode_trace(bytes: &[u8]) -> CaptureResult<Vec<TracePacket>> {
    use prost::Message as _;

    let trace = pb::Trace::decode(bytes).map_err(|e| CaptureError::decode(e.to_string()))?;
    trace.packet.into_iter().map(convert::packet_from_pb).collect()
}

/// Field numbers follow `perfetto/protos/perfetto/trace/*.proto`.
#[cfg(feature = "protobuf")]
mod pb {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Trace {
        #[prost(message, repeated, tag = "1")]
        pub packet: Vec<TracePacket>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TracePacket {
        #[prost(uint64, optional, tag = "8")]
        pub timestamp: Option<u64>,
        #[prost(uint32, optional, tag = "10")]
        pub trusted_packet_sequence_id: Option<u32>,
        #[prost(message, optional, tag = "11")]
        pub track_event: Option<TrackEvent>,
        #[prost(message, optional, tag = "12")]
        pub interned_data: Option<InternedData>,
        #[prost(uint32, optional, tag = "13")]
        pub sequence_flags: Option<u32>,
        #[prost(bool, optional, tag = "42")]
        pub previous_packet_dropped: Option<bool>,
        #[prost(message, optional, tag = "60")]
        pub track_descriptor: Option<TrackDescriptor>,
        #[prost(bool, optional, tag = "87")]
        pub first_packet_on_sequence: Option<bool>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TrackEvent {
        #[prost(uint64, repeated, packed = "false", tag = "3")]
        pub category_iids: Vec<u64>,
        #[prost(message, repeated, tag = "4")]
        pub debug_annotations: Vec<DebugAnnotation>,
        #[prost(enumeration = "EventType", optional, tag = "9")]
        pub event_type: Option<i32>,
        #[prost(uint64, optional, tag = "10")]
        pub name_iid: Option<u64>,
        #[prost(uint64, optional, tag = "11")]
        pub track_uuid: Option<u64>,
        #[prost(int64, repeated, packed = "false", tag = "12")]
        pub extra_counter_values: Vec<i64>,
        #[prost(string, optional, tag = "23")]
        pub name: Option<String>,
        #[prost(int64, optional, tag = "30")]
        pub counter_value: Option<i64>,
        #[prost(uint64, repeated, packed = "false", tag = "31")]
        pub extra_counter_track_uuids: Vec<u64>,
        #[prost(fixed64, repeated, packed = "false", tag = "47")]
        pub flow_ids: Vec<u64>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum EventType {
        Unspecified = 0,
        SliceBegin = 1,
        SliceEnd = 2,
        Instant = 3,
        Counter = 4,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct DebugAnnotation {
        #[prost(uint64, optional, tag = "1")]
        pub name_iid: Option<u64>,
        #[prost(bool, optional, tag = "2")]
        pub bool_value: Option<bool>,
        #[prost(int64, optional, tag = "4")]
        pub int_value: Option<i64>,
        #[prost(double, optional, tag = "5")]
        pub double_value: Option<f64>,
        #[prost(string, optional, tag = "6")]
        pub string_value: Option<String>,
        #[prost(string, optional, tag = "10")]
        pub name: Option<String>,
        #[prost(message, repeated, tag = "11")]
        pub dict_entries: Vec<DebugAnnotation>,
        #[prost(message, repeated, tag = "12")]
        pub array_values: Vec<DebugAnnotation>,
        #[prost(uint64, optional, tag = "17")]
        pub string_value_iid: Option<u64>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TrackDescriptor {
        #[prost(uint64, optional, tag = "1")]
        pub uuid: Option<u64>,
        #[prost(string, optional, tag = "2")]
        pub name: Option<String>,
        #[prost(uint64, optional, tag = "5")]
        pub parent_uuid: Option<u64>,
        #[prost(message, optional, tag = "8")]
        pub counter: Option<CounterDescriptor>,
        #[prost(enumeration = "ChildTracksOrdering", optional, tag = "11")]
        pub child_ordering: Option<i32>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct CounterDescriptor {}

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum ChildTracksOrdering {
        Unknown = 0,
        Lexicographic = 1,
        Chronological = 2,
        Explicit = 3,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct InternedData {
        #[prost(message, repeated, tag = "1")]
        pub event_categories: Vec<InternedName>,
        #[prost(message, repeated, tag = "2")]
        pub event_names: Vec<InternedName>,
        #[prost(message, repeated, tag = "3")]
        pub debug_annotation_names: Vec<InternedName>,
        #[prost(message, repeated, tag = "29")]
        pub debug_annotation_string_values: Vec<InternedString>,
    }

    /// Shape shared by `EventCategory`, `EventName` and `DebugAnnotationName`
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct InternedName {
        #[prost(uint64, optional, tag = "1")]
        pub iid: Option<u64>,
        #[prost(string, optional, tag = "2")]
        pub name: Option<String>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct InternedString {
        #[prost(uint64, optional, tag = "1")]
        pub iid: Option<u64>,
        #[prost(bytes = "vec", optional, tag = "2")]
        pub str: Option<Vec<u8>>,
    }
}

#[cfg(feature = "protobuf")]
mod convert {
    use super::pb;
    use crate::error::{CaptureError, CaptureResult};
    use crate::packet::{
        AnnotationName, AnnotationValue, ChildOrdering, DebugAnnotation, EventKind, EventName,
        InternedData, InternedEntry, PacketData, TrackDescriptor, TrackEvent, TrackKind,
        TracePacket,
    };

    pub fn packet_to_pb(packet: &TracePacket) -> pb::TracePacket {
        let (track_event, track_descriptor) = match &packet.data {
            Some(PacketData::TrackEvent(event)) => (Some(event_to_pb(event)), None),
            Some(PacketData::TrackDescriptor(descriptor)) => (None, Some(descriptor_to_pb(descriptor))),
            None => (None, None),
        };
        pb::TracePacket {
            timestamp: packet.timestamp,
            trusted_packet_sequence_id: Some(packet.trusted_packet_sequence_id),
            track_event,
            interned_data: packet.interned_data.as_ref().map(interned_to_pb),
            sequence_flags: packet.sequence_flags,
            previous_packet_dropped: packet.previous_packet_dropped.then_some(true),
            track_descriptor,
            first_packet_on_sequence: packet.first_packet_on_sequence.then_some(true),
        }
    }

    pub fn packet_from_pb(packet: pb::TracePacket) -> CaptureResult<TracePacket> {
        let data = match (packet.track_event, packet.track_descriptor) {
            (Some(event), _) => Some(PacketData::TrackEvent(event_from_pb(event)?)),
            (None, Some(descriptor)) => Some(PacketData::TrackDescriptor(descriptor_from_pb(descriptor))),
            (None, None) => None,
        };
        Ok(TracePacket {
            timestamp: packet.timestamp,
            trusted_packet_sequence_id: packet.trusted_packet_sequence_id.unwrap_or_default(),
            sequence_flags: packet.sequence_flags,
            first_packet_on_sequence: packet.first_packet_on_sequence.unwrap_or(false),
            previous_packet_dropped: packet.previous_packet_dropped.unwrap_or(false),
            data,
            interned_data: packet.interned_data.map(interned_from_pb),
        })
    }

    fn event_to_pb(event: &TrackEvent) -> pb::TrackEvent {
        let event_type = match event.kind {
            EventKind::SliceBegin => pb::EventType::SliceBegin,
            EventKind::SliceEnd => pb::EventType::SliceEnd,
            EventKind::Instant => pb::EventType::Instant,
            EventKind::Counter => pb::EventType::Counter,
        };
        let (name, name_iid) = match &event.name {
            Some(EventName::Name(name)) => (Some(name.clone()), None),
            Some(EventName::NameIid(iid)) => (None, Some(*iid)),
            None => (None, None),
        };
        pb::TrackEvent {
            category_iids: event.category_iids.clone(),
            debug_annotations: event.debug_annotations.iter().map(annotation_to_pb).collect(),
            event_type: Some(event_type as i32),
            name_iid,
            track_uuid: Some(event.track_uuid),
            extra_counter_values: event.extra_counter_values.clone(),
            name,
            counter_value: event.counter_value,
            extra_counter_track_uuids: event.extra_counter_track_uuids.clone(),
            flow_ids: event.flow_ids.clone(),
        }
    }

    fn event_from_pb(event: pb::TrackEvent) -> CaptureResult<TrackEvent> {
        let raw_type = event.event_type.unwrap_or_default();
        let kind = match pb::EventType::try_from(raw_type) {
            Ok(pb::EventType::SliceBegin) => EventKind::SliceBegin,
            Ok(pb::EventType::SliceEnd) => EventKind::SliceEnd,
            Ok(pb::EventType::Instant) => EventKind::Instant,
            Ok(pb::EventType::Counter) => EventKind::Counter,
            _ => return Err(CaptureError::decode(format!("unsupported track event type {}", raw_type))),
        };
        let name = match (event.name, event.name_iid) {
            (Some(name), _) => Some(EventName::Name(name)),
            (None, Some(iid)) => Some(EventName::NameIid(iid)),
            (None, None) => None,
        };
        Ok(TrackEvent {
            kind,
            track_uuid: event.track_uuid.unwrap_or_default(),
            name,
            category_iids: event.category_iids,
            debug_annotations: event.debug_annotations.into_iter().map(annotation_from_pb).collect(),
            flow_ids: event.flow_ids,
            counter_value: event.counter_value,
            extra_counter_track_uuids: event.extra_counter_track_uuids,
            extra_counter_values: event.extra_counter_values,
        })
    }

    fn annotation_to_pb(annotation: &DebugAnnotation) -> pb::DebugAnnotation {
        let mut out = pb::DebugAnnotation::default();
        match &annotation.name {
            Some(AnnotationName::Name(name)) => out.name = Some(name.clone()),
            Some(AnnotationName::NameIid(iid)) => out.name_iid = Some(*iid),
            None => {}
        }
        match &annotation.value {
            AnnotationValue::BoolValue(v) => out.bool_value = Some(*v),
            AnnotationValue::IntValue(v) => out.int_value = Some(*v),
            AnnotationValue::DoubleValue(v) => out.double_value = Some(*v),
            AnnotationValue::StringValue(v) => out.string_value = Some(v.clone()),
            AnnotationValue::StringValueIid(v) => out.string_value_iid = Some(*v),
            AnnotationValue::DictEntries(entries) => {
                out.dict_entries = entries.iter().map(annotation_to_pb).collect()
            }
            AnnotationValue::ArrayValues(items) => {
                out.array_values = items.iter().map(annotation_to_pb).collect()
            }
        }
        out
    }

    fn annotation_from_pb(annotation: pb::DebugAnnotation) -> DebugAnnotation {
        let name = match (annotation.name, annotation.name_iid) {
            (Some(name), _) => Some(AnnotationName::Name(name)),
            (None, Some(iid)) => Some(AnnotationName::NameIid(iid)),
            (None, None) => None,
        };
        let value = if let Some(v) = annotation.bool_value {
            AnnotationValue::BoolValue(v)
        } else if let Some(v) = annotation.int_value {
            AnnotationValue::IntValue(v)
        } else if let Some(v) = annotation.double_value {
            AnnotationValue::DoubleValue(v)
        } else if let Some(v) = annotation.string_value {
            AnnotationValue::StringValue(v)
        } else if let Some(v) = annotation.string_value_iid {
            AnnotationValue::StringValueIid(v)
        } else if !annotation.dict_entries.is_empty() {
            AnnotationValue::DictEntries(annotation.dict_entries.into_iter().map(annotation_from_pb).collect())
        } else {
            AnnotationValue::ArrayValues(annotation.array_values.into_iter().map(annotation_from_pb).collect())
        };
        DebugAnnotation { name, value }
    }

    fn descriptor_to_pb(descriptor: &TrackDescriptor) -> pb::TrackDescriptor {
        let child_ordering = descriptor.child_ordering.map(|ordering| {
            let ordering = match ordering {
                ChildOrdering::Lexicographic => pb::ChildTracksOrdering::Lexicographic,
                ChildOrdering::Chronological => pb::ChildTracksOrdering::Chronological,
                ChildOrdering::Explicit => pb::ChildTracksOrdering::Explicit,
            };
            ordering as i32
        });
        pb::TrackDescriptor {
            uuid: Some(descriptor.uuid),
            name: Some(descriptor.name.clone()),
            parent_uuid: descriptor.parent_uuid,
            counter: match descriptor.kind {
                TrackKind::Counter => Some(pb::CounterDescriptor {}),
                TrackKind::Lane => None,
            },
            child_ordering,
        }
    }

    fn descriptor_from_pb(descriptor: pb::TrackDescriptor) -> TrackDescriptor {
        let child_ordering = descriptor
            .child_ordering
            .and_then(|raw| pb::ChildTracksOrdering::try_from(raw).ok())
            .and_then(|ordering| match ordering {
                pb::ChildTracksOrdering::Unknown => None,
                pb::ChildTracksOrdering::Lexicographic => Some(ChildOrdering::Lexicographic),
                pb::ChildTracksOrdering::Chronological => Some(ChildOrdering::Chronological),
                pb::ChildTracksOrdering::Explicit => Some(ChildOrdering::Explicit),
            });
        TrackDescriptor {
            uuid: descriptor.uuid.unwrap_or_default(),
            parent_uuid: descriptor.parent_uuid,
            name: descriptor.name.unwrap_or_default(),
            kind: if descriptor.counter.is_some() {
                TrackKind::Counter
            } else {
                TrackKind::Lane
            },
            child_ordering,
        }
    }

    fn interned_to_pb(data: &InternedData) -> pb::InternedData {
        let names = |entries: &[InternedEntry]| {
            entries
                .iter()
                .map(|e| pb::InternedName {
                    iid: Some(e.iid),
                    name: Some(e.name.clone()),
                })
                .collect()
        };
        pb::InternedData {
            event_categories: names(&data.event_categories),
            event_names: names(&data.event_names),
            debug_annotation_names: names(&data.debug_annotation_names),
            debug_annotation_string_values: data
                .debug_annotation_string_values
                .iter()
                .map(|e| pb::InternedString {
                    iid: Some(e.iid),
                    str: Some(e.name.as_bytes().to_vec()),
                })
                .collect(),
        }
    }

    fn interned_from_pb(data: pb::InternedData) -> InternedData {
        let names = |entries: Vec<pb::InternedName>| {
            entries
                .into_iter()
                .map(|e| InternedEntry {
                    iid: e.iid.unwrap_or_default(),
                    name: e.name.unwrap_or_default(),
                })
                .collect()
        };
        InternedData {
            event_categories: names(data.event_categories),
            event_names: names(data.event_names),
            debug_annotation_names: names(data.debug_annotation_names),
            debug_annotation_string_values: data
                .debug_annotation_string_values
                .into_iter()
                .map(|e| InternedEntry {
                    iid: e.iid.unwrap_or_default(),
                    name: String::from_utf8_lossy(&e.str.unwrap_or_default()).into_owned(),
                })
                .collect(),
        }
    }
}

#[cfg(all(test, feature = "protobuf"))]
mod tests {
    use super::*;
    use crate::packet::{
        AnnotationName, AnnotationValue, DebugAnnotation, EventKind, InternedData, InternedEntry,
        PacketData, TrackDescriptor, TrackEvent, TrackKind, ChildOrdering,
    };

    fn sample_packets() -> Vec<TracePacket> {
        let mut descriptor = TracePacket::new(3);
        descriptor.first_packet_on_sequence = true;
        descriptor.previous_packet_dropped = true;
        descriptor.sequence_flags = Some(3);
        descriptor.data = Some(PacketData::TrackDescriptor(TrackDescriptor {
            uuid: 1,
            parent_uuid: None,
            name: "Main Thread".to_string(),
            kind: TrackKind::Lane,
            child_ordering: Some(ChildOrdering::Chronological),
        }));

        let mut counter = TracePacket::new(3);
        counter.sequence_flags = Some(2);
        counter.data = Some(PacketData::TrackDescriptor(TrackDescriptor {
            uuid: 2,
            parent_uuid: Some(1),
            name: "Resolved Fields".to_string(),
            kind: TrackKind::Counter,
            child_ordering: None,
        }));

        let event = TrackEvent::new(EventKind::SliceBegin, 1)
            .named_iid(100)
            .with_categories(&[6])
            .with_flow_ids(vec![u64::MAX - 1])
            .with_counters(&[(2, 5)])
            .with_annotations(vec![
                DebugAnnotation::new(
                    Some(AnnotationName::NameIid(12)),
                    AnnotationValue::DictEntries(vec![DebugAnnotation::new(
                        Some(AnnotationName::NameIid(101)),
                        AnnotationValue::IntValue(-4),
                    )]),
                ),
                DebugAnnotation::new(
                    Some(AnnotationName::Name("tags".to_string())),
                    AnnotationValue::ArrayValues(vec![
                        DebugAnnotation::new(None, AnnotationValue::StringValue("a".to_string())),
                        DebugAnnotation::new(None, AnnotationValue::DoubleValue(0.5)),
                        DebugAnnotation::new(None, AnnotationValue::BoolValue(false)),
                    ]),
                ),
            ]);
        let mut begin = TracePacket::new(3);
        begin.timestamp = Some(10);
        begin.sequence_flags = Some(2);
        begin.data = Some(PacketData::TrackEvent(event));
        begin.interned_data = Some(InternedData {
            event_names: vec![InternedEntry::new(100, "Query.user")],
            debug_annotation_string_values: vec![InternedEntry::new(100, "ünïcode")],
            ..Default::default()
        });

        let mut end = TracePacket::new(3);
        end.timestamp = Some(20);
        end.data = Some(PacketData::TrackEvent(TrackEvent::new(EventKind::SliceEnd, 1)));

        vec![descriptor, counter, begin, end]
    }

    #[test]
    fn test_round_trip_preserves_packets() {
        let packets = sample_packets();
        let bytes = encode_trace(&packets).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(decode_trace(&bytes).unwrap(), packets);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_trace(&[0xFF, 0xFF, 0xFF]).is_err());
    }

    #[test]
    fn test_available() {
        assert!(ensure_available().is_ok());
    }
}
