//! Track model: named lanes with parent/child hierarchy
//!
//! Track ids are unique within a capture and carry the sequence id in their
//! high bits, so traces from several captures can be concatenated into one
//! file without colliding.

use std::collections::HashMap;

use crate::args::FiberId;
use crate::packet::{ChildOrdering, TrackDescriptor, TrackKind};

/// Allocates track ids and queues their one-time descriptors
#[derive(Debug)]
pub struct TrackModel {
    base: u64,
    next: u64,
    fibers: HashMap<FiberId, u64>,
    pending: Vec<TrackDescriptor>,
}

impl TrackModel {
    pub fn new(sequence_id: u32) -> Self {
        Self {
            base: u64::from(sequence_id) << 32,
            next: 1,
            fibers: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Allocate a track and queue its descriptor
    pub fn create_track(&mut self, parent: Option<u64>, label: impl Into<String>, kind: TrackKind) -> u64 {
        let uuid = self.base | self.next;
        self.next += 1;
        let child_ordering = match kind {
            TrackKind::Lane => Some(ChildOrdering::Chronological),
            TrackKind::Counter => None,
        };
        self.pending.push(TrackDescriptor {
            uuid,
            parent_uuid: parent,
            name: label.into(),
            kind,
            child_ordering,
        });
        uuid
    }

    /// Create the lane for `fiber`, or return the existing one
    pub fn create_fiber_track(&mut self, fiber: FiberId, parent: u64, label: impl Into<String>) -> u64 {
        if let Some(&uuid) = self.fibers.get(&fiber) {
            return uuid;
        }
        let uuid = self.create_track(Some(parent), label, TrackKind::Lane);
        self.fibers.insert(fiber, uuid);
        uuid
    }

    pub fn fiber_track(&self, fiber: FiberId) -> Option<u64> {
        self.fibers.get(&fiber).copied()
    }

    /// Descriptors created since the last drain
    pub fn take_pending(&mut self) -> Vec<TrackDescriptor> {
        std::mem::take(&mut self.pending)
    }

    /// Number of tracks created so far
    pub fn len(&self) -> usize {
        (self.next - 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.next == 1
    }
}
