//! Interning tables scoped to one packet sequence
//!
//! Repeated names are replaced with small integer ids. The first time a key is
//! seen it gets the next id and is queued; the queue is drained into the
//! `interned_data` block of the next packet written, so every entry goes out
//! exactly once.

use std::collections::HashMap;
use std::hash::Hash;

use crate::args::{SourceClassHandle, TypeHandle};
use crate::packet::{InternedData, InternedEntry};

/// First id handed out; ids below are reserved for fixed entries
pub const FIRST_DYNAMIC_IID: u64 = 100;

/// One interning namespace
#[derive(Debug, Clone)]
pub struct InternTable<K> {
    ids: HashMap<K, u64>,
    pending: Vec<(u64, K)>,
    next_iid: u64,
}

impl<K: Eq + Hash + Clone> InternTable<K> {
    pub fn new() -> Self {
        Self::starting_at(FIRST_DYNAMIC_IID)
    }

    pub fn starting_at(first_iid: u64) -> Self {
        Self {
            ids: HashMap::new(),
            pending: Vec::new(),
            next_iid: first_iid,
        }
    }

    /// Id for `key`, allocating and queueing it on first use
    pub fn intern(&mut self, key: &K) -> u64 {
        if let Some(&iid) = self.ids.get(key) {
            return iid;
        }
        let iid = self.next_iid;
        self.next_iid += 1;
        self.ids.insert(key.clone(), iid);
        self.pending.push((iid, key.clone()));
        iid
    }

    /// Id for `key` if it has been interned
    pub fn get(&self, key: &K) -> Option<u64> {
        self.ids.get(key).copied()
    }

    /// Entries allocated since the last drain, in allocation order
    pub fn take_pending(&mut self) -> Vec<(u64, K)> {
        std::mem::take(&mut self.pending)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Entries allocated since the last drain, left queued
    pub fn pending(&self) -> &[(u64, K)] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for InternTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// All namespaces of one capture, plus handle-keyed name caches
///
/// The caches map a schema element handle straight to its interned event name,
/// skipping the string formatting on every hit.
#[derive(Debug, Default)]
pub struct Interner {
    event_names: InternTable<String>,
    annotation_names: InternTable<String>,
    string_values: InternTable<String>,
    authorize_names: HashMap<TypeHandle, u64>,
    resolve_type_names: HashMap<TypeHandle, u64>,
    source_names: HashMap<SourceClassHandle, u64>,
    type_name_values: HashMap<TypeHandle, u64>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_name(&mut self, name: &str) -> u64 {
        intern_str(&mut self.event_names, name)
    }

    pub fn annotation_name(&mut self, name: &str) -> u64 {
        intern_str(&mut self.annotation_names, name)
    }

    pub fn string_value(&mut self, value: &str) -> u64 {
        intern_str(&mut self.string_values, value)
    }

    /// `Authorize: <Type>` event name
    pub fn authorize_name(&mut self, handle: TypeHandle, type_name: &str) -> u64 {
        if let Some(&iid) = self.authorize_names.get(&handle) {
            return iid;
        }
        let iid = self.event_name(&format!("Authorize: {}", type_name));
        self.authorize_names.insert(handle, iid);
        iid
    }

    /// `Resolve Type: <Type>` event name
    pub fn resolve_type_name(&mut self, handle: TypeHandle, type_name: &str) -> u64 {
        if let Some(&iid) = self.resolve_type_names.get(&handle) {
            return iid;
        }
        let iid = self.event_name(&format!("Resolve Type: {}", type_name));
        self.resolve_type_names.insert(handle, iid);
        iid
    }

    /// Source class name used as an event name
    pub fn source_name(&mut self, handle: SourceClassHandle, class_name: &str) -> u64 {
        if let Some(&iid) = self.source_names.get(&handle) {
            return iid;
        }
        let iid = self.event_name(class_name);
        self.source_names.insert(handle, iid);
        iid
    }

    /// Type name used as an interned annotation value
    pub fn type_name_value(&mut self, handle: TypeHandle, type_name: &str) -> u64 {
        if let Some(&iid) = self.type_name_values.get(&handle) {
            return iid;
        }
        let iid = self.string_value(type_name);
        self.type_name_values.insert(handle, iid);
        iid
    }

    pub fn has_pending(&self) -> bool {
        self.event_names.has_pending()
            || self.annotation_names.has_pending()
            || self.string_values.has_pending()
    }

    /// Drain everything interned since the last call into one block
    pub fn take_interned_data(&mut self) -> Option<InternedData> {
        if !self.has_pending() {
            return None;
        }
        Some(InternedData {
            event_categories: Vec::new(),
            event_names: entries(self.event_names.take_pending()),
            debug_annotation_names: entries(self.annotation_names.take_pending()),
            debug_annotation_string_values: entries(self.string_values.take_pending()),
        })
    }

    /// Copy of what [`Self::take_interned_data`] would drain
    pub fn peek_interned_data(&self) -> Option<InternedData> {
        if !self.has_pending() {
            return None;
        }
        Some(InternedData {
            event_categories: Vec::new(),
            event_names: entries(self.event_names.pending().to_vec()),
            debug_annotation_names: entries(self.annotation_names.pending().to_vec()),
            debug_annotation_string_values: entries(self.string_values.pending().to_vec()),
        })
    }
}

fn intern_str(table: &mut InternTable<String>, key: &str) -> u64 {
    // Avoid allocating on the hit path
    match table.ids.get(key) {
        Some(&iid) => iid,
        None => table.intern(&key.to_string()),
    }
}

fn entries(pending: Vec<(u64, String)>) -> Vec<InternedEntry> {
    pending
        .into_iter()
        .map(|(iid, name)| InternedEntry { iid, name })
        .collect()
}
