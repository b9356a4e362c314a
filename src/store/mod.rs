//! Minimal entity-store data model consumed by the diagnostic subsystem
//!
//! The store's query/mutation API lives elsewhere; these types are the
//! read-only surface the capture path needs: immutable snapshots, the mutable
//! overlay's pending change log, and provenance tags.

mod change;
mod source;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

pub use change::{ChangeLog, ChangeRecord, ParentChange};
pub use source::{render_source, EntitySource, RENDER_FAILURE_PLACEHOLDER};

/// Identity of an entity within a store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single typed field of an entity payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Text(String),
    TextList(Vec<String>),
}

/// Payload of one entity: identity, declared type, provenance, and fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityData {
    pub id: EntityId,
    /// Stable type identifier, resolved to a numeric id through the
    /// [`TypeRegistry`](crate::registry::TypeRegistry) at encode time.
    pub type_name: String,
    pub source: EntitySource,
    pub fields: BTreeMap<String, FieldValue>,
}

impl EntityData {
    pub fn new(id: EntityId, type_name: impl Into<String>, source: EntitySource) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            source,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// Immutable point-in-time view of the entity graph.
///
/// Entities keep insertion order; parent/child edges are kept separately so
/// anonymization can guarantee it only ever touches provenance tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityStorage {
    entities: Vec<EntityData>,
    index: HashMap<EntityId, usize>,
    children: BTreeMap<EntityId, Vec<EntityId>>,
}

impl EntityStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity. A second insert with the same id replaces the
    /// payload in place, keeping the original position.
    pub fn insert(&mut self, data: EntityData) {
        match self.index.get(&data.id) {
            Some(&pos) => self.entities[pos] = data,
            None => {
                self.index.insert(data.id, self.entities.len());
                self.entities.push(data);
            }
        }
    }

    /// Record a parent → child edge.
    pub fn link(&mut self, parent: EntityId, child: EntityId) {
        self.children.entry(parent).or_default().push(child);
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityData> {
        self.index.get(&id).map(|&pos| &self.entities[pos])
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityData> {
        self.entities.iter()
    }

    pub fn children(&self) -> &BTreeMap<EntityId, Vec<EntityId>> {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Rebuild a storage from raw parts (used by the codec on decode).
    pub(crate) fn from_parts(
        entities: Vec<EntityData>,
        children: BTreeMap<EntityId, Vec<EntityId>>,
    ) -> Self {
        let index = entities
            .iter()
            .enumerate()
            .map(|(pos, e)| (e.id, pos))
            .collect();
        Self {
            entities,
            index,
            children,
        }
    }
}

/// An in-progress store: the current overlay state plus the pending change
/// log that will replay the overlay's mutations against its base snapshot.
#[derive(Debug, Clone, Default)]
pub struct MutableEntityStorage {
    pub current: EntityStorage,
    pub change_log: ChangeLog,
}

impl MutableEntityStorage {
    pub fn new(base: EntityStorage) -> Self {
        Self {
            current: base,
            change_log: ChangeLog::new(),
        }
    }

    /// Record the most recent change for an entity. One logical mutation maps
    /// to exactly one record; a later record for the same entity replaces the
    /// earlier one without changing its position in the log.
    pub fn record(&mut self, id: EntityId, record: ChangeRecord) {
        self.change_log.upsert(id, record);
    }
}

/// How a store enters a consistency report: either a finished snapshot or a
/// mutable store still carrying a pending change log.
#[derive(Debug, Clone, Copy)]
pub enum StoreView<'a> {
    Snapshot(&'a EntityStorage),
    InProgress(&'a MutableEntityStorage),
}

impl<'a> StoreView<'a> {
    /// The storage to serialize for this side of the report.
    pub fn storage(&self) -> &'a EntityStorage {
        match self {
            StoreView::Snapshot(storage) => storage,
            StoreView::InProgress(mutable) => &mutable.current,
        }
    }

    /// The pending change log, present only for in-progress stores.
    pub fn change_log(&self) -> Option<&'a ChangeLog> {
        match self {
            StoreView::Snapshot(_) => None,
            StoreView::InProgress(mutable) => Some(&mutable.change_log),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_source(path: &str) -> EntitySource {
        EntitySource::File {
            path: path.to_string(),
        }
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut storage = EntityStorage::new();
        storage.insert(EntityData::new(EntityId(1), "module", file_source("a")));
        storage.insert(EntityData::new(EntityId(2), "module", file_source("b")));
        storage.insert(EntityData::new(EntityId(1), "library", file_source("c")));

        assert_eq!(storage.len(), 2);
        let first = storage.entities().next().unwrap();
        assert_eq!(first.id, EntityId(1));
        assert_eq!(first.type_name, "library");
    }

    #[test]
    fn store_view_exposes_change_log_only_for_mutable() {
        let snapshot = EntityStorage::new();
        assert!(StoreView::Snapshot(&snapshot).change_log().is_none());

        let mutable = MutableEntityStorage::new(EntityStorage::new());
        assert!(StoreView::InProgress(&mutable).change_log().is_some());
    }
}
