//! Change records and the insertion-ordered change log

use serde::{Deserialize, Serialize};

use super::{EntityData, EntityId, EntitySource};

/// One changed parent edge inside a replace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentChange {
    pub child: EntityId,
    pub old_parent: Option<EntityId>,
    pub new_parent: Option<EntityId>,
}

/// A single mutation applied to a mutable overlay of a snapshot.
///
/// Closed sum type so the anonymizer and codec match exhaustively. The
/// composite variant is flat: it is never a `Replace` wrapping a
/// `ChangeSource`, all fields live inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChangeRecord {
    /// New entity data plus its declared type.
    Add {
        data: EntityData,
        declared_type: String,
    },
    /// Identity of a removed entity; carries no payload.
    Remove { id: EntityId },
    /// Old and new entity data plus the structural deltas of the mutation.
    Replace {
        old: EntityData,
        new: EntityData,
        added_children: Vec<EntityId>,
        removed_children: Vec<EntityId>,
        changed_parents: Vec<ParentChange>,
    },
    /// Provenance-only change: the original tag and the entity data carrying
    /// the updated one.
    ChangeSource {
        id: EntityId,
        original: EntitySource,
        new: EntityData,
    },
    /// A single mutation that touched both payload and provenance.
    ReplaceAndChangeSource {
        old: EntityData,
        new: EntityData,
        added_children: Vec<EntityId>,
        removed_children: Vec<EntityId>,
        changed_parents: Vec<ParentChange>,
        original_source: EntitySource,
    },
}

impl ChangeRecord {
    /// The "new entity data" payload, uniform across variants that carry one.
    /// Feeds the codec's type-discovery pass; `Remove` contributes nothing.
    pub fn new_data(&self) -> Option<&EntityData> {
        match self {
            ChangeRecord::Add { data, .. } => Some(data),
            ChangeRecord::Remove { .. } => None,
            ChangeRecord::Replace { new, .. } => Some(new),
            ChangeRecord::ChangeSource { new, .. } => Some(new),
            ChangeRecord::ReplaceAndChangeSource { new, .. } => Some(new),
        }
    }
}

/// Mapping from entity identity to its most recent change record.
///
/// Keys are unique and insertion order is significant for deterministic
/// replay; replacing an existing key keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "Vec<(EntityId, ChangeRecord)>",
    into = "Vec<(EntityId, ChangeRecord)>"
)]
pub struct ChangeLog {
    records: Vec<(EntityId, ChangeRecord)>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `id`, preserving insertion order.
    pub fn upsert(&mut self, id: EntityId, record: ChangeRecord) {
        match self.records.iter_mut().find(|(key, _)| *key == id) {
            Some((_, existing)) => *existing = record,
            None => self.records.push((id, record)),
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&ChangeRecord> {
        self.records
            .iter()
            .find(|(key, _)| *key == id)
            .map(|(_, record)| record)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &ChangeRecord)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<Vec<(EntityId, ChangeRecord)>> for ChangeLog {
    fn from(records: Vec<(EntityId, ChangeRecord)>) -> Self {
        let mut log = ChangeLog::new();
        for (id, record) in records {
            log.upsert(id, record);
        }
        log
    }
}

impl From<ChangeLog> for Vec<(EntityId, ChangeRecord)> {
    fn from(log: ChangeLog) -> Self {
        log.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldValue;

    fn entity(id: u64, ty: &str) -> EntityData {
        EntityData::new(
            EntityId(id),
            ty,
            EntitySource::File {
                path: format!("/src/{id}"),
            },
        )
        .with_field("name", FieldValue::Text(format!("entity-{id}")))
    }

    #[test]
    fn new_data_projection_covers_every_variant() {
        let add = ChangeRecord::Add {
            data: entity(1, "module"),
            declared_type: "module".to_string(),
        };
        let remove = ChangeRecord::Remove { id: EntityId(2) };
        let replace = ChangeRecord::Replace {
            old: entity(3, "module"),
            new: entity(3, "module"),
            added_children: vec![EntityId(9)],
            removed_children: vec![],
            changed_parents: vec![],
        };
        let change_source = ChangeRecord::ChangeSource {
            id: EntityId(4),
            original: EntitySource::Custom {
                label: "old".to_string(),
            },
            new: entity(4, "library"),
        };
        let composite = ChangeRecord::ReplaceAndChangeSource {
            old: entity(5, "module"),
            new: entity(5, "module"),
            added_children: vec![],
            removed_children: vec![],
            changed_parents: vec![],
            original_source: EntitySource::Custom {
                label: "old".to_string(),
            },
        };

        assert_eq!(add.new_data().unwrap().id, EntityId(1));
        assert!(remove.new_data().is_none());
        assert_eq!(replace.new_data().unwrap().id, EntityId(3));
        assert_eq!(change_source.new_data().unwrap().id, EntityId(4));
        assert_eq!(composite.new_data().unwrap().id, EntityId(5));
    }

    #[test]
    fn upsert_keeps_insertion_position() {
        let mut log = ChangeLog::new();
        log.upsert(EntityId(1), ChangeRecord::Remove { id: EntityId(1) });
        log.upsert(EntityId(2), ChangeRecord::Remove { id: EntityId(2) });
        log.upsert(
            EntityId(1),
            ChangeRecord::Add {
                data: entity(1, "module"),
                declared_type: "module".to_string(),
            },
        );

        let keys: Vec<EntityId> = log.iter().map(|(id, _)| id).collect();
        assert_eq!(keys, vec![EntityId(1), EntityId(2)]);
        assert!(matches!(
            log.get(EntityId(1)),
            Some(ChangeRecord::Add { .. })
        ));
    }
}
