//! Versioned binary codec for dump artifacts
//!
//! Every artifact is a sequence of CBOR values: a preamble carrying the
//! format version and the contributor-version map, a type table listing the
//! payload types the artifact references, then the payload itself encoded
//! against that table. The per-artifact table keeps each dump file
//! self-describing even if the process-wide registry later changes.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::TypeRegistry;
use crate::store::{
    ChangeLog, ChangeRecord, EntityData, EntityId, EntitySource, EntityStorage, FieldValue,
    ParentChange,
};

/// Format version written into every artifact preamble. Bump on any change
/// to the framing or the wire structures below.
pub const FORMAT_VERSION: &str = "v1";

#[derive(Error, Debug)]
pub enum CodecError {
    /// The preamble names a format version this codec does not speak.
    #[error("unsupported dump format version {found:?}, expected {expected:?}")]
    Format { found: String, expected: String },
    /// Truncated stream, dangling type id, or malformed structure.
    #[error("corrupted dump stream: {0}")]
    Corruption(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn ser_err(e: ciborium::ser::Error<std::io::Error>) -> CodecError {
    match e {
        ciborium::ser::Error::Io(e) => CodecError::Io(e),
        ciborium::ser::Error::Value(msg) => CodecError::Corruption(msg),
    }
}

fn de_err(e: ciborium::de::Error<std::io::Error>) -> CodecError {
    CodecError::Corruption(e.to_string())
}

#[derive(Debug, Serialize, Deserialize)]
struct Preamble {
    format_version: String,
    contributors: BTreeMap<String, u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TypeTable {
    entries: Vec<(u32, String)>,
}

impl TypeTable {
    fn resolve(&self, id: u32) -> Result<&str, CodecError> {
        self.entries
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, name)| name.as_str())
            .ok_or_else(|| CodecError::Corruption(format!("dangling type id {id}")))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EntityWire {
    id: EntityId,
    type_id: u32,
    source: EntitySource,
    fields: BTreeMap<String, FieldValue>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotWire {
    entities: Vec<EntityWire>,
    children: Vec<(EntityId, Vec<EntityId>)>,
}

#[derive(Debug, Serialize, Deserialize)]
enum ChangeRecordWire {
    Add {
        data: EntityWire,
        declared_type_id: u32,
    },
    Remove {
        id: EntityId,
    },
    Replace {
        old: EntityWire,
        new: EntityWire,
        added_children: Vec<EntityId>,
        removed_children: Vec<EntityId>,
        changed_parents: Vec<ParentChange>,
    },
    ChangeSource {
        id: EntityId,
        original: EntitySource,
        new: EntityWire,
    },
    ReplaceAndChangeSource {
        old: EntityWire,
        new: EntityWire,
        added_children: Vec<EntityId>,
        removed_children: Vec<EntityId>,
        changed_parents: Vec<ParentChange>,
        original_source: EntitySource,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct ChangeLogWire {
    records: Vec<(EntityId, ChangeRecordWire)>,
}

/// Serializer/deserializer for snapshots, change logs, and the type registry.
///
/// The registry is injected, never ambient: encoding registers every type it
/// touches so later artifacts (and the registry artifact itself) agree on ids.
pub struct StorageCodec {
    registry: Arc<TypeRegistry>,
    contributors: BTreeMap<String, u32>,
}

impl StorageCodec {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            contributors: BTreeMap::new(),
        }
    }

    /// Record a format-contributor component version in the preamble.
    pub fn with_contributor(mut self, name: impl Into<String>, version: u32) -> Self {
        self.contributors.insert(name.into(), version);
        self
    }

    fn preamble(&self) -> Preamble {
        Preamble {
            format_version: FORMAT_VERSION.to_string(),
            contributors: self.contributors.clone(),
        }
    }

    /// Build the artifact type table for the given type names (first-seen
    /// order), registering each in the process-wide registry.
    fn type_table<'a>(&self, names: impl Iterator<Item = &'a str>) -> TypeTable {
        let mut entries: Vec<(u32, String)> = Vec::new();
        for name in names {
            let id = self.registry.get_or_register(name);
            if !entries.iter().any(|(entry_id, _)| *entry_id == id) {
                entries.push((id, name.to_string()));
            }
        }
        TypeTable { entries }
    }

    fn encode_entity(&self, data: &EntityData, table: &TypeTable) -> Result<EntityWire, CodecError> {
        let type_id = table
            .entries
            .iter()
            .find(|(_, name)| name == &data.type_name)
            .map(|(id, _)| *id)
            .ok_or_else(|| {
                CodecError::Corruption(format!(
                    "type {:?} not covered by the artifact type table",
                    data.type_name
                ))
            })?;
        Ok(EntityWire {
            id: data.id,
            type_id,
            source: data.source.clone(),
            fields: data.fields.clone(),
        })
    }

    fn decode_entity(&self, wire: EntityWire, table: &TypeTable) -> Result<EntityData, CodecError> {
        let type_name = table.resolve(wire.type_id)?.to_string();
        Ok(EntityData {
            id: wire.id,
            type_name,
            source: wire.source,
            fields: wire.fields,
        })
    }

    /// Serialize a snapshot: preamble, type table scanning every distinct
    /// payload type reachable from the snapshot, then the entity graph.
    pub fn serialize_snapshot<W: Write>(
        &self,
        writer: &mut W,
        storage: &EntityStorage,
    ) -> Result<(), CodecError> {
        let table = self.type_table(storage.entities().map(|e| e.type_name.as_str()));
        let entities = storage
            .entities()
            .map(|e| self.encode_entity(e, &table))
            .collect::<Result<Vec<_>, _>>()?;
        let wire = SnapshotWire {
            entities,
            children: storage
                .children()
                .iter()
                .map(|(parent, children)| (*parent, children.clone()))
                .collect(),
        };

        ciborium::ser::into_writer(&self.preamble(), &mut *writer).map_err(ser_err)?;
        ciborium::ser::into_writer(&table, &mut *writer).map_err(ser_err)?;
        ciborium::ser::into_writer(&wire, &mut *writer).map_err(ser_err)?;
        writer.flush()?;
        Ok(())
    }

    pub fn deserialize_snapshot<R: Read>(
        &self,
        mut reader: R,
    ) -> Result<EntityStorage, CodecError> {
        let table = self.read_header(&mut reader)?;
        let wire: SnapshotWire = ciborium::de::from_reader(&mut reader).map_err(de_err)?;

        let entities = wire
            .entities
            .into_iter()
            .map(|e| self.decode_entity(e, &table))
            .collect::<Result<Vec<_>, _>>()?;
        let children = wire.children.into_iter().collect();
        Ok(EntityStorage::from_parts(entities, children))
    }

    /// Serialize a change log. Type discovery scans the "new data" payload
    /// of each record (`Remove` records contribute nothing), then appends
    /// whatever old payloads and declared types additionally reference, so
    /// encoding is total over valid logs.
    pub fn serialize_change_log<W: Write>(
        &self,
        writer: &mut W,
        log: &ChangeLog,
    ) -> Result<(), CodecError> {
        let mut names: Vec<&str> = log
            .iter()
            .filter_map(|(_, record)| record.new_data())
            .map(|data| data.type_name.as_str())
            .collect();
        // Old payloads and declared types can reference types the new-data
        // scan never sees; they must still resolve at encode time.
        for (_, record) in log.iter() {
            match record {
                ChangeRecord::Add { declared_type, .. } => names.push(declared_type.as_str()),
                ChangeRecord::Replace { old, .. }
                | ChangeRecord::ReplaceAndChangeSource { old, .. } => {
                    names.push(old.type_name.as_str());
                }
                ChangeRecord::Remove { .. } | ChangeRecord::ChangeSource { .. } => {}
            }
        }
        let table = self.type_table(names.into_iter());

        let mut records = Vec::with_capacity(log.len());
        for (id, record) in log.iter() {
            records.push((id, self.encode_record(record, &table)?));
        }
        let wire = ChangeLogWire { records };

        ciborium::ser::into_writer(&self.preamble(), &mut *writer).map_err(ser_err)?;
        ciborium::ser::into_writer(&table, &mut *writer).map_err(ser_err)?;
        ciborium::ser::into_writer(&wire, &mut *writer).map_err(ser_err)?;
        writer.flush()?;
        Ok(())
    }

    pub fn deserialize_change_log<R: Read>(&self, mut reader: R) -> Result<ChangeLog, CodecError> {
        let table = self.read_header(&mut reader)?;
        let wire: ChangeLogWire = ciborium::de::from_reader(&mut reader).map_err(de_err)?;

        let mut log = ChangeLog::new();
        for (id, record) in wire.records {
            log.upsert(id, self.decode_record(record, &table)?);
        }
        Ok(log)
    }

    /// Serialize the full process-wide type↔id mapping so a later tool can
    /// resolve numeric type tags from other artifacts independently.
    pub fn serialize_type_registry<W: Write>(&self, writer: &mut W) -> Result<(), CodecError> {
        let table = TypeTable {
            entries: self.registry.entries(),
        };
        ciborium::ser::into_writer(&self.preamble(), &mut *writer).map_err(ser_err)?;
        ciborium::ser::into_writer(&table, &mut *writer).map_err(ser_err)?;
        writer.flush()?;
        Ok(())
    }

    /// Inverse of [`serialize_type_registry`](Self::serialize_type_registry).
    pub fn deserialize_type_registry<R: Read>(
        &self,
        mut reader: R,
    ) -> Result<Vec<(u32, String)>, CodecError> {
        let table = self.read_header(&mut reader)?;
        Ok(table.entries)
    }

    fn read_header<R: Read>(&self, reader: &mut R) -> Result<TypeTable, CodecError> {
        let preamble: Preamble = ciborium::de::from_reader(&mut *reader).map_err(de_err)?;
        if preamble.format_version != FORMAT_VERSION {
            return Err(CodecError::Format {
                found: preamble.format_version,
                expected: FORMAT_VERSION.to_string(),
            });
        }
        ciborium::de::from_reader(reader).map_err(de_err)
    }

    fn encode_record(
        &self,
        record: &ChangeRecord,
        table: &TypeTable,
    ) -> Result<ChangeRecordWire, CodecError> {
        Ok(match record {
            ChangeRecord::Add {
                data,
                declared_type,
            } => {
                let declared_type_id = table
                    .entries
                    .iter()
                    .find(|(_, name)| name == declared_type)
                    .map(|(id, _)| *id)
                    .ok_or_else(|| {
                        CodecError::Corruption(format!(
                            "declared type {declared_type:?} not covered by the artifact type table"
                        ))
                    })?;
                ChangeRecordWire::Add {
                    data: self.encode_entity(data, table)?,
                    declared_type_id,
                }
            }
            ChangeRecord::Remove { id } => ChangeRecordWire::Remove { id: *id },
            ChangeRecord::Replace {
                old,
                new,
                added_children,
                removed_children,
                changed_parents,
            } => ChangeRecordWire::Replace {
                old: self.encode_entity(old, table)?,
                new: self.encode_entity(new, table)?,
                added_children: added_children.clone(),
                removed_children: removed_children.clone(),
                changed_parents: changed_parents.clone(),
            },
            ChangeRecord::ChangeSource { id, original, new } => ChangeRecordWire::ChangeSource {
                id: *id,
                original: original.clone(),
                new: self.encode_entity(new, table)?,
            },
            ChangeRecord::ReplaceAndChangeSource {
                old,
                new,
                added_children,
                removed_children,
                changed_parents,
                original_source,
            } => ChangeRecordWire::ReplaceAndChangeSource {
                old: self.encode_entity(old, table)?,
                new: self.encode_entity(new, table)?,
                added_children: added_children.clone(),
                removed_children: removed_children.clone(),
                changed_parents: changed_parents.clone(),
                original_source: original_source.clone(),
            },
        })
    }

    fn decode_record(
        &self,
        wire: ChangeRecordWire,
        table: &TypeTable,
    ) -> Result<ChangeRecord, CodecError> {
        Ok(match wire {
            ChangeRecordWire::Add {
                data,
                declared_type_id,
            } => ChangeRecord::Add {
                data: self.decode_entity(data, table)?,
                declared_type: table.resolve(declared_type_id)?.to_string(),
            },
            ChangeRecordWire::Remove { id } => ChangeRecord::Remove { id },
            ChangeRecordWire::Replace {
                old,
                new,
                added_children,
                removed_children,
                changed_parents,
            } => ChangeRecord::Replace {
                old: self.decode_entity(old, table)?,
                new: self.decode_entity(new, table)?,
                added_children,
                removed_children,
                changed_parents,
            },
            ChangeRecordWire::ChangeSource { id, original, new } => ChangeRecord::ChangeSource {
                id,
                original,
                new: self.decode_entity(new, table)?,
            },
            ChangeRecordWire::ReplaceAndChangeSource {
                old,
                new,
                added_children,
                removed_children,
                changed_parents,
                original_source,
            } => ChangeRecord::ReplaceAndChangeSource {
                old: self.decode_entity(old, table)?,
                new: self.decode_entity(new, table)?,
                added_children,
                removed_children,
                changed_parents,
                original_source,
            },
        })
    }
}
