//! Provenance anonymization for dump capture
//!
//! Rewrites entity-source tags into privacy-safe placeholders before a
//! snapshot or change log is serialized. Everything here is total: these
//! functions run on the error path of the host store and have no error
//! channel by design.

use crate::config::CaptureConfig;
use crate::store::{render_source, ChangeLog, ChangeRecord, EntitySource, EntityStorage};

/// Caller-supplied predicate partitioning sources into matched/unmatched.
pub type SourceFilter<'a> = &'a dyn Fn(&EntitySource) -> bool;

/// Rewrite one source into its diagnostic placeholder.
///
/// With a filter, the source becomes `Matched` or `Unmatched` depending on
/// the verdict; without one it becomes `Anonymized`. The placeholder records
/// only the rendered text, so re-applying this to an already-anonymized
/// source reproduces the same placeholder content.
pub fn anonymize_source(source: &EntitySource, filter: Option<SourceFilter<'_>>) -> EntitySource {
    let original_dump = render_source(source);
    match filter {
        Some(filter) if filter(source) => EntitySource::Matched { original_dump },
        Some(_) => EntitySource::Unmatched { original_dump },
        None => EntitySource::Anonymized { original_dump },
    }
}

/// Snapshot/change-log anonymizer gated on the global configuration flag.
#[derive(Debug, Clone, Copy)]
pub struct Anonymizer {
    enabled: bool,
}

impl Anonymizer {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.anonymization_enabled)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Rewrite every entity's provenance tag, leaving identities, payload
    /// fields, and edges untouched. Returns the input unchanged when
    /// anonymization is disabled.
    pub fn snapshot(
        &self,
        storage: &EntityStorage,
        filter: Option<SourceFilter<'_>>,
    ) -> EntityStorage {
        if !self.enabled {
            return storage.clone();
        }
        let entities = storage
            .entities()
            .map(|entity| {
                let mut data = entity.clone();
                data.source = anonymize_source(&data.source, filter);
                data
            })
            .collect();
        EntityStorage::from_parts(entities, storage.children().clone())
    }

    /// Rewrite the provenance embedded in every change record. Composite
    /// records anonymize both embedded payloads independently, each from its
    /// own source value; `Remove` records pass through unchanged.
    pub fn change_log(&self, log: &ChangeLog, filter: Option<SourceFilter<'_>>) -> ChangeLog {
        if !self.enabled {
            return log.clone();
        }
        let mut result = ChangeLog::new();
        for (id, record) in log.iter() {
            result.upsert(id, self.record(record, filter));
        }
        result
    }

    fn record(&self, record: &ChangeRecord, filter: Option<SourceFilter<'_>>) -> ChangeRecord {
        match record {
            ChangeRecord::Add {
                data,
                declared_type,
            } => {
                let mut data = data.clone();
                data.source = anonymize_source(&data.source, filter);
                ChangeRecord::Add {
                    data,
                    declared_type: declared_type.clone(),
                }
            }
            ChangeRecord::Remove { id } => ChangeRecord::Remove { id: *id },
            ChangeRecord::Replace {
                old,
                new,
                added_children,
                removed_children,
                changed_parents,
            } => {
                let mut old = old.clone();
                old.source = anonymize_source(&old.source, filter);
                let mut new = new.clone();
                new.source = anonymize_source(&new.source, filter);
                ChangeRecord::Replace {
                    old,
                    new,
                    added_children: added_children.clone(),
                    removed_children: removed_children.clone(),
                    changed_parents: changed_parents.clone(),
                }
            }
            ChangeRecord::ChangeSource { id, original, new } => {
                let mut new = new.clone();
                new.source = anonymize_source(&new.source, filter);
                ChangeRecord::ChangeSource {
                    id: *id,
                    original: anonymize_source(original, filter),
                    new,
                }
            }
            ChangeRecord::ReplaceAndChangeSource {
                old,
                new,
                added_children,
                removed_children,
                changed_parents,
                original_source,
            } => {
                let mut old = old.clone();
                old.source = anonymize_source(&old.source, filter);
                let mut new = new.clone();
                new.source = anonymize_source(&new.source, filter);
                ChangeRecord::ReplaceAndChangeSource {
                    old,
                    new,
                    added_children: added_children.clone(),
                    removed_children: removed_children.clone(),
                    changed_parents: changed_parents.clone(),
                    original_source: anonymize_source(original_source, filter),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntityData, EntityId, FieldValue};

    fn file_entity(id: u64, path: &str) -> EntityData {
        EntityData::new(
            EntityId(id),
            "module",
            EntitySource::File {
                path: path.to_string(),
            },
        )
        .with_field("name", FieldValue::Text(format!("m{id}")))
    }

    fn sample_storage() -> EntityStorage {
        let mut storage = EntityStorage::new();
        storage.insert(file_entity(1, "/src/a"));
        storage.insert(file_entity(2, "/src/b"));
        storage.insert(EntityData::new(
            EntityId(3),
            "library",
            EntitySource::Plugin {
                plugin_id: "importer".to_string(),
            },
        ));
        storage.link(EntityId(1), EntityId(3));
        storage
    }

    #[test]
    fn source_without_filter_becomes_anonymized() {
        let source = EntitySource::File {
            path: "/src/a".to_string(),
        };
        assert_eq!(
            anonymize_source(&source, None),
            EntitySource::Anonymized {
                original_dump: "file:/src/a".to_string()
            }
        );
    }

    #[test]
    fn filter_partitions_matched_and_unmatched() {
        let file = EntitySource::File {
            path: "/src/a".to_string(),
        };
        let plugin = EntitySource::Plugin {
            plugin_id: "importer".to_string(),
        };
        let only_files = |s: &EntitySource| matches!(s, EntitySource::File { .. });
        assert!(matches!(
            anonymize_source(&file, Some(&only_files)),
            EntitySource::Matched { .. }
        ));
        assert!(matches!(
            anonymize_source(&plugin, Some(&only_files)),
            EntitySource::Unmatched { .. }
        ));
    }

    #[test]
    fn reapplication_reproduces_the_placeholder() {
        let source = EntitySource::Plugin {
            plugin_id: "importer".to_string(),
        };
        let once = anonymize_source(&source, None);
        let twice = anonymize_source(&once, None);
        assert_eq!(once, twice);
    }

    #[test]
    fn disabled_anonymizer_returns_input_unchanged() {
        let storage = sample_storage();
        let anonymizer = Anonymizer::new(false);
        assert_eq!(anonymizer.snapshot(&storage, None), storage);

        let mut log = ChangeLog::new();
        log.upsert(
            EntityId(1),
            ChangeRecord::Add {
                data: file_entity(1, "/src/a"),
                declared_type: "module".to_string(),
            },
        );
        assert_eq!(anonymizer.change_log(&log, None), log);
    }

    #[test]
    fn snapshot_rewrite_touches_only_sources() {
        let storage = sample_storage();
        let anonymized = Anonymizer::new(true).snapshot(&storage, None);

        assert_eq!(anonymized.len(), storage.len());
        assert_eq!(anonymized.children(), storage.children());
        for (before, after) in storage.entities().zip(anonymized.entities()) {
            assert_eq!(before.id, after.id);
            assert_eq!(before.type_name, after.type_name);
            assert_eq!(before.fields, after.fields);
            assert!(after.source.is_diagnostic());
            assert!(!before.source.is_diagnostic());
        }
    }

    #[test]
    fn composite_record_anonymizes_both_payloads_independently() {
        let mut old = file_entity(5, "/src/old");
        old.source = EntitySource::File {
            path: "/src/old".to_string(),
        };
        let new = EntityData::new(
            EntityId(5),
            "module",
            EntitySource::Plugin {
                plugin_id: "importer".to_string(),
            },
        );
        let mut log = ChangeLog::new();
        log.upsert(
            EntityId(5),
            ChangeRecord::ReplaceAndChangeSource {
                old,
                new,
                added_children: vec![],
                removed_children: vec![],
                changed_parents: vec![],
                original_source: EntitySource::File {
                    path: "/src/old".to_string(),
                },
            },
        );

        let result = Anonymizer::new(true).change_log(&log, None);
        match result.get(EntityId(5)).unwrap() {
            ChangeRecord::ReplaceAndChangeSource {
                old,
                new,
                original_source,
                ..
            } => {
                // Each payload anonymized from its own source, not copied.
                assert_eq!(
                    old.source,
                    EntitySource::Anonymized {
                        original_dump: "file:/src/old".to_string()
                    }
                );
                assert_eq!(
                    new.source,
                    EntitySource::Anonymized {
                        original_dump: "plugin:importer".to_string()
                    }
                );
                assert_eq!(
                    *original_source,
                    EntitySource::Anonymized {
                        original_dump: "file:/src/old".to_string()
                    }
                );
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn remove_records_pass_through() {
        let mut log = ChangeLog::new();
        log.upsert(EntityId(9), ChangeRecord::Remove { id: EntityId(9) });
        let result = Anonymizer::new(true).change_log(&log, None);
        assert_eq!(
            result.get(EntityId(9)),
            Some(&ChangeRecord::Remove { id: EntityId(9) })
        );
    }
}
