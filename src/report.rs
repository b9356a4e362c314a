//! Consistency-violation reporting
//!
//! Orchestrates dump capture: allocate a directory, anonymize, serialize,
//! compress, attach. This runs on the error path of the host store, so no
//! failure here is allowed to escape; anything that goes wrong downgrades to
//! "reported without attachment" and a local log line.

use std::collections::BTreeMap;
use std::error::Error;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use zip::write::FileOptions;

use crate::anonymize::{Anonymizer, SourceFilter};
use crate::codec::{CodecError, StorageCodec, FORMAT_VERSION};
use crate::config::CaptureConfig;
use crate::dump::DumpDirectoryManager;
use crate::registry::TypeRegistry;
use crate::sink::{Attachment, ReportSink};
use crate::store::{render_source, EntitySource, EntityStorage, StoreView};

pub const RIGHT_DIFF_LOG: &str = "Right_Diff_Log";
pub const LEFT_STORE: &str = "Left_Store";
pub const RIGHT_STORE: &str = "Right_Store";
pub const RES_STORE: &str = "Res_Store";
pub const CLASS_TO_INT_CONVERTER: &str = "ClassToIntConverter";
pub const ADD_DIFF: &str = "Add_Diff";
pub const REPLACE_BY_SOURCE: &str = "Replace_By_Source";
/// Present iff provenance was anonymized before serialization.
pub const REPORT_WRAPPED: &str = "Report_Wrapped";
/// Present iff the dump carries un-anonymized provenance and must be handled
/// accordingly downstream.
pub const REPORT_PLAIN: &str = "Report_Plain";

const ATTACHMENT_NAME: &str = "storeDump.zip";

/// Terminal outcome of one [`ConsistencyReporter::report_consistency_issue`]
/// invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    ReportedWithAttachment,
    ReportedWithoutAttachment,
}

/// Capture-side failure. Never escapes the reporter; surfaced only through
/// operator logs.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to write dump artifact {name}: {source}")]
    Artifact {
        name: &'static str,
        #[source]
        source: CodecError,
    },
    #[error("dump I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to compress dump directory: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Synthesized cause for the one-store convenience entry point.
#[derive(Debug, Error)]
#[error("entity store consistency violation")]
struct ConsistencyViolation;

struct Captured {
    dir: PathBuf,
    archive: Option<Vec<u8>>,
}

/// Captures and reports consistency violations. Safe to call concurrently:
/// every invocation allocates its own dump directory and shares no mutable
/// state with others (the operator-override path is single-invocation,
/// test-only, and makes no isolation promise).
pub struct ConsistencyReporter {
    config: CaptureConfig,
    registry: Arc<TypeRegistry>,
    sink: Arc<dyn ReportSink>,
}

impl ConsistencyReporter {
    pub fn new(
        config: CaptureConfig,
        registry: Arc<TypeRegistry>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            config,
            registry,
            sink,
        }
    }

    /// Report a consistency violation, capturing a dump of the involved
    /// stores when capture is enabled.
    ///
    /// Blocking file I/O happens on the calling thread; directory allocation,
    /// artifact writes, compression, and attachment run strictly in that
    /// order. This never returns an error: capture failures are logged and
    /// the violation is reported without an attachment.
    pub fn report_consistency_issue(
        &self,
        message: &str,
        cause: &(dyn Error + 'static),
        source_filter: Option<SourceFilter<'_>>,
        left: Option<&EntityStorage>,
        right: Option<StoreView<'_>>,
        resulting: &EntityStorage,
    ) -> ReportOutcome {
        let mut final_message = format!("{message}\n\nVersion: {FORMAT_VERSION}");

        let mut attachment = None;
        if self.config.capture_enabled() {
            match self.capture(source_filter, left, right, resulting) {
                Ok(captured) => {
                    final_message.push_str(&format!(
                        "\nSaving store content at: {}",
                        captured.dir.display()
                    ));
                    attachment = captured.archive.map(|bytes| {
                        Attachment::included(ATTACHMENT_NAME, bytes, "Zip of the entity store dump")
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Store dump capture failed, reporting without attachment"
                    );
                }
            }
        }

        let outcome = if attachment.is_some() {
            ReportOutcome::ReportedWithAttachment
        } else {
            ReportOutcome::ReportedWithoutAttachment
        };
        self.sink.report(&final_message, cause, attachment);
        outcome
    }

    /// Convenience entry point: report with only the resulting store and a
    /// synthesized cause.
    pub fn report_error_and_attach_storage(
        &self,
        message: &str,
        storage: &EntityStorage,
    ) -> ReportOutcome {
        self.report_consistency_issue(message, &ConsistencyViolation, None, None, None, storage)
    }

    fn capture(
        &self,
        source_filter: Option<SourceFilter<'_>>,
        left: Option<&EntityStorage>,
        right: Option<StoreView<'_>>,
        resulting: &EntityStorage,
    ) -> Result<Captured, CaptureError> {
        let manager = DumpDirectoryManager::from_config(&self.config);
        let dir = manager.allocate()?;
        let codec = StorageCodec::new(self.registry.clone());
        let anonymizer = Anonymizer::from_config(&self.config);

        if let Some(log) = right.and_then(|r| r.change_log()) {
            let log = anonymizer.change_log(log, None);
            write_artifact(&dir, RIGHT_DIFF_LOG, |w| codec.serialize_change_log(w, &log))?;
        }

        if let Some(left) = left {
            let store = anonymizer.snapshot(left, source_filter);
            write_artifact(&dir, LEFT_STORE, |w| codec.serialize_snapshot(w, &store))?;
        }
        if let Some(right) = right {
            let store = anonymizer.snapshot(right.storage(), source_filter);
            write_artifact(&dir, RIGHT_STORE, |w| codec.serialize_snapshot(w, &store))?;
        }
        let store = anonymizer.snapshot(resulting, source_filter);
        write_artifact(&dir, RES_STORE, |w| codec.serialize_snapshot(w, &store))?;

        write_artifact(&dir, CLASS_TO_INT_CONVERTER, |w| {
            codec.serialize_type_registry(w)
        })?;

        // Operation marker: name records additive vs replace-by-source, the
        // bitstring (anonymization active + predicate supplied only) records
        // the predicate verdict per distinct source without the source text.
        let marker = if source_filter.is_none() {
            ADD_DIFF
        } else {
            REPLACE_BY_SOURCE
        };
        let verdicts = match source_filter {
            Some(filter) if anonymizer.is_enabled() => {
                source_filter_bitmap(left, right.map(|r| r.storage()), filter)
            }
            _ => String::new(),
        };
        fs::write(dir.join(marker), verdicts)?;

        if anonymizer.is_enabled() {
            fs::write(dir.join(REPORT_WRAPPED), "")?;
        } else {
            fs::write(dir.join(REPORT_PLAIN), "")?;
        }

        // In the controlled environment the directory stays uncompressed for
        // direct inspection and nothing is attached.
        let archive = if manager.is_controlled_environment() {
            None
        } else {
            let zip_path = zip_path_for(&dir);
            compress_directory(&dir, &zip_path)?;
            fs::remove_dir_all(&dir)?;
            Some(fs::read(&zip_path)?)
        };

        Ok(Captured { dir, archive })
    }
}

/// `1`/`0` per distinct entity source across both stores, ordered by the
/// source's rendered form. Two sources rendering identically collapse into
/// one bit; accepted as lossy.
fn source_filter_bitmap(
    left: Option<&EntityStorage>,
    right: Option<&EntityStorage>,
    filter: SourceFilter<'_>,
) -> String {
    let mut by_render: BTreeMap<String, EntitySource> = BTreeMap::new();
    for storage in left.into_iter().chain(right) {
        for entity in storage.entities() {
            by_render
                .entry(render_source(&entity.source))
                .or_insert_with(|| entity.source.clone());
        }
    }
    by_render
        .values()
        .map(|source| if filter(source) { '1' } else { '0' })
        .collect()
}

fn write_artifact(
    dir: &Path,
    name: &'static str,
    write: impl FnOnce(&mut BufWriter<File>) -> Result<(), CodecError>,
) -> Result<(), CaptureError> {
    let file = File::create(dir.join(name))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer).map_err(|source| CaptureError::Artifact { name, source })?;
    writer.flush()?;
    Ok(())
}

fn zip_path_for(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "storeDump".to_string());
    dir.parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{name}.zip"))
}

/// Flat zip of every file in `dir`, Deflated.
fn compress_directory(dir: &Path, zip_path: &Path) -> Result<(), CaptureError> {
    let zip_file = File::create(zip_path)?;
    let mut zip = zip::ZipWriter::new(zip_file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        zip.start_file(name, options)?;
        let mut src = File::open(&path)?;
        io::copy(&mut src, &mut zip)?;
    }

    let mut zip_file = zip.finish()?;
    zip_file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntityData, EntityId};

    fn storage_with_sources(paths: &[&str]) -> EntityStorage {
        let mut storage = EntityStorage::new();
        for (i, path) in paths.iter().enumerate() {
            storage.insert(EntityData::new(
                EntityId(i as u64 + 1),
                "module",
                EntitySource::File {
                    path: (*path).to_string(),
                },
            ));
        }
        storage
    }

    #[test]
    fn bitmap_is_sorted_by_rendered_source() {
        let left = storage_with_sources(&["/b", "/a"]);
        let right = storage_with_sources(&["/c"]);
        let filter = |s: &EntitySource| matches!(s, EntitySource::File { path } if path != "/b");

        let bits = source_filter_bitmap(Some(&left), Some(&right), &filter);
        // Sorted renders: file:/a, file:/b, file:/c
        assert_eq!(bits, "101");
    }

    #[test]
    fn bitmap_deduplicates_identical_sources() {
        let left = storage_with_sources(&["/a", "/a", "/b"]);
        let bits = source_filter_bitmap(Some(&left), None, &|_| true);
        assert_eq!(bits, "11");
    }
}
