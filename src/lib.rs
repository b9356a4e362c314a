pub mod anonymize;
pub mod codec;
pub mod config;
pub mod dump;
pub mod registry;
pub mod report;
pub mod sink;
pub mod store;

pub use anonymize::{anonymize_source, Anonymizer, SourceFilter};
pub use codec::{CodecError, StorageCodec};
pub use config::{CaptureConfig, CaptureMode};
pub use dump::DumpDirectoryManager;
pub use registry::TypeRegistry;
pub use codec::FORMAT_VERSION;
pub use report::{CaptureError, ConsistencyReporter, ReportOutcome};
pub use sink::{Attachment, LogSink, ReportSink};
pub use store::{
    ChangeLog, ChangeRecord, EntityData, EntityId, EntitySource, EntityStorage, FieldValue,
    MutableEntityStorage, ParentChange, StoreView,
};
