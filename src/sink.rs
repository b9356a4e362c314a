//! Error-reporting sink consumed by the consistency reporter

use std::error::Error;

/// A named binary artifact handed to the error reporter alongside a message.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
    pub description: String,
    /// Marked attachments are bundled into the outgoing report rather than
    /// kept local-only.
    pub included: bool,
}

impl Attachment {
    pub fn included(name: impl Into<String>, bytes: Vec<u8>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes,
            description: description.into(),
            included: true,
        }
    }
}

/// Destination for consistency-violation reports. The reporter is the sole
/// producer of these calls.
pub trait ReportSink: Send + Sync {
    fn report(&self, message: &str, cause: &(dyn Error + 'static), attachment: Option<Attachment>);
}

/// Default sink: emits the report through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&self, message: &str, cause: &(dyn Error + 'static), attachment: Option<Attachment>) {
        match attachment {
            Some(attachment) => {
                tracing::error!(
                    cause = %cause,
                    attachment = %attachment.name,
                    attachment_bytes = attachment.bytes.len(),
                    "{message}"
                );
            }
            None => {
                tracing::error!(cause = %cause, "{message}");
            }
        }
    }
}
