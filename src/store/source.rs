//! Entity provenance tags

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

/// Substituted when rendering a source fails mid-way.
pub const RENDER_FAILURE_PLACEHOLDER: &str = "<unrenderable entity source>";

/// Provenance tag attached to every entity, identifying its origin.
///
/// The `Anonymized`/`Matched`/`Unmatched` variants only ever appear in
/// diagnostic dumps: they carry the rendered form of the original source and
/// nothing else. They render as that string verbatim, which makes
/// re-anonymization a no-op in content (the placeholder records only the
/// already-anonymized text).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntitySource {
    /// Entity originates from a file on disk.
    File { path: String },
    /// Entity was contributed by a plugin.
    Plugin { plugin_id: String },
    /// Catch-all for callers with ad-hoc provenance.
    Custom { label: String },
    /// Source rewritten for a dump with no filter predicate in play.
    Anonymized { original_dump: String },
    /// Source rewritten for a dump; the caller's predicate accepted it.
    Matched { original_dump: String },
    /// Source rewritten for a dump; the caller's predicate rejected it.
    Unmatched { original_dump: String },
}

impl EntitySource {
    /// True for the dump-only variants produced by anonymization.
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            EntitySource::Anonymized { .. }
                | EntitySource::Matched { .. }
                | EntitySource::Unmatched { .. }
        )
    }
}

impl fmt::Display for EntitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntitySource::File { path } => write!(f, "file:{path}"),
            EntitySource::Plugin { plugin_id } => write!(f, "plugin:{plugin_id}"),
            EntitySource::Custom { label } => write!(f, "custom:{label}"),
            EntitySource::Anonymized { original_dump }
            | EntitySource::Matched { original_dump }
            | EntitySource::Unmatched { original_dump } => f.write_str(original_dump),
        }
    }
}

/// Render a source to text without ever failing.
///
/// Runs on the error path of the host store, so a panic inside a rendering
/// impl degrades to [`RENDER_FAILURE_PLACEHOLDER`] instead of propagating.
pub fn render_source(source: &EntitySource) -> String {
    catch_unwind(AssertUnwindSafe(|| source.to_string()))
        .unwrap_or_else(|_| RENDER_FAILURE_PLACEHOLDER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_variants_render_verbatim() {
        let source = EntitySource::Anonymized {
            original_dump: "file:/tmp/a.toml".to_string(),
        };
        assert_eq!(render_source(&source), "file:/tmp/a.toml");
    }

    #[test]
    fn real_variants_render_with_origin_prefix() {
        let source = EntitySource::Plugin {
            plugin_id: "importer".to_string(),
        };
        assert_eq!(render_source(&source), "plugin:importer");
        assert!(!source.is_diagnostic());
    }
}
