use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::policy::ResolveError;

/// A user-visible message tied to a file position, destined for the host's
/// error list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub path: PathBuf,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
}

impl Diagnostic {
    pub fn from_resolve_error(document: &Path, error: &ResolveError) -> Self {
        Self {
            path: error.path.clone(),
            line: error.line,
            column: error.column,
            message: format!("{} (while resolving {})", error.message, document.display()),
        }
    }
}

/// Gates configuration diagnostics to one per affected document. A document
/// that later resolves successfully gets its diagnostic cleared.
#[derive(Debug, Default)]
pub struct DiagnosticTracker {
    flagged: HashSet<PathBuf>,
}

impl DiagnosticTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when this is the first failure for the document since it last
    /// resolved cleanly; the caller should surface the diagnostic then.
    pub fn should_surface(&mut self, document: &Path) -> bool {
        self.flagged.insert(document.to_path_buf())
    }

    /// True when a previously flagged document just recovered; the caller
    /// should clear its diagnostics then.
    pub fn mark_resolved(&mut self, document: &Path) -> bool {
        self.flagged.remove(document)
    }
}
