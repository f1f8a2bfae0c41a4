use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::diagnostics::Diagnostic;
use crate::policy::{CharsetKind, EndOfLineKind, IndentStyle, Policy};
use crate::registry::ViewHandle;
use crate::snapshot::{Edit, EditError, Snapshot, validate_edits};
use crate::transforms::{self, TransformationKind};

/// Host operations the normalization core depends on. The host editor (or
/// the CLI driver standing in for one) implements this; the core never
/// touches buffers or the screen directly.
pub trait EditorHost {
    fn is_writable(&self, path: &Path) -> bool;

    /// Applies the whole batch as one edit transaction, or fails without
    /// applying anything. `base_version` names the snapshot the edits were
    /// computed against.
    fn apply_transaction(
        &mut self,
        path: &Path,
        base_version: u64,
        edits: &[Edit],
    ) -> Result<(), HostError>;

    /// Asks the host to re-save the document with the given charset. The
    /// actual save happens later and may fail independently of the edit
    /// batch.
    fn request_resave(&mut self, path: &Path, charset: CharsetKind) -> Result<(), HostError>;

    fn current_snapshot(&self, view: ViewHandle) -> Option<Snapshot>;

    fn default_end_of_line(&self) -> EndOfLineKind;

    fn default_tab_width(&self) -> usize;

    fn surface_diagnostic(&mut self, diagnostic: &Diagnostic);

    fn clear_diagnostics(&mut self, path: &Path);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    NotWritable,
    Failed(String),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::NotWritable => f.write_str("buffer is not writable"),
            HostError::Failed(message) => write!(f, "host operation failed: {message}"),
        }
    }
}

impl std::error::Error for HostError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    BufferNotWritable,
    InvalidEditBatch(EditError),
    Host(String),
}

impl fmt::Display for NormalizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizationError::BufferNotWritable => {
                f.write_str("buffer is read-only or locked; no edits applied")
            }
            NormalizationError::InvalidEditBatch(err) => {
                write!(f, "edit batch failed validation: {err}")
            }
            NormalizationError::Host(message) => write!(f, "host rejected the batch: {message}"),
        }
    }
}

impl std::error::Error for NormalizationError {}

impl From<HostError> for NormalizationError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::NotWritable => NormalizationError::BufferNotWritable,
            HostError::Failed(message) => NormalizationError::Host(message),
        }
    }
}

/// Which transformations a session run may touch. `Full` runs at view-open;
/// `Touchup` is the save/focus/rename replay limited to trailing-whitespace
/// and final-newline repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassSet {
    Full,
    Touchup,
}

impl PassSet {
    fn includes(self, kind: TransformationKind) -> bool {
        match self {
            PassSet::Full => true,
            PassSet::Touchup => matches!(
                kind,
                TransformationKind::TrimTrailingWhitespace
                    | TransformationKind::EnsureFinalNewline
            ),
        }
    }
}

/// What one session run did: which passes were active, how many of their
/// edits survived arbitration, and whether a charset re-save was requested.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AppliedSet {
    pub passes: Vec<PassOutcome>,
    pub edits_applied: usize,
    pub skipped_edits: usize,
    pub charset: Option<CharsetKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassOutcome {
    pub kind: TransformationKind,
    pub edits: usize,
}

impl AppliedSet {
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty() && self.charset.is_none()
    }

    pub fn changed_buffer(&self) -> bool {
        self.edits_applied > 0
    }
}

/// Runs the active transformations in fixed order against one snapshot and
/// applies the surviving edits as a single atomic transaction.
///
/// All passes see the same original snapshot; when two passes want the same
/// range, the earlier pass wins and the later edit is dropped and counted,
/// never aborting the batch. An entirely empty policy is a successful no-op.
pub fn normalize(
    host: &mut dyn EditorHost,
    path: &Path,
    snapshot: &Snapshot,
    policy: &Policy,
    passes: PassSet,
) -> Result<AppliedSet, NormalizationError> {
    let plan = plan_passes(policy, passes);
    let mut outcome = AppliedSet::default();
    if plan.is_empty() {
        return Ok(outcome);
    }

    if !host.is_writable(path) {
        return Err(NormalizationError::BufferNotWritable);
    }

    let default_eol = host.default_end_of_line();
    let default_tab_width = host.default_tab_width();

    let mut batch: Vec<Edit> = Vec::new();
    for kind in plan {
        if kind == TransformationKind::Charset {
            let Some(charset) = policy.charset else {
                continue;
            };
            host.request_resave(path, charset)?;
            outcome.charset = Some(charset);
            continue;
        }

        let proposed = run_pass(kind, snapshot, policy, default_eol, default_tab_width);
        let accepted = merge_edits(&mut batch, proposed, &mut outcome.skipped_edits);
        outcome.passes.push(PassOutcome {
            kind,
            edits: accepted,
        });
    }

    validate_edits(&batch, snapshot.len()).map_err(NormalizationError::InvalidEditBatch)?;

    if !batch.is_empty() {
        host.apply_transaction(path, snapshot.version(), &batch)?;
        outcome.edits_applied = batch.len();
    }

    Ok(outcome)
}

/// Fixed order: Charset, Trim, EnsureFinalNewline, EnforceLineEnding,
/// ConvertIndentStyle. Trimming before the newline and line-ending passes
/// avoids re-scanning whitespace already removed; indent conversion runs
/// last because it relies on an undisturbed notion of "leading run".
fn plan_passes(policy: &Policy, passes: PassSet) -> Vec<TransformationKind> {
    let mut plan = Vec::new();
    if policy.charset.is_some() {
        plan.push(TransformationKind::Charset);
    }
    if policy.trim_trailing_whitespace == Some(true) {
        plan.push(TransformationKind::TrimTrailingWhitespace);
    }
    if policy.insert_final_newline.is_some() {
        plan.push(TransformationKind::EnsureFinalNewline);
    }
    if policy.end_of_line.is_some() {
        plan.push(TransformationKind::EnforceLineEnding);
    }
    if policy.indent_style != IndentStyle::Unset {
        plan.push(TransformationKind::ConvertIndentStyle);
    }
    plan.retain(|kind| passes.includes(*kind));
    plan
}

fn run_pass(
    kind: TransformationKind,
    snapshot: &Snapshot,
    policy: &Policy,
    default_eol: EndOfLineKind,
    default_tab_width: usize,
) -> Vec<Edit> {
    match kind {
        TransformationKind::Charset => Vec::new(),
        TransformationKind::TrimTrailingWhitespace => {
            transforms::trim_trailing_whitespace(snapshot)
        }
        TransformationKind::EnsureFinalNewline => {
            let insert = policy.insert_final_newline.unwrap_or(false);
            let eol = policy.end_of_line.unwrap_or(default_eol);
            transforms::ensure_final_newline(snapshot, insert, eol.as_str())
        }
        TransformationKind::EnforceLineEnding => {
            let Some(target) = policy.end_of_line else {
                return Vec::new();
            };
            transforms::enforce_line_ending(snapshot, target)
        }
        TransformationKind::ConvertIndentStyle => {
            transforms::convert_indent_style(snapshot, policy, default_tab_width)
        }
    }
}

/// Folds a pass's edits into the sorted batch, dropping any edit whose range
/// collides with an earlier pass's. Returns how many were accepted.
fn merge_edits(batch: &mut Vec<Edit>, proposed: Vec<Edit>, skipped: &mut usize) -> usize {
    let mut accepted = 0usize;
    for edit in proposed {
        match insertion_slot(batch, &edit) {
            Some(index) => {
                batch.insert(index, edit);
                accepted += 1;
            }
            None => *skipped += 1,
        }
    }
    accepted
}

fn insertion_slot(batch: &[Edit], edit: &Edit) -> Option<usize> {
    let index = batch.partition_point(|existing| existing.start < edit.start);
    if index > 0 {
        let prev = &batch[index - 1];
        if prev.end() > edit.start || prev.start == edit.start {
            return None;
        }
    }
    if let Some(next) = batch.get(index) {
        if edit.end() > next.start || next.start == edit.start {
            return None;
        }
    }
    Some(index)
}
