use std::path::Path;

use crate::diagnostics::{Diagnostic, DiagnosticTracker};
use crate::policy::{ConfigResolver, Policy};
use crate::registry::{ViewHandle, ViewRegistry};
use crate::session::{self, AppliedSet, EditorHost, NormalizationError, PassSet};

/// Ties the view registry, the injected config resolver, and the host
/// together, and reacts to the host's lifecycle notifications. One engine
/// instance per process, constructed at startup and passed around
/// explicitly.
///
/// Handlers never panic across the host boundary: every failure comes back
/// as a result value, and unmonitored documents are silently ignored.
pub struct Engine<R: ConfigResolver, H: EditorHost> {
    resolver: R,
    host: H,
    registry: ViewRegistry,
    diagnostics: DiagnosticTracker,
}

impl<R: ConfigResolver, H: EditorHost> Engine<R, H> {
    pub fn new(resolver: R, host: H) -> Self {
        Self {
            resolver,
            host,
            registry: ViewRegistry::new(),
            diagnostics: DiagnosticTracker::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn registry(&self) -> &ViewRegistry {
        &self.registry
    }

    /// A view opened on `path`: resolve its rules, register it, and run the
    /// full normalization once against the view's current content.
    pub fn view_opened(
        &mut self,
        path: &Path,
        view: ViewHandle,
    ) -> Result<Option<AppliedSet>, NormalizationError> {
        let policy = self.resolve_policy(path);
        self.registry.register(path, view, policy.clone());
        let Some(snapshot) = self.host.current_snapshot(view) else {
            return Ok(None);
        };
        session::normalize(&mut self.host, path, &snapshot, &policy, PassSet::Full).map(Some)
    }

    pub fn view_closed(&mut self, path: &Path, view: ViewHandle) {
        self.registry.unregister(path, view);
    }

    /// The document moved: re-resolve under the new path, move the view's
    /// registration synchronously (no later lookup can see the old path),
    /// then replay the save-time passes.
    pub fn document_renamed(
        &mut self,
        old_path: &Path,
        new_path: &Path,
        view: ViewHandle,
    ) -> Result<Option<AppliedSet>, NormalizationError> {
        let policy = self.resolve_policy(new_path);
        self.registry.rename(old_path, new_path, view, policy);
        self.apply_to_file(new_path)
    }

    pub fn before_save(&mut self, path: &Path) -> Result<Option<AppliedSet>, NormalizationError> {
        self.apply_to_file(path)
    }

    pub fn focus_gained(
        &mut self,
        view: ViewHandle,
    ) -> Result<Option<AppliedSet>, NormalizationError> {
        let Some(path) = self.registry.path_of_view(view).map(Path::to_path_buf) else {
            return Ok(None);
        };
        self.apply_to_file(&path)
    }

    /// Replays the touch-up passes against one representative view of the
    /// file. Notifications for unmonitored documents (icon editors, other
    /// non-text views) land here too; ignoring them is expected, not an
    /// error.
    pub fn apply_to_file(&mut self, path: &Path) -> Result<Option<AppliedSet>, NormalizationError> {
        let Some(entry) = self.registry.lookup(path) else {
            return Ok(None);
        };
        let policy = entry.policy().clone();
        let Some(view) = entry.representative_view() else {
            return Ok(None);
        };
        let Some(snapshot) = self.host.current_snapshot(view) else {
            return Ok(None);
        };
        session::normalize(&mut self.host, path, &snapshot, &policy, PassSet::Touchup).map(Some)
    }

    /// Resolution failure surfaces one diagnostic per document and leaves
    /// the document untouched (empty policy). The diagnostic clears the
    /// next time the document resolves cleanly.
    fn resolve_policy(&mut self, path: &Path) -> Policy {
        match self.resolver.resolve(path) {
            Ok(policy) => {
                if self.diagnostics.mark_resolved(path) {
                    self.host.clear_diagnostics(path);
                }
                policy
            }
            Err(error) => {
                if self.diagnostics.should_surface(path) {
                    let diagnostic = Diagnostic::from_resolve_error(path, &error);
                    self.host.surface_diagnostic(&diagnostic);
                }
                Policy::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    use crate::policy::{CharsetKind, EndOfLineKind, IndentStyle, ResolveError};
    use crate::snapshot::{Edit, Snapshot};
    use crate::session::HostError;

    struct MapResolver {
        policies: HashMap<PathBuf, Result<Policy, ResolveError>>,
    }

    impl MapResolver {
        fn single(path: &str, policy: Policy) -> Self {
            let mut policies = HashMap::new();
            policies.insert(PathBuf::from(path), Ok(policy));
            Self { policies }
        }

        fn failing(path: &str, message: &str) -> Self {
            let mut policies = HashMap::new();
            policies.insert(
                PathBuf::from(path),
                Err(ResolveError {
                    path: PathBuf::from(".editorconfig"),
                    line: Some(1),
                    column: None,
                    message: message.into(),
                }),
            );
            Self { policies }
        }

        fn set(&mut self, path: &str, policy: Policy) {
            self.policies.insert(PathBuf::from(path), Ok(policy));
        }
    }

    impl ConfigResolver for MapResolver {
        fn resolve(&self, path: &Path) -> Result<Policy, ResolveError> {
            match self.policies.get(path) {
                Some(entry) => entry.clone(),
                None => Ok(Policy::default()),
            }
        }
    }

    #[derive(Default)]
    struct MockHost {
        buffers: HashMap<PathBuf, Snapshot>,
        views: HashMap<ViewHandle, PathBuf>,
        resaves: Vec<(PathBuf, CharsetKind)>,
        surfaced: Vec<Diagnostic>,
        cleared: Vec<PathBuf>,
    }

    impl MockHost {
        fn open(&mut self, path: &str, view: ViewHandle, text: &str) {
            self.buffers.insert(PathBuf::from(path), Snapshot::new(text));
            self.views.insert(view, PathBuf::from(path));
        }

        fn rename(&mut self, view: ViewHandle, old: &str, new: &str) {
            if let Some(buffer) = self.buffers.remove(Path::new(old)) {
                self.buffers.insert(PathBuf::from(new), buffer);
            }
            self.views.insert(view, PathBuf::from(new));
        }

        fn text(&self, path: &str) -> &str {
            self.buffers[Path::new(path)].text()
        }
    }

    impl EditorHost for MockHost {
        fn is_writable(&self, _path: &Path) -> bool {
            true
        }

        fn apply_transaction(
            &mut self,
            path: &Path,
            base_version: u64,
            edits: &[Edit],
        ) -> Result<(), HostError> {
            let buffer = self
                .buffers
                .get(path)
                .ok_or_else(|| HostError::Failed(format!("no buffer for {}", path.display())))?;
            if buffer.version() != base_version {
                return Err(HostError::Failed("stale snapshot version".into()));
            }
            let next = buffer
                .apply(edits)
                .map_err(|err| HostError::Failed(err.to_string()))?;
            self.buffers.insert(path.to_path_buf(), next);
            Ok(())
        }

        fn request_resave(&mut self, path: &Path, charset: CharsetKind) -> Result<(), HostError> {
            self.resaves.push((path.to_path_buf(), charset));
            Ok(())
        }

        fn current_snapshot(&self, view: ViewHandle) -> Option<Snapshot> {
            let path = self.views.get(&view)?;
            self.buffers.get(path).cloned()
        }

        fn default_end_of_line(&self) -> EndOfLineKind {
            EndOfLineKind::Lf
        }

        fn default_tab_width(&self) -> usize {
            4
        }

        fn surface_diagnostic(&mut self, diagnostic: &Diagnostic) {
            self.surfaced.push(diagnostic.clone());
        }

        fn clear_diagnostics(&mut self, path: &Path) {
            self.cleared.push(path.to_path_buf());
        }
    }

    fn full_policy() -> Policy {
        Policy {
            indent_style: IndentStyle::Space,
            indent_size: Some(2),
            tab_width: Some(4),
            end_of_line: Some(EndOfLineKind::Lf),
            insert_final_newline: Some(true),
            trim_trailing_whitespace: Some(true),
            ..Policy::default()
        }
    }

    #[test]
    fn open_runs_the_full_normalization() {
        let mut host = MockHost::default();
        host.open("a.txt", ViewHandle(1), "\tfoo  \r\nbar");
        let mut engine = Engine::new(MapResolver::single("a.txt", full_policy()), host);

        let outcome = engine
            .view_opened(Path::new("a.txt"), ViewHandle(1))
            .expect("normalize")
            .expect("monitored");
        assert!(outcome.changed_buffer());
        assert_eq!(engine.host().text("a.txt"), "  foo\nbar\n");
    }

    #[test]
    fn save_replays_only_the_touchup_passes() {
        let mut host = MockHost::default();
        host.open("a.txt", ViewHandle(1), "foo\n");
        let mut engine = Engine::new(MapResolver::single("a.txt", full_policy()), host);
        engine
            .view_opened(Path::new("a.txt"), ViewHandle(1))
            .expect("normalize");

        // The buffer drifts between save notifications.
        engine
            .host_mut()
            .buffers
            .insert(PathBuf::from("a.txt"), Snapshot::new("\tfoo  \nbar"));
        engine.before_save(Path::new("a.txt")).expect("normalize");
        // Trim and final newline run; indent conversion does not.
        assert_eq!(engine.host().text("a.txt"), "\tfoo\nbar\n");
    }

    #[test]
    fn save_for_an_unmonitored_document_is_silently_ignored() {
        let host = MockHost::default();
        let mut engine = Engine::new(MapResolver::single("a.txt", full_policy()), host);
        let outcome = engine.before_save(Path::new("other.bin")).expect("no error");
        assert!(outcome.is_none());
    }

    #[test]
    fn close_unregisters_and_later_saves_become_no_ops() {
        let mut host = MockHost::default();
        host.open("a.txt", ViewHandle(1), "foo");
        let mut engine = Engine::new(MapResolver::single("a.txt", full_policy()), host);
        engine
            .view_opened(Path::new("a.txt"), ViewHandle(1))
            .expect("normalize");
        engine.view_closed(Path::new("a.txt"), ViewHandle(1));
        assert!(engine.registry().is_empty());
        assert!(engine.before_save(Path::new("a.txt")).expect("no error").is_none());
    }

    #[test]
    fn rename_moves_monitoring_to_the_new_path() {
        let mut host = MockHost::default();
        host.open("old.txt", ViewHandle(1), "foo  ");
        let mut resolver = MapResolver::single("old.txt", Policy::default());
        resolver.set(
            "new.txt",
            Policy {
                trim_trailing_whitespace: Some(true),
                ..Policy::default()
            },
        );
        let mut engine = Engine::new(resolver, host);
        engine
            .view_opened(Path::new("old.txt"), ViewHandle(1))
            .expect("normalize");

        engine.host_mut().rename(ViewHandle(1), "old.txt", "new.txt");
        engine
            .document_renamed(Path::new("old.txt"), Path::new("new.txt"), ViewHandle(1))
            .expect("normalize");

        assert!(!engine.registry().is_monitored(Path::new("old.txt")));
        assert!(engine.registry().is_monitored(Path::new("new.txt")));
        // The rename replay already applied the new path's rules.
        assert_eq!(engine.host().text("new.txt"), "foo");
        assert!(engine.before_save(Path::new("old.txt")).expect("no error").is_none());
    }

    #[test]
    fn focus_on_a_registered_view_replays_touchup() {
        let mut host = MockHost::default();
        host.open("a.txt", ViewHandle(1), "foo  ");
        let mut engine = Engine::new(
            MapResolver::single(
                "a.txt",
                Policy {
                    trim_trailing_whitespace: Some(true),
                    ..Policy::default()
                },
            ),
            host,
        );
        engine
            .view_opened(Path::new("a.txt"), ViewHandle(1))
            .expect("normalize");
        assert_eq!(engine.host().text("a.txt"), "foo");
        assert!(engine.focus_gained(ViewHandle(1)).expect("no error").is_some());
        assert!(engine.focus_gained(ViewHandle(9)).expect("no error").is_none());
    }

    #[test]
    fn resolver_failure_surfaces_one_diagnostic_and_leaves_text_alone() {
        let mut host = MockHost::default();
        host.open("a.txt", ViewHandle(1), "foo  ");
        host.open("a.txt", ViewHandle(2), "foo  ");
        let mut engine = Engine::new(MapResolver::failing("a.txt", "bad glob"), host);

        let outcome = engine
            .view_opened(Path::new("a.txt"), ViewHandle(1))
            .expect("no error")
            .expect("monitored");
        assert!(outcome.is_empty());
        assert_eq!(engine.host().text("a.txt"), "foo  ");
        assert_eq!(engine.host().surfaced.len(), 1);

        // A second view of the same document does not repeat the message.
        engine
            .view_opened(Path::new("a.txt"), ViewHandle(2))
            .expect("no error");
        assert_eq!(engine.host().surfaced.len(), 1);
    }

    #[test]
    fn diagnostic_clears_once_the_document_resolves_again() {
        let mut host = MockHost::default();
        host.open("a.txt", ViewHandle(1), "foo");
        let mut engine = Engine::new(MapResolver::failing("a.txt", "bad glob"), host);
        engine
            .view_opened(Path::new("a.txt"), ViewHandle(1))
            .expect("no error");
        assert_eq!(engine.host().surfaced.len(), 1);

        engine.resolver.set("a.txt", Policy::default());
        engine.host_mut().rename(ViewHandle(1), "a.txt", "a.txt");
        engine
            .document_renamed(Path::new("a.txt"), Path::new("a.txt"), ViewHandle(1))
            .expect("no error");
        assert_eq!(engine.host().cleared, vec![PathBuf::from("a.txt")]);
    }
}
