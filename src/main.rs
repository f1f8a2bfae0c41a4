use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use encoding_rs::{Encoding, UTF_8, UTF_16BE, UTF_16LE};
use is_terminal::IsTerminal;
use serde::Serialize;
use time::OffsetDateTime;

use editnorm::diagnostics::Diagnostic;
use editnorm::diff;
use editnorm::encoding::{self, EncodingStrategy};
use editnorm::engine::Engine;
use editnorm::files::{self, FileEntry};
use editnorm::logging::{self, record_change};
use editnorm::policy::{
    CharsetKind, ConfigResolver, EndOfLineKind, IndentStyle, Policy, ResolveError,
};
use editnorm::registry::ViewHandle;
use editnorm::session::{self, AppliedSet, EditorHost, HostError};
use editnorm::snapshot::{Edit, Snapshot};

const DEFAULT_TAB_WIDTH: usize = 4;

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq, Default)]
enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    fn should_color(self) -> bool {
        match self {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => io::stdout().is_terminal(),
        }
    }
}

fn system_default_line_ending() -> EndOfLineKind {
    if cfg!(windows) {
        EndOfLineKind::CrLf
    } else {
        EndOfLineKind::Lf
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Fix(cmd) => handle_fix(cmd)?,
        Command::Check(cmd) => handle_check(cmd)?,
        Command::Log(cmd) => handle_log(cmd)?,
    }

    Ok(())
}

/// Stands in for the external config resolver: every file gets the rules
/// assembled from the command line. Parsing configuration files is somebody
/// else's job.
struct FlagResolver {
    policy: Policy,
}

impl ConfigResolver for FlagResolver {
    fn resolve(&self, _path: &Path) -> Result<Policy, ResolveError> {
        Ok(self.policy.clone())
    }
}

/// The CLI's editor stand-in: one in-memory buffer per opened file, edit
/// transactions applied against it, charset re-save requests parked until
/// the file is written out.
#[derive(Default)]
struct FsHost {
    buffers: HashMap<PathBuf, Snapshot>,
    views: HashMap<ViewHandle, PathBuf>,
    resaves: HashMap<PathBuf, CharsetKind>,
}

impl FsHost {
    fn open_view(&mut self, view: ViewHandle, path: &Path, text: &str) {
        self.buffers.insert(path.to_path_buf(), Snapshot::new(text));
        self.views.insert(view, path.to_path_buf());
    }

    fn close_view(&mut self, view: ViewHandle, path: &Path) {
        self.views.remove(&view);
        self.buffers.remove(path);
        self.resaves.remove(path);
    }

    fn text(&self, path: &Path) -> Option<&str> {
        self.buffers.get(path).map(Snapshot::text)
    }

    fn resave_charset(&self, path: &Path) -> Option<CharsetKind> {
        self.resaves.get(path).copied()
    }
}

impl EditorHost for FsHost {
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
            .ok_or_else(|| HostError::Failed(format!("no open buffer for {}", path.display())))?;
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
        self.resaves.insert(path.to_path_buf(), charset);
        Ok(())
    }

    fn current_snapshot(&self, view: ViewHandle) -> Option<Snapshot> {
        let path = self.views.get(&view)?;
        self.buffers.get(path).cloned()
    }

    fn default_end_of_line(&self) -> EndOfLineKind {
        system_default_line_ending()
    }

    fn default_tab_width(&self) -> usize {
        DEFAULT_TAB_WIDTH
    }

    fn surface_diagnostic(&mut self, diagnostic: &Diagnostic) {
        let position = match (diagnostic.line, diagnostic.column) {
            (Some(line), Some(column)) => format!(":{line}:{column}"),
            (Some(line), None) => format!(":{line}"),
            _ => String::new(),
        };
        eprintln!(
            "config error: {}{position}: {}",
            diagnostic.path.display(),
            diagnostic.message
        );
    }

    fn clear_diagnostics(&mut self, _path: &Path) {
        // Console output cannot be withdrawn.
    }
}

fn handle_fix(cmd: FixCommand) -> Result<()> {
    let colorize = cmd.common.color.should_color();
    let policy = cmd.rules.to_policy()?;
    let entries = resolve_entries(&cmd.common)?;
    let encoding = resolve_encoding_strategy(&cmd.common)?;
    print_command_summary(
        "fix",
        &cmd.common,
        &encoding,
        &entries,
        &rule_details(&policy, cmd.apply, cmd.auto_apply),
    );

    let mut engine = Engine::new(FlagResolver { policy }, FsHost::default());
    let mut apply_all = cmd.auto_apply && cmd.apply;
    let mut stats = CommandStats::default();
    for (index, entry) in entries.iter().enumerate() {
        let Some(prepared) = prepare_entry(&mut engine, &encoding, entry, index, &mut stats)?
        else {
            continue;
        };

        if prepared.out_bytes == prepared.bytes {
            stats.no_op += 1;
            println!("no changes for {}", entry.path.display());
            emit_json_event(&cmd.common, "fix", &entry.path, "no-op", "no change");
            continue;
        }

        let line_summary = diff::summarize_lines(&prepared.old_text, &prepared.new_text);
        if prepared.new_text != prepared.old_text {
            println!("--- preview: {} ---", entry.path.display());
            diff::print_diff(
                &prepared.old_text,
                &prepared.new_text,
                cmd.common.context,
                colorize,
            )?;
        } else if let Some(charset) = prepared.resave {
            println!(
                "(no textual diff) {} will be rewritten as {}",
                entry.path.display(),
                charset.label()
            );
        }

        if !cmd.apply {
            stats.dry_run += 1;
            println!("dry-run: rerun with --apply to write this change.");
            log_change("fix", &entry.path, "dry-run", &line_summary);
            emit_json_event(&cmd.common, "fix", &entry.path, "dry-run", &line_summary);
            continue;
        }

        let decision = if apply_all {
            ApprovalDecision::Apply
        } else {
            prompt_approval(&entry.path)?
        };

        match decision {
            ApprovalDecision::Apply | ApprovalDecision::ApplyAll => {
                if matches!(decision, ApprovalDecision::ApplyAll) {
                    apply_all = true;
                }
                write_file(&entry.path, &prepared.out_bytes, cmd.no_backup)?;
                stats.applied += 1;
                println!("applied {}", entry.path.display());
                log_change("fix", &entry.path, "applied", &line_summary);
                emit_json_event(&cmd.common, "fix", &entry.path, "applied", &line_summary);
            }
            ApprovalDecision::Skip => {
                stats.skipped += 1;
                log_change("fix", &entry.path, "skipped", &line_summary);
                emit_json_event(&cmd.common, "fix", &entry.path, "skipped", &line_summary);
            }
            ApprovalDecision::Quit => {
                stats.skipped += 1;
                println!("quitting at user request");
                break;
            }
        }
    }

    stats.print("fix");
    Ok(())
}

fn handle_check(cmd: CheckCommand) -> Result<()> {
    let policy = cmd.rules.to_policy()?;
    let entries = resolve_entries(&cmd.common)?;
    let encoding = resolve_encoding_strategy(&cmd.common)?;
    print_command_summary(
        "check",
        &cmd.common,
        &encoding,
        &entries,
        &rule_details(&policy, false, false),
    );

    let mut engine = Engine::new(FlagResolver { policy }, FsHost::default());
    let mut stats = CommandStats::default();
    let mut dirty = 0usize;
    let mut scanned = 0usize;
    for (index, entry) in entries.iter().enumerate() {
        let Some(prepared) = prepare_entry(&mut engine, &encoding, entry, index, &mut stats)?
        else {
            continue;
        };

        scanned += 1;
        let clean = prepared.out_bytes == prepared.bytes;
        if !clean {
            dirty += 1;
        }

        if cmd.common.json {
            let row = CheckRow {
                path: entry.path.display().to_string(),
                clean,
                passes: &prepared.outcome.passes,
                skipped_edits: prepared.outcome.skipped_edits,
                charset: prepared.outcome.charset,
            };
            println!("{}", serde_json::to_string(&row)?);
        } else if clean {
            println!("{} -> clean", entry.path.display());
        } else {
            println!(
                "{} -> {}",
                entry.path.display(),
                describe_outcome(&prepared.outcome)
            );
        }
    }

    println!("{dirty} of {scanned} files need normalization");
    if dirty > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn handle_log(cmd: LogCommand) -> Result<()> {
    let lines = logging::read_recent(cmd.limit)?;
    if lines.is_empty() {
        println!("change log is empty");
        return Ok(());
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

/// Per-file state shared by fix and check: the decoded input, the engine's
/// normalized output, and the bytes a write would produce.
struct PreparedFile {
    bytes: Vec<u8>,
    old_text: String,
    new_text: String,
    resave: Option<CharsetKind>,
    outcome: AppliedSet,
    out_bytes: Vec<u8>,
}

fn prepare_entry(
    engine: &mut Engine<FlagResolver, FsHost>,
    encoding: &EncodingStrategy,
    entry: &FileEntry,
    index: usize,
    stats: &mut CommandStats,
) -> Result<Option<PreparedFile>> {
    if entry.metadata.is_probably_binary {
        println!("skipping {} (suspected binary file)", entry.path.display());
        stats.skipped += 1;
        return Ok(None);
    }

    let bytes =
        fs::read(&entry.path).with_context(|| format!("reading {}", entry.path.display()))?;
    let decoded = encoding.decode(&bytes);
    if decoded.had_errors {
        println!(
            "warning: decoding errors encountered for {}; continuing",
            entry.path.display()
        );
    }

    let view = ViewHandle(index as u64 + 1);
    engine.host_mut().open_view(view, &entry.path, &decoded.text);
    let outcome = match engine.view_opened(&entry.path, view) {
        Ok(Some(outcome)) => outcome,
        Ok(None) => {
            engine.view_closed(&entry.path, view);
            engine.host_mut().close_view(view, &entry.path);
            return Ok(None);
        }
        Err(err) => {
            eprintln!("error normalizing {}: {err}", entry.path.display());
            engine.view_closed(&entry.path, view);
            engine.host_mut().close_view(view, &entry.path);
            stats.skipped += 1;
            return Ok(None);
        }
    };

    // Replay the save-time subset the way a host would right before
    // writing; on a freshly normalized buffer this settles to a no-op.
    if let Err(err) = engine.before_save(&entry.path) {
        eprintln!("error normalizing {}: {err}", entry.path.display());
    }

    let new_text = engine
        .host()
        .text(&entry.path)
        .unwrap_or(&decoded.text)
        .to_string();
    let resave = engine.host().resave_charset(&entry.path);
    engine.view_closed(&entry.path, view);
    engine.host_mut().close_view(view, &entry.path);

    let target_charset = resave.or_else(|| source_charset_of(&bytes, decoded.decision.encoding));
    let out_bytes = encode_for_write(&new_text, target_charset, decoded.decision.encoding);

    Ok(Some(PreparedFile {
        bytes,
        old_text: decoded.text,
        new_text,
        resave,
        outcome,
        out_bytes,
    }))
}

/// Charset the file is already stored in, when writing plain text back
/// would lose it (UTF-16 units, a UTF-8 BOM).
fn source_charset_of(bytes: &[u8], source: &'static Encoding) -> Option<CharsetKind> {
    if source == UTF_16LE {
        Some(CharsetKind::Utf16Le)
    } else if source == UTF_16BE {
        Some(CharsetKind::Utf16Be)
    } else if source == UTF_8 && bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        Some(CharsetKind::Utf8Bom)
    } else {
        None
    }
}

fn encode_for_write(text: &str, charset: Option<CharsetKind>, source: &'static Encoding) -> Vec<u8> {
    match charset {
        Some(charset) => encoding::encode_text(text, charset),
        None => source.encode(text).0.into_owned(),
    }
}

fn describe_outcome(outcome: &AppliedSet) -> String {
    let mut parts: Vec<String> = outcome
        .passes
        .iter()
        .filter(|pass| pass.edits > 0)
        .map(|pass| format!("{}: {} edits", pass.kind.label(), pass.edits))
        .collect();
    if let Some(charset) = outcome.charset {
        parts.push(format!("charset: {}", charset.label()));
    }
    if parts.is_empty() {
        "needs rewrite".to_string()
    } else {
        parts.join(", ")
    }
}

fn rule_details(policy: &Policy, apply: bool, auto_apply: bool) -> Vec<String> {
    let mut details = vec![format!(
        "mode={}{}",
        if apply { "apply" } else { "dry-run" },
        if auto_apply { " (auto-approve)" } else { "" }
    )];
    match policy.indent_style {
        IndentStyle::Tab => details.push("indent_style=tab".to_string()),
        IndentStyle::Space => details.push("indent_style=space".to_string()),
        IndentStyle::Unset => {}
    }
    if let Some(size) = policy.indent_size {
        details.push(format!("indent_size={size}"));
    }
    if let Some(width) = policy.tab_width {
        details.push(format!("tab_width={width}"));
    }
    if let Some(eol) = policy.end_of_line {
        details.push(format!("end_of_line={}", eol.label()));
    }
    if let Some(insert) = policy.insert_final_newline {
        details.push(format!("insert_final_newline={insert}"));
    }
    if policy.trim_trailing_whitespace == Some(true) {
        details.push("trim_trailing_whitespace=true".to_string());
    }
    if let Some(charset) = policy.charset {
        details.push(format!("charset={}", charset.label()));
    }
    details
}

fn print_command_summary(
    command: &str,
    common: &CommonArgs,
    encoding: &EncodingStrategy,
    entries: &[FileEntry],
    details: &[String],
) {
    println!("command: {command}");
    if !common.targets.is_empty() {
        println!("targets:");
        for target in &common.targets {
            println!("  - {}", target.display());
        }
    } else {
        println!("targets: (none)");
    }
    if !common.globs.is_empty() {
        println!("globs:");
        for glob in &common.globs {
            println!("  - {glob}");
        }
    }
    println!("encoding strategy: {}", encoding.describe());
    println!("context lines: {}", common.context);
    println!("json output: {}", common.json);
    println!("include hidden: {}", common.include_hidden);
    if !common.exclude.is_empty() {
        println!("exclude globs: {:?}", common.exclude);
    }

    if entries.is_empty() {
        println!("resolved files: (none)");
    } else {
        println!("resolved files ({}):", entries.len());
        for entry in entries.iter().take(10) {
            let binary_hint = if entry.metadata.is_probably_binary {
                ", binary? yes"
            } else {
                ""
            };
            println!(
                "  - {} ({} bytes{})",
                entry.path.display(),
                entry.metadata.len,
                binary_hint
            );
        }
        if entries.len() > 10 {
            println!("  ...");
        }
    }
    for detail in details {
        println!("{detail}");
    }
    println!("---");
}

fn resolve_entries(common: &CommonArgs) -> Result<Vec<FileEntry>> {
    files::resolve_targets(
        &common.targets,
        &common.globs,
        common.include_hidden,
        &common.exclude,
    )
}

fn resolve_encoding_strategy(common: &CommonArgs) -> Result<EncodingStrategy> {
    EncodingStrategy::new(common.encoding.as_deref())
}

fn log_change(command: &str, path: &Path, action: &str, detail: &str) {
    if let Err(err) = record_change(command, path, action, detail) {
        eprintln!("warning: unable to record change log entry: {err}");
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    command: &'a str,
    path: String,
    action: &'a str,
    detail: &'a str,
}

fn emit_json_event(common: &CommonArgs, command: &str, path: &Path, action: &str, detail: &str) {
    if !common.json {
        return;
    }
    let event = JsonEvent {
        command,
        path: path.display().to_string(),
        action,
        detail,
    };
    match serde_json::to_string(&event) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("warning: unable to serialize event: {err}"),
    }
}

#[derive(Serialize)]
struct CheckRow<'a> {
    path: String,
    clean: bool,
    passes: &'a [session::PassOutcome],
    skipped_edits: usize,
    charset: Option<CharsetKind>,
}

#[derive(Debug, Clone, Copy)]
enum ApprovalDecision {
    Apply,
    Skip,
    ApplyAll,
    Quit,
}

fn prompt_approval(path: &Path) -> Result<ApprovalDecision> {
    loop {
        print_prompt(&format!(
            "Apply change to {}? [y]es/[n]o/[a]ll/[q]uit: ",
            path.display()
        ))?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        match input.trim().to_lowercase().as_str() {
            "y" | "yes" | "" => return Ok(ApprovalDecision::Apply),
            "n" | "no" => return Ok(ApprovalDecision::Skip),
            "a" | "all" => return Ok(ApprovalDecision::ApplyAll),
            "q" | "quit" => return Ok(ApprovalDecision::Quit),
            _ => {
                println!("Please enter y, n, a, or q.");
            }
        }
    }
}

fn print_prompt(message: &str) -> Result<()> {
    print!("{message}");
    io::stdout().flush()?;
    Ok(())
}

fn write_file(path: &Path, data: &[u8], no_backup: bool) -> Result<()> {
    if let Some(backup) = create_backup_if_needed(path, no_backup)? {
        println!("backup saved: {} -> {}", path.display(), backup.display());
    }
    write_via_temp(path, data)
}

fn create_backup_if_needed(path: &Path, no_backup: bool) -> Result<Option<PathBuf>> {
    if no_backup || !path.exists() {
        return Ok(None);
    }
    for index in 0..100 {
        let candidate = backup_path(path, index);
        if !candidate.exists() {
            fs::copy(path, &candidate)
                .with_context(|| format!("backing up {}", path.display()))?;
            return Ok(Some(candidate));
        }
    }
    bail!("unable to find a free backup name for {}", path.display())
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("editnorm_file");
    let suffix = if index == 0 {
        ".bak".to_string()
    } else {
        format!(".bak{index}")
    };
    path.with_file_name(format!("{name}{suffix}"))
}

fn write_via_temp(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = parent {
        fs::create_dir_all(dir).with_context(|| format!("creating directory {}", dir.display()))?;
    }
    let base_dir = parent.unwrap_or_else(|| Path::new("."));
    let unique = format!(
        ".editnorm-tmp-{}-{}",
        std::process::id(),
        OffsetDateTime::now_utc().unix_timestamp_nanos()
    );
    let temp_path = base_dir.join(unique);
    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("creating temp file {}", temp_path.display()))?;
        file.write_all(data)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("syncing temp file {}", temp_path.display()))?;
    }
    fs::rename(&temp_path, path).or_else(|err| {
        let _ = fs::remove_file(&temp_path);
        Err(err).with_context(|| format!("replacing {}", path.display()))
    })?;
    Ok(())
}

#[derive(Default)]
struct CommandStats {
    applied: usize,
    skipped: usize,
    dry_run: usize,
    no_op: usize,
}

impl CommandStats {
    fn print(&self, label: &str) {
        let total = self.applied + self.skipped + self.dry_run + self.no_op;
        if total == 0 {
            return;
        }
        println!(
            "{label} summary: applied={}, skipped={}, dry-run={}, no-op={}",
            self.applied, self.skipped, self.dry_run, self.no_op
        );
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "editnorm",
    version,
    about = "Editor-style text formatting normalizer"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Normalize files toward the given rules (dry-run unless --apply).
    Fix(FixCommand),
    /// Report which files the rules would change, without writing.
    Check(CheckCommand),
    /// Show recent change log entries.
    Log(LogCommand),
}

#[derive(Debug, Clone, Args)]
struct CommonArgs {
    #[arg(long = "glob", value_name = "GLOB")]
    globs: Vec<String>,
    #[arg(long = "target", value_name = "PATH", value_hint = ValueHint::AnyPath)]
    targets: Vec<PathBuf>,
    #[arg(long, value_name = "ENCODING")]
    encoding: Option<String>,
    #[arg(long, default_value_t = 3)]
    context: usize,
    #[arg(long = "color", value_enum, default_value = "auto")]
    color: ColorChoice,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
    #[arg(long = "include-hidden", action = ArgAction::SetTrue)]
    include_hidden: bool,
    #[arg(long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,
}

#[derive(Debug, Clone, Args)]
struct RuleArgs {
    #[arg(long = "indent-style", value_enum, value_name = "STYLE")]
    indent_style: Option<IndentStyle>,
    #[arg(long = "indent-size", value_name = "N")]
    indent_size: Option<usize>,
    #[arg(long = "tab-width", value_name = "N")]
    tab_width: Option<usize>,
    #[arg(long = "eol", value_enum, value_name = "KIND")]
    eol: Option<EndOfLineKind>,
    #[arg(long = "final-newline", value_name = "BOOL")]
    final_newline: Option<bool>,
    #[arg(long = "trim", action = ArgAction::SetTrue)]
    trim: bool,
    #[arg(long = "charset", value_enum, value_name = "CHARSET")]
    charset: Option<CharsetKind>,
}

impl RuleArgs {
    fn to_policy(&self) -> Result<Policy> {
        if self.indent_size == Some(0) || self.tab_width == Some(0) {
            bail!("--indent-size and --tab-width must be positive");
        }
        let policy = Policy {
            indent_style: self.indent_style.unwrap_or(IndentStyle::Unset),
            indent_size: self.indent_size,
            tab_width: self.tab_width,
            end_of_line: self.eol,
            insert_final_newline: self.final_newline,
            trim_trailing_whitespace: self.trim.then_some(true),
            charset: self.charset,
        };
        if policy.is_empty() {
            bail!(
                "no formatting rules given; pass at least one of --indent-style, \
                 --indent-size, --tab-width, --eol, --final-newline, --trim, --charset"
            );
        }
        Ok(policy)
    }
}

#[derive(Debug, Args)]
struct FixCommand {
    #[command(flatten)]
    common: CommonArgs,
    #[command(flatten)]
    rules: RuleArgs,
    #[arg(long, action = ArgAction::SetTrue)]
    apply: bool,
    #[arg(long = "yes", action = ArgAction::SetTrue)]
    auto_apply: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    no_backup: bool,
}

#[derive(Debug, Args)]
struct CheckCommand {
    #[command(flatten)]
    common: CommonArgs,
    #[command(flatten)]
    rules: RuleArgs,
}

#[derive(Debug, Args)]
struct LogCommand {
    #[arg(long, default_value_t = 20)]
    limit: usize,
}
