use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IndentStyle {
    Tab,
    Space,
    #[default]
    #[value(skip)]
    Unset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EndOfLineKind {
    Lf,
    Cr,
    #[value(name = "crlf")]
    CrLf,
}

impl EndOfLineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EndOfLineKind::Lf => "\n",
            EndOfLineKind::Cr => "\r",
            EndOfLineKind::CrLf => "\r\n",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EndOfLineKind::Lf => "lf",
            EndOfLineKind::Cr => "cr",
            EndOfLineKind::CrLf => "crlf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
pub enum CharsetKind {
    #[serde(rename = "latin1")]
    #[value(name = "latin1")]
    Latin1,
    #[serde(rename = "utf-8")]
    #[value(name = "utf-8")]
    Utf8,
    #[serde(rename = "utf-8-bom")]
    #[value(name = "utf-8-bom")]
    Utf8Bom,
    #[serde(rename = "utf-16le")]
    #[value(name = "utf-16le")]
    Utf16Le,
    #[serde(rename = "utf-16be")]
    #[value(name = "utf-16be")]
    Utf16Be,
}

impl CharsetKind {
    pub fn label(self) -> &'static str {
        match self {
            CharsetKind::Latin1 => "latin1",
            CharsetKind::Utf8 => "utf-8",
            CharsetKind::Utf8Bom => "utf-8-bom",
            CharsetKind::Utf16Le => "utf-16le",
            CharsetKind::Utf16Be => "utf-16be",
        }
    }
}

/// Resolved per-file formatting rules. Absent fields mean "no opinion":
/// the editor default stays in effect and the matching pass does not run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Policy {
    pub indent_style: IndentStyle,
    pub indent_size: Option<usize>,
    pub tab_width: Option<usize>,
    pub end_of_line: Option<EndOfLineKind>,
    pub insert_final_newline: Option<bool>,
    pub trim_trailing_whitespace: Option<bool>,
    pub charset: Option<CharsetKind>,
}

impl Policy {
    pub fn from_properties(props: &Properties) -> Self {
        Self {
            indent_style: props.indent_style(),
            indent_size: props.positive_int("indent_size"),
            tab_width: props.positive_int("tab_width"),
            end_of_line: props.end_of_line(),
            insert_final_newline: props.bool_key("insert_final_newline"),
            trim_trailing_whitespace: props.bool_key("trim_trailing_whitespace"),
            charset: props.charset(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indent_style == IndentStyle::Unset
            && self.indent_size.is_none()
            && self.tab_width.is_none()
            && self.end_of_line.is_none()
            && self.insert_final_newline.is_none()
            && self.trim_trailing_whitespace.is_none()
            && self.charset.is_none()
    }

    /// tab_width falls back to indent_size, then to the host default.
    pub fn resolved_tab_width(&self, host_default: usize) -> usize {
        self.tab_width.or(self.indent_size).unwrap_or(host_default)
    }
}

/// Ordered property map handed over by the external config resolver.
/// Accessors are lenient: unknown or malformed values read as "no opinion".
#[derive(Debug, Clone, Default)]
pub struct Properties(Vec<(String, String)>);

impl Properties {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if let Some(slot) = self.0.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value.into();
        } else {
            self.0.push((name, value.into()));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn indent_style(&self) -> IndentStyle {
        match self.get("indent_style") {
            Some("tab") => IndentStyle::Tab,
            Some("space") => IndentStyle::Space,
            _ => IndentStyle::Unset,
        }
    }

    pub fn end_of_line(&self) -> Option<EndOfLineKind> {
        match self.get("end_of_line") {
            Some("lf") => Some(EndOfLineKind::Lf),
            Some("cr") => Some(EndOfLineKind::Cr),
            Some("crlf") => Some(EndOfLineKind::CrLf),
            _ => None,
        }
    }

    pub fn charset(&self) -> Option<CharsetKind> {
        match self.get("charset") {
            Some("latin1") => Some(CharsetKind::Latin1),
            Some("utf-8") => Some(CharsetKind::Utf8),
            Some("utf-8-bom") => Some(CharsetKind::Utf8Bom),
            Some("utf-16le") => Some(CharsetKind::Utf16Le),
            Some("utf-16be") => Some(CharsetKind::Utf16Be),
            _ => None,
        }
    }

    pub fn bool_key(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some("true") => Some(true),
            Some("false") => Some(false),
            _ => None,
        }
    }

    pub fn positive_int(&self, name: &str) -> Option<usize> {
        self.get(name)
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
    }
}

impl FromIterator<(String, String)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (name, value) in iter {
            props.insert(name, value);
        }
        props
    }
}

/// Supplies the resolved rules for a file path. Implemented by the host;
/// the engine never reads configuration files itself.
pub trait ConfigResolver {
    fn resolve(&self, path: &Path) -> Result<Policy, ResolveError>;
}

/// Malformed configuration, surfaced as a diagnostic with file position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveError {
    pub path: PathBuf,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(
                f,
                "{}:{line}:{column}: {}",
                self.path.display(),
                self.message
            ),
            (Some(line), None) => write!(f, "{}:{line}: {}", self.path.display(), self.message),
            _ => write!(f, "{}: {}", self.path.display(), self.message),
        }
    }
}

impl std::error::Error for ResolveError {}
