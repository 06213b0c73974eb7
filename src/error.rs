//! Error types for the tex2docx library.
//!
//! Every variant of [`Tex2DocxError`] is **fatal**. A partially rewritten
//! document cannot guarantee consistent figure numbering, so the pipeline
//! never degrades to best-effort output: the first failing stage aborts the
//! run and its error is returned from [`crate::convert::convert`].
//!
//! The one place where errors are *collected* rather than short-circuited is
//! reference validation: [`Tex2DocxError::UnresolvedReferences`] carries every
//! dangling `\ref` in the document so the author can fix them in one go.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the tex2docx library.
#[derive(Debug, Error)]
pub enum Tex2DocxError {
    // ── Source errors ─────────────────────────────────────────────────────
    /// Unbalanced braces, unterminated environment or malformed command.
    #[error("Malformed {construct} near line {line}: {detail}")]
    Parse {
        construct: String,
        line: usize,
        detail: String,
    },

    /// The same `\label{…}` appears twice.
    #[error("Duplicate label '{label}' (line {first_line} and line {second_line})")]
    DuplicateLabel {
        label: String,
        first_line: usize,
        second_line: usize,
    },

    /// One or more references point at labels that do not exist.
    #[error(
        "{} unresolved reference(s): {}\nDefine the missing \\label{{…}} or fix the reference.",
        .references.len(),
        format_unresolved(.references)
    )]
    UnresolvedReferences { references: Vec<UnresolvedReference> },

    // ── Asset errors ──────────────────────────────────────────────────────
    /// A file the document or configuration depends on does not exist.
    #[error("{kind} not found: '{}'{}", .path.display(), format_figure(.figure))]
    AssetMissing {
        kind: AssetKind,
        path: PathBuf,
        /// Label of the figure that needed the asset, when there is one.
        figure: Option<String>,
    },

    // ── External tools ────────────────────────────────────────────────────
    /// A subprocess failed, could not be spawned or produced no output.
    #[error("{stage} failed for '{subject}': {tool} {status}\n{diagnostics}")]
    ExternalTool {
        stage: ToolStage,
        tool: String,
        /// Figure label or document name the invocation was about.
        subject: String,
        status: String,
        /// Tail of the tool's stdout/stderr.
        diagnostics: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or populate the scratch workspace.
    #[error("Scratch workspace error at '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not place the final Word document.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Tex2DocxError {
    /// Shorthand for a parse error.
    pub(crate) fn parse(construct: impl Into<String>, line: usize, detail: impl Into<String>) -> Self {
        Tex2DocxError::Parse {
            construct: construct.into(),
            line,
            detail: detail.into(),
        }
    }

    pub(crate) fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Tex2DocxError::Workspace {
            path: path.into(),
            source,
        }
    }
}

/// A reference whose target label was never registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedReference {
    pub label: String,
    pub line: usize,
}

/// What kind of file went missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssetKind {
    Document,
    Image,
    Bibliography,
    CitationStyle,
    ReferenceDoc,
    LuaFilter,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssetKind::Document => "LaTeX document",
            AssetKind::Image => "Image",
            AssetKind::Bibliography => "Bibliography file",
            AssetKind::CitationStyle => "Citation style file",
            AssetKind::ReferenceDoc => "Reference document",
            AssetKind::LuaFilter => "Lua filter",
        };
        f.write_str(s)
    }
}

/// Pipeline stage that shelled out to an external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToolStage {
    /// Standalone figure → PDF → PNG.
    Rasterize,
    /// Rewritten LaTeX → Word via pandoc.
    Convert,
}

impl fmt::Display for ToolStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolStage::Rasterize => f.write_str("Rasterisation"),
            ToolStage::Convert => f.write_str("Document conversion"),
        }
    }
}

fn format_unresolved(refs: &[UnresolvedReference]) -> String {
    refs.iter()
        .map(|r| format!("'{}' (line {})", r.label, r.line))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_figure(figure: &Option<String>) -> String {
    match figure {
        Some(label) => format!(" (needed by figure '{label}')"),
        None => String::new(),
    }
}
