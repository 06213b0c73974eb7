//! # tex2docx
//!
//! Convert LaTeX documents to Word through pandoc, flattening multi-figure
//! (subfigure) environments into single images first so they survive the
//! conversion with their numbering intact.
//!
//! ## Why this crate?
//!
//! pandoc reads `\subfloat`, `subfigure` and friends poorly: panels come out
//! as loose images, sub-captions vanish and `\ref{fig:panel}` turns into
//! `??`. This crate typesets every multi-panel figure on its own page with
//! the document's own packages, rasterises it, swaps the float for a single
//! image and rewrites panel references as `Figure 3(b)`, so pandoc and
//! pandoc-crossref only ever see figures they understand.
//!
//! ## Pipeline Overview
//!
//! ```text
//! main.tex
//!  │
//!  ├─ 1. Prepare    copy the source tree into a scratch directory
//!  ├─ 2. Scan       strip comments, expand \include/\input, find floats
//!  ├─ 3. Register   number every label (figures, panels, tables, equations)
//!  ├─ 4. Extract    one standalone document per multi-figure; check images
//!  ├─ 5. Rasterise  xelatex → PDF → pdftocairo → PNG
//!  ├─ 6. Rewrite    replace floats, rewrite references, validate all of them
//!  └─ 7. Convert    pandoc + pandoc-crossref → .docx
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tex2docx::{convert, ConversionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::builder("paper/main.tex", "paper/main.docx")
//!         .csl("paper/ieee.csl")
//!         .build()?;
//!     let output = convert(&config)?;
//!     eprintln!(
//!         "{} figure(s) flattened, {} reference(s) rewritten",
//!         output.stats.multi_figures, output.stats.references_rewritten
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `tex2docx` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ## External programs
//!
//! `xelatex` and `pdftocairo` are needed only when the document has
//! multi-figures; `pandoc` (with `pandoc-crossref` unless disabled) always.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod templates;
pub mod tool;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, ToolPrograms};
pub use convert::{convert, convert_with_runner, inspect};
pub use error::{AssetKind, Tex2DocxError, ToolStage, UnresolvedReference};
pub use output::{BlockSummary, ConversionOutput, ConversionStats, InspectReport};
pub use pipeline::labels::{Label, LabelKind, LabelRegistry, Tag};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
pub use tool::{SystemToolRunner, ToolInvocation, ToolOutput, ToolRunner};
