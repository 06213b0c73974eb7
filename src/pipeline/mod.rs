//! Pipeline stages for LaTeX-to-Word conversion.
//!
//! Each submodule implements one transformation step and is testable on its
//! own; only [`rasterize`] and the orchestrator in [`crate::convert`] run
//! external programs.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ scan/layout ──▶ labels ──▶ extract ──▶ rasterize ──▶ rewrite ──▶ pandoc
//! (copy)    (structure)     (registry)  (blocks)    (xelatex)     (refs)      (docx)
//! ```
//!
//! 1. [`input`]    : scratch workspace, working copy, comment stripping and
//!    include expansion
//! 2. [`scan`]     : brace-aware command/environment scanner
//! 3. [`layout`]   : figures with their panels, tables, equations
//! 4. [`labels`]   : registration pass: every label gets a kind and a number
//! 5. [`extract`]  : multi-figure blocks, asset checks, standalone documents
//! 6. [`rasterize`]: standalone document → PDF → PNG
//! 7. [`rewrite`]  : block replacement, reference rewriting and validation
//! 8. [`pandoc`]   : the final conversion command line

pub mod extract;
pub mod input;
pub mod labels;
pub mod layout;
pub mod pandoc;
pub mod rasterize;
pub mod rewrite;
pub mod scan;
