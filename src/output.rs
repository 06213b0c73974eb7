//! Results returned by [`crate::convert`] and [`crate::inspect`].

use crate::pipeline::extract::{BlockKind, MultiFigureBlock, SubImage};
use crate::pipeline::labels::{Label, LabelRegistry};
use crate::pipeline::scan::FigurePackage;
use serde::Serialize;
use std::path::PathBuf;

/// A finished conversion.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    /// The Word document, at its final location.
    pub output_path: PathBuf,
    /// The LaTeX handed to pandoc.
    pub latex: String,
    pub blocks: Vec<BlockSummary>,
    pub labels: Vec<Label>,
    pub stats: ConversionStats,
    /// Scratch directory, when kept for debugging.
    pub scratch_dir: Option<PathBuf>,
}

/// What happened to one flattened block.
#[derive(Debug, Clone, Serialize)]
pub struct BlockSummary {
    pub kind: BlockKind,
    pub line: usize,
    pub label: Option<String>,
    pub synthetic_label: bool,
    pub caption: Option<String>,
    pub sub_images: Vec<SubImage>,
    /// Image path as referenced from the rewritten document.
    pub image: String,
}

impl BlockSummary {
    pub fn new(block: &MultiFigureBlock, image: String) -> Self {
        Self {
            kind: block.kind,
            line: block.line,
            label: block.parent.clone(),
            synthetic_label: block.synthetic_parent,
            caption: block.caption.clone(),
            sub_images: block.sub_images.clone(),
            image,
        }
    }
}

/// Counters and timings for a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionStats {
    pub figures_found: usize,
    pub multi_figures: usize,
    pub tables_flattened: usize,
    pub labels_registered: usize,
    pub references: usize,
    pub references_rewritten: usize,
    pub numbering_directives_removed: usize,
    pub included_files: usize,
    pub rasterize_duration_ms: u64,
    pub pandoc_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Tool-free analysis of a document (`inspect`).
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub input: PathBuf,
    pub figure_package: FigurePackage,
    pub has_cjk: bool,
    pub graphics_paths: Vec<String>,
    pub included_files: Vec<PathBuf>,
    pub figures: usize,
    pub tables: usize,
    pub equations: usize,
    /// Blocks that a conversion would flatten, with the stem it would use.
    pub blocks: Vec<(String, BlockSummary)>,
    pub labels: Vec<Label>,
}

pub(crate) fn labels_of(registry: &LabelRegistry) -> Vec<Label> {
    registry.iter().cloned().collect()
}
