//! Typeset each standalone block document and turn it into a PNG.
//!
//! ```text
//! <stem>.tex ──xelatex──▶ <stem>.pdf ──pdftocairo -png -singlefile──▶ <stem>.png
//! ```
//!
//! Blocks are processed one at a time in document order. The PNG is decoded
//! far enough to read its dimensions, so a truncated or empty file fails here
//! rather than inside pandoc.

use crate::config::ConversionConfig;
use crate::error::{Tex2DocxError, ToolStage};
use crate::pipeline::extract::{self, BlockKind, MultiFigureBlock};
use crate::pipeline::layout::DocumentLayout;
use crate::templates::{render_float, DEFAULT_FIGURE_TEMPLATE, DEFAULT_TABLE_TEMPLATE};
use crate::tool::{run_checked, ToolInvocation, ToolRunner};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A block that now exists as one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlattenedImage {
    /// Index into the block list.
    pub block: usize,
    pub png: PathBuf,
    pub width_px: u32,
    pub height_px: u32,
    /// Float markup that replaces the block's source span.
    pub replacement: String,
}

/// Rasterise every block into `figure_dir`.
pub fn rasterize_all(
    blocks: &[MultiFigureBlock],
    layout: &DocumentLayout<'_>,
    config: &ConversionConfig,
    figure_dir: &Path,
    runner: &dyn ToolRunner,
) -> Result<Vec<FlattenedImage>, Tex2DocxError> {
    let total = blocks.len();
    let mut out = Vec::with_capacity(total);

    for (i, block) in blocks.iter().enumerate() {
        let subject = block.subject();
        if let Some(cb) = &config.progress_callback {
            cb.on_figure_start(&subject, i + 1, total);
        }

        extract::write_standalone(block, layout, config, figure_dir)?;
        let png = rasterize(block, config, figure_dir, runner)?;
        let (width_px, height_px) = image::image_dimensions(&png).map_err(|e| Tex2DocxError::ExternalTool {
            stage: ToolStage::Rasterize,
            tool: config.tools.pdf_to_png.clone(),
            subject: subject.clone(),
            status: "produced no readable PNG".to_string(),
            diagnostics: e.to_string(),
        })?;
        info!("Flattened {} → {} ({}x{} px)", subject, png.display(), width_px, height_px);

        if let Some(cb) = &config.progress_callback {
            cb.on_figure_complete(&subject, i + 1, total, &png);
        }
        out.push(FlattenedImage {
            block: i,
            replacement: replacement_markup(block, config),
            png,
            width_px,
            height_px,
        });
    }
    Ok(out)
}

/// Run the typesetter and the PDF rasteriser for one block.
fn rasterize(
    block: &MultiFigureBlock,
    config: &ConversionConfig,
    figure_dir: &Path,
    runner: &dyn ToolRunner,
) -> Result<PathBuf, Tex2DocxError> {
    let subject = block.subject();
    let tex = format!("{}.tex", block.stem);
    let pdf = format!("{}.pdf", block.stem);

    let latex = ToolInvocation::new(&config.tools.latex, figure_dir)
        .args(["-interaction=nonstopmode", "-halt-on-error"])
        .arg(&tex);
    run_checked(runner, &latex, ToolStage::Rasterize, &subject)?;
    if !figure_dir.join(&pdf).is_file() {
        return Err(Tex2DocxError::ExternalTool {
            stage: ToolStage::Rasterize,
            tool: config.tools.latex.clone(),
            subject,
            status: format!("did not produce {pdf}"),
            diagnostics: String::new(),
        });
    }

    let to_png = ToolInvocation::new(&config.tools.pdf_to_png, figure_dir)
        .args(["-png", "-singlefile", "-r"])
        .arg(config.dpi.to_string())
        .arg(&pdf)
        .arg(&block.stem);
    run_checked(runner, &to_png, ToolStage::Rasterize, &subject)?;

    let png = figure_dir.join(format!("{}.png", block.stem));
    debug!("Rasterised {} at {} DPI", png.display(), config.dpi);
    Ok(png)
}

/// Path of a block's image as written into the rewritten document.
pub fn image_reference(config: &ConversionConfig, block: &MultiFigureBlock) -> String {
    format!("{}/{}.png", config.figure_dir_name, block.stem)
}

fn replacement_markup(block: &MultiFigureBlock, config: &ConversionConfig) -> String {
    let template = match block.kind {
        BlockKind::Figure => config.figure_template.as_deref().unwrap_or(DEFAULT_FIGURE_TEMPLATE),
        BlockKind::Table => config.table_template.as_deref().unwrap_or(DEFAULT_TABLE_TEMPLATE),
    };
    render_float(
        template,
        &image_reference(config, block),
        block.caption.as_deref(),
        block.parent.as_deref(),
    )
}
