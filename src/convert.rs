//! Conversion entry points.
//!
//! [`convert`] runs the whole pipeline with the real external tools;
//! [`convert_with_runner`] takes any [`ToolRunner`] (tests use a fake one);
//! [`inspect`] stops after analysis and never spawns a process.
//!
//! A run is all-or-nothing: the first fatal error aborts it, the scratch
//! directory is dropped with the [`input::Workspace`], and nothing is
//! written at the output path.

use crate::config::ConversionConfig;
use crate::error::{AssetKind, Tex2DocxError, ToolStage};
use crate::output::{labels_of, BlockSummary, ConversionOutput, ConversionStats, InspectReport};
use crate::pipeline::extract::{self, BlockKind};
use crate::pipeline::layout::DocumentLayout;
use crate::pipeline::{input, labels, pandoc, rasterize, rewrite};
use crate::progress::Stage;
use crate::tool::{run_checked, SystemToolRunner, ToolRunner};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Convert `config.input` to a Word document at `config.output`.
///
/// # Errors
/// Any [`Tex2DocxError`]; all of them are fatal.
pub fn convert(config: &ConversionConfig) -> Result<ConversionOutput, Tex2DocxError> {
    convert_with_runner(config, &SystemToolRunner)
}

/// [`convert`] with an injected tool runner.
pub fn convert_with_runner(
    config: &ConversionConfig,
    runner: &dyn ToolRunner,
) -> Result<ConversionOutput, Tex2DocxError> {
    let total_start = Instant::now();
    info!("Starting conversion: {} → {}", config.input.display(), config.output.display());

    // ── Step 1: Check configured files ───────────────────────────────────
    check_config_assets(config)?;

    // ── Step 2: Scratch workspace ────────────────────────────────────────
    stage(config, Stage::Prepare);
    let workspace = input::prepare_workspace(config)?;
    debug!("Working copy at {}", workspace.work_dir.display());

    // ── Step 3: Load, analyse, register labels ───────────────────────────
    stage(config, Stage::Scan);
    let doc = input::load_document(&workspace.input)?;
    let layout = DocumentLayout::analyze(&doc.text)?;
    let registry = labels::populate(&layout)?;

    // ── Step 4: Extract blocks, check every image up front ───────────────
    stage(config, Stage::Extract);
    let blocks = extract::collect_blocks(&layout, config)?;
    extract::check_assets(&layout, &blocks, &workspace.work_dir)?;

    // ── Step 5: Rasterise ────────────────────────────────────────────────
    stage(config, Stage::Rasterize);
    let raster_start = Instant::now();
    let images = rasterize::rasterize_all(&blocks, &layout, config, &workspace.figure_dir, runner)?;
    let rasterize_duration_ms = raster_start.elapsed().as_millis() as u64;

    // ── Step 6: Rewrite and validate references ──────────────────────────
    stage(config, Stage::Rewrite);
    let outcome = rewrite::rewrite(&doc.text, &registry, &blocks, &images)?;
    let tex_name = format!("{}_modified.tex", config.input_stem());
    let tex_path = workspace.work_dir.join(&tex_name);
    fs::write(&tex_path, &outcome.text).map_err(|e| Tex2DocxError::workspace(&tex_path, e))?;
    debug!("Wrote {}", tex_path.display());

    // ── Step 7: pandoc ───────────────────────────────────────────────────
    stage(config, Stage::Convert);
    let pandoc_start = Instant::now();
    let scratch_docx = workspace.root().join(format!("{}.docx", config.input_stem()));
    let invocation = pandoc::command(config, &workspace.work_dir, &tex_name, &scratch_docx, &layout.graphics_paths);
    run_checked(runner, &invocation, ToolStage::Convert, &tex_name)?;
    let produced = fs::metadata(&scratch_docx).map(|m| m.len()).unwrap_or(0);
    if produced == 0 {
        return Err(Tex2DocxError::ExternalTool {
            stage: ToolStage::Convert,
            tool: config.tools.pandoc.clone(),
            subject: tex_name,
            status: "produced no output".to_string(),
            diagnostics: String::new(),
        });
    }
    let pandoc_duration_ms = pandoc_start.elapsed().as_millis() as u64;

    // ── Step 8: Place the result ─────────────────────────────────────────
    place_output(&scratch_docx, &config.output)?;
    if let Some(cb) = &config.progress_callback {
        cb.on_conversion_complete(&config.output);
    }

    let stats = ConversionStats {
        figures_found: layout.figures.len(),
        multi_figures: blocks.iter().filter(|b| b.kind == BlockKind::Figure).count(),
        tables_flattened: blocks.iter().filter(|b| b.kind == BlockKind::Table).count(),
        labels_registered: registry.len(),
        references: outcome.references,
        references_rewritten: outcome.references_rewritten,
        numbering_directives_removed: outcome.directives_removed,
        included_files: doc.includes.len(),
        rasterize_duration_ms,
        pandoc_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Converted {} in {}ms: {} block(s) flattened, {} reference(s) rewritten",
        config.input.display(),
        stats.total_duration_ms,
        blocks.len(),
        stats.references_rewritten
    );

    Ok(ConversionOutput {
        output_path: config.output.clone(),
        blocks: blocks
            .iter()
            .map(|b| BlockSummary::new(b, rasterize::image_reference(config, b)))
            .collect(),
        labels: labels_of(&registry),
        latex: outcome.text,
        stats,
        scratch_dir: workspace.kept_path().map(Path::to_path_buf),
    })
}

/// Analyse `config.input` without touching external tools or the disk
/// beyond reading the source.
pub fn inspect(config: &ConversionConfig) -> Result<InspectReport, Tex2DocxError> {
    let doc = input::load_document(&config.input)?;
    let layout = DocumentLayout::analyze(&doc.text)?;
    let registry = labels::populate(&layout)?;
    let blocks = extract::collect_blocks(&layout, config)?;

    Ok(InspectReport {
        input: config.input.clone(),
        figure_package: layout.figure_package,
        has_cjk: layout.has_cjk,
        graphics_paths: layout.graphics_paths.clone(),
        included_files: doc.includes.clone(),
        figures: layout.figures.len(),
        tables: layout.tables.len(),
        equations: layout.equations.len(),
        blocks: blocks
            .iter()
            .map(|b| (b.stem.clone(), BlockSummary::new(b, rasterize::image_reference(config, b))))
            .collect(),
        labels: labels_of(&registry),
    })
}

fn stage(config: &ConversionConfig, stage: Stage) {
    info!("Stage: {}", stage);
    if let Some(cb) = &config.progress_callback {
        cb.on_stage_start(stage);
    }
}

fn check_config_assets(config: &ConversionConfig) -> Result<(), Tex2DocxError> {
    let checks = [
        (AssetKind::Document, Some(&config.input)),
        (AssetKind::ReferenceDoc, config.reference_doc.as_ref()),
        (AssetKind::Bibliography, config.bibliography.as_ref()),
        (AssetKind::CitationStyle, config.csl.as_ref()),
        (AssetKind::LuaFilter, config.lua_filter.as_ref()),
    ];
    for (kind, path) in checks {
        if let Some(path) = path {
            if !path.is_file() {
                return Err(Tex2DocxError::AssetMissing {
                    kind,
                    path: path.clone(),
                    figure: None,
                });
            }
        }
    }
    Ok(())
}

/// Copy next to `output`, then rename into place, so a reader never sees a
/// half-written document.
fn place_output(produced: &Path, output: &Path) -> Result<(), Tex2DocxError> {
    let fail = |source| Tex2DocxError::OutputWriteFailed {
        path: output.to_path_buf(),
        source,
    };
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(fail)?;
    }
    let mut tmp_name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = output.with_file_name(tmp_name);

    fs::copy(produced, &tmp).map_err(fail)?;
    if let Err(e) = fs::rename(&tmp, output) {
        let _ = fs::remove_file(&tmp);
        return Err(fail(e));
    }
    info!("Wrote {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn place_output_creates_parent_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let produced = dir.path().join("scratch.docx");
        fs::write(&produced, b"PK docx").unwrap();
        let output = dir.path().join("nested/out/paper.docx");

        place_output(&produced, &output).unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"PK docx");
        assert!(!dir.path().join("nested/out/paper.docx.tmp").exists());
    }

    #[test]
    fn missing_csl_is_reported_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.tex"), "x").unwrap();
        let config = ConversionConfig::builder(dir.path().join("main.tex"), dir.path().join("main.docx"))
            .csl(dir.path().join("style.csl"))
            .build()
            .unwrap();
        let err = check_config_assets(&config).unwrap_err();
        assert!(matches!(err, Tex2DocxError::AssetMissing { kind: AssetKind::CitationStyle, .. }));
    }

    #[test]
    fn inspect_reports_blocks_without_tools() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("main.tex"),
            r"\begin{figure}\subfloat{\includegraphics{a}\label{fig:a}}\subfloat{\includegraphics{b}}\caption{C}\label{fig:c}\end{figure}",
        )
        .unwrap();
        let config = ConversionConfig::builder(dir.path().join("main.tex"), dir.path().join("main.docx"))
            .build()
            .unwrap();
        let report = inspect(&config).unwrap();
        assert_eq!(report.figures, 1);
        assert_eq!(report.blocks.len(), 1);
        assert_eq!(report.blocks[0].0, "multifig_c");
        assert_eq!(report.blocks[0].1.image, "_multifig/multifig_c.png");
        assert_eq!(report.labels.len(), 2);
    }
}
