//! End-to-end tests for tex2docx.
//!
//! The first group drives the whole pipeline with a scripted tool runner
//! that writes the files xelatex, pdftocairo and pandoc would write, so it
//! runs anywhere.
//!
//! The second group calls the real programs and is gated behind the
//! `E2E_ENABLED` environment variable:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tex2docx::{
    convert, convert_with_runner, inspect, AssetKind, ConversionConfig, ConversionProgressCallback,
    LabelKind, Stage, Tex2DocxError, ToolInvocation, ToolOutput, ToolRunner,
};
use walkdir::WalkDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/paper")
}

fn write_png(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    image::RgbaImage::new(16, 9).save(path).unwrap();
}

/// Copy the fixture paper into a fresh directory and draw its panel images.
fn paper() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let src = fixture_dir();
    for entry in WalkDir::new(&src) {
        let entry = entry.unwrap();
        let rel = entry.path().strip_prefix(&src).unwrap();
        let dest = dir.path().join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).unwrap();
        } else {
            fs::copy(entry.path(), &dest).unwrap();
        }
    }
    for name in ["a", "b", "c", "d", "overview"] {
        write_png(&dir.path().join(format!("figures/{name}.png")));
    }
    dir
}

fn config_for(dir: &Path) -> ConversionConfig {
    ConversionConfig::builder(dir.join("main.tex"), dir.join("out/main.docx"))
        .temp_dir(dir)
        .build()
        .unwrap()
}

/// Plays xelatex, pdftocairo and pandoc by writing their outputs.
#[derive(Default)]
struct ScriptedRunner {
    calls: Mutex<Vec<ToolInvocation>>,
}

impl ScriptedRunner {
    fn programs(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.program.clone()).collect()
    }
}

impl ToolRunner for ScriptedRunner {
    fn run(&self, inv: &ToolInvocation) -> std::io::Result<ToolOutput> {
        self.calls.lock().unwrap().push(inv.clone());
        match inv.program.as_str() {
            "xelatex" => {
                let tex = inv.args.last().unwrap();
                let pdf = inv.cwd.join(tex.trim_end_matches(".tex")).with_extension("pdf");
                fs::write(pdf, b"%PDF-1.5\n")?;
            }
            "pdftocairo" => {
                let stem = inv.args.last().unwrap();
                image::RgbaImage::new(40, 30)
                    .save(inv.cwd.join(format!("{stem}.png")))
                    .map_err(std::io::Error::other)?;
            }
            "pandoc" => {
                let at = inv.args.iter().position(|a| a == "-o").unwrap();
                fs::write(&inv.args[at + 1], b"PK\x03\x04 docx")?;
            }
            other => panic!("unexpected program {other}"),
        }
        Ok(ToolOutput {
            status: Some(0),
            ..Default::default()
        })
    }
}

#[derive(Default)]
struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

impl ConversionProgressCallback for RecordingCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.events.lock().unwrap().push(format!("stage {stage}"));
    }
    fn on_figure_complete(&self, label: &str, index: usize, total: usize, _png: &Path) {
        self.events.lock().unwrap().push(format!("figure {label} {index}/{total}"));
    }
    fn on_conversion_complete(&self, _output: &Path) {
        self.events.lock().unwrap().push("done".to_string());
    }
}

// ── Scripted pipeline ────────────────────────────────────────────────────────

#[test]
fn four_panel_figure_is_flattened_and_referenced_by_letter() {
    let dir = paper();
    let runner = ScriptedRunner::default();
    let output = convert_with_runner(&config_for(dir.path()), &runner).unwrap();

    assert_eq!(fs::read(dir.path().join("out/main.docx")).unwrap(), b"PK\x03\x04 docx");
    assert!(!dir.path().join("out/main.docx.tmp").exists());
    assert_eq!(output.stats.figures_found, 2);
    assert_eq!(output.stats.multi_figures, 1);
    assert_eq!(output.stats.included_files, 1);
    assert_eq!(output.stats.numbering_directives_removed, 1);

    let latex = &output.latex;
    assert!(latex.contains(r"\ref{fig:examplesubfigures}(b)"));
    assert!(latex.contains(r"\ref{fig:examplesubfigures}(c)"));
    assert!(latex.contains(r"\ref{fig:examplesubfigures}(d)"));
    assert!(latex.contains(r"\includegraphics[width=\linewidth]{_multifig/multifig_examplesubfigures.png}"));
    assert!(latex.contains(r"\caption{Four panels, one figure.}"));
    assert!(!latex.contains(r"\subfloat"));
    assert!(!latex.contains(r"\numberwithin"));
    assert!(latex.contains(r"\ref{fig:single}"));
    assert!(latex.contains(r"\eqref{eq:energy}"));
    assert!(latex.contains(r"\ref{tab:summary}"));

    let block = &output.blocks[0];
    assert_eq!(block.label.as_deref(), Some("fig:examplesubfigures"));
    let letters: Vec<char> = block.sub_images.iter().filter_map(|s| s.letter).collect();
    assert_eq!(letters, vec!['a', 'b', 'c', 'd']);

    let kinds = |kind| output.labels.iter().filter(|l| l.kind == kind).count();
    assert_eq!(kinds(LabelKind::Subfigure), 4);
    assert_eq!(kinds(LabelKind::Figure), 2);
    assert_eq!(kinds(LabelKind::Table), 1);
    assert_eq!(kinds(LabelKind::Equation), 1);

    assert_eq!(runner.programs(), vec!["xelatex", "pdftocairo", "pandoc"]);
}

#[test]
fn pandoc_gets_crossref_citeproc_and_resource_path() {
    let dir = paper();
    let runner = ScriptedRunner::default();
    convert_with_runner(&config_for(dir.path()), &runner).unwrap();

    let calls = runner.calls.lock().unwrap();
    let pandoc = calls.last().unwrap();
    assert_eq!(pandoc.args[0], "main_modified.tex");
    assert!(pandoc.args.windows(2).any(|w| w == ["--filter", "pandoc-crossref"]));
    assert!(pandoc.args.iter().any(|a| a == "--citeproc"));
    assert!(pandoc.args.iter().any(|a| a.ends_with("refs.bib")));
    assert!(pandoc.args.iter().any(|a| a == ".:figures"));
    assert!(pandoc.args.iter().any(|a| a == "reference-section-title=References"));
}

#[test]
fn standalone_document_carries_the_panels() {
    let dir = paper();
    let config = ConversionConfig::builder(dir.path().join("main.tex"), dir.path().join("main.docx"))
        .temp_dir(dir.path())
        .debug(true)
        .build()
        .unwrap();
    let output = convert_with_runner(&config, &ScriptedRunner::default()).unwrap();

    let scratch = output.scratch_dir.expect("debug keeps the scratch directory");
    let standalone = fs::read_to_string(scratch.join("work/_multifig/multifig_examplesubfigures.tex")).unwrap();
    assert!(standalone.contains(r"\documentclass[preview,border=2pt]{standalone}"));
    assert!(standalone.contains(r"\usepackage{subfig}"));
    assert!(standalone.contains(r"\subfloat[Fourth]"));
    assert!(!standalone.contains(r"\caption{Four panels"));
    assert!(standalone.contains("{../figures/}"));
    assert!(scratch.join("work/main_modified.tex").is_file());
    fs::remove_dir_all(scratch).unwrap();
}

#[test]
fn document_without_multi_figures_passes_through() {
    let dir = tempfile::tempdir().unwrap();
    let text = "\\section{Only}\\label{sec:only}\nSee Section~\\ref{sec:only}.\n";
    fs::write(dir.path().join("main.tex"), text).unwrap();
    let runner = ScriptedRunner::default();

    let output = convert_with_runner(&config_for(dir.path()), &runner).unwrap();
    assert_eq!(output.latex, text);
    assert!(output.blocks.is_empty());
    assert_eq!(output.stats.references_rewritten, 0);
    assert_eq!(runner.programs(), vec!["pandoc"]);
}

#[test]
fn conversion_is_deterministic() {
    let dir = paper();
    let first = convert_with_runner(&config_for(dir.path()), &ScriptedRunner::default()).unwrap();
    let second = convert_with_runner(&config_for(dir.path()), &ScriptedRunner::default()).unwrap();
    assert_eq!(first.latex, second.latex);
    assert_eq!(first.labels, second.labels);
}

#[test]
fn unresolved_reference_aborts_before_pandoc() {
    let dir = paper();
    let main = dir.path().join("main.tex");
    let text = fs::read_to_string(&main).unwrap().replace(r"\ref{fig:single}", r"\ref{undefined_label}");
    fs::write(&main, text).unwrap();
    let runner = ScriptedRunner::default();

    let err = convert_with_runner(&config_for(dir.path()), &runner).unwrap_err();
    match err {
        Tex2DocxError::UnresolvedReferences { references } => {
            assert_eq!(references.len(), 1);
            assert_eq!(references[0].label, "undefined_label");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!runner.programs().contains(&"pandoc".to_string()));
    assert!(!dir.path().join("out/main.docx").exists());
}

#[test]
fn missing_panel_image_fails_before_any_tool_runs() {
    let dir = paper();
    fs::remove_file(dir.path().join("figures/c.png")).unwrap();
    let runner = ScriptedRunner::default();

    let err = convert_with_runner(&config_for(dir.path()), &runner).unwrap_err();
    match err {
        Tex2DocxError::AssetMissing { kind, figure, .. } => {
            assert_eq!(kind, AssetKind::Image);
            assert_eq!(figure.as_deref(), Some("fig:examplesubfigures"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(runner.calls.lock().unwrap().is_empty());
}

#[test]
fn missing_image_in_plain_figure_fails_before_any_tool_runs() {
    let dir = paper();
    fs::remove_file(dir.path().join("figures/overview.png")).unwrap();
    let runner = ScriptedRunner::default();

    let err = convert_with_runner(&config_for(dir.path()), &runner).unwrap_err();
    match err {
        Tex2DocxError::AssetMissing { kind, path, figure } => {
            assert_eq!(kind, AssetKind::Image);
            assert_eq!(path, PathBuf::from("overview"));
            assert_eq!(figure.as_deref(), Some("fig:single"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(runner.calls.lock().unwrap().is_empty());
    assert!(!dir.path().join("out/main.docx").exists());
}

#[test]
fn non_ascii_control_symbols_convert() {
    let dir = tempfile::tempdir().unwrap();
    let text = "\\section{Intro}\\label{sec:a}\nPath \\中文 here \\ref{sec:a}, caf\\é.\n";
    fs::write(dir.path().join("main.tex"), text).unwrap();

    let output = convert_with_runner(&config_for(dir.path()), &ScriptedRunner::default()).unwrap();
    assert_eq!(output.latex, text);
    assert_eq!(output.stats.references, 1);
}

#[test]
fn tables_flattened_on_request() {
    let dir = paper();
    let config = ConversionConfig::builder(dir.path().join("main.tex"), dir.path().join("main.docx"))
        .temp_dir(dir.path())
        .flatten_tables(true)
        .build()
        .unwrap();
    let output = convert_with_runner(&config, &ScriptedRunner::default()).unwrap();

    assert_eq!(output.stats.tables_flattened, 1);
    assert!(output.latex.contains("_multifig/multitab_summary.png"));
    assert!(output.latex.contains(r"\label{tab:summary}"));
    assert!(!output.latex.contains(r"\begin{tabular}{lr}"));
}

#[test]
fn progress_callback_sees_every_stage() {
    let dir = paper();
    let cb = Arc::new(RecordingCallback::default());
    let config = ConversionConfig::builder(dir.path().join("main.tex"), dir.path().join("main.docx"))
        .temp_dir(dir.path())
        .progress_callback(cb.clone())
        .build()
        .unwrap();
    convert_with_runner(&config, &ScriptedRunner::default()).unwrap();

    let events = cb.events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            "stage prepare",
            "stage scan",
            "stage extract",
            "stage rasterize",
            "figure fig:examplesubfigures 1/1",
            "stage rewrite",
            "stage convert",
            "done",
        ]
    );
}

#[test]
fn inspect_needs_no_tools() {
    let dir = paper();
    let report = inspect(&config_for(dir.path())).unwrap();
    assert_eq!(report.figures, 2);
    assert_eq!(report.tables, 1);
    assert_eq!(report.blocks.len(), 1);
    assert_eq!(report.blocks[0].0, "multifig_examplesubfigures");
    assert_eq!(report.graphics_paths, vec!["figures/"]);
    assert!(!dir.path().join("out").exists());
}

// ── Real tools (gated) ───────────────────────────────────────────────────────

/// Skip unless E2E_ENABLED is set.
macro_rules! e2e_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    }};
}

#[test]
fn e2e_convert_fixture_paper() {
    e2e_skip_unless_ready!();
    let dir = paper();
    let output = convert(&config_for(dir.path())).expect("conversion failed");

    let bytes = fs::read(&output.output_path).unwrap();
    assert!(bytes.starts_with(b"PK"), "output is not a zip container");
    println!(
        "{} bytes, {} block(s), {}ms",
        bytes.len(),
        output.blocks.len(),
        output.stats.total_duration_ms
    );
}

#[test]
fn e2e_high_dpi_without_crossref() {
    e2e_skip_unless_ready!();
    let dir = paper();
    let config = ConversionConfig::builder(dir.path().join("main.tex"), dir.path().join("hi.docx"))
        .temp_dir(dir.path())
        .dpi(1200)
        .crossref(false)
        .debug(true)
        .build()
        .unwrap();
    let output = convert(&config).expect("conversion failed");

    let scratch = output.scratch_dir.unwrap();
    let png = scratch.join("work/_multifig/multifig_examplesubfigures.png");
    let (w, _) = image::image_dimensions(&png).unwrap();
    assert!(w > 100, "rasterised width {w} px looks wrong");
    fs::remove_dir_all(scratch).unwrap();
}
