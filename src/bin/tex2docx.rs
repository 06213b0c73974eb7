//! CLI binary for tex2docx.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tex2docx::{
    convert, inspect, ConversionConfig, ConversionOutput, ConversionProgressCallback, InspectReport,
    ProgressCallback, Stage,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while scanning and converting, counting bar while rasterising.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} figures  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        let (prefix, msg) = match stage {
            Stage::Prepare => ("Preparing", "copying source tree…"),
            Stage::Scan => ("Scanning", "reading document…"),
            Stage::Extract => ("Extracting", "checking images…"),
            Stage::Rasterize => ("Rasterising", ""),
            Stage::Rewrite => ("Rewriting", "updating references…"),
            Stage::Convert => ("Converting", "running pandoc…"),
        };
        self.bar.set_prefix(prefix);
        self.bar.set_message(msg);
    }

    fn on_figure_start(&self, label: &str, index: usize, total: usize) {
        if index == 1 {
            self.activate_bar(total);
        }
        self.bar.set_message(label.to_string());
    }

    fn on_figure_complete(&self, label: &str, index: usize, total: usize, png: &Path) {
        self.bar.println(format!(
            "  {} {:>2}/{:<2}  {}  {}",
            green("✓"),
            index,
            total,
            label,
            dim(&png.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, _output: &Path) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert next to the input (paper/main.docx)
  tex2docx paper/main.tex

  # Explicit output, styles and citation style
  tex2docx paper/main.tex -o out/paper.docx --reference-doc template.docx --csl ieee.csl

  # Sharper figures, tables flattened as images too
  tex2docx --dpi 900 --flatten-tables paper/main.tex

  # Analyse only: figures, panels, labels (no external tools)
  tex2docx --inspect-only --json paper/main.tex

  # Keep the scratch directory for post-mortem
  tex2docx --debug -v paper/main.tex

REQUIRED PROGRAMS:
  pandoc            always
  pandoc-crossref   unless --no-crossref
  xelatex           when the document has multi-panel figures
  pdftocairo        (poppler) same

ENVIRONMENT VARIABLES:
  Every flag reads TEX2DOCX_<FLAG> (e.g. TEX2DOCX_DPI=900, TEX2DOCX_CSL=ieee.csl).
  RUST_LOG overrides the log filter (e.g. RUST_LOG=tex2docx=debug).
"#;

/// Convert LaTeX documents to Word, flattening multi-panel figures.
#[derive(Parser, Debug)]
#[command(
    name = "tex2docx",
    version,
    about = "Convert LaTeX documents to Word, flattening multi-panel figures",
    long_about = "Convert a LaTeX document to .docx with pandoc and pandoc-crossref. \
Figures built from \\subfloat, \\subfigure or subfigure environments are typeset on their own \
with xelatex, rasterised, and replaced by a single image; references to their panels become \
'Figure N(x)'.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Main LaTeX file.
    input: PathBuf,

    /// Word document to write. Default: the input with a .docx extension.
    #[arg(short, long, env = "TEX2DOCX_OUTPUT")]
    output: Option<PathBuf>,

    /// Parent directory for the scratch workspace.
    #[arg(long, env = "TEX2DOCX_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Word document whose styles the output uses.
    #[arg(long, env = "TEX2DOCX_REFERENCE_DOC")]
    reference_doc: Option<PathBuf>,

    /// BibTeX file. Default: the first *.bib next to the input.
    #[arg(long, env = "TEX2DOCX_BIBLIOGRAPHY")]
    bibliography: Option<PathBuf>,

    /// CSL citation style.
    #[arg(long, env = "TEX2DOCX_CSL")]
    csl: Option<PathBuf>,

    /// pandoc Lua filter, run before pandoc-crossref.
    #[arg(long, env = "TEX2DOCX_LUA_FILTER")]
    lua_filter: Option<PathBuf>,

    /// Keep the scratch directory and print its path.
    #[arg(long, env = "TEX2DOCX_DEBUG")]
    debug: bool,

    /// Rasterisation DPI for flattened figures (150–1200).
    #[arg(long, env = "TEX2DOCX_DPI", default_value_t = 600,
          value_parser = clap::value_parser!(u32).range(150..=1200))]
    dpi: u32,

    /// Flatten tables into images as well.
    #[arg(long, env = "TEX2DOCX_FLATTEN_TABLES")]
    flatten_tables: bool,

    /// Do not pass --number-sections to pandoc.
    #[arg(long, env = "TEX2DOCX_NO_NUMBER_SECTIONS")]
    no_number_sections: bool,

    /// Do not run the pandoc-crossref filter.
    #[arg(long, env = "TEX2DOCX_NO_CROSSREF")]
    no_crossref: bool,

    /// Title of the bibliography section.
    #[arg(long, env = "TEX2DOCX_REFERENCE_TITLE", default_value = "References")]
    reference_title: String,

    /// Analyse the document only; run no external program.
    #[arg(long)]
    inspect_only: bool,

    /// Print a JSON report on stdout.
    #[arg(long, env = "TEX2DOCX_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "TEX2DOCX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TEX2DOCX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "TEX2DOCX_QUIET")]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO logs would tear through the progress bar; keep them for -v or
    // when the bar is off.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let report = inspect(&config).context("Failed to inspect document")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else {
            print_report(&report);
        }
        return Ok(());
    }

    // ── Run conversion ───────────────────────────────────────────────────
    let output = convert(&config)
        .with_context(|| format!("Conversion of {} failed", cli.input.display()))?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
    } else if !cli.quiet {
        print_summary(&output);
    }
    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.input.with_extension("docx"));

    let mut builder = ConversionConfig::builder(&cli.input, output)
        .debug(cli.debug)
        .dpi(cli.dpi)
        .flatten_tables(cli.flatten_tables)
        .number_sections(!cli.no_number_sections)
        .crossref(!cli.no_crossref)
        .reference_section_title(&cli.reference_title);

    if let Some(dir) = &cli.temp_dir {
        builder = builder.temp_dir(dir);
    }
    if let Some(doc) = &cli.reference_doc {
        builder = builder.reference_doc(doc);
    }
    if let Some(bib) = &cli.bibliography {
        builder = builder.bibliography(bib);
    }
    if let Some(csl) = &cli.csl {
        builder = builder.csl(csl);
    }
    if let Some(filter) = &cli.lua_filter {
        builder = builder.lua_filter(filter);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(output: &ConversionOutput) {
    let stats = &output.stats;
    eprintln!(
        "{}  {} figure(s), {} flattened, {} reference(s) rewritten  {}ms  →  {}",
        green("✔"),
        stats.figures_found,
        stats.multi_figures + stats.tables_flattened,
        stats.references_rewritten,
        stats.total_duration_ms,
        bold(&output.output_path.display().to_string()),
    );
    if let Some(dir) = &output.scratch_dir {
        eprintln!("   {} {}", cyan("scratch kept at"), dir.display());
    }
}

fn print_report(report: &InspectReport) {
    println!("File:            {}", report.input.display());
    println!("Figure package:  {:?}", report.figure_package);
    println!("CJK text:        {}", report.has_cjk);
    if !report.graphics_paths.is_empty() {
        println!("Graphics path:   {}", report.graphics_paths.join(", "));
    }
    if !report.included_files.is_empty() {
        println!("Included files:  {}", report.included_files.len());
    }
    println!(
        "Floats:          {} figure(s), {} table(s), {} equation block(s)",
        report.figures, report.tables, report.equations
    );
    println!("Labels:          {}", report.labels.len());
    if report.blocks.is_empty() {
        println!("Nothing to flatten.");
        return;
    }
    println!("To flatten:");
    for (stem, block) in &report.blocks {
        println!(
            "  {} {:<28} line {:<5} {} image(s)  {}",
            cyan("◆"),
            block.label.as_deref().unwrap_or("(unlabelled)"),
            block.line,
            block.sub_images.len(),
            dim(stem),
        );
    }
}
