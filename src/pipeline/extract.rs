//! Multi-figure extraction.
//!
//! Turns the multi-panel figures (and, with `flatten_tables`, the tables) of a
//! [`DocumentLayout`] into [`MultiFigureBlock`]s: everything needed to typeset
//! the block on its own page and later swap it for a single image.

use crate::config::ConversionConfig;
use crate::error::{AssetKind, Tex2DocxError};
use crate::pipeline::labels::{panel_letter, MAX_PANELS};
use crate::pipeline::layout::{DocumentLayout, FigureEnv, TableEnv};
use crate::pipeline::scan::{self, FigurePackage};
use crate::templates::{render_standalone, DEFAULT_STANDALONE_TEMPLATE};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extensions graphicx tries, in order, for an extension-less path.
const IMAGE_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "eps"];

static RE_UNSAFE_STEM_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}_-]+").unwrap());
static RE_CONTINUED_FLOAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\ContinuedFloat\b\s*").unwrap());
static RE_LABEL_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:fig|tab)[:_-]").unwrap());

/// What a block replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockKind {
    Figure,
    Table,
}

/// One image of a block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubImage {
    /// Path as written in `\includegraphics`.
    pub path: String,
    /// Fraction of the line width, when the source states one.
    pub width: Option<f64>,
    /// Label of the owning panel.
    pub label: Option<String>,
    /// Letter of the owning panel.
    pub letter: Option<char>,
}

/// A float that will be replaced by one flattened image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiFigureBlock {
    pub kind: BlockKind,
    /// Whole environment, `\begin` through `\end`.
    pub span: Range<usize>,
    pub line: usize,
    pub sub_images: Vec<SubImage>,
    /// Outer caption, verbatim.
    pub caption: Option<String>,
    /// Label the replacement float carries.
    pub parent: Option<String>,
    pub synthetic_parent: bool,
    /// File stem of the standalone `.tex` and the `.png`.
    pub stem: String,
    /// Float body prepared for standalone typesetting.
    pub standalone_body: String,
}

impl MultiFigureBlock {
    /// Name used in logs and errors.
    pub fn subject(&self) -> String {
        match &self.parent {
            Some(label) => label.clone(),
            None => format!("table at line {}", self.line),
        }
    }
}

/// Collect blocks in document order.
pub fn collect_blocks(
    layout: &DocumentLayout<'_>,
    config: &ConversionConfig,
) -> Result<Vec<MultiFigureBlock>, Tex2DocxError> {
    let mut stems = StemAllocator::default();
    let mut blocks = layout
        .multi_figures()
        .map(|fig| figure_block(layout.text, fig, &mut stems))
        .collect::<Result<Vec<_>, _>>()?;

    if config.flatten_tables {
        for (i, table) in layout.tables.iter().enumerate() {
            blocks.push(table_block(layout.text, table, i + 1, &mut stems)?);
        }
        blocks.sort_by_key(|b| b.span.start);
    }

    info!(
        "{} block(s) to flatten ({} figure(s))",
        blocks.len(),
        blocks.iter().filter(|b| b.kind == BlockKind::Figure).count()
    );
    Ok(blocks)
}

#[derive(Default)]
struct StemAllocator {
    used: HashSet<String>,
}

impl StemAllocator {
    /// `base`, or `base_2`, `base_3`… when already taken.
    fn allocate(&mut self, base: String) -> String {
        let mut stem = base.clone();
        let mut n = 1;
        while self.used.contains(&stem) {
            n += 1;
            stem = format!("{base}_{n}");
        }
        self.used.insert(stem.clone());
        stem
    }
}

/// `fig:results/overview` → `results_overview`.
pub fn stem_for_label(label: &str) -> String {
    let stripped = RE_LABEL_PREFIX.replace(label, "");
    let safe = RE_UNSAFE_STEM_CHARS.replace_all(&stripped, "_");
    let safe = safe.trim_matches('_');
    if safe.is_empty() {
        "unnamed".to_string()
    } else {
        safe.to_string()
    }
}

fn figure_block(
    text: &str,
    fig: &FigureEnv<'_>,
    stems: &mut StemAllocator,
) -> Result<MultiFigureBlock, Tex2DocxError> {
    let parent = fig.parent.clone();
    let base = format!("multifig_{}", stem_for_label(parent.as_deref().unwrap_or("unnamed")));

    let mut sub_images = Vec::new();
    if fig.panels.is_empty() {
        sub_images.extend(fig.graphics.iter().map(|g| SubImage {
            path: g.path.to_string(),
            width: g.width,
            label: None,
            letter: None,
        }));
    }
    for (position, panel) in fig.panels.iter().enumerate() {
        let letter = panel_letter(position).ok_or_else(|| {
            Tex2DocxError::parse(
                "\\subfloat",
                scan::line_at(text, panel.span.start),
                format!("more than {MAX_PANELS} panels in one figure"),
            )
        })?;
        for g in &panel.graphics {
            let width = match (panel.width, g.width) {
                (Some(p), Some(w)) => Some(p * w),
                (None, w) => w,
                (Some(_), None) => None,
            };
            sub_images.push(SubImage {
                path: g.path.to_string(),
                width,
                label: panel.label().map(str::to_string),
                letter: Some(letter),
            });
        }
    }

    let removed: Vec<Range<usize>> = fig.captions.iter().map(|c| c.span.clone()).collect();
    Ok(MultiFigureBlock {
        kind: BlockKind::Figure,
        span: fig.span.clone(),
        line: scan::line_at(text, fig.span.start),
        sub_images,
        caption: fig.caption().map(str::to_string),
        parent,
        synthetic_parent: fig.synthetic_parent,
        stem: stems.allocate(base),
        standalone_body: standalone_body(text, fig.body.clone(), &removed),
    })
}

fn table_block(
    text: &str,
    table: &TableEnv<'_>,
    ordinal: usize,
    stems: &mut StemAllocator,
) -> Result<MultiFigureBlock, Tex2DocxError> {
    let parent = table.labels.first().map(|l| l.id.to_string());
    let base = match &parent {
        Some(label) => format!("multitab_{}", stem_for_label(label)),
        None => format!("multitab_{ordinal}"),
    };
    let sub_images = scan::commands_in(text, table.body.clone(), &["includegraphics"])
        .map(|c| {
            c.map(|c| SubImage {
                path: c.argument.trim().to_string(),
                width: None,
                label: None,
                letter: None,
            })
        })
        .collect::<Result<_, _>>()?;

    let removed: Vec<Range<usize>> = table
        .captions
        .iter()
        .map(|c| c.span.clone())
        .chain(table.labels.iter().map(|l| l.span.clone()))
        .collect();
    Ok(MultiFigureBlock {
        kind: BlockKind::Table,
        span: table.span.clone(),
        line: scan::line_at(text, table.span.start),
        sub_images,
        caption: table.caption().map(str::to_string),
        parent,
        synthetic_parent: false,
        stem: stems.allocate(base),
        standalone_body: standalone_body(text, table.body.clone(), &removed),
    })
}

/// Float body without its placement option, the given spans and
/// `\ContinuedFloat`.
fn standalone_body(text: &str, body: Range<usize>, removed: &[Range<usize>]) -> String {
    let mut start = body.start;
    let trimmed = text[start..body.end].trim_start();
    if trimmed.starts_with('[') {
        if let Some(close) = trimmed.find(']') {
            start = body.end - trimmed.len() + close + 1;
        }
    }

    let mut spans: Vec<&Range<usize>> = removed.iter().filter(|r| r.start >= start && r.end <= body.end).collect();
    spans.sort_by_key(|r| r.start);

    let mut out = String::with_capacity(body.end - start);
    let mut last = start;
    for r in spans {
        if r.start < last {
            continue;
        }
        out.push_str(&text[last..r.start]);
        last = r.end;
    }
    out.push_str(&text[last..body.end]);

    RE_CONTINUED_FLOAT.replace_all(out.trim(), "").into_owned()
}

/// Locate an `\includegraphics` target the way graphicx does.
pub fn resolve_image(path: &str, source_dir: &Path, graphics_paths: &[String]) -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = vec![source_dir.to_path_buf()];
    dirs.extend(graphics_paths.iter().map(|p| source_dir.join(p)));

    let has_ext = Path::new(path).extension().is_some();
    for dir in &dirs {
        let candidate = dir.join(path);
        if has_ext && candidate.is_file() {
            return Some(candidate);
        }
        for ext in IMAGE_EXTENSIONS {
            let with_ext = dir.join(format!("{path}.{ext}"));
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }
    }
    None
}

/// Check every image the document and its blocks use before anything is
/// typeset: all `\includegraphics` of every figure, then the images of
/// flattened tables.
pub fn check_assets(
    layout: &DocumentLayout<'_>,
    blocks: &[MultiFigureBlock],
    source_dir: &Path,
) -> Result<(), Tex2DocxError> {
    let graphics_paths = &layout.graphics_paths;
    let missing = |path: &str, figure: String| -> Result<(), Tex2DocxError> {
        match resolve_image(path, source_dir, graphics_paths) {
            Some(_) => Ok(()),
            None => Err(Tex2DocxError::AssetMissing {
                kind: AssetKind::Image,
                path: PathBuf::from(path),
                figure: Some(figure),
            }),
        }
    };

    let mut checked = 0;
    for fig in &layout.figures {
        for g in &fig.graphics {
            let figure = fig
                .parent
                .clone()
                .unwrap_or_else(|| format!("figure at line {}", scan::line_at(layout.text, fig.span.start)));
            missing(g.path, figure)?;
            checked += 1;
        }
    }
    for block in blocks.iter().filter(|b| b.kind == BlockKind::Table) {
        for image in &block.sub_images {
            missing(&image.path, block.subject())?;
            checked += 1;
        }
    }
    debug!("All {} image(s) present", checked);
    Ok(())
}

/// `\usepackage` lines the standalone document needs.
pub fn standalone_packages(package: FigurePackage, cjk: bool) -> String {
    let mut lines = Vec::new();
    match package {
        FigurePackage::Subfig => lines.push(r"\usepackage{subfig}"),
        FigurePackage::Subfigure => lines.push(r"\usepackage{subfigure}"),
        FigurePackage::Subcaption => lines.push(r"\usepackage{subcaption}"),
        FigurePackage::None => {}
    }
    if cjk {
        lines.push(r"\usepackage{xeCJK}");
    }
    lines.join("\n")
}

/// `\graphicspath` entries seen from the figure directory, one level below
/// the source directory.
pub fn standalone_graphics_path(graphics_paths: &[String]) -> String {
    let mut entries: Vec<String> = graphics_paths
        .iter()
        .map(|p| {
            let p = if p.ends_with('/') { p.clone() } else { format!("{p}/") };
            if Path::new(&p).is_absolute() {
                p
            } else {
                format!("../{p}")
            }
        })
        .collect();
    entries.push("../".to_string());
    entries.iter().map(|e| format!("{{{e}}}")).collect()
}

/// Write `<figure_dir>/<stem>.tex` for `block`.
pub fn write_standalone(
    block: &MultiFigureBlock,
    layout: &DocumentLayout<'_>,
    config: &ConversionConfig,
    figure_dir: &Path,
) -> Result<PathBuf, Tex2DocxError> {
    let template = config
        .standalone_template
        .as_deref()
        .unwrap_or(DEFAULT_STANDALONE_TEMPLATE);
    let doc = render_standalone(
        template,
        &standalone_packages(layout.figure_package, layout.has_cjk),
        &standalone_graphics_path(&layout.graphics_paths),
        &block.standalone_body,
    );
    let path = figure_dir.join(format!("{}.tex", block.stem));
    fs::write(&path, doc).map_err(|e| Tex2DocxError::workspace(&path, e))?;
    debug!("Wrote standalone document {}", path.display());
    Ok(path)
}
