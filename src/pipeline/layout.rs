//! Structural analysis of a loaded document.
//!
//! [`DocumentLayout::analyze`] finds every figure, table and equation-like
//! environment, splits figures into panels and separates panel-level
//! labels/captions from the float's own. Everything downstream (label
//! registration, extraction, rewriting) works from this one analysis, so the
//! document is scanned once.

use crate::error::Tex2DocxError;
use crate::pipeline::scan::{self, Command, FigurePackage, LabelSite};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;
use tracing::debug;

pub const FIGURE_ENVS: &[&str] = &["figure", "figure*"];
pub const TABLE_ENVS: &[&str] = &["table", "table*"];
pub const EQUATION_ENVS: &[&str] = &[
    "equation", "equation*", "align", "align*", "gather", "gather*", "multline", "multline*", "eqnarray",
    "eqnarray*", "flalign", "flalign*", "alignat", "alignat*",
];

/// Prefix of labels synthesised for unlabelled multi-figures.
pub const SYNTHETIC_LABEL_PREFIX: &str = "fig:multifig";

static RE_WIDTH_OPTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|,)\s*width\s*=\s*([^,]+)").unwrap());
static RE_RELATIVE_LENGTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([0-9]*\.?[0-9]+)?\s*\\(?:linewidth|textwidth|columnwidth|hsize)\s*$").unwrap());

/// `0.45\linewidth` → 0.45, `\textwidth` → 1.0, `3cm` → `None`.
pub fn relative_width(length: &str) -> Option<f64> {
    let caps = RE_RELATIVE_LENGTH.captures(length)?;
    match caps.get(1) {
        Some(m) => m.as_str().parse().ok(),
        None => Some(1.0),
    }
}

/// Width fraction from an `\includegraphics` option list.
fn width_option(options: &[&str]) -> Option<f64> {
    options
        .iter()
        .find_map(|opt| RE_WIDTH_OPTION.captures(opt))
        .and_then(|caps| relative_width(&caps[1]))
}

/// One `\includegraphics`.
#[derive(Debug, Clone, PartialEq)]
pub struct Graphic<'a> {
    pub span: Range<usize>,
    pub path: &'a str,
    /// Requested width as a fraction of the line width.
    pub width: Option<f64>,
}

/// How a panel was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelKind {
    /// `\subfloat[…]{…}` (subfig).
    Subfloat,
    /// `\subfigure[…]{…}` (legacy subfigure package).
    SubfigureCommand,
    /// `\begin{subfigure}{w} … \end{subfigure}` (subcaption).
    SubfigureEnv,
    /// A bare `\includegraphics` in a float with several of them.
    Bare,
}

/// One sub-image slot of a figure.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel<'a> {
    pub kind: PanelKind,
    pub span: Range<usize>,
    pub graphics: Vec<Graphic<'a>>,
    /// Declared width of a `subfigure` environment.
    pub width: Option<f64>,
    /// Labels owned by the panel; the first is the panel's own.
    pub labels: Vec<LabelSite<'a>>,
}

impl Panel<'_> {
    pub fn label(&self) -> Option<&str> {
        self.labels.first().map(|l| l.id)
    }
}

/// A `figure` / `figure*` environment.
#[derive(Debug, Clone, PartialEq)]
pub struct FigureEnv<'a> {
    pub span: Range<usize>,
    pub body: Range<usize>,
    pub panels: Vec<Panel<'a>>,
    pub graphics: Vec<Graphic<'a>>,
    /// `\caption`s outside any panel.
    pub captions: Vec<Command<'a>>,
    /// `\label`s outside any panel.
    pub labels: Vec<LabelSite<'a>>,
    /// Last outer label, or a synthesised one when the float has none but
    /// still needs a parent for its panels.
    pub parent: Option<String>,
    pub synthetic_parent: bool,
}

impl FigureEnv<'_> {
    /// At least two panels or two images.
    pub fn is_multi(&self) -> bool {
        self.panels.len() >= 2 || self.graphics.len() >= 2
    }

    /// Text of the last outer caption.
    pub fn caption(&self) -> Option<&str> {
        self.captions.last().map(|c| c.argument)
    }

    /// The outer label that names the float itself.
    pub fn main_label(&self) -> Option<&LabelSite<'_>> {
        if self.synthetic_parent {
            None
        } else {
            self.labels.last()
        }
    }
}

/// A `table` / `table*` environment.
#[derive(Debug, Clone, PartialEq)]
pub struct TableEnv<'a> {
    pub span: Range<usize>,
    pub body: Range<usize>,
    pub captions: Vec<Command<'a>>,
    pub labels: Vec<LabelSite<'a>>,
}

impl TableEnv<'_> {
    pub fn caption(&self) -> Option<&str> {
        self.captions.last().map(|c| c.argument)
    }
}

/// Result of [`DocumentLayout::analyze`].
#[derive(Debug, Clone)]
pub struct DocumentLayout<'a> {
    pub text: &'a str,
    pub figures: Vec<FigureEnv<'a>>,
    pub tables: Vec<TableEnv<'a>>,
    pub equations: Vec<Range<usize>>,
    /// Every `\label` in document order.
    pub labels: Vec<LabelSite<'a>>,
    pub figure_package: FigurePackage,
    pub graphics_paths: Vec<String>,
    pub has_cjk: bool,
}

fn contains(outer: &Range<usize>, inner: &Range<usize>) -> bool {
    outer.start <= inner.start && inner.end <= outer.end
}

impl<'a> DocumentLayout<'a> {
    pub fn analyze(text: &'a str) -> Result<Self, Tex2DocxError> {
        let labels: Vec<LabelSite<'a>> = scan::labels(text).collect::<Result<_, _>>()?;
        let taken: HashSet<&str> = labels.iter().map(|l| l.id).collect();

        let mut figures = Vec::new();
        let mut synthetic = 0usize;
        for env in scan::environments(text, FIGURE_ENVS) {
            let env = env?;
            let mut figure = analyze_figure(text, env.span, env.body)?;
            let needs_parent = figure.is_multi() || figure.panels.iter().any(|p| p.label().is_some());
            if figure.parent.is_none() && needs_parent {
                let id = loop {
                    synthetic += 1;
                    let candidate = format!("{SYNTHETIC_LABEL_PREFIX}{synthetic}");
                    if !taken.contains(candidate.as_str()) {
                        break candidate;
                    }
                };
                debug!("Unlabelled figure at line {} named {}", scan::line_at(text, figure.span.start), id);
                figure.parent = Some(id);
                figure.synthetic_parent = true;
            }
            figures.push(figure);
        }

        let mut tables = Vec::new();
        for env in scan::environments(text, TABLE_ENVS) {
            let env = env?;
            tables.push(TableEnv {
                captions: scan::commands_in(text, env.body.clone(), &["caption"]).collect::<Result<_, _>>()?,
                labels: scan::labels_in(text, env.body.clone()).collect::<Result<_, _>>()?,
                span: env.span,
                body: env.body,
            });
        }

        let equations = scan::environments(text, EQUATION_ENVS)
            .map(|env| env.map(|e| e.span))
            .collect::<Result<_, _>>()?;

        let layout = DocumentLayout {
            text,
            figures,
            tables,
            equations,
            labels,
            figure_package: scan::figure_package(text),
            graphics_paths: scan::graphics_paths(text)?,
            has_cjk: scan::has_cjk(text),
        };
        debug!(
            "Layout: {} figure(s) ({} multi), {} table(s), {} equation block(s), {} label(s), package {:?}",
            layout.figures.len(),
            layout.multi_figures().count(),
            layout.tables.len(),
            layout.equations.len(),
            layout.labels.len(),
            layout.figure_package
        );
        Ok(layout)
    }

    pub fn multi_figures(&self) -> impl Iterator<Item = &FigureEnv<'a>> {
        self.figures.iter().filter(|f| f.is_multi())
    }

    pub fn figure_at(&self, pos: usize) -> Option<&FigureEnv<'a>> {
        self.figures.iter().find(|f| f.span.contains(&pos))
    }

    pub fn table_at(&self, pos: usize) -> Option<&TableEnv<'a>> {
        self.tables.iter().find(|t| t.span.contains(&pos))
    }

    pub fn in_equation(&self, pos: usize) -> bool {
        self.equations.iter().any(|e| e.contains(&pos))
    }
}

fn graphics_in<'a>(text: &'a str, range: Range<usize>) -> Result<Vec<Graphic<'a>>, Tex2DocxError> {
    scan::commands_in(text, range, &["includegraphics"])
        .map(|cmd| {
            cmd.map(|c| Graphic {
                width: width_option(&c.optional),
                path: c.argument.trim(),
                span: c.span,
            })
        })
        .collect()
}

fn analyze_figure<'a>(text: &'a str, span: Range<usize>, body: Range<usize>) -> Result<FigureEnv<'a>, Tex2DocxError> {
    let graphics = graphics_in(text, body.clone())?;
    let all_labels: Vec<LabelSite<'a>> = scan::labels_in(text, body.clone()).collect::<Result<_, _>>()?;
    let all_captions: Vec<Command<'a>> =
        scan::commands_in(text, body.clone(), &["caption"]).collect::<Result<_, _>>()?;

    let mut panels: Vec<Panel<'a>> = Vec::new();
    for cmd in scan::commands_in(text, body.clone(), &["subfloat", "subfigure"]) {
        let cmd = cmd?;
        panels.push(Panel {
            kind: if cmd.name == "subfloat" {
                PanelKind::Subfloat
            } else {
                PanelKind::SubfigureCommand
            },
            graphics: graphics_in(text, cmd.span.clone())?,
            width: None,
            labels: Vec::new(),
            span: cmd.span,
        });
    }
    for env in scan::environments_in(text, body.clone(), &["subfigure"]) {
        let env = env?;
        let width = scan::parse_arguments(text, env.body.start, 1, "\\begin{subfigure}")?
            .and_then(|args| relative_width(&text[args.mandatory[0].clone()]));
        panels.push(Panel {
            kind: PanelKind::SubfigureEnv,
            graphics: graphics_in(text, env.body.clone())?,
            width,
            labels: Vec::new(),
            span: env.span,
        });
    }
    panels.sort_by_key(|p| p.span.start);
    // A panel nested in another panel belongs to it.
    let mut outermost: Vec<Panel<'a>> = Vec::with_capacity(panels.len());
    for p in panels {
        if !outermost.iter().any(|o| contains(&o.span, &p.span)) {
            outermost.push(p);
        }
    }
    let mut panels = outermost;

    if panels.is_empty() && graphics.len() >= 2 {
        panels = bare_panels(body.end, &graphics, &all_labels, &all_captions);
    } else {
        for panel in &mut panels {
            panel.labels = all_labels
                .iter()
                .filter(|l| contains(&panel.span, &l.span))
                .cloned()
                .collect();
        }
    }

    let in_panel = |r: &Range<usize>| {
        panels
            .iter()
            .any(|p| contains(&p.span, r) || p.labels.iter().any(|l| l.span == *r))
    };
    let labels: Vec<LabelSite<'a>> = all_labels.iter().filter(|l| !in_panel(&l.span)).cloned().collect();
    let captions: Vec<Command<'a>> = all_captions.into_iter().filter(|c| !in_panel(&c.span)).collect();
    let parent = labels.last().map(|l| l.id.to_string());

    Ok(FigureEnv {
        span,
        body,
        panels,
        graphics,
        captions,
        labels,
        parent,
        synthetic_parent: false,
    })
}

/// One panel per `\includegraphics`.
///
/// A panel owns the first `\label` between its image and the next one,
/// unless a `\caption` comes first: that label then names the float.
fn bare_panels<'a>(
    body_end: usize,
    graphics: &[Graphic<'a>],
    labels: &[LabelSite<'a>],
    captions: &[Command<'a>],
) -> Vec<Panel<'a>> {
    graphics
        .iter()
        .enumerate()
        .map(|(i, g)| {
            let area_end = graphics.get(i + 1).map_or(body_end, |next| next.span.start);
            let label = labels
                .iter()
                .find(|l| l.span.start >= g.span.end && l.span.end <= area_end)
                .filter(|l| {
                    !captions
                        .iter()
                        .any(|c| c.span.start >= g.span.end && c.span.start < l.span.start)
                });
            Panel {
                kind: PanelKind::Bare,
                span: g.span.clone(),
                graphics: vec![g.clone()],
                width: None,
                labels: label.into_iter().cloned().collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBFLOATS: &str = r"\begin{figure}[htbp]
\centering
\subfloat[First]{\includegraphics[width=0.45\linewidth]{a.png}\label{fig:a}}
\subfloat[Second]{\includegraphics[width=0.45\linewidth]{b.png}\label{fig:b}}
\caption{Two {\em panels}}
\label{fig:pair}
\end{figure}";

    #[test]
    fn relative_widths() {
        assert_eq!(relative_width(r"0.45\linewidth"), Some(0.45));
        assert_eq!(relative_width(r".3\textwidth"), Some(0.3));
        assert_eq!(relative_width(r"\columnwidth"), Some(1.0));
        assert_eq!(relative_width("3cm"), None);
        assert_eq!(width_option(&[r"height=2cm, width=0.5\linewidth"]), Some(0.5));
        assert_eq!(width_option(&[r"scale=0.5"]), None);
    }

    #[test]
    fn multibyte_control_symbol_in_body_text() {
        let layout = DocumentLayout::analyze("\\section{Intro}\\label{sec:a}\nPath \\中文 here \\ref{sec:a}").unwrap();
        assert_eq!(layout.labels.len(), 1);
        assert!(layout.has_cjk);
    }

    #[test]
    fn subfloat_figure() {
        let layout = DocumentLayout::analyze(SUBFLOATS).unwrap();
        let fig = &layout.figures[0];
        assert!(fig.is_multi());
        assert_eq!(fig.panels.len(), 2);
        assert_eq!(fig.panels[0].kind, PanelKind::Subfloat);
        assert_eq!(fig.panels[0].label(), Some("fig:a"));
        assert_eq!(fig.panels[1].graphics[0].path, "b.png");
        assert_eq!(fig.panels[1].graphics[0].width, Some(0.45));
        assert_eq!(fig.caption(), Some(r"Two {\em panels}"));
        assert_eq!(fig.parent.as_deref(), Some("fig:pair"));
        assert!(!fig.synthetic_parent);
        assert_eq!(layout.figure_package, FigurePackage::Subfig);
    }

    #[test]
    fn subcaption_environments() {
        let src = r"\begin{figure}
\begin{subfigure}[b]{0.3\textwidth}\includegraphics[width=\linewidth]{x}\caption{X}\label{fig:x}\end{subfigure}
\begin{subfigure}[b]{0.3\textwidth}\includegraphics[width=\linewidth]{y}\caption{Y}\label{fig:y}\end{subfigure}
\caption{Both}\label{fig:xy}
\end{figure}";
        let layout = DocumentLayout::analyze(src).unwrap();
        let fig = &layout.figures[0];
        assert_eq!(fig.panels.len(), 2);
        assert_eq!(fig.panels[0].kind, PanelKind::SubfigureEnv);
        assert_eq!(fig.panels[0].width, Some(0.3));
        assert_eq!(fig.panels[1].label(), Some("fig:y"));
        assert_eq!(fig.captions.len(), 1);
        assert_eq!(fig.caption(), Some("Both"));
        assert_eq!(fig.labels.len(), 1);
    }

    #[test]
    fn bare_includes_use_label_heuristic() {
        let src = r"\begin{figure}
\includegraphics{a}\label{fig:left}
\includegraphics{b}\caption{Side by side}\label{fig:both}
\end{figure}";
        let layout = DocumentLayout::analyze(src).unwrap();
        let fig = &layout.figures[0];
        assert!(fig.is_multi());
        assert_eq!(fig.panels.len(), 2);
        assert_eq!(fig.panels[0].label(), Some("fig:left"));
        assert_eq!(fig.panels[1].label(), None);
        assert_eq!(fig.parent.as_deref(), Some("fig:both"));
    }

    #[test]
    fn single_image_figure_is_not_multi() {
        let src = r"\begin{figure}\includegraphics{a}\caption{One}\label{fig:one}\end{figure}";
        let layout = DocumentLayout::analyze(src).unwrap();
        assert!(!layout.figures[0].is_multi());
        assert!(layout.figures[0].panels.is_empty());
        assert_eq!(layout.multi_figures().count(), 0);
    }

    #[test]
    fn unlabelled_multi_figure_gets_synthetic_parent() {
        let src = r"\label{fig:multifig1}
\begin{figure}\subfloat{\includegraphics{a}}\subfloat{\includegraphics{b}}\end{figure}";
        let layout = DocumentLayout::analyze(src).unwrap();
        let fig = &layout.figures[0];
        assert_eq!(fig.parent.as_deref(), Some("fig:multifig2"));
        assert!(fig.synthetic_parent);
        assert!(fig.main_label().is_none());
    }

    #[test]
    fn tables_and_equations() {
        let src = r"\begin{table}\caption{T}\label{tab:t}\begin{tabular}{l}x\end{tabular}\end{table}
\begin{table}\begin{tabular}{l}y\end{tabular}\end{table}
\begin{equation}E=mc^2\label{eq:e}\end{equation}";
        let layout = DocumentLayout::analyze(src).unwrap();
        assert_eq!(layout.tables.len(), 2);
        assert_eq!(layout.tables[0].labels[0].id, "tab:t");
        assert!(layout.tables[1].labels.is_empty());
        assert_eq!(layout.equations.len(), 1);
        let eq_label = layout.labels.iter().find(|l| l.id == "eq:e").unwrap();
        assert!(layout.in_equation(eq_label.span.start));
    }
}
