//! Label registry.
//!
//! Labels are stored in an arena (`Vec<Label>`) with an id → slot map.
//! Registration and resolution are separate passes: [`populate`] registers
//! every label in document order, and only afterwards does the rewriter
//! resolve references, so a forward reference (`see Figure~\ref{fig:later}`)
//! behaves exactly like a backward one.

use crate::error::Tex2DocxError;
use crate::pipeline::layout::{DocumentLayout, FigureEnv};
use crate::pipeline::scan::line_at;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// What a label names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LabelKind {
    Figure,
    Subfigure,
    Table,
    Equation,
    /// Anything outside floats and equations; headings in practice.
    Section,
}

/// A registered label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Label {
    pub id: String,
    pub kind: LabelKind,
    /// Parent figure id, for subfigures.
    pub parent: Option<String>,
    /// 1-based per kind; subfigures share their parent's index.
    pub index: usize,
    /// Subfigure letter, `a` for the first panel.
    pub letter: Option<char>,
    /// Set when this id is an extra name for another label.
    pub alias_of: Option<String>,
    pub line: usize,
}

/// Resolved number of a label, e.g. `3` or `3(b)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub kind: LabelKind,
    pub index: usize,
    pub letter: Option<char>,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.letter {
            Some(letter) => write!(f, "{}({})", self.index, letter),
            None => write!(f, "{}", self.index),
        }
    }
}

#[derive(Debug, Default)]
struct Scope {
    /// Panels seen so far, labelled or not.
    panels: usize,
}

/// Arena of labels keyed by id.
#[derive(Debug, Default)]
pub struct LabelRegistry {
    labels: Vec<Label>,
    by_id: HashMap<String, usize>,
    counters: HashMap<LabelKind, usize>,
    scopes: HashMap<String, Scope>,
}

/// Most panels one figure can letter, `a` through `z`.
pub const MAX_PANELS: usize = 26;

/// Letter of the panel at `position` (0-based), `None` past `z`.
pub fn panel_letter(position: usize) -> Option<char> {
    (position < MAX_PANELS).then(|| char::from(b'a' + position as u8))
}

fn letter_for(parent: &str, position: usize, line: usize) -> Result<char, Tex2DocxError> {
    panel_letter(position).ok_or_else(|| {
        Tex2DocxError::parse(
            "\\label",
            line,
            format!("figure '{parent}' has more than {MAX_PANELS} panels"),
        )
    })
}

impl LabelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_unique(&self, id: &str, line: usize) -> Result<(), Tex2DocxError> {
        if let Some(&slot) = self.by_id.get(id) {
            return Err(Tex2DocxError::DuplicateLabel {
                label: id.to_string(),
                first_line: self.labels[slot].line,
                second_line: line,
            });
        }
        Ok(())
    }

    fn insert(&mut self, label: Label) -> Tag {
        let tag = Tag {
            kind: label.kind,
            index: label.index,
            letter: label.letter,
        };
        self.by_id.insert(label.id.clone(), self.labels.len());
        self.labels.push(label);
        tag
    }

    /// Register `id`.
    ///
    /// Non-subfigure kinds take the next index of their kind. Subfigures
    /// need a registered `parent` and take its next letter.
    pub fn register(
        &mut self,
        id: &str,
        kind: LabelKind,
        parent: Option<&str>,
        line: usize,
    ) -> Result<Tag, Tex2DocxError> {
        self.check_unique(id, line)?;

        if kind == LabelKind::Subfigure {
            let Some(parent_id) = parent else {
                return Err(Tex2DocxError::parse("\\label", line, format!("subfigure label '{id}' has no parent figure")));
            };
            let (parent_index, position) = self.next_panel(parent_id, line)?;
            let letter = letter_for(parent_id, position, line)?;
            return Ok(self.insert(Label {
                id: id.to_string(),
                kind,
                parent: Some(parent_id.to_string()),
                index: parent_index,
                letter: Some(letter),
                alias_of: None,
                line,
            }));
        }

        let counter = self.counters.entry(kind).or_insert(0);
        *counter += 1;
        let index = *counter;
        if kind == LabelKind::Figure {
            self.scopes.insert(id.to_string(), Scope::default());
        }
        Ok(self.insert(Label {
            id: id.to_string(),
            kind,
            parent: None,
            index,
            letter: None,
            alias_of: None,
            line,
        }))
    }

    /// Consume the next panel position of `parent` without a label, so later
    /// panels keep letters that match their position.
    pub fn reserve_letter(&mut self, parent: &str, line: usize) -> Result<char, Tex2DocxError> {
        let (_, position) = self.next_panel(parent, line)?;
        letter_for(parent, position, line)
    }

    fn next_panel(&mut self, parent: &str, line: usize) -> Result<(usize, usize), Tex2DocxError> {
        let index = match self.get(parent) {
            Some(p) if p.kind == LabelKind::Figure => p.index,
            _ => {
                return Err(Tex2DocxError::parse(
                    "\\label",
                    line,
                    format!("subfigure parent '{parent}' is not a registered figure"),
                ))
            }
        };
        let scope = self.scopes.entry(parent.to_string()).or_default();
        let position = scope.panels;
        scope.panels += 1;
        Ok((index, position))
    }

    /// Register `id` as another name for the already registered `target`.
    pub fn register_alias(&mut self, id: &str, target: &str, line: usize) -> Result<Tag, Tex2DocxError> {
        self.check_unique(id, line)?;
        let Some(t) = self.get(target) else {
            return Err(Tex2DocxError::parse("\\label", line, format!("alias target '{target}' is not registered")));
        };
        let label = Label {
            id: id.to_string(),
            kind: t.kind,
            parent: t.parent.clone(),
            index: t.index,
            letter: t.letter,
            alias_of: Some(target.to_string()),
            line,
        };
        Ok(self.insert(label))
    }

    pub fn get(&self, id: &str) -> Option<&Label> {
        self.by_id.get(id).map(|&slot| &self.labels[slot])
    }

    pub fn resolve(&self, id: &str) -> Option<Tag> {
        self.get(id).map(|l| Tag {
            kind: l.kind,
            index: l.index,
            letter: l.letter,
        })
    }

    /// Subfigure labels of `parent` in letter order.
    pub fn children<'s>(&'s self, parent: &'s str) -> impl Iterator<Item = &'s Label> + 's {
        self.labels
            .iter()
            .filter(move |l| l.kind == LabelKind::Subfigure && l.alias_of.is_none() && l.parent.as_deref() == Some(parent))
    }

    /// All labels in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Registration pass over a whole document.
///
/// Labels are visited in document order. A figure's parent label is
/// registered when the sweep enters the figure, so it precedes its panels
/// even when `\label{fig:parent}` is written after them.
pub fn populate(layout: &DocumentLayout<'_>) -> Result<LabelRegistry, Tex2DocxError> {
    let mut registry = LabelRegistry::new();
    let text = layout.text;
    let mut figure_cursor = 0;

    for site in &layout.labels {
        // Enter every figure that starts before this label.
        while let Some(fig) = layout.figures.get(figure_cursor) {
            if fig.span.start > site.span.start {
                break;
            }
            enter_figure(&mut registry, text, fig)?;
            figure_cursor += 1;
        }

        if let Some(fig) = layout.figure_at(site.span.start) {
            let in_panel = fig.panels.iter().any(|p| p.labels.iter().any(|l| l.span == site.span));
            let is_main = fig.main_label().is_some_and(|m| m.span == site.span);
            if in_panel || is_main {
                continue; // registered by enter_figure
            }
            match fig.parent.as_deref() {
                Some(parent) => registry.register_alias(site.id, parent, site.line)?,
                None => registry.register(site.id, LabelKind::Figure, None, site.line)?,
            };
        } else if let Some(table) = layout.table_at(site.span.start) {
            match table.labels.first() {
                Some(first) if first.span != site.span => {
                    registry.register_alias(site.id, first.id, site.line)?;
                }
                _ => {
                    registry.register(site.id, LabelKind::Table, None, site.line)?;
                }
            }
        } else if layout.in_equation(site.span.start) {
            registry.register(site.id, LabelKind::Equation, None, site.line)?;
        } else {
            registry.register(site.id, LabelKind::Section, None, site.line)?;
        }
    }
    for fig in &layout.figures[figure_cursor..] {
        enter_figure(&mut registry, text, fig)?;
    }

    tracing::debug!("Registered {} label(s)", registry.len());
    Ok(registry)
}

/// Register a figure's parent and then its panels in position order.
fn enter_figure(registry: &mut LabelRegistry, text: &str, fig: &FigureEnv<'_>) -> Result<(), Tex2DocxError> {
    let Some(parent) = fig.parent.as_deref() else {
        return Ok(());
    };
    let line = fig
        .main_label()
        .map(|m| m.line)
        .unwrap_or_else(|| line_at(text, fig.span.start));
    registry.register(parent, LabelKind::Figure, None, line)?;

    for panel in &fig.panels {
        match panel.labels.split_first() {
            Some((own, extra)) => {
                registry.register(own.id, LabelKind::Subfigure, Some(parent), own.line)?;
                for alias in extra {
                    registry.register_alias(alias.id, own.id, alias.line)?;
                }
            }
            None => {
                registry.reserve_letter(parent, line_at(text, panel.span.start))?;
            }
        }
    }
    Ok(())
}
