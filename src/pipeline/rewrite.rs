//! Document rewriting.
//!
//! One forward pass over the loaded document produces the text pandoc sees:
//!
//! - every flattened block is swapped for its replacement float,
//! - references to panels of a flattened figure become `\ref{parent}(x)`,
//!   references to extra names of a flattened float become `\ref{parent}`,
//! - numbering directives pandoc-crossref cannot honour are dropped,
//! - every reference is checked against the registry; all dangling ones
//!   are reported together.

use crate::error::{Tex2DocxError, UnresolvedReference};
use crate::pipeline::extract::MultiFigureBlock;
use crate::pipeline::labels::{Label, LabelKind, LabelRegistry};
use crate::pipeline::rasterize::FlattenedImage;
use crate::pipeline::scan;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

static RE_NUMBERING_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        \\numberwithin \s* \{[^{}]*\} \s* \{[^{}]*\}
      | \\counterwith(?:in|out)\*? \s* \{[^{}]*\} \s* \{[^{}]*\}
      | \\setcounter \s* \{\s*(?:figure|table|equation)\s*\} \s* \{[^{}]*\}
        ",
    )
    .unwrap()
});

/// Rewritten document plus what changed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RewriteOutcome {
    pub text: String,
    pub blocks_replaced: usize,
    pub references: usize,
    pub references_rewritten: usize,
    pub directives_removed: usize,
}

/// Rewrite `text` (the loaded document the blocks were extracted from).
///
/// `images[i].block` indexes `blocks`; blocks without an image stay as they
/// are.
pub fn rewrite(
    text: &str,
    registry: &LabelRegistry,
    blocks: &[MultiFigureBlock],
    images: &[FlattenedImage],
) -> Result<RewriteOutcome, Tex2DocxError> {
    let mut replaced: Vec<(&MultiFigureBlock, &str)> = images
        .iter()
        .filter_map(|img| blocks.get(img.block).map(|b| (b, img.replacement.as_str())))
        .collect();
    replaced.sort_by_key(|(b, _)| b.span.start);

    let flattened: HashSet<&str> = replaced.iter().filter_map(|(b, _)| b.parent.as_deref()).collect();
    let mut pass = ReferencePass {
        registry,
        flattened,
        unresolved: Vec::new(),
        outcome: RewriteOutcome::default(),
    };

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (block, replacement) in &replaced {
        pass.segment(text, last..block.span.start, &mut out)?;
        // Captions travel into the replacement verbatim; their references
        // still need rewriting.
        let mut markup = String::with_capacity(replacement.len());
        pass.fragment(replacement, block.line, &mut markup)?;
        out.push_str(&markup);
        pass.outcome.blocks_replaced += 1;
        last = block.span.end;
    }
    pass.segment(text, last..text.len(), &mut out)?;

    if !pass.unresolved.is_empty() {
        return Err(Tex2DocxError::UnresolvedReferences {
            references: pass.unresolved,
        });
    }

    let mut outcome = pass.outcome;
    outcome.text = out;
    info!(
        "Rewrote document: {} block(s) replaced, {}/{} reference(s) rewritten, {} numbering directive(s) removed",
        outcome.blocks_replaced, outcome.references_rewritten, outcome.references, outcome.directives_removed
    );
    Ok(outcome)
}

struct ReferencePass<'r> {
    registry: &'r LabelRegistry,
    flattened: HashSet<&'r str>,
    unresolved: Vec<UnresolvedReference>,
    outcome: RewriteOutcome,
}

impl ReferencePass<'_> {
    /// Original text between blocks: references and numbering directives.
    fn segment(&mut self, text: &str, range: std::ops::Range<usize>, out: &mut String) -> Result<(), Tex2DocxError> {
        let mut rewritten = String::with_capacity(range.len());
        let mut last = range.start;
        for r in scan::commands_in(text, range.clone(), &["ref", "eqref", "subref"]) {
            let r = r?;
            let line = scan::line_at(text, r.span.start);
            rewritten.push_str(&text[last..r.span.start]);
            rewritten.push_str(&self.reference(&text[r.span.clone()], r.argument.trim(), line));
            last = r.span.end;
        }
        rewritten.push_str(&text[last..range.end]);

        let stripped = RE_NUMBERING_DIRECTIVE.replace_all(&rewritten, "");
        let removed = RE_NUMBERING_DIRECTIVE.find_iter(&rewritten).count();
        if removed > 0 {
            debug!("Removed {} numbering directive(s)", removed);
            self.outcome.directives_removed += removed;
        }
        out.push_str(&stripped);
        Ok(())
    }

    /// Generated markup: references only, all reported at `line`.
    fn fragment(&mut self, markup: &str, line: usize, out: &mut String) -> Result<(), Tex2DocxError> {
        let mut last = 0;
        for r in scan::references(markup) {
            let r = r?;
            out.push_str(&markup[last..r.span.start]);
            out.push_str(&self.reference(&markup[r.span.clone()], r.target, line));
            last = r.span.end;
        }
        out.push_str(&markup[last..]);
        Ok(())
    }

    /// Replacement for one reference (`original` when it stays).
    fn reference(&mut self, original: &str, target: &str, line: usize) -> String {
        self.outcome.references += 1;
        let Some(label) = self.registry.get(target) else {
            if !self.unresolved.iter().any(|u| u.label == target) {
                self.unresolved.push(UnresolvedReference {
                    label: target.to_string(),
                    line,
                });
            }
            return original.to_string();
        };

        let root = self.root_of(label);
        let replacement = match (root.kind, root.parent.as_deref(), root.letter) {
            (LabelKind::Subfigure, Some(parent), Some(letter)) if self.flattened.contains(parent) => {
                Some(format!("\\ref{{{parent}}}({letter})"))
            }
            _ if label.alias_of.is_some() && self.flattened.contains(root.id.as_str()) => {
                Some(format!("\\ref{{{}}}", root.id))
            }
            _ => None,
        };
        match replacement {
            Some(new) => {
                debug!("{} → {}", original, new);
                self.outcome.references_rewritten += 1;
                new
            }
            None => original.to_string(),
        }
    }

    fn root_of<'l>(&'l self, mut label: &'l Label) -> &'l Label {
        // Alias chains are one link long; the bound guards against cycles.
        for _ in 0..8 {
            match label.alias_of.as_deref().and_then(|t| self.registry.get(t)) {
                Some(target) => label = target,
                None => break,
            }
        }
        label
    }
}
