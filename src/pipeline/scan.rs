//! Brace-aware scanner for the slice of LaTeX the pipeline cares about.
//!
//! Regular expressions cannot pair braces: `\caption{A {\em nested} caption}`
//! ends at the *second* `}`, not the first. Everything here walks the text
//! byte by byte, tracking brace depth and skipping control symbols (`\{`,
//! `\}`, `\\`, `\%`), so an extracted argument is exactly the text between a
//! command's `{` and its paired `}`.
//!
//! Scanning is lazy: [`commands`] and [`environments`] return iterators that
//! yield non-overlapping matches in document order. Unbalanced input is
//! reported as [`Tex2DocxError::Parse`] with the offending construct and an
//! approximate line number.
//!
//! Braces, brackets and backslashes are ASCII, and UTF-8 continuation bytes
//! never collide with ASCII, so offsets found by matching those bytes are
//! valid `str` indices. Anything else is stepped over a whole `char` at a
//! time.

use crate::error::Tex2DocxError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

/// One command occurrence, e.g. `\includegraphics[width=.5\linewidth]{a.png}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command<'a> {
    /// Command name without the backslash or star.
    pub name: &'a str,
    pub starred: bool,
    /// From the backslash through the closing `}` of the argument.
    pub span: Range<usize>,
    /// Inner text of each `[…]` optional argument, in order.
    pub optional: Vec<&'a str>,
    /// Inner text of the mandatory `{…}` argument.
    pub argument: &'a str,
    /// Byte range of `argument` within the scanned text.
    pub argument_span: Range<usize>,
}

/// One `\begin{name} … \end{name}` environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment<'a> {
    /// Environment name including any star (`figure*`).
    pub name: &'a str,
    /// From `\begin` through the closing `}` of `\end{…}`.
    pub span: Range<usize>,
    /// Text between `\begin{name}` and `\end{name}`.
    pub body: Range<usize>,
}

/// How a reference was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RefStyle {
    /// `\ref{…}`
    Plain,
    /// `\eqref{…}`
    Eqref,
    /// `\subref{…}`
    Subref,
}

/// A reference occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference<'a> {
    pub span: Range<usize>,
    pub target: &'a str,
    pub style: RefStyle,
    pub line: usize,
}

/// A `\label{…}` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSite<'a> {
    pub span: Range<usize>,
    pub id: &'a str,
    pub line: usize,
}

/// 1-based line number of a byte offset.
pub fn line_at(text: &str, offset: usize) -> usize {
    let end = offset.min(text.len());
    text.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}

/// Offset of the `}` paired with the `{` at `open`, honouring escapes.
pub fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    debug_assert_eq!(bytes.get(open), Some(&b'{'));
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Offset of the `]` closing the `[` at `open`. Brace groups inside are skipped.
fn matching_bracket(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'{' => i = matching_brace(text, i)?,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn skip_whitespace(text: &str, mut i: usize) -> usize {
    let bytes = text.as_bytes();
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Arguments parsed after a command name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arguments<'a> {
    pub optional: Vec<&'a str>,
    /// Inner spans of the mandatory groups.
    pub mandatory: Vec<Range<usize>>,
    /// Offset just past the last consumed argument.
    pub end: usize,
}

/// Parse `[opt]…{arg}…` starting at `pos`.
///
/// Returns `Ok(None)` when fewer than `mandatory` brace groups follow: the
/// command is then being mentioned (`\let\oldref\ref`) rather than used.
/// Unbalanced groups are a parse error attributed to `construct`.
pub fn parse_arguments<'a>(
    text: &'a str,
    pos: usize,
    mandatory: usize,
    construct: &str,
) -> Result<Option<Arguments<'a>>, Tex2DocxError> {
    let bytes = text.as_bytes();
    let mut i = skip_whitespace(text, pos);
    let mut optional = Vec::new();
    while i < bytes.len() && bytes[i] == b'[' {
        let close = matching_bracket(text, i).ok_or_else(|| {
            Tex2DocxError::parse(construct, line_at(text, i), "unbalanced `[` optional argument")
        })?;
        optional.push(&text[i + 1..close]);
        i = skip_whitespace(text, close + 1);
    }

    let mut groups = Vec::with_capacity(mandatory);
    let mut end = i;
    for n in 0..mandatory {
        if n > 0 {
            i = skip_whitespace(text, end);
        }
        if i >= bytes.len() || bytes[i] != b'{' {
            return Ok(None);
        }
        let close = matching_brace(text, i).ok_or_else(|| {
            Tex2DocxError::parse(construct, line_at(text, i), "unbalanced braces in argument")
        })?;
        groups.push(i + 1..close);
        end = close + 1;
    }

    Ok(Some(Arguments {
        optional,
        mandatory: groups,
        end,
    }))
}

/// Lazy iterator over commands with one mandatory argument.
pub struct Commands<'a, 'n> {
    text: &'a str,
    names: &'n [&'n str],
    pos: usize,
    done: bool,
}

/// Iterate over every use of the given commands in `text`.
///
/// ```rust
/// use tex2docx::pipeline::scan::commands;
///
/// let src = r"\caption{A {\em nested} caption} \label{fig:x}";
/// let caps: Vec<_> = commands(src, &["caption"]).collect::<Result<_, _>>().unwrap();
/// assert_eq!(caps[0].argument, r"A {\em nested} caption");
/// ```
pub fn commands<'a, 'n>(text: &'a str, names: &'n [&'n str]) -> Commands<'a, 'n> {
    Commands {
        text,
        names,
        pos: 0,
        done: false,
    }
}

/// Like [`commands`], restricted to `range`; spans stay relative to `text`.
pub fn commands_in<'a, 'n>(text: &'a str, range: Range<usize>, names: &'n [&'n str]) -> Commands<'a, 'n> {
    Commands {
        text: &text[..range.end],
        names,
        pos: range.start,
        done: false,
    }
}

impl<'a> Iterator for Commands<'a, '_> {
    type Item = Result<Command<'a>, Tex2DocxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let text = self.text;
        let bytes = text.as_bytes();
        loop {
            let start = self.pos + text[self.pos..].find('\\')?;
            let name_start = start + 1;
            let mut name_end = name_start;
            while name_end < bytes.len() && bytes[name_end].is_ascii_alphabetic() {
                name_end += 1;
            }
            if name_end == name_start {
                // Control symbol such as `\\`, `\%`, `\{` or `\中`.
                self.pos = name_start + text[name_start..].chars().next().map_or(0, char::len_utf8);
                continue;
            }
            self.pos = name_end;
            let name = &text[name_start..name_end];
            if !self.names.contains(&name) {
                continue;
            }

            let starred = bytes.get(name_end) == Some(&b'*');
            let after_name = if starred { name_end + 1 } else { name_end };
            let construct = format!("\\{name}");
            match parse_arguments(text, after_name, 1, &construct) {
                Ok(Some(args)) => {
                    let argument_span = args.mandatory[0].clone();
                    self.pos = args.end;
                    return Some(Ok(Command {
                        name,
                        starred,
                        span: start..args.end,
                        optional: args.optional,
                        argument: &text[argument_span.clone()],
                        argument_span,
                    }));
                }
                Ok(None) => {
                    tracing::debug!("{} at line {} has no argument; skipped", construct, line_at(text, start));
                    continue;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Lazy iterator over environments with the given names.
pub struct Environments<'a, 'n> {
    text: &'a str,
    names: &'n [&'n str],
    pos: usize,
    done: bool,
}

/// Iterate over the outermost `\begin{name} … \end{name}` blocks in `text`.
///
/// Nested environments of the same name are paired correctly; an environment
/// of a *different* listed name inside a match is not yielded separately.
pub fn environments<'a, 'n>(text: &'a str, names: &'n [&'n str]) -> Environments<'a, 'n> {
    Environments {
        text,
        names,
        pos: 0,
        done: false,
    }
}

/// Like [`environments`], restricted to `range`; spans stay relative to `text`.
pub fn environments_in<'a, 'n>(
    text: &'a str,
    range: Range<usize>,
    names: &'n [&'n str],
) -> Environments<'a, 'n> {
    Environments {
        text: &text[..range.end],
        names,
        pos: range.start,
        done: false,
    }
}

impl<'a> Iterator for Environments<'a, '_> {
    type Item = Result<Environment<'a>, Tex2DocxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let text = self.text;
        let mut scan = Commands {
            text,
            names: &["begin", "end"],
            pos: self.pos,
            done: false,
        };

        let begin = loop {
            match scan.next()? {
                Ok(cmd) if cmd.name == "begin" && self.names.contains(&cmd.argument.trim()) => break cmd,
                Ok(_) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        };
        let name = begin.argument.trim();

        let mut depth = 1usize;
        for cmd in scan.by_ref() {
            let cmd = match cmd {
                Ok(c) => c,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            if cmd.argument.trim() != name {
                continue;
            }
            if cmd.name == "begin" {
                depth += 1;
            } else {
                depth -= 1;
                if depth == 0 {
                    self.pos = cmd.span.end;
                    return Some(Ok(Environment {
                        name,
                        span: begin.span.start..cmd.span.end,
                        body: begin.span.end..cmd.span.start,
                    }));
                }
            }
        }

        self.done = true;
        Some(Err(Tex2DocxError::parse(
            format!("\\begin{{{name}}}"),
            line_at(text, begin.span.start),
            format!("environment is never closed with \\end{{{name}}}"),
        )))
    }
}

/// Every `\label{…}` in `text`.
pub fn labels(text: &str) -> impl Iterator<Item = Result<LabelSite<'_>, Tex2DocxError>> + '_ {
    labels_in(text, 0..text.len())
}

/// Every `\label{…}` inside `range` of `text`.
pub fn labels_in(
    text: &str,
    range: Range<usize>,
) -> impl Iterator<Item = Result<LabelSite<'_>, Tex2DocxError>> + '_ {
    commands_in(text, range, &["label"]).map(move |cmd| {
        cmd.map(|c| LabelSite {
            line: line_at(text, c.span.start),
            id: c.argument.trim(),
            span: c.span,
        })
    })
}

/// Every `\ref`, `\eqref` and `\subref` in `text`.
pub fn references(text: &str) -> impl Iterator<Item = Result<Reference<'_>, Tex2DocxError>> + '_ {
    commands(text, &["ref", "eqref", "subref"]).map(move |cmd| {
        cmd.map(|c| Reference {
            line: line_at(text, c.span.start),
            target: c.argument.trim(),
            style: match c.name {
                "eqref" => RefStyle::Eqref,
                "subref" => RefStyle::Subref,
                _ => RefStyle::Plain,
            },
            span: c.span,
        })
    })
}

/// Remove `%` comments (through the end of line, newline included).
///
/// Escaped percent signs (`\%`) are kept. A `%` ending a line joins it with
/// the next one, matching TeX's own reading of the source.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '%' => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Entries of the last `\graphicspath{{a/}{b/}}` declaration.
pub fn graphics_paths(text: &str) -> Result<Vec<String>, Tex2DocxError> {
    let mut last = None;
    for cmd in commands(text, &["graphicspath"]) {
        last = Some(cmd?);
    }
    let Some(cmd) = last else {
        return Ok(Vec::new());
    };

    let arg = cmd.argument;
    let mut entries = Vec::new();
    let mut i = 0;
    while let Some(rel) = arg[i..].find('{') {
        let open = i + rel;
        let close = matching_brace(arg, open).ok_or_else(|| {
            Tex2DocxError::parse("\\graphicspath", line_at(text, cmd.span.start), "unbalanced path group")
        })?;
        let entry = arg[open + 1..close].trim();
        if !entry.is_empty() {
            entries.push(entry.to_string());
        }
        i = close + 1;
    }
    Ok(entries)
}

/// Which subfigure package the document uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum FigurePackage {
    /// `subfig` (`\subfloat`).
    Subfig,
    /// Legacy `subfigure` (`\subfigure[…]{…}`).
    Subfigure,
    /// `subcaption` (`subfigure` environment).
    Subcaption,
    /// Plain `graphicx` layouts.
    #[default]
    None,
}

static RE_USEPACKAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\usepackage\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}").unwrap());
static RE_SUBFIGURE_ENV: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\begin\s*\{subfigure\}").unwrap());
static RE_SUBFLOAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\subfloat\b").unwrap());
static RE_SUBFIGURE_CMD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\subfigure\s*[\[{]").unwrap());
static RE_CJK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}]").unwrap());

/// Detect the subfigure package from `\usepackage` lines, then from usage.
pub fn figure_package(text: &str) -> FigurePackage {
    for caps in RE_USEPACKAGE.captures_iter(text) {
        for pkg in caps[1].split(',').map(str::trim) {
            match pkg {
                "subcaption" => return FigurePackage::Subcaption,
                "subfig" => return FigurePackage::Subfig,
                "subfigure" => return FigurePackage::Subfigure,
                _ => {}
            }
        }
    }
    if RE_SUBFLOAT.is_match(text) {
        FigurePackage::Subfig
    } else if RE_SUBFIGURE_ENV.is_match(text) {
        FigurePackage::Subcaption
    } else if RE_SUBFIGURE_CMD.is_match(text) {
        FigurePackage::Subfigure
    } else {
        FigurePackage::None
    }
}

/// True when `text` contains CJK script that needs `xeCJK` to typeset.
pub fn has_cjk(text: &str) -> bool {
    RE_CJK.is_match(text)
}
