//! LaTeX templates for replacement floats and standalone rasterisation.
//!
//! Each template can be overridden through
//! [`crate::config::ConversionConfigBuilder`]. Float templates use `{image}`,
//! `{caption}` and `{label}` placeholders; the standalone template uses
//! `%%PACKAGES%%`, `%%GRAPHICSPATH%%` and `%%CONTENT%%`.

/// Replacement for a flattened multi-figure.
pub const DEFAULT_FIGURE_TEMPLATE: &str = r"\begin{figure}[htbp]
    \centering
    \includegraphics[width=\linewidth]{{image}}
    \caption{{caption}}
    \label{{label}}
\end{figure}";

/// Replacement for a flattened table. The `tabular` wrapper makes pandoc
/// treat the image as table content so pandoc-crossref numbers it as a table.
pub const DEFAULT_TABLE_TEMPLATE: &str = r"\begin{table}[htbp]
    \centering
    \caption{{caption}}
    \label{{label}}
    \begin{tabular}{l}
    \includegraphics[width=\linewidth]{{image}}
    \end{tabular}
\end{table}";

/// Single-page document that typesets one figure body.
///
/// `\@captype` is set to `figure` so `\subfloat` / `subfigure` sub-captions
/// still print their (a), (b)… outside a float environment.
pub const DEFAULT_STANDALONE_TEMPLATE: &str = r"\documentclass[preview,border=2pt]{standalone}
\usepackage{graphicx}
%%PACKAGES%%
\usepackage{booktabs}
\usepackage{multirow}
\usepackage{makecell}
\usepackage{setspace}
\usepackage{siunitx}
\graphicspath{%%GRAPHICSPATH%%}
\makeatletter
\def\@captype{figure}
\makeatother
\begin{document}
\thispagestyle{empty}
\centering
%%CONTENT%%
\end{document}
";

/// Fill a float template.
///
/// Lines holding a `{caption}` or `{label}` placeholder are dropped when
/// there is nothing to put there, so an unlabelled table does not gain an
/// empty `\label{}`.
pub fn render_float(template: &str, image: &str, caption: Option<&str>, label: Option<&str>) -> String {
    template
        .lines()
        .filter(|line| {
            !(caption.is_none() && line.contains("{caption}") || label.is_none() && line.contains("{label}"))
        })
        .map(|line| {
            line.replace("{image}", image)
                .replace("{label}", label.unwrap_or_default())
                .replace("{caption}", caption.unwrap_or_default())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fill the standalone template.
pub fn render_standalone(template: &str, packages: &str, graphics_path: &str, content: &str) -> String {
    template
        .replace("%%PACKAGES%%", packages)
        .replace("%%GRAPHICSPATH%%", graphics_path)
        .replace("%%CONTENT%%", content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn figure_template_fills_all_slots() {
        let out = render_float(
            DEFAULT_FIGURE_TEMPLATE,
            "_multifig/multifig_results.png",
            Some(r"Results on {\em all} sets"),
            Some("fig:results"),
        );
        assert!(out.contains(r"\includegraphics[width=\linewidth]{_multifig/multifig_results.png}"));
        assert!(out.contains(r"\caption{Results on {\em all} sets}"));
        assert!(out.contains(r"\label{fig:results}"));
        assert!(out.starts_with(r"\begin{figure}[htbp]"));
        assert!(out.ends_with(r"\end{figure}"));
    }

    #[test]
    fn missing_caption_and_label_drop_their_lines() {
        let out = render_float(DEFAULT_TABLE_TEMPLATE, "t.png", None, None);
        assert!(!out.contains(r"\caption"));
        assert!(!out.contains(r"\label"));
        assert!(out.contains(r"\includegraphics[width=\linewidth]{t.png}"));
    }

    #[test]
    fn standalone_placeholders() {
        let out = render_standalone(
            DEFAULT_STANDALONE_TEMPLATE,
            r"\usepackage{subfig}",
            "{../figures/}{../}",
            r"\subfloat[A]{\includegraphics{a}}",
        );
        assert!(out.contains(r"\usepackage{subfig}"));
        assert!(out.contains(r"\graphicspath{{../figures/}{../}}"));
        assert!(out.contains(r"\subfloat[A]{\includegraphics{a}}"));
        assert!(!out.contains("%%"));
    }
}
