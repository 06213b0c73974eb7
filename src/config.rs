//! Configuration types for LaTeX-to-Word conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. The config is immutable once built and
//! is passed by reference into every pipeline stage; there is no global state.

use crate::error::Tex2DocxError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::{Path, PathBuf};

/// Configuration for a LaTeX-to-Word conversion.
///
/// Built via [`ConversionConfig::builder()`].
///
/// # Example
/// ```rust,no_run
/// use tex2docx::ConversionConfig;
///
/// let config = ConversionConfig::builder("paper/main.tex", "paper/main.docx")
///     .bibliography("paper/ref.bib")
///     .dpi(600)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Main LaTeX file.
    pub input: PathBuf,

    /// Word document to produce.
    pub output: PathBuf,

    /// Parent directory for the scratch workspace. Default: system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Word reference document supplying styles (`--reference-doc`).
    pub reference_doc: Option<PathBuf>,

    /// BibTeX file. When `None`, the first `*.bib` next to the input is used.
    pub bibliography: Option<PathBuf>,

    /// CSL citation style file.
    pub csl: Option<PathBuf>,

    /// Optional pandoc Lua filter run before pandoc-crossref.
    pub lua_filter: Option<PathBuf>,

    /// Keep the scratch workspace for post-mortem inspection. Default: false.
    pub debug: bool,

    /// Rasterisation resolution for flattened figures. Range: 150–1200. Default: 600.
    ///
    /// 600 DPI keeps line art sharp when Word scales the image to the full
    /// text width of a printed page.
    pub dpi: u32,

    /// Also flatten `table` environments into images. Default: false.
    pub flatten_tables: bool,

    /// Pass `--number-sections` to pandoc. Default: true.
    pub number_sections: bool,

    /// Run the `pandoc-crossref` filter. Default: true.
    pub crossref: bool,

    /// Title of the bibliography section. Default: "References".
    pub reference_section_title: String,

    /// Name of the directory (inside the working copy) holding flattened PNGs.
    /// Default: `_multifig`.
    pub figure_dir_name: String,

    /// Replacement figure markup. Placeholders: `{image}`, `{caption}`, `{label}`.
    pub figure_template: Option<String>,

    /// Replacement table markup. Placeholders: `{image}`, `{caption}`, `{label}`.
    pub table_template: Option<String>,

    /// Standalone document used for rasterisation. Placeholders:
    /// `%%PACKAGES%%`, `%%GRAPHICSPATH%%`, `%%CONTENT%%`.
    pub standalone_template: Option<String>,

    /// External programs.
    pub tools: ToolPrograms,

    /// Optional per-stage progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("input", &self.input)
            .field("output", &self.output)
            .field("temp_dir", &self.temp_dir)
            .field("reference_doc", &self.reference_doc)
            .field("bibliography", &self.bibliography)
            .field("csl", &self.csl)
            .field("lua_filter", &self.lua_filter)
            .field("debug", &self.debug)
            .field("dpi", &self.dpi)
            .field("flatten_tables", &self.flatten_tables)
            .field("number_sections", &self.number_sections)
            .field("crossref", &self.crossref)
            .field("tools", &self.tools)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: ConversionConfig {
                input: input.into(),
                output: output.into(),
                temp_dir: None,
                reference_doc: None,
                bibliography: None,
                csl: None,
                lua_filter: None,
                debug: false,
                dpi: 600,
                flatten_tables: false,
                number_sections: true,
                crossref: true,
                reference_section_title: "References".to_string(),
                figure_dir_name: "_multifig".to_string(),
                figure_template: None,
                table_template: None,
                standalone_template: None,
                tools: ToolPrograms::default(),
                progress_callback: None,
            },
            auto_bibliography: true,
        }
    }

    /// Directory containing the main LaTeX file.
    pub fn source_dir(&self) -> &Path {
        match self.input.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    /// File stem of the main LaTeX file (`main` for `main.tex`).
    pub fn input_stem(&self) -> String {
        self.input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    }
}

/// Names (or paths) of the external programs the pipeline shells out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPrograms {
    pub pandoc: String,
    pub crossref_filter: String,
    pub latex: String,
    pub pdf_to_png: String,
}

impl Default for ToolPrograms {
    fn default() -> Self {
        Self {
            pandoc: "pandoc".to_string(),
            crossref_filter: "pandoc-crossref".to_string(),
            latex: "xelatex".to_string(),
            pdf_to_png: "pdftocairo".to_string(),
        }
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
    auto_bibliography: bool,
}

impl fmt::Debug for ConversionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfigBuilder")
            .field("config", &self.config)
            .field("auto_bibliography", &self.auto_bibliography)
            .finish()
    }
}

impl ConversionConfigBuilder {
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn reference_doc(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.reference_doc = Some(path.into());
        self
    }

    pub fn bibliography(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.bibliography = Some(path.into());
        self
    }

    /// Disable the `*.bib` lookup next to the input when no bibliography is set.
    pub fn auto_bibliography(mut self, v: bool) -> Self {
        self.auto_bibliography = v;
        self
    }

    pub fn csl(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.csl = Some(path.into());
        self
    }

    pub fn lua_filter(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.lua_filter = Some(path.into());
        self
    }

    pub fn debug(mut self, v: bool) -> Self {
        self.config.debug = v;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(150, 1200);
        self
    }

    pub fn flatten_tables(mut self, v: bool) -> Self {
        self.config.flatten_tables = v;
        self
    }

    pub fn number_sections(mut self, v: bool) -> Self {
        self.config.number_sections = v;
        self
    }

    pub fn crossref(mut self, v: bool) -> Self {
        self.config.crossref = v;
        self
    }

    pub fn reference_section_title(mut self, title: impl Into<String>) -> Self {
        self.config.reference_section_title = title.into();
        self
    }

    pub fn figure_dir_name(mut self, name: impl Into<String>) -> Self {
        self.config.figure_dir_name = name.into();
        self
    }

    pub fn figure_template(mut self, template: impl Into<String>) -> Self {
        self.config.figure_template = Some(template.into());
        self
    }

    pub fn table_template(mut self, template: impl Into<String>) -> Self {
        self.config.table_template = Some(template.into());
        self
    }

    pub fn standalone_template(mut self, template: impl Into<String>) -> Self {
        self.config.standalone_template = Some(template.into());
        self
    }

    pub fn tools(mut self, tools: ToolPrograms) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// When no bibliography was given, the first `*.bib` file (by name) in the
    /// input's directory is picked up.
    pub fn build(mut self) -> Result<ConversionConfig, Tex2DocxError> {
        let c = &self.config;
        if c.input.as_os_str().is_empty() {
            return Err(Tex2DocxError::InvalidConfig("input path is empty".into()));
        }
        if c.output.as_os_str().is_empty() {
            return Err(Tex2DocxError::InvalidConfig("output path is empty".into()));
        }
        if c.dpi < 150 || c.dpi > 1200 {
            return Err(Tex2DocxError::InvalidConfig(format!(
                "DPI must be 150–1200, got {}",
                c.dpi
            )));
        }
        if c.figure_dir_name.is_empty()
            || c.figure_dir_name.contains(['/', '\\'])
            || c.figure_dir_name == "."
            || c.figure_dir_name == ".."
        {
            return Err(Tex2DocxError::InvalidConfig(format!(
                "figure directory name must be a single path component, got '{}'",
                c.figure_dir_name
            )));
        }
        for (name, template) in [
            ("figure", &c.figure_template),
            ("table", &c.table_template),
        ] {
            if let Some(t) = template {
                if !t.contains("{image}") {
                    return Err(Tex2DocxError::InvalidConfig(format!(
                        "{name} template must contain the {{image}} placeholder"
                    )));
                }
            }
        }
        if let Some(t) = &c.standalone_template {
            if !t.contains("%%CONTENT%%") {
                return Err(Tex2DocxError::InvalidConfig(
                    "standalone template must contain the %%CONTENT%% placeholder".into(),
                ));
            }
        }

        if self.config.bibliography.is_none() && self.auto_bibliography {
            self.config.bibliography = find_sibling_bibliography(self.config.source_dir());
        }
        Ok(self.config)
    }
}

/// First `*.bib` file (sorted by file name) in `dir`.
fn find_sibling_bibliography(dir: &Path) -> Option<PathBuf> {
    let mut bibs: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "bib"))
        .collect();
    bibs.sort();
    bibs.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ConversionConfig::builder("doc/main.tex", "out/main.docx")
            .auto_bibliography(false)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 600);
        assert!(c.number_sections);
        assert!(c.crossref);
        assert!(!c.flatten_tables);
        assert!(!c.debug);
        assert_eq!(c.figure_dir_name, "_multifig");
        assert_eq!(c.reference_section_title, "References");
        assert_eq!(c.source_dir(), Path::new("doc"));
        assert_eq!(c.input_stem(), "main");
    }

    #[test]
    fn dpi_is_clamped() {
        let c = ConversionConfig::builder("a.tex", "a.docx")
            .auto_bibliography(false)
            .dpi(5000)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 1200);
    }

    #[test]
    fn rejects_nested_figure_dir() {
        let err = ConversionConfig::builder("a.tex", "a.docx")
            .figure_dir_name("a/b")
            .build()
            .unwrap_err();
        assert!(matches!(err, Tex2DocxError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_template_without_image() {
        let err = ConversionConfig::builder("a.tex", "a.docx")
            .figure_template("\\begin{figure}\\end{figure}")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("{image}"));
    }

    #[test]
    fn picks_first_sibling_bib() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.tex"), "").unwrap();
        std::fs::write(dir.path().join("zeta.bib"), "").unwrap();
        std::fs::write(dir.path().join("alpha.bib"), "").unwrap();

        let c = ConversionConfig::builder(dir.path().join("main.tex"), dir.path().join("main.docx"))
            .build()
            .unwrap();
        assert_eq!(c.bibliography, Some(dir.path().join("alpha.bib")));
    }

    #[test]
    fn explicit_bib_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alpha.bib"), "").unwrap();
        let c = ConversionConfig::builder(dir.path().join("main.tex"), "main.docx")
            .bibliography("/elsewhere/ref.bib")
            .build()
            .unwrap();
        assert_eq!(c.bibliography, Some(PathBuf::from("/elsewhere/ref.bib")));
    }
}
