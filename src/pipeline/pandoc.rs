//! pandoc command line for the rewritten document.

use crate::config::ConversionConfig;
use crate::tool::ToolInvocation;
use std::path::{Path, PathBuf};

#[cfg(windows)]
const PATH_LIST_SEPARATOR: &str = ";";
#[cfg(not(windows))]
const PATH_LIST_SEPARATOR: &str = ":";

/// Paths handed to pandoc are made absolute: it runs inside the working copy,
/// not in the caller's directory.
fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn path_arg(path: &Path) -> String {
    absolute(path).to_string_lossy().into_owned()
}

/// Build the pandoc invocation.
///
/// * `tex_name`: file name of the rewritten document inside `work_dir`
/// * `docx`: where pandoc writes the Word file
/// * `graphics_paths`: the document's `\graphicspath` entries, relative to
///   `work_dir`; pandoc does not read `\graphicspath` itself
pub fn command(
    config: &ConversionConfig,
    work_dir: &Path,
    tex_name: &str,
    docx: &Path,
    graphics_paths: &[String],
) -> ToolInvocation {
    let mut inv = ToolInvocation::new(&config.tools.pandoc, work_dir)
        .arg(tex_name)
        .arg("-o")
        .arg(path_arg(docx));

    if let Some(filter) = &config.lua_filter {
        inv = inv.arg("--lua-filter").arg(path_arg(filter));
    }
    if config.crossref {
        inv = inv.arg("--filter").arg(&config.tools.crossref_filter);
    }
    if let Some(reference_doc) = &config.reference_doc {
        inv = inv.arg("--reference-doc").arg(path_arg(reference_doc));
    }
    if config.number_sections {
        inv = inv.arg("--number-sections");
    }
    inv = inv.args(["-M", "autoEqnLabels", "-M", "tableEqns", "-t", "docx+native_numbering"]);

    let mut resource_dirs = vec![".".to_string()];
    resource_dirs.extend(
        graphics_paths
            .iter()
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty()),
    );
    inv = inv.arg("--resource-path").arg(resource_dirs.join(PATH_LIST_SEPARATOR));

    if let Some(bib) = &config.bibliography {
        inv = inv
            .arg("-M")
            .arg(format!("reference-section-title={}", config.reference_section_title))
            .arg("--citeproc")
            .arg("--bibliography")
            .arg(path_arg(bib));
        if let Some(csl) = &config.csl {
            inv = inv.arg("--csl").arg(path_arg(csl));
        }
    }
    inv
}
