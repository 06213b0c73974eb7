//! Input preparation: scratch workspace, working copy and source loading.
//!
//! The pipeline never touches the user's tree. The input's directory is
//! mirrored into a scratch [`TempDir`] first; standalone figure documents,
//! PNGs, the modified TeX file and pandoc's output all live there. Dropping
//! the [`Workspace`] removes everything unless the run is in debug mode.

use crate::config::ConversionConfig;
use crate::error::{AssetKind, Tex2DocxError};
use crate::pipeline::scan;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Maximum `\include` / `\input` nesting.
const MAX_INCLUDE_DEPTH: usize = 16;

/// Directory names never mirrored into the working copy.
const SKIPPED_DIRS: &[&str] = &[".git", ".hg", ".svn", "target"];

enum ScratchDir {
    /// Removed on drop.
    Temp(TempDir),
    /// Kept for inspection (`debug`).
    Kept(PathBuf),
}

/// Scratch directory holding the working copy of the source tree.
pub struct Workspace {
    scratch: ScratchDir,
    /// Mirror of the input's directory.
    pub work_dir: PathBuf,
    /// Main document inside `work_dir`.
    pub input: PathBuf,
    /// Where standalone documents and PNGs go (`work_dir/<figure_dir_name>`).
    pub figure_dir: PathBuf,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        match &self.scratch {
            ScratchDir::Temp(t) => t.path(),
            ScratchDir::Kept(p) => p,
        }
    }

    /// Scratch path when it outlives the run.
    pub fn kept_path(&self) -> Option<&Path> {
        match &self.scratch {
            ScratchDir::Temp(_) => None,
            ScratchDir::Kept(p) => Some(p),
        }
    }
}

/// Create the scratch directory and mirror the input's directory into it.
pub fn prepare_workspace(config: &ConversionConfig) -> Result<Workspace, Tex2DocxError> {
    let parent = config.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
    fs::create_dir_all(&parent).map_err(|e| Tex2DocxError::workspace(&parent, e))?;

    let temp = tempfile::Builder::new()
        .prefix("tex2docx-")
        .tempdir_in(&parent)
        .map_err(|e| Tex2DocxError::workspace(&parent, e))?;

    let scratch = if config.debug {
        let kept = temp.keep();
        info!("Debug mode: scratch directory kept at {}", kept.display());
        ScratchDir::Kept(kept)
    } else {
        ScratchDir::Temp(temp)
    };
    let root = match &scratch {
        ScratchDir::Temp(t) => t.path().to_path_buf(),
        ScratchDir::Kept(p) => p.clone(),
    };

    let work_dir = root.join("work");
    let copied = mirror_tree(config.source_dir(), &work_dir, &[&parent, &root])?;
    debug!("Mirrored {} files into {}", copied, work_dir.display());

    let file_name = config.input.file_name().ok_or_else(|| {
        Tex2DocxError::InvalidConfig(format!("input '{}' has no file name", config.input.display()))
    })?;
    let input = work_dir.join(file_name);
    if !input.is_file() {
        return Err(Tex2DocxError::AssetMissing {
            kind: AssetKind::Document,
            path: config.input.clone(),
            figure: None,
        });
    }

    let figure_dir = work_dir.join(&config.figure_dir_name);
    fs::create_dir_all(&figure_dir).map_err(|e| Tex2DocxError::workspace(&figure_dir, e))?;

    Ok(Workspace {
        scratch,
        work_dir,
        input,
        figure_dir,
    })
}

/// Copy `src` into `dst`, skipping VCS/build directories and `exclude`
/// (the scratch directories, when they live inside the source tree).
fn mirror_tree(src: &Path, dst: &Path, exclude: &[&Path]) -> Result<usize, Tex2DocxError> {
    let exclude: Vec<PathBuf> = exclude.iter().filter_map(|p| p.canonicalize().ok()).collect();
    let mut copied = 0;

    let walker = WalkDir::new(src).into_iter().filter_entry(|e| {
        if e.depth() == 0 || !e.file_type().is_dir() {
            return true;
        }
        let skipped_name = e.file_name().to_str().is_some_and(|n| SKIPPED_DIRS.contains(&n));
        let is_excluded = !exclude.is_empty()
            && e.path().canonicalize().is_ok_and(|p| exclude.contains(&p));
        !(skipped_name || is_excluded)
    });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            Tex2DocxError::workspace(path, e.into())
        })?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| Tex2DocxError::workspace(&target, e))?;
        } else if let Err(e) = fs::copy(entry.path(), &target) {
            if entry.path_is_symlink() {
                warn!("Skipping unreadable symlink {}: {}", entry.path().display(), e);
            } else {
                return Err(Tex2DocxError::workspace(entry.path(), e));
            }
        } else {
            copied += 1;
        }
    }
    Ok(copied)
}

/// The main document after comment stripping and include expansion.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub text: String,
    /// Files pulled in by `\include` / `\input`, in expansion order.
    pub includes: Vec<PathBuf>,
}

/// Read `path`, strip comments and inline every `\include` / `\input`.
///
/// Include paths resolve against the main file's directory, as TeX does when
/// run from there. A missing include is replaced by a comment and logged.
pub fn load_document(path: &Path) -> Result<SourceDocument, Tex2DocxError> {
    let base = path.parent().unwrap_or(Path::new("."));
    let raw = read_source(path)?;
    let mut includes = Vec::new();
    let text = expand(&scan::strip_comments(&raw), base, 0, &mut includes)?;
    info!(
        "Loaded {} ({} bytes, {} included file(s))",
        path.display(),
        text.len(),
        includes.len()
    );
    Ok(SourceDocument { text, includes })
}

fn read_source(path: &Path) -> Result<String, Tex2DocxError> {
    let bytes = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Tex2DocxError::AssetMissing {
                kind: AssetKind::Document,
                path: path.to_path_buf(),
                figure: None,
            }
        } else {
            Tex2DocxError::workspace(path, e)
        }
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn expand(text: &str, base: &Path, depth: usize, includes: &mut Vec<PathBuf>) -> Result<String, Tex2DocxError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for cmd in scan::commands(text, &["include", "input"]) {
        let cmd = cmd?;
        out.push_str(&text[last..cmd.span.start]);
        last = cmd.span.end;

        let name = cmd.argument.trim();
        let Some(file) = resolve_include(base, name) else {
            warn!("\\{}{{{}}} not found; left out of the document", cmd.name, name);
            out.push_str(&format!("% tex2docx: missing \\{}{{{}}}\n", cmd.name, name));
            continue;
        };
        if depth + 1 > MAX_INCLUDE_DEPTH {
            return Err(Tex2DocxError::parse(
                format!("\\{}", cmd.name),
                scan::line_at(text, cmd.span.start),
                format!("includes nested deeper than {MAX_INCLUDE_DEPTH} levels at '{name}'"),
            ));
        }

        debug!("Expanding \\{}{{{}}} from {}", cmd.name, name, file.display());
        let body = scan::strip_comments(&read_source(&file)?);
        includes.push(file);
        out.push_str(&expand(&body, base, depth + 1, includes)?);
    }

    out.push_str(&text[last..]);
    Ok(out)
}

/// `name` as given, else with `.tex` appended.
fn resolve_include(base: &Path, name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    let direct = base.join(name);
    if direct.is_file() {
        return Some(direct);
    }
    let with_ext = base.join(format!("{name}.tex"));
    with_ext.is_file().then_some(with_ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_nested_includes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("chapters")).unwrap();
        fs::write(dir.path().join("main.tex"), "A\n\\include{chapters/one}\nD % gone\n").unwrap();
        fs::write(dir.path().join("chapters/one.tex"), "B\\input{chapters/two.tex}").unwrap();
        fs::write(dir.path().join("chapters/two.tex"), "C").unwrap();

        let doc = load_document(&dir.path().join("main.tex")).unwrap();
        assert_eq!(doc.text, "A\nBC\nD ");
        assert_eq!(doc.includes.len(), 2);
    }

    #[test]
    fn missing_include_becomes_comment() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.tex"), "x\\input{nowhere}y").unwrap();
        let doc = load_document(&dir.path().join("main.tex")).unwrap();
        assert!(doc.text.starts_with('x'));
        assert!(doc.text.contains("% tex2docx: missing \\input{nowhere}"));
        assert!(doc.text.ends_with('y'));
    }

    #[test]
    fn self_include_hits_depth_limit() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("loop.tex"), "\\input{loop}").unwrap();
        let err = load_document(&dir.path().join("loop.tex")).unwrap_err();
        assert!(matches!(err, Tex2DocxError::Parse { .. }), "got {err:?}");
    }

    #[test]
    fn missing_main_document() {
        let err = load_document(Path::new("/definitely/not/here.tex")).unwrap_err();
        assert!(matches!(err, Tex2DocxError::AssetMissing { kind: AssetKind::Document, .. }));
    }

    #[test]
    fn workspace_mirrors_tree_and_skips_git() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("figures")).unwrap();
        fs::create_dir_all(src.path().join(".git")).unwrap();
        fs::write(src.path().join("main.tex"), "hi").unwrap();
        fs::write(src.path().join("figures/a.png"), "png").unwrap();
        fs::write(src.path().join(".git/HEAD"), "ref").unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let config = ConversionConfig::builder(src.path().join("main.tex"), src.path().join("main.docx"))
            .temp_dir(scratch.path())
            .build()
            .unwrap();
        let ws = prepare_workspace(&config).unwrap();

        assert!(ws.input.is_file());
        assert!(ws.work_dir.join("figures/a.png").is_file());
        assert!(!ws.work_dir.join(".git").exists());
        assert!(ws.figure_dir.ends_with("_multifig"));
        assert!(ws.kept_path().is_none());

        let root = ws.root().to_path_buf();
        drop(ws);
        assert!(!root.exists());
    }

    #[test]
    fn scratch_inside_source_is_not_copied_into_itself() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("main.tex"), "hi").unwrap();
        let config = ConversionConfig::builder(src.path().join("main.tex"), "out.docx")
            .temp_dir(src.path().join("tmp"))
            .build()
            .unwrap();
        let ws = prepare_workspace(&config).unwrap();
        assert!(!ws.work_dir.join("tmp").exists());
    }
}
