//! Subprocess seam.
//!
//! Every external program the pipeline uses (xelatex, pdftocairo, pandoc) is
//! invoked through [`ToolRunner`]. Production code uses [`SystemToolRunner`];
//! tests inject a fake that records invocations and writes plausible outputs.

use crate::error::{Tex2DocxError, ToolStage};
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// Lines of tool output kept in error diagnostics.
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// One program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory for the child process.
    pub cwd: PathBuf,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        let mut s = self.program.clone();
        for a in &self.args {
            s.push(' ');
            if a.contains(char::is_whitespace) {
                s.push('"');
                s.push_str(a);
                s.push('"');
            } else {
                s.push_str(a);
            }
        }
        s
    }
}

/// What a finished child process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` when killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Last lines of stderr, falling back to stdout (TeX logs to stdout).
    pub fn diagnostics(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.lines().collect();
        let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
        lines[start..].join("\n")
    }

    fn status_text(&self) -> String {
        match self.status {
            Some(code) => format!("exited with status {code}"),
            None => "was terminated by a signal".to_string(),
        }
    }
}

/// Runs external programs.
pub trait ToolRunner {
    /// Run to completion. `Err` only when the process could not be started.
    fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolOutput>;
}

/// [`ToolRunner`] backed by `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemToolRunner;

impl ToolRunner for SystemToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolOutput> {
        let out = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .output()?;
        Ok(ToolOutput {
            status: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}

/// Run `invocation` and turn spawn failures and non-zero exits into
/// [`Tex2DocxError::ExternalTool`] about `subject`.
pub fn run_checked(
    runner: &dyn ToolRunner,
    invocation: &ToolInvocation,
    stage: ToolStage,
    subject: &str,
) -> Result<ToolOutput, Tex2DocxError> {
    debug!("Running: {} (in {})", invocation.display(), invocation.cwd.display());

    let output = runner.run(invocation).map_err(|e| {
        let status = if e.kind() == std::io::ErrorKind::NotFound {
            "was not found on PATH".to_string()
        } else {
            format!("could not be started: {e}")
        };
        Tex2DocxError::ExternalTool {
            stage,
            tool: invocation.program.clone(),
            subject: subject.to_string(),
            status,
            diagnostics: String::new(),
        }
    })?;

    if !output.success() {
        return Err(Tex2DocxError::ExternalTool {
            stage,
            tool: invocation.program.clone(),
            subject: subject.to_string(),
            status: output.status_text(),
            diagnostics: output.diagnostics(),
        });
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(std::io::Result<ToolOutput>);

    impl ToolRunner for Fixed {
        fn run(&self, _: &ToolInvocation) -> std::io::Result<ToolOutput> {
            match &self.0 {
                Ok(o) => Ok(o.clone()),
                Err(e) => Err(std::io::Error::new(e.kind(), e.to_string())),
            }
        }
    }

    fn inv() -> ToolInvocation {
        ToolInvocation::new("xelatex", "/tmp").args(["-interaction=nonstopmode", "multifig a.tex"])
    }

    #[test]
    fn display_quotes_spaces() {
        assert_eq!(inv().display(), "xelatex -interaction=nonstopmode \"multifig a.tex\"");
    }

    #[test]
    fn missing_program_is_external_tool_error() {
        let runner = Fixed(Err(std::io::Error::from(std::io::ErrorKind::NotFound)));
        let err = run_checked(&runner, &inv(), ToolStage::Rasterize, "fig:a").unwrap_err();
        assert!(err.to_string().contains("not found on PATH"), "got: {err}");
    }

    #[test]
    fn failing_exit_keeps_diagnostic_tail() {
        let stdout = (1..=30).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let runner = Fixed(Ok(ToolOutput {
            status: Some(1),
            stdout,
            stderr: String::new(),
        }));
        let err = run_checked(&runner, &inv(), ToolStage::Rasterize, "fig:a").unwrap_err();
        match err {
            Tex2DocxError::ExternalTool { status, diagnostics, subject, .. } => {
                assert_eq!(status, "exited with status 1");
                assert_eq!(subject, "fig:a");
                assert!(diagnostics.starts_with("line 11"));
                assert!(diagnostics.ends_with("line 30"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn success_passes_output_through() {
        let runner = Fixed(Ok(ToolOutput {
            status: Some(0),
            stdout: "ok".into(),
            stderr: String::new(),
        }));
        let out = run_checked(&runner, &inv(), ToolStage::Convert, "main").unwrap();
        assert_eq!(out.stdout, "ok");
    }
}
