//! Progress-callback trait for stage and per-figure conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to follow a
//! run as it moves through its stages and rasterises each multi-figure.
//!
//! # Example
//!
//! ```rust
//! use tex2docx::{ConversionConfig, ConversionProgressCallback};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     flattened: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_figure_complete(&self, label: &str, index: usize, total: usize, _png: &Path) {
//!         self.flattened.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{label}: {index}/{total}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { flattened: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder("main.tex", "main.docx")
//!     .auto_bibliography(false)
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    /// Scratch workspace + working copy.
    Prepare,
    /// Comment stripping, include expansion, layout and label registration.
    Scan,
    /// Asset checks and standalone documents.
    Extract,
    /// xelatex + pdftocairo per block.
    Rasterize,
    /// Block replacement, reference rewriting and validation.
    Rewrite,
    /// pandoc.
    Convert,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Prepare => "prepare",
            Stage::Scan => "scan",
            Stage::Extract => "extract",
            Stage::Rasterize => "rasterize",
            Stage::Rewrite => "rewrite",
            Stage::Convert => "convert",
        };
        f.write_str(s)
    }
}

/// Called by the conversion pipeline as it progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. The pipeline is single-threaded; `Send + Sync` lets
/// hosts share one callback across runs on different threads.
pub trait ConversionProgressCallback: Send + Sync {
    /// A stage is about to run.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Rasterisation of one block is starting.
    ///
    /// # Arguments
    /// * `label`: parent label of the block (real or synthesised)
    /// * `index`: 1-indexed position among blocks
    /// * `total`: number of blocks in the document
    fn on_figure_start(&self, label: &str, index: usize, total: usize) {
        let _ = (label, index, total);
    }

    /// One block was rasterised to `png`.
    fn on_figure_complete(&self, label: &str, index: usize, total: usize, png: &Path) {
        let _ = (label, index, total, png);
    }

    /// The Word document is in place.
    fn on_conversion_complete(&self, output: &Path) {
        let _ = output;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ConversionProgressCallback for Recorder {
        fn on_stage_start(&self, stage: Stage) {
            self.events.lock().unwrap().push(format!("stage:{stage}"));
        }

        fn on_figure_complete(&self, label: &str, index: usize, total: usize, _png: &Path) {
            self.events.lock().unwrap().push(format!("figure:{label}:{index}/{total}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(Stage::Scan);
        cb.on_figure_start("fig:a", 1, 2);
        cb.on_figure_complete("fig:a", 1, 2, Path::new("a.png"));
        cb.on_conversion_complete(Path::new("out.docx"));
    }

    #[test]
    fn overridden_methods_receive_events() {
        let rec = Recorder::default();
        rec.on_stage_start(Stage::Rasterize);
        rec.on_figure_start("fig:x", 1, 1);
        rec.on_figure_complete("fig:x", 1, 1, Path::new("x.png"));
        assert_eq!(
            *rec.events.lock().unwrap(),
            vec!["stage:rasterize".to_string(), "figure:fig:x:1/1".to_string()]
        );
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage_start(Stage::Convert);
    }
}
