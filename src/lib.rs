//! A concurrent engine for linear, multi-stage frame processing chains.
//!
//! Frames (reference-counted data units such as sensor or media frames) are
//! admitted into a validated chain of named stages. Each stage runs with its
//! own degree of parallelism, every frame visits the stages in chain order,
//! and every admitted frame is disposed exactly once at the end of the chain.
//!
//! # Features
//!
//! - Two-phase assembly: register and connect modules, then validate and
//!   materialize the chain with `construct`
//! - Per-stage concurrency on dedicated worker threads fed by bounded
//!   crossbeam channels
//! - Non-blocking admission with an advisory overload signal
//! - Lock-free bounded frame buffers for decoupling irregular sources
//! - Rolling-window per-stage timing statistics (`timing` feature)
//!
//! # Example
//!
//! ```ignore
//! use frame_pipeline::{Pipeline, PassthroughModule, GRAPH_INPUT, DATAFRAME_EOL};
//!
//! let mut pipeline = Pipeline::<MyFrame>::new(8);
//! pipeline.add_module("decode", 2, Decoder::default())?;
//! pipeline.add_module("detect", 4, Detector::default())?;
//! pipeline.connect_module(GRAPH_INPUT, "decode")?;
//! pipeline.connect_module("decode", "detect")?;
//! pipeline.connect_module("detect", DATAFRAME_EOL)?;
//! pipeline.construct()?;
//!
//! while let Some(frame) = camera.next_frame() {
//!     if !pipeline.overload() {
//!         let _ = pipeline.push_frame(frame);
//!     }
//! }
//! pipeline.wait_finish();
//! ```

pub mod backpressure;
pub mod buffer;
pub mod config;
pub mod context;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod stage;
pub mod statistics;

// Re-exports for convenience
pub use backpressure::{drive, AdmissionController, DriveReport};
pub use buffer::{FrameBuffer, FrameSource, IteratorSource};
pub use config::PipelineConfig;
pub use context::{AppContext, Application, Daemon};
pub use error::{PipelineError, PushError, Result};
pub use frame::Frame;
pub use pipeline::{Pipeline, DATAFRAME_EOL, GRAPH_INPUT};
pub use stage::{FnModule, Module, PassthroughModule};
pub use statistics::{Recorder, StageStatistic};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
