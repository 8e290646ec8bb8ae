#![forbid(unsafe_code)]

pub mod audio;
pub mod backend;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod logging;
pub mod model;
pub mod periodic;
pub mod playback;
pub mod process;
pub mod session;
pub mod sink;
pub mod status;
pub mod store;

pub use engine::{CancellationToken, ChunkTranscriber, PipelineConfig};
pub use error::{FcError, FcResult};
pub use gate::ReadinessGate;
pub use model::{PassKind, PassSet, RunSummary, Segment};
pub use session::Session;
pub use store::SegmentStore;
