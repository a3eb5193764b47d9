//! ADPF Metrics - frame statistics and result reporting
//!
//! Collects per-frame timing into a [`FrameBatchData`], reduces a batch to
//! [`FrameStats`], and writes everything into a [`ResultSink`] that the
//! reporting layer reads once the run is over.
//!
//! # Usage
//!
//! ```ignore
//! use adpf_metrics::{FrameBatchData, FrameStats, ResultSink, SessionSnapshot};
//!
//! let sink = ResultSink::new();
//! let stats = FrameStats::compute(&batch, SessionSnapshot::inactive());
//! stats.record("baseline", &batch, &sink);
//! stats.dump("baseline");
//! ```

mod batch;
mod frame_stats;
mod results;
pub mod stats;

pub use batch::FrameBatchData;
pub use frame_stats::{FrameStats, SessionSnapshot};
pub use results::ResultSink;
