//! Recorded request data.
//!
//! # Data Flow
//! ```text
//! CaptureSession (mutable, in flight)
//!     → TraceBuffer (trace lines appended from any task)
//!     → seal
//!     → Record (immutable, shared as Arc<Record>)
//!     → RecordSummary / RecordDetail (derived views for viewers)
//! ```

pub mod model;
pub mod trace;

pub use model::{
    BodyInfo, CapturedBody, CapturedFailure, HeaderTable, Record, RecordDetail, RecordId,
    RecordSummary, Timeline, TraceLevel, TraceLine,
};
pub use trace::TraceBuffer;
