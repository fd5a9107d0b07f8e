//! Request capture subsystem.
//!
//! # Data Flow
//! ```text
//! request head
//!     → filter.rs (exclusion rules, no allocation)
//!     → session.rs (CaptureSession opened, checkpoints + failure recorded)
//!     → body.rs (request/response bytes, capped)
//!     → sealed into a Record by the recorder
//! ```

pub mod body;
pub mod filter;
pub mod session;

pub use filter::{ExclusionFilter, ExclusionRule, RequestView};
pub use session::{
    BodySink, CaptureLimits, CaptureSession, Outcome, RequestDescriptor, ResponseDescriptor,
    SessionPhase,
};
