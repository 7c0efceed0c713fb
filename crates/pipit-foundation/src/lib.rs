//! Shared foundation for the Pipit capture/analysis host.
//!
//! The capture core is single-threaded and cooperative: every entry point
//! for a given device is invoked from one external poll loop, so the types
//! here use `Rc`/`RefCell` rather than locks. The one cross-context edge is
//! the diagnostic-event channel, which the control layer drains from
//! wherever it likes.

pub mod error;
pub mod event;
pub mod poll;
pub mod registry;

pub use error::*;
pub use event::*;
pub use poll::*;
pub use registry::*;
