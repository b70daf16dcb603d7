//! Interactive debugging on top of a target's [`kiss_core::DebugConnection`].

mod breakpoints;
mod session;
mod worker;

pub use breakpoints::BreakpointSet;
pub use session::{DebugError, DebugObserver, DebugSession, Dispatch};
