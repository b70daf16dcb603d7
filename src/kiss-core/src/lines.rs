//! Line numbering on either side of the editor/debugger boundary.
//!
//! The editor counts lines from 0, the debug protocol (and compiler output)
//! from 1. Both sides keep their own numbering; [`EditorLine::to_protocol`]
//! and [`ProtocolLine::to_editor`] are the only places the offset is applied.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 0-based line number as used by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EditorLine(pub u32);

/// A 1-based line number as used by debuggers and compilers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolLine(pub u32);

impl EditorLine {
    pub fn to_protocol(self) -> ProtocolLine {
        ProtocolLine(self.0.saturating_add(1))
    }
}

impl ProtocolLine {
    /// Returns `None` for line 0, which has no editor counterpart.
    pub fn to_editor(self) -> Option<EditorLine> {
        self.0.checked_sub(1).map(EditorLine)
    }
}

impl fmt::Display for EditorLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ProtocolLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
