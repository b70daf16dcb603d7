use kiss_core::BreakpointLocation;

/// Breakpoints requested by the client, at most one per `(file, line)`.
#[derive(Debug, Default, Clone)]
pub struct BreakpointSet {
    entries: Vec<BreakpointLocation>,
}

impl BreakpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BreakpointLocation> {
        self.entries.iter()
    }

    pub fn contains(&self, location: &BreakpointLocation) -> bool {
        self.entries.iter().any(|bp| bp.same_place(location))
    }

    /// Returns `false` if a breakpoint already sits on that line.
    pub fn insert(&mut self, location: BreakpointLocation) -> bool {
        if self.contains(&location) {
            return false;
        }
        self.entries.push(location);
        true
    }

    pub fn remove(&mut self, location: &BreakpointLocation) -> bool {
        let before = self.entries.len();
        self.entries.retain(|bp| !bp.same_place(location));
        self.entries.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiss_core::EditorLine;

    #[test]
    fn one_entry_per_file_and_line() {
        let mut set = BreakpointSet::new();
        assert!(set.insert(BreakpointLocation::new("main.c", EditorLine(3))));
        let mut disabled = BreakpointLocation::new("main.c", EditorLine(3));
        disabled.enabled = false;
        assert!(!set.insert(disabled));
        assert!(set.insert(BreakpointLocation::new("lib.c", EditorLine(3))));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn remove_matches_on_place_only() {
        let mut set = BreakpointSet::new();
        set.insert(BreakpointLocation::new("main.c", EditorLine(7)));
        let mut disabled = BreakpointLocation::new("main.c", EditorLine(7));
        disabled.enabled = false;
        assert!(set.remove(&disabled));
        assert!(!set.remove(&disabled));
        assert!(set.is_empty());
    }
}
