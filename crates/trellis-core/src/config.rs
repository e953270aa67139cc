/// Default bound on nested writes to one cell (or nested emissions of one hub).
pub const DEFAULT_MAX_REENTRANCY: usize = 8;

/// Tunables shared by every cell and hub a `NodeGraph` creates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphConfig {
    /// Depth at which a reentrant cell write or nested emission is rejected.
    pub max_reentrancy: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_reentrancy: DEFAULT_MAX_REENTRANCY,
        }
    }
}

impl GraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_reentrancy(mut self, depth: usize) -> Self {
        self.max_reentrancy = depth;
        self
    }
}
