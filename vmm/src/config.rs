/// Knobs of a [`Runtime`](crate::runtime::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Abort with `TurnLimitExceeded` after this many scheduler turns.
    pub max_turns: Option<u64>,
    /// Seed of the RANDOM system call.
    pub random_seed: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_turns: None,
            random_seed: 0x5EED,
        }
    }
}

impl RuntimeConfig {
    pub fn with_max_turns(mut self, max_turns: u64) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }
}
