//! Per-invocation tunables, kept separate from argument parsing so the
//! runtime crates never need to know about `clap`.

/// Configuration shared by every CLI operation that runs code.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on nested `PROC_CALL` frames (spec §9's stack-depth
    /// budget, in lieu of a process-wide recursion-limit bump).
    pub max_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config { max_depth: 10_000 }
    }
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}
