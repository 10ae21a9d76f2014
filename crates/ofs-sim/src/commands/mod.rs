pub mod rollout;
pub mod sweep;
pub mod version;

/// Extra frames granted to drain in-flight reads after a budget cancel.
pub const DRAIN_FRAMES: u64 = 1_000;
