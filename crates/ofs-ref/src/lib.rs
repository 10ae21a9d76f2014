//! CPU reference collaborators for the OFS runners.

mod field;
mod reservoir;
mod tracker;

pub use field::{CpuBatch, FieldConfig, KuramotoField, MAX_DELAY_STEPS};
pub use reservoir::{EchoReservoir, Task, DEFAULT_INPUT_UNITS};
pub use tracker::{CriticalityTracker, DEFAULT_WINDOW};
