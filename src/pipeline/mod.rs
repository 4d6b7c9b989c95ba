pub mod engine;
pub mod scheduler;

pub use engine::{EngineStats, FrameEngine, TickOutcome};
pub use scheduler::{host_clock, HostClock, Scheduler, Tick};
