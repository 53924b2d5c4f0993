//! Pipeline Scheduler: acquire → transform → present/persist

pub mod scheduler;
pub mod state;
pub mod stats;

pub use scheduler::{Pipeline, PipelineStatus};
pub use state::CaptureTicket;
pub use stats::PipelineStats;
