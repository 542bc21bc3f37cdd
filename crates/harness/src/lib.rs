mod db;
mod fixtures;
mod recorder;

pub use db::{init_tracing, TestDb};
pub use fixtures::*;
pub use recorder::RecordingObserver;
