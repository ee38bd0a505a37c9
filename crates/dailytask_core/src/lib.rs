pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod model;
pub mod progress;
pub mod state;
pub mod storage;
pub mod task_api;
pub mod timer;
pub mod verification;
