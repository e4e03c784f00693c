//! Common test utilities
//!
//! This module is shared across all integration tests

pub mod fixtures;
pub mod recorder;

#[allow(unused_imports)]
pub use fixtures::{
    dispatcher_config, memory_pipeline, sqlite_pipeline, temp_pool, wait_for_idle, TestPipeline, DRAIN_TIMEOUT,
};
#[allow(unused_imports)]
pub use recorder::{Notification, RecordingNotifier};
