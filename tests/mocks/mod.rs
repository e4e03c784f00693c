//! Mock implementations of the pipeline's pluggable parts
//!
//! Lets integration tests drive the dispatcher without real OCR,
//! transcription or Bot API calls.

pub mod mock_processor;

#[allow(unused_imports)]
pub use mock_processor::{Call, MockProcessor, Step};
