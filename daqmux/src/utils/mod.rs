//! Utility functions and supporting infrastructure.
//!
//! Provides raw word reading, error handling and the event ring used by
//! the event buffer.

pub mod errors;
pub mod event_ring;
pub mod word_reader;
