//! Data structures shared by the buffer and the demultiplexers.
//!
//! Contains slot descriptors, the per-module slot registry and the sparse
//! event record that demultiplexers fill.

pub mod event;
pub mod registry;
pub mod slot;
