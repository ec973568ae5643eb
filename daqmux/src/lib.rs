//! ## Technical Overview
//!
//! Event transport and demultiplexers for VME digitizer readout.
//!
//! ### Data Model
//!
//! **Slots**: named, typed data channels declared by each module.
//! **Events**: sparse slot → value records, one per hardware trigger.
//! **Event Buffer**: bounded blocking FIFO moving events from decoders to consumers.
//!
//! ### Supported Modules
//!
//! - CAEN V965 QDC (header / data / end-of-block word stream)
//! - SIS3302 digitizer, gamma firmware (length-prefixed multi-event records)
//!
//! ## Quick Start
//!
//! 1. Create an [`EventBuffer`](process::buffer::EventBuffer) and register the module's slots
//! 2. Bind a demultiplexer to the slots, e.g. [`process::caen965::Caen965Demux`]
//! 3. Feed raw words; complete events are queued on the buffer
//! 4. Dequeue events on the consumer side
//!
//! ```rust
//! use daqmux::process::{EXAMPLE_CAEN965_WORDS, Demultiplexer};
//! use daqmux::process::buffer::EventBuffer;
//! use daqmux::process::caen965::Caen965Demux;
//! use daqmux::structs::slot::{DataType, ModuleId};
//!
//! let buffer = EventBuffer::new(64);
//! let qdc = ModuleId(0);
//!
//! let mut slots = Vec::new();
//! for ch in 0..16 {
//!     slots.push(buffer.register_slot(qdc, format!("out{ch}"), DataType::UInt)?.id());
//! }
//!
//! let mut demux = Caen965Demux::with_defaults(slots)?;
//! demux.process_words(EXAMPLE_CAEN965_WORDS, &buffer)?;
//!
//! while let Some(event) = buffer.try_dequeue() {
//!     for (slot, value) in event.iter() {
//!         let name = buffer.slot(slot).map(|s| s.name().to_string());
//!         println!("{name:?} = {value:?}");
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
//! ```

/// Event transport and decoding.
///
/// 1. **Event Buffer** ([`process::buffer`]): blocking hand-off with runtime resize.
///
/// 2. **CAEN V965** ([`process::caen965`]): continuation protocol state machine.
///
/// 3. **SIS3302** ([`process::sis3302`]): table-driven multi-event record decoder.
pub mod process;

/// Slot descriptors, slot registry and events.
///
/// - **Slots** ([`structs::slot`]): identifiers and type tags
/// - **Registry** ([`structs::registry`]): per-module slot sets
/// - **Events** ([`structs::event`]): sparse decoded records
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Error Handling** ([`utils::errors`]): Error types
/// - **Event Ring** ([`utils::event_ring`]): FIFO storage behind the buffer
/// - **Word Reader** ([`utils::word_reader`]): raw 32-bit word input
pub mod utils;
