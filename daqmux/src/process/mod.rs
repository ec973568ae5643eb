use std::fmt::Display;

use anyhow::Result;

use crate::structs::event::Event;
use crate::utils::errors::BufferError;

/// Bounded event hand-off between producers and consumers.
///
/// Provides the [`EventBuffer`](buffer::EventBuffer), a blocking FIFO that also
/// owns the slot registry.
pub mod buffer;

/// Continuation-format decoder for CAEN V965 charge-to-digital converters.
///
/// Provides the [`Caen965Demux`](caen965::Caen965Demux) state machine.
pub mod caen965;

/// Fixed-layout decoder for SIS3302 digitizers running gamma firmware.
///
/// Provides the [`Sis3302Demux`](sis3302::Sis3302Demux) record decoder.
pub mod sis3302;

/// Destination for events completed by a demultiplexer.
pub trait EventSink {
    /// Creates an empty event for the producer to fill.
    fn create_event(&self) -> Event;

    /// Transfers ownership of a complete event.
    fn publish(&self, event: Event) -> Result<(), BufferError>;
}

/// Common driver interface over the hardware decoders.
///
/// `process_words` may be called with arbitrary slices of the word stream;
/// decoders keep whatever state they need across calls.
pub trait Demultiplexer: Send {
    /// Decodes `words`, publishing every complete event to `sink`.
    ///
    /// Returns the number of events published.
    fn process_words(&mut self, words: &[u32], sink: &dyn EventSink) -> Result<usize>;

    /// Flushes state at the end of the stream.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> DemuxStats;

    /// Sets the failure level for decode errors.
    ///
    /// - `log::Level::Error`: Only fail on Error level messages (default)
    /// - `log::Level::Warn`: Fail on Warning level and above (strict mode)
    fn set_fail_level(&mut self, level: log::Level);
}

/// Running counters kept by every demultiplexer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    /// Hardware records (header groups or length-prefixed blocks) seen.
    pub records: u64,
    /// Events handed to the sink.
    pub events: u64,
    /// Events discarded because of decode errors.
    pub malformed: u64,
    /// Words outside of any event.
    pub stray_words: u64,
}

impl Display for DemuxStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} records, {} events, {} malformed, {} stray words",
            self.records, self.events, self.malformed, self.stray_words
        )
    }
}

/// CAEN V965 block with three channels, as read from a VME readout.
pub const EXAMPLE_CAEN965_WORDS: &[u32] = &[
    0x0A02_0300, // header: geo 1, crate 2, 3 channels
    0x0000_0123, // channel 0 = 0x123
    0x0000_1456, // channel 1 = 0x456
    0x0000_2789, // channel 2 = 0x789
    0x0400_002A, // end of block, event counter 42
    0x0600_0000, // not-valid filler
];
