use std::collections::BTreeMap;

use anyhow::Result;
use log::{debug, trace};

use crate::log_or_err;
use crate::process::{DemuxStats, Demultiplexer, EventSink};
use crate::structs::slot::SlotId;
use crate::utils::errors::{ConfigError, DecodeStopped, DemuxError};

pub const DEFAULT_CHANNELS: usize = 16;
pub const DEFAULT_BITS: u8 = 12;
pub const MAX_CHANNELS: usize = 32;
/// The channel field sits directly above the value and must stay below the
/// word type field at bit 24.
pub const MAX_BITS: u8 = 19;

const TYPE_SHIFT: u32 = 24;
const TYPE_MASK: u32 = 0x7;
const CHANNEL_MASK: u32 = 0x1F;

const HEADER_GEO_SHIFT: u32 = 27;
const HEADER_GEO_MASK: u32 = 0x1F;
const HEADER_CRATE_SHIFT: u32 = 16;
const HEADER_CRATE_MASK: u32 = 0xFF;
const HEADER_COUNT_SHIFT: u32 = 8;
const HEADER_COUNT_MASK: u32 = 0x3F;

const EOB_COUNTER_MASK: u32 = 0x00FF_FFFF;

/// Word type tag found in bits 26..24 of every word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordType {
    Data,
    Header,
    EndOfBlock,
    NotValid,
    Reserved(u8),
}

impl From<u32> for WordType {
    fn from(word: u32) -> Self {
        match ((word >> TYPE_SHIFT) & TYPE_MASK) as u8 {
            0b000 => WordType::Data,
            0b010 => WordType::Header,
            0b100 => WordType::EndOfBlock,
            0b110 => WordType::NotValid,
            other => WordType::Reserved(other),
        }
    }
}

/// Fields of a block header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caen965Header {
    pub geo: u8,
    pub crate_number: u8,
    pub channels_in_event: u8,
}

impl From<u32> for Caen965Header {
    fn from(word: u32) -> Self {
        Self {
            geo: ((word >> HEADER_GEO_SHIFT) & HEADER_GEO_MASK) as u8,
            crate_number: ((word >> HEADER_CRATE_SHIFT) & HEADER_CRATE_MASK) as u8,
            channels_in_event: ((word >> HEADER_COUNT_SHIFT) & HEADER_COUNT_MASK) as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DemuxState {
    #[default]
    Idle,
    InEvent,
    /// Waiting for the next header after a rejected event.
    Error,
}

/// Result of one [`Caen965Demux::process_data`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Caen965Outcome {
    /// Events published to the sink.
    pub events: usize,
    /// Words consumed from the input slice.
    pub consumed: usize,
}

/// Demultiplexer for the CAEN V965 header/data/end-of-block word stream.
///
/// Slots are bound in channel order: `slots[n]` receives the value of
/// channel `n`. Channels not present in a block stay unoccupied.
///
/// Malformed blocks are discarded and counted. The state machine always
/// resynchronises on the next header word.
///
/// # Example
///
/// ```rust
/// use daqmux::process::EXAMPLE_CAEN965_WORDS;
/// use daqmux::process::buffer::EventBuffer;
/// use daqmux::process::caen965::Caen965Demux;
/// use daqmux::structs::slot::{DataType, ModuleId};
///
/// let buffer = EventBuffer::new(16);
/// let slots = (0..16)
///     .map(|ch| buffer.register_slot(ModuleId(0), format!("out{ch}"), DataType::UInt))
///     .map(|slot| slot.map(|slot| slot.id()))
///     .collect::<Result<Vec<_>, _>>()?;
///
/// let mut demux = Caen965Demux::with_defaults(slots.clone())?;
/// let outcome = demux.process_data(EXAMPLE_CAEN965_WORDS, false, &buffer)?;
/// assert_eq!(outcome.events, 1);
///
/// let ev = buffer.dequeue().unwrap();
/// assert_eq!(ev.get(slots[1]).as_uint(), Some(0x456));
/// # Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
/// ```
#[derive(Debug)]
pub struct Caen965Demux {
    slots: Vec<SlotId>,
    nof_channels: usize,
    nof_bits: u8,
    state: DemuxState,
    header: Option<Caen965Header>,
    ch_data: BTreeMap<u8, u32>,
    last_event_counter: Option<u32>,
    last_crate_number: Option<u8>,
    stats: DemuxStats,
    pub fail_level: log::Level,
}

impl Caen965Demux {
    /// Creates a decoder for a module with `nof_channels` channels whose
    /// values are `nof_bits` wide.
    pub fn new(slots: Vec<SlotId>, nof_channels: usize, nof_bits: u8) -> Result<Self, ConfigError> {
        if nof_channels == 0 || nof_channels > MAX_CHANNELS {
            return Err(ConfigError::InvalidChannelCount {
                max: MAX_CHANNELS,
                actual: nof_channels,
            });
        }
        if nof_bits == 0 || nof_bits > MAX_BITS {
            return Err(ConfigError::InvalidBitWidth {
                max: MAX_BITS,
                actual: nof_bits,
            });
        }
        if slots.len() < nof_channels {
            return Err(ConfigError::MissingSlots {
                needed: nof_channels,
                found: slots.len(),
            });
        }

        Ok(Self {
            slots,
            nof_channels,
            nof_bits,
            state: DemuxState::Idle,
            header: None,
            ch_data: BTreeMap::new(),
            last_event_counter: None,
            last_crate_number: None,
            stats: DemuxStats::default(),
            fail_level: log::Level::Error,
        })
    }

    /// 16 channels with 12-bit values.
    pub fn with_defaults(slots: Vec<SlotId>) -> Result<Self, ConfigError> {
        Self::new(slots, DEFAULT_CHANNELS, DEFAULT_BITS)
    }

    /// Feeds words to the state machine.
    ///
    /// With `single_event` set, returns right after the first complete event
    /// and reports how many words were consumed, so the caller can resume with
    /// the remainder. Otherwise the whole slice is consumed.
    ///
    /// An error carries a [`DecodeStopped`] context with the words consumed up
    /// to and including the offending one; the decoder is already
    /// resynchronised, so decoding may resume right after it.
    pub fn process_data(
        &mut self,
        data: &[u32],
        single_event: bool,
        sink: &dyn EventSink,
    ) -> Result<Caen965Outcome> {
        let mut outcome = Caen965Outcome::default();

        for &word in data {
            outcome.consumed += 1;
            let completed = self.process_word(word, sink).map_err(|err| {
                err.context(DecodeStopped {
                    consumed: outcome.consumed,
                    events: outcome.events,
                })
            })?;
            if completed {
                outcome.events += 1;
                if single_event {
                    break;
                }
            }
        }

        Ok(outcome)
    }

    /// Returns `true` when `word` completed an event.
    fn process_word(&mut self, word: u32, sink: &dyn EventSink) -> Result<bool> {
        match (self.state, WordType::from(word)) {
            (_, WordType::NotValid) => {}
            (DemuxState::InEvent, WordType::Header) => {
                let pending = self.ch_data.len();
                self.discard();
                self.start_event(word);
                self.report(DemuxError::InterruptedEvent { pending })?;
            }
            (_, WordType::Header) => self.start_event(word),
            (DemuxState::InEvent, WordType::Data) => self.continue_event(word)?,
            (DemuxState::InEvent, WordType::EndOfBlock) => return self.finish_event(word, sink),
            (DemuxState::InEvent, WordType::Reserved(_)) => {
                self.reject(DemuxError::UnexpectedWord { word })?;
            }
            (DemuxState::Idle, _) => {
                self.stats.stray_words += 1;
                debug!("Caen965Demux: stray word {word:#010X} outside event");
            }
            (DemuxState::Error, _) => {
                trace!("Caen965Demux: skipping {word:#010X} until next header");
            }
        }

        Ok(false)
    }

    fn start_event(&mut self, word: u32) {
        let header = Caen965Header::from(word);
        trace!(
            "Caen965Demux header: geo {}, crate {}, {} channels",
            header.geo, header.crate_number, header.channels_in_event
        );

        self.ch_data.clear();
        self.header = Some(header);
        self.last_crate_number = Some(header.crate_number);
        self.state = DemuxState::InEvent;
        self.stats.records += 1;
    }

    fn continue_event(&mut self, word: u32) -> Result<(), DemuxError> {
        let channel = ((word >> self.nof_bits) & CHANNEL_MASK) as u8;
        let value = word & ((1 << self.nof_bits) - 1);
        let Some(header) = self.header else {
            return self.reject(DemuxError::UnexpectedWord { word });
        };

        if channel as usize >= self.nof_channels {
            return self.reject(DemuxError::ChannelOutOfRange {
                channel: channel as usize,
                max: self.nof_channels,
            });
        }
        if self.ch_data.len() >= header.channels_in_event as usize {
            return self.reject(DemuxError::TooManyDataWords {
                expected: header.channels_in_event as usize,
            });
        }
        if self.ch_data.insert(channel, value).is_some() {
            return self.reject(DemuxError::DuplicateChannel {
                channel,
                crate_number: header.crate_number,
            });
        }

        Ok(())
    }

    fn finish_event(&mut self, word: u32, sink: &dyn EventSink) -> Result<bool> {
        let counter = word & EOB_COUNTER_MASK;
        let expected = self
            .header
            .map(|header| header.channels_in_event as usize)
            .unwrap_or_default();
        trace!("Caen965Demux end of block: event counter {counter}");

        if self.ch_data.len() != expected {
            self.reject(DemuxError::ChannelCountMismatch {
                expected,
                found: self.ch_data.len(),
            })?;
            return Ok(false);
        }

        let mut ev = sink.create_event();
        for (&channel, &value) in &self.ch_data {
            ev.put(self.slots[channel as usize], value);
        }
        ev.set_trigger(counter);

        self.ch_data.clear();
        self.header = None;
        self.state = DemuxState::Idle;
        self.last_event_counter = Some(counter);

        sink.publish(ev)?;
        self.stats.events += 1;
        debug!("Caen965Demux: published event {counter} with {expected} channels");

        Ok(true)
    }

    fn discard(&mut self) {
        self.ch_data.clear();
        self.header = None;
        self.stats.malformed += 1;
    }

    /// Discards the current event and waits for the next header.
    fn reject(&mut self, err: DemuxError) -> Result<(), DemuxError> {
        self.discard();
        self.state = DemuxState::Error;
        self.report(err)
    }

    fn report(&self, err: DemuxError) -> Result<(), DemuxError> {
        log_or_err!(self, log::Level::Warn, err);
        Ok(())
    }

    pub fn state(&self) -> DemuxState {
        self.state
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    /// Event counter of the last published block.
    pub fn last_event_counter(&self) -> Option<u32> {
        self.last_event_counter
    }

    pub fn last_crate_number(&self) -> Option<u8> {
        self.last_crate_number
    }

    pub fn nof_channels(&self) -> usize {
        self.nof_channels
    }

    pub fn nof_bits(&self) -> u8 {
        self.nof_bits
    }
}

impl Demultiplexer for Caen965Demux {
    fn process_words(&mut self, words: &[u32], sink: &dyn EventSink) -> Result<usize> {
        Ok(self.process_data(words, false, sink)?.events)
    }

    fn finish(&mut self) -> Result<()> {
        if self.state == DemuxState::InEvent {
            let pending = self.ch_data.len();
            self.discard();
            self.state = DemuxState::Idle;
            self.report(DemuxError::TruncatedEvent { pending })?;
        }
        self.state = DemuxState::Idle;
        Ok(())
    }

    fn stats(&self) -> DemuxStats {
        self.stats
    }

    fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::EXAMPLE_CAEN965_WORDS;
    use crate::process::buffer::EventBuffer;
    use crate::structs::event::Event;
    use crate::structs::slot::{DataType, ModuleId};
    use std::collections::BTreeSet;

    fn header(crate_number: u32, channels: u32) -> u32 {
        (0b010 << 24) | (crate_number << 16) | (channels << 8)
    }

    fn data(channel: u32, value: u32) -> u32 {
        (channel << 12) | value
    }

    fn eob(counter: u32) -> u32 {
        (0b100 << 24) | counter
    }

    fn setup() -> (EventBuffer, Vec<SlotId>, Caen965Demux) {
        let buffer = EventBuffer::new(64);
        let slots = (0..DEFAULT_CHANNELS)
            .map(|ch| {
                buffer
                    .register_slot(ModuleId(1), format!("out{ch}"), DataType::UInt)
                    .map(|slot| slot.id())
            })
            .collect::<Result<Vec<_>, _>>()
            .expect("slot registration");
        let demux = Caen965Demux::with_defaults(slots.clone()).expect("valid config");
        (buffer, slots, demux)
    }

    fn drain(buffer: &EventBuffer) -> Vec<Event> {
        std::iter::from_fn(|| buffer.try_dequeue()).collect()
    }

    #[test]
    fn decodes_three_channel_block() -> Result<()> {
        let (buffer, slots, mut demux) = setup();
        let words = [
            header(0, 3),
            data(0, 100),
            data(1, 200),
            data(2, 300),
            eob(5),
        ];

        let outcome = demux.process_data(&words, false, &buffer)?;
        assert_eq!(outcome, Caen965Outcome { events: 1, consumed: 5 });

        let events = drain(&buffer);
        assert_eq!(events.len(), 1);
        let ev = &events[0];
        assert_eq!(
            ev.occupied_slots(),
            BTreeSet::from([slots[0], slots[1], slots[2]])
        );
        assert_eq!(ev.get(slots[0]).as_uint(), Some(100));
        assert_eq!(ev.get(slots[1]).as_uint(), Some(200));
        assert_eq!(ev.get(slots[2]).as_uint(), Some(300));
        assert!(ev.get(slots[3]).is_null());
        assert_eq!(ev.trigger(), Some(5));
        assert_eq!(demux.state(), DemuxState::Idle);
        Ok(())
    }

    #[test]
    fn extra_data_word_discards_and_resyncs() -> Result<()> {
        let (buffer, slots, mut demux) = setup();
        let words = [
            header(0, 3),
            data(0, 1),
            data(1, 2),
            data(2, 3),
            data(3, 4),
            eob(1),
            header(0, 1),
            data(7, 77),
            eob(2),
        ];

        let outcome = demux.process_data(&words, false, &buffer)?;
        assert_eq!(outcome.events, 1);

        let events = drain(&buffer);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].occupied_slots(), BTreeSet::from([slots[7]]));
        assert_eq!(events[0].get(slots[7]).as_uint(), Some(77));
        assert_eq!(events[0].trigger(), Some(2));

        let stats = demux.stats();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.events, 1);
        assert_eq!(stats.records, 2);
        Ok(())
    }

    #[test]
    fn duplicate_channel_is_rejected() -> Result<()> {
        let (buffer, _, mut demux) = setup();
        let words = [header(0, 2), data(4, 1), data(4, 2), eob(1)];

        demux.process_data(&words, false, &buffer)?;
        assert!(buffer.empty());
        assert_eq!(demux.stats().malformed, 1);
        assert_eq!(demux.state(), DemuxState::Error);
        Ok(())
    }

    #[test]
    fn count_mismatch_at_end_of_block() -> Result<()> {
        let (buffer, _, mut demux) = setup();
        let words = [header(0, 3), data(0, 1), eob(1)];

        let outcome = demux.process_data(&words, false, &buffer)?;
        assert_eq!(outcome.events, 0);
        assert!(buffer.empty());
        assert_eq!(demux.stats().malformed, 1);
        Ok(())
    }

    #[test]
    fn channel_beyond_module_is_rejected() -> Result<()> {
        let buffer = EventBuffer::new(4);
        let slots = (0..8).map(SlotId).collect::<Vec<_>>();
        let mut demux = Caen965Demux::new(slots, 8, 12)?;

        demux.process_data(&[header(0, 1), data(9, 1), eob(0)], false, &buffer)?;
        assert!(buffer.empty());
        assert_eq!(demux.stats().malformed, 1);
        Ok(())
    }

    #[test]
    fn single_event_stops_after_first_block() -> Result<()> {
        let (buffer, _, mut demux) = setup();
        let words = [
            header(0, 1),
            data(0, 10),
            eob(1),
            header(0, 1),
            data(0, 20),
            eob(2),
        ];

        let first = demux.process_data(&words, true, &buffer)?;
        assert_eq!(first, Caen965Outcome { events: 1, consumed: 3 });

        let second = demux.process_data(&words[first.consumed..], true, &buffer)?;
        assert_eq!(second, Caen965Outcome { events: 1, consumed: 3 });

        let triggers = drain(&buffer)
            .iter()
            .map(Event::trigger)
            .collect::<Vec<_>>();
        assert_eq!(triggers, vec![Some(1), Some(2)]);
        Ok(())
    }

    #[test]
    fn batched_blocks_are_all_published() -> Result<()> {
        let (buffer, _, mut demux) = setup();
        let mut words = Vec::new();
        for n in 0..4 {
            words.extend([header(1, 2), data(0, n), data(15, n + 1), eob(n)]);
        }

        let outcome = demux.process_data(&words, false, &buffer)?;
        assert_eq!(outcome.events, 4);
        assert_eq!(demux.last_event_counter(), Some(3));
        assert_eq!(demux.last_crate_number(), Some(1));
        Ok(())
    }

    #[test]
    fn state_spans_calls() -> Result<()> {
        let (buffer, slots, mut demux) = setup();

        demux.process_data(&[header(0, 2), data(3, 33)], false, &buffer)?;
        assert_eq!(demux.state(), DemuxState::InEvent);
        demux.process_data(&[data(5, 55), eob(9)], false, &buffer)?;

        let ev = buffer.dequeue().expect("event");
        assert_eq!(ev.get(slots[3]).as_uint(), Some(33));
        assert_eq!(ev.get(slots[5]).as_uint(), Some(55));
        Ok(())
    }

    #[test]
    fn stray_and_filler_words_are_ignored() -> Result<()> {
        let (buffer, _, mut demux) = setup();
        let words = [data(0, 1), eob(3), 0x0600_0000, header(0, 0), eob(4)];

        let outcome = demux.process_data(&words, false, &buffer)?;
        assert_eq!(outcome.events, 1);
        assert_eq!(demux.stats().stray_words, 2);
        assert_eq!(demux.stats().malformed, 0);
        assert!(buffer.dequeue().expect("event").is_empty());
        Ok(())
    }

    #[test]
    fn header_inside_event_restarts() -> Result<()> {
        let (buffer, slots, mut demux) = setup();
        let words = [header(0, 2), data(0, 1), header(0, 1), data(2, 22), eob(8)];

        demux.process_data(&words, false, &buffer)?;
        let ev = buffer.dequeue().expect("event");
        assert_eq!(ev.occupied_slots(), BTreeSet::from([slots[2]]));
        assert_eq!(demux.stats().malformed, 1);
        Ok(())
    }

    #[test]
    fn strict_mode_returns_error_and_resyncs() -> Result<()> {
        let (buffer, _, mut demux) = setup();
        demux.set_fail_level(log::Level::Warn);

        let err = demux
            .process_data(&[header(0, 1), data(0, 1), data(1, 1)], false, &buffer)
            .expect_err("strict mode must fail");
        assert_eq!(
            err.downcast_ref::<DemuxError>(),
            Some(&DemuxError::TooManyDataWords { expected: 1 })
        );
        assert_eq!(demux.state(), DemuxState::Error);

        let outcome = demux.process_data(&[eob(0), header(0, 1), data(0, 5), eob(1)], false, &buffer)?;
        assert_eq!(outcome.events, 1);
        Ok(())
    }

    #[test]
    fn strict_single_event_reports_resume_point() -> Result<()> {
        let (buffer, slots, mut demux) = setup();
        demux.set_fail_level(log::Level::Warn);
        let words = [
            header(0, 1),
            data(0, 1),
            data(1, 1),
            header(0, 1),
            data(0, 5),
            eob(6),
        ];

        let err = demux
            .process_data(&words, true, &buffer)
            .expect_err("strict mode must fail");
        let stopped = err
            .downcast_ref::<DecodeStopped>()
            .copied()
            .expect("resume point");
        assert_eq!(stopped, DecodeStopped { consumed: 3, events: 0 });
        assert_eq!(
            err.downcast_ref::<DemuxError>(),
            Some(&DemuxError::TooManyDataWords { expected: 1 })
        );

        let outcome = demux.process_data(&words[stopped.consumed..], true, &buffer)?;
        assert_eq!(outcome, Caen965Outcome { events: 1, consumed: 3 });

        let ev = buffer.dequeue().expect("event");
        assert_eq!(ev.get(slots[0]).as_uint(), Some(5));
        assert_eq!(ev.trigger(), Some(6));
        Ok(())
    }

    #[test]
    fn truncated_stream_is_counted() -> Result<()> {
        let (buffer, _, mut demux) = setup();
        demux.process_words(&[header(0, 2), data(0, 1)], &buffer)?;
        demux.finish()?;

        assert_eq!(demux.state(), DemuxState::Idle);
        assert_eq!(demux.stats().malformed, 1);
        Ok(())
    }

    #[test]
    fn example_block() -> Result<()> {
        let (buffer, slots, mut demux) = setup();
        demux.process_data(EXAMPLE_CAEN965_WORDS, false, &buffer)?;

        let ev = buffer.dequeue().expect("event");
        assert_eq!(ev.get(slots[0]).as_uint(), Some(0x123));
        assert_eq!(ev.get(slots[2]).as_uint(), Some(0x789));
        assert_eq!(ev.trigger(), Some(42));
        assert_eq!(demux.last_crate_number(), Some(2));
        Ok(())
    }

    #[test]
    fn rejects_invalid_configuration() {
        let slots = (0..4).map(SlotId).collect::<Vec<_>>();
        assert_eq!(
            Caen965Demux::new(slots.clone(), 0, 12).err(),
            Some(ConfigError::InvalidChannelCount { max: 32, actual: 0 })
        );
        assert_eq!(
            Caen965Demux::new(slots.clone(), 4, 20).err(),
            Some(ConfigError::InvalidBitWidth { max: 19, actual: 20 })
        );
        assert_eq!(
            Caen965Demux::new(slots, 16, 12).err(),
            Some(ConfigError::MissingSlots { needed: 16, found: 4 })
        );
    }
}
