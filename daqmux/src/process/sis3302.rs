use anyhow::Result;
use log::{debug, trace};

use crate::log_or_err;
use crate::process::{DemuxStats, Demultiplexer, EventSink};
use crate::structs::event::Event;
use crate::structs::slot::SlotId;
use crate::utils::errors::{ConfigError, DemuxError};

pub const DEFAULT_CHANNELS: usize = 8;
/// Channel ids are carried in three bits of the length word.
pub const MAX_CHANNELS: usize = 8;

const LENGTH_CHANNEL_SHIFT: u32 = 29;
const LENGTH_CHANNEL_MASK: u32 = 0x7;
const LENGTH_MASK: u32 = 0x01FF_FFFF;
const HEADER_RAW_MASK: u32 = 0xFFFF;

/// Header words preceding the raw trace of each sub-event.
const RAW_OFFSET: usize = 2;
/// Header, accumulator and trailer words around the two traces.
const OVERHEAD_WORDS: usize = 6;

/// Word geometry of one record, computed before any data is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sis3302Layout {
    pub channel: usize,
    /// Record length in words, from the length word.
    pub total_len: usize,
    /// Sub-events packed in the record.
    pub nof_events: usize,
    /// Words per sub-event.
    pub per_event: usize,
    /// 16-bit raw samples per sub-event.
    pub raw_samples: usize,
    /// Derived (energy filter) trace words per sub-event.
    pub derived_len: usize,
}

impl Sis3302Layout {
    fn raw_words(&self) -> usize {
        self.raw_samples / 2
    }

    fn derived_offset(&self) -> usize {
        RAW_OFFSET + self.raw_words()
    }

    fn accumulator_offset(&self) -> usize {
        self.derived_offset() + self.derived_len
    }
}

/// Demultiplexer for SIS3302 gamma firmware records.
///
/// Each record holds `nof_events` sub-events of identical length, each made
/// of a raw trace (two 16-bit samples per word), a derived trace and two
/// accumulator words whose difference is the energy.
///
/// Slots are laid out as three banks of `channel_count` entries:
/// raw traces, derived traces, then energies. A record for channel `c`
/// writes `slots[c]`, `slots[c + channel_count]` and
/// `slots[c + 2 * channel_count]`.
#[derive(Debug)]
pub struct Sis3302Demux {
    slots: Vec<SlotId>,
    channel_count: usize,
    multi_event: bool,
    nof_events: usize,
    pending: Vec<u32>,
    stats: DemuxStats,
    pub fail_level: log::Level,
}

impl Sis3302Demux {
    pub fn new(slots: Vec<SlotId>, channel_count: usize) -> Result<Self, ConfigError> {
        if channel_count == 0 || channel_count > MAX_CHANNELS {
            return Err(ConfigError::InvalidChannelCount {
                max: MAX_CHANNELS,
                actual: channel_count,
            });
        }
        if slots.len() < 3 * channel_count {
            return Err(ConfigError::MissingSlots {
                needed: 3 * channel_count,
                found: slots.len(),
            });
        }

        Ok(Self {
            slots,
            channel_count,
            multi_event: false,
            nof_events: 1,
            pending: Vec::new(),
            stats: DemuxStats::default(),
            fail_level: log::Level::Error,
        })
    }

    pub fn with_defaults(slots: Vec<SlotId>) -> Result<Self, ConfigError> {
        Self::new(slots, DEFAULT_CHANNELS)
    }

    /// Enables packing of several sub-events into one record.
    pub fn set_multi_event(&mut self, multi_event: bool) {
        self.multi_event = multi_event;
    }

    /// Number of sub-events per record when multi-event packing is enabled.
    pub fn set_nof_events(&mut self, nof_events: usize) -> Result<(), ConfigError> {
        if nof_events == 0 {
            return Err(ConfigError::InvalidEventCount);
        }
        self.nof_events = nof_events;
        Ok(())
    }

    pub fn is_multi_event(&self) -> bool {
        self.multi_event
    }

    pub fn nof_events(&self) -> usize {
        if self.multi_event { self.nof_events } else { 1 }
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Computes and validates the record geometry.
    ///
    /// Every offset used by [`process`](Self::process) is checked against
    /// `data` here, so decoding never reads out of bounds.
    pub fn layout(&self, len_word: u32, data: &[u32]) -> Result<Sis3302Layout, DemuxError> {
        let channel = ((len_word >> LENGTH_CHANNEL_SHIFT) & LENGTH_CHANNEL_MASK) as usize;
        let total_len = (len_word & LENGTH_MASK) as usize;
        let nof_events = self.nof_events();

        if channel >= self.channel_count {
            return Err(DemuxError::ChannelOutOfRange {
                channel,
                max: self.channel_count,
            });
        }
        if total_len > data.len() {
            return Err(DemuxError::RecordTooShort {
                needed: total_len,
                available: data.len(),
            });
        }
        let Some(&header) = data.first() else {
            return Err(DemuxError::RecordTooShort {
                needed: 1,
                available: 0,
            });
        };

        let per_event = total_len / nof_events;
        let raw_samples = ((header & HEADER_RAW_MASK) / 2) as usize;
        let raw_words = raw_samples / 2;

        let derived_len = per_event
            .checked_sub(raw_words + OVERHEAD_WORDS)
            .ok_or(DemuxError::InvalidLayout {
                per_event,
                raw_words,
                footer: OVERHEAD_WORDS,
            })?;

        let needed = per_event * nof_events;
        if needed > data.len() {
            return Err(DemuxError::RecordTooShort {
                needed,
                available: data.len(),
            });
        }

        Ok(Sis3302Layout {
            channel,
            total_len,
            nof_events,
            per_event,
            raw_samples,
            derived_len,
        })
    }

    /// Decodes one record into `ev`.
    ///
    /// `len_word` carries the channel id in bits 31..29 and the record length
    /// in words in bits 24..0. On error nothing is written to `ev`.
    pub fn process(
        &mut self,
        ev: &mut Event,
        len_word: u32,
        data: &[u32],
    ) -> Result<Sis3302Layout, DemuxError> {
        self.stats.records += 1;
        let layout = self.layout(len_word, data)?;
        trace!(
            "Sis3302Demux: channel {} with {} words, {} sub-events of {} words ({} raw samples, {} derived words)",
            layout.channel,
            layout.total_len,
            layout.nof_events,
            layout.per_event,
            layout.raw_samples,
            layout.derived_len
        );

        let mut raw = Vec::with_capacity(layout.raw_samples * layout.nof_events);
        let mut derived = Vec::with_capacity(layout.derived_len * layout.nof_events);
        let mut energy = Vec::with_capacity(layout.nof_events);

        for sub_event in data.chunks_exact(layout.per_event).take(layout.nof_events) {
            let raw_words = &sub_event[RAW_OFFSET..layout.derived_offset()];
            for &word in raw_words {
                raw.push(word & 0xFFFF);
                raw.push(word >> 16);
            }

            let accumulator = layout.accumulator_offset();
            derived.extend_from_slice(&sub_event[layout.derived_offset()..accumulator]);

            let first = sub_event[accumulator] as i32;
            let second = sub_event[accumulator + 1] as i32;
            energy.push(first as f64 - second as f64);
        }
        // An odd sample count leaves the last sample of each sub-event
        // unpacked; the trace keeps its announced length, zero-filled at the end.
        raw.resize(layout.raw_samples * layout.nof_events, 0);

        ev.put(self.slots[layout.channel], raw);
        ev.put(self.slots[layout.channel + self.channel_count], derived);
        ev.put(self.slots[layout.channel + 2 * self.channel_count], energy);

        Ok(layout)
    }

    fn report(&self, err: DemuxError) -> Result<(), DemuxError> {
        log_or_err!(self, log::Level::Warn, err);
        Ok(())
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }
}

impl Demultiplexer for Sis3302Demux {
    /// Consumes length-prefixed records: each record is its length word
    /// followed by the number of words the length word announces.
    fn process_words(&mut self, words: &[u32], sink: &dyn EventSink) -> Result<usize> {
        self.pending.extend_from_slice(words);

        let mut published = 0;
        let mut start = 0;
        while let Some(&len_word) = self.pending.get(start) {
            let total_len = (len_word & LENGTH_MASK) as usize;
            let end = start + 1 + total_len;
            if end > self.pending.len() {
                break;
            }

            let record = std::mem::take(&mut self.pending);
            let mut ev = sink.create_event();
            let result = self.process(&mut ev, len_word, &record[start + 1..end]);
            self.pending = record;
            start = end;

            match result {
                Ok(layout) => {
                    sink.publish(ev)?;
                    self.stats.events += 1;
                    published += 1;
                    debug!(
                        "Sis3302Demux: published channel {} with {} sub-events",
                        layout.channel, layout.nof_events
                    );
                }
                Err(err) => {
                    self.stats.malformed += 1;
                    if let Err(err) = self.report(err) {
                        self.pending.drain(..start);
                        return Err(err.into());
                    }
                }
            }
        }

        self.pending.drain(..start);
        Ok(published)
    }

    fn finish(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let available = self.pending.len() - 1;
        let needed = (self.pending[0] & LENGTH_MASK) as usize;
        self.pending.clear();
        self.stats.malformed += 1;
        self.report(DemuxError::RecordTooShort { needed, available })?;
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
    use crate::process::buffer::EventBuffer;
    use crate::structs::event::Value;
    use crate::structs::slot::{DataType, ModuleId};

    fn slots(channel_count: usize) -> Vec<SlotId> {
        (0..3 * channel_count as u32).map(SlotId).collect()
    }

    fn len_word(channel: u32, total: u32) -> u32 {
        (channel << 29) | total
    }

    /// One sub-event of ten words: four raw samples, two derived words.
    fn sub_event(seed: u32, accum: (i32, i32)) -> [u32; 10] {
        [
            8,
            0xDEAD_0000 | seed,
            (seed + 2) << 16 | (seed + 1),
            (seed + 4) << 16 | (seed + 3),
            seed * 100,
            seed * 100 + 1,
            accum.0 as u32,
            accum.1 as u32,
            0,
            0xDEAD_BEEF,
        ]
    }

    #[test]
    fn decodes_two_packed_sub_events() -> anyhow::Result<()> {
        let mut demux = Sis3302Demux::with_defaults(slots(8))?;
        demux.set_multi_event(true);
        demux.set_nof_events(2)?;

        let mut data = Vec::new();
        data.extend(sub_event(1, (500, 120)));
        data.extend(sub_event(5, (-10, 30)));

        let mut ev = Event::new();
        let layout = demux.process(&mut ev, len_word(2, 20), &data)?;
        assert_eq!(
            layout,
            Sis3302Layout {
                channel: 2,
                total_len: 20,
                nof_events: 2,
                per_event: 10,
                raw_samples: 4,
                derived_len: 2,
            }
        );

        assert_eq!(
            ev.get(SlotId(2)).as_uint_slice(),
            Some(&[2u32, 3, 4, 5, 6, 7, 8, 9][..])
        );
        assert_eq!(
            ev.get(SlotId(10)).as_uint_slice(),
            Some(&[100u32, 101, 500, 501][..])
        );
        assert_eq!(
            ev.get(SlotId(18)).as_double_slice(),
            Some(&[380.0, -40.0][..])
        );
        assert_eq!(ev.occupied_slots().len(), 3);
        Ok(())
    }

    #[test]
    fn single_event_ignores_event_count() -> anyhow::Result<()> {
        let mut demux = Sis3302Demux::with_defaults(slots(8))?;
        demux.set_nof_events(4)?;
        assert_eq!(demux.nof_events(), 1);

        let mut ev = Event::new();
        let layout = demux.process(&mut ev, len_word(0, 10), &sub_event(0, (7, 3)))?;
        assert_eq!(layout.nof_events, 1);
        assert_eq!(ev.get(SlotId(16)), &Value::DoubleVec(vec![4.0]));
        Ok(())
    }

    #[test]
    fn short_or_inconsistent_records_are_rejected() -> anyhow::Result<()> {
        let demux = Sis3302Demux::with_defaults(slots(8))?;
        let data = sub_event(0, (0, 0));

        assert_eq!(
            demux.layout(len_word(0, 12), &data),
            Err(DemuxError::RecordTooShort {
                needed: 12,
                available: 10
            })
        );
        assert_eq!(
            demux.layout(len_word(0, 6), &data),
            Err(DemuxError::InvalidLayout {
                per_event: 6,
                raw_words: 2,
                footer: 6
            })
        );
        assert_eq!(
            demux.layout(len_word(0, 0), &[]),
            Err(DemuxError::RecordTooShort {
                needed: 1,
                available: 0
            })
        );
        Ok(())
    }

    #[test]
    fn channel_outside_module_is_rejected() -> anyhow::Result<()> {
        let mut demux = Sis3302Demux::new(slots(4), 4)?;
        let mut ev = Event::new();

        let result = demux.process(&mut ev, len_word(6, 10), &sub_event(0, (0, 0)));
        assert_eq!(
            result,
            Err(DemuxError::ChannelOutOfRange { channel: 6, max: 4 })
        );
        assert!(ev.is_empty());
        Ok(())
    }

    #[test]
    fn huge_raw_header_does_not_overflow() -> anyhow::Result<()> {
        let mut demux = Sis3302Demux::with_defaults(slots(8))?;
        let mut data = sub_event(0, (0, 0));
        data[0] = 0xFFFF;

        let mut ev = Event::new();
        assert!(matches!(
            demux.process(&mut ev, len_word(1, 10), &data),
            Err(DemuxError::InvalidLayout { .. })
        ));
        assert!(ev.is_empty());
        Ok(())
    }

    #[test]
    fn odd_raw_sample_count_is_zero_filled() -> anyhow::Result<()> {
        let mut demux = Sis3302Demux::with_defaults(slots(8))?;
        let mut data = sub_event(0, (7, 3));
        data[0] = 10;

        let mut ev = Event::new();
        let layout = demux.process(&mut ev, len_word(0, 10), &data)?;
        assert_eq!(layout.raw_samples, 5);
        assert_eq!(layout.derived_len, 2);
        assert_eq!(
            ev.get(SlotId(0)).as_uint_slice(),
            Some(&[1u32, 2, 3, 4, 0][..])
        );
        assert_eq!(
            ev.get(SlotId(8)).as_uint_slice(),
            Some(&[0u32, 1][..])
        );
        Ok(())
    }

    #[test]
    fn stream_of_prefixed_records() -> anyhow::Result<()> {
        let buffer = EventBuffer::new(8);
        let mut slots = Vec::new();
        for (prefix, data_type) in [
            ("raw", DataType::UIntVec),
            ("trace", DataType::UIntVec),
            ("energy", DataType::DoubleVec),
        ] {
            for ch in 0..8 {
                let slot = buffer.register_slot(ModuleId(3), format!("{prefix}{ch}"), data_type)?;
                slots.push(slot.id());
            }
        }
        let mut demux = Sis3302Demux::with_defaults(slots.clone())?;

        let mut words = vec![len_word(1, 10)];
        words.extend(sub_event(0, (9, 4)));
        words.push(len_word(3, 10));
        words.extend(sub_event(1, (1, 1)));

        // split inside the second record
        assert_eq!(demux.process_words(&words[..14], &buffer)?, 1);
        assert_eq!(demux.process_words(&words[14..], &buffer)?, 1);

        let first = buffer.dequeue().expect("first record");
        assert_eq!(first.get(slots[17]).as_double_slice(), Some(&[5.0][..]));
        let second = buffer.dequeue().expect("second record");
        assert!(second.is_occupied(slots[3]));
        assert!(second.is_occupied(slots[11]));
        assert!(second.is_occupied(slots[19]));
        assert_eq!(demux.stats().events, 2);

        demux.finish()?;
        assert_eq!(demux.stats().malformed, 0);
        Ok(())
    }

    #[test]
    fn malformed_record_is_skipped() -> anyhow::Result<()> {
        let buffer = EventBuffer::new(8);
        let mut demux = Sis3302Demux::with_defaults(slots(8))?;

        let mut words = vec![len_word(0, 4), 8, 0, 0, 0];
        words.push(len_word(0, 10));
        words.extend(sub_event(2, (3, 1)));

        assert_eq!(demux.process_words(&words, &buffer)?, 1);
        assert_eq!(demux.stats().malformed, 1);
        assert_eq!(demux.stats().records, 2);

        demux.process_words(&[len_word(0, 10), 8, 0], &buffer)?;
        demux.finish()?;
        assert_eq!(demux.stats().malformed, 2);
        Ok(())
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert_eq!(
            Sis3302Demux::new(slots(2), 4).err(),
            Some(ConfigError::MissingSlots {
                needed: 12,
                found: 6
            })
        );
        assert_eq!(
            Sis3302Demux::new(slots(9), 9).err(),
            Some(ConfigError::InvalidChannelCount { max: 8, actual: 9 })
        );

        let mut demux = Sis3302Demux::with_defaults(slots(8)).expect("valid config");
        assert_eq!(demux.set_nof_events(0), Err(ConfigError::InvalidEventCount));
    }
}
