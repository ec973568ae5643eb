use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use daqmux::process::buffer::EventBuffer;
use daqmux::process::caen965::{self, Caen965Demux};
use daqmux::process::sis3302::{self, Sis3302Demux};
use daqmux::process::Demultiplexer;
use daqmux::structs::slot::{DataType, EventSlot, ModuleId, SlotId};
use serde::{Deserialize, Serialize};

use crate::cli::command::{ModuleKind, StreamArgs};

/// Module parameters as written in a setup file. Absent keys keep the
/// module defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SetupFile {
    name: Option<String>,
    channels: Option<usize>,
    bits: Option<u8>,
    multi_event: Option<bool>,
    events_per_record: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSetup {
    pub kind: ModuleKindName,
    pub name: String,
    pub channels: usize,
    pub bits: u8,
    pub multi_event: bool,
    pub events_per_record: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKindName {
    Caen965,
    Sis3302,
}

impl From<ModuleKind> for ModuleKindName {
    fn from(kind: ModuleKind) -> Self {
        match kind {
            ModuleKind::Caen965 => ModuleKindName::Caen965,
            ModuleKind::Sis3302 => ModuleKindName::Sis3302,
        }
    }
}

impl ModuleSetup {
    pub fn defaults(kind: ModuleKind) -> Self {
        match kind {
            ModuleKind::Caen965 => Self {
                kind: kind.into(),
                name: "qdc".to_string(),
                channels: caen965::DEFAULT_CHANNELS,
                bits: caen965::DEFAULT_BITS,
                multi_event: false,
                events_per_record: 1,
            },
            ModuleKind::Sis3302 => Self {
                kind: kind.into(),
                name: "sis".to_string(),
                channels: sis3302::DEFAULT_CHANNELS,
                bits: 16,
                multi_event: false,
                events_per_record: 1,
            },
        }
    }

    /// Defaults for `kind`, overridden by the setup file when one is given.
    pub fn load(kind: ModuleKind, path: Option<&Path>) -> Result<Self> {
        let mut setup = Self::defaults(kind);
        if let Some(path) = path {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading setup file {}", path.display()))?;
            setup.apply_yaml(&text)
                .with_context(|| format!("parsing setup file {}", path.display()))?;
            log::info!("Loaded module setup from {}", path.display());
        }
        Ok(setup)
    }

    fn apply_yaml(&mut self, text: &str) -> Result<()> {
        let file: SetupFile = serde_yaml_ng::from_str(text)?;

        if let Some(name) = file.name {
            self.name = name;
        }
        if let Some(channels) = file.channels {
            self.channels = channels;
        }
        if let Some(bits) = file.bits {
            self.bits = bits;
        }
        if let Some(multi_event) = file.multi_event {
            self.multi_event = multi_event;
        }
        if let Some(events) = file.events_per_record {
            self.events_per_record = events;
        }
        Ok(())
    }

    /// Registers the module's slots on `buffer` and binds a decoder to them.
    pub fn instantiate(
        &self,
        owner: ModuleId,
        buffer: &EventBuffer,
    ) -> Result<Box<dyn Demultiplexer>> {
        match self.kind {
            ModuleKindName::Caen965 => {
                let slots = self.register(owner, buffer, "out", DataType::UInt)?;
                let demux = Caen965Demux::new(slots, self.channels, self.bits)?;
                Ok(Box::new(demux))
            }
            ModuleKindName::Sis3302 => {
                let mut slots = self.register(owner, buffer, "raw", DataType::UIntVec)?;
                slots.extend(self.register(owner, buffer, "trace", DataType::UIntVec)?);
                slots.extend(self.register(owner, buffer, "energy", DataType::DoubleVec)?);

                let mut demux = Sis3302Demux::new(slots, self.channels)?;
                demux.set_multi_event(self.multi_event);
                demux.set_nof_events(self.events_per_record)?;
                Ok(Box::new(demux))
            }
        }
    }

    fn register(
        &self,
        owner: ModuleId,
        buffer: &EventBuffer,
        prefix: &str,
        data_type: DataType,
    ) -> Result<Vec<SlotId>> {
        (0..self.channels)
            .map(|ch| {
                buffer
                    .register_slot(owner, format!("{prefix}{ch}"), data_type)
                    .map(|slot| slot.id())
                    .with_context(|| format!("registering slots for {}", self.name))
            })
            .collect()
    }
}

/// Owner of the slots of the single module read from a dump.
pub const STREAM_MODULE: ModuleId = ModuleId(0);

/// Event buffer and bound decoder for one word dump.
pub struct Pipeline {
    pub setup: ModuleSetup,
    pub buffer: Arc<EventBuffer>,
    pub demux: Box<dyn Demultiplexer>,
    pub slots: Vec<EventSlot>,
}

impl Pipeline {
    pub fn prepare(stream: &StreamArgs, strict: bool) -> Result<Self> {
        let setup = ModuleSetup::load(stream.module, stream.setup.as_deref())?;
        let buffer = Arc::new(EventBuffer::new(stream.buffer_size));
        let mut demux = setup.instantiate(STREAM_MODULE, &buffer)?;

        let fail_level = if strict {
            log::Level::Warn
        } else {
            log::Level::Error
        };
        demux.set_fail_level(fail_level);

        let slots = buffer.get_event_slots(STREAM_MODULE).unwrap_or_default();
        log::debug!(
            "{} ({:?}): {} channels, {} slots, buffer of {} events",
            setup.name,
            setup.kind,
            setup.channels,
            slots.len(),
            buffer.size()
        );

        Ok(Self {
            setup,
            buffer,
            demux,
            slots,
        })
    }
}
