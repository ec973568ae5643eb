use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use daqmux::structs::event::{Event, Value};
use daqmux::structs::slot::{EventSlot, SlotId};
use serde::Serialize;

use crate::cli::command::EventFormat;

/// Serialised form of one event: occupied slots keyed by slot name.
#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    index: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    trigger: Option<u32>,
    slots: BTreeMap<&'a str, &'a Value>,
}

pub struct EventWriter<W: Write> {
    out: W,
    format: EventFormat,
    names: BTreeMap<SlotId, String>,
    written: u64,
}

impl EventWriter<Box<dyn Write>> {
    /// Writes to `path`, or to stdout when no path is given.
    pub fn create(path: Option<&Path>, format: EventFormat, slots: &[EventSlot]) -> Result<Self> {
        let out: Box<dyn Write> = match path {
            Some(path) => {
                let file = File::create(path)
                    .with_context(|| format!("creating output {}", path.display()))?;
                log::info!("Writing events to {}", path.display());
                Box::new(BufWriter::new(file))
            }
            None => Box::new(BufWriter::new(io::stdout().lock())),
        };
        Ok(Self::from_writer(out, format, slots))
    }
}

impl<W: Write> EventWriter<W> {
    pub fn from_writer(out: W, format: EventFormat, slots: &[EventSlot]) -> Self {
        let names = slots
            .iter()
            .map(|slot| (slot.id(), slot.name().to_string()))
            .collect();
        Self {
            out,
            format,
            names,
            written: 0,
        }
    }

    pub fn write_event(&mut self, event: &Event) -> Result<()> {
        let unnamed = event
            .iter()
            .filter(|(id, _)| !self.names.contains_key(id))
            .map(|(id, _)| (id, id.to_string()))
            .collect::<BTreeMap<_, _>>();

        let slots = event
            .iter()
            .map(|(id, value)| {
                let name = self
                    .names
                    .get(&id)
                    .or_else(|| unnamed.get(&id))
                    .map_or("", String::as_str);
                (name, value)
            })
            .collect();

        let record = EventRecord {
            index: self.written,
            trigger: event.trigger(),
            slots,
        };

        match self.format {
            EventFormat::Yaml => {
                writeln!(self.out, "---")?;
                serde_yaml_ng::to_writer(&mut self.out, &record)?;
            }
            EventFormat::Json => {
                serde_json::to_writer(&mut self.out, &record)?;
                writeln!(self.out)?;
            }
        }

        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}
