use std::collections::BTreeMap;

use anyhow::Result;
use daqmux::structs::event::Event;
use daqmux::structs::slot::{EventSlot, SlotId};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::command::{Cli, InfoArgs};
use super::decode::demux_thread::{DemuxReport, DemuxThreadConfig, spawn_demux_thread};
use crate::setup::{ModuleSetup, Pipeline};

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let stream = &args.stream;
    log::info!("Analyzing {:?} dump: {}", stream.module, stream.input.display());

    let Pipeline {
        setup,
        buffer,
        demux,
        slots,
    } = Pipeline::prepare(stream, cli.strict)?;

    let pb = if let Some(multi) = multi {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb.set_message("Analyzing events...");
        Some(pb)
    } else {
        None
    };

    let demux_thread = spawn_demux_thread(DemuxThreadConfig {
        input_path: stream.input.clone(),
        order: stream.word_order(),
        buffer: buffer.clone(),
        demux,
        pb: None,
    });

    let mut occupancy = Occupancy::new(&slots);
    while let Some(event) = buffer.dequeue() {
        occupancy.count(&event);

        if occupancy.events.is_multiple_of(1000) {
            if let Some(ref pb) = pb {
                pb.set_message(format!("Analyzing events...       {}", occupancy.events));
            }
        }
    }

    let report = match demux_thread.join() {
        Ok(result) => result?,
        Err(_) => return Err(anyhow::anyhow!("Demultiplexing thread panicked")),
    };

    if let Some(ref pb) = pb {
        pb.finish_and_clear();
    }

    display_setup(&setup)?;
    display_report(&report);
    display_occupancy(&occupancy);

    Ok(())
}

/// Number of events each slot was filled in.
struct Occupancy {
    names: Vec<(SlotId, String)>,
    counts: BTreeMap<SlotId, u64>,
    triggers: Option<(u32, u32)>,
    events: u64,
}

impl Occupancy {
    fn new(slots: &[EventSlot]) -> Self {
        Self {
            names: slots
                .iter()
                .map(|slot| (slot.id(), slot.name().to_string()))
                .collect(),
            counts: BTreeMap::new(),
            triggers: None,
            events: 0,
        }
    }

    fn count(&mut self, event: &Event) {
        self.events += 1;
        for slot in event.occupied_slots() {
            *self.counts.entry(slot).or_default() += 1;
        }
        if let Some(trigger) = event.trigger() {
            self.triggers = Some(match self.triggers {
                Some((first, _)) => (first, trigger),
                None => (trigger, trigger),
            });
        }
    }

    fn of(&self, slot: SlotId) -> u64 {
        self.counts.get(&slot).copied().unwrap_or(0)
    }
}

fn display_setup(setup: &ModuleSetup) -> Result<()> {
    println!();
    println!("Module Setup");
    println!("============");
    print!("{}", serde_yaml_ng::to_string(setup)?);
    println!();
    Ok(())
}

fn display_report(report: &DemuxReport) {
    let size_mb = report.bytes as f64 / 1_000_000.0;

    println!("Stream Summary");
    println!("  Size                      {size_mb:.2} MB ({} bytes)", report.bytes);
    println!("  Words                     {}", report.words);
    if report.trailing_bytes != 0 {
        println!("  Trailing bytes            {}", report.trailing_bytes);
    }
    println!("  Records                   {}", report.stats.records);
    println!("  Events                    {}", report.stats.events);
    println!("  Malformed                 {}", report.stats.malformed);
    println!("  Stray words               {}", report.stats.stray_words);
    println!();
}

fn display_occupancy(occupancy: &Occupancy) {
    println!("Slot Occupancy");
    if let Some((first, last)) = occupancy.triggers {
        println!("  Event counters            {first} .. {last}");
    }
    for (id, name) in &occupancy.names {
        let filled = occupancy.of(*id);
        let percent = if occupancy.events > 0 {
            filled as f64 * 100.0 / occupancy.events as f64
        } else {
            0.0
        };
        println!("  {name:<26}{filled} ({percent:.1}%)");
    }
    println!();
}
