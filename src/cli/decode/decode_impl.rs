use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar};

use super::demux_thread::{DemuxReport, DemuxThreadConfig, spawn_demux_thread};
use super::output::EventWriter;
use super::progress::{create_progress_bar, input_size};
use crate::cli::command::{Cli, DecodeArgs};
use crate::setup::Pipeline;

pub fn cmd_decode(args: &DecodeArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let stream = &args.stream;

    log::info!(
        "Demultiplexing {:?} dump: {} (strict mode: {})",
        stream.module,
        stream.input.display(),
        cli.strict
    );

    let Pipeline {
        buffer,
        demux,
        slots,
        ..
    } = Pipeline::prepare(stream, cli.strict)?;

    let pb = if let Some(multi) = multi {
        Some(create_progress_bar(
            multi,
            input_size(&stream.input, stream.is_pipe()),
        )?)
    } else {
        None
    };

    let mut writer = EventWriter::create(args.output.as_deref(), args.format, &slots)?;

    let demux_thread = spawn_demux_thread(DemuxThreadConfig {
        input_path: stream.input.clone(),
        order: stream.word_order(),
        buffer: buffer.clone(),
        demux,
        pb: pb.clone(),
    });

    let start_time = Instant::now();

    while let Some(event) = buffer.dequeue() {
        if let Err(e) = writer.write_event(&event) {
            // Unblock the producer before bailing out.
            buffer.close();
            if let Some(msg) = join_abandoned(demux_thread) {
                log::warn!("{msg}");
            }
            finish_failed(&pb, "writing events failed");
            return Err(e);
        }
    }

    let written = writer.written();
    writer.finish()?;

    match demux_thread.join() {
        Ok(Ok(report)) => {
            finalize_progress_bar(&pb, &report, written, start_time);
            log::info!("Wrote {written} events");
            Ok(())
        }
        Ok(Err(e)) => {
            finish_failed(&pb, "demultiplexing failed");
            Err(e)
        }
        Err(_) => {
            finish_failed(&pb, "demultiplexing thread panicked");
            Err(anyhow::anyhow!("Demultiplexing thread panicked"))
        }
    }
}

/// Joins the producer after the consumer gave up, describing any failure it
/// hit on its own.
fn join_abandoned(handle: JoinHandle<Result<DemuxReport>>) -> Option<String> {
    match handle.join() {
        Ok(Ok(_)) => None,
        Ok(Err(e)) => Some(format!("Demultiplexing also failed: {e:#}")),
        Err(_) => Some("Demultiplexing thread panicked".to_string()),
    }
}

fn finish_failed(pb: &Option<ProgressBar>, msg: &'static str) {
    if let Some(pb) = pb {
        pb.finish_with_message(msg);
    }
}

fn finalize_progress_bar(
    pb: &Option<ProgressBar>,
    report: &DemuxReport,
    written: u64,
    start_time: Instant,
) {
    if let Some(pb) = pb {
        let elapsed = start_time.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            written as f64 / elapsed
        } else {
            0.0
        };
        pb.finish_with_message(format!(
            "{written} events | {} malformed | {rate:.0} events/s",
            report.stats.malformed
        ));
    }
}
