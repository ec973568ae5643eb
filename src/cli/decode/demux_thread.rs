use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use daqmux::process::buffer::EventBuffer;
use daqmux::process::{DemuxStats, Demultiplexer};
use daqmux::utils::errors::BufferError;
use daqmux::utils::word_reader::{WordAssembler, WordOrder};
use indicatif::ProgressBar;

use crate::input::{CHUNK_SIZE, InputReader};

pub struct DemuxThreadConfig {
    pub input_path: PathBuf,
    pub order: WordOrder,
    pub buffer: Arc<EventBuffer>,
    pub demux: Box<dyn Demultiplexer>,
    pub pb: Option<ProgressBar>,
}

/// What the demultiplexing thread saw of the input.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemuxReport {
    pub stats: DemuxStats,
    pub bytes: u64,
    pub words: u64,
    pub trailing_bytes: usize,
}

/// Runs the demultiplexer over the input on its own thread.
///
/// The buffer is closed when the thread ends, whatever the outcome, so the
/// consumer never waits on a producer that is gone.
pub fn spawn_demux_thread(config: DemuxThreadConfig) -> thread::JoinHandle<Result<DemuxReport>> {
    thread::spawn(move || -> Result<DemuxReport> {
        let buffer = Arc::clone(&config.buffer);
        let result = run_demux(config);
        buffer.close();
        result
    })
}

pub fn run_demux(config: DemuxThreadConfig) -> Result<DemuxReport> {
    let DemuxThreadConfig {
        input_path,
        order,
        buffer,
        mut demux,
        pb,
    } = config;

    let mut input = InputReader::new(&input_path)?;
    if input.is_pipe() {
        log::debug!("Reading words from stdin");
    }
    let mut assembler = WordAssembler::new(order);
    let mut words = Vec::with_capacity(CHUNK_SIZE / 4);
    let mut report = DemuxReport::default();

    input.process_chunks(CHUNK_SIZE, |chunk| {
        report.bytes += chunk.len() as u64;
        words.clear();
        report.words += assembler.push_bytes(chunk, &mut words)? as u64;

        match demux.process_words(&words, buffer.as_ref()) {
            Ok(_) => {}
            Err(e) if matches!(e.downcast_ref::<BufferError>(), Some(BufferError::Closed)) => {
                log::debug!("Event buffer closed by the consumer, stopping");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        if let Some(pb) = &pb {
            pb.set_position(report.bytes);
        }
        Ok(true)
    })?;

    report.trailing_bytes = assembler.pending_bytes();
    if report.trailing_bytes != 0 {
        log::warn!(
            "Ignoring {} trailing bytes that do not form a complete word",
            report.trailing_bytes
        );
    }

    demux.finish()?;
    report.stats = demux.stats();

    log::info!(
        "Demultiplexing complete: {} words, {}",
        report.words,
        report.stats
    );
    Ok(report)
}
