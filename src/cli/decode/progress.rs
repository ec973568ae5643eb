use std::path::Path;

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Input size in bytes, when the input is a regular file.
pub fn input_size(input_path: &Path, is_pipe: bool) -> Option<u64> {
    if is_pipe {
        log::debug!("Skipping progress estimation for pipe input");
        return None;
    }
    std::fs::metadata(input_path).ok().map(|meta| meta.len())
}

pub fn create_progress_bar(multi: &MultiProgress, total_bytes: Option<u64>) -> Result<ProgressBar> {
    let pb = if let Some(total) = total_bytes {
        let pb = multi.add(ProgressBar::new(total));
        pb.set_style(ProgressStyle::with_template(
            "{bar:40.cyan/blue} {bytes}/{total_bytes} ({percent}%)\n{msg} | elapsed: {elapsed_precise} | ETA: {eta_precise}",
        )?);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    } else {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyle::with_template(
            "{spinner:.green} {bytes}\n{msg} | elapsed: {elapsed_precise}",
        )?);
        pb
    };
    pb.set_message("demultiplexing");
    Ok(pb)
}
