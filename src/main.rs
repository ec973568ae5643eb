use anyhow::Result;
use clap::Parser as ClapParser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

use cli::command::{Cli, Commands, LogFormat};
use cli::decode::cmd_decode;
use cli::info::cmd_info;

mod cli;
mod input;
mod setup;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let base_level = cli.loglevel.to_level_filter();

    let multi = MultiProgress::new();

    let mut env_builder = env_logger::Builder::from_default_env();
    env_builder.filter_level(base_level);
    match cli.log_format {
        LogFormat::Plain => {
            env_builder.format_timestamp_secs();
        }
        LogFormat::Json => {
            env_builder.format(|buf, record| {
                use std::io::Write;
                writeln!(
                    buf,
                    "{{\"ts\":{},\"lvl\":\"{}\",\"target\":{},\"msg\":{}}}",
                    serde_json::to_string(&buf.timestamp().to_string())
                        .unwrap_or_default(),
                    record.level(),
                    serde_json::to_string(record.target()).unwrap_or_default(),
                    serde_json::to_string(&record.args().to_string()).unwrap_or_default()
                )
            });
        }
    }

    let pb = if cli.progress {
        let logger = env_builder.build();
        LogWrapper::new(multi.clone(), logger).try_init()?;
        Some(&multi)
    } else {
        env_builder.try_init()?;
        None
    };

    log::debug!(
        "daqmuxd {} ({}), built {}",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_DESCRIBE").unwrap_or("unknown"),
        env!("BUILD_TIMESTAMP")
    );

    match cli.command {
        Commands::Decode(ref args) => cmd_decode(args, &cli, pb)?,
        Commands::Info(ref args) => cmd_info(args, &cli, pb)?,
    }

    Ok(())
}
