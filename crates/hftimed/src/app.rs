//! Receive loop
//!
//! Datagrams are fed to the pipeline as they arrive. Each
//! completed minute is printed to stdout as one line of JSON.
//! A read timeout just returns control to the loop, which
//! keeps going until the requested number of minutes has been
//! reported or the socket fails.

use std::io::{self, Write};

use anyhow::Context;
use chrono::Utc;
use log::{info, trace};

use hftime::{ChannelPipeline, MinuteReport, MulticastSource};

use crate::cli::Args;

/// Run the application
///
/// Receives from `source` into `pipeline` until `--minutes`
/// reports have been printed, then flushes the partial minute.
/// Without `--minutes`, only a receive error ends the loop.
pub fn run(
    args: &Args,
    pipeline: &mut ChannelPipeline,
    source: &mut MulticastSource,
) -> Result<(), anyhow::Error> {
    let mut reported = 0u64;
    while !done(args, reported) {
        let reports = match source.recv().context("unable to receive")? {
            Some(dgram) => pipeline.push_packet(dgram, Utc::now()),
            None => {
                trace!("receive timeout");
                continue;
            }
        };
        for report in reports {
            emit(args, report)?;
            reported += 1;
        }
    }

    info!(
        "{}: stopping after {} minutes; {:?}",
        pipeline.channel().name(),
        reported,
        pipeline.stats()
    );
    for report in pipeline.finish() {
        emit(args, report)?;
    }
    Ok(())
}

fn done(args: &Args, reported: u64) -> bool {
    args.minutes.map(|max| reported >= max).unwrap_or(false)
}

// One report per line. Samples are large, so they are dropped
// unless requested.
fn emit(args: &Args, mut report: MinuteReport) -> Result<(), anyhow::Error> {
    if args.quiet {
        return Ok(());
    }
    if !args.with_samples {
        report.archive.samples.clear();
    }
    let line = serde_json::to_string(&report).context("unable to encode report")?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", line).context("unable to write report")?;
    stdout.flush().context("unable to write report")?;
    Ok(())
}
