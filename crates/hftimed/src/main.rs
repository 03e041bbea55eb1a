use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{info, LevelFilter};

use hftime::{ChannelPipelineBuilder, DiscriminatorBuilder, MulticastSource};

mod app;
mod cli;

use cli::{Args, CliError};

fn main() {
    match hftimed() {
        Ok(()) => {}
        Err(cli_error) => cli_error.exit(),
    }
}

fn hftimed() -> Result<(), CliError> {
    // Parse options and start logging
    let args = Args::try_parse()?;
    log_setup(&args);

    // build the per-channel pipeline
    let channel = args.channel_info()?;
    let mut discriminator = DiscriminatorBuilder::default();
    discriminator
        .with_detection_snr_db(args.detection_snr)
        .with_min_completeness(args.min_completeness);

    let mut builder = ChannelPipelineBuilder::new(channel, args.rate);
    builder
        .with_discriminator(&discriminator)
        .with_source_id(args.source_id)
        .with_iq_order(args.iq_order.into())
        .with_max_fill_secs(args.max_fill)
        .with_receiver(args.receiver)
        .with_retention_minutes(args.retention);
    if let Some(dir) = &args.voter_dir {
        builder.with_voter_dir(dir);
    }
    if let Some(path) = &args.predictor {
        builder.with_predictor_path(path);
    }
    let mut pipeline = builder
        .build()
        .context("unable to configure the channel pipeline")?;

    // open the network source
    let mut source = MulticastSource::bind(
        args.group,
        args.port,
        args.iface,
        Duration::from_millis(args.timeout_ms),
    )
    .with_context(|| format!("unable to receive on {}:{}", args.group, args.port))?;
    info!(
        "{}: receiving {} at {} Hz on {}:{}",
        pipeline.channel().name(),
        pipeline
            .channel()
            .stations()
            .iter()
            .map(|st| st.as_str())
            .collect::<Vec<_>>()
            .join("/"),
        args.rate,
        args.group,
        args.port
    );

    app::run(&args, &mut pipeline, &mut source)?;

    pipeline
        .save_predictor()
        .context("unable to save the station predictor")?;
    Ok(())
}

fn log_setup(args: &Args) {
    if args.quiet {
        // no logging
        return;
    } else if std::env::var_os("RUST_LOG").is_none() {
        // parameter controls
        let log_filter = match args.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        pretty_env_logger::formatted_builder()
            .filter_module("hftime", log_filter)
            .filter_module("hftimed", log_filter)
            .init();
    } else {
        // environment controls
        pretty_env_logger::init();
    }
}
