// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use bmc_oem_comms::error::UpdateStep;
use bmc_oem_comms::Bmc;
use bmc_oem_comms::CancellationToken;
use bmc_oem_comms::IpmitoolConfig;
use bmc_oem_comms::IpmitoolTransport;
use bmc_oem_comms::UpdateConfig;
use bmc_oem_comms::UpdateProgress;
use bmc_oem_messages::TransferId;
use clap::Parser;
use clap::Subcommand;
use indicatif::ProgressBar;
use indicatif::ProgressStyle;
use serde_json::json;
use slog::info;
use slog::o;
use slog::warn;
use slog::Drain;
use slog::Level;
use slog::Logger;
use slog_async::AsyncGuard;
use std::fs;
use std::fs::File;
use std::io;
use std::mem;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

/// Command line program that queries and updates the BIOS behind a BMC using
/// its OEM command set.
#[derive(Parser, Debug)]
struct Args {
    #[clap(
        short,
        long,
        default_value = "info",
        value_parser = level_from_str,
        help = "Log level: {off,critical,error,warn,info,debug,trace}",
    )]
    log_level: Level,

    /// Write logs to a file instead of stderr.
    #[clap(long)]
    logfile: Option<PathBuf>,

    /// Emit parseable JSON on stdout instead of human-readable lines.
    #[clap(long, value_names = ["pretty"], value_parser = json_pretty_from_str)]
    json: Option<Option<JsonPretty>>,

    /// Address of the BMC.
    #[clap(short = 'H', long)]
    host: String,

    #[clap(short = 'U', long)]
    username: String,

    /// Session password; handed to ipmitool through its environment.
    #[clap(short = 'P', long, env = "IPMI_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// ipmitool interface to open the session with.
    #[clap(short = 'I', long, default_value = bmc_oem_comms::ipmitool::DEFAULT_INTERFACE)]
    interface: String,

    #[clap(short = 'C', long, default_value_t = bmc_oem_comms::ipmitool::DEFAULT_CIPHER_SUITE)]
    cipher_suite: u8,

    /// Path to the ipmitool binary.
    #[clap(long, default_value = "ipmitool")]
    ipmitool: PathBuf,

    /// Time between flash progress polls.
    #[clap(long, default_value = "1s")]
    poll_interval: humantime::Duration,

    /// Value of the `flag` field sent with the flash request.
    #[clap(long, default_value = "0", value_parser = parse_int::parse::<u32>)]
    flash_flag: u32,

    /// Give up (cancelling any open transfer) after this long.
    #[clap(long)]
    timeout: Option<humantime::Duration>,

    #[clap(subcommand)]
    command: Command,
}

fn level_from_str(s: &str) -> Result<Level> {
    if let Ok(level) = s.parse() {
        Ok(level)
    } else {
        bail!(format!("Invalid log level: {}", s))
    }
}

#[derive(Debug, Clone, Copy)]
struct JsonPretty;

fn json_pretty_from_str(s: &str) -> Result<JsonPretty> {
    if s == "pretty" {
        Ok(JsonPretty)
    } else {
        bail!("expected \"pretty\"")
    }
}

fn transfer_id_from_str(s: &str) -> Result<TransferId> {
    let id = parse_int::parse::<u16>(s)
        .with_context(|| format!("invalid transfer ID: {s}"))?;
    Ok(TransferId(id))
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Get the board's product ID.
    ProductId,

    /// Get the version string of the installed BIOS.
    BiosVersion,

    /// Get the build date of the installed BIOS.
    BiosDate,

    /// Get the product ID, BIOS version, and BIOS date.
    Info,

    /// Upload and flash a new BIOS image.
    ///
    /// Ctrl-C (or `--timeout` expiring) cancels the transfer on the BMC.
    Update { image: PathBuf },

    /// Get the flash progress of an existing transfer.
    Progress {
        #[clap(value_parser = transfer_id_from_str)]
        transfer_id: TransferId,
    },

    /// Cancel an existing transfer, e.g. one left behind by an interrupted
    /// update.
    Cancel {
        #[clap(value_parser = transfer_id_from_str)]
        transfer_id: TransferId,
    },
}

fn build_logger(
    level: Level,
    path: Option<&Path>,
) -> Result<(Logger, AsyncGuard)> {
    fn make_drain<D: slog_term::Decorator + Send + 'static>(
        level: Level,
        decorator: D,
    ) -> (slog::Fuse<slog_async::Async>, AsyncGuard) {
        let drain = slog_term::FullFormat::new(decorator)
            .build()
            .filter_level(level)
            .fuse();
        let (drain, guard) = slog_async::Async::new(drain).build_with_guard();
        (drain.fuse(), guard)
    }

    let (drain, guard) = if let Some(path) = path {
        let file = File::create(path).with_context(|| {
            format!("failed to create logfile {}", path.display())
        })?;
        make_drain(level, slog_term::PlainDecorator::new(file))
    } else {
        make_drain(level, slog_term::TermDecorator::new().build())
    };

    Ok((Logger::root(drain, o!("component" => "bmc-bios-update")), guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (log, log_guard) =
        build_logger(args.log_level, args.logfile.as_deref())?;

    let transport = IpmitoolTransport::new(
        IpmitoolConfig {
            program: args.ipmitool.clone(),
            interface: args.interface.clone(),
            host: args.host.clone(),
            username: args.username.clone(),
            password: args.password.clone(),
            cipher_suite: args.cipher_suite,
        },
        &log,
    );
    let config = UpdateConfig {
        poll_interval: args.poll_interval.into(),
        flash_flag: args.flash_flag,
    };
    let bmc = Bmc::new(transport, config, log.clone());

    let cancel = CancellationToken::new();
    spawn_interrupt_watchers(
        &cancel,
        args.timeout.map(Into::into),
        log.clone(),
    );

    let result =
        run_command(&bmc, args.command.clone(), args.json.is_some(), &cancel)
            .await;

    let did_fail = result.is_err();
    match (args.json, result) {
        (None, Ok(Output::Lines(lines))) => {
            for line in lines {
                println!("{line}");
            }
        }
        (None, Ok(Output::Json(value))) => println!("{value}"),
        (None, Err(err)) => println!("Error: {err:#}"),
        (Some(pretty), result) => {
            let value = match result {
                Ok(Output::Json(value)) => Ok(value),
                Ok(Output::Lines(lines)) => Ok(json!(lines)),
                Err(err) => Err(format!("{err:#}")),
            };
            if pretty.is_some() {
                serde_json::to_writer_pretty(io::stdout().lock(), &value)
            } else {
                serde_json::to_writer(io::stdout().lock(), &value)
            }
            .context("failed to write to stdout")?;
            println!();
        }
    }

    if did_fail {
        mem::drop(log_guard);
        std::process::exit(1);
    }

    Ok(())
}

/// Cancel `cancel` on ctrl-c, or once `timeout` has elapsed.
fn spawn_interrupt_watchers(
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    log: Logger,
) {
    let token = cancel.clone();
    let ctrl_c_log = log.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(ctrl_c_log, "interrupted; cancelling");
            token.cancel();
        }
    });

    if let Some(timeout) = timeout {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!(
                log, "timed out; cancelling";
                "timeout" => %humantime::format_duration(timeout),
            );
            token.cancel();
        });
    }
}

async fn run_command(
    bmc: &Bmc<IpmitoolTransport>,
    command: Command,
    json: bool,
    cancel: &CancellationToken,
) -> Result<Output> {
    match command {
        Command::ProductId => {
            let product_id =
                bmc.product_id().await.context("failed to get product ID")?;
            if json {
                return Ok(Output::Json(serde_json::to_value(product_id)?));
            }
            Ok(Output::Lines(vec![format!(
                "Remote Product ID: {:#x}",
                product_id.board_model_id
            )]))
        }
        Command::BiosVersion => {
            let version =
                bmc.bios_version().await.context("failed to get BIOS version")?;
            if json {
                return Ok(Output::Json(json!({ "version": version })));
            }
            Ok(Output::Lines(vec![format!("BIOS Version: {version}")]))
        }
        Command::BiosDate => {
            let date =
                bmc.bios_date().await.context("failed to get BIOS date")?;
            if json {
                return Ok(Output::Json(json!({ "date": date })));
            }
            Ok(Output::Lines(vec![format!("BIOS Date: {date}")]))
        }
        Command::Info => {
            let info =
                bmc.bios_info().await.context("failed to get BIOS info")?;
            if json {
                return Ok(Output::Json(serde_json::to_value(info)?));
            }
            Ok(Output::Lines(vec![
                format!("Remote Product ID: {:#x}", info.product_id.board_model_id),
                format!("BIOS Version: {}", info.version),
                format!("BIOS Date: {}", info.date),
            ]))
        }
        Command::Update { image } => {
            let data = fs::read(&image).with_context(|| {
                format!("failed to read {}", image.display())
            })?;
            update(bmc, &data, json, cancel).await.with_context(|| {
                format!("updating BIOS to {} failed", image.display())
            })
        }
        Command::Progress { transfer_id } => {
            let progress = bmc
                .upgrade_progress(transfer_id)
                .await
                .context("failed to get flash progress")?;
            if json {
                return Ok(Output::Json(serde_json::to_value(progress)?));
            }
            Ok(Output::Lines(vec![format!(
                "transfer {transfer_id}: {}% complete",
                progress.completion_percent
            )]))
        }
        Command::Cancel { transfer_id } => {
            bmc.cancel_upgrade(transfer_id)
                .await
                .with_context(|| format!("failed to cancel {transfer_id}"))?;
            if json {
                return Ok(Output::Json(json!({ "cancelled": transfer_id })));
            }
            Ok(Output::Lines(vec![format!("cancelled transfer {transfer_id}")]))
        }
    }
}

async fn update(
    bmc: &Bmc<IpmitoolTransport>,
    image: &[u8],
    json: bool,
    cancel: &CancellationToken,
) -> Result<Output> {
    let info = bmc.bios_info().await.context("failed to get BIOS info")?;
    let mut lines = vec![
        format!("Remote Product ID: {:#x}", info.product_id.board_model_id),
        format!("BIOS Version: {}", info.version),
        format!("BIOS Date: {}", info.date),
        format!("Writing new ROM with size: {}", image.len()),
    ];
    if !json {
        // Print the preamble now rather than with the rest of our output;
        // the update can take many minutes.
        for line in lines.drain(..) {
            println!("{line}");
        }
    }
    info!(bmc.log(), "starting BIOS update"; "image_size" => image.len());

    let bar = if json { ProgressBar::hidden() } else { ProgressBar::new(0) };
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg:>10} [{bar:40.cyan/blue}] {percent:>3}%")
            .context("invalid progress bar template")?
            .progress_chars("=>-"),
    );

    let mut progress = bmc.subscribe_update_progress();
    let update = bmc.bios_update(image, cancel);
    tokio::pin!(update);
    let result = loop {
        tokio::select! {
            result = &mut update => break result,
            changed = progress.changed() => {
                if changed.is_err() {
                    break update.await;
                }
                let state = *progress.borrow_and_update();
                render_progress(&bar, state);
            }
        }
    };
    // The final state may have landed after the last `changed()` we saw.
    render_progress(&bar, *progress.borrow());

    match result {
        Ok(()) => {
            if json {
                return Ok(Output::Json(json!({
                    "info": info,
                    "image_size": image.len(),
                    "result": *progress.borrow(),
                })));
            }
            lines.push("Done".to_string());
            Ok(Output::Lines(lines))
        }
        Err(err) => {
            if err.step() == UpdateStep::Finalize {
                warn!(
                    bmc.log(),
                    "BIOS was flashed but the transfer was not finalized";
                    "transfer_id" => ?err.transfer_id(),
                );
            }
            Err(err.into())
        }
    }
}

fn render_progress(bar: &ProgressBar, state: UpdateProgress) {
    match state {
        UpdateProgress::Idle => (),
        UpdateProgress::Starting { image_size } => {
            bar.set_length(u64::from(image_size));
            bar.set_position(0);
            bar.set_message("starting");
        }
        UpdateProgress::Uploading { bytes_sent, total, .. } => {
            bar.set_length(u64::from(total));
            bar.set_position(u64::from(bytes_sent));
            bar.set_message("uploading");
        }
        UpdateProgress::Flashing { percent, .. } => {
            bar.set_length(100);
            bar.set_position(u64::from(percent.min(100)));
            bar.set_message("flashing");
        }
        UpdateProgress::Finalizing { .. } => {
            bar.set_message("finalizing");
        }
        UpdateProgress::Complete { .. } => {
            if !bar.is_finished() {
                bar.finish_with_message("done");
            }
        }
        UpdateProgress::Cancelled { .. } => {
            if !bar.is_finished() {
                bar.abandon_with_message("cancelled");
            }
        }
        UpdateProgress::Failed => {
            if !bar.is_finished() {
                bar.abandon_with_message("failed");
            }
        }
    }
}

enum Output {
    Json(serde_json::Value),
    Lines(Vec<String>),
}
