//! `resmon` — monitor resource usage in a Spectrum switch.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use resmon_daemon::{Daemon, Mode};

mod client;

use client::Client;

#[derive(Parser)]
#[command(
    name = "resmon",
    version,
    about = "Monitor resource usage in a Spectrum switch."
)]
struct Cli {
    /// Increase verbosity; may be given more than once.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Decrease verbosity.
    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    quiet: u8,

    /// Directory the control sockets live in.
    #[arg(long, env = "RESMON_SOCKDIR", default_value = "/var/run", global = true)]
    sockdir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: start [mode {hw | mock}]
    Start {
        #[arg(value_name = "ARG", num_args = 0..)]
        args: Vec<String>,
    },
    /// Tell the running daemon to stop.
    Stop,
    /// Check that the daemon is alive.
    Ping,
    /// Print the resource usage table.
    Stats,
    /// Inject an EMAD payload: emad [hex | raw] string PAYLOAD
    Emad {
        #[arg(value_name = "ARG", num_args = 0..)]
        args: Vec<String>,
    },
}

fn parse_start_args(args: &[String]) -> Result<Mode> {
    let mut mode = Mode::Hw;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "mode" => {
                let value = iter
                    .next()
                    .context("command line is not complete: a mode should follow \"mode\"")?;
                mode = match value.as_str() {
                    "hw" => Mode::Hw,
                    "mock" => Mode::Mock,
                    other => bail!("unrecognized mode: {other}"),
                };
            }
            other => bail!("what is \"{other}\"?"),
        }
    }
    Ok(mode)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PayloadEncoding {
    Hex,
    Raw,
}

/// Returns the payload normalized to its hex encoding, which is what goes
/// on the wire.
fn parse_emad_args(args: &[String]) -> Result<String> {
    let mut encoding = PayloadEncoding::Hex;
    let mut payload = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "hex" => encoding = PayloadEncoding::Hex,
            "raw" => encoding = PayloadEncoding::Raw,
            "string" => {
                payload = Some(
                    iter.next()
                        .context(
                            "command line is not complete: a payload should follow \"string\"",
                        )?
                        .clone(),
                );
            }
            other => bail!("what is \"{other}\"?"),
        }
    }
    let payload = payload.context("EMAD payload not given")?;
    Ok(match encoding {
        PayloadEncoding::Hex => payload,
        PayloadEncoding::Raw => hex::encode(payload.as_bytes()),
    })
}

fn init_tracing(verbosity: i32) {
    let default = match verbosity {
        i32::MIN..=-1 => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_env("RESMON_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(i32::from(cli.verbose) - i32::from(cli.quiet));

    match cli.command {
        Command::Start { args } => {
            let mode = parse_start_args(&args)?;
            let daemon = Daemon::new(&cli.sockdir, mode)
                .context("failed to bring up the daemon")?;
            daemon.run().await?;
            Ok(())
        }
        Command::Stop => Client::connect(&cli.sockdir)?.stop().await,
        Command::Ping => Client::connect(&cli.sockdir)?.ping().await,
        Command::Stats => Client::connect(&cli.sockdir)?.stats().await,
        Command::Emad { args } => {
            let payload = parse_emad_args(&args)?;
            Client::connect(&cli.sockdir)?.emad(&payload).await
        }
    }
}
