#![forbid(unsafe_code)]

//! `magma-session`: interactive front end for a Magma engine.
//!
//! Reads one command per line from stdin, runs it, and prints the engine's
//! output. Interactive `read` prompts are answered from stdin, Ctrl-C
//! interrupts the running statement, and end of input quits the engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use magma_proc::proc::{Output, Process, Tagged};
use magma_proc::{AppError, ProcessConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "magma-session", about = "Interactive Magma session", version, long_about = None)]
struct Cli {
    /// Path to a TOML process configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the engine executable.
    #[arg(long)]
    command: Option<String>,

    /// Extra argument for the engine (repeatable).
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Seconds to wait for the engine to acknowledge `quit;` before killing it.
    #[arg(long, default_value_t = 5)]
    quit_timeout: u64,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

type InputLines = Lines<BufReader<Stdin>>;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &cli.config {
        Some(path) => ProcessConfig::load_from_path(path)?,
        None => ProcessConfig::default(),
    };
    if let Some(command) = cli.command {
        config.command = Some(command);
    }
    config.args.extend(cli.args);
    config.validate()?;

    // ── Start the engine ────────────────────────────────
    let mut process = Process::new(config);
    tokio::spawn(log_status(process.status_tags()?));
    let startup = process.start().await?;
    info!(pid = process.pid()?, "session ready");

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut printer = Printer::new();
    printer.print(startup, &mut input).await?;

    let process = Arc::new(process);
    let interrupts = tokio::spawn(forward_interrupts(Arc::clone(&process)));

    // ── Command loop ────────────────────────────────────
    while let Some(command) = input.next_line().await? {
        if command.trim().is_empty() {
            continue;
        }
        let output = match process.execute(&command).await {
            Ok(output) => output,
            Err(err) => {
                warn!(%err, "command not executed, ending session");
                break;
            }
        };
        printer.print(output, &mut input).await?;
    }
    interrupts.abort();

    // ── Shut down ───────────────────────────────────────
    match process.quit().await {
        Ok(acknowledged) => {
            if tokio::time::timeout(Duration::from_secs(cli.quit_timeout), acknowledged)
                .await
                .is_err()
            {
                warn!("quit not acknowledged in time, killing engine");
                process.kill()?;
            }
        }
        // The engine may already have quit on a command from the input.
        Err(err) => debug!(%err, "quit skipped"),
    }
    process.wait().await
}

/// Writes engine output lines to stdout.
struct Printer {
    stdout: Stdout,
    line_open: bool,
}

impl Printer {
    fn new() -> Self {
        Self {
            stdout: tokio::io::stdout(),
            line_open: false,
        }
    }

    /// Print every event of `output`, answering read prompts from `input`.
    async fn print(&mut self, output: Output, input: &mut InputLines) -> Result<()> {
        let mut events = output.combine();
        while let Some(event) = events.recv().await {
            match event {
                Tagged::Line(line) => {
                    if !line.continuation {
                        self.end_line().await?;
                        let indent = " ".repeat(line.indent);
                        self.stdout.write_all(indent.as_bytes()).await?;
                    }
                    self.stdout.write_all(line.data.as_bytes()).await?;
                    self.line_open = true;
                }
                Tagged::ReadRequest(request) => {
                    self.end_line().await?;
                    self.stdout.write_all(request.prompt().as_bytes()).await?;
                    self.stdout.flush().await?;
                    match input.next_line().await? {
                        Some(reply) => request.respond(reply)?,
                        None => request.reject("end of input")?,
                    }
                }
                Tagged::Position(_) | Tagged::Status(_) | Tagged::Ready(_) => {}
            }
        }
        self.end_line().await?;
        self.stdout.flush().await?;
        Ok(())
    }

    async fn end_line(&mut self) -> Result<()> {
        if self.line_open {
            self.stdout.write_all(b"\n").await?;
            self.line_open = false;
        }
        Ok(())
    }
}

async fn log_status(mut status: mpsc::Receiver<Tagged>) {
    while let Some(event) = status.recv().await {
        debug!(tag = %event.tag(), "engine status");
    }
}

/// Turn each Ctrl-C into an interrupt of the running statement.
async fn forward_interrupts(process: Arc<Process>) {
    loop {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "ctrl-c handler failed, interrupts disabled");
            return;
        }
        match process.interrupt_execution() {
            Ok(acknowledged) => {
                tokio::spawn(async move {
                    if acknowledged.await.is_ok() {
                        info!("interrupt acknowledged");
                    }
                });
            }
            Err(err) => warn!(%err, "interrupt failed"),
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries engine output.
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
