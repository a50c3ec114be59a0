use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod listen;
pub mod request;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to a peer and print every decoded message.
    Listen(ListenArgs),
    /// Accept peers and answer hardware-info and counter requests.
    Serve(ServeArgs),
    /// Perform one ACK request/response exchange.
    Request(RequestArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format),
        Command::Serve(args) => serve::run(args, format),
        Command::Request(args) => request::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to connect to (host:port).
    pub addr: String,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (host:port).
    pub addr: String,
    /// Hardware name reported to requesters.
    #[arg(long, env = "ACKFRAME_HARDWARE_NAME", default_value = "ackframe-host")]
    pub name: String,
    /// Exit after the first peer disconnects.
    #[arg(long)]
    pub once: bool,
    /// Keep sent responses at most this long (e.g. 60s, 500ms).
    #[arg(long, default_value = "60s")]
    pub cache_expiry: String,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// Ask for the responder's hardware name.
    HardwareName,
    /// Ask which serial port the responder is attached to.
    SerialPort,
    /// Increment the responder's counter.
    Increment,
    /// Decrement the responder's counter.
    Decrement,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Address to connect to (host:port).
    pub addr: String,
    /// What to ask for.
    #[arg(value_enum)]
    pub kind: RequestKind,
    /// Give up after this long (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Resend an unanswered request this often.
    #[arg(long, default_value = "1s")]
    pub resend: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Flag cleared by Ctrl-C.
pub(crate) fn install_ctrlc_handler() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}
