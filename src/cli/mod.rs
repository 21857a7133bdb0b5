use std::{env, ffi::OsString, path::PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand};

pub const NAME: &str = "kestrel";

#[derive(Parser, Debug, Clone)]
#[command(name = NAME)]
#[command(about = "Kernel events decoding and rootkit detection agent")]
#[command(version)]
#[command(disable_help_subcommand = true)]
pub struct KestrelOpts {
    #[command(subcommand)]
    pub mode: Mode,

    /// Pass many times for a more verbose output. Passing `-v` adds debug logs, `-vv` enables trace logging
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbosity: u8,
}

impl KestrelOpts {
    pub fn override_log_level(&self) -> log::LevelFilter {
        log_level_from_verbosity_flag_count(self.verbosity)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Mode {
    /// Start the decoding pipeline and the periodic scans
    Run(RunOpts),
    /// List the supported kernel events
    Events,
    /// Print the probes the loader has to attach, as JSON
    Probes,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunOpts {
    /// Configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Decode the length prefixed records stored in FILE, then exit
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,
}

pub fn parse_from_args() -> KestrelOpts {
    KestrelOpts::parse()
}

pub fn try_parse_from<I, T>(args: I) -> Result<KestrelOpts, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    KestrelOpts::try_parse_from(args)
}

fn log_level_from_verbosity_flag_count(num: u8) -> log::LevelFilter {
    match num {
        u8::MIN..=0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        2..=u8::MAX => log::LevelFilter::Trace,
    }
}

fn show_backtrace() -> bool {
    if log::max_level() >= log::LevelFilter::Debug {
        return true;
    }

    if let Ok(true) = env::var("RUST_BACKTRACE").map(|s| s == "1") {
        return true;
    }

    false
}

pub fn report_error(e: &anyhow::Error) {
    // One line with every cause, the full chain with debug logs enabled.
    if show_backtrace() {
        log::error!("{:?}", e);
    } else {
        log::error!("{:#}", e);
    }
}
