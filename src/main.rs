use anyhow::Result;
use kestrel::{
    cli::{self, Mode},
    term_print::TermPrintable,
};

#[tokio::main]
async fn main() {
    // Parse cli and handle clap errors
    let options = cli::parse_from_args();

    // Override the default log_level if there is a greater verbosity flag
    kestrel::init_logger(Some(options.override_log_level()));

    match run(&options.mode).await {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            cli::report_error(&e);
            std::process::exit(1);
        }
    }
}

async fn run(mode: &Mode) -> Result<()> {
    let registry = kestrel::registry()?;
    match mode {
        Mode::Run(options) => kestrel::agent::run(options, registry).await,
        Mode::Events => registry.term_print().map(|_| ()),
        Mode::Probes => serde_json::to_string_pretty(&registry.probes())?
            .term_print()
            .map(|_| ()),
    }
}
