use anyhow::Result;
use clap::Parser;
use gitweave::cli::CliArgs;
use gitweave::services::AppService;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode> {
    let args = CliArgs::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let service = AppService::from_cli(&args)?;
    service.open(None)?;

    let report = match service.execute(args.command) {
        Ok(report) => report,
        Err(err) => {
            error!("{:#}", err);
            service.shutdown();
            return Err(err);
        }
    };
    service.shutdown();

    if !report.message.is_empty() {
        println!("{}", report.message);
    }
    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
