use log::info;
use miette::IntoDiagnostic;
use nudge_ingest::WorkerConfig;

#[tokio::main]
async fn main() -> miette::Result<()> {
    env_logger::init();

    let config = WorkerConfig::config().into_diagnostic()?;

    // `--once` runs a single claim-and-process batch and exits; used by tests
    // and dev triggers.
    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    if once {
        let processed = nudge_ingest::run_once(&config).await?;
        info!("run_once processed={processed}");
        return Ok(());
    }

    nudge_ingest::run_forever(config).await?;
    Ok(())
}
