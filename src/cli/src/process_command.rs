use crate::commands::{Cli, Command, RunArgs, SubmitArgs};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use joblens_client::SubmissionClient;
use joblens_daemon::logging::setup_logging;
use joblens_daemon::{Config, ConfigLoader, Daemon};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Parses the command line and runs it. Returns the process exit code.
pub fn process_cli() -> Result<i32> {
    let cli = Cli::parse();
    let config = ConfigLoader::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run(args) => {
            setup_logging(&config.log)?;
            tokio::runtime::Runtime::new()?.block_on(run_daemon(config, args))
        }
        Command::Submit(args) => {
            tokio::runtime::Runtime::new()?.block_on(submit_job(&config, &args))?;
            Ok(0)
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(0)
        }
    }
}

/// Cancels `cancel` on SIGINT or SIGTERM.
async fn forward_shutdown_signals(cancel: CancellationToken) -> Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for SIGINT")?,
        _ = terminate.recv() => {}
    }
    info!("Shutdown requested");
    cancel.cancel();
    Ok(())
}

pub async fn run_daemon(config: Config, args: RunArgs) -> Result<i32> {
    let cancel = CancellationToken::new();
    let signals = tokio::spawn(forward_shutdown_signals(cancel.clone()));

    let result = Daemon::new(config).run(cancel, args.launch_spec()).await;
    signals.abort();

    let exit = result?;
    Ok(exit.exit_code.unwrap_or(0))
}

pub async fn submit_job(config: &Config, args: &SubmitArgs) -> Result<()> {
    let fifo = args
        .fifo
        .as_deref()
        .unwrap_or(&config.collectors_config.job_adder_fifo);
    if let Some(warning) = args.launched_job_warning() {
        eprintln!("{warning}");
    }

    let descriptor = args.to_descriptor(Utc::now());
    let mut client = SubmissionClient::connect_with_limit(fifo, config.max_frame_bytes)
        .with_context(|| {
            format!("Can't connect to job channel {}. Is `joblens run` running?", fifo.display())
        })?;
    client
        .submit(&descriptor)
        .await
        .with_context(|| format!("Failed to submit job {}", descriptor.job_id))?;

    println!("Submitted job {} to {}", descriptor.job_id, fifo.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use joblens_client::SubmissionError;
    use joblens_ingest::ChannelReader;

    #[tokio::test]
    async fn test_submit_uses_configured_frame_limit() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("job_adder.fifo");
        let _reader = ChannelReader::open(&fifo, 64).unwrap();

        let mut config = ConfigLoader::load_default_config().unwrap();
        config.max_frame_bytes = 64;
        let args = SubmitArgs {
            job_id: 2,
            pids: (1..=40).collect(),
            create_time: None,
            invalid_time: true,
            update: false,
            fifo: Some(fifo),
        };

        let err = submit_job(&config, &args).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SubmissionError>(),
            Some(SubmissionError::FrameTooLarge { limit: 64, .. })
        ));
    }
}
