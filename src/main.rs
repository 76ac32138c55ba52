//! sshclient - Entry point
//!
//! Parses CLI arguments, connects to the remote host and either runs a
//! script, streaming its output and exiting with its status, or opens an
//! interactive shell on the local terminal.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use sshclient::config::{Args, Config};
use sshclient::error::{Result, SshClientError};
use sshclient::ssh::{SshClient, TcpTransport};

/// Exit code for local failures, matching OpenSSH's `ssh`
const LOCAL_FAILURE: u8 = 255;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => exit_code(&e),
    }
}

/// Initialize tracing/logging to stderr (stdout carries the remote output)
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: Config) -> Result<()> {
    // Validate the script before any I/O happens
    let script = config.script().await?;
    let ssh_config = config.ssh_config().await?;

    let transport = TcpTransport::new(Duration::from_millis(config.timeout_ms));
    let mut client =
        SshClient::new(config.target(), ssh_config).with_transport(Arc::new(transport));

    info!(
        "sshclient v{} connecting to {}@{}",
        env!("CARGO_PKG_VERSION"),
        config.user,
        client.target()
    );

    let cancel = CancellationToken::new();
    let signals = spawn_signal_handler(cancel.clone());

    let result = async {
        client.connect_with_cancel(cancel.clone()).await?;
        match script {
            Some(script) => exec(&mut client, &script).await,
            None => client.shell().await,
        }
    }
    .await;

    signals.abort();
    report(result, &cancel)
}

/// Run the script, streaming remote output to the local stdout and stderr
async fn exec(client: &mut SshClient, script: &str) -> Result<()> {
    let stdout = client.stdout_pipe().await?;
    let stderr = client.stderr_pipe().await?;

    let stdout_copy = spawn_copy(stdout, tokio::io::stdout(), "stdout");
    let stderr_copy = spawn_copy(stderr, tokio::io::stderr(), "stderr");

    let result = client.exec_script(script).await;

    for copy in [stdout_copy, stderr_copy] {
        if let Err(e) = copy.await {
            warn!("Output forwarding task failed: {}", e);
        }
    }

    result
}

fn spawn_copy<R, W>(mut reader: R, mut writer: W, name: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = tokio::io::copy(&mut reader, &mut writer).await {
            debug!("Stopped forwarding remote {}: {}", name, e);
        }
    })
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), disconnecting...");
            }
            _ = terminate() => {
                info!("Received SIGTERM, disconnecting...");
            }
        }
        cancel.cancel();
    })
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// Log the outcome; a remote exit status is passed through silently
fn report(result: Result<()>, cancel: &CancellationToken) -> Result<()> {
    match &result {
        Ok(()) => debug!("Done"),
        Err(e) => match e.primary() {
            SshClientError::RemoteExit { status } => {
                debug!("Remote exited with status {}", status)
            }
            _ if cancel.is_cancelled() => eprintln!("sshclient: interrupted ({})", e),
            _ => {
                error!("{}", e);
                eprintln!("sshclient: {}", e);
            }
        },
    }
    result
}

fn exit_code(err: &SshClientError) -> ExitCode {
    match err.primary() {
        SshClientError::RemoteExit { status } => {
            ExitCode::from(u8::try_from(*status).unwrap_or(LOCAL_FAILURE))
        }
        _ => ExitCode::from(LOCAL_FAILURE),
    }
}
