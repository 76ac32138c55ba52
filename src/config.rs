//! Configuration and CLI argument parsing for the sshclient binary

use clap::Parser;
use std::path::PathBuf;

use crate::error::{Result, SshClientError};
use crate::ssh::{add_env, HostKeyPolicy, SshConfig};

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Transport-level connect timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// sshclient CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "sshclient")]
#[command(version)]
#[command(about = "Run a script or an interactive shell on a remote host over SSH")]
pub struct Args {
    /// SSH host to connect to
    #[arg(long, env = "SSHCLIENT_HOST")]
    pub host: String,

    /// SSH port
    #[arg(long, default_value_t = DEFAULT_PORT, env = "SSHCLIENT_PORT")]
    pub port: u16,

    /// SSH username
    #[arg(long, env = "SSHCLIENT_USER")]
    pub user: String,

    /// SSH password (alternative to key)
    #[arg(long, env = "SSHCLIENT_PASSWORD")]
    pub password: Option<String>,

    /// Path to SSH private key file (alternative to password)
    #[arg(long, env = "SSHCLIENT_KEY")]
    pub key: Option<PathBuf>,

    /// Passphrase of an encrypted private key
    #[arg(long, env = "SSHCLIENT_PASSPHRASE")]
    pub passphrase: Option<String>,

    /// Expected host key fingerprint (SHA256:...). Any host key is accepted when omitted.
    #[arg(long = "host-key", env = "SSHCLIENT_HOST_KEY")]
    pub host_key: Option<String>,

    /// Connect timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_MS, env = "SSHCLIENT_TIMEOUT")]
    pub timeout: u64,

    /// Environment variable for the remote script, as NAME=VALUE (repeatable)
    #[arg(long = "env", value_name = "NAME=VALUE")]
    pub env: Vec<String>,

    /// Run the script in FILE instead of an interactive shell
    #[arg(long, value_name = "FILE", conflicts_with = "command")]
    pub script: Option<PathBuf>,

    /// Run TEXT as a script instead of an interactive shell
    #[arg(long, value_name = "TEXT")]
    pub command: Option<String>,

    /// Enable debug logging on stderr
    #[arg(short, long, default_value = "false")]
    pub verbose: bool,
}

/// Where the script to execute comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    File(PathBuf),
    Inline(String),
}

/// What the binary does once connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Feed a script to the remote shell
    Script {
        source: ScriptSource,
        env: Vec<String>,
    },

    /// Interactive shell on the local terminal
    Shell,
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SSH host
    pub host: String,

    /// SSH port
    pub port: u16,

    /// SSH username
    pub user: String,

    /// SSH password
    pub password: Option<String>,

    /// Path to SSH private key
    pub key: Option<PathBuf>,

    /// Private key passphrase
    pub passphrase: Option<String>,

    /// Host key check
    pub host_key_policy: HostKeyPolicy,

    /// Connect timeout in milliseconds
    pub timeout_ms: u64,

    /// Execution mode
    pub mode: Mode,

    /// Debug logging
    pub verbose: bool,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let mode = match (args.script, args.command) {
            (Some(path), _) => Mode::Script {
                source: ScriptSource::File(path),
                env: args.env,
            },
            (None, Some(text)) => Mode::Script {
                source: ScriptSource::Inline(text),
                env: args.env,
            },
            (None, None) => Mode::Shell,
        };

        let host_key_policy = match args.host_key {
            Some(fingerprint) => HostKeyPolicy::fingerprint(fingerprint),
            None => HostKeyPolicy::AcceptAny,
        };

        Ok(Config {
            host: args.host,
            port: args.port,
            user: args.user,
            password: sanitize_secret(args.password),
            key: args.key,
            passphrase: sanitize_secret(args.passphrase),
            host_key_policy,
            timeout_ms: args.timeout,
            mode,
            verbose: args.verbose,
        })
    }

    /// The `host:port` address to dial
    pub fn target(&self) -> String {
        format_target(&self.host, self.port)
    }

    /// Build the client configuration, reading the key file if one is set
    pub async fn ssh_config(&self) -> Result<SshConfig> {
        let mut ssh_config =
            SshConfig::new(&self.user).with_host_key_policy(self.host_key_policy.clone());

        if let Some(ref password) = self.password {
            ssh_config = ssh_config.with_password(password);
        }

        if let Some(ref key_path) = self.key {
            let key_content = tokio::fs::read_to_string(key_path).await.map_err(|e| {
                SshClientError::config(format!(
                    "Failed to read SSH key {}: {}",
                    key_path.display(),
                    e
                ))
            })?;
            ssh_config = ssh_config.with_private_key(key_content);
        }

        if let Some(ref passphrase) = self.passphrase {
            ssh_config = ssh_config.with_key_passphrase(passphrase);
        }

        Ok(ssh_config)
    }

    /// The script to execute with its environment prologue, or `None` in shell mode
    pub async fn script(&self) -> Result<Option<String>> {
        let Mode::Script { ref source, ref env } = self.mode else {
            return Ok(None);
        };

        let body = match source {
            ScriptSource::Inline(text) => text.clone(),
            ScriptSource::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                SshClientError::config(format!(
                    "Failed to read script {}: {}",
                    path.display(),
                    e
                ))
            })?,
        };

        add_env(&body, env).map(Some)
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.host.is_empty() {
        errors.push("Missing required --host".to_string());
    }

    if args.user.is_empty() {
        errors.push("Missing required --user".to_string());
    }

    // Must have either password or key
    if sanitize_secret(args.password.clone()).is_none() && args.key.is_none() {
        errors.push("Must provide either --password or --key".to_string());
    }

    // If key is provided, check if file exists
    if let Some(ref key_path) = args.key {
        if !key_path.exists() {
            errors.push(format!("SSH key file not found: {}", key_path.display()));
        }
    }

    if args.passphrase.is_some() && args.key.is_none() {
        errors.push("--passphrase requires --key".to_string());
    }

    if let Some(ref script_path) = args.script {
        if !script_path.exists() {
            errors.push(format!("Script file not found: {}", script_path.display()));
        }
    }

    if !args.env.is_empty() && args.script.is_none() && args.command.is_none() {
        errors.push("--env requires --script or --command".to_string());
    }

    if args.timeout == 0 {
        errors.push("--timeout must be greater than 0".to_string());
    }

    if !errors.is_empty() {
        return Err(SshClientError::Config(format!(
            "Configuration error:\n{}",
            errors.join("\n")
        )));
    }

    Ok(())
}

/// Join host and port, bracketing IPv6 literals
pub fn format_target(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Sanitize a secret: return None if empty
fn sanitize_secret(secret: Option<String>) -> Option<String> {
    secret.filter(|s| !s.is_empty())
}
