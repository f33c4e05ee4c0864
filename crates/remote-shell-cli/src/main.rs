//! Run one command on a remote host.
//!
//! Connection settings come from the environment (`SSH_HOST`, `SSH_PORT`,
//! `SSH_USERNAME`, `SSH_PRIVATE_KEY_PATH` or `SSH_PASSWORD`).
//!
//! Run with: cargo run -p remote-shell-cli -- ls -la /var/log

use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;
use remote_shell_core::ConnectionConfig;
use remote_shell_executor::CommandBuilder;
use remote_shell_session::SessionManager;
use remote_shell_transport::SshConnector;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Run a command on the configured SSH host.
#[derive(Debug, Parser)]
#[command(name = "remote-shell", version)]
struct Cli {
    /// Program and arguments; each word is quoted for the remote shell
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, conflicts_with = "raw")]
    args: Vec<String>,

    /// Send this command line to the remote shell as-is
    #[arg(long, value_name = "LINE")]
    raw: Option<String>,

    /// Remote working directory
    #[arg(long, value_name = "DIR", conflicts_with = "raw")]
    cwd: Option<String>,

    /// Environment assignment for the remote command (repeatable)
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair, conflicts_with = "raw")]
    env: Vec<(String, String)>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn command_line(&self) -> anyhow::Result<String> {
        if let Some(ref raw) = self.raw {
            return Ok(raw.clone());
        }
        if self.args.is_empty() {
            bail!("no command given");
        }

        let mut builder = CommandBuilder::from_words(self.args.iter().cloned());
        if let Some(ref dir) = self.cwd {
            builder = builder.current_dir(dir.clone());
        }
        for (key, value) in &self.env {
            builder = builder.env(key.clone(), value.clone());
        }
        Ok(builder.build()?)
    }
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))
}

/// Map a remote exit code onto a local process exit status.
fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let line = cli.command_line()?;

    let config = ConnectionConfig::from_env().context("invalid SSH configuration")?;
    tracing::info!(host = %config.host(), port = config.port(), "Running remote command");

    let manager = SessionManager::new(config, SshConnector::new());
    let outcome = manager.execute_command(&line).await;
    manager.disconnect().await;
    let result = outcome.with_context(|| format!("failed to run `{line}`"))?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
    }

    Ok(ExitCode::from(exit_status(result.exit_code)))
}
