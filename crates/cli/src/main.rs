// docsync CLI entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use docsync_client::ClientConfig;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;
mod session;

use output::OutputFormat;

#[derive(Parser)]
#[command(name = "docsync", about = "Real-time JSON document sync over a relay")]
struct Cli {
    /// Relay WebSocket URL; overrides the config file.
    #[arg(long, global = true)]
    relay_url: Option<String>,

    /// Config file to use instead of ~/.docsync/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Force JSON output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: commands::Command,
}

impl Cli {
    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load_from(path)
                .with_context(|| format!("failed to load config `{}`", path.display()))?,
            None => ClientConfig::load(),
        };
        if let Some(url) = &self.relay_url {
            config.relay_url = url.clone();
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::detect(cli.json);

    let result = cli.client_config().and_then(|config| {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?
            .block_on(commands::run(cli.command, config, format))
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            output::print_anyhow_error(format, &error);
            ExitCode::from(output::exit_code(&error))
        }
    }
}
