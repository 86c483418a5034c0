use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use facade_relay::host::config::{load_env_file, ENV_FILE};
use facade_relay::host::{repl, HostConfig, RoutingHost};
use facade_relay::mcp_server::{demo, email, github};

/// Facade Relay - route free-form requests to MCP tool servers
#[derive(Parser, Debug)]
#[command(name = "facade-relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the routing host interactive loop
    Host {
        /// YAML config file (default: $FACADE_RELAY_CONFIG or ./facade-relay.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Tool calls allowed per request
        #[arg(long)]
        max_steps: Option<u32>,

        /// Per tool call timeout in milliseconds
        #[arg(long)]
        call_timeout_ms: Option<u64>,
    },
    /// Run one tool server over stdin/stdout
    Serve {
        #[arg(value_enum)]
        facade: Facade,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Facade {
    Demo,
    Email,
    Github,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Environment mutation happens before any runtime thread exists.
    load_env_file(Path::new(ENV_FILE));

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Host {
            config,
            max_steps,
            call_timeout_ms,
        } => {
            facade_relay::init_tracing("host");
            run_host(config.as_deref(), max_steps, call_timeout_ms).await
        }
        Commands::Serve { facade } => serve(facade).await,
    }
}

async fn run_host(
    config_path: Option<&Path>,
    max_steps: Option<u32>,
    call_timeout_ms: Option<u64>,
) -> Result<()> {
    let (mut config, loaded_from) = HostConfig::load(config_path)?;
    if let Some(steps) = max_steps {
        config.max_steps = steps;
    }
    if let Some(timeout) = call_timeout_ms {
        config.call_timeout_ms = timeout;
    }
    config.validate()?;

    tracing::info!(
        config = ?loaded_from.as_ref().map(|p| p.display().to_string()),
        max_steps = config.max_steps,
        call_timeout_ms = config.call_timeout_ms,
        conversation = ?config.conversation,
        "launching routing host"
    );

    let mut host = RoutingHost::start(&config)
        .await
        .context("failed to start routing host")?;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let result = repl::run(&mut host, stdin, tokio::io::stdout()).await;

    host.shutdown().await;
    let handled = result.context("user input loop failed")?;
    tracing::info!(requests = handled, "goodbye");
    Ok(())
}

async fn serve(facade: Facade) -> Result<()> {
    match facade {
        Facade::Demo => {
            facade_relay::init_tracing(demo::SERVER_NAME);
            demo::server()?.serve_stdio().await?;
        }
        Facade::Email => {
            facade_relay::init_tracing(email::SERVER_NAME);
            let server = email::server_from_env().context("email server cannot start")?;
            server.serve_stdio().await?;
        }
        Facade::Github => {
            facade_relay::init_tracing(github::SERVER_NAME);
            let status = github::run_from_env()
                .await
                .context("github server cannot start")?;
            if !status.success() {
                std::process::exit(status.code().unwrap_or(1));
            }
        }
    }
    Ok(())
}
