use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use empower_chat::config::{ServiceConfig, WebConfig};
use empower_chat::constants;
use empower_chat::credentials::{CredentialResolver, CredentialSource, EnvSource, SecretStore};
use empower_chat::router::{HttpServiceProvider, ServiceProvider};
use empower_chat::{chat, web_server};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct ServiceArgs {
    /// Chat model requested from the completion API.
    #[arg(long, global = true, env = "GROQ_MODEL", default_value_t = constants::CHAT_MODEL.clone())]
    model: String,
    /// Seconds to wait for search + completion before falling back.
    #[arg(long, global = true, env = "EMPOWER_REQUEST_TIMEOUT_SECS", default_value_t = constants::DEFAULT_REQUEST_TIMEOUT_SECS)]
    request_timeout_secs: u64,
    /// TOML file holding groq_api_key / tavily_api_key.
    #[arg(long, global = true, env = "EMPOWER_SECRETS_FILE", default_value = constants::DEFAULT_SECRETS_FILE)]
    secrets_file: PathBuf,
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the chat web server.
    Serve {
        #[arg(long, env = "EMPOWER_BIND", default_value = "127.0.0.1", help = "Address to bind the web server to.")]
        bind: String,
        #[arg(long, env = "EMPOWER_PORT", default_value_t = constants::DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
        #[arg(long, default_value = "templates", help = "Directory with the page templates.")]
        templates_dir: PathBuf,
        #[arg(long, default_value = "static", help = "Directory with static assets.")]
        static_dir: PathBuf,
        #[arg(long, env = "EMPOWER_SESSION_TTL_SECS", default_value_t = constants::DEFAULT_SESSION_TTL_SECS, help = "Drop sessions idle for this many seconds.")]
        session_ttl_secs: u64,
    },
    /// Chat from the terminal.
    Chat,
}

// The main entry point of the application, using tokio's async runtime
#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for environment variables like API keys)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG environment variable (e.g., RUST_LOG=info,empower_chat=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    info!("empower-chat starting with command: {:?}", cli.command);

    let service_config = ServiceConfig {
        model: cli.service.model.clone(),
        request_timeout: Duration::from_secs(cli.service.request_timeout_secs),
        ..ServiceConfig::default()
    };
    let secrets = SecretStore::load(&cli.service.secrets_file).context("Failed to load secrets file")?;
    let provider = Arc::new(
        HttpServiceProvider::new(service_config).context("Failed to initialize HTTP clients")?,
    );

    match cli.command {
        Commands::Serve {
            bind,
            port,
            templates_dir,
            static_dir,
            session_ttl_secs,
        } => {
            let web_config = WebConfig {
                bind,
                port,
                templates_dir,
                static_dir,
                session_ttl: Duration::from_secs(session_ttl_secs),
            };
            info!("Starting web server on {}:{}...", web_config.bind, web_config.port);

            let sources: Vec<Arc<dyn CredentialSource>> = vec![Arc::new(EnvSource), Arc::new(secrets)];
            let state = web_server::AppState::new(web_config.templates_dir.clone(), sources, provider);

            tokio::select! {
                res = web_server::start_web_server(web_config, state) => {
                    if let Err(e) = res {
                        error!("Web server failed: {:?}", e);
                        return Err(e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, shutting down.");
                }
            }
        }
        Commands::Chat => {
            let credentials = CredentialResolver::new(vec![&EnvSource as &dyn CredentialSource, &secrets]).resolve_all();
            info!(?credentials, "Resolved credentials");
            let services = provider.services(&credentials);
            chat::run_chat(services, tokio::io::BufReader::new(tokio::io::stdin()), tokio::io::stdout())
                .await
                .context("Chat session failed")?;
        }
    }

    Ok(())
}
