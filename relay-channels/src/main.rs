//! assistant-relay - Main entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_assistant::{AssistantClient, NewAssistant, ToolSpec};
use relay_channels::{open_store, DiscordChannel, RelayService, ResponseChunker, SessionRouter};
use relay_common::config::Config;
use relay_common::logging::init_logging;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Longest pause between gateway reconnect attempts.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Relay a Discord channel to a hosted assistant.
#[derive(Parser, Debug)]
#[command(name = "assistant-relay")]
#[command(version)]
#[command(about = "Relay chat messages to a hosted assistant, one thread per channel.", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.assistant-relay/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to Discord and relay messages (default)
    Serve,

    /// Inspect or create the assistant
    Assistant {
        #[command(subcommand)]
        command: AssistantCommands,
    },

    /// Inspect stored channel sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Subcommand, Debug)]
enum AssistantCommands {
    /// Print the configured assistant's settings
    Show {
        /// Assistant ID (defaults to the configured one)
        #[arg(long)]
        id: Option<String>,
    },

    /// Create a new assistant, optionally with searchable documents
    Create {
        #[arg(long)]
        name: String,

        #[arg(long)]
        instructions: String,

        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,

        /// Document to upload and attach (repeatable)
        #[arg(long = "file")]
        files: Vec<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum SessionCommands {
    /// Print the thread stored for a channel
    Lookup { channel_id: String },

    /// Print every stored channel → thread mapping
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; the environment may already be set
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => Config::load_with_env()?,
    };

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Assistant { command } => assistant_command(&config, command).await,
        Commands::Sessions { command } => sessions_command(&config, command).await,
    }
}

async fn sessions_command(config: &Config, command: SessionCommands) -> Result<()> {
    let store = open_store(config)?;

    match command {
        SessionCommands::Lookup { channel_id } => match store.resolve(&channel_id).await? {
            Some(thread_id) => println!("{thread_id}"),
            None => println!("No thread stored for channel {channel_id}"),
        },
        SessionCommands::List => {
            let sessions = store.list().await?;
            for session in &sessions {
                println!("{}\t{}", session.channel_id, session.thread_id);
            }
            info!(count = sessions.len(), backend = store.name(), "Sessions listed");
        }
    }

    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    config
        .validate_for_serve()
        .context("Invalid configuration")?;

    info!("assistant-relay v{}", env!("CARGO_PKG_VERSION"));

    let assistant_id = config
        .assistant
        .assistant_id
        .clone()
        .context("No assistant ID configured")?;
    let chunker = ResponseChunker::from_config(&config.chunking)
        .context("chunking.max_len must be at least 1")?;

    let store = open_store(&config)?;
    let assistant = Arc::new(AssistantClient::from_config(&config.assistant)?);

    match assistant.get_assistant_metadata(&assistant_id).await {
        Ok(metadata) => info!(
            assistant_id = %metadata.id,
            name = metadata.name.as_deref().unwrap_or(""),
            model = %metadata.model,
            tools = metadata.tools.len(),
            "Assistant loaded"
        ),
        Err(e) if e.is_auth() => {
            return Err(e).context("Assistant provider rejected the API key");
        }
        Err(e) => warn!(error = %e, "Could not fetch assistant metadata, continuing"),
    }

    let router = Arc::new(SessionRouter::new(store, assistant, assistant_id));
    let discord = Arc::new(DiscordChannel::from_config(&config.discord)?);
    discord.verify().await?;

    let service = Arc::new(RelayService::new(router, discord.clone(), chunker));

    tokio::select! {
        () = listen_forever(&discord, &service) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown requested");
        }
    }

    match Arc::try_unwrap(service) {
        Ok(service) => service.shutdown().await,
        Err(_) => warn!("Relay still referenced at shutdown, skipping drain"),
    }

    Ok(())
}

/// Keep a gateway connection open, reconnecting with capped backoff.
async fn listen_forever(discord: &DiscordChannel, service: &Arc<RelayService>) {
    let mut delay = Duration::from_secs(1);

    loop {
        let started = Instant::now();
        let dispatcher = service.clone();

        match discord.listen(move |event| dispatcher.dispatch(event)).await {
            Ok(()) => info!("Discord gateway connection closed"),
            Err(e) => warn!(error = %e, "Discord gateway connection lost"),
        }

        // A connection that stayed up for a while resets the backoff
        if started.elapsed() > MAX_RECONNECT_DELAY {
            delay = Duration::from_secs(1);
        }

        info!(delay_secs = delay.as_secs(), "Reconnecting to Discord gateway");
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(MAX_RECONNECT_DELAY);
    }
}

async fn assistant_command(config: &Config, command: AssistantCommands) -> Result<()> {
    let client = AssistantClient::from_config(&config.assistant)?;

    match command {
        AssistantCommands::Show { id } => {
            let id = id
                .or_else(|| config.assistant.assistant_id.clone())
                .context("No assistant ID given or configured")?;
            let metadata = client.get_assistant_metadata(&id).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        AssistantCommands::Create {
            name,
            instructions,
            model,
            files,
        } => {
            let mut file_ids = Vec::with_capacity(files.len());
            for path in &files {
                let uploaded = client
                    .upload_file(path)
                    .await
                    .with_context(|| format!("Failed to upload {}", path.display()))?;
                info!(file_id = %uploaded.id, path = %path.display(), "File uploaded");
                file_ids.push(uploaded.id);
            }

            let tools = if file_ids.is_empty() {
                Vec::new()
            } else {
                vec![ToolSpec::file_search()]
            };

            let metadata = client
                .create_assistant(&NewAssistant {
                    name,
                    instructions,
                    model,
                    tools,
                    file_ids,
                })
                .await?;

            info!(assistant_id = %metadata.id, "Assistant created");
            println!("{}", metadata.id);
        }
    }

    Ok(())
}
