//! reverie - drive a memory walkthrough from a terminal.
//!
//! Chunks are written to stdout as Server-Sent Event frames, logs go to
//! stderr.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use reverie_core::{categorize_scenario, FallbackResponse, Phase, SessionId, Subject};
use reverie_runtime::providers::ProviderRegistry;
use reverie_runtime::{AiProvider, StreamingWalkthroughService, WalkthroughConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// reverie - guided memory walkthroughs with graceful AI degradation
#[derive(Parser, Debug)]
#[command(name = "reverie")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an interactive walkthrough; each stdin line is one turn
    ///
    /// Commands: `/phase <name>`, `/metrics`, `/end`.
    Walk {
        /// Title of the memory to walk through
        #[arg(long)]
        subject_title: String,

        /// Journal text of the memory
        #[arg(long, default_value = "")]
        subject_content: String,

        /// User id for the session
        #[arg(long, default_value = "local-user")]
        user: String,

        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Provider type from the registry
        #[arg(long, default_value = "anthropic")]
        provider: String,

        /// Use a provider that always fails; every reply is fallback content
        #[arg(long)]
        offline: bool,
    },

    /// Print the fallback scenario and text for an input
    Classify {
        /// Text to classify
        text: String,
    },

    /// Validate a YAML configuration file
    CheckConfig {
        /// Path to the file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Walk {
            subject_title,
            subject_content,
            user,
            config,
            provider,
            offline,
        } => {
            let config = load_config(config.as_deref())?;
            let provider = build_provider(if offline { "offline" } else { provider.as_str() })?;
            let subject = Subject::text("cli-subject", subject_title, subject_content);
            walk(provider, config, subject, &user).await?;
        }
        Commands::Classify { text } => {
            let scenario = categorize_scenario(&text);
            let fallback = FallbackResponse::for_scenario(scenario);
            println!("scenario: {}", scenario);
            println!("duration: {}ms", fallback.duration_ms);
            println!("{}", fallback.text);
        }
        Commands::CheckConfig { file } => {
            let config = WalkthroughConfig::from_yaml_file(&file)
                .with_context(|| format!("Invalid config: {}", file.display()))?;
            println!("{} is valid", file.display());
            print!("{}", config.to_yaml()?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<WalkthroughConfig> {
    match path {
        Some(path) => WalkthroughConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(WalkthroughConfig::default()),
    }
}

fn build_provider(provider_type: &str) -> Result<Arc<dyn AiProvider>> {
    let registry = ProviderRegistry::with_defaults();
    let config = serde_json::json!({});
    registry
        .validate(provider_type, &config)
        .and_then(|()| registry.create(provider_type, &config))
        .with_context(|| {
            format!(
                "Cannot create provider '{}' (available: {:?}); use --offline to run without one",
                provider_type,
                registry.available_types()
            )
        })
}

async fn walk(
    provider: Arc<dyn AiProvider>,
    config: WalkthroughConfig,
    subject: Subject,
    user: &str,
) -> Result<()> {
    let service = StreamingWalkthroughService::new(provider, config);
    let start = service.start_session(subject, user, None).await;
    let session_id = start.session_id;

    tracing::info!(session_id = %session_id, "Walkthrough started");
    println!("{}", start.initial_message.content);
    eprintln!("(type a reply, /phase <name>, /metrics or /end)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line == "/end" {
            break;
        }
        if line == "/metrics" {
            println!("{}", serde_json::to_string_pretty(&service.get_metrics())?);
            continue;
        }
        if let Some(name) = line.strip_prefix("/phase") {
            let phase: Phase = name.parse().context("Unknown phase")?;
            service
                .update_phase(&session_id, phase)
                .context("Failed to update phase")?;
            eprintln!("(phase: {})", phase);
            continue;
        }

        let input = (!line.is_empty()).then(|| line.to_string());
        stream_turn(&service, &session_id, input).await?;
    }

    let transcript = service.end_session(&session_id).await?;
    tracing::info!(
        session_id = %session_id,
        messages = transcript.messages.len(),
        "Walkthrough ended"
    );
    service.shutdown();
    Ok(())
}

async fn stream_turn(
    service: &StreamingWalkthroughService,
    session_id: &SessionId,
    input: Option<String>,
) -> Result<()> {
    let mut chunks = service.stream_response(session_id, input);
    let mut stdout = std::io::stdout();
    while let Some(chunk) = chunks.next().await {
        write!(stdout, "{}", chunk.to_sse_frame()?)?;
        stdout.flush()?;
    }
    Ok(())
}
