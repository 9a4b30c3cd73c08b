//! IoT Sage server entry point.

use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use iot_sage_server::config::{ConfigOverrides, ServerConfig, DEFAULT_ADDR};
use iot_sage_server::pipeline::QueryOrchestrator;
use iot_sage_server::transport::HttpTransport;
use iot_sage_server::types::QueryRequest;

#[derive(Parser)]
#[command(
    name = "iot-sage",
    about = "Answers natural-language questions about IoT sensor readings with a local language model",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP query server (default).
    Serve {
        /// Listen address (host:port).
        #[arg(long, default_value = DEFAULT_ADDR)]
        addr: String,
    },

    /// Answer one question and print the reply as JSON.
    Ask {
        /// The question, e.g. "What is the temperature in the kitchen?"
        question: String,

        /// Maximum tokens to generate.
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Sampling temperature.
        #[arg(long)]
        temperature: Option<f32>,
    },

    /// Print store, pool, and inference statistics as JSON.
    Status,

    /// Check the effective configuration and model file.
    Validate,

    /// Print the effective configuration and version as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   iot-sage completions bash > ~/.local/share/bash-completion/completions/iot-sage
    ///   iot-sage completions zsh > ~/.zfunc/_iot-sage
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },

    /// Launch interactive REPL mode.
    Repl,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    let command = cli.command.unwrap_or(Commands::Serve {
        addr: DEFAULT_ADDR.to_string(),
    });

    match command {
        Commands::Serve { addr } => {
            let config = ServerConfig::load(&cli.overrides)?;
            tracing::info!("IoT Sage server v{}", env!("CARGO_PKG_VERSION"));
            let orchestrator = Arc::new(QueryOrchestrator::bootstrap(config, true).await?);
            let transport = HttpTransport::new(orchestrator);
            transport.run(&addr).await?;
        }

        Commands::Ask {
            question,
            max_tokens,
            temperature,
        } => {
            let config = ServerConfig::load(&cli.overrides)?;
            let orchestrator = QueryOrchestrator::bootstrap(config, false).await?;
            let request = QueryRequest {
                max_tokens,
                temperature,
                ..QueryRequest::new(question)
            };
            let reply = orchestrator.handle(request).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }

        Commands::Status => {
            let config = ServerConfig::load(&cli.overrides)?;
            let orchestrator = QueryOrchestrator::bootstrap(config, false).await?;
            let status = orchestrator.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Commands::Validate => match ServerConfig::load(&cli.overrides) {
            Ok(config) => {
                println!("Valid configuration");
                match &config.model.model_path {
                    Some(path) if !config.model.use_mock => {
                        println!("  Model: {}", path.display())
                    }
                    _ => println!("  Model: mock responder"),
                }
                if let Some(endpoint) = &config.model.endpoint {
                    println!("  Endpoint: {endpoint}");
                }
                println!("  GPU: {}", config.model.gpu);
                println!("  Workers: {} (queue {})", config.workers, config.queue_depth);
                println!("  Token budget: {}", config.pipeline.token_budget);
            }
            Err(e) => {
                eprintln!("Invalid configuration: {e}");
                std::process::exit(1);
            }
        },

        Commands::Info => {
            let config = ServerConfig::resolve(&cli.overrides, &|key| std::env::var(key).ok())?;
            let info = serde_json::json!({
                "name": "iot-sage",
                "version": env!("CARGO_PKG_VERSION"),
                "endpoints": ["POST /query", "GET /status", "GET /health"],
                "config": config,
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "iot-sage", &mut std::io::stdout());
        }

        Commands::Repl => {
            let config = ServerConfig::load(&cli.overrides)?;
            let orchestrator = Arc::new(QueryOrchestrator::bootstrap(config, true).await?);
            let runtime = tokio::runtime::Handle::current();
            tokio::task::spawn_blocking(move || iot_sage_server::repl::run(orchestrator, runtime))
                .await??;
        }
    }

    Ok(())
}
