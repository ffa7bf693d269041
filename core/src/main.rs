//! Local Agent CLI
//!
//! Builds a development environment container for a source directory.

use std::path::PathBuf;
use std::sync::Arc;

use local_agent::{
    Client, Config, DockerRuntime, LlmAgent, LocalAgent, MemoryRuntime, OpenAiChatProvider,
    RuntimeKind, SourceTree, Validate,
};

struct Args {
    config: Option<PathBuf>,
    runtime: Option<RuntimeKind>,
    source: PathBuf,
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} [--config <file>] [--runtime docker|memory] <source-dir>", program);
    eprintln!("\nBuilds a container with the tools and dependencies the source needs.");
    eprintln!("\nEnvironment variables:");
    eprintln!("  LOCAL_AGENT_RUNTIME=docker|memory  Container runtime (default: docker)");
    eprintln!("  LOCAL_AGENT_CONTAINER_CLI          Container CLI program (default: docker)");
    eprintln!("  LOCAL_AGENT_MODEL                  Chat model (default: gpt-4o)");
    eprintln!("  LOCAL_AGENT_BASE_URL               OpenAI-compatible endpoint");
    eprintln!("  LOCAL_AGENT_API_KEY_ENV            Variable holding the API key (default: OPENAI_API_KEY)");
    eprintln!("  LOCAL_AGENT_MAX_TURNS              Agent turn limit (default: 50)");
    std::process::exit(1);
}

fn parse_args() -> Args {
    let mut argv = std::env::args();
    let program = argv.next().unwrap_or_else(|| "local-agent".to_string());

    let mut config = None;
    let mut runtime = None;
    let mut source = None;

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--config" => match argv.next() {
                Some(path) => config = Some(PathBuf::from(path)),
                None => usage(&program),
            },
            "--runtime" => match argv.next().map(|kind| kind.parse::<RuntimeKind>()) {
                Some(Ok(kind)) => runtime = Some(kind),
                Some(Err(e)) => {
                    eprintln!("{}", e);
                    usage(&program);
                }
                None => usage(&program),
            },
            "-h" | "--help" => usage(&program),
            _ if source.is_none() && !arg.starts_with('-') => source = Some(PathBuf::from(arg)),
            _ => usage(&program),
        }
    }

    match source {
        Some(source) => Args {
            config,
            runtime,
            source,
        },
        None => usage(&program),
    }
}

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries only the snapshot reference
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = parse_args();

    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(kind) = args.runtime {
        config.runtime.kind = kind;
    }

    match config.validate().into_result() {
        Ok(warnings) => {
            for warning in warnings {
                tracing::warn!("{}", warning);
            }
        }
        Err(e) => {
            eprintln!("Invalid config: {}", e);
            std::process::exit(1);
        }
    }

    let client = match config.runtime.kind {
        RuntimeKind::Docker => {
            tracing::info!(program = %config.runtime.program, "using docker runtime");
            Client::new(DockerRuntime::with_program(config.runtime.program.clone()))
        }
        RuntimeKind::Memory => {
            tracing::info!("using memory runtime");
            Client::new(MemoryRuntime::new())
        }
    };

    let provider = match OpenAiChatProvider::from_config(&config.agent) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("Failed to create chat provider: {}", e);
            std::process::exit(1);
        }
    };
    let executor = LlmAgent::new(Arc::new(provider), config.agent.clone());
    let agent = LocalAgent::new(client, Arc::new(executor));

    let source = SourceTree::new(args.source);
    let result = match agent.dev_environment(&source).await {
        Ok(container) => container.sync().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(snapshot) => println!("{}", snapshot),
        Err(e) => {
            eprintln!("Failed to build development environment: {}", e);
            std::process::exit(1);
        }
    }
}
