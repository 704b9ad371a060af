use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dingbridge")]
#[command(about = "DingTalk robot to AI webhook bridge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: DINGBRIDGE_CONFIG_PATH or ~/.dingbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the callback server and answer robot messages until SIGINT/SIGTERM.
    Serve {
        /// Config file path (default: DINGBRIDGE_CONFIG_PATH or ~/.dingbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 15151)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Validate the configuration and fetch a DingTalk access token.
    Check {
        /// Config file path (default: DINGBRIDGE_CONFIG_PATH or ~/.dingbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Send one question to the generation webhook and print the reply chunks.
    Ask {
        /// Config file path (default: DINGBRIDGE_CONFIG_PATH or ~/.dingbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// User id sent with the request.
        #[arg(long, value_name = "ID")]
        user: Option<String>,

        /// Question text.
        #[arg(required = true)]
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("ignoring .env: {}", e);
        }
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("dingbridge {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("serve failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Check { config }) => {
            if let Err(e) = run_check(config).await {
                log::error!("check failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ask { config, user, text }) => {
            if let Err(e) = run_ask(config, user, text.join(" ")).await {
                log::error!("ask failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting dingbridge on {}:{} (config {})",
        config.gateway.bind,
        config.gateway.port,
        path.display()
    );
    lib::gateway::run_gateway(config).await
}

async fn run_check(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = lib::config::load_config(config_path)?;
    config.validate()?;
    println!("config ok: {}", path.display());

    let exchange =
        lib::channels::DingTalkTokenExchange::from_config(reqwest::Client::new(), &config.dingtalk);
    let tokens = lib::channels::TokenCache::new(Arc::new(exchange));
    let credential = tokens.get_credential().await?;
    println!(
        "access token ok, valid for {}s",
        credential.remaining().as_secs()
    );
    match config.card_template_id() {
        Some(t) => println!("delivery: AI card ({})", t),
        None => println!("delivery: markdown"),
    }
    Ok(())
}

async fn run_ask(
    config_path: Option<std::path::PathBuf>,
    user: Option<String>,
    text: String,
) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    if config.webhook.url.as_deref().map(str::trim).unwrap_or("").is_empty() {
        anyhow::bail!("webhook.url is not set (N8N_WEBHOOK_URL)");
    }
    let webhook = lib::llm::WebhookClient::from_config(reqwest::Client::new(), &config.webhook);
    let generation = lib::llm::GenerationClient::new(Arc::new(webhook), config.webhook.timeout());

    let request = lib::llm::GenerationRequest::new(text, user, None);
    let mut stream = generation.stream(request);
    while let Some(segment) = stream.next().await {
        if segment.is_failed {
            eprintln!("! {}", segment.text);
        } else {
            println!("< {}", segment.text.trim_end());
        }
    }
    Ok(())
}
