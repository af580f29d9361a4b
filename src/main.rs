use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;

use ember_bot::application::services::CommandService;
use ember_bot::domain::entities::{BotReadyEvent, Event, Message, MessageReceivedEvent};
use ember_bot::domain::traits::{Bot, BotInfo};
use ember_bot::extensions::{
    BundleWatcher, CommandRegistry, DylibLoader, EventBus, ExtensionHost,
};
use ember_bot::infrastructure::adapters::console::ConsoleAdapter;
use ember_bot::infrastructure::config::Config;

#[derive(Parser)]
#[command(name = "ember-bot")]
#[command(about = "A bot host with hot-reloadable extensions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot
    Run,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            run_bot(cli.config);
        }
        Commands::Version => {
            println!("ember-bot v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::InitConfig => {
            init_config(&cli.config);
        }
    }
}

fn run_bot(config_path: String) {
    // Load config
    let config = if Path::new(&config_path).exists() {
        Config::load(&config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::load_env()
        })
    } else {
        Config::load_env()
    };

    tracing::info!("Starting ember-bot: {}", config.bot.name);

    let bus = Arc::new(EventBus::new());
    let commands = Arc::new(CommandRegistry::new());
    let bot_info = BotInfo {
        id: "console".to_string(),
        name: config.bot.name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let host = Arc::new(ExtensionHost::new(
        bus.clone(),
        commands.clone(),
        Arc::new(DylibLoader),
        bot_info,
        config.extensions.staging_directory.clone(),
    ));
    let watcher = Arc::new(BundleWatcher::new(
        config.extensions.directory.clone(),
        host.clone(),
    ));

    let service = CommandService::new(&config.bot.prefix, commands);
    if let Err(e) = service.register_defaults() {
        tracing::warn!("Failed to register default commands: {}", e);
    }
    if let Err(e) = service.register_host_commands(host, watcher.clone()) {
        tracing::warn!("Failed to register host commands: {}", e);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            return;
        }
    };

    rt.block_on(run_console(config, service, bus, watcher));
}

async fn run_console(
    config: Config,
    service: CommandService,
    bus: Arc<EventBus>,
    watcher: Arc<BundleWatcher>,
) {
    let adapter = ConsoleAdapter::new(&config.bot.name);
    if let Err(e) = adapter.start().await {
        tracing::error!("Failed to start adapter: {}", e);
        return;
    }

    let sweep_handle = if config.extensions.auto_load {
        let interval = Duration::from_secs(config.extensions.sweep_interval_secs.max(1));
        Some(watcher.clone().run(interval))
    } else {
        tracing::info!("Extension auto-load disabled");
        None
    };

    // Abnormal-exit path: Ctrl-C triggers the same idempotent shutdown as
    // the end of the console loop.
    {
        let watcher = watcher.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let w = watcher.clone();
                let _ = tokio::task::spawn_blocking(move || w.shutdown()).await;
                std::process::exit(0);
            }
        });
    }

    let mut ready = BotReadyEvent {
        bot_name: config.bot.name.clone(),
    };
    bus.dispatch(&mut ready);

    println!(
        "ember-bot console. Type {}help for commands, 'exit' to quit.",
        config.bot.prefix
    );

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read input: {}", e);
                break;
            }
        };
        let text = line.trim().to_string();
        if text.is_empty() {
            continue;
        }
        if text == "exit" || text == "quit" {
            break;
        }

        // Every inbound line flows through the bus first; a handler may
        // cancel it before command parsing sees it.
        let message = Message::from_text("console", &text).with_platform("console");
        let mut event = MessageReceivedEvent::new(message);
        bus.dispatch(&mut event);
        if event.is_cancelled() {
            continue;
        }

        if text.starts_with(service.prefix()) {
            let response = match service.handle_text("console", &text) {
                Ok(Some(response)) => response,
                Ok(None) => continue,
                Err(e) => format!("Error: {}", e),
            };
            if let Err(e) = adapter.send_message("console", &response).await {
                tracing::error!("Failed to send message: {}", e);
            }
        }
    }

    // Explicit shutdown path; a second call from the Ctrl-C hook is a no-op.
    let w = watcher.clone();
    let _ = tokio::task::spawn_blocking(move || w.shutdown()).await;
    if let Some(handle) = sweep_handle {
        handle.abort();
    }
}

fn init_config(path: &str) {
    if Path::new(path).exists() {
        tracing::warn!("Config file {} already exists, not overwriting", path);
        return;
    }
    match Config::default().save(path) {
        Ok(()) => tracing::info!("Wrote default config to {}", path),
        Err(e) => tracing::error!("Failed to write config: {}", e),
    }
}
