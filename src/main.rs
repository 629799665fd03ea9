//! Whale Alert - large token transfer notifications
//!
//! Polls a block explorer or indexer for transfers of one token, prices
//! them, and pushes alerts for the large ones to Telegram subscribers.
//!
//! This is a **read-only** tool - no wallet, no on-chain writes.

mod bot;
mod config;
mod dashboard;
mod modules;
mod utils;

use anyhow::Result;
use std::sync::Arc;
use teloxide::Bot;
use tokio::signal;
use tracing::{error, info};

use bot::{CommandBot, TokenInfo};
use config::{Config, LogFormat, PriceSourceKind, StorageBackend, TransferSourceKind};
use dashboard::DashboardServer;
use modules::{PollLoop, PollServices, PollSettings};
use utils::{
    init_logger, AlertFormat, CheckpointStore, DatabaseService, DexScreenerPriceSource,
    ExplorerClient, FallbackPriceSource, HeightSource, IndexerClient, JsonCheckpointStore,
    JsonSubscriberStore, LogNotifier, MetricsService, Notifier, PriceSource, StaticPriceSource,
    SubscriberRegistry, SubscriberStore, TelegramNotifier, TransferSource,
};

const BANNER: &str = r#"
    ╔═══════════════════════════════════════════════╗
    ║                                               ║
    ║   🐋  WHALE ALERT                             ║
    ║   Large transfer notifications (read-only)    ║
    ║                                               ║
    ╚═══════════════════════════════════════════════╝
"#;

/// Whale Alert application
pub struct WhaleAlert {
    config: Config,
    poll: PollLoop,
    bot: Option<Bot>,
}

impl WhaleAlert {
    /// Wire adapters according to `config`
    pub fn new(config: Config) -> Result<Self> {
        let metrics = Arc::new(MetricsService::new()?);

        let checkpoints: Arc<dyn CheckpointStore>;
        let subscribers: Arc<dyn SubscriberStore>;
        match config.storage_backend {
            StorageBackend::Json => {
                checkpoints = Arc::new(JsonCheckpointStore::new(&config.checkpoint_file));
                subscribers = Arc::new(JsonSubscriberStore::new(&config.subscribers_file));
            }
            StorageBackend::Sqlite => {
                let database = Arc::new(DatabaseService::new(&config.database_path)?);
                checkpoints = database.clone();
                subscribers = database;
            }
        }

        let transfers: Arc<dyn TransferSource>;
        let heights: Arc<dyn HeightSource>;
        match config.transfer_source {
            TransferSourceKind::Explorer => {
                let client = Arc::new(ExplorerClient::new(&config));
                transfers = client.clone();
                heights = client;
            }
            TransferSourceKind::Indexer => {
                let client = Arc::new(IndexerClient::new(&config));
                transfers = client.clone();
                heights = client;
            }
        }

        let upstream_price: Arc<dyn PriceSource> = match config.price_source {
            PriceSourceKind::DexScreener => Arc::new(DexScreenerPriceSource::new(&config)),
            PriceSourceKind::Static => Arc::new(StaticPriceSource::new(config.fallback_price_usd)),
        };
        let price = Arc::new(FallbackPriceSource::new(upstream_price, config.fallback_price_usd));

        let format = AlertFormat::from_config(&config);
        let bot = config.telegram_bot_token.as_deref().map(Bot::new);
        let notifier: Arc<dyn Notifier> = match &bot {
            Some(bot) => Arc::new(TelegramNotifier::new(bot.clone(), format.clone())),
            None => Arc::new(LogNotifier::new(format.clone())),
        };

        let poll = PollLoop::new(
            PollSettings::from_config(&config),
            PollServices {
                transfers,
                heights,
                price,
                notifier,
                checkpoints,
                registry: Arc::new(SubscriberRegistry::load(subscribers)),
                metrics,
                format,
            },
        );

        Ok(Self { config, poll, bot })
    }

    /// Start the command bot and dashboard, then poll until stopped
    pub async fn start(&self) -> Result<()> {
        println!("{}", BANNER);

        info!(
            target: "WHALE_ALERT",
            "Watching {} ({}) via {:?}, alerts from ${}",
            self.config.token_symbol,
            self.config.token_contract,
            self.config.transfer_source,
            self.config.min_alert_usd
        );

        if let Some(bot) = &self.bot {
            let commands = CommandBot::from_poll_loop(&self.poll, TokenInfo::from_config(&self.config));
            tokio::spawn(commands.run(bot.clone()));
        }

        if self.config.dashboard_enabled() {
            let dashboard = DashboardServer::new(self.config.dashboard_port, self.poll.clone());
            tokio::spawn(async move {
                if let Err(e) = dashboard.start().await {
                    error!(target: "DASHBOARD", "Dashboard stopped: {}", e);
                }
            });
        }

        self.poll.run().await;
        Ok(())
    }

    /// Graceful shutdown
    pub async fn shutdown(&self) {
        info!(target: "WHALE_ALERT", "Shutting down...");

        self.poll.stop();
        self.poll.flush();

        crate::log_success!("WHALE_ALERT", "Shutdown complete");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    // Initialize logging before reporting config errors
    init_logger(
        config
            .as_ref()
            .map(|c| c.log_format)
            .unwrap_or(LogFormat::Pretty),
    );

    let app = match config.and_then(WhaleAlert::new) {
        Ok(app) => app,
        Err(e) => {
            error!(target: "WHALE_ALERT", "Failed to initialize: {:#}", e);
            return Err(e);
        }
    };

    // Setup shutdown signal handler
    let shutdown_signal = async {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    tokio::select! {
        result = app.start() => {
            if let Err(e) = result {
                error!(target: "WHALE_ALERT", "Fatal error: {}", e);
            }
        }
        _ = shutdown_signal => {
            app.shutdown().await;
        }
    }

    Ok(())
}
