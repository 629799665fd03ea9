//! Adapters and ambient services

pub mod alerts;
pub mod database;
pub mod explorer;
pub mod indexer;
pub mod logger;
pub mod metrics;
pub mod price;
pub mod storage;

pub use alerts::{AlertFormat, LogNotifier, Notifier, TelegramNotifier};
pub use database::DatabaseService;
pub use explorer::{ExplorerClient, HeightSource, TransferSource};
pub use indexer::IndexerClient;
pub use logger::init_logger;
pub use metrics::MetricsService;
pub use price::{DexScreenerPriceSource, FallbackPriceSource, PriceSource, StaticPriceSource};
pub use storage::{
    CheckpointStore, JsonCheckpointStore, JsonSubscriberStore, SubscriberRegistry,
    SubscriberStore,
};
