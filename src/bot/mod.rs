//! Telegram command bot: subscription management and read-only status

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;
use tracing::{info, warn};

use crate::config::Config;
use crate::modules::poll_loop::PollLoop;
use crate::modules::rolling_stats::RollingStats;
use crate::utils::alerts::{format_k, format_price, format_usd, DIVIDER};
use crate::utils::price::FallbackPriceSource;
use crate::utils::storage::{RecipientId, SubscriberRegistry};

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Subscribe to whale alerts")]
    Start,
    #[command(description = "Unsubscribe")]
    Stop,
    #[command(description = "Current token price")]
    Price,
    #[command(description = "Alert statistics")]
    Stats,
    #[command(description = "Current alert threshold")]
    Threshold,
    #[command(description = "Show help")]
    Help,
}

/// Token identity shown by `/price`
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub symbol: String,
    pub chart_url: String,
    pub explorer_url: String,
    pub supply: Option<Decimal>,
}

impl TokenInfo {
    pub fn from_config(config: &Config) -> Self {
        let contract = &config.token_contract;
        Self {
            symbol: config.token_symbol.clone(),
            chart_url: format!("{}/{}", config.chart_url.trim_end_matches('/'), contract),
            explorer_url: format!(
                "{}/{}",
                config.explorer_token_url.trim_end_matches('/'),
                contract
            ),
            supply: config.token_supply,
        }
    }
}

/// `~$1.43B`, `~$250.00M`, else K-notation
pub fn format_market_cap(mcap: Decimal) -> String {
    let billion = Decimal::from(1_000_000_000u64);
    let million = Decimal::from(1_000_000u64);
    if mcap >= billion {
        format!("~${:.2}B", (mcap / billion).round_dp(2))
    } else if mcap >= million {
        format!("~${:.2}M", (mcap / million).round_dp(2))
    } else {
        format!("~{}", format_usd(mcap))
    }
}

/// State the commands read and mutate
#[derive(Clone)]
pub struct CommandBot {
    registry: Arc<SubscriberRegistry>,
    stats: Arc<RwLock<RollingStats>>,
    price: Arc<FallbackPriceSource>,
    threshold_usd: Decimal,
    token: TokenInfo,
}

impl CommandBot {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        stats: Arc<RwLock<RollingStats>>,
        price: Arc<FallbackPriceSource>,
        threshold_usd: Decimal,
        token: TokenInfo,
    ) -> Self {
        Self {
            registry,
            stats,
            price,
            threshold_usd,
            token,
        }
    }

    pub fn from_poll_loop(poll: &PollLoop, token: TokenInfo) -> Self {
        Self::new(
            Arc::clone(poll.registry()),
            poll.stats(),
            Arc::clone(poll.price_source()),
            poll.threshold_usd(),
            token,
        )
    }

    fn symbol(&self) -> String {
        html::escape(&self.token.symbol)
    }

    /// Reply text for `command` sent from `chat`
    pub async fn reply(&self, chat: RecipientId, command: Command) -> String {
        match command {
            Command::Start => {
                let added = self.registry.subscribe(chat);
                format!(
                    "<b>{symbol} Whale Alert</b>\n{divider}\n\n{status}\n\n\
                     Price: {price}\n\
                     Alerts from: {threshold}\n\
                     Members: {members}\n\n\
                     /stop to unsubscribe, /help for commands",
                    symbol = self.symbol(),
                    divider = DIVIDER,
                    status = if added {
                        "You are subscribed to whale alerts."
                    } else {
                        "You are already subscribed."
                    },
                    price = format_price(self.price.cached()),
                    threshold = format_usd(self.threshold_usd),
                    members = self.registry.len(),
                )
            }
            Command::Stop => {
                if self.registry.unsubscribe(chat) {
                    "Unsubscribed. Send /start to subscribe again.".to_string()
                } else {
                    "You are not subscribed. Send /start to subscribe.".to_string()
                }
            }
            Command::Price => self.price_text().await,
            Command::Stats => self.stats_text(),
            Command::Threshold => format!(
                "Alerts are sent for transfers worth at least {}",
                format_usd(self.threshold_usd)
            ),
            Command::Help => html::escape(&Command::descriptions().to_string()),
        }
    }

    async fn price_text(&self) -> String {
        let price = self.price.price().await;
        let mcap = match self.token.supply {
            Some(supply) => format!("\n\nMCap: {}", format_market_cap(supply * price)),
            None => String::new(),
        };

        format!(
            "<b>{symbol}</b>  {price}\n{divider}{mcap}\n\n\
             <a href=\"{chart}\">Chart</a> · <a href=\"{explorer}\">Explorer</a>",
            symbol = self.symbol(),
            price = format_price(price),
            divider = DIVIDER,
            mcap = mcap,
            chart = html::escape(&self.token.chart_url),
            explorer = html::escape(&self.token.explorer_url),
        )
    }

    fn stats_text(&self) -> String {
        let snapshot = self.stats.read().snapshot(Utc::now());
        let record = match &snapshot.largest_buy {
            Some(best) => format!(
                "{} {} ({})",
                format_k(best.token_amount),
                self.symbol(),
                format_usd(best.usd_value)
            ),
            None => "none yet".to_string(),
        };

        format!(
            "<b>Stats</b>\n{divider}\n\n\
             Members: {members}\n\
             Total alerts: {total}\n\
             24h: {count} alerts · {volume}\n\
             Record: {record}",
            divider = DIVIDER,
            members = self.registry.len(),
            total = snapshot.total_alerts,
            count = snapshot.count,
            volume = format_usd(snapshot.volume_usd),
            record = record,
        )
    }

    /// Answer commands until the dispatcher stops
    pub async fn run(self, bot: Bot) {
        info!(target: "BOT", "Command bot started");
        let this = Arc::new(self);

        let handler = Update::filter_message().filter_command::<Command>().endpoint(
            move |bot: Bot, msg: Message, cmd: Command| {
                let this = Arc::clone(&this);
                async move { this.handle_command(bot, msg, cmd).await }
            },
        );

        Dispatcher::builder(bot, handler)
            .default_handler(|_| async {})
            .build()
            .dispatch()
            .await;
    }

    async fn handle_command(&self, bot: Bot, msg: Message, cmd: Command) -> ResponseResult<()> {
        let text = self.reply(RecipientId(msg.chat.id.0), cmd).await;
        if let Err(e) = bot
            .send_message(msg.chat.id, text)
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(true)
            .await
        {
            warn!(target: "BOT", "Reply to {} failed: {}", msg.chat.id, e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::transfer::{TokenValue, TransferRecord};
    use crate::modules::whale_detector::{AlertEvent, Tier};
    use crate::utils::price::StaticPriceSource;
    use crate::utils::storage::tests::MemorySubscriberStore;
    use rust_decimal_macros::dec;

    fn token(supply: Option<Decimal>) -> TokenInfo {
        TokenInfo {
            symbol: "ASTER".to_string(),
            chart_url: "https://dexscreener.com/bsc/0xaster".to_string(),
            explorer_url: "https://bscscan.com/token/0xaster".to_string(),
            supply,
        }
    }

    fn command_bot() -> (CommandBot, Arc<MemorySubscriberStore>) {
        command_bot_with(token(None))
    }

    fn command_bot_with(token: TokenInfo) -> (CommandBot, Arc<MemorySubscriberStore>) {
        let store = Arc::new(MemorySubscriberStore::default());
        let bot = CommandBot::new(
            Arc::new(SubscriberRegistry::load(store.clone())),
            Arc::new(RwLock::new(RollingStats::new())),
            Arc::new(FallbackPriceSource::new(
                Arc::new(StaticPriceSource::new(dec!(0.7123))),
                dec!(0.70),
            )),
            dec!(5000),
            token,
        );
        (bot, store)
    }

    #[test]
    fn parses_lowercase_commands() {
        assert_eq!(Command::parse("/start", "whale_bot").unwrap(), Command::Start);
        assert_eq!(Command::parse("/stats", "whale_bot").unwrap(), Command::Stats);
        assert!(Command::parse("/buy", "whale_bot").is_err());
    }

    #[tokio::test]
    async fn start_and_stop_persist_membership() {
        let (bot, store) = command_bot();

        let welcome = bot.reply(RecipientId(7), Command::Start).await;
        assert!(welcome.contains("You are subscribed"));
        assert!(welcome.contains("Members: 1"));
        assert!(welcome.contains("Alerts from: $5K"));
        assert!(store.saved.lock().clone().unwrap().contains(&RecipientId(7)));

        let again = bot.reply(RecipientId(7), Command::Start).await;
        assert!(again.contains("already subscribed"));

        let bye = bot.reply(RecipientId(7), Command::Stop).await;
        assert!(bye.starts_with("Unsubscribed"));
        assert!(store.saved.lock().clone().unwrap().is_empty());

        let not_member = bot.reply(RecipientId(7), Command::Stop).await;
        assert!(not_member.contains("not subscribed"));
    }

    #[tokio::test]
    async fn price_and_threshold_are_reads() {
        let (bot, store) = command_bot();
        assert_eq!(
            bot.reply(RecipientId(1), Command::Price).await,
            "<b>ASTER</b>  $0.7123\n▬▬▬▬▬▬▬▬▬▬▬▬▬▬▬\n\n\
             <a href=\"https://dexscreener.com/bsc/0xaster\">Chart</a> · \
             <a href=\"https://bscscan.com/token/0xaster\">Explorer</a>"
        );
        assert_eq!(
            bot.reply(RecipientId(1), Command::Threshold).await,
            "Alerts are sent for transfers worth at least $5K"
        );
        assert!(store.saved.lock().is_none());
    }

    #[tokio::test]
    async fn price_shows_market_cap_when_supply_is_known() {
        let (bot, _) = command_bot_with(token(Some(dec!(2000000000))));
        let text = bot.reply(RecipientId(1), Command::Price).await;
        assert!(text.contains("MCap: ~$1.42B"), "{}", text);
        assert!(text.contains("https://bscscan.com/token/0xaster"));
    }

    #[test]
    fn market_cap_units() {
        assert_eq!(format_market_cap(dec!(1424600000)), "~$1.42B");
        assert_eq!(format_market_cap(dec!(250000000)), "~$250.00M");
        assert_eq!(format_market_cap(dec!(12500)), "~$13K");
    }

    #[test]
    fn token_links_come_from_config() {
        let config = Config {
            token_contract: "0xabc".to_string(),
            chart_url: "https://dexscreener.com/bsc/".to_string(),
            ..Config::default()
        };
        let token = TokenInfo::from_config(&config);
        assert_eq!(token.chart_url, "https://dexscreener.com/bsc/0xabc");
        assert_eq!(token.explorer_url, "https://bscscan.com/token/0xabc");
        assert_eq!(token.supply, None);
    }

    #[tokio::test]
    async fn stats_show_window_and_record() {
        let (bot, _) = command_bot();
        assert!(bot.reply(RecipientId(1), Command::Stats).await.contains("Record: none yet"));

        bot.stats.write().record(
            &AlertEvent {
                transfer: TransferRecord {
                    hash: "0xabc".to_string(),
                    from: "0xfrom".to_string(),
                    to: "0xto".to_string(),
                    value: TokenValue::from(1u128),
                    block_height: 1,
                    timestamp: Utc::now(),
                },
                token_amount: dec!(80000),
                usd_value: dec!(56000),
                tier: Tier::Mega,
                price: dec!(0.70),
            },
            Utc::now(),
        );

        let text = bot.reply(RecipientId(1), Command::Stats).await;
        assert!(text.contains("Total alerts: 1"));
        assert!(text.contains("24h: 1 alerts · $56K"));
        assert!(text.contains("Record: 80K ASTER ($56K)"));
    }

    #[tokio::test]
    async fn help_lists_every_command() {
        let (bot, _) = command_bot();
        let help = bot.reply(RecipientId(1), Command::Help).await;
        for name in ["/start", "/stop", "/price", "/stats", "/threshold", "/help"] {
            assert!(help.contains(name), "missing {}", name);
        }
    }
}
