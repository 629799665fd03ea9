//! Alert delivery (Telegram or log-only) and message formatting

use async_trait::async_trait;
use rust_decimal::prelude::*;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::html;
use teloxide::{ApiError, RequestError};
use tracing::info;

use crate::config::Config;
use crate::modules::whale_detector::AlertEvent;
use crate::utils::storage::RecipientId;

pub const DIVIDER: &str = "▬▬▬▬▬▬▬▬▬▬▬▬▬▬▬";

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Recipient is gone for good; drop it from the registry
    Permanent(String),
    /// Worth trying again next alert; no retry now
    Transient(String),
}

impl DeliveryOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Permanent(_) => "permanent",
            DeliveryOutcome::Transient(_) => "transient",
        }
    }
}

/// Delivers one alert to one recipient
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, recipient: RecipientId, alert: &AlertEvent) -> DeliveryOutcome;
}

// ============================================
// FORMATTING
// ============================================

fn round0(n: Decimal) -> Decimal {
    n.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// `12345` -> `12K`, `999` -> `999`
pub fn format_k(n: Decimal) -> String {
    if n >= Decimal::ONE_THOUSAND {
        format!("{}K", round0(n / Decimal::ONE_THOUSAND))
    } else {
        format!("{}", round0(n))
    }
}

pub fn format_usd(n: Decimal) -> String {
    format!("${}", format_k(n))
}

/// Four fractional digits
pub fn format_price(price: Decimal) -> String {
    format!(
        "${:.4}",
        price.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
    )
}

/// `0x1234...abcd`
pub fn shorten_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Static parts of an alert message
#[derive(Debug, Clone)]
pub struct AlertFormat {
    pub symbol: String,
    pub tx_url: String,
}

impl AlertFormat {
    pub fn from_config(config: &Config) -> Self {
        Self {
            symbol: config.token_symbol.clone(),
            tx_url: config.explorer_tx_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn tx_link(&self, hash: &str) -> String {
        format!("{}/{}", self.tx_url, hash)
    }

    /// HTML body sent to subscribers; every upstream or configured string is escaped
    pub fn render(&self, alert: &AlertEvent) -> String {
        format!(
            "<b>{title}</b>\n{divider}\n\n{amount} {symbol} · {usd}\n\n<code>{from}</code> → <code>{to}</code>\n\n<a href=\"{link}\">View Tx</a> · {price}",
            title = alert.tier.title(),
            divider = DIVIDER,
            amount = format_k(alert.token_amount),
            symbol = html::escape(&self.symbol),
            usd = format_usd(alert.usd_value),
            from = html::escape(&shorten_address(&alert.transfer.from)),
            to = html::escape(&shorten_address(&alert.transfer.to)),
            link = html::escape(&self.tx_link(&alert.transfer.hash)),
            price = format_price(alert.price),
        )
    }

    /// One-line summary for logs
    pub fn summary(&self, alert: &AlertEvent) -> String {
        format!(
            "{}: {} {} ({})",
            alert.tier.title(),
            format_k(alert.token_amount),
            self.symbol,
            format_usd(alert.usd_value)
        )
    }
}

// ============================================
// NOTIFIERS
// ============================================

/// Map a Telegram failure onto the permanent/transient split
pub fn classify_request_error(error: &RequestError) -> DeliveryOutcome {
    match error {
        RequestError::Api(api) => match api {
            ApiError::BotBlocked
            | ApiError::ChatNotFound
            | ApiError::UserDeactivated
            | ApiError::BotKicked
            | ApiError::CantInitiateConversation
            | ApiError::CantTalkWithBots => DeliveryOutcome::Permanent(api.to_string()),
            ApiError::Unknown(message) if message.starts_with("Forbidden") => {
                DeliveryOutcome::Permanent(message.clone())
            }
            other => DeliveryOutcome::Transient(other.to_string()),
        },
        RequestError::MigrateToChatId(_) => DeliveryOutcome::Permanent(error.to_string()),
        other => DeliveryOutcome::Transient(other.to_string()),
    }
}

/// Sends alerts through the Telegram Bot API
pub struct TelegramNotifier {
    bot: Bot,
    format: AlertFormat,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, format: AlertFormat) -> Self {
        info!(target: "ALERTS", "Telegram notifier initialized");
        Self { bot, format }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, recipient: RecipientId, alert: &AlertEvent) -> DeliveryOutcome {
        let result = self
            .bot
            .send_message(ChatId(recipient.0), self.format.render(alert))
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(true)
            .await;

        match result {
            Ok(_) => DeliveryOutcome::Delivered,
            Err(e) => classify_request_error(&e),
        }
    }
}

/// Used when no bot token is configured
pub struct LogNotifier {
    format: AlertFormat,
}

impl LogNotifier {
    pub fn new(format: AlertFormat) -> Self {
        info!(target: "ALERTS", "No Telegram token - alerts will only be logged");
        Self { format }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, recipient: RecipientId, alert: &AlertEvent) -> DeliveryOutcome {
        info!(
            target: "ALERTS",
            "[{}] {}",
            recipient,
            self.format.render(alert).replace('\n', " | ")
        );
        DeliveryOutcome::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::transfer::{TokenValue, TransferRecord};
    use crate::modules::whale_detector::Tier;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn format() -> AlertFormat {
        AlertFormat {
            symbol: "ASTER".to_string(),
            tx_url: "https://bscscan.com/tx".to_string(),
        }
    }

    fn alert() -> AlertEvent {
        AlertEvent {
            transfer: TransferRecord {
                hash: "0xfeed".to_string(),
                from: "0x1234567890abcdef1234567890abcdef12345678".to_string(),
                to: "0xabcdefabcdefabcdefabcdefabcdefabcdef9999".to_string(),
                value: TokenValue::from(1u128),
                block_height: 1005,
                timestamp: Utc::now(),
            },
            token_amount: dec!(20000),
            usd_value: dec!(14000),
            tier: Tier::Whale,
            price: dec!(0.70),
        }
    }

    #[test]
    fn k_notation() {
        assert_eq!(format_k(dec!(999)), "999");
        assert_eq!(format_k(dec!(999.5)), "1000");
        assert_eq!(format_k(dec!(1000)), "1K");
        assert_eq!(format_k(dec!(12500)), "13K");
        assert_eq!(format_k(dec!(1234567)), "1235K");
        assert_eq!(format_usd(dec!(5000)), "$5K");
    }

    #[test]
    fn price_has_four_digits() {
        assert_eq!(format_price(dec!(0.7)), "$0.7000");
        assert_eq!(format_price(dec!(0.712345)), "$0.7123");
    }

    #[test]
    fn shortens_addresses() {
        assert_eq!(
            shorten_address("0x1234567890abcdef1234567890abcdef12345678"),
            "0x1234...5678"
        );
        assert_eq!(shorten_address("0xshort"), "0xshort");
    }

    #[test]
    fn renders_alert_message() {
        let text = format().render(&alert());
        assert_eq!(
            text,
            "<b>WHALE</b>\n▬▬▬▬▬▬▬▬▬▬▬▬▬▬▬\n\n20K ASTER · $14K\n\n<code>0x1234...5678</code> → <code>0xabcd...9999</code>\n\n<a href=\"https://bscscan.com/tx/0xfeed\">View Tx</a> · $0.7000"
        );
    }

    #[test]
    fn symbol_markup_is_escaped() {
        let format = AlertFormat {
            symbol: "A_B*<C>".to_string(),
            ..format()
        };
        let text = format.render(&alert());
        assert!(text.contains("20K A_B*&lt;C&gt; · $14K"));
        assert!(!text.contains("<C>"));
    }

    #[test]
    fn blocked_and_missing_chats_are_permanent() {
        for api in [ApiError::BotBlocked, ApiError::ChatNotFound, ApiError::UserDeactivated] {
            let outcome = classify_request_error(&RequestError::Api(api));
            assert_eq!(outcome.label(), "permanent");
        }

        let forbidden = RequestError::Api(ApiError::Unknown(
            "Forbidden: bot was kicked from the channel chat".to_string(),
        ));
        assert_eq!(classify_request_error(&forbidden).label(), "permanent");
    }

    #[test]
    fn other_api_errors_are_transient() {
        let outcome = classify_request_error(&RequestError::Api(ApiError::Unknown(
            "Bad Gateway".to_string(),
        )));
        assert_eq!(outcome.label(), "transient");
        assert!(matches!(outcome, DeliveryOutcome::Transient(reason) if reason.contains("Bad Gateway")));
    }

    #[tokio::test]
    async fn log_notifier_always_delivers() {
        let notifier = LogNotifier::new(format());
        assert_eq!(
            notifier.deliver(RecipientId(1), &alert()).await,
            DeliveryOutcome::Delivered
        );
    }
}
