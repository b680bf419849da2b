use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use trolley_core::config::TelegramConfig;
use trolley_core::{Error, Result};

use crate::types::{ChoiceDecision, ChoiceRequest, ProductChoice};

#[async_trait]
pub trait ChoiceMessenger: Send + Sync {
    /// Sends the prompt and blocks until the user answers. Implementations
    /// serialize concurrent prompts so only one question is in flight.
    async fn request_choice(&self, request: &ChoiceRequest) -> Result<ChoiceDecision>;
}

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<IncomingMessage>,
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    #[allow(dead_code)]
    message_id: i64,
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    data: Option<String>,
    message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardMarkup {
    inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardButton {
    text: String,
    callback_data: String,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
    disable_notification: bool,
}

/// A reply parsed from callback data or free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedReply {
    Selection { index: usize, make_default: bool },
    Skip,
    Alternate(String),
}

/// Interprets a typed reply. Number selections accept star or `default`
/// prefixes to remember the choice; anything else is alternate text.
pub fn parse_reply(text: &str, choice_count: usize) -> ParsedReply {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("skip") {
        return ParsedReply::Skip;
    }

    let mut cleaned: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let mut make_default = false;
    let lowered = cleaned.to_lowercase();
    if lowered.starts_with("default") {
        make_default = true;
        cleaned = cleaned[7..].to_string();
    } else if lowered.starts_with("star") {
        make_default = true;
        cleaned = cleaned[4..].to_string();
    }
    if let Some(rest) = cleaned.strip_prefix(':') {
        cleaned = rest.to_string();
    }
    while cleaned.starts_with('\u{2b50}') || cleaned.starts_with('*') {
        make_default = true;
        cleaned = cleaned[cleaned.chars().next().map_or(0, |c| c.len_utf8())..].to_string();
    }
    while cleaned.ends_with('\u{2b50}') || cleaned.ends_with('*') {
        make_default = true;
        let last_len = cleaned.chars().last().map_or(0, |c| c.len_utf8());
        cleaned.truncate(cleaned.len() - last_len);
    }

    if !cleaned.is_empty() && cleaned.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(index) = cleaned.parse::<usize>() {
            if index >= 1 && index <= choice_count {
                return ParsedReply::Selection {
                    index,
                    make_default,
                };
            }
        }
    }
    ParsedReply::Alternate(trimmed.to_string())
}

/// Interprets inline-button callback data (`select:N`, `default:N`, `skip`).
pub fn parse_callback(data: &str, choice_count: usize) -> Option<ParsedReply> {
    let lowered = data.trim().to_lowercase();
    if lowered == "skip" {
        return Some(ParsedReply::Skip);
    }
    let (make_default, index_text) = if let Some(rest) = lowered.strip_prefix("select:") {
        (false, rest)
    } else if let Some(rest) = lowered.strip_prefix("default:") {
        (true, rest)
    } else if lowered.chars().all(|c| c.is_ascii_digit()) && !lowered.is_empty() {
        (false, lowered.as_str())
    } else {
        return None;
    };
    let index: usize = index_text.parse().ok()?;
    if index < 1 || index > choice_count {
        return None;
    }
    Some(ParsedReply::Selection {
        index,
        make_default,
    })
}

pub struct TelegramMessenger {
    client: Client,
    bot_token: String,
    chat_id: i64,
    nag_interval: Duration,
    // One prompt at a time; the offset survives across prompts.
    flight: Mutex<Option<i64>>,
}

impl TelegramMessenger {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        if config.bot_token.is_empty() || config.chat_id <= 0 {
            return Err(Error::Config(
                "preferences.telegram requires bot_token and a positive chat_id".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id,
            nag_interval: Duration::from_secs(config.nag_minutes.max(1) * 60),
            flight: Mutex::new(None),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", TELEGRAM_API_BASE, self.bot_token, method)
    }

    async fn get_updates(&self, offset: Option<i64>, timeout_secs: u32) -> Result<Vec<Update>> {
        let mut params = vec![("timeout", timeout_secs.to_string())];
        if let Some(off) = offset {
            params.push(("offset", off.to_string()));
        }
        let response = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Telegram request failed: {}", e)))?;
        let telegram_response: TelegramResponse<Vec<Update>> = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Failed to parse Telegram response: {}", e)))?;
        if !telegram_response.ok {
            return Err(Error::Transport(
                telegram_response
                    .description
                    .unwrap_or_else(|| "Unknown Telegram error".to_string()),
            ));
        }
        Ok(telegram_response.result.unwrap_or_default())
    }

    async fn send_message(
        &self,
        text: &str,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<i64> {
        let body = SendMessageRequest {
            chat_id: self.chat_id,
            text,
            reply_markup,
            disable_notification: true,
        };
        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Telegram request failed: {}", e)))?;
        let telegram_response: TelegramResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Failed to parse Telegram response: {}", e)))?;
        if !telegram_response.ok {
            return Err(Error::Transport(
                telegram_response
                    .description
                    .unwrap_or_else(|| "sendMessage failed".to_string()),
            ));
        }
        let message_id = telegram_response
            .result
            .as_ref()
            .and_then(|v| v.get("message_id"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        Ok(message_id)
    }

    async fn answer_callback(&self, callback_id: &str) {
        let result = self
            .client
            .post(self.api_url("answerCallbackQuery"))
            .json(&serde_json::json!({ "callback_query_id": callback_id }))
            .send()
            .await;
        if let Err(e) = result {
            debug!(error = %e, "answerCallbackQuery failed");
        }
    }

    async fn clear_keyboard(&self, message_id: i64) {
        let result = self
            .client
            .post(self.api_url("editMessageReplyMarkup"))
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "message_id": message_id,
            }))
            .send()
            .await;
        if let Err(e) = result {
            debug!(error = %e, "editMessageReplyMarkup failed");
        }
    }

    fn build_prompt(request: &ChoiceRequest) -> (String, InlineKeyboardMarkup) {
        let mut lines = vec![
            request.category_label.clone(),
            format!("List entry: {}", request.original_text),
            String::new(),
            "Reply with a number, tap a button, type a different product, or send `skip`."
                .to_string(),
            "Use a \u{2b50} button (or a prefix like \u{2b50}3) to remember the choice as default."
                .to_string(),
            String::new(),
        ];
        let mut buttons: Vec<Vec<InlineKeyboardButton>> = Vec::new();
        for (idx, choice) in request.choices.iter().enumerate() {
            let n = idx + 1;
            lines.push(format!("{}. {}", n, choice.title));
            lines.push(format!("   Price: {}", choice.price_text));
            buttons.push(vec![
                InlineKeyboardButton {
                    text: n.to_string(),
                    callback_data: format!("select:{}", n),
                },
                InlineKeyboardButton {
                    text: format!("\u{2b50} {}", n),
                    callback_data: format!("default:{}", n),
                },
            ]);
        }
        buttons.push(vec![InlineKeyboardButton {
            text: "Skip".to_string(),
            callback_data: "skip".to_string(),
        }]);
        (
            lines.join("\n"),
            InlineKeyboardMarkup {
                inline_keyboard: buttons,
            },
        )
    }

    fn acknowledgement(reply: &ParsedReply, choice: Option<&ProductChoice>) -> String {
        match reply {
            ParsedReply::Skip => "\u{1f44d} Skip recorded.".to_string(),
            ParsedReply::Alternate(_) => {
                "\u{270d}\u{fe0f} Got it, trying that alternative.".to_string()
            }
            ParsedReply::Selection { make_default, .. } => {
                let status = if *make_default {
                    "\u{2705} Default set"
                } else {
                    "\u{2705} Noted"
                };
                match choice {
                    Some(c) => format!("{}: {} ({})", status, c.title, c.price_text),
                    None => status.to_string(),
                }
            }
        }
    }

    fn decision_from(reply: ParsedReply, request: &ChoiceRequest) -> ChoiceDecision {
        match reply {
            ParsedReply::Skip => ChoiceDecision::Skip { message: None },
            ParsedReply::Alternate(text) => ChoiceDecision::Alternate { text },
            ParsedReply::Selection {
                index,
                make_default,
            } => ChoiceDecision::Selected {
                index,
                choice: request.choices[index - 1].clone(),
                make_default,
            },
        }
    }
}

#[async_trait]
impl ChoiceMessenger for TelegramMessenger {
    async fn request_choice(&self, request: &ChoiceRequest) -> Result<ChoiceDecision> {
        let mut offset_guard = self.flight.lock().await;

        // Drop anything typed before the prompt existed.
        for update in self.get_updates(*offset_guard, 0).await.unwrap_or_default() {
            *offset_guard = Some(update.update_id + 1);
        }

        let (text, keyboard) = Self::build_prompt(request);
        let prompt_id = self.send_message(&text, Some(&keyboard)).await?;
        debug!(message_id = prompt_id, "sent preference prompt");

        let mut last_activity = Instant::now();
        loop {
            if last_activity.elapsed() >= self.nag_interval {
                last_activity = Instant::now();
                if let Err(e) = self
                    .send_message(
                        "Still waiting on a pick.\nReply with a number, product, or `skip`.",
                        None,
                    )
                    .await
                {
                    warn!(error = %e, "failed to send nag message");
                }
            }

            let updates = match self.get_updates(*offset_guard, 30).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "failed to poll Telegram updates");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for update in updates {
                *offset_guard = Some(update.update_id + 1);

                let reply = if let Some(query) = update.callback_query {
                    self.answer_callback(&query.id).await;
                    let from_chat = query
                        .message
                        .as_ref()
                        .map(|m| m.chat.id == self.chat_id)
                        .unwrap_or(false);
                    if !from_chat {
                        continue;
                    }
                    match query
                        .data
                        .as_deref()
                        .and_then(|d| parse_callback(d, request.choices.len()))
                    {
                        Some(reply) => reply,
                        None => continue,
                    }
                } else if let Some(message) = update.message {
                    if message.chat.id != self.chat_id {
                        continue;
                    }
                    match message.text.as_deref().map(str::trim) {
                        Some(text) if !text.is_empty() => {
                            parse_reply(text, request.choices.len())
                        }
                        _ => continue,
                    }
                } else {
                    continue;
                };

                let selected = match &reply {
                    ParsedReply::Selection { index, .. } => request.choices.get(index - 1),
                    _ => None,
                };
                let ack = Self::acknowledgement(&reply, selected);
                self.clear_keyboard(prompt_id).await;
                if let Err(e) = self.send_message(&ack, None).await {
                    warn!(error = %e, "failed to send acknowledgement");
                }
                return Ok(Self::decision_from(reply, request));
            }
        }
    }
}
