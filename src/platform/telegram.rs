use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TelegramConfig;
use crate::platform::{ChatEndpoint, InboundEvent};
use crate::queue::PendingQueue;

/// Telegram rejects messages over 4096 chars
const MAX_MESSAGE_LEN: usize = 4000;
/// Delay before retrying after a failed fetch
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Telegram sends ids as numbers, older gateways as strings
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

impl RawId {
    fn as_i64(&self) -> Option<i64> {
        match self {
            RawId::Number(n) => Some(*n),
            RawId::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl std::fmt::Display for RawId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawId::Number(n) => write!(f, "{}", n),
            RawId::Text(s) => write!(f, "{}", s.trim()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: RawId,
    #[serde(default)]
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    #[serde(default)]
    from: Option<TelegramUser>,
    chat: TelegramChat,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    photo: Option<Vec<PhotoSize>>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

impl TelegramUser {
    fn display_name(&self) -> Option<String> {
        self.username
            .clone()
            .or_else(|| self.first_name.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: RawId,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    #[serde(default)]
    file_path: Option<String>,
}

/// Client for the Telegram side of the bridge.
///
/// Polls `getUpdates` for one chat, keeps the update cursor and queues what it
/// finds as [`InboundEvent`]s.
pub struct TelegramClient {
    http: reqwest::Client,
    config: TelegramConfig,
    cursor: Mutex<Option<i64>>,
    events: PendingQueue<InboundEvent>,
    shutdown: CancellationToken,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            http: reqwest::Client::new(),
            config,
            cursor: Mutex::new(None),
            events: PendingQueue::new(),
            shutdown,
        })
    }

    /// Start the background poll loop. It stops when the shutdown token fires.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.clone().poll_loop())
    }

    /// Id of the last consumed update
    pub async fn cursor(&self) -> Option<i64> {
        *self.cursor.lock().await
    }

    /// Non-blocking dequeue of the next parsed event
    #[allow(dead_code)]
    pub fn next_event(&self) -> Option<InboundEvent> {
        self.events.try_pop()
    }

    /// Post to the configured chat. Blank text is ignored and failures are only logged.
    pub async fn send(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }

        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            if let Err(e) = self.send_chunk(&chunk).await {
                error!("Failed to send Telegram message: {:#}", e);
                return;
            }
        }
    }

    /// Run one fetch cycle. Returns how many events were queued.
    pub async fn poll_once(&self) -> Result<usize> {
        let offset = self.cursor.lock().await.map(|c| c.saturating_add(1));

        let mut request = self.http.get(self.method_url("getUpdates"));
        if let Some(offset) = offset {
            request = request.query(&[("offset", offset)]);
        }

        let body = request
            .send()
            .await
            .context("Failed to request updates from Telegram")?
            .text()
            .await
            .context("Failed to read getUpdates response")?;

        if body.trim().is_empty() {
            bail!("Empty getUpdates response");
        }

        let response: ApiResponse<Vec<serde_json::Value>> =
            serde_json::from_str(&body).context("Failed to parse getUpdates response")?;
        if !response.ok {
            bail!(
                "Telegram rejected getUpdates: {}",
                response.description.unwrap_or_default()
            );
        }

        let mut queued = 0;
        for raw in response.result.unwrap_or_default() {
            match serde_json::from_value::<Update>(raw) {
                Ok(update) => {
                    if self.accept(update).await {
                        queued += 1;
                    }
                }
                Err(e) => warn!("Skipping malformed Telegram update: {}", e),
            }
        }

        Ok(queued)
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    async fn poll_loop(self: Arc<Self>) {
        info!(
            "Polling Telegram chat {} every {:?}",
            self.config.chat_id,
            self.config.poll_interval()
        );

        let mut next_fetch = Instant::now() + self.config.poll_interval();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep_until(next_fetch) => {}
            }

            let result = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.poll_once() => result,
            };

            match result {
                Ok(queued) => {
                    if queued > 0 {
                        debug!("Queued {} Telegram event(s)", queued);
                    }
                    next_fetch = Instant::now() + self.config.poll_interval();
                }
                Err(e) => {
                    warn!("Telegram poll failed: {:#}", e);
                    next_fetch = Instant::now() + RETRY_DELAY;
                }
            }
        }
        debug!("Telegram poll loop stopped");
    }

    /// Queue one update if it belongs to the target chat. Returns whether an event was queued.
    async fn accept(&self, update: Update) -> bool {
        let Some(message) = update.message else {
            return false;
        };
        if message.chat.id.to_string() != self.config.chat_id.trim() {
            return false;
        }
        let Some(update_id) = update.update_id.as_i64() else {
            warn!("Skipping Telegram update with bad id: {}", update.update_id);
            return false;
        };

        {
            let mut cursor = self.cursor.lock().await;
            *cursor = Some(cursor.map_or(update_id, |c| c.max(update_id)));
        }

        let author = message
            .from
            .as_ref()
            .and_then(TelegramUser::display_name)
            .unwrap_or_else(|| "unknown".to_string());

        if let Some(text) = message.text {
            info!("Telegram message from {}: {}", author, text);
            self.events.push(InboundEvent::TextMessage {
                source_id: self.config.chat_id.clone(),
                author,
                body: text,
            });
            return true;
        }

        // Sizes are listed smallest first
        let Some(photo) = message.photo.and_then(|sizes| sizes.into_iter().last()) else {
            return false;
        };

        match self.fetch_file(&photo.file_id).await {
            Ok(bytes) => {
                info!("Telegram photo from {} ({} bytes)", author, bytes.len());
                self.events
                    .push(InboundEvent::MediaMessage { author, bytes });
                true
            }
            Err(e) => {
                warn!("Dropping Telegram photo from {}: {:#}", author, e);
                false
            }
        }
    }

    async fn fetch_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let response: ApiResponse<TelegramFile> = self
            .http
            .get(self.method_url("getFile"))
            .query(&[("file_id", file_id)])
            .send()
            .await
            .context("Failed to request file info from Telegram")?
            .json()
            .await
            .context("Failed to parse getFile response")?;

        if !response.ok {
            bail!(
                "Telegram rejected getFile: {}",
                response.description.unwrap_or_default()
            );
        }

        let file_path = response
            .result
            .and_then(|f| f.file_path)
            .filter(|p| !p.is_empty())
            .context("Telegram returned no file path")?;

        let url = format!(
            "{}/file/bot{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token,
            file_path
        );

        let bytes = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to download file from Telegram")?
            .error_for_status()
            .context("Telegram file download failed")?
            .bytes()
            .await
            .context("Failed to read file body")?;

        Ok(bytes.to_vec())
    }

    async fn send_chunk(&self, text: &str) -> Result<()> {
        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .form(&[("chat_id", self.config.chat_id.as_str()), ("text", text)])
            .send()
            .await
            .context("Failed to send message to Telegram")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!("Telegram API error ({}): {}", status, error_body);
        }

        Ok(())
    }
}

#[async_trait]
impl ChatEndpoint for TelegramClient {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn recv(&self) -> Option<InboundEvent> {
        self.events.pop().await
    }

    async fn post(&self, text: &str) {
        self.send(text).await;
    }
}
