use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub irc: IrcConfig,
    pub telegram: TelegramConfig,
    pub imgur: ImgurConfig,
    #[serde(default)]
    pub tvmaze: TvMazeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IrcConfig {
    pub server: String,
    #[serde(default = "default_irc_port")]
    pub port: u16,
    pub nick: String,
    /// Username sent in the USER line, defaults to the nick
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub realname: Option<String>,
    /// NickServ secret, sent after the welcome numeric when non-empty
    #[serde(default)]
    pub password: String,
    /// The one channel bridged to Telegram
    pub channel: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_identify_delay_secs")]
    pub identify_delay_secs: u64,
}

impl IrcConfig {
    /// RFC 2812 USER line
    pub fn user_line(&self) -> String {
        let username = self.username.as_deref().unwrap_or(&self.nick);
        let realname = self.realname.as_deref().unwrap_or(&self.nick);
        format!("USER {} 0 * :{}", username, realname)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn identify_delay(&self) -> Duration {
        Duration::from_secs(self.identify_delay_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    pub bot_token: String,
    /// Target chat id. Updates from every other chat are dropped.
    pub chat_id: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl TelegramConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImgurConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_imgur_api_url")]
    pub api_url: String,
    /// Uploaded images are deleted after this many minutes. Unset keeps them forever.
    #[serde(default)]
    pub retention_minutes: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TvMazeConfig {
    #[serde(default = "default_tvmaze_api_url")]
    pub api_url: String,
}

impl Default for TvMazeConfig {
    fn default() -> Self {
        Self {
            api_url: default_tvmaze_api_url(),
        }
    }
}

fn default_irc_port() -> u16 {
    6667
}

fn default_connect_timeout_secs() -> u64 {
    20
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_identify_delay_secs() -> u64 {
    5
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_imgur_api_url() -> String {
    "https://api.imgur.com".to_string()
}

fn default_tvmaze_api_url() -> String {
    "http://api.tvmaze.com".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.irc.nick.trim().is_empty() {
            bail!("[irc] nick must not be empty");
        }
        if !self.irc.channel.starts_with('#') && !self.irc.channel.starts_with('&') {
            bail!(
                "[irc] channel must start with '#' or '&', got '{}'",
                self.irc.channel
            );
        }
        if self.telegram.bot_token.trim().is_empty() {
            bail!("[telegram] bot_token must not be empty");
        }
        if self.telegram.chat_id.trim().is_empty() {
            bail!("[telegram] chat_id must not be empty");
        }
        Ok(())
    }
}
