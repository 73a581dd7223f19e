use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures::FutureExt;
use tracing::info;

use crate::imgur::ImgurClient;
use crate::platform::irc::IrcClient;
use crate::platform::telegram::TelegramClient;
use crate::scheduler::Scheduler;

pub const HEARTBEAT_CRON: &str = "0 0 * * * *";
pub const UPLOAD_EXPIRY_CRON: &str = "0 */5 * * * *";

/// Hourly heartbeat, plus upload expiry when Imgur retention is configured
pub async fn register_relay_tasks(
    scheduler: &mut Scheduler,
    irc: Arc<IrcClient>,
    telegram: Arc<TelegramClient>,
    imgur: Arc<ImgurClient>,
) -> Result<()> {
    scheduler
        .every(HEARTBEAT_CRON, "heartbeat", move || {
            let irc = irc.clone();
            let telegram = telegram.clone();
            async move {
                info!(
                    "Heartbeat: IRC {:?}, Telegram cursor {:?}",
                    irc.state(),
                    telegram.cursor().await
                );
            }
            .boxed()
        })
        .await?;

    if imgur.retention().is_some() {
        scheduler
            .every(UPLOAD_EXPIRY_CRON, "imgur-expiry", move || {
                let imgur = imgur.clone();
                async move {
                    imgur.delete_expired(Utc::now()).await;
                }
                .boxed()
            })
            .await?;
    }

    Ok(())
}
