use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::commands::{CommandRouter, Scope, TriggerCommand, ADMIN_SENTINEL, SHARED_SENTINEL};
use crate::format::{decorate_author, strip_control_codes};
use crate::imgur::ImageHost;
use crate::platform::{ChatEndpoint, InboundEvent};

/// Prefix every line with the author so continuation lines are attributed too
fn decorate_lines(author: &str, body: &str) -> String {
    let prefix = decorate_author(author);
    body.split(['\r', '\n'])
        .filter(|line| !line.trim().is_empty())
        .map(|line| format!("{}{}", prefix, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Irc,
    Telegram,
}

/// Moves events between the two sides and hands triggers to the router.
pub struct Relay {
    irc: Arc<dyn ChatEndpoint>,
    telegram: Arc<dyn ChatEndpoint>,
    images: Arc<dyn ImageHost>,
    commands: Arc<CommandRouter>,
}

impl Relay {
    pub fn new(
        irc: Arc<dyn ChatEndpoint>,
        telegram: Arc<dyn ChatEndpoint>,
        images: Arc<dyn ImageHost>,
        commands: Arc<CommandRouter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            irc,
            telegram,
            images,
            commands,
        })
    }

    /// Drain both sides until `shutdown` fires, then wait for running triggers.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Relay started");
        let from_irc = tokio::spawn(self.clone().pump(Source::Irc, shutdown.clone()));
        let from_telegram = tokio::spawn(self.clone().pump(Source::Telegram, shutdown.clone()));

        for (name, handle) in [("irc", from_irc), ("telegram", from_telegram)] {
            if let Err(e) = handle.await {
                error!("Relay loop for {} ended abnormally: {}", name, e);
            }
        }

        self.commands.drain().await;
        info!("Relay stopped");
    }

    async fn pump(self: Arc<Self>, source: Source, shutdown: CancellationToken) {
        let endpoint = match source {
            Source::Irc => self.irc.clone(),
            Source::Telegram => self.telegram.clone(),
        };

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = endpoint.recv() => event,
            };
            let Some(event) = event else {
                info!("{} closed its event queue", endpoint.name());
                break;
            };

            match source {
                Source::Irc => self.handle_irc_event(event).await,
                Source::Telegram => self.handle_telegram_event(event).await,
            }
        }
        debug!("Relay loop for {} stopped", endpoint.name());
    }

    async fn handle_irc_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::ServiceNotice { body } | InboundEvent::UserAction { body, .. } => {
                self.telegram.post(&strip_control_codes(&body)).await;
            }
            InboundEvent::TextMessage { author, body, .. } => {
                if let Some(command) = TriggerCommand::parse(&body, SHARED_SENTINEL) {
                    self.commands.dispatch(command, Scope::Shared);
                }
                self.telegram
                    .post(&strip_control_codes(&format!("{}: {}", author, body)))
                    .await;
            }
            InboundEvent::MediaMessage { author, .. } => {
                debug!("Ignoring media from IRC user {}", author);
            }
        }
    }

    async fn handle_telegram_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::MediaMessage { author, bytes } => {
                let line = match self.images.upload(&bytes).await {
                    Ok(image) => format!("{}{}", decorate_author(&author), image.url),
                    Err(e) => {
                        error!("Failed to upload image from {}: {:#}", author, e);
                        format!("{}[image upload failed: {}]", decorate_author(&author), e)
                    }
                };
                self.irc.post(&line).await;
            }
            InboundEvent::TextMessage { author, body, .. } => {
                if body.starts_with(ADMIN_SENTINEL) {
                    // Undecorated so other bots in the channel see the command
                    self.irc.post(&body).await;
                    if let Some(command) = TriggerCommand::parse(&body, ADMIN_SENTINEL) {
                        self.commands.dispatch(command, Scope::Admin);
                    }
                } else if let Some(command) = TriggerCommand::parse(&body, SHARED_SENTINEL) {
                    self.commands.dispatch(command, Scope::Shared);
                } else {
                    self.irc.post(&decorate_lines(&author, &body)).await;
                }
            }
            InboundEvent::ServiceNotice { body } | InboundEvent::UserAction { body, .. } => {
                self.irc.post(&body).await;
            }
        }
    }
}
