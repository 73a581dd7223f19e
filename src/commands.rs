use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::format::{comma_list, strip_control_codes, BOLD, COLOR};
use crate::platform::ChatEndpoint;
use crate::tvmaze::{Episode, Show, ShowLookup};

/// Prefix for triggers anyone can use, from either side
pub const SHARED_SENTINEL: char = '!';
/// Prefix for admin triggers, only honoured from Telegram
pub const ADMIN_SENTINEL: char = '/';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerCommand {
    pub token: String,
    pub argv: Vec<String>,
}

impl TriggerCommand {
    pub fn parse(body: &str, sentinel: char) -> Option<Self> {
        if !body.starts_with(sentinel) {
            return None;
        }
        let mut words = body.split_whitespace();
        let token = words.next()?.to_string();
        Some(Self {
            token,
            argv: words.map(str::to_string).collect(),
        })
    }

    /// Arguments joined back into one string
    pub fn query(&self) -> String {
        self.argv.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Shared,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    ShowLookup,
    Roster,
    /// Accepted, does nothing
    Ignore,
}

const SHARED_TRIGGERS: &[(&str, Action)] =
    &[("!ep", Action::ShowLookup), ("!imdb", Action::Ignore)];

const ADMIN_TRIGGERS: &[(&str, Action)] = &[
    ("/names", Action::Roster),
    ("/blockurls", Action::Ignore),
    ("/urlblock", Action::Ignore),
    ("/blockurlsfrom", Action::Ignore),
    ("/addcensor", Action::Ignore),
    ("/censor", Action::Ignore),
    ("/censorword", Action::Ignore),
];

/// Everything a running handler may touch
#[derive(Clone)]
struct HandlerContext {
    irc: Arc<dyn ChatEndpoint>,
    telegram: Arc<dyn ChatEndpoint>,
    shows: Arc<dyn ShowLookup>,
}

impl HandlerContext {
    async fn run(&self, action: Action, command: &TriggerCommand) {
        match action {
            Action::ShowLookup => self.show_lookup(command).await,
            Action::Roster => self.irc.request_roster().await,
            Action::Ignore => debug!("Trigger {} accepted, nothing to do", command.token),
        }
    }

    async fn show_lookup(&self, command: &TriggerCommand) {
        let query = command.query();
        if query.is_empty() {
            self.broadcast(&format!("Usage: {} <show name>", command.token))
                .await;
            return;
        }

        match self.shows.search(&query).await {
            Ok(show) => {
                for line in show_lines(&show, Utc::now()) {
                    self.broadcast(&line).await;
                }
            }
            Err(e) => {
                info!("Show lookup for '{}' failed: {:#}", query, e);
                self.broadcast(&e.to_string()).await;
            }
        }
    }

    /// IRC gets the formatted line, Telegram the plain text
    async fn broadcast(&self, line: &str) {
        self.irc.post(line).await;
        self.telegram.post(&strip_control_codes(line)).await;
    }
}

/// Maps trigger tokens to handlers and runs each match as its own task
pub struct CommandRouter {
    context: HandlerContext,
    tasks: TaskTracker,
}

impl CommandRouter {
    pub fn new(
        irc: Arc<dyn ChatEndpoint>,
        telegram: Arc<dyn ChatEndpoint>,
        shows: Arc<dyn ShowLookup>,
    ) -> Self {
        Self {
            context: HandlerContext {
                irc,
                telegram,
                shows,
            },
            tasks: TaskTracker::new(),
        }
    }

    /// Start the handler for `command` in the background. Returns false for unknown tokens.
    pub fn dispatch(&self, command: TriggerCommand, scope: Scope) -> bool {
        let table = match scope {
            Scope::Shared => SHARED_TRIGGERS,
            Scope::Admin => ADMIN_TRIGGERS,
        };
        let Some(action) = table
            .iter()
            .find(|(token, _)| *token == command.token)
            .map(|(_, action)| *action)
        else {
            debug!("Ignoring unknown trigger {}", command.token);
            return false;
        };

        info!("Running trigger {} {:?}", command.token, command.argv);
        let context = self.context.clone();
        self.tasks.spawn(async move {
            let outcome = AssertUnwindSafe(context.run(action, &command))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                error!("Trigger {} panicked", command.token);
            }
        });
        true
    }

    /// Wait for every running handler to finish
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

fn or_tba(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("TBA")
}

fn episode_line(label: &str, episode: &Episode) -> String {
    let season = episode.season.map(|s| s.to_string()).unwrap_or_else(|| "?".to_string());
    let number = episode.number.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string());
    format!(
        "{K}14{B}{label} {B}{K}15-- {airdate} {K}08({K}14{season}{K}08x{K}14{number}{K}08){K}14 - {name}",
        K = COLOR,
        B = BOLD,
        label = label,
        airdate = or_tba(episode.airdate.as_deref()),
        season = season,
        number = number,
        name = or_tba(episode.name.as_deref()),
    )
}

fn countdown(airstamp: Option<&str>, now: DateTime<Utc>) -> Option<String> {
    let airing = DateTime::parse_from_rfc3339(airstamp?).ok()?;
    let left = airing.with_timezone(&Utc) - now;
    if left.num_seconds() < 0 {
        return None;
    }
    Some(format!(
        "{K}08{d}{K}14 days {K}08{h}{K}14 hours {K}08{m}{K}14 minutes {K}08{s}{K}14 seconds",
        K = COLOR,
        d = left.num_days(),
        h = left.num_hours() % 24,
        m = left.num_minutes() % 60,
        s = left.num_seconds() % 60,
    ))
}

/// Headline, previous episode and next episode with a countdown
pub fn show_lines(show: &Show, now: DateTime<Utc>) -> [String; 3] {
    let (days, time) = match &show.schedule {
        Some(schedule) => (comma_list(&schedule.days), schedule.time.clone().unwrap_or_default()),
        None => (String::new(), String::new()),
    };
    let headline = format!(
        "{K}14{name} {K}15-- {days} {time} {K}08({K}14{status}{K}08) ({K}14{network}{K}08)",
        K = COLOR,
        name = show.name,
        days = days,
        time = time,
        status = or_tba(show.status.as_deref()),
        network = or_tba(show.network_name()),
    );

    let previous = match &show.previous_episode {
        Some(episode) => episode_line("Prev Episode", episode),
        None => format!("{K}14{B}Prev Episode {B}{K}15-- none", K = COLOR, B = BOLD),
    };

    let next = match &show.next_episode {
        Some(episode) => {
            let mut line = episode_line("Next Episode", episode);
            if let Some(left) = countdown(episode.airstamp.as_deref(), now) {
                line.push_str(" - Airing in: ");
                line.push_str(&left);
            }
            line
        }
        None => format!(
            "{K}14{B}Next Episode {B}{K}15-- not yet scheduled",
            K = COLOR,
            B = BOLD
        ),
    };

    [headline, previous, next]
}
