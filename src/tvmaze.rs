use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::TvMazeConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Show {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub network: Option<Network>,
    #[serde(default, rename = "webChannel")]
    pub web_channel: Option<Network>,
    #[serde(default, rename = "_links")]
    pub links: Option<Links>,
    /// Filled in after the search by following `_links`
    #[serde(skip)]
    pub previous_episode: Option<Episode>,
    #[serde(skip)]
    pub next_episode: Option<Episode>,
}

impl Show {
    /// Broadcast network, or the streaming service for web-only shows
    pub fn network_name(&self) -> Option<&str> {
        self.network
            .as_ref()
            .or(self.web_channel.as_ref())
            .and_then(|n| n.name.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub days: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Network {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub previousepisode: Option<Link>,
    #[serde(default)]
    pub nextepisode: Option<Link>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Episode {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub season: Option<u32>,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub airdate: Option<String>,
    /// RFC 3339 timestamp
    #[serde(default)]
    pub airstamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    show: Show,
}

/// Show metadata lookup used by the `!ep` trigger
#[async_trait]
pub trait ShowLookup: Send + Sync {
    /// Best match for `query`, with previous/next episodes filled in where known.
    /// The error message is shown to users as-is.
    async fn search(&self, query: &str) -> Result<Show>;
}

pub struct TvMazeClient {
    http: reqwest::Client,
    config: TvMazeConfig,
}

impl TvMazeClient {
    pub fn new(config: TvMazeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request.send().await.context("Failed to reach TVMaze")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!("TVMaze API error ({}): {}", status, error_body);
        }

        response
            .json()
            .await
            .context("Failed to parse TVMaze response")
    }

    async fn episode(&self, link: Option<&Link>) -> Option<Episode> {
        let href = link.map(|l| l.href.trim()).filter(|h| !h.is_empty())?;
        match self.get_json(self.http.get(href)).await {
            Ok(episode) => Some(episode),
            Err(e) => {
                warn!("Failed to fetch episode {}: {:#}", href, e);
                None
            }
        }
    }
}

#[async_trait]
impl ShowLookup for TvMazeClient {
    async fn search(&self, query: &str) -> Result<Show> {
        let url = format!(
            "{}/search/shows",
            self.config.api_url.trim_end_matches('/')
        );
        debug!("Searching TVMaze for '{}'", query);

        let results: Vec<SearchResult> = self
            .get_json(self.http.get(&url).query(&[("q", query)]))
            .await?;

        let Some(SearchResult { mut show }) = results.into_iter().next() else {
            bail!("No results found on TVMaze.");
        };

        let links = show.links.clone().unwrap_or_default();
        show.previous_episode = self.episode(links.previousepisode.as_ref()).await;
        show.next_episode = self.episode(links.nextepisode.as_ref()).await;

        Ok(show)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> TvMazeClient {
        TvMazeClient::new(TvMazeConfig {
            api_url: server.uri(),
        })
    }

    #[tokio::test]
    async fn test_search_follows_episode_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/shows"))
            .and(query_param("q", "Breaking Bad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "score": 17.5,
                "show": {
                    "id": 169,
                    "name": "Breaking Bad",
                    "status": "Ended",
                    "schedule": {"time": "22:00", "days": ["Sunday"]},
                    "network": {"id": 20, "name": "AMC"},
                    "_links": {
                        "previousepisode": {"href": format!("{}/episodes/12253", server.uri())},
                        "nextepisode": {"href": format!("{}/episodes/99999", server.uri())}
                    }
                }
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/episodes/12253"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Felina", "season": 5, "number": 16,
                "airdate": "2013-09-29", "airstamp": "2013-09-30T02:00:00+00:00"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/episodes/99999"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let show = client_for(&server).search("Breaking Bad").await.unwrap();
        assert_eq!(show.name, "Breaking Bad");
        assert_eq!(show.network_name(), Some("AMC"));
        let prev = show.previous_episode.unwrap();
        assert_eq!(prev.name.as_deref(), Some("Felina"));
        assert_eq!(prev.season, Some(5));
        assert!(show.next_episode.is_none());
    }

    #[tokio::test]
    async fn test_no_results_is_user_facing_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/shows"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let err = client_for(&server).search("zzzz").await.unwrap_err();
        assert_eq!(err.to_string(), "No results found on TVMaze.");
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/shows"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client_for(&server).search("anything").await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_web_channel_used_when_no_network() {
        let show: Show = serde_json::from_value(json!({
            "name": "Stranger Things",
            "network": null,
            "webChannel": {"name": "Netflix"}
        }))
        .unwrap();
        assert_eq!(show.network_name(), Some("Netflix"));
    }
}
