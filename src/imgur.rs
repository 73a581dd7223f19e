use std::future::Future;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::prelude::*;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::ImgurConfig;

/// Upload and delete are each tried this many times, refreshing the token in between
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub id: String,
    pub url: String,
}

/// Where photos from Telegram are hosted so IRC users can open them
#[async_trait]
pub trait ImageHost: Send + Sync {
    async fn upload(&self, bytes: &[u8]) -> Result<UploadedImage>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: ImageData,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    id: String,
    link: String,
}

pub struct ImgurClient {
    http: reqwest::Client,
    config: ImgurConfig,
    access_token: RwLock<Option<String>>,
    /// Uploads awaiting deletion, only kept when a retention window is configured
    uploads: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl ImgurClient {
    pub fn new(config: ImgurConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            access_token: RwLock::new(None),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn retention(&self) -> Option<Duration> {
        self.config
            .retention_minutes
            .map(|minutes| Duration::minutes(minutes as i64))
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.with_token("delete", |token| self.try_delete(token, id))
            .await
    }

    /// Delete every recorded upload older than the retention window.
    /// Returns how many were deleted. Failed deletions are retried next time.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> usize {
        let Some(retention) = self.retention() else {
            return 0;
        };

        let expired: Vec<String> = {
            let uploads = self.uploads.lock().await;
            uploads
                .iter()
                .filter(|(_, at)| *at + retention <= now)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut deleted = Vec::new();
        for id in &expired {
            match self.delete(id).await {
                Ok(()) => deleted.push(id.clone()),
                Err(e) => warn!("Failed to delete Imgur image {}: {:#}", id, e),
            }
        }

        if !deleted.is_empty() {
            self.uploads
                .lock()
                .await
                .retain(|(id, _)| !deleted.contains(id));
            info!("Deleted {} expired Imgur upload(s)", deleted.len());
        }
        deleted.len()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Run `op` with a valid access token, refreshing it after every failure.
    async fn with_token<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let result = match self.token().await {
                Ok(token) => op(token).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("Imgur {} attempt {} failed: {:#}", what, attempt, e);
                    last_error = Some(e);
                    // The token may have expired
                    self.access_token.write().await.take();
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("no attempts made")))
            .with_context(|| format!("Retry limit for Imgur {} exceeded", what))
    }

    async fn token(&self) -> Result<String> {
        if let Some(token) = self.access_token.read().await.clone() {
            return Ok(token);
        }

        debug!("Requesting new Imgur access token");
        let response = self
            .http
            .post(self.endpoint("/oauth2/token"))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", self.config.refresh_token.as_str()),
            ])
            .send()
            .await
            .context("Failed to request Imgur access token")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!("Imgur token error ({}): {}", status, error_body);
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse Imgur token response")?;

        *self.access_token.write().await = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    async fn try_upload(&self, token: String, encoded: &str) -> Result<UploadedImage> {
        let response = self
            .http
            .post(self.endpoint("/3/image"))
            .bearer_auth(token)
            .form(&[("image", encoded)])
            .send()
            .await
            .context("Failed to send image to Imgur")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!("Imgur upload error ({}): {}", status, error_body);
        }

        let image: ImageResponse = response
            .json()
            .await
            .context("Failed to parse Imgur upload response")?;

        Ok(UploadedImage {
            id: image.data.id,
            url: image.data.link,
        })
    }

    async fn try_delete(&self, token: String, id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.endpoint(&format!("/3/image/{}", id)))
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to send delete to Imgur")?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!("Imgur image {} is already gone", id);
            return Ok(());
        }
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!("Imgur delete error ({}): {}", status, error_body);
        }
        Ok(())
    }
}

#[async_trait]
impl ImageHost for ImgurClient {
    async fn upload(&self, bytes: &[u8]) -> Result<UploadedImage> {
        let encoded = BASE64_STANDARD.encode(bytes);
        let image = self
            .with_token("upload", |token| self.try_upload(token, &encoded))
            .await?;

        info!("Uploaded image to Imgur: {}", image.url);
        if self.retention().is_some() {
            self.uploads.lock().await.push((image.id.clone(), Utc::now()));
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, retention_minutes: Option<u64>) -> ImgurClient {
        ImgurClient::new(ImgurConfig {
            client_id: "cid".to_string(),
            client_secret: "csecret".to_string(),
            refresh_token: "refresh".to_string(),
            api_url: server.uri(),
            retention_minutes,
        })
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "fresh"})),
            )
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_upload_fetches_token_then_posts_base64() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/3/image"))
            .and(header("authorization", "Bearer fresh"))
            .and(body_string_contains("image=AQID"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": "abc123", "link": "https://i.imgur.com/abc123.jpg"},
                "success": true,
                "status": 200
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let image = client.upload(&[1, 2, 3]).await.unwrap();
        assert_eq!(
            image,
            UploadedImage {
                id: "abc123".to_string(),
                url: "https://i.imgur.com/abc123.jpg".to_string(),
            }
        );

        // Token is cached for the second upload
        client.upload(&[1, 2, 3]).await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_gives_up_after_three_attempts() {
        let server = MockServer::start().await;
        mount_token(&server, 3).await;
        Mock::given(method("POST"))
            .and(path("/3/image"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server, None).upload(&[9]).await.unwrap_err();
        assert!(err.to_string().contains("Retry limit"));
    }

    #[tokio::test]
    async fn test_delete_expired_removes_old_uploads() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/3/image"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": "old", "link": "https://i.imgur.com/old.png"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/3/image/old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Some(60));
        client.upload(&[1]).await.unwrap();

        assert_eq!(client.delete_expired(Utc::now()).await, 0);
        let later = Utc::now() + Duration::minutes(61);
        assert_eq!(client.delete_expired(later).await, 1);
        assert_eq!(client.delete_expired(later).await, 0);
    }

    #[tokio::test]
    async fn test_delete_expired_forgets_images_already_gone() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/3/image"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": "vanished", "link": "https://i.imgur.com/vanished.png"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/3/image/vanished"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Some(1));
        client.upload(&[1]).await.unwrap();

        let later = Utc::now() + Duration::minutes(2);
        assert_eq!(client.delete_expired(later).await, 1);
        assert!(client.uploads.lock().await.is_empty());
        assert_eq!(client.delete_expired(later).await, 0);
    }

    #[tokio::test]
    async fn test_uploads_not_tracked_without_retention() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/3/image"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": "keep", "link": "https://i.imgur.com/keep.png"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        client.upload(&[1]).await.unwrap();
        assert!(client.uploads.lock().await.is_empty());
        assert_eq!(client.delete_expired(Utc::now() + Duration::days(365)).await, 0);
    }
}
