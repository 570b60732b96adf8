//! Platform gateway boundary
//!
//! Everything jamroom needs from the hosting platform goes through the
//! [`Gateway`] trait: provisioning/deleting the private channel pair and
//! opening media streams into a session's output channel. The production
//! implementation talks HTTP to the platform API; tests substitute an
//! in-memory double.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Community (shared space) identifier assigned by the platform
pub type CommunityId = u64;
/// Platform user identifier
pub type UserId = u64;
/// Platform channel identifier
pub type ChannelId = u64;

/// Kind of ephemeral channel provisioned for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Interactive text channel (request intake)
    Text,
    /// Media-output channel (voice-equivalent)
    Voice,
}

/// The private channel pair owned by one session
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelPair {
    pub text: ChannelId,
    pub voice: ChannelId,
}

/// Signals emitted by an open output stream
#[derive(Debug, Clone)]
pub enum StreamSignal {
    /// The track played to completion
    Finished,
    /// The stream failed mid-track; not fatal to the session
    Failed(String),
    /// The output channel is gone; the session must be torn down
    DeviceLost(String),
}

/// Handle to one open media stream
#[async_trait]
pub trait OutputStream: Send + Sync {
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
    /// Stop output and release the stream. Must be safe to call more than once.
    async fn stop(&self) -> Result<()>;
}

/// Platform operations consumed by the session registry and player
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    /// Allocate the private text + voice channel pair for a new session
    async fn create_channel_pair(
        &self,
        community: CommunityId,
        owner: UserId,
    ) -> Result<ChannelPair>;

    /// Delete one channel. Deleting an already-deleted channel is an error
    /// the caller is expected to swallow during teardown.
    async fn delete_channel(&self, channel: ChannelId) -> Result<()>;

    /// Open a media stream into `channel`. Completion and failure are
    /// reported asynchronously through `signals`; the returned handle
    /// controls pause/resume/stop.
    async fn open_stream(
        &self,
        channel: ChannelId,
        stream_ref: &str,
        signals: mpsc::Sender<StreamSignal>,
    ) -> Result<Box<dyn OutputStream>>;
}

// ========================================
// HTTP implementation
// ========================================

#[derive(Serialize)]
struct CreateChannelRequest {
    community_id: CommunityId,
    owner_id: UserId,
    kind: ChannelKind,
}

#[derive(Deserialize)]
struct CreateChannelResponse {
    channel_id: ChannelId,
}

#[derive(Serialize)]
struct OpenStreamRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct OpenStreamResponse {
    stream_id: u64,
}

#[derive(Deserialize)]
struct StreamStatusResponse {
    status: String,
    #[serde(default)]
    detail: Option<String>,
}

/// Gateway implementation over the platform HTTP API
pub struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn create_channel(
        &self,
        community: CommunityId,
        owner: UserId,
        kind: ChannelKind,
    ) -> Result<ChannelId> {
        let resp = self
            .http
            .post(format!("{}/api/channels", self.base_url))
            .json(&CreateChannelRequest {
                community_id: community,
                owner_id: owner,
                kind,
            })
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("channel create request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Gateway(format!(
                "channel create rejected: {}",
                resp.status()
            )));
        }

        let body: CreateChannelResponse = resp
            .json()
            .await
            .map_err(|e| Error::Gateway(format!("malformed channel create response: {}", e)))?;
        Ok(body.channel_id)
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn create_channel_pair(
        &self,
        community: CommunityId,
        owner: UserId,
    ) -> Result<ChannelPair> {
        let text = self.create_channel(community, owner, ChannelKind::Text).await?;

        let voice = match self.create_channel(community, owner, ChannelKind::Voice).await {
            Ok(id) => id,
            Err(e) => {
                // Half-allocated pair: roll the text channel back
                if let Err(del) = self.delete_channel(text).await {
                    warn!("rollback of text channel {} failed: {}", text, del);
                }
                return Err(e);
            }
        };

        Ok(ChannelPair { text, voice })
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<()> {
        let resp = self
            .http
            .delete(format!("{}/api/channels/{}", self.base_url, channel))
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("channel delete request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Gateway(format!(
                "channel delete rejected: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn open_stream(
        &self,
        channel: ChannelId,
        stream_ref: &str,
        signals: mpsc::Sender<StreamSignal>,
    ) -> Result<Box<dyn OutputStream>> {
        let resp = self
            .http
            .post(format!("{}/api/channels/{}/streams", self.base_url, channel))
            .json(&OpenStreamRequest { url: stream_ref })
            .send()
            .await
            .map_err(|e| Error::Playback(format!("stream open request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Playback(format!(
                "stream open rejected: {}",
                resp.status()
            )));
        }

        let body: OpenStreamResponse = resp
            .json()
            .await
            .map_err(|e| Error::Playback(format!("malformed stream open response: {}", e)))?;

        let stream = HttpStream {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            stream_id: body.stream_id,
            poller: StdMutex::new(None),
        };
        stream.spawn_poller(signals);
        Ok(Box::new(stream))
    }
}

/// One open stream on the platform, with a background completion poller
struct HttpStream {
    http: reqwest::Client,
    base_url: String,
    stream_id: u64,
    poller: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HttpStream {
    fn spawn_poller(&self, signals: mpsc::Sender<StreamSignal>) {
        let http = self.http.clone();
        let url = format!("{}/api/streams/{}", self.base_url, self.stream_id);

        let handle = tokio::spawn(async move {
            let mut consecutive_failures = 0u32;
            let mut tick = tokio::time::interval(Duration::from_secs(1));

            loop {
                tick.tick().await;
                if signals.is_closed() {
                    break;
                }

                let status = match http.get(&url).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        consecutive_failures = 0;
                        match resp.json::<StreamStatusResponse>().await {
                            Ok(s) => s,
                            Err(e) => {
                                debug!("unparseable stream status: {}", e);
                                continue;
                            }
                        }
                    }
                    Ok(resp) => {
                        // Stream or channel no longer known to the platform
                        consecutive_failures += 1;
                        if consecutive_failures >= 3 {
                            let _ = signals
                                .send(StreamSignal::DeviceLost(format!(
                                    "stream status {}",
                                    resp.status()
                                )))
                                .await;
                            break;
                        }
                        continue;
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        if consecutive_failures >= 3 {
                            let _ = signals
                                .send(StreamSignal::DeviceLost(e.to_string()))
                                .await;
                            break;
                        }
                        continue;
                    }
                };

                match status.status.as_str() {
                    "finished" => {
                        let _ = signals.send(StreamSignal::Finished).await;
                        break;
                    }
                    "failed" => {
                        let detail = status.detail.unwrap_or_else(|| "stream failed".into());
                        let _ = signals.send(StreamSignal::Failed(detail)).await;
                        break;
                    }
                    _ => {} // playing or paused
                }
            }
        });

        *self.poller.lock().unwrap() = Some(handle);
    }

    async fn control(&self, action: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!(
                "{}/api/streams/{}/{}",
                self.base_url, self.stream_id, action
            ))
            .send()
            .await
            .map_err(|e| Error::Playback(format!("stream {} failed: {}", action, e)))?;

        if !resp.status().is_success() {
            return Err(Error::Playback(format!(
                "stream {} rejected: {}",
                action,
                resp.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl OutputStream for HttpStream {
    async fn pause(&self) -> Result<()> {
        self.control("pause").await
    }

    async fn resume(&self) -> Result<()> {
        self.control("resume").await
    }

    async fn stop(&self) -> Result<()> {
        if let Some(poller) = self.poller.lock().unwrap().take() {
            poller.abort();
        }

        let resp = self
            .http
            .delete(format!("{}/api/streams/{}", self.base_url, self.stream_id))
            .send()
            .await
            .map_err(|e| Error::Playback(format!("stream stop failed: {}", e)))?;

        // 404 means the stream already ended; stop is idempotent
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Playback(format!(
                "stream stop rejected: {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

impl Drop for HttpStream {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.lock().unwrap().take() {
            poller.abort();
        }
    }
}

// ========================================
// Test double
// ========================================
