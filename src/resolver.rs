//! Track resolution
//!
//! Turns a free-text request into a playable [`Track`]. A syntactically
//! valid http(s) URL resolves directly; anything else becomes a top-1
//! lookup against the configured search provider. Resolution has no side
//! effects beyond the provider call and never touches session state.

use crate::error::{Error, Result};
use crate::gateway::UserId;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A resolved, playable track. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    /// Display title
    pub title: String,
    /// Opaque reference sufficient to open a stream
    pub stream_ref: String,
    /// Who asked for it
    pub requested_by: UserId,
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    title: String,
    stream_url: String,
}

/// Resolves free-text queries and direct URLs into tracks
pub struct TrackResolver {
    http: reqwest::Client,
    search_url: String,
}

impl TrackResolver {
    pub fn new(search_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            search_url,
        }
    }

    /// Resolve `query` into a track on behalf of `requested_by`.
    ///
    /// Returns [`Error::NotFound`] when a search yields no results and
    /// [`Error::Resolution`] when the provider call itself fails.
    pub async fn resolve(&self, query: &str, requested_by: UserId) -> Result<Track> {
        if let Some(track) = direct_url(query, requested_by) {
            debug!("resolved direct URL: {}", track.title);
            return Ok(track);
        }
        self.search(query, requested_by).await
    }

    async fn search(&self, query: &str, requested_by: UserId) -> Result<Track> {
        let resp = self
            .http
            .get(&self.search_url)
            .query(&[("q", query), ("limit", "1")])
            .send()
            .await
            .map_err(|e| Error::Resolution(format!("search request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Resolution(format!(
                "search provider returned {}",
                resp.status()
            )));
        }

        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Resolution(format!("malformed search response: {}", e)))?;

        let hit = body
            .results
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(query.to_string()))?;

        debug!("resolved \"{}\" -> {}", query, hit.title);
        Ok(Track {
            title: hit.title,
            stream_ref: hit.stream_url,
            requested_by,
        })
    }
}

/// Direct-URL fast path: http(s) URLs only.
///
/// The title is the last non-empty path segment, falling back to the raw
/// URL when the path has none.
fn direct_url(query: &str, requested_by: UserId) -> Option<Track> {
    let url = reqwest::Url::parse(query).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    let title = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .unwrap_or_else(|| query.to_string());

    Some(Track {
        title,
        stream_ref: query.to_string(),
        requested_by,
    })
}
