use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::env;

const TRAKT_BASE: &str = "https://api.trakt.tv";
const TRAKT_API_VERSION: &str = "2";

#[derive(Debug, Clone)]
pub struct TraktClient {
    client: Client,
    client_id: String,
}

/// Show/season/episode metadata provider.
#[async_trait]
pub trait TraktApi: Send + Sync {
    /// Text/alias search. An empty result list is not an error.
    async fn search_shows(&self, query: &str) -> Result<Vec<Show>>;
    /// Show lookup by Trakt id or slug. An unknown id yields the placeholder
    /// show with `ids.trakt == 0` rather than an error; callers test for 0.
    async fn get_show(&self, id: &str) -> Result<Show>;
    async fn get_seasons(&self, id: &str) -> Result<Vec<Season>>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShowIds {
    pub trakt: u32,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub tmdb: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Show {
    pub title: String,
    pub ids: ShowIds,
    #[serde(default)]
    pub status: Option<String>,
}

impl Show {
    pub fn placeholder(slug: &str) -> Self {
        Self {
            title: String::new(),
            ids: ShowIds {
                trakt: 0,
                slug: Some(slug.to_string()),
                tmdb: None,
            },
            status: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Season {
    pub number: Option<i32>,
    pub first_aired: Option<DateTime<Utc>>,
    #[serde(default)]
    pub episodes: Vec<Episode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EpisodeIds {
    pub trakt: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Episode {
    pub season: Option<i32>,
    pub number: Option<i32>,
    pub title: Option<String>,
    pub ids: EpisodeIds,
    pub first_aired: Option<DateTime<Utc>>,
}

impl TraktClient {
    pub fn from_env() -> Result<Self> {
        let client_id = env::var("TRAKT_CLIENT_ID").context("TRAKT_CLIENT_ID not set")?;
        Ok(Self {
            client: Client::new(),
            client_id,
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let res = self
            .client
            .get(url)
            .header("trakt-api-version", TRAKT_API_VERSION)
            .header("trakt-api-key", &self.client_id)
            .send()
            .await
            .context("request failed")?;
        let status = res.status();
        let text = res.text().await.context("reading body failed")?;
        if !status.is_success() {
            return Err(anyhow!("{} -> {} {}", url, status, text));
        }
        let parsed: T = serde_json::from_str(&text).context("JSON parse failed")?;
        Ok(parsed)
    }
}

#[async_trait]
impl TraktApi for TraktClient {
    async fn search_shows(&self, query: &str) -> Result<Vec<Show>> {
        #[derive(Deserialize)]
        struct SearchResult {
            show: Show,
        }

        let url = format!(
            "{TRAKT_BASE}/search/show?query={}&fields=aliases&extended=full",
            urlencoding::encode(query)
        );
        let data: Vec<SearchResult> = self.get_json(&url).await?;
        Ok(data.into_iter().map(|r| r.show).collect())
    }

    async fn get_show(&self, id: &str) -> Result<Show> {
        let url = format!(
            "{TRAKT_BASE}/shows/{}?extended=full",
            urlencoding::encode(id)
        );
        let res = self
            .client
            .get(&url)
            .header("trakt-api-version", TRAKT_API_VERSION)
            .header("trakt-api-key", &self.client_id)
            .send()
            .await
            .context("request failed")?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Show::placeholder(id));
        }
        let status = res.status();
        let text = res.text().await.context("reading body failed")?;
        if !status.is_success() {
            return Err(anyhow!("{} -> {} {}", url, status, text));
        }
        let show: Show = serde_json::from_str(&text).context("JSON parse failed")?;
        Ok(show)
    }

    async fn get_seasons(&self, id: &str) -> Result<Vec<Season>> {
        let url = format!(
            "{TRAKT_BASE}/shows/{}/seasons?extended=full,episodes",
            urlencoding::encode(id)
        );
        self.get_json(&url).await
    }
}
