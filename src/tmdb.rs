use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::env;
use tracing::debug;

const TMDB_BASE: &str = "https://api.themoviedb.org/3";
const IMAGE_BASE: &str = "https://image.tmdb.org/t/p/original";

/// Season/episode artwork provider. Artwork is decorative, so the contract is
/// best effort: every failure mode degrades to an empty string, never an error.
#[async_trait]
pub trait ArtworkApi: Send + Sync {
    async fn season_image(&self, tmdb_id: u32, season: i32) -> String;
    async fn episode_image(&self, tmdb_id: u32, season: i32, episode: i32) -> String;
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SeasonImages {
    poster_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpisodeImages {
    still_path: Option<String>,
}

impl TmdbClient {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("TMDB_API_KEY").context("TMDB_API_KEY not set")?;
        Ok(Self {
            client: Client::new(),
            api_key,
        })
    }

    async fn fetch_path<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        extract: impl FnOnce(T) -> Option<String>,
    ) -> String {
        let res = match self.client.get(url).send().await {
            Ok(res) => res,
            Err(e) => {
                debug!("Artwork request failed: {}", e);
                return String::new();
            }
        };
        if !res.status().is_success() {
            debug!("Artwork request returned {}", res.status());
            return String::new();
        }
        match res.json::<T>().await {
            Ok(payload) => extract(payload)
                .map(|p| format!("{IMAGE_BASE}{p}"))
                .unwrap_or_default(),
            Err(e) => {
                debug!("Artwork payload parse failed: {}", e);
                String::new()
            }
        }
    }
}

#[async_trait]
impl ArtworkApi for TmdbClient {
    async fn season_image(&self, tmdb_id: u32, season: i32) -> String {
        let url = format!(
            "{TMDB_BASE}/tv/{tmdb_id}/season/{season}?api_key={}",
            self.api_key
        );
        self.fetch_path(&url, |images: SeasonImages| images.poster_path)
            .await
    }

    async fn episode_image(&self, tmdb_id: u32, season: i32, episode: i32) -> String {
        let url = format!(
            "{TMDB_BASE}/tv/{tmdb_id}/season/{season}/episode/{episode}?api_key={}",
            self.api_key
        );
        self.fetch_path(&url, |images: EpisodeImages| images.still_path)
            .await
    }
}
