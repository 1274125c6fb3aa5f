use crate::models::{AggregatedEpisode, TrackedSeries};
use crate::store::{SeriesFilter, SeriesStore};
use crate::tmdb::ArtworkApi;
use crate::trakt::{Episode, Season, TraktApi};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tracing::warn;

const MAX_CONCURRENT_LOOKUPS: usize = 16;

/// Season artwork lookups shared within a single aggregation run. Each
/// (tmdb id, season) key resolves at most once; concurrent requesters await
/// the same in-flight call. Never reused across runs.
struct SeasonImageCache {
    cells: Mutex<HashMap<(u32, i32), Arc<OnceCell<String>>>>,
}

impl SeasonImageCache {
    fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    async fn get_or_fetch(&self, tmdb: &dyn ArtworkApi, tmdb_id: u32, season: i32) -> String {
        let cell = {
            let mut cells = self.cells.lock().await;
            cells.entry((tmdb_id, season)).or_default().clone()
        };
        cell.get_or_init(|| tmdb.season_image(tmdb_id, season))
            .await
            .clone()
    }
}

/// A tracked series resolved to its latest aired season plus the secondary
/// TMDB id used for artwork.
struct ResolvedSeries {
    name: String,
    tmdb_id: Option<u32>,
    season: Season,
}

/// Aggregates every newly aired episode of the tracked, still-running series
/// into feed entries annotated with artwork.
///
/// Per-series and per-episode lookups fan out concurrently (bounded by a
/// semaphore) and join back in; a failure in one item is logged and skipped,
/// never aborting the run. Only a store failure surfaces as an error.
pub async fn find_latest_episodes(
    store: &dyn SeriesStore,
    trakt: &Arc<dyn TraktApi>,
    tmdb: &Arc<dyn ArtworkApi>,
    from_date: DateTime<Utc>,
) -> Result<Vec<AggregatedEpisode>> {
    let tracked = store.query(&SeriesFilter::running()).await?;
    // One timestamp for the whole run; every episode is filtered against it.
    let now = Utc::now();
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_LOOKUPS));

    let mut season_handles = Vec::with_capacity(tracked.len());
    for series in tracked {
        let trakt = trakt.clone();
        let semaphore = semaphore.clone();
        season_handles.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return None,
            };
            match resolve_series(trakt.as_ref(), &series).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!("Skipping series '{}': {:#}", series.name, e);
                    None
                }
            }
        }));
    }

    let mut resolved = Vec::new();
    for handle in season_handles {
        match handle.await {
            Ok(Some(series)) => resolved.push(series),
            Ok(None) => {}
            Err(e) => warn!("Series resolution task failed: {}", e),
        }
    }

    let cache = Arc::new(SeasonImageCache::new());
    let mut episode_handles = Vec::new();
    for series in resolved {
        let episodes: Vec<Episode> = series
            .season
            .episodes
            .iter()
            .filter(|e| aired_within(e.first_aired, from_date, now))
            .cloned()
            .collect();
        if episodes.is_empty() {
            continue;
        }
        for episode in episodes {
            let tmdb = tmdb.clone();
            let cache = cache.clone();
            let semaphore = semaphore.clone();
            let show_name = series.name.clone();
            let tmdb_id = series.tmdb_id;
            episode_handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                aggregate_episode(tmdb.as_ref(), &cache, show_name, tmdb_id, episode).await
            }));
        }
    }

    let mut episodes = Vec::with_capacity(episode_handles.len());
    for handle in episode_handles {
        match handle.await {
            Ok(episode) => episodes.push(episode),
            Err(e) => warn!("Episode aggregation task failed: {}", e),
        }
    }
    Ok(episodes)
}

async fn resolve_series(
    trakt: &dyn TraktApi,
    series: &TrackedSeries,
) -> Result<Option<ResolvedSeries>> {
    let id = series.id.to_string();
    let (show, seasons) = tokio::try_join!(trakt.get_show(&id), trakt.get_seasons(&id))?;
    // Upcoming shows have no aired season yet and drop out here.
    Ok(latest_aired_season(seasons).map(|season| ResolvedSeries {
        name: series.name.clone(),
        tmdb_id: show.ids.tmdb,
        season,
    }))
}

/// Highest-numbered season with a known first-aired date.
fn latest_aired_season(seasons: Vec<Season>) -> Option<Season> {
    seasons
        .into_iter()
        .filter(|season| season.first_aired.is_some())
        .max_by_key(|season| season.number.unwrap_or(0))
}

/// Inclusive on both bounds; episodes with no air date never match.
fn aired_within(aired: Option<DateTime<Utc>>, from: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    matches!(aired, Some(date) if date >= from && date <= now)
}

async fn aggregate_episode(
    tmdb: &dyn ArtworkApi,
    cache: &SeasonImageCache,
    show_name: String,
    tmdb_id: Option<u32>,
    episode: Episode,
) -> AggregatedEpisode {
    let (episode_image_link, season_image_link) = match (tmdb_id, episode.season) {
        (Some(tmdb_id), Some(season)) => {
            tokio::join!(
                tmdb.episode_image(tmdb_id, season, episode.number.unwrap_or(0)),
                cache.get_or_fetch(tmdb, tmdb_id, season),
            )
        }
        _ => (String::new(), String::new()),
    };

    AggregatedEpisode {
        show_name,
        season: episode.season.unwrap_or(0),
        number: episode.number.unwrap_or(0),
        title: episode.title.unwrap_or_default(),
        air_date: episode.first_aired.unwrap_or(DateTime::<Utc>::MIN_UTC),
        episode_image_link,
        season_image_link,
    }
}
