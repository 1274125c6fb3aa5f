use crate::models::TrackedSeries;
use crate::store::SeriesStore;
use crate::trakt::TraktApi;
use anyhow::Result;
use std::fmt;
use tracing::info;

/// Trakt statuses that mark a show as no longer running.
const ENDED_STATUSES: [&str; 2] = ["canceled", "ended"];

/// Raised when an identifier matches nothing upstream; the add-show handler
/// downcasts to this to answer 404 instead of 502.
#[derive(Debug)]
pub struct ShowNotFound(pub String);

impl fmt::Display for ShowNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No show found for '{}'", self.0)
    }
}

impl std::error::Error for ShowNotFound {}

/// Resolves a user-supplied identifier to a show and stores it for tracking.
/// Alias search first, exact-id lookup as fallback, first candidate wins.
pub async fn add_series(
    store: &dyn SeriesStore,
    trakt: &dyn TraktApi,
    identifier: &str,
) -> Result<String> {
    let mut candidates = trakt.search_shows(identifier).await?;
    if candidates.is_empty() {
        let show = trakt.get_show(identifier).await?;
        if show.ids.trakt != 0 {
            candidates.push(show);
        }
    }

    let show = candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::Error::new(ShowNotFound(identifier.to_string())))?;

    let series = TrackedSeries {
        id: show.ids.trakt,
        name: show.title,
        is_running: !show
            .status
            .as_deref()
            .map(|status| ENDED_STATUSES.contains(&status))
            .unwrap_or(false),
    };
    info!("Tracking '{}' (trakt id {})", series.name, series.id);
    store.save(&series).await?;

    Ok(series.name)
}
