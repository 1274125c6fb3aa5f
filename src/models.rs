use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Partition all tracked series are stored under.
pub const SERIES_PARTITION: &str = "Series";

/// A show the system monitors for new episodes. Row-keyed by the Trakt id;
/// `is_running` is a snapshot taken at add-time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TrackedSeries {
    pub id: u32,
    pub name: String,
    pub is_running: bool,
}

/// One feed entry, computed per aggregation run and never persisted.
/// `season_image_link` is shared by every episode of the same season.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedEpisode {
    pub show_name: String,
    pub season: i32,
    pub number: i32,
    pub title: String,
    pub air_date: DateTime<Utc>,
    pub episode_image_link: String,
    pub season_image_link: String,
}
