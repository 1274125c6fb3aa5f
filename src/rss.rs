use crate::models::AggregatedEpisode;
use sha2::{Digest, Sha256};

/// Renders the aggregated episodes as an RSS 2.0 document. Item order follows
/// the input; the aggregator makes no ordering promise and the feed keeps it
/// that way.
pub fn render(episodes: &[AggregatedEpisode], title: &str, link: &str) -> String {
    let items = episodes
        .iter()
        .map(render_item)
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
    <channel>
        <title>{}</title>
        <description>TV shows episodes RSS feed</description>
        <link>{}</link>
        <ttl>240</ttl>
{}
    </channel>
</rss>
"#,
        escape(title),
        escape(link),
        items
    )
}

fn render_item(episode: &AggregatedEpisode) -> String {
    // Best-effort link: episode still, else the season poster.
    let link = if episode.episode_image_link.is_empty() {
        &episode.season_image_link
    } else {
        &episode.episode_image_link
    };

    let mut item = format!(
        r#"        <item>
            <title>{} {}x{}</title>
            <description>{}</description>
            <link>{}</link>
            <guid isPermaLink="false">{}</guid>
            <pubDate>{}</pubDate>"#,
        escape(&episode.show_name),
        episode.season,
        episode.number,
        escape(&episode.title),
        escape(link),
        guid(episode),
        episode.air_date.format("%a, %d %b %Y %H:%M:%S %z"),
    );

    if let Some(body) = artwork_body(episode) {
        item.push_str(&format!(
            "\n            <content:encoded><![CDATA[{body}]]></content:encoded>"
        ));
    }
    item.push_str("\n        </item>");
    item
}

/// Opaque per-episode token; stable across runs so readers dedupe correctly.
fn guid(episode: &AggregatedEpisode) -> String {
    let mut hasher = Sha256::new();
    hasher.update(episode.show_name.as_bytes());
    hasher.update(episode.season.to_be_bytes());
    hasher.update(episode.number.to_be_bytes());
    hex::encode(hasher.finalize())
}

fn artwork_body(episode: &AggregatedEpisode) -> Option<String> {
    let mut tags = Vec::new();
    if !episode.episode_image_link.is_empty() {
        tags.push(format!(r#"<img src="{}"/>"#, episode.episode_image_link));
    }
    if !episode.season_image_link.is_empty() {
        tags.push(format!(r#"<img src="{}"/>"#, episode.season_image_link));
    }
    if tags.is_empty() {
        None
    } else {
        Some(tags.join(""))
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn episode() -> AggregatedEpisode {
        AggregatedEpisode {
            show_name: "Mulder & Scully".to_string(),
            season: 2,
            number: 3,
            title: "<Pilot>".to_string(),
            air_date: Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap(),
            episode_image_link: "https://img.example/still.jpg".to_string(),
            season_image_link: "https://img.example/poster.jpg".to_string(),
        }
    }

    #[test]
    fn item_title_and_text_are_escaped() {
        let feed = render(&[episode()], "TV shows", "https://example.test/feed");
        assert!(feed.contains("<title>Mulder &amp; Scully 2x3</title>"));
        assert!(feed.contains("<description>&lt;Pilot&gt;</description>"));
    }

    #[test]
    fn pub_date_is_rfc822() {
        let feed = render(&[episode()], "TV shows", "https://example.test/feed");
        assert!(feed.contains("<pubDate>Wed, 01 May 2024 20:00:00 +0000</pubDate>"));
    }

    #[test]
    fn guid_is_stable_and_distinct_per_episode() {
        let first = episode();
        let mut second = episode();
        second.number = 4;
        assert_eq!(guid(&first), guid(&episode()));
        assert_ne!(guid(&first), guid(&second));
    }

    #[test]
    fn link_falls_back_to_season_poster() {
        let mut degraded = episode();
        degraded.episode_image_link = String::new();
        let feed = render(&[degraded], "TV shows", "https://example.test/feed");
        assert!(feed.contains("<link>https://img.example/poster.jpg</link>"));
    }

    #[test]
    fn artwork_block_is_omitted_when_no_images_resolved() {
        let mut bare = episode();
        bare.episode_image_link = String::new();
        bare.season_image_link = String::new();
        let feed = render(&[bare], "TV shows", "https://example.test/feed");
        assert!(!feed.contains("content:encoded><![CDATA["));
    }
}
