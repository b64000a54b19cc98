//! Raw-store topic catalog.
//!
//! Each collector declares the columns it writes. The store itself accepts
//! any schema per snapshot; the catalog only lets the CLI warn when a write
//! drifts from what the downstream preprocessing expects.

use serde::Serialize;

pub const FINANCE: &str = "finance";
pub const IGN_RATINGS: &str = "ign_ratings";
pub const PLAYER_COUNTS: &str = "player_counts";
pub const LEADERBOARDS: &str = "leaderboards";
pub const WEB_SEARCH: &str = "web_search";
pub const YOUTUBE_SEARCH: &str = "youtube_search";

/// Blob namespace for leaderboard flag icons, keyed by source URL.
pub const FLAG_BLOB_PREFIX: &str = "flags/";

pub const SENTIMENT_COLUMNS: [&str; 7] = [
    "textblob_polarity",
    "textblob_subjectivity",
    "vader_neg",
    "vader_neu",
    "vader_pos",
    "vader_compound",
    "afinn_score",
];

const REDDIT_POST_BASE: [&str; 9] = [
    "title",
    "body",
    "score",
    "id",
    "subreddit",
    "url",
    "num_comments",
    "created",
    "author",
];

const REDDIT_COMMENT_BASE: [&str; 5] = ["body", "score", "id", "created", "author"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicSpec {
    pub name: String,
    pub description: &'static str,
    pub columns: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_prefix: Option<&'static str>,
}

impl TopicSpec {
    fn fixed(name: &str, description: &'static str, columns: &[&'static str]) -> Self {
        Self {
            name: name.to_string(),
            description,
            columns: columns.to_vec(),
            blob_prefix: None,
        }
    }

    /// Columns present in `actual` but not declared, and declared but missing.
    pub fn drift<S: AsRef<str>>(&self, actual: &[S]) -> (Vec<String>, Vec<String>) {
        let extra = actual
            .iter()
            .map(|c| c.as_ref())
            .filter(|c| !self.columns.contains(c))
            .map(str::to_string)
            .collect();
        let missing = self
            .columns
            .iter()
            .filter(|c| !actual.iter().any(|a| a.as_ref() == **c))
            .map(|c| c.to_string())
            .collect();
        (extra, missing)
    }
}

pub fn reddit_posts_topic(subject: &str) -> String {
    format!("reddit_{}_posts", subject)
}

pub fn reddit_comments_topic(subject: &str) -> String {
    format!("reddit_{}_comments", subject)
}

pub fn flag_blob_name(source_url: &str) -> String {
    format!("{}{}", FLAG_BLOB_PREFIX, source_url)
}

fn with_sentiment(base: &[&'static str]) -> Vec<&'static str> {
    base.iter().chain(SENTIMENT_COLUMNS.iter()).copied().collect()
}

fn fixed_topics() -> Vec<TopicSpec> {
    let mut leaderboards = TopicSpec::fixed(
        LEADERBOARDS,
        "Kill leaderboard page; flag icons attached as blobs",
        &["rank", "player", "country", "kills", "matches_played"],
    );
    leaderboards.blob_prefix = Some(FLAG_BLOB_PREFIX);

    vec![
        TopicSpec::fixed(
            FINANCE,
            "Publisher stock, one row per minute of the last trading day",
            &["timestamp", "open", "high", "low", "close", "volume"],
        ),
        TopicSpec::fixed(
            IGN_RATINGS,
            "Critic and user rating",
            &["timestamp", "ign_rating", "user_rating"],
        ),
        TopicSpec::fixed(
            PLAYER_COUNTS,
            "Current players and change versus the previous day",
            &["Timestamp", "Current Players", "Previous Day Change"],
        ),
        leaderboards,
        TopicSpec::fixed(WEB_SEARCH, "Search interest export", &["count"]),
        TopicSpec::fixed(YOUTUBE_SEARCH, "Video search interest export", &["count"]),
    ]
}

fn reddit_posts_spec(subject: &str) -> TopicSpec {
    TopicSpec {
        name: reddit_posts_topic(subject),
        description: "Text posts with sentiment scores",
        columns: with_sentiment(&REDDIT_POST_BASE),
        blob_prefix: None,
    }
}

fn reddit_comments_spec(subject: &str) -> TopicSpec {
    TopicSpec {
        name: reddit_comments_topic(subject),
        description: "Comments on fetched posts with sentiment scores",
        columns: with_sentiment(&REDDIT_COMMENT_BASE),
        blob_prefix: None,
    }
}

/// Topics written by the fixed-name collectors, plus the reddit pair for `subject`.
pub fn raw_topics(reddit_subject: &str) -> Vec<TopicSpec> {
    let mut topics = fixed_topics();
    topics.push(reddit_posts_spec(reddit_subject));
    topics.push(reddit_comments_spec(reddit_subject));
    topics
}

/// Declared schema for a raw topic name, including any reddit subject.
pub fn lookup(topic: &str) -> Option<TopicSpec> {
    if let Some(rest) = topic.strip_prefix("reddit_") {
        if let Some(subject) = rest.strip_suffix("_posts").filter(|s| !s.is_empty()) {
            return Some(reddit_posts_spec(subject));
        }
        if let Some(subject) = rest.strip_suffix("_comments").filter(|s| !s.is_empty()) {
            return Some(reddit_comments_spec(subject));
        }
    }
    fixed_topics().into_iter().find(|t| t.name == topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reddit_topics_are_built_from_subject() {
        assert_eq!(reddit_posts_topic("XDefiant"), "reddit_XDefiant_posts");
        assert_eq!(reddit_comments_topic("XDefiant"), "reddit_XDefiant_comments");
    }

    #[test]
    fn lookup_resolves_fixed_and_reddit_topics() {
        assert_eq!(lookup("finance").unwrap().columns.len(), 6);
        let posts = lookup("reddit_XDefiant_posts").unwrap();
        assert_eq!(posts.name, "reddit_XDefiant_posts");
        assert_eq!(posts.columns.len(), 16);
        assert_eq!(posts.columns[0], "title");
        let comments = lookup("reddit_XDefiant_comments").unwrap();
        assert_eq!(comments.columns.len(), 12);
        assert!(lookup("reddit__posts").is_none());
        assert!(lookup("weather").is_none());
    }

    #[test]
    fn lookup_agrees_with_the_listing() {
        for spec in raw_topics("XDefiant") {
            assert_eq!(lookup(&spec.name).as_ref(), Some(&spec), "{}", spec.name);
        }
        let posts = lookup("reddit_finance_posts").unwrap();
        assert_eq!(posts.columns[0], "title");
        assert!(lookup("reddit_").is_none());
    }

    #[test]
    fn leaderboards_carry_flag_blobs() {
        let lb = lookup(LEADERBOARDS).unwrap();
        assert_eq!(lb.blob_prefix, Some("flags/"));
        assert_eq!(
            flag_blob_name("https://cdn.example/flags/fr.png"),
            "flags/https://cdn.example/flags/fr.png"
        );
    }

    #[test]
    fn drift_reports_both_directions() {
        let spec = lookup(IGN_RATINGS).unwrap();
        let (extra, missing) = spec.drift(&["timestamp", "ign_rating", "metacritic"]);
        assert_eq!(extra, vec!["metacritic"]);
        assert_eq!(missing, vec!["user_rating"]);
        let (extra, missing) = spec.drift(&spec.columns);
        assert!(extra.is_empty() && missing.is_empty());
    }
}
