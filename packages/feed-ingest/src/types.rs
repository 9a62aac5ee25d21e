//! Core data model: feed definitions, raw feed records, and canonical postings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// A user-configured feed source. Created and edited by the user-facing app;
/// the pipeline only ever reads these.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: Option<String>,
    pub url: String,
    pub active: bool,
    /// Explicit source tag ("greenhouse" / "ashby"); overrides URL detection.
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Feed {
    /// Label used in logs and run error samples.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

/// One metadata entry as it appears in a raw feed document.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMetadata {
    pub name: String,
    pub value: Value,
    pub value_type: Option<String>,
}

/// A raw job record normalized onto a single shape, regardless of which
/// source schema it came from. Ephemeral: lives only for one processing pass.
#[derive(Debug, Clone, Default)]
pub struct RawJob {
    /// Source-native id, stringified.
    pub id: String,
    pub title: String,
    pub absolute_url: Option<String>,
    pub updated_at: Option<String>,
    pub first_published: Option<String>,
    pub location_name: Option<String>,
    pub metadata: Vec<RawMetadata>,
    pub content: Option<String>,
    pub company_name: Option<String>,
    /// Explicit remote flag carried by some sources (Ashby `isRemote`).
    pub explicit_remote: Option<bool>,
}

/// The persisted, source-independent representation of one job posting.
///
/// Identity key is `company_key + "__" + job_id`; a row is created at most
/// once per key and never overwritten by routine ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub user_id: Uuid,
    pub fingerprint: String,
    pub company_key: String,
    pub company_name: String,
    pub job_id: String,
    pub title: String,
    pub location_name: Option<String>,
    pub state_codes: Vec<String>,
    pub is_remote: bool,
    pub absolute_url: Option<String>,
    pub updated_at_iso: Option<String>,
    /// Source-reported freshness; drives the update window and retention.
    pub updated_at_ts: DateTime<Utc>,
    pub first_published_iso: Option<String>,
    /// Deduplicated name -> normalized value map.
    pub metadata_map: Value,
    /// Ordered metadata entries, first occurrence of a name wins.
    pub metadata_list: Value,
    pub content_html_clean: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_ingested_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Build the identity key used for dedup.
pub fn fingerprint(company_key: &str, job_id: &str) -> String {
    format!("{}__{}", company_key, job_id)
}

/// Per-company summary document, refreshed whenever a feed pass keeps at
/// least one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanySummary {
    pub user_id: Uuid,
    pub company_key: String,
    pub company_name: String,
    pub url: String,
    pub last_seen_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(fingerprint("stripe", "42"), "stripe__42");
        assert_eq!(fingerprint("stripe", "42"), fingerprint("stripe", "42"));
    }

    #[test]
    fn feed_label_prefers_name() {
        let feed = Feed {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            name: Some("Stripe".into()),
            url: "https://boards-api.greenhouse.io/v1/boards/stripe/jobs".into(),
            active: true,
            source: None,
            created_at: Utc::now(),
        };
        assert_eq!(feed.label(), "Stripe");
    }
}
