//! Greenhouse job-board adapter.
//!
//! Greenhouse feeds are already close to the canonical raw shape: `id`,
//! `title`, `absolute_url`, `updated_at`/`first_published`, a nested
//! `location.name`, a `metadata` array, and entity-encoded `content`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{envelope_jobs, json_id, json_str, parse_timestamp, Source, SourceAdapter};
use crate::types::{RawJob, RawMetadata};

pub struct GreenhouseAdapter;

impl SourceAdapter for GreenhouseAdapter {
    fn source(&self) -> Source {
        Source::Greenhouse
    }

    fn extract_jobs(&self, feed_json: &Value) -> Result<Vec<Value>> {
        envelope_jobs(feed_json)
    }

    fn normalize(&self, raw: &Value) -> Option<RawJob> {
        let id = json_id(raw.get("id"))?;
        let title = json_str(raw, "title")?;
        Some(RawJob {
            id,
            title,
            absolute_url: json_str(raw, "absolute_url"),
            updated_at: json_str(raw, "updated_at"),
            first_published: json_str(raw, "first_published"),
            location_name: raw
                .pointer("/location/name")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            metadata: raw
                .get("metadata")
                .and_then(Value::as_array)
                .map(|entries| entries.iter().filter_map(metadata_entry).collect())
                .unwrap_or_default(),
            content: json_str(raw, "content"),
            company_name: json_str(raw, "company_name"),
            explicit_remote: None,
        })
    }

    /// `updated_at` is the reliable field; older boards only set
    /// `first_published`.
    fn freshness(&self, raw: &RawJob) -> Option<DateTime<Utc>> {
        raw.updated_at
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| raw.first_published.as_deref().and_then(parse_timestamp))
    }
}

fn metadata_entry(value: &Value) -> Option<RawMetadata> {
    let name = json_str(value, "name")?;
    Some(RawMetadata {
        name,
        value: value.get("value").cloned().unwrap_or(Value::Null),
        value_type: json_str(value, "value_type"),
    })
}
