//! Ashby job-board adapter.
//!
//! Ashby's posting API uses its own field names (`jobUrl`, `publishedAt`,
//! `descriptionHtml`, an explicit `isRemote`); this adapter maps them onto
//! the canonical raw shape and turns `department`/`team`/`employmentType`
//! into synthetic metadata entries.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{envelope_jobs, json_id, json_str, parse_timestamp, Source, SourceAdapter};
use crate::types::{RawJob, RawMetadata};

pub struct AshbyAdapter;

/// Ashby fields that become metadata entries, with their display names.
const METADATA_FIELDS: &[(&str, &str)] = &[
    ("department", "Department"),
    ("team", "Team"),
    ("employmentType", "Employment Type"),
];

impl SourceAdapter for AshbyAdapter {
    fn source(&self) -> Source {
        Source::Ashby
    }

    fn extract_jobs(&self, feed_json: &Value) -> Result<Vec<Value>> {
        envelope_jobs(feed_json)
    }

    fn normalize(&self, raw: &Value) -> Option<RawJob> {
        let id = json_id(raw.get("id"))?;
        let title = json_str(raw, "title")?;
        let published_at = json_str(raw, "publishedAt");
        let metadata = METADATA_FIELDS
            .iter()
            .filter_map(|(field, label)| {
                json_str(raw, field).map(|value| RawMetadata {
                    name: label.to_string(),
                    value: Value::String(value),
                    value_type: None,
                })
            })
            .collect();
        Some(RawJob {
            id,
            title,
            absolute_url: json_str(raw, "jobUrl").or_else(|| json_str(raw, "applyUrl")),
            updated_at: published_at.clone(),
            first_published: published_at,
            location_name: json_str(raw, "location"),
            metadata,
            content: json_str(raw, "descriptionHtml"),
            company_name: None,
            explicit_remote: raw.get("isRemote").and_then(Value::as_bool),
        })
    }

    /// `publishedAt` is the only timestamp Ashby exposes.
    fn freshness(&self, raw: &RawJob) -> Option<DateTime<Utc>> {
        raw.updated_at.as_deref().and_then(parse_timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_job() -> Value {
        json!({
            "id": "9e8d7c6b",
            "title": "Product Engineer",
            "jobUrl": "https://jobs.ashbyhq.com/notion/9e8d7c6b",
            "publishedAt": "2026-08-06T13:30:00Z",
            "location": "Remote - US",
            "department": "Engineering",
            "team": "Core Product",
            "employmentType": "FullTime",
            "isRemote": true,
            "descriptionHtml": "<p>Ship the editor.</p>"
        })
    }

    #[test]
    fn maps_ashby_fields_onto_canonical_shape() {
        let job = AshbyAdapter.normalize(&raw_job()).unwrap();
        assert_eq!(job.id, "9e8d7c6b");
        assert_eq!(
            job.absolute_url.as_deref(),
            Some("https://jobs.ashbyhq.com/notion/9e8d7c6b")
        );
        assert_eq!(job.updated_at.as_deref(), Some("2026-08-06T13:30:00Z"));
        assert_eq!(job.first_published.as_deref(), Some("2026-08-06T13:30:00Z"));
        assert_eq!(job.location_name.as_deref(), Some("Remote - US"));
        assert_eq!(job.content.as_deref(), Some("<p>Ship the editor.</p>"));
        assert_eq!(job.explicit_remote, Some(true));
    }

    #[test]
    fn synthesizes_metadata_entries() {
        let job = AshbyAdapter.normalize(&raw_job()).unwrap();
        let names: Vec<&str> = job.metadata.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Department", "Team", "Employment Type"]);
        assert_eq!(job.metadata[0].value, json!("Engineering"));
    }

    #[test]
    fn missing_optional_fields_are_tolerated() {
        let job = AshbyAdapter
            .normalize(&json!({ "id": "x1", "title": "Designer" }))
            .unwrap();
        assert!(job.metadata.is_empty());
        assert_eq!(job.explicit_remote, None);
        assert!(AshbyAdapter.freshness(&job).is_none());
    }

    #[test]
    fn repeated_normalization_is_stable() {
        let first = AshbyAdapter.normalize(&raw_job()).unwrap();
        let second = AshbyAdapter.normalize(&raw_job()).unwrap();
        assert_eq!(format!("{:?}", first), format!("{:?}", second));
    }
}
