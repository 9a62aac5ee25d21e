//! Feed source detection and schema normalization.
//!
//! Each supported job board exposes a different JSON shape. A `SourceAdapter`
//! is selected once per feed and then used uniformly: it pulls the job array
//! out of the fetched document, maps each raw record onto the canonical raw
//! shape, and says which timestamp field the source is trusted on. Adding a
//! board means adding one adapter, not touching shared logic.

mod ashby;
mod greenhouse;

pub use ashby::AshbyAdapter;
pub use greenhouse::GreenhouseAdapter;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::config::IngestConfig;
use crate::location;
use crate::sanitize;
use crate::types::{fingerprint, Feed, JobPosting, RawJob, RawMetadata};

/// Which board family a feed URL belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Greenhouse,
    Ashby,
    Unknown,
}

impl Source {
    /// Classify a feed. An explicit per-feed tag wins over URL detection.
    pub fn detect(url: &str, explicit: Option<&str>) -> Self {
        if let Some(tag) = explicit {
            match tag.trim().to_ascii_lowercase().as_str() {
                "greenhouse" => return Self::Greenhouse,
                "ashby" => return Self::Ashby,
                _ => {}
            }
        }
        let lower = url.to_ascii_lowercase();
        if lower.contains("greenhouse") {
            Self::Greenhouse
        } else if lower.contains("ashby") {
            Self::Ashby
        } else {
            Self::Unknown
        }
    }

    pub fn adapter(self) -> Option<&'static dyn SourceAdapter> {
        match self {
            Self::Greenhouse => Some(&GreenhouseAdapter),
            Self::Ashby => Some(&AshbyAdapter),
            Self::Unknown => None,
        }
    }
}

/// Per-source normalization strategy.
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    /// Pull the raw job array out of a fetched feed document.
    fn extract_jobs(&self, feed_json: &Value) -> Result<Vec<Value>>;

    /// Map one raw record onto the canonical raw shape. `None` means the
    /// record is unusable (missing id or title).
    fn normalize(&self, raw: &Value) -> Option<RawJob>;

    /// The instant this source reports as the posting's freshness, from the
    /// timestamp field the source is trusted on.
    fn freshness(&self, raw: &RawJob) -> Option<DateTime<Utc>>;

    /// A posting is ingestible only when its freshness falls within the
    /// trailing window. Unparseable or missing timestamps are excluded.
    fn within_update_window(
        &self,
        raw: &RawJob,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> bool {
        self.freshness(raw)
            .map(|ts| now.signed_duration_since(ts) <= window)
            .unwrap_or(false)
    }
}

/// The envelope shapes feeds arrive in: `{jobs: [...]}`, a bare array, or
/// `{jobBoard: {jobs: [...]}}`.
pub(crate) fn envelope_jobs(feed_json: &Value) -> Result<Vec<Value>> {
    if let Some(jobs) = feed_json.get("jobs").and_then(Value::as_array) {
        return Ok(jobs.clone());
    }
    if let Some(jobs) = feed_json.pointer("/jobBoard/jobs").and_then(Value::as_array) {
        return Ok(jobs.clone());
    }
    if let Some(jobs) = feed_json.as_array() {
        return Ok(jobs.clone());
    }
    Err(anyhow!("feed document has no recognizable job array"))
}

/// Parse the timestamp formats boards actually emit.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive));
    }
    None
}

pub(crate) fn json_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Source-native ids arrive as numbers or strings; store them as strings.
pub(crate) fn json_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Stable per-feed company key: the board identifier segment of the feed
/// URL, falling back to the feed's own id.
pub fn company_key_for(feed: &Feed) -> String {
    if let Ok(parsed) = Url::parse(&feed.url) {
        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        for (idx, segment) in segments.iter().enumerate() {
            if matches!(*segment, "boards" | "job-boards" | "job-board") {
                if let Some(key) = segments.get(idx + 1) {
                    let key = sanitize_key(key);
                    if !key.is_empty() {
                        return key;
                    }
                }
            }
        }
        // Embedded Greenhouse boards carry the key as ?for=<key>
        if let Some((_, key)) = parsed.query_pairs().find(|(k, _)| k == "for") {
            let key = sanitize_key(&key);
            if !key.is_empty() {
                return key;
            }
        }
    }
    feed.id.simple().to_string()
}

fn sanitize_key(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect()
}

/// Company display name precedence: feed-configured name, then the raw
/// record's company field, then the capitalized board key, then "Unknown".
pub fn company_name_for(feed: &Feed, raw: &RawJob, company_key: &str) -> String {
    if let Some(name) = non_empty(feed.name.as_deref()) {
        return name;
    }
    if let Some(name) = non_empty(raw.company_name.as_deref()) {
        return name;
    }
    let key = company_key.trim();
    if !key.is_empty() {
        return capitalize(key);
    }
    "Unknown".to_string()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Normalize a raw metadata list into a deduplicated name -> value map and
/// an ordered list. First occurrence of a name wins; entries with blank,
/// null, or empty-array values are dropped.
pub fn normalize_metadata(entries: &[RawMetadata]) -> (Value, Value) {
    let mut map = serde_json::Map::new();
    let mut list = Vec::new();
    for entry in entries {
        let name = entry.name.trim();
        if name.is_empty() || map.contains_key(name) {
            continue;
        }
        let Some(value) = normalize_metadata_value(entry) else {
            continue;
        };
        map.insert(name.to_string(), value.clone());
        list.push(json!({ "name": name, "value": value }));
    }
    (Value::Object(map), Value::Array(list))
}

fn normalize_metadata_value(entry: &RawMetadata) -> Option<Value> {
    if entry.value_type.as_deref() == Some("currency") {
        return normalize_currency(&entry.value);
    }
    match &entry.value {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| Value::String(trimmed.to_string()))
        }
        Value::Array(items) => {
            let kept: Vec<Value> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => {
                        let trimmed = s.trim();
                        (!trimmed.is_empty()).then(|| Value::String(trimmed.to_string()))
                    }
                    Value::Null => None,
                    other => Some(other.clone()),
                })
                .collect();
            (!kept.is_empty()).then(|| Value::Array(kept))
        }
        other => Some(other.clone()),
    }
}

/// Currency values arrive as `{amount, unit}` objects or bare amounts; the
/// amount is coerced to a number when possible and the unit defaults to USD.
fn normalize_currency(value: &Value) -> Option<Value> {
    let (amount, unit) = match value {
        Value::Object(obj) => (
            obj.get("amount").cloned(),
            obj.get("unit")
                .and_then(Value::as_str)
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
        ),
        other => (Some(other.clone()), None),
    };
    let amount = match amount {
        None | Some(Value::Null) => return None,
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(trimmed.to_string()))
        }
        Some(other) => other,
    };
    Some(json!({
        "amount": amount,
        "unit": unit.unwrap_or_else(|| "USD".to_string()),
    }))
}

/// Assemble the canonical posting for one kept raw job.
pub fn build_posting(
    feed: &Feed,
    raw: &RawJob,
    freshness: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &IngestConfig,
) -> JobPosting {
    let company_key = company_key_for(feed);
    let company_name = company_name_for(feed, raw, &company_key);
    let facts = location::classify(raw.location_name.as_deref(), raw.explicit_remote);
    let (metadata_map, metadata_list) = normalize_metadata(&raw.metadata);
    let content_html_clean = raw.content.as_deref().map(|html| {
        sanitize::clean_content_html(html, &config.tracker_domains, config.max_content_chars)
    });
    JobPosting {
        user_id: feed.user_id,
        fingerprint: fingerprint(&company_key, &raw.id),
        company_key,
        company_name,
        job_id: raw.id.clone(),
        title: raw.title.clone(),
        location_name: raw.location_name.clone(),
        state_codes: facts.state_codes.into_iter().collect(),
        is_remote: facts.is_remote,
        absolute_url: raw.absolute_url.clone(),
        updated_at_iso: raw.updated_at.clone().or_else(|| raw.first_published.clone()),
        updated_at_ts: freshness,
        first_published_iso: raw.first_published.clone(),
        metadata_map,
        metadata_list,
        content_html_clean,
        first_seen_at: now,
        last_seen_at: now,
        last_ingested_at: now,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn feed(url: &str) -> Feed {
        Feed {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            name: None,
            url: url.to_string(),
            active: true,
            source: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn detects_source_from_url() {
        assert_eq!(
            Source::detect("https://boards-api.greenhouse.io/v1/boards/stripe/jobs", None),
            Source::Greenhouse
        );
        assert_eq!(
            Source::detect("https://api.ashbyhq.com/posting-api/job-board/notion", None),
            Source::Ashby
        );
        assert_eq!(Source::detect("https://example.com/jobs.json", None), Source::Unknown);
    }

    #[test]
    fn explicit_tag_overrides_url() {
        assert_eq!(
            Source::detect("https://example.com/jobs.json", Some("ashby")),
            Source::Ashby
        );
    }

    #[test]
    fn envelope_shapes() {
        let wrapped = json!({ "jobs": [{ "id": 1 }] });
        let nested = json!({ "jobBoard": { "jobs": [{ "id": 2 }] } });
        let bare = json!([{ "id": 3 }]);
        assert_eq!(envelope_jobs(&wrapped).unwrap().len(), 1);
        assert_eq!(envelope_jobs(&nested).unwrap().len(), 1);
        assert_eq!(envelope_jobs(&bare).unwrap().len(), 1);
        assert!(envelope_jobs(&json!({ "data": [] })).is_err());
    }

    #[test]
    fn company_key_from_board_urls() {
        let gh = feed("https://boards-api.greenhouse.io/v1/boards/stripe/jobs?content=true");
        assert_eq!(company_key_for(&gh), "stripe");

        let ashby = feed("https://api.ashbyhq.com/posting-api/job-board/notion");
        assert_eq!(company_key_for(&ashby), "notion");

        let embed = feed("https://boards.greenhouse.io/embed/job_board?for=airbnb");
        assert_eq!(company_key_for(&embed), "airbnb");
    }

    #[test]
    fn company_key_falls_back_to_feed_id() {
        let f = feed("https://example.com/careers.json");
        assert_eq!(company_key_for(&f), f.id.simple().to_string());
    }

    #[test]
    fn company_name_precedence() {
        let mut f = feed("https://boards-api.greenhouse.io/v1/boards/stripe/jobs");
        let mut raw = RawJob::default();

        assert_eq!(company_name_for(&f, &raw, "stripe"), "Stripe");

        raw.company_name = Some("Stripe, Inc.".to_string());
        assert_eq!(company_name_for(&f, &raw, "stripe"), "Stripe, Inc.");

        f.name = Some("Stripe Careers".to_string());
        assert_eq!(company_name_for(&f, &raw, "stripe"), "Stripe Careers");

        assert_eq!(company_name_for(&feed("bad url"), &RawJob::default(), ""), "Unknown");
    }

    #[test]
    fn metadata_drops_blank_and_keeps_first() {
        let entries = vec![
            RawMetadata {
                name: "Team".into(),
                value: json!("Payments"),
                value_type: None,
            },
            RawMetadata {
                name: "Team".into(),
                value: json!("Ignored duplicate"),
                value_type: None,
            },
            RawMetadata {
                name: "Blank".into(),
                value: json!("   "),
                value_type: None,
            },
            RawMetadata {
                name: "Null".into(),
                value: Value::Null,
                value_type: None,
            },
            RawMetadata {
                name: "Empty list".into(),
                value: json!([]),
                value_type: None,
            },
            RawMetadata {
                name: "Offices".into(),
                value: json!([" NYC ", "", null, "SF"]),
                value_type: None,
            },
        ];
        let (map, list) = normalize_metadata(&entries);
        assert_eq!(map["Team"], json!("Payments"));
        assert_eq!(map["Offices"], json!(["NYC", "SF"]));
        assert!(map.get("Blank").is_none());
        assert!(map.get("Null").is_none());
        assert!(map.get("Empty list").is_none());
        assert_eq!(list.as_array().unwrap().len(), 2);
        assert_eq!(list[0]["name"], json!("Team"));
    }

    #[test]
    fn currency_amounts_coerce_to_numbers() {
        let entries = vec![
            RawMetadata {
                name: "Salary".into(),
                value: json!({ "amount": "185000", "unit": "" }),
                value_type: Some("currency".into()),
            },
            RawMetadata {
                name: "Bonus".into(),
                value: json!("15000"),
                value_type: Some("currency".into()),
            },
        ];
        let (map, _) = normalize_metadata(&entries);
        assert_eq!(map["Salary"], json!({ "amount": 185000.0, "unit": "USD" }));
        assert_eq!(map["Bonus"], json!({ "amount": 15000.0, "unit": "USD" }));
    }

    #[test]
    fn rebuilding_the_same_job_differs_only_in_bookkeeping() {
        let feed = feed("https://api.ashbyhq.com/posting-api/job-board/notion");
        let raw_value = json!({
            "id": "a7", "title": "Engineer", "publishedAt": "2026-08-06T12:00:00Z",
            "location": "Remote - US", "department": "Eng", "isRemote": true,
            "jobUrl": "https://jobs.ashbyhq.com/notion/a7",
            "descriptionHtml": "<p>Work</p>"
        });
        let raw = AshbyAdapter.normalize(&raw_value).unwrap();
        let freshness = AshbyAdapter.freshness(&raw).unwrap();
        let config = IngestConfig::default();

        let first = build_posting(&feed, &raw, freshness, Utc::now(), &config);
        let later = build_posting(
            &feed,
            &raw,
            freshness,
            Utc::now() + chrono::Duration::minutes(30),
            &config,
        );

        let strip = |posting: &crate::types::JobPosting| {
            let mut value = serde_json::to_value(posting).expect("posting serializes");
            let object = value.as_object_mut().expect("posting is an object");
            for field in ["first_seen_at", "last_seen_at", "last_ingested_at", "created_at"] {
                object.remove(field);
            }
            value
        };
        assert_eq!(strip(&first), strip(&later));
        assert_ne!(first.first_seen_at, later.first_seen_at);
    }

    #[test]
    fn parses_board_timestamp_formats() {
        assert!(parse_timestamp("2026-08-01T10:30:00Z").is_some());
        assert!(parse_timestamp("2026-08-01T10:30:00-05:00").is_some());
        assert!(parse_timestamp("2026-08-01T10:30:00.123").is_some());
        assert!(parse_timestamp("2026-08-01 10:30:00").is_some());
        assert!(parse_timestamp("2026-08-01").is_some());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }
}
