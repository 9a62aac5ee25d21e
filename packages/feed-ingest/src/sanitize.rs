//! Job description cleanup: entity decoding, tracker stripping, size cap.
//!
//! Pure text transformation with no I/O. Feed descriptions arrive as
//! entity-encoded HTML littered with tracking pixels and redirect links;
//! we decode a fixed entity set, drop images outright, unwrap anchors that
//! point at known ad/tracker domains, and hard-cap the result.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

/// Hard cap on stored description length, in characters.
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 25_000;

/// Ad/tracker domains whose links are reduced to their inner text.
pub const DEFAULT_TRACKER_DOMAINS: &[&str] = &[
    "click.appcast.io",
    "doubleclick.net",
    "googleadservices.com",
    "jobtarget.com",
    "jobs2careers.com",
];

lazy_static! {
    static ref IMG_TAG: Regex = Regex::new(r"(?is)<img\b[^>]*>").unwrap();
    static ref ANCHOR_TAG: Regex =
        Regex::new(r#"(?is)<a\b[^>]*href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#).unwrap();
}

/// Decode the fixed entity set feeds use for pre-escaped HTML.
/// `&amp;` is decoded last so `&amp;lt;` stays `&lt;`.
fn decode_entities(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Truncate to `max_chars` without splitting a UTF-8 character. No
/// truncation indicator is appended; the cut is exact.
fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    text.truncate(cut);
    text
}

/// Clean one job description: decode entities, strip images, unwrap tracker
/// anchors, cap the length.
pub fn clean_content_html(
    html: &str,
    tracker_domains: &[String],
    max_chars: usize,
) -> String {
    let decoded = decode_entities(html);
    let without_images = IMG_TAG.replace_all(&decoded, "");
    let unwrapped = ANCHOR_TAG.replace_all(&without_images, |caps: &Captures| {
        let href = &caps[1];
        if tracker_domains.iter().any(|domain| href.contains(domain.as_str())) {
            caps[2].to_string()
        } else {
            caps[0].to_string()
        }
    });
    truncate_chars(unwrapped.into_owned(), max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trackers() -> Vec<String> {
        DEFAULT_TRACKER_DOMAINS.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn decodes_fixed_entity_set() {
        let out = clean_content_html("&lt;p&gt;Pay &amp; benefits&lt;/p&gt;", &trackers(), 1000);
        assert_eq!(out, "<p>Pay & benefits</p>");
    }

    #[test]
    fn double_encoded_ampersand_decodes_once() {
        let out = clean_content_html("&amp;lt;", &trackers(), 1000);
        assert_eq!(out, "&lt;");
    }

    #[test]
    fn strips_image_tags() {
        let html = r#"<p>Role</p><img src="https://pixel.example/t.gif" width="1"><p>Apply</p>"#;
        let out = clean_content_html(html, &trackers(), 1000);
        assert_eq!(out, "<p>Role</p><p>Apply</p>");
    }

    #[test]
    fn unwraps_tracker_anchors_only() {
        let html = concat!(
            r#"<a href="https://click.appcast.io/track/abc">Apply now</a>"#,
            r#" or <a href="https://example.com/jobs/1">see posting</a>"#,
        );
        let out = clean_content_html(html, &trackers(), 1000);
        assert_eq!(
            out,
            r#"Apply now or <a href="https://example.com/jobs/1">see posting</a>"#
        );
    }

    #[test]
    fn caps_length_without_marker() {
        let html = "a".repeat(100);
        let out = clean_content_html(&html, &trackers(), 40);
        assert_eq!(out.len(), 40);
        assert!(!out.ends_with("..."));
    }

    #[test]
    fn cap_respects_char_boundaries() {
        let html = "é".repeat(30);
        let out = clean_content_html(&html, &trackers(), 10);
        assert_eq!(out.chars().count(), 10);
    }
}
