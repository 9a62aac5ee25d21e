//! US location classification for raw job postings.
//!
//! Pure text heuristics: no I/O, no configuration beyond the fixed tables
//! below. Matching is case-insensitive; the input is uppercased once and all
//! token matching works on separator boundaries so that e.g. "CA" never
//! matches inside "CANADA".

use std::collections::BTreeSet;

/// Two-letter US state and territory codes.
const STATE_CODES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID",
    "IL", "IN", "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS",
    "MO", "MT", "NE", "NV", "NH", "NJ", "NM", "NY", "NC", "ND", "OH", "OK",
    "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT", "VA", "WA", "WV",
    "WI", "WY", "DC", "PR", "GU", "VI", "AS", "MP",
];

/// Major US city names, matched as whole tokens.
const US_CITIES: &[&str] = &[
    "NEW YORK", "NEW YORK CITY", "SAN FRANCISCO", "LOS ANGELES", "CHICAGO",
    "SEATTLE", "AUSTIN", "BOSTON", "DENVER", "ATLANTA", "MIAMI", "DALLAS",
    "HOUSTON", "PHOENIX", "PHILADELPHIA", "SAN DIEGO", "SAN JOSE", "PORTLAND",
    "NASHVILLE", "CHARLOTTE", "COLUMBUS", "INDIANAPOLIS", "DETROIT",
    "MINNEAPOLIS", "SALT LAKE CITY", "PITTSBURGH", "CINCINNATI", "KANSAS CITY",
    "ST. LOUIS", "TAMPA", "ORLANDO", "RALEIGH", "DURHAM", "BALTIMORE",
    "WASHINGTON", "SACRAMENTO", "SAN ANTONIO", "LAS VEGAS", "OAKLAND",
    "BROOKLYN", "JERSEY CITY", "NEWARK", "BOULDER", "ANN ARBOR", "MADISON",
    "RICHMOND", "MEMPHIS", "LOUISVILLE", "OKLAHOMA CITY", "ALBUQUERQUE",
    "TUCSON", "OMAHA", "TULSA", "HONOLULU", "ANCHORAGE", "BUFFALO",
    "ROCHESTER", "PROVIDENCE", "HARTFORD", "NEW ORLEANS", "MILWAUKEE",
    "CLEVELAND", "JACKSONVILLE", "FORT WORTH", "EL PASO", "LONG BEACH",
    "VIRGINIA BEACH", "COLORADO SPRINGS", "ARLINGTON", "SANTA MONICA",
    "PALO ALTO", "MOUNTAIN VIEW", "SUNNYVALE", "REDWOOD CITY", "MENLO PARK",
    "CUPERTINO", "BELLEVUE", "REDMOND", "CAMBRIDGE", "SOMERVILLE", "TEMPE",
    "SCOTTSDALE", "IRVINE", "PASADENA", "BERKELEY", "PLANO",
];

/// Substrings that mark a location as US regardless of tokenization.
const US_KEYWORDS: &[&str] = &["UNITED STATES", "U.S."];

/// US markers that must match as whole tokens ("USA" appears inside "BUSAN").
const US_TOKENS: &[&str] = &["US", "USA"];

/// Phrases that pin a remote role to the US.
const US_REMOTE_PHRASES: &[&str] = &[
    "REMOTE - US",
    "REMOTE, US",
    "REMOTE (US",
    "REMOTE US",
    "US REMOTE",
    "REMOTE - UNITED STATES",
    "REMOTE IN THE US",
    "REMOTE (UNITED STATES",
];

/// Country substrings that disqualify a bare "remote" from counting as US.
const NON_US_COUNTRIES: &[&str] = &[
    "CANADA", "UNITED KINGDOM", "ENGLAND", "SCOTLAND", "IRELAND", "FRANCE",
    "GERMANY", "SPAIN", "PORTUGAL", "ITALY", "NETHERLANDS", "BELGIUM",
    "SWEDEN", "NORWAY", "DENMARK", "FINLAND", "POLAND", "AUSTRIA",
    "SWITZERLAND", "CZECH", "ROMANIA", "HUNGARY", "BULGARIA", "GREECE",
    "UKRAINE", "TURKEY", "ISRAEL", "INDIA", "PAKISTAN", "BANGLADESH",
    "CHINA", "JAPAN", "KOREA", "SINGAPORE", "PHILIPPINES", "INDONESIA",
    "VIETNAM", "THAILAND", "MALAYSIA", "AUSTRALIA", "NEW ZEALAND", "BRAZIL",
    "ARGENTINA", "CHILE", "COLOMBIA", "MEXICO", "PERU", "EGYPT", "NIGERIA",
    "KENYA", "SOUTH AFRICA", "DUBAI", "EMEA", "APAC", "LATAM",
];

/// Spelled-out Washington D.C. variants that imply the DC state code.
const DC_VARIANTS: &[&str] = &[
    "WASHINGTON D.C.",
    "WASHINGTON DC",
    "WASHINGTON, D.C.",
    "WASHINGTON, DC",
];

/// What the classifier concluded about one location string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocationFacts {
    pub is_us: bool,
    pub is_remote: bool,
    pub state_codes: BTreeSet<String>,
}

/// Token boundaries: comma, slash, whitespace, bullet, hyphen, pipe.
fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | '/' | '•' | '-' | '|')
}

/// Whole-token match of `token` in `text` (both already uppercase).
/// Multi-word tokens work because whitespace is itself a separator.
fn contains_token(text: &str, token: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = text[start..].find(token) {
        let at = start + pos;
        let end = at + token.len();
        let before_ok = at == 0
            || text[..at].chars().next_back().map_or(true, is_separator);
        let after_ok = end == text.len()
            || text[end..].chars().next().map_or(true, is_separator);
        if before_ok && after_ok {
            return true;
        }
        start = at + 1;
    }
    false
}

fn is_us_text(upper: &str) -> bool {
    US_KEYWORDS.iter().any(|kw| upper.contains(kw))
        || US_TOKENS.iter().any(|t| contains_token(upper, t))
        || STATE_CODES.iter().any(|code| contains_token(upper, code))
        || US_CITIES.iter().any(|city| contains_token(upper, city))
}

fn is_us_remote_text(upper: &str) -> bool {
    if !upper.contains("REMOTE") {
        return false;
    }
    US_REMOTE_PHRASES.iter().any(|p| upper.contains(p))
        || !NON_US_COUNTRIES.iter().any(|c| upper.contains(c))
}

fn extract_state_codes(upper: &str) -> BTreeSet<String> {
    let mut codes: BTreeSet<String> = upper
        .split(is_separator)
        .filter(|token| STATE_CODES.contains(token))
        .map(|token| token.to_string())
        .collect();
    if DC_VARIANTS.iter().any(|v| upper.contains(v)) {
        codes.insert("DC".to_string());
    }
    codes
}

/// Classify one location string. An explicit remote flag from the raw record
/// always forces `is_remote` to true.
pub fn classify(text: Option<&str>, explicit_remote: Option<bool>) -> LocationFacts {
    let upper = text.unwrap_or("").trim().to_uppercase();
    LocationFacts {
        is_us: is_us_text(&upper),
        is_remote: explicit_remote == Some(true) || is_us_remote_text(&upper),
        state_codes: extract_state_codes(&upper),
    }
}

/// Whether a posting with this location should enter the pipeline.
///
/// Empty or absent location text is kept: remote-first boards frequently
/// publish no location at all, and neither source schema carries a negative
/// remote signal to contradict that.
pub fn should_keep(text: Option<&str>, explicit_remote: Option<bool>) -> bool {
    if explicit_remote == Some(true) {
        return true;
    }
    let trimmed = text.map(str::trim).unwrap_or("");
    if trimmed.is_empty() {
        return true;
    }
    let upper = trimmed.to_uppercase();
    is_us_text(&upper) || is_us_remote_text(&upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(text: &str) -> LocationFacts {
        classify(Some(text), None)
    }

    #[test]
    fn state_code_matches_as_token_only() {
        assert!(facts("San Francisco, CA").is_us);
        assert!(facts("Remote - NY").is_us);
        // "CA" inside "CANADA" must not match
        assert!(!facts("Toronto, Canada").is_us);
        assert!(!facts("Vancouver/CANADA").is_us);
    }

    #[test]
    fn city_matches_as_whole_token() {
        assert!(facts("Austin, Texas").is_us);
        assert!(facts("New York • Hybrid").is_us);
        // City name embedded in a longer word must not trigger
        assert!(!facts("Austintown").is_us);
        assert!(!facts("Bostonshire").is_us);
    }

    #[test]
    fn us_keywords_and_tokens() {
        assert!(facts("Anywhere in the United States").is_us);
        assert!(facts("Remote, USA").is_us);
        assert!(facts("Remote - US").is_us);
        // "USA" inside another word is not a marker
        assert!(!facts("Busan, South Korea").is_us);
    }

    #[test]
    fn remote_classification() {
        assert!(facts("Remote").is_remote);
        assert!(facts("Remote - US").is_remote);
        // Non-US remote is excluded by the country list
        assert!(!facts("Remote - Canada").is_remote);
        assert!(!facts("Remote (Germany)").is_remote);
        // A US-remote phrase wins even when a non-US country is also present
        assert!(facts("Remote - US or Canada").is_remote);
    }

    #[test]
    fn explicit_remote_flag_overrides() {
        let f = classify(Some("Toronto, Canada"), Some(true));
        assert!(f.is_remote);
        assert!(should_keep(Some("Toronto, Canada"), Some(true)));
    }

    #[test]
    fn keep_policy() {
        assert!(should_keep(Some("San Francisco, CA"), None));
        assert!(should_keep(Some("Remote - US"), None));
        assert!(!should_keep(Some("London, United Kingdom"), None));
        // Empty location defaults to keep
        assert!(should_keep(None, None));
        assert!(should_keep(Some("   "), None));
    }

    #[test]
    fn state_codes_are_collected_unique() {
        let f = facts("NY / CA / Remote - NY");
        assert_eq!(
            f.state_codes.iter().cloned().collect::<Vec<_>>(),
            vec!["CA".to_string(), "NY".to_string()]
        );
    }

    #[test]
    fn washington_dc_variants_imply_dc() {
        assert!(facts("Washington D.C.").state_codes.contains("DC"));
        assert!(facts("Washington, DC or Remote").state_codes.contains("DC"));
    }
}
