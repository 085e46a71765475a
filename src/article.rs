use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

/// Title used when an entry carries none.
pub const UNTITLED: &str = "Không có tiêu đề";

/// Zone-less layouts seen in Vietnamese feeds, tried after RFC 2822/3339.
const NAIVE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%H:%M %d/%m/%Y",
    "%H:%M:%S %d/%m/%Y",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub published: DateTime<FixedOffset>,
    pub category: String,
    /// Display name of the feed source.
    pub source: String,
    pub feed_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// A publication date as found in a feed, before resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RawDate {
    /// Already parsed by the feed library, offset known.
    Structured(DateTime<FixedOffset>),
    /// Calendar time without any zone information.
    Naive(NaiveDateTime),
    Text(String),
    #[default]
    Missing,
}

impl From<DateTime<Utc>> for RawDate {
    fn from(dt: DateTime<Utc>) -> Self {
        RawDate::Structured(dt.fixed_offset())
    }
}

pub fn vietnam_offset() -> FixedOffset {
    FixedOffset::east_opt(7 * 3600).expect("UTC+7 is a valid offset")
}

pub fn now_in_vietnam() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&vietnam_offset())
}

/// Stable 128-bit identifier derived from title and link.
pub fn identify(title: &str, link: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(link.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Resolve any feed date to Vietnam local time. Zone-less values are taken
/// to already be Vietnam local time; anything unparseable becomes "now".
pub fn resolve_date(raw: &RawDate) -> DateTime<FixedOffset> {
    match try_resolve(raw) {
        Some(dt) => dt,
        None => {
            warn!("Unusable publication date {:?}, falling back to now", raw);
            now_in_vietnam()
        }
    }
}

fn try_resolve(raw: &RawDate) -> Option<DateTime<FixedOffset>> {
    let vn = vietnam_offset();
    match raw {
        RawDate::Structured(dt) => Some(dt.with_timezone(&vn)),
        RawDate::Naive(naive) => vn.from_local_datetime(naive).single(),
        RawDate::Text(text) => parse_date_text(text.trim()),
        RawDate::Missing => None,
    }
}

fn parse_date_text(text: &str) -> Option<DateTime<FixedOffset>> {
    if text.is_empty() {
        return None;
    }

    let vn = vietnam_offset();
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&vn));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&vn));
    }

    NAIVE_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(text, format)
            .ok()
            .and_then(|naive| vn.from_local_datetime(&naive).single())
    })
}
