use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::AddAssign;

/// Publication lifecycle, normalised from each provider's own codes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TitleStatus {
    Draft,
    Ongoing,
    Completed,
    Cancelled,
    Hiatus,
    #[default]
    Unknown,
}

impl TitleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TitleStatus::Draft => "draft",
            TitleStatus::Ongoing => "ongoing",
            TitleStatus::Completed => "completed",
            TitleStatus::Cancelled => "cancelled",
            TitleStatus::Hiatus => "hiatus",
            TitleStatus::Unknown => "unknown",
        }
    }

    /// Parse the stored column value; anything unrecognised is `Unknown`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "draft" => TitleStatus::Draft,
            "ongoing" => TitleStatus::Ongoing,
            "completed" => TitleStatus::Completed,
            "cancelled" => TitleStatus::Cancelled,
            "hiatus" => TitleStatus::Hiatus,
            _ => TitleStatus::Unknown,
        }
    }
}

/// Chapter number as emitted by providers. Fractional values (10.5) are
/// legal, so equality and hashing go through the bit pattern.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default)]
#[serde(transparent)]
pub struct ChapterNumber(f64);

impl ChapterNumber {
    pub fn new(value: f64) -> Self {
        // -0.0 and 0.0 must compare equal
        if value == 0.0 {
            ChapterNumber(0.0)
        } else {
            ChapterNumber(value)
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl PartialEq for ChapterNumber {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for ChapterNumber {}

impl Hash for ChapterNumber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for ChapterNumber {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChapterNumber {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for ChapterNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 {
            write!(f, "{}", self.0 as i64)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<f64> for ChapterNumber {
    fn from(value: f64) -> Self {
        ChapterNumber::new(value)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CanonicalGenre {
    pub source_genre_id: String,
    pub name: String,
    pub slug: String,
}

/// Provider-agnostic title, produced fresh by every fetch.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CanonicalTitle {
    pub source_id: String,
    pub source_name: String,
    pub title: String,
    pub slug: String,
    /// language code -> title
    pub alt_titles: BTreeMap<String, String>,
    pub synopsis: Option<String>,
    pub cover_url: Option<String>,
    pub status: TitleStatus,
    pub views: i64,
    pub genres: Vec<CanonicalGenre>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CanonicalChapter {
    pub source_id: String,
    pub title_source_id: String,
    pub number: ChapterNumber,
    pub title: Option<String>,
    pub slug: String,
    /// Image references in reading order.
    pub pages: Vec<String>,
    pub views: i64,
    pub released_at: Option<DateTime<Utc>>,
}

/// One page of a provider catalog, normalised to a `has_next` cursor.
#[derive(Debug, Clone, Default)]
pub struct CatalogPage {
    pub titles: Vec<CanonicalTitle>,
    pub has_next: bool,
    pub next_page: Option<u32>,
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ChapterPage {
    pub chapters: Vec<CanonicalChapter>,
    pub has_next: bool,
    pub next_page: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PersistedTitle {
    pub id: i64,
    pub source_name: String,
    pub source_id: String,
    pub title: String,
    pub slug: String,
    pub cover_url: Option<String>,
    pub status: TitleStatus,
    pub views: i64,
    /// Unix millis
    pub updated_at: i64,
    /// Unix millis of the last chapter change
    pub content_updated_at: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PersistedPage {
    pub chapter_id: i64,
    /// 1-based
    pub page_number: u32,
    pub image_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PersistedChapter {
    pub id: i64,
    pub title_id: i64,
    pub source_id: String,
    pub number: ChapterNumber,
    pub title: Option<String>,
    pub slug: String,
    pub views: i64,
    /// Unix millis
    pub released_at: Option<i64>,
    /// Ordered by page number.
    pub pages: Vec<PersistedPage>,
}

/// Chapter counters for one title, or summed over a full-catalog run.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub new: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.new == 0 && self.updated == 0 && self.deleted == 0
    }
}

impl AddAssign for SyncReport {
    fn add_assign(&mut self, other: Self) {
        self.new += other.new;
        self.updated += other.updated;
        self.deleted += other.deleted;
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "new={} updated={} deleted={}", self.new, self.updated, self.deleted)
    }
}
