//! Adapter for providers speaking the plain JSON envelope
//! `{data, pagination: {currentPage, totalPages, links: {next}}}`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{SyncError, SyncResult};
use crate::helpers::{chapter_slug, parse_chapter_number, slugify_or};
use crate::http_client::SourceClient;
use crate::models::{
    CanonicalChapter, CanonicalGenre, CanonicalTitle, CatalogPage, ChapterNumber, ChapterPage,
    TitleStatus,
};
use crate::sources::SourceAdapter;

pub const NAME: &str = "json-api";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_PER_PAGE: u32 = 20;

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    current_page: u32,
    total_pages: u32,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    links: PaginationLinks,
}

#[derive(Deserialize, Default)]
struct PaginationLinks {
    next: Option<String>,
}

/// Providers disagree on whether ids are numbers or strings.
#[derive(Deserialize, Clone)]
#[serde(untagged)]
enum RawId {
    Num(i64),
    Text(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Num(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStatus {
    Code(i64),
    Label(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Num(f64),
    Text(String),
}

#[derive(Deserialize)]
pub(crate) struct ApiTitle {
    id: RawId,
    title: String,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default, alias = "alternative_titles")]
    alt_titles: Option<BTreeMap<String, String>>,
    #[serde(default, alias = "description")]
    synopsis: Option<String>,
    #[serde(default, alias = "cover")]
    cover_url: Option<String>,
    #[serde(default)]
    status: Option<RawStatus>,
    #[serde(default)]
    views: Option<i64>,
    #[serde(default)]
    genres: Option<Vec<ApiGenre>>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ApiGenre {
    id: RawId,
    name: String,
    #[serde(default)]
    slug: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ApiChapter {
    id: RawId,
    #[serde(default)]
    manga_id: Option<RawId>,
    #[serde(alias = "chapter_number")]
    number: RawNumber,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    pages: Option<Vec<ApiPage>>,
    #[serde(default)]
    views: Option<i64>,
    #[serde(default, alias = "published_at")]
    released_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ApiPage {
    Url(String),
    Entry {
        #[serde(default, alias = "page_number")]
        number: Option<u32>,
        #[serde(alias = "image_url", alias = "image")]
        url: String,
    },
}

/// Numeric lifecycle codes used by the envelope API; labels are accepted
/// as well for providers that send words.
pub fn map_status(code: i64) -> TitleStatus {
    match code {
        0 => TitleStatus::Draft,
        1 => TitleStatus::Ongoing,
        2 => TitleStatus::Completed,
        3 => TitleStatus::Cancelled,
        4 => TitleStatus::Hiatus,
        _ => TitleStatus::Unknown,
    }
}

fn map_status_label(label: &str) -> TitleStatus {
    TitleStatus::from_db(label.trim().to_lowercase().as_str())
}

pub(crate) fn map_title(provider: &str, raw: ApiTitle) -> SyncResult<CanonicalTitle> {
    let source_id = raw.id.into_string();
    let title = raw.title.trim().to_string();
    if title.is_empty() {
        return Err(SyncError::SourceFormat {
            provider: provider.to_string(),
            context: format!("title {}", source_id),
            message: "empty title".to_string(),
        });
    }

    let slug = raw
        .slug
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| slugify_or(&title, &format!("{}-{}", provider, source_id)));

    let genres = raw
        .genres
        .unwrap_or_default()
        .into_iter()
        .map(|g| {
            let source_genre_id = g.id.into_string();
            let slug = g
                .slug
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| slugify_or(&g.name, &format!("genre-{}", source_genre_id)));
            CanonicalGenre {
                source_genre_id,
                slug,
                name: g.name,
            }
        })
        .collect();

    let status = match raw.status {
        Some(RawStatus::Code(code)) => map_status(code),
        Some(RawStatus::Label(label)) => map_status_label(&label),
        None => TitleStatus::Unknown,
    };

    Ok(CanonicalTitle {
        source_id,
        source_name: provider.to_string(),
        title,
        slug,
        alt_titles: raw.alt_titles.unwrap_or_default(),
        synopsis: raw.synopsis,
        cover_url: raw.cover_url.filter(|u| !u.trim().is_empty()),
        status,
        views: raw.views.unwrap_or(0),
        genres,
        created_at: raw.created_at,
        updated_at: raw.updated_at,
    })
}

pub(crate) fn map_chapter(
    provider: &str,
    title_source_id: &str,
    raw: ApiChapter,
) -> SyncResult<CanonicalChapter> {
    let source_id = raw.id.into_string();
    let number = match raw.number {
        RawNumber::Num(n) if n.is_finite() => Some(ChapterNumber::new(n)),
        RawNumber::Num(_) => None,
        RawNumber::Text(s) => parse_chapter_number(&s),
    }
    .ok_or_else(|| SyncError::SourceFormat {
        provider: provider.to_string(),
        context: format!("chapter {}", source_id),
        message: "chapter number is not a decimal".to_string(),
    })?;

    let mut entries: Vec<(u32, String)> = raw
        .pages
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, page)| match page {
            ApiPage::Url(url) => (i as u32 + 1, url),
            ApiPage::Entry { number, url } => (number.unwrap_or(i as u32 + 1), url),
        })
        .collect();
    entries.sort_by_key(|(n, _)| *n);

    Ok(CanonicalChapter {
        source_id,
        title_source_id: raw
            .manga_id
            .map(RawId::into_string)
            .unwrap_or_else(|| title_source_id.to_string()),
        number,
        title: raw.title.filter(|t| !t.trim().is_empty()),
        slug: raw
            .slug
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| chapter_slug(number)),
        pages: entries.into_iter().map(|(_, url)| url).collect(),
        views: raw.views.unwrap_or(0),
        released_at: raw.released_at,
    })
}

fn cursor(pagination: Option<&Pagination>) -> (bool, Option<u32>, Option<u64>) {
    match pagination {
        Some(p) => {
            let has_next = p.links.next.is_some() || p.current_page < p.total_pages;
            let next = has_next.then_some(p.current_page + 1);
            (has_next, next, p.total)
        }
        None => (false, None, None),
    }
}

pub struct JsonApiSource {
    client: SourceClient,
    base_url: String,
    per_page: u32,
}

impl JsonApiSource {
    pub fn new(client: SourceClient, base_url: &str, per_page: u32) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            per_page: per_page.max(1),
        }
    }
}

#[async_trait]
impl SourceAdapter for JsonApiSource {
    fn name(&self) -> &str {
        self.client.source_name()
    }

    async fn fetch_catalog_page(&self, page: u32) -> SyncResult<CatalogPage> {
        let url = format!("{}/mangas", self.base_url);
        let envelope: Envelope<Vec<ApiTitle>> = self
            .client
            .get_json(&url, &[("page", page.to_string()), ("per_page", self.per_page.to_string())])
            .await?;

        let (has_next, next_page, total) = cursor(envelope.pagination.as_ref());
        let titles = envelope
            .data
            .into_iter()
            .map(|raw| map_title(self.name(), raw))
            .collect::<SyncResult<Vec<_>>>()?;

        Ok(CatalogPage {
            titles,
            has_next,
            next_page,
            total,
        })
    }

    async fn fetch_title_detail(&self, provider_id: &str) -> SyncResult<CanonicalTitle> {
        let url = format!("{}/mangas/{}", self.base_url, provider_id);
        let envelope: Envelope<ApiTitle> = self.client.get_json(&url, &[]).await?;
        map_title(self.name(), envelope.data)
    }

    async fn fetch_chapter_list(&self, provider_title_id: &str, page: u32) -> SyncResult<ChapterPage> {
        let url = format!("{}/chapters", self.base_url);
        let envelope: Envelope<Vec<ApiChapter>> = self
            .client
            .get_json(
                &url,
                &[
                    ("manga_id", provider_title_id.to_string()),
                    ("page", page.to_string()),
                    ("per_page", self.per_page.to_string()),
                ],
            )
            .await?;

        let (has_next, next_page, _) = cursor(envelope.pagination.as_ref());
        let chapters = envelope
            .data
            .into_iter()
            .map(|raw| map_chapter(self.name(), provider_title_id, raw))
            .collect::<SyncResult<Vec<_>>>()?;

        Ok(ChapterPage {
            chapters,
            has_next,
            next_page,
        })
    }
}
