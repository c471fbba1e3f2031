use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::SyncResult;
use crate::helpers::{chapter_slug, parse_chapter_number, slugify_or};
use crate::http_client::SourceClient;
use crate::models::{
    CanonicalChapter, CanonicalGenre, CanonicalTitle, CatalogPage, ChapterPage, TitleStatus,
};
use crate::sources::SourceAdapter;

pub const NAME: &str = "mangadex";
pub const BASE_URL: &str = "https://api.mangadex.org";
const COVER_BASE_URL: &str = "https://uploads.mangadex.org/covers";
/// MangaDex rejects list requests above this limit
pub const MAX_LIMIT: u32 = 100;

#[derive(Deserialize)]
struct MangaList {
    data: Vec<MangaData>,
    limit: u32,
    offset: u32,
    total: u64,
}

#[derive(Deserialize)]
struct MangaEntity {
    data: MangaData,
}

#[derive(Deserialize)]
pub(crate) struct MangaData {
    id: String,
    attributes: MangaAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Deserialize)]
struct Relationship {
    #[serde(rename = "type")]
    rel_type: String,
    #[serde(default)]
    attributes: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MangaAttributes {
    #[serde(default)]
    title: HashMap<String, String>,
    #[serde(default)]
    alt_titles: Vec<HashMap<String, String>>,
    #[serde(default)]
    description: HashMap<String, String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct Tag {
    id: String,
    attributes: TagAttributes,
}

#[derive(Deserialize)]
struct TagAttributes {
    #[serde(default)]
    name: HashMap<String, String>,
}

#[derive(Deserialize)]
struct ChapterList {
    data: Vec<ChapterData>,
    limit: u32,
    offset: u32,
    total: u64,
}

#[derive(Deserialize)]
pub(crate) struct ChapterData {
    id: String,
    attributes: ChapterAttributes,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterAttributes {
    #[serde(default)]
    chapter: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    publish_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHome {
    base_url: String,
    chapter: AtHomeChapter,
}

#[derive(Deserialize)]
struct AtHomeChapter {
    hash: String,
    #[serde(default)]
    data: Vec<String>,
}

fn localized(map: &HashMap<String, String>) -> Option<String> {
    let usable = |v: &&String| !v.trim().is_empty();
    map.get("en")
        .filter(usable)
        .or_else(|| map.values().find(usable))
        .map(|v| v.trim().to_string())
}

pub fn map_status(status: &str) -> TitleStatus {
    match status {
        "ongoing" => TitleStatus::Ongoing,
        "completed" => TitleStatus::Completed,
        "hiatus" => TitleStatus::Hiatus,
        "cancelled" => TitleStatus::Cancelled,
        _ => TitleStatus::Unknown,
    }
}

pub(crate) fn map_title(manga: MangaData) -> CanonicalTitle {
    let attrs = manga.attributes;
    let title = localized(&attrs.title).unwrap_or_else(|| manga.id.clone());

    // first title per language wins, the main title is never repeated
    let mut alt_titles = BTreeMap::new();
    for alt in &attrs.alt_titles {
        for (lang, text) in alt {
            if !text.is_empty() && text != &title {
                alt_titles.entry(lang.clone()).or_insert_with(|| text.clone());
            }
        }
    }

    let genres = attrs
        .tags
        .into_iter()
        .filter_map(|tag| {
            let name = localized(&tag.attributes.name)?;
            Some(CanonicalGenre {
                slug: slugify_or(&name, &format!("genre-{}", tag.id)),
                source_genre_id: tag.id,
                name,
            })
        })
        .collect();

    let cover_url = manga
        .relationships
        .iter()
        .find(|r| r.rel_type == "cover_art")
        .and_then(|r| r.attributes.as_ref())
        .and_then(|attrs| attrs.get("fileName"))
        .and_then(|f| f.as_str())
        .map(|file| format!("{}/{}/{}", COVER_BASE_URL, manga.id, file));

    CanonicalTitle {
        slug: slugify_or(&title, &format!("{}-{}", NAME, manga.id)),
        source_id: manga.id,
        source_name: NAME.to_string(),
        title,
        alt_titles,
        synopsis: localized(&attrs.description),
        cover_url,
        status: attrs.status.as_deref().map(map_status).unwrap_or_default(),
        views: 0,
        genres,
        created_at: attrs.created_at,
        updated_at: attrs.updated_at,
    }
}

/// `None` for chapters without a number (oneshots, extras).
pub(crate) fn map_chapter(
    title_source_id: &str,
    chapter: ChapterData,
    pages: Vec<String>,
) -> Option<CanonicalChapter> {
    let number = chapter
        .attributes
        .chapter
        .as_deref()
        .and_then(parse_chapter_number)?;

    Some(CanonicalChapter {
        source_id: chapter.id,
        title_source_id: title_source_id.to_string(),
        number,
        title: chapter.attributes.title.filter(|t| !t.trim().is_empty()),
        slug: chapter_slug(number),
        pages,
        views: 0,
        released_at: chapter.attributes.publish_at,
    })
}

fn page_offset(page: u32, limit: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(limit)
}

fn offset_cursor(offset: u32, limit: u32, total: u64, page: u32) -> (bool, Option<u32>) {
    let has_next = u64::from(offset) + u64::from(limit) < total;
    let next_page = if has_next { page.checked_add(1) } else { None };
    (next_page.is_some(), next_page)
}

pub struct MangaDexSource {
    client: SourceClient,
    base_url: String,
    limit: u32,
}

impl MangaDexSource {
    pub fn new(client: SourceClient, base_url: &str, limit: u32) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limit: limit.clamp(1, MAX_LIMIT),
        }
    }

    async fn fetch_pages(&self, chapter_id: &str) -> SyncResult<Vec<String>> {
        let url = format!("{}/at-home/server/{}", self.base_url, chapter_id);
        let at_home: AtHome = self.client.get_json(&url, &[]).await?;
        Ok(at_home
            .chapter
            .data
            .iter()
            .map(|file| format!("{}/data/{}/{}", at_home.base_url, at_home.chapter.hash, file))
            .collect())
    }
}

#[async_trait]
impl SourceAdapter for MangaDexSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_catalog_page(&self, page: u32) -> SyncResult<CatalogPage> {
        let url = format!("{}/manga", self.base_url);
        let list: MangaList = self
            .client
            .get_json(
                &url,
                &[
                    ("limit", self.limit.to_string()),
                    ("offset", page_offset(page, self.limit).to_string()),
                    ("includes[]", "cover_art".to_string()),
                    ("order[createdAt]", "asc".to_string()),
                ],
            )
            .await?;

        let (has_next, next_page) = offset_cursor(list.offset, list.limit, list.total, page);
        Ok(CatalogPage {
            titles: list.data.into_iter().map(map_title).collect(),
            has_next,
            next_page,
            total: Some(list.total),
        })
    }

    async fn fetch_title_detail(&self, provider_id: &str) -> SyncResult<CanonicalTitle> {
        let url = format!("{}/manga/{}", self.base_url, provider_id);
        let entity: MangaEntity = self
            .client
            .get_json(&url, &[("includes[]", "cover_art".to_string())])
            .await?;
        Ok(map_title(entity.data))
    }

    async fn fetch_chapter_list(&self, provider_title_id: &str, page: u32) -> SyncResult<ChapterPage> {
        let url = format!("{}/manga/{}/feed", self.base_url, provider_title_id);
        let list: ChapterList = self
            .client
            .get_json(
                &url,
                &[
                    ("limit", self.limit.to_string()),
                    ("offset", page_offset(page, self.limit).to_string()),
                    ("translatedLanguage[]", "en".to_string()),
                    ("order[chapter]", "asc".to_string()),
                ],
            )
            .await?;

        let (has_next, next_page) = offset_cursor(list.offset, list.limit, list.total, page);
        let mut chapters = Vec::with_capacity(list.data.len());
        for chapter in list.data {
            if chapter.attributes.chapter.as_deref().and_then(parse_chapter_number).is_none() {
                log::warn!("[{}] skipping chapter {} without a number", NAME, chapter.id);
                continue;
            }
            let pages = self.fetch_pages(&chapter.id).await?;
            chapters.extend(map_chapter(provider_title_id, chapter, pages));
        }

        Ok(ChapterPage {
            chapters,
            has_next,
            next_page,
        })
    }
}
