//! Helper functions shared by the source adapters
//!
//! - Slug derivation for titles and genres that arrive without one
//! - Chapter number extraction from provider strings
//! - Page reference cleanup before comparison and storage
//!
//! # Examples
//!
//! ```
//! use manga_sync::helpers::{slugify, parse_chapter_number};
//!
//! assert_eq!(slugify("One Piece: Film Red"), "one-piece-film-red");
//! assert_eq!(parse_chapter_number("Chapter 10.5").unwrap().to_string(), "10.5");
//! ```

use crate::models::ChapterNumber;
use regex::Regex;
use std::sync::OnceLock;

fn non_alnum() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static regex"))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("static regex"))
}

/// Lowercase, collapse every non-alphanumeric run into a single dash.
pub fn slugify(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    non_alnum()
        .replace_all(&lower, "-")
        .trim_matches('-')
        .to_string()
}

/// `slugify(name)`, or `fallback` slugified when the name has no ASCII
/// letters or digits (e.g. a title only in Japanese).
pub fn slugify_or(name: &str, fallback: &str) -> String {
    let slug = slugify(name);
    if slug.is_empty() {
        slugify(fallback)
    } else {
        slug
    }
}

/// Extract the first decimal number from a chapter label ("Ch. 12.5" -> 12.5)
pub fn parse_chapter_number(s: &str) -> Option<ChapterNumber> {
    number_re()
        .captures(s)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(ChapterNumber::new)
}

/// Slug used for chapters when the provider does not send one
pub fn chapter_slug(number: ChapterNumber) -> String {
    format!("chapter-{}", number.to_string().replace('.', "-"))
}

/// Trim every page reference and drop the blank ones, keeping order.
pub fn clean_page_refs(pages: &[String]) -> Vec<String> {
    pages
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
