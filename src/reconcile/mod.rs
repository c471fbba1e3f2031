//! Canonical values -> minimal store writes.
//!
//! Pages and genre links are always replaced as a whole; the helpers here
//! decide whether a replacement is needed at all.

use crate::models::{CanonicalChapter, PersistedChapter, PersistedPage};

pub mod chapter;
pub mod title;

pub use chapter::{ChapterOutcome, ChapterReconciler};
pub use title::TitleReconciler;

/// Decide whether a chapter's page list must be rewritten.
///
/// Rules, first match wins: `force`; different lengths; nothing stored yet;
/// any trimmed reference differing from the stored page at the same
/// position. Otherwise the stored pages are already current.
pub fn should_update_pages(existing: &[PersistedPage], new: &[String], force: bool) -> bool {
    if force {
        return true;
    }
    if existing.len() != new.len() {
        return true;
    }
    if existing.is_empty() {
        return true;
    }

    new.iter().enumerate().any(|(index, reference)| {
        let position = index as u32 + 1;
        match existing.iter().find(|p| p.page_number == position) {
            Some(page) => page.image_url != reference.trim(),
            None => true,
        }
    })
}

/// Page rewrite decision used by the reconcilers. A chapter that has no
/// pages on either side has nothing to write.
pub(crate) fn needs_page_write(existing: &[PersistedPage], new: &[String], force: bool) -> bool {
    if !force && existing.is_empty() && new.is_empty() {
        return false;
    }
    should_update_pages(existing, new, force)
}

/// True when a field that readers see changed. View counts are excluded.
pub fn metadata_changed(existing: &PersistedChapter, new: &CanonicalChapter) -> bool {
    existing.title != new.title
        || existing.slug != new.slug
        || existing.released_at != new.released_at.map(|d| d.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(urls: &[&str]) -> Vec<PersistedPage> {
        urls.iter()
            .enumerate()
            .map(|(i, url)| PersistedPage {
                chapter_id: 1,
                page_number: i as u32 + 1,
                image_url: url.to_string(),
            })
            .collect()
    }

    fn refs(urls: &[&str]) -> Vec<String> {
        urls.iter().map(|u| u.to_string()).collect()
    }

    #[test]
    fn test_identical_pages_are_skipped() {
        assert!(!should_update_pages(&stored(&["a", "b"]), &refs(&["a", "b"]), false));
        // new references are compared trimmed
        assert!(!should_update_pages(&stored(&["a", "b"]), &refs(&[" a", "b\n"]), false));
    }

    #[test]
    fn test_force_always_rewrites() {
        assert!(should_update_pages(&stored(&["a"]), &refs(&["a"]), true));
    }

    #[test]
    fn test_count_change_rewrites() {
        assert!(should_update_pages(&stored(&["a", "b"]), &refs(&["a"]), false));
    }

    #[test]
    fn test_no_existing_pages_rewrites() {
        assert!(should_update_pages(&[], &[], false));
        assert!(!needs_page_write(&[], &[], false));
        assert!(needs_page_write(&[], &refs(&["a"]), false));
    }

    #[test]
    fn test_positional_mismatch_rewrites() {
        assert!(should_update_pages(&stored(&["a", "b"]), &refs(&["b", "a"]), false));
        assert!(should_update_pages(&stored(&["a", "b"]), &refs(&["a", "c"]), false));
    }

    #[test]
    fn test_gap_in_stored_numbering_rewrites() {
        let mut pages = stored(&["a", "b"]);
        pages[1].page_number = 3;
        assert!(should_update_pages(&pages, &refs(&["a", "b"]), false));
    }
}
