use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "manga-sync", author, version, about = "Ingest and sync a manga catalog from an HTTP source")]
pub struct Cli {
    /// Registered source name (e.g. `json-api`, `mangadex`).
    pub source: String,

    /// First catalog page to crawl.
    pub start_page: Option<u32>,

    /// Last catalog page to crawl (inclusive).
    pub end_page: Option<u32>,

    /// Provider id to ingest, or with `--sync` the slug / id of a stored title.
    #[arg(long)]
    pub manga_id: Option<String>,

    /// Sync stored titles instead of crawling the catalog.
    #[arg(long)]
    pub sync: bool,

    /// Store source image URLs verbatim.
    #[arg(long)]
    pub use_original_images: bool,

    /// Maximum concurrent store operations.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Bearer token sent to the source.
    #[arg(long)]
    pub auth_token: Option<String>,

    /// Path to `config.toml`.
    #[arg(long)]
    pub config: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Crawl { start_page: u32, end_page: Option<u32> },
    Ingest { provider_id: String },
    SyncTitle { ident: String },
    SyncAll,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        match (self.sync, &self.manga_id) {
            (true, Some(ident)) => Mode::SyncTitle { ident: ident.clone() },
            (true, None) => Mode::SyncAll,
            (false, Some(id)) => Mode::Ingest { provider_id: id.clone() },
            (false, None) => Mode::Crawl {
                start_page: self.start_page.unwrap_or(1).max(1),
                end_page: self.end_page,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("manga-sync").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_crawl_pages() {
        let cli = parse(&["json-api", "2", "5", "--concurrency=2"]);
        assert_eq!(cli.mode(), Mode::Crawl { start_page: 2, end_page: Some(5) });
        assert_eq!(cli.concurrency, Some(2));

        assert_eq!(parse(&["json-api"]).mode(), Mode::Crawl { start_page: 1, end_page: None });
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(
            parse(&["mangadex", "--manga-id=a1b2"]).mode(),
            Mode::Ingest { provider_id: "a1b2".to_string() }
        );
        assert_eq!(
            parse(&["json-api", "--sync", "--manga-id=solo-leveling"]).mode(),
            Mode::SyncTitle { ident: "solo-leveling".to_string() }
        );
        assert_eq!(parse(&["json-api", "--sync"]).mode(), Mode::SyncAll);
    }

    #[test]
    fn test_flags() {
        let cli = parse(&["json-api", "--use-original-images", "--auth-token=secret", "--config=alt.toml"]);
        assert!(cli.use_original_images);
        assert_eq!(cli.auth_token.as_deref(), Some("secret"));
        assert_eq!(cli.config.as_deref(), Some("alt.toml"));
    }

    #[test]
    fn test_missing_source_is_rejected() {
        assert!(Cli::try_parse_from(["manga-sync"]).is_err());
    }
}
