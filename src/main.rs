mod archive;
mod config;
mod favorites;
mod models;
mod pipeline;
mod scraper;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::archive::{ArchiveOutcome, ChapterArchiver};
use crate::config::AppConfig;
use crate::favorites::FavoritesStore;
use crate::models::UnitType;
use crate::pipeline::UpdatePipeline;
use crate::scraper::ComickClient;
use crate::utils::{envelope, flat_envelope, paginate};

#[derive(Parser)]
#[command(name = "comick-scrape", about = "Comick comic scraper and chapter archiver", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Show a comic's metadata, or a single field of it
    Comic {
        /// Comic link, e.g. https://comick.io/comic/<slug>
        url: String,

        #[arg(short, long, value_enum)]
        field: Option<ComicField>,
    },

    /// List a comic's first chapters
    Chapters {
        url: String,

        /// Keep only chapters in this language code
        #[arg(short, long)]
        lang: Option<String>,

        /// Look up this chapter number through each candidate
        #[arg(short, long)]
        chapter: Option<String>,

        #[arg(long, default_value = "chapter")]
        unit: UnitType,

        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 20)]
        per_page: usize,
    },

    /// List the page image URLs of one chapter
    Pages {
        url: String,
        #[arg(long)]
        hid: String,
        #[arg(short, long)]
        lang: String,
        #[arg(short, long)]
        chapter: String,
    },

    /// Bundle one chapter's pages into a zip archive
    Download {
        url: String,
        #[arg(long)]
        hid: String,
        #[arg(short, long)]
        lang: String,
        #[arg(short, long)]
        chapter: String,

        /// Output directory (default: archive.output_dir)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Manage the favorites list
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },

    /// Check every favorite for its latest chapter
    Updates,

    /// Read the current build id from the site and print it
    BuildId,
}

#[derive(Subcommand)]
enum FavoritesAction {
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        per_page: usize,
    },
    /// Remember a comic link, e.g. https://comick.io/comic/<slug>
    Add {
        comic_url: String,
    },
    /// Forget a comic link
    Remove {
        comic_url: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ComicField {
    Id,
    Country,
    LastChapter,
    Cover,
    Slug,
    Title,
}

#[derive(Serialize)]
struct DownloadResponse {
    message: &'static str,
    #[serde(flatten)]
    outcome: ArchiveOutcome,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "comick_scrape=info,warn",
        1 => "comick_scrape=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    let response = match cli.command {
        Command::Comic { url, field } => {
            let client = ComickClient::new(&config.scraper)?;
            let mut session = client.session();
            let url = Some(url.as_str());
            match field {
                None => flat_envelope(session.comic_summary(url).await),
                Some(ComicField::Id) => envelope("comicid", session.comic_id(url).await),
                Some(ComicField::Country) => envelope("country", session.comic_country(url).await),
                Some(ComicField::LastChapter) => {
                    envelope("last_chapter", session.comic_last_chapter(url).await)
                }
                Some(ComicField::Cover) => envelope("cover", session.comic_cover_link(url).await),
                Some(ComicField::Slug) => envelope("slug", session.comic_slug(url).await),
                Some(ComicField::Title) => envelope("title", session.comic_title(url).await),
            }
        }

        Command::Chapters { url, lang, chapter, unit, page, per_page } => {
            let client = ComickClient::new(&config.scraper)?;
            let chapters = client
                .session()
                .get_comic_chapters(Some(url.as_str()), lang.as_deref(), chapter.as_deref(), unit)
                .await;
            envelope("chapters", chapters.map(|c| paginate(&c, page, per_page)))
        }

        Command::Pages { url, hid, lang, chapter } => {
            let client = ComickClient::new(&config.scraper)?;
            let images = client
                .session()
                .get_comic_chapter(&url, &hid, &lang, &chapter)
                .await;
            envelope("images", images)
        }

        Command::Download { url, hid, lang, chapter, out } => {
            let _t = utils::Timer::start(format!("Chapter download {}-{}-{}", hid, lang, chapter));
            if let Some(out) = out {
                config.archive.output_dir = out;
            }
            let archiver = ChapterArchiver::new(&config.archive);
            debug!("Archives go to {}", archiver.output_dir().display());
            let client = ComickClient::new(&config.scraper)?;
            let mut session = client.session();
            let outcome = archiver
                .download_chapter_archive(&mut session, &url, &hid, &lang, &chapter)
                .await
                .map(|outcome| {
                    info!("{}: {}", outcome.message(), outcome.path.display());
                    DownloadResponse { message: outcome.message(), outcome }
                });
            flat_envelope(outcome)
        }

        Command::Favorites { action } => {
            let store = FavoritesStore::new(&config.favorites.path);
            debug!("Favorites file {}", store.path().display());
            let favorites = match action {
                FavoritesAction::List { page, per_page } => {
                    store.list().map(|f| paginate(&f, page, per_page))
                }
                FavoritesAction::Add { comic_url } => store.add(&comic_url),
                FavoritesAction::Remove { comic_url } => store.remove(&comic_url),
            };
            envelope("favorites", favorites.map_err(|e| format!("{:#}", e)))
        }

        Command::Updates => {
            let _t = utils::Timer::start("Favorites update check");
            let favorites = FavoritesStore::new(&config.favorites.path).list()?;
            let (reports, _stats) = UpdatePipeline::new(&config)?.run(&favorites).await?;
            envelope("updates", Ok::<_, String>(reports))
        }

        Command::BuildId => {
            let client = ComickClient::new(&config.scraper)?;
            envelope("buildId", client.refresh_build_id().await)
        }
    };

    println!("{}", serde_json::to_string_pretty(&response)?);

    if response.get("status") != Some(&Value::Bool(true)) {
        std::process::exit(1);
    }
    Ok(())
}
