//! Chapter archiver: bundles a chapter's page images into one zip file.
//!
//! Archives are named `{slug}-{hid}-{lang}-{chapter}.zip` and are never
//! rebuilt once present. Pages are written to a hidden temp file next to the
//! target and moved into place only after the last page is in, so a failed
//! or concurrent build never leaves a half-written archive under the final
//! name.

use crate::config::ArchiveConfig;
use crate::scraper::http_client::{Fetch, FetchError};
use crate::scraper::{ComicSession, ScrapeError};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Error fetching chapter data: {0}")]
    SourceFetchFailed(#[source] ScrapeError),

    #[error("Failed to download image: {url}")]
    ImageDownloadFailed {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Invalid archive name part: {part:?}")]
    InvalidNamePart { part: String },

    #[error("Failed to create ZIP file {}: {source}", .path.display())]
    ArchiveCreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn create_failed(path: &Path, err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> ArchiveError {
    ArchiveError::ArchiveCreateFailed {
        path: path.to_path_buf(),
        source: io::Error::other(err),
    }
}

/// Where a chapter archive ended up.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ArchiveOutcome {
    #[serde(rename = "zipName")]
    pub name: String,
    #[serde(rename = "zipUrl")]
    pub url: String,
    #[serde(skip)]
    pub path: PathBuf,
    /// False when an existing archive was returned untouched.
    #[serde(skip)]
    pub created: bool,
}

impl ArchiveOutcome {
    pub fn message(&self) -> &'static str {
        if self.created {
            "ZIP file created successfully"
        } else {
            "ZIP file already exists"
        }
    }
}

pub fn archive_file_name(slug: &str, hid: &str, lang: &str, chapter: &str) -> String {
    format!("{}-{}-{}-{}.zip", slug, hid, lang, chapter)
}

/// Name parts become one file name inside the output directory, so they
/// may not carry path separators.
fn check_name_part(part: &str) -> Result<(), ArchiveError> {
    if part.contains(['/', '\\', '\0']) {
        return Err(ArchiveError::InvalidNamePart { part: part.to_string() });
    }
    Ok(())
}

pub fn page_entry_name(index: usize) -> String {
    format!("image-{}.jpg", index + 1)
}

pub struct ChapterArchiver {
    output_dir: PathBuf,
    public: PublicUrls,
}

impl ChapterArchiver {
    pub fn new(config: &ArchiveConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            public: PublicUrls::new(config.document_root.clone(), config.public_base_url.clone()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub async fn download_chapter_archive<F: Fetch>(
        &self,
        session: &mut ComicSession<'_, F>,
        comic_url: &str,
        hid: &str,
        lang: &str,
        chapter: &str,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        for part in [hid, lang, chapter] {
            check_name_part(part)?;
        }

        let images = session
            .get_comic_chapter(comic_url, hid, lang, chapter)
            .await
            .map_err(ArchiveError::SourceFetchFailed)?;
        let slug = session
            .comic_slug(None)
            .await
            .map_err(ArchiveError::SourceFetchFailed)?;
        check_name_part(&slug)?;

        let name = archive_file_name(&slug, hid, lang, chapter);
        let path = self.output_dir.join(&name);

        if path.exists() {
            debug!("{} exists, skipping", path.display());
            return Ok(self.outcome(name, path, false));
        }

        std::fs::create_dir_all(&self.output_dir).map_err(|e| create_failed(&self.output_dir, e))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".zip.part")
            .tempfile_in(&self.output_dir)
            .map_err(|e| create_failed(&path, e))?;

        info!("Writing {} pages to {}", images.len(), path.display());
        {
            let mut zip = ZipWriter::new(tmp.as_file_mut());
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Stored)
                .unix_permissions(0o644);

            let fetcher = session.client().fetcher();
            for (index, image) in images.iter().enumerate() {
                let bytes = fetcher.fetch_raw(&image.url).await.map_err(|source| {
                    ArchiveError::ImageDownloadFailed {
                        url: image.url.clone(),
                        source,
                    }
                })?;

                let entry = page_entry_name(index);
                debug!("Writing page \"{}\" ({} bytes)", entry, bytes.len());
                zip.start_file(entry, options).map_err(|e| create_failed(&path, e))?;
                zip.write_all(&bytes).map_err(|e| create_failed(&path, e))?;
            }

            zip.finish().map_err(|e| create_failed(&path, e))?;
        }

        match tmp.persist_noclobber(&path) {
            Ok(_) => Ok(self.outcome(name, path, true)),
            // Another writer finished the same chapter first; theirs stands.
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                debug!("{} appeared while writing, keeping it", path.display());
                Ok(self.outcome(name, path, false))
            }
            Err(e) => Err(create_failed(&path, e.error)),
        }
    }

    fn outcome(&self, name: String, path: PathBuf, created: bool) -> ArchiveOutcome {
        let url = self.public.url_for(&path);
        ArchiveOutcome { name, url, path, created }
    }
}

// ── Public URLs ───────────────────────────────────────────────────────────────

/// Maps archive paths under a served document root onto public URLs.
#[derive(Debug, Clone, Default)]
pub struct PublicUrls {
    document_root: Option<PathBuf>,
    base_url: Option<String>,
}

impl PublicUrls {
    pub fn new(document_root: Option<PathBuf>, base_url: Option<String>) -> Self {
        Self { document_root, base_url }
    }

    /// Public URL when the path lies under the document root, `file://` URL otherwise.
    pub fn url_for(&self, path: &Path) -> String {
        let absolute = absolutize(path);

        if let (Some(root), Some(base)) = (&self.document_root, &self.base_url) {
            if let Ok(relative) = absolute.strip_prefix(absolutize(root)) {
                let parts: Vec<String> = relative
                    .components()
                    .filter_map(|c| match c {
                        Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect();
                return format!("{}/{}", base.trim_end_matches('/'), parts.join("/"));
            }
        }

        Url::from_file_path(&absolute)
            .map(String::from)
            .unwrap_or_else(|_| absolute.display().to_string())
    }
}

fn absolutize(path: &Path) -> PathBuf {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    // resolve symlinks through the deepest part that exists
    for ancestor in path.ancestors() {
        if let Ok(canonical) = ancestor.canonicalize() {
            if let Ok(rest) = path.strip_prefix(ancestor) {
                return canonical.join(rest);
            }
        }
    }
    path
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::ComickClient;
    use crate::scraper::testing::{ScriptedFetch, chapter_url, comic_url, test_config};
    use serde_json::json;
    use std::io::Read;
    use tokio_test::{assert_err, assert_ok};

    const COMIC: &str = "https://comick.io/comic/abc";

    /// Finishes the same archive from "another writer" while pages download.
    struct RacingFetch {
        inner: ScriptedFetch,
        target: PathBuf,
    }

    #[async_trait::async_trait]
    impl Fetch for RacingFetch {
        async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
            self.inner.fetch_json(url).await
        }

        async fn fetch_raw(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            if !self.target.exists() {
                std::fs::write(&self.target, b"WINNER").unwrap();
            }
            self.inner.fetch_raw(url).await
        }
    }

    fn fetch_with_pages(pages: &[(&str, Option<&str>)]) -> ScriptedFetch {
        let keys: Vec<_> = pages.iter().map(|(k, _)| json!({"b2key": k})).collect();
        let mut fetch = ScriptedFetch::new()
            .with_json(
                comic_url("abc"),
                json!({"pageProps": {"comic": {"id": 1, "slug": "abc", "title": "A"}}}),
            )
            .with_json(
                chapter_url("abc", "hid9", "chapter", "3", "en"),
                json!({"pageProps": {"chapter": {"md_images": keys}}}),
            );
        for (key, body) in pages {
            let url = format!("https://img.test/{key}");
            fetch = match body {
                Some(body) => fetch.with_raw(url, body.as_bytes().to_vec()),
                None => fetch.with_status(url, 500),
            };
        }
        fetch
    }

    fn archiver(dir: &Path) -> ChapterArchiver {
        ChapterArchiver::new(&ArchiveConfig {
            output_dir: dir.join("zips"),
            document_root: Some(dir.to_path_buf()),
            public_base_url: Some("https://files.example/".to_string()),
        })
    }

    #[tokio::test]
    async fn pages_are_stored_in_order_under_sequential_names() {
        let dir = tempfile::tempdir().unwrap();
        let client = ComickClient::with_fetcher(
            fetch_with_pages(&[("zz.png", Some("first")), ("aa.webp", Some("second"))]),
            &test_config(),
        );
        let mut session = client.session();

        let outcome = assert_ok!(
            archiver(dir.path())
                .download_chapter_archive(&mut session, COMIC, "hid9", "en", "3")
                .await
        );

        assert!(outcome.created);
        assert_eq!(outcome.name, "abc-hid9-en-3.zip");
        assert_eq!(outcome.url, "https://files.example/zips/abc-hid9-en-3.zip");

        let mut zip = zip::ZipArchive::new(std::fs::File::open(&outcome.path).unwrap()).unwrap();
        assert_eq!(zip.len(), 2);
        let mut contents = String::new();
        zip.by_name("image-1.jpg").unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "first");
        contents.clear();
        zip.by_name("image-2.jpg").unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "second");
    }

    #[tokio::test]
    async fn second_call_reuses_the_existing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let client = ComickClient::with_fetcher(
            fetch_with_pages(&[("p1.jpg", Some("1")), ("p2.jpg", Some("2"))]),
            &test_config(),
        );
        let archiver = archiver(dir.path());

        let mut session = client.session();
        let first = archiver
            .download_chapter_archive(&mut session, COMIC, "hid9", "en", "3")
            .await
            .unwrap();
        let mut session = client.session();
        let second = archiver
            .download_chapter_archive(&mut session, COMIC, "hid9", "en", "3")
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(second.message(), "ZIP file already exists");
        assert_eq!(first.url, second.url);
        assert_eq!(client.fetcher().count("https://img.test/"), 2);
    }

    #[tokio::test]
    async fn failed_page_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let client = ComickClient::with_fetcher(
            fetch_with_pages(&[("p1.jpg", Some("1")), ("p2.jpg", None), ("p3.jpg", Some("3"))]),
            &test_config(),
        );
        let archiver = archiver(dir.path());
        let mut session = client.session();

        let err = assert_err!(
            archiver
                .download_chapter_archive(&mut session, COMIC, "hid9", "en", "3")
                .await
        );
        match err {
            ArchiveError::ImageDownloadFailed { url, .. } => assert_eq!(url, "https://img.test/p2.jpg"),
            other => panic!("unexpected error: {other}"),
        }

        assert!(!archiver.output_dir().join("abc-hid9-en-3.zip").exists());
        assert_eq!(std::fs::read_dir(archiver.output_dir()).unwrap().count(), 0);
        // aborted at the failing page
        assert_eq!(client.fetcher().count("https://img.test/p3.jpg"), 0);
    }

    #[tokio::test]
    async fn chapter_lookup_failure_is_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let client = ComickClient::with_fetcher(ScriptedFetch::new(), &test_config());
        let mut session = client.session();

        let err = assert_err!(
            archiver(dir.path())
                .download_chapter_archive(&mut session, "https://comick.io/series/abc", "h", "en", "1")
                .await
        );
        assert!(matches!(err, ArchiveError::SourceFetchFailed(ScrapeError::InvalidUrlFormat { .. })));
        assert!(err.to_string().starts_with("Error fetching chapter data: The link format is incorrect"));
        assert!(!dir.path().join("zips").exists());
    }

    #[tokio::test]
    async fn path_separators_in_name_parts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let client = ComickClient::with_fetcher(ScriptedFetch::new(), &test_config());
        let archiver = archiver(dir.path());

        for (hid, lang, chapter) in [("../../x", "en", "3"), ("hid9", "e/n", "3"), ("hid9", "en", "..\\3")] {
            let mut session = client.session();
            let err = assert_err!(
                archiver
                    .download_chapter_archive(&mut session, COMIC, hid, lang, chapter)
                    .await
            );
            assert!(matches!(err, ArchiveError::InvalidNamePart { .. }), "{err}");
        }
        assert!(client.fetcher().requests().is_empty());
        assert!(!dir.path().join("zips").exists());
    }

    #[tokio::test]
    async fn losing_a_concurrent_build_keeps_the_winners_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = archiver(dir.path());
        let target = archiver.output_dir().join("abc-hid9-en-3.zip");
        let fetch = RacingFetch {
            inner: fetch_with_pages(&[("p1.jpg", Some("1")), ("p2.jpg", Some("2"))]),
            target: target.clone(),
        };
        let client = ComickClient::with_fetcher(fetch, &test_config());
        let mut session = client.session();

        let outcome = assert_ok!(
            archiver
                .download_chapter_archive(&mut session, COMIC, "hid9", "en", "3")
                .await
        );

        assert!(!outcome.created);
        assert_eq!(outcome.path, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"WINNER");
        let left: Vec<_> = std::fs::read_dir(archiver.output_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(left, vec![std::ffi::OsString::from("abc-hid9-en-3.zip")]);
    }

    #[test]
    fn paths_outside_the_document_root_fall_back_to_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let urls = PublicUrls::new(Some(dir.path().to_path_buf()), Some("https://h".to_string()));

        let inside = dir.path().join("a").join("b.zip");
        assert_eq!(urls.url_for(&inside), "https://h/a/b.zip");

        let outside = other.path().join("b.zip");
        assert!(urls.url_for(&outside).starts_with("file://"));

        assert!(PublicUrls::default().url_for(&inside).starts_with("file://"));
    }
}
