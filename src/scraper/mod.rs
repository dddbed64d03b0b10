pub mod build_id;
pub mod http_client;
#[cfg(test)]
pub(crate) mod testing;

use crate::config::ScraperConfig;
use crate::models::{
    ChapterDocument, ChapterRecord, ComicDocument, ComicSummary, Image, UnitType,
    same_chapter_number,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use self::build_id::extract_build_id;
use self::http_client::{Fetch, FetchError, HttpClient};

/// Redirect marker the upstream sets when a chapter route is really a volume.
const VOLUME_REDIRECT_STATUS: u16 = 308;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("The link format is incorrect: {url}. For example: https://comick.io/comic/<slug>")]
    InvalidUrlFormat { url: String },

    #[error("Problem getting the data: {0}")]
    UpstreamFetch(#[source] FetchError),

    #[error("Upstream reported notFound for {url}")]
    UpstreamNotFound { url: String },

    #[error("Comic data not received. Please send the comicUrl parameter")]
    NoDataAvailable,

    #[error("We do not have Chapters in this language yet: {lang}")]
    NoChaptersInLanguage { lang: String },

    #[error("type is volume")]
    WrongUnitType,

    #[error("This part of this Chapters is not available yet: {chapter}")]
    ChapterPartUnavailable { chapter: String },

    #[error("Upstream document has no {0}")]
    MissingField(&'static str),

    #[error("Malformed upstream document: {0}")]
    MalformedDocument(#[source] serde_json::Error),

    #[error("Build ID not found!")]
    BuildIdNotFound,
}

impl ScrapeError {
    fn from_fetch(url: &str, err: FetchError) -> Self {
        match err {
            FetchError::NotFound => ScrapeError::UpstreamNotFound { url: url.to_string() },
            other => ScrapeError::UpstreamFetch(other),
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ScrapeError> {
    serde_json::from_value(value).map_err(ScrapeError::MalformedDocument)
}

/// Slug of a `https://host/comic/{slug}` link.
pub fn parse_comic_slug(comic_url: &str) -> Result<String, ScrapeError> {
    let invalid = || ScrapeError::InvalidUrlFormat { url: comic_url.to_string() };

    let url = Url::parse(comic_url).map_err(|_| invalid())?;
    let mut segments = url.path_segments().ok_or_else(invalid)?;
    if segments.next() != Some("comic") {
        return Err(invalid());
    }
    match segments.next() {
        Some(slug) if !slug.is_empty() => Ok(slug.to_string()),
        _ => Err(invalid()),
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Stateless access to the upstream's `_next/data` routes.
///
/// The only mutable piece is the build id, which [`refresh_build_id`]
/// replaces when the upstream redeploys. A build id the site root has
/// already confirmed is never checked again, so a batch of genuinely
/// missing routes costs at most one root fetch.
///
/// [`refresh_build_id`]: ComickClient::refresh_build_id
pub struct ComickClient<F = HttpClient> {
    fetcher: F,
    base_url: String,
    image_host: String,
    build_id: RwLock<String>,
    confirmed_build_id: RwLock<Option<String>>,
    auto_refresh: bool,
}

impl ComickClient<HttpClient> {
    pub fn new(config: &ScraperConfig) -> Result<Self, FetchError> {
        Ok(Self::with_fetcher(HttpClient::new(config)?, config))
    }
}

impl<F: Fetch> ComickClient<F> {
    pub fn with_fetcher(fetcher: F, config: &ScraperConfig) -> Self {
        Self {
            fetcher,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            image_host: config.image_host.clone(),
            build_id: RwLock::new(config.build_id.clone()),
            confirmed_build_id: RwLock::new(None),
            auto_refresh: config.auto_refresh_build_id,
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Start a request-scoped session holding the last fetched documents.
    pub fn session(&self) -> ComicSession<'_, F> {
        ComicSession {
            client: self,
            comic: None,
            chapter: None,
        }
    }

    pub fn build_id(&self) -> String {
        match self.build_id.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_build_id(&self, id: String) {
        let mut guard = match self.build_id.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = id.clone();

        let mut confirmed = match self.confirmed_build_id.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *confirmed = Some(id);
    }

    fn is_confirmed(&self, build_id: &str) -> bool {
        let guard = match self.confirmed_build_id.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_deref() == Some(build_id)
    }

    /// Image host and storage key, concatenated verbatim.
    pub fn image_url(&self, storage_key: &str) -> String {
        format!("{}{}", self.image_host, storage_key)
    }

    fn comic_data_url(&self, build_id: &str, slug: &str) -> String {
        format!(
            "{}/_next/data/{}/comic/{}.json?slug={}",
            self.base_url, build_id, slug, slug
        )
    }

    fn chapter_data_url(
        &self,
        build_id: &str,
        slug: &str,
        hid: &str,
        unit: UnitType,
        chap: &str,
        lang: &str,
    ) -> String {
        let chapter = format!("{}-{}-{}-{}", hid, unit, chap, lang);
        format!(
            "{}/_next/data/{}/comic/{}/{}.json?slug={}&chapter={}",
            self.base_url, build_id, slug, chapter, slug, chapter
        )
    }

    /// Read the current build id off the site root and adopt it.
    pub async fn refresh_build_id(&self) -> Result<String, ScrapeError> {
        let url = format!("{}/", self.base_url);
        let body = self
            .fetcher
            .fetch_raw(&url)
            .await
            .map_err(|e| ScrapeError::from_fetch(&url, e))?;

        let fresh = extract_build_id(&String::from_utf8_lossy(&body))
            .ok_or(ScrapeError::BuildIdNotFound)?;
        self.set_build_id(fresh.clone());
        info!("Build id is now {}", fresh);
        Ok(fresh)
    }

    /// Fetch a `_next/data` route, refreshing a stale build id once.
    async fn fetch_next_data<R>(&self, route: R) -> Result<Value, ScrapeError>
    where
        R: Fn(&str) -> String + Send + Sync,
    {
        let build_id = self.build_id();
        let url = route(&build_id);

        let err = match self.fetcher.fetch_json(&url).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if !(self.auto_refresh && err.is_missing_route()) {
            return Err(ScrapeError::from_fetch(&url, err));
        }
        if self.is_confirmed(&build_id) {
            debug!("{} missed with confirmed build id {}", url, build_id);
            return Err(ScrapeError::from_fetch(&url, err));
        }

        warn!("{} missed with build id {}, checking for a redeploy", url, build_id);
        match self.refresh_build_id().await {
            Ok(fresh) if fresh != build_id => {
                let url = route(&fresh);
                self.fetcher
                    .fetch_json(&url)
                    .await
                    .map_err(|e| ScrapeError::from_fetch(&url, e))
            }
            Ok(_) => Err(ScrapeError::from_fetch(&url, err)),
            Err(refresh_err) => {
                warn!("Build id refresh failed: {}", refresh_err);
                Err(ScrapeError::from_fetch(&url, err))
            }
        }
    }

    pub async fn fetch_comic(&self, slug: &str) -> Result<ComicDocument, ScrapeError> {
        let value = self
            .fetch_next_data(|build_id| self.comic_data_url(build_id, slug))
            .await?;
        decode(value)
    }

    pub async fn fetch_chapter(
        &self,
        slug: &str,
        hid: &str,
        unit: UnitType,
        chap: &str,
        lang: &str,
    ) -> Result<ChapterDocument, ScrapeError> {
        let value = self
            .fetch_next_data(|build_id| {
                self.chapter_data_url(build_id, slug, hid, unit, chap, lang)
            })
            .await?;
        decode(value)
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// The last comic and chapter documents fetched within one logical request.
///
/// Accessors given a URL fetch (and remember) that comic first; accessors
/// given `None` project the remembered document, or fail with
/// [`ScrapeError::NoDataAvailable`] when nothing has been fetched yet.
pub struct ComicSession<'c, F = HttpClient> {
    client: &'c ComickClient<F>,
    comic: Option<ComicDocument>,
    chapter: Option<ChapterDocument>,
}

impl<'c, F: Fetch> ComicSession<'c, F> {
    pub fn client(&self) -> &'c ComickClient<F> {
        self.client
    }

    #[cfg(test)]
    pub fn comic(&self) -> Option<&ComicDocument> {
        self.comic.as_ref()
    }

    #[cfg(test)]
    pub fn chapter(&self) -> Option<&ChapterDocument> {
        self.chapter.as_ref()
    }

    pub async fn get_comic_data(&mut self, comic_url: &str) -> Result<&ComicDocument, ScrapeError> {
        let slug = parse_comic_slug(comic_url)?;
        let doc = self.client.fetch_comic(&slug).await?;
        debug!(
            "{}: comic {} with {} first chapters",
            slug,
            doc.page_props.comic.id,
            doc.page_props.first_chapters.len()
        );
        Ok(&*self.comic.insert(doc))
    }

    async fn resolve(&mut self, comic_url: Option<&str>) -> Result<&ComicDocument, ScrapeError> {
        match comic_url {
            Some(url) => self.get_comic_data(url).await,
            None => self.comic.as_ref().ok_or(ScrapeError::NoDataAvailable),
        }
    }

    pub async fn comic_id(&mut self, comic_url: Option<&str>) -> Result<String, ScrapeError> {
        Ok(self.resolve(comic_url).await?.page_props.comic.id.clone())
    }

    pub async fn comic_country(
        &mut self,
        comic_url: Option<&str>,
    ) -> Result<Option<String>, ScrapeError> {
        Ok(self.resolve(comic_url).await?.page_props.comic.country.clone())
    }

    pub async fn comic_last_chapter(&mut self, comic_url: Option<&str>) -> Result<i64, ScrapeError> {
        Ok(self.resolve(comic_url).await?.page_props.comic.last_chapter_number())
    }

    pub async fn comic_cover_link(&mut self, comic_url: Option<&str>) -> Result<String, ScrapeError> {
        let client = self.client;
        let cover = self
            .resolve(comic_url)
            .await?
            .page_props
            .comic
            .md_covers
            .first()
            .ok_or(ScrapeError::MissingField("cover entries"))?;
        Ok(client.image_url(&cover.b2key))
    }

    pub async fn comic_slug(&mut self, comic_url: Option<&str>) -> Result<String, ScrapeError> {
        Ok(self.resolve(comic_url).await?.page_props.comic.slug.clone())
    }

    pub async fn comic_title(&mut self, comic_url: Option<&str>) -> Result<String, ScrapeError> {
        Ok(self.resolve(comic_url).await?.page_props.comic.title.clone())
    }

    /// All projections at once; a missing cover is reported as `None`.
    pub async fn comic_summary(
        &mut self,
        comic_url: Option<&str>,
    ) -> Result<ComicSummary, ScrapeError> {
        let client = self.client;
        let comic = &self.resolve(comic_url).await?.page_props.comic;
        Ok(ComicSummary {
            comicid: comic.id.clone(),
            slug: comic.slug.clone(),
            title: comic.title.clone(),
            country: comic.country.clone(),
            last_chapter: comic.last_chapter_number(),
            cover: comic.md_covers.first().map(|c| client.image_url(&c.b2key)),
        })
    }

    /// First-chapter listing, optionally narrowed to a language and then to
    /// one chapter number looked up through each candidate's detail route.
    pub async fn get_comic_chapters(
        &mut self,
        comic_url: Option<&str>,
        lang: Option<&str>,
        chapter: Option<&str>,
        unit: UnitType,
    ) -> Result<Vec<ChapterRecord>, ScrapeError> {
        let client = self.client;
        let doc = self.resolve(comic_url).await?;
        let slug = doc.page_props.comic.slug.clone();

        let candidates: Vec<ChapterRecord> = match lang {
            None => doc.page_props.first_chapters.clone(),
            Some(lang) => {
                let filtered: Vec<ChapterRecord> = doc
                    .page_props
                    .first_chapters
                    .iter()
                    .filter(|c| c.lang.as_deref() == Some(lang))
                    .cloned()
                    .collect();
                if filtered.is_empty() {
                    return Err(ScrapeError::NoChaptersInLanguage { lang: lang.to_string() });
                }
                filtered
            }
        };

        let Some(chapter) = chapter else {
            return Ok(candidates);
        };

        let mut found = Vec::new();
        for candidate in &candidates {
            let (Some(hid), Some(cand_lang)) = (candidate.hid.as_deref(), candidate.lang.as_deref())
            else {
                warn!("{}: chapter entry without hid or lang, skipping", slug);
                continue;
            };

            let detail = match client
                .fetch_chapter(&slug, hid, unit, &candidate.chap, cand_lang)
                .await
            {
                Ok(detail) => detail,
                Err(e) => {
                    warn!("{}: chapter {} ({}) unavailable: {}", slug, hid, cand_lang, e);
                    continue;
                }
            };

            if detail.page_props.redirect_status == Some(VOLUME_REDIRECT_STATUS) {
                return Err(ScrapeError::WrongUnitType);
            }

            if let Some(hit) = detail
                .page_props
                .chapters
                .into_iter()
                .find(|c| same_chapter_number(chapter, &c.chap))
            {
                found.push(hit);
            }
        }

        if found.is_empty() {
            return Err(ScrapeError::ChapterPartUnavailable { chapter: chapter.to_string() });
        }
        Ok(found)
    }

    /// Page images of one chapter, always fetched fresh.
    pub async fn get_comic_chapter(
        &mut self,
        comic_url: &str,
        hid: &str,
        lang: &str,
        chapter: &str,
    ) -> Result<Vec<Image>, ScrapeError> {
        let slug = self.get_comic_data(comic_url).await?.page_props.comic.slug.clone();
        let doc = self
            .client
            .fetch_chapter(&slug, hid, UnitType::Chapter, chapter, lang)
            .await?;

        if doc.page_props.redirect_status == Some(VOLUME_REDIRECT_STATUS) {
            return Err(ScrapeError::WrongUnitType);
        }

        if doc.page_props.chapter.is_none() {
            return Err(ScrapeError::MissingField("chapter"));
        }

        let client = self.client;
        let cached = self.chapter.insert(doc);
        let images: Vec<Image> = cached
            .page_props
            .chapter
            .iter()
            .flat_map(|detail| &detail.md_images)
            .map(|key| Image { url: client.image_url(&key.b2key) })
            .collect();

        debug!("{}: chapter {} has {} images", slug, hid, images.len());
        Ok(images)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
