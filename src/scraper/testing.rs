//! Scripted `Fetch` double shared by the scraper, archive and pipeline tests.

use super::http_client::{Fetch, FetchError, parse_json_body};
use crate::config::ScraperConfig;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

enum Reply {
    Json(Value),
    Raw(Vec<u8>),
    Status(u16),
}

/// Answers from a fixed URL table and records every URL asked for.
/// Unscripted URLs answer HTTP 404.
#[derive(Default)]
pub struct ScriptedFetch {
    replies: HashMap<String, Reply>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(mut self, url: impl Into<String>, body: Value) -> Self {
        self.replies.insert(url.into(), Reply::Json(body));
        self
    }

    pub fn with_raw(mut self, url: impl Into<String>, body: Vec<u8>) -> Self {
        self.replies.insert(url.into(), Reply::Raw(body));
        self
    }

    pub fn with_status(mut self, url: impl Into<String>, status: u16) -> Self {
        self.replies.insert(url.into(), Reply::Status(status));
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.requests().iter().filter(|u| u.starts_with(prefix)).count()
    }

    fn answer(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        match self.replies.get(url) {
            Some(Reply::Json(v)) => Ok(v.to_string().into_bytes()),
            Some(Reply::Raw(b)) => Ok(b.clone()),
            Some(Reply::Status(status)) => Err(FetchError::Status { status: *status, url: url.to_string() }),
            None => Err(FetchError::Status { status: 404, url: url.to_string() }),
        }
    }
}

#[async_trait]
impl Fetch for ScriptedFetch {
    async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        parse_json_body(&self.answer(url)?)
    }

    async fn fetch_raw(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.answer(url)
    }
}

pub fn test_config() -> ScraperConfig {
    ScraperConfig {
        base_url: "https://comick.test/".to_string(),
        image_host: "https://img.test/".to_string(),
        build_id: "b1".to_string(),
        ..ScraperConfig::default()
    }
}

pub fn comic_url(slug: &str) -> String {
    format!("https://comick.test/_next/data/b1/comic/{slug}.json?slug={slug}")
}

pub fn chapter_url(slug: &str, hid: &str, unit: &str, chap: &str, lang: &str) -> String {
    let chapter = format!("{hid}-{unit}-{chap}-{lang}");
    format!("https://comick.test/_next/data/b1/comic/{slug}/{chapter}.json?slug={slug}&chapter={chapter}")
}
