//! Favorites kept as a flat JSON array of comic links in one file.

use crate::scraper::parse_comic_slug;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct FavoritesStore {
    path: PathBuf,
}

impl FavoritesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored links in insertion order; a missing file is an empty list.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {:?}", self.path))?;
        if raw.trim().is_empty() {
            return Ok(vec![]);
        }
        serde_json::from_str(&raw).with_context(|| format!("Corrupt favorites file {:?}", self.path))
    }

    /// Add a comic link unless already present. Returns the resulting list.
    pub fn add(&self, comic_url: &str) -> Result<Vec<String>> {
        parse_comic_slug(comic_url)?;
        let mut favorites = self.list()?;
        if !favorites.iter().any(|f| f == comic_url) {
            favorites.push(comic_url.to_string());
            self.save(&favorites)?;
            debug!("Added favorite {}", comic_url);
        }
        Ok(favorites)
    }

    /// Drop every entry equal to the link. Returns the resulting list.
    pub fn remove(&self, comic_url: &str) -> Result<Vec<String>> {
        let mut favorites = self.list()?;
        let before = favorites.len();
        favorites.retain(|f| f != comic_url);
        if favorites.len() != before {
            self.save(&favorites)?;
            debug!("Removed favorite {}", comic_url);
        }
        Ok(favorites)
    }

    fn save(&self, favorites: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let json = serde_json::to_string(favorites)?;
        std::fs::write(&self.path, json).with_context(|| format!("Failed to write {:?}", self.path))
    }
}
