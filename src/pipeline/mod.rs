//! Update check over the favorites list.
//!
//! Every favorite is treated as a comic link. Each one gets its own
//! session and a single comic fetch; the report carries either the latest
//! chapter number or the error message for that comic. A failing comic
//! never aborts the run.

use crate::config::AppConfig;
use crate::scraper::ComickClient;
use crate::scraper::http_client::{Fetch, HttpClient};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub comic: String,
    pub title: Option<String>,
    pub latest_chapter: Option<i64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl UpdateReport {
    fn failed(comic: String, message: String) -> Self {
        Self {
            comic,
            title: None,
            latest_chapter: None,
            error: Some(message),
            checked_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub struct PipelineStats {
    pub comics_checked: usize,
    pub errors: usize,
}

pub struct UpdatePipeline<F = HttpClient> {
    client: Arc<ComickClient<F>>,
    concurrency: usize,
}

impl UpdatePipeline<HttpClient> {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = ComickClient::new(&config.scraper).context("Failed to build scraper")?;
        Ok(Self::with_client(Arc::new(client), config.pipeline.concurrency))
    }
}

impl<F: Fetch + 'static> UpdatePipeline<F> {
    pub fn with_client(client: Arc<ComickClient<F>>, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self, favorites: &[String]) -> Result<(Vec<UpdateReport>, PipelineStats)> {
        info!("=== Checking {} favorites for updates ===", favorites.len());

        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::new();

        for favorite in favorites {
            let comic = favorite.clone();
            let client = Arc::clone(&self.client);
            let sem = Arc::clone(&sem);

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await?;

                let mut session = client.session();
                let summary = session.comic_summary(Some(comic.as_str())).await;
                let report = match summary {
                    Ok(summary) => {
                        info!("{}: latest chapter {}", summary.slug, summary.last_chapter);
                        UpdateReport {
                            comic,
                            title: Some(summary.title),
                            latest_chapter: Some(summary.last_chapter),
                            error: None,
                            checked_at: Utc::now(),
                        }
                    }
                    Err(e) => {
                        warn!("{}: {}", comic, e);
                        UpdateReport::failed(comic, e.to_string())
                    }
                };

                Ok::<UpdateReport, anyhow::Error>(report)
            });

            handles.push((favorite.clone(), handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (comic, handle) in handles {
            match handle.await {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(e)) => reports.push(UpdateReport::failed(comic, format!("{:#}", e))),
                Err(e) => {
                    error!("Task panic for {}: {}", comic, e);
                    reports.push(UpdateReport::failed(comic, "update check panicked".to_string()));
                }
            }
        }

        let stats = PipelineStats {
            comics_checked: reports.len(),
            errors: reports.iter().filter(|r| r.error.is_some()).count(),
        };
        info!(
            "=== Done: {} comics | {} errors ===",
            stats.comics_checked, stats.errors
        );

        Ok((reports, stats))
    }
}
