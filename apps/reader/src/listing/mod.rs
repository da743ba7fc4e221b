// Listing collaborator: fetch the daily papers page once per cycle, parse it,
// and keep a snapshot of both the raw page and the parsed listing on disk.

pub mod file;
pub mod parse;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDate};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::listing::parse::parse_listing;
use crate::models::listing::Listing;

/// Raw page content plus its SHA-256 (hex), which names the snapshot files.
#[derive(Debug, Clone)]
pub struct RawListing {
    pub content: String,
    pub hash: String,
}

pub struct ListingFetcher {
    client: Client,
    url: String,
    snapshot_dir: PathBuf,
}

impl ListingFetcher {
    pub fn new(url: impl Into<String>, snapshot_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client"),
            url: url.into(),
            snapshot_dir: snapshot_dir.into(),
        }
    }

    /// One bounded attempt at the listing page. Any failure yields `None`.
    pub async fn fetch(&self) -> Option<RawListing> {
        let response = match self.client.get(&self.url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Listing fetch from {} failed: {e}", self.url);
                return None;
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            warn!("Listing fetch from {} returned {status}", self.url);
            return None;
        }

        match response.text().await {
            Ok(content) => Some(RawListing {
                hash: content_hash(&content),
                content,
            }),
            Err(e) => {
                warn!("Reading listing body from {} failed: {e}", self.url);
                None
            }
        }
    }

    /// Fetches and parses the listing, saving snapshots along the way.
    pub async fn fetch_listing(&self) -> Option<Listing> {
        let raw = self.fetch().await?;
        let today = Local::now().date_naive();
        let listing = parse_listing(&raw.content, today);
        info!(
            "Fetched listing {} with {} papers (hash {})",
            listing.date,
            listing.papers.len(),
            &raw.hash[..12]
        );

        if let Err(e) = self.save_snapshot(&raw, &listing, today).await {
            warn!("Could not save listing snapshot: {e}");
        }
        Some(listing)
    }

    async fn save_snapshot(
        &self,
        raw: &RawListing,
        listing: &Listing,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.snapshot_dir).await?;
        let stem = snapshot_stem(&self.snapshot_dir, today, &raw.hash);
        tokio::fs::write(stem.with_extension("txt"), &raw.content).await?;
        tokio::fs::write(
            stem.with_extension("json"),
            serde_json::to_vec_pretty(listing)?,
        )
        .await?;
        Ok(())
    }
}

fn snapshot_stem(dir: &Path, day: NaiveDate, hash: &str) -> PathBuf {
    dir.join(format!("{}-huggingface_papers-{hash}", day.format("%Y-%m-%d")))
}

pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
