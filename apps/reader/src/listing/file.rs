//! Pre-fetched listing files passed with `--listing-file`.
//!
//! Three shapes are accepted:
//! - a saved listing page (HTML),
//! - a parsed listing snapshot (`{"date": ..., "papers": [...]}`),
//! - a bare array of `{"title", "pdf_link"}` entries, whose ids are taken from the PDF link.

use std::path::Path;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::listing::parse::parse_listing;
use crate::models::listing::{Candidate, Listing};

static VERSIONED_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(\d+\.\d+)(?:v\d+)?(?:\.pdf)?(?:\?|$)").expect("valid arxiv id regex"));
static TRAILING_DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(\d+)(?:\.\w+)?(?:\?|$)").expect("valid trailing id regex"));

#[derive(Debug, Error)]
pub enum ListingFileError {
    #[error("Could not read listing file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Listing file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Listing file is neither HTML, a listing object, nor an array of papers")]
    UnsupportedShape,
}

#[derive(Debug, Deserialize)]
struct PdfEntry {
    title: String,
    pdf_link: String,
}

pub async fn load_listing_file(path: &Path, today: NaiveDate) -> Result<Listing, ListingFileError> {
    let content = tokio::fs::read_to_string(path).await?;
    let listing = listing_from_str(&content, today)?;
    info!(
        "Read {} papers dated {} from {}",
        listing.papers.len(),
        listing.date,
        path.display()
    );
    Ok(listing)
}

fn listing_from_str(content: &str, today: NaiveDate) -> Result<Listing, ListingFileError> {
    if content.trim_start().starts_with('<') {
        return Ok(parse_listing(content, today));
    }

    match serde_json::from_str::<Value>(content)? {
        value @ Value::Object(_) => Ok(serde_json::from_value(value)?),
        Value::Array(items) => {
            let mut papers = Vec::with_capacity(items.len());
            for item in items {
                let entry: PdfEntry = serde_json::from_value(item)?;
                match extract_id_from_pdf_link(&entry.pdf_link) {
                    Some(id) => papers.push(Candidate {
                        pdf_link: entry.pdf_link,
                        ..Candidate::new(id, entry.title)
                    }),
                    None => warn!(
                        "Skipping '{}': no paper id in PDF link {}",
                        entry.title, entry.pdf_link
                    ),
                }
            }
            Ok(Listing {
                date: today.format("%Y-%m-%d").to_string(),
                papers,
            })
        }
        _ => Err(ListingFileError::UnsupportedShape),
    }
}

/// Paper id from a PDF link: an arXiv `NNNN.NNNNN` id if present, otherwise
/// the trailing run of digits before the extension.
pub fn extract_id_from_pdf_link(pdf_link: &str) -> Option<String> {
    VERSIONED_ID
        .captures(pdf_link)
        .or_else(|| TRAILING_DIGITS.captures(pdf_link))
        .map(|c| c[1].to_string())
}
