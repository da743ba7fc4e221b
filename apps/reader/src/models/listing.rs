use serde::{Deserialize, Serialize};

/// One fetch cycle's worth of candidates, keyed by the listing date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// `YYYY-MM-DD`; used as the batch key in chat topics.
    pub date: String,
    #[serde(default)]
    pub papers: Vec<Candidate>,
}

/// A paper discovered on the listing page, not yet known to be processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub link: String,
    pub pdf_link: String,
    #[serde(default)]
    pub summary_hint: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub upvotes: u32,
    #[serde(default)]
    pub comments: u32,
}

impl Candidate {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            pdf_link: arxiv_pdf_link(&id),
            id,
            title: title.into(),
            link: String::new(),
            summary_hint: None,
            authors: Vec::new(),
            published_at: None,
            upvotes: 0,
            comments: 0,
        }
    }
}

/// PDF location for an arXiv identifier.
pub fn arxiv_pdf_link(id: &str) -> String {
    format!("https://arxiv.org/pdf/{id}.pdf")
}
