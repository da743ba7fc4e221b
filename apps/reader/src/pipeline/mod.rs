//! Processing pipeline: turns listing candidates into published, persisted papers.
//!
//! Per candidate: skip if already completed (or out of retries), obtain the
//! PDF, summarize it, publish the summary under a dated chat topic and store
//! the result. Any failure after the first write is recorded on the paper as
//! `failed` with the error text, which also bumps its retry count.

pub mod scheduler;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::artifact::ArtifactStore;
use crate::channel::Notifier;
use crate::errors::AppError;
use crate::models::listing::{Candidate, Listing};
use crate::models::paper::{NewPaper, PaperRow, PaperStatus};
use crate::store::PaperStore;
use crate::summary::{chat_topic, Summarizer};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Failed papers with this many recorded failures are left alone.
    pub max_retry: i64,
    /// Where rendered summaries are written as `<id>.md`. `None` disables export.
    pub markdown_dir: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_retry: 3,
            markdown_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Skipped,
    Failed,
}

/// Tally of one pass over a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Failed papers from earlier listings that were attempted again.
    pub retried: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

pub struct Pipeline {
    store: PaperStore,
    artifacts: Arc<dyn ArtifactStore>,
    summarizer: Arc<dyn Summarizer>,
    notifier: Arc<dyn Notifier>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        store: PaperStore,
        artifacts: Arc<dyn ArtifactStore>,
        summarizer: Arc<dyn Summarizer>,
        notifier: Arc<dyn Notifier>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            artifacts,
            summarizer,
            notifier,
            settings,
        }
    }

    /// Processes every candidate in order, then retries failed papers from
    /// earlier listings that are still below the retry ceiling.
    pub async fn process_listing(&self, listing: &Listing) -> CycleReport {
        let mut report = CycleReport::default();

        for candidate in &listing.papers {
            report.record(self.process_candidate(candidate, &listing.date).await);
        }

        let in_listing: HashSet<&str> = listing.papers.iter().map(|c| c.id.as_str()).collect();
        match self.store.list_failed(self.settings.max_retry).await {
            Ok(rows) => {
                for row in rows.iter().filter(|r| !in_listing.contains(r.id.as_str())) {
                    info!(
                        "Retrying paper {} (attempt {} of {})",
                        row.id,
                        row.retry_count + 1,
                        self.settings.max_retry
                    );
                    let outcome = self
                        .process_candidate(&candidate_from_row(row), row.discovered_on())
                        .await;
                    report.retried += 1;
                    report.record(outcome);
                }
            }
            Err(e) => error!("Could not list failed papers for retry: {e}"),
        }

        info!(
            "Listing {} done: {} completed, {} skipped, {} failed, {} retried",
            listing.date, report.completed, report.skipped, report.failed, report.retried
        );
        report
    }

    /// Runs one candidate through the pipeline. Never fails: errors are
    /// recorded on the paper and reported as `Outcome::Failed`.
    pub async fn process_candidate(&self, candidate: &Candidate, date: &str) -> Outcome {
        match self.store.get(&candidate.id).await {
            Ok(Some(existing)) if existing.status == PaperStatus::Completed => {
                info!("Paper {} already completed, skipping", candidate.id);
                return Outcome::Skipped;
            }
            Ok(Some(existing))
                if existing.status == PaperStatus::Failed
                    && existing.retry_count >= self.settings.max_retry =>
            {
                warn!(
                    "Paper {} failed {} times, not retrying: {}",
                    candidate.id,
                    existing.retry_count,
                    existing.error_message.as_deref().unwrap_or("unknown error")
                );
                return Outcome::Skipped;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Could not look up paper {}: {e}", candidate.id);
                return Outcome::Failed;
            }
        }

        match self.run(candidate, date).await {
            Ok(topic) => {
                info!("Paper {} completed as '{topic}'", candidate.id);
                Outcome::Completed
            }
            Err(e) => {
                error!("Paper {} failed: {e}", candidate.id);
                if let Err(db) = self
                    .store
                    .set_status(&candidate.id, PaperStatus::Failed, Some(&e.to_string()))
                    .await
                {
                    error!("Could not record failure of paper {}: {db}", candidate.id);
                }
                Outcome::Failed
            }
        }
    }

    async fn run(&self, candidate: &Candidate, date: &str) -> Result<String, AppError> {
        let mut record = NewPaper {
            title: candidate.title.clone(),
            link: candidate.link.clone(),
            pdf_link: candidate.pdf_link.clone(),
            status: PaperStatus::Pending,
            ..NewPaper::new(candidate.id.clone())
        };
        self.store.upsert(&record).await?;

        let pdf_path = self
            .artifacts
            .obtain(&candidate.id, &candidate.pdf_link)
            .await?;
        record.local_pdf = pdf_path.to_string_lossy().into_owned();
        record.status = PaperStatus::Processing;
        self.store.upsert(&record).await?;

        let summary = match self.summarizer.summarize(&pdf_path, &candidate.title).await {
            Ok(summary) => summary,
            Err(e) => {
                self.artifacts.discard(&pdf_path).await;
                return Err(e.into());
            }
        };

        let topic = chat_topic(date, &summary.short_title);
        let body = summary.to_markdown(&candidate.link, &candidate.pdf_link);

        if self.notifier.is_enabled() {
            if self.notifier.post(&topic, &body).await.is_none() {
                return Err(AppError::Publish(topic));
            }
        } else {
            info!("Chat channel disabled, paper {} not published", candidate.id);
        }

        self.export_markdown(&candidate.id, &body).await;

        record.summary = serde_json::to_string(&summary)?;
        record.chat_topic = topic.clone();
        record.status = PaperStatus::Completed;
        self.store.upsert(&record).await?;
        Ok(topic)
    }

    async fn export_markdown(&self, paper_id: &str, body: &str) {
        let Some(dir) = &self.settings.markdown_dir else {
            return;
        };
        let path = dir.join(format!("{}.md", paper_id.replace('/', "_")));
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, body).await
        };
        if let Err(e) = written.await {
            warn!("Could not write {}: {e}", path.display());
        }
    }
}

/// Rebuilds a candidate from a stored paper for the retry sweep.
fn candidate_from_row(row: &PaperRow) -> Candidate {
    Candidate {
        link: row.link.clone(),
        pdf_link: row.pdf_link.clone(),
        ..Candidate::new(row.id.clone(), row.title.clone())
    }
}
