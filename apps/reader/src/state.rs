use std::sync::Arc;

use crate::artifact::{DownloadPolicy, Downloader, PaperArchive};
use crate::channel::{Notifier, ZulipClient};
use crate::config::Config;
use crate::listing::ListingFetcher;
use crate::llm_client::LlmClient;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::responder::answer::LlmAnswerer;
use crate::responder::context::EmbeddingContextProvider;
use crate::responder::embeddings::{Embedder, OpenAiEmbedder};
use crate::responder::Responder;
use crate::store::PaperStore;
use crate::summary::LlmSummarizer;

/// Everything built once at startup and shared by the pipeline loop and
/// the chat listener.
#[derive(Clone)]
pub struct AppState {
    pub store: PaperStore,
    pub llm: LlmClient,
    pub config: Config,
    /// Posts summaries and replies. A no-op when the channel is disabled.
    pub notifier: Arc<dyn Notifier>,
    /// Inbound side of the channel; `None` when it is disabled.
    pub zulip: Option<Arc<ZulipClient>>,
}

impl AppState {
    pub fn fetcher(&self) -> ListingFetcher {
        ListingFetcher::new(
            self.config.listing_url.clone(),
            self.config.listing_dir.clone(),
            self.config.http_timeout,
        )
    }

    pub fn pipeline(&self) -> Pipeline {
        let downloader = Downloader::new(DownloadPolicy {
            attempts: self.config.download_attempts,
            delay: self.config.download_delay,
            timeout: self.config.http_timeout,
        });
        Pipeline::new(
            self.store.clone(),
            Arc::new(PaperArchive::new(self.config.paper_dir.clone(), downloader)),
            Arc::new(LlmSummarizer::new(self.llm.clone())),
            self.notifier.clone(),
            PipelineSettings {
                max_retry: self.config.max_retry,
                markdown_dir: Some(self.config.markdown_dir.clone()),
            },
        )
    }

    /// Responder whose watermark starts at `started_at` (unix seconds).
    pub fn responder(&self, started_at: i64) -> Responder {
        let embedder = self.config.openai_api_key.clone().map(|key| {
            Arc::new(OpenAiEmbedder::new(
                &self.config.openai_base_url,
                key,
                self.config.embedding_model.clone(),
                self.config.http_timeout,
            )) as Arc<dyn Embedder>
        });
        Responder::new(
            self.store.clone(),
            Arc::new(EmbeddingContextProvider::new(
                self.config.index_dir.clone(),
                embedder,
            )),
            Arc::new(LlmAnswerer::new(self.llm.clone())),
            self.notifier.clone(),
            self.config.zulip_stream.clone(),
            self.config.zulip_bot_name.clone(),
            started_at,
        )
    }
}
