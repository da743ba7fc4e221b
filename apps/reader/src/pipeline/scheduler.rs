use std::time::Duration;

use rand::Rng;
use tracing::info;

use crate::listing::ListingFetcher;
use crate::pipeline::{CycleReport, Pipeline};

/// Fetch, process, sleep, forever.
pub struct Scheduler {
    fetcher: ListingFetcher,
    pipeline: Pipeline,
    sleep_min_secs: u64,
    sleep_max_secs: u64,
}

impl Scheduler {
    pub fn new(
        fetcher: ListingFetcher,
        pipeline: Pipeline,
        sleep_min_secs: u64,
        sleep_max_secs: u64,
    ) -> Self {
        Self {
            fetcher,
            pipeline,
            sleep_min_secs,
            sleep_max_secs: sleep_max_secs.max(sleep_min_secs),
        }
    }

    /// One cycle. `None` when the listing could not be fetched, which just
    /// means there is nothing to do until the next cycle.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        let Some(listing) = self.fetcher.fetch_listing().await else {
            info!("No listing fetched, nothing to do this cycle");
            return None;
        };
        Some(self.pipeline.process_listing(&listing).await)
    }

    pub async fn run_forever(&self) {
        loop {
            self.run_cycle().await;
            let pause = jitter(self.sleep_min_secs, self.sleep_max_secs);
            info!("Sleeping {}m{}s until the next cycle", pause.as_secs() / 60, pause.as_secs() % 60);
            tokio::time::sleep(pause).await;
        }
    }
}

/// Uniformly random pause in `[min_secs, max_secs]`.
pub fn jitter(min_secs: u64, max_secs: u64) -> Duration {
    Duration::from_secs(rand::thread_rng().gen_range(min_secs..=max_secs.max(min_secs)))
}
