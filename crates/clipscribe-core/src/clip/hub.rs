use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use reqwest::blocking::Client;
use tracing::{info, warn};

use super::archive::unpack_clips;
use super::{Clip, ClipSource};
use crate::config::{
    DEFAULT_CATALOG_FACTORIES, DEFAULT_CATALOG_PARTS, DEFAULT_CATALOG_WORKERS, DEFAULT_DATASET,
    HUB_BASE_URL,
};
use crate::error::FetchError;

/// Describes where a dataset keeps its per-worker tar archives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveCatalog {
    pub base_url: String,
    /// Dataset repository id, e.g. `builddotai/Egocentric-10K`.
    pub repo: String,
    pub factories: u32,
    pub workers_per_factory: u32,
    pub parts_per_worker: u32,
}

impl Default for ArchiveCatalog {
    fn default() -> Self {
        Self {
            base_url: HUB_BASE_URL.to_string(),
            repo: DEFAULT_DATASET.to_string(),
            factories: DEFAULT_CATALOG_FACTORIES,
            workers_per_factory: DEFAULT_CATALOG_WORKERS,
            parts_per_worker: DEFAULT_CATALOG_PARTS,
        }
    }
}

impl ArchiveCatalog {
    /// URL of one archive. Factories and workers are 1-based, parts 0-based.
    pub fn locator(&self, factory: u32, worker: u32, part: u32) -> String {
        format!(
            "{base}/datasets/{repo}/resolve/main/factory_{factory:03}/workers/worker_{worker:03}/factory{factory:03}_worker{worker:03}_part{part:02}.tar",
            base = self.base_url.trim_end_matches('/'),
            repo = self.repo,
        )
    }

    /// Every archive in the catalog, factory-major.
    pub fn locators(&self) -> Vec<String> {
        let mut urls = Vec::new();
        for factory in 1..=self.factories {
            for worker in 1..=self.workers_per_factory {
                for part in 0..self.parts_per_worker {
                    urls.push(self.locator(factory, worker, part));
                }
            }
        }
        urls
    }
}

/// Fetches clip archives from the dataset hub.
///
/// Owned by the caller and passed to whatever needs clips; it holds one
/// connection pool for its whole lifetime.
pub struct HubClient {
    http: Client,
    token: Option<String>,
    catalog: ArchiveCatalog,
    rng: StdRng,
}

impl HubClient {
    pub fn new(
        token: Option<String>,
        catalog: ArchiveCatalog,
        timeout: Duration,
        seed: Option<u64>,
    ) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| FetchError::Transport {
                url: catalog.base_url.clone(),
                source,
            })?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        if token.is_none() {
            warn!("no hub token configured, gated datasets will refuse downloads");
        }
        Ok(Self {
            http,
            token,
            catalog,
            rng,
        })
    }

    pub fn catalog(&self) -> &ArchiveCatalog {
        &self.catalog
    }

    /// Download one tar archive and unpack its clips.
    pub fn fetch_archive(&self, url: &str) -> Result<Vec<Clip>, FetchError> {
        info!(%url, "fetching clip archive");

        let mut request = self.http.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "archive download failed");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        unpack_clips(response)
    }

    /// Fetch known archives in order until `limit` clips are collected.
    ///
    /// An archive that fails is logged and skipped; only a run that yields no
    /// clip at all is an error.
    pub fn fetch_archives(&self, urls: &[String], limit: usize) -> Result<Vec<Clip>, FetchError> {
        let mut clips = Vec::new();
        for url in urls {
            if clips.len() >= limit {
                break;
            }
            match self.fetch_archive(url) {
                Ok(found) => {
                    let take = limit - clips.len();
                    clips.extend(found.into_iter().take(take));
                }
                Err(e) => warn!(%url, error = %e, "skipping archive"),
            }
        }

        if clips.is_empty() && limit > 0 {
            return Err(FetchError::NoClips);
        }
        info!(clip_count = clips.len(), "archive fetch complete");
        Ok(clips)
    }

    /// Draw up to `count` clips from randomly chosen archives of the catalog.
    pub fn sample_random<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<Clip>, FetchError> {
        let mut urls = self.catalog.locators();
        urls.shuffle(rng);

        let mut clips = Vec::new();
        for url in &urls {
            if clips.len() >= count {
                break;
            }
            match self.fetch_archive(url) {
                Ok(mut found) => {
                    found.shuffle(rng);
                    let take = count - clips.len();
                    clips.extend(found.into_iter().take(take));
                }
                Err(e) => warn!(%url, error = %e, "skipping archive"),
            }
        }

        if clips.is_empty() && count > 0 {
            return Err(FetchError::NoClips);
        }
        info!(clip_count = clips.len(), requested = count, "random sample complete");
        Ok(clips)
    }
}

impl ClipSource for HubClient {
    fn sample(&mut self, count: usize) -> Result<Vec<Clip>, FetchError> {
        let mut rng = self.rng.clone();
        let clips = self.sample_random(count, &mut rng);
        self.rng = rng;
        clips
    }
}
