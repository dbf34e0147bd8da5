use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{Clip, ClipMetadata, ClipSource};
use crate::error::FetchError;

/// A directory of preloaded clips stored as `clip_NN.mp4` + `clip_NN.json`.
pub struct LocalClipDir {
    dir: PathBuf,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> FetchError + '_ {
    move |source| FetchError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl LocalClipDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Stems of every video in the directory, sorted.
    pub fn list(&self) -> Result<Vec<String>, FetchError> {
        let mut stems = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_error(&self.dir))? {
            let path = entry.map_err(io_error(&self.dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("mp4") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                stems.push(stem.to_string());
            }
        }
        stems.sort();
        Ok(stems)
    }

    /// Load one clip and its metadata sidecar.
    pub fn load(&self, stem: &str) -> Result<Clip, FetchError> {
        let video_path = self.dir.join(format!("{stem}.mp4"));
        let metadata_path = self.dir.join(format!("{stem}.json"));
        if !video_path.exists() {
            return Err(FetchError::NotFound(video_path.display().to_string()));
        }
        if !metadata_path.exists() {
            return Err(FetchError::NotFound(metadata_path.display().to_string()));
        }

        let video = fs::read(&video_path).map_err(io_error(&video_path))?;
        let raw = fs::read(&metadata_path).map_err(io_error(&metadata_path))?;
        let metadata: ClipMetadata =
            serde_json::from_slice(&raw).map_err(|source| FetchError::Metadata {
                name: metadata_path.display().to_string(),
                source,
            })?;

        info!(stem, bytes = video.len(), "loaded local clip");
        Ok(Clip {
            label: stem.to_string(),
            video,
            metadata,
        })
    }

    /// Save a clip as `clip_{index:02}.mp4` with pretty-printed metadata.
    pub fn save(&self, index: usize, clip: &Clip) -> Result<PathBuf, FetchError> {
        fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;

        let stem = format!("clip_{index:02}");
        let video_path = self.dir.join(format!("{stem}.mp4"));
        let metadata_path = self.dir.join(format!("{stem}.json"));

        fs::write(&video_path, &clip.video).map_err(io_error(&video_path))?;
        let json = serde_json::to_string_pretty(&clip.metadata).map_err(|source| {
            FetchError::Metadata {
                name: metadata_path.display().to_string(),
                source,
            }
        })?;
        fs::write(&metadata_path, json).map_err(io_error(&metadata_path))?;

        info!(
            ?video_path,
            worker = %clip.metadata.worker_label(),
            factory = %clip.metadata.factory_label(),
            "saved clip"
        );
        Ok(video_path)
    }
}

impl ClipSource for LocalClipDir {
    /// The first `count` clips in name order; clips that fail to load are skipped.
    fn sample(&mut self, count: usize) -> Result<Vec<Clip>, FetchError> {
        let stems = self.list()?;
        let mut clips = Vec::new();
        for stem in stems {
            if clips.len() >= count {
                break;
            }
            match self.load(&stem) {
                Ok(clip) => clips.push(clip),
                Err(e) => warn!(%stem, error = %e, "skipping local clip"),
            }
        }

        if clips.is_empty() && count > 0 {
            return Err(FetchError::NoClips);
        }
        Ok(clips)
    }
}
