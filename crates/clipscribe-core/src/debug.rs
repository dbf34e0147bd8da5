use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

use crate::clip::ClipMetadata;
use crate::error::PipelineError;
use crate::sampler::SampledFrame;

const TEXT_SCALE: f32 = 28.0;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BACKDROP_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const TEXT_LINE_HEIGHT: i32 = 30;
const TEXT_MARGIN: i32 = 10;
const BACKDROP_WIDTH: u32 = 420;

/// Saves sampled frames as PNG, optionally captioned with time and clip ids.
pub struct DebugRenderer {
    dir: PathBuf,
    font: Option<FontVec>,
}

impl DebugRenderer {
    pub fn new(dir: impl Into<PathBuf>, font_path: Option<&Path>) -> Result<Self, PipelineError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| PipelineError::Report {
            path: dir.display().to_string(),
            source,
        })?;
        info!(?dir, "debug frames directory ready");

        let font = match font_path {
            Some(path) => Self::load_font(path),
            None => {
                info!("no overlay font configured, debug frames are saved without captions");
                None
            }
        };
        Ok(Self { dir, font })
    }

    pub fn save_frame(
        &self,
        clip: &str,
        index: usize,
        sampled: &SampledFrame,
        metadata: &ClipMetadata,
    ) -> Result<PathBuf, PipelineError> {
        let mut img = sampled.frame.image.clone();
        self.draw_caption(&mut img, index, sampled, metadata);

        let path = self.dir.join(format!("{clip}_frame_{index:03}.png"));
        img.save(&path).map_err(PipelineError::Debug)?;

        debug!(?path, "saved debug frame");
        Ok(path)
    }

    fn draw_caption(
        &self,
        img: &mut RgbImage,
        index: usize,
        sampled: &SampledFrame,
        metadata: &ClipMetadata,
    ) {
        let Some(font) = &self.font else { return };
        let scale = PxScale::from(TEXT_SCALE);

        let lines = [
            format!(
                "#{} F:{} t={:.1}s",
                index, sampled.frame.frame_number, sampled.timestamp_seconds
            ),
            format!(
                "W:{} F:{}",
                metadata.worker_label(),
                metadata.factory_label()
            ),
        ];

        let backdrop_h = (TEXT_LINE_HEIGHT * lines.len() as i32 + TEXT_MARGIN) as u32;
        let backdrop = Rect::at(0, 0).of_size(
            BACKDROP_WIDTH.min(img.width()),
            backdrop_h.min(img.height()),
        );
        draw_filled_rect_mut(img, backdrop, BACKDROP_COLOR);

        let mut y = TEXT_MARGIN / 2;
        for line in &lines {
            draw_text_mut(img, TEXT_COLOR, TEXT_MARGIN, y, scale, font, line);
            y += TEXT_LINE_HEIGHT;
        }
    }

    fn load_font(path: &Path) -> Option<FontVec> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                warn!(?path, error = %e, "failed to read font file");
                return None;
            }
        };
        match FontVec::try_from_vec(data) {
            Ok(font) => {
                info!(?path, "loaded overlay font");
                Some(font)
            }
            Err(e) => {
                warn!(?path, error = %e, "failed to parse font file");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::video::frame::Frame;

    fn sampled() -> SampledFrame {
        SampledFrame {
            frame: Frame {
                image: RgbImage::from_pixel(8, 6, Rgb([10, 20, 30])),
                frame_number: 300,
                pts: 153600,
            },
            timestamp_seconds: 10.0,
        }
    }

    #[test]
    #[traced_test]
    fn saves_plain_frame_without_font() {
        let tmp = tempfile::tempdir().unwrap();
        let renderer = DebugRenderer::new(tmp.path().join("frames"), None).unwrap();
        let path = renderer
            .save_frame("clip_00", 1, &sampled(), &ClipMetadata::default())
            .unwrap();

        assert!(path.ends_with("clip_00_frame_001.png"));
        let saved = image::open(&path).unwrap().into_rgb8();
        assert_eq!(saved, sampled().frame.image);
        assert!(logs_contain("no overlay font configured"));
    }

    #[test]
    #[traced_test]
    fn unreadable_font_falls_back_to_plain_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let bogus = tmp.path().join("font.ttf");
        std::fs::write(&bogus, b"not a font").unwrap();

        let renderer = DebugRenderer::new(tmp.path(), Some(&bogus)).unwrap();
        assert!(renderer.font.is_none());
        assert!(logs_contain("failed to parse font file"));
    }
}
