use image::RgbImage;

/// A single decoded video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The frame's image data.
    pub image: RgbImage,
    /// Frame number in presentation order from the start of the source (0-based).
    pub frame_number: u32,
    /// Raw presentation timestamp in stream ticks.
    pub pts: i64,
}
