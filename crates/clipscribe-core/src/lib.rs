pub mod clip;
pub mod config;
pub mod debug;
pub mod describe;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod sampler;
pub mod video;
