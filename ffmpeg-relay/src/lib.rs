/// Registers FFmpeg components (formats, codecs, network). Call once at
/// startup before opening a session.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod filter;
pub mod frame;
pub mod input;
pub mod output;
pub mod packet;
pub mod pipeline;
pub mod session;
pub mod stream;

pub use error::PipelineError;
pub use session::{RelayOptions, open_session, run};
