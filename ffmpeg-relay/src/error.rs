use thiserror::Error;

/// Failures raised by the relay stages.
///
/// Variants up to `HeaderWrite` abort the session before streaming starts.
/// `Decode` and `Filter` end the stream loop; `Encode` and `Write` only drop
/// the affected frame or packet.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot open input {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("cannot read stream info from {url}: {source}")]
    Probe {
        url: String,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("no video stream in {0}")]
    NoVideoTrack(String),

    #[error("cannot open codec: {0}")]
    CodecOpen(String),

    #[error("no encoder found for {0}")]
    NoEncoder(String),

    #[error("filter graph: {0}")]
    FilterGraph(String),

    #[error("cannot create output {url}: {reason}")]
    Output { url: String, reason: String },

    #[error("write header error: {0}")]
    HeaderWrite(#[source] ffmpeg_next::Error),

    #[error("decode error: {0}")]
    Decode(#[source] ffmpeg_next::Error),

    #[error("filter error: {0}")]
    Filter(String),

    #[error("encode error: {0}")]
    Encode(#[source] ffmpeg_next::Error),

    #[error("write packet error: {0}")]
    Write(#[source] ffmpeg_next::Error),
}

impl PipelineError {
    /// Errors that happen while the session is still being assembled (or while
    /// the lazy encoder is being opened). The binary exits with code 1 on these.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            PipelineError::Connection { .. }
                | PipelineError::Probe { .. }
                | PipelineError::NoVideoTrack(_)
                | PipelineError::CodecOpen(_)
                | PipelineError::NoEncoder(_)
                | PipelineError::FilterGraph(_)
                | PipelineError::Output { .. }
                | PipelineError::HeaderWrite(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// `EAGAIN` and `EOF` both end a drain loop without an error.
pub(crate) fn is_drained(err: &ffmpeg_next::Error) -> bool {
    match err {
        ffmpeg_next::Error::Eof => true,
        ffmpeg_next::Error::Other { errno } => *errno == ffmpeg_next::util::error::EAGAIN,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_classification() {
        assert!(PipelineError::NoVideoTrack("rtsp://cam".to_string()).is_startup());
        assert!(PipelineError::HeaderWrite(ffmpeg_next::Error::Bug).is_startup());
        assert!(PipelineError::NoEncoder("libx264".to_string()).is_startup());
        assert!(!PipelineError::Decode(ffmpeg_next::Error::InvalidData).is_startup());
        assert!(!PipelineError::Encode(ffmpeg_next::Error::InvalidData).is_startup());
        assert!(!PipelineError::Write(ffmpeg_next::Error::InvalidData).is_startup());
        assert!(!PipelineError::Filter("push".to_string()).is_startup());
    }

    #[test]
    fn test_drain_terminators() {
        assert!(is_drained(&ffmpeg_next::Error::Eof));
        assert!(is_drained(&ffmpeg_next::Error::Other {
            errno: ffmpeg_next::util::error::EAGAIN
        }));
        assert!(!is_drained(&ffmpeg_next::Error::InvalidData));
    }
}
