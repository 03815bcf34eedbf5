use std::ffi::CString;
use std::ptr;

use ffmpeg_next::Dictionary;

use crate::{
    error::{PipelineError, Result},
    packet::RawPacket,
    stream::AvStream,
};

/// Transport options applied when the ingest connection is opened.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// `rtsp_transport` value; "tcp" keeps the session reliable.
    pub transport: String,
    /// Connection timeout in microseconds. Only the initial open is bounded.
    pub timeout_us: u64,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            transport: "tcp".to_string(),
            timeout_us: 5_000_000,
        }
    }
}

impl SourceOptions {
    fn dictionary(&self) -> Dictionary<'static> {
        let mut opts = Dictionary::new();
        opts.set("rtsp_transport", &self.transport);
        opts.set("timeout", &self.timeout_us.to_string());
        opts
    }
}

/// The ingest session: an opened, probed input and its selected video track.
pub struct AvInput {
    url: String,
    inner: ffmpeg_next::format::context::Input,
    video: AvStream,
}

impl AvInput {
    /// Opens `url`, probes it and selects the first video track.
    pub fn open(url: &str, options: &SourceOptions) -> Result<Self> {
        let inner = Self::open_probed(url, options)?;

        let video = inner
            .streams()
            .map(AvStream::from)
            .find(|s| s.is_video())
            .ok_or_else(|| PipelineError::NoVideoTrack(url.to_string()))?;

        for stream in inner.streams() {
            log::debug!(
                "input stream index: {}, codec: {:?}, time_base: {}",
                stream.index(),
                stream.parameters().id(),
                stream.time_base()
            );
        }
        log::info!(
            "video stream found, index: {}, {}x{}, time_base: {}, rate: {}",
            video.index(),
            video.width(),
            video.height(),
            video.time_base(),
            video.rate()
        );

        Ok(Self {
            url: url.to_string(),
            inner,
            video,
        })
    }

    /// `format::input_with_dictionary` folds open and probe into one error, so
    /// the two calls are made separately to tell them apart.
    fn open_probed(
        url: &str,
        options: &SourceOptions,
    ) -> Result<ffmpeg_next::format::context::Input> {
        let curl = CString::new(url).map_err(|_| PipelineError::Connection {
            url: url.to_string(),
            source: ffmpeg_next::Error::InvalidData,
        })?;

        unsafe {
            let mut ctx: *mut ffmpeg_next::ffi::AVFormatContext = ptr::null_mut();
            let mut opts = options.dictionary().disown();
            let ret =
                ffmpeg_next::ffi::avformat_open_input(&mut ctx, curl.as_ptr(), ptr::null(), &mut opts);
            // Unconsumed options are handed back and freed here.
            Dictionary::own(opts);
            if ret < 0 {
                return Err(PipelineError::Connection {
                    url: url.to_string(),
                    source: ffmpeg_next::Error::from(ret),
                });
            }

            let ret = ffmpeg_next::ffi::avformat_find_stream_info(ctx, ptr::null_mut());
            if ret < 0 {
                ffmpeg_next::ffi::avformat_close_input(&mut ctx);
                return Err(PipelineError::Probe {
                    url: url.to_string(),
                    source: ffmpeg_next::Error::from(ret),
                });
            }

            Ok(ffmpeg_next::format::context::Input::wrap(ctx))
        }
    }

    pub fn video_stream(&self) -> &AvStream {
        &self.video
    }

    /// Blocks until the next access unit arrives. `None` means end of stream.
    pub fn read_packet(&mut self) -> Option<RawPacket> {
        self.inner
            .packets()
            .next()
            .map(|(stream, packet)| (packet, stream.time_base()).into())
    }
}

impl Drop for AvInput {
    fn drop(&mut self) {
        log::debug!("input session closed: {}", self.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = SourceOptions::default();
        assert_eq!(opts.transport, "tcp");
        assert_eq!(opts.timeout_us, 5_000_000);

        let dict = opts.dictionary();
        assert_eq!(dict.get("rtsp_transport"), Some("tcp"));
        assert_eq!(dict.get("timeout"), Some("5000000"));
    }

    #[test]
    fn test_open_missing_file() {
        crate::init().unwrap();
        let result = AvInput::open(
            "/nonexistent/watermark-relay/input.mp4",
            &SourceOptions::default(),
        );
        assert!(matches!(result, Err(PipelineError::Connection { .. })));
    }
}
