use crate::{
    error::{PipelineError, Result},
    packet::RawPacket,
    stream::AvStream,
};

/// Index of the only track the output carries.
const OUTPUT_STREAM_INDEX: usize = 0;

#[derive(Debug, Clone)]
pub struct SinkOptions {
    pub url: String,
    pub format: String,
    /// Timestamp increment per frame, in output time base units. 3600 at
    /// 90 kHz is 25 fps, whatever the camera actually sends.
    pub frame_duration: i64,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            url: "rtp://10.68.128.67:12340".to_string(),
            format: "rtp".to_string(),
            frame_duration: 3600,
        }
    }
}

/// Rewrites encoder timestamps from the frame counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketTiming {
    frame_duration: i64,
}

impl PacketTiming {
    pub fn new(frame_duration: i64) -> Self {
        Self { frame_duration }
    }

    pub fn stamp(&self, packet: &mut RawPacket, frame_index: i64) {
        let pts = frame_index * self.frame_duration;
        let p = packet.get_mut();
        p.set_pts(Some(pts));
        p.set_dts(Some(pts));
        p.set_stream(OUTPUT_STREAM_INDEX);
        p.set_duration(self.frame_duration);
        // Byte offsets in the source mean nothing to the output.
        p.set_position(-1);
    }
}

/// The outbound RTP session.
pub struct AvOutput {
    url: String,
    inner: ffmpeg_next::format::context::Output,
    have_written_header: bool,
    have_written_trailer: bool,
}

unsafe impl Send for AvOutput {}

impl AvOutput {
    /// Creates the output, adds one track described by the *input* stream and
    /// writes the header.
    pub fn open(options: &SinkOptions, input_stream: &AvStream) -> Result<Self> {
        let output_error = |reason: String| PipelineError::Output {
            url: options.url.clone(),
            reason,
        };

        let inner = ffmpeg_next::format::output_as(&options.url, &options.format)
            .map_err(|e| output_error(format!("open: {}", e)))?;

        let mut output = Self {
            url: options.url.clone(),
            inner,
            have_written_header: false,
            have_written_trailer: false,
        };
        output.add_stream(input_stream).map_err(output_error)?;
        output.write_header()?;

        log::info!(
            "output ready: {} ({}), play it with: vlc {}",
            options.url,
            options.format,
            options.url
        );
        Ok(output)
    }

    // TODO: copy the parameters from the opened encoder once the output is
    // allowed to wait for the first frame before writing its header.
    fn add_stream(&mut self, stream: &AvStream) -> std::result::Result<(), String> {
        let codec_parameters = stream.parameters();
        let mut writer_stream = self
            .inner
            .add_stream(ffmpeg_next::encoder::find(codec_parameters.id()))
            .map_err(|e| format!("add stream: {}", e))?;
        writer_stream.set_parameters(codec_parameters.clone());
        writer_stream.set_time_base(stream.time_base());
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        if !self.have_written_header {
            self.inner.write_header().map_err(PipelineError::HeaderWrite)?;
            self.have_written_header = true;
        }
        Ok(())
    }

    pub fn write_packet(&mut self, packet: RawPacket) -> Result<()> {
        packet
            .packet()
            .write_interleaved(&mut self.inner)
            .map_err(PipelineError::Write)
    }

    /// Writes the trailer. Safe to call more than once.
    pub fn finish(&mut self) -> Result<()> {
        if self.have_written_header && !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner.write_trailer().map_err(PipelineError::Write)?;
            log::info!("output trailer written: {}", self.url);
        }
        Ok(())
    }
}

impl Drop for AvOutput {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::warn!("output trailer error on release: {}", e);
        }
        log::debug!("output session closed: {}", self.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_packet() -> RawPacket {
        let mut packet = ffmpeg_next::codec::packet::Packet::copy(&[0, 0, 0, 1, 0x65, 0x88]);
        packet.set_pts(Some(987));
        packet.set_dts(Some(950));
        packet.set_stream(3);
        packet.set_position(4096);
        RawPacket::from((packet, ffmpeg_next::Rational::new(1, 25)))
    }

    #[test]
    fn test_stamp_packet() {
        let timing = PacketTiming::new(3600);
        let mut packet = encoded_packet();
        timing.stamp(&mut packet, 7);

        assert_eq!(packet.pts(), Some(7 * 3600));
        assert_eq!(packet.dts(), packet.pts());
        assert_eq!(packet.duration(), 3600);
        assert_eq!(packet.index(), 0);
        assert_eq!(packet.position(), -1);
    }

    #[test]
    fn test_stamp_first_frame() {
        let timing = PacketTiming::new(SinkOptions::default().frame_duration);
        let mut packet = encoded_packet();
        timing.stamp(&mut packet, 0);

        assert_eq!(packet.pts(), Some(0));
        assert_eq!(packet.dts(), Some(0));
        assert_eq!(packet.duration(), 3600);
    }

    #[test]
    fn test_default_sink() {
        let options = SinkOptions::default();
        assert_eq!(options.url, "rtp://10.68.128.67:12340");
        assert_eq!(options.format, "rtp");
    }
}
