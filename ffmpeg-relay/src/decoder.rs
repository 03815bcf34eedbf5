use ffmpeg_next::Rational;

use crate::{
    error::{PipelineError, Result, is_drained},
    frame::RawVideoFrame,
    packet::RawPacket,
    stream::AvStream,
};

/// Decoder-side picture parameters the encoder copies when it is opened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: ffmpeg_next::format::Pixel,
    pub aspect_ratio: Rational,
    pub time_base: Rational,
}

pub struct Decoder {
    stream_index: usize,
    inner: ffmpeg_next::codec::decoder::Video,
    decoder_time_base: Rational,
}

impl Decoder {
    pub fn new(stream: &AvStream) -> Result<Self> {
        let mut decoder_ctx = ffmpeg_next::codec::Context::new();
        unsafe {
            (*decoder_ctx.as_mut_ptr()).time_base = stream.time_base().into();
        }
        decoder_ctx
            .set_parameters(stream.parameters().clone())
            .map_err(|e| PipelineError::CodecOpen(format!("decoder parameters: {}", e)))?;

        let video_decoder = decoder_ctx
            .decoder()
            .video()
            .map_err(|e| PipelineError::CodecOpen(format!("video decoder: {}", e)))?;

        if video_decoder.format() == ffmpeg_next::format::Pixel::None
            || video_decoder.width() == 0
            || video_decoder.height() == 0
        {
            return Err(PipelineError::CodecOpen(
                "missing codec parameters".to_string(),
            ));
        }

        let decoder_time_base = video_decoder.time_base();
        log::info!(
            "decoder opened: {:?}, {}x{} {:?}, time_base: {}",
            stream.parameters().id(),
            video_decoder.width(),
            video_decoder.height(),
            video_decoder.format(),
            decoder_time_base
        );

        Ok(Self {
            stream_index: stream.index(),
            inner: video_decoder,
            decoder_time_base,
        })
    }

    pub fn send_packet(&mut self, packet: &mut RawPacket) -> Result<()> {
        let time_base = packet.time_base();
        let packet = packet.get_mut();
        packet.rescale_ts(time_base, self.decoder_time_base);
        self.inner.send_packet(packet).map_err(PipelineError::Decode)
    }

    pub fn receive_frame(&mut self) -> Result<Option<RawVideoFrame>> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        match self.inner.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(RawVideoFrame::from(frame))),
            Err(err) if is_drained(&err) => Ok(None),
            Err(err) => Err(PipelineError::Decode(err)),
        }
    }

    pub fn video_params(&self) -> VideoParams {
        VideoParams {
            width: self.inner.width(),
            height: self.inner.height(),
            pixel_format: self.inner.format(),
            aspect_ratio: self.inner.aspect_ratio(),
            time_base: self.decoder_time_base,
        }
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        log::debug!("decoder released, stream index: {}", self.stream_index);
    }
}
