use ffmpeg_next::{Dictionary, Rational};

use crate::{
    decoder::VideoParams,
    error::{PipelineError, Result, is_drained},
    frame::RawVideoFrame,
    packet::RawPacket,
};

/// Fixed encoding policy. Geometry and timing come from the decoder.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Preferred encoder implementation, e.g. "libx264".
    pub codec: String,
    /// Any encoder of this family is accepted when `codec` is unavailable.
    pub fallback: ffmpeg_next::codec::Id,
    pub bit_rate: usize,
    /// Keyframe interval in frames. Larger GOPs cost less CPU but make a
    /// joining player wait longer for the first picture.
    pub gop_size: u32,
    pub max_b_frames: usize,
    pub preset: String,
    pub tune: String,
    pub threads: String,
    pub profile: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            fallback: ffmpeg_next::codec::Id::H264,
            bit_rate: 2_000_000,
            gop_size: 50,
            max_b_frames: 0,
            preset: "ultrafast".to_string(),
            tune: "zerolatency".to_string(),
            threads: "auto".to_string(),
            profile: "baseline".to_string(),
        }
    }
}

impl Settings {
    /// Pins the keyframe cadence to exactly `gop_size` frames.
    pub fn x264_params(&self) -> String {
        format!(
            "keyint={gop}:min-keyint={gop}:no-scenecut=1:force-cfr=1",
            gop = self.gop_size
        )
    }

    pub fn options(&self) -> Dictionary<'static> {
        let mut opts = Dictionary::new();
        opts.set("preset", &self.preset);
        opts.set("tune", &self.tune);
        opts.set("threads", &self.threads);
        opts.set("profile", &self.profile);
        opts.set("x264-params", &self.x264_params());
        opts
    }

    fn find_codec(&self) -> Result<ffmpeg_next::Codec> {
        if let Some(codec) = ffmpeg_next::encoder::find_by_name(&self.codec) {
            return Ok(codec);
        }
        log::warn!(
            "encoder {} not available, falling back to {:?}",
            self.codec,
            self.fallback
        );
        ffmpeg_next::encoder::find(self.fallback)
            .ok_or_else(|| PipelineError::NoEncoder(format!("{} / {:?}", self.codec, self.fallback)))
    }
}

pub struct Encoder {
    inner: ffmpeg_next::codec::encoder::Video,
    name: String,
    time_base: Rational,
}

impl Encoder {
    pub fn new(params: &VideoParams, settings: &Settings) -> Result<Self> {
        let codec = settings.find_codec()?;
        let name = codec.name().to_string();

        let ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
        let mut encoder = ctx
            .encoder()
            .video()
            .map_err(|e| PipelineError::CodecOpen(format!("{}: {}", name, e)))?;
        encoder.set_width(params.width);
        encoder.set_height(params.height);
        encoder.set_aspect_ratio(params.aspect_ratio);
        encoder.set_format(params.pixel_format);
        encoder.set_time_base(params.time_base);
        encoder.set_bit_rate(settings.bit_rate);
        encoder.set_gop(settings.gop_size);
        encoder.set_max_b_frames(settings.max_b_frames);

        let inner = encoder
            .open_with(settings.options())
            .map_err(|e| PipelineError::CodecOpen(format!("{}: {}", name, e)))?;

        log::info!(
            "encoder opened: {}, {}x{} {:?}, time_base: {}, bit_rate: {}, gop: {}",
            name,
            params.width,
            params.height,
            params.pixel_format,
            params.time_base,
            settings.bit_rate,
            settings.gop_size
        );

        Ok(Self {
            inner,
            name,
            time_base: params.time_base,
        })
    }

    /// Submits a filtered frame, replacing its timestamp with `pts`.
    pub fn send_frame(&mut self, frame: &mut RawVideoFrame, pts: i64) -> Result<()> {
        frame.set_pts(Some(pts));
        self.inner
            .send_frame(frame.as_video())
            .map_err(PipelineError::Encode)
    }

    pub fn receive_packet(&mut self) -> Result<Option<RawPacket>> {
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        match self.inner.receive_packet(&mut packet) {
            Ok(()) => Ok(Some(RawPacket::from((packet, self.time_base)))),
            Err(err) if is_drained(&err) => Ok(None),
            Err(err) => Err(PipelineError::Encode(err)),
        }
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        log::debug!("encoder released: {}", self.name);
    }
}

/// Opens the encoder on demand, once the first filtered frame shows up.
pub struct EncoderBuilder {
    settings: Settings,
}

impl EncoderBuilder {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn open(&self, params: &VideoParams) -> Result<Encoder> {
        Encoder::new(params, &self.settings)
    }
}
