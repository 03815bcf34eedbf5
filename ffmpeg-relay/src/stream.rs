use ffmpeg_next::{Rational, codec::Parameters, format::stream};

unsafe impl Send for AvStream {}

/// Snapshot of one demuxed track, taken right after the input is probed.
pub struct AvStream {
    index: usize,
    parameters: Parameters,
    time_base: Rational,
    rate: Rational,
}

impl AvStream {
    pub fn index(&self) -> usize {
        self.index
    }
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }
    pub fn time_base(&self) -> Rational {
        self.time_base
    }
    pub fn rate(&self) -> Rational {
        self.rate
    }

    pub fn is_video(&self) -> bool {
        self.parameters.medium() == ffmpeg_next::media::Type::Video
    }

    fn raw(&self) -> *const ffmpeg_next::ffi::AVCodecParameters {
        self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters
    }

    pub fn width(&self) -> u32 {
        unsafe { (*self.raw()).width.max(0) as u32 }
    }

    pub fn height(&self) -> u32 {
        unsafe { (*self.raw()).height.max(0) as u32 }
    }

    /// `AVPixelFormat` as stored in the codec parameters (`-1` when unknown).
    pub fn pixel_format(&self) -> i32 {
        unsafe { (*self.raw()).format }
    }

    pub fn aspect_ratio(&self) -> Rational {
        unsafe { (*self.raw()).sample_aspect_ratio.into() }
    }

    pub fn geometry(&self) -> VideoGeometry {
        let aspect = self.aspect_ratio();
        VideoGeometry {
            width: self.width(),
            height: self.height(),
            pixel_format: self.pixel_format(),
            time_base: (self.time_base.numerator(), self.time_base.denominator()),
            aspect_ratio: (aspect.numerator(), aspect.denominator()),
        }
    }
}

impl From<stream::Stream<'_>> for AvStream {
    fn from(stream: stream::Stream<'_>) -> Self {
        Self {
            index: stream.index(),
            parameters: stream.parameters(),
            time_base: stream.time_base(),
            rate: stream.avg_frame_rate(),
        }
    }
}

impl Clone for AvStream {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            parameters: self.parameters.clone(),
            time_base: self.time_base,
            rate: self.rate,
        }
    }
}

/// Plain-number view of a video track, used to configure the buffer source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoGeometry {
    pub width: u32,
    pub height: u32,
    pub pixel_format: i32,
    pub time_base: (i32, i32),
    pub aspect_ratio: (i32, i32),
}
