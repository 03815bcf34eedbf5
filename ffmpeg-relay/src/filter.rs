//! Watermark filter graph: `buffer` -> `drawtext` -> `buffersink`.
//!
//! The graph is built once from the input track's geometry and reused for
//! every frame. `%{localtime}` in the text is expanded by drawtext on each
//! frame, so the clock keeps ticking without rebuilding anything.

use ffmpeg_next::filter;

use crate::{
    error::{PipelineError, Result, is_drained},
    frame::RawVideoFrame,
    stream::{AvStream, VideoGeometry},
};

const SOURCE_NAME: &str = "in";
const SINK_NAME: &str = "out";

const KEEP_REF: std::os::raw::c_int =
    ffmpeg_next::ffi::AV_BUFFERSRC_FLAG_KEEP_REF as std::os::raw::c_int;

/// Text overlay drawn in the top-right corner of every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Watermark {
    /// drawtext template; may contain `%{localtime}`.
    pub text: String,
    pub font_color: String,
    pub font_size: u32,
    /// Distance from the right and top edges, in pixels.
    pub margin: u32,
    /// Colour of the backing box, with alpha (e.g. `black@0.5`).
    pub box_color: String,
    pub font_file: Option<String>,
}

impl Default for Watermark {
    fn default() -> Self {
        Self {
            text: "测试水印 - %{localtime}".to_string(),
            font_color: "white".to_string(),
            font_size: 20,
            margin: 10,
            box_color: "black@0.5".to_string(),
            font_file: None,
        }
    }
}

impl Watermark {
    /// Filtergraph description for the drawtext stage.
    pub fn filter_description(&self) -> String {
        let mut params = vec![format!("text='{}'", escape_quoted(&self.text))];
        if let Some(font_file) = &self.font_file {
            params.push(format!("fontfile='{}'", escape_quoted(font_file)));
        }
        params.push(format!("fontcolor={}", self.font_color));
        params.push(format!("fontsize={}", self.font_size));
        params.push(format!("x=(w-text_w-{})", self.margin));
        params.push(format!("y={}", self.margin));
        params.push("box=1".to_string());
        params.push(format!("boxcolor={}", self.box_color));

        format!("drawtext={}", params.join(":"))
    }
}

/// A single quote can't appear inside a quoted filter argument; close the
/// quote, emit an escaped quote, reopen.
fn escape_quoted(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Arguments for the `buffer` source. It only accepts frames matching them.
pub fn buffer_args(geometry: &VideoGeometry) -> String {
    let (aspect_num, aspect_den) = geometry.aspect_ratio;
    format!(
        "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect={}/{}",
        geometry.width,
        geometry.height,
        geometry.pixel_format,
        geometry.time_base.0,
        geometry.time_base.1,
        aspect_num,
        if aspect_den > 0 { aspect_den } else { 1 }
    )
}

pub struct WatermarkFilter {
    graph: filter::Graph,
}

unsafe impl Send for WatermarkFilter {}

impl WatermarkFilter {
    pub fn new(stream: &AvStream, watermark: &Watermark) -> Result<Self> {
        let args = buffer_args(&stream.geometry());
        let description = watermark.filter_description();
        let graph = Self::build(&args, &description)
            .map_err(|e| PipelineError::FilterGraph(format!("{} ({})", e, description)))?;

        log::info!("filter graph configured: {}", description);
        log::debug!("buffer source args: {}", args);
        Ok(Self { graph })
    }

    fn build(args: &str, description: &str) -> std::result::Result<filter::Graph, String> {
        let mut graph = filter::Graph::new();

        let buffer = filter::find("buffer").ok_or("buffer filter not found")?;
        graph
            .add(&buffer, SOURCE_NAME, args)
            .map_err(|e| format!("cannot create buffer source: {}", e))?;

        let buffersink = filter::find("buffersink").ok_or("buffersink filter not found")?;
        graph
            .add(&buffersink, SINK_NAME, "")
            .map_err(|e| format!("cannot create buffer sink: {}", e))?;

        graph
            .output(SOURCE_NAME, 0)
            .and_then(|parser| parser.input(SINK_NAME, 0))
            .and_then(|parser| parser.parse(description))
            .map_err(|e| format!("cannot parse filter description: {}", e))?;

        graph
            .validate()
            .map_err(|e| format!("cannot configure filter graph: {}", e))?;

        Ok(graph)
    }

    /// Pushes a frame into the graph. The caller keeps its own reference.
    pub fn push_frame(&mut self, frame: &RawVideoFrame) -> Result<()> {
        let mut source = self
            .graph
            .get(SOURCE_NAME)
            .ok_or_else(|| PipelineError::Filter("buffer source missing".to_string()))?;
        // `Source::add` moves the frame's buffers into the graph; the flagged
        // call takes a new reference instead.
        let ret = unsafe {
            ffmpeg_next::ffi::av_buffersrc_add_frame_flags(
                source.as_mut_ptr(),
                frame.as_video().as_ptr() as *mut _,
                KEEP_REF,
            )
        };
        if ret < 0 {
            return Err(PipelineError::Filter(format!(
                "push frame: {}",
                ffmpeg_next::Error::from(ret)
            )));
        }
        Ok(())
    }

    pub fn pull_frame(&mut self) -> Result<Option<RawVideoFrame>> {
        let mut sink = self
            .graph
            .get(SINK_NAME)
            .ok_or_else(|| PipelineError::Filter("buffer sink missing".to_string()))?;
        let mut filtered = ffmpeg_next::frame::Video::empty();
        match sink.sink().frame(&mut filtered) {
            Ok(()) => Ok(Some(RawVideoFrame::from(filtered))),
            Err(err) if is_drained(&err) => Ok(None),
            Err(err) => Err(PipelineError::Filter(format!("pull frame: {}", err))),
        }
    }
}

impl Drop for WatermarkFilter {
    fn drop(&mut self) {
        log::debug!("filter graph released");
    }
}
