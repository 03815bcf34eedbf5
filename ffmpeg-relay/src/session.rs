use tokio_util::sync::CancellationToken;

use crate::{
    decoder::Decoder,
    encoder::{EncoderBuilder, Settings},
    error::Result,
    filter::{Watermark, WatermarkFilter},
    input::{AvInput, SourceOptions},
    output::{AvOutput, SinkOptions},
    pipeline::{Pipeline, PipelineOptions, PipelineState, RunSummary, StreamEnd},
};

pub type RelayPipeline = Pipeline<AvInput, Decoder, WatermarkFilter, AvOutput, EncoderBuilder>;

/// Everything a relay session needs besides the source URL.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub source: SourceOptions,
    pub sink: SinkOptions,
    pub watermark: Watermark,
    pub encoder: Settings,
    pub progress_interval: i64,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            source: SourceOptions::default(),
            sink: SinkOptions::default(),
            watermark: Watermark::default(),
            encoder: Settings::default(),
            progress_interval: PipelineOptions::default().progress_interval,
        }
    }
}

fn log_transition(from: PipelineState, to: PipelineState) {
    log::info!("pipeline state: {} -> {}", from, to);
}

/// Connects to `url` and builds every stage up to the written output header.
///
/// Stages are acquired in order (source, decoder, filter graph, output); if
/// one fails, the ones already held are dropped in reverse order on return.
pub fn open_session(url: &str, options: &RelayOptions) -> Result<RelayPipeline> {
    log::info!("connecting to {}", url);
    let source = AvInput::open(url, &options.source)?;
    log_transition(PipelineState::Idle, PipelineState::Connected);

    let stream = source.video_stream().clone();
    let decoder = Decoder::new(&stream)?;
    let filter = WatermarkFilter::new(&stream, &options.watermark)?;
    let sink = AvOutput::open(&options.sink, &stream)?;
    log_transition(PipelineState::Connected, PipelineState::Streaming);

    Ok(Pipeline::new(
        source,
        decoder,
        filter,
        sink,
        EncoderBuilder::new(options.encoder.clone()),
        PipelineOptions {
            frame_duration: options.sink.frame_duration,
            progress_interval: options.progress_interval,
        },
    ))
}

/// Opens a session and streams until it ends. Startup failures come back as
/// a summary with `StreamEnd::Failed` so callers get one exit path.
pub fn run(url: &str, options: &RelayOptions, cancel: &CancellationToken) -> RunSummary {
    match open_session(url, options) {
        Ok(pipeline) => pipeline.run(cancel),
        Err(e) => RunSummary {
            frames_encoded: 0,
            packets_written: 0,
            packets_dropped: 0,
            frames_dropped: 0,
            encode_errors: 0,
            end: StreamEnd::Failed(e),
        },
    }
}
