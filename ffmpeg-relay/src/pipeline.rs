//! Single-threaded transcode loop.
//!
//! ```text
//! Source ──► Decoder ──► Filter ──► Encoder (lazy) ──► Sink
//!   1 unit     0..n frames  0..n frames   0..n packets
//! ```
//!
//! Every stage sits behind a trait so the loop can be driven by the FFmpeg
//! wrappers in production and by in-memory stages in tests.

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::{
    decoder::{Decoder, VideoParams},
    encoder::{Encoder, EncoderBuilder},
    error::{PipelineError, Result},
    filter::WatermarkFilter,
    frame::RawVideoFrame,
    input::AvInput,
    output::{AvOutput, PacketTiming},
    packet::RawPacket,
};

pub trait PacketSource {
    /// Blocks for the next access unit; `None` is end of stream.
    fn read_packet(&mut self) -> Option<RawPacket>;
    fn video_stream_index(&self) -> usize;
}

pub trait FrameDecoder {
    fn send_packet(&mut self, packet: &mut RawPacket) -> Result<()>;
    fn receive_frame(&mut self) -> Result<Option<RawVideoFrame>>;
    fn video_params(&self) -> VideoParams;
}

pub trait FrameFilter {
    fn push_frame(&mut self, frame: &RawVideoFrame) -> Result<()>;
    fn pull_frame(&mut self) -> Result<Option<RawVideoFrame>>;
}

pub trait FrameEncoder {
    fn send_frame(&mut self, frame: &mut RawVideoFrame, pts: i64) -> Result<()>;
    fn receive_packet(&mut self) -> Result<Option<RawPacket>>;
}

pub trait EncoderFactory {
    type Encoder: FrameEncoder;
    fn open(&mut self, params: &VideoParams) -> Result<Self::Encoder>;
}

pub trait PacketSink {
    fn write_packet(&mut self, packet: RawPacket) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

impl PacketSource for AvInput {
    fn read_packet(&mut self) -> Option<RawPacket> {
        AvInput::read_packet(self)
    }

    fn video_stream_index(&self) -> usize {
        self.video_stream().index()
    }
}

impl FrameDecoder for Decoder {
    fn send_packet(&mut self, packet: &mut RawPacket) -> Result<()> {
        Decoder::send_packet(self, packet)
    }

    fn receive_frame(&mut self) -> Result<Option<RawVideoFrame>> {
        Decoder::receive_frame(self)
    }

    fn video_params(&self) -> VideoParams {
        Decoder::video_params(self)
    }
}

impl FrameFilter for WatermarkFilter {
    fn push_frame(&mut self, frame: &RawVideoFrame) -> Result<()> {
        WatermarkFilter::push_frame(self, frame)
    }

    fn pull_frame(&mut self) -> Result<Option<RawVideoFrame>> {
        WatermarkFilter::pull_frame(self)
    }
}

impl FrameEncoder for Encoder {
    fn send_frame(&mut self, frame: &mut RawVideoFrame, pts: i64) -> Result<()> {
        Encoder::send_frame(self, frame, pts)
    }

    fn receive_packet(&mut self) -> Result<Option<RawPacket>> {
        Encoder::receive_packet(self)
    }
}

impl EncoderFactory for EncoderBuilder {
    type Encoder = Encoder;

    fn open(&mut self, params: &VideoParams) -> Result<Encoder> {
        EncoderBuilder::open(self, params)
    }
}

impl PacketSink for AvOutput {
    fn write_packet(&mut self, packet: RawPacket) -> Result<()> {
        AvOutput::write_packet(self, packet)
    }

    fn finish(&mut self) -> Result<()> {
        AvOutput::finish(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Connected,
    Streaming,
    Draining,
    Closed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Connected => "connected",
            PipelineState::Streaming => "streaming",
            PipelineState::Draining => "draining",
            PipelineState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why the stream loop stopped.
#[derive(Debug)]
pub enum StreamEnd {
    EndOfStream,
    Cancelled,
    Failed(PipelineError),
}

#[derive(Debug)]
pub struct RunSummary {
    /// Final frame counter: frames that completed the encode stage.
    pub frames_encoded: i64,
    pub packets_written: u64,
    pub packets_dropped: u64,
    /// Frames the encoder rejected; their index is reused.
    pub frames_dropped: u64,
    /// Encoder drain failures after the frame was accepted.
    pub encode_errors: u64,
    pub end: StreamEnd,
}

impl RunSummary {
    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        match &self.end {
            StreamEnd::Failed(e) if e.is_startup() => 1,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub frame_duration: i64,
    /// Log a progress line every this many frames (0 disables it).
    pub progress_interval: i64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            frame_duration: 3600,
            progress_interval: 100,
        }
    }
}

/// Owns every stage of one session.
///
/// Fields drop in declaration order, which is the reverse of acquisition:
/// encoder, sink, filter, decoder, source.
pub struct Pipeline<S, D, F, K, E>
where
    E: EncoderFactory,
{
    encoder: Option<E::Encoder>,
    sink: K,
    filter: F,
    decoder: D,
    source: S,
    factory: E,
    timing: PacketTiming,
    progress_interval: i64,
    frame_index: i64,
    state: PipelineState,
    packets_written: u64,
    packets_dropped: u64,
    frames_dropped: u64,
    encode_errors: u64,
}

/// Outcome of pushing one filtered frame through the encoder.
enum Encoded {
    Done,
    Dropped,
}

impl<S, D, F, K, E> Pipeline<S, D, F, K, E>
where
    S: PacketSource,
    D: FrameDecoder,
    F: FrameFilter,
    K: PacketSink,
    E: EncoderFactory,
{
    /// Takes ownership of fully established stages; the pipeline starts in
    /// `Streaming`.
    pub fn new(
        source: S,
        decoder: D,
        filter: F,
        sink: K,
        factory: E,
        options: PipelineOptions,
    ) -> Self {
        Self {
            encoder: None,
            sink,
            filter,
            decoder,
            source,
            factory,
            timing: PacketTiming::new(options.frame_duration),
            progress_interval: options.progress_interval,
            frame_index: 0,
            state: PipelineState::Streaming,
            packets_written: 0,
            packets_dropped: 0,
            frames_dropped: 0,
            encode_errors: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        log::info!("pipeline state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Runs until end of stream, cancellation or a fatal stage error, then
    /// writes the trailer and releases every stage.
    pub fn run(mut self, cancel: &CancellationToken) -> RunSummary {
        let end = self.stream_loop(cancel);
        match &end {
            StreamEnd::EndOfStream => log::info!("end of input stream"),
            StreamEnd::Cancelled => log::info!("pipeline cancelled"),
            StreamEnd::Failed(e) => log::error!("pipeline stopped: {}", e),
        }

        self.transition(PipelineState::Draining);
        if let Err(e) = self.sink.finish() {
            log::warn!("write trailer error: {}", e);
        }

        let summary = RunSummary {
            frames_encoded: self.frame_index,
            packets_written: self.packets_written,
            packets_dropped: self.packets_dropped,
            frames_dropped: self.frames_dropped,
            encode_errors: self.encode_errors,
            end,
        };

        self.transition(PipelineState::Closed);
        drop(self);
        summary
    }

    fn stream_loop(&mut self, cancel: &CancellationToken) -> StreamEnd {
        let video_index = self.source.video_stream_index();
        loop {
            if cancel.is_cancelled() {
                return StreamEnd::Cancelled;
            }
            let Some(mut packet) = self.source.read_packet() else {
                return StreamEnd::EndOfStream;
            };
            if packet.index() != video_index {
                continue;
            }
            if let Err(e) = self.process_packet(&mut packet) {
                return StreamEnd::Failed(e);
            }
        }
    }

    /// Decode one access unit and push every resulting frame downstream.
    /// Only errors that end the stream are returned.
    fn process_packet(&mut self, packet: &mut RawPacket) -> Result<()> {
        self.decoder.send_packet(packet)?;
        while let Some(frame) = self.decoder.receive_frame()? {
            self.filter.push_frame(&frame)?;
            while let Some(mut filtered) = self.filter.pull_frame()? {
                match self.encode_frame(&mut filtered)? {
                    Encoded::Done => self.frame_index += 1,
                    Encoded::Dropped => {
                        self.frames_dropped += 1;
                        self.discard_filtered()?;
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Empties the buffer sink so nothing from a rejected frame is pulled
    /// after the next push.
    fn discard_filtered(&mut self) -> Result<()> {
        let mut discarded = 0;
        while self.filter.pull_frame()?.is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            log::debug!("discarded {} filtered frame(s) after a rejected frame", discarded);
        }
        Ok(())
    }

    /// The encoder is opened on the first call and reused afterwards.
    fn encoder(&mut self) -> Result<&mut E::Encoder> {
        let encoder = match self.encoder.take() {
            Some(encoder) => encoder,
            None => {
                let params = self.decoder.video_params();
                log::info!(
                    "first filtered frame, opening encoder for {}x{}",
                    params.width,
                    params.height
                );
                self.factory.open(&params)?
            }
        };
        Ok(self.encoder.insert(encoder))
    }

    /// `Ok(Dropped)` when the encoder rejected this frame; `Err` only when the
    /// encoder itself could not be opened.
    ///
    /// Once `send_frame` succeeds the frame owns its index, even if draining
    /// the encoder fails afterwards: packets received so far are written and
    /// the counter moves on.
    fn encode_frame(&mut self, frame: &mut RawVideoFrame) -> Result<Encoded> {
        let frame_index = self.frame_index;
        let timing = self.timing;
        let encoder = self.encoder()?;

        if let Err(e) = encoder.send_frame(frame, frame_index) {
            log::warn!("frame #{} dropped: {}", frame_index, e);
            return Ok(Encoded::Dropped);
        }

        let mut packets = Vec::new();
        let mut receive_error = None;
        loop {
            match encoder.receive_packet() {
                Ok(Some(mut packet)) => {
                    timing.stamp(&mut packet, frame_index);
                    packets.push(packet);
                }
                Ok(None) => break,
                Err(e) => {
                    receive_error = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = receive_error {
            self.encode_errors += 1;
            log::warn!(
                "frame #{}: {}, keeping {} packet(s) already received",
                frame_index,
                e,
                packets.len()
            );
        }

        for packet in packets {
            self.write_packet(packet, frame_index);
        }
        Ok(Encoded::Done)
    }

    fn write_packet(&mut self, packet: RawPacket, frame_index: i64) {
        if self.progress_interval > 0 && frame_index % self.progress_interval == 0 {
            log::info!(
                "frame #{}: pts={:?} dts={:?} size={} key={}",
                frame_index,
                packet.pts(),
                packet.dts(),
                packet.size(),
                packet.is_key()
            );
        }

        match self.sink.write_packet(packet) {
            Ok(()) => self.packets_written += 1,
            Err(e) => {
                self.packets_dropped += 1;
                log::warn!("frame #{}: {}, packet dropped", frame_index, e);
            }
        }
    }
}

impl<S, D, F, K, E> Drop for Pipeline<S, D, F, K, E>
where
    E: EncoderFactory,
{
    fn drop(&mut self) {
        log::debug!(
            "releasing pipeline resources, encoder opened: {}",
            self.encoder.is_some()
        );
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
