use std::sync::LazyLock;

use ffmpeg_relay::{
    RelayOptions,
    encoder::Settings,
    filter::Watermark,
    input::SourceOptions,
    output::SinkOptions,
};
use serde::Serialize;

const RTSP_TRANSPORT: &str = "tcp";
const CONNECT_TIMEOUT_US: u64 = 5_000_000;
const OUTPUT_URL: &str = "rtp://10.68.128.67:12340";
const OUTPUT_FORMAT: &str = "rtp";
const WATERMARK_TEXT: &str = "测试水印 - %{localtime}";
// 25 fps at the 90 kHz RTP clock.
const FRAME_DURATION: i64 = 3600;
const BIT_RATE: usize = 2_000_000;
const GOP_SIZE: u32 = 50;
const PROGRESS_INTERVAL: i64 = 100;

/// The relay's fixed configuration. Nothing here is exposed on the command
/// line; it is logged once at startup.
#[derive(Debug, Serialize)]
pub struct RelayConfig {
    rtsp_transport: String,
    connect_timeout_us: u64,
    output_url: String,
    output_format: String,
    frame_duration: i64,
    watermark_text: String,
    encoder: String,
    bit_rate: usize,
    gop_size: u32,
    max_b_frames: usize,
    preset: String,
    tune: String,
    profile: String,
    progress_interval: i64,
}

impl RelayConfig {
    pub fn new() -> Self {
        let encoder = Settings::default();
        Self {
            rtsp_transport: RTSP_TRANSPORT.to_string(),
            connect_timeout_us: CONNECT_TIMEOUT_US,
            output_url: OUTPUT_URL.to_string(),
            output_format: OUTPUT_FORMAT.to_string(),
            frame_duration: FRAME_DURATION,
            watermark_text: WATERMARK_TEXT.to_string(),
            encoder: encoder.codec,
            bit_rate: BIT_RATE,
            gop_size: GOP_SIZE,
            max_b_frames: 0,
            preset: encoder.preset,
            tune: encoder.tune,
            profile: encoder.profile,
            progress_interval: PROGRESS_INTERVAL,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("<unserializable: {}>", e))
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            source: SourceOptions {
                transport: self.rtsp_transport.clone(),
                timeout_us: self.connect_timeout_us,
            },
            sink: SinkOptions {
                url: self.output_url.clone(),
                format: self.output_format.clone(),
                frame_duration: self.frame_duration,
            },
            watermark: Watermark {
                text: self.watermark_text.clone(),
                ..Default::default()
            },
            encoder: Settings {
                codec: self.encoder.clone(),
                bit_rate: self.bit_rate,
                gop_size: self.gop_size,
                max_b_frames: self.max_b_frames,
                preset: self.preset.clone(),
                tune: self.tune.clone(),
                profile: self.profile.clone(),
                ..Default::default()
            },
            progress_interval: self.progress_interval,
        }
    }
}

pub fn config() -> &'static RelayConfig {
    static CONFIG: LazyLock<RelayConfig> = LazyLock::new(RelayConfig::new);
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_options() {
        let options = config().relay_options();
        assert_eq!(options.source.transport, "tcp");
        assert_eq!(options.source.timeout_us, 5_000_000);
        assert_eq!(options.sink.url, "rtp://10.68.128.67:12340");
        assert_eq!(options.sink.frame_duration, 3600);
        assert_eq!(options.encoder.gop_size, 50);
        assert_eq!(options.encoder.max_b_frames, 0);
        assert_eq!(
            options.watermark.filter_description(),
            "drawtext=text='测试水印 - %{localtime}':fontcolor=white:fontsize=20:\
             x=(w-text_w-10):y=10:box=1:boxcolor=black@0.5"
        );
    }

    #[test]
    fn test_config_json() {
        let json: serde_json::Value = serde_json::from_str(&config().to_json()).unwrap();
        assert_eq!(json["output_url"], "rtp://10.68.128.67:12340");
        assert_eq!(json["bit_rate"], 2_000_000);
    }
}
