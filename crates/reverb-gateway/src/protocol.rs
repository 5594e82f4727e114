//! The framed, Wyoming-style protocol the gateway speaks with both PCM
//! and Opus clients: a JSON header, optionally followed by a binary
//! payload of exactly `payload_length` bytes.

use reverb_models::RecordingMode;
use serde::Deserialize;

use crate::error::{GatewayError, Result};

/// The wire codec a connection negotiated via `?codec=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsCodec {
    Pcm,
    Opus,
}

impl WsCodec {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pcm" => Ok(WsCodec::Pcm),
            "opus" => Ok(WsCodec::Opus),
            other => Err(GatewayError::UnsupportedCodec(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    payload_length: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioStartData {
    pub rate: u32,
    pub width: u8,
    pub channels: u8,
    #[serde(default)]
    pub mode: Option<RecordingMode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ButtonEventData {
    pub state: String,
}

/// One parsed header frame.
#[derive(Debug, Clone)]
pub enum Header {
    AudioStart(AudioStartData),
    /// `payload_length` bytes of raw PCM or Opus bytes follow as a
    /// binary WS frame.
    AudioChunk { payload_length: usize },
    AudioStop,
    ButtonEvent(ButtonEventData),
    Ping,
    /// Anything else: log and skip the frame; the connection survives.
    Unknown(String),
}

pub fn parse_header(text: &str) -> Result<Header> {
    let raw: RawHeader = serde_json::from_str(text.trim())
        .map_err(|err| GatewayError::Protocol(format!("malformed header: {err}")))?;

    Ok(match raw.type_.as_str() {
        "audio-start" => {
            let data = raw
                .data
                .ok_or_else(|| GatewayError::Protocol("audio-start missing data".into()))?;
            let parsed: AudioStartData = serde_json::from_value(data)
                .map_err(|err| GatewayError::Protocol(format!("bad audio-start data: {err}")))?;
            Header::AudioStart(parsed)
        }
        "audio-chunk" => Header::AudioChunk {
            payload_length: raw.payload_length.unwrap_or(0),
        },
        "audio-stop" => Header::AudioStop,
        "button-event" => {
            let data = raw
                .data
                .ok_or_else(|| GatewayError::Protocol("button-event missing data".into()))?;
            let parsed: ButtonEventData = serde_json::from_value(data)
                .map_err(|err| GatewayError::Protocol(format!("bad button-event data: {err}")))?;
            Header::ButtonEvent(parsed)
        }
        "ping" => Header::Ping,
        other => Header::Unknown(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_audio_start_with_mode() {
        let header = parse_header(
            r#"{"type":"audio-start","data":{"rate":16000,"width":2,"channels":1,"mode":"streaming"}}"#,
        )
        .unwrap();
        match header {
            Header::AudioStart(data) => {
                assert_eq!(data.rate, 16_000);
                assert_eq!(data.mode, Some(RecordingMode::Streaming));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn parses_audio_chunk_payload_length() {
        let header = parse_header(r#"{"type":"audio-chunk","payload_length":3200}"#).unwrap();
        match header {
            Header::AudioChunk { payload_length } => assert_eq!(payload_length, 3200),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_types_are_tolerated_not_rejected() {
        let header = parse_header(r#"{"type":"future-thing"}"#).unwrap();
        assert!(matches!(header, Header::Unknown(t) if t == "future-thing"));
    }

    #[test]
    fn malformed_json_is_a_protocol_error() {
        assert!(parse_header("not json").is_err());
    }

    #[test]
    fn codec_parses_pcm_and_opus_only() {
        assert!(matches!(WsCodec::parse("pcm"), Ok(WsCodec::Pcm)));
        assert!(matches!(WsCodec::parse("opus"), Ok(WsCodec::Opus)));
        assert!(WsCodec::parse("mp3").is_err());
    }
}
