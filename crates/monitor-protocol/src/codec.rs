//! Codec for encoding and decoding topic payloads.
//!
//! Every payload is JSON. Decoding checks the size bound first, then the
//! shape, then that the payload's own event matches the event it arrived
//! under. Frames additionally pass MIME and image size checks.

use crate::message::{FrameImage, FrameMessage, WireMessage};
use crate::topic::Event;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;

/// Upper bound for signaling and directive payloads.
pub const MAX_SIGNAL_BYTES: usize = 64 * 1024;

/// Image types the relay accepts.
pub const ALLOWED_IMAGE_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// Upper bound for an image URI.
pub const MAX_IMAGE_URI_CHARS: usize = 2048;

/// Error type for codec operations
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// Payload exceeded its size bound
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Payload did not parse as the expected shape
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Event name is not part of the protocol
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// Payload tag disagrees with the event it was published under
    #[error("Event mismatch: published as {published}, payload is {payload}")]
    EventMismatch { published: Event, payload: Event },

    /// Frame image type is not allowed
    #[error("Unsupported image type: {0}")]
    UnsupportedMimeType(String),

    /// Frame image failed its bounds
    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

/// Size bounds applied to frame payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Maximum encoded payload size.
    pub max_payload_bytes: usize,
    /// Maximum decoded inline image size.
    pub max_image_bytes: usize,
}

impl FrameLimits {
    /// Limits derived from the encoded payload bound.
    ///
    /// Base64 inflates by 4/3, so a decoded image can never exceed 3/4 of
    /// the payload.
    #[must_use]
    pub const fn from_payload_limit(max_payload_bytes: usize) -> Self {
        Self {
            max_payload_bytes,
            max_image_bytes: max_payload_bytes / 4 * 3,
        }
    }
}

/// Encode a payload to bytes
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode<T: WireMessage>(message: &T) -> Result<Bytes, CodecError> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Decode a payload received under `event`
///
/// # Errors
///
/// Returns an error if the payload is too large, does not parse, or was
/// published under a different event than its own
pub fn decode<T: WireMessage>(
    event: &str,
    payload: &[u8],
    max_bytes: usize,
) -> Result<T, CodecError> {
    if payload.len() > max_bytes {
        return Err(CodecError::PayloadTooLarge {
            size: payload.len(),
            max: max_bytes,
        });
    }

    let published: Event = event.parse().map_err(CodecError::UnknownEvent)?;
    let message: T =
        serde_json::from_slice(payload).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let actual = message.event();
    if actual != published {
        return Err(CodecError::EventMismatch {
            published,
            payload: actual,
        });
    }

    Ok(message)
}

/// Decode and bound-check a frame payload
///
/// # Errors
///
/// Returns an error if the payload fails any size, shape or type bound
pub fn decode_frame(payload: &[u8], limits: FrameLimits) -> Result<FrameMessage, CodecError> {
    let frame: FrameMessage = decode(Event::Frame.as_str(), payload, limits.max_payload_bytes)?;

    if !ALLOWED_IMAGE_MIME_TYPES.contains(&frame.mime_type.as_str()) {
        return Err(CodecError::UnsupportedMimeType(frame.mime_type));
    }

    match &frame.image {
        FrameImage::Inline { data } => {
            let image = STANDARD
                .decode(data)
                .map_err(|e| CodecError::InvalidImage(format!("base64: {e}")))?;
            if image.is_empty() {
                return Err(CodecError::InvalidImage("empty image".to_string()));
            }
            if image.len() > limits.max_image_bytes {
                return Err(CodecError::PayloadTooLarge {
                    size: image.len(),
                    max: limits.max_image_bytes,
                });
            }
        }
        FrameImage::Uri { uri } => {
            if uri.len() > MAX_IMAGE_URI_CHARS {
                return Err(CodecError::InvalidImage("uri too long".to_string()));
            }
            if !(uri.starts_with("https://") || uri.starts_with("http://")) {
                return Err(CodecError::InvalidImage("unsupported uri scheme".to_string()));
            }
        }
    }

    Ok(frame)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::message::{CloseReason, SignalMessage, WarningMessage};
    use chrono::Utc;
    use common::types::{ParticipantId, SessionId};

    fn frame_payload(image: FrameImage, mime_type: &str) -> Bytes {
        encode(&FrameMessage {
            participant_id: ParticipantId::new(),
            image,
            mime_type: mime_type.to_string(),
            captured_at: Utc::now(),
        })
        .unwrap()
    }

    #[test]
    fn test_decode_signal() {
        let bytes = encode(&SignalMessage::Offer {
            sdp: "v=0\r\n".to_string(),
        })
        .unwrap();

        let decoded: SignalMessage = decode("offer", &bytes, MAX_SIGNAL_BYTES).unwrap();
        assert_eq!(
            decoded,
            SignalMessage::Offer {
                sdp: "v=0\r\n".to_string()
            }
        );
    }

    #[test]
    fn test_decode_rejects_event_mismatch() {
        let bytes = encode(&SignalMessage::Close {
            reason: CloseReason::Requested,
        })
        .unwrap();

        let result: Result<SignalMessage, _> = decode("offer", &bytes, MAX_SIGNAL_BYTES);
        assert_eq!(
            result,
            Err(CodecError::EventMismatch {
                published: Event::Offer,
                payload: Event::Close,
            })
        );
    }

    #[test]
    fn test_decode_rejects_unknown_event() {
        let result: Result<SignalMessage, _> = decode("renegotiate", b"{}", MAX_SIGNAL_BYTES);
        assert_eq!(result, Err(CodecError::UnknownEvent("renegotiate".to_string())));
    }

    #[test]
    fn test_decode_rejects_oversized_before_parsing() {
        let payload = vec![b'x'; 32];
        let result: Result<SignalMessage, _> = decode("offer", &payload, 16);
        assert_eq!(result, Err(CodecError::PayloadTooLarge { size: 32, max: 16 }));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let result: Result<WarningMessage, _> =
            decode("warning", br#"{"message":"eyes on screen"}"#, MAX_SIGNAL_BYTES);
        assert!(matches!(result, Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_decode_frame_inline() {
        let data = STANDARD.encode([0xFF, 0xD8, 0xFF, 0xE0]);
        let payload = frame_payload(FrameImage::Inline { data }, "image/jpeg");

        let frame = decode_frame(&payload, FrameLimits::from_payload_limit(4096)).unwrap();
        assert_eq!(frame.mime_type, "image/jpeg");
    }

    #[test]
    fn test_decode_frame_rejects_mime_type() {
        let data = STANDARD.encode(b"GIF89a");
        let payload = frame_payload(FrameImage::Inline { data }, "image/gif");

        let result = decode_frame(&payload, FrameLimits::from_payload_limit(4096));
        assert_eq!(
            result,
            Err(CodecError::UnsupportedMimeType("image/gif".to_string()))
        );
    }

    #[test]
    fn test_decode_frame_rejects_bad_base64_and_empty() {
        let limits = FrameLimits::from_payload_limit(4096);

        let bad = frame_payload(
            FrameImage::Inline {
                data: "not base64!".to_string(),
            },
            "image/png",
        );
        assert!(matches!(
            decode_frame(&bad, limits),
            Err(CodecError::InvalidImage(_))
        ));

        let empty = frame_payload(
            FrameImage::Inline {
                data: String::new(),
            },
            "image/png",
        );
        assert!(matches!(
            decode_frame(&empty, limits),
            Err(CodecError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_decode_frame_rejects_oversized_image() {
        let data = STANDARD.encode(vec![7u8; 600]);
        let payload = frame_payload(FrameImage::Inline { data }, "image/png");
        let limits = FrameLimits {
            max_payload_bytes: 4096,
            max_image_bytes: 512,
        };

        assert_eq!(
            decode_frame(&payload, limits),
            Err(CodecError::PayloadTooLarge { size: 600, max: 512 })
        );
    }

    #[test]
    fn test_decode_frame_uri_scheme() {
        let limits = FrameLimits::from_payload_limit(4096);

        let ok = frame_payload(
            FrameImage::Uri {
                uri: "https://cdn.example/f/1.webp".to_string(),
            },
            "image/webp",
        );
        assert!(decode_frame(&ok, limits).is_ok());

        let bad = frame_payload(
            FrameImage::Uri {
                uri: "file:///etc/passwd".to_string(),
            },
            "image/webp",
        );
        assert!(matches!(
            decode_frame(&bad, limits),
            Err(CodecError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_frame_limits_from_payload() {
        let limits = FrameLimits::from_payload_limit(1_048_576);
        assert_eq!(limits.max_image_bytes, 786_432);
    }

    #[test]
    fn test_encode_warning_uses_session_ids() {
        let session_id = SessionId::new();
        let bytes = encode(&WarningMessage {
            session_id,
            participant_id: ParticipantId::new(),
            message: "Please keep your face in view".to_string(),
            severity: crate::message::Severity::Warning,
            sent_at: Utc::now(),
        })
        .unwrap();

        let decoded: WarningMessage = decode("warning", &bytes, MAX_SIGNAL_BYTES).unwrap();
        assert_eq!(decoded.session_id, session_id);
    }
}
