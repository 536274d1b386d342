use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProtocolError;
use crate::messages::{ClientMessage, ServerMessage};

/// Framed message ceiling: 16 MiB. Screen frames travel whole inside
/// `SendScreenFrame`, so the cap clears the largest preset frame
/// (≈1.25 MiB) with generous headroom.
pub const MAX_MSG_SIZE: u32 = 16 * 1024 * 1024;

/// Wire framing: a 4-byte big-endian payload length, then the postcard
/// payload.
fn frame(payload: Vec<u8>) -> Vec<u8> {
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(&payload);
    framed
}

fn encode_msg<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(frame(postcard::to_allocvec(msg)?))
}

fn decode_msg<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    Ok(postcard::from_bytes(payload)?)
}

/// Frame a `ClientMessage` for transmission.
pub fn encode_client_msg(msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    encode_msg(msg)
}

/// Decode a `ClientMessage` payload (length prefix already stripped).
pub fn decode_client_msg(payload: &[u8]) -> Result<ClientMessage, ProtocolError> {
    decode_msg(payload)
}

/// Frame a `ServerMessage` for transmission.
pub fn encode_server_msg(msg: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    encode_msg(msg)
}

/// Decode a `ServerMessage` payload (length prefix already stripped).
pub fn decode_server_msg(payload: &[u8]) -> Result<ServerMessage, ProtocolError> {
    decode_msg(payload)
}

/// Pull one complete frame out of `buf`, advancing past it.
///
/// `Ok(None)` means more bytes are needed. An oversized length is
/// rejected before any of its payload accumulates, so a bad peer cannot
/// make the reader buffer without bound.
pub fn try_decode_frame(buf: &mut BytesMut) -> Result<Option<Vec<u8>>, ProtocolError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if length > MAX_MSG_SIZE as usize {
        return Err(ProtocolError::MessageTooLarge(length));
    }
    if buf.len() < 4 + length {
        return Ok(None);
    }

    buf.advance(4);
    Ok(Some(buf.split_to(length).to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A reader-side buffer preloaded with the given wire bytes.
    fn wire(bytes: &[u8]) -> BytesMut {
        let mut buf = BytesMut::with_capacity(bytes.len());
        buf.extend_from_slice(bytes);
        buf
    }

    #[test]
    fn roundtrip_client_message() {
        let encoded = encode_client_msg(&ClientMessage::UpdateSpeakingState {
            is_speaking: true,
            level: 0.75,
        })
        .unwrap();

        // The first four bytes are the length prefix
        assert_eq!(encoded[..4], ((encoded.len() - 4) as u32).to_be_bytes());
        match decode_client_msg(&encoded[4..]).unwrap() {
            ClientMessage::UpdateSpeakingState { is_speaking, level } => {
                assert!(is_speaking);
                assert!((level - 0.75).abs() < f64::EPSILON);
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn roundtrip_server_message() {
        let encoded = encode_server_msg(&ServerMessage::ViewerCountUpdated { count: 3 }).unwrap();
        assert!(matches!(
            decode_server_msg(&encoded[4..]).unwrap(),
            ServerMessage::ViewerCountUpdated { count: 3 }
        ));
    }

    #[test]
    fn frame_extraction_waits_for_full_frame() {
        let encoded = encode_client_msg(&ClientMessage::LeaveVoiceChannel).unwrap();

        // Drip the frame in byte by byte: nothing comes out early
        let mut buf = BytesMut::new();
        for (i, &b) in encoded.iter().enumerate() {
            buf.extend_from_slice(&[b]);
            let extracted = try_decode_frame(&mut buf).unwrap();
            if i + 1 < encoded.len() {
                assert!(extracted.is_none(), "frame surfaced after {} bytes", i + 1);
            } else {
                let payload = extracted.expect("complete frame not extracted");
                assert!(matches!(
                    decode_client_msg(&payload).unwrap(),
                    ClientMessage::LeaveVoiceChannel
                ));
            }
        }
        assert!(buf.is_empty(), "consumed frame left residue");
    }

    #[test]
    fn oversized_length_is_rejected_up_front() {
        let mut bytes = (MAX_MSG_SIZE + 1).to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 100]);
        let mut buf = wire(&bytes);
        assert!(matches!(
            try_decode_frame(&mut buf),
            Err(ProtocolError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn back_to_back_frames_extract_in_order() {
        let mut bytes = encode_client_msg(&ClientMessage::StartScreenShare).unwrap();
        bytes.extend(encode_client_msg(&ClientMessage::StopScreenShare).unwrap());
        let mut buf = wire(&bytes);

        let first = try_decode_frame(&mut buf).unwrap().unwrap();
        let second = try_decode_frame(&mut buf).unwrap().unwrap();
        assert!(matches!(
            decode_client_msg(&first).unwrap(),
            ClientMessage::StartScreenShare
        ));
        assert!(matches!(
            decode_client_msg(&second).unwrap(),
            ClientMessage::StopScreenShare
        ));
        assert!(try_decode_frame(&mut buf).unwrap().is_none());
    }
}
