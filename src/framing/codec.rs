//! `encode_frame`/`decode_frame`: the read/write halves of the framing
//! codec, operating directly over async I/O handles rather than through a
//! `Framed`/codec-trait wrapper (mirrors the explicit read/write loops the
//! teacher uses for its connection handling).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{pad8, CallbackKind, CallbackRequest, FramingError, InboundFrame, RecordType, ERROR_RESULT_MARKER};

/// Writes one outbound frame: `(be_u32 record_type, be_u32 len)` then the
/// payload, padded to an 8-byte boundary.
pub async fn encode_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    record_type: RecordType,
    payload: &[u8],
) -> std::io::Result<()> {
    let mut header = [0u8; 8];
    header[0..4].copy_from_slice(&(record_type as u32).to_be_bytes());
    header[4..8].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    w.write_all(&header).await?;
    w.write_all(payload).await?;
    let padded = pad8(payload.len());
    if padded > payload.len() {
        let zeros = vec![0u8; padded - payload.len()];
        w.write_all(&zeros).await?;
    }
    w.flush().await
}

/// Reads one inbound frame: a `be_i32` length followed by `|length|` bytes
/// (padded), interpreted per §4.1.
pub async fn decode_frame<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<InboundFrame> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let length = i32::from_be_bytes(len_buf);

    if length == 0 {
        return Ok(InboundFrame::Null);
    }
    if length == -1 {
        return Ok(InboundFrame::Undefined);
    }

    let abs_len = length.unsigned_abs() as usize;
    let mut payload = vec![0u8; abs_len];
    r.read_exact(&mut payload).await?;

    let padded = pad8(4 + abs_len) - 4;
    if padded > abs_len {
        let mut pad_buf = vec![0u8; padded - abs_len];
        r.read_exact(&mut pad_buf).await?;
    }

    if length > 0 {
        Ok(InboundFrame::Result(payload))
    } else if payload.len() >= 4 && u32::from_be_bytes(payload[0..4].try_into().unwrap()) == ERROR_RESULT_MARKER {
        Ok(parse_error_reply(&payload).map_err(
            |e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
        )?)
    } else {
        Ok(InboundFrame::Callback(parse_callback_request(&payload).map_err(
            |e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
        )?))
    }
}

fn parse_callback_request(payload: &[u8]) -> Result<CallbackRequest, FramingError> {
    if payload.len() < 8 {
        return Err(FramingError::PayloadTooShort { expected: 8, got: payload.len() });
    }
    let kind_code = u32::from_be_bytes(payload[0..4].try_into().unwrap());
    let host_handle = u32::from_be_bytes(payload[4..8].try_into().unwrap());
    let kind = CallbackKind::from_u32(kind_code)
        .ok_or(FramingError::UnknownCallbackKind(kind_code))?;
    Ok(CallbackRequest { kind, host_handle, body: payload[8..].to_vec() })
}

/// Parses `[ERROR_RESULT_MARKER, reserved, json([file, line, message, trace])]`
/// into an [`InboundFrame::Error`].
fn parse_error_reply(payload: &[u8]) -> Result<InboundFrame, FramingError> {
    if payload.len() < 8 {
        return Err(FramingError::PayloadTooShort { expected: 8, got: payload.len() });
    }
    let json: serde_json::Value =
        serde_json::from_slice(&payload[8..]).map_err(|_| FramingError::MalformedErrorReply)?;
    let arr = json.as_array().ok_or(FramingError::MalformedErrorReply)?;
    let get_str = |i: usize| arr.get(i).and_then(|v| v.as_str()).map(str::to_string);
    let file = get_str(0).ok_or(FramingError::MalformedErrorReply)?;
    let line = arr.get(1).and_then(|v| v.as_u64()).ok_or(FramingError::MalformedErrorReply)? as u32;
    let message = get_str(2).ok_or(FramingError::MalformedErrorReply)?;
    let trace = get_str(3).unwrap_or_default();
    Ok(InboundFrame::Error { file, line, message, trace })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Builds a raw inbound-frame byte buffer: length word + payload, padded
    /// so the whole unit (length word included) is a multiple of 8 bytes.
    fn build_inbound(length: i32, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&length.to_be_bytes());
        buf.extend_from_slice(payload);
        buf.resize(pad8(4 + payload.len()), 0);
        buf
    }

    #[tokio::test]
    async fn encode_then_decode_result() {
        let inbound = build_inbound(5, b"hello");
        let mut cursor = Cursor::new(inbound);
        let frame = decode_frame(&mut cursor).await.unwrap();
        match frame {
            InboundFrame::Result(payload) => assert_eq!(payload, b"hello"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn decode_null_and_undefined() {
        let mut cursor = Cursor::new(0i32.to_be_bytes().to_vec());
        assert!(matches!(decode_frame(&mut cursor).await.unwrap(), InboundFrame::Null));

        let mut cursor = Cursor::new((-1i32).to_be_bytes().to_vec());
        assert!(matches!(decode_frame(&mut cursor).await.unwrap(), InboundFrame::Undefined));
    }

    #[tokio::test]
    async fn decode_callback_request() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(CallbackKind::Call as u32).to_be_bytes());
        payload.extend_from_slice(&42u32.to_be_bytes());
        payload.extend_from_slice(br#"["strlen",["ab"]]"#);

        let total_len = -(payload.len() as i32);
        let inbound = build_inbound(total_len, &payload);

        let mut cursor = Cursor::new(inbound);
        match decode_frame(&mut cursor).await.unwrap() {
            InboundFrame::Callback(req) => {
                assert_eq!(req.kind, CallbackKind::Call);
                assert_eq!(req.host_handle, 42);
                assert_eq!(req.body, br#"["strlen",["ab"]]"#);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn decode_error_reply() {
        let mut payload = ERROR_RESULT_MARKER.to_be_bytes().to_vec();
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(br#"["bootstrap.php",42,"undefined function foo()","#0 {main}"]"#);

        let total_len = -(payload.len() as i32);
        let inbound = build_inbound(total_len, &payload);

        let mut cursor = Cursor::new(inbound);
        match decode_frame(&mut cursor).await.unwrap() {
            InboundFrame::Error { file, line, message, .. } => {
                assert_eq!(file, "bootstrap.php");
                assert_eq!(line, 42);
                assert_eq!(message, "undefined function foo()");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn encode_pads_to_8_bytes() {
        let mut buf = Vec::new();
        encode_frame(&mut buf, RecordType::Const, b"abc").await.unwrap();
        // 8-byte header + 3-byte payload padded to 8 = 16 total.
        assert_eq!(buf.len(), 16);
    }
}
