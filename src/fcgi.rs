//! FastCGI protocol primitives (§4.6, §6.3 FPM transport).
//!
//! Used from two directions: [`Controller`](crate::controller::Controller)'s
//! FPM transport is a FastCGI *client*, issuing one long-lived responder
//! request per interpreter to a configured pool; `php_world_fcgi_proxy`
//! (`src/bin/fcgi_proxy.rs`) is a FastCGI *server*, standing in for that pool
//! in tests and demos. Both directions share the same record framing, so the
//! wire-level pieces (header, name/value encoding, record chunking) live
//! here once.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const FCGI_VERSION_1: u8 = 1;

pub const TYPE_BEGIN_REQUEST: u8 = 1;
pub const TYPE_ABORT_REQUEST: u8 = 2;
pub const TYPE_END_REQUEST: u8 = 3;
pub const TYPE_PARAMS: u8 = 4;
pub const TYPE_STDIN: u8 = 5;
pub const TYPE_STDOUT: u8 = 6;
pub const TYPE_STDERR: u8 = 7;

pub const ROLE_RESPONDER: u16 = 1;

pub const PROTOCOL_STATUS_REQUEST_COMPLETE: u8 = 0;
pub const PROTOCOL_STATUS_CANT_MPX_CONN: u8 = 1;
pub const PROTOCOL_STATUS_OVERLOADED: u8 = 2;
pub const PROTOCOL_STATUS_UNKNOWN_ROLE: u8 = 3;

/// Maximum content a single record can carry; longer buffers are split
/// across consecutive records of the same type.
const MAX_RECORD_CONTENT: usize = 0xffff;

struct RecordHeader {
    record_type: u8,
    request_id: u16,
    content_length: u16,
    padding_length: u8,
}

impl RecordHeader {
    async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> std::io::Result<()> {
        let mut buf = [0u8; 8];
        buf[0] = FCGI_VERSION_1;
        buf[1] = self.record_type;
        buf[2..4].copy_from_slice(&self.request_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.content_length.to_be_bytes());
        buf[6] = self.padding_length;
        buf[7] = 0;
        w.write_all(&buf).await
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<Self> {
        let mut buf = [0u8; 8];
        r.read_exact(&mut buf).await?;
        Ok(RecordHeader {
            record_type: buf[1],
            request_id: u16::from_be_bytes([buf[2], buf[3]]),
            content_length: u16::from_be_bytes([buf[4], buf[5]]),
            padding_length: buf[6],
        })
    }
}

/// Writes one record, chunking `content` across `MAX_RECORD_CONTENT`-sized
/// records and padding each to an 8-byte boundary.
async fn write_record<W: AsyncWrite + Unpin>(
    w: &mut W,
    record_type: u8,
    request_id: u16,
    content: &[u8],
) -> std::io::Result<()> {
    if content.is_empty() {
        let header = RecordHeader { record_type, request_id, content_length: 0, padding_length: 0 };
        return header.write(w).await;
    }
    for chunk in content.chunks(MAX_RECORD_CONTENT) {
        let padding = ((8 - (chunk.len() % 8)) % 8) as u8;
        let header = RecordHeader {
            record_type,
            request_id,
            content_length: chunk.len() as u16,
            padding_length: padding,
        };
        header.write(w).await?;
        w.write_all(chunk).await?;
        if padding > 0 {
            w.write_all(&vec![0u8; padding as usize]).await?;
        }
    }
    Ok(())
}

async fn write_begin_request<W: AsyncWrite + Unpin>(
    w: &mut W,
    request_id: u16,
    role: u16,
) -> std::io::Result<()> {
    let mut body = [0u8; 8];
    body[0..2].copy_from_slice(&role.to_be_bytes());
    body[2] = 0; // keep_conn off: one request per connection
    write_record(w, TYPE_BEGIN_REQUEST, request_id, &body).await
}

/// Encodes FastCGI name/value pairs (the `PARAMS` record body), using the
/// 1-byte length for values under 128 and the 4-byte high-bit-set form
/// otherwise.
fn encode_name_value_pairs(pairs: &[(String, String)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in pairs {
        encode_length(&mut out, name.len());
        encode_length(&mut out, value.len());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    out
}

fn encode_length(out: &mut Vec<u8>, len: usize) {
    if len < 128 {
        out.push(len as u8);
    } else {
        let len = len as u32 | 0x8000_0000;
        out.extend_from_slice(&len.to_be_bytes());
    }
}

fn decode_name_value_pairs(mut body: &[u8]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    while !body.is_empty() {
        let (name_len, rest) = match decode_length(body) {
            Some(v) => v,
            None => break,
        };
        body = rest;
        let (value_len, rest) = match decode_length(body) {
            Some(v) => v,
            None => break,
        };
        body = rest;
        if body.len() < name_len + value_len {
            break;
        }
        let name = String::from_utf8_lossy(&body[..name_len]).into_owned();
        let value = String::from_utf8_lossy(&body[name_len..name_len + value_len]).into_owned();
        map.insert(name, value);
        body = &body[name_len + value_len..];
    }
    map
}

fn decode_length(body: &[u8]) -> Option<(usize, &[u8])> {
    if body.is_empty() {
        return None;
    }
    if body[0] & 0x80 == 0 {
        Some((body[0] as usize, &body[1..]))
    } else {
        if body.len() < 4 {
            return None;
        }
        let len = u32::from_be_bytes([body[0] & 0x7f, body[1], body[2], body[3]]);
        Some((len as usize, &body[4..]))
    }
}

/// What the far side sent back for one responder request.
pub struct FcgiResponse {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub app_status: i32,
    pub protocol_status: u8,
}

/// Client role: issues one responder request over `stream` (already
/// connected to the pool) and reads the complete response. Used by
/// `Controller`'s FPM transport to hand the bootstrap script's path and the
/// HELO string to a PHP-FPM pool (§4.6 step 2).
pub async fn send_request<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    params: &[(String, String)],
    stdin: &[u8],
) -> std::io::Result<FcgiResponse> {
    const REQUEST_ID: u16 = 1;

    write_begin_request(stream, REQUEST_ID, ROLE_RESPONDER).await?;
    let encoded_params = encode_name_value_pairs(params);
    write_record(stream, TYPE_PARAMS, REQUEST_ID, &encoded_params).await?;
    write_record(stream, TYPE_PARAMS, REQUEST_ID, &[]).await?;
    if !stdin.is_empty() {
        write_record(stream, TYPE_STDIN, REQUEST_ID, stdin).await?;
    }
    write_record(stream, TYPE_STDIN, REQUEST_ID, &[]).await?;
    stream.flush().await?;

    read_response(stream).await
}

async fn read_response<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<FcgiResponse> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut app_status = 0i32;
    let mut protocol_status = PROTOCOL_STATUS_REQUEST_COMPLETE;

    loop {
        let header = RecordHeader::read(stream).await?;
        let mut content = vec![0u8; header.content_length as usize];
        stream.read_exact(&mut content).await?;
        if header.padding_length > 0 {
            let mut pad = vec![0u8; header.padding_length as usize];
            stream.read_exact(&mut pad).await?;
        }

        match header.record_type {
            TYPE_STDOUT => stdout.extend_from_slice(&content),
            TYPE_STDERR => stderr.extend_from_slice(&content),
            TYPE_END_REQUEST => {
                if content.len() >= 5 {
                    app_status = i32::from_be_bytes([content[0], content[1], content[2], content[3]]);
                    protocol_status = content[4];
                }
                break;
            }
            _ => {}
        }
    }

    Ok(FcgiResponse { stdout, stderr, app_status, protocol_status })
}

/// One fully-read inbound responder request, as seen by a FastCGI server.
pub struct ServerRequest {
    pub request_id: u16,
    pub params: HashMap<String, String>,
    pub stdin: Vec<u8>,
}

/// Server role: reads one complete inbound request off `stream` (begin
/// request, then params records until the empty terminator, then stdin
/// records until its own empty terminator). Used by `fcgi_proxy` to stand in
/// for a PHP-FPM pool in tests.
pub async fn read_request<R: AsyncRead + Unpin>(stream: &mut R) -> std::io::Result<ServerRequest> {
    let begin = RecordHeader::read(stream).await?;
    if begin.record_type != TYPE_BEGIN_REQUEST {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("expected BEGIN_REQUEST, got record type {}", begin.record_type),
        ));
    }
    let mut body = vec![0u8; begin.content_length as usize];
    stream.read_exact(&mut body).await?;
    skip_padding(stream, begin.padding_length).await?;
    let request_id = begin.request_id;

    let mut params = HashMap::new();
    loop {
        let header = RecordHeader::read(stream).await?;
        let mut content = vec![0u8; header.content_length as usize];
        stream.read_exact(&mut content).await?;
        skip_padding(stream, header.padding_length).await?;
        if header.record_type != TYPE_PARAMS {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("expected PARAMS, got record type {}", header.record_type),
            ));
        }
        if content.is_empty() {
            break;
        }
        params.extend(decode_name_value_pairs(&content));
    }

    let mut stdin = Vec::new();
    loop {
        let header = RecordHeader::read(stream).await?;
        let mut content = vec![0u8; header.content_length as usize];
        stream.read_exact(&mut content).await?;
        skip_padding(stream, header.padding_length).await?;
        if header.record_type != TYPE_STDIN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("expected STDIN, got record type {}", header.record_type),
            ));
        }
        if content.is_empty() {
            break;
        }
        stdin.extend_from_slice(&content);
    }

    Ok(ServerRequest { request_id, params, stdin })
}

async fn skip_padding<R: AsyncRead + Unpin>(stream: &mut R, padding_length: u8) -> std::io::Result<()> {
    if padding_length > 0 {
        let mut pad = vec![0u8; padding_length as usize];
        stream.read_exact(&mut pad).await?;
    }
    Ok(())
}

/// Server role: writes the response to a previously-read request — stdout,
/// optionally stderr, then `END_REQUEST` with `app_status`.
pub async fn write_response<W: AsyncWrite + Unpin>(
    stream: &mut W,
    request_id: u16,
    stdout: &[u8],
    stderr: &[u8],
    app_status: i32,
) -> std::io::Result<()> {
    if !stdout.is_empty() {
        write_record(stream, TYPE_STDOUT, request_id, stdout).await?;
    }
    write_record(stream, TYPE_STDOUT, request_id, &[]).await?;
    if !stderr.is_empty() {
        write_record(stream, TYPE_STDERR, request_id, stderr).await?;
        write_record(stream, TYPE_STDERR, request_id, &[]).await?;
    }

    let mut end_body = [0u8; 8];
    end_body[0..4].copy_from_slice(&app_status.to_be_bytes());
    end_body[4] = PROTOCOL_STATUS_REQUEST_COMPLETE;
    write_record(stream, TYPE_END_REQUEST, request_id, &end_body).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn name_value_roundtrip_short() {
        let pairs = vec![("SCRIPT_FILENAME".to_string(), "/tmp/bootstrap.php".to_string())];
        let encoded = encode_name_value_pairs(&pairs);
        let decoded = decode_name_value_pairs(&encoded);
        assert_eq!(decoded.get("SCRIPT_FILENAME").unwrap(), "/tmp/bootstrap.php");
    }

    #[test]
    fn name_value_roundtrip_long_value() {
        let long_value = "x".repeat(200);
        let pairs = vec![("PHP_WORLD_HELO".to_string(), long_value.clone())];
        let encoded = encode_name_value_pairs(&pairs);
        let decoded = decode_name_value_pairs(&encoded);
        assert_eq!(decoded.get("PHP_WORLD_HELO").unwrap(), &long_value);
    }

    #[tokio::test]
    async fn client_server_round_trip_over_a_pipe() {
        let params = vec![
            ("SCRIPT_FILENAME".to_string(), "/tmp/bootstrap.php".to_string()),
            ("PHP_WORLD_HELO".to_string(), "key endmark socket".to_string()),
        ];

        let mut wire = Vec::new();
        write_begin_request(&mut wire, 1, ROLE_RESPONDER).await.unwrap();
        write_record(&mut wire, TYPE_PARAMS, 1, &encode_name_value_pairs(&params)).await.unwrap();
        write_record(&mut wire, TYPE_PARAMS, 1, &[]).await.unwrap();
        write_record(&mut wire, TYPE_STDIN, 1, &[]).await.unwrap();

        let mut cursor = Cursor::new(wire);
        let request = read_request(&mut cursor).await.unwrap();
        assert_eq!(request.request_id, 1);
        assert_eq!(request.params.get("SCRIPT_FILENAME").unwrap(), "/tmp/bootstrap.php");
        assert!(request.stdin.is_empty());
    }

    #[tokio::test]
    async fn send_request_parses_stdout_and_end_request() {
        let mut server_side = Vec::new();
        write_record(&mut server_side, TYPE_STDOUT, 1, b"hello").await.unwrap();
        write_record(&mut server_side, TYPE_STDOUT, 1, &[]).await.unwrap();
        let mut end_body = [0u8; 8];
        end_body[0..4].copy_from_slice(&0i32.to_be_bytes());
        write_record(&mut server_side, TYPE_END_REQUEST, 1, &end_body).await.unwrap();

        let mut cursor = Cursor::new(server_side);
        let response = read_response(&mut cursor).await.unwrap();
        assert_eq!(response.stdout, b"hello");
        assert_eq!(response.app_status, 0);
        assert_eq!(response.protocol_status, PROTOCOL_STATUS_REQUEST_COMPLETE);
    }
}
