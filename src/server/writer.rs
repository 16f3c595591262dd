//! Response serialization onto the connection.
//!
//! Headers go first, with Content-Length for materialized bodies and chunked
//! transfer for producers. Writes are plain blocking coroutine writes, so
//! outbound backpressure is the transport's own: a full send queue parks the
//! connection coroutine until the peer drains it.

use crate::http::{status_reason, BridgeResponse, HttpVersion, ResponseBody};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Write};

/// Bodies below this size are not worth a gzip pass.
const MIN_GZIP_BODY: usize = 1024;

/// Per-response write settings decided by the bridge.
#[derive(Debug, Clone, Copy)]
pub struct WriteParams {
    pub version: HttpVersion,
    /// HEAD request: send headers (including Content-Length) but no body.
    pub head_only: bool,
    pub keep_alive: bool,
    /// Compress materialized bodies when the client accepts gzip.
    pub compress: bool,
}

/// Write one response; returns whether the connection stays usable for
/// keep-alive.
pub fn write_response<W: Write>(
    out: &mut W,
    params: &WriteParams,
    response: BridgeResponse,
) -> io::Result<bool> {
    let BridgeResponse {
        status,
        mut headers,
        mut body,
    } = response;

    if params.compress && !headers.contains("Content-Encoding") {
        if let ResponseBody::Bytes(bytes) = &body {
            if bytes.len() >= MIN_GZIP_BODY {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(bytes)?;
                body = ResponseBody::Bytes(encoder.finish()?);
                headers.set("Content-Encoding", "gzip");
                headers.append("Vary", "Accept-Encoding");
            }
        }
    }

    let chunked_capable = params.version == HttpVersion::Http11;
    let streaming = matches!(body, ResponseBody::Chunks(_));
    // HTTP/1.0 cannot frame a producer body; fall back to close-delimited.
    let keep_alive = params.keep_alive && !(streaming && !chunked_capable);

    // The framing headers are owned by the writer; anything the engine set
    // is superseded by what is actually put on the wire.
    headers.remove("Content-Length");
    headers.remove("Transfer-Encoding");
    headers.remove("Connection");
    match &body {
        ResponseBody::Empty => headers.set("Content-Length", "0"),
        ResponseBody::Bytes(bytes) => headers.set("Content-Length", bytes.len().to_string()),
        ResponseBody::Chunks(_) if chunked_capable => {
            headers.set("Transfer-Encoding", "chunked");
        }
        ResponseBody::Chunks(_) => {}
    }
    if !headers.contains("Date") {
        headers.set(
            "Date",
            chrono::Utc::now()
                .format("%a, %d %b %Y %H:%M:%S GMT")
                .to_string(),
        );
    }
    if keep_alive {
        if params.version == HttpVersion::Http10 {
            headers.set("Connection", "keep-alive");
        }
    } else {
        headers.set("Connection", "close");
    }

    let mut head = String::with_capacity(256);
    head.push_str(params.version.as_str());
    head.push(' ');
    head.push_str(&status.to_string());
    head.push(' ');
    head.push_str(status_reason(status));
    head.push_str("\r\n");
    for (name, value) in headers.iter() {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    out.write_all(head.as_bytes())?;

    if !params.head_only {
        match body {
            ResponseBody::Empty => {}
            ResponseBody::Bytes(bytes) => out.write_all(&bytes)?,
            ResponseBody::Chunks(chunks) => {
                if chunked_capable {
                    for chunk in chunks {
                        if chunk.is_empty() {
                            continue;
                        }
                        out.write_all(format!("{:X}\r\n", chunk.len()).as_bytes())?;
                        out.write_all(&chunk)?;
                        out.write_all(b"\r\n")?;
                    }
                    out.write_all(b"0\r\n\r\n")?;
                } else {
                    for chunk in chunks {
                        out.write_all(&chunk)?;
                    }
                }
            }
        }
    }
    out.flush()?;
    Ok(keep_alive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn params() -> WriteParams {
        WriteParams {
            version: HttpVersion::Http11,
            head_only: false,
            keep_alive: true,
            compress: false,
        }
    }

    fn write_to_string(params: &WriteParams, response: BridgeResponse) -> (Vec<u8>, bool) {
        let mut out = Vec::new();
        let keep = write_response(&mut out, params, response).unwrap();
        (out, keep)
    }

    #[test]
    fn test_materialized_body_gets_content_length() {
        let resp = BridgeResponse::with_bytes(200, "text/plain", b"hello".to_vec());
        let (out, keep) = write_to_string(&params(), resp);
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
        assert!(keep);
    }

    #[test]
    fn test_producer_body_is_chunked() {
        let resp = BridgeResponse::chunked(
            200,
            "text/plain",
            vec![b"ab".to_vec(), b"cde".to_vec()].into_iter(),
        );
        let (out, _) = write_to_string(&params(), resp);
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(text.ends_with("2\r\nab\r\n3\r\ncde\r\n0\r\n\r\n"));
    }

    #[test]
    fn test_producer_body_on_http10_closes_the_connection() {
        let resp =
            BridgeResponse::chunked(200, "text/plain", std::iter::once(b"abc".to_vec()));
        let p = WriteParams {
            version: HttpVersion::Http10,
            ..params()
        };
        let (out, keep) = write_to_string(&p, resp);
        let text = String::from_utf8_lossy(&out);
        assert!(!keep);
        assert!(!text.contains("Transfer-Encoding"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\nabc"));
    }

    #[test]
    fn test_head_only_skips_the_body() {
        let resp = BridgeResponse::with_bytes(200, "text/plain", b"hello".to_vec());
        let p = WriteParams {
            head_only: true,
            ..params()
        };
        let (out, _) = write_to_string(&p, resp);
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_gzip_round_trip() {
        let body = vec![b'a'; 4096];
        let resp = BridgeResponse::with_bytes(200, "text/plain", body.clone());
        let p = WriteParams {
            compress: true,
            ..params()
        };
        let (out, _) = write_to_string(&p, resp);
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("Content-Encoding: gzip\r\n"));
        let split = out
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|i| i + 4)
            .unwrap();
        let mut decoded = Vec::new();
        GzDecoder::new(&out[split..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_small_bodies_are_not_compressed() {
        let resp = BridgeResponse::with_bytes(200, "text/plain", b"tiny".to_vec());
        let p = WriteParams {
            compress: true,
            ..params()
        };
        let (out, _) = write_to_string(&p, resp);
        assert!(!String::from_utf8_lossy(&out).contains("Content-Encoding"));
    }

    #[test]
    fn test_engine_framing_headers_are_superseded() {
        let mut resp = BridgeResponse::with_bytes(200, "text/plain", b"real".to_vec());
        resp.headers.set("Content-Length", "9999");
        resp.headers.set("Connection", "upgrade");
        let (out, _) = write_to_string(&params(), resp);
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(!text.contains("9999"));
        assert!(!text.contains("upgrade"));
    }
}
