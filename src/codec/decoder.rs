//! Incremental HTTP/1.x response decoder.
//!
//! # Responsibilities
//! - Accumulate upstream bytes and parse one response at a time
//! - Frame bodies by `Content-Length`, chunked encoding, or connection close
//! - Pair responses with request methods so HEAD responses carry no body
//!
//! The decoder is bound to a single upstream connection and resets itself
//! after every complete message, so it can be reused for the whole lifetime
//! of a keep-alive connection.

use std::collections::VecDeque;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use bytes::{Buf, Bytes, BytesMut};

const MAX_HEADERS: usize = 64;
const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_CHUNK_LINE_BYTES: usize = 4096;

/// Malformed upstream response bytes.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed response head: {0}")]
    Head(#[from] httparse::Error),

    #[error("Response head exceeds 64 KiB")]
    HeadTooLarge,

    #[error("Invalid status code: {0}")]
    InvalidStatus(u16),

    #[error("Invalid header field")]
    InvalidHeader,

    #[error("Invalid Content-Length")]
    InvalidContentLength,

    #[error("Invalid chunk size line")]
    InvalidChunkSize,

    #[error("Missing CRLF after chunk data")]
    MissingChunkTerminator,
}

/// A fully decoded upstream response.
#[derive(Debug, Clone)]
pub struct DecodedResponse {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug)]
struct Head {
    version: Version,
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
}

#[derive(Debug)]
enum Framing {
    Length(u64),
    Chunked(ChunkPhase),
    CloseDelimited,
}

#[derive(Debug)]
enum ChunkPhase {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
}

#[derive(Debug)]
enum State {
    Head,
    Body {
        head: Head,
        framing: Framing,
        body: BytesMut,
    },
}

/// Stateful response parser for one upstream connection.
#[derive(Debug)]
pub struct ResponseDecoder {
    buf: BytesMut,
    state: State,
    methods: VecDeque<Method>,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            state: State::Head,
            methods: VecDeque::new(),
        }
    }

    /// Register the method of a request written to this connection.
    ///
    /// Responses are matched to methods in order; a response to `HEAD` never
    /// carries a body regardless of its framing headers.
    pub fn expect_response_to(&mut self, method: &Method) {
        self.methods.push_back(method.clone());
    }

    /// Feed `chunk` and try to produce the next complete response.
    ///
    /// Yields at most one message per call. Call again with an empty chunk
    /// while [`has_buffered_data`](Self::has_buffered_data) is true to drain
    /// responses that arrived back to back.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Option<DecodedResponse>, DecodeError> {
        self.buf.extend_from_slice(chunk);

        loop {
            match std::mem::replace(&mut self.state, State::Head) {
                State::Head => {
                    let Some(head) = self.parse_head()? else {
                        return Ok(None);
                    };
                    match self.framing_for(&head)? {
                        Some(framing) => {
                            self.state = State::Body {
                                head,
                                framing,
                                body: BytesMut::new(),
                            };
                        }
                        None => return Ok(Some(self.finish(head, Bytes::new()))),
                    }
                }
                State::Body {
                    head,
                    mut framing,
                    mut body,
                } => {
                    if self.read_body(&mut framing, &mut body)? {
                        return Ok(Some(self.finish(head, body.freeze())));
                    }
                    self.state = State::Body { head, framing, body };
                    return Ok(None);
                }
            }
        }
    }

    /// True when undecoded bytes other than stray line breaks remain.
    pub fn has_buffered_data(&self) -> bool {
        self.buf.iter().any(|b| *b != b'\r' && *b != b'\n')
    }

    /// True while reading a body that only ends when the peer closes.
    pub fn is_close_delimited(&self) -> bool {
        matches!(
            self.state,
            State::Body {
                framing: Framing::CloseDelimited,
                ..
            }
        )
    }

    /// Complete a close-delimited response with whatever body arrived.
    pub fn finish_close_delimited(&mut self) -> Option<DecodedResponse> {
        if !self.is_close_delimited() {
            return None;
        }
        match std::mem::replace(&mut self.state, State::Head) {
            State::Body { head, body, .. } => Some(self.finish(head, body.freeze())),
            State::Head => None,
        }
    }

    fn parse_head(&mut self) -> Result<Option<Head>, DecodeError> {
        loop {
            let leading = self
                .buf
                .iter()
                .take_while(|b| **b == b'\r' || **b == b'\n')
                .count();
            self.buf.advance(leading);
            if self.buf.is_empty() {
                return Ok(None);
            }

            let parsed = match read_head(&self.buf, &mut [httparse::EMPTY_HEADER; MAX_HEADERS]) {
                Err(DecodeError::Head(httparse::Error::TooManyHeaders)) => {
                    let mut storage = vec![httparse::EMPTY_HEADER; header_line_count(&self.buf)];
                    read_head(&self.buf, &mut storage)?
                }
                other => other?,
            };
            let Some((len, head)) = parsed else {
                if self.buf.len() > MAX_HEAD_BYTES {
                    return Err(DecodeError::HeadTooLarge);
                }
                return Ok(None);
            };
            self.buf.advance(len);

            // Interim responses precede the real one.
            if head.status.is_informational() && head.status != StatusCode::SWITCHING_PROTOCOLS {
                continue;
            }

            return Ok(Some(head));
        }
    }

    fn framing_for(&self, head: &Head) -> Result<Option<Framing>, DecodeError> {
        let bodiless_method = self.methods.front() == Some(&Method::HEAD);
        if bodiless_method
            || head.status.is_informational()
            || head.status == StatusCode::NO_CONTENT
            || head.status == StatusCode::NOT_MODIFIED
        {
            return Ok(None);
        }

        if let Some(last) = head.headers.get_all(header::TRANSFER_ENCODING).iter().last() {
            let chunked = last
                .to_str()
                .ok()
                .and_then(|v| v.rsplit(',').next())
                .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
            return Ok(Some(if chunked {
                Framing::Chunked(ChunkPhase::Size)
            } else {
                Framing::CloseDelimited
            }));
        }

        match content_length(&head.headers)? {
            Some(0) => Ok(None),
            Some(len) => Ok(Some(Framing::Length(len))),
            None => Ok(Some(Framing::CloseDelimited)),
        }
    }

    /// Move buffered bytes into `body`; returns true once the body is complete.
    fn read_body(&mut self, framing: &mut Framing, body: &mut BytesMut) -> Result<bool, DecodeError> {
        match framing {
            Framing::Length(remaining) => {
                let take = (*remaining).min(self.buf.len() as u64) as usize;
                body.extend_from_slice(&self.buf[..take]);
                self.buf.advance(take);
                *remaining -= take as u64;
                Ok(*remaining == 0)
            }
            Framing::CloseDelimited => {
                body.extend_from_slice(&self.buf);
                self.buf.clear();
                Ok(false)
            }
            Framing::Chunked(phase) => loop {
                match phase {
                    ChunkPhase::Size => {
                        let Some(line) = self.take_line()? else {
                            return Ok(false);
                        };
                        let size = parse_chunk_size(&line)?;
                        *phase = if size == 0 {
                            ChunkPhase::Trailers
                        } else {
                            ChunkPhase::Data(size)
                        };
                    }
                    ChunkPhase::Data(remaining) => {
                        if self.buf.is_empty() {
                            return Ok(false);
                        }
                        let take = (*remaining).min(self.buf.len() as u64) as usize;
                        body.extend_from_slice(&self.buf[..take]);
                        self.buf.advance(take);
                        *remaining -= take as u64;
                        if *remaining == 0 {
                            *phase = ChunkPhase::DataEnd;
                        }
                    }
                    ChunkPhase::DataEnd => {
                        if self.buf.len() < 2 {
                            return Ok(false);
                        }
                        if &self.buf[..2] != b"\r\n" {
                            return Err(DecodeError::MissingChunkTerminator);
                        }
                        self.buf.advance(2);
                        *phase = ChunkPhase::Size;
                    }
                    ChunkPhase::Trailers => {
                        let Some(line) = self.take_line()? else {
                            return Ok(false);
                        };
                        if line.is_empty() {
                            return Ok(true);
                        }
                    }
                }
            },
        }
    }

    /// Split off one line without its terminator, tolerating bare LF.
    fn take_line(&mut self) -> Result<Option<BytesMut>, DecodeError> {
        let Some(pos) = self.buf.iter().position(|b| *b == b'\n') else {
            if self.buf.len() > MAX_CHUNK_LINE_BYTES {
                return Err(DecodeError::InvalidChunkSize);
            }
            return Ok(None);
        };
        let mut line = self.buf.split_to(pos);
        self.buf.advance(1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Ok(Some(line))
    }

    fn finish(&mut self, head: Head, body: Bytes) -> DecodedResponse {
        self.methods.pop_front();
        DecodedResponse {
            version: head.version,
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            body,
        }
    }
}

/// Parse a complete head out of `buf` into `storage`.
fn read_head<'b>(
    buf: &'b [u8],
    storage: &mut [httparse::Header<'b>],
) -> Result<Option<(usize, Head)>, DecodeError> {
    let mut parsed = httparse::Response::new(storage);
    let len = match parsed.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };

    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };
    let code = parsed.code.unwrap_or_default();
    let status = StatusCode::from_u16(code).map_err(|_| DecodeError::InvalidStatus(code))?;
    let reason = parsed.reason.unwrap_or_default().to_string();

    let mut headers = HeaderMap::with_capacity(parsed.headers.len());
    for field in parsed.headers.iter() {
        let name =
            HeaderName::from_bytes(field.name.as_bytes()).map_err(|_| DecodeError::InvalidHeader)?;
        let value = HeaderValue::from_bytes(field.value).map_err(|_| DecodeError::InvalidHeader)?;
        headers.append(name, value);
    }

    Ok(Some((
        len,
        Head {
            version,
            status,
            reason,
            headers,
        },
    )))
}

/// Upper bound on the header fields in the buffered head, bounded by the
/// head size limit.
fn header_line_count(buf: &[u8]) -> usize {
    let window = &buf[..buf.len().min(MAX_HEAD_BYTES)];
    let head = match window.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(end) => &window[..end + 2],
        None => window,
    };
    head.iter().filter(|b| **b == b'\n').count() + 1
}

fn content_length(headers: &HeaderMap) -> Result<Option<u64>, DecodeError> {
    let mut length = None;
    for value in headers.get_all(header::CONTENT_LENGTH) {
        let value = value.to_str().map_err(|_| DecodeError::InvalidContentLength)?;
        for part in value.split(',') {
            let parsed: u64 = part
                .trim()
                .parse()
                .map_err(|_| DecodeError::InvalidContentLength)?;
            match length {
                Some(existing) if existing != parsed => {
                    return Err(DecodeError::InvalidContentLength)
                }
                _ => length = Some(parsed),
            }
        }
    }
    Ok(length)
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, DecodeError> {
    let line = std::str::from_utf8(line).map_err(|_| DecodeError::InvalidChunkSize)?;
    let size = line.split(';').next().unwrap_or_default().trim();
    if size.is_empty() {
        return Err(DecodeError::InvalidChunkSize);
    }
    u64::from_str_radix(size, 16).map_err(|_| DecodeError::InvalidChunkSize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder_for(methods: &[Method]) -> ResponseDecoder {
        let mut decoder = ResponseDecoder::new();
        for method in methods {
            decoder.expect_response_to(method);
        }
        decoder
    }

    #[test]
    fn decodes_content_length_response() {
        let mut decoder = decoder_for(&[Method::GET]);
        let res = decoder
            .decode(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Test: yes\r\n\r\nhello")
            .unwrap()
            .unwrap();

        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.reason, "OK");
        assert_eq!(res.version, Version::HTTP_11);
        assert_eq!(res.headers["x-test"], "yes");
        assert_eq!(&res.body[..], b"hello");
        assert!(!decoder.has_buffered_data());
    }

    #[test]
    fn decodes_byte_by_byte() {
        let raw = b"HTTP/1.0 404 Not Found\r\nContent-Length: 3\r\n\r\nnope";
        let mut decoder = decoder_for(&[Method::GET]);

        let mut result = None;
        for byte in raw.iter().take(raw.len() - 1) {
            if let Some(res) = decoder.decode(std::slice::from_ref(byte)).unwrap() {
                result = Some(res);
            }
        }

        let res = result.expect("response should complete");
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.version, Version::HTTP_10);
        assert_eq!(&res.body[..], b"nop");
        assert!(!decoder.has_buffered_data());
    }

    #[test]
    fn decodes_chunked_with_extensions_and_trailers() {
        let mut decoder = decoder_for(&[Method::GET]);
        let first = decoder
            .decode(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4;ext=1\r\nWiki\r\n")
            .unwrap();
        assert!(first.is_none());

        let res = decoder
            .decode(b"5\r\npedia\r\n0\r\nX-Trailer: t\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(&res.body[..], b"Wikipedia");
        assert!(!decoder.has_buffered_data());
    }

    #[test]
    fn close_delimited_body_completes_on_finish() {
        let mut decoder = decoder_for(&[Method::GET]);
        assert!(decoder
            .decode(b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\npartial ")
            .unwrap()
            .is_none());
        assert!(decoder.decode(b"body").unwrap().is_none());
        assert!(decoder.is_close_delimited());

        let res = decoder.finish_close_delimited().unwrap();
        assert_eq!(&res.body[..], b"partial body");
        assert!(!decoder.is_close_delimited());
    }

    #[test]
    fn finish_close_delimited_ignores_framed_bodies() {
        let mut decoder = decoder_for(&[Method::GET]);
        decoder
            .decode(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc")
            .unwrap();
        assert!(!decoder.is_close_delimited());
        assert!(decoder.finish_close_delimited().is_none());
    }

    #[test]
    fn head_response_has_no_body() {
        let mut decoder = decoder_for(&[Method::HEAD, Method::GET]);
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 42\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

        let head = decoder.decode(raw).unwrap().unwrap();
        assert!(head.body.is_empty());
        assert!(decoder.has_buffered_data());

        let get = decoder.decode(b"").unwrap().unwrap();
        assert_eq!(&get.body[..], b"ok");
    }

    #[test]
    fn pipelined_responses_drain_from_buffer() {
        let mut decoder = decoder_for(&[Method::GET, Method::GET]);
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\na\r\nHTTP/1.1 201 Created\r\nContent-Length: 1\r\n\r\nb";

        let first = decoder.decode(raw).unwrap().unwrap();
        assert_eq!(&first.body[..], b"a");
        assert!(decoder.has_buffered_data());

        let second = decoder.decode(b"").unwrap().unwrap();
        assert_eq!(second.status, StatusCode::CREATED);
        assert!(!decoder.has_buffered_data());
    }

    #[test]
    fn interim_continue_is_skipped() {
        let mut decoder = decoder_for(&[Method::POST]);
        let res = decoder
            .decode(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(res.status, StatusCode::NO_CONTENT);
        assert!(res.body.is_empty());
    }

    #[test]
    fn malformed_input_is_an_error() {
        let mut decoder = decoder_for(&[Method::GET]);
        assert!(decoder.decode(b"NOT HTTP AT ALL\r\n\r\n").is_err());

        let mut decoder = decoder_for(&[Method::GET]);
        let err = decoder
            .decode(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidContentLength));

        let mut decoder = decoder_for(&[Method::GET]);
        let err = decoder
            .decode(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n")
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidChunkSize));
    }

    #[test]
    fn missing_chunk_terminator_is_an_error() {
        let mut decoder = decoder_for(&[Method::GET]);
        let err = decoder
            .decode(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nabXX")
            .unwrap_err();
        assert!(matches!(err, DecodeError::MissingChunkTerminator));
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut decoder = decoder_for(&[Method::GET]);
        let mut raw = b"HTTP/1.1 200 OK\r\nX-Big: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_HEAD_BYTES + 1));
        assert!(matches!(decoder.decode(&raw), Err(DecodeError::HeadTooLarge)));
    }

    #[test]
    fn header_count_is_not_capped() {
        let mut decoder = decoder_for(&[Method::GET]);
        let mut head = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n".to_vec();
        for n in 0..(MAX_HEADERS * 2) {
            head.extend_from_slice(format!("X-Field-{n}: {n}\r\n").as_bytes());
        }

        // Split mid-head so the grown parse first sees a partial message.
        let (start, rest) = head.split_at(head.len() / 2 + 7);
        assert!(decoder.decode(start).unwrap().is_none());
        assert!(decoder.decode(rest).unwrap().is_none());

        let res = decoder.decode(b"\r\nabc").unwrap().unwrap();
        assert_eq!(res.headers.len(), MAX_HEADERS * 2 + 1);
        assert_eq!(res.headers["x-field-127"], "127");
        assert_eq!(&res.body[..], b"abc");
    }
}
