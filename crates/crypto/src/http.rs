//! Minimal HTTP/1.1 message model for the workload API.
//!
//! Requests are serialized by hand so they can be written onto a Unix
//! stream socket; responses are parsed incrementally from whatever fragments
//! the socket yields. Supported body framings are `Content-Length`,
//! `Transfer-Encoding: chunked` and read-until-EOF.

use crate::error::TransportError;

/// Upper bound for the status line plus headers.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// An outgoing HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method (`GET`, `POST`, ...)
    pub method: String,
    /// Origin-form target, e.g. `/modules/m/sign?api-version=2019-01-30`
    pub path_and_query: String,
    /// Headers other than `Host` and `Content-Length`
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// A `POST` with a JSON body.
    pub fn post_json(path_and_query: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: "POST".to_string(),
            path_and_query: path_and_query.into(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body,
        }
    }

    /// Serialize as an HTTP/1.1 request for `host`.
    pub fn to_bytes(&self, host: &str) -> Vec<u8> {
        let mut head = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", self.method, self.path_and_query, host);
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// A received HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Reason phrase
    pub reason: String,
    /// Headers in arrival order
    pub headers: Vec<(String, String)>,
    /// Decoded body (chunk framing removed)
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// First header named `name`, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as lossy UTF-8, for error messages.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[derive(Debug)]
enum ChunkState {
    Size,
    Data(usize),
    DataEnd,
    Trailer,
}

#[derive(Debug)]
enum Framing {
    Length(usize),
    Chunked(ChunkState),
    UntilEof,
}

#[derive(Debug)]
enum ParseState {
    Head,
    Body(Framing),
    Done,
}

/// Incremental HTTP/1.1 response parser.
///
/// Feed it bytes as they arrive; [`ResponseParser::feed`] yields the
/// response once it is complete. When the peer closes the stream, call
/// [`ResponseParser::finish`] to complete an EOF-delimited body or to learn
/// that the response was truncated.
#[derive(Debug)]
pub struct ResponseParser {
    buf: Vec<u8>,
    state: ParseState,
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    /// Create a parser waiting for the status line.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            state: ParseState::Head,
            status: 0,
            reason: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Consume a fragment. Returns the response once it is complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Option<HttpResponse>, TransportError> {
        self.buf.extend_from_slice(bytes);
        self.advance()?;

        if matches!(self.state, ParseState::Done) {
            return Ok(Some(self.take_response()));
        }
        Ok(None)
    }

    /// Signal end of stream.
    pub fn finish(mut self) -> Result<HttpResponse, TransportError> {
        match &self.state {
            ParseState::Done => Ok(self.take_response()),
            ParseState::Body(Framing::UntilEof) => {
                let rest = std::mem::take(&mut self.buf);
                self.body.extend_from_slice(&rest);
                Ok(self.take_response())
            }
            ParseState::Head => Err(TransportError::MalformedResponse(
                "connection closed before the response head was complete".to_string(),
            )),
            ParseState::Body(Framing::Length(expected)) => {
                Err(TransportError::MalformedResponse(format!(
                    "connection closed after {} of {} body bytes",
                    self.body.len() + self.buf.len(),
                    expected
                )))
            }
            ParseState::Body(Framing::Chunked(_)) => Err(TransportError::MalformedResponse(
                "connection closed inside a chunked body".to_string(),
            )),
        }
    }

    fn take_response(&mut self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            reason: std::mem::take(&mut self.reason),
            headers: std::mem::take(&mut self.headers),
            body: std::mem::take(&mut self.body),
        }
    }

    fn advance(&mut self) -> Result<(), TransportError> {
        loop {
            match &mut self.state {
                ParseState::Head => {
                    let Some(end) = find(&self.buf, b"\r\n\r\n") else {
                        if self.buf.len() > MAX_HEAD_SIZE {
                            return Err(TransportError::MalformedResponse(
                                "response head too large".to_string(),
                            ));
                        }
                        return Ok(());
                    };
                    let head: Vec<u8> = self.buf.drain(..end + 4).collect();
                    self.parse_head(&head[..end])?;
                    let framing = self.framing()?;
                    self.state = ParseState::Body(framing);
                }
                ParseState::Body(Framing::Length(remaining)) => {
                    let take = (*remaining).min(self.buf.len());
                    self.body.extend(self.buf.drain(..take));
                    *remaining -= take;
                    if *remaining > 0 {
                        return Ok(());
                    }
                    self.state = ParseState::Done;
                }
                ParseState::Body(Framing::UntilEof) => {
                    self.body.append(&mut self.buf);
                    return Ok(());
                }
                ParseState::Body(Framing::Chunked(chunk)) => {
                    match chunk {
                        ChunkState::Size => {
                            let Some(line) = take_line(&mut self.buf) else {
                                return Ok(());
                            };
                            let size = parse_chunk_size(&line)?;
                            *chunk = if size == 0 {
                                ChunkState::Trailer
                            } else {
                                ChunkState::Data(size)
                            };
                        }
                        ChunkState::Data(remaining) => {
                            if self.buf.is_empty() {
                                return Ok(());
                            }
                            let take = (*remaining).min(self.buf.len());
                            self.body.extend(self.buf.drain(..take));
                            *remaining -= take;
                            if *remaining == 0 {
                                *chunk = ChunkState::DataEnd;
                            }
                        }
                        ChunkState::DataEnd => {
                            if self.buf.len() < 2 {
                                return Ok(());
                            }
                            if &self.buf[..2] != b"\r\n" {
                                return Err(TransportError::MalformedResponse(
                                    "missing CRLF after chunk data".to_string(),
                                ));
                            }
                            self.buf.drain(..2);
                            *chunk = ChunkState::Size;
                        }
                        ChunkState::Trailer => {
                            let Some(line) = take_line(&mut self.buf) else {
                                return Ok(());
                            };
                            if line.is_empty() {
                                self.state = ParseState::Done;
                            }
                        }
                    }
                }
                ParseState::Done => return Ok(()),
            }
        }
    }

    fn parse_head(&mut self, head: &[u8]) -> Result<(), TransportError> {
        let text = std::str::from_utf8(head).map_err(|_| {
            TransportError::MalformedResponse("response head is not valid UTF-8".to_string())
        })?;
        let mut lines = text.split("\r\n");

        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.") {
            return Err(TransportError::MalformedResponse(format!(
                "unexpected status line: {}",
                status_line
            )));
        }
        self.status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .filter(|code| (100..1000).contains(code))
            .ok_or_else(|| {
                TransportError::MalformedResponse(format!("invalid status code in: {}", status_line))
            })?;
        self.reason = parts.next().unwrap_or_default().to_string();

        for line in lines {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                TransportError::MalformedResponse(format!("invalid header line: {}", line))
            })?;
            self.headers
                .push((name.trim().to_string(), value.trim().to_string()));
        }
        Ok(())
    }

    fn framing(&self) -> Result<Framing, TransportError> {
        let chunked = find_header(&self.headers, "transfer-encoding")
            .map(|te| te.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false);
        if chunked {
            return Ok(Framing::Chunked(ChunkState::Size));
        }

        if let Some(length) = find_header(&self.headers, "content-length") {
            let length = length.parse::<usize>().map_err(|_| {
                TransportError::MalformedResponse(format!("invalid Content-Length: {}", length))
            })?;
            return Ok(Framing::Length(length));
        }

        if self.status == 204 || self.status == 304 || (100..200).contains(&self.status) {
            return Ok(Framing::Length(0));
        }
        Ok(Framing::UntilEof)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn take_line(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = find(buf, b"\r\n")?;
    let mut line: Vec<u8> = buf.drain(..end + 2).collect();
    line.truncate(end);
    Some(line)
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, TransportError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| TransportError::MalformedResponse("invalid chunk size line".to_string()))?;
    let size = text.split(';').next().unwrap_or_default().trim();
    usize::from_str_radix(size, 16)
        .map_err(|_| TransportError::MalformedResponse(format!("invalid chunk size: {}", size)))
}
