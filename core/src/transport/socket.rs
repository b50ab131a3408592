//! HTTP/1.0 over a plain `TcpStream`.
//!
//! One connection per request with `Connection: close`: the response ends
//! where the stream ends, so the whole reply is read to EOF and parsed
//! afterwards. Chunked bodies are de-chunked for servers that answer
//! HTTP/1.0 requests with HTTP/1.1 framing.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use tracing::trace;

use crate::error::{Error, Result};
use crate::http::{Headers, HttpMethod, HttpRequest, RawResponse};
use crate::transport::{Endpoint, Transport, TransportKind, TransportSettings};

/// Transport that speaks HTTP directly over TCP.
#[derive(Debug, Clone)]
pub struct SocketTransport {
    settings: TransportSettings,
}

impl SocketTransport {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }

    fn connect(&self) -> Result<TcpStream> {
        let endpoint = &self.settings.endpoint;
        let addrs = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| Error::transport(format!("cannot resolve {}: {e}", endpoint.host)))?;

        let mut last_err = None;
        for addr in addrs {
            let attempt = match self.settings.timeouts.open() {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    let rw = self.settings.timeouts.rw_duration();
                    stream.set_read_timeout(rw).map_err(io_error)?;
                    stream.set_write_timeout(rw).map_err(io_error)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(match last_err {
            Some(e) => Error::transport(format!(
                "could not connect to {}:{}: {e}",
                endpoint.host, endpoint.port
            )),
            None => Error::transport(format!("no addresses found for {}", endpoint.host)),
        })
    }
}

impl Transport for SocketTransport {
    fn issue(&self, request: &HttpRequest) -> Result<RawResponse> {
        if self.settings.endpoint.tls {
            return Err(Error::transport(
                "TLS is not available on the socket transport",
            ));
        }

        let mut stream = self.connect()?;
        let packet = encode_request(request, &self.settings.endpoint);
        stream.write_all(&packet).map_err(io_error)?;
        stream.flush().map_err(io_error)?;

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).map_err(io_error)?;
        trace!(bytes = buf.len(), "socket response received");

        parse_response(&buf, request.method)
    }

    fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut TransportSettings {
        &mut self.settings
    }

    fn kind(&self) -> Option<TransportKind> {
        Some(TransportKind::Socket)
    }
}

fn io_error(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            Error::transport(format!("timed out: {err}"))
        }
        _ => Error::transport(err.to_string()),
    }
}

/// Serialize a request into HTTP/1.0 wire format.
pub(crate) fn encode_request(request: &HttpRequest, endpoint: &Endpoint) -> Vec<u8> {
    let mut head = format!("{} {} HTTP/1.0\r\n", request.method, request.path);
    head.push_str(&format!("host: {}:{}\r\n", endpoint.host, endpoint.port));
    head.push_str("connection: close\r\n");

    for (name, value) in request.headers.iter() {
        if name == "host" || name == "connection" {
            continue;
        }
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    if let Some(line) = request.cookie_line() {
        head.push_str(&format!("cookie: {line}\r\n"));
    }
    if let Some(body) = &request.body {
        if !request.headers.contains("content-length") {
            head.push_str(&format!("content-length: {}\r\n", body.len()));
        }
    }
    head.push_str("\r\n");

    let mut packet = head.into_bytes();
    if let Some(body) = &request.body {
        packet.extend_from_slice(body);
    }
    packet
}

/// Parse a complete HTTP response read off the socket.
pub(crate) fn parse_response(buf: &[u8], method: HttpMethod) -> Result<RawResponse> {
    if buf.is_empty() {
        return Err(Error::transport("connection closed without a response"));
    }
    let header_end = find(buf, b"\r\n\r\n")
        .ok_or_else(|| Error::transport("malformed response: headers never terminated"))?;

    let head = String::from_utf8_lossy(&buf[..header_end]);
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| Error::transport(format!("malformed status line: {status_line:?}")))?;

    let mut headers = Headers::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.append(name.trim(), value.trim());
        }
    }

    let mut body = if method == HttpMethod::Head {
        Vec::new()
    } else {
        buf[header_end + 4..].to_vec()
    };

    let chunked = headers
        .get("transfer-encoding")
        .map(|te| te.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    if chunked && method != HttpMethod::Head {
        body = dechunk(&body)?;
        headers.remove("transfer-encoding");
    }

    Ok(RawResponse {
        status,
        headers,
        body,
        method,
    })
}

fn dechunk(mut data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    loop {
        let line_end = find(data, b"\r\n")
            .ok_or_else(|| Error::transport("unexpected end of packet"))?;
        let size_line = String::from_utf8_lossy(&data[..line_end]);
        let size_field = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| Error::transport(format!("malformed chunk size: {size_field:?}")))?;
        data = &data[line_end + 2..];

        if size == 0 {
            return Ok(out);
        }
        if data.len() < size {
            return Err(Error::transport("unexpected end of packet"));
        }
        out.extend_from_slice(&data[..size]);
        data = &data[size..];
        if data.starts_with(b"\r\n") {
            data = &data[2..];
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
