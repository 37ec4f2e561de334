//! Encoding of `http` requests and responses as a single datagram payload. A message is always
//!  complete when it arrives, so the body is everything after the head, cut to `Content-Length`
//!  if there is one.

use anyhow::{anyhow, bail};
use bytes::{BufMut, Bytes, BytesMut};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use hyper::{Method, Request, Response, StatusCode, Version};

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// an `HTTP/1.1` request for `/` without headers
pub fn request(method: Method, body: impl Into<Bytes>) -> Request<Bytes> {
    let mut request = Request::new(body.into());
    *request.method_mut() = method;
    request
}

/// an `HTTP/1.0` response without headers
pub fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Bytes> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    *response.version_mut() = Version::HTTP_10;
    response
}

/// Returns the length of the head (start line and header lines) including the blank line that
///  terminates it, or `None` if the buffer does not contain a complete head yet.
fn head_len(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
        .map(|pos| pos + HEAD_TERMINATOR.len())
}

struct MessageHead {
    start_line: String,
    headers: HeaderMap,
}

impl MessageHead {
    /// `head` is everything up to and including the terminating blank line
    fn parse(head: &[u8]) -> anyhow::Result<MessageHead> {
        let head = std::str::from_utf8(head)?;
        let mut lines = head.split("\r\n").filter(|l| !l.is_empty());

        let start_line = lines.next()
            .ok_or_else(|| anyhow!("empty message head"))?
            .to_string();

        let mut headers = HeaderMap::new();
        for line in lines {
            let (name, value) = line.split_once(':')
                .ok_or_else(|| anyhow!("malformed header line {:?}", line))?;
            headers.append(HeaderName::from_bytes(name.trim().as_bytes())?, HeaderValue::from_str(value.trim())?);
        }

        Ok(MessageHead { start_line, headers })
    }

    fn content_length(&self) -> anyhow::Result<Option<usize>> {
        match self.headers.get(CONTENT_LENGTH) {
            None => Ok(None),
            Some(value) => match value.to_str()?.parse() {
                Ok(len) => Ok(Some(len)),
                Err(_) => bail!("invalid Content-Length {:?}", value),
            }
        }
    }
}

/// Splits a complete message into head and body. The body is bounded by `Content-Length` if
///  present, and runs to the end of the buffer otherwise.
fn split_message(buf: &[u8]) -> anyhow::Result<(MessageHead, Bytes)> {
    let head_len = head_len(buf)
        .ok_or_else(|| anyhow!("message head is not terminated by a blank line"))?;
    let head = MessageHead::parse(&buf[..head_len])?;

    let rest = &buf[head_len..];
    let body = match head.content_length()? {
        None => rest,
        Some(len) if len <= rest.len() => &rest[..len],
        Some(len) => bail!("body has {} bytes, Content-Length announces {}", rest.len(), len),
    };
    Ok((head, Bytes::copy_from_slice(body)))
}

fn parse_version(s: &str) -> anyhow::Result<Version> {
    match s {
        "HTTP/1.0" => Ok(Version::HTTP_10),
        "HTTP/1.1" => Ok(Version::HTTP_11),
        _ => bail!("unsupported HTTP version {:?}", s),
    }
}

/// `Content-Length` is always derived from the body
fn ser_headers(headers: &HeaderMap, body: &[u8], with_length: bool, buf: &mut BytesMut) {
    for (name, value) in headers {
        if *name == CONTENT_LENGTH {
            continue;
        }
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    if with_length {
        buf.put_slice(format!("{}: {}\r\n", CONTENT_LENGTH, body.len()).as_bytes());
    }
    buf.put_slice(b"\r\n");
    buf.put_slice(body);
}

pub fn request_to_bytes(request: &Request<Bytes>) -> Bytes {
    let mut buf = BytesMut::new();
    let target = request.uri().path_and_query()
        .map_or("/", |p| p.as_str());
    buf.put_slice(format!("{} {} {:?}\r\n", request.method(), target, request.version()).as_bytes());

    let with_length = !request.body().is_empty() || *request.method() == Method::POST;
    ser_headers(request.headers(), request.body(), with_length, &mut buf);
    buf.freeze()
}

/// The request target must be an absolute path. A request line without a version is taken as
///  `HTTP/1.0`.
pub fn parse_request(buf: &[u8]) -> anyhow::Result<Request<Bytes>> {
    let (head, body) = split_message(buf)?;

    let mut parts = head.start_line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next()) {
        (Some(method), Some(target)) => (method, target),
        _ => bail!("malformed request line {:?}", head.start_line),
    };
    if !target.starts_with('/') {
        bail!("request target {:?} is not an absolute path", target);
    }
    let version = match parts.next() {
        Some(version) => parse_version(version)?,
        None => Version::HTTP_10,
    };

    let mut request = Request::builder()
        .method(Method::from_bytes(method.as_bytes())?)
        .uri(target)
        .version(version)
        .body(body)?;
    *request.headers_mut() = head.headers;
    Ok(request)
}

pub fn response_to_bytes(response: &Response<Bytes>) -> Bytes {
    let mut buf = BytesMut::new();
    let status = response.status();
    buf.put_slice(format!(
        "{:?} {} {}\r\n",
        response.version(),
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown"),
    ).as_bytes());

    ser_headers(response.headers(), response.body(), true, &mut buf);
    buf.freeze()
}

pub fn parse_response(buf: &[u8]) -> anyhow::Result<Response<Bytes>> {
    let (head, body) = split_message(buf)?;

    let mut parts = head.start_line.splitn(3, ' ');
    let (version, status) = match (parts.next(), parts.next()) {
        (Some(version), Some(status)) => (parse_version(version)?, status),
        _ => bail!("malformed status line {:?}", head.start_line),
    };

    let mut response = Response::builder()
        .status(StatusCode::from_bytes(status.as_bytes())?)
        .version(version)
        .body(body)?;
    *response.headers_mut() = head.headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HOST, LOCATION};
    use rstest::rstest;

    #[test]
    fn test_request_ser() {
        let mut request = request(Method::POST, Bytes::from_static(b"hello"));
        *request.uri_mut() = "/new.txt".parse().unwrap();
        request.headers_mut().insert(HOST, HeaderValue::from_static("localhost:8080"));
        request.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from_static("999"));

        assert_eq!(
            request_to_bytes(&request).as_ref(),
            b"POST /new.txt HTTP/1.1\r\nhost: localhost:8080\r\ncontent-length: 5\r\n\r\nhello"
        );

        let parsed = parse_request(&request_to_bytes(&request)).unwrap();
        assert_eq!(parsed.headers().get(HOST).unwrap(), "localhost:8080");
        assert_eq!(parsed.headers().get(CONTENT_LENGTH).unwrap(), "5");
        assert_eq!(parsed.body(), request.body());
    }

    #[test]
    fn test_get_without_body_has_no_content_length() {
        let request = request(Method::GET, Bytes::new());
        assert_eq!(request_to_bytes(&request).as_ref(), b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn test_response_ser() {
        let response = response(StatusCode::NOT_FOUND, "File does not exist.");
        assert_eq!(
            response_to_bytes(&response).as_ref(),
            b"HTTP/1.0 404 Not Found\r\ncontent-length: 20\r\n\r\nFile does not exist."
        );
    }

    #[test]
    fn test_response_ser_unknown_status() {
        let response = response(StatusCode::from_u16(599).unwrap(), "");
        assert!(response_to_bytes(&response).starts_with(b"HTTP/1.0 599 Unknown\r\n"));
    }

    #[rstest]
    #[case::get(b"GET /a.txt HTTP/1.1\r\nHost: x\r\n\r\n", Method::GET, "/a.txt", Version::HTTP_11, b"")]
    #[case::post(b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc", Method::POST, "/a", Version::HTTP_11, b"abc")]
    #[case::trailing_crlf_after_body(b"POST /a HTTP/1.1\r\ncontent-length: 3\r\n\r\nabc\r\n\r\n", Method::POST, "/a", Version::HTTP_11, b"abc")]
    #[case::body_without_length(b"POST /a HTTP/1.0\r\n\r\nxyz", Method::POST, "/a", Version::HTTP_10, b"xyz")]
    #[case::other_method(b"DELETE /a HTTP/1.1\r\n\r\n", Method::DELETE, "/a", Version::HTTP_11, b"")]
    #[case::no_version(b"GET /\r\n\r\n", Method::GET, "/", Version::HTTP_10, b"")]
    fn test_request_parse(#[case] raw: &[u8], #[case] method: Method, #[case] path: &str, #[case] version: Version, #[case] body: &[u8]) {
        let request = parse_request(raw).unwrap();
        assert_eq!(request.method(), &method);
        assert_eq!(request.uri().path(), path);
        assert_eq!(request.version(), version);
        assert_eq!(request.body().as_ref(), body);
    }

    #[rstest]
    #[case::no_blank_line(b"GET / HTTP/1.1\r\n")]
    #[case::empty(b"")]
    #[case::missing_path(b"GET\r\n\r\n")]
    #[case::relative_path(b"GET a.txt HTTP/1.1\r\n\r\n")]
    #[case::unknown_version(b"GET / HTTP/9.9\r\n\r\n")]
    #[case::malformed_header(b"GET / HTTP/1.1\r\nbogus\r\n\r\n")]
    #[case::invalid_header_name(b"GET / HTTP/1.1\r\nbad name: x\r\n\r\n")]
    #[case::bad_length(b"POST /a HTTP/1.1\r\nContent-Length: x\r\n\r\n")]
    #[case::truncated_body(b"POST /a HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc")]
    #[case::not_utf8(b"GET /\xff HTTP/1.1\r\n\r\n")]
    fn test_request_parse_error(#[case] raw: &[u8]) {
        assert!(parse_request(raw).is_err());
    }

    #[test]
    fn test_response_parse() {
        let response = parse_response(b"HTTP/1.0 302 Found\r\nLocation: http://localhost:8081/b\r\nContent-Length: 0\r\n\r\n").unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.version(), Version::HTTP_10);
        assert_eq!(response.headers().get(LOCATION).unwrap(), "http://localhost:8081/b");
        assert!(response.body().is_empty());
    }

    #[rstest]
    #[case::missing_status(b"HTTP/1.0\r\n\r\n")]
    #[case::non_numeric_status(b"HTTP/1.0 abc OK\r\n\r\n")]
    #[case::not_http(b"SMTP/1.0 200 OK\r\n\r\n")]
    fn test_response_parse_error(#[case] raw: &[u8]) {
        assert!(parse_response(raw).is_err());
    }

    #[rstest]
    #[case::complete(b"GET / HTTP/1.1\r\n\r\nbody", Some(18))]
    #[case::incomplete(b"GET / HTTP/1.1\r\n", None)]
    fn test_head_len(#[case] raw: &[u8], #[case] expected: Option<usize>) {
        assert_eq!(head_len(raw), expected);
    }
}
