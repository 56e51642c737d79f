//! Response composition: status line, headers, and body (inline or mmap'd)

use std::sync::Arc;

use crate::cache::Resource;
use crate::http::status::Status;
use crate::http::Version;
use crate::output_chain::OutputChain;

enum Body {
    Inline(Vec<u8>),
    Mapped(Arc<Resource>),
}

impl Body {
    fn len(&self) -> usize {
        match self {
            Body::Inline(b) => b.len(),
            Body::Mapped(r) => r.len(),
        }
    }
}

/// An HTTP/1.1 response, ready to be pushed onto a connection's [`OutputChain`].
pub struct Response {
    version: Version,
    status: Status,
    content_type: &'static str,
    keep_alive: bool,
    body: Body,
}

impl Response {
    /// A response whose body is a shared mmap resource from the cache (the `GET` hit path).
    pub fn with_mapped_body(
        version: Version,
        status: Status,
        content_type: &'static str,
        keep_alive: bool,
        resource: Arc<Resource>,
    ) -> Self {
        Self {
            version,
            status,
            content_type,
            keep_alive,
            body: Body::Mapped(resource),
        }
    }

    /// A response whose body is generated inline (error pages, 204s).
    pub fn with_inline_body(
        version: Version,
        status: Status,
        content_type: &'static str,
        keep_alive: bool,
        body: Vec<u8>,
    ) -> Self {
        Self {
            version,
            status,
            content_type,
            keep_alive,
            body: Body::Inline(body),
        }
    }

    /// Builds a canned error response with the crate's inline fallback HTML.
    pub fn error(version: Version, status: Status, keep_alive: bool) -> Self {
        let body = format!(
            "<html><head><title>{status}</title></head>\
             <body><h1>{code} {reason}</h1></body></html>",
            status = status,
            code = status as u16,
            reason = status.reason_phrase(),
        );
        Self::with_inline_body(version, status, "text/html", keep_alive, body.into_bytes())
    }

    /// Serializes the status line and headers, and pushes head + body onto `chain`.
    pub fn write_into(self, chain: &mut OutputChain) {
        let content_length = self.body.len();
        let connection = if self.keep_alive { "keep-alive" } else { "close" };

        let head = format!(
            "{version} {status}\r\nContent-Type: {ct}\r\nContent-Length: {len}\r\nConnection: {connection}\r\n\r\n",
            version = self.version,
            status = self.status,
            ct = self.content_type,
            len = content_length,
        );

        chain.push_owned(head.into_bytes());
        match self.body {
            Body::Inline(bytes) => chain.push_owned(bytes),
            Body::Mapped(resource) => chain.push_mapped(resource),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_contains_status_in_body() {
        let mut chain = OutputChain::new();
        Response::error(Version::Http11, Status::NotFound, false).write_into(&mut chain);
        assert!(!chain.is_empty());

        let vecs = chain.fill_io_vectors(8);
        let head: Vec<u8> = vecs[0].to_vec();
        let head = String::from_utf8(head).unwrap();
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(head.contains("Connection: close"));

        let body: Vec<u8> = vecs[1].to_vec();
        assert!(String::from_utf8(body).unwrap().contains("404"));
    }
}
