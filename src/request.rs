use crate::error::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use url::Url;

const MAX_RESPONSE_HEADER_SIZE: usize = 16 * 1024;

// Parses the ws URL into the handshake request, which includes the sec-websocket-key and the
// URL path. It also returns host:port, which is needed for establishing the TCP socket
pub fn construct_http_request(ws_url: &str, key: &str) -> Result<(String, String), Error> {
    let parsed_url = Url::parse(ws_url)?;

    // Only plain websockets are supported, a benchmark client doesn't need TLS
    if parsed_url.scheme() != "ws" {
        return Err(Error::InvalidSchemeURL);
    }

    let host = parsed_url.host_str().ok_or(Error::URLNoHost)?;
    if host.is_empty() {
        return Err(Error::URLNoHost);
    }
    let port = parsed_url.port().unwrap_or(80);

    // If the URL carries a port, it needs to go in the Host header as well
    let request_host_field = match parsed_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => String::from(host),
    };

    let request_path = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    // No Sec-WebSocket-Extensions header is sent, so the server never enables
    // permessage-deflate on this connection
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n\r\n",
        request_path, request_host_field, key,
    );

    Ok((request, format!("{}:{}", host, port)))
}

pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl HttpResponse {
    // Reads line by line until the blank line ending the headers. Going through the BufReader
    // keeps any frame bytes the server already sent after the headers
    pub async fn read_http_response<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Self, Error> {
        let mut raw = String::new();
        loop {
            // A single line may not outgrow what is left of the header budget either
            let budget = MAX_RESPONSE_HEADER_SIZE.saturating_sub(raw.len());
            if budget == 0 {
                return Err(Error::ResponseHeadersTooLarge(MAX_RESPONSE_HEADER_SIZE));
            }
            let read = (&mut *reader).take(budget as u64).read_line(&mut raw).await?;
            if read == 0 {
                return Err(Error::IncompleteHTTPResponse);
            }
            if raw.ends_with("\r\n\r\n") {
                break;
            }
        }

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut response = httparse::Response::new(&mut headers);
        if response.parse(raw.as_bytes())?.is_partial() {
            return Err(Error::IncompleteHTTPResponse);
        }

        Ok(Self {
            status: response.code.unwrap_or_default(),
            headers: response
                .headers
                .iter()
                .map(|header| {
                    (
                        header.name.to_string(),
                        String::from_utf8_lossy(header.value).to_string(),
                    )
                })
                .collect(),
        })
    }

    pub fn get_header_value(&self, header_name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(header_name))
            .map(|(_, value)| value.trim())
    }
}
