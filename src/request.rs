use crate::config::ClientConfig;
use crate::error::Error;
use httparse::Status;
use tokio::io::AsyncBufReadExt;
use tokio::time::{timeout, Duration};
use url::Url;

// Some attackers connect to the TCP endpoint and freeze without ever sending
// the HTTP head; the read is bounded in both time and size.
const HTTP_HEAD_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_HEAD_SIZE: usize = 16 * 1024;
const MAX_HEADERS: usize = 64;

/// Everything the client connect path needs to reach the server: the
/// serialized upgrade request, the address to dial, and the TLS decision
/// derived from the URL scheme.
pub(crate) struct UpgradeRequest {
    pub request: String,
    pub host_with_port: String,
    pub domain: String,
    pub use_tls: bool,
}

/// Builds the HTTP/1.1 upgrade request for a `ws`/`wss` (or `http`/`https`)
/// URL. The Host header carries a port only when it differs from the
/// scheme's default. Caller-supplied headers are appended last and replace
/// generated headers of the same name, so the caller always has the final
/// say.
pub(crate) fn build_upgrade_request(
    ws_url: &str,
    key: &str,
    config: &ClientConfig,
) -> Result<UpgradeRequest, Error> {
    let parsed_url = Url::parse(ws_url)?;

    let (default_port, use_tls) = match parsed_url.scheme() {
        "ws" | "http" => (80, false),
        "wss" | "https" => (443, true),
        _ => return Err(Error::InvalidSchemeURL),
    };

    let host = parsed_url.host_str().ok_or(Error::URLNoHost)?.to_string();
    // the url crate strips the port when it matches the scheme default, so
    // `port()` being Some is exactly the "differs from default" case
    let port = parsed_url.port().unwrap_or(default_port);
    let request_host_field = match parsed_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.clone(),
    };
    let host_with_port = format!("{}:{}", host, port);

    let request_path = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let mut headers: Vec<(String, String)> = vec![
        ("Host".into(), request_host_field),
        ("Connection".into(), "Upgrade".into()),
        ("Upgrade".into(), "websocket".into()),
        ("Sec-WebSocket-Key".into(), key.to_string()),
        ("Sec-WebSocket-Version".into(), "13".into()),
        ("Content-Length".into(), "0".into()),
    ];

    let offers: Vec<String> = config
        .web_socket_config
        .extensions
        .iter()
        .filter_map(|factory| factory.client_offer())
        .collect();
    if !offers.is_empty() {
        headers.push(("Sec-WebSocket-Extensions".into(), offers.join(", ")));
    }

    for (name, value) in &config.additional_headers {
        headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        headers.push((name.clone(), value.clone()));
    }

    let mut request = format!("GET {} HTTP/1.1\r\n", request_path);
    for (name, value) in headers {
        request.push_str(&format!("{}: {}\r\n", name, value));
    }
    request.push_str("\r\n");

    Ok(UpgradeRequest {
        request,
        host_with_port,
        domain: host,
        use_tls,
    })
}

/// Reads one HTTP head off the buffered reader, stopping at the blank line.
/// Reading line-wise through the BufReader means whatever follows the head,
/// like an eager client's first frame, stays buffered for the frame codec.
async fn read_head<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<String, Error> {
    let mut buffer = String::new();

    timeout(HTTP_HEAD_TIMEOUT, async {
        loop {
            let bytes_read = reader.read_line(&mut buffer).await?;
            if bytes_read == 0 || buffer.ends_with("\r\n\r\n") || buffer.len() > MAX_HEAD_SIZE {
                break;
            }
        }
        Ok::<(), Error>(())
    })
    .await??;

    if !buffer.ends_with("\r\n\r\n") {
        return Err(Error::IncompleteHTTPRequest);
    }

    Ok(buffer)
}

fn collect_headers(raw: &[httparse::Header<'_>]) -> Result<Vec<(String, String)>, Error> {
    raw.iter()
        .map(|header| {
            let value = std::str::from_utf8(header.value)
                .map_err(|_| Error::IncompleteHTTPRequest)?
                .trim()
                .to_string();
            Ok((header.name.to_lowercase(), value))
        })
        .collect()
}

/// The head of an inbound HTTP request, as the server upgrade path sees it.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub version: u8,
    headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub async fn parse<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<Self, Error> {
        let head = read_head(reader).await?;

        let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut header_buf);
        match request.parse(head.as_bytes())? {
            Status::Complete(_) => {}
            Status::Partial => return Err(Error::IncompleteHTTPRequest),
        }

        Ok(HttpRequest {
            method: request.method.ok_or(Error::InvalidHTTPHandshake)?.to_string(),
            uri: request.path.ok_or(Error::InvalidHTTPHandshake)?.to_string(),
            version: request.version.ok_or(Error::InvalidHTTPHandshake)?,
            headers: collect_headers(request.headers)?,
        })
    }

    /// First value of a header, case-insensitive on the name.
    pub fn get_header_value(&self, key: &str) -> Option<String> {
        let key = key.to_lowercase();
        self.headers
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.clone())
    }

    /// All values of a repeatable header, in arrival order.
    pub fn header_values(&self, key: &str) -> Vec<String> {
        let key = key.to_lowercase();
        self.headers
            .iter()
            .filter(|(name, _)| *name == key)
            .map(|(_, value)| value.clone())
            .collect()
    }
}

/// The head of the server's reply to an upgrade request.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    headers: Vec<(String, String)>,
}

impl HttpResponse {
    pub async fn parse<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<Self, Error> {
        let head = read_head(reader).await?;

        let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut header_buf);
        match response.parse(head.as_bytes())? {
            Status::Complete(_) => {}
            Status::Partial => return Err(Error::IncompleteHTTPRequest),
        }

        Ok(HttpResponse {
            status: response.code.ok_or(Error::InvalidHTTPHandshake)?,
            reason: response.reason.unwrap_or_default().to_string(),
            headers: collect_headers(response.headers)?,
        })
    }

    pub fn get_header_value(&self, key: &str) -> Option<String> {
        let key = key.to_lowercase();
        self.headers
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.clone())
    }

    pub fn header_values(&self, key: &str) -> Vec<String> {
        let key = key.to_lowercase();
        self.headers
            .iter()
            .filter(|(name, _)| *name == key)
            .map(|(_, value)| value.clone())
            .collect()
    }
}
