use crate::config::{ClientConfig, WebSocketConfig};
use crate::connection::{spawn_connection, WSConnection};
use crate::error::Error;
use crate::extensions::{
    negotiate_client, negotiate_server, parse_extensions_header, ExtensionOffer,
    WebSocketExtension,
};
use crate::frame::CloseFrame;
use crate::request::{build_upgrade_request, HttpRequest, HttpResponse};
use crate::split::{WSReader, WSWriter};
use crate::stream::{wrap_client_tls, WaveStream};
use crate::utils::{generate_websocket_accept_value, generate_websocket_key};
use crate::write::WriterKind;
use log::{debug, error};
use std::future::Future;
use tokio::io::{split, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";
const SEC_WEBSOCKET_EXTENSIONS: &str = "Sec-WebSocket-Extensions";
const SEC_WEBSOCKET_ACCEPT: &str = "Sec-WebSocket-Accept";

// These three are what make the response an upgrade at all; caller-supplied
// extra headers must not be able to override them.
const PROTECTED_RESPONSE_HEADERS: [&str; 3] = ["upgrade", "connection", "sec-websocket-accept"];

/// What the caller's `should_upgrade` decision function returns for an
/// inbound HTTP request.
pub enum UpgradeDecision {
    /// Switch protocols, optionally adding response headers (the upgrade
    /// headers themselves are managed by the library and cannot be
    /// overridden here).
    Upgrade { extra_headers: Vec<(String, String)> },
    /// Keep the connection on HTTP and answer with this status instead,
    /// typically `405`.
    DontUpgrade { status: u16, reason: String },
}

// ---------------------------------------------------------------------------
// server side
// ---------------------------------------------------------------------------

/// Accepts an inbound WebSocket connection on a plain TCP stream with the
/// default server configuration.
pub async fn accept_async(stream: TcpStream) -> Result<WSConnection, Error> {
    accept_async_with_config(WaveStream::Plain(stream), None).await
}

/// Accepts an inbound WebSocket connection on an already-wrapped transport.
pub async fn accept_async_with_config(
    stream: WaveStream,
    config: Option<WebSocketConfig>,
) -> Result<WSConnection, Error> {
    let connection = accept_upgrade_with_config(stream, config, |_request| {
        UpgradeDecision::Upgrade {
            extra_headers: Vec::new(),
        }
    })
    .await?;
    // the callback above always upgrades
    connection.ok_or(Error::NoUpgrade)
}

/// Accepts an inbound connection, letting the caller inspect the upgrade
/// request first. Returns `Ok(None)` when the caller declined and the chosen
/// HTTP response was written instead.
pub async fn accept_upgrade_with_config<D>(
    stream: WaveStream,
    config: Option<WebSocketConfig>,
    should_upgrade: D,
) -> Result<Option<WSConnection>, Error>
where
    D: FnOnce(&HttpRequest) -> UpgradeDecision,
{
    let config = config.unwrap_or_else(WebSocketConfig::server_default);

    let (read_half, mut write_half) = split(stream);
    let mut buf_reader = BufReader::new(read_half);

    let request = HttpRequest::parse(&mut buf_reader).await?;

    // the caller decides first, so a plain HTTP request can still get the
    // response it chose; only an accepted upgrade is held to RFC 6455
    match should_upgrade(&request) {
        UpgradeDecision::DontUpgrade { status, reason } => {
            debug!("upgrade declined, answering {} {}", status, reason);
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Length: 0\r\n\r\n",
                status, reason
            );
            write_half.write_all(response.as_bytes()).await?;
            let _ = write_half.shutdown().await;
            Ok(None)
        }
        UpgradeDecision::Upgrade { extra_headers } => {
            validate_upgrade_request(&request)?;
            let key = request
                .get_header_value(SEC_WEBSOCKET_KEY)
                .ok_or(Error::NoSecWebsocketKey)?;

            let offers: Vec<ExtensionOffer> = request
                .header_values(SEC_WEBSOCKET_EXTENSIONS)
                .iter()
                .flat_map(|value| parse_extensions_header(value))
                .collect();
            let (extensions_header, instances) =
                negotiate_server(&config.extensions, &offers)?;

            let mut response = format!(
                "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n{}: {}\r\n",
                SEC_WEBSOCKET_ACCEPT,
                generate_websocket_accept_value(&key)
            );
            if let Some(header) = extensions_header {
                response.push_str(&format!("{}: {}\r\n", SEC_WEBSOCKET_EXTENSIONS, header));
            }
            for (name, value) in extra_headers {
                if PROTECTED_RESPONSE_HEADERS
                    .iter()
                    .any(|protected| name.eq_ignore_ascii_case(protected))
                {
                    debug!("dropping caller header `{}` from upgrade response", name);
                    continue;
                }
                response.push_str(&format!("{}: {}\r\n", name, value));
            }
            response.push_str("\r\n");

            write_half.write_all(response.as_bytes()).await?;

            Ok(Some(spawn_connection(
                buf_reader,
                write_half,
                WriterKind::Server,
                config,
                instances,
            )))
        }
    }
}

/// The server-side registration point: decides on the upgrade, runs the data
/// handler for the connection's lifetime and resolves to the close frame
/// that ended it. A handler failure is logged and turns into a 1011 close
/// rather than an error, so one misbehaving connection doesn't bubble out of
/// an accept loop.
pub async fn serve_async<D, H, Fut>(
    stream: TcpStream,
    config: Option<WebSocketConfig>,
    should_upgrade: D,
    handler: H,
) -> Result<Option<CloseFrame>, Error>
where
    D: FnOnce(&HttpRequest) -> UpgradeDecision,
    H: FnOnce(WSReader, WSWriter) -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    let connection =
        accept_upgrade_with_config(WaveStream::Plain(stream), config, should_upgrade).await?;

    match connection {
        None => Ok(None),
        Some(connection) => match connection.run(handler).await {
            Ok(close_frame) => Ok(close_frame),
            Err(err) => {
                error!("connection handler failed: {}", err);
                Ok(None)
            }
        },
    }
}

fn validate_upgrade_request(request: &HttpRequest) -> Result<(), Error> {
    if request.method != "GET" || request.version < 1 {
        return Err(Error::InvalidHTTPHandshake);
    }
    if request.get_header_value("Host").is_none() {
        return Err(Error::NoHostHeaderPresent);
    }
    if !header_contains_token(request.get_header_value("Connection"), "upgrade") {
        return Err(Error::NoConnectionHeaderPresent);
    }
    if !header_contains_token(request.get_header_value("Upgrade"), "websocket") {
        return Err(Error::NoUpgradeHeaderPresent);
    }
    match request.get_header_value("Sec-WebSocket-Version") {
        Some(version) if version.trim() == "13" => {}
        _ => return Err(Error::InvalidWebsocketVersion),
    }
    Ok(())
}

fn header_contains_token(value: Option<String>, token: &str) -> bool {
    value
        .map(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// client side
// ---------------------------------------------------------------------------

/// Connects to a WebSocket server with default settings.
pub async fn connect_async(url: &str) -> Result<WSConnection, Error> {
    connect_async_with_config(url, None).await
}

/// Connects to a WebSocket server: resolves the URL, dials TCP (and TLS for
/// `wss`/`https`), performs the upgrade and validates the response.
pub async fn connect_async_with_config(
    url: &str,
    config: Option<ClientConfig>,
) -> Result<WSConnection, Error> {
    let config = config.unwrap_or_default();
    let key = generate_websocket_key();
    let target = build_upgrade_request(url, &key, &config)?;

    let tcp_stream = TcpStream::connect(&target.host_with_port).await?;
    let stream = if target.use_tls {
        wrap_client_tls(tcp_stream, &target.domain, config.ca_file.as_deref()).await?
    } else {
        WaveStream::Plain(tcp_stream)
    };

    let (read_half, mut write_half) = split(stream);
    let mut buf_reader = BufReader::new(read_half);

    write_half.write_all(target.request.as_bytes()).await?;

    let response = HttpResponse::parse(&mut buf_reader).await?;
    let instances = validate_upgrade_response(&response, &key, &config)?;

    Ok(spawn_connection(
        buf_reader,
        write_half,
        WriterKind::Client,
        config.web_socket_config,
        instances,
    ))
}

/// Connects and drives the connection with the given data handler, resolving
/// to the close frame that ended the connection, or the handler's error.
pub async fn connect<H, Fut>(
    url: &str,
    config: Option<ClientConfig>,
    handler: H,
) -> Result<Option<CloseFrame>, Error>
where
    H: FnOnce(WSReader, WSWriter) -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    let connection = connect_async_with_config(url, config).await?;
    connection.run(handler).await
}

fn validate_upgrade_response(
    response: &HttpResponse,
    key: &str,
    config: &ClientConfig,
) -> Result<Vec<Box<dyn WebSocketExtension>>, Error> {
    match response.status {
        101 => {}
        300..=399 => {
            // redirect policy belongs to the caller; surface where the
            // server pointed us and let it decide whether to follow
            let location = response.get_header_value("Location").unwrap_or_default();
            return Err(Error::RequestRedirected(location));
        }
        status => return Err(Error::InvalidStatusCode(status)),
    }

    if !header_contains_token(response.get_header_value("Upgrade"), "websocket") {
        return Err(Error::NoUpgrade);
    }
    if !header_contains_token(response.get_header_value("Connection"), "upgrade") {
        return Err(Error::NoConnectionHeaderPresent);
    }

    let accept_values = response.header_values(SEC_WEBSOCKET_ACCEPT);
    if accept_values.len() > 1 {
        return Err(Error::DuplicatedAcceptKey);
    }
    match accept_values.first() {
        Some(value) if *value == generate_websocket_accept_value(key) => {}
        _ => return Err(Error::InvalidAcceptKey),
    }

    let selected: Vec<ExtensionOffer> = response
        .header_values(SEC_WEBSOCKET_EXTENSIONS)
        .iter()
        .flat_map(|value| parse_extensions_header(value))
        .collect();
    negotiate_client(&config.web_socket_config.extensions, &selected)
}
