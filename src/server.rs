use crate::config::ServerConfig;
use crate::event::{generate_new_uuid, Event, EventStream};
use crate::handshake::accept_async_with_config;
use crate::stream::WaveStream;
use futures::StreamExt;
use log::debug;
use std::io::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::{TlsAcceptor, TlsStream};

/// A batteries-included server entry point.
///
/// Binds the given port (optionally behind TLS, with per-connection limits
/// from the config) and returns an `EventStream` yielding new clients, their
/// messages, disconnections and errors in sequence, so the consumer never
/// touches sockets or tasks directly.
pub async fn start_server_with_config(
    port: u16,
    config: Option<ServerConfig>,
) -> Result<EventStream, Error> {
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    let (tx, rx) = mpsc::channel(1000);
    let web_socket_config = config.clone().unwrap_or_default().web_socket_config;
    let tls_config = config.unwrap_or_default().tls_config;

    // The listener task fans every connection out to its own task and only
    // ever talks to the consumer through the event channel; when the
    // consumer drops the EventStream the sends fail and everything winds
    // down.
    tokio::spawn(async move {
        loop {
            // UUIDs are more flexible, and safer, than incrementing ids
            let uuid = generate_new_uuid();
            match listener.accept().await {
                Ok((stream, _)) => {
                    let socket_stream = if let Some(config) = tls_config.clone() {
                        let acceptor = TlsAcceptor::from(config);
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => WaveStream::Secure(TlsStream::from(tls_stream)),
                            Err(err) => {
                                if tx.send(Event::Error(uuid, err.into())).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        }
                    } else {
                        WaveStream::Plain(stream)
                    };

                    let ws_connection =
                        match accept_async_with_config(socket_stream, web_socket_config.clone())
                            .await
                        {
                            Ok(connection) => connection,
                            Err(err) => {
                                if tx.send(Event::Error(uuid, err)).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };

                    // inbound messages get monitored on a separate task, while
                    // the writer half is handed over to the consumer
                    let (mut ws_reader, ws_writer) = ws_connection.split();

                    if tx.send(Event::NewClient(uuid, ws_writer)).await.is_err() {
                        break;
                    }

                    let tx_task = tx.clone();
                    tokio::spawn(async move {
                        while let Some(result) = ws_reader.next().await {
                            let event = match result {
                                Ok(message) => Event::NewMessage(uuid, message),
                                Err(err) => {
                                    let _ = tx_task.send(Event::Error(uuid, err)).await;
                                    break;
                                }
                            };
                            if tx_task.send(event).await.is_err() {
                                return;
                            }
                        }

                        // connection over; report how it ended
                        let close_frame = ws_reader.close_frame();
                        let _ = tx_task.send(Event::Disconnect(uuid, close_frame)).await;
                    });
                }
                Err(error) => {
                    debug!("failed to accept connection: {}", error);
                    if tx.send(Event::Error(uuid, error.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // The EventStream is handed back without blocking on the listener task,
    // so accepting and event consumption run concurrently.
    Ok(EventStream::new(rx))
}

pub async fn start_server(port: u16) -> Result<EventStream, Error> {
    start_server_with_config(port, None).await
}
