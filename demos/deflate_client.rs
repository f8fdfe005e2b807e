use futures::StreamExt;
use log::*;
use socket_wave::config::ClientConfig;
use socket_wave::deflate::{DeflateFactory, DeflateOptions};
use socket_wave::handshake::connect;
use std::sync::Arc;

fn get_config() -> ClientConfig {
    let options = DeflateOptions {
        client_no_context_takeover: true,
        server_no_context_takeover: true,
        ..Default::default()
    };

    let mut client_config = ClientConfig::default();
    client_config.web_socket_config.extensions =
        vec![Arc::new(DeflateFactory::new(options).expect("valid deflate options"))];
    client_config
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let close_frame = connect(
        "ws://127.0.0.1:9002",
        Some(get_config()),
        |mut reader, mut writer| async move {
            // big enough that permessage-deflate kicks in
            let payload = "the same sentence over and over ".repeat(64);
            writer.send_as_text(payload.clone()).await?;

            let echo = reader.next().await.expect("expected an echo")?;
            info!("echo matches: {}", echo.as_text()? == payload);
            Ok(())
        },
    )
    .await;

    match close_frame {
        Ok(frame) => info!("connection ended with {:?}", frame),
        Err(err) => error!("connection failed: {}", err),
    }
}
