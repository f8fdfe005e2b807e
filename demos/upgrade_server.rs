use futures::StreamExt;
use log::*;
use socket_wave::handshake::{serve_async, UpgradeDecision};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    env_logger::init();

    let addr = "127.0.0.1:9002";
    let listener = TcpListener::bind(&addr).await.expect("Can't listen");
    info!("Listening on: {}", addr);

    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(async move {
            let result = serve_async(
                stream,
                None,
                |request| {
                    // only the /echo endpoint upgrades; everything else stays HTTP
                    if request.uri == "/echo" {
                        UpgradeDecision::Upgrade {
                            extra_headers: vec![("Server".to_string(), "socket-wave".to_string())],
                        }
                    } else {
                        UpgradeDecision::DontUpgrade {
                            status: 404,
                            reason: "Not Found".to_string(),
                        }
                    }
                },
                |mut reader, mut writer| async move {
                    while let Some(message) = reader.next().await {
                        writer.send_message(message?).await?;
                    }
                    Ok(())
                },
            )
            .await;

            match result {
                Ok(Some(frame)) => info!("connection closed with {:?}", frame),
                Ok(None) => info!("connection ended without a websocket upgrade"),
                Err(err) => error!("connection failed: {}", err),
            }
        });
    }
}
