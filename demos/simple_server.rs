use futures::StreamExt;
use log::*;
use socket_wave::event::Event;
use socket_wave::server::start_server;
use std::collections::HashMap;

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut clients = HashMap::new();

    match start_server(9002).await {
        Ok(mut event_stream) => {
            while let Some(event) = event_stream.next().await {
                match event {
                    Event::NewClient(id, client) => {
                        info!("New client connected: {}", id);
                        clients.insert(id, client);
                    }
                    Event::NewMessage(id, message) => {
                        if let Some(client) = clients.get_mut(&id) {
                            if client.send_message(message).await.is_err() {
                                error!("Failed to echo message to client: {}", id);
                            }
                        }
                    }
                    Event::Disconnect(id, close_frame) => {
                        info!("Client {} disconnected: {:?}", id, close_frame);
                        clients.remove(&id);
                    }
                    Event::Error(id, error) => {
                        error!("Error from client {}: {}", id, error);
                    }
                }
            }
        }
        Err(err) => {
            error!("Error when starting the server: {}", err);
        }
    }
}
