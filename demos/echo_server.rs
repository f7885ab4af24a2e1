use futures::StreamExt;
use log::*;
use std::net::SocketAddr;
use ws_engine::config::ServerConfig;
use ws_engine::connection::Connection;
use ws_engine::frame::DataOpcode;
use ws_engine::listener::{AcceptResult, WsListener};

fn handle_connection(mut connection: Connection<tokio::net::TcpStream>) {
    let peer_addr: SocketAddr = connection.peer_addr();
    let sender = connection.sender();

    connection.on_text(move |text| {
        let sender = sender.clone();
        let echoed = text;
        tokio::spawn(async move {
            if sender
                .send_message(DataOpcode::Text, echoed.into_bytes())
                .await
                .is_err()
            {
                error!("failed to echo text message to {peer_addr}");
            }
        });
    });

    let sender = connection.sender();
    connection.on_binary(move |data| {
        let sender = sender.clone();
        tokio::spawn(async move {
            if sender.send_message(DataOpcode::Binary, data).await.is_err() {
                error!("failed to echo binary message to {peer_addr}");
            }
        });
    });

    tokio::spawn(connection.run());
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let addr = "127.0.0.1:9002".parse().expect("valid socket address");
    let mut listener = WsListener::bind(ServerConfig::new(addr))
        .await
        .expect("can't listen");
    info!("listening on {}", listener.local_addr());

    while let Some(accepted) = listener.incoming().next().await {
        match accepted {
            AcceptResult::Connected(connection) => {
                info!("peer connected: {}", connection.peer_addr());
                handle_connection(connection);
            }
            AcceptResult::Error(err) => error!("error accepting connection: {err}"),
        }
    }
}
