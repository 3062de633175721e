//! Terminal chat client, talking to a socket.io chat server over the
//! `message`/`join`/`leave`/`list`/`nickname` events. Pass a nickname and a
//! server URL on the command line:
//!
//! ```text
//! chat <nickname> [url]
//! ```

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use socketio_client::{Client, ClientConfig, ClientStatus, EventArg};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let nickname = args.next().unwrap_or_else(|| {
        eprintln!("usage: chat <nickname> [url]");
        std::process::exit(1);
    });
    let url = args
        .next()
        .unwrap_or_else(|| "http://127.0.0.1:3000".to_string());

    let config = ClientConfig::builder(url::Url::parse(&url).expect("invalid server url"))
        .auth(serde_json::json!({ "nickname": nickname }))
        .build();
    let client = Client::new(config);

    client.on("message", |_client, args, _ack| {
        if let Some(text) = args.first().and_then(EventArg::as_json).and_then(|v| v.as_str()) {
            println!("{text}");
        }
    });

    client.connect();
    wait_for_connected(&client).await;
    println!("connected. commands: <room> <text> | /join <room> | /leave <room> | /list [room]");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(room) = line.strip_prefix("/join ") {
            client.emit("join", vec![EventArg::Json(serde_json::json!(room))]);
        } else if let Some(room) = line.strip_prefix("/leave ") {
            client.emit("leave", vec![EventArg::Json(serde_json::json!(room))]);
        } else if let Some(rest) = line.strip_prefix("/list") {
            let room = rest.trim();
            let args = if room.is_empty() {
                Vec::new()
            } else {
                vec![EventArg::Json(serde_json::json!(room))]
            };
            client.emit("list", args);
        } else if let Some((room, text)) = line.split_once(' ') {
            client.emit(
                "message",
                vec![
                    EventArg::Json(serde_json::json!(room)),
                    EventArg::Json(serde_json::json!(text)),
                ],
            );
        }
    }
}

async fn wait_for_connected(client: &Client) {
    let mut statuses = client.status_changes();
    while client.current_status() != ClientStatus::Connected {
        if tokio::time::timeout(Duration::from_secs(20), statuses.changed())
            .await
            .is_err()
        {
            eprintln!("timed out waiting to connect");
            std::process::exit(1);
        }
    }
}
