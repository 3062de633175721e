//! Connects to an echo-style socket.io server, sends one message per
//! command-line argument with an ack, and prints each reply.
//!
//! ```text
//! echo <url> <message>...
//! ```

use std::time::Duration;

use socketio_client::{Client, ClientConfig, ClientStatus, EventArg};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| {
        eprintln!("usage: echo <url> <message>...");
        std::process::exit(1);
    });
    let messages: Vec<String> = args.collect();
    if messages.is_empty() {
        eprintln!("usage: echo <url> <message>...");
        std::process::exit(1);
    }

    let config = ClientConfig::builder(url::Url::parse(&url).expect("invalid server url")).build();
    let client = Client::new(config);
    client.connect();
    wait_for_connected(&client).await;

    for message in messages {
        match client
            .emit_with_ack(
                "message",
                vec![EventArg::Json(serde_json::json!(message))],
                Duration::from_secs(10),
            )
            .await
        {
            Ok(reply) => {
                for arg in reply {
                    if let Some(value) = arg.as_json() {
                        println!("{value}");
                    }
                }
            }
            Err(e) => eprintln!("ack failed: {e}"),
        }
    }

    client.disconnect();
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
