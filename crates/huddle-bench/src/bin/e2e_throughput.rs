//! End-to-end throughput benchmark for Huddle.
//!
//! Logs N WebSocket clients into one room and has each of them chat as fast as
//! it can, counting the chat frames delivered back over the network.
//!
//! ```bash
//! huddle &
//! e2e_throughput 16 ws://127.0.0.1:8080/ws
//! ```

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{codec, ClientFrame, ServerFrame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const ROOM: &str = "benchmark";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

    println!("Huddle end-to-end throughput: {num_clients} clients in room '{ROOM}' at {url}");
    println!("Warmup: {WARMUP_SECS}s, measurement: {BENCH_SECS}s");

    let delivered = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();
    for client_id in 0..num_clients {
        let delivered = Arc::clone(&delivered);
        let barrier = Arc::clone(&barrier);
        let url = url.clone();

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(client_id, &url, delivered, barrier).await {
                eprintln!("Client {client_id} error: {e}");
            }
        }));
    }

    barrier.wait().await;
    println!("All {num_clients} clients logged in");

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    delivered.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = delivered.load(Ordering::SeqCst);
    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("Duration:        {:>12.2}s", elapsed.as_secs_f64());
    println!("Delivered chats: {:>12}", total);
    println!("Throughput:      {:>12.0} msg/s", per_sec);
    println!("Per client:      {:>12.0} msg/s", per_sec / num_clients as f64);

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    url: &str,
    delivered: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    let login = codec::encode(&ClientFrame::login(ROOM, format!("bench-{client_id}")))?;
    sender.send(Message::Binary(login.to_vec())).await?;

    let mut recv_buf = BytesMut::with_capacity(65536);
    'welcome: while let Some(message) = receiver.next().await {
        if let Message::Binary(data) = message? {
            recv_buf.extend_from_slice(&data);
            while let Some(frame) = codec::decode_from::<ServerFrame>(&mut recv_buf)? {
                match frame {
                    ServerFrame::Welcome { .. } => break 'welcome,
                    ServerFrame::Error { code, message } => {
                        return Err(format!("login rejected ({code:?}): {message}").into());
                    }
                    _ => {}
                }
            }
        }
    }

    barrier.wait().await;

    let chat = codec::encode(&ClientFrame::chat("x".repeat(64)))?;
    let chat = Message::Binary(chat.to_vec());

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Binary(data) = message {
                recv_buf.extend_from_slice(&data);
                while let Ok(Some(frame)) = codec::decode_from::<ServerFrame>(&mut recv_buf) {
                    if matches!(frame, ServerFrame::Chat { .. }) {
                        delivered.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    });

    while sender.send(chat.clone()).await.is_ok() {
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
