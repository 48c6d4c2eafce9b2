use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use clap::Parser;
use futures::{SinkExt, StreamExt};
use tern_client::{Client, ClientOptions};
use tern_protocol::{Info, LineCodec, Packet};
use tern_util::init_tracing;
use tokio::{net::TcpListener, time::Instant};
use tokio_util::codec::Framed;

/// Publish throughput against an in-process sink server.
#[derive(Parser, Debug)]
struct Args {
    /// Number of messages to publish
    #[arg(long, default_value = "1000000")]
    messages: usize,

    /// Parallel publisher tasks sharing one client
    #[arg(long, default_value = "8")]
    parallelism: usize,

    /// Maximum payload size (randomized 32..max)
    #[arg(long, default_value = "256")]
    max_payload: usize,

    /// Connect to an external server instead of the built-in sink
    #[arg(long)]
    addr: Option<String>,

    #[arg(long, default_value = "guest")]
    user: String,

    #[arg(long, default_value = "guest")]
    pass: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    anyhow::ensure!(args.parallelism > 0, "parallelism must be positive");
    anyhow::ensure!(args.max_payload > 32, "max payload must exceed 32 bytes");

    let received = Arc::new(AtomicU64::new(0));
    let addr = match &args.addr {
        Some(addr) => addr.clone(),
        None => spawn_sink(received.clone()).await?,
    };

    let client = Arc::new(Client::dial_with(&addr, ClientOptions::default()).await?);
    client.connect(&args.user, &args.pass).await?;

    tracing::info!("Benchmark: publishing {} messages to {}", args.messages, addr);
    tracing::info!(
        "parallel={}, max_payload={}",
        args.parallelism,
        args.max_payload
    );

    let msgs_per_worker = args.messages / args.parallelism;
    let start = Instant::now();

    let mut tasks = Vec::new();
    for worker in 0..args.parallelism {
        let client = client.clone();
        let max_payload = args.max_payload;
        tasks.push(tokio::spawn(async move {
            let subject = format!("bench.{worker}");
            for _ in 0..msgs_per_worker {
                let size = fastrand::usize(32..max_payload);
                let mut buf = vec![0u8; size];
                fastrand::fill(&mut buf);
                client.publish(&subject, buf);
            }
        }));
    }

    for t in tasks {
        t.await?;
    }
    let enqueued = start.elapsed().as_secs_f64();

    // PONG comes back after the server has consumed everything queued before it.
    client.ping().await?;
    let elapsed = start.elapsed().as_secs_f64();
    let total = msgs_per_worker * args.parallelism;

    tracing::info!("Enqueue time: {:.2} s", enqueued);
    tracing::info!("Total time: {:.2} s", elapsed);
    tracing::info!("Throughput: {:.2} messages/sec", total as f64 / elapsed);
    if args.addr.is_none() {
        tracing::info!("Sink received {} messages", received.load(Ordering::Relaxed));
    }
    tracing::info!("Client diagnostics: {:?}", client.diagnostics());

    Ok(())
}

/// Accepts one connection, counts PUB frames and answers CONNECT and PING.
async fn spawn_sink(received: Arc<AtomicU64>) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();

    tokio::spawn(async move {
        let result: anyhow::Result<()> = async {
            let (socket, peer) = listener.accept().await?;
            tracing::debug!(%peer, "sink accepted");
            let mut framed = Framed::new(socket, LineCodec::new());
            framed
                .send(Packet::Info(Info {
                    payload: r#"{"server_id":"bench-sink"}"#.into(),
                }))
                .await?;

            while let Some(packet) = framed.next().await {
                match packet? {
                    Packet::Pub(_) => {
                        received.fetch_add(1, Ordering::Relaxed);
                    }
                    Packet::Ping => framed.send(Packet::Pong).await?,
                    Packet::Connect(_) => framed.send(Packet::Ok).await?,
                    other => tracing::warn!(op = other.op(), "sink ignoring packet"),
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!("sink error: {:?}", e);
        }
    });

    Ok(addr)
}
