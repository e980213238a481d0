use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use danmaku_client::{Config, Connection, Dispatcher, Event, StaticServerInfo, TcpOpener};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Connects to a Bilibili live room's danmaku stream and prints events as
/// they arrive.
#[derive(Parser)]
struct Args {
    /// Room id to join.
    room_id: u64,

    /// Danmaku server host.
    #[arg(long, default_value = "broadcastlv.chat.bilibili.com")]
    host: String,

    /// Danmaku server port.
    #[arg(long, default_value_t = 2243)]
    port: u16,

    /// Auth token handed out by the room-init API. A real caller resolves
    /// this out of band; here it is just passed straight through.
    #[arg(long, default_value = "")]
    token: String,

    /// Viewer id to present in the join-room payload. `0` is the
    /// anonymous-viewer sentinel.
    #[arg(long, default_value_t = 0)]
    uid: u64,

    /// Heartbeat cadence, in seconds.
    #[arg(long, default_value_t = 30)]
    heartbeat_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = Config::from_parts(
        args.room_id,
        Duration::from_secs(args.heartbeat_secs),
        Some(Duration::from_secs(10)),
        2,
    )?;
    let server_info = Arc::new(StaticServerInfo::new(args.host, args.port, args.token, args.uid));

    let dispatcher = Arc::new(
        Dispatcher::builder()
            .on_connected(|_| info!("connected"))
            .on_disconnected(|event| {
                if let Event::Disconnected { error, .. } = event {
                    info!(?error, "disconnected");
                }
            })
            .on_popularity(|event| {
                if let Event::Popularity { value, .. } = event {
                    println!("viewers: {value}");
                }
            })
            .on_raw(|event| {
                if let Event::Raw { json } = event {
                    println!("{json}");
                }
            })
            .build(),
    );

    let connection = Connection::new(config, server_info, Arc::new(TcpOpener), dispatcher);
    connection.connect(CancellationToken::new()).await?;

    tokio::signal::ctrl_c().await?;
    connection.disconnect();
    Ok(())
}
