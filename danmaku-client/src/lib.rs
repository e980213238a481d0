//! Client for the Bilibili live-room danmaku protocol: a 16-byte framed
//! TCP/WebSocket wire format carrying viewer-count pushes, chat and gift
//! messages, and a client-driven heartbeat, wrapped in a connection that
//! keeps itself alive until explicitly disconnected.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use danmaku_client::{Config, Connection, Dispatcher, Event, StaticServerInfo, TcpOpener};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> danmaku_client::Result<()> {
//! let config = Config::from_parts(12345, Duration::from_secs(30), Some(Duration::from_secs(10)), 2)?;
//! let server_info = Arc::new(StaticServerInfo::new("broadcastlv.chat.bilibili.com", 2243, "token", 0));
//! let dispatcher = Arc::new(
//!     Dispatcher::builder()
//!         .on_popularity(|event| {
//!             if let Event::Popularity { value, .. } = event {
//!                 println!("viewers: {value}");
//!             }
//!         })
//!         .build(),
//! );
//! let connection = Connection::new(config, server_info, Arc::new(TcpOpener), dispatcher);
//! connection.connect(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod server_info;
pub mod transport;

pub use config::Config;
pub use connection::{Connection, TcpOpener, TransportOpener, WebSocketOpener};
pub use dispatch::{Dispatcher, DispatcherBuilder, Event};
pub use error::{ConfigError, DanmakuError, Result};
pub use server_info::{ServerInfo, ServerInfoProvider, StaticServerInfo, UnavailableServerInfo};
pub use transport::{AnyTransport, Transport, TransportReader, TransportWriter};
