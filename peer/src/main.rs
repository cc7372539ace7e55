mod session;

use linkwatch_shared::Frame;
use session::{PeerSession, SessionConfig};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn env_secs(key: &str) -> anyhow::Result<Option<Duration>> {
    match std::env::var(key) {
        Ok(raw) => Ok(Some(Duration::from_secs(raw.trim().parse()?))),
        Err(_) => Ok(None),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let addr = std::env::var("LINKWATCH_PEER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let config = SessionConfig {
        mute_after: env_secs("LINKWATCH_PEER_MUTE_AFTER_SECS")?,
    };
    let data_every = env_secs("LINKWATCH_PEER_DATA_SECS")?;

    let listener = TcpListener::bind(&addr).await?;
    info!("[PEER] Listening on {}", addr);
    if let Some(after) = config.mute_after {
        info!("[PEER] Challenges go unanswered after {:?}", after);
    }

    loop {
        let (socket, remote) = listener.accept().await?;
        socket.set_nodelay(true)?;
        let session = PeerSession::new(socket, remote.to_string(), config);

        if let Some(every) = data_every {
            let handle = session.handle();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let frame = Frame::data(handle.next_sequence_id(), b"peer status".to_vec());
                    if handle.send(&frame).await.is_err() {
                        break;
                    }
                }
            });
        }

        tokio::spawn(async move {
            if let Err(e) = session.run().await {
                warn!("[PEER] Session {} ended with error: {}", remote, e);
            }
        });
    }
}
