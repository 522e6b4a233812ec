use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::connector::Helper;
use crate::io::PlainTransport;

const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Accept loop feeding a server-side helper.
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Listener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Binds `addr` and accepts connections on the helper's runtime until the
/// helper stops accepting.
pub fn bind(addr: &str, helper: &Arc<Helper<PlainTransport>>) -> anyhow::Result<Listener> {
    let std_listener =
        std::net::TcpListener::bind(addr).with_context(|| format!("failed to bind {}", addr))?;
    std_listener.set_nonblocking(true)?;
    let local_addr = std_listener.local_addr()?;

    let handle = helper.runtime()?;
    let listener = {
        let _guard = handle.enter();
        TcpListener::from_std(std_listener)?
    };

    info!("Listening on {}", local_addr);
    let task = handle.spawn(run(listener, Arc::downgrade(helper)));

    Ok(Listener { local_addr, task })
}

async fn run(listener: TcpListener, helper: Weak<Helper<PlainTransport>>) {
    let mut accepting = match helper.upgrade() {
        Some(helper) => helper.accepting(),
        None => return,
    };

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    info!("Accepted connection from {}", peer);

                    let Some(helper) = helper.upgrade() else {
                        break;
                    };
                    if let Err(e) = register(&helper, socket, peer) {
                        warn!("Unable to register connection from {}: {}", peer, e);
                    }
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                }
            },
            changed = accepting.changed() => {
                if changed.is_err() || !*accepting.borrow() {
                    break;
                }
            }
        }
    }

    info!("Listener on {} stopped", listener.local_addr().map(|a| a.to_string()).unwrap_or_default());
}

fn register(helper: &Helper<PlainTransport>, socket: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
    if helper.controller().is_overloaded() {
        warn!("Refusing connection from {}: connector overloaded", peer);
        return Ok(());
    }

    if !helper.admits(Some(peer)) {
        warn!("Refusing connection from {}: connection limit reached", peer);
        return Ok(());
    }

    let stream = socket.into_std()?;
    helper.register(PlainTransport::new(stream)?);
    Ok(())
}
