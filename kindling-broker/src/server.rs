//! The accept loop: binds a listener, spawns a read/write task pair per
//! accepted connection, and owns the lifetime of the single protocol
//! worker every connection shares.

use std::sync::Arc;
use std::time::Duration;

use kindling_storage::RetainedMessageStore;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::auth::AuthConfig;
use crate::broker::{Broker, WorkerMessage};
use crate::connection::{new_write_channel, run_write_task, Connection};
use crate::error::ServerError;
use crate::stats::Stats;

const WORKER_QUEUE_CAPACITY: usize = 1024;
const MAX_BACKOFF: Duration = Duration::from_secs(64);

pub struct Listener {
    listener: TcpListener,
    worker_tx: mpsc::Sender<WorkerMessage>,
    stats: Arc<Stats>,
}

impl Listener {
    /// Binds `addr`, spawns the protocol worker over `storage`, and
    /// returns a `Listener` ready to `run`.
    pub async fn bind<S>(addr: impl tokio::net::ToSocketAddrs, storage: Arc<S>, auth: AuthConfig) -> Result<Self, ServerError>
    where
        S: RetainedMessageStore + 'static,
    {
        let listener = TcpListener::bind(addr).await?;

        let broker = Broker::new(storage, auth);
        let stats = broker.stats();
        let (worker_tx, worker_rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
        tokio::spawn(broker.run(worker_rx));

        Ok(Self {
            listener,
            worker_tx,
            stats,
        })
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Accepts connections until the process is torn down. Transient
    /// accept errors back off exponentially (1s doubling to a 64s cap)
    /// rather than spinning or exiting.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        let mut backoff = Duration::from_secs(1);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    backoff = Duration::from_secs(1);
                    let worker_tx = self.worker_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, worker_tx).await {
                            warn!(%peer, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, backoff = ?backoff, "accept failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, worker_tx: mpsc::Sender<WorkerMessage>) -> kindling_core::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut connection = Connection::new(read_half);

    let first_packet = match connection.read_packet().await? {
        Some(packet) => packet,
        None => return Ok(()),
    };

    let connect = match first_packet {
        kindling_packets::ControlPacket::Connect(c) => c,
        _ => {
            warn!("first packet on a new connection was not CONNECT, closing");
            return Ok(());
        }
    };

    let (write_tx, write_rx) = new_write_channel();
    let (reply_tx, reply_rx) = oneshot::channel();
    let (close_tx, mut close_rx) = oneshot::channel();

    worker_tx
        .send(WorkerMessage::Connect {
            connect,
            writer: write_tx.clone(),
            close: close_tx,
            reply: reply_tx,
        })
        .await
        .map_err(|_| kindling_core::error::WireError::ProtocolError)?;

    let decision = reply_rx.await.map_err(|_| kindling_core::error::WireError::ProtocolError)?;

    tokio::spawn(run_write_task(write_half, write_rx));

    if !decision.accepted {
        return Ok(());
    }

    info!(client_id = %decision.client_id, "client connected");
    let client_id = decision.client_id;

    loop {
        tokio::select! {
            // The protocol worker decided this connection must end (a
            // duplicate client id, a protocol error) — stop reading and let
            // the function return, dropping the socket and this task's
            // write-channel sender.
            _ = &mut close_rx => {
                info!(%client_id, "connection force-closed by protocol worker");
                break;
            }
            result = connection.read_packet() => match result {
                Ok(Some(packet)) => {
                    let is_disconnect = matches!(packet, kindling_packets::ControlPacket::Disconnect(_));
                    if worker_tx
                        .send(WorkerMessage::Packet {
                            client_id: Arc::clone(&client_id),
                            packet,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                    if is_disconnect {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = worker_tx
                        .send(WorkerMessage::Disconnected {
                            client_id: Arc::clone(&client_id),
                        })
                        .await;
                    break;
                }
                Err(e) => {
                    crate::connection::log_read_error(&client_id, &e);
                    let _ = worker_tx
                        .send(WorkerMessage::Disconnected {
                            client_id: Arc::clone(&client_id),
                        })
                        .await;
                    break;
                }
            },
        }
    }

    info!(%client_id, "client disconnected");
    Ok(())
}
