//! `doorbell-echo` — a small demonstration binary for `ivshmem-core`.
//!
//! Connects to a running ivshmem-server, logs every handshake/poll/doorbell
//! event, and echoes a doorbell back to whichever peer rang it. Not part of
//! `ivshmem-core`'s public API — it exists purely to exercise the crate
//! end-to-end.
//!
//! Echo protocol (a demo-only convention layered on top of the core, not
//! part of the ivshmem-doorbell wire protocol itself): before ringing our
//! vector 0, a peer writes its own `peer_id` as an `i32` at shared-memory
//! offset 0. On receiving a doorbell we read that offset back and ring
//! vector 0 of whichever peer it names.

mod logger;

use ivshmem_core::{ConnectOptions, Connection};
use ivshmem_proto::ErrorKind;
use std::env;
use std::sync::Arc;
use std::thread;

const SENDER_OFFSET: u64 = 0;
const ECHO_VECTOR: u16 = 0;

fn main() -> anyhow::Result<()> {
    logger::init_logger()?;

    let socket_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "/tmp/ivshmem_socket".to_string());

    let opts = ConnectOptions::new(socket_path.clone());
    let conn = Arc::new(
        Connection::connect(&opts)
            .map_err(|s| anyhow::anyhow!("failed to connect to {socket_path}: {s:?}"))?,
    );
    log::info!(
        "connected as peer {} over a {}-byte shared region",
        conn.peer_id(),
        conn.mapping_len()
    );

    let poller_conn = conn.clone();
    let poller = thread::Builder::new()
        .name("event-poller".into())
        .spawn(move || run_event_poller(poller_conn))?;

    if conn.mapping_len() < 4 {
        log::warn!("shared region is smaller than 4 bytes; echo sender-id protocol disabled");
    }

    run_echo_loop(&conn);

    // Only reached if the event poller gives up; join so its final log line
    // lands before we exit.
    let _ = poller.join();
    Ok(())
}

/// Continuously drain join/leave/new-vector events and log them. Timeouts
/// are the expected steady-state outcome and are not logged at more than
/// `trace` to avoid flooding the log every 2 seconds.
fn run_event_poller(conn: Arc<Connection>) {
    loop {
        match conn.poll_events() {
            Ok(ivshmem_core::Event::PeerLeft { peer_id }) => {
                log::info!("peer {peer_id} left");
            }
            Ok(ivshmem_core::Event::PeerVectorAdded {
                peer_id,
                vector_index,
            }) => {
                log::info!("peer {peer_id} now has {vector_index} vector(s)");
            }
            Err(status) if status.is(ErrorKind::PollServerTimeout) => {
                log::trace!("poll_events: nothing new");
            }
            Err(status) => {
                log::warn!("event poller exiting: {status:?}");
                return;
            }
        }
    }
}

/// Wait for a doorbell on our own vectors, then ring the vector named by the
/// sender convention above. Exits the process on a fatal receive error; a
/// plain timeout is the expected steady state and is retried silently.
fn run_echo_loop(conn: &Connection) {
    loop {
        match conn.poll_interrupt() {
            Ok(hits) => {
                log::info!("doorbell fired on vector(s) {hits:?}");
                echo_to_sender(conn);
            }
            Err(status) if status.is(ErrorKind::InterruptTimeout) => {
                continue;
            }
            Err(status) if status.is(ErrorKind::InterruptReceiveNoVectors) => {
                log::warn!("we own no vectors; nothing to receive doorbells on, idling");
                loop {
                    thread::park();
                }
            }
            Err(status) => {
                log::error!("doorbell receive failed: {status:?}");
                return;
            }
        }
    }
}

fn echo_to_sender(conn: &Connection) {
    if conn.mapping_len() < 4 {
        return;
    }
    let sender = match conn.view().read_i32(SENDER_OFFSET) {
        Ok(v) if (0..=0xFFFF).contains(&v) => v as u16,
        Ok(v) => {
            log::warn!("sender-id field out of peer-id range: {v}");
            return;
        }
        Err(status) => {
            log::warn!("failed to read sender-id field: {status:?}");
            return;
        }
    };

    if sender == conn.peer_id() {
        log::debug!("doorbell names ourselves as sender, not echoing");
        return;
    }

    match conn.send_interrupt(sender, ECHO_VECTOR) {
        Ok(()) => log::info!("echoed doorbell back to peer {sender}"),
        Err(status) => log::warn!("failed to echo to peer {sender}: {status:?}"),
    }
}
