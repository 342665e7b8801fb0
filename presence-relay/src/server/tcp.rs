use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    select,
    sync::{
        Notify,
        mpsc::{self, error::TrySendError},
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    broadcast::{Broadcaster, PeerLink},
    codec::{
        encode, encode_hello, encode_leave, encode_user_list, normalize_alias, read_line,
        write_frame,
    },
    registry::PresenceRegistry,
};

pub type PeerId = u64;

/// Frames a connection may have queued before it counts as stalled.
const OUTBOX_CAPACITY: usize = 128;

/// Sending side of a connection's outbox. The registry holds the only
/// long-lived copy, so evicting a peer closes its outbox. Eviction also
/// wakes the session, which may be stuck behind a stalled socket write.
#[derive(Clone)]
pub struct Outbox {
    frames: mpsc::Sender<Vec<u8>>,
    evicted: Arc<Notify>,
}

impl Outbox {
    fn eviction(&self) -> Arc<Notify> {
        Arc::clone(&self.evicted)
    }
}

impl PeerLink for Outbox {
    const EVICT_ON_FAILURE: bool = true;

    async fn deliver(&self, frame: &[u8]) -> io::Result<()> {
        self.frames.try_send(frame.to_vec()).map_err(|err| match err {
            TrySendError::Full(_) => io::Error::new(io::ErrorKind::WouldBlock, "outbox full"),
            TrySendError::Closed(_) => {
                io::Error::new(io::ErrorKind::BrokenPipe, "connection closed")
            }
        })
    }

    fn evicted(&self) {
        self.evicted.notify_one();
    }
}

fn outbox() -> (Outbox, mpsc::Receiver<Vec<u8>>) {
    let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
    let link = Outbox {
        frames: tx,
        evicted: Arc::new(Notify::new()),
    };
    (link, rx)
}

/// Why a session's receive loop stopped.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    HungUp,
    OutboxClosed,
    Evicted,
}

pub struct TcpRelay {
    listener: TcpListener,
    state: Arc<RelayState>,
}

impl TcpRelay {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            state: Arc::new(RelayState::new()),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let TcpRelay { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("tcp relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(result: io::Result<(TcpStream, SocketAddr)>, state: &Arc<RelayState>) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<RelayState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, state).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

struct RelayState {
    broadcaster: Broadcaster<PeerId, Outbox>,
    next_id: AtomicU64,
}

impl RelayState {
    fn new() -> Self {
        Self {
            broadcaster: Broadcaster::new(Arc::new(PresenceRegistry::new())),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> PeerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn registry(&self) -> &PresenceRegistry<PeerId, Outbox> {
        self.broadcaster.registry()
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<RelayState>,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut writer = writer;

    let Some(alias) = perform_handshake(&mut reader).await? else {
        debug!(%peer, "connection closed before alias");
        return Ok(());
    };

    let (link, inbox) = outbox();
    let evicted = link.eviction();
    let mut session = Session::register(&state, alias, link, peer).await;

    if let Err(err) = send_user_list(&mut writer, &session.seed).await {
        session.depart().await;
        return Err(err.into());
    }
    let mut writer_task = spawn_outbox_writer(inbox, writer);
    session.announce_join().await;

    let result = run_client_session(&session, &mut reader, &mut writer_task, &evicted).await;
    session.depart().await;

    match result {
        // The writer may be blocked on a peer that stopped reading.
        Ok(SessionEnd::Evicted) => writer_task.abort(),
        // The outbox sender went away with the registry entry; let the
        // writer flush whatever was queued and close the socket.
        _ if !writer_task.is_finished() => {
            let _ = writer_task.await;
        }
        _ => {}
    }

    result.map(|_| ())
}

/// Reads the alias line. `None` when the peer hung up first.
async fn perform_handshake<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    Ok(read_line(reader).await?.map(|line| normalize_alias(&line)))
}

async fn send_user_list<W>(writer: &mut W, others: &[String]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if others.is_empty() {
        return Ok(());
    }
    write_frame(writer, encode_user_list(others).as_bytes()).await
}

fn spawn_outbox_writer(
    mut inbox: mpsc::Receiver<Vec<u8>>,
    mut writer: OwnedWriteHalf,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = inbox.recv().await {
            if let Err(err) = write_frame(&mut writer, &frame).await {
                debug!(?err, "failed to write to client");
                return;
            }
        }
        if let Err(err) = writer.shutdown().await {
            debug!(?err, "failed to shutdown client writer");
        }
    })
}

async fn run_client_session<R>(
    session: &Session<'_>,
    reader: &mut R,
    writer_task: &mut JoinHandle<()>,
    evicted: &Notify,
) -> Result<SessionEnd>
where
    R: AsyncBufRead + Unpin,
{
    let evicted = evicted.notified();
    tokio::pin!(evicted);

    loop {
        select! {
            line = read_line(reader) => {
                match line? {
                    Some(text) => session.relay_line(&text).await,
                    None => return Ok(SessionEnd::HungUp),
                }
            }
            _ = &mut evicted => {
                debug!(peer = session.id, "evicted after failed delivery");
                return Ok(SessionEnd::Evicted);
            }
            _ = &mut *writer_task => {
                debug!(peer = session.id, "outbox closed");
                return Ok(SessionEnd::OutboxClosed);
            }
        }
    }
}

/// One registered connection, from registration to teardown.
struct Session<'a> {
    state: &'a RelayState,
    id: PeerId,
    alias: String,
    addr: SocketAddr,
    seed: Vec<String>,
    departed: bool,
}

impl<'a> Session<'a> {
    async fn register(
        state: &'a RelayState,
        alias: String,
        link: Outbox,
        addr: SocketAddr,
    ) -> Self {
        let id = state.next_id();
        let seed = state.registry().register(id, alias.clone(), link).await;
        let online = state.registry().len().await;
        info!(%addr, %alias, online, "client connected");

        Self {
            state,
            id,
            alias,
            addr,
            seed,
            departed: false,
        }
    }

    async fn announce_join(&self) {
        self.fan_out(&encode_hello(&self.alias)).await;
    }

    async fn relay_line(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.fan_out(&encode(&self.alias, text)).await;
    }

    async fn fan_out(&self, frame: &str) {
        let report = self
            .state
            .broadcaster
            .broadcast(frame.as_bytes(), Some(&self.id))
            .await;
        if !report.failed.is_empty() {
            debug!(
                peer = self.id,
                delivered = report.delivered.len(),
                evicted = report.failed.len(),
                "fan-out evicted peers"
            );
        }
    }

    /// Leaves the registry and tells everyone else. Runs once; later calls
    /// return without touching the registry or broadcasting.
    async fn depart(&mut self) {
        if self.departed {
            return;
        }
        self.departed = true;

        // The entry is already gone if a fan-out evicted this peer.
        self.state.registry().unregister(&self.id).await;
        let remaining = self.state.registry().len().await;
        info!(
            addr = %self.addr,
            alias = %self.alias,
            remaining,
            "client disconnected"
        );

        self.fan_out(&encode_leave(&self.alias)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    #[tokio::test]
    async fn teardown_runs_once() {
        let state = RelayState::new();
        let (watcher_link, mut watcher_inbox) = outbox();
        state
            .registry()
            .register(state.next_id(), "watcher".into(), watcher_link)
            .await;

        let (link, _inbox) = outbox();
        let mut session = Session::register(&state, "bob".into(), link, addr()).await;
        assert_eq!(session.seed, vec!["watcher".to_string()]);

        session.depart().await;
        session.depart().await;

        assert!(!state.registry().contains(&session.id).await);
        assert_eq!(
            watcher_inbox.try_recv().expect("leave frame"),
            b"[bob] __LEAVE__".to_vec()
        );
        assert!(watcher_inbox.try_recv().is_err(), "only one leave expected");
    }

    #[tokio::test]
    async fn evicted_peer_still_announces_its_leave() {
        let state = RelayState::new();
        let (watcher_link, mut watcher_inbox) = outbox();
        state
            .registry()
            .register(state.next_id(), "watcher".into(), watcher_link)
            .await;

        let (link, inbox) = outbox();
        let mut session = Session::register(&state, "bob".into(), link, addr()).await;
        drop(inbox);

        // A chat from the watcher fails to reach bob and evicts him.
        let report = state.broadcaster.broadcast(b"[watcher] hi", Some(&1)).await;
        assert_eq!(report.failed, vec![session.id]);
        assert!(!state.registry().contains(&session.id).await);
        assert!(watcher_inbox.try_recv().is_err());

        session.depart().await;
        assert_eq!(
            watcher_inbox.try_recv().expect("leave frame"),
            b"[bob] __LEAVE__".to_vec()
        );
    }

    #[tokio::test]
    async fn overflowing_outbox_evicts_and_wakes_the_session() {
        let state = RelayState::new();
        let (watcher_link, _watcher_inbox) = outbox();
        state
            .registry()
            .register(state.next_id(), "watcher".into(), watcher_link)
            .await;

        // Bob's inbox stays alive but is never drained.
        let (link, _stalled_inbox) = outbox();
        let evicted = link.eviction();
        let session = Session::register(&state, "bob".into(), link, addr()).await;

        for n in 0..OUTBOX_CAPACITY {
            let report = state
                .broadcaster
                .broadcast(format!("[watcher] {n}").as_bytes(), Some(&1))
                .await;
            assert!(report.failed.is_empty(), "frame {n} should fit");
        }
        assert!(state.registry().contains(&session.id).await);

        let report = state.broadcaster.broadcast(b"[watcher] one too many", Some(&1)).await;
        assert_eq!(report.failed, vec![session.id]);
        assert!(!state.registry().contains(&session.id).await);

        tokio::time::timeout(std::time::Duration::from_secs(1), evicted.notified())
            .await
            .expect("eviction should wake the session");
    }

    #[tokio::test]
    async fn blank_lines_are_not_relayed() {
        let state = RelayState::new();
        let (watcher_link, mut watcher_inbox) = outbox();
        state
            .registry()
            .register(state.next_id(), "watcher".into(), watcher_link)
            .await;

        let (link, _inbox) = outbox();
        let session = Session::register(&state, "bob".into(), link, addr()).await;
        session.relay_line("   ").await;
        session.relay_line("").await;
        session.relay_line("__LEAVE__").await;

        // No escaping exists, so literal control text is relayed as typed.
        assert_eq!(
            watcher_inbox.try_recv().expect("relayed frame"),
            b"[bob] __LEAVE__".to_vec()
        );
        assert!(watcher_inbox.try_recv().is_err());
    }
}
