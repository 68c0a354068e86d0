//! Tokio-backed [`Reactor`].
//!
//! # Responsibilities
//! - Run connects, read watchers, write watchers and timers as small tasks
//! - Post every outcome as an [`IoEvent`] into the engine's channel
//! - Own the sockets so the dispatcher can write without awaiting
//!
//! # Design Decisions
//! - Helper tasks never touch dispatcher state; they only send events
//! - Writability is a one-shot watcher, re-armed on demand
//! - Closing a connection aborts its tasks and drops the socket

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::load_balancer::backend::BackendAddr;
use crate::net::connection::ConnectionId;
use crate::net::reactor::{Deferred, Reactor};

/// Outcome of reactor work, consumed by the engine loop.
#[derive(Debug)]
pub enum IoEvent {
    Connected(ConnectionId, io::Result<TcpStream>),
    Data(ConnectionId, Bytes),
    Eof(ConnectionId),
    ReadFault(ConnectionId, io::Error),
    Writable(ConnectionId),
    Deferred(Deferred),
}

#[derive(Debug, Default)]
struct Watchers {
    connect: Option<JoinHandle<()>>,
    read: Option<JoinHandle<()>>,
    write: Option<JoinHandle<()>>,
}

impl Watchers {
    fn abort(self) {
        for handle in [self.connect, self.read, self.write].into_iter().flatten() {
            handle.abort();
        }
    }
}

#[derive(Debug)]
pub struct TokioReactor {
    events: mpsc::UnboundedSender<IoEvent>,
    streams: HashMap<ConnectionId, Arc<TcpStream>>,
    watchers: HashMap<ConnectionId, Watchers>,
    timers: Vec<JoinHandle<()>>,
}

impl TokioReactor {
    pub fn new(events: mpsc::UnboundedSender<IoEvent>) -> Self {
        Self {
            events,
            streams: HashMap::new(),
            watchers: HashMap::new(),
            timers: Vec::new(),
        }
    }

    /// Take ownership of a freshly connected socket.
    pub fn adopt(&mut self, conn: ConnectionId, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(connection_id = %conn, error = %e, "Failed to set TCP_NODELAY");
        }
        if let Some(watchers) = self.watchers.get_mut(&conn) {
            watchers.connect = None;
        }
        self.streams.insert(conn, Arc::new(stream));
    }

    /// Number of sockets currently held.
    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }
}

impl Reactor for TokioReactor {
    fn connect(&mut self, conn: ConnectionId, addr: &BackendAddr) -> io::Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(io::Error::other)?;

        let host = addr
            .host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = addr.port;
        let events = self.events.clone();

        let handle = runtime.spawn(async move {
            let result = TcpStream::connect((host.as_str(), port)).await;
            let _ = events.send(IoEvent::Connected(conn, result));
        });
        self.watchers.entry(conn).or_default().connect = Some(handle);
        Ok(())
    }

    fn watch(&mut self, conn: ConnectionId, read_limit: usize) {
        let Some(stream) = self.streams.get(&conn).cloned() else {
            return;
        };
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; read_limit.max(1)];
            loop {
                if let Err(e) = stream.readable().await {
                    let _ = events.send(IoEvent::ReadFault(conn, e));
                    return;
                }
                let event = match stream.try_read(&mut buf) {
                    Ok(0) => IoEvent::Eof(conn),
                    Ok(n) => IoEvent::Data(conn, Bytes::copy_from_slice(&buf[..n])),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => IoEvent::ReadFault(conn, e),
                };
                let last = !matches!(event, IoEvent::Data(..));
                if events.send(event).is_err() || last {
                    return;
                }
            }
        });

        let watchers = self.watchers.entry(conn).or_default();
        if let Some(previous) = watchers.read.replace(handle) {
            previous.abort();
        }
    }

    fn enable_writable(&mut self, conn: ConnectionId) {
        let Some(stream) = self.streams.get(&conn).cloned() else {
            return;
        };
        let watchers = self.watchers.entry(conn).or_default();
        if watchers.write.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let events = self.events.clone();
        watchers.write = Some(tokio::spawn(async move {
            match stream.writable().await {
                Ok(()) => {
                    let _ = events.send(IoEvent::Writable(conn));
                }
                Err(e) => {
                    let _ = events.send(IoEvent::ReadFault(conn, e));
                }
            }
        }));
    }

    fn disable_writable(&mut self, conn: ConnectionId) {
        if let Some(handle) = self.watchers.get_mut(&conn).and_then(|w| w.write.take()) {
            handle.abort();
        }
    }

    fn try_write(&mut self, conn: ConnectionId, buf: &[u8]) -> io::Result<usize> {
        match self.streams.get(&conn) {
            Some(stream) => stream.try_write(buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn close(&mut self, conn: ConnectionId) {
        if let Some(watchers) = self.watchers.remove(&conn) {
            watchers.abort();
        }
        self.streams.remove(&conn);
    }

    fn immediately(&mut self, task: Deferred) {
        let _ = self.events.send(IoEvent::Deferred(task));
    }

    fn once(&mut self, delay: Duration, task: Deferred) {
        self.timers.retain(|handle| !handle.is_finished());
        let events = self.events.clone();
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(IoEvent::Deferred(task));
        }));
    }

    fn cancel_all(&mut self) {
        for (_, watchers) in self.watchers.drain() {
            watchers.abort();
        }
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        self.streams.clear();
    }
}

impl Drop for TokioReactor {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn addr_of(listener: &TcpListener) -> BackendAddr {
        let local = listener.local_addr().unwrap();
        BackendAddr {
            host: local.ip().to_string(),
            port: local.port(),
        }
    }

    #[tokio::test]
    async fn connect_watch_and_write() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reactor = TokioReactor::new(tx);
        let conn = ConnectionId::new(1);

        reactor.connect(conn, &addr_of(&listener)).unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        match rx.recv().await.unwrap() {
            IoEvent::Connected(id, Ok(stream)) => {
                assert_eq!(id, conn);
                reactor.adopt(conn, stream);
            }
            other => panic!("unexpected event {other:?}"),
        }
        reactor.watch(conn, 4);

        assert_eq!(reactor.try_write(conn, b"ping").unwrap(), 4);
        let mut received = [0u8; 4];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"ping");

        peer.write_all(b"pong!").await.unwrap();
        let mut collected = Vec::new();
        while collected.len() < 5 {
            match rx.recv().await.unwrap() {
                IoEvent::Data(_, bytes) => {
                    assert!(bytes.len() <= 4);
                    collected.extend_from_slice(&bytes);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(collected, b"pong!");

        drop(peer);
        assert!(matches!(rx.recv().await.unwrap(), IoEvent::Eof(id) if id == conn));

        reactor.close(conn);
        assert_eq!(reactor.open_streams(), 0);
        assert!(reactor.try_write(conn, b"x").is_err());
    }

    #[tokio::test]
    async fn refused_connect_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = addr_of(&listener);
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reactor = TokioReactor::new(tx);
        reactor.connect(ConnectionId::new(9), &addr).unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            IoEvent::Connected(_, Err(_))
        ));
    }

    #[tokio::test]
    async fn deferred_tasks_are_posted() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reactor = TokioReactor::new(tx);
        let backend = crate::load_balancer::backend::BackendId::new(0);

        reactor.once(Duration::from_millis(10), Deferred::Reconnect(backend));
        reactor.immediately(Deferred::InitialConnect(backend));

        assert!(matches!(
            rx.recv().await.unwrap(),
            IoEvent::Deferred(Deferred::InitialConnect(_))
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            IoEvent::Deferred(Deferred::Reconnect(_))
        ));
    }

    #[test]
    fn connect_outside_runtime_fails_to_initiate() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut reactor = TokioReactor::new(tx);
        let addr = BackendAddr {
            host: "127.0.0.1".into(),
            port: 1,
        };
        assert!(reactor.connect(ConnectionId::new(1), &addr).is_err());
    }
}
