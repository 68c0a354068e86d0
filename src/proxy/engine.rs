//! Engine task and its handle.
//!
//! # Responsibilities
//! - Own the [`Dispatcher`] and its [`TokioReactor`] on a single task
//! - Serialize handle commands and reactor events into dispatcher calls
//! - Tear everything down on shutdown
//!
//! # Design Decisions
//! - Two unbounded channels: one for commands from any number of
//!   [`ProxyHandle`] clones, one for I/O events from reactor helper tasks
//! - Backend URIs are validated on the caller's side so bad input fails
//!   without a round trip
//! - A stopped engine answers submissions with 503

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::options::{OptionValue, ProxyOptions};
use crate::error::{ConfigurationError, ProxyError};
use crate::load_balancer::backend::{parse_backend_uri, BackendAddr, BackendId};
use crate::net::tokio_reactor::{IoEvent, TokioReactor};
use crate::proxy::completion::{Completion, ResponseFuture};
use crate::proxy::dispatcher::{Dispatcher, ProxyStats};
use crate::proxy::request::ProxyRequest;
use crate::proxy::response::ProxyResponse;

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
enum Command {
    Submit(ProxyRequest, Completion),
    Configure(Vec<(String, OptionValue)>, Reply<Result<(), ConfigurationError>>),
    ReplaceOptions(ProxyOptions),
    AddBackend(BackendAddr, Reply<BackendId>),
    Stats(Reply<ProxyStats>),
    Shutdown,
}

/// Cloneable front door to a running [`ProxyEngine`].
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ProxyHandle {
    /// Forward a request. Resolves to 503 if the engine is not running.
    pub fn submit(&self, request: ProxyRequest) -> ResponseFuture {
        let (completion, future) = Completion::channel();
        if let Err(mpsc::error::SendError(Command::Submit(_, completion))) =
            self.commands.send(Command::Submit(request, completion))
        {
            completion.settle(ProxyResponse::service_unavailable());
        }
        future
    }

    pub async fn add_backend(&self, uri: &str) -> Result<BackendId, ProxyError> {
        let addr = parse_backend_uri(uri)?;
        self.request(|reply| Command::AddBackend(addr, reply)).await
    }

    /// Apply options atomically; see [`ProxyOptions::set_option`] for keys.
    pub async fn configure<I, K>(&self, options: I) -> Result<(), ProxyError>
    where
        I: IntoIterator<Item = (K, OptionValue)>,
        K: Into<String>,
    {
        let options = options.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.request(|reply| Command::Configure(options, reply))
            .await?
            .map_err(ProxyError::from)
    }

    /// Swap in an already validated option set.
    pub fn replace_options(&self, options: ProxyOptions) -> Result<(), ProxyError> {
        self.commands
            .send(Command::ReplaceOptions(options))
            .map_err(|_| ProxyError::EngineStopped)
    }

    pub async fn stats(&self) -> Result<ProxyStats, ProxyError> {
        self.request(Command::Stats).await
    }

    /// Ask the engine to stop. Returns immediately.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, ProxyError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| ProxyError::EngineStopped)?;
        rx.await.map_err(|_| ProxyError::EngineStopped)
    }
}

/// The single task that owns all proxy state.
#[derive(Debug)]
pub struct ProxyEngine {
    dispatcher: Dispatcher<TokioReactor>,
    commands: mpsc::UnboundedReceiver<Command>,
    io_events: mpsc::UnboundedReceiver<IoEvent>,
}

impl ProxyEngine {
    pub fn new(options: ProxyOptions) -> (Self, ProxyHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        let engine = Self {
            dispatcher: Dispatcher::new(TokioReactor::new(io_tx), options),
            commands: command_rx,
            io_events: io_rx,
        };
        (engine, ProxyHandle { commands: command_tx })
    }

    /// Create an engine and run it on its own task.
    pub fn spawn(
        options: ProxyOptions,
        shutdown: broadcast::Receiver<()>,
    ) -> (ProxyHandle, JoinHandle<()>) {
        let (engine, handle) = Self::new(options);
        let task = tokio::spawn(engine.run(shutdown));
        (handle, task)
    }

    /// Process events until shutdown is broadcast, a handle asks to stop,
    /// or every handle is dropped.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Proxy engine started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                Some(event) = self.io_events.recv() => self.handle_io(event),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
        }

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Submit(_, completion) = command {
                completion.settle(ProxyResponse::service_unavailable());
            }
        }
        self.dispatcher.shutdown();
        tracing::info!("Proxy engine stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit(request, completion) => self.dispatcher.submit(request, completion),
            Command::Configure(options, reply) => {
                let _ = reply.send(self.dispatcher.configure(options));
            }
            Command::ReplaceOptions(options) => self.dispatcher.replace_options(options),
            Command::AddBackend(addr, reply) => {
                let _ = reply.send(self.dispatcher.add_backend_addr(addr));
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.dispatcher.stats());
            }
            Command::Shutdown => {}
        }
    }

    fn handle_io(&mut self, event: IoEvent) {
        match event {
            IoEvent::Connected(conn, Ok(stream)) => {
                self.dispatcher.reactor_mut().adopt(conn, stream);
                self.dispatcher.on_connect_resolved(conn, Ok(()));
            }
            IoEvent::Connected(conn, Err(error)) => {
                self.dispatcher.on_connect_resolved(conn, Err(error));
            }
            IoEvent::Data(conn, bytes) => self.dispatcher.on_data(conn, &bytes),
            IoEvent::Eof(conn) => self.dispatcher.on_eof(conn),
            IoEvent::ReadFault(conn, error) => self.dispatcher.on_read_fault(conn, &error),
            IoEvent::Writable(conn) => self.dispatcher.on_writable(conn),
            IoEvent::Deferred(task) => self.dispatcher.run_deferred(task),
        }
    }
}
