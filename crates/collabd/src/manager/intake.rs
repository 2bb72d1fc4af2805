//! Intake queue shared by both manager variants.

use std::net::TcpStream;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::log_sink::{LogSink, Verbosity};

use super::session::{ClientRegistry, SessionHandler};
use super::{ManagerError, ManagerKind};

enum Phase {
    Idle,
    Running {
        queue: Sender<TcpStream>,
        worker: JoinHandle<()>,
    },
    Terminated,
}

/// Queue of accepted connections drained by one background thread.
///
/// `intake` never blocks on client work: it only enqueues.
pub(crate) struct IntakeQueue {
    kind: ManagerKind,
    phase: Mutex<Phase>,
    registry: Arc<ClientRegistry>,
    log: LogSink,
}

impl IntakeQueue {
    pub(crate) fn new(kind: ManagerKind, handler: Arc<dyn SessionHandler>, log: LogSink) -> Self {
        Self {
            kind,
            phase: Mutex::new(Phase::Idle),
            registry: Arc::new(ClientRegistry::new(handler, log.clone())),
            log,
        }
    }

    pub(crate) fn start(&self) -> Result<(), ManagerError> {
        let mut phase = self.lock();
        if !matches!(*phase, Phase::Idle) {
            return Err(ManagerError::AlreadyStarted { kind: self.kind });
        }

        let (queue, pending) = mpsc::channel::<TcpStream>();
        let registry = Arc::clone(&self.registry);
        let worker = thread::Builder::new()
            .name(format!("collabd-{}-intake", self.kind))
            .spawn(move || {
                for stream in pending {
                    let _admitted = registry.admit(stream);
                }
            })
            .map_err(|source| ManagerError::Spawn {
                kind: self.kind,
                source,
            })?;
        *phase = Phase::Running { queue, worker };
        drop(phase);

        self.log.log_line(
            Verbosity::INFO,
            format_args!("{} connection manager started", self.kind),
        );
        Ok(())
    }

    pub(crate) fn intake(&self, stream: TcpStream) {
        let phase = self.lock();
        let Phase::Running { queue, .. } = &*phase else {
            drop(phase);
            self.log.log_line(
                Verbosity::WARN,
                format_args!(
                    "{} connection manager is not running; dropping connection",
                    self.kind
                ),
            );
            return;
        };
        if queue.send(stream).is_err() {
            drop(phase);
            self.log.log_line(
                Verbosity::WARN,
                format_args!(
                    "{} connection manager intake stopped; dropping connection",
                    self.kind
                ),
            );
        }
    }

    /// Stops intake, disconnects every client and joins all threads.
    ///
    /// Returns `false` when the queue had already been terminated.
    pub(crate) fn terminate(&self) -> bool {
        let previous = std::mem::replace(&mut *self.lock(), Phase::Terminated);
        match previous {
            Phase::Terminated => return false,
            Phase::Idle => {}
            Phase::Running { queue, worker } => {
                drop(queue);
                if worker.join().is_err() {
                    self.log.log_line(
                        Verbosity::WARN,
                        format_args!("{} connection manager intake thread panicked", self.kind),
                    );
                }
            }
        }
        self.registry.close_all();
        self.log.log_line(
            Verbosity::INFO,
            format_args!("{} connection manager terminated", self.kind),
        );
        true
    }

    pub(crate) fn active_connections(&self) -> usize {
        self.registry.active()
    }

    pub(crate) fn prune(&self) -> usize {
        self.registry.prune()
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
