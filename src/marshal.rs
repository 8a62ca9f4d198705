//! Running work on the host's privileged thread
//!
//! Some host automation APIs may only be called from the host's main
//! thread. The poller runs on its own thread, so handlers flagged
//! [`Affinity::HostThread`](crate::registry::Affinity::HostThread) are
//! handed to a [`ThreadMarshal`], which runs them on the privileged thread
//! and blocks the poller until the result is back.
//!
//! ```text
//! poller thread                        host (privileged) thread
//! ─────────────                        ────────────────────────
//! HostMarshal::submit(work) ──task──►  HostPump::run_pending()
//!        (blocks)                          work()
//!        ◄────────────────result──────     reply
//! ```
//!
//! A host binding with its own "execute on main thread" primitive can
//! implement [`ThreadMarshal`] directly instead of using the pump.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::registry::{HandlerError, HandlerResult};

/// A unit of work destined for the privileged thread
pub type HostWork = Box<dyn FnOnce() -> HandlerResult + Send + 'static>;

/// Failures of the marshal itself, as opposed to failures of the work
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    #[error("Host thread unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Host thread did not run the work within {waited_ms}ms")]
    TimedOut { waited_ms: u64 },
}

/// Executes work on the host's privileged thread
pub trait ThreadMarshal: Send + Sync {
    /// Run `work` on the privileged thread and wait for its result.
    ///
    /// Blocks while the host thread is busy. Fails fast with
    /// [`MarshalError::Unavailable`] when the host thread is gone.
    fn submit(&self, work: HostWork) -> Result<HandlerResult, MarshalError>;
}

/// Run work, turning a panic into a handler error
pub fn run_guarded(work: HostWork) -> HandlerResult {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::panicked(payload.as_ref())),
    }
}

/// Marshal that runs work on the calling thread.
///
/// For hosts without thread restrictions, and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineMarshal;

impl ThreadMarshal for InlineMarshal {
    fn submit(&self, work: HostWork) -> Result<HandlerResult, MarshalError> {
        Ok(run_guarded(work))
    }
}

struct HostTask {
    work: HostWork,
    reply: mpsc::SyncSender<HandlerResult>,
}

/// Create a connected marshal/pump pair.
///
/// The [`HostPump`] must stay on (and be driven by) the privileged thread.
/// The [`HostMarshal`] can be cloned and shared with any thread.
pub fn host_channel() -> (HostMarshal, HostPump) {
    let (tx, rx) = mpsc::channel();
    (
        HostMarshal {
            tx,
            submit_timeout: None,
        },
        HostPump { rx },
    )
}

/// Sending half: submits work to the privileged thread
#[derive(Clone)]
pub struct HostMarshal {
    tx: mpsc::Sender<HostTask>,
    submit_timeout: Option<Duration>,
}

impl HostMarshal {
    /// Give up waiting after `timeout`.
    ///
    /// The work may still run later on the host thread; only the wait is
    /// abandoned.
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = Some(timeout);
        self
    }
}

impl ThreadMarshal for HostMarshal {
    fn submit(&self, work: HostWork) -> Result<HandlerResult, MarshalError> {
        let (reply, result_rx) = mpsc::sync_channel(1);
        self.tx
            .send(HostTask { work, reply })
            .map_err(|_| MarshalError::Unavailable {
                reason: "host pump has shut down".to_string(),
            })?;

        let dropped = || MarshalError::Unavailable {
            reason: "host pump shut down before running the work".to_string(),
        };
        match self.submit_timeout {
            None => result_rx.recv().map_err(|_| dropped()),
            Some(timeout) => result_rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => MarshalError::TimedOut {
                    waited_ms: timeout.as_millis() as u64,
                },
                RecvTimeoutError::Disconnected => dropped(),
            }),
        }
    }
}

/// Receiving half: drained on the privileged thread.
///
/// Dropping the pump makes every pending and future `submit` fail with
/// [`MarshalError::Unavailable`].
pub struct HostPump {
    rx: mpsc::Receiver<HostTask>,
}

impl HostPump {
    /// Run all queued work without blocking; returns how many ran.
    ///
    /// Meant to be called from the host's own event loop or timer.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(task) => {
                    Self::execute(task);
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Run work as it arrives until `stop` returns true.
    ///
    /// `stop` is checked at least every `check_every`.
    pub fn run_until<F>(&self, check_every: Duration, stop: F)
    where
        F: Fn() -> bool,
    {
        while !stop() {
            match self.rx.recv_timeout(check_every) {
                Ok(task) => Self::execute(task),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// Run work until every marshal has been dropped
    pub fn run(&self) {
        while let Ok(task) = self.rx.recv() {
            Self::execute(task);
        }
    }

    /// Run work for at most `budget`
    pub fn run_for(&self, budget: Duration) {
        let deadline = Instant::now() + budget;
        self.run_until(Duration::from_millis(20), || Instant::now() >= deadline);
    }

    fn execute(task: HostTask) {
        let result = run_guarded(task.work);
        // The submitter may have timed out and gone away
        let _ = task.reply.send(result);
    }
}
