//! One-shot readiness gates.
//!
//! A gate starts pending and moves exactly once, either to ready (the owning
//! setup step finished) or to aborted (it failed). Waiters poll in bounded
//! ticks so they observe cancellation and deadlines without a signal.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("timed out after {waited:?} waiting for {gate}")]
    Timeout { gate: &'static str, waited: Duration },

    #[error("cancelled while waiting for {gate}")]
    Cancelled { gate: &'static str },

    #[error("{gate} will never become ready")]
    Aborted { gate: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Pending,
    Ready,
    Aborted,
}

pub struct ReadinessGate {
    name: &'static str,
    state: Mutex<GateState>,
    cond: Condvar,
}

impl ReadinessGate {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(GateState::Pending),
            cond: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Opens the gate and wakes every waiter. Returns false if the gate had
    /// already left the pending state.
    pub fn signal(&self) -> bool {
        self.settle(GateState::Ready)
    }

    /// Marks the gate as never opening. Waiters fail with
    /// [`GateError::Aborted`]. A gate that is already ready stays ready.
    pub fn abort(&self) -> bool {
        self.settle(GateState::Aborted)
    }

    fn settle(&self, to: GateState) -> bool {
        let mut state = self.state.lock();
        if *state != GateState::Pending {
            return false;
        }
        *state = to;
        self.cond.notify_all();
        true
    }

    pub fn is_ready(&self) -> bool {
        *self.state.lock() == GateState::Ready
    }

    /// Blocks until the gate opens, re-checking `cancel` and the optional
    /// `timeout` every `poll` tick.
    pub fn wait(
        &self,
        poll: Duration,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<(), GateError> {
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        let mut state = self.state.lock();
        loop {
            match *state {
                GateState::Ready => return Ok(()),
                GateState::Aborted => return Err(GateError::Aborted { gate: self.name }),
                GateState::Pending => {}
            }
            if cancel.is_cancelled() {
                return Err(GateError::Cancelled { gate: self.name });
            }
            let tick = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(GateError::Timeout {
                            gate: self.name,
                            waited: now - started,
                        });
                    }
                    poll.min(deadline - now)
                }
                None => poll,
            };
            self.cond.wait_for(&mut state, tick);
        }
    }
}

impl std::fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("name", &self.name)
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    const TICK: Duration = Duration::from_millis(5);

    #[test]
    fn signal_releases_all_waiters() {
        let gate = Arc::new(ReadinessGate::new("video context"));
        let cancel = CancellationToken::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                let cancel = cancel.clone();
                thread::spawn(move || gate.wait(TICK, None, &cancel))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        assert!(gate.signal());
        for w in waiters {
            assert_eq!(w.join().unwrap(), Ok(()));
        }
    }

    #[test]
    fn signal_is_one_shot() {
        let gate = ReadinessGate::new("audio context");
        assert!(gate.signal());
        assert!(!gate.signal());
        assert!(!gate.abort());
        assert!(gate.is_ready());
        let cancel = CancellationToken::new();
        assert_eq!(gate.wait(TICK, Some(Duration::ZERO), &cancel), Ok(()));
    }

    #[test]
    fn wait_times_out_when_never_signalled() {
        let gate = ReadinessGate::new("container");
        let cancel = CancellationToken::new();
        let err = gate
            .wait(TICK, Some(Duration::from_millis(30)), &cancel)
            .unwrap_err();
        match err {
            GateError::Timeout { gate, waited } => {
                assert_eq!(gate, "container");
                assert!(waited >= Duration::from_millis(30));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cancellation_releases_waiter() {
        let gate = Arc::new(ReadinessGate::new("container"));
        let cancel = CancellationToken::new();
        let handle = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            thread::spawn(move || gate.wait(TICK, None, &cancel))
        };
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert_eq!(
            handle.join().unwrap(),
            Err(GateError::Cancelled { gate: "container" })
        );
        assert!(!gate.is_ready());
    }

    #[test]
    fn abort_fails_waiters() {
        let gate = Arc::new(ReadinessGate::new("video context"));
        let cancel = CancellationToken::new();
        let handle = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            thread::spawn(move || gate.wait(TICK, None, &cancel))
        };
        thread::sleep(Duration::from_millis(10));
        assert!(gate.abort());
        assert_eq!(
            handle.join().unwrap(),
            Err(GateError::Aborted {
                gate: "video context"
            })
        );
        assert!(!gate.signal());
    }
}
