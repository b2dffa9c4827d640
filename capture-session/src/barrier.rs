//! Two-of-two completion join.

use parking_lot::Mutex;

use crate::stream::StreamKind;

/// What an arrival at the barrier turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// First stream to finish; the other is still running.
    First,
    /// Completed the pair. Handed out exactly once.
    Last,
    /// This stream had already arrived.
    Repeated,
}

#[derive(Debug)]
struct BarrierState {
    remaining: u8,
    arrived: [bool; 2],
}

#[derive(Debug)]
pub struct FinalizeBarrier {
    inner: Mutex<BarrierState>,
}

impl Default for FinalizeBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalizeBarrier {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BarrierState {
                remaining: 2,
                arrived: [false; 2],
            }),
        }
    }

    /// Records `stream` as done and runs `f` with the outcome while the
    /// barrier lock is still held, so work done for [`Arrival::Last`] cannot
    /// overlap with the other stream's arrival.
    pub fn arrive<R>(&self, stream: StreamKind, f: impl FnOnce(Arrival) -> R) -> R {
        let mut state = self.inner.lock();
        let slot = &mut state.arrived[stream.index()];
        let arrival = if *slot {
            Arrival::Repeated
        } else {
            *slot = true;
            state.remaining -= 1;
            if state.remaining == 0 {
                Arrival::Last
            } else {
                Arrival::First
            }
        };
        f(arrival)
    }

    /// Runs `f` with the streams that have arrived so far, holding the
    /// barrier lock so no arrival can slip in while it runs.
    pub fn with_arrived<R>(&self, f: impl FnOnce(&[StreamKind]) -> R) -> R {
        let state = self.inner.lock();
        let arrived: Vec<StreamKind> = [StreamKind::Video, StreamKind::Audio]
            .into_iter()
            .filter(|kind| state.arrived[kind.index()])
            .collect();
        f(&arrived)
    }

    pub fn has_arrived(&self, stream: StreamKind) -> bool {
        self.inner.lock().arrived[stream.index()]
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().remaining == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use std::thread;

    use super::*;

    #[test]
    fn second_arrival_is_last_in_either_order() {
        for order in [
            [StreamKind::Video, StreamKind::Audio],
            [StreamKind::Audio, StreamKind::Video],
        ] {
            let barrier = FinalizeBarrier::new();
            assert_eq!(barrier.arrive(order[0], |a| a), Arrival::First);
            assert!(!barrier.is_complete());
            assert_eq!(barrier.arrive(order[1], |a| a), Arrival::Last);
            assert!(barrier.is_complete());
        }
    }

    #[test]
    fn repeated_arrivals_do_not_complete() {
        let barrier = FinalizeBarrier::new();
        assert_eq!(barrier.arrive(StreamKind::Video, |a| a), Arrival::First);
        assert_eq!(barrier.arrive(StreamKind::Video, |a| a), Arrival::Repeated);
        assert!(!barrier.is_complete());
        assert!(barrier.has_arrived(StreamKind::Video));
        assert!(!barrier.has_arrived(StreamKind::Audio));
        assert_eq!(barrier.arrive(StreamKind::Audio, |a| a), Arrival::Last);
        assert_eq!(barrier.arrive(StreamKind::Audio, |a| a), Arrival::Repeated);
    }

    #[test]
    fn arrived_streams_are_listed_in_order() {
        let barrier = FinalizeBarrier::new();
        assert!(barrier.with_arrived(|arrived| arrived.is_empty()));
        barrier.arrive(StreamKind::Audio, |_| ());
        assert_eq!(barrier.with_arrived(|arrived| arrived.to_vec()), vec![StreamKind::Audio]);
    }

    #[test]
    fn racing_arrivals_complete_exactly_once() {
        for _ in 0..200 {
            let barrier = Arc::new(FinalizeBarrier::new());
            let lasts = Arc::new(AtomicUsize::new(0));
            let handles: Vec<_> = [StreamKind::Video, StreamKind::Audio]
                .into_iter()
                .map(|kind| {
                    let barrier = barrier.clone();
                    let lasts = lasts.clone();
                    thread::spawn(move || {
                        barrier.arrive(kind, |a| {
                            if a == Arrival::Last {
                                lasts.fetch_add(1, Ordering::SeqCst);
                            }
                        })
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(lasts.load(Ordering::SeqCst), 1);
        }
    }
}
