use parking_lot::Mutex;

use crate::{
    backend::Container,
    error::{SessionError, SessionResult},
    packet::Packet,
    stream::StreamKind,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub video_packets: u64,
    pub audio_packets: u64,
    pub video_bytes: u64,
    pub audio_bytes: u64,
    pub write_failures: u64,
}

struct WriterInner<C> {
    container: Option<C>,
    stats: WriterStats,
}

/// The one place packets reach the container. Every write holds the writer
/// lock for its whole duration, so packets from the video and audio paths
/// never overlap inside the backend.
pub struct InterleavedWriter<C> {
    inner: Mutex<WriterInner<C>>,
}

impl<C: Container> InterleavedWriter<C> {
    pub fn new(container: C) -> Self {
        Self {
            inner: Mutex::new(WriterInner {
                container: Some(container),
                stats: WriterStats::default(),
            }),
        }
    }

    pub fn write(&self, packet: Packet) -> SessionResult<()> {
        let mut inner = self.inner.lock();
        let WriterInner { container, stats } = &mut *inner;
        let container = container.as_mut().ok_or(SessionError::WriterClosed)?;

        let kind = StreamKind::from_index(packet.index());
        let size = packet.size() as u64;
        match container.write_interleaved(packet) {
            Ok(()) => {
                match kind {
                    Some(StreamKind::Video) => {
                        stats.video_packets += 1;
                        stats.video_bytes += size;
                    }
                    Some(StreamKind::Audio) => {
                        stats.audio_packets += 1;
                        stats.audio_bytes += size;
                    }
                    None => {}
                }
                Ok(())
            }
            Err(e) => {
                stats.write_failures += 1;
                Err(SessionError::Write(e))
            }
        }
    }

    /// Writes the trailer and closes the container. Later writes fail with
    /// [`SessionError::WriterClosed`].
    pub fn finish(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let Some(mut container) = inner.container.take() else {
            return Ok(());
        };
        let result = container.write_trailer();
        drop(container);
        result
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().container.is_some()
    }

    pub fn stats(&self) -> WriterStats {
        self.inner.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };
    use std::thread;

    use super::*;
    use crate::format::Rational;

    #[derive(Default)]
    struct Probe {
        busy: AtomicBool,
        overlaps: AtomicUsize,
        writes: AtomicUsize,
        trailers: AtomicUsize,
        closed: AtomicUsize,
    }

    struct ProbeContainer {
        probe: Arc<Probe>,
        fail_writes: bool,
    }

    impl Container for ProbeContainer {
        fn write_interleaved(&mut self, _packet: Packet) -> anyhow::Result<()> {
            if self.probe.busy.swap(true, Ordering::SeqCst) {
                self.probe.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            thread::yield_now();
            self.probe.writes.fetch_add(1, Ordering::SeqCst);
            self.probe.busy.store(false, Ordering::SeqCst);
            if self.fail_writes {
                anyhow::bail!("disk full");
            }
            Ok(())
        }

        fn write_trailer(&mut self) -> anyhow::Result<()> {
            self.probe.trailers.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Drop for ProbeContainer {
        fn drop(&mut self) {
            self.probe.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn packet(kind: StreamKind) -> Packet {
        let mut p = Packet::new(vec![0u8; 8], Rational::new(1, 30));
        p.set_stream(kind.index());
        p
    }

    #[test]
    fn concurrent_writes_never_overlap() {
        let probe = Arc::new(Probe::default());
        let writer = Arc::new(InterleavedWriter::new(ProbeContainer {
            probe: probe.clone(),
            fail_writes: false,
        }));
        let handles: Vec<_> = [(StreamKind::Video, 300), (StreamKind::Audio, 500)]
            .into_iter()
            .map(|(kind, n)| {
                let writer = writer.clone();
                thread::spawn(move || {
                    for _ in 0..n {
                        writer.write(packet(kind)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(probe.writes.load(Ordering::SeqCst), 800);
        let stats = writer.stats();
        assert_eq!(stats.video_packets, 300);
        assert_eq!(stats.audio_packets, 500);
        assert_eq!(stats.video_bytes, 300 * 8);
    }

    #[test]
    fn finish_writes_trailer_once_and_closes() {
        let probe = Arc::new(Probe::default());
        let writer = InterleavedWriter::new(ProbeContainer {
            probe: probe.clone(),
            fail_writes: false,
        });
        writer.finish().unwrap();
        writer.finish().unwrap();
        assert_eq!(probe.trailers.load(Ordering::SeqCst), 1);
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
        assert!(!writer.is_open());
        assert!(matches!(
            writer.write(packet(StreamKind::Video)),
            Err(SessionError::WriterClosed)
        ));
    }

    #[test]
    fn write_failures_are_counted() {
        let probe = Arc::new(Probe::default());
        let writer = InterleavedWriter::new(ProbeContainer {
            probe,
            fail_writes: true,
        });
        assert!(matches!(
            writer.write(packet(StreamKind::Audio)),
            Err(SessionError::Write(_))
        ));
        let stats = writer.stats();
        assert_eq!(stats.write_failures, 1);
        assert_eq!(stats.audio_packets, 0);
    }
}
