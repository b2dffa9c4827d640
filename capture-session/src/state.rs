use crate::stream::StreamKind;

/// Lifecycle of one encoding session.
///
/// ```text
/// Idle -> VideoReady | AudioReady -> ContextsReady -> Capturing
///      -> VideoDone | AudioDone -> Finalizing -> Finished
/// ```
///
/// Setup failures move any setup-phase state to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    VideoReady,
    AudioReady,
    ContextsReady,
    Capturing,
    VideoDone,
    AudioDone,
    Finalizing,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    VideoConfigured,
    AudioConfigured,
    ContainerOpened,
    StreamFinished(StreamKind),
    /// Both streams finished; teardown starts.
    Finalize,
    TeardownComplete,
    Fail,
}

impl SessionState {
    /// The state reached by applying `t`, or `None` if `t` is not allowed here.
    pub fn next(self, t: Transition) -> Option<SessionState> {
        use SessionState::*;
        use Transition::*;

        match (self, t) {
            (Idle, VideoConfigured) => Some(VideoReady),
            (Idle, AudioConfigured) => Some(AudioReady),
            (AudioReady, VideoConfigured) | (VideoReady, AudioConfigured) => Some(ContextsReady),
            (ContextsReady, ContainerOpened) => Some(Capturing),

            (Capturing, StreamFinished(StreamKind::Video)) => Some(VideoDone),
            (Capturing, StreamFinished(StreamKind::Audio)) => Some(AudioDone),
            // a stream that finishes before capture started only counts at the
            // barrier; opening the container replays it as StreamFinished
            (Idle | VideoReady | AudioReady | ContextsReady | Failed, StreamFinished(_)) => {
                Some(self)
            }

            (Finalizing | Finished, Finalize) => None,
            (_, Finalize) => Some(Finalizing),
            (Finalizing, TeardownComplete) => Some(Finished),

            (Idle | VideoReady | AudioReady | ContextsReady, Fail) => Some(Failed),
            _ => None,
        }
    }

    /// Setup has completed and frames are being accepted.
    pub fn is_capturing(self) -> bool {
        matches!(
            self,
            SessionState::Capturing | SessionState::VideoDone | SessionState::AudioDone
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Finished)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;
    use super::Transition::*;
    use super::*;

    fn run(from: SessionState, transitions: &[Transition]) -> Option<SessionState> {
        transitions.iter().try_fold(from, |s, t| s.next(*t))
    }

    #[test]
    fn setup_order_does_not_matter() {
        let a = run(Idle, &[VideoConfigured, AudioConfigured, ContainerOpened]);
        let b = run(Idle, &[AudioConfigured, VideoConfigured, ContainerOpened]);
        assert_eq!(a, Some(Capturing));
        assert_eq!(a, b);
    }

    #[test]
    fn container_requires_both_contexts() {
        assert_eq!(Idle.next(ContainerOpened), None);
        assert_eq!(VideoReady.next(ContainerOpened), None);
        assert_eq!(AudioReady.next(ContainerOpened), None);
    }

    #[test]
    fn full_lifecycle() {
        let end = run(
            Idle,
            &[
                AudioConfigured,
                VideoConfigured,
                ContainerOpened,
                StreamFinished(StreamKind::Audio),
                Finalize,
                TeardownComplete,
            ],
        );
        assert_eq!(end, Some(Finished));
        assert_eq!(Capturing.next(StreamFinished(StreamKind::Video)), Some(VideoDone));
    }

    #[test]
    fn finalize_happens_once() {
        assert_eq!(VideoDone.next(Finalize), Some(Finalizing));
        assert_eq!(Finalizing.next(Finalize), None);
        assert_eq!(Finished.next(Finalize), None);
        assert_eq!(Finished.next(TeardownComplete), None);
    }

    #[test]
    fn duplicate_setup_is_rejected() {
        assert_eq!(VideoReady.next(VideoConfigured), None);
        assert_eq!(ContextsReady.next(AudioConfigured), None);
        assert_eq!(Capturing.next(ContainerOpened), None);
    }

    #[test]
    fn failure_only_during_setup() {
        assert_eq!(VideoReady.next(Fail), Some(Failed));
        assert_eq!(Capturing.next(Fail), None);
        assert_eq!(Failed.next(StreamFinished(StreamKind::Video)), Some(Failed));
        assert_eq!(Failed.next(Finalize), Some(Finalizing));
        assert!(!Failed.is_capturing());
        assert!(AudioDone.is_capturing());
    }
}
