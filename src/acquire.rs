//! Frame acquisition with transparent access-loss recovery.
//!
//! Desktop duplication handles die whenever the desktop switches, the
//! display mode changes, or another consumer grabs the output. The
//! policy here is one automatic reinitialize-and-retry per call site;
//! a second loss in the same call surfaces to the caller, who retries
//! on its own schedule. The policy is written against a small trait so
//! it can be exercised without a desktop.

use tracing::{debug, warn};

use crate::error::{CaptureError, CaptureResult};

/// Result of a bounded acquire attempt.
#[derive(Debug)]
pub enum AcquireStatus<F> {
    Frame(F),
    /// No frame arrived within the wait. Not an error; nothing changed.
    Timeout,
}

/// What a capture cycle produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The delivery buffer holds a fresh frame.
    Frame,
    /// The desktop did not change within the wait; the buffer is
    /// untouched.
    NoFrame,
}

/// The slice of a duplication session the recovery policy needs.
///
/// Acquire failures map to [`CaptureError::AccessLost`] when the handle
/// died; anything else is a hard failure the policy passes through.
pub trait DuplicationLink {
    type Frame;

    fn is_open(&self) -> bool;

    /// Tear down and re-establish duplication.
    fn reopen(&mut self) -> CaptureResult<()>;

    fn try_acquire(&mut self, timeout_ms: u32) -> CaptureResult<AcquireStatus<Self::Frame>>;

    fn try_release(&mut self) -> CaptureResult<()>;
}

/// Acquire the next frame, reopening the link once if access is lost.
///
/// A closed link is reopened before the first attempt. Timeouts return
/// `Ok(None)` without touching the link. If access is lost, the link is
/// reopened and the acquire retried exactly once; a second loss becomes
/// [`CaptureError::AcquireFailed`].
pub fn acquire_with_recovery<L: DuplicationLink>(
    link: &mut L,
    timeout_ms: u32,
) -> CaptureResult<Option<L::Frame>> {
    if !link.is_open() {
        link.reopen()?;
    }

    match link.try_acquire(timeout_ms) {
        Ok(AcquireStatus::Frame(frame)) => Ok(Some(frame)),
        Ok(AcquireStatus::Timeout) => Ok(None),
        Err(CaptureError::AccessLost) => {
            warn!("duplication access lost during acquire, reinitializing");
            link.reopen()?;
            match link.try_acquire(timeout_ms) {
                Ok(AcquireStatus::Frame(frame)) => Ok(Some(frame)),
                Ok(AcquireStatus::Timeout) => Ok(None),
                Err(CaptureError::AccessLost) => {
                    warn!("duplication access lost again after reinitializing");
                    Err(CaptureError::AcquireFailed)
                }
                Err(err) => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

/// Release the held frame. Failures are absorbed: an access loss
/// triggers a reopen attempt (its own failure only logged), and any
/// other release error is left for the next acquire to revalidate. The
/// release intent itself always completes.
pub fn release_with_recovery<L: DuplicationLink>(link: &mut L) {
    match link.try_release() {
        Ok(()) => {}
        Err(CaptureError::AccessLost) => {
            warn!("duplication access lost during release, reinitializing");
            if let Err(err) = link.reopen() {
                warn!(error = %err, "reinitializing after release failure did not succeed");
            }
        }
        Err(err) => {
            debug!(error = %err, "frame release failed, next acquire revalidates");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Clone, Copy, Debug)]
    enum Step {
        Frame(u32),
        Timeout,
        Lost,
    }

    struct ScriptedLink {
        open: bool,
        acquires: VecDeque<Step>,
        releases: VecDeque<CaptureResult<()>>,
        reopen_results: VecDeque<CaptureResult<()>>,
        reopens: usize,
    }

    impl ScriptedLink {
        fn new(acquires: impl IntoIterator<Item = Step>) -> Self {
            Self {
                open: true,
                acquires: acquires.into_iter().collect(),
                releases: VecDeque::new(),
                reopen_results: VecDeque::new(),
                reopens: 0,
            }
        }
    }

    impl DuplicationLink for ScriptedLink {
        type Frame = u32;

        fn is_open(&self) -> bool {
            self.open
        }

        fn reopen(&mut self) -> CaptureResult<()> {
            self.reopens += 1;
            match self.reopen_results.pop_front().unwrap_or(Ok(())) {
                Ok(()) => {
                    self.open = true;
                    Ok(())
                }
                Err(err) => {
                    self.open = false;
                    Err(err)
                }
            }
        }

        fn try_acquire(&mut self, _timeout_ms: u32) -> CaptureResult<AcquireStatus<u32>> {
            match self.acquires.pop_front().expect("script exhausted") {
                Step::Frame(id) => Ok(AcquireStatus::Frame(id)),
                Step::Timeout => Ok(AcquireStatus::Timeout),
                Step::Lost => {
                    self.open = false;
                    Err(CaptureError::AccessLost)
                }
            }
        }

        fn try_release(&mut self) -> CaptureResult<()> {
            self.releases.pop_front().unwrap_or(Ok(()))
        }
    }

    #[test]
    fn access_lost_recovers_with_one_reopen() {
        let mut link = ScriptedLink::new([Step::Lost, Step::Frame(7)]);
        let frame = acquire_with_recovery(&mut link, 300).unwrap();
        assert_eq!(frame, Some(7));
        assert_eq!(link.reopens, 1);
        assert!(link.is_open());
    }

    #[test]
    fn timeouts_never_reinitialize() {
        let mut link = ScriptedLink::new([Step::Timeout, Step::Timeout]);
        assert!(acquire_with_recovery(&mut link, 300).unwrap().is_none());
        assert!(acquire_with_recovery(&mut link, 300).unwrap().is_none());
        assert_eq!(link.reopens, 0);
        assert!(link.is_open());
    }

    #[test]
    fn second_access_loss_surfaces_acquire_failed() {
        let mut link = ScriptedLink::new([Step::Lost, Step::Lost]);
        let err = acquire_with_recovery(&mut link, 300).unwrap_err();
        assert!(matches!(err, CaptureError::AcquireFailed));
        assert_eq!(link.reopens, 1);
    }

    #[test]
    fn closed_link_is_reopened_before_acquiring() {
        let mut link = ScriptedLink::new([Step::Frame(1)]);
        link.open = false;
        let frame = acquire_with_recovery(&mut link, 300).unwrap();
        assert_eq!(frame, Some(1));
        assert_eq!(link.reopens, 1);
    }

    #[test]
    fn failed_reopen_propagates_its_error() {
        let mut link = ScriptedLink::new([Step::Lost]);
        link.reopen_results
            .push_back(Err(CaptureError::DuplicationUnavailable));
        let err = acquire_with_recovery(&mut link, 300).unwrap_err();
        assert!(matches!(err, CaptureError::DuplicationUnavailable));
    }

    #[test]
    fn timeout_after_recovery_is_still_no_frame() {
        let mut link = ScriptedLink::new([Step::Lost, Step::Timeout]);
        assert!(acquire_with_recovery(&mut link, 300).unwrap().is_none());
        assert_eq!(link.reopens, 1);
    }

    #[test]
    fn release_access_loss_reopens_and_completes() {
        let mut link = ScriptedLink::new([]);
        link.releases.push_back(Err(CaptureError::AccessLost));
        release_with_recovery(&mut link);
        assert_eq!(link.reopens, 1);
    }

    #[test]
    fn release_other_errors_are_absorbed() {
        let mut link = ScriptedLink::new([]);
        link.releases
            .push_back(Err(CaptureError::Platform(anyhow::anyhow!("stale"))));
        release_with_recovery(&mut link);
        assert_eq!(link.reopens, 0);
    }
}
