//! Pointer tracking shared across capture sessions.
//!
//! Multiple sessions can observe the pointer, but only one of them saw
//! the most recent hardware update. Arbitration decides whose report
//! wins so the pointer never flickers between stale observers. The
//! caller drives all sessions from one thread, so no lock is needed.

use crate::error::{CaptureError, CaptureResult};
use crate::geometry::Point;

/// Portable slice of the duplication frame metadata that matters for
/// pointer arbitration.
#[derive(Clone, Copy, Debug)]
pub struct PointerReport {
    /// Output index of the session making the report.
    pub session: u32,
    pub visible: bool,
    /// Desktop-space pointer position.
    pub position: Point,
    /// Hardware timestamp of the last pointer update; zero means the
    /// frame carried no pointer information at all.
    pub last_updated: i64,
}

/// Pointer shape description, mirroring the duplication shape metadata.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShapeInfo {
    pub kind: u32,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub hot_spot: Point,
}

/// Accumulated pointer state. One instance is shared across every
/// session capturing for the same consumer.
#[derive(Debug, Default)]
pub struct PointerState {
    visible: bool,
    position: Point,
    last_updated: i64,
    owner: Option<u32>,
    shape: Vec<u8>,
    shape_len: usize,
    shape_info: ShapeInfo,
}

impl PointerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn last_updated(&self) -> i64 {
        self.last_updated
    }

    /// Session that most recently won arbitration, if any.
    pub fn owner(&self) -> Option<u32> {
        self.owner
    }

    pub fn shape(&self) -> &[u8] {
        &self.shape[..self.shape_len]
    }

    pub fn shape_info(&self) -> &ShapeInfo {
        &self.shape_info
    }

    pub fn set_shape_info(&mut self, info: ShapeInfo) {
        self.shape_info = info;
    }

    /// Whether `report` should replace the stored pointer position.
    ///
    /// Accepted when the reporting session already owns the pointer,
    /// when the stored pointer is invisible, or when a visible report
    /// carries a strictly newer timestamp than another session's stored
    /// one. An invisible report from a non-owner is noise: that session
    /// merely observes that the pointer is elsewhere.
    fn accepts(&self, report: &PointerReport) -> bool {
        if self.owner == Some(report.session) {
            return true;
        }
        if !report.visible {
            return false;
        }
        !self.visible || report.last_updated > self.last_updated
    }

    /// Fold one frame's pointer metadata into the state. Returns `true`
    /// when the report won arbitration and the position was updated.
    pub fn apply(&mut self, report: &PointerReport) -> bool {
        if report.last_updated == 0 {
            return false;
        }
        if !self.accepts(report) {
            return false;
        }
        self.visible = report.visible;
        self.position = report.position;
        self.last_updated = report.last_updated;
        self.owner = Some(report.session);
        true
    }

    /// Make the shape buffer hold exactly `size` writable bytes.
    ///
    /// Growth frees the old allocation first and reserves the new size
    /// exactly; a failed reservation leaves capacity at zero and returns
    /// [`CaptureError::OutOfMemory`]. A smaller request reuses the
    /// existing allocation without shrinking it.
    pub fn ensure_shape_capacity(&mut self, size: usize) -> CaptureResult<&mut [u8]> {
        if size > self.shape.capacity() {
            self.shape = Vec::new();
            self.shape
                .try_reserve_exact(size)
                .map_err(|_| CaptureError::OutOfMemory)?;
        }
        self.shape.resize(size, 0);
        self.shape_len = size;
        Ok(&mut self.shape[..size])
    }

    /// Drop the shape buffer entirely. Used when a shape query fails
    /// after the buffer was already reallocated: the old contents are
    /// gone and keeping a half-written buffer would serve a torn shape.
    pub fn discard_shape(&mut self) {
        self.shape = Vec::new();
        self.shape_len = 0;
    }

    pub fn shape_capacity(&self) -> usize {
        self.shape.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(session: u32, visible: bool, x: i32, last_updated: i64) -> PointerReport {
        PointerReport {
            session,
            visible,
            position: Point { x, y: 0 },
            last_updated,
        }
    }

    #[test]
    fn zero_timestamp_is_ignored() {
        let mut state = PointerState::new();
        assert!(!state.apply(&report(0, true, 10, 0)));
        assert_eq!(state.owner(), None);
    }

    #[test]
    fn newer_visible_report_from_other_session_wins() {
        let mut state = PointerState::new();
        assert!(state.apply(&report(0, true, 10, 100)));

        // Same pair of reports in either arrival order converges on the
        // newer one.
        assert!(state.apply(&report(1, true, 20, 200)));
        assert_eq!(state.owner(), Some(1));
        assert_eq!(state.position().x, 20);

        let mut state = PointerState::new();
        assert!(state.apply(&report(1, true, 20, 200)));
        assert!(!state.apply(&report(0, true, 10, 100)));
        assert_eq!(state.owner(), Some(1));
        assert_eq!(state.position().x, 20);
    }

    #[test]
    fn invisible_report_from_non_owner_is_ignored() {
        let mut state = PointerState::new();
        assert!(state.apply(&report(0, true, 10, 100)));

        assert!(!state.apply(&report(1, false, 99, 200)));
        assert!(state.visible());
        assert_eq!(state.owner(), Some(0));
        assert_eq!(state.position().x, 10);
    }

    #[test]
    fn owner_can_hide_the_pointer() {
        let mut state = PointerState::new();
        assert!(state.apply(&report(0, true, 10, 100)));
        assert!(state.apply(&report(0, false, 10, 150)));
        assert!(!state.visible());
    }

    #[test]
    fn visible_report_over_invisible_state_wins_regardless_of_timestamp() {
        // The invisible state has to come from the owner; a fresh state
        // rejects invisible reports outright.
        let mut state = PointerState::new();
        assert!(state.apply(&report(0, true, 10, 100)));
        assert!(state.apply(&report(0, false, 10, 150)));
        assert!(!state.visible());
        // Older timestamp, but the stored pointer is invisible.
        assert!(state.apply(&report(1, true, 30, 50)));
        assert!(state.visible());
        assert_eq!(state.owner(), Some(1));
        assert_eq!(state.position().x, 30);
    }

    #[test]
    fn shape_capacity_tracks_the_largest_request() {
        let mut state = PointerState::new();
        for size in [128usize, 4096, 512, 2048, 64] {
            let buf = state.ensure_shape_capacity(size).unwrap();
            assert_eq!(buf.len(), size);
        }
        assert_eq!(state.shape_capacity(), 4096);
        assert_eq!(state.shape().len(), 64);
    }

    #[test]
    fn failed_growth_leaves_capacity_zero() {
        let mut state = PointerState::new();
        state.ensure_shape_capacity(256).unwrap();
        let result = state.ensure_shape_capacity(usize::MAX);
        assert!(matches!(result, Err(CaptureError::OutOfMemory)));
        assert_eq!(state.shape_capacity(), 0);
    }

    #[test]
    fn discard_frees_the_buffer() {
        let mut state = PointerState::new();
        state.ensure_shape_capacity(1024).unwrap();
        state.discard_shape();
        assert_eq!(state.shape_capacity(), 0);
        assert!(state.shape().is_empty());
    }
}
