//! Incremental desktop capture over DXGI Output Duplication.
//!
//! A [`DesktopDuplicator`] duplicates one output, reconstructs a full
//! desktop image from the move/dirty deltas each acquired frame
//! carries, folds pointer metadata into a shared [`PointerState`], and
//! delivers planar I420 at a negotiated resolution per pull. Losing
//! duplication access (desktop switch, mode change, another consumer)
//! is recovered transparently with one reinitialize-and-retry per
//! call.
//!
//! The capture backend is Windows-only; the geometry, pointer
//! arbitration, recovery policy, and pixel pipeline are portable and
//! unit tested on any host.

pub mod acquire;
pub mod convert;
pub mod cursor;
pub mod error;
pub mod frame;
pub mod geometry;
mod platform;

pub use acquire::{AcquireStatus, CaptureOutcome, DuplicationLink};
pub use cursor::{PointerReport, PointerState, ShapeInfo};
pub use error::{CaptureError, CaptureErrorClass, CaptureResult};
pub use frame::PlanarFrame;
pub use geometry::{MoveRegion, Point, Rect, Rotation};

/// Pull-based capturer for one display output.
///
/// Single-threaded by contract: the caller drives every capture from
/// one thread, and the only blocking points are the bounded frame wait
/// and the CPU readback map.
#[cfg(target_os = "windows")]
pub struct DesktopDuplicator {
    session: platform::windows::duplication::DuplicationSession,
    target: (u32, u32),
}

#[cfg(target_os = "windows")]
impl DesktopDuplicator {
    /// Create the rendering context and start duplicating
    /// `output_index` on the default adapter. Delivery defaults to the
    /// output's native size.
    pub fn new(output_index: u32) -> CaptureResult<Self> {
        let gpu = std::sync::Arc::new(platform::windows::d3d11::GpuContext::new()?);
        let session = platform::windows::duplication::DuplicationSession::open(gpu, output_index)?;
        let target = session.output_size();
        Ok(Self { session, target })
    }

    /// Set the delivery resolution for subsequent captures.
    pub fn negotiate_size(&mut self, width: u32, height: u32) -> CaptureResult<()> {
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidConfig(
                "negotiated dimensions must be non-zero".into(),
            ));
        }
        self.target = (width, height);
        Ok(())
    }

    /// Native size of the duplicated output in desktop coordinates.
    pub fn output_size(&self) -> (u32, u32) {
        self.session.output_size()
    }

    pub fn rotation(&self) -> Rotation {
        self.session.rotation()
    }

    /// Pull one frame: acquire (with transparent access-loss recovery),
    /// reconstruct, update `pointer`, and convert into `out` at the
    /// negotiated size. `Ok(CaptureOutcome::NoFrame)` means the desktop
    /// did not change within the wait and `out` is untouched.
    pub fn capture_frame(
        &mut self,
        pointer: &mut PointerState,
        out: &mut PlanarFrame,
    ) -> CaptureResult<CaptureOutcome> {
        self.session.capture_frame(pointer, out, self.target)
    }
}
