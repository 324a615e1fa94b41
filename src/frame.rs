use crate::error::{CaptureError, CaptureResult};

/// A planar I420 pixel buffer: a full-resolution luma plane followed by
/// two half-resolution chroma planes. Chroma dimensions round up for odd
/// frame sizes (`(d + 1) / 2`).
///
/// The capture engine writes into a caller-provided `PlanarFrame` and
/// keeps no reference to it afterwards. The backing allocation is
/// reused across captures and never shrinks.
pub struct PlanarFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl PlanarFrame {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            width: 0,
            height: 0,
        }
    }

    /// Allocate a frame sized for `width`x`height`, zero-filled.
    pub fn new(width: u32, height: u32) -> CaptureResult<Self> {
        let mut frame = Self::empty();
        frame.ensure_capacity(width, height)?;
        Ok(frame)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Full I420 buffer (Y plane, then U, then V).
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn luma(&self) -> &[u8] {
        let y_len = (self.width as usize) * (self.height as usize);
        &self.data[..y_len]
    }

    pub fn chroma_u(&self) -> &[u8] {
        let (y_len, c_len) = plane_lens(self.width, self.height);
        &self.data[y_len..y_len + c_len]
    }

    pub fn chroma_v(&self) -> &[u8] {
        let (y_len, c_len) = plane_lens(self.width, self.height);
        &self.data[y_len + c_len..y_len + 2 * c_len]
    }

    /// Mutable (luma, chroma-u, chroma-v) plane views.
    pub(crate) fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let (y_len, c_len) = plane_lens(self.width, self.height);
        let (y, uv) = self.data.split_at_mut(y_len);
        let (u, v) = uv.split_at_mut(c_len);
        (y, u, &mut v[..c_len])
    }

    /// Resize the frame for `width`x`height`, reusing the existing
    /// allocation when it is large enough.
    pub fn ensure_capacity(&mut self, width: u32, height: u32) -> CaptureResult<()> {
        let len = i420_len(width, height)?;
        self.data.resize(len, 0);
        self.width = width;
        self.height = height;
        Ok(())
    }
}

/// Chroma plane dimension for a luma dimension (rounds up).
#[inline]
pub(crate) fn chroma_dim(dim: u32) -> u32 {
    dim.div_ceil(2)
}

fn plane_lens(width: u32, height: u32) -> (usize, usize) {
    let y_len = (width as usize) * (height as usize);
    let c_len = (chroma_dim(width) as usize) * (chroma_dim(height) as usize);
    (y_len, c_len)
}

/// Total I420 byte length for `width`x`height`, with overflow checks.
pub fn i420_len(width: u32, height: u32) -> CaptureResult<usize> {
    let w = usize::try_from(width).map_err(|_| CaptureError::BufferOverflow)?;
    let h = usize::try_from(height).map_err(|_| CaptureError::BufferOverflow)?;
    let half_w = w.div_ceil(2);
    let half_h = h.div_ceil(2);
    let luma = w.checked_mul(h).ok_or(CaptureError::BufferOverflow)?;
    let chroma = half_w
        .checked_mul(half_h)
        .and_then(|c| c.checked_mul(2))
        .ok_or(CaptureError::BufferOverflow)?;
    luma.checked_add(chroma).ok_or(CaptureError::BufferOverflow)
}

impl std::fmt::Debug for PlanarFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanarFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("data_len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i420_len_matches_plane_sum() {
        assert_eq!(i420_len(1920, 1080).unwrap(), 1920 * 1080 * 3 / 2);
        // Odd dimensions round the chroma planes up.
        assert_eq!(i420_len(3, 3).unwrap(), 9 + 2 * 4);
        assert_eq!(i420_len(1, 1).unwrap(), 1 + 2);
    }

    #[test]
    fn i420_len_rejects_overflow() {
        assert!(matches!(
            i420_len(u32::MAX, u32::MAX),
            Err(CaptureError::BufferOverflow)
        ));
    }

    #[test]
    fn plane_views_have_expected_lengths() {
        let frame = PlanarFrame::new(640, 481).unwrap();
        assert_eq!(frame.luma().len(), 640 * 481);
        assert_eq!(frame.chroma_u().len(), 320 * 241);
        assert_eq!(frame.chroma_v().len(), 320 * 241);
    }

    #[test]
    fn ensure_capacity_keeps_allocation_on_shrink() {
        let mut frame = PlanarFrame::new(1920, 1080).unwrap();
        let cap = frame.data.capacity();
        frame.ensure_capacity(1280, 720).unwrap();
        assert_eq!(frame.dimensions(), (1280, 720));
        assert_eq!(frame.data.capacity(), cap);
    }
}
