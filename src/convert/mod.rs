//! CPU pixel pipeline: packed BGRA to planar I420, and I420 box
//! scaling to the negotiated delivery size.

mod scalar;

use crate::error::{CaptureError, CaptureResult};
use crate::frame::{chroma_dim, PlanarFrame};

/// Convert a packed 32-bit BGRA image into `dst` as I420.
///
/// `src_pitch` is the source row stride in bytes and may exceed
/// `width * 4` (mapped GPU surfaces usually pad rows). `dst` is resized
/// to `width`x`height`, reusing its allocation.
pub fn bgra_to_i420(
    src: &[u8],
    src_pitch: usize,
    width: u32,
    height: u32,
    dst: &mut PlanarFrame,
) -> CaptureResult<()> {
    if width == 0 || height == 0 {
        return Err(CaptureError::InvalidConfig(
            "conversion dimensions must be non-zero".into(),
        ));
    }
    let row_bytes = (width as usize)
        .checked_mul(4)
        .ok_or(CaptureError::BufferOverflow)?;
    if src_pitch < row_bytes {
        return Err(CaptureError::InvalidConfig(format!(
            "source pitch {src_pitch} is smaller than a {width}-pixel row"
        )));
    }
    let needed = src_pitch
        .checked_mul(height as usize - 1)
        .and_then(|n| n.checked_add(row_bytes))
        .ok_or(CaptureError::BufferOverflow)?;
    if src.len() < needed {
        return Err(CaptureError::InvalidConfig(format!(
            "source buffer holds {} bytes, {needed} required",
            src.len()
        )));
    }

    dst.ensure_capacity(width, height)?;
    let w = width as usize;
    let h = height as usize;
    let half_w = chroma_dim(width) as usize;
    let (luma, chroma_u, chroma_v) = dst.planes_mut();

    for (y, out_row) in luma.chunks_exact_mut(w).enumerate() {
        let row = &src[y * src_pitch..y * src_pitch + row_bytes];
        scalar::bgra_row_to_luma(row, out_row);
    }

    for (cy, (u_row, v_row)) in chroma_u
        .chunks_exact_mut(half_w)
        .zip(chroma_v.chunks_exact_mut(half_w))
        .enumerate()
    {
        let y0 = cy * 2;
        let y1 = (y0 + 1).min(h - 1);
        let row0 = &src[y0 * src_pitch..y0 * src_pitch + row_bytes];
        let row1 = &src[y1 * src_pitch..y1 * src_pitch + row_bytes];
        scalar::bgra_rows_to_chroma(row0, row1, w, u_row, v_row);
    }

    Ok(())
}

/// Box-scale an I420 frame into `dst` at `dst_width`x`dst_height`.
/// Identity dimensions degrade to a plane copy.
pub fn i420_scale_box(
    src: &PlanarFrame,
    dst: &mut PlanarFrame,
    dst_width: u32,
    dst_height: u32,
) -> CaptureResult<()> {
    if dst_width == 0 || dst_height == 0 {
        return Err(CaptureError::InvalidConfig(
            "scale target dimensions must be non-zero".into(),
        ));
    }
    let (src_width, src_height) = src.dimensions();
    if src_width == 0 || src_height == 0 {
        return Err(CaptureError::InvalidConfig(
            "scale source frame is empty".into(),
        ));
    }

    dst.ensure_capacity(dst_width, dst_height)?;
    if (src_width, src_height) == (dst_width, dst_height) {
        dst.as_mut_bytes().copy_from_slice(src.as_bytes());
        return Ok(());
    }

    let (dst_y, dst_u, dst_v) = dst.planes_mut();
    scalar::scale_plane_box(
        src.luma(),
        src_width as usize,
        src_height as usize,
        dst_y,
        dst_width as usize,
        dst_height as usize,
    );
    let (sw, sh) = (chroma_dim(src_width) as usize, chroma_dim(src_height) as usize);
    let (dw, dh) = (chroma_dim(dst_width) as usize, chroma_dim(dst_height) as usize);
    scalar::scale_plane_box(src.chroma_u(), sw, sh, dst_u, dw, dh);
    scalar::scale_plane_box(src.chroma_v(), sw, sh, dst_v, dw, dh);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_bgra(width: u32, height: u32, b: u8, g: u8, r: u8) -> Vec<u8> {
        let mut out = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            out.extend_from_slice(&[b, g, r, 255]);
        }
        out
    }

    #[test]
    fn white_converts_to_studio_swing_peak() {
        let src = solid_bgra(8, 8, 255, 255, 255);
        let mut dst = PlanarFrame::empty();
        bgra_to_i420(&src, 8 * 4, 8, 8, &mut dst).unwrap();
        assert!(dst.luma().iter().all(|&y| y == 235));
        assert!(dst.chroma_u().iter().all(|&u| u == 128));
        assert!(dst.chroma_v().iter().all(|&v| v == 128));
    }

    #[test]
    fn pure_blue_has_high_u() {
        let src = solid_bgra(4, 4, 255, 0, 0);
        let mut dst = PlanarFrame::empty();
        bgra_to_i420(&src, 4 * 4, 4, 4, &mut dst).unwrap();
        // BT.601: blue Y ~= 41, U well above neutral, V below.
        assert!(dst.luma()[0] > 35 && dst.luma()[0] < 46);
        assert!(dst.chroma_u()[0] > 220);
        assert!(dst.chroma_v()[0] < 120);
    }

    #[test]
    fn padded_pitch_skips_the_padding() {
        // 2x2 white image with 16 bytes of row padding filled with garbage.
        let row = [255u8, 255, 255, 255, 255, 255, 255, 255];
        let pad = [7u8; 16];
        let mut src = Vec::new();
        for _ in 0..2 {
            src.extend_from_slice(&row);
            src.extend_from_slice(&pad);
        }
        let mut dst = PlanarFrame::empty();
        bgra_to_i420(&src, 24, 2, 2, &mut dst).unwrap();
        assert!(dst.luma().iter().all(|&y| y == 235));
    }

    #[test]
    fn odd_dimensions_convert_with_clamped_edges() {
        let src = solid_bgra(3, 3, 0, 255, 0);
        let mut dst = PlanarFrame::empty();
        bgra_to_i420(&src, 3 * 4, 3, 3, &mut dst).unwrap();
        assert_eq!(dst.luma().len(), 9);
        assert_eq!(dst.chroma_u().len(), 4);
        // Uniform green stays uniform across the clamped edge blocks.
        let u0 = dst.chroma_u()[0];
        assert!(dst.chroma_u().iter().all(|&u| u == u0));
    }

    #[test]
    fn short_source_buffer_is_rejected() {
        let src = vec![0u8; 10];
        let mut dst = PlanarFrame::empty();
        assert!(matches!(
            bgra_to_i420(&src, 16, 4, 4, &mut dst),
            Err(CaptureError::InvalidConfig(_))
        ));
    }

    #[test]
    fn scale_1080p_to_720p_has_exact_dims() {
        let src = PlanarFrame::new(1920, 1080).unwrap();
        let mut dst = PlanarFrame::empty();
        i420_scale_box(&src, &mut dst, 1280, 720).unwrap();
        assert_eq!(dst.dimensions(), (1280, 720));
        assert_eq!(dst.luma().len(), 1280 * 720);
        assert_eq!(dst.chroma_u().len(), 640 * 360);
        assert_eq!(dst.chroma_v().len(), 640 * 360);
    }

    #[test]
    fn scale_preserves_uniform_content() {
        let src_bgra = solid_bgra(64, 48, 200, 100, 50);
        let mut full = PlanarFrame::empty();
        bgra_to_i420(&src_bgra, 64 * 4, 64, 48, &mut full).unwrap();
        let mut scaled = PlanarFrame::empty();
        i420_scale_box(&full, &mut scaled, 40, 30).unwrap();
        let y0 = full.luma()[0];
        assert!(scaled.luma().iter().all(|&y| y == y0));
    }

    #[test]
    fn identity_scale_copies_planes() {
        let src_bgra = solid_bgra(16, 16, 10, 20, 30);
        let mut full = PlanarFrame::empty();
        bgra_to_i420(&src_bgra, 16 * 4, 16, 16, &mut full).unwrap();
        let mut out = PlanarFrame::empty();
        i420_scale_box(&full, &mut out, 16, 16).unwrap();
        assert_eq!(out.as_bytes(), full.as_bytes());
    }

    #[test]
    fn zero_target_dimensions_are_invalid() {
        let src = PlanarFrame::new(8, 8).unwrap();
        let mut dst = PlanarFrame::empty();
        assert!(matches!(
            i420_scale_box(&src, &mut dst, 0, 8),
            Err(CaptureError::InvalidConfig(_))
        ));
    }
}
