//! Scalar conversion and scaling kernels.
//!
//! BT.601 studio-swing coefficients in 8-bit fixed point; chroma is
//! averaged over each 2x2 block before the matrix is applied. Odd
//! frame edges clamp to the last row/column.

#[inline]
fn luma_of(b: u8, g: u8, r: u8) -> u8 {
    let y = (66 * r as i32 + 129 * g as i32 + 25 * b as i32 + 128) >> 8;
    (y + 16) as u8
}

#[inline]
fn chroma_of(b: i32, g: i32, r: i32) -> (u8, u8) {
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (u.clamp(0, 255) as u8, v.clamp(0, 255) as u8)
}

/// Convert one row of packed BGRA pixels to luma.
pub(super) fn bgra_row_to_luma(row: &[u8], luma: &mut [u8]) {
    for (px, y) in row.chunks_exact(4).zip(luma.iter_mut()) {
        *y = luma_of(px[0], px[1], px[2]);
    }
}

/// Convert a pair of BGRA rows into one row of U and V samples, one
/// sample per 2x2 pixel block. `width` is the luma width; the second
/// row may alias the first for the bottom edge of odd-height frames.
pub(super) fn bgra_rows_to_chroma(
    row0: &[u8],
    row1: &[u8],
    width: usize,
    u_out: &mut [u8],
    v_out: &mut [u8],
) {
    let half_w = width.div_ceil(2);
    for i in 0..half_w {
        let x0 = (i * 2) * 4;
        let x1 = (i * 2 + 1).min(width - 1) * 4;

        let mut b = 0i32;
        let mut g = 0i32;
        let mut r = 0i32;
        for row in [row0, row1] {
            for x in [x0, x1] {
                b += row[x] as i32;
                g += row[x + 1] as i32;
                r += row[x + 2] as i32;
            }
        }
        // Round the 4-sample average.
        let (u, v) = chroma_of((b + 2) >> 2, (g + 2) >> 2, (r + 2) >> 2);
        u_out[i] = u;
        v_out[i] = v;
    }
}

/// Area-weighted (box) resample of one plane. Every destination pixel
/// is the coverage-weighted mean of the source pixels its footprint
/// overlaps, so downscales average rather than drop pixels.
pub(super) fn scale_plane_box(
    src: &[u8],
    src_width: usize,
    src_height: usize,
    dst: &mut [u8],
    dst_width: usize,
    dst_height: usize,
) {
    if src_width == dst_width && src_height == dst_height {
        dst[..src.len()].copy_from_slice(src);
        return;
    }

    let x_ratio = src_width as f64 / dst_width as f64;
    let y_ratio = src_height as f64 / dst_height as f64;

    for dy in 0..dst_height {
        let fy0 = dy as f64 * y_ratio;
        let fy1 = ((dy + 1) as f64 * y_ratio).min(src_height as f64);
        let sy0 = fy0 as usize;
        let sy1 = (fy1.ceil() as usize).min(src_height);

        for dx in 0..dst_width {
            let fx0 = dx as f64 * x_ratio;
            let fx1 = ((dx + 1) as f64 * x_ratio).min(src_width as f64);
            let sx0 = fx0 as usize;
            let sx1 = (fx1.ceil() as usize).min(src_width);

            let mut acc = 0.0f64;
            let mut area = 0.0f64;
            for sy in sy0..sy1 {
                let wy = (fy1.min((sy + 1) as f64) - fy0.max(sy as f64)).max(0.0);
                let row = &src[sy * src_width..];
                for sx in sx0..sx1 {
                    let wx = (fx1.min((sx + 1) as f64) - fx0.max(sx as f64)).max(0.0);
                    let w = wx * wy;
                    acc += row[sx] as f64 * w;
                    area += w;
                }
            }
            dst[dy * dst_width + dx] = (acc / area + 0.5) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luma_of_primaries() {
        // White and black hit the studio-swing range ends.
        assert_eq!(luma_of(255, 255, 255), 235);
        assert_eq!(luma_of(0, 0, 0), 16);
    }

    #[test]
    fn chroma_of_grey_is_neutral() {
        let (u, v) = chroma_of(128, 128, 128);
        assert_eq!((u, v), (128, 128));
    }

    #[test]
    fn box_scale_halving_averages_blocks() {
        // 4x2 plane scaled to 2x1: each output is the mean of a 2x2 block.
        let src = [10u8, 20, 30, 40, 50, 60, 70, 80];
        let mut dst = [0u8; 2];
        scale_plane_box(&src, 4, 2, &mut dst, 2, 1);
        assert_eq!(dst, [35, 55]);
    }

    #[test]
    fn box_scale_identity_is_copy() {
        let src = [1u8, 2, 3, 4];
        let mut dst = [0u8; 4];
        scale_plane_box(&src, 2, 2, &mut dst, 2, 2);
        assert_eq!(dst, src);
    }

    #[test]
    fn box_scale_uniform_plane_stays_uniform() {
        let src = vec![77u8; 30 * 20];
        let mut dst = vec![0u8; 20 * 13];
        scale_plane_box(&src, 30, 20, &mut dst, 20, 13);
        assert!(dst.iter().all(|&p| p == 77));
    }
}
