//! Rotation-aware rectangle math for duplication metadata.
//!
//! Move and dirty rectangles arrive in pre-rotation desktop coordinates;
//! the captured texture is laid out in physical (unrotated) panel
//! coordinates. Every rotation case is a fixed affine corner remap, and
//! the same remap drives both copy geometry and blit texture coordinates
//! so the two can never drift apart.

/// Display rotation reported for an output.
///
/// `DXGI_MODE_ROTATION_UNSPECIFIED` collapses into [`Rotation::Identity`];
/// any other unknown mode value has no variant here and is handled
/// defensively by the session (reconstruction becomes a logged no-op).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Rotation {
    /// Map a raw `DXGI_MODE_ROTATION` value. Returns `None` for values
    /// outside the four supported cases.
    pub fn from_mode_value(mode: i32) -> Option<Self> {
        match mode {
            0 | 1 => Some(Self::Identity),
            2 => Some(Self::Rotate90),
            3 => Some(Self::Rotate180),
            4 => Some(Self::Rotate270),
            _ => None,
        }
    }

    /// Rotated (desktop-space) dimensions for a physical texture size.
    pub fn desktop_dims(self, tex_width: i32, tex_height: i32) -> (i32, i32) {
        match self {
            Self::Identity | Self::Rotate180 => (tex_width, tex_height),
            Self::Rotate90 | Self::Rotate270 => (tex_height, tex_width),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// One move-rect metadata entry: a region that shifted position without
/// visual change. Both fields are in pre-rotation desktop coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveRegion {
    pub source: Point,
    pub destination: Rect,
}

/// Remap a desktop-space rect into physical texture space.
///
/// `desk_width`/`desk_height` are the rotated desktop dimensions (see
/// [`Rotation::desktop_dims`]). Each case is the closed-form corner
/// remap of the rectangle under the inverse display rotation.
pub fn rotate_rect(rotation: Rotation, rect: Rect, desk_width: i32, desk_height: i32) -> Rect {
    match rotation {
        Rotation::Identity => rect,
        Rotation::Rotate90 => Rect::new(
            desk_width - rect.bottom,
            rect.left,
            desk_width - rect.top,
            rect.right,
        ),
        Rotation::Rotate180 => Rect::new(
            desk_width - rect.right,
            desk_height - rect.bottom,
            desk_width - rect.left,
            desk_height - rect.top,
        ),
        Rotation::Rotate270 => Rect::new(
            rect.top,
            desk_height - rect.right,
            rect.bottom,
            desk_height - rect.left,
        ),
    }
}

/// Inverse of [`rotate_rect`] with the same `desk_width`/`desk_height`.
pub fn unrotate_rect(rotation: Rotation, rect: Rect, desk_width: i32, desk_height: i32) -> Rect {
    match rotation {
        Rotation::Identity => rect,
        // The inverse of a 90-degree remap is the 270-degree remap with
        // the role of the two dimensions exchanged, and vice versa.
        Rotation::Rotate90 => rotate_rect(Rotation::Rotate270, rect, desk_height, desk_width),
        Rotation::Rotate180 => rotate_rect(Rotation::Rotate180, rect, desk_width, desk_height),
        Rotation::Rotate270 => rotate_rect(Rotation::Rotate90, rect, desk_height, desk_width),
    }
}

/// Compute the texture-space source and destination windows for one move
/// rect. `tex_width`/`tex_height` are the physical dimensions of the
/// surface being reconstructed.
pub fn move_rect_windows(
    rotation: Rotation,
    mv: &MoveRegion,
    tex_width: i32,
    tex_height: i32,
) -> (Rect, Rect) {
    let (desk_w, desk_h) = rotation.desktop_dims(tex_width, tex_height);
    let src = Rect::new(
        mv.source.x,
        mv.source.y,
        mv.source.x + mv.destination.width(),
        mv.source.y + mv.destination.height(),
    );
    (
        rotate_rect(rotation, src, desk_w, desk_h),
        rotate_rect(rotation, mv.destination, desk_w, desk_h),
    )
}

/// One blit vertex: clip-space position plus normalized texture
/// coordinate. Layout must match the input layout built in the GPU
/// context (POSITION float3 at 0, TEXCOORD float2 at 12).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BlitVertex {
    pub pos: [f32; 3],
    pub tex: [f32; 2],
}

/// Vertices per dirty-rect quad (two triangles).
pub const VERTICES_PER_RECT: usize = 6;

/// Build the two-triangle quad that redraws one dirty rect onto the
/// shared surface.
///
/// * `dirty` — the dirty rect in pre-rotation desktop coordinates.
/// * `desk_rect` — the output's desktop coordinates on the shared surface.
/// * `offset` — the shared surface origin in desktop coordinates.
/// * `full_width`/`full_height` — shared surface dimensions.
/// * `tex_width`/`tex_height` — acquired image dimensions (UV basis).
///
/// Positions are normalized center-relative clip coordinates with the
/// vertical axis inverted; texture coordinates are chosen per rotation
/// case so the sampled texel matches the rotated desktop layout.
#[allow(clippy::too_many_arguments)]
pub fn dirty_rect_vertices(
    rotation: Rotation,
    dirty: Rect,
    desk_rect: Rect,
    offset: Point,
    full_width: i32,
    full_height: i32,
    tex_width: i32,
    tex_height: i32,
) -> [BlitVertex; VERTICES_PER_RECT] {
    let center_x = (full_width / 2) as f32;
    let center_y = (full_height / 2) as f32;

    let dest = rotate_rect(rotation, dirty, desk_rect.width(), desk_rect.height());

    let tw = tex_width as f32;
    let th = tex_height as f32;
    let (u0, u1) = (dirty.left as f32 / tw, dirty.right as f32 / tw);
    let (v0, v1) = (dirty.top as f32 / th, dirty.bottom as f32 / th);

    // UVs for vertices [0, 1, 2, 5]; 3 and 4 repeat 2 and 1.
    let uvs = match rotation {
        Rotation::Identity => [[u0, v1], [u0, v0], [u1, v1], [u1, v0]],
        Rotation::Rotate90 => [[u1, v1], [u0, v1], [u1, v0], [u0, v0]],
        Rotation::Rotate180 => [[u1, v0], [u1, v1], [u0, v0], [u0, v1]],
        Rotation::Rotate270 => [[u0, v0], [u1, v0], [u0, v1], [u1, v1]],
    };

    let clip_x = |coord: i32| (coord + desk_rect.left - offset.x) as f32 / center_x - 1.0;
    let clip_y = |coord: i32| -((coord + desk_rect.top - offset.y) as f32 / center_y - 1.0);

    let corner = |x: i32, y: i32, uv: [f32; 2]| BlitVertex {
        pos: [clip_x(x), clip_y(y), 0.0],
        tex: uv,
    };

    let v_bl = corner(dest.left, dest.bottom, uvs[0]);
    let v_tl = corner(dest.left, dest.top, uvs[1]);
    let v_br = corner(dest.right, dest.bottom, uvs[2]);
    let v_tr = corner(dest.right, dest.top, uvs[3]);

    [v_bl, v_tl, v_br, v_br, v_tl, v_tr]
}
