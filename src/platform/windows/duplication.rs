use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, warn};
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D::D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_BIND_VERTEX_BUFFER, D3D11_BOX,
    D3D11_BUFFER_DESC, D3D11_SUBRESOURCE_DATA, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
    D3D11_VIEWPORT, ID3D11Buffer, ID3D11Device, ID3D11RenderTargetView,
    ID3D11ShaderResourceView, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_NOT_CURRENTLY_AVAILABLE, DXGI_ERROR_NOT_FOUND,
    DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO, DXGI_OUTDUPL_MOVE_RECT,
    DXGI_OUTDUPL_POINTER_SHAPE_INFO, IDXGIDevice, IDXGIOutput, IDXGIOutput1,
    IDXGIOutputDuplication, IDXGIResource,
};
use windows::core::Interface;

use crate::acquire::{
    AcquireStatus, CaptureOutcome, DuplicationLink, acquire_with_recovery, release_with_recovery,
};
use crate::convert;
use crate::cursor::{PointerReport, PointerState, ShapeInfo};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::PlanarFrame;
use crate::geometry::{
    BlitVertex, MoveRegion, Point, Rect, Rotation, dirty_rect_vertices, move_rect_windows,
};

use super::d3d11::GpuContext;
use super::surface;

/// Bounded wait for the next desktop frame.
const ACQUIRE_TIMEOUT_MS: u32 = 300;

struct AcquiredFrame {
    texture: ID3D11Texture2D,
    info: DXGI_OUTDUPL_FRAME_INFO,
}

/// One duplication session for one output: holds the duplication
/// handle, the persistent shared surface the desktop is reconstructed
/// onto, and the grow-only scratch buffers the reconstruction reuses
/// across frames.
pub(crate) struct DuplicationSession {
    gpu: Arc<GpuContext>,
    output_index: u32,
    output: IDXGIOutput,
    desktop_rect: RECT,
    /// `None` when the output reports a rotation mode outside the four
    /// supported cases; reconstruction is skipped until it changes.
    rotation: Option<Rotation>,
    duplication: Option<IDXGIOutputDuplication>,
    held: Option<AcquiredFrame>,
    shared: ID3D11Texture2D,
    move_scratch: Option<ID3D11Texture2D>,
    rtv: Option<ID3D11RenderTargetView>,
    move_rects: Vec<DXGI_OUTDUPL_MOVE_RECT>,
    dirty_rects: Vec<RECT>,
    vertices: Vec<BlitVertex>,
    staging: Option<ID3D11Texture2D>,
    planar_scratch: PlanarFrame,
}

impl DuplicationSession {
    /// Open a session on `output_index` of the device's adapter and
    /// start duplicating.
    pub(crate) fn open(gpu: Arc<GpuContext>, output_index: u32) -> CaptureResult<Self> {
        let output = resolve_output(&gpu.device, output_index)?;
        let (desktop_rect, rotation) = read_output_geometry(&output)?;
        let shared = create_shared_surface(&gpu.device, &desktop_rect)?;

        let mut session = Self {
            gpu,
            output_index,
            output,
            desktop_rect,
            rotation,
            duplication: None,
            held: None,
            shared,
            move_scratch: None,
            rtv: None,
            move_rects: Vec::new(),
            dirty_rects: Vec::new(),
            vertices: Vec::new(),
            staging: None,
            planar_scratch: PlanarFrame::empty(),
        };
        session.start()?;
        Ok(session)
    }

    pub(crate) fn output_size(&self) -> (u32, u32) {
        (
            (self.desktop_rect.right - self.desktop_rect.left) as u32,
            (self.desktop_rect.bottom - self.desktop_rect.top) as u32,
        )
    }

    pub(crate) fn rotation(&self) -> Rotation {
        self.rotation.unwrap_or_default()
    }

    fn start(&mut self) -> CaptureResult<()> {
        let output1: IDXGIOutput1 = self
            .output
            .cast()
            .context("failed to query IDXGIOutput1")
            .map_err(CaptureError::Platform)?;
        match unsafe { output1.DuplicateOutput(&self.gpu.device) } {
            Ok(duplication) => {
                self.duplication = Some(duplication);
                Ok(())
            }
            Err(error) if error.code() == DXGI_ERROR_NOT_CURRENTLY_AVAILABLE => {
                warn!("duplication session cap reached for this output");
                Err(CaptureError::DuplicationUnavailable)
            }
            Err(error) => Err(CaptureError::Platform(
                anyhow::Error::from(error).context("DuplicateOutput failed"),
            )),
        }
    }

    /// Map a duplication call failure, invalidating the handle on
    /// access loss so the next acquire reopens.
    fn duplication_call_failed(
        &mut self,
        error: windows::core::Error,
        action: &'static str,
    ) -> CaptureError {
        if error.code() == DXGI_ERROR_ACCESS_LOST {
            self.duplication = None;
            CaptureError::AccessLost
        } else {
            CaptureError::Platform(anyhow::Error::from(error).context(action))
        }
    }

    /// Run one full pull cycle into `out` at the `target` dimensions.
    pub(crate) fn capture_frame(
        &mut self,
        pointer: &mut PointerState,
        out: &mut PlanarFrame,
        target: (u32, u32),
    ) -> CaptureResult<CaptureOutcome> {
        if acquire_with_recovery(self, ACQUIRE_TIMEOUT_MS)?.is_none() {
            return Ok(CaptureOutcome::NoFrame);
        }

        let delivered = self.deliver(pointer, out, target);
        release_with_recovery(self);
        delivered?;
        Ok(CaptureOutcome::Frame)
    }

    fn deliver(
        &mut self,
        pointer: &mut PointerState,
        out: &mut PlanarFrame,
        (target_width, target_height): (u32, u32),
    ) -> CaptureResult<()> {
        self.process_frame()?;
        self.update_pointer(pointer)?;

        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { self.shared.GetDesc(&mut desc) };
        let staging = surface::ensure_staging_texture(&self.gpu.device, &mut self.staging, &desc)?;
        // The immediate context's in-order stream and the blocking Map
        // inside map_staging_to_planar order this copy after the
        // reconstruction draws.
        unsafe { self.gpu.context.CopyResource(staging, &self.shared) };
        surface::map_staging_to_planar(&self.gpu.context, staging, &desc, &mut self.planar_scratch)?;
        convert::i420_scale_box(&self.planar_scratch, out, target_width, target_height)
    }

    /// Apply this frame's move and dirty metadata to the shared surface.
    fn process_frame(&mut self) -> CaptureResult<()> {
        let Some(held) = &self.held else {
            return Ok(());
        };
        if held.info.TotalMetadataBufferSize == 0 {
            return Ok(());
        }
        if self.rotation.is_none() {
            debug!("skipping frame metadata: unsupported rotation mode");
            return Ok(());
        }
        let texture = held.texture.clone();
        let total = held.info.TotalMetadataBufferSize as usize;
        let duplication = self
            .duplication
            .as_ref()
            .ok_or(CaptureError::AccessLost)?
            .clone();

        let move_size = std::mem::size_of::<DXGI_OUTDUPL_MOVE_RECT>();
        let move_slots = total / move_size;
        if self.move_rects.len() < move_slots {
            self.move_rects.resize(move_slots, DXGI_OUTDUPL_MOVE_RECT::default());
        }
        let mut moves_used = 0u32;
        if move_slots > 0 {
            let retrieved = unsafe {
                duplication.GetFrameMoveRects(
                    (self.move_rects.len() * move_size) as u32,
                    self.move_rects.as_mut_ptr(),
                    &mut moves_used,
                )
            };
            if let Err(error) = retrieved {
                return Err(self.duplication_call_failed(error, "GetFrameMoveRects failed"));
            }
        }
        let move_count = moves_used as usize / move_size;

        let dirty_size = std::mem::size_of::<RECT>();
        let dirty_slots = total / dirty_size;
        if self.dirty_rects.len() < dirty_slots {
            self.dirty_rects.resize(dirty_slots, RECT::default());
        }
        let mut dirty_used = 0u32;
        if dirty_slots > 0 {
            let retrieved = unsafe {
                duplication.GetFrameDirtyRects(
                    (self.dirty_rects.len() * dirty_size) as u32,
                    self.dirty_rects.as_mut_ptr(),
                    &mut dirty_used,
                )
            };
            if let Err(error) = retrieved {
                return Err(self.duplication_call_failed(error, "GetFrameDirtyRects failed"));
            }
        }
        let dirty_count = dirty_used as usize / dirty_size;

        self.copy_move(&texture, move_count)?;
        self.copy_dirty(&texture, dirty_count)
    }

    /// Shift moved regions on the shared surface. Each rect bounces
    /// through the scratch surface so overlapping source/destination
    /// windows read pre-move pixels.
    fn copy_move(&mut self, texture: &ID3D11Texture2D, count: usize) -> CaptureResult<()> {
        if count == 0 {
            return Ok(());
        }
        let Some(rotation) = self.rotation else {
            return Ok(());
        };
        // The remap runs against the acquired image's physical
        // dimensions, which are swapped relative to desktop space on
        // 90/270 outputs.
        let mut tex_desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut tex_desc) };
        self.ensure_move_scratch()?;
        let scratch = self.move_scratch.as_ref().unwrap();

        for mv in &self.move_rects[..count] {
            let region = MoveRegion {
                source: Point {
                    x: mv.SourcePoint.x,
                    y: mv.SourcePoint.y,
                },
                destination: rect_from(mv.DestinationRect),
            };
            let (src, dst) = move_rect_windows(
                rotation,
                &region,
                tex_desc.Width as i32,
                tex_desc.Height as i32,
            );
            let src_box = D3D11_BOX {
                left: src.left as u32,
                top: src.top as u32,
                front: 0,
                right: src.right as u32,
                bottom: src.bottom as u32,
                back: 1,
            };
            unsafe {
                self.gpu.context.CopySubresourceRegion(
                    scratch,
                    0,
                    src.left as u32,
                    src.top as u32,
                    0,
                    &self.shared,
                    0,
                    Some(&src_box),
                );
                self.gpu.context.CopySubresourceRegion(
                    &self.shared,
                    0,
                    dst.left as u32,
                    dst.top as u32,
                    0,
                    scratch,
                    0,
                    Some(&src_box),
                );
            }
        }
        Ok(())
    }

    /// Redraw dirty regions from the acquired image onto the shared
    /// surface: one quad per rect, a single buffer upload and draw for
    /// all of them.
    fn copy_dirty(&mut self, texture: &ID3D11Texture2D, count: usize) -> CaptureResult<()> {
        if count == 0 {
            return Ok(());
        }
        let Some(rotation) = self.rotation else {
            return Ok(());
        };

        let mut tex_desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut tex_desc) };

        let (full_width, full_height) = self.output_size();
        let desk_rect = rect_from(self.desktop_rect);
        let offset = Point {
            x: desk_rect.left,
            y: desk_rect.top,
        };

        self.vertices.clear();
        for rect in &self.dirty_rects[..count] {
            self.vertices.extend_from_slice(&dirty_rect_vertices(
                rotation,
                rect_from(*rect),
                desk_rect,
                offset,
                full_width as i32,
                full_height as i32,
                tex_desc.Width as i32,
                tex_desc.Height as i32,
            ));
        }

        if self.rtv.is_none() {
            let mut rtv: Option<ID3D11RenderTargetView> = None;
            unsafe {
                self.gpu
                    .device
                    .CreateRenderTargetView(&self.shared, None, Some(&mut rtv))
            }
            .context("failed to create render target view over the shared surface")
            .map_err(CaptureError::Platform)?;
            self.rtv = Some(
                rtv.context("CreateRenderTargetView returned no view")
                    .map_err(CaptureError::Platform)?,
            );
        }

        // Transient view over this frame's acquired texture; dropped
        // right after the draw so the frame can be released.
        let mut srv: Option<ID3D11ShaderResourceView> = None;
        unsafe {
            self.gpu
                .device
                .CreateShaderResourceView(texture, None, Some(&mut srv))
        }
        .context("failed to create shader resource view over the acquired frame")
        .map_err(CaptureError::Platform)?;
        let srv = srv
            .context("CreateShaderResourceView returned None")
            .map_err(CaptureError::Platform)?;

        let buffer_desc = D3D11_BUFFER_DESC {
            ByteWidth: (self.vertices.len() * std::mem::size_of::<BlitVertex>()) as u32,
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_VERTEX_BUFFER.0 as u32,
            ..Default::default()
        };
        let init_data = D3D11_SUBRESOURCE_DATA {
            pSysMem: self.vertices.as_ptr() as *const _,
            ..Default::default()
        };
        let mut vertex_buffer: Option<ID3D11Buffer> = None;
        unsafe {
            self.gpu
                .device
                .CreateBuffer(&buffer_desc, Some(&init_data), Some(&mut vertex_buffer))
        }
        .context("failed to create dirty rect vertex buffer")
        .map_err(CaptureError::Platform)?;
        let vertex_buffer = Some(
            vertex_buffer
                .context("CreateBuffer returned no vertex buffer")
                .map_err(CaptureError::Platform)?,
        );

        let context = &self.gpu.context;
        let stride = std::mem::size_of::<BlitVertex>() as u32;
        let offsets = 0u32;
        unsafe {
            context.IASetInputLayout(&self.gpu.input_layout);
            context.VSSetShader(&self.gpu.vertex_shader, None);
            context.PSSetShader(&self.gpu.pixel_shader, None);
            context.PSSetSamplers(0, Some(&[Some(self.gpu.sampler.clone())]));
            context.PSSetShaderResources(0, Some(&[Some(srv)]));
            context.OMSetRenderTargets(Some(&[self.rtv.clone()]), None);
            context.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            context.IASetVertexBuffers(0, 1, Some(&vertex_buffer), Some(&stride), Some(&offsets));
            context.RSSetViewports(Some(&[D3D11_VIEWPORT {
                TopLeftX: 0.0,
                TopLeftY: 0.0,
                Width: full_width as f32,
                Height: full_height as f32,
                MinDepth: 0.0,
                MaxDepth: 1.0,
            }]));
            context.Draw(self.vertices.len() as u32, 0);
            // Unbind the transient view before the frame is released.
            context.PSSetShaderResources(0, Some(&[None]));
        }

        Ok(())
    }

    /// Fold this frame's pointer metadata into the shared tracker.
    fn update_pointer(&mut self, pointer: &mut PointerState) -> CaptureResult<()> {
        let Some(held) = &self.held else {
            return Ok(());
        };
        let info = held.info;

        // A zero timestamp means the frame carried no pointer
        // metadata at all; leave position and shape untouched.
        if info.LastMouseUpdateTime == 0 {
            return Ok(());
        }

        pointer.apply(&PointerReport {
            session: self.output_index,
            visible: info.PointerPosition.Visible.as_bool(),
            position: Point {
                x: info.PointerPosition.Position.x + self.desktop_rect.left,
                y: info.PointerPosition.Position.y + self.desktop_rect.top,
            },
            last_updated: info.LastMouseUpdateTime,
        });

        let shape_size = info.PointerShapeBufferSize as usize;
        if shape_size == 0 {
            return Ok(());
        }
        let duplication = self
            .duplication
            .as_ref()
            .ok_or(CaptureError::AccessLost)?
            .clone();

        let buffer = pointer.ensure_shape_capacity(shape_size)?;
        let mut required = 0u32;
        let mut shape_info = DXGI_OUTDUPL_POINTER_SHAPE_INFO::default();
        let fetched = unsafe {
            duplication.GetFramePointerShape(
                shape_size as u32,
                buffer.as_mut_ptr() as *mut _,
                &mut required,
                &mut shape_info,
            )
        };
        if let Err(error) = fetched {
            warn!(error = %error, "failed to retrieve pointer shape");
            pointer.discard_shape();
            return Err(CaptureError::ShapeRetrievalFailed);
        }

        pointer.set_shape_info(ShapeInfo {
            kind: shape_info.Type,
            width: shape_info.Width,
            height: shape_info.Height,
            pitch: shape_info.Pitch,
            hot_spot: Point {
                x: shape_info.HotSpot.x,
                y: shape_info.HotSpot.y,
            },
        });
        Ok(())
    }

    fn ensure_move_scratch(&mut self) -> CaptureResult<()> {
        if self.move_scratch.is_some() {
            return Ok(());
        }
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { self.shared.GetDesc(&mut desc) };
        desc.BindFlags = D3D11_BIND_RENDER_TARGET.0 as u32;
        desc.MiscFlags = 0;

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { self.gpu.device.CreateTexture2D(&desc, None, Some(&mut texture)) }
            .context("failed to create move scratch surface")
            .map_err(CaptureError::Platform)?;
        self.move_scratch = Some(
            texture
                .context("CreateTexture2D returned no move scratch surface")
                .map_err(CaptureError::Platform)?,
        );
        Ok(())
    }
}

impl DuplicationLink for DuplicationSession {
    type Frame = ();

    fn is_open(&self) -> bool {
        self.duplication.is_some()
    }

    /// Tear everything frame-size-dependent down, re-read the output
    /// geometry (the loss may have been a mode or rotation change), and
    /// duplicate again. Failure leaves the session closed.
    fn reopen(&mut self) -> CaptureResult<()> {
        if self.held.take().is_some() {
            if let Some(duplication) = &self.duplication {
                unsafe { duplication.ReleaseFrame() }.ok();
            }
        }
        self.duplication = None;
        self.staging = None;
        self.move_scratch = None;
        self.rtv = None;

        // The old IDXGIOutput may be stale after a topology or driver
        // change; resolve the output again before reading geometry.
        self.output = resolve_output(&self.gpu.device, self.output_index)?;
        let (desktop_rect, rotation) = read_output_geometry(&self.output)?;
        self.desktop_rect = desktop_rect;
        self.rotation = rotation;
        self.shared = create_shared_surface(&self.gpu.device, &desktop_rect)?;
        self.start()
    }

    fn try_acquire(&mut self, timeout_ms: u32) -> CaptureResult<AcquireStatus<()>> {
        // A frame still held here means a previous cycle aborted
        // mid-delivery; drop it before acquiring again.
        if self.held.take().is_some() {
            if let Some(duplication) = &self.duplication {
                unsafe { duplication.ReleaseFrame() }.ok();
            }
        }
        let duplication = self.duplication.as_ref().ok_or(CaptureError::AccessLost)?;

        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        let acquired = unsafe { duplication.AcquireNextFrame(timeout_ms, &mut info, &mut resource) };
        if let Err(error) = acquired {
            if error.code() == DXGI_ERROR_WAIT_TIMEOUT {
                return Ok(AcquireStatus::Timeout);
            }
            if error.code() == DXGI_ERROR_ACCESS_LOST {
                self.duplication = None;
                return Err(CaptureError::AccessLost);
            }
            return Err(CaptureError::Platform(
                anyhow::Error::from(error).context("AcquireNextFrame failed"),
            ));
        }

        let resource = resource
            .context("AcquireNextFrame returned no resource")
            .map_err(CaptureError::Platform)?;
        let texture: ID3D11Texture2D = resource
            .cast()
            .context("failed to cast acquired IDXGIResource to ID3D11Texture2D")
            .map_err(CaptureError::Platform)?;

        self.held = Some(AcquiredFrame { texture, info });
        Ok(AcquireStatus::Frame(()))
    }

    fn try_release(&mut self) -> CaptureResult<()> {
        if self.held.take().is_none() {
            return Ok(());
        }
        let Some(duplication) = self.duplication.as_ref() else {
            return Ok(());
        };
        match unsafe { duplication.ReleaseFrame() } {
            Ok(()) => Ok(()),
            Err(error) if error.code() == DXGI_ERROR_ACCESS_LOST => {
                self.duplication = None;
                Err(CaptureError::AccessLost)
            }
            Err(error) => Err(CaptureError::Platform(
                anyhow::Error::from(error).context("ReleaseFrame failed"),
            )),
        }
    }
}

fn rect_from(rect: RECT) -> Rect {
    Rect::new(rect.left, rect.top, rect.right, rect.bottom)
}

/// Resolve `output_index` on the adapter the device was created on.
fn resolve_output(device: &ID3D11Device, output_index: u32) -> CaptureResult<IDXGIOutput> {
    let dxgi_device: IDXGIDevice = device
        .cast()
        .context("failed to query IDXGIDevice")
        .map_err(CaptureError::Platform)?;
    let adapter = unsafe { dxgi_device.GetAdapter() }
        .context("IDXGIDevice::GetAdapter failed")
        .map_err(CaptureError::Platform)?;

    match unsafe { adapter.EnumOutputs(output_index) } {
        Ok(output) => Ok(output),
        Err(error) if error.code() == DXGI_ERROR_NOT_FOUND => {
            Err(CaptureError::OutputEnumerationFailed(output_index))
        }
        Err(error) => Err(CaptureError::Platform(
            anyhow::Error::from(error).context(format!("EnumOutputs({output_index}) failed")),
        )),
    }
}

fn read_output_geometry(output: &IDXGIOutput) -> CaptureResult<(RECT, Option<Rotation>)> {
    let desc = unsafe { output.GetDesc() }
        .context("IDXGIOutput::GetDesc failed")
        .map_err(CaptureError::Platform)?;
    let rotation = Rotation::from_mode_value(desc.Rotation.0);
    if rotation.is_none() {
        warn!(
            mode = desc.Rotation.0,
            "output reports an unexpected rotation mode, reconstruction disabled"
        );
    }
    Ok((desc.DesktopCoordinates, rotation))
}

fn create_shared_surface(
    device: &ID3D11Device,
    desktop_rect: &RECT,
) -> CaptureResult<ID3D11Texture2D> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: (desktop_rect.right - desktop_rect.left) as u32,
        Height: (desktop_rect.bottom - desktop_rect.top) as u32,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
        CPUAccessFlags: 0,
        MiscFlags: 0,
    };

    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
        .context("failed to create shared output surface")
        .map_err(CaptureError::Platform)?;
    texture
        .context("CreateTexture2D returned no shared surface")
        .map_err(CaptureError::Platform)
}
