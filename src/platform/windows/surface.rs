use anyhow::Context;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_CPU_ACCESS_READ, D3D11_MAP_READ, D3D11_MAPPED_SUBRESOURCE, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_STAGING, ID3D11Device, ID3D11DeviceContext, ID3D11Resource, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::DXGI_SAMPLE_DESC;
use windows::core::Interface;

use crate::convert;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::PlanarFrame;

/// Get a CPU-readable staging texture matching `src`, recreating it
/// only when the source dimensions or format changed.
pub(crate) fn ensure_staging_texture<'a>(
    device: &ID3D11Device,
    staging: &'a mut Option<ID3D11Texture2D>,
    src: &D3D11_TEXTURE2D_DESC,
) -> CaptureResult<&'a ID3D11Texture2D> {
    let needs_new_staging = match staging {
        Some(existing) => {
            let mut desc = D3D11_TEXTURE2D_DESC::default();
            unsafe { existing.GetDesc(&mut desc) };
            desc.Width != src.Width || desc.Height != src.Height || desc.Format != src.Format
        }
        None => true,
    };

    if needs_new_staging {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: src.Width,
            Height: src.Height,
            MipLevels: 1,
            ArraySize: 1,
            Format: src.Format,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: Default::default(),
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: Default::default(),
        };

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
            .context("failed to create staging texture for CPU readback")
            .map_err(CaptureError::Platform)?;
        *staging = texture;
    }

    Ok(staging.as_ref().unwrap())
}

/// Map an already-populated BGRA staging texture and convert its
/// contents into `frame` as I420. The blocking `Map` doubles as the
/// synchronization point for the GPU work that filled the texture; the
/// texture is unmapped on every path.
pub(crate) fn map_staging_to_planar(
    context: &ID3D11DeviceContext,
    staging: &ID3D11Texture2D,
    desc: &D3D11_TEXTURE2D_DESC,
    frame: &mut PlanarFrame,
) -> CaptureResult<()> {
    let resource: ID3D11Resource = staging
        .cast()
        .context("failed to cast staging texture to ID3D11Resource")
        .map_err(CaptureError::Platform)?;

    let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
    unsafe { context.Map(&resource, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
        .context("failed to map staging texture")
        .map_err(CaptureError::Platform)?;

    let result = convert_mapped(desc, &mapped, frame);
    unsafe {
        context.Unmap(&resource, 0);
    }
    result
}

fn convert_mapped(
    desc: &D3D11_TEXTURE2D_DESC,
    mapped: &D3D11_MAPPED_SUBRESOURCE,
    frame: &mut PlanarFrame,
) -> CaptureResult<()> {
    let height = usize::try_from(desc.Height).map_err(|_| CaptureError::BufferOverflow)?;
    let pitch = mapped.RowPitch as usize;
    let len = pitch
        .checked_mul(height)
        .ok_or(CaptureError::BufferOverflow)?;
    let src = unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, len) };
    convert::bgra_to_i420(src, pitch, desc.Width, desc.Height, frame)
}
