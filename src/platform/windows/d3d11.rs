use std::sync::OnceLock;

use anyhow::Context;
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_REFERENCE, D3D_DRIVER_TYPE_WARP,
    D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_9_1, D3D_FEATURE_LEVEL_10_0, D3D_FEATURE_LEVEL_10_1,
    D3D_FEATURE_LEVEL_11_0,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_COMPARISON_NEVER, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_FILTER_MIN_MAG_MIP_LINEAR,
    D3D11_INPUT_ELEMENT_DESC, D3D11_INPUT_PER_VERTEX_DATA, D3D11_SAMPLER_DESC, D3D11_SDK_VERSION,
    D3D11_TEXTURE_ADDRESS_CLAMP, D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext,
    ID3D11InputLayout, ID3D11PixelShader, ID3D11SamplerState, ID3D11VertexShader,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_R32G32_FLOAT, DXGI_FORMAT_R32G32B32_FLOAT};
use windows::core::s;

use crate::error::{CaptureError, CaptureResult};

/// Shared rendering context for every duplication session: the device,
/// its immediate context, and the fixed blit pipeline state used to
/// redraw dirty rects onto the shared surface.
///
/// Any creation step failing means no capture is possible on this
/// machine; no partially built context ever escapes.
pub(crate) struct GpuContext {
    pub(crate) device: ID3D11Device,
    pub(crate) context: ID3D11DeviceContext,
    pub(crate) vertex_shader: ID3D11VertexShader,
    pub(crate) pixel_shader: ID3D11PixelShader,
    pub(crate) input_layout: ID3D11InputLayout,
    pub(crate) sampler: ID3D11SamplerState,
}

impl GpuContext {
    pub(crate) fn new() -> CaptureResult<Self> {
        build_context().map_err(CaptureError::DeviceInitFailed)
    }
}

fn build_context() -> anyhow::Result<GpuContext> {
    let (device, context) = create_device()?;

    let vs_bytecode = blit_vs_bytecode()?;
    let ps_bytecode = blit_ps_bytecode()?;

    let mut vertex_shader: Option<ID3D11VertexShader> = None;
    unsafe { device.CreateVertexShader(vs_bytecode, None, Some(&mut vertex_shader)) }
        .context("CreateVertexShader failed")?;
    let vertex_shader = vertex_shader.context("CreateVertexShader returned None")?;

    let mut pixel_shader: Option<ID3D11PixelShader> = None;
    unsafe { device.CreatePixelShader(ps_bytecode, None, Some(&mut pixel_shader)) }
        .context("CreatePixelShader failed")?;
    let pixel_shader = pixel_shader.context("CreatePixelShader returned None")?;

    let layout_desc = [
        D3D11_INPUT_ELEMENT_DESC {
            SemanticName: s!("POSITION"),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32B32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: 0,
            InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
        D3D11_INPUT_ELEMENT_DESC {
            SemanticName: s!("TEXCOORD"),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: 12,
            InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
    ];
    let mut input_layout: Option<ID3D11InputLayout> = None;
    unsafe { device.CreateInputLayout(&layout_desc, vs_bytecode, Some(&mut input_layout)) }
        .context("CreateInputLayout failed")?;
    let input_layout = input_layout.context("CreateInputLayout returned None")?;

    let sampler_desc = D3D11_SAMPLER_DESC {
        Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
        AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
        AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
        AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
        ComparisonFunc: D3D11_COMPARISON_NEVER,
        MinLOD: 0.0,
        MaxLOD: f32::MAX,
        ..Default::default()
    };
    let mut sampler: Option<ID3D11SamplerState> = None;
    unsafe { device.CreateSamplerState(&sampler_desc, Some(&mut sampler)) }
        .context("CreateSamplerState failed")?;
    let sampler = sampler.context("CreateSamplerState returned None")?;

    Ok(GpuContext {
        device,
        context,
        vertex_shader,
        pixel_shader,
        input_layout,
        sampler,
    })
}

/// Create the device by walking an ordered driver-type preference list
/// so machines without hardware acceleration still capture via WARP.
fn create_device() -> anyhow::Result<(ID3D11Device, ID3D11DeviceContext)> {
    const DRIVER_TYPES: [D3D_DRIVER_TYPE; 3] = [
        D3D_DRIVER_TYPE_HARDWARE,
        D3D_DRIVER_TYPE_WARP,
        D3D_DRIVER_TYPE_REFERENCE,
    ];
    const FEATURE_LEVELS: [D3D_FEATURE_LEVEL; 4] = [
        D3D_FEATURE_LEVEL_11_0,
        D3D_FEATURE_LEVEL_10_1,
        D3D_FEATURE_LEVEL_10_0,
        D3D_FEATURE_LEVEL_9_1,
    ];

    let mut last_error = None;
    for driver_type in DRIVER_TYPES {
        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;
        let created = unsafe {
            D3D11CreateDevice(
                None,
                driver_type,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                Some(&FEATURE_LEVELS),
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
        };
        match created {
            Ok(()) => {
                let device = device.context("D3D11CreateDevice did not return a device")?;
                let context =
                    context.context("D3D11CreateDevice did not return a device context")?;
                return Ok((device, context));
            }
            Err(error) => last_error = Some(error),
        }
    }

    Err(anyhow::Error::from(last_error.expect("driver type list is non-empty"))
        .context("D3D11CreateDevice failed for every driver type"))
}

// Blit shader sourcing: prefer the .cso pair precompiled by build.rs
// (fxc.exe from a Windows SDK), fall back to runtime D3DCompile on
// first use.

#[cfg(has_precompiled_blit)]
const PRECOMPILED_VS: &[u8] = include_bytes!(env!("BLIT_VS_CSO_PATH"));
#[cfg(has_precompiled_blit)]
const PRECOMPILED_PS: &[u8] = include_bytes!(env!("BLIT_PS_CSO_PATH"));

fn blit_vs_bytecode() -> anyhow::Result<&'static [u8]> {
    static BYTECODE: OnceLock<anyhow::Result<Vec<u8>>> = OnceLock::new();
    cached_bytecode(&BYTECODE, b"vs_main\0", b"vs_5_0\0", {
        #[cfg(has_precompiled_blit)]
        {
            Some(PRECOMPILED_VS)
        }
        #[cfg(not(has_precompiled_blit))]
        {
            None
        }
    })
}

fn blit_ps_bytecode() -> anyhow::Result<&'static [u8]> {
    static BYTECODE: OnceLock<anyhow::Result<Vec<u8>>> = OnceLock::new();
    cached_bytecode(&BYTECODE, b"ps_main\0", b"ps_5_0\0", {
        #[cfg(has_precompiled_blit)]
        {
            Some(PRECOMPILED_PS)
        }
        #[cfg(not(has_precompiled_blit))]
        {
            None
        }
    })
}

fn cached_bytecode(
    cell: &'static OnceLock<anyhow::Result<Vec<u8>>>,
    entry: &'static [u8],
    target: &'static [u8],
    precompiled: Option<&'static [u8]>,
) -> anyhow::Result<&'static [u8]> {
    let cached = cell.get_or_init(|| match precompiled {
        Some(bytes) => Ok(bytes.to_vec()),
        None => compile_shader_runtime(entry, target),
    });
    match cached {
        Ok(bytes) => Ok(bytes.as_slice()),
        Err(error) => Err(anyhow::anyhow!("{error:#}")),
    }
}

fn compile_shader_runtime(entry: &[u8], target: &[u8]) -> anyhow::Result<Vec<u8>> {
    use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;
    use windows::core::PCSTR;

    let source = include_str!("blit.hlsl").as_bytes();
    let mut blob = None;
    let mut errors = None;

    let compiled = unsafe {
        D3DCompile(
            source.as_ptr() as *const _,
            source.len(),
            None,
            None,
            None,
            PCSTR::from_raw(entry.as_ptr()),
            PCSTR::from_raw(target.as_ptr()),
            0,
            0,
            &mut blob,
            Some(&mut errors),
        )
    };

    if let Err(error) = compiled {
        let diagnostics = errors
            .map(|blob| {
                let ptr = unsafe { blob.GetBufferPointer() } as *const u8;
                let len = unsafe { blob.GetBufferSize() };
                let slice = unsafe { std::slice::from_raw_parts(ptr, len) };
                String::from_utf8_lossy(slice).to_string()
            })
            .unwrap_or_default();
        return Err(
            anyhow::anyhow!("HLSL compile failed: {diagnostics}").context(error.to_string())
        );
    }

    let blob = blob.context("D3DCompile returned no blob")?;
    let ptr = unsafe { blob.GetBufferPointer() } as *const u8;
    let len = unsafe { blob.GetBufferSize() };
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec())
}
