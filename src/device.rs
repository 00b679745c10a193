// src/device.rs
//! Graphics device boundary.
//!
//! The pipeline never talks to a graphics API directly: texture creation and
//! deletion go through the object-safe [`RenderDevice`] trait with opaque
//! `u64` handles, so the compile and cache stages are testable without a GPU.
//! [`WgpuDevice`] is the production adapter. [`GpuTexture`] is the shared
//! handle wrapper; dropping the last reference posts the delete to the
//! deferred free queue instead of touching the device inline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::deferred::{DeferredOperations, FreeOp};
use crate::error::{Error, Result};
use crate::format::TextureKind;
use crate::mipmap::MipChain;
use crate::pixels::PixelFormat;

/// Everything a device needs to create one texture.
#[derive(Clone, Debug)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: PixelFormat,
    pub mip_count: u32,
    pub kind: TextureKind,
}

/// Minimal device interface used by the render-thread queue drains.
pub trait RenderDevice: Send + Sync {
    /// Create a texture and upload all mip payloads. `mips[i]` holds the
    /// bytes of level `i` for every depth layer.
    fn create_texture(&self, desc: &TextureDesc, mips: &[&[u8]]) -> Result<u64>;

    /// Destroy a texture previously returned by `create_texture`.
    fn delete_texture(&self, handle: u64);
}

// ────────────────────────────────────────────────────────────────────────────
// Shared GPU texture handle
// ────────────────────────────────────────────────────────────────────────────

/// A live GPU texture shared between materials.
///
/// Deletion is deferred: the last drop posts a free operation, and the render
/// thread releases the device object on its next drain.
pub struct GpuTexture {
    handle: u64,
    desc: TextureDesc,
    ops: Arc<DeferredOperations>,
}

impl GpuTexture {
    /// Create the device texture from a baked mip chain and wrap it.
    pub fn create(
        device: &dyn RenderDevice,
        desc: TextureDesc,
        chain: &MipChain,
        ops: Arc<DeferredOperations>,
    ) -> Result<Arc<Self>> {
        let mips: Vec<&[u8]> = chain.levels().iter().map(|l| l.data()).collect();
        let handle = device.create_texture(&desc, &mips)?;
        Ok(Arc::new(Self { handle, desc, ops }))
    }

    #[inline]
    pub fn handle(&self) -> u64 {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }
}

impl Drop for GpuTexture {
    fn drop(&mut self) {
        self.ops.add_free(FreeOp::Texture(self.handle));
    }
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuTexture")
            .field("handle", &self.handle)
            .field("label", &self.desc.label)
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// wgpu adapter
// ────────────────────────────────────────────────────────────────────────────

/// Production device backed by wgpu.
///
/// Three-component formats have no wgpu equivalent; their texel data is padded
/// to four components during upload.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    textures: Mutex<HashMap<u64, wgpu::Texture>>,
    next_handle: AtomicU64,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            textures: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn wgpu_format(format: PixelFormat) -> wgpu::TextureFormat {
        match format {
            PixelFormat::R8 => wgpu::TextureFormat::R8Unorm,
            PixelFormat::Rg8 => wgpu::TextureFormat::Rg8Unorm,
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            PixelFormat::R32F => wgpu::TextureFormat::R32Float,
            PixelFormat::Rg32F => wgpu::TextureFormat::Rg32Float,
            PixelFormat::Rgb32F | PixelFormat::Rgba32F => wgpu::TextureFormat::Rgba32Float,
            PixelFormat::Dxt1 => wgpu::TextureFormat::Bc1RgbaUnorm,
            PixelFormat::Dxt3 => wgpu::TextureFormat::Bc2RgbaUnorm,
        }
    }

    /// Expand 3-component data to 4 components for upload.
    fn pad_rgb(format: PixelFormat, data: &[u8]) -> Option<Vec<u8>> {
        match format {
            PixelFormat::Rgb8 => {
                let mut out = Vec::with_capacity(data.len() / 3 * 4);
                for texel in data.chunks_exact(3) {
                    out.extend_from_slice(texel);
                    out.push(255);
                }
                Some(out)
            }
            PixelFormat::Rgb32F => {
                let src: &[f32] = bytemuck::cast_slice(data);
                let mut out = Vec::with_capacity(src.len() / 3 * 4);
                for texel in src.chunks_exact(3) {
                    out.extend_from_slice(texel);
                    out.push(1.0);
                }
                Some(bytemuck::cast_slice(&out).to_vec())
            }
            _ => None,
        }
    }

    fn upload_layout(
        format: PixelFormat,
        width: u32,
        height: u32,
        padded: bool,
    ) -> (u32, u32) {
        match format {
            PixelFormat::Dxt1 => (width.div_ceil(4) * 8, height.div_ceil(4)),
            PixelFormat::Dxt3 => (width.div_ceil(4) * 16, height.div_ceil(4)),
            _ => {
                let bpp = if padded {
                    match format {
                        PixelFormat::Rgb8 => 4,
                        PixelFormat::Rgb32F => 16,
                        _ => unreachable!(),
                    }
                } else {
                    format.bytes_per_pixel() as u32
                };
                (width * bpp, height)
            }
        }
    }
}

impl RenderDevice for WgpuDevice {
    fn create_texture(&self, desc: &TextureDesc, mips: &[&[u8]]) -> Result<u64> {
        if mips.len() != desc.mip_count as usize {
            return Err(Error::device(format!(
                "texture '{}': {} mip payloads for mip_count {}",
                desc.label,
                mips.len(),
                desc.mip_count
            )));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.depth,
            },
            mip_level_count: desc.mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::wgpu_format(desc.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for (level, data) in mips.iter().enumerate() {
            let w = (desc.width >> level).max(1);
            let h = (desc.height >> level).max(1);
            let padded = Self::pad_rgb(desc.format, data);
            let upload: &[u8] = padded.as_deref().unwrap_or(data);
            let (bytes_per_row, rows) =
                Self::upload_layout(desc.format, w, h, padded.is_some());
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: level as u32,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                upload,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(rows),
                },
                wgpu::Extent3d {
                    width: w,
                    height: h,
                    depth_or_array_layers: desc.depth,
                },
            );
        }

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.textures.lock().insert(handle, texture);
        Ok(handle)
    }

    fn delete_texture(&self, handle: u64) {
        if let Some(texture) = self.textures.lock().remove(&handle) {
            texture.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wgpu_format_mapping() {
        assert_eq!(
            WgpuDevice::wgpu_format(PixelFormat::Rgb8),
            wgpu::TextureFormat::Rgba8Unorm
        );
        assert_eq!(
            WgpuDevice::wgpu_format(PixelFormat::Dxt1),
            wgpu::TextureFormat::Bc1RgbaUnorm
        );
        assert_eq!(
            WgpuDevice::wgpu_format(PixelFormat::R32F),
            wgpu::TextureFormat::R32Float
        );
    }

    #[test]
    fn test_pad_rgb8() {
        let padded = WgpuDevice::pad_rgb(PixelFormat::Rgb8, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(padded, vec![1, 2, 3, 255, 4, 5, 6, 255]);
        assert!(WgpuDevice::pad_rgb(PixelFormat::Rgba8, &[0; 4]).is_none());
    }

    #[test]
    fn test_upload_layout_compressed() {
        assert_eq!(
            WgpuDevice::upload_layout(PixelFormat::Dxt1, 8, 8, false),
            (16, 2)
        );
        assert_eq!(
            WgpuDevice::upload_layout(PixelFormat::Rgba8, 8, 8, false),
            (32, 8)
        );
    }
}
