// src/combined.rs
//! Combined-texture pool.
//!
//! Materials whose channels collapse to uniform colors (or to small packs of
//! single-component images) would each upload their own near-identical
//! texture. The pool deduplicates them by content: a combined texture is keyed
//! by its uniform color plus up to four source images, one per component.
//!
//! Ownership is the usage count: `get_or_create` returns a shared handle, and
//! when the last handle drops the entry leaves the pool and its GPU texture is
//! posted to the deferred free queue. There is no manual add/release pairing
//! to get wrong.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::deferred::DeferredOperations;
use crate::device::{GpuTexture, RenderDevice, TextureDesc};
use crate::error::Result;
use crate::format::TextureKind;
use crate::hash::ContentHasher;
use crate::mipmap::MipChain;
use crate::pixels::{Color, PixelBuffer, PixelFormat};

/// One deduplicated texture: a uniform color with up to four component images.
pub struct CombinedTexture {
    color: Color,
    images: [Option<Arc<crate::source::ImageSource>>; 4],
    /// Advisory content hash; fast rejection and labels only, equality always
    /// re-checks the full tuple.
    content_hash: u32,
    gpu: Mutex<Option<Arc<GpuTexture>>>,
}

/// Hash the (color, image paths) tuple for fast pool rejection.
fn content_hash(color: &Color, images: &[Option<Arc<crate::source::ImageSource>>; 4]) -> u32 {
    let mut hasher = ContentHasher::new();
    for bits in color.bits() {
        hasher.update_u32(bits);
    }
    for image in images {
        match image {
            Some(image) => hasher.update_str(&image.path),
            None => hasher.update(&[0]),
        }
    }
    hasher.finish()
}

impl CombinedTexture {
    #[inline]
    pub fn color(&self) -> Color {
        self.color
    }

    #[inline]
    pub fn content_hash(&self) -> u32 {
        self.content_hash
    }

    /// Content equality: identical color bits and identical image objects.
    pub fn matches(
        &self,
        color: &Color,
        images: &[Option<Arc<crate::source::ImageSource>>; 4],
    ) -> bool {
        if self.color.bits() != color.bits() {
            return false;
        }
        self.images
            .iter()
            .zip(images.iter())
            .all(|(a, b)| match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            })
    }

    /// The GPU texture, if already created by a previous init drain.
    pub fn gpu(&self) -> Option<Arc<GpuTexture>> {
        self.gpu.lock().clone()
    }

    /// Create the GPU texture on first use; later callers share it.
    ///
    /// Component `c` samples `images[c]` where present, otherwise the uniform
    /// color component. Without images the texture is a single texel.
    pub fn gpu_or_create(
        &self,
        device: &dyn RenderDevice,
        ops: &Arc<DeferredOperations>,
    ) -> Result<Arc<GpuTexture>> {
        let mut slot = self.gpu.lock();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }

        let (width, height) = self
            .images
            .iter()
            .flatten()
            .next()
            .map(|img| (img.width, img.height))
            .unwrap_or((1, 1));

        let mut buffer = PixelBuffer::new(PixelFormat::Rgba8, width, height, 1)?;
        buffer.fill_uniform(&self.color, [true; 4]);
        for (c, image) in self.images.iter().enumerate() {
            let Some(image) = image else { continue };
            for y in 0..height.min(image.height) {
                for x in 0..width.min(image.width) {
                    buffer.set_component(x, y, 0, c, image.component(x, y, 0, 0));
                }
            }
        }

        let chain = MipChain::base_only(buffer);
        let desc = TextureDesc {
            label: format!("combined-{:08x}", self.content_hash),
            width,
            height,
            depth: 1,
            format: PixelFormat::Rgba8,
            mip_count: 1,
            kind: TextureKind::Flat,
        };
        let texture = GpuTexture::create(device, desc, &chain, ops.clone())?;
        *slot = Some(texture.clone());
        Ok(texture)
    }
}

/// The pool itself. Holds weak references only; entries die with their last
/// outside handle.
pub struct CombinedTexturePool {
    entries: Mutex<Vec<Weak<CombinedTexture>>>,
}

impl CombinedTexturePool {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Find the entry with this exact content or create it. Every call hands
    /// out one more owning handle.
    pub fn get_or_create(
        &self,
        color: Color,
        images: [Option<Arc<crate::source::ImageSource>>; 4],
    ) -> Arc<CombinedTexture> {
        let hash = content_hash(&color, &images);
        let mut entries = self.entries.lock();
        entries.retain(|weak| weak.strong_count() > 0);
        for weak in entries.iter() {
            if let Some(entry) = weak.upgrade() {
                if entry.content_hash == hash && entry.matches(&color, &images) {
                    return entry;
                }
            }
        }
        let entry = Arc::new(CombinedTexture {
            color,
            images,
            content_hash: hash,
            gpu: Mutex::new(None),
        });
        entries.push(Arc::downgrade(&entry));
        entry
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        entries.retain(|weak| weak.strong_count() > 0);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CombinedTexturePool {
    fn default() -> Self {
        Self::new()
    }
}
