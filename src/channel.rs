// src/channel.rs
//! Texture channels and the channel compiler.
//!
//! A material texture is a fixed set of channels (color, normal, solidity,
//! ...). Each channel starts as a per-kind uniform default color; property
//! sources overwrite components and may promote the channel to real pixel
//! content. A channel moves through the stages resolve → cache lookup → bake
//! → mip generation → compression → cache write; every stage is skippable
//! when the content does not need it, but the order never changes.

use std::sync::Arc;

use log::warn;

use crate::cache::{CacheEntry, TextureCache};
use crate::combined::{CombinedTexture, CombinedTexturePool};
use crate::compress;
use crate::config::PipelineConfig;
use crate::deferred::DeferredOperations;
use crate::device::{GpuTexture, RenderDevice, TextureDesc};
use crate::error::{Error, Result};
use crate::format::{ChannelFormat, FormatResolver};
use crate::mipmap::{MipChain, MipFilter};
use crate::pixels::{Color, PixelBuffer};
use crate::source::{ImageSource, PropertySource};

/// Thresholds of the solidity mip filter selection: below the lower band the
/// channel keeps its darkest texels (`Min`), above the upper band its
/// brightest (`Max`), in between a plain box filter.
pub const SOLIDITY_FILTER_LOW: f32 = 0.35;
pub const SOLIDITY_FILTER_HIGH: f32 = 0.65;

// ────────────────────────────────────────────────────────────────────────────
// Channel kinds
// ────────────────────────────────────────────────────────────────────────────

/// Every channel a material texture can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Color,
    ColorTintMask,
    Transparency,
    Solidity,
    Normal,
    Height,
    Emissivity,
    RefractDistort,
    AmbientOcclusion,
    Reflectivity,
    Roughness,
    EnvironmentMap,
    ColorOmnidirEquirect,
}

/// All kinds in compile order.
pub const CHANNEL_KINDS: [ChannelKind; 13] = [
    ChannelKind::Color,
    ChannelKind::ColorTintMask,
    ChannelKind::Transparency,
    ChannelKind::Solidity,
    ChannelKind::Normal,
    ChannelKind::Height,
    ChannelKind::Emissivity,
    ChannelKind::RefractDistort,
    ChannelKind::AmbientOcclusion,
    ChannelKind::Reflectivity,
    ChannelKind::Roughness,
    ChannelKind::EnvironmentMap,
    ChannelKind::ColorOmnidirEquirect,
];

impl ChannelKind {
    #[inline]
    pub fn index(&self) -> usize {
        CHANNEL_KINDS.iter().position(|k| k == self).unwrap_or(0)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::Color => "color",
            ChannelKind::ColorTintMask => "color.tint.mask",
            ChannelKind::Transparency => "transparency",
            ChannelKind::Solidity => "solidity",
            ChannelKind::Normal => "normal",
            ChannelKind::Height => "height",
            ChannelKind::Emissivity => "emissivity",
            ChannelKind::RefractDistort => "refract.distort",
            ChannelKind::AmbientOcclusion => "ambient.occlusion",
            ChannelKind::Reflectivity => "reflectivity",
            ChannelKind::Roughness => "roughness",
            ChannelKind::EnvironmentMap => "environment.map",
            ChannelKind::ColorOmnidirEquirect => "color.omnidir.equirect",
        }
    }

    /// The color a channel holds before any property touches it.
    pub fn uniform_default(&self) -> Color {
        match self {
            ChannelKind::Color => Color::new(0.0, 0.0, 0.0, 1.0),
            ChannelKind::ColorTintMask
            | ChannelKind::Transparency
            | ChannelKind::Solidity
            | ChannelKind::AmbientOcclusion
            | ChannelKind::Roughness => Color::new(1.0, 0.0, 0.0, 0.0),
            ChannelKind::Normal => Color::new(0.5, 0.5, 1.0, 0.0),
            ChannelKind::Height => Color::new(1.0, 1.0, 0.0, 0.0),
            ChannelKind::RefractDistort => Color::new(0.5, 0.5, 0.0, 0.0),
            ChannelKind::Emissivity
            | ChannelKind::Reflectivity
            | ChannelKind::EnvironmentMap
            | ChannelKind::ColorOmnidirEquirect => Color::new(0.0, 0.0, 0.0, 0.0),
        }
    }

    /// Component count the channel naturally carries.
    pub fn natural_components(&self) -> u8 {
        match self {
            ChannelKind::Color
            | ChannelKind::Normal
            | ChannelKind::Emissivity
            | ChannelKind::Reflectivity
            | ChannelKind::EnvironmentMap
            | ChannelKind::ColorOmnidirEquirect => 3,
            ChannelKind::RefractDistort => 2,
            _ => 1,
        }
    }

    /// Component a scalar value property writes to.
    #[inline]
    pub fn value_target(&self) -> usize {
        0
    }

    #[inline]
    pub fn is_cube(&self) -> bool {
        matches!(self, ChannelKind::EnvironmentMap)
    }

    /// Direction-indexed channels never mip-map.
    #[inline]
    pub fn mip_mappable(&self) -> bool {
        !matches!(
            self,
            ChannelKind::EnvironmentMap | ChannelKind::ColorOmnidirEquirect
        )
    }

    /// Downsample filter for this channel's content. Solidity picks by the
    /// material's filter priority: low priorities erode coverage, high
    /// priorities preserve it.
    pub fn mip_filter(&self, solidity_priority: f32) -> MipFilter {
        match self {
            ChannelKind::Normal => MipFilter::Normal,
            ChannelKind::AmbientOcclusion => MipFilter::Max,
            ChannelKind::Solidity => {
                if solidity_priority < SOLIDITY_FILTER_LOW {
                    MipFilter::Min
                } else if solidity_priority > SOLIDITY_FILTER_HIGH {
                    MipFilter::Max
                } else {
                    MipFilter::Box
                }
            }
            _ => MipFilter::Box,
        }
    }
}

/// Which buffer components each source component of an image writes.
/// Single-component images feeding wide channels broadcast to RGB.
fn image_target_sets(channel_components: u8, image_components: u8) -> Vec<Vec<usize>> {
    if image_components == 1 && channel_components >= 3 {
        vec![vec![0, 1, 2]]
    } else {
        (0..image_components as usize).map(|c| vec![c]).collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Channel compiler
// ────────────────────────────────────────────────────────────────────────────

/// Compile progress of one channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelStage {
    FormatResolved,
    CacheHit,
    NeedsBake,
    Baked,
    MipMapped,
    Compressed,
    Cached,
}

/// One channel being compiled, and afterwards its result.
pub struct Channel {
    kind: ChannelKind,
    stage: ChannelStage,
    format: ChannelFormat,
    uniform_color: Color,
    /// `true` per component still holding the uniform color.
    uniform_mask: [bool; 4],
    sources: Vec<PropertySource>,
    /// Up to two source descriptors for the cache identity.
    descriptors: Vec<String>,
    /// Set when exactly one image source feeds the channel; enables the
    /// shared-texture fast path.
    image: Option<Arc<ImageSource>>,
    shared_gpu: Option<Arc<GpuTexture>>,
    combined: Option<Arc<CombinedTexture>>,
    cache_identity: Option<String>,
    cache_verify: Vec<u8>,
    mips: Option<MipChain>,
    gpu: Option<Arc<GpuTexture>>,
}

impl Channel {
    /// Resolve the channel format from its sources and set up uniform state.
    /// Returns `None` when no source defines the channel.
    pub fn resolve(kind: ChannelKind, sources: Vec<PropertySource>) -> Option<Channel> {
        let mut resolver = FormatResolver::new(kind);
        for source in &sources {
            resolver.apply(source);
        }
        let format = resolver.resolve()?;

        let mut uniform_color = kind.uniform_default();
        let mut uniform_mask = [true; 4];
        let mut descriptors: Vec<String> = Vec::new();
        let mut images: Vec<Arc<ImageSource>> = Vec::new();

        for source in &sources {
            match source {
                // Value and color properties stay uniform: they update the
                // fill color but leave the mask set.
                PropertySource::Value(value) => {
                    uniform_color.set_component(kind.value_target(), *value);
                }
                PropertySource::Color(color) => {
                    for c in 0..kind.natural_components() as usize {
                        uniform_color.set_component(c, color.component(c));
                    }
                }
                PropertySource::Image(image) => {
                    for set in image_target_sets(format.components, image.components) {
                        for target in set {
                            uniform_mask[target] = false;
                        }
                    }
                    if descriptors.len() < 2 {
                        descriptors.push(format!("I{}", image.path));
                    }
                    images.push(image.clone());
                }
                PropertySource::Video(video) => {
                    for c in 0..video.components.min(4) as usize {
                        uniform_mask[c] = false;
                    }
                }
                PropertySource::Constructed(constructed) => {
                    for c in 0..kind.natural_components() as usize {
                        uniform_mask[c] = false;
                    }
                    if descriptors.len() < 2 {
                        descriptors.push(format!("C{}", constructed.content_digest()));
                    }
                }
                // Mapped values are bound at render time; the baked texel
                // keeps the uniform color.
                PropertySource::Mapped(_) => {}
            }
        }

        let image = if images.len() == 1 {
            Some(images.remove(0))
        } else {
            None
        };

        Some(Channel {
            kind,
            stage: ChannelStage::FormatResolved,
            format,
            uniform_color,
            uniform_mask,
            sources,
            descriptors,
            image,
            shared_gpu: None,
            combined: None,
            cache_identity: None,
            cache_verify: Vec::new(),
            mips: None,
            gpu: None,
        })
    }

    #[inline]
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    #[inline]
    pub fn stage(&self) -> ChannelStage {
        self.stage
    }

    #[inline]
    pub fn format(&self) -> &ChannelFormat {
        &self.format
    }

    #[inline]
    pub fn uniform_color(&self) -> Color {
        self.uniform_color
    }

    #[inline]
    pub fn cache_identity(&self) -> Option<&str> {
        self.cache_identity.as_deref()
    }

    #[inline]
    pub fn mips(&self) -> Option<&MipChain> {
        self.mips.as_ref()
    }

    #[inline]
    pub fn gpu(&self) -> Option<&Arc<GpuTexture>> {
        self.gpu.as_ref()
    }

    #[inline]
    pub fn image(&self) -> Option<&Arc<ImageSource>> {
        self.image.as_ref()
    }

    /// Hand out the combined-pool handle after GPU init; the caller keeps it
    /// alive as long as the texture is in use.
    #[inline]
    pub fn take_combined(&mut self) -> Option<Arc<CombinedTexture>> {
        self.combined.take()
    }

    /// True when nothing but uniform values feed the channel.
    #[inline]
    pub fn is_uniform(&self) -> bool {
        self.format.uniform
    }

    /// Whether mip maps will be generated for this channel.
    fn wants_mipmaps(&self) -> bool {
        self.format.mip_mappable && (self.format.width > 1 || self.format.height > 1)
    }

    /// Whether the compression pass applies to this channel.
    fn wants_compression(&self, config: &PipelineConfig) -> bool {
        if !config.compression || self.format.float {
            return false;
        }
        // Tiny textures are not worth a block; some drivers also dislike
        // sub-block compressed uploads.
        if self.format.width < 2 && self.format.height < 2 {
            return false;
        }
        self.format
            .pixel_format()
            .ok()
            .and_then(compress::target_format)
            .is_some()
    }

    /// Number of mip levels the finished channel will have.
    pub fn expected_mip_count(&self, config: &PipelineConfig) -> u8 {
        if self.wants_mipmaps() {
            MipChain::level_count_for(self.format.width, self.format.height, config.max_mip_level)
                .min(255) as u8
        } else {
            1
        }
    }

    // ── cache identity ──────────────────────────────────────────────────────

    /// Build the cache identity and verify payload.
    ///
    /// Identity grammar: `<c|-><b|n|m|M|-><16 hex color>;<source1>[;<source2>]`
    /// where a source descriptor is `I<path>` for images, `C<hash>` for
    /// constructed content. The verify payload is the image modification time,
    /// or the constructed definition plus its image modification times.
    pub fn build_cache_identity(&mut self, config: &PipelineConfig, solidity_priority: f32) {
        // Uniform and dynamic channels rebuild faster than they load.
        if !self.format.cacheable || self.descriptors.is_empty() {
            self.cache_identity = None;
            return;
        }

        let compression_char = if self.wants_compression(config) { 'c' } else { '-' };
        let filter_char = if self.wants_mipmaps() {
            self.kind.mip_filter(solidity_priority).cache_char()
        } else {
            '-'
        };

        let mut identity = String::with_capacity(24);
        identity.push(compression_char);
        identity.push(filter_char);
        identity.push_str(&self.uniform_color.cache_hex());
        identity.push(';');
        identity.push_str(&self.descriptors[0]);
        if let Some(second) = self.descriptors.get(1) {
            identity.push(';');
            identity.push_str(second);
        }
        self.cache_identity = Some(identity);

        let mut verify = Vec::new();
        for source in &self.sources {
            match source {
                PropertySource::Image(image) => {
                    verify.extend_from_slice(&image.modified.to_le_bytes());
                }
                PropertySource::Constructed(constructed) => {
                    verify.extend_from_slice(&constructed.definition_bytes());
                    verify.extend_from_slice(&constructed.verify_bytes());
                }
                _ => {}
            }
        }
        self.cache_verify = verify;
    }

    // ── pipeline passes ─────────────────────────────────────────────────────

    /// Skip the cache lookup (cache disabled or absent).
    pub fn mark_needs_bake(&mut self) {
        if self.stage == ChannelStage::FormatResolved {
            self.stage = ChannelStage::NeedsBake;
        }
    }

    /// Try the on-disk cache. A hit carries the finished mip chain and skips
    /// bake, mip generation and compression.
    pub fn try_load_cached(&mut self, cache: &TextureCache, config: &PipelineConfig) {
        let Some(identity) = self.cache_identity.as_deref() else {
            self.stage = ChannelStage::NeedsBake;
            return;
        };
        let expected = (self.format.width, self.format.height, self.format.depth);
        match cache.load(
            identity,
            &self.cache_verify,
            expected,
            self.expected_mip_count(config),
        ) {
            Some(entry) => match entry.into_chain() {
                Ok(chain) => {
                    self.mips = Some(chain);
                    self.stage = ChannelStage::CacheHit;
                }
                Err(err) => {
                    warn!("channel {}: cached payload unusable: {err}", self.kind.name());
                    cache.delete(identity);
                    self.stage = ChannelStage::NeedsBake;
                }
            },
            None => self.stage = ChannelStage::NeedsBake,
        }
    }

    /// Bake the base level: uniform fill, then pixel sources in order.
    ///
    /// When this channel's single image already carries a GPU texture
    /// published by another material, the bake is skipped entirely: the
    /// channel references the shared object and gives up its cache identity.
    pub fn bake(&mut self) -> Result<()> {
        if self.stage != ChannelStage::NeedsBake {
            return Ok(());
        }

        // Uniform channels never allocate pixel data; the uniform color is
        // carried as-is and the combined pool builds the texel at GPU init.
        if self.is_uniform() {
            self.stage = ChannelStage::Baked;
            return Ok(());
        }

        if let Some(image) = &self.image {
            if let Some(shared) = image.shared_texture() {
                self.shared_gpu = Some(shared);
                self.cache_identity = None;
                self.mips = None;
                self.stage = ChannelStage::Baked;
                return Ok(());
            }
        }

        let mut base = PixelBuffer::new(
            self.format.pixel_format()?,
            self.format.width,
            self.format.height,
            self.format.depth,
        )?;
        base.fill_uniform(&self.uniform_color, self.uniform_mask);

        for source in &self.sources {
            match source {
                PropertySource::Image(image) => {
                    // Mismatching sources were skipped at format resolution.
                    if image.width != self.format.width || image.height != self.format.height {
                        continue;
                    }
                    write_image_to_buffer(&mut base, image, self.format.components);
                }
                PropertySource::Constructed(constructed) => {
                    if constructed.width != self.format.width
                        || constructed.height != self.format.height
                    {
                        continue;
                    }
                    constructed.bake_into(&mut base, [0, 1, 2, 3]);
                }
                PropertySource::Value(_)
                | PropertySource::Color(_)
                | PropertySource::Video(_)
                | PropertySource::Mapped(_) => {}
            }
        }

        self.mips = Some(MipChain::base_only(base));
        self.stage = ChannelStage::Baked;
        Ok(())
    }

    /// Generate the mip chain for baked content.
    pub fn generate_mipmaps(
        &mut self,
        config: &PipelineConfig,
        solidity_priority: f32,
    ) -> Result<()> {
        if self.stage != ChannelStage::Baked {
            return Ok(());
        }
        if self.wants_mipmaps() {
            if let Some(chain) = self.mips.take() {
                let levels = chain.into_levels();
                let base = levels.into_iter().next().ok_or_else(|| {
                    Error::custom(format!("channel {} lost its base level", self.kind.name()))
                })?;
                self.mips = Some(MipChain::generate(
                    base,
                    self.kind.mip_filter(solidity_priority),
                    config.max_mip_level,
                )?);
            }
        }
        self.stage = ChannelStage::MipMapped;
        Ok(())
    }

    /// Block-compress the chain where a compressor exists.
    pub fn compress_textures(&mut self, config: &PipelineConfig) -> Result<()> {
        if self.stage != ChannelStage::MipMapped {
            return Ok(());
        }
        if self.wants_compression(config) {
            if let Some(chain) = self.mips.as_ref() {
                self.mips = Some(compress::compress_chain(chain)?);
            }
        }
        self.stage = ChannelStage::Compressed;
        Ok(())
    }

    /// Write the finished chain back to the cache. Cache hits skip this.
    pub fn write_cached(&mut self, cache: &TextureCache) {
        if self.stage == ChannelStage::CacheHit {
            self.stage = ChannelStage::Cached;
            return;
        }
        if self.stage != ChannelStage::Compressed {
            return;
        }
        if let (Some(identity), Some(chain)) = (self.cache_identity.as_deref(), self.mips.as_ref())
        {
            let entry = CacheEntry::from_chain(chain);
            if let Err(err) = cache.store(identity, &self.cache_verify, &entry) {
                warn!("channel {}: cache write failed: {err}", self.kind.name());
                cache.delete(identity);
            }
        }
        self.stage = ChannelStage::Cached;
    }

    /// Drop cache-construction scratch data once the cache passes are done,
    /// bounding peak memory across a large material load.
    pub fn clear_cache_scratch(&mut self) {
        self.cache_verify = Vec::new();
    }

    // ── GPU init (render thread) ────────────────────────────────────────────

    /// Create or adopt the GPU texture for this channel.
    pub fn init_gpu(
        &mut self,
        device: &dyn RenderDevice,
        pool: &CombinedTexturePool,
        ops: &Arc<DeferredOperations>,
        material_name: &str,
    ) -> Result<()> {
        if let Some(shared) = self.shared_gpu.take() {
            self.gpu = Some(shared);
            return Ok(());
        }

        if self.is_uniform() {
            // Uniform channels dedupe through the combined-texture pool.
            let entry = pool.get_or_create(self.uniform_color, [None, None, None, None]);
            let texture = entry.gpu_or_create(device, ops)?;
            self.combined = Some(entry);
            self.gpu = Some(texture);
            self.mips = None;
            return Ok(());
        }

        let chain = self.mips.take().ok_or_else(|| {
            Error::device(format!(
                "channel {} of '{material_name}' has no baked data",
                self.kind.name()
            ))
        })?;
        let desc = TextureDesc {
            label: format!("{material_name}:{}", self.kind.name()),
            width: self.format.width,
            height: self.format.height,
            depth: self.format.depth,
            format: chain.base().format(),
            mip_count: chain.count() as u32,
            kind: self.format.kind,
        };
        let texture = GpuTexture::create(device, desc, &chain, ops.clone())?;

        // Publish single-image content so later materials can share it. When
        // another material published first, adopt theirs; ours is released
        // through the free queue by the drop below.
        if let Some(image) = &self.image {
            if !image.publish_shared(&texture) {
                if let Some(shared) = image.shared_texture() {
                    self.gpu = Some(shared);
                    return Ok(());
                }
            }
        }
        self.gpu = Some(texture);
        Ok(())
    }
}

/// Write an image source into the channel buffer using the per-kind component
/// mapping. 8- and 16-bit data normalizes to [0, 1]; float data passes raw.
fn write_image_to_buffer(buffer: &mut PixelBuffer, image: &ImageSource, channel_components: u8) {
    let sets = image_target_sets(channel_components, image.components);
    let comps = buffer.format().component_count() as usize;
    for z in 0..buffer.depth().min(image.depth) {
        for y in 0..buffer.height() {
            for x in 0..buffer.width() {
                for (s, targets) in sets.iter().enumerate() {
                    let value = image.component(x, y, z, s);
                    for &target in targets {
                        if target < comps {
                            buffer.set_component(x, y, z, target, value);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ImageData;

    fn image(path: &str, w: u32, h: u32, comps: u8, value: u8) -> Arc<ImageSource> {
        ImageSource::new(
            path,
            w,
            h,
            1,
            comps,
            8,
            77,
            ImageData::Bytes8(vec![value; (w * h) as usize * comps as usize]),
        )
        .unwrap()
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    #[test]
    fn test_undefined_channel_absent() {
        assert!(Channel::resolve(ChannelKind::Color, Vec::new()).is_none());
    }

    #[test]
    fn test_uniform_channel_stays_uniform() {
        let mut channel =
            Channel::resolve(ChannelKind::Solidity, vec![PropertySource::Value(0.8)]).unwrap();
        assert!(channel.is_uniform());
        channel.build_cache_identity(&config(), 0.5);
        // Uniform channels skip the cache entirely.
        assert!(channel.cache_identity().is_none());
        channel.mark_needs_bake();
        channel.bake().unwrap();
        // No pixel data is ever allocated for uniform content.
        assert!(channel.mips().is_none());
        assert!((channel.uniform_color().r - 0.8).abs() < 1e-6);
        assert_eq!(channel.stage(), ChannelStage::Baked);
    }

    #[test]
    fn test_uniform_mask_keeps_defaults() {
        // A value property updates the fill color but stays uniform; only
        // pixel sources clear mask components.
        let channel =
            Channel::resolve(ChannelKind::Normal, vec![PropertySource::Value(0.25)]).unwrap();
        assert_eq!(channel.uniform_mask, [true; 4]);
        assert!((channel.uniform_color().r - 0.25).abs() < 1e-6);
        assert!((channel.uniform_color().g - 0.5).abs() < 1e-6);
        assert!((channel.uniform_color().b - 1.0).abs() < 1e-6);

        let textured = Channel::resolve(
            ChannelKind::Normal,
            vec![PropertySource::Image(image("n.png", 4, 4, 3, 128))],
        )
        .unwrap();
        // RGB image data claims the first three components; the deviation
        // component keeps the uniform default.
        assert_eq!(textured.uniform_mask, [false, false, false, true]);
    }

    #[test]
    fn test_cache_identity_grammar() {
        let mut channel = Channel::resolve(
            ChannelKind::Color,
            vec![PropertySource::Image(image("tex/wall.png", 8, 8, 3, 100))],
        )
        .unwrap();
        channel.build_cache_identity(&config(), 0.5);
        let identity = channel.cache_identity().unwrap();
        assert!(identity.starts_with("cb"), "got {identity}");
        assert_eq!(&identity[2..18], "00000000000000ff");
        assert_eq!(&identity[18..19], ";");
        assert_eq!(&identity[19..], "Itex/wall.png");
        // Verify payload carries the image modification time.
        assert_eq!(channel.cache_verify, 77u32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_cache_identity_compression_flag() {
        let mut channel = Channel::resolve(
            ChannelKind::Color,
            vec![PropertySource::Image(image("a.png", 8, 8, 3, 0))],
        )
        .unwrap();
        let mut cfg = config();
        cfg.compression = false;
        channel.build_cache_identity(&cfg, 0.5);
        assert!(channel.cache_identity().unwrap().starts_with("-b"));
    }

    #[test]
    fn test_solidity_filter_priority_bands() {
        let make = |priority: f32| {
            let mut channel = Channel::resolve(
                ChannelKind::Solidity,
                vec![PropertySource::Image(image("mask.png", 8, 8, 1, 0))],
            )
            .unwrap();
            channel.build_cache_identity(&config(), priority);
            channel.cache_identity().unwrap().chars().nth(1).unwrap()
        };
        assert_eq!(make(0.2), 'M');
        assert_eq!(make(0.34), 'M');
        assert_eq!(make(0.35), 'b');
        assert_eq!(make(0.5), 'b');
        assert_eq!(make(0.65), 'b');
        assert_eq!(make(0.66), 'm');
        assert_eq!(make(0.9), 'm');
    }

    #[test]
    fn test_solidity_priority_changes_identity() {
        let make = |priority: f32| {
            let mut channel = Channel::resolve(
                ChannelKind::Solidity,
                vec![PropertySource::Image(image("mask.png", 8, 8, 1, 0))],
            )
            .unwrap();
            channel.build_cache_identity(&config(), priority);
            channel.cache_identity().unwrap().to_owned()
        };
        assert_ne!(make(0.2), make(0.8));
    }

    #[test]
    fn test_normal_channel_cache_char() {
        let mut channel = Channel::resolve(
            ChannelKind::Normal,
            vec![PropertySource::Image(image("n.png", 8, 8, 3, 128))],
        )
        .unwrap();
        channel.build_cache_identity(&config(), 0.5);
        let identity = channel.cache_identity().unwrap();
        assert_eq!(identity.chars().nth(1).unwrap(), 'n');
        // Static normal content resolved a 4th component for deviation.
        assert_eq!(channel.format().components, 4);
    }

    #[test]
    fn test_bake_image_broadcast() {
        let mut channel = Channel::resolve(
            ChannelKind::Color,
            vec![PropertySource::Image(image("gray.png", 2, 2, 1, 51))],
        )
        .unwrap();
        channel.mark_needs_bake();
        channel.bake().unwrap();
        let base = channel.mips().unwrap().base();
        let texel = base.texel(0, 0, 0);
        // 51/255 broadcast into RGB.
        for c in 0..3 {
            assert!((texel[c] - 0.2).abs() < 1e-2, "component {c} = {}", texel[c]);
        }
    }

    #[test]
    fn test_pipeline_stage_order() {
        let mut channel = Channel::resolve(
            ChannelKind::Color,
            vec![PropertySource::Image(image("a.png", 4, 4, 3, 10))],
        )
        .unwrap();
        let cfg = config();
        channel.build_cache_identity(&cfg, 0.5);
        channel.mark_needs_bake();
        channel.bake().unwrap();
        assert_eq!(channel.stage(), ChannelStage::Baked);
        channel.generate_mipmaps(&cfg, 0.5).unwrap();
        assert_eq!(channel.stage(), ChannelStage::MipMapped);
        assert_eq!(channel.mips().unwrap().count(), 3);
        channel.compress_textures(&cfg).unwrap();
        assert_eq!(channel.stage(), ChannelStage::Compressed);
        assert!(channel.mips().unwrap().base().format().is_compressed());
    }

    #[test]
    fn test_expected_mip_count() {
        let channel = Channel::resolve(
            ChannelKind::Color,
            vec![PropertySource::Image(image("a.png", 16, 16, 3, 0))],
        )
        .unwrap();
        assert_eq!(channel.expected_mip_count(&config()), 5);
        let uniform =
            Channel::resolve(ChannelKind::Color, vec![PropertySource::Value(1.0)]).unwrap();
        assert_eq!(uniform.expected_mip_count(&config()), 1);
    }
}
