// src/format.rs
//! Channel format resolution.
//!
//! Before a channel can be baked, every property source feeding it is examined
//! to settle the texture geometry and pixel format. The rules:
//! - the first sized source claims the size; later mismatching sources are
//!   incompatible and are skipped with a warning (no resampling),
//! - component count only widens, never narrows,
//! - any source deeper than 8 bits per component promotes the channel to float,
//! - cube channels require 6 depth layers and never mip-map,
//! - a normal channel claims a 4th component for the deviation angle when its
//!   content is static, so the mip filter has somewhere to write.

use log::warn;

use crate::channel::ChannelKind;
use crate::error::Result;
use crate::pixels::PixelFormat;
use crate::source::PropertySource;

/// Geometry class of the resolved texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureKind {
    Flat,
    Cube,
}

/// The settled format of one channel.
#[derive(Clone, Debug)]
pub struct ChannelFormat {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub components: u8,
    pub float: bool,
    pub kind: TextureKind,
    /// False for direction-indexed channels regardless of size.
    pub mip_mappable: bool,
    /// Content changes at render time; baking covers only the static parts.
    pub dynamic: bool,
    /// Eligible for the on-disk cache.
    pub cacheable: bool,
    /// No sized source contributed; the channel is a 1x1 uniform color.
    pub uniform: bool,
}

impl ChannelFormat {
    #[inline]
    pub fn pixel_format(&self) -> Result<PixelFormat> {
        PixelFormat::from_components(self.components, self.float)
    }
}

/// Accumulates format claims from a channel's sources.
pub struct FormatResolver {
    kind: ChannelKind,
    size: Option<(u32, u32, u32)>,
    components: u8,
    float: bool,
    defined: bool,
    dynamic: bool,
    cacheable: bool,
}

impl FormatResolver {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            size: None,
            components: 1,
            float: false,
            defined: false,
            dynamic: false,
            cacheable: true,
        }
    }

    /// Apply one source. Incompatible sources log a warning and leave the
    /// state unchanged; the material still compiles without them.
    pub fn apply(&mut self, source: &PropertySource) {
        match source {
            PropertySource::Value(_) => {
                self.defined = true;
                self.widen(self.kind.value_target() as u8 + 1);
            }
            PropertySource::Color(_) => {
                self.defined = true;
                self.widen(self.kind.natural_components());
            }
            PropertySource::Image(image) => {
                let wants_cube = self.kind.is_cube();
                if wants_cube && image.depth != 6 {
                    warn!(
                        "channel {}: image '{}' has {} layers, cube content needs 6; skipped",
                        self.kind.name(),
                        image.path,
                        image.depth
                    );
                    return;
                }
                if !wants_cube && image.depth != 1 {
                    warn!(
                        "channel {}: image '{}' has {} layers, flat content needs 1; skipped",
                        self.kind.name(),
                        image.path,
                        image.depth
                    );
                    return;
                }
                if !self.claim_size(image.width, image.height, image.depth, &image.path) {
                    return;
                }
                self.defined = true;
                self.widen(image.components);
                if image.bit_depth > 8 {
                    self.float = true;
                }
                if !image.can_cache() {
                    self.cacheable = false;
                }
            }
            PropertySource::Video(video) => {
                if !self.claim_size(video.width, video.height, 1, &video.path) {
                    return;
                }
                self.defined = true;
                self.widen(video.components);
                self.dynamic = true;
                self.cacheable = false;
            }
            PropertySource::Constructed(constructed) => {
                let expected_depth = if self.kind.is_cube() { 6 } else { 1 };
                if constructed.depth != expected_depth {
                    warn!(
                        "channel {}: constructed content has {} layers, needs {}; skipped",
                        self.kind.name(),
                        constructed.depth,
                        expected_depth
                    );
                    return;
                }
                if !self.claim_size(
                    constructed.width,
                    constructed.height,
                    constructed.depth,
                    "<constructed>",
                ) {
                    return;
                }
                self.defined = true;
                self.widen(self.kind.natural_components());
                if constructed.bit_depth > 8 {
                    self.float = true;
                }
                if constructed.dynamic {
                    self.dynamic = true;
                    self.cacheable = false;
                }
            }
            PropertySource::Mapped(_) => {
                self.defined = true;
                self.widen(self.kind.value_target() as u8 + 1);
                self.dynamic = true;
                self.cacheable = false;
            }
        }
    }

    /// Finish resolution. `None` means no source defined the channel and it
    /// is absent from the compiled material.
    pub fn resolve(mut self) -> Option<ChannelFormat> {
        if !self.defined {
            return None;
        }
        let uniform = self.size.is_none();
        // Static normal content reserves the 4th component for the deviation
        // angle written by the mip filter.
        if self.kind == ChannelKind::Normal && (uniform || !self.dynamic) {
            self.widen(4);
        }
        let (width, height, depth) = self
            .size
            .unwrap_or(if self.kind.is_cube() { (1, 1, 6) } else { (1, 1, 1) });
        let kind = if self.kind.is_cube() {
            TextureKind::Cube
        } else {
            TextureKind::Flat
        };
        Some(ChannelFormat {
            width,
            height,
            depth,
            components: self.components,
            float: self.float,
            kind,
            mip_mappable: self.kind.mip_mappable(),
            dynamic: self.dynamic,
            cacheable: self.cacheable,
            uniform,
        })
    }

    fn widen(&mut self, components: u8) {
        self.components = self.components.max(components.clamp(1, 4));
    }

    fn claim_size(&mut self, width: u32, height: u32, depth: u32, origin: &str) -> bool {
        match self.size {
            None => {
                self.size = Some((width, height, depth));
                true
            }
            Some(claimed) if claimed == (width, height, depth) => true,
            Some((cw, ch, cd)) => {
                warn!(
                    "channel {}: source '{}' is {}x{}x{}, channel already claimed {}x{}x{}; skipped",
                    self.kind.name(),
                    origin,
                    width,
                    height,
                    depth,
                    cw,
                    ch,
                    cd
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ImageData, ImageSource, MappedSource, VideoSource};
    use std::sync::Arc;

    fn image(path: &str, w: u32, h: u32, d: u32, comps: u8, bits: u8) -> Arc<ImageSource> {
        let count = (w * h * d) as usize * comps as usize;
        let data = match bits {
            8 => ImageData::Bytes8(vec![0; count]),
            16 => ImageData::Bytes16(vec![0; count]),
            _ => ImageData::Floats(vec![0.0; count]),
        };
        ImageSource::new(path, w, h, d, comps, bits, 1, data).unwrap()
    }

    #[test]
    fn test_undefined_channel_is_absent() {
        assert!(FormatResolver::new(ChannelKind::Color).resolve().is_none());
    }

    #[test]
    fn test_uniform_only_resolves_one_by_one() {
        let mut resolver = FormatResolver::new(ChannelKind::Solidity);
        resolver.apply(&PropertySource::Value(0.5));
        let format = resolver.resolve().unwrap();
        assert!(format.uniform);
        assert_eq!((format.width, format.height, format.depth), (1, 1, 1));
        assert!(format.cacheable);
    }

    #[test]
    fn test_first_size_wins_mismatch_skipped() {
        let mut resolver = FormatResolver::new(ChannelKind::Color);
        resolver.apply(&PropertySource::Image(image("a.png", 64, 64, 1, 3, 8)));
        resolver.apply(&PropertySource::Image(image("b.png", 32, 32, 1, 4, 8)));
        let format = resolver.resolve().unwrap();
        assert_eq!((format.width, format.height), (64, 64));
        // The mismatching source contributed nothing, including components.
        assert_eq!(format.components, 3);
    }

    #[test]
    fn test_component_widening_monotonic() {
        let mut resolver = FormatResolver::new(ChannelKind::Color);
        resolver.apply(&PropertySource::Image(image("rgba.png", 16, 16, 1, 4, 8)));
        resolver.apply(&PropertySource::Value(1.0));
        let format = resolver.resolve().unwrap();
        assert_eq!(format.components, 4);
    }

    #[test]
    fn test_float_promotion() {
        let mut resolver = FormatResolver::new(ChannelKind::Height);
        resolver.apply(&PropertySource::Image(image("h.png", 16, 16, 1, 1, 16)));
        let format = resolver.resolve().unwrap();
        assert!(format.float);
        assert_eq!(format.pixel_format().unwrap(), PixelFormat::R32F);
    }

    #[test]
    fn test_cube_channel() {
        let mut resolver = FormatResolver::new(ChannelKind::EnvironmentMap);
        resolver.apply(&PropertySource::Image(image("env.png", 32, 32, 6, 3, 8)));
        let format = resolver.resolve().unwrap();
        assert_eq!(format.kind, TextureKind::Cube);
        assert_eq!(format.depth, 6);
        assert!(!format.mip_mappable);
    }

    #[test]
    fn test_cube_rejects_flat_image() {
        let mut resolver = FormatResolver::new(ChannelKind::EnvironmentMap);
        resolver.apply(&PropertySource::Image(image("env.png", 32, 32, 1, 3, 8)));
        assert!(resolver.resolve().is_none());
    }

    #[test]
    fn test_normal_claims_fourth_component_when_static() {
        let mut resolver = FormatResolver::new(ChannelKind::Normal);
        resolver.apply(&PropertySource::Image(image("n.png", 16, 16, 1, 3, 8)));
        let format = resolver.resolve().unwrap();
        assert_eq!(format.components, 4);
    }

    #[test]
    fn test_normal_dynamic_textured_keeps_three() {
        let mut resolver = FormatResolver::new(ChannelKind::Normal);
        resolver.apply(&PropertySource::Video(VideoSource {
            path: "n.ogv".into(),
            width: 16,
            height: 16,
            components: 3,
        }));
        let format = resolver.resolve().unwrap();
        assert_eq!(format.components, 3);
        assert!(format.dynamic);
        assert!(!format.cacheable);
    }

    #[test]
    fn test_mapped_disables_caching() {
        let mut resolver = FormatResolver::new(ChannelKind::Transparency);
        resolver.apply(&PropertySource::Mapped(MappedSource { name: "fade".into() }));
        let format = resolver.resolve().unwrap();
        assert!(format.dynamic);
        assert!(!format.cacheable);
        assert!(format.uniform);
    }
}
