// src/pixels.rs
//! CPU-side pixel storage for channel baking.
//!
//! A [`PixelBuffer`] owns the texel data of one mip level (all depth layers).
//! Uncompressed formats store one or more components per texel, either
//! normalized bytes or raw floats; compressed formats store opaque 4x4 block
//! data and are only produced by the block compressor or the cache loader.

use bytemuck::{cast_slice, cast_slice_mut};

use crate::error::{Error, Result};

// ────────────────────────────────────────────────────────────────────────────
// Color
// ────────────────────────────────────────────────────────────────────────────

/// An RGBA color with unclamped f32 components.
///
/// Components outside [0, 1] are legal (HDR emissivity intensities).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);

    #[inline]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    #[inline]
    pub fn component(&self, index: usize) -> f32 {
        match index {
            0 => self.r,
            1 => self.g,
            2 => self.b,
            _ => self.a,
        }
    }

    #[inline]
    pub fn set_component(&mut self, index: usize, value: f32) {
        match index {
            0 => self.r = value,
            1 => self.g = value,
            2 => self.b = value,
            _ => self.a = value,
        }
    }

    /// 16 hex digits encoding the four components for cache identity strings.
    ///
    /// Each component is scaled by 255 and truncated to a signed 16-bit value,
    /// so out-of-range colors still produce distinct, stable digits.
    pub fn cache_hex(&self) -> String {
        let mut out = String::with_capacity(16);
        for i in 0..4 {
            let value = (self.component(i) * 255.0) as i32 as i16;
            out.push_str(&format!("{:04x}", value as u16));
        }
        out
    }

    /// Bitwise equality key, usable as a hash-map key.
    #[inline]
    pub fn bits(&self) -> [u32; 4] {
        [
            self.r.to_bits(),
            self.g.to_bits(),
            self.b.to_bits(),
            self.a.to_bits(),
        ]
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::new(0.0, 0.0, 0.0, 1.0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pixel formats
// ────────────────────────────────────────────────────────────────────────────

/// Storage format of a pixel buffer or GPU texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    R32F,
    Rg32F,
    Rgb32F,
    Rgba32F,
    /// BC1: 4x4 blocks, 8 bytes each, RGB with 1-bit alpha.
    Dxt1,
    /// BC2: 4x4 blocks, 16 bytes each, RGBA with explicit 4-bit alpha.
    Dxt3,
}

impl PixelFormat {
    /// Pick an uncompressed format from a component count and float flag.
    pub fn from_components(components: u8, float: bool) -> Result<Self> {
        Ok(match (components, float) {
            (1, false) => PixelFormat::R8,
            (2, false) => PixelFormat::Rg8,
            (3, false) => PixelFormat::Rgb8,
            (4, false) => PixelFormat::Rgba8,
            (1, true) => PixelFormat::R32F,
            (2, true) => PixelFormat::Rg32F,
            (3, true) => PixelFormat::Rgb32F,
            (4, true) => PixelFormat::Rgba32F,
            _ => return Err(Error::invalid(format!("bad component count {components}"))),
        })
    }

    /// Number of color components (compressed formats report their decoded count).
    #[inline]
    pub fn component_count(&self) -> u8 {
        match self {
            PixelFormat::R8 | PixelFormat::R32F => 1,
            PixelFormat::Rg8 | PixelFormat::Rg32F => 2,
            PixelFormat::Rgb8 | PixelFormat::Rgb32F | PixelFormat::Dxt1 => 3,
            PixelFormat::Rgba8 | PixelFormat::Rgba32F | PixelFormat::Dxt3 => 4,
        }
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            PixelFormat::R32F | PixelFormat::Rg32F | PixelFormat::Rgb32F | PixelFormat::Rgba32F
        )
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Dxt1 | PixelFormat::Dxt3)
    }

    /// Bytes per texel for uncompressed formats.
    #[inline]
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::R8 => 1,
            PixelFormat::Rg8 => 2,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::R32F => 4,
            PixelFormat::Rg32F => 8,
            PixelFormat::Rgb32F => 12,
            PixelFormat::Rgba32F => 16,
            PixelFormat::Dxt1 | PixelFormat::Dxt3 => 0,
        }
    }

    /// Byte length of a single depth layer at the given dimensions.
    pub fn layer_byte_len(&self, width: u32, height: u32) -> usize {
        match self {
            PixelFormat::Dxt1 => (width as usize).div_ceil(4) * (height as usize).div_ceil(4) * 8,
            PixelFormat::Dxt3 => (width as usize).div_ceil(4) * (height as usize).div_ceil(4) * 16,
            _ => self.bytes_per_pixel() * width as usize * height as usize,
        }
    }

    /// Byte length of all depth layers at the given dimensions.
    #[inline]
    pub fn byte_len(&self, width: u32, height: u32, depth: u32) -> usize {
        self.layer_byte_len(width, height) * depth as usize
    }

    /// Stable tag byte used in cache entry headers.
    #[inline]
    pub fn tag(&self) -> u8 {
        match self {
            PixelFormat::R8 => 0,
            PixelFormat::Rg8 => 1,
            PixelFormat::Rgb8 => 2,
            PixelFormat::Rgba8 => 3,
            PixelFormat::R32F => 4,
            PixelFormat::Rg32F => 5,
            PixelFormat::Rgb32F => 6,
            PixelFormat::Rgba32F => 7,
            PixelFormat::Dxt1 => 8,
            PixelFormat::Dxt3 => 9,
        }
    }

    /// Inverse of [`PixelFormat::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => PixelFormat::R8,
            1 => PixelFormat::Rg8,
            2 => PixelFormat::Rgb8,
            3 => PixelFormat::Rgba8,
            4 => PixelFormat::R32F,
            5 => PixelFormat::Rg32F,
            6 => PixelFormat::Rgb32F,
            7 => PixelFormat::Rgba32F,
            8 => PixelFormat::Dxt1,
            9 => PixelFormat::Dxt3,
            _ => return None,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pixel buffer
// ────────────────────────────────────────────────────────────────────────────

/// One mip level of texel data, including all depth layers.
#[derive(Clone, Debug)]
pub struct PixelBuffer {
    format: PixelFormat,
    width: u32,
    height: u32,
    depth: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Create a zero-filled buffer.
    pub fn new(format: PixelFormat, width: u32, height: u32, depth: u32) -> Result<Self> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(Error::invalid(format!(
                "zero-sized pixel buffer {width}x{height}x{depth}"
            )));
        }
        let len = format.byte_len(width, height, depth);
        Ok(Self {
            format,
            width,
            height,
            depth,
            data: vec![0u8; len],
        })
    }

    /// Wrap existing data, verifying the byte length.
    pub fn from_data(
        format: PixelFormat,
        width: u32,
        height: u32,
        depth: u32,
        data: Vec<u8>,
    ) -> Result<Self> {
        let expected = format.byte_len(width, height, depth);
        if data.len() != expected {
            return Err(Error::invalid(format!(
                "pixel data length {} does not match {}x{}x{} {:?} ({} expected)",
                data.len(),
                width,
                height,
                depth,
                format,
                expected
            )));
        }
        Ok(Self {
            format,
            width,
            height,
            depth,
            data,
        })
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    fn texel_index(&self, x: u32, y: u32, z: u32) -> usize {
        ((z * self.height + y) * self.width + x) as usize
    }

    /// Read one component as a normalized float. Compressed buffers panic.
    pub fn component(&self, x: u32, y: u32, z: u32, comp: usize) -> f32 {
        debug_assert!(!self.format.is_compressed());
        let comps = self.format.component_count() as usize;
        let idx = self.texel_index(x, y, z) * comps + comp;
        if self.format.is_float() {
            cast_slice::<u8, f32>(&self.data)[idx]
        } else {
            self.data[idx] as f32 / 255.0
        }
    }

    /// Write one component from a normalized float. Compressed buffers panic.
    pub fn set_component(&mut self, x: u32, y: u32, z: u32, comp: usize, value: f32) {
        debug_assert!(!self.format.is_compressed());
        let comps = self.format.component_count() as usize;
        let idx = self.texel_index(x, y, z) * comps + comp;
        if self.format.is_float() {
            cast_slice_mut::<u8, f32>(&mut self.data)[idx] = value;
        } else {
            self.data[idx] = (value * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
        }
    }

    /// Read a full texel; missing components read as 0.
    pub fn texel(&self, x: u32, y: u32, z: u32) -> [f32; 4] {
        let comps = self.format.component_count() as usize;
        let mut out = [0.0f32; 4];
        for (c, slot) in out.iter_mut().enumerate().take(comps) {
            *slot = self.component(x, y, z, c);
        }
        out
    }

    /// Write a full texel; components beyond the format are ignored.
    pub fn set_texel(&mut self, x: u32, y: u32, z: u32, value: [f32; 4]) {
        let comps = self.format.component_count() as usize;
        for (c, v) in value.iter().enumerate().take(comps) {
            self.set_component(x, y, z, c, *v);
        }
    }

    /// Fill masked components with a uniform color, leaving others untouched.
    pub fn fill_uniform(&mut self, color: &Color, mask: [bool; 4]) {
        let comps = self.format.component_count() as usize;
        for z in 0..self.depth {
            for y in 0..self.height {
                for x in 0..self.width {
                    for c in 0..comps {
                        if mask[c] {
                            self.set_component(x, y, z, c, color.component(c));
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

    #[test]
    fn test_color_cache_hex() {
        let hex = Color::new(0.0, 0.0, 0.0, 1.0).cache_hex();
        assert_eq!(hex.len(), 16);
        assert_eq!(hex, "00000000000000ff");
        // Negative components keep their sign in the encoding.
        let neg = Color::new(-1.0, 0.0, 0.0, 0.0).cache_hex();
        assert_eq!(&neg[..4], "ff01");
    }

    #[test]
    fn test_format_lengths() {
        assert_eq!(PixelFormat::Rgb8.byte_len(4, 4, 1), 48);
        assert_eq!(PixelFormat::Rgba32F.byte_len(2, 2, 6), 2 * 2 * 16 * 6);
        // Compressed sizes round up to whole 4x4 blocks.
        assert_eq!(PixelFormat::Dxt1.byte_len(4, 4, 1), 8);
        assert_eq!(PixelFormat::Dxt1.byte_len(5, 5, 1), 4 * 8);
        assert_eq!(PixelFormat::Dxt3.byte_len(1, 1, 1), 16);
    }

    #[test]
    fn test_tag_round_trip() {
        for tag in 0..=9u8 {
            let fmt = PixelFormat::from_tag(tag).unwrap();
            assert_eq!(fmt.tag(), tag);
        }
        assert!(PixelFormat::from_tag(10).is_none());
    }

    #[test]
    fn test_fill_uniform_respects_mask() {
        let mut buf = PixelBuffer::new(PixelFormat::Rgba8, 2, 2, 1).unwrap();
        buf.set_texel(0, 0, 0, [0.25, 0.25, 0.25, 0.25]);
        let color = Color::new(1.0, 0.5, 0.0, 1.0);
        buf.fill_uniform(&color, [true, false, true, false]);
        let texel = buf.texel(0, 0, 0);
        assert!((texel[0] - 1.0).abs() < 1e-3);
        assert!((texel[1] - 0.25).abs() < 1e-2);
        assert!(texel[2] < 1e-3);
        assert!((texel[3] - 0.25).abs() < 1e-2);
    }

    #[test]
    fn test_float_components_raw() {
        let mut buf = PixelBuffer::new(PixelFormat::Rg32F, 1, 1, 1).unwrap();
        buf.set_component(0, 0, 0, 1, 3.5);
        assert_eq!(buf.component(0, 0, 0, 1), 3.5);
    }

    #[test]
    fn test_from_data_length_check() {
        assert!(PixelBuffer::from_data(PixelFormat::R8, 2, 2, 1, vec![0; 3]).is_err());
        assert!(PixelBuffer::from_data(PixelFormat::R8, 2, 2, 1, vec![0; 4]).is_ok());
    }
}
