// src/source.rs
//! Material property sources.
//!
//! A material property feeds a texture channel from exactly one source kind.
//! The set of kinds is closed: format resolution and channel baking are the
//! only two places that match over it, and both match exhaustively so a new
//! kind fails to compile until both sites handle it.

use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use parking_lot::Mutex;

use crate::device::GpuTexture;
use crate::error::{Error, Result};
use crate::hash::ContentHasher;
use crate::pixels::{Color, PixelBuffer};

/// One source feeding a channel.
#[derive(Clone)]
pub enum PropertySource {
    /// A single static value, written to one channel component.
    Value(f32),
    /// A static color, written across the channel's mapped components.
    Color(Color),
    /// A static image asset.
    Image(Arc<ImageSource>),
    /// A video stream; dynamic, never cached.
    Video(VideoSource),
    /// Procedural content built from a node tree.
    Constructed(Arc<ConstructedSource>),
    /// An engine-driven value bound at render time; dynamic, never cached.
    Mapped(MappedSource),
}

impl PropertySource {
    /// True when the source changes between frames and disables caching.
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        match self {
            PropertySource::Value(_) | PropertySource::Color(_) | PropertySource::Image(_) => false,
            PropertySource::Video(_) | PropertySource::Mapped(_) => true,
            PropertySource::Constructed(c) => c.dynamic,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Image sources
// ────────────────────────────────────────────────────────────────────────────

/// Decoded texel payload of an image source.
#[derive(Clone, Debug)]
pub enum ImageData {
    Bytes8(Vec<u8>),
    Bytes16(Vec<u16>),
    Floats(Vec<f32>),
}

impl ImageData {
    #[inline]
    fn len(&self) -> usize {
        match self {
            ImageData::Bytes8(v) => v.len(),
            ImageData::Bytes16(v) => v.len(),
            ImageData::Floats(v) => v.len(),
        }
    }
}

/// A static image asset shared between materials.
///
/// The `shared` slot lets the first material that uploads this image publish
/// its GPU texture; later compiles reference the published object instead of
/// baking and caching their own copy.
pub struct ImageSource {
    /// Stable virtual path; empty for in-memory images, which are not cached.
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub components: u8,
    /// Bits per component of the original asset: 8, 16 or 32.
    pub bit_depth: u8,
    /// Modification time of the backing file, seconds since the epoch.
    pub modified: u32,
    data: ImageData,
    shared: Mutex<Option<Arc<GpuTexture>>>,
}

impl ImageSource {
    pub fn new(
        path: impl Into<String>,
        width: u32,
        height: u32,
        depth: u32,
        components: u8,
        bit_depth: u8,
        modified: u32,
        data: ImageData,
    ) -> Result<Arc<Self>> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(Error::invalid(format!(
                "zero-sized image {width}x{height}x{depth}"
            )));
        }
        if !(1..=4).contains(&components) {
            return Err(Error::invalid(format!("bad component count {components}")));
        }
        if !matches!(bit_depth, 8 | 16 | 32) {
            return Err(Error::invalid(format!("bad bit depth {bit_depth}")));
        }
        let expected = (width * height * depth) as usize * components as usize;
        if data.len() != expected {
            return Err(Error::invalid(format!(
                "image data length {} does not match {}x{}x{} with {} components",
                data.len(),
                width,
                height,
                depth,
                components
            )));
        }
        Ok(Arc::new(Self {
            path: path.into(),
            width,
            height,
            depth,
            components,
            bit_depth,
            modified,
            data,
            shared: Mutex::new(None),
        }))
    }

    /// Decode an image file into a source. Component count and bit depth
    /// follow the file's color type.
    pub fn from_file(path: &Path) -> Result<Arc<Self>> {
        use image::DynamicImage;

        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        let decoded = image::open(path)?;
        let (width, height) = (decoded.width(), decoded.height());
        let virtual_path = path.to_string_lossy().into_owned();

        let (components, bit_depth, data) = match decoded {
            DynamicImage::ImageLuma8(img) => (1, 8, ImageData::Bytes8(img.into_raw())),
            DynamicImage::ImageLumaA8(img) => (2, 8, ImageData::Bytes8(img.into_raw())),
            DynamicImage::ImageRgb8(img) => (3, 8, ImageData::Bytes8(img.into_raw())),
            DynamicImage::ImageRgba8(img) => (4, 8, ImageData::Bytes8(img.into_raw())),
            DynamicImage::ImageLuma16(img) => (1, 16, ImageData::Bytes16(img.into_raw())),
            DynamicImage::ImageLumaA16(img) => (2, 16, ImageData::Bytes16(img.into_raw())),
            DynamicImage::ImageRgb16(img) => (3, 16, ImageData::Bytes16(img.into_raw())),
            DynamicImage::ImageRgba16(img) => (4, 16, ImageData::Bytes16(img.into_raw())),
            DynamicImage::ImageRgb32F(img) => (3, 32, ImageData::Floats(img.into_raw())),
            DynamicImage::ImageRgba32F(img) => (4, 32, ImageData::Floats(img.into_raw())),
            other => {
                let img = other.to_rgba8();
                (4, 8, ImageData::Bytes8(img.into_raw()))
            }
        };

        Self::new(virtual_path, width, height, 1, components, bit_depth, modified, data)
    }

    /// True when this image can take part in on-disk caching.
    #[inline]
    pub fn can_cache(&self) -> bool {
        !self.path.is_empty()
    }

    /// Read one component as a normalized float (floats pass through raw).
    pub fn component(&self, x: u32, y: u32, z: u32, comp: usize) -> f32 {
        let idx =
            ((z * self.height + y) * self.width + x) as usize * self.components as usize + comp;
        match &self.data {
            ImageData::Bytes8(v) => v[idx] as f32 / 255.0,
            ImageData::Bytes16(v) => v[idx] as f32 / 65535.0,
            ImageData::Floats(v) => v[idx],
        }
    }

    /// The GPU texture another material published for this image, if any.
    pub fn shared_texture(&self) -> Option<Arc<GpuTexture>> {
        self.shared.lock().clone()
    }

    /// Publish a GPU texture for this image. Returns false when another
    /// material won the race; the caller should use [`Self::shared_texture`]
    /// instead of its own upload.
    pub fn publish_shared(&self, texture: &Arc<GpuTexture>) -> bool {
        let mut slot = self.shared.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(texture.clone());
        true
    }
}

impl std::fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSource")
            .field("path", &self.path)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("depth", &self.depth)
            .field("components", &self.components)
            .field("bit_depth", &self.bit_depth)
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Video and mapped sources
// ────────────────────────────────────────────────────────────────────────────

/// Handle to a video stream. Playback is outside this crate; the pipeline
/// only needs the frame geometry to resolve the channel format.
#[derive(Clone, Debug)]
pub struct VideoSource {
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub components: u8,
}

/// An engine-driven scalar bound at render time (controller curves,
/// renderable values). Contributes nothing to baked pixel data.
#[derive(Clone, Debug)]
pub struct MappedSource {
    pub name: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Constructed sources
// ────────────────────────────────────────────────────────────────────────────

/// Procedural channel content: a node tree painted into the channel buffer.
///
/// The definition serializes byte-exactly so identical trees hash to the same
/// cache identity.
pub struct ConstructedSource {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Bits per component of the evaluated content: 8, 16 or 32.
    pub bit_depth: u8,
    /// True when a node references render-time state; disables caching.
    pub dynamic: bool,
    pub root: NodeGroup,
}

#[derive(Clone, Default)]
pub struct NodeGroup {
    pub nodes: Vec<Node>,
}

#[derive(Clone)]
pub enum Node {
    /// Axis-aligned rectangle filled with a solid color.
    Shape {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        fill: Color,
    },
    /// Image blit, tiled `repeat_x` by `repeat_y` times.
    Image {
        x: i32,
        y: i32,
        image: Arc<ImageSource>,
        repeat_x: u32,
        repeat_y: u32,
    },
    /// Nested group drawn at an offset.
    Group { x: i32, y: i32, group: NodeGroup },
}

impl ConstructedSource {
    /// Deterministic serialization of the node tree, hashed into the cache
    /// identity. Image nodes contribute their path, not their texels.
    pub fn definition_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.depth.to_le_bytes());
        out.push(self.bit_depth);
        out.push(self.dynamic as u8);
        Self::write_group(&self.root, &mut out);
        out
    }

    fn write_group(group: &NodeGroup, out: &mut Vec<u8>) {
        out.push(0x01);
        out.extend_from_slice(&(group.nodes.len() as u32).to_le_bytes());
        for node in &group.nodes {
            match node {
                Node::Shape {
                    x,
                    y,
                    width,
                    height,
                    fill,
                } => {
                    out.push(0x02);
                    out.extend_from_slice(&x.to_le_bytes());
                    out.extend_from_slice(&y.to_le_bytes());
                    out.extend_from_slice(&width.to_le_bytes());
                    out.extend_from_slice(&height.to_le_bytes());
                    for bits in fill.bits() {
                        out.extend_from_slice(&bits.to_le_bytes());
                    }
                }
                Node::Image {
                    x,
                    y,
                    image,
                    repeat_x,
                    repeat_y,
                } => {
                    out.push(0x03);
                    out.extend_from_slice(&x.to_le_bytes());
                    out.extend_from_slice(&y.to_le_bytes());
                    out.extend_from_slice(&(image.path.len() as u32).to_le_bytes());
                    out.extend_from_slice(image.path.as_bytes());
                    out.extend_from_slice(&repeat_x.to_le_bytes());
                    out.extend_from_slice(&repeat_y.to_le_bytes());
                }
                Node::Group { x, y, group } => {
                    out.push(0x04);
                    out.extend_from_slice(&x.to_le_bytes());
                    out.extend_from_slice(&y.to_le_bytes());
                    Self::write_group(group, out);
                }
            }
        }
    }

    /// Verify payload: the modification times of every referenced image, in
    /// traversal order. A touched image file invalidates the cache entry even
    /// though the definition is unchanged.
    pub fn verify_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        Self::collect_mtimes(&self.root, &mut out);
        out
    }

    fn collect_mtimes(group: &NodeGroup, out: &mut Vec<u8>) {
        for node in &group.nodes {
            match node {
                Node::Image { image, .. } => out.extend_from_slice(&image.modified.to_le_bytes()),
                Node::Group { group, .. } => Self::collect_mtimes(group, out),
                Node::Shape { .. } => {}
            }
        }
    }

    /// 8-hex-digit digest of the definition, used in cache identity strings.
    pub fn content_digest(&self) -> String {
        let mut hasher = ContentHasher::new();
        hasher.update(&self.definition_bytes());
        hasher.finish_hex()
    }

    /// Evaluate the node tree into the channel buffer. `targets[s]` names the
    /// buffer component receiving canvas component `s`; out-of-range targets
    /// are skipped.
    pub fn bake_into(&self, buffer: &mut PixelBuffer, targets: [usize; 4]) {
        let w = buffer.width();
        let h = buffer.height();
        let d = buffer.depth();
        let mut canvas = vec![[0.0f32; 4]; (w * h * d) as usize];
        for z in 0..d {
            self.paint_group(&self.root, 0, 0, z, w, h, &mut canvas);
        }
        let comps = buffer.format().component_count() as usize;
        for z in 0..d {
            for y in 0..h {
                for x in 0..w {
                    let texel = canvas[((z * h + y) * w + x) as usize];
                    for (s, &value) in texel.iter().enumerate() {
                        let dst = targets[s];
                        if dst < comps {
                            buffer.set_component(x, y, z, dst, value);
                        }
                    }
                }
            }
        }
    }

    fn paint_group(
        &self,
        group: &NodeGroup,
        ox: i32,
        oy: i32,
        z: u32,
        w: u32,
        h: u32,
        canvas: &mut [[f32; 4]],
    ) {
        for node in &group.nodes {
            match node {
                Node::Shape {
                    x,
                    y,
                    width,
                    height,
                    fill,
                } => {
                    let texel = [fill.r, fill.g, fill.b, fill.a];
                    for py in 0..*height as i32 {
                        for px in 0..*width as i32 {
                            let cx = ox + x + px;
                            let cy = oy + y + py;
                            if cx >= 0 && cy >= 0 && (cx as u32) < w && (cy as u32) < h {
                                canvas[((z * h + cy as u32) * w + cx as u32) as usize] = texel;
                            }
                        }
                    }
                }
                Node::Image {
                    x,
                    y,
                    image,
                    repeat_x,
                    repeat_y,
                } => {
                    let reps_x = (*repeat_x).max(1);
                    let reps_y = (*repeat_y).max(1);
                    for ry in 0..reps_y {
                        for rx in 0..reps_x {
                            let bx = ox + x + (rx * image.width) as i32;
                            let by = oy + y + (ry * image.height) as i32;
                            self.paint_image(image, bx, by, z, w, h, canvas);
                        }
                    }
                }
                Node::Group { x, y, group } => {
                    self.paint_group(group, ox + x, oy + y, z, w, h, canvas);
                }
            }
        }
    }

    fn paint_image(
        &self,
        image: &ImageSource,
        bx: i32,
        by: i32,
        z: u32,
        w: u32,
        h: u32,
        canvas: &mut [[f32; 4]],
    ) {
        let layer = z.min(image.depth - 1);
        for py in 0..image.height as i32 {
            for px in 0..image.width as i32 {
                let cx = bx + px;
                let cy = by + py;
                if cx < 0 || cy < 0 || cx as u32 >= w || cy as u32 >= h {
                    continue;
                }
                let mut texel = [0.0f32; 4];
                for (c, slot) in texel.iter_mut().enumerate().take(image.components as usize) {
                    *slot = image.component(px as u32, py as u32, layer, c);
                }
                canvas[((z * h + cy as u32) * w + cx as u32) as usize] = texel;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_image(path: &str, size: u32, value: u8) -> Arc<ImageSource> {
        ImageSource::new(
            path,
            size,
            size,
            1,
            1,
            8,
            42,
            ImageData::Bytes8(vec![value; (size * size) as usize]),
        )
        .unwrap()
    }

    #[test]
    fn test_image_component_normalized() {
        let img = gray_image("a.png", 2, 128);
        assert!((img.component(1, 1, 0, 0) - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_image_length_check() {
        let bad = ImageSource::new("x", 2, 2, 1, 3, 8, 0, ImageData::Bytes8(vec![0; 4]));
        assert!(bad.is_err());
    }

    #[test]
    fn test_dynamic_flags() {
        assert!(!PropertySource::Value(0.5).is_dynamic());
        assert!(PropertySource::Mapped(MappedSource { name: "wind".into() }).is_dynamic());
        assert!(PropertySource::Video(VideoSource {
            path: "v.ogv".into(),
            width: 64,
            height: 64,
            components: 3,
        })
        .is_dynamic());
    }

    #[test]
    fn test_definition_deterministic() {
        let make = || ConstructedSource {
            width: 8,
            height: 8,
            depth: 1,
            bit_depth: 8,
            dynamic: false,
            root: NodeGroup {
                nodes: vec![
                    Node::Shape {
                        x: 1,
                        y: 1,
                        width: 4,
                        height: 4,
                        fill: Color::new(1.0, 0.0, 0.0, 1.0),
                    },
                    Node::Image {
                        x: 0,
                        y: 0,
                        image: gray_image("tile.png", 2, 200),
                        repeat_x: 2,
                        repeat_y: 2,
                    },
                ],
            },
        };
        let a = make();
        let b = make();
        assert_eq!(a.definition_bytes(), b.definition_bytes());
        assert_eq!(a.content_digest(), b.content_digest());
        assert_eq!(a.content_digest().len(), 8);
    }

    #[test]
    fn test_definition_sensitive_to_geometry() {
        let base = ConstructedSource {
            width: 8,
            height: 8,
            depth: 1,
            bit_depth: 8,
            dynamic: false,
            root: NodeGroup {
                nodes: vec![Node::Shape {
                    x: 0,
                    y: 0,
                    width: 4,
                    height: 4,
                    fill: Color::WHITE,
                }],
            },
        };
        let mut moved = ConstructedSource {
            width: 8,
            height: 8,
            depth: 1,
            bit_depth: 8,
            dynamic: false,
            root: base.root.clone(),
        };
        if let Node::Shape { x, .. } = &mut moved.root.nodes[0] {
            *x = 1;
        }
        assert_ne!(base.content_digest(), moved.content_digest());
    }

    #[test]
    fn test_verify_tracks_image_mtimes() {
        let img = gray_image("tile.png", 2, 10);
        let src = ConstructedSource {
            width: 4,
            height: 4,
            depth: 1,
            bit_depth: 8,
            dynamic: false,
            root: NodeGroup {
                nodes: vec![Node::Image {
                    x: 0,
                    y: 0,
                    image: img,
                    repeat_x: 1,
                    repeat_y: 1,
                }],
            },
        };
        assert_eq!(src.verify_bytes(), 42u32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_bake_shape_fill() {
        use crate::pixels::PixelFormat;
        let src = ConstructedSource {
            width: 4,
            height: 4,
            depth: 1,
            bit_depth: 8,
            dynamic: false,
            root: NodeGroup {
                nodes: vec![Node::Shape {
                    x: 0,
                    y: 0,
                    width: 2,
                    height: 2,
                    fill: Color::new(1.0, 1.0, 1.0, 1.0),
                }],
            },
        };
        let mut buf = PixelBuffer::new(PixelFormat::R8, 4, 4, 1).unwrap();
        src.bake_into(&mut buf, [0, usize::MAX, usize::MAX, usize::MAX]);
        assert!((buf.component(0, 0, 0, 0) - 1.0).abs() < 1e-3);
        assert!(buf.component(3, 3, 0, 0) < 1e-3);
    }
}
