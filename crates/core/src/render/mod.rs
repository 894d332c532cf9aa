use std::fmt;

use crate::{
    framebuffer::{FrameBuffer, HEIGHT, WIDTH},
    CdgError, Result,
};

/// Bytes in one logical RGBA frame.
pub const FRAME_BYTES: usize = WIDTH * HEIGHT * 4;

/// Destination for rendered frames (a window, a texture, a second display).
pub trait Surface {
    /// Receives a tightly packed RGBA frame of `width` x `height` pixels.
    fn present(&mut self, rgba: &[u8], width: usize, height: usize);
}

/// Surface for headless playback; frames are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSurface;

impl Surface for NullSurface {
    fn present(&mut self, _rgba: &[u8], _width: usize, _height: usize) {}
}

/// In-memory surface of arbitrary size, filled by nearest-neighbour sampling.
#[derive(Debug, Clone)]
pub struct MemorySurface {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
    presented: usize,
}

impl MemorySurface {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width * height * 4],
            presented: 0,
        }
    }

    /// A surface `scale` times the logical resolution.
    pub fn scaled(scale: u32) -> Self {
        let scale = scale.max(1) as usize;
        Self::new(WIDTH * scale, HEIGHT * scale)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Number of frames presented so far.
    pub fn presented(&self) -> usize {
        self.presented
    }
}

impl Surface for MemorySurface {
    fn present(&mut self, rgba: &[u8], width: usize, height: usize) {
        blit_nearest(rgba, width, height, &mut self.pixels, self.width, self.height);
        self.presented += 1;
    }
}

/// Owns the reusable RGBA image and hands it to the presentation surface.
pub struct Renderer {
    image: Vec<u8>,
    surface: Box<dyn Surface>,
}

impl Renderer {
    pub fn new(surface: Box<dyn Surface>) -> Self {
        Self {
            image: vec![0; FRAME_BYTES],
            surface,
        }
    }

    pub fn headless() -> Self {
        Self::new(Box::new(NullSurface))
    }

    /// Resolves the framebuffer into the image and presents it.
    pub fn render(&mut self, frame: &FrameBuffer) {
        frame.write_image_data(&mut self.image);
        self.surface.present(&self.image, WIDTH, HEIGHT);
    }

    /// The most recently rendered frame at logical resolution.
    pub fn image(&self) -> &[u8] {
        &self.image
    }
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("image", &self.image.len())
            .finish()
    }
}

/// Copies `src` into `dst`, resampling with nearest-neighbour lookup.
///
/// Both buffers are RGBA. Sizes that do not match their buffers leave `dst`
/// untouched.
pub fn blit_nearest(
    src: &[u8],
    src_width: usize,
    src_height: usize,
    dst: &mut [u8],
    dst_width: usize,
    dst_height: usize,
) {
    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
        return;
    }
    if src.len() < src_width * src_height * 4 || dst.len() < dst_width * dst_height * 4 {
        return;
    }

    for y in 0..dst_height {
        let sy = y * src_height / dst_height;
        for x in 0..dst_width {
            let sx = x * src_width / dst_width;
            let from = (sy * src_width + sx) * 4;
            let to = (y * dst_width + x) * 4;
            dst[to..to + 4].copy_from_slice(&src[from..from + 4]);
        }
    }
}

/// Encodes a logical frame as a PNG, upscaled by an integer factor.
pub fn encode_png(rgba: &[u8], scale: u32) -> Result<Vec<u8>> {
    if rgba.len() != FRAME_BYTES {
        return Err(format!(
            "expected a {WIDTH}x{HEIGHT} RGBA frame, got {} bytes",
            rgba.len()
        )
        .into());
    }
    if scale == 0 {
        return Err(CdgError::InvalidConfig("render.scale must be at least 1"));
    }

    let mut surface = MemorySurface::scaled(scale);
    surface.present(rgba, WIDTH, HEIGHT);

    let mut png_bytes = Vec::new();
    {
        let mut encoder =
            png::Encoder::new(&mut png_bytes, surface.width() as u32, surface.height() as u32);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(surface.pixels())?;
        writer.finish()?;
    }
    Ok(png_bytes)
}
