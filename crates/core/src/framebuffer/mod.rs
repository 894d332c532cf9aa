//! Indexed-colour virtual screen mutated by decoded instructions.
//!
//! The buffer keeps two pixel planes and flips between them when scrolling,
//! so steady-state playback never reallocates.

use serde::{Deserialize, Serialize};

/// Logical width of the graphics screen in pixels.
pub const WIDTH: usize = 300;
/// Logical height of the graphics screen in pixels.
pub const HEIGHT: usize = 216;
/// Width of one addressable tile.
pub const TILE_WIDTH: usize = 6;
/// Height of one addressable tile.
pub const TILE_HEIGHT: usize = 12;
/// Number of palette slots.
pub const CLUT_SIZE: usize = 16;

/// Inner displayable rectangle, inclusive on every edge. Border presets only
/// paint outside of it.
pub const DISPLAY_LEFT: usize = TILE_WIDTH;
pub const DISPLAY_TOP: usize = TILE_HEIGHT;
pub const DISPLAY_RIGHT: usize = WIDTH - TILE_WIDTH - 1;
pub const DISPLAY_BOTTOM: usize = HEIGHT - TILE_HEIGHT - 1;

const PIXEL_COUNT: usize = WIDTH * HEIGHT;
const INDEX_MASK: u8 = 0x0f;

/// A palette entry, already expanded to 8 bits per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Expands 4-bit channel values to the full 0-255 range.
    pub fn from_nibbles(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: (r & INDEX_MASK) * 17,
            g: (g & INDEX_MASK) * 17,
            b: (b & INDEX_MASK) * 17,
        }
    }
}

/// Two-colour 6x12 bitmap addressed by tile row and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileBlock {
    pub row: u8,
    pub column: u8,
    /// Colour for clear bits, then colour for set bits.
    pub colors: [u8; 2],
    /// One 6-bit mask per tile row; the most significant bit is the leftmost pixel.
    pub rows: [u8; TILE_HEIGHT],
    pub xor: bool,
}

/// Coarse shift requested for one axis of a scroll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScrollShift {
    #[default]
    None,
    /// Sample from one tile before the destination (content moves forward).
    Negative,
    /// Sample from one tile past the destination (content moves back).
    Positive,
}

impl ScrollShift {
    /// Decodes the 2-bit command field. The reserved value 3 means no shift.
    pub fn from_command(bits: u8) -> Self {
        match bits & 0x03 {
            1 => Self::Negative,
            2 => Self::Positive,
            _ => Self::None,
        }
    }

    fn delta(self, tile: usize) -> isize {
        match self {
            Self::None => 0,
            Self::Negative => -(tile as isize),
            Self::Positive => tile as isize,
        }
    }
}

/// Parameters of a scroll-preset or scroll-copy packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scroll {
    pub fill_color: u8,
    pub horizontal: ScrollShift,
    pub h_offset: u8,
    pub vertical: ScrollShift,
    pub v_offset: u8,
    /// Wrap exposed pixels from the opposite edge instead of filling them.
    pub copy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    planes: [Vec<u8>; 2],
    active: usize,
    clut: [Rgb; CLUT_SIZE],
    h_offset: u8,
    v_offset: u8,
    key_color: Option<u8>,
    background_color: Option<u8>,
    border_color: Option<u8>,
    memory_color: Option<u8>,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            planes: [vec![0; PIXEL_COUNT], vec![0; PIXEL_COUNT]],
            active: 0,
            clut: [Rgb::default(); CLUT_SIZE],
            h_offset: 0,
            v_offset: 0,
            key_color: None,
            background_color: None,
            border_color: None,
            memory_color: None,
        }
    }

    /// Returns every piece of state to its power-on value.
    pub fn reset(&mut self) {
        for plane in &mut self.planes {
            plane.fill(0);
        }
        self.active = 0;
        self.clut = [Rgb::default(); CLUT_SIZE];
        self.h_offset = 0;
        self.v_offset = 0;
        self.key_color = None;
        self.background_color = None;
        self.border_color = None;
        self.memory_color = None;
    }

    /// Row-major colour indices of the visible plane.
    pub fn pixels(&self) -> &[u8] {
        &self.planes[self.active]
    }

    pub fn clut_entry(&self, index: u8) -> Rgb {
        self.clut[usize::from(index & INDEX_MASK)]
    }

    /// Stores a palette slot from 4-bit channel values.
    pub fn set_clut_entry(&mut self, index: u8, r: u8, g: u8, b: u8) {
        self.clut[usize::from(index & INDEX_MASK)] = Rgb::from_nibbles(r, g, b);
    }

    pub fn key_color(&self) -> Option<u8> {
        self.key_color
    }

    pub fn set_key_color(&mut self, index: u8) {
        self.key_color = Some(index & INDEX_MASK);
    }

    /// Sub-tile display shift as `(horizontal, vertical)`.
    pub fn offsets(&self) -> (u8, u8) {
        (self.h_offset, self.v_offset)
    }

    /// First recorded colour of key, background, memory and border presets.
    pub fn background_index(&self) -> u8 {
        self.key_color
            .or(self.background_color)
            .or(self.memory_color)
            .or(self.border_color)
            .unwrap_or(0)
    }

    /// Writes a pixel; coordinates outside the screen are ignored.
    pub fn set_pixel(&mut self, x: isize, y: isize, color: u8) {
        if let Some(index) = pixel_index(x, y) {
            self.planes[self.active][index] = color & INDEX_MASK;
        }
    }

    /// Reads a pixel; coordinates outside the screen read as 0.
    pub fn pixel(&self, x: isize, y: isize) -> u8 {
        pixel_index(x, y)
            .map(|index| self.planes[self.active][index])
            .unwrap_or(0)
    }

    /// Fills the whole screen with one colour.
    pub fn preset_memory(&mut self, color: u8) {
        let color = color & INDEX_MASK;
        self.memory_color = Some(color);
        self.background_color = Some(color);
        self.planes[self.active].fill(color);
    }

    /// Paints everything outside the display rectangle, leaving the interior alone.
    pub fn preset_border(&mut self, color: u8) {
        let color = color & INDEX_MASK;
        self.border_color = Some(color);
        self.background_color = Some(color);

        let plane = &mut self.planes[self.active];
        for (index, pixel) in plane.iter_mut().enumerate() {
            let (x, y) = (index % WIDTH, index / WIDTH);
            if !in_display_area(x, y) {
                *pixel = color;
            }
        }
    }

    /// Blits a tile. Tiles that do not fit entirely on screen are dropped.
    pub fn draw_tile(&mut self, tile: &TileBlock) {
        let left = usize::from(tile.column) * TILE_WIDTH;
        let top = usize::from(tile.row) * TILE_HEIGHT;
        if left + TILE_WIDTH > WIDTH || top + TILE_HEIGHT > HEIGHT {
            return;
        }

        let colors = [tile.colors[0] & INDEX_MASK, tile.colors[1] & INDEX_MASK];
        let plane = &mut self.planes[self.active];
        for (dy, mask) in tile.rows.iter().enumerate() {
            let start = (top + dy) * WIDTH + left;
            for (dx, pixel) in plane[start..start + TILE_WIDTH].iter_mut().enumerate() {
                let bit = (mask >> (TILE_WIDTH - 1 - dx)) & 0x01;
                let color = colors[usize::from(bit)];
                if tile.xor {
                    *pixel ^= color;
                } else {
                    *pixel = color;
                }
            }
        }
    }

    /// Applies a scroll: records the sub-tile offsets and shifts the planes by
    /// whole tiles.
    pub fn scroll(&mut self, scroll: &Scroll) {
        let fill = scroll.fill_color & INDEX_MASK;
        self.background_color = Some(fill);
        self.h_offset = scroll.h_offset.min(TILE_WIDTH as u8 - 1);
        self.v_offset = scroll.v_offset.min(TILE_HEIGHT as u8 - 1);

        let dx = scroll.horizontal.delta(TILE_WIDTH);
        let dy = scroll.vertical.delta(TILE_HEIGHT);
        if dx == 0 && dy == 0 {
            return;
        }

        let (source, target) = self.split_planes();
        for y in 0..HEIGHT as isize {
            for x in 0..WIDTH as isize {
                let (sx, sy) = (x + dx, y + dy);
                let value = if scroll.copy {
                    let wrapped_x = sx.rem_euclid(WIDTH as isize) as usize;
                    let wrapped_y = sy.rem_euclid(HEIGHT as isize) as usize;
                    source[wrapped_y * WIDTH + wrapped_x]
                } else {
                    pixel_index(sx, sy).map(|index| source[index]).unwrap_or(fill)
                };
                target[y as usize * WIDTH + x as usize] = value;
            }
        }
        self.active ^= 1;
    }

    /// Resolves offsets, palette and key colour into RGBA bytes.
    ///
    /// `target` is filled row by row; a short buffer receives only the pixels
    /// that fit.
    pub fn write_image_data(&self, target: &mut [u8]) {
        let plane = self.pixels();
        let h_offset = usize::from(self.h_offset);
        let v_offset = usize::from(self.v_offset);

        for (index, out) in target.chunks_exact_mut(4).take(PIXEL_COUNT).enumerate() {
            let (x, y) = (index % WIDTH, index / WIDTH);
            let px = (x + WIDTH - h_offset) % WIDTH;
            let py = (y + HEIGHT - v_offset) % HEIGHT;
            let color_index = plane[py * WIDTH + px];
            let Rgb { r, g, b } = self.clut[usize::from(color_index)];
            let alpha = if Some(color_index) == self.key_color { 0 } else { 255 };
            out.copy_from_slice(&[r, g, b, alpha]);
        }
    }

    fn split_planes(&mut self) -> (&[u8], &mut [u8]) {
        let (first, second) = self.planes.split_at_mut(1);
        if self.active == 0 {
            (first[0].as_slice(), second[0].as_mut_slice())
        } else {
            (second[0].as_slice(), first[0].as_mut_slice())
        }
    }
}

/// Whether a pixel lies inside the inner displayable rectangle.
pub fn in_display_area(x: usize, y: usize) -> bool {
    (DISPLAY_LEFT..=DISPLAY_RIGHT).contains(&x) && (DISPLAY_TOP..=DISPLAY_BOTTOM).contains(&y)
}

fn pixel_index(x: isize, y: isize) -> Option<usize> {
    if x < 0 || y < 0 {
        return None;
    }
    let (x, y) = (x as usize, y as usize);
    (x < WIDTH && y < HEIGHT).then(|| y * WIDTH + x)
}
