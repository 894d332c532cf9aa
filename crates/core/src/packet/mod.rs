//! Packet layer: turns the raw subcode stream into [`Instruction`]s.
//!
//! Every 24-byte packet yields exactly one instruction so that the instruction
//! index stays aligned with the audio clock. Packets that are not graphics
//! commands, or carry an opcode we do not understand, become
//! [`Instruction::NoOp`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::framebuffer::{FrameBuffer, Scroll, ScrollShift, TileBlock, TILE_HEIGHT};

/// Size of one transport packet in bytes.
pub const PACKET_SIZE: usize = 24;
/// Command value that marks a graphics packet.
pub const GRAPHICS_COMMAND: u8 = 0x09;
/// Mask applied to the command and opcode bytes.
pub const COMMAND_MASK: u8 = 0x3f;
/// Offset of the 16-byte payload inside a packet.
pub const DATA_OFFSET: usize = 4;
/// Length of the payload.
pub const DATA_SIZE: usize = 16;

const EMPTY_PACKET: [u8; PACKET_SIZE] = [0; PACKET_SIZE];

/// Opcodes understood by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
    MemoryPreset,
    BorderPreset,
    TileBlock,
    ScrollPreset,
    ScrollCopy,
    SetKeyColor,
    LoadClutLow,
    LoadClutHigh,
    TileBlockXor,
}

impl Opcode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::MemoryPreset),
            2 => Some(Self::BorderPreset),
            6 => Some(Self::TileBlock),
            20 => Some(Self::ScrollPreset),
            24 => Some(Self::ScrollCopy),
            28 => Some(Self::SetKeyColor),
            30 => Some(Self::LoadClutLow),
            31 => Some(Self::LoadClutHigh),
            38 => Some(Self::TileBlockXor),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::MemoryPreset => 1,
            Self::BorderPreset => 2,
            Self::TileBlock => 6,
            Self::ScrollPreset => 20,
            Self::ScrollCopy => 24,
            Self::SetKeyColor => 28,
            Self::LoadClutLow => 30,
            Self::LoadClutHigh => 31,
            Self::TileBlockXor => 38,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::MemoryPreset => "memory_preset",
            Self::BorderPreset => "border_preset",
            Self::TileBlock => "tile_block",
            Self::ScrollPreset => "scroll_preset",
            Self::ScrollCopy => "scroll_copy",
            Self::SetKeyColor => "set_key_color",
            Self::LoadClutLow => "load_clut_low",
            Self::LoadClutHigh => "load_clut_high",
            Self::TileBlockXor => "tile_block_xor",
        }
    }
}

/// Which half of the palette a CLUT load targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClutBank {
    /// Slots 0-7.
    Low,
    /// Slots 8-15.
    High,
}

impl ClutBank {
    /// Palette slot receiving the first colour of the load.
    pub fn first_slot(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::High => 8,
        }
    }
}

/// One decoded packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    NoOp,
    MemoryPreset { color: u8 },
    BorderPreset { color: u8 },
    Tile(TileBlock),
    Scroll(Scroll),
    SetKeyColor { index: u8 },
    /// Eight 4-bit RGB triples loaded into one half of the palette.
    LoadClut { bank: ClutBank, colors: [[u8; 3]; 8] },
}

impl Instruction {
    /// The opcode this instruction was decoded from; `None` for no-ops.
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Self::NoOp => None,
            Self::MemoryPreset { .. } => Some(Opcode::MemoryPreset),
            Self::BorderPreset { .. } => Some(Opcode::BorderPreset),
            Self::Tile(tile) if tile.xor => Some(Opcode::TileBlockXor),
            Self::Tile(_) => Some(Opcode::TileBlock),
            Self::Scroll(scroll) if scroll.copy => Some(Opcode::ScrollCopy),
            Self::Scroll(_) => Some(Opcode::ScrollPreset),
            Self::SetKeyColor { .. } => Some(Opcode::SetKeyColor),
            Self::LoadClut {
                bank: ClutBank::Low,
                ..
            } => Some(Opcode::LoadClutLow),
            Self::LoadClut {
                bank: ClutBank::High,
                ..
            } => Some(Opcode::LoadClutHigh),
        }
    }

    /// Executes the instruction against the framebuffer.
    pub fn apply(&self, frame: &mut FrameBuffer) {
        match self {
            Self::NoOp => {}
            Self::MemoryPreset { color } => frame.preset_memory(*color),
            Self::BorderPreset { color } => frame.preset_border(*color),
            Self::Tile(tile) => frame.draw_tile(tile),
            Self::Scroll(scroll) => frame.scroll(scroll),
            Self::SetKeyColor { index } => frame.set_key_color(*index),
            Self::LoadClut { bank, colors } => {
                let first = bank.first_slot();
                for (slot, [r, g, b]) in (first..).zip(colors) {
                    frame.set_clut_entry(slot, *r, *g, *b);
                }
            }
        }
    }

    /// Encodes the instruction back into a packet.
    ///
    /// Used to synthesise streams; [`Instruction::NoOp`] becomes an all-zero
    /// (non-graphics) packet.
    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut packet = [0u8; PACKET_SIZE];
        let Some(opcode) = self.opcode() else {
            return packet;
        };
        packet[0] = GRAPHICS_COMMAND;
        packet[1] = opcode.code();

        let data = &mut packet[DATA_OFFSET..DATA_OFFSET + DATA_SIZE];
        match self {
            Self::NoOp => {}
            Self::MemoryPreset { color } | Self::BorderPreset { color } => data[0] = *color,
            Self::Tile(tile) => {
                data[0] = tile.colors[0];
                data[1] = tile.colors[1];
                data[2] = tile.row;
                data[3] = tile.column;
                data[4..4 + TILE_HEIGHT].copy_from_slice(&tile.rows);
            }
            Self::Scroll(scroll) => {
                data[0] = scroll.fill_color;
                data[1] = (shift_command(scroll.horizontal) << 4) | (scroll.h_offset & 0x07);
                data[2] = (shift_command(scroll.vertical) << 4) | (scroll.v_offset & 0x0f);
            }
            Self::SetKeyColor { index } => data[0] = *index,
            Self::LoadClut { colors, .. } => {
                for (slot, [r, g, b]) in colors.iter().enumerate() {
                    let packed = (u16::from(r & 0x0f) << 8)
                        | (u16::from(g & 0x0f) << 4)
                        | u16::from(b & 0x0f);
                    data[2 * slot] = ((packed >> 6) & 0x3f) as u8;
                    data[2 * slot + 1] = (packed & 0x3f) as u8;
                }
            }
        }
        packet
    }
}

/// Something in the stream the decoder could not interpret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A graphics packet carried an opcode outside the known set.
    UnknownOpcode { packet: usize, opcode: u8 },
    /// The stream ended with an incomplete packet, which was dropped.
    TrailingBytes { len: usize },
}

/// Result of parsing a whole stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseOutput {
    pub instructions: Vec<Instruction>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseOutput {
    /// Number of instructions decoded from graphics packets with a known opcode.
    pub fn graphics_count(&self) -> usize {
        self.instructions
            .iter()
            .filter(|instruction| instruction.opcode().is_some())
            .count()
    }

    /// Instruction counts keyed by opcode name; no-ops are counted as `no_op`.
    pub fn opcode_histogram(&self) -> BTreeMap<&'static str, usize> {
        let mut histogram = BTreeMap::new();
        for instruction in &self.instructions {
            let name = instruction.opcode().map(Opcode::name).unwrap_or("no_op");
            *histogram.entry(name).or_insert(0) += 1;
        }
        histogram
    }
}

/// Decodes a full stream. Never fails; bad packets degrade to no-ops.
pub fn parse(bytes: &[u8]) -> ParseOutput {
    let mut output = ParseOutput {
        instructions: Vec::with_capacity(bytes.len() / PACKET_SIZE),
        diagnostics: Vec::new(),
    };

    let packets = bytes.chunks_exact(PACKET_SIZE);
    let remainder = packets.remainder().len();
    for (index, packet) in packets.enumerate() {
        let packet = <&[u8; PACKET_SIZE]>::try_from(packet).unwrap_or(&EMPTY_PACKET);
        match decode_packet(packet) {
            Ok(instruction) => output.instructions.push(instruction),
            Err(opcode) => {
                tracing::debug!(packet = index, opcode, "ignoring unknown opcode");
                output
                    .diagnostics
                    .push(Diagnostic::UnknownOpcode { packet: index, opcode });
                output.instructions.push(Instruction::NoOp);
            }
        }
    }

    if remainder > 0 {
        tracing::warn!(len = remainder, "dropping trailing partial packet");
        output
            .diagnostics
            .push(Diagnostic::TrailingBytes { len: remainder });
    }

    tracing::debug!(
        packets = output.instructions.len(),
        graphics = output.graphics_count(),
        diagnostics = output.diagnostics.len(),
        "parsed graphics stream"
    );
    output
}

/// Decodes one packet. Returns the raw opcode when it is not recognised.
pub fn decode_packet(packet: &[u8; PACKET_SIZE]) -> std::result::Result<Instruction, u8> {
    if packet[0] & COMMAND_MASK != GRAPHICS_COMMAND {
        return Ok(Instruction::NoOp);
    }

    let code = packet[1] & COMMAND_MASK;
    let data = &packet[DATA_OFFSET..DATA_OFFSET + DATA_SIZE];
    let opcode = Opcode::from_code(code).ok_or(code)?;

    let instruction = match opcode {
        Opcode::MemoryPreset => Instruction::MemoryPreset {
            color: data[0] & 0x0f,
        },
        Opcode::BorderPreset => Instruction::BorderPreset {
            color: data[0] & 0x0f,
        },
        Opcode::TileBlock => Instruction::Tile(decode_tile(data, false)),
        Opcode::TileBlockXor => Instruction::Tile(decode_tile(data, true)),
        Opcode::ScrollPreset => Instruction::Scroll(decode_scroll(data, false)),
        Opcode::ScrollCopy => Instruction::Scroll(decode_scroll(data, true)),
        Opcode::SetKeyColor => Instruction::SetKeyColor {
            index: data[0] & 0x0f,
        },
        Opcode::LoadClutLow => decode_clut(data, ClutBank::Low),
        Opcode::LoadClutHigh => decode_clut(data, ClutBank::High),
    };
    Ok(instruction)
}

fn decode_tile(data: &[u8], xor: bool) -> TileBlock {
    let mut rows = [0u8; TILE_HEIGHT];
    for (row, byte) in rows.iter_mut().zip(&data[4..4 + TILE_HEIGHT]) {
        *row = byte & 0x3f;
    }
    TileBlock {
        row: data[2] & 0x1f,
        column: data[3] & 0x3f,
        colors: [data[0] & 0x0f, data[1] & 0x0f],
        rows,
        xor,
    }
}

fn decode_scroll(data: &[u8], copy: bool) -> Scroll {
    Scroll {
        fill_color: data[0] & 0x0f,
        horizontal: ScrollShift::from_command((data[1] & 0x30) >> 4),
        h_offset: clamp_offset(data[1] & 0x07, 0x07),
        vertical: ScrollShift::from_command((data[2] & 0x30) >> 4),
        v_offset: clamp_offset(data[2] & 0x0f, 0x0f),
        copy,
    }
}

// The framebuffer narrows offsets to the tile size; this only bounds the field.
fn clamp_offset(value: u8, max: u8) -> u8 {
    value.min(max)
}

fn decode_clut(data: &[u8], bank: ClutBank) -> Instruction {
    let mut colors = [[0u8; 3]; 8];
    for (slot, color) in colors.iter_mut().enumerate() {
        let packed = (u16::from(data[2 * slot] & 0x3f) << 6) | u16::from(data[2 * slot + 1] & 0x3f);
        *color = [
            (packed >> 8) as u8,
            ((packed & 0xf0) >> 4) as u8,
            (packed & 0x0f) as u8,
        ];
    }
    Instruction::LoadClut { bank, colors }
}

fn shift_command(shift: ScrollShift) -> u8 {
    match shift {
        ScrollShift::None => 0,
        ScrollShift::Negative => 1,
        ScrollShift::Positive => 2,
    }
}
