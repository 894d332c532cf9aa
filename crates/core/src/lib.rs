//! Core library for the CD+Graphics karaoke player.
//!
//! Bytes flow through the [`packet`] parser into an instruction list that the
//! [`timeline::Scheduler`] replays against a [`framebuffer::FrameBuffer`],
//! keeping the picture locked to the audio position reported by the host.
//! Each module owns one stage of that pipeline.

pub mod config;
pub mod error;
pub mod framebuffer;
pub mod packet;
pub mod render;
pub mod timeline;
pub mod track;

pub use config::{AppConfig, PlayerConfig, RenderConfig};
pub use error::{CdgError, Result};
pub use framebuffer::{FrameBuffer, Rgb, Scroll, ScrollShift, TileBlock, HEIGHT, WIDTH};
pub use packet::{parse, ClutBank, Diagnostic, Instruction, Opcode, ParseOutput, PACKET_SIZE};
pub use render::{encode_png, MemorySurface, NullSurface, Renderer, Surface};
pub use timeline::{
    run_for, FrameView, ManualTime, MonotonicTime, PlaybackClock, PlayerState, RunSummary,
    Scheduler, TickHandle, TickOutcome, TimeSource,
};
pub use track::Track;
