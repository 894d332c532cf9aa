use std::{
    fs::File,
    io::{BufReader, Read, Seek},
    path::{Path, PathBuf},
};

use crate::{
    packet::{self, ParseOutput, PACKET_SIZE},
    Result,
};

/// Raw graphics stream of one song, as read from a `.cdg` file or a
/// karaoke `.zip` bundle.
#[derive(Debug, Clone)]
pub struct Track {
    path: Option<PathBuf>,
    bytes: Vec<u8>,
    audio_entry: Option<String>,
}

impl Track {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            path: None,
            bytes,
            audio_entry: None,
        }
    }

    /// Opens a track, reading `.zip` files as karaoke archives and anything
    /// else as a bare graphics stream.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let is_archive = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if is_archive {
            Self::from_zip_path(path)
        } else {
            Self::from_path(path)
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "read graphics track");
        Ok(Self {
            path: Some(path.to_path_buf()),
            bytes,
            audio_entry: None,
        })
    }

    pub fn from_zip_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut track = Self::from_zip(BufReader::new(file))?;
        tracing::info!(path = %path.display(), bytes = track.bytes.len(), "read karaoke archive");
        track.path = Some(path.to_path_buf());
        Ok(track)
    }

    /// Reads the first `.cdg` entry of a karaoke archive. Entry names are
    /// matched case-insensitively.
    pub fn from_zip<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = zip::ZipArchive::new(reader)?;

        let mut graphics = None;
        let mut audio_entry = None;
        for index in 0..archive.len() {
            let name = archive.by_index(index)?.name().to_string();
            let lower = name.to_ascii_lowercase();
            if lower.ends_with(".cdg") && graphics.is_none() {
                graphics = Some(index);
            } else if lower.ends_with(".mp3") && audio_entry.is_none() {
                audio_entry = Some(name);
            }
        }

        let Some(index) = graphics else {
            return Err("karaoke archive has no .cdg entry".into());
        };
        if audio_entry.is_none() {
            tracing::warn!("karaoke archive has no .mp3 entry");
        }

        let mut entry = archive.by_index(index)?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        tracing::debug!(entry = entry.name(), bytes = bytes.len(), "extracted graphics entry");

        Ok(Self {
            path: None,
            bytes,
            audio_entry,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Name of the audio entry that accompanied the graphics in an archive.
    pub fn audio_entry(&self) -> Option<&str> {
        self.audio_entry.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn packet_count(&self) -> usize {
        self.bytes.len() / PACKET_SIZE
    }

    /// Playback length implied by the packet count at `packet_rate` packets/s.
    pub fn duration_ms(&self, packet_rate: u64) -> f64 {
        if packet_rate == 0 {
            return 0.0;
        }
        self.packet_count() as f64 * 1000.0 / packet_rate as f64
    }

    pub fn parse(&self) -> ParseOutput {
        packet::parse(&self.bytes)
    }
}
