// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Disc image model
//!
//! Loads disc images (.cue/.bin and .iso) and exposes the disc as a tree
//! of sessions and tracks with per-sector access. The device layer never
//! touches image files directly; everything goes through [`Disc`].
//!
//! Cooked (2048 byte) images are presented as Mode 1 discs with the raw
//! sector framing synthesized on the fly, so the device layer always
//! operates on full 2352-byte main channel sectors with generated P-Q
//! subchannel data.

mod sector;

pub use sector::{
    bcd_to_hex, compute_edc, decode_isrc, decode_mcn, encode_isrc, encode_mcn, hex_to_bcd,
    lba_to_msf, msf_to_lba, q_crc16, Mcsb, Sector, COOKED_SECTOR_SIZE, FRAMES_PER_SECOND,
    LEADIN_OFFSET, RAW_SECTOR_SIZE,
};
pub use sector::subchannel;

use std::path::Path;

use crate::core::error::ImageError;

/// Medium type of a loaded disc
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumType {
    /// CD-ROM / CD-DA medium
    Cd,
    /// DVD-ROM medium
    Dvd,
}

/// Sector (and track) data mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorType {
    /// CD-DA audio
    Audio,
    /// Mode 1 (2048 bytes user data)
    Mode1,
    /// Mode 2 formless (2336 bytes user data)
    Mode2,
    /// Mode 2 Form 1 (2048 bytes user data)
    Mode2Form1,
    /// Mode 2 Form 2 (2324 bytes user data)
    Mode2Form2,
    /// Mode 2 with mixed Form 1 / Form 2 sectors (track level only)
    Mode2Mixed,
}

/// An ISO image longer than this is presented as a DVD-ROM medium
const DVD_SECTOR_THRESHOLD: usize = 333_000;

/// Lead-out length inserted between sessions of a multisession disc
const INTER_SESSION_LEADOUT: i32 = 6750;

/// A single track on a disc
#[derive(Debug, Clone)]
pub struct Track {
    /// Track number (1-99)
    pub number: u32,
    /// Number of the session the track belongs to
    pub session_number: u32,
    /// Q subchannel ADR field
    pub adr: u8,
    /// Q subchannel control field
    pub ctl: u8,
    /// Track data mode
    pub mode: SectorType,
    /// Disc-absolute LBA of the track start (including pregap)
    pub start_sector: i32,
    /// Pregap length; index 01 begins at `start_sector + pregap`
    pub pregap: i32,
    /// Track length in sectors
    pub length: i32,
    /// Byte offset of the track within the image data
    pub file_offset: u64,
    /// ISRC of the track, if recorded
    pub isrc: Option<String>,
}

impl Track {
    /// Disc-absolute LBA of index 01 (the addressable track start)
    pub fn start(&self) -> i32 {
        self.start_sector + self.pregap
    }

    /// Whether `lba` falls within the track
    pub fn contains(&self, lba: i32) -> bool {
        lba >= self.start_sector && lba < self.start_sector + self.length
    }
}

/// A session on a disc
#[derive(Debug, Clone)]
pub struct Session {
    /// Session number (1-based)
    pub number: u32,
    /// Session type byte (0x00 CD-DA/CD-ROM, 0x10 CD-I, 0x20 CD-XA)
    pub session_type: u8,
    /// Tracks of the session, ordered by number
    pub tracks: Vec<Track>,
    /// Length of the session lead-out in sectors
    pub leadout_length: i32,
}

impl Session {
    /// First track of the session
    pub fn first_track(&self) -> &Track {
        &self.tracks[0]
    }

    /// Last track of the session
    pub fn last_track(&self) -> &Track {
        self.tracks.last().unwrap()
    }

    /// Disc-absolute LBA where the session lead-out begins
    pub fn leadout_start(&self) -> i32 {
        let last = self.last_track();
        last.start_sector + last.length
    }
}

/// Table of per-address disc rotation measurements (DPM)
///
/// Entries record the accumulated rotation angle, in 1/256 turns, at
/// every `resolution` sectors from `start`.
#[derive(Debug, Clone)]
pub struct DpmTable {
    /// First sector covered by the table
    pub start: i32,
    /// Sector distance between entries
    pub resolution: i32,
    /// Accumulated angle entries (1/256 turns)
    pub entries: Vec<u32>,
}

impl DpmTable {
    /// Rotation angle (in turns) at the given sector
    pub fn sector_angle(&self, lba: i32) -> Option<f64> {
        if self.resolution <= 0 || self.entries.is_empty() {
            return None;
        }
        let pos = (lba - self.start).max(0);
        let idx = (pos / self.resolution) as usize;
        let frac = (pos % self.resolution) as f64 / self.resolution as f64;

        let base = *self.entries.get(idx.min(self.entries.len() - 1))? as f64;
        let next = *self
            .entries
            .get((idx + 1).min(self.entries.len() - 1))? as f64;

        Some((base + (next - base) * frac) / 256.0)
    }
}

/// A loaded disc image
#[derive(Debug)]
pub struct Disc {
    filenames: Vec<String>,
    medium: MediumType,
    sessions: Vec<Session>,
    /// Raw image payload; sector pitch is `sector_size`
    data: Vec<u8>,
    sector_size: usize,
    mcn: Option<String>,
    dpm: Option<DpmTable>,
    /// DVD disc structures, keyed by (layer, format)
    structures: Vec<((u8, u8), Vec<u8>)>,
    cdtext: Vec<u8>,
}

impl Disc {
    /// Load a disc image from the given file names
    ///
    /// The first file name selects the parser by extension; `.cue` loads a
    /// cue sheet with its data file, `.iso` loads a cooked Mode 1 image.
    pub fn load(filenames: &[String]) -> Result<Self, ImageError> {
        let first = filenames
            .first()
            .ok_or_else(|| ImageError::UnrecognizedFormat("<empty>".into()))?;

        let ext = Path::new(first)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let disc = match ext.as_str() {
            "cue" => Self::load_cue(first)?,
            "iso" => Self::load_iso(first)?,
            _ => return Err(ImageError::UnrecognizedFormat(first.clone())),
        };

        log::info!(
            "Loaded disc image: {} session(s), {} track(s), {:?} medium",
            disc.sessions.len(),
            disc.track_count(),
            disc.medium
        );

        Ok(disc)
    }

    /// Load a cooked ISO image as a single-track Mode 1 disc
    fn load_iso(path: &str) -> Result<Self, ImageError> {
        let data = std::fs::read(path).map_err(|e| ImageError::FileRead {
            file: path.to_string(),
            message: e.to_string(),
        })?;

        let num_sectors = data.len() / COOKED_SECTOR_SIZE;
        if num_sectors == 0 {
            return Err(ImageError::Parse(format!(
                "ISO image '{}' is shorter than one sector",
                path
            )));
        }

        let medium = if num_sectors > DVD_SECTOR_THRESHOLD {
            MediumType::Dvd
        } else {
            MediumType::Cd
        };

        let track = Track {
            number: 1,
            session_number: 1,
            adr: 1,
            ctl: 4,
            mode: SectorType::Mode1,
            start_sector: 0,
            pregap: 0,
            length: num_sectors as i32,
            file_offset: 0,
            isrc: None,
        };

        Ok(Self {
            filenames: vec![path.to_string()],
            medium,
            sessions: vec![Session {
                number: 1,
                session_type: 0x00,
                tracks: vec![track],
                leadout_length: 0,
            }],
            data,
            sector_size: COOKED_SECTOR_SIZE,
            mcn: None,
            dpm: None,
            structures: Vec::new(),
            cdtext: Vec::new(),
        })
    }

    /// Load a cue sheet and its data file
    fn load_cue(cue_path: &str) -> Result<Self, ImageError> {
        let cue_data = std::fs::read_to_string(cue_path).map_err(|e| ImageError::FileRead {
            file: cue_path.to_string(),
            message: e.to_string(),
        })?;

        let mut bin_file: Option<String> = None;
        let mut mcn: Option<String> = None;
        let mut session_number: u32 = 1;
        let mut max_session: u32 = 1;

        struct CueTrack {
            number: u32,
            session: u32,
            mode: SectorType,
            index0: Option<i32>,
            index1: Option<i32>,
            isrc: Option<String>,
        }
        let mut tracks: Vec<CueTrack> = Vec::new();

        for line in cue_data.lines() {
            let line = line.trim();
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("FILE") => {
                    if let (Some(start), Some(end)) = (line.find('"'), line.rfind('"')) {
                        if end > start {
                            bin_file = Some(line[start + 1..end].to_string());
                        }
                    }
                }
                Some("CATALOG") => {
                    mcn = parts.next().map(|s| s.to_string());
                }
                Some("REM") => {
                    // "REM SESSION n" marks a session boundary
                    if parts.next() == Some("SESSION") {
                        if let Some(n) = parts.next().and_then(|s| s.parse().ok()) {
                            session_number = n;
                            max_session = max_session.max(n);
                        }
                    }
                }
                Some("TRACK") => {
                    let number = parts
                        .next()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| ImageError::Parse(format!("bad TRACK line: '{}'", line)))?;
                    let mode = match parts.next() {
                        Some("AUDIO") => SectorType::Audio,
                        Some("MODE1/2352") => SectorType::Mode1,
                        Some("MODE2/2352") => SectorType::Mode2Mixed,
                        Some(other) => {
                            return Err(ImageError::Parse(format!(
                                "unsupported track type '{}'",
                                other
                            )))
                        }
                        None => {
                            return Err(ImageError::Parse(format!("bad TRACK line: '{}'", line)))
                        }
                    };
                    tracks.push(CueTrack {
                        number,
                        session: session_number,
                        mode,
                        index0: None,
                        index1: None,
                        isrc: None,
                    });
                }
                Some("INDEX") => {
                    let idx: u32 = parts
                        .next()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| ImageError::Parse(format!("bad INDEX line: '{}'", line)))?;
                    let msf = parts
                        .next()
                        .ok_or_else(|| ImageError::Parse(format!("bad INDEX line: '{}'", line)))?;
                    let lba = parse_cue_msf(msf)?;
                    let track = tracks
                        .last_mut()
                        .ok_or_else(|| ImageError::Parse("INDEX before TRACK".into()))?;
                    match idx {
                        0 => track.index0 = Some(lba),
                        1 => track.index1 = Some(lba),
                        _ => {}
                    }
                }
                Some("ISRC") => {
                    if let Some(track) = tracks.last_mut() {
                        track.isrc = parts.next().map(|s| s.to_string());
                    }
                }
                _ => {}
            }
        }

        if tracks.is_empty() {
            return Err(ImageError::Parse("cue sheet contains no tracks".into()));
        }

        let bin_file =
            bin_file.ok_or_else(|| ImageError::Parse("no FILE directive in cue sheet".into()))?;
        let bin_path = Path::new(cue_path)
            .parent()
            .map(|p| p.join(&bin_file))
            .unwrap_or_else(|| Path::new(&bin_file).to_path_buf());
        let data = std::fs::read(&bin_path).map_err(|e| ImageError::FileRead {
            file: bin_path.display().to_string(),
            message: e.to_string(),
        })?;

        let total_sectors = (data.len() / RAW_SECTOR_SIZE) as i32;

        // Resolve track extents: each track runs to the start of the next
        let mut resolved: Vec<Track> = Vec::with_capacity(tracks.len());
        for (i, t) in tracks.iter().enumerate() {
            let index1 = t
                .index1
                .ok_or_else(|| ImageError::Parse(format!("track {} has no INDEX 01", t.number)))?;
            let start_sector = t.index0.unwrap_or(index1);
            let next_start = tracks
                .get(i + 1)
                .map(|n| n.index0.or(n.index1).unwrap_or(total_sectors))
                .unwrap_or(total_sectors);

            resolved.push(Track {
                number: t.number,
                session_number: t.session,
                adr: 1,
                ctl: if t.mode == SectorType::Audio { 0 } else { 4 },
                mode: t.mode,
                start_sector,
                pregap: index1 - start_sector,
                length: next_start - start_sector,
                file_offset: start_sector as u64 * RAW_SECTOR_SIZE as u64,
                isrc: t.isrc.clone(),
            });
        }

        // Group tracks into sessions
        let mut sessions: Vec<Session> = Vec::new();
        for n in 1..=max_session {
            let session_tracks: Vec<Track> = resolved
                .iter()
                .filter(|t| t.session_number == n)
                .cloned()
                .collect();
            if session_tracks.is_empty() {
                continue;
            }
            let session_type = match session_tracks[0].mode {
                SectorType::Audio | SectorType::Mode1 => 0x00,
                _ => 0x20,
            };
            sessions.push(Session {
                number: n,
                session_type,
                tracks: session_tracks,
                leadout_length: 0,
            });
        }
        let last = sessions.len() - 1;
        for (i, session) in sessions.iter_mut().enumerate() {
            if i < last {
                session.leadout_length = INTER_SESSION_LEADOUT;
            }
        }

        Ok(Self {
            filenames: vec![cue_path.to_string(), bin_path.display().to_string()],
            medium: MediumType::Cd,
            sessions,
            data,
            sector_size: RAW_SECTOR_SIZE,
            mcn,
            dpm: None,
            structures: Vec::new(),
            cdtext: Vec::new(),
        })
    }

    /// File names the disc was loaded from
    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    /// Medium type
    pub fn medium_type(&self) -> MediumType {
        self.medium
    }

    /// Media catalogue number, if recorded
    pub fn mcn(&self) -> Option<&str> {
        self.mcn.as_deref()
    }

    /// Number of sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Session by zero-based index
    pub fn session_by_index(&self, index: usize) -> Option<&Session> {
        self.sessions.get(index)
    }

    /// Session by session number
    pub fn session_by_number(&self, number: u32) -> Option<&Session> {
        self.sessions.iter().find(|s| s.number == number)
    }

    /// First session
    pub fn first_session(&self) -> &Session {
        &self.sessions[0]
    }

    /// Last session
    pub fn last_session(&self) -> &Session {
        self.sessions.last().unwrap()
    }

    /// Total number of tracks across all sessions
    pub fn track_count(&self) -> usize {
        self.sessions.iter().map(|s| s.tracks.len()).sum()
    }

    /// Track by zero-based index across all sessions
    pub fn track_by_index(&self, index: usize) -> Option<&Track> {
        self.sessions.iter().flat_map(|s| &s.tracks).nth(index)
    }

    /// Last track of the disc
    pub fn last_track(&self) -> &Track {
        self.last_session().last_track()
    }

    /// Track by track number
    pub fn track_by_number(&self, number: u32) -> Option<&Track> {
        self.sessions
            .iter()
            .flat_map(|s| &s.tracks)
            .find(|t| t.number == number)
    }

    /// Track containing the given disc-absolute address
    pub fn track_by_address(&self, lba: i32) -> Option<&Track> {
        self.sessions
            .iter()
            .flat_map(|s| &s.tracks)
            .find(|t| t.contains(lba))
    }

    /// Disc-absolute LBA where the lead-out of the last session begins
    pub fn leadout_start(&self) -> i32 {
        self.last_session().leadout_start()
    }

    /// Fetch the sector at the given disc-absolute address
    ///
    /// Returns [`ImageError::MissingSector`] when the address falls outside
    /// every track.
    pub fn get_sector(&self, lba: i32) -> Result<Sector, ImageError> {
        let track = self
            .track_by_address(lba)
            .ok_or(ImageError::MissingSector(lba))?;

        let offset =
            track.file_offset as usize + (lba - track.start_sector) as usize * self.sector_size;
        if offset + self.sector_size > self.data.len() {
            return Err(ImageError::MissingSector(lba));
        }

        let mut raw = Box::new([0u8; RAW_SECTOR_SIZE]);
        let kind;
        if self.sector_size == RAW_SECTOR_SIZE {
            raw.copy_from_slice(&self.data[offset..offset + RAW_SECTOR_SIZE]);
            kind = match track.mode {
                // Mixed Mode 2 tracks carry the form in the subheader
                SectorType::Mode2Mixed => {
                    if raw[18] & 0x20 != 0 {
                        SectorType::Mode2Form2
                    } else {
                        SectorType::Mode2Form1
                    }
                }
                mode => mode,
            };
        } else {
            // Cooked image: synthesize Mode 1 framing around the user data
            kind = SectorType::Mode1;
            raw[1..11].fill(0xFF);
            let (m, s, f) = lba_to_msf(lba, true);
            raw[12] = hex_to_bcd(m);
            raw[13] = hex_to_bcd(s);
            raw[14] = hex_to_bcd(f);
            raw[15] = 0x01;
            raw[16..2064].copy_from_slice(&self.data[offset..offset + COOKED_SECTOR_SIZE]);
            let edc = compute_edc(&raw[0..2064]);
            raw[2064..2068].copy_from_slice(&edc.to_le_bytes());
        }

        let subq = self.generate_subchannel_q(track, lba, kind);
        Ok(Sector::new(lba, kind, raw, subq))
    }

    /// Read a sector, extracting the fields selected by the MCSB byte and
    /// subchannel mode into `out`
    ///
    /// Returns the number of bytes produced.
    pub fn read_sector(
        &self,
        lba: i32,
        mcsb: u8,
        subchan: u8,
        out: &mut [u8],
    ) -> Result<usize, ImageError> {
        let sector = self.get_sector(lba)?;
        let mcsb = Mcsb::from_bits_truncate(mcsb);
        Ok(sector.extract(mcsb, subchan, out))
    }

    /// Generate the 16-byte P-Q subchannel for a sector
    ///
    /// Most sectors carry Mode 1 Q (position); if the disc has an MCN,
    /// every hundredth sector carries Mode 2 Q, and tracks with an ISRC
    /// likewise interleave Mode 3 Q.
    fn generate_subchannel_q(&self, track: &Track, lba: i32, kind: SectorType) -> [u8; 16] {
        let mut q = [0u8; 16];
        let frame = lba + LEADIN_OFFSET;

        let mode = if self.mcn.is_some() && frame % 100 == 2 {
            0x02
        } else if track.isrc.is_some() && frame % 100 == 4 {
            0x03
        } else {
            0x01
        };

        let ctl = if kind == SectorType::Audio {
            track.ctl
        } else {
            track.ctl | 0x04
        };
        q[0] = (ctl << 4) | mode;

        match mode {
            0x02 => {
                encode_mcn(self.mcn.as_deref().unwrap(), &mut q[1..8]);
                let (_, _, f) = lba_to_msf(lba, true);
                q[9] = hex_to_bcd(f);
            }
            0x03 => {
                encode_isrc(track.isrc.as_deref().unwrap(), &mut q[1..10]);
            }
            _ => {
                q[1] = hex_to_bcd(track.number as u8);
                let rel = lba - track.start();
                if rel < 0 {
                    // Pregap: index 00, relative address counts down
                    q[2] = 0x00;
                    let (m, s, f) = lba_to_msf(-rel, false);
                    q[3] = hex_to_bcd(m);
                    q[4] = hex_to_bcd(s);
                    q[5] = hex_to_bcd(f);
                } else {
                    q[2] = 0x01;
                    let (m, s, f) = lba_to_msf(rel, false);
                    q[3] = hex_to_bcd(m);
                    q[4] = hex_to_bcd(s);
                    q[5] = hex_to_bcd(f);
                }
                let (m, s, f) = lba_to_msf(lba, true);
                q[7] = hex_to_bcd(m);
                q[8] = hex_to_bcd(s);
                q[9] = hex_to_bcd(f);
            }
        }

        let crc = q_crc16(&q[0..10]);
        q[10..12].copy_from_slice(&crc.to_be_bytes());
        q
    }

    /// DVD disc structure for the given layer and format
    pub fn disc_structure(&self, layer: u8, format: u8) -> Option<&[u8]> {
        self.structures
            .iter()
            .find(|((l, f), _)| *l == layer && *f == format)
            .map(|(_, data)| data.as_slice())
    }

    /// CD-TEXT data of the disc (empty if none)
    pub fn cdtext(&self) -> &[u8] {
        &self.cdtext
    }

    /// Rotation angle at the given sector, from the DPM table
    pub fn sector_angle(&self, lba: i32) -> Option<f64> {
        self.dpm.as_ref().and_then(|d| d.sector_angle(lba))
    }
}

/// Parse a cue sheet MSF field ("MM:SS:FF") into a file-relative LBA
fn parse_cue_msf(msf: &str) -> Result<i32, ImageError> {
    let parts: Vec<&str> = msf.split(':').collect();
    if parts.len() != 3 {
        return Err(ImageError::Parse(format!("invalid MSF value '{}'", msf)));
    }
    let m: u8 = parts[0]
        .parse()
        .map_err(|_| ImageError::Parse(format!("invalid minute in '{}'", msf)))?;
    let s: u8 = parts[1]
        .parse()
        .map_err(|_| ImageError::Parse(format!("invalid second in '{}'", msf)))?;
    let f: u8 = parts[2]
        .parse()
        .map_err(|_| ImageError::Parse(format!("invalid frame in '{}'", msf)))?;
    Ok(msf_to_lba(m, s, f, false))
}

/// Image parsers known to the library, as (id, name, description, mime)
pub fn supported_parsers() -> &'static [(&'static str, &'static str, &'static str, &'static str)] {
    &[
        (
            "parser-cue",
            "CUE sheet",
            "Cue sheet with raw data file",
            "application/x-cue",
        ),
        (
            "parser-iso",
            "ISO image",
            "Cooked ISO9660 image",
            "application/x-cd-image",
        ),
    ]
}

/// Fragment (data source) implementations known to the library, as (id, name)
pub fn supported_fragments() -> &'static [(&'static str, &'static str)] {
    &[
        ("fragment-binary", "Binary file"),
        ("fragment-null", "Null (zero-filled)"),
    ]
}

/// Programmatic disc assembly
///
/// Builds an in-memory [`Disc`], generating raw sectors with valid framing
/// and EDC. This is the writable counterpart of the loader interface; the
/// loaders and the test suites are both built on top of it.
#[derive(Debug)]
pub struct DiscBuilder {
    medium: MediumType,
    mcn: Option<String>,
    sessions: Vec<Session>,
    data: Vec<u8>,
    next_track: u32,
    structures: Vec<((u8, u8), Vec<u8>)>,
    cdtext: Vec<u8>,
    dpm: Option<DpmTable>,
    corrupt: Vec<i32>,
}

impl DiscBuilder {
    /// Start building a disc of the given medium type
    pub fn new(medium: MediumType) -> Self {
        Self {
            medium,
            mcn: None,
            sessions: vec![Session {
                number: 1,
                session_type: 0x00,
                tracks: Vec::new(),
                leadout_length: 0,
            }],
            data: Vec::new(),
            next_track: 1,
            structures: Vec::new(),
            cdtext: Vec::new(),
            dpm: None,
            corrupt: Vec::new(),
        }
    }

    /// Begin a new session; subsequent tracks are added to it
    pub fn begin_session(mut self) -> Self {
        let number = self.sessions.len() as u32 + 1;
        for session in &mut self.sessions {
            if session.leadout_length == 0 {
                session.leadout_length = INTER_SESSION_LEADOUT;
            }
        }
        self.sessions.push(Session {
            number,
            session_type: 0x00,
            tracks: Vec::new(),
            leadout_length: 0,
        });
        self
    }

    /// Append a data track of `length` generated sectors
    pub fn data_track(self, mode: SectorType, length: i32) -> Self {
        self.add_track(mode, length, None)
    }

    /// Append an audio track of `length` generated sectors
    pub fn audio_track(self, length: i32) -> Self {
        self.add_track(SectorType::Audio, length, None)
    }

    /// Append an audio track with the given PCM payload per sector
    pub fn audio_track_with(self, length: i32, fill: &[u8]) -> Self {
        self.add_track(SectorType::Audio, length, Some(fill))
    }

    fn add_track(mut self, mode: SectorType, length: i32, fill: Option<&[u8]>) -> Self {
        let start_sector = (self.data.len() / RAW_SECTOR_SIZE) as i32;
        let number = self.next_track;
        self.next_track += 1;

        for i in 0..length {
            let lba = start_sector + i;
            let mut raw = [0u8; RAW_SECTOR_SIZE];
            match mode {
                SectorType::Audio => {
                    if let Some(fill) = fill {
                        for (dst, src) in raw.iter_mut().zip(fill.iter().cycle()) {
                            *dst = *src;
                        }
                    } else {
                        for (j, byte) in raw.iter_mut().enumerate() {
                            *byte = ((lba as usize + j) & 0xFF) as u8;
                        }
                    }
                }
                SectorType::Mode1 => {
                    raw[1..11].fill(0xFF);
                    let (m, s, f) = lba_to_msf(lba, true);
                    raw[12] = hex_to_bcd(m);
                    raw[13] = hex_to_bcd(s);
                    raw[14] = hex_to_bcd(f);
                    raw[15] = 0x01;
                    for (j, byte) in raw[16..2064].iter_mut().enumerate() {
                        *byte = ((lba as usize).wrapping_mul(31) + j) as u8;
                    }
                    let edc = compute_edc(&raw[0..2064]);
                    raw[2064..2068].copy_from_slice(&edc.to_le_bytes());
                }
                SectorType::Mode2Form1 | SectorType::Mode2Mixed => {
                    raw[1..11].fill(0xFF);
                    let (m, s, f) = lba_to_msf(lba, true);
                    raw[12] = hex_to_bcd(m);
                    raw[13] = hex_to_bcd(s);
                    raw[14] = hex_to_bcd(f);
                    raw[15] = 0x02;
                    // Subheader, twice: form 1
                    raw[18] = 0x08;
                    raw[22] = 0x08;
                    for (j, byte) in raw[24..2072].iter_mut().enumerate() {
                        *byte = ((lba as usize).wrapping_mul(17) + j) as u8;
                    }
                    let edc = compute_edc(&raw[16..2072]);
                    raw[2072..2076].copy_from_slice(&edc.to_le_bytes());
                }
                SectorType::Mode2Form2 => {
                    raw[1..11].fill(0xFF);
                    let (m, s, f) = lba_to_msf(lba, true);
                    raw[12] = hex_to_bcd(m);
                    raw[13] = hex_to_bcd(s);
                    raw[14] = hex_to_bcd(f);
                    raw[15] = 0x02;
                    raw[18] = 0x28;
                    raw[22] = 0x28;
                }
                SectorType::Mode2 => {
                    raw[1..11].fill(0xFF);
                    let (m, s, f) = lba_to_msf(lba, true);
                    raw[12] = hex_to_bcd(m);
                    raw[13] = hex_to_bcd(s);
                    raw[14] = hex_to_bcd(f);
                    raw[15] = 0x02;
                }
            }
            self.data.extend_from_slice(&raw);
        }

        let session = self.sessions.last_mut().unwrap();
        let session_number = session.number;
        if session.tracks.is_empty() {
            session.session_type = match mode {
                SectorType::Audio | SectorType::Mode1 => 0x00,
                _ => 0x20,
            };
        }
        session.tracks.push(Track {
            number,
            session_number,
            adr: 1,
            ctl: if mode == SectorType::Audio { 0 } else { 4 },
            mode,
            start_sector,
            pregap: 0,
            length,
            file_offset: start_sector as u64 * RAW_SECTOR_SIZE as u64,
            isrc: None,
        });
        self
    }

    /// Record an ISRC on the most recently added track
    pub fn isrc(mut self, isrc: &str) -> Self {
        if let Some(track) = self.sessions.last_mut().and_then(|s| s.tracks.last_mut()) {
            track.isrc = Some(isrc.to_string());
        }
        self
    }

    /// Record the media catalogue number
    pub fn mcn(mut self, mcn: &str) -> Self {
        self.mcn = Some(mcn.to_string());
        self
    }

    /// Attach a DVD disc structure
    pub fn structure(mut self, layer: u8, format: u8, data: Vec<u8>) -> Self {
        self.structures.push(((layer, format), data));
        self
    }

    /// Attach CD-TEXT data
    pub fn cdtext(mut self, data: Vec<u8>) -> Self {
        self.cdtext = data;
        self
    }

    /// Attach a DPM table
    pub fn dpm(mut self, dpm: DpmTable) -> Self {
        self.dpm = Some(dpm);
        self
    }

    /// Corrupt the user data of a sector without updating its EDC
    pub fn corrupt_sector(mut self, lba: i32) -> Self {
        self.corrupt.push(lba);
        self
    }

    /// Finish building the disc
    pub fn finish(mut self) -> Disc {
        for lba in &self.corrupt {
            let offset = *lba as usize * RAW_SECTOR_SIZE + 100;
            if offset < self.data.len() {
                self.data[offset] ^= 0xFF;
            }
        }
        self.sessions.retain(|s| !s.tracks.is_empty());

        Disc {
            filenames: vec!["<memory>".to_string()],
            medium: self.medium,
            sessions: self.sessions,
            data: self.data,
            sector_size: RAW_SECTOR_SIZE,
            mcn: self.mcn,
            dpm: self.dpm,
            structures: self.structures,
            cdtext: self.cdtext,
        }
    }
}
