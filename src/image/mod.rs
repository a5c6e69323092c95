/// Disk image data structures

/// Builder for blank formatted images
pub mod builder;
/// Sector definition and word codec
pub mod sector;
/// Track definition
pub mod track;

pub use builder::DiskImageBuilder;
pub use sector::{Sector, SectorId};
pub use track::Track;

use log::warn;

use crate::error::{ImgError, Result};
use crate::format::geometry::BootCapture;
use crate::format::SourceFormat;
use crate::fs::{FileInfo, VolInfo};

/// Fill pattern of freshly formatted sectors
pub const FORMAT_PATTERN: u32 = 0xF6F6_F6F6;

/// One cylinder: a track per head
#[derive(Debug, Clone)]
pub struct Cylinder {
    /// Cylinder number
    pub cylinder_number: u16,
    /// Tracks, indexed by head
    heads: Vec<Track>,
}

impl Cylinder {
    /// Create a new cylinder with no heads
    pub fn new(cylinder_number: u16) -> Self {
        Self {
            cylinder_number,
            heads: Vec::new(),
        }
    }

    /// Add the next head's track
    pub fn add_head(&mut self, track: Track) {
        self.heads.push(track);
    }

    /// Get a reference to all tracks
    pub fn heads(&self) -> &[Track] {
        &self.heads
    }

    /// Get a mutable reference to all tracks
    pub fn heads_mut(&mut self) -> &mut [Track] {
        &mut self.heads
    }

    /// Get a track by head number
    pub fn get_head(&self, head: u8) -> Option<&Track> {
        self.heads.get(head as usize)
    }

    /// Get a mutable reference to a track by head number
    pub fn get_head_mut(&mut self, head: u8) -> Option<&mut Track> {
        self.heads.get_mut(head as usize)
    }

    /// Number of heads present
    pub fn head_count(&self) -> usize {
        self.heads.len()
    }
}

/// Main disk image container
///
/// The grid holds one track per (cylinder, head); the nominal geometry fields
/// describe the common case but individual tracks may carry different sector
/// counts and sizes (XDF and copy-protected media do).
#[derive(Debug, Clone)]
pub struct DiskImage {
    pub(crate) name: String,
    pub(crate) cylinders: Vec<Cylinder>,
    pub(crate) n_cylinders: u16,
    pub(crate) n_heads: u8,
    pub(crate) n_sectors: u8,
    pub(crate) sector_bytes: u32,
    pub(crate) media_id: u8,
    pub(crate) logical_sectors: Option<u8>,
    pub(crate) xdf: bool,
    pub(crate) writable: bool,
    pub(crate) source: SourceFormat,
    pub(crate) boot_original: Option<BootCapture>,
    pub(crate) vol_table: Vec<VolInfo>,
    pub(crate) file_table: Vec<FileInfo>,
}

impl DiskImage {
    /// Create an empty image with the given nominal geometry
    pub(crate) fn with_shape(
        name: String,
        n_cylinders: u16,
        n_heads: u8,
        n_sectors: u8,
        sector_bytes: u32,
        media_id: u8,
        source: SourceFormat,
    ) -> Self {
        Self {
            name,
            cylinders: Vec::new(),
            n_cylinders,
            n_heads,
            n_sectors,
            sector_bytes,
            media_id,
            logical_sectors: None,
            xdf: false,
            writable: false,
            source,
            boot_original: None,
            vol_table: Vec::new(),
            file_table: Vec::new(),
        }
    }

    /// Create a new builder for constructing blank images
    pub fn builder() -> DiskImageBuilder {
        DiskImageBuilder::new()
    }

    /// The image name (used as a prefix in diagnostics)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Nominal cylinder count
    pub fn cylinder_count(&self) -> u16 {
        self.n_cylinders
    }

    /// Nominal head count
    pub fn head_count(&self) -> u8 {
        self.n_heads
    }

    /// Nominal sectors per track
    pub fn sectors_per_track(&self) -> u8 {
        self.n_sectors
    }

    /// Sectors per track as seen by the filesystem (a smaller logical format
    /// can sit on larger physical media)
    pub fn fs_sectors_per_track(&self) -> u8 {
        self.logical_sectors.unwrap_or(self.n_sectors)
    }

    /// Sector size in bytes
    pub fn sector_size(&self) -> u32 {
        self.sector_bytes
    }

    /// Media ID byte
    pub fn media_id(&self) -> u8 {
        self.media_id
    }

    /// Source container this image was parsed from
    pub fn source(&self) -> SourceFormat {
        self.source
    }

    /// Whether the image is XDF-formatted
    pub fn is_xdf(&self) -> bool {
        self.xdf
    }

    /// Whether writes are allowed
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Allow or forbid writes
    pub fn set_writable(&mut self, writable: bool) {
        self.writable = writable;
    }

    /// Original boot-sector bytes, captured when resolution modified the BPB
    pub fn boot_original(&self) -> Option<&BootCapture> {
        self.boot_original.as_ref()
    }

    /// The volume table built by `build_tables`
    pub fn vol_table(&self) -> &[VolInfo] {
        &self.vol_table
    }

    /// The file table built by `build_tables`
    pub fn file_table(&self) -> &[FileInfo] {
        &self.file_table
    }

    /// Get a reference to all cylinders
    pub fn cylinders(&self) -> &[Cylinder] {
        &self.cylinders
    }

    /// Get a track by cylinder and head
    pub fn get_track(&self, cylinder: u16, head: u8) -> Option<&Track> {
        self.cylinders
            .get(cylinder as usize)
            .and_then(|c| c.get_head(head))
    }

    /// Get a mutable reference to a track by cylinder and head
    pub fn get_track_mut(&mut self, cylinder: u16, head: u8) -> Option<&mut Track> {
        self.cylinders
            .get_mut(cylinder as usize)
            .and_then(|c| c.get_head_mut(head))
    }

    /// Grow the grid so that (cylinder, head) exists, creating empty tracks
    ///
    /// Used by the PSI parser, whose chunk stream announces sectors in any
    /// order. Bumps the nominal geometry as the grid grows.
    pub(crate) fn ensure_track(&mut self, cylinder: u16, head: u8) -> &mut Track {
        while self.cylinders.len() <= cylinder as usize {
            let number = self.cylinders.len() as u16;
            self.cylinders.push(Cylinder::new(number));
        }
        self.n_cylinders = self.n_cylinders.max(cylinder + 1);
        self.n_heads = self.n_heads.max(head + 1);
        let cyl = &mut self.cylinders[cylinder as usize];
        while cyl.head_count() <= head as usize {
            let h = cyl.head_count() as u8;
            cyl.add_head(Track::new(cylinder, h));
        }
        &mut cyl.heads[head as usize]
    }

    /// Find a sector by ID within a track; returns its position index
    ///
    /// Sectors are scanned in physical order because IDs are neither sorted
    /// nor unique on protected media. Passing the index returned by the
    /// previous call makes repeated requests for the same ID cycle through
    /// duplicates, which is what weak-bit protection expects.
    pub fn seek(&self, cylinder: u16, head: u8, id: u8, previous: Option<usize>) -> Option<usize> {
        self.get_track(cylinder, head)?.find_sector(id, previous)
    }

    /// Get a sector by its track position index
    pub fn sector_at(&self, cylinder: u16, head: u8, index: usize) -> Option<&Sector> {
        self.get_track(cylinder, head)?.get_sector_by_index(index)
    }

    /// Get a mutable sector by its track position index
    pub fn sector_at_mut(&mut self, cylinder: u16, head: u8, index: usize) -> Option<&mut Sector> {
        self.get_track_mut(cylinder, head)?
            .get_sector_by_index_mut(index)
    }

    /// Read one byte from a sector; -1 for out-of-range or error sectors
    pub fn read_byte(&self, cylinder: u16, head: u8, index: usize, byte_index: usize) -> i32 {
        match self.sector_at(cylinder, head, index) {
            Some(sector) => sector.read_byte(byte_index),
            None => -1,
        }
    }

    /// Write one byte to a sector
    ///
    /// Fails unless the image was made writable; successful writes maintain
    /// the sector's modified-word range.
    pub fn write_byte(
        &mut self,
        cylinder: u16,
        head: u8,
        index: usize,
        byte_index: usize,
        value: u8,
    ) -> Result<()> {
        if !self.writable {
            return Err(ImgError::NotWritable);
        }
        let sector = self
            .sector_at_mut(cylinder, head, index)
            .ok_or(ImgError::InvalidTrack { cylinder, head })?;
        if !sector.write_byte(byte_index, value) {
            let id = sector.id.id;
            return Err(ImgError::InvalidSector { cylinder, head, id });
        }
        Ok(())
    }

    /// Synthesize blank tracks for an additional head on every cylinder
    ///
    /// Reformatting a single-sided image as double-sided is an explicit
    /// operation here, not a side effect of seeking.
    pub fn expand_heads(&mut self, heads: u8) -> Result<()> {
        if !self.writable {
            return Err(ImgError::NotWritable);
        }
        if heads <= self.n_heads || heads > 2 {
            return Ok(());
        }
        let n_sectors = self.n_sectors;
        let sector_bytes = self.sector_bytes;
        for cyl in &mut self.cylinders {
            while cyl.head_count() < heads as usize {
                let head = cyl.head_count() as u8;
                let mut track = Track::new(cyl.cylinder_number, head);
                for s in 0..n_sectors {
                    let id = SectorId::new(cyl.cylinder_number, head, s + 1, sector_bytes);
                    track.add_sector(Sector::new(id, FORMAT_PATTERN));
                }
                cyl.add_head(track);
            }
        }
        self.n_heads = heads;
        Ok(())
    }

    /// Append blank sectors to a track, bumping the nominal count
    ///
    /// Covers drives that format a ninth sector onto an eight-sector track.
    pub fn extend_track(&mut self, cylinder: u16, head: u8, sectors: u8) -> Result<()> {
        if !self.writable {
            return Err(ImgError::NotWritable);
        }
        let sector_bytes = self.sector_bytes;
        let track = self
            .get_track_mut(cylinder, head)
            .ok_or(ImgError::InvalidTrack { cylinder, head })?;
        while (track.sector_count() as u8) < sectors {
            let id = track.sector_count() as u8 + 1;
            track.add_sector(Sector::new(
                SectorId::new(cylinder, head, id, sector_bytes),
                FORMAT_PATTERN,
            ));
        }
        self.n_sectors = self.n_sectors.max(sectors);
        Ok(())
    }

    /// The image-wide 32-bit checksum
    ///
    /// Sums every sector's word checksum; see `Sector::checksum` for the
    /// legacy treatment of compressed sectors.
    pub fn checksum(&self) -> u32 {
        self.cylinders
            .iter()
            .flat_map(|c| c.heads())
            .flat_map(|t| t.sectors())
            .fold(0u32, |acc, s| acc.wrapping_add(s.checksum()))
    }

    /// Total size of the image data in bytes
    pub fn disk_size(&self) -> usize {
        if self.xdf {
            // XDF tracks occupy a uniform slot regardless of how many
            // sector bytes they actually carry
            let slot = self.n_sectors as usize * self.sector_bytes as usize;
            return self.track_count() * slot;
        }
        self.cylinders
            .iter()
            .flat_map(|c| c.heads())
            .map(|t| t.total_data_size())
            .sum()
    }

    /// Number of tracks in the grid
    fn track_count(&self) -> usize {
        self.cylinders.iter().map(|c| c.head_count()).sum()
    }

    // ---- LBA addressing (filesystem view) ----

    /// Translate an LBA to (cylinder, head, sector index)
    pub(crate) fn lba_to_chs(&self, lba: u32) -> (u16, u8, usize) {
        let spt = self.fs_sectors_per_track().max(1) as u32;
        let heads = self.n_heads.max(1) as u32;
        let cylinder = (lba / (heads * spt)) as u16;
        let head = ((lba / spt) % heads) as u8;
        let index = (lba % spt) as usize;
        (cylinder, head, index)
    }

    /// Get the sector at an LBA
    pub fn sector_by_lba(&self, lba: u32) -> Option<&Sector> {
        let (c, h, i) = self.lba_to_chs(lba);
        self.sector_at(c, h, i)
    }

    /// Get a mutable sector at an LBA
    pub fn sector_by_lba_mut(&mut self, lba: u32) -> Option<&mut Sector> {
        let (c, h, i) = self.lba_to_chs(lba);
        self.sector_at_mut(c, h, i)
    }

    /// Read and decompress the sectors of an LBA range
    pub(crate) fn read_lba_range(&self, lba: u32, count: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity((count * self.sector_bytes) as usize);
        for i in 0..count {
            match self.sector_by_lba(lba + i) {
                Some(sector) => sector.decompress_into(&mut out),
                None => {
                    warn!("{}: LBA {} outside the sector grid", self.name, lba + i);
                    out.resize(out.len() + self.sector_bytes as usize, 0);
                }
            }
        }
        out
    }

    /// Serialize the sector grid back to a contiguous raw buffer
    ///
    /// If geometry resolution rewrote the boot sector, the captured original
    /// bytes are put back so the output matches the source image.
    pub fn get_data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.disk_size());
        let slot = self.n_sectors as usize * self.sector_bytes as usize;
        for cyl in &self.cylinders {
            for track in cyl.heads() {
                let track_start = out.len();
                for sector in track.sectors() {
                    sector.decompress_into(&mut out);
                }
                if self.xdf {
                    // Pad to the uniform track slot
                    out.resize(track_start + slot, 0);
                }
            }
        }
        if let Some(capture) = &self.boot_original {
            let start = capture.lba as usize * self.sector_bytes as usize;
            let end = start + capture.bytes.len();
            if end <= out.len() {
                out[start..end].copy_from_slice(&capture.bytes);
            }
        }
        out
    }

    /// Build the volume and file tables, populating sector back-references
    ///
    /// With `rebuild` set, existing tables are discarded first; otherwise an
    /// already-built table is left alone. Returns the number of files found.
    pub fn build_tables(&mut self, rebuild: bool) -> Result<usize> {
        if !self.vol_table.is_empty() && !rebuild {
            return Ok(self.file_table.len());
        }
        self.delete_tables();
        crate::fs::decoder::build_tables(self)
    }

    /// Discard the volume and file tables
    ///
    /// Scrubs every sector's file back-reference and modify markers.
    /// Idempotent, and always completes before `build_tables` rebuilds.
    pub fn delete_tables(&mut self) {
        for cyl in &mut self.cylinders {
            for track in cyl.heads_mut() {
                for sector in track.sectors_mut() {
                    sector.clear_file_link();
                    sector.reset_modify();
                }
            }
        }
        self.vol_table.clear();
        self.file_table.clear();
    }
}
