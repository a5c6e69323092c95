/// FAT filesystem structures shared by the decoder and builder

/// FAT volume synthesis from host file descriptors
pub mod builder;
/// FAT volume traversal and file table construction
pub mod decoder;

pub use builder::build_volume_from_files;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::bytes::{ByteView, ByteViewMut};
use crate::format::constants::{attr, DIRENT_SIZE};

/// Description of one FAT volume on a disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolInfo {
    /// Volume index within the image
    pub vol_index: usize,
    /// Partition index, or -1 for an unpartitioned disk
    pub partition: i32,
    /// Media ID byte
    pub media_id: u8,
    /// LBA of the volume's boot sector
    pub lba_start: u32,
    /// Total sectors in the volume
    pub lba_total: u32,
    /// FAT entry width: 12 or 16
    pub fat_bits: u8,
    /// Volume block address of the first FAT sector
    pub vba_fat: u32,
    /// Volume block address of the first root directory sector
    pub vba_root: u32,
    /// Volume block address of the first data sector
    pub vba_data: u32,
    /// Maximum root directory entries
    pub root_entries: u32,
    /// Sectors per cluster
    pub cluster_secs: u32,
    /// Largest cluster number that can appear in a chain
    pub cluster_max: u32,
    /// Count of clusters marked bad
    pub clusters_bad: u32,
    /// Count of free clusters
    pub clusters_free: u32,
    /// Total data clusters
    pub clusters_total: u32,
    /// Sector size in bytes
    pub sector_bytes: u32,
}

impl VolInfo {
    /// Bytes per cluster
    pub fn cluster_bytes(&self) -> u32 {
        self.cluster_secs * self.sector_bytes
    }

    /// Free space in bytes
    pub fn free_bytes(&self) -> u64 {
        self.clusters_free as u64 * self.cluster_bytes() as u64
    }
}

/// One file or directory found by the volume decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Volume index this file lives on
    pub vol_index: usize,
    /// Full path, backslash-separated and rooted at "\"
    pub path: String,
    /// 8.3 name
    pub name: String,
    /// Attribute bits
    pub attr: u8,
    /// Modification date and time, when the entry held a valid one
    pub date: Option<NaiveDateTime>,
    /// File size in bytes (0 for directories)
    pub size: u32,
    /// Starting cluster
    pub cluster: u32,
    /// LBA of every sector the file occupies, in file order
    pub lbas: Vec<u32>,
}

impl FileInfo {
    /// Whether this entry is a subdirectory
    pub fn is_dir(&self) -> bool {
        self.attr & attr::SUBDIR != 0
    }

    /// Whether this entry is the volume label
    pub fn is_volume_label(&self) -> bool {
        self.attr & attr::VOLUME != 0
    }
}

/// A host-side file or directory to pack into a new FAT volume
#[derive(Debug, Clone, Default)]
pub struct FileDescriptor {
    /// Path of the containing directory, backslash-separated
    pub path: String,
    /// File name (transformed to 8.3 during the build)
    pub name: String,
    /// Attribute bits
    pub attr: u8,
    /// Modification date and time
    pub date: Option<NaiveDateTime>,
    /// Size in bytes; negative marks a directory
    pub size: i64,
    /// File contents (empty for directories)
    pub data: Vec<u8>,
    /// Children, for directories
    pub files: Option<Vec<FileDescriptor>>,
}

impl FileDescriptor {
    /// Create a plain file descriptor
    pub fn file<S: Into<String>>(name: S, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: data.len() as i64,
            attr: attr::ARCHIVE,
            data,
            ..Default::default()
        }
    }

    /// Create a directory descriptor
    pub fn directory<S: Into<String>>(name: S, files: Vec<FileDescriptor>) -> Self {
        Self {
            name: name.into(),
            size: -1,
            attr: attr::SUBDIR,
            files: Some(files),
            ..Default::default()
        }
    }

    /// Whether this descriptor is a directory
    pub fn is_dir(&self) -> bool {
        self.size < 0
    }
}

/// A decoded 32-byte directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Raw 8-byte name field
    pub name: [u8; 8],
    /// Raw 3-byte extension field
    pub ext: [u8; 3],
    /// Attribute bits
    pub attr: u8,
    /// Packed modification time
    pub time: u16,
    /// Packed modification date
    pub date: u16,
    /// Starting cluster
    pub cluster: u16,
    /// Size in bytes
    pub size: u32,
}

/// Outcome of scanning one directory slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirSlot {
    /// First byte 0x00: this and all following slots are unused
    End,
    /// First byte 0xE5: deleted, keep scanning
    Deleted,
    /// A live entry
    Entry(DirEntry),
}

impl DirEntry {
    /// Decode one 32-byte directory slot
    pub fn parse(slot: &[u8]) -> DirSlot {
        if slot.len() < DIRENT_SIZE || slot[0] == 0x00 {
            return DirSlot::End;
        }
        if slot[0] == 0xE5 {
            return DirSlot::Deleted;
        }
        let view = ByteView::new(slot);
        let mut name = [0u8; 8];
        let mut ext = [0u8; 3];
        name.copy_from_slice(view.bytes(0, 8));
        ext.copy_from_slice(view.bytes(8, 3));
        DirSlot::Entry(DirEntry {
            name,
            ext,
            attr: view.u8(11),
            time: view.u16_le(22),
            date: view.u16_le(24),
            cluster: view.u16_le(26),
            size: view.u32_le(28),
        })
    }

    /// Encode into a 32-byte directory slot
    pub fn write_to(&self, slot: &mut [u8]) {
        debug_assert!(slot.len() >= DIRENT_SIZE);
        let mut view = ByteViewMut::new(slot);
        view.copy_from(0, &self.name);
        view.copy_from(8, &self.ext);
        view.set_u8(11, self.attr);
        view.set_u16_le(22, self.time);
        view.set_u16_le(24, self.date);
        view.set_u16_le(26, self.cluster);
        view.set_u32_le(28, self.size);
    }

    /// The entry's display name ("NAME.EXT", trailing spaces trimmed)
    pub fn display_name(&self) -> String {
        let name = trim_field(&self.name);
        let ext = trim_field(&self.ext);
        if self.attr & attr::VOLUME != 0 {
            // Volume labels span both fields with no separator
            let mut label = String::from_utf8_lossy(&self.name).into_owned();
            label.push_str(&String::from_utf8_lossy(&self.ext));
            return label.trim_end().to_string();
        }
        if ext.is_empty() {
            name
        } else {
            format!("{}.{}", name, ext)
        }
    }

    /// Whether this entry is "." or ".."
    pub fn is_dot(&self) -> bool {
        self.name[0] == b'.'
    }

    /// The modification timestamp, when valid
    pub fn datetime(&self) -> Option<NaiveDateTime> {
        fat_datetime(self.date, self.time)
    }
}

fn trim_field(field: &[u8]) -> String {
    String::from_utf8_lossy(field).trim_end().to_string()
}

/// Decode a packed FAT date/time pair
///
/// Date: `yyyyyyym mmmddddd` with the year based at 1980; time:
/// `hhhhhmmm mmmxxxxx` with two-second resolution.
pub fn fat_datetime(date: u16, time: u16) -> Option<NaiveDateTime> {
    let year = ((date >> 9) & 0x7F) as i32 + 1980;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;
    let hour = ((time >> 11) & 0x1F) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// Encode a timestamp as a packed FAT (date, time) pair
///
/// Years are clamped to the representable 1980..=2099 range.
pub fn to_fat_datetime(dt: &NaiveDateTime) -> (u16, u16) {
    let year = dt.year().clamp(1980, 2099);
    let date = (((year - 1980) as u16) << 9)
        | ((dt.month() as u16) << 5)
        | dt.day() as u16;
    let time = ((dt.hour() as u16) << 11)
        | ((dt.minute() as u16) << 5)
        | (dt.second() as u16 / 2);
    (date, time)
}
