/// Parsers and serializers for the supported containers

/// JSON import/export (legacy and extended)
pub mod json;
/// PSI chunk-stream parsing
pub mod psi;
/// Raw sector-stream parsing and serialization
pub mod raw;

use std::path::Path;

use crate::error::Result;
use crate::format::is_psi;
use crate::image::DiskImage;

/// A caller-supplied per-sector edit, parsed from `C:H:S:value`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorEdit {
    /// Cylinder number
    pub cylinder: u16,
    /// Head number
    pub head: u8,
    /// Sector ID to match
    pub sector: u8,
    /// New ID, or the error byte for forced read errors
    pub value: i32,
}

impl SectorEdit {
    /// Parse a `C:H:S:value` edit string
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split(':');
        let cylinder = parts.next()?.parse().ok()?;
        let head = parts.next()?.parse().ok()?;
        let sector = parts.next()?.parse().ok()?;
        let value = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            cylinder,
            head,
            sector,
            value,
        })
    }
}

/// Supplementary per-sector metadata, typically recovered from annotated
/// MFM captures, applied on top of a parsed raw image
#[derive(Debug, Clone, Default)]
pub struct SectorOverride {
    /// Cylinder of the sector to patch
    pub cylinder: u16,
    /// Head of the sector to patch
    pub head: u8,
    /// ID of the sector to patch
    pub sector: u8,
    /// Replacement sector ID
    pub id: Option<u8>,
    /// Replacement sector length
    pub length: Option<u32>,
    /// Recorded data-field CRC
    pub data_crc: Option<u32>,
    /// Recorded ID-field CRC
    pub head_crc: Option<u32>,
    /// Recorded data address mark
    pub data_mark: Option<u32>,
    /// Replacement sector contents
    pub data: Option<Vec<u8>>,
}

/// Options for the parser entry points
#[derive(Debug, Clone)]
pub struct ImageOptions {
    /// Allow writes to the parsed image
    pub writable: bool,
    /// Overwrite the boot sector with a matching default BPB unconditionally
    pub force_bpb: bool,
    /// Recognize the XDF variable-sector layout
    pub xdf: bool,
    /// Sector ID edits to apply during construction
    pub sector_ids: Vec<SectorEdit>,
    /// Forced read errors to apply during construction
    pub sector_errors: Vec<SectorEdit>,
    /// Metadata overlays to apply during construction
    pub overrides: Vec<SectorOverride>,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            writable: false,
            force_bpb: false,
            xdf: true,
            sector_ids: Vec::new(),
            sector_errors: Vec::new(),
            overrides: Vec::new(),
        }
    }
}

/// Check whether a path names a JSON image
pub fn is_json_file<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

impl DiskImage {
    /// Build an image from a binary buffer, sniffing PSI against raw
    pub fn from_bytes(name: &str, buffer: &[u8], options: &ImageOptions) -> Result<DiskImage> {
        if is_psi(buffer) {
            psi::build_from_psi(name, buffer, options)
        } else {
            raw::build_from_buffer(name, buffer, options)
        }
    }

    /// Build an image from JSON text (legacy or extended)
    pub fn from_json(name: &str, text: &str, options: &ImageOptions) -> Result<DiskImage> {
        json::build_from_json(name, text, options)
    }

    /// Serialize as extended JSON
    pub fn to_json(&self, command: Option<&str>) -> Result<String> {
        json::to_json(self, command)
    }

    /// Serialize as legacy JSON (bare cylinder/head/sector array)
    pub fn to_json_legacy(&self) -> Result<String> {
        json::to_json_legacy(self)
    }

    /// Open an image file, dispatching on its extension and contents
    pub fn open<P: AsRef<Path>>(path: P, options: &ImageOptions) -> Result<DiskImage> {
        let name = path
            .as_ref()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "disk".to_string());
        if is_json_file(&path) {
            let text = std::fs::read_to_string(path)?;
            Self::from_json(&name, &text, options)
        } else {
            let buffer = std::fs::read(path)?;
            Self::from_bytes(&name, &buffer, options)
        }
    }

    /// Save the image, as JSON when the extension asks for it and as a raw
    /// sector stream otherwise
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if is_json_file(&path) {
            std::fs::write(path, self.to_json(None)?)?;
        } else {
            std::fs::write(path, self.get_data())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_edit_parse() {
        let edit = SectorEdit::parse("39:1:8:9").unwrap();
        assert_eq!(edit.cylinder, 39);
        assert_eq!(edit.head, 1);
        assert_eq!(edit.sector, 8);
        assert_eq!(edit.value, 9);

        assert!(SectorEdit::parse("1:2:3").is_none());
        assert!(SectorEdit::parse("1:2:3:4:5").is_none());
        assert!(SectorEdit::parse("a:b:c:d").is_none());
    }

    #[test]
    fn test_is_json_file() {
        assert!(is_json_file("disk.json"));
        assert!(is_json_file("DISK.JSON"));
        assert!(!is_json_file("disk.img"));
        assert!(!is_json_file("disk"));
    }

    #[test]
    fn test_open_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let img_path = dir.path().join("blank.img");
        let json_path = dir.path().join("blank.json");

        let image = DiskImage::builder()
            .cylinders(2)
            .heads(1)
            .sectors_per_track(8)
            .build();
        image.save(&img_path).unwrap();
        image.save(&json_path).unwrap();

        let from_img = DiskImage::open(&img_path, &ImageOptions::default());
        // An 8 KB blank image matches no known capacity, so the raw parser
        // refuses it; the JSON flavor carries its own shape.
        assert!(from_img.is_err());
        let from_json = DiskImage::open(&json_path, &ImageOptions::default()).unwrap();
        assert_eq!(from_json.cylinder_count(), 2);
        assert_eq!(from_json.get_data(), image.get_data());
    }
}
