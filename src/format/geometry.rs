/// Geometry resolution for raw disk buffers
///
/// Turns an untyped byte buffer into a cylinder/head/sector shape by probing,
/// in order: an MBR partition table, a BPB in the boot sector, the capacity
/// lookup table, XDF markers, repairable default BPBs, and finally the
/// private DSK header. Physical and logical disagreements are reconciled
/// with warnings rather than failures wherever a usable shape remains.

use log::{debug, warn};

use crate::bytes::{ByteView, ByteViewMut};
use crate::error::{ImgError, Result};
use crate::format::bpb::{find_template, Bpb, TEMPLATE_BYTES};
use crate::format::constants::{
    bpb_off, geometry_for_size, mbr, media, BOOT_SIGNATURE, BOOT_SIGNATURE_OFFSET, FORMAT_FILLER,
    OEM_STRING, OPCODE_JMPS, SECTOR_BYTES, XDF_TOTAL_SECS,
};

/// Buffers at least this large are probed for an MBR before anything else
const MBR_PROBE_MIN: usize = 3_000_000;

/// Minimum JMPS displacement that proves boot code branches past the BPB
const JMPS_MIN_TARGET: u8 = 0x22;

/// Resolved disk shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    /// Nominal cylinder count
    pub cylinders: u16,
    /// Nominal head count
    pub heads: u8,
    /// Nominal sectors per track (physical)
    pub sectors: u8,
    /// Sector size in bytes
    pub sector_bytes: u32,
    /// Media ID byte
    pub media_id: u8,
    /// Logical sectors per track when a smaller format sits on larger media
    pub logical_sectors: Option<u8>,
    /// XDF layout (variable sector sizes on cylinders >= 1)
    pub xdf: bool,
    /// LBA of the boot sector (nonzero for partitioned images)
    pub boot_lba: u32,
    /// Whether a usable BPB was found or installed
    pub bpb_found: bool,
    /// Whether the buffer's boot sector was rewritten during resolution
    pub bpb_modified: bool,
    /// Offset of sector data within the buffer (nonzero for DSK images)
    pub data_offset: usize,
    /// Per-track (sectors, sector_bytes) table from a DSK header
    pub track_table: Option<Vec<(u16, u16)>>,
}

/// Original boot-sector bytes captured before the buffer was modified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootCapture {
    /// LBA of the captured sector
    pub lba: u32,
    /// The unmodified sector contents
    pub bytes: Vec<u8>,
}

/// Outcome of geometry resolution
#[derive(Debug)]
pub struct Resolution {
    /// The resolved shape
    pub geometry: Geometry,
    /// Original boot sector, present only when the buffer was rewritten
    pub boot_original: Option<BootCapture>,
}

/// Options controlling geometry resolution
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Overwrite the boot sector with a matching default BPB unconditionally
    pub force_bpb: bool,
    /// Recognize the XDF variable-sector layout
    pub xdf: bool,
}

/// Resolve the geometry of a raw image buffer, repairing its BPB if needed
pub fn resolve(buffer: &mut [u8], name: &str, options: ResolveOptions) -> Result<Resolution> {
    let mut boot_lba = 0u32;
    if buffer.len() >= MBR_PROBE_MIN {
        if let Some(lba) = probe_mbr(buffer) {
            debug!("{}: MBR active partition at LBA {}", name, lba);
            boot_lba = lba;
        }
    }

    let boot_offset = boot_lba as usize * SECTOR_BYTES;
    let mut bpb = probe_bpb(buffer, boot_offset);
    let table = geometry_for_size(buffer.len());
    let mut capture: Option<BootCapture> = None;
    let mut bpb_modified = false;

    let mut geometry = match (&bpb, table) {
        (Some(b), Some(t)) => {
            let from_bpb = geometry_from_bpb(buffer.len(), b, boot_lba);
            if from_bpb.heads != t.heads || from_bpb.sectors != t.sectors {
                warn!(
                    "{}: BPB geometry {}:{} disagrees with physical {}:{}",
                    name, from_bpb.heads, from_bpb.sectors, t.heads, t.sectors
                );
            }
            // Physical shape wins for the sector grid; the BPB keeps its say
            // through the logical override below.
            geometry_from_table(t, boot_lba)
        }
        (Some(b), None) => geometry_from_bpb(buffer.len(), b, boot_lba),
        (None, Some(t)) => geometry_from_table(t, boot_lba),
        (None, None) => Geometry::unknown(),
    };
    geometry.bpb_found = bpb.is_some();

    // XDF disks carry an ordinary BPB whose total sector count is the tell.
    if options.xdf {
        if let Some(b) = &bpb {
            if b.total_sectors() == XDF_TOTAL_SECS {
                debug!("{}: XDF layout detected", name);
                geometry.xdf = true;
            }
        }
    }

    // No usable BPB: look for a default template matching this capacity and
    // repair the boot sector when it is safe (or forced) to do so.
    if bpb.is_none() {
        let media_hint = table.map(|t| t.media_id).or_else(|| fat_media_byte(buffer));
        let template = media_hint.and_then(|id| find_template(id, buffer.len(), None));
        let damaged = is_damaged_boot(buffer);
        if let Some(tpl) = template {
            let repaired = Bpb::parse(&tpl[..]);
            // Pre-2.0 boot code runs straight through the BPB area; a JMPS
            // with a short displacement is the one thing we must not clobber.
            let code_in_bpb = buffer.first() == Some(&OPCODE_JMPS)
                && buffer.get(1).copied().unwrap_or(0) < JMPS_MIN_TARGET;
            let rewrite = options.force_bpb || damaged || !code_in_bpb;
            if rewrite {
                capture_boot(&mut capture, buffer, boot_lba, geometry.sector_bytes);
                if options.force_bpb || damaged {
                    // Whole prefix, JMP stub and OEM string included
                    let copy_len = TEMPLATE_BYTES.min(buffer.len());
                    buffer[..copy_len]
                        .copy_from_slice(&tpl[..copy_len]);
                } else {
                    // Keep the pre-2.0 date string at 0x03..0x0B intact
                    let end = TEMPLATE_BYTES.min(buffer.len());
                    if end > bpb_off::SECTOR_BYTES {
                        buffer[bpb_off::SECTOR_BYTES..end]
                            .copy_from_slice(&tpl[bpb_off::SECTOR_BYTES..end]);
                    }
                }
                bpb_modified = true;
                debug!("{}: installed default BPB for media {:#04X}", name, repaired.media_id);
            } else {
                debug!("{}: default BPB assumed for media {:#04X}", name, repaired.media_id);
            }
            if geometry.cylinders == 0 {
                geometry = geometry_from_bpb(buffer.len(), &repaired, boot_lba);
            }
            geometry.bpb_found = true;
            bpb = Some(repaired);
        }
    }

    // A smaller logical format can sit inside a larger physical one
    // (160 KB inside 180 KB, 320 KB inside 360 KB).
    if let (Some(b), Some(t)) = (&bpb, table) {
        let shrink = matches!(
            (t.media_id, b.media_id),
            (media::M180K, media::M160K) | (media::M360K, media::M320K)
        );
        if shrink && b.track_secs > 0 && (b.track_secs as u8) < t.sectors {
            debug!(
                "{}: logical media {:#04X} uses {} sectors/track on {}-sector media",
                name, b.media_id, b.track_secs, t.sectors
            );
            geometry.logical_sectors = Some(b.track_secs as u8);
            geometry.media_id = b.media_id;
        }
    }

    if geometry.cylinders == 0 || geometry.heads == 0 {
        // Last resort: the private DSK header keeps its shape in the first
        // 8 bytes rather than in a boot sector.
        if let Some(resolution) = probe_dsk_header(buffer, name)? {
            return Ok(resolution);
        }
        return Err(ImgError::UnknownGeometry(format!(
            "{}: {} bytes matches no known disk shape",
            name,
            buffer.len()
        )));
    }

    // Stamp our OEM string into any valid signed BPB, preserving the original
    // bytes so serializers can put them back.
    if geometry.bpb_found {
        let view = ByteView::new(buffer.get(boot_offset..).unwrap_or(&[]));
        let signed = view.u16_le(BOOT_SIGNATURE_OFFSET) == BOOT_SIGNATURE;
        let oem_start = boot_offset + bpb_off::OEM;
        let already = buffer.get(oem_start..oem_start + 8) == Some(&OEM_STRING[..]);
        if signed && !already {
            capture_boot(&mut capture, buffer, boot_lba, geometry.sector_bytes);
            let mut view = ByteViewMut::new(buffer);
            view.copy_from(oem_start, OEM_STRING);
            bpb_modified = true;
        }
    }

    geometry.bpb_modified = bpb_modified;
    Ok(Resolution {
        geometry,
        boot_original: if bpb_modified { capture } else { None },
    })
}

impl Geometry {
    fn unknown() -> Self {
        Geometry {
            cylinders: 0,
            heads: 0,
            sectors: 0,
            sector_bytes: SECTOR_BYTES as u32,
            media_id: 0,
            logical_sectors: None,
            xdf: false,
            boot_lba: 0,
            bpb_found: false,
            bpb_modified: false,
            data_offset: 0,
            track_table: None,
        }
    }

    /// Sectors per track as seen by the filesystem
    pub fn fs_sectors(&self) -> u8 {
        self.logical_sectors.unwrap_or(self.sectors)
    }
}

/// Scan the partition table of a signed MBR; returns the active partition's
/// first LBA
fn probe_mbr(buffer: &[u8]) -> Option<u32> {
    let view = ByteView::new(buffer);
    if view.u16_le(BOOT_SIGNATURE_OFFSET) != BOOT_SIGNATURE {
        return None;
    }
    for &entry in &mbr::ENTRIES {
        if view.u8(entry + mbr::STATUS) >= mbr::STATUS_ACTIVE {
            return Some(view.u32_le(entry + mbr::VBA_FIRST));
        }
    }
    None
}

/// Parse a BPB at the given offset, if the sector looks like DOS 2.0+ boot code
fn probe_bpb(buffer: &[u8], offset: usize) -> Option<Bpb> {
    let boot = buffer.get(offset..)?;
    if !Bpb::has_jmp(boot) {
        return None;
    }
    let bpb = Bpb::parse(boot);
    if bpb.sector_bytes as usize != SECTOR_BYTES {
        return None;
    }
    Some(bpb)
}

fn geometry_from_bpb(buffer_len: usize, bpb: &Bpb, boot_lba: u32) -> Geometry {
    let mut geometry = Geometry::unknown();
    if bpb.total_heads == 0 || bpb.track_secs == 0 {
        return geometry;
    }
    geometry.heads = bpb.total_heads as u8;
    geometry.sectors = bpb.track_secs as u8;
    geometry.sector_bytes = bpb.sector_bytes as u32;
    geometry.media_id = bpb.media_id;
    geometry.boot_lba = boot_lba;

    let track_bytes = bpb.total_heads as usize * bpb.track_secs as usize * bpb.sector_bytes as usize;
    let derived = (bpb.hidden_secs + bpb.total_sectors()) / (bpb.total_heads as u32 * bpb.track_secs as u32);
    // The buffer may carry a reserve cylinder beyond what the BPB describes;
    // trust the buffer when it divides into whole cylinders.
    geometry.cylinders = if track_bytes > 0 && buffer_len % track_bytes == 0 {
        (buffer_len / track_bytes) as u16
    } else {
        derived as u16
    };
    geometry
}

fn geometry_from_table(entry: &'static crate::format::constants::GeometryEntry, boot_lba: u32) -> Geometry {
    let mut geometry = Geometry::unknown();
    geometry.cylinders = entry.cylinders;
    geometry.heads = entry.heads;
    geometry.sectors = entry.sectors;
    geometry.sector_bytes = entry.sector_bytes;
    geometry.media_id = entry.media_id;
    geometry.boot_lba = boot_lba;
    geometry
}

/// First byte of the first FAT sector, assuming one reserved sector
fn fat_media_byte(buffer: &[u8]) -> Option<u8> {
    let id = buffer.get(SECTOR_BYTES).copied()?;
    if media::is_recognized(id) {
        Some(id)
    } else {
        None
    }
}

/// A boot sector that still holds the format filler never had boot code; if
/// the FAT media byte looks sane the disk is usable with a default BPB.
fn is_damaged_boot(buffer: &[u8]) -> bool {
    buffer.first() == Some(&FORMAT_FILLER)
        && buffer.get(1) == Some(&FORMAT_FILLER)
        && buffer.get(SECTOR_BYTES).is_some_and(|&b| b >= media::FIXED)
}

fn capture_boot(capture: &mut Option<BootCapture>, buffer: &[u8], lba: u32, sector_bytes: u32) {
    if capture.is_some() {
        return;
    }
    let start = lba as usize * SECTOR_BYTES;
    let cb = if sector_bytes > 0 { sector_bytes as usize } else { SECTOR_BYTES };
    let end = (start + cb).min(buffer.len());
    if start < end {
        *capture = Some(BootCapture {
            lba,
            bytes: buffer[start..end].to_vec(),
        });
    }
}

/// Probe the private DSK header: byte 0 is 0x00 or 0x01, followed by head,
/// cylinder, sector and size fields; a zeroed sector/size pair means a
/// per-track table follows at offset 8.
fn probe_dsk_header(buffer: &[u8], name: &str) -> Result<Option<Resolution>> {
    if buffer.len() < 8 {
        return Ok(None);
    }
    let view = ByteView::new(buffer);
    let format = view.u8(0);
    if format > 1 {
        return Ok(None);
    }
    let heads = view.u8(1);
    let cylinders = view.u16_le(2);
    let sectors = view.u16_le(4);
    let sector_bytes = view.u16_le(6);
    if heads == 0 || cylinders == 0 {
        return Ok(None);
    }

    let mut geometry = Geometry::unknown();
    geometry.heads = heads;
    geometry.cylinders = cylinders;
    geometry.data_offset = 8;

    if sectors == 0 && sector_bytes == 0 {
        // Variable layout: one (sectors, bytes) pair per track
        let tracks = cylinders as usize * heads as usize;
        let table_end = 8 + tracks * 4;
        if buffer.len() < table_end {
            return Err(ImgError::parse(8, "DSK track table truncated"));
        }
        let mut table = Vec::with_capacity(tracks);
        let mut max_sectors = 0u16;
        let mut max_bytes = 0u16;
        for i in 0..tracks {
            let secs = view.u16_le(8 + i * 4);
            let bytes = view.u16_le(8 + i * 4 + 2);
            max_sectors = max_sectors.max(secs);
            max_bytes = max_bytes.max(bytes);
            table.push((secs, bytes));
        }
        debug!("{}: DSK track table with {} tracks", name, tracks);
        geometry.sectors = max_sectors as u8;
        geometry.sector_bytes = max_bytes as u32;
        geometry.track_table = Some(table);
        geometry.data_offset = table_end;
    } else {
        if sectors == 0 || sector_bytes == 0 {
            return Err(ImgError::parse(4, "DSK header has a zero sector or size field"));
        }
        geometry.sectors = sectors as u8;
        geometry.sector_bytes = sector_bytes as u32;
    }
    Ok(Some(Resolution {
        geometry,
        boot_original: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::bpb::DEFAULT_BPBS;

    fn raw_image(bytes: usize) -> Vec<u8> {
        vec![0u8; bytes]
    }

    #[test]
    fn test_resolve_by_capacity() {
        let mut buf = raw_image(163_840);
        let res = resolve(&mut buf, "test", ResolveOptions::default()).unwrap();
        let g = res.geometry;
        assert_eq!((g.cylinders, g.heads, g.sectors), (40, 1, 8));
        assert_eq!(g.sector_bytes, 512);
        assert_eq!(g.media_id, 0xFE);
        // A blank boot sector gets the matching default BPB installed, with
        // the original bytes captured for re-emission.
        assert!(g.bpb_found);
        assert!(g.bpb_modified);
        assert_eq!(Bpb::parse(&buf).total_secs, 320);
        assert!(res.boot_original.unwrap().bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_resolve_unknown_size() {
        let mut buf = raw_image(12345);
        assert!(resolve(&mut buf, "test", ResolveOptions::default()).is_err());
    }

    #[test]
    fn test_resolve_with_bpb() {
        let mut buf = raw_image(368_640);
        buf[..TEMPLATE_BYTES].copy_from_slice(&DEFAULT_BPBS[3]);
        let res = resolve(&mut buf, "test", ResolveOptions::default()).unwrap();
        let g = res.geometry;
        assert_eq!((g.cylinders, g.heads, g.sectors), (40, 2, 9));
        assert!(g.bpb_found);
        assert!(!g.bpb_modified); // unsigned boot sector keeps its OEM bytes
    }

    #[test]
    fn test_oem_overwrite_captures_original() {
        let mut buf = raw_image(368_640);
        buf[..TEMPLATE_BYTES].copy_from_slice(&DEFAULT_BPBS[3]);
        buf[bpb_off::OEM..bpb_off::OEM + 8].copy_from_slice(b"MSDOS5.0");
        buf[0x1FE] = 0x55;
        buf[0x1FF] = 0xAA;
        let res = resolve(&mut buf, "test", ResolveOptions::default()).unwrap();
        assert!(res.geometry.bpb_modified);
        assert_eq!(&buf[bpb_off::OEM..bpb_off::OEM + 8], OEM_STRING);
        let original = res.boot_original.unwrap();
        assert_eq!(original.lba, 0);
        assert_eq!(&original.bytes[bpb_off::OEM..bpb_off::OEM + 8], b"MSDOS5.0");
    }

    #[test]
    fn test_forced_bpb_repair() {
        let mut buf = raw_image(368_640);
        let options = ResolveOptions { force_bpb: true, xdf: false };
        let res = resolve(&mut buf, "test", options).unwrap();
        assert!(res.geometry.bpb_modified);
        assert_eq!(buf[0], 0xEB);
        let bpb = Bpb::parse(&buf);
        assert_eq!(bpb.media_id, 0xFD);
        assert_eq!(bpb.total_secs, 720);
        // Original zeros are preserved for re-emission
        let original = res.boot_original.unwrap();
        assert!(original.bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_damaged_boot_repair() {
        let mut buf = raw_image(368_640);
        // Never-booted media: format filler where boot code should be, but
        // the FAT media byte is intact.
        buf[0] = FORMAT_FILLER;
        buf[1] = FORMAT_FILLER;
        buf[SECTOR_BYTES] = media::M360K;
        let res = resolve(&mut buf, "test", ResolveOptions::default()).unwrap();
        assert!(res.geometry.bpb_modified);
        assert_eq!(buf[0], 0xEB);
        assert_eq!(Bpb::parse(&buf).media_id, media::M360K);
    }

    #[test]
    fn test_logical_shrink() {
        // A 160 KB format on 180 KB media: physical 9 sectors, logical 8
        let mut buf = raw_image(184_320);
        buf[..TEMPLATE_BYTES].copy_from_slice(&DEFAULT_BPBS[0]);
        let res = resolve(&mut buf, "test", ResolveOptions::default()).unwrap();
        let g = res.geometry;
        assert_eq!(g.sectors, 9);
        assert_eq!(g.logical_sectors, Some(8));
        assert_eq!(g.fs_sectors(), 8);
        assert_eq!(g.media_id, media::M160K);
    }

    #[test]
    fn test_mbr_probe() {
        let mut buf = raw_image(10_653_696);
        // Partition boot sector at LBA 1 with the 10 MB BPB
        buf[0x1FE] = 0x55;
        buf[0x1FF] = 0xAA;
        buf[0x1EE] = 0x80; // active
        buf[0x1EE + mbr::TYPE] = mbr::TYPE_FAT12;
        buf[0x1EE + mbr::VBA_FIRST..0x1EE + mbr::VBA_FIRST + 4].copy_from_slice(&1u32.to_le_bytes());
        buf[512..512 + TEMPLATE_BYTES].copy_from_slice(&DEFAULT_BPBS[8]);
        let res = resolve(&mut buf, "test", ResolveOptions::default()).unwrap();
        let g = res.geometry;
        assert_eq!(g.boot_lba, 1);
        assert_eq!((g.cylinders, g.heads, g.sectors), (306, 4, 17));
    }

    #[test]
    fn test_dsk_header() {
        // 1 head, 2 cylinders, 8 sectors of 512 bytes
        let mut buf = vec![0u8; 8 + 2 * 8 * 512];
        buf[0] = 0x01;
        buf[1] = 1;
        buf[2..4].copy_from_slice(&2u16.to_le_bytes());
        buf[4..6].copy_from_slice(&8u16.to_le_bytes());
        buf[6..8].copy_from_slice(&512u16.to_le_bytes());
        let res = resolve(&mut buf, "test", ResolveOptions::default()).unwrap();
        let g = res.geometry;
        assert_eq!((g.cylinders, g.heads, g.sectors), (2, 1, 8));
        assert_eq!(g.data_offset, 8);
        assert!(g.track_table.is_none());
    }

    #[test]
    fn test_dsk_track_table() {
        // 1 head, 2 cylinders, variable tracks: 8 and 9 sectors
        let tracks = [(8u16, 512u16), (9u16, 512u16)];
        let data_bytes = (8 + 9) * 512;
        let mut buf = vec![0u8; 8 + tracks.len() * 4 + data_bytes];
        buf[0] = 0x01;
        buf[1] = 1;
        buf[2..4].copy_from_slice(&2u16.to_le_bytes());
        for (i, (secs, bytes)) in tracks.iter().enumerate() {
            buf[8 + i * 4..8 + i * 4 + 2].copy_from_slice(&secs.to_le_bytes());
            buf[8 + i * 4 + 2..8 + i * 4 + 4].copy_from_slice(&bytes.to_le_bytes());
        }
        let res = resolve(&mut buf, "test", ResolveOptions::default()).unwrap();
        let g = res.geometry;
        assert_eq!(g.track_table.as_ref().unwrap().len(), 2);
        assert_eq!(g.data_offset, 16);
        assert_eq!(g.sectors, 9);
    }

    #[test]
    fn test_xdf_detection() {
        let mut buf = raw_image(1_884_160);
        // Hand-build a BPB announcing 3680 total sectors
        let mut bpb = Bpb::parse(&DEFAULT_BPBS[4][..]);
        bpb.total_secs = 3680;
        bpb.track_secs = 23;
        buf[0] = 0xEB;
        buf[1] = 0x3C;
        buf[2] = 0x90;
        bpb.write_to(&mut buf);
        let options = ResolveOptions { force_bpb: false, xdf: true };
        let res = resolve(&mut buf, "test", options).unwrap();
        assert!(res.geometry.xdf);
        assert_eq!(res.geometry.sectors, 23);
    }
}
