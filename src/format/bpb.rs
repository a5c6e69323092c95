/// BIOS Parameter Block parsing, emission and default templates

use crate::bytes::{ByteView, ByteViewMut};
use crate::format::constants::{bpb_off, media, OPCODE_JMPN, OPCODE_JMPS};

/// Decoded BIOS Parameter Block fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bpb {
    /// Bytes per sector
    pub sector_bytes: u16,
    /// Sectors per cluster
    pub cluster_secs: u8,
    /// Reserved sectors before the first FAT
    pub reserved_secs: u16,
    /// Number of FAT copies
    pub total_fats: u8,
    /// Maximum root directory entries
    pub root_dirents: u16,
    /// Total sectors (16-bit field)
    pub total_secs: u16,
    /// Media ID byte
    pub media_id: u8,
    /// Sectors per FAT
    pub fat_secs: u16,
    /// Sectors per track
    pub track_secs: u16,
    /// Number of heads
    pub total_heads: u16,
    /// Hidden sectors preceding the volume
    pub hidden_secs: u32,
    /// Total sectors when the 16-bit field is zero (DOS 3.31+)
    pub large_secs: u32,
}

impl Bpb {
    /// Decode the BPB fields from a boot sector
    pub fn parse(boot: &[u8]) -> Self {
        let view = ByteView::new(boot);
        Self {
            sector_bytes: view.u16_le(bpb_off::SECTOR_BYTES),
            cluster_secs: view.u8(bpb_off::CLUSTER_SECS),
            reserved_secs: view.u16_le(bpb_off::RESERVED_SECS),
            total_fats: view.u8(bpb_off::TOTAL_FATS),
            root_dirents: view.u16_le(bpb_off::ROOT_DIRENTS),
            total_secs: view.u16_le(bpb_off::TOTAL_SECS),
            media_id: view.u8(bpb_off::MEDIA_ID),
            fat_secs: view.u16_le(bpb_off::FAT_SECS),
            track_secs: view.u16_le(bpb_off::TRACK_SECS),
            total_heads: view.u16_le(bpb_off::TOTAL_HEADS),
            hidden_secs: view.u32_le(bpb_off::HIDDEN_SECS),
            large_secs: view.u32_le(bpb_off::LARGE_SECS),
        }
    }

    /// Encode the BPB fields into a boot sector
    pub fn write_to(&self, boot: &mut [u8]) {
        let mut view = ByteViewMut::new(boot);
        view.set_u16_le(bpb_off::SECTOR_BYTES, self.sector_bytes);
        view.set_u8(bpb_off::CLUSTER_SECS, self.cluster_secs);
        view.set_u16_le(bpb_off::RESERVED_SECS, self.reserved_secs);
        view.set_u8(bpb_off::TOTAL_FATS, self.total_fats);
        view.set_u16_le(bpb_off::ROOT_DIRENTS, self.root_dirents);
        view.set_u16_le(bpb_off::TOTAL_SECS, self.total_secs);
        view.set_u8(bpb_off::MEDIA_ID, self.media_id);
        view.set_u16_le(bpb_off::FAT_SECS, self.fat_secs);
        view.set_u16_le(bpb_off::TRACK_SECS, self.track_secs);
        view.set_u16_le(bpb_off::TOTAL_HEADS, self.total_heads);
        view.set_u32_le(bpb_off::HIDDEN_SECS, self.hidden_secs);
        view.set_u32_le(bpb_off::LARGE_SECS, self.large_secs);
    }

    /// Total sectors, resolving the 16-bit vs 32-bit fields
    pub fn total_sectors(&self) -> u32 {
        if self.total_secs != 0 {
            self.total_secs as u32
        } else {
            self.large_secs
        }
    }

    /// Sectors occupied by the root directory
    pub fn root_dir_sectors(&self) -> u32 {
        let cb = self.sector_bytes.max(1) as u32;
        (self.root_dirents as u32 * 32).div_ceil(cb)
    }

    /// Volume block address of the first FAT sector
    pub fn vba_fat(&self) -> u32 {
        self.reserved_secs as u32
    }

    /// Volume block address of the first root directory sector
    pub fn vba_root(&self) -> u32 {
        self.vba_fat() + self.total_fats as u32 * self.fat_secs as u32
    }

    /// Volume block address of the first data sector
    pub fn vba_data(&self) -> u32 {
        self.vba_root() + self.root_dir_sectors()
    }

    /// Check whether a boot sector opens with a plausible JMP instruction
    pub fn has_jmp(boot: &[u8]) -> bool {
        matches!(boot.first(), Some(&OPCODE_JMPS) | Some(&OPCODE_JMPN))
    }
}

/// Number of bytes covered by a default BPB template (JMP + OEM + BPB)
pub const TEMPLATE_BYTES: usize = 0x24;

/// Default boot-sector prefixes for every supported volume layout, in the
/// order the volume builder tries them. Each covers offsets 0x00..0x24:
/// a JMP stub, the OEM string, and the full BPB.
pub const DEFAULT_BPBS: [[u8; TEMPLATE_BYTES]; 9] = [
    // 160 KB: 40 cyls, 1 head, 8 sectors/track
    [
        0xEB, 0xFE, 0x90, b'P', b'C', b'J', b'S', b'.', b'O', b'R', b'G',
        0x00, 0x02, 0x01, 0x01, 0x00, 0x02, 0x40, 0x00, 0x40, 0x01, 0xFE,
        0x01, 0x00, 0x08, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
    ],
    // 320 KB: 40 cyls, 2 heads, 8 sectors/track
    [
        0xEB, 0xFE, 0x90, b'P', b'C', b'J', b'S', b'.', b'O', b'R', b'G',
        0x00, 0x02, 0x02, 0x01, 0x00, 0x02, 0x70, 0x00, 0x80, 0x02, 0xFF,
        0x01, 0x00, 0x08, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
    ],
    // 180 KB: 40 cyls, 1 head, 9 sectors/track
    [
        0xEB, 0xFE, 0x90, b'P', b'C', b'J', b'S', b'.', b'O', b'R', b'G',
        0x00, 0x02, 0x01, 0x01, 0x00, 0x02, 0x40, 0x00, 0x68, 0x01, 0xFC,
        0x02, 0x00, 0x09, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
    ],
    // 360 KB: 40 cyls, 2 heads, 9 sectors/track
    [
        0xEB, 0xFE, 0x90, b'P', b'C', b'J', b'S', b'.', b'O', b'R', b'G',
        0x00, 0x02, 0x02, 0x01, 0x00, 0x02, 0x70, 0x00, 0xD0, 0x02, 0xFD,
        0x02, 0x00, 0x09, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
    ],
    // 720 KB: 80 cyls, 2 heads, 9 sectors/track
    [
        0xEB, 0xFE, 0x90, b'P', b'C', b'J', b'S', b'.', b'O', b'R', b'G',
        0x00, 0x02, 0x02, 0x01, 0x00, 0x02, 0x70, 0x00, 0xA0, 0x05, 0xF9,
        0x03, 0x00, 0x09, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
    ],
    // 1.2 MB: 80 cyls, 2 heads, 15 sectors/track
    [
        0xEB, 0xFE, 0x90, b'P', b'C', b'J', b'S', b'.', b'O', b'R', b'G',
        0x00, 0x02, 0x01, 0x01, 0x00, 0x02, 0xE0, 0x00, 0x60, 0x09, 0xF9,
        0x07, 0x00, 0x0F, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
    ],
    // 1.44 MB: 80 cyls, 2 heads, 18 sectors/track
    [
        0xEB, 0xFE, 0x90, b'P', b'C', b'J', b'S', b'.', b'O', b'R', b'G',
        0x00, 0x02, 0x01, 0x01, 0x00, 0x02, 0xE0, 0x00, 0x40, 0x0B, 0xF0,
        0x09, 0x00, 0x12, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
    ],
    // 2.88 MB: 80 cyls, 2 heads, 36 sectors/track
    [
        0xEB, 0xFE, 0x90, b'P', b'C', b'J', b'S', b'.', b'O', b'R', b'G',
        0x00, 0x02, 0x02, 0x01, 0x00, 0x02, 0xF0, 0x00, 0x80, 0x16, 0xF0,
        0x09, 0x00, 0x24, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
    ],
    // 10 MB fixed disk: 306 cyls, 4 heads, 17 sectors/track, one hidden sector
    [
        0xEB, 0xFE, 0x90, b'P', b'C', b'J', b'S', b'.', b'O', b'R', b'G',
        0x00, 0x02, 0x08, 0x01, 0x00, 0x02, 0x00, 0x02, 0x03, 0x51, 0xF8,
        0x08, 0x00, 0x11, 0x00, 0x04, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
    ],
];

/// Find a default BPB matching a media ID and an exact unpartitioned disk size
pub fn find_template(media_id: u8, disk_bytes: usize, cluster_secs: Option<u8>) -> Option<&'static [u8; TEMPLATE_BYTES]> {
    DEFAULT_BPBS.iter().find(|tpl| {
        let bpb = Bpb::parse(&tpl[..]);
        if bpb.media_id != media_id {
            return false;
        }
        if bpb.total_sectors() as usize * bpb.sector_bytes as usize != disk_bytes {
            return false;
        }
        match cluster_secs {
            Some(cs) => bpb.cluster_secs == cs,
            None => true,
        }
    })
}

/// Check whether a media ID belongs to the fixed-disk class
pub fn is_fixed_media(media_id: u8) -> bool {
    media_id == media::FIXED
}
