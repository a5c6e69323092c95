/// FAT volume synthesis: pack a host file tree into a bootable disk image
///
/// The builder picks the smallest default BPB whose data area holds the
/// rounded file tree, lays out MBR (for partitioned templates), boot sector,
/// FAT copies, root directory and clustered data, then re-parses the buffer
/// through the raw parser so the result is a fully initialized image.

use log::debug;

use crate::bytes::ByteViewMut;
use crate::error::{ImgError, Result};
use crate::format::bpb::{is_fixed_media, Bpb, DEFAULT_BPBS, TEMPLATE_BYTES};
use crate::format::constants::{attr, fat, mbr, BOOT_SIGNATURE_OFFSET, DIRENT_SIZE};
use crate::format::SourceFormat;
use crate::fs::{to_fat_datetime, FileDescriptor};
use crate::image::DiskImage;
use crate::io::ImageOptions;

/// Characters allowed in an 8.3 short name besides letters and digits
const SHORT_NAME_EXTRAS: &[u8] = b"!#$%&'()-@^_`{}~";

/// Targets at or above this many KB ask for fixed-disk media
const FIXED_MEDIA_KB: u32 = 10_000;

/// Build a bootable FAT volume from an ordered list of file descriptors
///
/// `target_kb` of zero lets the capacity float to the smallest layout that
/// fits; a nonzero target pins the floppy capacity exactly, and targets of
/// 10 MB or more select fixed-disk (partitioned) layouts instead.
pub fn build_volume_from_files(
    name: &str,
    files: &[FileDescriptor],
    target_kb: u32,
) -> Result<DiskImage> {
    let want_fixed = target_kb >= FIXED_MEDIA_KB;
    let mut selected: Option<(usize, Bpb)> = None;
    for (index, tpl) in DEFAULT_BPBS.iter().enumerate() {
        let bpb = Bpb::parse(&tpl[..]);
        if is_fixed_media(bpb.media_id) != want_fixed {
            continue;
        }
        if target_kb > 0 && bpb.hidden_secs == 0 && bpb.total_sectors() != target_kb * 2 {
            continue;
        }
        if (bpb.root_dirents as usize) < files.len() {
            continue;
        }
        let cluster_bytes = bpb.cluster_secs as u64 * bpb.sector_bytes as u64;
        let needed = tree_size(files, cluster_bytes);
        let clusters_total =
            (bpb.total_sectors() - bpb.vba_data()) as u64 / bpb.cluster_secs as u64;
        if needed <= clusters_total * cluster_bytes {
            selected = Some((index, bpb));
            break;
        }
    }
    let Some((template, bpb)) = selected else {
        return Err(ImgError::CapacityExceeded {
            needed: tree_size(files, 512),
        });
    };
    debug!(
        "{}: building {} KB volume (media {:#04X})",
        name,
        bpb.total_sectors() as u64 * bpb.sector_bytes as u64 / 1024,
        bpb.media_id
    );

    let cb = bpb.sector_bytes as usize;
    let hidden = bpb.hidden_secs as usize;
    let total = bpb.total_sectors() as usize;
    // Partitioned images reserve the hidden band up front and a cylinder's
    // worth of parking space at the end.
    let reserve = if hidden > 0 {
        hidden + bpb.track_secs as usize * bpb.total_heads as usize
    } else {
        0
    };
    let mut buffer = vec![0u8; (reserve + total) * cb];
    let volume_base = hidden * cb;

    if hidden > 0 {
        write_mbr(&mut buffer, &bpb);
    }

    // Boot sector
    buffer[volume_base..volume_base + TEMPLATE_BYTES]
        .copy_from_slice(&DEFAULT_BPBS[template][..]);
    let mut view = ByteViewMut::new(&mut buffer[volume_base..]);
    view.set_u16_le(BOOT_SIGNATURE_OFFSET, 0xAA55);

    // Assign clusters level by level, then fill in data and directories
    let mut nodes = make_nodes(files);
    let fat_bits: u8 = {
        let clusters_total = (bpb.total_sectors() - bpb.vba_data()) / bpb.cluster_secs as u32;
        if clusters_total <= fat::MAX_CLUSTERS_12 {
            12
        } else {
            16
        }
    };
    let mut fat_image = vec![0u8; bpb.fat_secs as usize * cb];
    let (cell0, eoc) = if fat_bits == 12 {
        (bpb.media_id as u32 | 0xF00, fat::EOC_12)
    } else {
        (bpb.media_id as u32 | 0xFF00, fat::EOC_16)
    };
    set_fat_cell(&mut fat_image, 0, cell0, fat_bits);
    set_fat_cell(&mut fat_image, 1, eoc, fat_bits);
    let cluster_bytes = bpb.cluster_secs as u64 * bpb.sector_bytes as u64;
    let mut next_cluster = fat::FIRST_CLUSTER;
    assign_clusters(
        &mut nodes,
        &mut next_cluster,
        &mut fat_image,
        fat_bits,
        eoc,
        cluster_bytes,
    );

    // FAT copies
    for copy in 0..bpb.total_fats as usize {
        let start = volume_base + (bpb.vba_fat() as usize + copy * bpb.fat_secs as usize) * cb;
        buffer[start..start + fat_image.len()].copy_from_slice(&fat_image);
    }

    // Root directory, with unused slots filled for DOS 1.0 tools
    let root_start = volume_base + bpb.vba_root() as usize * cb;
    let root_bytes = bpb.root_dir_sectors() as usize * cb;
    buffer[root_start..root_start + root_bytes].fill(0xE5);
    write_dir_entries(&mut buffer[root_start..root_start + root_bytes], &nodes, None);

    // File and directory data
    write_data(&mut buffer, &bpb, volume_base, &nodes, 0);

    debug_assert_eq!(buffer.len(), (reserve + total) * cb);
    let mut image = crate::io::raw::build_from_buffer(name, &buffer, &ImageOptions::default())?;
    image.source = SourceFormat::Synthesized;
    Ok(image)
}

/// Bytes the tree occupies at a given cluster granularity; directories count
/// their own tables (children plus "." and "..")
fn tree_size(files: &[FileDescriptor], cluster_bytes: u64) -> u64 {
    files
        .iter()
        .map(|f| {
            if f.is_dir() {
                let children = f.files.as_deref().unwrap_or(&[]);
                let table = ((children.len() + 2) * DIRENT_SIZE) as u64;
                round_up(table, cluster_bytes) + tree_size(children, cluster_bytes)
            } else {
                round_up(f.size.max(0) as u64, cluster_bytes)
            }
        })
        .sum()
}

fn round_up(bytes: u64, granularity: u64) -> u64 {
    bytes.div_ceil(granularity) * granularity
}

/// A file descriptor with its assigned starting cluster
struct Node<'a> {
    desc: &'a FileDescriptor,
    cluster: u32,
    children: Vec<Node<'a>>,
}

fn make_nodes(files: &[FileDescriptor]) -> Vec<Node<'_>> {
    files
        .iter()
        .map(|desc| Node {
            desc,
            cluster: 0,
            children: make_nodes(desc.files.as_deref().unwrap_or(&[])),
        })
        .collect()
}

/// Two passes per directory level: chain every entry at this level first,
/// then recurse into the subdirectories
fn assign_clusters(
    nodes: &mut [Node<'_>],
    next_cluster: &mut u32,
    fat_image: &mut [u8],
    fat_bits: u8,
    eoc: u32,
    cluster_bytes: u64,
) {
    for node in nodes.iter_mut() {
        let bytes = if node.desc.is_dir() {
            ((node.children.len() + 2) * DIRENT_SIZE) as u64
        } else {
            node.desc.size.max(0) as u64
        };
        let clusters = bytes.div_ceil(cluster_bytes) as u32;
        if clusters == 0 {
            node.cluster = 0;
            continue;
        }
        node.cluster = *next_cluster;
        for k in 0..clusters {
            let cell = if k + 1 < clusters {
                *next_cluster + k + 1
            } else {
                eoc
            };
            set_fat_cell(fat_image, *next_cluster + k, cell, fat_bits);
        }
        *next_cluster += clusters;
    }
    for node in nodes.iter_mut() {
        if node.desc.is_dir() {
            assign_clusters(
                &mut node.children,
                next_cluster,
                fat_image,
                fat_bits,
                eoc,
                cluster_bytes,
            );
        }
    }
}

/// Store one FAT cell; 12-bit cells share bytes with their neighbors
fn set_fat_cell(fat: &mut [u8], cluster: u32, value: u32, fat_bits: u8) {
    if fat_bits == 12 {
        let offset = (cluster + cluster / 2) as usize;
        if offset + 1 >= fat.len() {
            return;
        }
        if cluster & 1 == 1 {
            fat[offset] = (fat[offset] & 0x0F) | (((value & 0xF) as u8) << 4);
            fat[offset + 1] = (value >> 4) as u8;
        } else {
            fat[offset] = value as u8;
            fat[offset + 1] = (fat[offset + 1] & 0xF0) | ((value >> 8) as u8 & 0x0F);
        }
    } else {
        let offset = (cluster * 2) as usize;
        if offset + 1 >= fat.len() {
            return;
        }
        fat[offset..offset + 2].copy_from_slice(&(value as u16).to_le_bytes());
    }
}

/// Encode one level's directory entries into a directory table
///
/// `dot_clusters` carries (self, parent) for subdirectory tables, which
/// start with the synthesized "." and ".." entries.
fn write_dir_entries(table: &mut [u8], nodes: &[Node<'_>], dot_clusters: Option<(u32, u32)>) {
    let mut offset = 0usize;
    if let Some((self_cluster, parent_cluster)) = dot_clusters {
        for (name, cluster) in [(".", self_cluster), ("..", parent_cluster)] {
            let mut slot = [0u8; DIRENT_SIZE];
            let mut padded = [b' '; 8];
            padded[..name.len()].copy_from_slice(name.as_bytes());
            slot[..8].copy_from_slice(&padded);
            slot[8..11].fill(b' ');
            slot[11] = attr::SUBDIR;
            slot[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
            table[offset..offset + DIRENT_SIZE].copy_from_slice(&slot);
            offset += DIRENT_SIZE;
        }
    }
    for node in nodes {
        let mut slot = [0u8; DIRENT_SIZE];
        let (name, ext) = short_name(&node.desc.name, node.desc.attr & attr::VOLUME != 0);
        slot[..8].copy_from_slice(&name);
        slot[8..11].copy_from_slice(&ext);
        slot[11] = node.desc.attr;
        let (date, time) = node
            .desc
            .date
            .as_ref()
            .map(to_fat_datetime)
            .unwrap_or((0, 0));
        slot[22..24].copy_from_slice(&time.to_le_bytes());
        slot[24..26].copy_from_slice(&date.to_le_bytes());
        slot[26..28].copy_from_slice(&(node.cluster as u16).to_le_bytes());
        let size = if node.desc.is_dir() {
            0
        } else {
            node.desc.size.max(0) as u32
        };
        slot[28..32].copy_from_slice(&size.to_le_bytes());
        table[offset..offset + DIRENT_SIZE].copy_from_slice(&slot);
        offset += DIRENT_SIZE;
    }
    // Terminate the listing unless the table is exactly full
    if offset + DIRENT_SIZE <= table.len() && dot_clusters.is_some() {
        table[offset..].fill(0);
    }
}

/// Write every node's data clusters, depth first
fn write_data(
    buffer: &mut [u8],
    bpb: &Bpb,
    volume_base: usize,
    nodes: &[Node<'_>],
    parent_cluster: u32,
) {
    let cb = bpb.sector_bytes as usize;
    let cluster_bytes = bpb.cluster_secs as usize * cb;
    for node in nodes {
        if node.cluster < fat::FIRST_CLUSTER {
            continue;
        }
        let start = volume_base
            + (bpb.vba_data() + (node.cluster - 2) * bpb.cluster_secs as u32) as usize * cb;
        if node.desc.is_dir() {
            let table_bytes =
                round_up(((node.children.len() + 2) * DIRENT_SIZE) as u64, cluster_bytes as u64)
                    as usize;
            write_dir_entries(
                &mut buffer[start..start + table_bytes],
                &node.children,
                Some((node.cluster, parent_cluster)),
            );
            write_data(buffer, bpb, volume_base, &node.children, node.cluster);
        } else {
            let len = (node.desc.size.max(0) as usize).min(node.desc.data.len());
            buffer[start..start + len].copy_from_slice(&node.desc.data[..len]);
        }
    }
}

/// Transform a host name into an 8.3 short name (or an 11-byte label)
fn short_name(name: &str, is_label: bool) -> ([u8; 8], [u8; 3]) {
    let mut base = [b' '; 8];
    let mut ext = [b' '; 3];
    let transform = |c: char| -> u8 {
        let up = c.to_ascii_uppercase();
        let b = up as u8;
        if up.is_ascii_uppercase() || up.is_ascii_digit() || SHORT_NAME_EXTRAS.contains(&b) {
            b
        } else {
            b'_'
        }
    };
    if is_label {
        // Labels take the first 11 characters with no period split
        for (i, c) in name.chars().filter(|&c| c != '.').take(11).enumerate() {
            let b = transform(c);
            if i < 8 {
                base[i] = b;
            } else {
                ext[i - 8] = b;
            }
        }
        return (base, ext);
    }
    let (stem, suffix) = match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos + 1..]),
        _ => (name, ""),
    };
    for (i, c) in stem.chars().take(8).enumerate() {
        base[i] = transform(c);
    }
    for (i, c) in suffix.chars().take(3).enumerate() {
        ext[i] = transform(c);
    }
    (base, ext)
}

/// Emit the MBR with a single active FAT12 entry, replicated across the
/// hidden band
fn write_mbr(buffer: &mut [u8], bpb: &Bpb) {
    let cb = bpb.sector_bytes as usize;
    let hidden = bpb.hidden_secs;
    let total = bpb.total_sectors();
    let entry = mbr::ENTRIES[3];
    {
        let mut view = ByteViewMut::new(buffer);
        view.set_u8(entry + mbr::STATUS, mbr::STATUS_ACTIVE);
        view.set_u8(entry + mbr::TYPE, mbr::TYPE_FAT12);
        let chs_first = encode_chs(hidden, bpb);
        let chs_last = encode_chs(hidden + total - 1, bpb);
        view.copy_from(entry + mbr::CHS_FIRST, &chs_first);
        view.copy_from(entry + mbr::CHS_LAST, &chs_last);
        view.set_u32_le(entry + mbr::VBA_FIRST, hidden);
        view.set_u32_le(entry + mbr::VBA_TOTAL, total);
        view.set_u16_le(BOOT_SIGNATURE_OFFSET, 0xAA55);
    }
    for lba in 1..hidden as usize {
        let (head, tail) = buffer.split_at_mut(lba * cb);
        tail[..cb].copy_from_slice(&head[..cb]);
    }
}

/// INT 13h-style CHS bytes: head, sector with cylinder high bits, cylinder
fn encode_chs(lba: u32, bpb: &Bpb) -> [u8; 3] {
    let spt = bpb.track_secs as u32;
    let heads = bpb.total_heads as u32;
    let cylinder = lba / (heads * spt);
    let head = (lba / spt) % heads;
    let sector = lba % spt + 1;
    [
        head as u8,
        (sector as u8 & 0x3F) | (((cylinder >> 8) as u8 & 0x03) << 6),
        cylinder as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::constants::media;

    fn hello_file() -> FileDescriptor {
        FileDescriptor::file("HELLO.TXT", b"Hello, world!".to_vec())
    }

    #[test]
    fn test_short_name_transform() {
        assert_eq!(
            short_name("hello.txt", false),
            (*b"HELLO   ", *b"TXT")
        );
        assert_eq!(
            short_name("longfilename.text", false),
            (*b"LONGFILE", *b"TEX")
        );
        assert_eq!(short_name("a+b=c.d?", false), (*b"A_B_C   ", *b"D_ "));
        assert_eq!(short_name("NO_EXT", false), (*b"NO_EXT  ", *b"   "));
        assert_eq!(
            short_name("My Disk v1.2", true),
            (*b"MY_DISK_", *b"V12")
        );
    }

    #[test]
    fn test_set_fat_cell_roundtrip() {
        let mut fat = vec![0u8; 64];
        set_fat_cell(&mut fat, 0, 0xFFE, 12);
        set_fat_cell(&mut fat, 1, 0xFFF, 12);
        set_fat_cell(&mut fat, 2, 0xFFF, 12);
        set_fat_cell(&mut fat, 3, 0x004, 12);
        assert_eq!(&fat[..6], &[0xFE, 0xFF, 0xFF, 0xFF, 0x4F, 0x00]);
    }

    #[test]
    fn test_build_160k_single_file() {
        let files = vec![hello_file()];
        let image = build_volume_from_files("s3", &files, 160).unwrap();
        assert_eq!(image.media_id(), media::M160K);
        assert_eq!(image.cylinder_count(), 40);
        assert_eq!(image.disk_size(), 163_840);

        // FAT cells: media marker, EOC, then the file's single cluster
        let fat_sector = image.sector_by_lba(1).unwrap().to_bytes();
        assert_eq!(&fat_sector[..5], &[0xFE, 0xFF, 0xFF, 0xFF, 0x0F]);

        // Root directory holds one entry at cluster 2
        let root = image.sector_by_lba(3).unwrap().to_bytes();
        assert_eq!(&root[..11], b"HELLO   TXT");
        assert_eq!(u16::from_le_bytes([root[26], root[27]]), 2);
        assert_eq!(u32::from_le_bytes([root[28], root[29], root[30], root[31]]), 13);
        // The slot after the last entry is the DOS 1.0 filler
        assert_eq!(root[32], 0xE5);

        // File data begins at the first data sector
        let data = image.sector_by_lba(7).unwrap().to_bytes();
        assert_eq!(&data[..13], b"Hello, world!");
    }

    #[test]
    fn test_build_floats_to_smallest_fit() {
        let files = vec![hello_file()];
        let image = build_volume_from_files("float", &files, 0).unwrap();
        assert_eq!(image.media_id(), media::M160K);
    }

    #[test]
    fn test_build_with_subdirectory() {
        let files = vec![
            FileDescriptor::directory("SUB", vec![hello_file()]),
            FileDescriptor::file("ROOT.TXT", b"root".to_vec()),
        ];
        let image = build_volume_from_files("subs", &files, 160).unwrap();

        // SUB gets cluster 2, ROOT.TXT cluster 3, HELLO.TXT cluster 4
        let root = image.sector_by_lba(3).unwrap().to_bytes();
        assert_eq!(&root[..8], b"SUB     ");
        assert_eq!(root[11], attr::SUBDIR);
        assert_eq!(u16::from_le_bytes([root[26], root[27]]), 2);

        // The subdirectory table starts with "." and ".."
        let sub = image.sector_by_lba(7).unwrap().to_bytes();
        assert_eq!(&sub[..2], b". ");
        assert_eq!(u16::from_le_bytes([sub[26], sub[27]]), 2);
        assert_eq!(&sub[32..34], b"..");
        assert_eq!(u16::from_le_bytes([sub[58], sub[59]]), 0);
        assert_eq!(&sub[64..75], b"HELLO   TXT");
        assert_eq!(u16::from_le_bytes([sub[90], sub[91]]), 4);
    }

    #[test]
    fn test_build_over_capacity() {
        let files = vec![FileDescriptor {
            name: "BIG.BIN".to_string(),
            size: 4_000_000,
            data: vec![0u8; 0], // size drives the accounting
            attr: attr::ARCHIVE,
            ..Default::default()
        }];
        let err = build_volume_from_files("big", &files, 360).unwrap_err();
        assert!(matches!(err, ImgError::CapacityExceeded { .. }));
    }

    #[test]
    fn test_build_fixed_disk() {
        let files = vec![hello_file()];
        let image = build_volume_from_files("fixed", &files, FIXED_MEDIA_KB).unwrap();
        assert_eq!(image.media_id(), media::FIXED);
        assert_eq!(image.cylinder_count(), 306);
        assert_eq!(image.head_count(), 4);
        // The MBR's single entry accounts for everything but the hidden
        // sector and the reserved last cylinder.
        assert_eq!(image.disk_size(), 20808 * 512);
        let mbr_sector = image.sector_by_lba(0).unwrap().to_bytes();
        assert_eq!(mbr_sector[0x1EE], 0x80);
        assert_eq!(mbr_sector[0x1EE + 4], 0x01);
        let vba_first = u32::from_le_bytes([
            mbr_sector[0x1EE + 8],
            mbr_sector[0x1EE + 9],
            mbr_sector[0x1EE + 10],
            mbr_sector[0x1EE + 11],
        ]);
        let vba_total = u32::from_le_bytes([
            mbr_sector[0x1EE + 12],
            mbr_sector[0x1EE + 13],
            mbr_sector[0x1EE + 14],
            mbr_sector[0x1EE + 15],
        ]);
        assert_eq!(vba_first, 1);
        assert_eq!(vba_total, 20739);
        assert_eq!(vba_first + vba_total, 20808 - 4 * 17);
    }
}
