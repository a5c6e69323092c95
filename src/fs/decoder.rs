/// FAT volume traversal: partitions, BPBs, FAT chains and directory trees
///
/// `build_tables` walks volume 0, 1, ... until a volume cannot be built or
/// an unpartitioned volume ends the sequence, producing the image's volume
/// and file tables and writing (file, offset) back-references into every
/// sector a file occupies.

use log::warn;

use crate::error::{ImgError, Result};
use crate::format::bpb::{find_template, Bpb};
use crate::format::constants::{attr, fat, mbr, media, BOOT_SIGNATURE, BOOT_SIGNATURE_OFFSET, DIRENT_SIZE};
use crate::bytes::ByteView;
use crate::fs::{DirEntry, DirSlot, FileInfo, VolInfo};
use crate::image::DiskImage;

/// Circuit breaker for extended-partition chains
const MAX_SCAN_ITERATIONS: usize = 48;

/// Directory recursion limit; FAT trees deeper than this are cyclic
const MAX_DIR_DEPTH: usize = 16;

/// Build the volume and file tables for an image
pub(crate) fn build_tables(image: &mut DiskImage) -> Result<usize> {
    let mut vol_index = 0usize;
    loop {
        let Some((vol, bpb)) = build_volume(image, vol_index) else {
            if vol_index == 0 {
                return Err(ImgError::filesystem(format!(
                    "{}: unable to locate a boot sector",
                    image.name()
                )));
            }
            break;
        };
        let partitionless = vol.partition < 0;
        walk_volume(image, &vol, &bpb);
        image.vol_table.push(vol);
        if partitionless {
            break;
        }
        vol_index += 1;
    }
    populate_back_refs(image);
    Ok(image.file_table.len())
}

/// Locate and describe one volume; None ends the volume sequence
fn build_volume(image: &DiskImage, vol_index: usize) -> Option<(VolInfo, Bpb)> {
    let name = image.name();
    if vol_index == 0 {
        let boot = image.sector_by_lba(0)?.to_bytes();
        let bpb = Bpb::parse(&boot);
        if bpb.sector_bytes as u32 == image.sector_size() && media::is_recognized(bpb.media_id) {
            return vol_info_from_bpb(image, bpb, 0, -1, 0);
        }
        // Pre-BPB media: the first FAT byte plus the disk size pick a
        // default template.
        let fat_id = image.sector_by_lba(1).map(|s| s.read_byte(0)).unwrap_or(-1);
        if fat_id >= 0 && media::is_recognized(fat_id as u8) {
            if let Some(tpl) = find_template(fat_id as u8, image.disk_size(), None) {
                let bpb = Bpb::parse(&tpl[..]);
                return vol_info_from_bpb(image, bpb, 0, -1, 0);
            }
            warn!(
                "{}: no default BPB for FAT ID {:#04X} at {} bytes",
                name,
                fat_id,
                image.disk_size()
            );
        }
    }
    // Partitioned media: find the vol_index'th FAT partition
    let lba_start = find_partition(image, vol_index)?;
    let boot = image.sector_by_lba(lba_start)?.to_bytes();
    let bpb = Bpb::parse(&boot);
    if bpb.sector_bytes as u32 != image.sector_size() || bpb.cluster_secs == 0 {
        warn!(
            "{}: partition {} at LBA {} has an impossible BPB",
            name, vol_index, lba_start
        );
        return None;
    }
    vol_info_from_bpb(image, bpb, lba_start, vol_index as i32, vol_index)
}

/// Two-phase MBR scan: primary FAT partitions first, then EXTENDED chains
fn find_partition(image: &DiskImage, target: usize) -> Option<u32> {
    let name = image.name();
    let mut lba_boot = 0u32;
    let mut lba_extended: Option<u32> = None;
    let mut seen = 0usize;
    let mut iterations = 0usize;
    loop {
        iterations += 1;
        if iterations > MAX_SCAN_ITERATIONS {
            warn!("{}: partition scan exceeded {} iterations", name, MAX_SCAN_ITERATIONS);
            return None;
        }
        let sector = image.sector_by_lba(lba_boot)?.to_bytes();
        let view = ByteView::new(&sector);
        if view.u16_le(BOOT_SIGNATURE_OFFSET) != BOOT_SIGNATURE {
            return None;
        }
        let mut next_boot: Option<u32> = None;
        for phase in 0..2 {
            for &entry in &mbr::ENTRIES {
                let kind = view.u8(entry + mbr::TYPE);
                let vba = view.u32_le(entry + mbr::VBA_FIRST);
                if phase == 0 && (kind == mbr::TYPE_FAT12 || kind == mbr::TYPE_FAT16) {
                    if seen == target {
                        return Some(lba_boot + vba);
                    }
                    seen += 1;
                } else if phase == 1 && kind == mbr::TYPE_EXTENDED {
                    // The first extended partition anchors the chain; nested
                    // entries are relative to it.
                    let next = match lba_extended {
                        None => {
                            lba_extended = Some(vba);
                            vba
                        }
                        Some(first) => vba + first,
                    };
                    next_boot = Some(next);
                    break;
                }
            }
            if next_boot.is_some() {
                break;
            }
        }
        lba_boot = next_boot?;
    }
}

/// Derive a VolInfo from a BPB located at `lba_start`
fn vol_info_from_bpb(
    image: &DiskImage,
    bpb: Bpb,
    lba_start: u32,
    partition: i32,
    vol_index: usize,
) -> Option<(VolInfo, Bpb)> {
    let name = image.name();
    if bpb.cluster_secs == 0 || bpb.total_fats == 0 {
        warn!("{}: volume {} BPB has no cluster or FAT count", name, vol_index);
        return None;
    }
    let lba_total = bpb.total_sectors();
    let vba_data = bpb.vba_data();
    if lba_total <= vba_data {
        warn!("{}: volume {} has no data area", name, vol_index);
        return None;
    }
    let cluster_secs = bpb.cluster_secs as u32;
    let clusters_total = (lba_total - vba_data) / cluster_secs;
    let fat_bits: u8 = if clusters_total <= fat::MAX_CLUSTERS_12 { 12 } else { 16 };
    let cluster_max = if fat_bits == 12 {
        fat::CLUSNUM_MAX_12
    } else {
        fat::CLUSNUM_MAX_16
    };
    let mut vol = VolInfo {
        vol_index,
        partition,
        media_id: bpb.media_id,
        lba_start,
        lba_total,
        fat_bits,
        vba_fat: bpb.vba_fat(),
        vba_root: bpb.vba_root(),
        vba_data,
        root_entries: bpb.root_dirents as u32,
        cluster_secs,
        cluster_max,
        clusters_bad: 0,
        clusters_free: 0,
        clusters_total,
        sector_bytes: bpb.sector_bytes as u32,
    };

    // The FAT's own media byte should agree with the BPB
    let fat_id = image
        .sector_by_lba(lba_start + vol.vba_fat)
        .map(|s| s.read_byte(0))
        .unwrap_or(-1);
    if fat_id >= 0 && fat_id as u8 != vol.media_id {
        warn!(
            "{}: FAT ID {:#04X} does not match media ID {:#04X}",
            name, fat_id, vol.media_id
        );
    }

    if let Some(track) = image.get_track(0, 0) {
        if !track.has_uniform_sector_size() && !image.is_xdf() {
            warn!("{}: sector size varies within a track", name);
        }
    }

    // Free and bad cluster accounting
    let fat_buf = read_fat(image, &vol, &bpb);
    for cluster in fat::FIRST_CLUSTER..=clusters_total + 1 {
        match fat_cell(&fat_buf, cluster, fat_bits) {
            c if c == fat::FREE => vol.clusters_free += 1,
            c if c == cluster_max + 1 => vol.clusters_bad += 1,
            _ => {}
        }
    }
    Some((vol, bpb))
}

/// Buffer the volume's first FAT copy
fn read_fat(image: &DiskImage, vol: &VolInfo, bpb: &Bpb) -> Vec<u8> {
    image.read_lba_range(vol.lba_start + vol.vba_fat, bpb.fat_secs as u32)
}

/// Extract one FAT cell; 12-bit cells straddle byte (and sector) boundaries
fn fat_cell(fat: &[u8], cluster: u32, fat_bits: u8) -> u32 {
    if fat_bits == 12 {
        let offset = (cluster + cluster / 2) as usize;
        if offset + 1 >= fat.len() {
            return 0;
        }
        let pair = u16::from_le_bytes([fat[offset], fat[offset + 1]]);
        if cluster & 1 == 1 {
            (pair >> 4) as u32
        } else {
            (pair & 0x0FFF) as u32
        }
    } else {
        let offset = (cluster * 2) as usize;
        if offset + 1 >= fat.len() {
            return 0;
        }
        u16::from_le_bytes([fat[offset], fat[offset + 1]]) as u32
    }
}

/// Expand a cluster chain into the absolute LBAs it covers
fn cluster_chain_lbas(image: &DiskImage, vol: &VolInfo, fat: &[u8], start: u32) -> Vec<u32> {
    let mut lbas = Vec::new();
    let max_sectors = (vol.clusters_total * vol.cluster_secs) as usize;
    let mut cluster = start;
    while (fat::FIRST_CLUSTER..=vol.cluster_max).contains(&cluster) {
        if cluster >= vol.clusters_total + 2 {
            warn!(
                "{}: cluster {:#X} beyond volume end in chain from {:#X}",
                image.name(),
                cluster,
                start
            );
            break;
        }
        let vba = vol.vba_data + (cluster - 2) * vol.cluster_secs;
        for i in 0..vol.cluster_secs {
            lbas.push(vol.lba_start + vba + i);
        }
        if lbas.len() > max_sectors {
            warn!("{}: cyclic cluster chain from {:#X}", image.name(), start);
            break;
        }
        let next = fat_cell(fat, cluster, vol.fat_bits);
        if next == fat::FREE || next == fat::RESERVED {
            warn!(
                "{}: invalid cluster {:#X} in chain from {:#X}",
                image.name(),
                next,
                start
            );
            break;
        }
        cluster = next;
    }
    lbas
}

/// Walk a volume's directory tree, appending to the image's file table
fn walk_volume(image: &mut DiskImage, vol: &VolInfo, bpb: &Bpb) {
    let fat = read_fat(image, vol, bpb);
    let root_lbas: Vec<u32> = (vol.vba_root..vol.vba_data)
        .map(|vba| vol.lba_start + vba)
        .collect();
    let mut files = Vec::new();
    scan_directory(image, vol, &fat, "\\", &root_lbas, &mut files, 0);
    image.file_table.extend(files);
}

/// Scan one directory's sectors, recursing into subdirectories
fn scan_directory(
    image: &DiskImage,
    vol: &VolInfo,
    fat: &[u8],
    path: &str,
    lbas: &[u32],
    files: &mut Vec<FileInfo>,
    depth: usize,
) {
    if depth > MAX_DIR_DEPTH {
        warn!("{}: directory tree too deep at {}", image.name(), path);
        return;
    }
    let mut dir_data = Vec::new();
    for &lba in lbas {
        if let Some(sector) = image.sector_by_lba(lba) {
            sector.decompress_into(&mut dir_data);
        }
    }
    debug_assert!(dir_data.len() % vol.sector_bytes as usize == 0);

    for slot in dir_data.chunks(DIRENT_SIZE) {
        let entry = match DirEntry::parse(slot) {
            DirSlot::End => break,
            DirSlot::Deleted => continue,
            DirSlot::Entry(e) => e,
        };
        if entry.is_dot() {
            continue;
        }
        let name = entry.display_name();
        let full_path = if path == "\\" {
            format!("\\{}", name)
        } else {
            format!("{}\\{}", path, name)
        };
        let is_dir = entry.attr & attr::SUBDIR != 0;
        let is_label = entry.attr & attr::VOLUME != 0;
        let lba_chain = if is_label {
            Vec::new()
        } else {
            cluster_chain_lbas(image, vol, fat, entry.cluster as u32)
        };
        files.push(FileInfo {
            vol_index: vol.vol_index,
            path: full_path.clone(),
            name,
            attr: entry.attr,
            date: entry.datetime(),
            size: if is_dir { 0 } else { entry.size },
            cluster: entry.cluster as u32,
            lbas: lba_chain.clone(),
        });
        if is_dir {
            scan_directory(image, vol, fat, &full_path, &lba_chain, files, depth + 1);
        }
    }
}

/// Write (file index, file offset) into every sector each file occupies
fn populate_back_refs(image: &mut DiskImage) {
    let name = image.name().to_string();
    let sector_bytes = image.sector_size();
    let spt = (image.fs_sectors_per_track() as u32).max(1);
    let links: Vec<(usize, Vec<u32>, u32, bool)> = image
        .file_table
        .iter()
        .enumerate()
        .map(|(i, f)| (i, f.lbas.clone(), f.size, f.is_dir()))
        .collect();
    for (file_index, lbas, size, is_dir) in links {
        for (j, &lba) in lbas.iter().enumerate() {
            // Cluster slack past the end of a file belongs to no one
            if !is_dir && j as u32 * sector_bytes >= size {
                break;
            }
            let expected_id = (lba % spt) as u8 + 1;
            let Some(sector) = image.sector_by_lba_mut(lba) else {
                warn!("{}: file {} maps to missing LBA {}", name, file_index, lba);
                continue;
            };
            if let Some(existing) = sector.file_index() {
                if existing != file_index {
                    warn!(
                        "{}: LBA {} cross-linked between files {} and {}",
                        name, lba, existing, file_index
                    );
                    continue;
                }
            }
            if sector.id.id != expected_id {
                warn!(
                    "{}: LBA {} has non-standard sector ID {} (expected {})",
                    name, lba, sector.id.id, expected_id
                );
            }
            sector.set_file_link(file_index, j as u32 * sector_bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fat12_cell_extraction() {
        // Cells 0..4: 0xFFE, 0xFFF, 0x003, 0x004 packed as 12-bit pairs
        let fat = [0xFE, 0xFF, 0xFF, 0x03, 0x40, 0x00];
        assert_eq!(fat_cell(&fat, 0, 12), 0xFFE);
        assert_eq!(fat_cell(&fat, 1, 12), 0xFFF);
        assert_eq!(fat_cell(&fat, 2, 12), 0x003);
        assert_eq!(fat_cell(&fat, 3, 12), 0x004);
    }

    #[test]
    fn test_fat12_cell_spanning_sector_boundary() {
        // Cluster 341 starts at byte offset 511, straddling two 512-byte
        // FAT sectors: 341 * 1.5 = 511.5 -> bytes 511 and 512.
        let mut fat = vec![0u8; 1024];
        // Odd cluster: value is the high 12 bits of the pair
        fat[511] = 0x30; // low nibble of byte 511 belongs to cluster 340
        fat[512] = 0x12;
        assert_eq!(fat_cell(&fat, 341, 12), 0x123);

        // Even cluster 342 begins at byte 513
        fat[513] = 0x45;
        fat[514] = 0x06;
        assert_eq!(fat_cell(&fat, 342, 12), 0x645);
    }

    #[test]
    fn test_fat16_cell_extraction() {
        let fat = [0xF8, 0xFF, 0xFF, 0xFF, 0x34, 0x12];
        assert_eq!(fat_cell(&fat, 0, 16), 0xFFF8);
        assert_eq!(fat_cell(&fat, 1, 16), 0xFFFF);
        assert_eq!(fat_cell(&fat, 2, 16), 0x1234);
    }

    #[test]
    fn test_fat_cell_out_of_range() {
        let fat = [0u8; 4];
        assert_eq!(fat_cell(&fat, 100, 12), 0);
        assert_eq!(fat_cell(&fat, 100, 16), 0);
    }
}
