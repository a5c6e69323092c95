/// PCE Sector Image (PSI) chunk-stream parsing
///
/// PSI is a chunked container: each chunk carries a 12-byte header (fourCC,
/// big-endian payload size, CRC-32C of the payload) followed by the payload.
/// `SECT` chunks announce a sector, an optional `DATA` chunk supplies its
/// contents, and `END ` terminates the stream.

use log::warn;

use crate::bytes::ByteView;
use crate::error::{ImgError, Result};
use crate::format::bpb::Bpb;
use crate::format::constants::media;
use crate::format::SourceFormat;
use crate::image::{DiskImage, Sector, SectorId};
use crate::io::ImageOptions;

/// Chunk header size: fourCC + size + CRC-32C
const CHUNK_HEADER: usize = 12;

/// SECT flag bit 0: the sector is a repeated fill pattern, no DATA follows
const FLAG_FILL: u8 = 0x01;

/// SECT flag bit 2: reads of this sector fail
const FLAG_DATA_ERROR: u8 = 0x04;

/// Build a disk image from a PSI chunk stream
pub fn build_from_psi(name: &str, buffer: &[u8], options: &ImageOptions) -> Result<DiskImage> {
    let view = ByteView::new(buffer);
    if view.bytes(0, 4) != b"PSI " {
        return Err(ImgError::invalid_format("missing PSI file header"));
    }

    let mut image = DiskImage::with_shape(
        name.to_string(),
        0,
        0,
        0,
        512,
        0,
        SourceFormat::Psi,
    );
    image.writable = options.writable;

    // Location of the sector announced by the last SECT chunk
    let mut current: Option<(u16, u8, usize, bool)> = None;
    let mut offset = 0usize;

    while offset + CHUNK_HEADER <= buffer.len() {
        let id = view.bytes(offset, 4);
        let size = view.u32_be(offset + 4) as usize;
        let stored_crc = view.u32_be(offset + 8);
        let payload_start = offset + CHUNK_HEADER;
        if payload_start + size > buffer.len() {
            warn!("{}: truncated {} chunk at offset {}", name, fourcc(id), offset);
            break;
        }
        let payload = &buffer[payload_start..payload_start + size];
        let computed = crc32c::crc32c(payload);
        if computed != stored_crc {
            // A bad checksum is treated as the end of the stream, not an error
            warn!(
                "{}: CRC mismatch in {} chunk at offset {} ({:#010X} != {:#010X})",
                name,
                fourcc(id),
                offset,
                computed,
                stored_crc
            );
            break;
        }

        match id {
            b"PSI " => {
                let format = ByteView::new(payload).u16_be(0);
                if format != 0 {
                    warn!("{}: unexpected PSI file format {:#06X}", name, format);
                }
            }
            b"SECT" => {
                current = Some(parse_sect(&mut image, name, payload));
            }
            b"DATA" => match current.take() {
                Some((c, h, index, filled)) => {
                    if filled {
                        warn!(
                            "{}: DATA chunk overrides fill pattern at {}:{}",
                            name, c, h
                        );
                    }
                    if let Some(sector) = image.sector_at_mut(c, h, index) {
                        let id = sector.id;
                        let mut replacement = Sector::from_buffer(id, payload, 0);
                        replacement.data_error = sector.data_error;
                        *sector = replacement;
                    }
                }
                None => {
                    warn!("{}: DATA chunk without a preceding SECT", name);
                }
            },
            b"IBMM" | b"OFFS" | b"TEXT" => {
                // Recognized but irrelevant to the sector grid
            }
            b"END " => break,
            other => {
                warn!("{}: unrecognized chunk {}", name, fourcc(other));
            }
        }
        offset = payload_start + size;
    }

    // The nominal shape is whatever the grid grew to; the media ID comes
    // from the boot sector when one is present.
    let n_sectors = image
        .cylinders()
        .iter()
        .flat_map(|c| c.heads())
        .map(|t| t.sector_count())
        .max()
        .unwrap_or(0) as u8;
    image.n_sectors = n_sectors;
    if let Some(boot) = image.sector_by_lba(0) {
        let bytes = boot.to_bytes();
        if Bpb::has_jmp(&bytes) {
            let bpb = Bpb::parse(&bytes);
            if media::is_recognized(bpb.media_id) {
                image.media_id = bpb.media_id;
            }
        }
    }
    Ok(image)
}

/// Decode a SECT payload and place the announced sector in the grid
fn parse_sect(image: &mut DiskImage, name: &str, payload: &[u8]) -> (u16, u8, usize, bool) {
    let view = ByteView::new(payload);
    let cylinder = view.u16_be(0);
    let head = view.u8(2);
    let sector_id = view.u8(3);
    let size = view.u16_be(4) as u32;
    let flags = view.u8(6);
    let pattern = view.u8(7);

    let known = FLAG_FILL | FLAG_DATA_ERROR;
    if flags & !known != 0 {
        warn!(
            "{}: SECT {}:{}:{} carries unsupported flags {:#04X}",
            name, cylinder, head, sector_id, flags
        );
    }

    let filled = flags & FLAG_FILL != 0;
    let word = u32::from_le_bytes([pattern; 4]);
    let mut sector = Sector::new(SectorId::new(cylinder, head, sector_id, size), word);
    if flags & FLAG_DATA_ERROR != 0 {
        sector.data_error = -1;
    }

    let track = image.ensure_track(cylinder, head);
    track.add_sector(sector);
    let index = track.sector_count() - 1;
    (cylinder, head, index, filled)
}

fn fourcc(id: &[u8]) -> String {
    id.iter()
        .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '?' })
        .collect()
}
