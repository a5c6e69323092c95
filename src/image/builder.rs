/// Builder for blank formatted disk images

use crate::format::constants::media;
use crate::format::SourceFormat;
use crate::image::{Cylinder, DiskImage, Sector, SectorId, Track, FORMAT_PATTERN};

/// Builder for constructing blank formatted images
pub struct DiskImageBuilder {
    name: String,
    cylinders: u16,
    heads: u8,
    sectors_per_track: u8,
    sector_size: u32,
    media_id: u8,
    pattern: u32,
    writable: bool,
}

impl DiskImageBuilder {
    /// Create a new builder with 160 KB floppy defaults
    pub fn new() -> Self {
        Self {
            name: String::from("untitled"),
            cylinders: 40,
            heads: 1,
            sectors_per_track: 8,
            sector_size: 512,
            media_id: media::M160K,
            pattern: FORMAT_PATTERN,
            writable: false,
        }
    }

    /// Set the image name
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Set the number of cylinders
    pub fn cylinders(mut self, cylinders: u16) -> Self {
        self.cylinders = cylinders;
        self
    }

    /// Set the number of heads
    pub fn heads(mut self, heads: u8) -> Self {
        self.heads = heads;
        self
    }

    /// Set sectors per track
    pub fn sectors_per_track(mut self, sectors: u8) -> Self {
        self.sectors_per_track = sectors;
        self
    }

    /// Set the sector size in bytes
    pub fn sector_size(mut self, bytes: u32) -> Self {
        self.sector_size = bytes;
        self
    }

    /// Set the media ID byte
    pub fn media_id(mut self, media_id: u8) -> Self {
        self.media_id = media_id;
        self
    }

    /// Set the fill pattern for the blank sectors
    pub fn pattern(mut self, pattern: u32) -> Self {
        self.pattern = pattern;
        self
    }

    /// Make the image writable
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Build the blank image
    pub fn build(self) -> DiskImage {
        let mut image = DiskImage::with_shape(
            self.name,
            self.cylinders,
            self.heads,
            self.sectors_per_track,
            self.sector_size,
            self.media_id,
            SourceFormat::Synthesized,
        );
        for c in 0..self.cylinders {
            let mut cylinder = Cylinder::new(c);
            for h in 0..self.heads {
                let mut track = Track::new(c, h);
                for s in 0..self.sectors_per_track {
                    let id = SectorId::new(c, h, s + 1, self.sector_size);
                    track.add_sector(Sector::new(id, self.pattern));
                }
                cylinder.add_head(track);
            }
            image.cylinders.push(cylinder);
        }
        image.writable = self.writable;
        image
    }
}

impl Default for DiskImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default() {
        let image = DiskImageBuilder::new().build();
        assert_eq!(image.cylinder_count(), 40);
        assert_eq!(image.head_count(), 1);
        assert_eq!(image.sectors_per_track(), 8);
        assert_eq!(image.media_id(), media::M160K);
        assert!(!image.is_writable());
    }

    #[test]
    fn test_builder_custom() {
        let image = DiskImageBuilder::new()
            .name("blank")
            .cylinders(80)
            .heads(2)
            .sectors_per_track(18)
            .media_id(media::M1440K)
            .writable(true)
            .build();
        assert_eq!(image.name(), "blank");
        assert_eq!(image.cylinder_count(), 80);
        assert_eq!(image.head_count(), 2);
        assert!(image.is_writable());
        assert_eq!(image.disk_size(), 80 * 2 * 18 * 512);
    }

    #[test]
    fn test_builder_sector_ids() {
        let image = DiskImageBuilder::new()
            .cylinders(1)
            .sectors_per_track(9)
            .build();
        let track = image.get_track(0, 0).unwrap();
        assert_eq!(track.sector_ids(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_builder_pattern() {
        let image = DiskImageBuilder::new()
            .cylinders(1)
            .heads(1)
            .sectors_per_track(1)
            .pattern(0)
            .build();
        let sector = image.sector_at(0, 0, 0).unwrap();
        assert_eq!(sector.read_byte(0), 0);
        assert_eq!(sector.words().len(), 1);
    }
}
