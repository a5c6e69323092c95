/// Track data structures

use crate::image::sector::Sector;

/// The sectors of one (cylinder, head)
///
/// Sectors keep their on-disk order and IDs need not be unique or sorted:
/// copy-protected media rely on both properties, so lookups are ordered
/// linear scans rather than a map.
#[derive(Debug, Clone)]
pub struct Track {
    /// Cylinder number
    pub cylinder: u16,
    /// Head number
    pub head: u8,
    /// Sectors in on-disk order
    sectors: Vec<Sector>,
}

impl Track {
    /// Create a new empty track
    pub fn new(cylinder: u16, head: u8) -> Self {
        Self {
            cylinder,
            head,
            sectors: Vec::new(),
        }
    }

    /// Add a sector to this track
    pub fn add_sector(&mut self, sector: Sector) {
        self.sectors.push(sector);
    }

    /// Get a reference to all sectors
    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    /// Get a mutable reference to all sectors
    pub fn sectors_mut(&mut self) -> &mut [Sector] {
        &mut self.sectors
    }

    /// Get a sector by its position index
    pub fn get_sector_by_index(&self, index: usize) -> Option<&Sector> {
        self.sectors.get(index)
    }

    /// Get a mutable reference to a sector by its position index
    pub fn get_sector_by_index_mut(&mut self, index: usize) -> Option<&mut Sector> {
        self.sectors.get_mut(index)
    }

    /// Find the first sector with the given ID, starting after `after`
    ///
    /// With `after` set to the index of a previously found sector, repeated
    /// requests for the same ID cycle through its duplicates (wrapping back
    /// to the start), which is how weak-sector protection schemes read
    /// different data on consecutive passes.
    pub fn find_sector(&self, id: u8, after: Option<usize>) -> Option<usize> {
        let start = match after {
            Some(prev) => prev + 1,
            None => 0,
        };
        let n = self.sectors.len();
        (0..n)
            .map(|i| (start + i) % n.max(1))
            .find(|&i| self.sectors.get(i).map(|s| s.id.id) == Some(id))
    }

    /// Get the number of sectors in this track
    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    /// Check if this track has any sectors
    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// Get the total data size of all sectors in bytes
    pub fn total_data_size(&self) -> usize {
        self.sectors.iter().map(|s| s.id.length as usize).sum()
    }

    /// Check if all sectors have the same size
    pub fn has_uniform_sector_size(&self) -> bool {
        match self.sectors.first() {
            Some(first) => self.sectors.iter().all(|s| s.id.length == first.id.length),
            None => true,
        }
    }

    /// Get list of all sector IDs in this track
    pub fn sector_ids(&self) -> Vec<u8> {
        self.sectors.iter().map(|s| s.id.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::sector::SectorId;

    fn track_with_ids(ids: &[u8]) -> Track {
        let mut track = Track::new(0, 0);
        for &id in ids {
            track.add_sector(Sector::new(SectorId::new(0, 0, id, 512), 0));
        }
        track
    }

    #[test]
    fn test_new_track() {
        let track = Track::new(5, 1);
        assert_eq!(track.cylinder, 5);
        assert_eq!(track.head, 1);
        assert!(track.is_empty());
    }

    #[test]
    fn test_find_sector() {
        let track = track_with_ids(&[1, 2, 3, 4, 5]);
        assert_eq!(track.find_sector(3, None), Some(2));
        assert_eq!(track.find_sector(9, None), None);
    }

    #[test]
    fn test_find_sector_out_of_order() {
        // Interleaved layout: physical order differs from ID order
        let track = track_with_ids(&[1, 6, 2, 7, 3, 8, 4, 9, 5]);
        assert_eq!(track.find_sector(7, None), Some(3));
        assert_eq!(track.find_sector(5, None), Some(8));
    }

    #[test]
    fn test_find_sector_duplicates_cycle() {
        // Weak-sector protection: the same ID appears twice
        let track = track_with_ids(&[1, 2, 2, 3]);
        let first = track.find_sector(2, None).unwrap();
        assert_eq!(first, 1);
        let second = track.find_sector(2, Some(first)).unwrap();
        assert_eq!(second, 2);
        // And wraps back around
        let third = track.find_sector(2, Some(second)).unwrap();
        assert_eq!(third, 1);
    }

    #[test]
    fn test_uniform_sector_size() {
        let track = track_with_ids(&[1, 2, 3]);
        assert!(track.has_uniform_sector_size());
        assert_eq!(track.total_data_size(), 3 * 512);

        let mut mixed = track_with_ids(&[2]);
        mixed.add_sector(Sector::new(SectorId::new(0, 0, 3, 1024), 0));
        assert!(!mixed.has_uniform_sector_size());
        assert_eq!(mixed.total_data_size(), 512 + 1024);
    }

    #[test]
    fn test_sector_ids() {
        let track = track_with_ids(&[3, 1, 2]);
        assert_eq!(track.sector_ids(), vec![3, 1, 2]);
    }
}
