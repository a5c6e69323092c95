/// Sector data structures and the 32-bit word codec
///
/// Sector payloads are stored as little-endian 32-bit words with the trailing
/// run of equal words truncated: the last stored word repeats to fill the
/// sector. A freshly formatted sector is therefore a single word regardless
/// of its size.

/// Sector addressing information (CHS plus size)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorId {
    /// C - Cylinder number
    pub cylinder: u16,
    /// H - Head number
    pub head: u8,
    /// R - Sector ID (usually 1-based, but copy-protected media disagree)
    pub id: u8,
    /// N - Sector size in bytes
    pub length: u32,
}

impl SectorId {
    /// Create a new sector ID
    pub fn new(cylinder: u16, head: u8, id: u8, length: u32) -> Self {
        Self {
            cylinder,
            head,
            id,
            length,
        }
    }

    /// Number of 32-bit words in a fully populated sector
    pub fn word_count(&self) -> usize {
        (self.length / 4) as usize
    }
}

/// A disk sector: compressed word data plus optional controller metadata
#[derive(Debug, Clone)]
pub struct Sector {
    /// Sector addressing information
    pub id: SectorId,
    /// Compressed word data (the last word repeats to fill the sector)
    data: Vec<u32>,
    /// Recorded data-field CRC, when the source container kept one
    pub data_crc: Option<u32>,
    /// Negative values make every read of this sector fail
    pub data_error: i32,
    /// Recorded data address mark, when non-standard
    pub data_mark: Option<u32>,
    /// Recorded ID-field CRC, when the source container kept one
    pub head_crc: Option<u32>,
    /// Whether the ID field itself was unreadable
    pub head_error: bool,
    /// First modified word index
    modify_index: usize,
    /// Number of modified words
    modify_count: usize,
    /// Index into the image's file table, set by file analysis
    file_index: Option<usize>,
    /// Byte offset of this sector within that file
    file_offset: u32,
}

impl Sector {
    /// Create a blank sector filled with a repeating word pattern
    pub fn new(id: SectorId, pattern: u32) -> Self {
        let data = if id.length > 0 { vec![pattern] } else { Vec::new() };
        Self {
            id,
            data,
            data_crc: None,
            data_error: 0,
            data_mark: None,
            head_crc: None,
            head_error: false,
            modify_index: 0,
            modify_count: 0,
            file_index: None,
            file_offset: 0,
        }
    }

    /// Build a sector from a byte buffer, compressing the trailing run
    pub fn from_buffer(id: SectorId, buffer: &[u8], offset: usize) -> Self {
        let words = id.word_count();
        let mut data = Vec::with_capacity(words);
        for w in 0..words {
            let base = offset + w * 4;
            let mut word = 0u32;
            for i in 0..4 {
                let byte = buffer.get(base + i).copied().unwrap_or(0);
                word |= (byte as u32) << (i * 8);
            }
            data.push(word);
        }
        while data.len() > 1 && data[data.len() - 1] == data[data.len() - 2] {
            data.pop();
        }
        let mut sector = Sector::new(id, 0);
        sector.data = data;
        sector
    }

    /// Build a sector from already-compressed words (JSON import)
    ///
    /// Words beyond the sector size are dropped so the compression invariant
    /// holds for malformed inputs.
    pub fn from_words(id: SectorId, mut words: Vec<u32>) -> Self {
        words.truncate(id.word_count());
        if words.is_empty() && id.length > 0 {
            words.push(0);
        }
        let mut sector = Sector::new(id, 0);
        sector.data = words;
        sector
    }

    /// Get the stored (compressed) words
    pub fn words(&self) -> &[u32] {
        &self.data
    }

    /// The repeating fill pattern (the last stored word)
    pub fn pattern(&self) -> u32 {
        self.data.last().copied().unwrap_or(0)
    }

    /// Whether the stored words are shorter than the full sector
    pub fn is_compressed(&self) -> bool {
        self.data.len() < self.id.word_count()
    }

    /// Read one byte of the sector
    ///
    /// Returns -1 when the index is out of range or the sector is marked as
    /// a read error.
    pub fn read_byte(&self, index: usize) -> i32 {
        if self.data_error < 0 {
            return -1;
        }
        if index >= self.id.length as usize || self.data.is_empty() {
            return -1;
        }
        let widx = (index / 4).min(self.data.len() - 1);
        ((self.data[widx] >> ((index & 3) * 8)) & 0xFF) as i32
    }

    /// Write one byte of the sector, tracking the modified word range
    ///
    /// Returns false when the index is out of range. Writing a byte equal to
    /// the current contents is a no-op.
    pub fn write_byte(&mut self, index: usize, value: u8) -> bool {
        if index >= self.id.length as usize {
            return false;
        }
        let widx = index / 4;
        let shift = (index & 3) * 8;
        let current_word = if widx < self.data.len() {
            self.data[widx]
        } else {
            self.pattern()
        };
        if ((current_word >> shift) & 0xFF) as u8 == value {
            return true;
        }
        let pattern = self.pattern();
        while self.data.len() <= widx {
            self.data.push(pattern);
        }
        self.data[widx] = (self.data[widx] & !(0xFFu32 << shift)) | ((value as u32) << shift);
        if self.modify_count == 0 {
            self.modify_index = widx;
            self.modify_count = 1;
        } else {
            let end = self.modify_index + self.modify_count;
            if widx < self.modify_index {
                self.modify_count = end - widx;
                self.modify_index = widx;
            } else if widx >= end {
                self.modify_count = widx + 1 - self.modify_index;
            }
        }
        true
    }

    /// The modified word range as (first index, count)
    pub fn modify_range(&self) -> (usize, usize) {
        (self.modify_index, self.modify_count)
    }

    /// Clear the modified word range
    pub fn reset_modify(&mut self) {
        self.modify_index = 0;
        self.modify_count = 0;
    }

    /// This sector's contribution to the image checksum
    ///
    /// Compressed sectors deliberately exclude the final repeated word; fully
    /// populated sectors sum every word. Legacy images computed their
    /// checksums this way and compatibility wins over symmetry.
    pub fn checksum(&self) -> u32 {
        let cdw = if self.is_compressed() {
            self.data.len().saturating_sub(1)
        } else {
            self.data.len()
        };
        self.data[..cdw]
            .iter()
            .fold(0u32, |acc, &w| acc.wrapping_add(w))
    }

    /// Append the decompressed sector contents to a byte buffer
    pub fn decompress_into(&self, out: &mut Vec<u8>) {
        let words = self.id.word_count();
        for w in 0..words {
            let word = if self.data.is_empty() {
                0
            } else {
                self.data[w.min(self.data.len() - 1)]
            };
            out.extend_from_slice(&word.to_le_bytes());
        }
    }

    /// The decompressed sector contents
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.id.length as usize);
        self.decompress_into(&mut out);
        out
    }

    /// Record which file occupies this sector and at what offset
    pub fn set_file_link(&mut self, file_index: usize, file_offset: u32) {
        self.file_index = Some(file_index);
        self.file_offset = file_offset;
    }

    /// Remove the file back-reference
    pub fn clear_file_link(&mut self) {
        self.file_index = None;
        self.file_offset = 0;
    }

    /// Index into the image's file table, when file analysis has run
    pub fn file_index(&self) -> Option<usize> {
        self.file_index
    }

    /// Byte offset of this sector within its file
    pub fn file_offset(&self) -> u32 {
        self.file_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_512() -> Sector {
        Sector::new(SectorId::new(0, 0, 1, 512), 0)
    }

    #[test]
    fn test_compression_from_buffer() {
        let mut buf = vec![0u8; 512];
        buf[0] = 0xEB;
        buf[1] = 0x3C;
        let sector = Sector::from_buffer(SectorId::new(0, 0, 1, 512), &buf, 0);
        // One distinct word followed by 127 zero words compresses to two
        assert_eq!(sector.words(), &[0x3CEB, 0]);
        assert!(sector.is_compressed());
        assert_eq!(sector.to_bytes(), buf);
    }

    #[test]
    fn test_uniform_sector_compresses_to_one_word() {
        let buf = vec![0xF6u8; 512];
        let sector = Sector::from_buffer(SectorId::new(0, 0, 1, 512), &buf, 0);
        assert_eq!(sector.words(), &[0xF6F6F6F6]);
        assert_eq!(sector.to_bytes(), buf);
    }

    #[test]
    fn test_incompressible_sector() {
        let buf: Vec<u8> = (0..512).map(|i| (i % 251) as u8).collect();
        let sector = Sector::from_buffer(SectorId::new(0, 0, 1, 512), &buf, 0);
        assert_eq!(sector.words().len(), 128);
        assert!(!sector.is_compressed());
        assert_eq!(sector.to_bytes(), buf);
    }

    #[test]
    fn test_read_byte() {
        let mut buf = vec![0u8; 512];
        buf[5] = 0xAB;
        let sector = Sector::from_buffer(SectorId::new(0, 0, 1, 512), &buf, 0);
        assert_eq!(sector.read_byte(5), 0xAB);
        assert_eq!(sector.read_byte(6), 0x00);
        assert_eq!(sector.read_byte(511), 0x00);
        assert_eq!(sector.read_byte(512), -1);
    }

    #[test]
    fn test_read_byte_with_data_error() {
        let mut sector = blank_512();
        sector.data_error = -1;
        assert_eq!(sector.read_byte(0), -1);
        assert_eq!(sector.read_byte(100), -1);
    }

    #[test]
    fn test_write_byte_modify_tracking() {
        let mut sector = blank_512();
        assert!(sector.write_byte(100, 0x41));
        assert_eq!(sector.modify_range(), (25, 1));
        assert_eq!(sector.read_byte(100), 0x41);

        assert!(sector.write_byte(50, 0x42));
        assert_eq!(sector.modify_range(), (12, 14));
        assert_eq!(sector.read_byte(50), 0x42);

        // Out-of-range writes are rejected
        assert!(!sector.write_byte(512, 0x00));
    }

    #[test]
    fn test_write_equal_byte_is_noop() {
        let mut sector = blank_512();
        assert!(sector.write_byte(8, 0x00));
        assert_eq!(sector.modify_range(), (0, 0));
        assert_eq!(sector.words().len(), 1);
    }

    #[test]
    fn test_write_expands_with_pattern() {
        let buf = vec![0xE5u8; 512];
        let mut sector = Sector::from_buffer(SectorId::new(0, 0, 1, 512), &buf, 0);
        assert_eq!(sector.words().len(), 1);
        sector.write_byte(200, 0x00);
        // Words up to index 50 now exist, all carrying the old pattern
        assert_eq!(sector.words().len(), 51);
        assert_eq!(sector.words()[49], 0xE5E5E5E5);
        assert_eq!(sector.read_byte(199), 0xE5);
        assert_eq!(sector.read_byte(200), 0x00);
        // Bytes past the stored words still read the pattern
        assert_eq!(sector.read_byte(511), 0xE5);
    }

    #[test]
    fn test_checksum_excludes_trailing_pattern() {
        // Compressed: [1, 2, 7] -> sum of [1, 2]
        let sector = Sector::from_words(SectorId::new(0, 0, 1, 512), vec![1, 2, 7]);
        assert_eq!(sector.checksum(), 3);

        // Full 4-word sector sums everything
        let sector = Sector::from_words(SectorId::new(0, 0, 1, 16), vec![1, 2, 3, 4]);
        assert_eq!(sector.checksum(), 10);
    }

    #[test]
    fn test_checksum_wraps() {
        let sector = Sector::from_words(
            SectorId::new(0, 0, 1, 16),
            vec![0xFFFF_FFFF, 2, 0, 0],
        );
        assert_eq!(sector.checksum(), 1);
    }

    #[test]
    fn test_from_words_truncates_overlong_input() {
        let sector = Sector::from_words(SectorId::new(0, 0, 1, 8), vec![1, 2, 3, 4]);
        assert_eq!(sector.words(), &[1, 2]);
    }

    #[test]
    fn test_file_links() {
        let mut sector = blank_512();
        assert_eq!(sector.file_index(), None);
        sector.set_file_link(3, 1024);
        assert_eq!(sector.file_index(), Some(3));
        assert_eq!(sector.file_offset(), 1024);
        sector.clear_file_link();
        assert_eq!(sector.file_index(), None);
    }
}
