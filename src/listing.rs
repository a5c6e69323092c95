/// Directory listing and file manifest presenters

use chrono::{NaiveDateTime, Timelike};

use crate::format::constants::attr;
use crate::fs::{FileInfo, VolInfo};
use crate::image::DiskImage;

/// Render a DOS-style directory listing of every volume's file table
///
/// `build_tables` must have run for there to be anything to list.
pub fn directory_listing(image: &DiskImage) -> String {
    let mut out = String::new();
    let mut total_files = 0usize;
    let mut total_bytes = 0u64;

    for vol in image.vol_table() {
        let drive = drive_letter(vol);
        let label = image
            .file_table()
            .iter()
            .find(|f| f.vol_index == vol.vol_index && f.is_volume_label());
        match label {
            Some(label) => {
                out.push_str(&format!(" Volume in drive {} is {}\n", drive, label.name))
            }
            None => out.push_str(&format!(" Volume in drive {} has no label\n", drive)),
        }

        for (dir, entries) in directories(image, vol) {
            out.push('\n');
            out.push_str(&format!(" Directory of {}:{}\n\n", drive, dir));
            let mut dir_bytes = 0u64;
            for file in &entries {
                out.push_str(&listing_line(file));
                out.push('\n');
                dir_bytes += file.size as u64;
            }
            out.push_str(&format!(
                "{:>9} file(s) {:>13} bytes\n",
                entries.len(),
                dir_bytes
            ));
            total_files += entries.len();
            total_bytes += dir_bytes;
        }
    }

    out.push_str(&format!(
        "\nTotal files listed:\n{:>9} file(s) {:>13} bytes\n",
        total_files, total_bytes
    ));
    if let Some(vol) = image.vol_table().first() {
        out.push_str(&format!("{:>32} bytes free\n", vol.free_bytes()));
    }
    out
}

/// Render one line per file: path, size, date and attribute flags
pub fn file_manifest(image: &DiskImage) -> String {
    let mut out = String::new();
    for file in image.file_table() {
        if file.is_volume_label() {
            continue;
        }
        out.push_str(&format!(
            "{:<40} {:>9} {} {}\n",
            file.path,
            if file.is_dir() {
                "<DIR>".to_string()
            } else {
                file.size.to_string()
            },
            file.date
                .map(format_datetime)
                .unwrap_or_else(|| "        ".to_string() + "        "),
            attr_flags(file.attr),
        ));
    }
    out
}

/// Drive letter: unpartitioned volumes are A, partitions start at C
fn drive_letter(vol: &VolInfo) -> char {
    if vol.partition < 0 {
        'A'
    } else {
        (b'C' + vol.partition as u8) as char
    }
}

/// Group a volume's files by containing directory, in traversal order
fn directories<'a>(image: &'a DiskImage, vol: &VolInfo) -> Vec<(String, Vec<&'a FileInfo>)> {
    let mut order: Vec<String> = vec!["\\".to_string()];
    let mut groups: Vec<Vec<&FileInfo>> = vec![Vec::new()];
    for file in image.file_table() {
        if file.vol_index != vol.vol_index || file.is_volume_label() {
            continue;
        }
        let dir = parent_dir(&file.path);
        let slot = match order.iter().position(|d| *d == dir) {
            Some(i) => i,
            None => {
                order.push(dir);
                groups.push(Vec::new());
                order.len() - 1
            }
        };
        groups[slot].push(file);
    }
    order
        .into_iter()
        .zip(groups)
        .filter(|(dir, entries)| !entries.is_empty() || dir == "\\")
        .collect()
}

fn parent_dir(path: &str) -> String {
    match path.rfind('\\') {
        Some(0) | None => "\\".to_string(),
        Some(pos) => path[..pos].to_string(),
    }
}

/// One DOS `dir`-style line: name, extension, size or <DIR>, date, time
fn listing_line(file: &FileInfo) -> String {
    let (base, ext) = match file.name.rfind('.') {
        Some(pos) if pos > 0 => (&file.name[..pos], &file.name[pos + 1..]),
        _ => (file.name.as_str(), ""),
    };
    let size_col = if file.is_dir() {
        "<DIR>     ".to_string()
    } else {
        format!("{:>10}", file.size)
    };
    let when = file
        .date
        .map(format_datetime)
        .unwrap_or_else(|| " ".repeat(17));
    format!("{:<8} {:<3} {} {}", base, ext, size_col, when)
}

/// DOS-style date and time: `11-28-18  12:30p`
fn format_datetime(dt: NaiveDateTime) -> String {
    let hour12 = match dt.hour() % 12 {
        0 => 12,
        h => h,
    };
    let suffix = if dt.hour() < 12 { 'a' } else { 'p' };
    format!(
        "{}  {:>2}:{:02}{}",
        dt.format("%m-%d-%y"),
        hour12,
        dt.minute(),
        suffix
    )
}

fn attr_flags(bits: u8) -> String {
    let mut flags = String::new();
    for (bit, ch) in [
        (attr::READ_ONLY, 'R'),
        (attr::HIDDEN, 'H'),
        (attr::SYSTEM, 'S'),
        (attr::SUBDIR, 'D'),
        (attr::ARCHIVE, 'A'),
    ] {
        flags.push(if bits & bit != 0 { ch } else { '-' });
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_datetime() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 11, 28)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_format_datetime() {
        assert_eq!(format_datetime(sample_datetime()), "11-28-18  12:30p");
        let morning = NaiveDate::from_ymd_opt(1983, 3, 8)
            .unwrap()
            .and_hms_opt(0, 5, 0)
            .unwrap();
        assert_eq!(format_datetime(morning), "03-08-83  12:05a");
    }

    #[test]
    fn test_attr_flags() {
        assert_eq!(attr_flags(attr::ARCHIVE), "----A");
        assert_eq!(attr_flags(attr::SUBDIR), "---D-");
        assert_eq!(attr_flags(attr::READ_ONLY | attr::SYSTEM), "R-S--");
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("\\HELLO.TXT"), "\\");
        assert_eq!(parent_dir("\\SUB\\HELLO.TXT"), "\\SUB");
        assert_eq!(parent_dir("\\A\\B\\C.TXT"), "\\A\\B");
    }

    #[test]
    fn test_listing_line() {
        let file = FileInfo {
            vol_index: 0,
            path: "\\HELLO.TXT".to_string(),
            name: "HELLO.TXT".to_string(),
            attr: attr::ARCHIVE,
            date: Some(sample_datetime()),
            size: 13,
            cluster: 2,
            lbas: vec![7],
        };
        assert_eq!(
            listing_line(&file),
            "HELLO    TXT         13 11-28-18  12:30p"
        );
    }

    #[test]
    fn test_drive_letters() {
        let mut vol = VolInfo {
            vol_index: 0,
            partition: -1,
            media_id: 0xFE,
            lba_start: 0,
            lba_total: 320,
            fat_bits: 12,
            vba_fat: 1,
            vba_root: 3,
            vba_data: 7,
            root_entries: 64,
            cluster_secs: 1,
            cluster_max: 0xFF6,
            clusters_bad: 0,
            clusters_free: 312,
            clusters_total: 313,
            sector_bytes: 512,
        };
        assert_eq!(drive_letter(&vol), 'A');
        vol.partition = 0;
        assert_eq!(drive_letter(&vol), 'C');
        vol.partition = 1;
        assert_eq!(drive_letter(&vol), 'D');
    }
}
