//! Counter blocks and aligned listings.

use crate::engine::HistogramRow;
use crate::index::FileRecord;
use std::path::Path;

/// Per-root blocks start with the root path and a colon.
pub fn root_header(root: &Path) {
    println!("{}:", root.display());
}

/// One counter line. The labels are part of the stable output surface.
pub fn counter(label: &str, value: impl std::fmt::Display) {
    println!("{label}: {value}");
}

pub fn seconds(value: f64) -> String {
    format!("{value:.3}")
}

/// Listing rows: `<size> <digest> <path>` with the size column
/// right-aligned to its widest value, so the digest column starts at the
/// same offset on every line.
fn listing_lines(records: &[&FileRecord]) -> Vec<String> {
    let width = records
        .iter()
        .map(|r| r.size.to_string().len())
        .max()
        .unwrap_or(1);
    records
        .iter()
        .map(|r| format!("{:>width$} {} {}", r.size, r.digest, r.path.display()))
        .collect()
}

pub fn print_listing(records: &[&FileRecord]) {
    for line in listing_lines(records) {
        println!("{line}");
    }
}

/// Hardlink groups print as paragraphs: the members of one group as
/// listing rows, groups separated by a blank line. Column widths are
/// computed over all groups so the whole block stays aligned.
pub fn print_hardlink_groups(groups: &[Vec<&FileRecord>]) {
    let all: Vec<&FileRecord> = groups.iter().flatten().copied().collect();
    let width = all
        .iter()
        .map(|r| r.size.to_string().len())
        .max()
        .unwrap_or(1);

    for (i, group) in groups.iter().enumerate() {
        if i > 0 {
            println!();
        }
        for r in group {
            println!("{:>width$} {} {}", r.size, r.digest, r.path.display());
        }
    }
}

fn histogram_lines(rows: &[HistogramRow]) -> Vec<String> {
    let width_start = rows
        .iter()
        .map(|r| r.start.to_string().len())
        .max()
        .unwrap_or(1);
    let width_end = rows
        .iter()
        .map(|r| r.end.to_string().len())
        .max()
        .unwrap_or(1);
    let width_count = rows
        .iter()
        .map(|r| r.count.to_string().len())
        .max()
        .unwrap_or(1);
    let width_bytes = rows
        .iter()
        .map(|r| r.bytes.to_string().len())
        .max()
        .unwrap_or(1);

    rows.iter()
        .map(|r| {
            format!(
                "{:>width_start$}..{:>width_end$}: {:>width_count$} {:>width_bytes$}",
                r.start, r.end, r.count, r.bytes
            )
        })
        .collect()
}

pub fn print_histogram(rows: &[HistogramRow]) {
    for line in histogram_lines(rows) {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(path: &str, size: u64, digest: &str) -> FileRecord {
        FileRecord {
            path: PathBuf::from(path),
            size,
            mtime: 0,
            dev: 1,
            ino: 1,
            nlink: 1,
            digest: digest.to_string(),
        }
    }

    #[test]
    fn test_listing_aligns_digest_column() {
        let small = record("/a/small.txt", 7, "aaaa");
        let large = record("/a/large.txt", 123456, "bbbb");
        let records = vec![&small, &large];

        let lines = listing_lines(&records);
        let offsets: Vec<usize> = lines
            .iter()
            .map(|l| l.find("aaaa").or(l.find("bbbb")).unwrap())
            .collect();
        assert_eq!(offsets[0], offsets[1]);
    }

    #[test]
    fn test_listing_right_aligns_sizes() {
        let small = record("/a/small.txt", 7, "aa");
        let large = record("/a/large.txt", 12345, "bb");
        let records = vec![&small, &large];

        let lines = listing_lines(&records);
        assert_eq!(lines[0], "    7 aa /a/small.txt");
        assert_eq!(lines[1], "12345 bb /a/large.txt");
    }

    #[test]
    fn test_histogram_alignment() {
        let rows = vec![
            HistogramRow {
                start: 0,
                end: 10,
                count: 5,
                bytes: 23,
            },
            HistogramRow {
                start: 990,
                end: 1000,
                count: 12,
                bytes: 11900,
            },
        ];

        let lines = histogram_lines(&rows);
        assert_eq!(lines[0], "  0..  10:  5    23");
        assert_eq!(lines[1], "990..1000: 12 11900");
    }
}
