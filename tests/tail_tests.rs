use std::fs::{self, OpenOptions};
use std::io::Write;

use stackwatch_lib::tail::{read_full, EncodingOptions};
use stackwatch_lib::{aggregate_lines, TailReader, TextEncoding};

#[test]
fn tailing_a_growing_log_counts_each_line_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("script.log");
    fs::write(&path, "[07/29/2025 - 01:00:00PM] Dumping Stacks\n").unwrap();

    let mut reader = TailReader::initialize(&path, false, EncodingOptions::default()).unwrap();
    let first = reader.read_new_lines().unwrap();
    assert_eq!(aggregate_lines(&first.lines).dumps, 1);

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    write!(file, "[07/29/2025 - 01:00:01PM] Dumping Stack 1:\n[07/29/2025 - 01:00:02PM] Dump").unwrap();
    file.flush().unwrap();

    let second = reader.read_new_lines().unwrap();
    let delta = aggregate_lines(&second.lines);
    assert_eq!((delta.dumps, delta.stacks), (0, 1));

    write!(file, "ing Stacks\n").unwrap();
    file.flush().unwrap();

    let third = reader.read_new_lines().unwrap();
    assert_eq!(third.lines, vec!["[07/29/2025 - 01:00:02PM] Dumping Stacks".to_string()]);
    assert!(!reader.has_new_content());
}

#[test]
fn full_read_matches_incremental_totals() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("script.log");
    fs::write(
        &path,
        "[07/29/2025 - 01:00:00PM] Dumping Stacks\n\
         [07/29/2025 - 01:00:01PM] warning: slow frame\n\
         [07/29/2025 - 01:00:02PM] error: nil value\n\
         [07/29/2025 - 01:00:03PM] Dumping St",
    )
    .unwrap();

    let full = read_full(&path, EncodingOptions::default(), None).unwrap();
    assert_eq!(full.encoding, TextEncoding::Utf8);
    assert_eq!(full.length, fs::metadata(&path).unwrap().len());
    assert_eq!(full.consumed, full.length - "[07/29/2025 - 01:00:03PM] Dumping St".len() as u64);

    let stats = aggregate_lines(&full.lines);
    assert_eq!((stats.dumps, stats.warnings, stats.errors), (1, 1, 1));

    let mut reader = TailReader::initialize(&path, false, EncodingOptions::default()).unwrap();
    reader.sync_to(full.consumed);
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    writeln!(file, "acks").unwrap();
    file.flush().unwrap();

    let rest = aggregate_lines(&reader.read_new_lines().unwrap().lines);
    assert_eq!(rest.dumps, 1);
}
