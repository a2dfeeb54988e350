use std::{
    fs::File,
    io::{ErrorKind, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use super::encoding::{TextEncoding, SNIFF_BYTES};

/// Upper bound for one incremental read so a huge burst cannot exhaust memory.
pub const MAX_READ_BYTES: u64 = 64 * 1024 * 1024;

/// A trailing fragment longer than this is dropped instead of buffered.
const MAX_PENDING_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct EncodingOptions {
    pub auto_detect: bool,
    pub fallback: TextEncoding,
}

impl Default for EncodingOptions {
    fn default() -> Self {
        Self {
            auto_detect: true,
            fallback: TextEncoding::Utf8,
        }
    }
}

/// Result of one incremental read.
#[derive(Debug, Default)]
pub struct TailBatch {
    pub lines: Vec<String>,
    /// The file shrank below the cursor, so reading restarted at byte 0.
    pub rewound: bool,
}

/// Result of a whole-file read.
#[derive(Debug)]
pub struct FullRead {
    /// Complete lines only; a trailing fragment without a line break is left out.
    pub lines: Vec<String>,
    /// File length observed when the read happened.
    pub length: u64,
    /// Offset just past the last line break (0 when there is none). A tail
    /// cursor moved here picks the fragment up once its line is finished.
    pub consumed: u64,
    pub encoding: TextEncoding,
}

/// Byte-offset cursor over one append-only file.
///
/// The file is reopened for every read with the platform's default sharing
/// mode, so a writer can keep appending (or rotate the file) while we tail it.
#[derive(Debug)]
pub struct TailReader {
    path: PathBuf,
    offset: u64,
    options: EncodingOptions,
    /// Resolved once; stays fixed for the lifetime of the reader.
    encoding: Option<TextEncoding>,
    /// Bytes after the last line break, waiting for the rest of their line.
    pending: Vec<u8>,
}

impl TailReader {
    /// Open `path` and place the cursor at 0 or at the current end of file.
    ///
    /// A missing file is not an error: the cursor starts at 0 and the
    /// encoding is detected once the file shows up.
    pub fn initialize(path: impl Into<PathBuf>, start_from_end: bool, options: EncodingOptions) -> Result<Self> {
        let path = path.into();
        let mut reader = Self::detached(path, options);

        let mut file = match File::open(&reader.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("Log file {} does not exist yet; starting from an empty baseline", reader.path.display());
                return Ok(reader);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to open {}", reader.path.display()));
            }
        };

        let length = file
            .metadata()
            .with_context(|| format!("failed to stat {}", reader.path.display()))?
            .len();

        reader.encoding = reader.resolve_encoding(&mut file)?;
        if start_from_end {
            reader.offset = length;
        }

        info!(
            "Tail reader initialised for {} at offset {} ({} bytes, encoding {})",
            reader.path.display(),
            reader.offset,
            length,
            reader.encoding.map(|e| e.as_str()).unwrap_or("undecided"),
        );
        Ok(reader)
    }

    /// Reader at offset 0 that has not touched the file yet.
    pub fn detached(path: impl Into<PathBuf>, options: EncodingOptions) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            encoding: if options.auto_detect {
                None
            } else {
                Some(options.fallback)
            },
            options,
            pending: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding.unwrap_or(self.options.fallback)
    }

    /// The encoding, if detection has run (or detection is disabled).
    pub fn resolved_encoding(&self) -> Option<TextEncoding> {
        self.encoding
    }

    pub fn options(&self) -> EncodingOptions {
        self.options
    }

    /// True iff the file is longer than the cursor.
    pub fn has_new_content(&self) -> bool {
        match current_length(&self.path) {
            Ok(Some(length)) => length > self.offset,
            Ok(None) => false,
            Err(err) => {
                debug!("has_new_content stat failed for {}: {err:#}", self.path.display());
                false
            }
        }
    }

    /// Reset the cursor when the file shrank below it. Returns whether a reset happened.
    pub fn handle_file_recreation(&mut self) -> Result<bool> {
        let length = current_length(&self.path)?.unwrap_or(0);
        if length < self.offset {
            warn!(
                "{} shrank from {} to {} bytes; rewinding cursor",
                self.path.display(),
                self.offset,
                length
            );
            self.reset_position();
            return Ok(true);
        }
        Ok(false)
    }

    pub fn reset_position(&mut self) {
        self.offset = 0;
        self.pending.clear();
    }

    /// Move the cursor to `length`, dropping any buffered fragment.
    pub fn sync_to(&mut self, length: u64) {
        self.offset = length;
        self.pending.clear();
    }

    /// Pin the encoding chosen by a whole-file read if none was decided yet.
    pub fn adopt_encoding(&mut self, encoding: TextEncoding) {
        if self.encoding.is_none() {
            self.encoding = Some(encoding);
        }
    }

    /// Read every complete line appended since the last call.
    ///
    /// On error the cursor is left untouched so the next call retries from
    /// the same offset.
    pub fn read_new_lines(&mut self) -> Result<TailBatch> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let rewound = self.offset > 0;
                if rewound {
                    warn!("{} disappeared; rewinding cursor", self.path.display());
                    self.reset_position();
                }
                return Ok(TailBatch {
                    lines: Vec::new(),
                    rewound,
                });
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to open {}", self.path.display()));
            }
        };

        let length = file
            .metadata()
            .with_context(|| format!("failed to stat {}", self.path.display()))?
            .len();

        let rewound = length < self.offset;
        let start = if rewound { 0 } else { self.offset };
        if length == start {
            if rewound {
                self.reset_position();
            }
            return Ok(TailBatch {
                lines: Vec::new(),
                rewound,
            });
        }

        let encoding = match self.encoding {
            Some(encoding) => encoding,
            None => self.resolve_encoding(&mut file)?.unwrap_or(self.options.fallback),
        };

        file.seek(SeekFrom::Start(start))
            .with_context(|| format!("failed to seek {} to {}", self.path.display(), start))?;

        let mut chunk = Vec::new();
        (&mut file)
            .take((length - start).min(MAX_READ_BYTES))
            .read_to_end(&mut chunk)
            .with_context(|| format!("failed to read {}", self.path.display()))?;

        // Everything below only mutates state; no more fallible I/O.
        if rewound {
            warn!(
                "{} shrank from {} to {} bytes; re-reading from the start",
                self.path.display(),
                self.offset,
                length
            );
            self.pending.clear();
        }
        self.encoding = Some(encoding);
        self.offset = start + chunk.len() as u64;

        let body = if start == 0 {
            &chunk[encoding.bom_len(&chunk)..]
        } else {
            &chunk[..]
        };

        let mut buffered = std::mem::take(&mut self.pending);
        buffered.extend_from_slice(body);

        let lines = match encoding.end_of_last_line(&buffered) {
            Some(end) => {
                let lines = split_lines(&encoding.decode(&buffered[..end]));
                self.keep_fragment(&buffered[end..]);
                lines
            }
            None => {
                self.keep_fragment(&buffered);
                Vec::new()
            }
        };

        debug!(
            "Read {} new lines from {} (offset now {})",
            lines.len(),
            self.path.display(),
            self.offset
        );

        Ok(TailBatch { lines, rewound })
    }

    fn keep_fragment(&mut self, fragment: &[u8]) {
        if fragment.len() > MAX_PENDING_BYTES {
            warn!(
                "Discarding oversized partial line ({} bytes) in {}",
                fragment.len(),
                self.path.display()
            );
            self.pending.clear();
        } else {
            self.pending = fragment.to_vec();
        }
    }

    fn resolve_encoding(&self, file: &mut File) -> Result<Option<TextEncoding>> {
        if let Some(encoding) = self.encoding {
            return Ok(Some(encoding));
        }
        let prefix = read_prefix(file)
            .with_context(|| format!("failed to detect encoding of {}", self.path.display()))?;
        let sniffed = TextEncoding::sniff(&prefix);
        if let Some(encoding) = sniffed {
            debug!("Detected encoding {} for {}", encoding.as_str(), self.path.display());
        }
        Ok(sniffed)
    }
}

/// Read the whole file without touching any cursor.
///
/// A missing file reads as empty. Lines are split the same way as
/// [`TailReader::read_new_lines`]: a trailing fragment without a line break
/// is not returned.
pub fn read_full(path: &Path, options: EncodingOptions, known: Option<TextEncoding>) -> Result<FullRead> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Ok(FullRead {
                lines: Vec::new(),
                length: 0,
                consumed: 0,
                encoding: known.unwrap_or(options.fallback),
            });
        }
        Err(err) => return Err(err).with_context(|| format!("failed to open {}", path.display())),
    };

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let encoding = match known {
        Some(encoding) => encoding,
        None if options.auto_detect => {
            TextEncoding::sniff(&bytes[..bytes.len().min(SNIFF_BYTES)]).unwrap_or(options.fallback)
        }
        None => options.fallback,
    };

    let bom_len = encoding.bom_len(&bytes);
    let body = &bytes[bom_len..];
    let (lines, consumed) = match encoding.end_of_last_line(body) {
        Some(end) => (split_lines(&encoding.decode(&body[..end])), (bom_len + end) as u64),
        None => (Vec::new(), 0),
    };

    Ok(FullRead {
        lines,
        length: bytes.len() as u64,
        consumed,
        encoding,
    })
}

fn read_prefix(file: &mut File) -> std::io::Result<Vec<u8>> {
    let mut prefix = Vec::with_capacity(SNIFF_BYTES);
    file.seek(SeekFrom::Start(0))?;
    file.take(SNIFF_BYTES as u64).read_to_end(&mut prefix)?;
    Ok(prefix)
}

fn current_length(path: &Path) -> Result<Option<u64>> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.len())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to stat {}", path.display())),
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn empty_file_has_nothing_new() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.log");
        std::fs::write(&path, "").unwrap();

        let mut reader = TailReader::initialize(&path, false, EncodingOptions::default()).unwrap();
        assert!(!reader.has_new_content());
        let batch = reader.read_new_lines().unwrap();
        assert!(batch.lines.is_empty());
        assert!(!batch.rewound);
        assert_eq!(reader.offset(), 0);
    }

    #[test]
    fn returns_only_appended_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("server.log");
        append(&path, "first\nsecond\n");

        let mut reader = TailReader::initialize(&path, false, EncodingOptions::default()).unwrap();
        assert_eq!(reader.read_new_lines().unwrap().lines, vec!["first", "second"]);

        append(&path, "third\nfourth\nfifth\n");
        assert!(reader.has_new_content());
        let batch = reader.read_new_lines().unwrap();
        assert_eq!(batch.lines, vec!["third", "fourth", "fifth"]);
        assert!(!reader.has_new_content());
    }

    #[test]
    fn start_from_end_skips_existing_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("server.log");
        append(&path, "old\n");

        let mut reader = TailReader::initialize(&path, true, EncodingOptions::default()).unwrap();
        assert!(!reader.has_new_content());

        append(&path, "new\n");
        assert_eq!(reader.read_new_lines().unwrap().lines, vec!["new"]);
    }

    #[cfg(unix)]
    #[test]
    fn failed_read_keeps_the_cursor() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("logs");
        std::fs::create_dir(&dir).unwrap();
        let path = dir.join("server.log");
        append(&path, "one\n");

        let mut reader = TailReader::initialize(&path, false, EncodingOptions::default()).unwrap();
        reader.read_new_lines().unwrap();
        assert_eq!(reader.offset(), 4);

        // A regular file where the directory was: opening the log now fails with ENOTDIR.
        let parked = tmp.path().join("logs.parked");
        std::fs::rename(&dir, &parked).unwrap();
        std::fs::write(&dir, "blocker").unwrap();

        assert!(reader.handle_file_recreation().is_err());
        assert!(reader.read_new_lines().is_err());
        assert_eq!(reader.offset(), 4);

        std::fs::remove_file(&dir).unwrap();
        std::fs::rename(&parked, &dir).unwrap();
        append(&path, "two\n");
        assert_eq!(reader.read_new_lines().unwrap().lines, vec!["two"]);
    }

    #[test]
    fn partial_line_waits_for_newline() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("server.log");
        append(&path, "complete\npart");

        let mut reader = TailReader::initialize(&path, false, EncodingOptions::default()).unwrap();
        assert_eq!(reader.read_new_lines().unwrap().lines, vec!["complete"]);

        append(&path, "ial\n");
        assert_eq!(reader.read_new_lines().unwrap().lines, vec!["partial"]);
    }

    #[test]
    fn truncation_rewinds_without_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("server.log");
        append(&path, "aaaaaaaaaa\nbbbbbbbbbb\n");

        let mut reader = TailReader::initialize(&path, false, EncodingOptions::default()).unwrap();
        reader.read_new_lines().unwrap();

        std::fs::write(&path, "c\n").unwrap();
        let batch = reader.read_new_lines().unwrap();
        assert!(batch.rewound);
        assert_eq!(batch.lines, vec!["c"]);
        assert_eq!(reader.offset(), 2);
    }

    #[test]
    fn handle_file_recreation_resets_cursor() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("server.log");
        append(&path, "0123456789\n");

        let mut reader = TailReader::initialize(&path, true, EncodingOptions::default()).unwrap();
        assert_eq!(reader.offset(), 11);
        assert!(!reader.handle_file_recreation().unwrap());

        std::fs::write(&path, "").unwrap();
        assert!(reader.handle_file_recreation().unwrap());
        assert_eq!(reader.offset(), 0);
    }

    #[test]
    fn missing_file_is_an_empty_baseline() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("later.log");

        let mut reader = TailReader::initialize(&path, false, EncodingOptions::default()).unwrap();
        assert!(!reader.has_new_content());
        assert!(reader.read_new_lines().unwrap().lines.is_empty());

        append(&path, "hello\n");
        assert_eq!(reader.read_new_lines().unwrap().lines, vec!["hello"]);
        assert_eq!(reader.encoding(), TextEncoding::Utf8);
    }

    #[test]
    fn utf16_file_with_bom_is_decoded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wide.log");
        let mut bytes = vec![0xFF, 0xFE];
        bytes.extend("one\ntwo\n".encode_utf16().flat_map(|u| u.to_le_bytes()));
        std::fs::write(&path, &bytes).unwrap();

        let mut reader = TailReader::initialize(&path, false, EncodingOptions::default()).unwrap();
        assert_eq!(reader.encoding(), TextEncoding::Utf16Le);
        assert_eq!(reader.read_new_lines().unwrap().lines, vec!["one", "two"]);
    }

    #[test]
    fn disabled_detection_uses_fallback() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("latin.log");
        std::fs::write(&path, [b'c', b'a', b'f', 0xE9, b'\n']).unwrap();

        let options = EncodingOptions {
            auto_detect: false,
            fallback: TextEncoding::Latin1,
        };
        let mut reader = TailReader::initialize(&path, false, options).unwrap();
        assert_eq!(reader.read_new_lines().unwrap().lines, vec!["caf\u{e9}"]);
    }

    #[test]
    fn read_full_leaves_trailing_fragment_for_the_tail() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("server.log");
        append(&path, "a\nb\nc");

        let full = read_full(&path, EncodingOptions::default(), None).unwrap();
        assert_eq!(full.lines, vec!["a", "b"]);
        assert_eq!(full.length, 5);
        assert_eq!(full.consumed, 4);

        let mut reader = TailReader::initialize(&path, false, EncodingOptions::default()).unwrap();
        reader.sync_to(full.consumed);
        append(&path, "d\n");
        assert_eq!(reader.read_new_lines().unwrap().lines, vec!["cd"]);
    }

    #[test]
    fn read_full_without_line_break_consumes_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("server.log");
        append(&path, "\u{feff}partial");

        let full = read_full(&path, EncodingOptions::default(), None).unwrap();
        assert!(full.lines.is_empty());
        assert_eq!(full.consumed, 0);
    }

    #[test]
    fn read_full_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let full = read_full(&tmp.path().join("nope.log"), EncodingOptions::default(), None).unwrap();
        assert!(full.lines.is_empty());
        assert_eq!(full.length, 0);
    }
}
