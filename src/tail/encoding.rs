use serde::{Deserialize, Serialize};

/// How many leading bytes one-time detection inspects.
pub const SNIFF_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
}

impl Default for TextEncoding {
    fn default() -> Self {
        TextEncoding::Utf8
    }
}

impl TextEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf16Le => "utf-16le",
            TextEncoding::Utf16Be => "utf-16be",
            TextEncoding::Latin1 => "latin1",
        }
    }

    /// Resolve a configured encoding label. Labels are matched case-insensitively.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(TextEncoding::Utf8),
            "utf-16" | "utf-16le" | "utf16" | "unicode" => Some(TextEncoding::Utf16Le),
            "utf-16be" | "bigendianunicode" => Some(TextEncoding::Utf16Be),
            "latin1" | "latin-1" | "iso-8859-1" | "windows-1252" | "ascii" | "us-ascii" => {
                Some(TextEncoding::Latin1)
            }
            _ => None,
        }
    }

    /// Guess the encoding from a file prefix. Returns `None` for an empty prefix.
    pub fn sniff(prefix: &[u8]) -> Option<Self> {
        if prefix.is_empty() {
            return None;
        }

        if prefix.starts_with(&[0xEF, 0xBB, 0xBF]) {
            return Some(TextEncoding::Utf8);
        }
        if prefix.starts_with(&[0xFF, 0xFE]) {
            return Some(TextEncoding::Utf16Le);
        }
        if prefix.starts_with(&[0xFE, 0xFF]) {
            return Some(TextEncoding::Utf16Be);
        }

        if let Some(utf16) = sniff_utf16_without_bom(prefix) {
            return Some(utf16);
        }

        match std::str::from_utf8(prefix) {
            Ok(_) => Some(TextEncoding::Utf8),
            // A multi-byte sequence cut off by the detection window is still UTF-8.
            Err(err) if err.error_len().is_none() => Some(TextEncoding::Utf8),
            Err(_) => Some(TextEncoding::Latin1),
        }
    }

    /// Length of the byte order mark at the start of `bytes`, if it matches this encoding.
    pub fn bom_len(&self, bytes: &[u8]) -> usize {
        let bom: &[u8] = match self {
            TextEncoding::Utf8 => &[0xEF, 0xBB, 0xBF],
            TextEncoding::Utf16Le => &[0xFF, 0xFE],
            TextEncoding::Utf16Be => &[0xFE, 0xFF],
            TextEncoding::Latin1 => return 0,
        };
        if bytes.starts_with(bom) {
            bom.len()
        } else {
            0
        }
    }

    /// Index just past the last line break in `bytes`, honouring the code unit width.
    pub fn end_of_last_line(&self, bytes: &[u8]) -> Option<usize> {
        match self {
            TextEncoding::Utf8 | TextEncoding::Latin1 => {
                bytes.iter().rposition(|b| *b == b'\n').map(|idx| idx + 1)
            }
            TextEncoding::Utf16Le => last_utf16_break(bytes, [b'\n', 0]),
            TextEncoding::Utf16Be => last_utf16_break(bytes, [0, b'\n']),
        }
    }

    /// Decode lossily; invalid sequences become U+FFFD instead of failing.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Latin1 => bytes.iter().map(|b| *b as char).collect(),
            TextEncoding::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
            TextEncoding::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
        }
    }
}

fn last_utf16_break(bytes: &[u8], unit: [u8; 2]) -> Option<usize> {
    let even_len = bytes.len() - bytes.len() % 2;
    (0..even_len)
        .step_by(2)
        .rev()
        .find(|idx| bytes[*idx..*idx + 2] == unit)
        .map(|idx| idx + 2)
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> String {
    let units = bytes.chunks_exact(2).map(|pair| to_unit([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// ASCII text stored as UTF-16 has a zero byte in every other position.
fn sniff_utf16_without_bom(prefix: &[u8]) -> Option<TextEncoding> {
    let pairs = prefix.len() / 2;
    if pairs < 2 {
        return None;
    }

    let mut even_zeros = 0usize;
    let mut odd_zeros = 0usize;
    for pair in prefix.chunks_exact(2) {
        if pair[0] == 0 {
            even_zeros += 1;
        }
        if pair[1] == 0 {
            odd_zeros += 1;
        }
    }

    // At least 3/4 of the code units must have a zero high byte.
    if odd_zeros * 4 >= pairs * 3 && even_zeros * 4 < pairs {
        Some(TextEncoding::Utf16Le)
    } else if even_zeros * 4 >= pairs * 3 && odd_zeros * 4 < pairs {
        Some(TextEncoding::Utf16Be)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn sniff_detects_boms() {
        assert_eq!(TextEncoding::sniff(&[0xEF, 0xBB, 0xBF, b'a']), Some(TextEncoding::Utf8));
        assert_eq!(TextEncoding::sniff(&[0xFF, 0xFE, b'a', 0]), Some(TextEncoding::Utf16Le));
        assert_eq!(TextEncoding::sniff(&[0xFE, 0xFF, 0, b'a']), Some(TextEncoding::Utf16Be));
    }

    #[test]
    fn sniff_plain_ascii_is_utf8() {
        assert_eq!(TextEncoding::sniff(b"[07/29/2025 - 01:00:00PM] hi\n"), Some(TextEncoding::Utf8));
    }

    #[test]
    fn sniff_invalid_utf8_falls_back_to_latin1() {
        assert_eq!(TextEncoding::sniff(&[b'a', 0xE9, b'b', b'\n']), Some(TextEncoding::Latin1));
    }

    #[test]
    fn sniff_truncated_multibyte_is_utf8() {
        let mut bytes = "caf\u{e9}".as_bytes().to_vec();
        bytes.pop();
        assert_eq!(TextEncoding::sniff(&bytes), Some(TextEncoding::Utf8));
    }

    #[test]
    fn sniff_bomless_utf16() {
        assert_eq!(TextEncoding::sniff(&utf16le("hello world\n")), Some(TextEncoding::Utf16Le));
    }

    #[test]
    fn sniff_empty_is_undecided() {
        assert_eq!(TextEncoding::sniff(&[]), None);
    }

    #[test]
    fn decode_utf16_roundtrips_text() {
        let bytes = utf16le("a\nb\n");
        assert_eq!(TextEncoding::Utf16Le.decode(&bytes), "a\nb\n");
        assert_eq!(TextEncoding::Utf16Le.end_of_last_line(&bytes), Some(bytes.len()));
    }

    #[test]
    fn end_of_last_line_ignores_trailing_fragment() {
        assert_eq!(TextEncoding::Utf8.end_of_last_line(b"one\ntwo"), Some(4));
        assert_eq!(TextEncoding::Utf8.end_of_last_line(b"partial"), None);
    }

    #[test]
    fn labels_resolve_case_insensitively() {
        assert_eq!(TextEncoding::from_label("UTF-8"), Some(TextEncoding::Utf8));
        assert_eq!(TextEncoding::from_label("Windows-1252"), Some(TextEncoding::Latin1));
        assert_eq!(TextEncoding::from_label("ebcdic"), None);
    }
}
