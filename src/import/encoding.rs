//! Text encoding detection for uploaded price lists.
//!
//! Files arrive from Excel "Save as CSV" on Russian-locale Windows
//! (Windows-1251), from old 1C exports (KOI8-R), from Google Sheets (UTF-8)
//! and occasionally as UTF-16 with a BOM. Single-byte candidates are told
//! apart by decoding with each and scoring the result.
use serde::Serialize;

const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Windows1251,
    Koi8R,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Utf16Le => "utf-16le",
            Encoding::Utf16Be => "utf-16be",
            Encoding::Windows1251 => "windows-1251",
            Encoding::Koi8R => "koi8-r",
        }
    }
}

/// Windows-1251, bytes 0x80..=0xBF. 0x98 is unassigned.
const CP1251_HIGH: [char; 64] = [
    '\u{0402}', '\u{0403}', '\u{201A}', '\u{0453}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{20AC}', '\u{2030}', '\u{0409}', '\u{2039}', '\u{040A}', '\u{040C}', '\u{040B}', '\u{040F}',
    '\u{0452}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    REPLACEMENT, '\u{2122}', '\u{0459}', '\u{203A}', '\u{045A}', '\u{045C}', '\u{045B}', '\u{045F}',
    '\u{00A0}', '\u{040E}', '\u{045E}', '\u{0408}', '\u{00A4}', '\u{0490}', '\u{00A6}', '\u{00A7}',
    '\u{0401}', '\u{00A9}', '\u{0404}', '\u{00AB}', '\u{00AC}', '\u{00AD}', '\u{00AE}', '\u{0407}',
    '\u{00B0}', '\u{00B1}', '\u{0406}', '\u{0456}', '\u{0491}', '\u{00B5}', '\u{00B6}', '\u{00B7}',
    '\u{0451}', '\u{2116}', '\u{0454}', '\u{00BB}', '\u{0458}', '\u{0405}', '\u{0455}', '\u{0457}',
];

/// KOI8-R letters, bytes 0xC0..=0xFF.
const KOI8R_LETTERS: &str = "юабцдефгхийклмнопярстужвьызшэщчъЮАБЦДЕФГХИЙКЛМНОПЯРСТУЖВЬЫЗШЭЩЧЪ";

fn decode_cp1251(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0x00..=0x7F => b as char,
            0x80..=0xBF => CP1251_HIGH[(b - 0x80) as usize],
            // А..я are contiguous from U+0410
            _ => char::from_u32(0x0410 + u32::from(b - 0xC0)).unwrap_or(REPLACEMENT),
        })
        .collect()
}

fn decode_koi8r(bytes: &[u8]) -> String {
    let letters: Vec<char> = KOI8R_LETTERS.chars().collect();
    bytes
        .iter()
        .map(|&b| match b {
            0x00..=0x7F => b as char,
            0xA3 => 'ё',
            0xB3 => 'Ё',
            0x9A => '\u{00A0}',
            // Pseudographics are not expected in price lists.
            0x80..=0xBF => REPLACEMENT,
            _ => letters[(b - 0xC0) as usize],
        })
        .collect()
}

fn decode_utf16(bytes: &[u8], little_endian: bool) -> String {
    let units = bytes.chunks_exact(2).map(|pair| {
        if little_endian {
            u16::from_le_bytes([pair[0], pair[1]])
        } else {
            u16::from_be_bytes([pair[0], pair[1]])
        }
    });
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(REPLACEMENT))
        .collect()
}

/// Plausibility of `text` as Russian prose: frequent lowercase letters score,
/// case flips inside a word and undecodable bytes cost.
pub fn score(text: &str) -> i64 {
    const FREQUENT: &str = "оеаинтсрвлкмдпу";
    let mut total = 0_i64;
    let mut prev_lower = false;
    for ch in text.chars() {
        if ch == REPLACEMENT {
            total -= 5;
            prev_lower = false;
            continue;
        }
        if FREQUENT.contains(ch) {
            total += 2;
        } else if ('а'..='я').contains(&ch) || ch == 'ё' {
            total += 1;
        }
        if prev_lower && ch.is_uppercase() {
            total -= 3;
        }
        prev_lower = ch.is_lowercase();
    }
    total
}

/// Detect the encoding of `bytes` and decode them. BOMs are stripped.
pub fn decode(bytes: &[u8]) -> (String, Encoding) {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return (String::from_utf8_lossy(rest).into_owned(), Encoding::Utf8);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return (decode_utf16(rest, true), Encoding::Utf16Le);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return (decode_utf16(rest, false), Encoding::Utf16Be);
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), Encoding::Utf8);
    }

    let cp1251 = decode_cp1251(bytes);
    let koi8 = decode_koi8r(bytes);
    if score(&koi8) > score(&cp1251) {
        (koi8, Encoding::Koi8R)
    } else {
        (cp1251, Encoding::Windows1251)
    }
}
