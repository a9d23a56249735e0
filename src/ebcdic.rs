//! EBCDIC character maps.
//!
//! The host speaks EBCDIC; the rendering side speaks ISO-8859-1. A [`CharMap`]
//! translates single bytes both ways. Code page 037 (US/Canada) is the base;
//! the other Latin-1 country pages are stored as the cells where they differ
//! from it.

use once_cell::sync::Lazy;

use crate::error::{ConfigError, ConfigResult};

/// EBCDIC CP037 to ISO-8859-1
const CP037_TO_LATIN1: [u8; 256] = [
    0x00, 0x01, 0x02, 0x03, 0x9C, 0x09, 0x86, 0x7F, 0x97, 0x8D, 0x8E, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
    0x10, 0x11, 0x12, 0x13, 0x9D, 0x85, 0x08, 0x87, 0x18, 0x19, 0x92, 0x8F, 0x1C, 0x1D, 0x1E, 0x1F,
    0x80, 0x81, 0x82, 0x83, 0x84, 0x0A, 0x17, 0x1B, 0x88, 0x89, 0x8A, 0x8B, 0x8C, 0x05, 0x06, 0x07,
    0x90, 0x91, 0x16, 0x93, 0x94, 0x95, 0x96, 0x04, 0x98, 0x99, 0x9A, 0x9B, 0x14, 0x15, 0x9E, 0x1A,
    0x20, 0xA0, 0xE2, 0xE4, 0xE0, 0xE1, 0xE3, 0xE5, 0xE7, 0xF1, 0xA2, 0x2E, 0x3C, 0x28, 0x2B, 0x7C,
    0x26, 0xE9, 0xEA, 0xEB, 0xE8, 0xED, 0xEE, 0xEF, 0xEC, 0xDF, 0x21, 0x24, 0x2A, 0x29, 0x3B, 0xAC,
    0x2D, 0x2F, 0xC2, 0xC4, 0xC0, 0xC1, 0xC3, 0xC5, 0xC7, 0xD1, 0xA6, 0x2C, 0x25, 0x5F, 0x3E, 0x3F,
    0xF8, 0xC9, 0xCA, 0xCB, 0xC8, 0xCD, 0xCE, 0xCF, 0xCC, 0x60, 0x3A, 0x23, 0x40, 0x27, 0x3D, 0x22,
    0xD8, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0xAB, 0xBB, 0xF0, 0xFD, 0xFE, 0xB1,
    0xB0, 0x6A, 0x6B, 0x6C, 0x6D, 0x6E, 0x6F, 0x70, 0x71, 0x72, 0xAA, 0xBA, 0xE6, 0xB8, 0xC6, 0xA4,
    0xB5, 0x7E, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7A, 0xA1, 0xBF, 0xD0, 0xDD, 0xDE, 0xAE,
    0x5E, 0xA3, 0xA5, 0xB7, 0xA9, 0xA7, 0xB6, 0xBC, 0xBD, 0xBE, 0x5B, 0x5D, 0xAF, 0xA8, 0xB4, 0xD7,
    0x7B, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0xAD, 0xF4, 0xF6, 0xF2, 0xF3, 0xF5,
    0x7D, 0x4A, 0x4B, 0x4C, 0x4D, 0x4E, 0x4F, 0x50, 0x51, 0x52, 0xB9, 0xFB, 0xFC, 0xF9, 0xFA, 0xFF,
    0x5C, 0xF7, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5A, 0xB2, 0xD4, 0xD6, 0xD2, 0xD3, 0xD5,
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0xB3, 0xDB, 0xDC, 0xD9, 0xDA, 0x9F,
];

/// A country code page as `(ebcdic, latin1)` cells that differ from CP037
struct CodePage {
    name: &'static str,
    aliases: &'static [&'static str],
    patch: &'static [(u8, u8)],
}

const CODE_PAGES: &[CodePage] = &[
    CodePage { name: "37", aliases: &["037", "cp037", "en", "us"], patch: &[] },
    CodePage {
        name: "273",
        aliases: &["cp273", "de", "at"],
        patch: &[
            (0x43, 0x7B), (0x4A, 0xC4), (0x4F, 0x21), (0x59, 0x7E), (0x5A, 0xDC), (0x5F, 0x5E),
            (0x63, 0x5B), (0x6A, 0xF6), (0x7C, 0xA7), (0xA1, 0xDF), (0xB0, 0xA2), (0xB5, 0x40),
            (0xBA, 0xAC), (0xBB, 0x7C), (0xC0, 0xE4), (0xCC, 0xA6), (0xD0, 0xFC), (0xDC, 0x7D),
            (0xE0, 0xD6), (0xEC, 0x5C), (0xFC, 0x5D),
        ],
    },
    CodePage {
        name: "277",
        aliases: &["cp277", "dk", "no"],
        patch: &[
            (0x47, 0x7D), (0x4A, 0x23), (0x4F, 0x21), (0x5A, 0xA4), (0x5B, 0xC5), (0x5F, 0x5E),
            (0x67, 0x24), (0x6A, 0xF8), (0x70, 0xA6), (0x7B, 0xC6), (0x7C, 0xD8), (0x80, 0x40),
            (0x9C, 0x7B), (0x9E, 0x5B), (0x9F, 0x5D), (0xA1, 0xFC), (0xB0, 0xA2), (0xBA, 0xAC),
            (0xBB, 0x7C), (0xC0, 0xE6), (0xD0, 0xE5), (0xDC, 0x7E),
        ],
    },
    CodePage {
        name: "278",
        aliases: &["cp278", "fi", "se"],
        patch: &[
            (0x43, 0x7B), (0x47, 0x7D), (0x4A, 0xA7), (0x4F, 0x21), (0x51, 0x60), (0x5A, 0xA4),
            (0x5B, 0xC5), (0x5F, 0x5E), (0x63, 0x23), (0x67, 0x24), (0x6A, 0xF6), (0x79, 0xE9),
            (0x7B, 0xC4), (0x7C, 0xD6), (0x9F, 0x5D), (0xA1, 0xFC), (0xB0, 0xA2), (0xB5, 0x5B),
            (0xBA, 0xAC), (0xBB, 0x7C), (0xC0, 0xE4), (0xCC, 0xA6), (0xD0, 0xE5), (0xDC, 0x7E),
            (0xEC, 0x40),
        ],
    },
    CodePage {
        name: "280",
        aliases: &["cp280", "it"],
        patch: &[
            (0x44, 0x7B), (0x48, 0x5C), (0x4A, 0xB0), (0x4F, 0x21), (0x51, 0x5D), (0x54, 0x7D),
            (0x58, 0x7E), (0x5A, 0xE9), (0x5F, 0x5E), (0x6A, 0xF2), (0x79, 0xF9), (0x7B, 0xA3),
            (0x7C, 0xA7), (0x90, 0x5B), (0xA1, 0xEC), (0xB0, 0xA2), (0xB1, 0x23), (0xB5, 0x40),
            (0xBA, 0xAC), (0xBB, 0x7C), (0xC0, 0xE0), (0xCD, 0xA6), (0xD0, 0xE8), (0xDD, 0x60),
            (0xE0, 0xE7),
        ],
    },
    CodePage {
        name: "284",
        aliases: &["cp284", "es"],
        patch: &[
            (0x49, 0xA6), (0x4A, 0x5B), (0x5A, 0x5D), (0x69, 0x23), (0x6A, 0xF1), (0x7B, 0xD1),
            (0xA1, 0xA8), (0xB0, 0xA2), (0xBA, 0x5E), (0xBB, 0x21), (0xBD, 0x7E),
        ],
    },
    CodePage {
        name: "285",
        aliases: &["cp285", "uk", "gb"],
        // 0xA1 is an overline, which Latin-1 lacks; macron stands in
        patch: &[
            (0x4A, 0x24), (0x5B, 0xA3), (0xA1, 0xAF), (0xB0, 0xA2), (0xB1, 0x5B), (0xBA, 0x5E),
            (0xBC, 0x7E),
        ],
    },
    CodePage {
        name: "297",
        aliases: &["cp297", "fr"],
        patch: &[
            (0x44, 0x40), (0x48, 0x5C), (0x4A, 0xB0), (0x4F, 0x21), (0x51, 0x7B), (0x54, 0x7D),
            (0x5A, 0xA7), (0x5F, 0x5E), (0x6A, 0xF9), (0x79, 0xB5), (0x7B, 0xA3), (0x7C, 0xE0),
            (0x90, 0x5B), (0xA0, 0x60), (0xA1, 0xA8), (0xB0, 0xA2), (0xB1, 0x23), (0xB5, 0x5D),
            (0xBA, 0xAC), (0xBB, 0x7C), (0xBD, 0x7E), (0xC0, 0xE9), (0xD0, 0xE8), (0xDD, 0xA6),
            (0xE0, 0xE7),
        ],
    },
    CodePage {
        name: "500",
        aliases: &["cp500", "be", "ch"],
        patch: &[
            (0x4A, 0x5B), (0x4F, 0x21), (0x5A, 0x5D), (0x5F, 0x5E), (0xB0, 0xA2), (0xBA, 0xAC),
            (0xBB, 0x7C),
        ],
    },
    CodePage {
        name: "871",
        aliases: &["cp871", "is"],
        patch: &[
            (0x4A, 0xFE), (0x4F, 0x21), (0x5A, 0xC6), (0x5F, 0xD6), (0x79, 0xF0), (0x7C, 0xD0),
            (0x8C, 0x60), (0x8E, 0x7B), (0x9C, 0x7D), (0x9E, 0x5D), (0xA1, 0xF6), (0xAC, 0x40),
            (0xAE, 0x5B), (0xB0, 0xA2), (0xBA, 0xAC), (0xBB, 0x7C), (0xBE, 0x5C), (0xC0, 0xDE),
            (0xCC, 0x7E), (0xD0, 0xE6), (0xE0, 0xB4), (0xEC, 0x5E),
        ],
    },
];

struct Tables {
    to_local: [u8; 256],
    to_remote: [u8; 256],
}

/// Built once, in `CODE_PAGES` order
static TABLES: Lazy<Vec<Tables>> = Lazy::new(|| {
    CODE_PAGES
        .iter()
        .map(|page| {
            let mut to_local = CP037_TO_LATIN1;
            for &(ebcdic, local) in page.patch {
                to_local[ebcdic as usize] = local;
            }
            let to_remote = invert(&to_local);
            Tables { to_local, to_remote }
        })
        .collect()
});

fn invert(table: &[u8; 256]) -> [u8; 256] {
    let mut out = [0u8; 256];
    for (ebcdic, &local) in table.iter().enumerate() {
        out[local as usize] = ebcdic as u8;
    }
    out
}

/// EBCDIC blank
pub const EBCDIC_BLANK: u8 = 0x40;

/// Bytes 0x20..=0x3F in screen data are display attributes, not characters.
#[inline(always)]
pub fn is_attribute(byte: u8) -> bool {
    (byte & 0xE0) == 0x20
}

/// Bytes that may be written to the screen as data or attribute.
#[inline]
pub fn is_displayable(byte: u8) -> bool {
    byte == 0x00 || byte >= 0x40 || is_attribute(byte)
}

/// Single-byte translation between host EBCDIC and local ISO-8859-1.
#[derive(Debug, Clone, Copy)]
pub struct CharMap {
    name: &'static str,
    to_local: &'static [u8; 256],
    to_remote: &'static [u8; 256],
}

impl CharMap {
    /// Look up a map by code page number (`273`, `cp273`) or country code
    /// (`de`).
    pub fn by_name(name: &str) -> ConfigResult<CharMap> {
        let wanted = name.trim().to_ascii_lowercase();
        CODE_PAGES
            .iter()
            .position(|page| page.name == wanted || page.aliases.contains(&wanted.as_str()))
            .map(CharMap::page)
            .ok_or_else(|| ConfigError::InvalidParameter {
                parameter: "map".to_string(),
                value: wanted,
                reason: "unknown character map".to_string(),
            })
    }

    /// Names of the built-in maps
    pub fn names() -> impl Iterator<Item = &'static str> {
        CODE_PAGES.iter().map(|page| page.name)
    }

    pub fn cp037() -> CharMap {
        CharMap::page(0)
    }

    fn page(index: usize) -> CharMap {
        let tables = &TABLES[index];
        CharMap {
            name: CODE_PAGES[index].name,
            to_local: &tables.to_local,
            to_remote: &tables.to_remote,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// EBCDIC byte to ISO-8859-1 byte
    #[inline(always)]
    pub fn to_local(&self, ebcdic: u8) -> u8 {
        self.to_local[ebcdic as usize]
    }

    /// ISO-8859-1 byte to EBCDIC byte
    #[inline(always)]
    pub fn to_remote(&self, local: u8) -> u8 {
        self.to_remote[local as usize]
    }

    pub fn to_local_char(&self, ebcdic: u8) -> char {
        self.to_local(ebcdic) as char
    }

    /// `None` for characters outside ISO-8859-1
    pub fn to_remote_char(&self, c: char) -> Option<u8> {
        u8::try_from(u32::from(c)).ok().map(|b| self.to_remote(b))
    }

    /// Render a run of screen bytes. Nulls and attributes show as spaces.
    pub fn to_local_string(&self, ebcdic: &[u8]) -> String {
        ebcdic
            .iter()
            .map(|&b| {
                if b == 0x00 || is_attribute(b) {
                    ' '
                } else {
                    self.to_local_char(b)
                }
            })
            .collect()
    }

    pub fn to_remote_bytes(&self, text: &str) -> Vec<u8> {
        text.chars()
            .map(|c| self.to_remote_char(c).unwrap_or(EBCDIC_BLANK))
            .collect()
    }
}

impl Default for CharMap {
    fn default() -> Self {
        CharMap::cp037()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cp037_letters_and_digits() {
        let map = CharMap::cp037();
        assert_eq!(map.to_local_char(0xC1), 'A');
        assert_eq!(map.to_local_char(0x81), 'a');
        assert_eq!(map.to_local_char(0xF0), '0');
        assert_eq!(map.to_local_char(0x40), ' ');
        assert_eq!(map.to_remote_char('Z'), Some(0xE9));
        assert_eq!(map.to_remote_char('-'), Some(0x60));
        assert_eq!(map.to_remote_char('\u{263A}'), None);
    }

    #[test]
    fn test_cp037_is_a_permutation() {
        let map = CharMap::cp037();
        for b in 0..=255u8 {
            assert_eq!(map.to_remote(map.to_local(b)), b);
        }
    }

    #[test]
    fn test_attribute_bytes() {
        assert!(is_attribute(0x20));
        assert!(is_attribute(0x3F));
        assert!(!is_attribute(0x40));
        assert!(is_displayable(0x00));
        assert!(!is_displayable(0x1C));
    }

    #[test]
    fn test_to_local_string_hides_attributes() {
        let map = CharMap::cp037();
        assert_eq!(map.to_local_string(&[0x20, 0xC8, 0xC9, 0x00]), " HI ");
    }

    #[test]
    fn test_unknown_map_name() {
        assert!(CharMap::by_name("37").is_ok());
        assert!(CharMap::by_name("cp1047").is_err());
    }

    #[test]
    fn test_every_map_is_a_permutation() {
        for name in CharMap::names() {
            let map = CharMap::by_name(name).unwrap();
            assert_eq!(map.name(), name);
            for b in 0..=255u8 {
                assert_eq!(map.to_remote(map.to_local(b)), b, "map {name} byte {b:#04X}");
            }
        }
    }

    #[test]
    fn test_country_pages() {
        let german = CharMap::by_name("de").unwrap();
        assert_eq!(german.name(), "273");
        assert_eq!(german.to_local_char(0x4A), 'Ä');
        assert_eq!(german.to_remote_char('ß'), Some(0xA1));
        assert_eq!(german.to_remote_char('@'), Some(0xB5));

        let intl = CharMap::by_name("CP500").unwrap();
        assert_eq!(intl.to_local_char(0x4A), '[');
        assert_eq!(intl.to_local_char(0x5A), ']');

        let uk = CharMap::by_name("285").unwrap();
        assert_eq!(uk.to_local_char(0x5B), '£');
        assert_eq!(uk.to_local_char(0x4A), '$');

        let french = CharMap::by_name("297").unwrap();
        assert_eq!(french.to_local_char(0x7C), 'à');

        // letters and digits are the same on every page
        for name in CharMap::names() {
            let map = CharMap::by_name(name).unwrap();
            assert_eq!(map.to_local_char(0xC1), 'A');
            assert_eq!(map.to_local_char(0xF9), '9');
        }
    }
}
