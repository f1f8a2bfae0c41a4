use std::fmt;

use anyhow::{Result, anyhow};
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8, UTF_16BE, UTF_16LE, WINDOWS_1252};

use crate::policy::CharsetKind;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: [u8; 2] = [0xFF, 0xFE];
const UTF16BE_BOM: [u8; 2] = [0xFE, 0xFF];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    Override,
    Bom,
    Detector,
    AssumedUtf8,
}

impl fmt::Display for EncodingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EncodingSource::Override => "override",
            EncodingSource::Bom => "bom",
            EncodingSource::Detector => "detector",
            EncodingSource::AssumedUtf8 => "assumed-utf8",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct EncodingDecision {
    pub encoding: &'static Encoding,
    pub source: EncodingSource,
}

#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub had_errors: bool,
    pub decision: EncodingDecision,
}

/// How a file's bytes become text: an explicit override, or BOM → UTF-8
/// validation → statistical detection.
#[derive(Debug, Clone)]
pub struct EncodingStrategy {
    override_encoding: Option<&'static Encoding>,
    override_label: Option<String>,
}

impl EncodingStrategy {
    pub fn new(override_label: Option<&str>) -> Result<Self> {
        if let Some(label) = override_label {
            let trimmed = label.trim();
            let encoding = Encoding::for_label(trimmed.as_bytes())
                .ok_or_else(|| anyhow!("unknown encoding override '{trimmed}'"))?;
            Ok(Self {
                override_encoding: Some(encoding),
                override_label: Some(trimmed.to_string()),
            })
        } else {
            Ok(Self {
                override_encoding: None,
                override_label: None,
            })
        }
    }

    pub fn describe(&self) -> String {
        if let (Some(label), Some(enc)) = (&self.override_label, self.override_encoding) {
            format!(
                "override '{}' ({}), auto-detect disabled",
                label,
                enc.name()
            )
        } else {
            "auto-detect (BOM → detector → UTF-8)".to_string()
        }
    }

    pub fn decide(&self, bytes: &[u8]) -> EncodingDecision {
        if let Some(encoding) = self.override_encoding {
            return EncodingDecision {
                encoding,
                source: EncodingSource::Override,
            };
        }

        detect_auto(bytes)
    }

    pub fn decode(&self, bytes: &[u8]) -> DecodedText {
        let decision = self.decide(bytes);
        let (cow, _encoding_used, had_errors) = decision.encoding.decode(bytes);
        DecodedText {
            text: cow.into_owned(),
            had_errors,
            decision,
        }
    }
}

fn detect_auto(bytes: &[u8]) -> EncodingDecision {
    if let Some(encoding) = detect_bom(bytes) {
        return EncodingDecision {
            encoding,
            source: EncodingSource::Bom,
        };
    }

    if std::str::from_utf8(bytes).is_ok() {
        return EncodingDecision {
            encoding: UTF_8,
            source: EncodingSource::AssumedUtf8,
        };
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);

    EncodingDecision {
        encoding,
        source: EncodingSource::Detector,
    }
}

fn detect_bom(bytes: &[u8]) -> Option<&'static Encoding> {
    if bytes.starts_with(&UTF8_BOM) {
        return Some(UTF_8);
    }
    if bytes.starts_with(&UTF16LE_BOM) {
        return Some(UTF_16LE);
    }
    if bytes.starts_with(&UTF16BE_BOM) {
        return Some(UTF_16BE);
    }

    None
}

/// The concrete encoding behind a policy charset, plus whether files written
/// in it carry a byte-order mark. latin1 lands on windows-1252, which is
/// where encoding_rs folds ISO-8859-1.
pub fn charset_encoding(charset: CharsetKind) -> (&'static Encoding, bool) {
    match charset {
        CharsetKind::Latin1 => (WINDOWS_1252, false),
        CharsetKind::Utf8 => (UTF_8, false),
        CharsetKind::Utf8Bom => (UTF_8, true),
        CharsetKind::Utf16Le => (UTF_16LE, true),
        CharsetKind::Utf16Be => (UTF_16BE, true),
    }
}

/// Encodes text for on-disk storage in the given charset, BOM included where
/// the charset calls for one. encoding_rs only encodes toward
/// ASCII-compatible encodings, so the UTF-16 variants are serialized here.
pub fn encode_text(text: &str, charset: CharsetKind) -> Vec<u8> {
    match charset {
        CharsetKind::Utf16Le => encode_utf16(text, &UTF16LE_BOM, u16::to_le_bytes),
        CharsetKind::Utf16Be => encode_utf16(text, &UTF16BE_BOM, u16::to_be_bytes),
        _ => {
            let (encoding, with_bom) = charset_encoding(charset);
            let mut out = Vec::with_capacity(text.len() + 3);
            if with_bom {
                out.extend_from_slice(&UTF8_BOM);
            }
            out.extend_from_slice(&encoding.encode(text).0);
            out
        }
    }
}

fn encode_utf16(text: &str, bom: &[u8], serialize: fn(u16) -> [u8; 2]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bom.len() + text.len() * 2);
    out.extend_from_slice(bom);
    for unit in text.encode_utf16() {
        out.extend_from_slice(&serialize(unit));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_validation() {
        let strategy = EncodingStrategy::new(Some("utf-16le")).expect("valid encoding");
        assert_eq!(strategy.override_label.as_deref(), Some("utf-16le"));
        assert_eq!(strategy.decide(b"abc").source.to_string(), "override");
    }

    #[test]
    fn utf8_detection_without_bom() {
        let data = b"hello world";
        let decision = detect_auto(data);
        assert_eq!(decision.source, EncodingSource::AssumedUtf8);
        assert_eq!(decision.encoding.name(), "UTF-8");
    }

    #[test]
    fn bom_detection_takes_precedence() {
        let data = [0xFF, 0xFE, 0x61, 0x00];
        let decision = detect_auto(&data);
        assert_eq!(decision.source, EncodingSource::Bom);
        assert_eq!(decision.encoding.name(), "UTF-16LE");
    }

    #[test]
    fn charset_mapping_matches_policy_names() {
        assert_eq!(
            charset_encoding(CharsetKind::Latin1).0.name(),
            "windows-1252"
        );
        assert_eq!(charset_encoding(CharsetKind::Utf8), (UTF_8, false));
        assert_eq!(charset_encoding(CharsetKind::Utf8Bom), (UTF_8, true));
        assert_eq!(charset_encoding(CharsetKind::Utf16Le), (UTF_16LE, true));
        assert_eq!(charset_encoding(CharsetKind::Utf16Be), (UTF_16BE, true));
    }

    #[test]
    fn utf8_bom_round_trip() {
        let bytes = encode_text("hi", CharsetKind::Utf8Bom);
        assert_eq!(bytes, vec![0xEF, 0xBB, 0xBF, b'h', b'i']);
        let strategy = EncodingStrategy::new(None).expect("no override");
        assert_eq!(strategy.decode(&bytes).text, "hi");
    }

    #[test]
    fn utf16le_carries_bom_and_units() {
        let bytes = encode_text("a", CharsetKind::Utf16Le);
        assert_eq!(bytes, vec![0xFF, 0xFE, 0x61, 0x00]);
    }

    #[test]
    fn utf16be_carries_bom_and_units() {
        let bytes = encode_text("a", CharsetKind::Utf16Be);
        assert_eq!(bytes, vec![0xFE, 0xFF, 0x00, 0x61]);
    }
}
