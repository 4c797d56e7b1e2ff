//! Entry name decoding and reference reconciliation
//!
//! Legacy tools write entry names in whatever code page the author's machine
//! happened to use, while manifests (EPUB OPF hrefs, comic indexes) usually
//! carry UTF-8, sometimes percent-encoded. [`NameReconciler`] brute-forces the
//! charsets of a [`CharsetRegistry`] in a fixed order and returns the first
//! entry that matches. The tie-break is deliberately "first match in registry
//! order"; [`NameReconciler::candidates`] exposes every match for callers that
//! want to decide for themselves.

use crate::entry::ContainerEntry;
use crate::error::{ArchiveError, Result};
use encoding_rs::Encoding;
use percent_encoding::percent_decode_str;
use std::borrow::Cow;

/// Ordered list of charsets tried during name recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharsetRegistry {
    charsets: Vec<&'static Encoding>,
}

impl Default for CharsetRegistry {
    fn default() -> Self {
        Self {
            charsets: vec![
                encoding_rs::UTF_8,
                encoding_rs::WINDOWS_1252,
                encoding_rs::ISO_8859_2,
                encoding_rs::ISO_8859_15,
                encoding_rs::WINDOWS_1250,
                encoding_rs::WINDOWS_1251,
                encoding_rs::KOI8_R,
                encoding_rs::IBM866,
                encoding_rs::SHIFT_JIS,
                encoding_rs::EUC_JP,
                encoding_rs::GBK,
                encoding_rs::GB18030,
                encoding_rs::BIG5,
                encoding_rs::EUC_KR,
                encoding_rs::WINDOWS_1253,
                encoding_rs::WINDOWS_1254,
                encoding_rs::WINDOWS_1255,
                encoding_rs::WINDOWS_1256,
                encoding_rs::WINDOWS_874,
                encoding_rs::MACINTOSH,
            ],
        }
    }
}

impl CharsetRegistry {
    pub fn new(charsets: Vec<&'static Encoding>) -> Self {
        Self { charsets }
    }

    /// Build a registry from WHATWG labels ("utf-8", "shift_jis", "latin1", ...)
    pub fn from_labels(labels: &[&str]) -> Result<Self> {
        let charsets = labels
            .iter()
            .map(|label| {
                Encoding::for_label(label.as_bytes()).ok_or_else(|| {
                    ArchiveError::UnsupportedOperation(format!("unknown charset label {:?}", label))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { charsets })
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static Encoding> + '_ {
        self.charsets.iter().copied()
    }

    /// First non-UTF-8 charset, used to decode names that are not valid UTF-8
    pub fn legacy_fallback(&self) -> &'static Encoding {
        self.iter()
            .find(|c| *c != encoding_rs::UTF_8)
            .unwrap_or(encoding_rs::WINDOWS_1252)
    }
}

/// Decode a stored entry name into its display path
///
/// `utf8_flag` is general purpose bit 11. Without it the handle's override
/// wins, then plain UTF-8 if the bytes are valid, then the registry fallback.
pub(crate) fn decode_entry_name(
    raw: &[u8],
    utf8_flag: bool,
    charset_override: Option<&'static Encoding>,
    registry: &CharsetRegistry,
) -> String {
    if utf8_flag {
        return String::from_utf8_lossy(raw).into_owned();
    }
    if let Some(charset) = charset_override {
        return charset.decode_without_bom_handling(raw).0.into_owned();
    }
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => registry
            .legacy_fallback()
            .decode_without_bom_handling(raw)
            .0
            .into_owned(),
    }
}

/// Matches declared references against physical entry names
pub struct NameReconciler<'a> {
    registry: &'a CharsetRegistry,
}

impl<'a> NameReconciler<'a> {
    pub fn new(registry: &'a CharsetRegistry) -> Self {
        Self { registry }
    }

    /// Resolve `reference` to the first entry matching under any charset
    ///
    /// Returns `EncodingAmbiguous` with no candidates when nothing matches.
    pub fn resolve<'e>(
        &self,
        reference: &str,
        entries: &'e [ContainerEntry],
    ) -> Result<&'e ContainerEntry> {
        for charset in self.registry.iter() {
            if let Some(entry) = entries
                .iter()
                .filter(|e| !e.is_directory)
                .find(|e| matches_under(charset, reference, e))
            {
                return Ok(entry);
            }
        }
        Err(ArchiveError::EncodingAmbiguous {
            reference: reference.to_string(),
            candidates: Vec::new(),
        })
    }

    /// Every entry matching `reference`, in the order `resolve` would find them
    pub fn candidates<'e>(
        &self,
        reference: &str,
        entries: &'e [ContainerEntry],
    ) -> Vec<&'e ContainerEntry> {
        let mut found: Vec<&ContainerEntry> = Vec::new();
        for charset in self.registry.iter() {
            for entry in entries.iter().filter(|e| !e.is_directory) {
                if matches_under(charset, reference, entry)
                    && !found.iter().any(|f| f.path == entry.path)
                {
                    found.push(entry);
                }
            }
        }
        found
    }
}

fn matches_under(charset: &'static Encoding, reference: &str, entry: &ContainerEntry) -> bool {
    // (a) raw name decoded with this charset equals the reference
    if let Some(decoded) = strict_decode(charset, &entry.raw_name) {
        if decoded == reference {
            return true;
        }
    }

    // (b) reference percent-decoded with this charset equals the UTF-8 name
    let Ok(utf8_name) = std::str::from_utf8(&entry.raw_name) else {
        return false;
    };
    let unescaped: Cow<[u8]> = percent_decode_str(reference).into();
    strict_decode(charset, &unescaped).is_some_and(|decoded| decoded == utf8_name)
}

fn strict_decode<'b>(charset: &'static Encoding, bytes: &'b [u8]) -> Option<Cow<'b, str>> {
    charset.decode_without_bom_handling_and_without_replacement(bytes)
}
