use std::collections::BTreeMap;

use log::warn;

use crate::data::model::{DataKind, ScanDirection};
use crate::error::{Result, SpmError};

// ---------------------------------------------------------------------------
// Signal-token table
// ---------------------------------------------------------------------------

/// Signal names that can appear embedded in SPM filenames.
pub const DEFAULT_SIGNAL_TOKENS: &[&str] = &[
    "Topo", "Lia1X", "Lia1Y", "Lia1R", "Lia2X", "Lia2Y", "Lia2R", "Lia3X",
    "Lia3Y", "Lia3R", "It_to_PC", "InA", "QPlus", "Bias", "Frequency",
    "Drive", "Phase", "df",
];

/// Immutable table of known signal tokens, ordered longest-first so a longer
/// name ("Lia1R") always wins over a substring it contains.
#[derive(Debug, Clone)]
pub struct SignalTokens {
    tokens: Vec<String>,
}

impl SignalTokens {
    pub fn new(tokens: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        tokens.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        SignalTokens { tokens }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }
}

impl Default for SignalTokens {
    fn default() -> Self {
        SignalTokens::new(DEFAULT_SIGNAL_TOKENS.iter().copied())
    }
}

// ---------------------------------------------------------------------------
// Signal / direction extraction
// ---------------------------------------------------------------------------

/// Signal name and scan direction recovered from a filename stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalInfo {
    pub signal: String,
    pub direction: Option<ScanDirection>,
}

impl SignalInfo {
    /// Short alias: signal name plus the direction suffix when detected.
    pub fn alias(&self) -> String {
        match self.direction {
            Some(dir) => format!("{}{}", self.signal, dir.suffix()),
            None => self.signal.clone(),
        }
    }
}

/// Recover the signal name and scan direction from a filename stem.
///
/// A trailing `Fwd`/`Bwd` is stripped first and becomes the direction tag.
/// The remainder is matched against the known-token table (longest token
/// first). Failing that, a trailing `_Matrix` is stripped and the last
/// alphanumeric run anchored to the end of the stem is taken, with leading
/// digits removed; a purely numeric run is kept verbatim (numeric channel
/// ids).
pub fn derive_signal(stem: &str, tokens: &SignalTokens) -> SignalInfo {
    let (base, direction) = if let Some(rest) = stem.strip_suffix("Fwd") {
        (rest, Some(ScanDirection::Forward))
    } else if let Some(rest) = stem.strip_suffix("Bwd") {
        (rest, Some(ScanDirection::Backward))
    } else {
        (stem, None)
    };

    for token in tokens.iter() {
        if base.contains(token) {
            return SignalInfo {
                signal: token.to_string(),
                direction,
            };
        }
    }

    let base = base.strip_suffix("_Matrix").unwrap_or(base);
    let run = {
        let tail = trailing_alnum_run(base);
        if tail.is_empty() {
            last_alnum_run(base)
        } else {
            tail
        }
    };

    let without_digits = run.trim_start_matches(|c: char| c.is_ascii_digit());
    let signal = if !without_digits.is_empty() {
        without_digits.to_string()
    } else if !run.is_empty() {
        run.to_string()
    } else {
        "unknown".to_string()
    };

    SignalInfo { signal, direction }
}

/// Longest alphanumeric suffix of `s`.
fn trailing_alnum_run(s: &str) -> &str {
    let start = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphanumeric())
        .last()
        .map(|(i, _)| i);
    match start {
        Some(i) => &s[i..],
        None => "",
    }
}

/// Last maximal alphanumeric run anywhere in `s`.
fn last_alnum_run(s: &str) -> &str {
    let mut end = None;
    for (i, c) in s.char_indices().rev() {
        if c.is_ascii_alphanumeric() {
            if end.is_none() {
                end = Some(i + c.len_utf8());
            }
        } else if let Some(e) = end {
            return &s[i + c.len_utf8()..e];
        }
    }
    match end {
        Some(e) => &s[..e],
        None => "",
    }
}

// ---------------------------------------------------------------------------
// Filename-based kind guessing
// ---------------------------------------------------------------------------

/// Kind guessed from a filename substring. A guess, not a classification:
/// callers must treat `Unknown` as exactly that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindGuess {
    Cits,
    Topography,
    Unknown,
}

/// Guess the dataset kind from the filename alone.
pub fn guess_kind_from_filename(name: &str) -> KindGuess {
    let lower = name.to_lowercase();
    if lower.contains("_matrix") || lower.contains("cits") {
        KindGuess::Cits
    } else if lower.contains("topo") {
        KindGuess::Topography
    } else {
        KindGuess::Unknown
    }
}

// ---------------------------------------------------------------------------
// Key registry
// ---------------------------------------------------------------------------

/// Maps canonical full keys (filename stems) to dataset kinds and
/// case-insensitive short aliases to full keys.
///
/// Full keys are unique; alias collisions are non-fatal; the last
/// registration wins and the overwrite is logged.
#[derive(Debug, Default)]
pub struct KeyRegistry {
    kinds: BTreeMap<String, DataKind>,
    aliases: BTreeMap<String, String>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_key(&mut self, full_key: &str, kind: DataKind) {
        if let Some(previous) = self.kinds.insert(full_key.to_string(), kind) {
            warn!("full key '{full_key}' re-registered ({previous} -> {kind})");
        }
    }

    pub fn register_alias(&mut self, alias: &str, full_key: &str) {
        let lowered = alias.to_lowercase();
        if let Some(previous) = self.aliases.insert(lowered, full_key.to_string()) {
            if previous != full_key {
                warn!("alias '{alias}' overwritten: {previous} -> {full_key}");
            }
        }
    }

    /// Resolve a query to a `(full key, kind)` pair.
    ///
    /// Exact full-key matches win; otherwise the lowercased query is looked
    /// up in the alias table. Resolution never triggers a decode.
    pub fn resolve(&self, query: &str) -> Result<(String, DataKind)> {
        if let Some(&kind) = self.kinds.get(query) {
            return Ok((query.to_string(), kind));
        }
        if let Some(full_key) = self.aliases.get(&query.to_lowercase()) {
            if let Some(&kind) = self.kinds.get(full_key) {
                return Ok((full_key.clone(), kind));
            }
        }
        Err(SpmError::NotFound(format!(
            "key '{}' not registered; known keys: {}",
            query,
            self.known_keys().join(", ")
        )))
    }

    pub fn kind_of(&self, full_key: &str) -> Option<DataKind> {
        self.kinds.get(full_key).copied()
    }

    /// All full keys followed by all aliases, sorted within each group.
    pub fn known_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.kinds.keys().cloned().collect();
        keys.extend(self.aliases.keys().cloned());
        keys
    }

    pub fn full_keys_of_kind(&self, kind: DataKind) -> Vec<String> {
        self.kinds
            .iter()
            .filter(|(_, &k)| k == kind)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> SignalTokens {
        SignalTokens::default()
    }

    #[test]
    fn longest_token_wins() {
        // Lia1R must match before any shorter substring could.
        let info = derive_signal("20250521_Janus_13K_113Lia1RFwd", &tokens());
        assert_eq!(info.signal, "Lia1R");
        assert_eq!(info.direction, Some(ScanDirection::Forward));
        assert_eq!(info.alias(), "Lia1RFwd");
    }

    #[test]
    fn direction_suffix_is_stripped_before_matching() {
        let info = derive_signal("sample_TopoBwd", &tokens());
        assert_eq!(info.signal, "Topo");
        assert_eq!(info.direction, Some(ScanDirection::Backward));
        assert_eq!(info.alias(), "TopoBwd");
    }

    #[test]
    fn unknown_signal_falls_back_to_trailing_run() {
        let info = derive_signal("exp_01_113Xyz", &tokens());
        assert_eq!(info.signal, "Xyz");
        assert_eq!(info.direction, None);
    }

    #[test]
    fn numeric_channel_id_kept_verbatim() {
        let info = derive_signal("exp_run_42", &tokens());
        assert_eq!(info.signal, "42");
    }

    #[test]
    fn matrix_suffix_is_stripped_in_fallback() {
        let info = derive_signal("exp_113Zz_Matrix", &tokens());
        assert_eq!(info.signal, "Zz");
    }

    #[test]
    fn kind_guess_from_filename() {
        assert_eq!(guess_kind_from_filename("a_Lia1R_Matrix.dat"), KindGuess::Cits);
        assert_eq!(guess_kind_from_filename("a_TopoFwd.int"), KindGuess::Topography);
        assert_eq!(guess_kind_from_filename("a_pointspec.dat"), KindGuess::Unknown);
    }

    #[test]
    fn registry_resolves_case_insensitively() {
        let mut registry = KeyRegistry::new();
        registry.register_key("sample_TopoFwd", DataKind::Topography);
        registry.register_alias("TopoFwd", "sample_TopoFwd");

        for query in ["sample_TopoFwd", "TOPOFWD", "topofwd"] {
            let (key, kind) = registry.resolve(query).unwrap();
            assert_eq!(key, "sample_TopoFwd");
            assert_eq!(kind, DataKind::Topography);
        }
        assert!(registry.resolve("nope").is_err());
    }

    #[test]
    fn alias_collision_last_write_wins() {
        let mut registry = KeyRegistry::new();
        registry.register_key("first", DataKind::Sts);
        registry.register_key("second", DataKind::Sts);
        registry.register_alias("spec", "first");
        registry.register_alias("spec", "second");
        let (key, _) = registry.resolve("SPEC").unwrap();
        assert_eq!(key, "second");
    }
}
