use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

use crate::types::DetectorId;

/// A registered byte signature (spec §3, C2).
///
/// `position >= 0` pins the pattern to that byte offset in the payload;
/// `-1` means it may match anywhere.
struct PatternEntry {
    position: i32,
    owner: DetectorId,
    size: usize,
}

/// A ranked candidate produced by [`PatternTable::find_all`] (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceMatch {
    pub detector: DetectorId,
    pub count: u32,
    pub size: usize,
}

/// One multi-pattern automaton per transport (spec §4.2).
///
/// Built with [`aho-corasick`](aho_corasick), the ecosystem's Aho–Corasick
/// implementation; `prep()` is the `finalize`-style freeze into a searchable
/// automaton the original's `prep()` call maps onto directly.
pub struct PatternTable {
    raw_patterns: Vec<Vec<u8>>,
    entries: Vec<PatternEntry>,
    automaton: Option<AhoCorasick>,
}

impl PatternTable {
    pub fn new() -> Self {
        Self {
            raw_patterns: Vec::new(),
            entries: Vec::new(),
            automaton: None,
        }
    }

    pub fn add(&mut self, bytes: &[u8], position: i32, owner: DetectorId) {
        self.raw_patterns.push(bytes.to_vec());
        self.entries.push(PatternEntry {
            position,
            owner,
            size: bytes.len(),
        });
        self.automaton = None;
    }

    pub fn prep(&mut self) {
        if self.raw_patterns.is_empty() {
            self.automaton = None;
            return;
        }
        self.automaton = Some(
            AhoCorasickBuilder::new()
                .match_kind(MatchKind::Standard)
                .build(&self.raw_patterns)
                .expect("pattern automaton construction"),
        );
    }

    /// Runs every pattern against `buffer`, applies the positional filter,
    /// coalesces per-detector hits, and returns the ranked candidate list
    /// sorted by `(count desc, size desc)` (spec §4.2).
    pub fn find_all(&self, buffer: &[u8]) -> Vec<ServiceMatch> {
        let Some(automaton) = &self.automaton else {
            return Vec::new();
        };

        let mut by_detector: Vec<(DetectorId, u32, usize)> = Vec::new();
        for m in automaton.find_iter(buffer) {
            let entry = &self.entries[m.pattern().as_usize()];
            if entry.position >= 0 && entry.position as usize != m.start() {
                continue;
            }
            match by_detector.iter_mut().find(|(d, _, _)| *d == entry.owner) {
                Some((_, count, size)) => {
                    *count += 1;
                    *size = (*size).max(entry.size);
                }
                None => by_detector.push((entry.owner, 1, entry.size)),
            }
        }

        let mut matches: Vec<ServiceMatch> = by_detector
            .into_iter()
            .map(|(detector, count, size)| ServiceMatch { detector, count, size })
            .collect();
        matches.sort_by(|a, b| b.count.cmp(&a.count).then(b.size.cmp(&a.size)));
        matches
    }
}

impl Default for PatternTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_by_count_then_size() {
        let mut table = PatternTable::new();
        let a = DetectorId(0);
        let b = DetectorId(1);
        // A: 3 patterns, largest 4 bytes.
        table.add(b"AAAA", -1, a);
        table.add(b"BBB", -1, a);
        table.add(b"CC", -1, a);
        // B: 5 patterns, largest 2 bytes.
        for bytes in [&b"D1"[..], b"D2", b"D3", b"D4", b"D5"] {
            table.add(bytes, -1, b);
        }
        table.prep();

        let payload = b"AAAA BBB CC D1 D2 D3 D4 D5";
        let ranked = table.find_all(payload);
        assert_eq!(ranked[0].detector, b);
        assert_eq!(ranked[0].count, 5);
        assert_eq!(ranked[1].detector, a);
        assert_eq!(ranked[1].count, 3);
    }

    #[test]
    fn positional_filter_discards_off_offset_hits() {
        let mut table = PatternTable::new();
        let d = DetectorId(0);
        table.add(b"GET", 0, d);
        table.prep();

        assert_eq!(table.find_all(b"GET /x").len(), 1);
        assert!(table.find_all(b"xxGET /x").is_empty());
    }

    #[test]
    fn empty_table_returns_no_matches() {
        let mut table = PatternTable::new();
        table.prep();
        assert!(table.find_all(b"anything").is_empty());
    }
}
