/// Exhaustive candidate enumeration for brute-force search
///
/// Candidates are produced in ascending length order; within one length
/// the charset forms a lexicographic Cartesian product with the
/// rightmost position varying fastest.
use serde::{Deserialize, Serialize};

/// Character set selection for brute-force search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CharsetMode {
    Numeric,
    Alpha,
    Alphanumeric,
    AllPrintable,
    Custom(String),
}

impl CharsetMode {
    /// Parse a mode name; anything unrecognized is treated as a custom
    /// charset string.
    pub fn parse(name: &str) -> CharsetMode {
        match name.to_ascii_lowercase().as_str() {
            "numeric" => CharsetMode::Numeric,
            "alpha" => CharsetMode::Alpha,
            "alphanumeric" => CharsetMode::Alphanumeric,
            "all" | "printable" => CharsetMode::AllPrintable,
            _ => CharsetMode::Custom(name.to_string()),
        }
    }

    pub fn charset(&self) -> Vec<char> {
        const DIGITS: &str = "0123456789";
        const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
        const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
        const PUNCT: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

        match self {
            CharsetMode::Numeric => DIGITS.chars().collect(),
            CharsetMode::Alpha => LOWER.chars().chain(UPPER.chars()).collect(),
            CharsetMode::Alphanumeric => LOWER
                .chars()
                .chain(UPPER.chars())
                .chain(DIGITS.chars())
                .collect(),
            CharsetMode::AllPrintable => DIGITS
                .chars()
                .chain(LOWER.chars())
                .chain(UPPER.chars())
                .chain(PUNCT.chars())
                .collect(),
            CharsetMode::Custom(s) => s.chars().collect(),
        }
    }
}

impl Default for CharsetMode {
    fn default() -> Self {
        CharsetMode::Alphanumeric
    }
}

/// Iterator over every string of length `min_length..=max_length` drawn
/// from a charset.
pub struct CandidateSpace {
    charset: Vec<char>,
    max_length: usize,
    length: usize,
    indices: Vec<usize>,
    exhausted: bool,
}

impl CandidateSpace {
    pub fn new(charset: Vec<char>, min_length: usize, max_length: usize) -> Self {
        let length = min_length.max(1);
        Self {
            exhausted: charset.is_empty() || length > max_length,
            indices: vec![0; length],
            charset,
            max_length,
            length,
        }
    }

    /// Total number of candidates: Σ |charset|^L over the length range,
    /// saturating at u64::MAX for astronomically large spaces.
    pub fn search_space(&self) -> u64 {
        let base = self.charset.len() as u64;
        let mut total: u64 = 0;
        for length in self.indices.len()..=self.max_length {
            let mut count: u64 = 1;
            for _ in 0..length {
                count = count.saturating_mul(base);
            }
            total = total.saturating_add(count);
        }
        total
    }

    fn advance(&mut self) {
        // Odometer increment, rightmost position fastest.
        for pos in (0..self.length).rev() {
            self.indices[pos] += 1;
            if self.indices[pos] < self.charset.len() {
                return;
            }
            self.indices[pos] = 0;
        }
        // Wrapped all positions: move to the next length.
        self.length += 1;
        if self.length > self.max_length {
            self.exhausted = true;
        } else {
            self.indices = vec![0; self.length];
        }
    }
}

impl Iterator for CandidateSpace {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.exhausted {
            return None;
        }
        let candidate: String = self.indices.iter().map(|&i| self.charset[i]).collect();
        self.advance();
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn binary_charset_enumerates_in_order() {
        let space = CandidateSpace::new(vec!['0', '1'], 1, 2);
        let all: Vec<String> = space.collect();
        assert_eq!(all, vec!["0", "1", "00", "01", "10", "11"]);
    }

    #[test]
    fn search_space_matches_enumeration() {
        let charset: Vec<char> = "abc".chars().collect();
        let space = CandidateSpace::new(charset.clone(), 1, 3);
        let expected = space.search_space();

        let all: Vec<String> = CandidateSpace::new(charset, 1, 3).collect();
        // 3 + 9 + 27
        assert_eq!(expected, 39);
        assert_eq!(all.len(), 39);

        let unique: HashSet<&String> = all.iter().collect();
        assert_eq!(unique.len(), all.len(), "duplicates in enumeration");

        // Lengths are ascending.
        let lengths: Vec<usize> = all.iter().map(|c| c.len()).collect();
        let mut sorted = lengths.clone();
        sorted.sort_unstable();
        assert_eq!(lengths, sorted);
    }

    #[test]
    fn min_length_zero_is_clamped() {
        let all: Vec<String> = CandidateSpace::new(vec!['x'], 0, 2).collect();
        assert_eq!(all, vec!["x", "xx"]);
    }

    #[test]
    fn empty_charset_yields_nothing() {
        assert_eq!(CandidateSpace::new(vec![], 1, 4).count(), 0);
    }

    #[test]
    fn charset_modes_have_expected_sizes() {
        assert_eq!(CharsetMode::Numeric.charset().len(), 10);
        assert_eq!(CharsetMode::Alpha.charset().len(), 52);
        assert_eq!(CharsetMode::Alphanumeric.charset().len(), 62);
        assert_eq!(CharsetMode::AllPrintable.charset().len(), 94);
        assert_eq!(CharsetMode::parse("custom!").charset(), vec!['c', 'u', 's', 't', 'o', 'm', '!']);
    }
}
