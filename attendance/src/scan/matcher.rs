//! Resolution of raw RFID tokens to roster identities.
//!
//! A card code has two equivalent spellings: the normalized form (whitespace
//! removed, uppercased) and the same string with leading zeros stripped. Readers
//! disagree on zero padding, so a lookup falls back to the stripped form when
//! the normalized form has no exact hit.

use std::collections::HashMap;

use crate::types::{StudentId, StudentIdentity};

/// Removes all whitespace and uppercases the remainder.
pub fn normalize_token(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Leading-zero-stripped form of an already normalized code.
///
/// Returns `None` when nothing would remain (empty or all-zero codes), so an
/// all-zero card never collides with every other all-zero card.
pub fn strip_leading_zeros(normalized: &str) -> Option<&str> {
    let stripped = normalized.trim_start_matches('0');
    (!stripped.is_empty()).then_some(stripped)
}

/// Read-only roster snapshot with lookup indexes.
///
/// Built once at session start. Duplicate codes are a data-quality problem
/// upstream; the earliest roster entry wins for every index.
#[derive(Debug, Clone, Default)]
pub struct ScanMatcher {
    students: Vec<StudentIdentity>,
    by_normalized: HashMap<String, usize>,
    by_stripped: HashMap<String, usize>,
}

impl ScanMatcher {
    pub fn new(students: Vec<StudentIdentity>) -> Self {
        let mut by_normalized = HashMap::new();
        let mut by_stripped = HashMap::new();

        for (idx, student) in students.iter().enumerate() {
            let normalized = normalize_token(&student.rfid_code);
            if normalized.is_empty() {
                tracing::warn!(student_id = student.id, "roster entry has an empty rfid code");
                continue;
            }
            if let Some(stripped) = strip_leading_zeros(&normalized) {
                by_stripped.entry(stripped.to_owned()).or_insert(idx);
            }
            if by_normalized.contains_key(&normalized) {
                tracing::warn!(
                    student_id = student.id,
                    code = %normalized,
                    "duplicate rfid code on roster; first entry wins"
                );
            }
            by_normalized.entry(normalized).or_insert(idx);
        }

        Self {
            students,
            by_normalized,
            by_stripped,
        }
    }

    /// Resolves a token. `None` means the card is not on this roster.
    ///
    /// Order: exact normalized match, then the token's stripped form against
    /// either representation of each roster code.
    pub fn resolve(&self, token: &str) -> Option<&StudentIdentity> {
        let normalized = normalize_token(token);
        if normalized.is_empty() {
            return None;
        }
        if let Some(&idx) = self.by_normalized.get(&normalized) {
            return Some(&self.students[idx]);
        }

        let stripped = strip_leading_zeros(&normalized)?;
        let candidate = match (
            self.by_normalized.get(stripped),
            self.by_stripped.get(stripped),
        ) {
            (Some(&a), Some(&b)) => Some(a.min(b)),
            (Some(&a), None) => Some(a),
            (None, Some(&b)) => Some(b),
            (None, None) => None,
        };
        candidate.map(|idx| &self.students[idx])
    }

    pub fn student(&self, id: StudentId) -> Option<&StudentIdentity> {
        self.students.iter().find(|s| s.id == id)
    }

    pub fn students(&self) -> &[StudentIdentity] {
        &self.students
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}
