use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Append-only edit log with a fixed retention cap: recording past the cap
/// drops the oldest entries. Serializes as a plain JSON array, which is how
/// the store columns persist it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditLog<T> {
    entries: VecDeque<T>,
}

impl<T> EditLog<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Appends `entry`, then evicts from the front until at most `cap`
    /// entries remain. A zero cap keeps no history at all.
    pub fn record(&mut self, entry: T, cap: usize) {
        self.entries.push_back(entry);
        while self.entries.len() > cap {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

impl<T> Default for EditLog<T> {
    fn default() -> Self {
        Self::new()
    }
}
