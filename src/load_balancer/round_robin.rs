//! Round-robin backend selection.

/// Cyclic cursor over an append-only list.
///
/// Stores the index that the next call returns; advances modulo the list
/// length observed at call time, so backends appended later join the cycle
/// without disturbing it.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the next backend, or `None` when there are none.
    pub fn next_index(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let index = self.cursor % len;
        self.cursor = (index + 1) % len;
        Some(index)
    }
}
