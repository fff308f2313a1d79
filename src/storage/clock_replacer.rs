use std::collections::HashMap;

use crate::shape::ShapeKeyHash;

use super::replacer::Replacer;

struct ClockEntryInfo {
  clock_used: bool,
  hash: ShapeKeyHash
}

// Second chance approximation of LRU. Recently used entries get their flag cleared on the
// first sweep and are only picked if nothing else is left.
pub struct ClockReplacer {
  // O(1) lookup of an entry's position on the clock
  clock_positions: HashMap<ShapeKeyHash, usize, ahash::RandomState>,
  clock: Vec<ClockEntryInfo>,
  clock_position: usize
}

impl ClockReplacer {
  pub fn new() -> Self {
    Self { clock_positions: HashMap::default(), clock: Vec::new(), clock_position: 0 }
  }

  pub fn len(&self) -> usize {
    self.clock.len()
  }

  pub fn is_empty(&self) -> bool {
    self.clock.is_empty()
  }
}

impl Default for ClockReplacer {
  fn default() -> Self {
    Self::new()
  }
}

impl Replacer for ClockReplacer {
  fn find_victim(&mut self) -> Option<ShapeKeyHash> {
    if self.clock.is_empty() {
      return None;
    }
    // At most two sweeps. After the first one every flag is cleared.
    for _ in 0..self.clock.len() * 2 {
      if self.clock_position >= self.clock.len() {
        self.clock_position = 0;
      }
      let element = &mut self.clock[self.clock_position];
      if !element.clock_used {
        return Some(element.hash);
      }
      element.clock_used = false;
      self.clock_position = (self.clock_position + 1) % self.clock.len();
    }
    None
  }

  fn add_entry(&mut self, hash: ShapeKeyHash) {
    if let Some(&pos) = self.clock_positions.get(&hash) {
      self.clock[pos].clock_used = true;
      return;
    }
    self.clock.push(ClockEntryInfo { clock_used: true, hash });
    self.clock_positions.insert(hash, self.clock.len() - 1);
  }

  fn use_entry(&mut self, hash: ShapeKeyHash) {
    if let Some(&pos) = self.clock_positions.get(&hash) {
      self.clock[pos].clock_used = true;
    }
  }

  fn remove_entry(&mut self, hash: ShapeKeyHash) {
    // Swap remove and fix up the position of the element that moved into the hole
    if let Some(pos) = self.clock_positions.remove(&hash) {
      self.clock.swap_remove(pos);
      if let Some(moved) = self.clock.get(pos) {
        self.clock_positions.insert(moved.hash, pos);
      }
    }
  }
}
