use crate::shape::ShapeKeyHash;

#[cfg(test)]
use mockall::automock;

/// Eviction policy of a partition. Only ever called with the partition lock held.
#[cfg_attr(test, automock)]
pub trait Replacer: Send {
  fn find_victim(&mut self) -> Option<ShapeKeyHash>;
  fn add_entry(&mut self, hash: ShapeKeyHash);
  fn use_entry(&mut self, hash: ShapeKeyHash);
  fn remove_entry(&mut self, hash: ShapeKeyHash);
}
