//! Capped, insertion-ordered container that drops its oldest element on
//! overflow.

use std::collections::VecDeque;
use std::collections::vec_deque;

use serde::{Serialize, Serializer};

/// Bounded FIFO buffer used for session buckets, the session order list and
/// the resource cache.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedBuffer<T> {
	capacity: usize,
	items: VecDeque<T>,
}

impl<T> BoundedBuffer<T> {
	/// Creates a buffer holding at most `capacity` items. A capacity of zero is
	/// raised to one.
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			capacity,
			items: VecDeque::with_capacity(capacity.min(64)),
		}
	}

	/// Appends `item`, returning the element dropped to stay within capacity.
	pub fn push(&mut self, item: T) -> Option<T> {
		let dropped = if self.items.len() >= self.capacity { self.items.pop_front() } else { None };
		self.items.push_back(item);
		dropped
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Iterates oldest to newest.
	pub fn iter(&self) -> vec_deque::Iter<'_, T> {
		self.items.iter()
	}

	pub fn first(&self) -> Option<&T> {
		self.items.front()
	}

	pub fn last(&self) -> Option<&T> {
		self.items.back()
	}

	pub fn get(&self, index: usize) -> Option<&T> {
		self.items.get(index)
	}

	pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
		self.items.retain(keep);
	}

	pub fn clear(&mut self) {
		self.items.clear();
	}
}

impl<T: Clone> BoundedBuffer<T> {
	pub fn to_vec(&self) -> Vec<T> {
		self.items.iter().cloned().collect()
	}
}

impl<'a, T> IntoIterator for &'a BoundedBuffer<T> {
	type Item = &'a T;
	type IntoIter = vec_deque::Iter<'a, T>;

	fn into_iter(self) -> Self::IntoIter {
		self.items.iter()
	}
}

impl<T: Serialize> Serialize for BoundedBuffer<T> {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_seq(&self.items)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn push_drops_oldest_when_full() {
		let mut buf = BoundedBuffer::new(2);
		assert_eq!(buf.push(1), None);
		assert_eq!(buf.push(2), None);
		assert_eq!(buf.push(3), Some(1));
		assert_eq!(buf.to_vec(), vec![2, 3]);
		assert_eq!(buf.len(), 2);
	}

	#[test]
	fn zero_capacity_is_raised_to_one() {
		let mut buf = BoundedBuffer::new(0);
		assert_eq!(buf.capacity(), 1);
		buf.push("a");
		assert_eq!(buf.push("b"), Some("a"));
		assert_eq!(buf.last(), Some(&"b"));
	}

	#[test]
	fn serializes_as_plain_sequence() {
		let mut buf = BoundedBuffer::new(3);
		buf.push(1);
		buf.push(2);
		assert_eq!(serde_json::to_string(&buf).unwrap(), "[1,2]");
	}

	#[test]
	fn iter_is_oldest_first_and_reversible() {
		let mut buf = BoundedBuffer::new(3);
		for i in 0..5 {
			buf.push(i);
		}
		assert_eq!(buf.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
		assert_eq!(buf.iter().rev().next(), Some(&4));
		buf.clear();
		assert!(buf.is_empty());
	}
}
