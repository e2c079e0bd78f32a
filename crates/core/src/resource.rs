//! Resource-timing cache and network call correlation.

use lab_protocol::ResourceTiming;

use crate::buffer::BoundedBuffer;

/// FIFO cache of recently observed resource entries, independent of sessions.
#[derive(Debug, Clone)]
pub struct ResourceTimingCache {
	entries: BoundedBuffer<ResourceTiming>,
}

impl ResourceTimingCache {
	pub fn new(capacity: usize) -> Self {
		Self {
			entries: BoundedBuffer::new(capacity),
		}
	}

	pub fn insert(&mut self, entry: ResourceTiming) {
		self.entries.push(entry);
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn reset(&mut self, capacity: usize) {
		self.entries = BoundedBuffer::new(capacity);
	}

	/// Best resource entry for a call to `url` that started at `start`.
	///
	/// Scans newest to oldest over entries with the same URL. Once a candidate
	/// within `tolerance` is held, the scan stops at the first entry more than
	/// `tolerance` further away than that candidate. This assumes entries
	/// arrive roughly in start-time order, so the result is best-effort: an
	/// out-of-order entry behind the stop point is never considered.
	pub fn find(&self, url: &str, start: f64, tolerance: f64) -> Option<&ResourceTiming> {
		let mut best: Option<(&ResourceTiming, f64)> = None;
		for entry in self.entries.iter().rev() {
			if entry.name != url {
				continue;
			}
			let delta = (entry.start_time - start).abs();
			match best {
				Some((_, best_delta)) if best_delta <= tolerance && delta > best_delta + tolerance => break,
				Some((_, best_delta)) if delta >= best_delta => {}
				_ => best = Some((entry, delta)),
			}
		}
		best.filter(|(_, delta)| *delta <= tolerance).map(|(entry, _)| entry)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn timing(name: &str, start: f64) -> ResourceTiming {
		ResourceTiming {
			name: name.into(),
			initiator_type: "fetch".into(),
			start_time: start,
			duration: 20.0,
			..Default::default()
		}
	}

	#[test]
	fn matches_within_tolerance_only() {
		let mut cache = ResourceTimingCache::new(10);
		cache.insert(timing("https://a.test/api", 1200.0));
		assert!(cache.find("https://a.test/api", 1000.0, 250.0).is_some());
		assert!(cache.find("https://a.test/api", 900.0, 250.0).is_none());
	}

	#[test]
	fn url_must_match_exactly() {
		let mut cache = ResourceTimingCache::new(10);
		cache.insert(timing("https://a.test/api?x=1", 1000.0));
		assert!(cache.find("https://a.test/api", 1000.0, 250.0).is_none());
	}

	#[test]
	fn prefers_smallest_delta() {
		let mut cache = ResourceTimingCache::new(10);
		cache.insert(timing("https://a.test/api", 980.0));
		cache.insert(timing("https://a.test/api", 1100.0));
		cache.insert(timing("https://a.test/api", 1010.0));
		let found = cache.find("https://a.test/api", 1000.0, 250.0).unwrap();
		assert_eq!(found.start_time, 1010.0);
	}

	#[test]
	fn early_exit_can_miss_out_of_order_entry() {
		let mut cache = ResourceTimingCache::new(10);
		// Exact match recorded first, then a late arrival far from the call,
		// then a near one: the scan stops at the far entry.
		cache.insert(timing("https://a.test/api", 1000.0));
		cache.insert(timing("https://a.test/api", 5000.0));
		cache.insert(timing("https://a.test/api", 1200.0));
		let found = cache.find("https://a.test/api", 1000.0, 250.0).unwrap();
		assert_eq!(found.start_time, 1200.0);
	}

	#[test]
	fn oldest_entries_fall_out() {
		let mut cache = ResourceTimingCache::new(2);
		cache.insert(timing("https://a.test/1", 0.0));
		cache.insert(timing("https://a.test/2", 0.0));
		cache.insert(timing("https://a.test/3", 0.0));
		assert_eq!(cache.len(), 2);
		assert!(cache.find("https://a.test/1", 0.0, 250.0).is_none());
	}
}
