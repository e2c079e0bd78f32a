//! Live and recent sessions, capped and indexed by id.

use std::collections::HashMap;

use crate::buffer::BoundedBuffer;
use crate::session::{Session, SessionId};

/// Owns sessions in creation order with O(1) id lookup.
#[derive(Debug)]
pub struct SessionRegistry {
	order: BoundedBuffer<SessionId>,
	sessions: HashMap<SessionId, Session>,
}

impl SessionRegistry {
	pub fn new(capacity: usize) -> Self {
		Self {
			order: BoundedBuffer::new(capacity),
			sessions: HashMap::new(),
		}
	}

	pub fn capacity(&self) -> usize {
		self.order.capacity()
	}

	/// Stores `session`, returning the session evicted to stay within the cap.
	///
	/// The caller owns releasing the evicted session's timer and observers.
	pub fn create(&mut self, session: Session) -> Option<Session> {
		let id = session.id.clone();
		let replaced = self.sessions.insert(id.clone(), session);
		if replaced.is_some() {
			self.order.retain(|existing| existing != &id);
		}
		let evicted = self.order.push(id).and_then(|oldest| self.sessions.remove(&oldest));
		evicted.or(replaced)
	}

	pub fn get(&self, id: &str) -> Option<&Session> {
		self.sessions.get(id)
	}

	pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
		self.sessions.get_mut(id)
	}

	pub fn contains(&self, id: &str) -> bool {
		self.sessions.contains_key(id)
	}

	pub fn len(&self) -> usize {
		self.sessions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.is_empty()
	}

	/// Session ids, oldest first.
	pub fn ids(&self) -> impl DoubleEndedIterator<Item = &SessionId> {
		self.order.iter()
	}

	/// Sessions in creation order.
	pub fn all(&self) -> impl DoubleEndedIterator<Item = &Session> {
		self.order.iter().filter_map(|id| self.sessions.get(id))
	}

	/// Removes every session, returning them oldest first.
	pub fn drain(&mut self) -> Vec<Session> {
		let drained = self.order.iter().filter_map(|id| self.sessions.remove(id)).collect();
		self.order.clear();
		drained
	}
}
