use std::{
	collections::HashMap,
	hash::Hash,
	sync::{Arc, Mutex as StdMutex},
};

use tokio::sync::OwnedMutexGuard;

/// Map of Mutexes, keyed on demand. Holding the Guard serializes all other
/// callers locking the same key; the slot is garbage-collected when the
/// last guard drops.
pub struct MutexMap<Key, Val> {
	map: Arc<StdMutex<HashMap<Key, Arc<tokio::sync::Mutex<Val>>>>>,
}

pub struct Guard<Key, Val>
where
	Key: Eq + Hash + Clone,
{
	map: Arc<StdMutex<HashMap<Key, Arc<tokio::sync::Mutex<Val>>>>>,
	key: Key,
	_guard: OwnedMutexGuard<Val>,
}

impl<Key, Val> MutexMap<Key, Val>
where
	Key: Eq + Hash + Clone,
	Val: Default,
{
	#[must_use]
	pub fn new() -> Self {
		Self {
			map: Arc::new(StdMutex::new(HashMap::new())),
		}
	}

	pub async fn lock(&self, key: &Key) -> Guard<Key, Val> {
		let mutex = self
			.map
			.lock()
			.expect("mutex map locked")
			.entry(key.clone())
			.or_default()
			.clone();

		let guard = mutex.lock_owned().await;

		Guard {
			map: self.map.clone(),
			key: key.clone(),
			_guard: guard,
		}
	}

	#[must_use]
	pub fn contains(&self, key: &Key) -> bool {
		self.map
			.lock()
			.expect("mutex map locked")
			.contains_key(key)
	}
}

impl<Key, Val> Default for MutexMap<Key, Val>
where
	Key: Eq + Hash + Clone,
	Val: Default,
{
	fn default() -> Self { Self::new() }
}

impl<Key, Val> Drop for Guard<Key, Val>
where
	Key: Eq + Hash + Clone,
{
	fn drop(&mut self) {
		let mut map = self.map.lock().expect("mutex map locked");
		if let Some(mutex) = map.get(&self.key) {
			// the map's own reference plus ours
			if Arc::strong_count(mutex) <= 2 {
				map.remove(&self.key);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::MutexMap;

	#[tokio::test]
	async fn serializes_same_key() {
		let map: MutexMap<String, ()> = MutexMap::new();
		let guard = map.lock(&"a".to_owned()).await;
		assert!(map.contains(&"a".to_owned()));

		let map2 = map.lock(&"b".to_owned()).await;
		drop(map2);
		drop(guard);
		assert!(!map.contains(&"a".to_owned()));
		assert!(!map.contains(&"b".to_owned()));
	}
}
