//! Process-wide request coalescing. At most one unit of work runs per key;
//! concurrent callers with the same key attach to the in-flight work and
//! every waiter receives the one outcome. Outcomes are never memoized past
//! the flight itself, so a transient failure does not become a per-key
//! outage. The work is cancelled only when the last waiter departs.

use std::{
	collections::HashMap,
	hash::Hash,
	sync::{
		Arc, Mutex as StdMutex,
		atomic::{AtomicUsize, Ordering},
	},
};

use futures::Future;
use tokio::{sync::watch, task::AbortHandle};

use crate::{Error, Result, err};

type Outcome<V> = Result<V, Arc<Error>>;

pub struct SingleFlight<K, V> {
	flights: Arc<StdMutex<HashMap<K, Arc<Flight<V>>>>>,
}

struct Flight<V> {
	waiters: AtomicUsize,
	result: watch::Sender<Option<Outcome<V>>>,
	abort: StdMutex<Option<AbortHandle>>,
}

/// Tracks a waiter's attachment for the life of one `run` call. Dropping
/// the guard before the outcome arrives counts the waiter out; the last
/// departure aborts the leader's work.
struct WaiterGuard<K, V>
where
	K: Eq + Hash,
{
	flights: Arc<StdMutex<HashMap<K, Arc<Flight<V>>>>>,
	flight: Arc<Flight<V>>,
	key: K,
}

impl<K, V> SingleFlight<K, V>
where
	K: Clone + Eq + Hash + Send + 'static,
	V: Clone + Send + Sync + 'static,
{
	#[must_use]
	pub fn new() -> Self {
		Self {
			flights: Arc::new(StdMutex::new(HashMap::new())),
		}
	}

	/// Execute `work` under the key, or attach to the execution already in
	/// flight for it. Every attached caller resolves with the same outcome.
	pub async fn run<F>(&self, key: &K, work: F) -> Result<V>
	where
		F: Future<Output = Result<V>> + Send + 'static,
	{
		let (flight, leading) = self.join_or_lead(key);
		let _guard = WaiterGuard {
			flights: self.flights.clone(),
			flight: flight.clone(),
			key: key.clone(),
		};

		if leading {
			let handle = tokio::spawn(work);
			*flight
				.abort
				.lock()
				.expect("flight abort locked") = Some(handle.abort_handle());

			let flights = self.flights.clone();
			let key = key.clone();
			let publish = flight.clone();
			tokio::spawn(async move {
				let outcome: Outcome<V> = match handle.await {
					| Ok(result) => result.map_err(Arc::new),
					| Err(e) if e.is_cancelled() =>
						Err(Arc::new(err!("coalesced work cancelled"))),
					| Err(e) => Err(Arc::new(Error::from(e))),
				};

				// Unregister before publishing so late arrivals lead a
				// fresh flight instead of observing a stale failure.
				let mut flights = flights.lock().expect("flights locked");
				if flights
					.get(&key)
					.is_some_and(|f| Arc::ptr_eq(f, &publish))
				{
					flights.remove(&key);
				}
				drop(flights);

				publish.result.send(Some(outcome)).ok();
			});
		}

		let mut receiver = flight.result.subscribe();
		loop {
			let outcome = receiver.borrow_and_update().clone();
			if let Some(outcome) = outcome {
				return outcome.map_err(|e| e.replicate());
			}

			if receiver.changed().await.is_err() {
				return Err!("coalesced work cancelled");
			}
		}
	}

	/// Whether a flight is currently registered for the key.
	#[must_use]
	pub fn contains(&self, key: &K) -> bool {
		self.flights
			.lock()
			.expect("flights locked")
			.contains_key(key)
	}

	fn join_or_lead(&self, key: &K) -> (Arc<Flight<V>>, bool) {
		let mut flights = self.flights.lock().expect("flights locked");
		if let Some(flight) = flights.get(key) {
			flight.waiters.fetch_add(1, Ordering::SeqCst);
			return (flight.clone(), false);
		}

		let (result, _) = watch::channel(None);
		let flight = Arc::new(Flight {
			waiters: AtomicUsize::new(1),
			result,
			abort: StdMutex::new(None),
		});

		flights.insert(key.clone(), flight.clone());
		(flight, true)
	}
}

impl<K, V> Default for SingleFlight<K, V>
where
	K: Clone + Eq + Hash + Send + 'static,
	V: Clone + Send + Sync + 'static,
{
	fn default() -> Self { Self::new() }
}

impl<K, V> Drop for WaiterGuard<K, V>
where
	K: Eq + Hash,
{
	fn drop(&mut self) {
		let mut flights = self.flights.lock().expect("flights locked");
		if self.flight.waiters.fetch_sub(1, Ordering::SeqCst) > 1 {
			return;
		}

		if self.flight.result.borrow().is_some() {
			return;
		}

		// last waiter departing an unresolved flight: cancel the work
		if let Some(abort) = self
			.flight
			.abort
			.lock()
			.expect("flight abort locked")
			.take()
		{
			abort.abort();
		}

		if flights
			.get(&self.key)
			.is_some_and(|f| Arc::ptr_eq(f, &self.flight))
		{
			flights.remove(&self.key);
		}
	}
}

#[cfg(test)]
mod tests {
	use std::{
		sync::{
			Arc,
			atomic::{AtomicUsize, Ordering},
		},
		time::Duration,
	};

	use tokio::{sync::Notify, time::sleep};

	use super::SingleFlight;
	use crate::{Err, Result};

	#[tokio::test]
	async fn coalesces_concurrent_callers() {
		let flights: Arc<SingleFlight<String, u64>> = Arc::new(SingleFlight::new());
		let calls = Arc::new(AtomicUsize::new(0));
		let gate = Arc::new(Notify::new());

		let mut tasks = Vec::new();
		for _ in 0..4 {
			let flights = flights.clone();
			let calls = calls.clone();
			let gate = gate.clone();
			tasks.push(tokio::spawn(async move {
				flights
					.run(&"key".to_owned(), async move {
						calls.fetch_add(1, Ordering::SeqCst);
						gate.notified().await;
						Ok(42)
					})
					.await
			}));

			// stagger arrivals so every task attaches to the first flight
			sleep(Duration::from_millis(10)).await;
		}

		sleep(Duration::from_millis(20)).await;
		gate.notify_waiters();

		for task in tasks {
			assert_eq!(task.await.unwrap().unwrap(), 42);
		}

		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert!(!flights.contains(&"key".to_owned()));
	}

	#[tokio::test]
	async fn failures_are_not_memoized() {
		let flights: SingleFlight<String, u64> = SingleFlight::new();
		let calls = Arc::new(AtomicUsize::new(0));

		let c = calls.clone();
		let first: Result<u64> = flights
			.run(&"key".to_owned(), async move {
				c.fetch_add(1, Ordering::SeqCst);
				Err!("transient fault")
			})
			.await;
		assert!(first.is_err());

		let c = calls.clone();
		let second = flights
			.run(&"key".to_owned(), async move {
				c.fetch_add(1, Ordering::SeqCst);
				Ok(7)
			})
			.await;

		assert_eq!(second.unwrap(), 7);
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn waiter_cancellation_spares_the_work() {
		let flights: Arc<SingleFlight<String, u64>> = Arc::new(SingleFlight::new());
		let gate = Arc::new(Notify::new());

		let f = flights.clone();
		let g = gate.clone();
		let leader = tokio::spawn(async move {
			f.run(&"key".to_owned(), async move {
				g.notified().await;
				Ok(1)
			})
			.await
		});
		sleep(Duration::from_millis(10)).await;

		let f = flights.clone();
		let follower = tokio::spawn(async move {
			f.run(&"key".to_owned(), async { Ok(99) }).await
		});
		sleep(Duration::from_millis(10)).await;

		// cancel the follower; the in-flight work must survive
		follower.abort();
		sleep(Duration::from_millis(10)).await;
		assert!(flights.contains(&"key".to_owned()));

		gate.notify_waiters();
		assert_eq!(leader.await.unwrap().unwrap(), 1);
	}
}
