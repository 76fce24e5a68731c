use std::{
	collections::HashMap,
	net::IpAddr,
	sync::{Arc, Mutex as StdMutex},
	time::{Duration, Instant},
};

use ruma::{OwnedServerName, OwnedUserId};
use tracing::trace;
use vellum_core::{Error, ErrorKind, Result, config::RatePolicy};

use crate::{service, services::OnceServices};

/// How often idle buckets are swept.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Request classes with independently configured policies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteClass {
	Download,
	Upload,
	Thumbnail,
	Preview,
}

/// Who the tokens are charged to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Principal {
	User(OwnedUserId),
	Ip(IpAddr),
	Server(OwnedServerName),
}

struct Bucket {
	tokens: f64,
	updated: Instant,
}

/// Token-bucket rate limiting keyed by (route class, principal). A denied
/// request fails fast with a retry-after hint; it is never queued.
pub struct Service {
	buckets: StdMutex<HashMap<(RouteClass, Principal), Bucket>>,
	services: Arc<OnceServices>,
}

#[async_trait::async_trait]
impl crate::Service for Service {
	fn build(args: &crate::Args<'_>) -> Result<Arc<Self>> {
		Ok(Arc::new(Self {
			buckets: StdMutex::new(HashMap::new()),
			services: args.services.clone(),
		}))
	}

	async fn worker(self: Arc<Self>) -> Result {
		let mut interval = tokio::time::interval(PRUNE_INTERVAL);
		loop {
			tokio::select! {
				() = self.services.server.until_shutdown() => break,
				_ = interval.tick() => self.prune(),
			}
		}

		Ok(())
	}

	fn name(&self) -> &str { service::make_name(std::module_path!()) }
}

impl Service {
	/// Charge one request against the principal's bucket, failing with
	/// `LimitExceeded` and a retry-after hint when drained.
	pub fn check(&self, class: RouteClass, principal: Principal) -> Result {
		let policy = self.policy(class);
		self.check_at(class, principal, &policy, Instant::now())
	}

	fn check_at(
		&self,
		class: RouteClass,
		principal: Principal,
		policy: &RatePolicy,
		now: Instant,
	) -> Result {
		let capacity = f64::from(policy.limit.saturating_add(policy.burst));
		let rate = f64::from(policy.limit) / duration_from_window(policy).as_secs_f64();

		let mut buckets = self.buckets.lock()?;
		let bucket = buckets
			.entry((class, principal))
			.or_insert(Bucket { tokens: capacity, updated: now });

		let elapsed = now.saturating_duration_since(bucket.updated).as_secs_f64();
		bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
		bucket.updated = now;

		if bucket.tokens >= 1.0 {
			bucket.tokens -= 1.0;
			return Ok(());
		}

		let deficit = 1.0 - bucket.tokens;
		let retry_after = Duration::from_secs_f64(deficit / rate);

		Err(Error::Request(
			ErrorKind::LimitExceeded { retry_after: Some(retry_after) },
			"Too many requests; slow down.".into(),
		))
	}

	fn policy(&self, class: RouteClass) -> RatePolicy {
		let limits = &self.services.server.config.rate_limits;
		match class {
			| RouteClass::Download => limits.download,
			| RouteClass::Upload => limits.upload,
			| RouteClass::Thumbnail => limits.thumbnail,
			| RouteClass::Preview => limits.preview,
		}
	}

	/// Drop buckets refilled to capacity that nobody touched lately.
	fn prune(&self) {
		let now = Instant::now();
		let mut buckets = self.buckets.lock().expect("buckets locked");
		let before = buckets.len();
		buckets.retain(|(class, _), bucket| {
			let policy = self.policy(*class);
			let window = duration_from_window(&policy);
			now.saturating_duration_since(bucket.updated) < window.saturating_mul(2)
		});

		trace!(pruned = before - buckets.len(), "Pruned idle rate-limit buckets");
	}
}

fn duration_from_window(policy: &RatePolicy) -> Duration {
	Duration::from_millis(policy.window_ms.max(1))
}

#[cfg(test)]
mod tests {
	use std::time::{Duration, Instant};

	use vellum_core::{ErrorKind, config::RatePolicy};

	use super::{Principal, RouteClass};

	fn service() -> std::sync::Arc<super::Service> {
		crate::services::tests::services().limits.clone()
	}

	fn principal() -> Principal {
		Principal::Ip(std::net::IpAddr::V4(std::net::Ipv4Addr::new(203, 0, 113, 7)))
	}

	#[test]
	fn bucket_drains_then_hints_retry() {
		let limits = service();
		let policy = RatePolicy { limit: 2, window_ms: 1000, burst: 0 };
		let start = Instant::now();

		assert!(limits
			.check_at(RouteClass::Upload, principal(), &policy, start)
			.is_ok());
		assert!(limits
			.check_at(RouteClass::Upload, principal(), &policy, start)
			.is_ok());

		let denied = limits
			.check_at(RouteClass::Upload, principal(), &policy, start)
			.expect_err("third request within window is denied");
		match denied.kind() {
			| ErrorKind::LimitExceeded { retry_after } => {
				assert!(retry_after.expect("hint present") > Duration::ZERO);
			},
			| other => panic!("expected LimitExceeded, got {other:?}"),
		}

		// a full window later the bucket has refilled
		assert!(limits
			.check_at(
				RouteClass::Upload,
				principal(),
				&policy,
				start + Duration::from_millis(1500),
			)
			.is_ok());
	}

	#[test]
	fn principals_do_not_share_buckets() {
		let limits = service();
		let policy = RatePolicy { limit: 1, window_ms: 60_000, burst: 0 };
		let start = Instant::now();

		let a = Principal::Ip(std::net::IpAddr::V4(std::net::Ipv4Addr::new(198, 51, 100, 1)));
		let b = Principal::Ip(std::net::IpAddr::V4(std::net::Ipv4Addr::new(198, 51, 100, 2)));

		assert!(limits
			.check_at(RouteClass::Download, a.clone(), &policy, start)
			.is_ok());
		assert!(limits
			.check_at(RouteClass::Download, b, &policy, start)
			.is_ok());
		assert!(limits
			.check_at(RouteClass::Download, a, &policy, start)
			.is_err());
	}
}
