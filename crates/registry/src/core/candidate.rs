//! Activation callbacks and failure reason codes.

use std::fmt;
use std::sync::Arc;

use arbor_primitives::ServiceOrder;
use parking_lot::Mutex;
use serde::Serialize;

/// Why a registration is not serving a key.
///
/// Numeric codes are shared with management tooling and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
	Unknown,
	ExceptionOnInit,
	NoServletContextMatching,
	ServletContextFailure,
	ShadowedByOtherService,
	ServiceNotGettable,
	ValidationFailed,
	ServiceInUse,
}

impl FailureReason {
	pub const fn code(self) -> i32 {
		match self {
			Self::Unknown => 0,
			Self::ExceptionOnInit => 1,
			Self::NoServletContextMatching => 2,
			Self::ServletContextFailure => 3,
			Self::ShadowedByOtherService => 4,
			Self::ServiceNotGettable => 5,
			Self::ValidationFailed => 6,
			Self::ServiceInUse => 7,
		}
	}

	pub const fn from_code(code: i32) -> Option<Self> {
		Some(match code {
			0 => Self::Unknown,
			1 => Self::ExceptionOnInit,
			2 => Self::NoServletContextMatching,
			3 => Self::ServletContextFailure,
			4 => Self::ShadowedByOtherService,
			5 => Self::ServiceNotGettable,
			6 => Self::ValidationFailed,
			7 => Self::ServiceInUse,
			_ => return None,
		})
	}

	/// Interprets a raw activation result: `0` and `-1` are success, anything
	/// else names a failure. Codes without a known reason map to
	/// [`FailureReason::Unknown`].
	pub const fn check(result: i32) -> Result<(), Self> {
		match result {
			0 | -1 => Ok(()),
			code => match Self::from_code(code) {
				Some(reason) => Err(reason),
				None => Err(Self::Unknown),
			},
		}
	}
}

impl fmt::Display for FailureReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::Unknown => "unknown",
			Self::ExceptionOnInit => "exception on init",
			Self::NoServletContextMatching => "no matching context",
			Self::ServletContextFailure => "context failure",
			Self::ShadowedByOtherService => "shadowed by other service",
			Self::ServiceNotGettable => "service not gettable",
			Self::ValidationFailed => "validation failed",
			Self::ServiceInUse => "service in use",
		};
		write!(f, "{name} ({})", self.code())
	}
}

/// A handler competing for one or more registry keys.
///
/// The registry calls [`Candidate::init`] when the candidate becomes the
/// winner of its first key and [`Candidate::destroy`] when it stops winning its
/// last one. `destroy` is never called without a prior successful `init`.
/// Panics in either callback are caught; a panicking `init` counts as
/// [`FailureReason::ExceptionOnInit`].
pub trait Candidate: Send + Sync + 'static {
	/// Precedence against competitors. Must not change while registered.
	fn order(&self) -> ServiceOrder;

	fn init(&self) -> Result<(), FailureReason>;

	fn destroy(&self);

	/// Name shown in logs and snapshots.
	fn name(&self) -> String {
		format!("service#{}", self.order().service_id)
	}
}

/// A candidate registered in several registries at once.
///
/// Each registry activates its own view; the wrapped candidate is initialized
/// by the first activation and destroyed by the last release.
pub struct Shared<C> {
	inner: Arc<C>,
	uses: Mutex<u32>,
}

impl<C: Candidate> Shared<C> {
	pub fn new(inner: Arc<C>) -> Arc<Self> {
		Arc::new(Self {
			inner,
			uses: Mutex::new(0),
		})
	}

	pub fn inner(&self) -> &Arc<C> {
		&self.inner
	}

	pub fn use_count(&self) -> u32 {
		*self.uses.lock()
	}
}

impl<C: Candidate> Candidate for Shared<C> {
	fn order(&self) -> ServiceOrder {
		self.inner.order()
	}

	fn init(&self) -> Result<(), FailureReason> {
		let mut uses = self.uses.lock();
		if *uses == 0 {
			self.inner.init()?;
		}
		*uses += 1;
		Ok(())
	}

	fn destroy(&self) {
		let mut uses = self.uses.lock();
		if *uses == 1 {
			self.inner.destroy();
		}
		*uses = uses.saturating_sub(1);
	}

	fn name(&self) -> String {
		self.inner.name()
	}
}

impl<C: Candidate> fmt::Debug for Shared<C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Shared").field("name", &self.inner.name()).field("uses", &self.use_count()).finish()
	}
}
