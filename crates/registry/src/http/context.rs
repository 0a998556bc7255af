//! Per-context registries and request-to-context resolution.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use arbor_primitives::ServiceOrder;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;

use super::error_pages::ErrorPageRegistry;
use super::listeners::{ListenerKind, ListenerRegistry};
use super::servlets::{PathResolution, ServletRegistry};
use crate::core::{Candidate, RegistrationId, RegistrationSnapshot, RegistryError, Shared};

/// Identity of one servlet context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextInfo {
	pub name: String,
	/// Context path, `/` for the root context.
	pub path: String,
	pub order: ServiceOrder,
}

impl ContextInfo {
	pub fn new(name: impl Into<String>, path: impl Into<String>, order: ServiceOrder) -> Self {
		Self {
			name: name.into(),
			path: path.into(),
			order,
		}
	}

	/// The context created by the runtime itself: root path, highest ranking.
	pub fn runtime_default() -> Self {
		Self::new("default", "/", ServiceOrder::new(i32::MAX, -1))
	}
}

/// Longer paths first, then [`ServiceOrder`].
fn cmp_context(a: &ContextInfo, b: &ContextInfo) -> Ordering {
	b.path.len().cmp(&a.path.len()).then_with(|| a.order.cmp(&b.order))
}

/// Where a servlet was registered inside its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServletHandle {
	pub paths: Option<RegistrationId>,
	pub error_pages: Option<RegistrationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextSnapshot {
	pub name: String,
	pub path: String,
	pub ranking: i32,
	pub service_id: i64,
	pub servlets: Vec<RegistrationSnapshot>,
	pub error_pages: Vec<RegistrationSnapshot>,
	pub listeners: Vec<RegistrationSnapshot>,
}

/// Servlets, error pages and listeners of one context.
///
/// A servlet registered for both paths and error pages is initialized once and
/// destroyed when neither registry uses it any more.
pub struct ContextRegistry<S, L> {
	info: ContextInfo,
	/// `path + "/"`, `None` for the root context.
	prefix: Option<String>,
	servlets: ServletRegistry<Shared<S>>,
	error_pages: ErrorPageRegistry<Shared<S>>,
	listeners: ListenerRegistry<L>,
}

impl<S: Candidate, L: Candidate> ContextRegistry<S, L> {
	pub fn new(info: ContextInfo) -> Self {
		let prefix = (info.path != "/").then(|| format!("{}/", info.path));
		Self {
			info,
			prefix,
			servlets: ServletRegistry::new(),
			error_pages: ErrorPageRegistry::new(),
			listeners: ListenerRegistry::new(),
		}
	}

	pub fn info(&self) -> &ContextInfo {
		&self.info
	}

	/// Request URI relative to this context, or `None` when the URI is outside it.
	pub fn relative_uri<'a>(&self, request_uri: &'a str) -> Option<&'a str> {
		if request_uri == self.info.path {
			return Some("");
		}
		let Some(prefix) = &self.prefix else {
			return Some(request_uri);
		};
		request_uri.starts_with(prefix.as_str()).then(|| &request_uri[prefix.len() - 1..])
	}

	/// Registers `servlet` under `patterns` and `error_pages`.
	///
	/// # Errors
	///
	/// [`RegistryError::NoKeys`] when both lists are empty; pattern errors
	/// leave nothing registered.
	pub fn register_servlet<'a>(
		&self,
		servlet: Arc<S>,
		patterns: &[&'a str],
		error_pages: &[&'a str],
	) -> Result<ServletHandle, RegistryError> {
		if patterns.is_empty() && error_pages.is_empty() {
			return Err(RegistryError::NoKeys);
		}
		let shared = Shared::new(servlet);
		let paths = if patterns.is_empty() {
			None
		} else {
			Some(self.servlets.add(Arc::clone(&shared), patterns.iter().copied())?)
		};
		let errors = if error_pages.is_empty() {
			None
		} else {
			match self.error_pages.add(shared, error_pages.iter().copied()) {
				Ok(id) => Some(id),
				Err(err) => {
					if let Some(id) = paths {
						let _ = self.servlets.remove(id);
					}
					return Err(err);
				}
			}
		};
		Ok(ServletHandle {
			paths,
			error_pages: errors,
		})
	}

	pub fn unregister_servlet(&self, handle: ServletHandle) -> Result<(), RegistryError> {
		let paths = handle.paths.map(|id| self.servlets.remove(id)).transpose();
		let errors = handle.error_pages.map(|id| self.error_pages.remove(id)).transpose();
		paths?;
		errors?;
		Ok(())
	}

	pub fn register_listener(&self, listener: Arc<L>, kinds: impl IntoIterator<Item = ListenerKind>) -> Result<RegistrationId, RegistryError> {
		self.listeners.add(listener, kinds)
	}

	pub fn unregister_listener(&self, id: RegistrationId) -> Result<Arc<L>, RegistryError> {
		self.listeners.remove(id)
	}

	/// Resolves a context-relative path to a servlet.
	pub fn resolve(&self, relative_uri: &str) -> Option<PathResolution<S>> {
		let found = self.servlets.resolve(relative_uri)?;
		Some(PathResolution {
			servlet: Arc::clone(found.servlet.inner()),
			pattern: found.pattern,
			servlet_path: found.servlet_path,
			path_info: found.path_info,
			request_uri: found.request_uri,
		})
	}

	pub fn error_page(&self, code: u16, exception_chain: &[&str]) -> Option<Arc<S>> {
		self.error_pages.resolve(code, exception_chain).map(|shared| Arc::clone(shared.inner()))
	}

	pub fn listeners(&self, kind: ListenerKind) -> Vec<Arc<L>> {
		self.listeners.listeners(kind)
	}

	pub fn servlets(&self) -> &ServletRegistry<Shared<S>> {
		&self.servlets
	}

	pub fn error_pages(&self) -> &ErrorPageRegistry<Shared<S>> {
		&self.error_pages
	}

	pub fn snapshot(&self) -> ContextSnapshot {
		ContextSnapshot {
			name: self.info.name.clone(),
			path: self.info.path.clone(),
			ranking: self.info.order.ranking,
			service_id: self.info.order.service_id,
			servlets: self.servlets.snapshots(),
			error_pages: self.error_pages.snapshots(),
			listeners: self.listeners.snapshots(),
		}
	}

	/// Drops every registration, destroying active handlers.
	pub fn remove_all(&self) {
		self.error_pages.clear();
		self.listeners.clear();
		self.servlets.clear();
	}
}

impl<S, L> fmt::Debug for ContextRegistry<S, L> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ContextRegistry").field("info", &self.info).finish_non_exhaustive()
	}
}

/// All contexts of one runtime.
pub struct HandlerRegistry<S, L> {
	write: Mutex<()>,
	/// Contexts in resolution order.
	contexts: ArcSwap<Vec<Arc<ContextRegistry<S, L>>>>,
	by_id: ArcSwap<FxHashMap<i64, Arc<ContextRegistry<S, L>>>>,
}

impl<S: Candidate, L: Candidate> Default for HandlerRegistry<S, L> {
	fn default() -> Self {
		Self::new()
	}
}

impl<S: Candidate, L: Candidate> HandlerRegistry<S, L> {
	pub fn new() -> Self {
		Self {
			write: Mutex::new(()),
			contexts: ArcSwap::from_pointee(Vec::new()),
			by_id: ArcSwap::from_pointee(FxHashMap::default()),
		}
	}

	/// Adds a context, or returns the existing one with the same service id.
	pub fn add_context(&self, info: ContextInfo) -> Arc<ContextRegistry<S, L>> {
		let _guard = self.write.lock();
		if let Some(existing) = self.by_id.load().get(&info.order.service_id) {
			return Arc::clone(existing);
		}
		let context = Arc::new(ContextRegistry::new(info));
		let mut contexts = Vec::clone(&self.contexts.load());
		let pos = contexts.partition_point(|c| cmp_context(c.info(), context.info()) != Ordering::Greater);
		contexts.insert(pos, Arc::clone(&context));
		let mut by_id = FxHashMap::clone(&self.by_id.load());
		by_id.insert(context.info().order.service_id, Arc::clone(&context));
		self.contexts.store(Arc::new(contexts));
		self.by_id.store(Arc::new(by_id));
		tracing::debug!(context = %context.info().name, path = %context.info().path, "context added");
		context
	}

	/// Removes a context and everything registered in it.
	pub fn remove_context(&self, service_id: i64) -> Option<Arc<ContextRegistry<S, L>>> {
		let removed = {
			let _guard = self.write.lock();
			let mut by_id = FxHashMap::clone(&self.by_id.load());
			let removed = by_id.remove(&service_id)?;
			let contexts: Vec<_> = self.contexts.load().iter().filter(|c| !Arc::ptr_eq(c, &removed)).cloned().collect();
			self.contexts.store(Arc::new(contexts));
			self.by_id.store(Arc::new(by_id));
			removed
		};
		removed.remove_all();
		tracing::debug!(context = %removed.info().name, "context removed");
		Some(removed)
	}

	pub fn context(&self, service_id: i64) -> Option<Arc<ContextRegistry<S, L>>> {
		self.by_id.load().get(&service_id).cloned()
	}

	/// Contexts in resolution order.
	pub fn contexts(&self) -> Vec<Arc<ContextRegistry<S, L>>> {
		Vec::clone(&self.contexts.load())
	}

	/// Finds the servlet serving `request_uri`: the first context, in
	/// resolution order, that contains the URI and has a matching servlet.
	pub fn resolve(&self, request_uri: &str) -> Option<(Arc<ContextRegistry<S, L>>, PathResolution<S>)> {
		let contexts = self.contexts.load();
		contexts.iter().find_map(|context| {
			let relative = context.relative_uri(request_uri)?;
			let resolution = context.resolve(relative)?;
			Some((Arc::clone(context), resolution))
		})
	}

	pub fn snapshots(&self) -> Vec<ContextSnapshot> {
		self.contexts.load().iter().map(|c| c.snapshot()).collect()
	}

	/// Removes every context.
	pub fn shutdown(&self) {
		let ids: Vec<i64> = self.contexts.load().iter().map(|c| c.info().order.service_id).collect();
		for id in ids {
			self.remove_context(id);
		}
	}
}
