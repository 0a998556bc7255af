use std::sync::Arc;

use arbor_primitives::ServiceOrder;
use pretty_assertions::assert_eq;

use super::*;
use crate::core::test_fixtures::Contender;
use crate::core::{FailureReason, KeyStatus, RegistryError};

#[test]
fn patterns_parse_by_form() {
	assert_eq!(PathPattern::parse("/").unwrap(), PathPattern::Default);
	assert_eq!(PathPattern::parse("/*").unwrap(), PathPattern::Prefix(String::new()));
	assert_eq!(PathPattern::parse("/api/*").unwrap(), PathPattern::Prefix("/api".into()));
	assert_eq!(PathPattern::parse("*.jsp").unwrap(), PathPattern::Extension("jsp".into()));
	assert_eq!(PathPattern::parse("/a/b").unwrap(), PathPattern::Exact("/a/b".into()));
	assert_eq!(PathPattern::parse("/api/*").unwrap().to_string(), "/api/*");

	for bad in ["api", "/a*/b", "*.", "/a/*/b"] {
		assert!(matches!(PathPattern::parse(bad), Err(RegistryError::InvalidPattern { .. })), "{bad}");
	}
}

#[test]
fn prefix_match_splits_path_info() {
	let pattern = PathPattern::Prefix("/api".into());
	let m = pattern.matches("/api/users/1").unwrap();
	assert_eq!(m.servlet_path, "/api");
	assert_eq!(m.path_info.as_deref(), Some("/users/1"));
	assert!(pattern.matches("/apix").is_none());
	assert_eq!(pattern.matches("/api").unwrap().path_info, None);
}

#[test]
fn servlet_resolution_order() {
	let reg = ServletRegistry::new();
	reg.add(Contender::new("default", 0, 1), ["/"]).unwrap();
	reg.add(Contender::new("jsp", 0, 2), ["*.jsp"]).unwrap();
	reg.add(Contender::new("api", 0, 3), ["/api/*"]).unwrap();
	reg.add(Contender::new("api-v2", 0, 4), ["/api/v2/*"]).unwrap();
	reg.add(Contender::new("login", 0, 5), ["/api/login"]).unwrap();

	let name = |path: &str| reg.resolve(path).map(|r| r.servlet.name);
	assert_eq!(name("/api/login"), Some("login"));
	assert_eq!(name("/api/v2/items"), Some("api-v2"));
	assert_eq!(name("/api/v1/items"), Some("api"));
	assert_eq!(name("/api/page.jsp"), Some("api"));
	assert_eq!(name("/pages/index.jsp"), Some("jsp"));
	assert_eq!(name("/static/logo.png"), Some("default"));

	let res = reg.resolve("/api/v2/items").unwrap();
	assert_eq!(res.servlet_path, "/api/v2");
	assert_eq!(res.path_info.as_deref(), Some("/items"));
}

#[test]
fn higher_ranked_servlet_takes_over_pattern() {
	let reg = ServletRegistry::new();
	let low = Contender::new("low", 0, 1);
	let high = Contender::new("high", 10, 2);
	reg.add(Arc::clone(&low), ["/x"]).unwrap();
	let id = reg.add(Arc::clone(&high), ["/x"]).unwrap();

	assert_eq!(reg.resolve("/x").map(|r| r.servlet.name), Some("high"));
	assert_eq!((low.inits(), low.destroys()), (1, 1));

	reg.remove(id).unwrap();
	assert_eq!(reg.resolve("/x").map(|r| r.servlet.name), Some("low"));
}

#[test]
fn invalid_pattern_registers_nothing() {
	let reg = ServletRegistry::new();
	let contender = Contender::new("p", 0, 1);
	assert!(reg.add(Arc::clone(&contender), ["/ok", "bad"]).is_err());
	assert!(reg.registry().is_empty());
	assert_eq!(contender.inits(), 0);
}

#[test]
fn error_page_declarations_expand() {
	assert_eq!(parse_error_page("4xx").unwrap().len(), 100);
	assert_eq!(parse_error_page("5XX").unwrap()[0], ErrorKey::Code(500));
	assert_eq!(parse_error_page("404").unwrap(), vec![ErrorKey::Code(404)]);
	assert_eq!(
		parse_error_page("java.io.IOException").unwrap(),
		vec![ErrorKey::Exception("java.io.IOException".into())]
	);
	assert_eq!(parse_error_page("40").unwrap(), vec![ErrorKey::Exception("40".into())]);
	assert!(parse_error_page("  ").is_err());
}

#[test]
fn class_error_page_shadowed_per_code() {
	let reg = ErrorPageRegistry::new();
	let all_client = reg.add(Contender::new("4xx", 0, 1), ["4xx"]).unwrap();
	let not_found = reg.add(Contender::new("404", 0, 2), ["404"]).unwrap();
	assert_eq!(reg.resolve(404, &[]).map(|p| p.name), Some("4xx"), "earlier registration wins the tie");

	reg.remove(not_found).unwrap();
	let not_found = reg.add(Contender::new("404", 5, 3), ["404"]).unwrap();

	assert_eq!(reg.resolve(404, &[]).map(|p| p.name), Some("404"));
	assert_eq!(reg.resolve(403, &[]).map(|p| p.name), Some("4xx"));
	assert_eq!(reg.registry().status_on(all_client, &ErrorKey::Code(404)), Some(KeyStatus::Shadowed));
	assert_eq!(reg.registry().status_on(all_client, &ErrorKey::Code(403)), Some(KeyStatus::Active));
	assert_eq!(reg.registry().status_on(not_found, &ErrorKey::Code(404)), Some(KeyStatus::Active));
}

#[test]
fn exception_chain_beats_status_code() {
	let reg = ErrorPageRegistry::new();
	reg.add(Contender::new("io", 0, 1), ["java.io.IOException"]).unwrap();
	reg.add(Contender::new("500", 0, 2), ["500"]).unwrap();

	let chain = ["java.io.FileNotFoundException", "java.io.IOException", "java.lang.Exception"];
	assert_eq!(reg.resolve(500, &chain).map(|p| p.name), Some("io"));
	assert_eq!(reg.resolve(500, &["java.lang.RuntimeException"]).map(|p| p.name), Some("500"));
	assert!(reg.resolve(404, &[]).is_none());
}

#[test]
fn listeners_all_active_in_ranking_order() {
	let reg = ListenerRegistry::new();
	reg.add(Contender::new("low", 0, 1), [ListenerKind::Request]).unwrap();
	reg.add(Contender::new("high", 10, 2), [ListenerKind::Request, ListenerKind::Session]).unwrap();
	let failed = reg
		.add(Contender::failing("broken", 20, 3, FailureReason::ServiceNotGettable), [ListenerKind::Request])
		.unwrap();

	let names: Vec<_> = reg.listeners(ListenerKind::Request).iter().map(|p| p.name).collect();
	assert_eq!(names, vec!["high", "low"]);
	assert_eq!(reg.listeners(ListenerKind::Session).len(), 1);
	assert_eq!(
		reg.status(failed).unwrap(),
		vec![(ListenerKind::Request, KeyStatus::Failed(FailureReason::ServiceNotGettable))]
	);
}

#[test]
fn listener_removal_destroys_once() {
	let reg = ListenerRegistry::new();
	let contender = Contender::new("l", 0, 1);
	let id = reg.add(Arc::clone(&contender), ListenerKind::ALL).unwrap();
	assert_eq!(contender.inits(), 1);
	reg.remove(id).unwrap();
	assert_eq!(contender.destroys(), 1);
	assert!(reg.listeners(ListenerKind::Request).is_empty());
}

fn context(name: &str, path: &str, ranking: i32, id: i64) -> ContextInfo {
	ContextInfo::new(name, path, ServiceOrder::new(ranking, id))
}

#[test]
fn servlet_shared_between_paths_and_error_pages_inits_once() {
	let ctx: ContextRegistry<Contender, Contender> = ContextRegistry::new(ContextInfo::runtime_default());
	let servlet = Contender::new("s", 0, 1);
	let handle = ctx.register_servlet(Arc::clone(&servlet), &["/s"], &["500"]).unwrap();

	assert_eq!(servlet.inits(), 1);
	assert_eq!(ctx.error_page(500, &[]).map(|p| p.name), Some("s"));
	assert_eq!(ctx.resolve("/s").map(|r| r.servlet.name), Some("s"));

	ctx.unregister_servlet(handle).unwrap();
	assert_eq!(servlet.destroys(), 1);
	assert!(ctx.resolve("/s").is_none());
}

#[test]
fn relative_uri_strips_context_path() {
	let ctx: ContextRegistry<Contender, Contender> = ContextRegistry::new(context("shop", "/shop", 0, 5));
	assert_eq!(ctx.relative_uri("/shop"), Some(""));
	assert_eq!(ctx.relative_uri("/shop/cart"), Some("/cart"));
	assert_eq!(ctx.relative_uri("/shopping"), None);

	let root: ContextRegistry<Contender, Contender> = ContextRegistry::new(ContextInfo::runtime_default());
	assert_eq!(root.relative_uri("/anything"), Some("/anything"));
}

#[test]
fn handler_registry_prefers_longest_context_path() {
	let handlers: HandlerRegistry<Contender, Contender> = HandlerRegistry::new();
	let root = handlers.add_context(ContextInfo::runtime_default());
	let shop = handlers.add_context(context("shop", "/shop", 0, 5));
	root.register_servlet(Contender::new("root-default", 0, 1), &["/"], &[]).unwrap();
	shop.register_servlet(Contender::new("cart", 0, 2), &["/cart"], &[]).unwrap();

	let (ctx, res) = handlers.resolve("/shop/cart").unwrap();
	assert_eq!(ctx.info().name, "shop");
	assert_eq!(res.servlet.name, "cart");

	// No servlet in the shop context matches: fall through to the root.
	let (ctx, res) = handlers.resolve("/shop/other").unwrap();
	assert_eq!(ctx.info().name, "default");
	assert_eq!(res.servlet.name, "root-default");

	let order: Vec<_> = handlers.contexts().iter().map(|c| c.info().name.clone()).collect();
	assert_eq!(order, vec!["shop", "default"]);
}

#[test]
fn equal_context_paths_order_by_ranking() {
	let handlers: HandlerRegistry<Contender, Contender> = HandlerRegistry::new();
	handlers.add_context(context("b", "/app", 0, 7));
	handlers.add_context(context("a", "/app", 3, 9));
	handlers.add_context(context("c", "/app", 0, 6));
	let order: Vec<_> = handlers.contexts().iter().map(|c| c.info().name.clone()).collect();
	assert_eq!(order, vec!["a", "c", "b"]);
}

#[test]
fn removing_context_destroys_its_handlers() {
	let handlers: HandlerRegistry<Contender, Contender> = HandlerRegistry::new();
	let shop = handlers.add_context(context("shop", "/shop", 0, 5));
	let servlet = Contender::new("cart", 0, 2);
	let listener = Contender::new("l", 0, 3);
	shop.register_servlet(Arc::clone(&servlet), &["/cart"], &["404"]).unwrap();
	shop.register_listener(Arc::clone(&listener), [ListenerKind::Session]).unwrap();

	let snapshot = handlers.snapshots();
	assert_eq!(snapshot[0].servlets.len(), 1);
	assert_eq!(snapshot[0].error_pages.len(), 1);
	assert_eq!(snapshot[0].listeners.len(), 1);

	assert!(handlers.remove_context(5).is_some());
	assert!(handlers.context(5).is_none());
	assert!(!servlet.live());
	assert!(!listener.live());
	assert!(handlers.resolve("/shop/cart").is_none());
}

#[test]
fn servlet_without_keys_is_rejected() {
	let ctx: ContextRegistry<Contender, Contender> = ContextRegistry::new(ContextInfo::runtime_default());
	assert_eq!(ctx.register_servlet(Contender::new("s", 0, 1), &[], &[]).unwrap_err(), RegistryError::NoKeys);
}
