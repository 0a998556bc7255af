use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use arbor_primitives::{ConfigIdentity, Properties};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use super::*;

fn updated(pid: &str, change_count: u64) -> ConfigurationEvent {
	ConfigurationEvent::Updated {
		identity: ConfigIdentity::singleton(pid),
		properties: Arc::new(Properties::new()),
		change_count,
	}
}

fn label(event: &ConfigurationEvent) -> String {
	match event {
		ConfigurationEvent::Updated {
			identity, change_count, ..
		} => format!("{}#{change_count}", identity.pid),
		other => format!("{}:{}", other.kind(), other.identity().pid),
	}
}

/// Listener that blocks on the first event for pid `slow` until released.
fn blocking_listener(
	seen: Arc<Mutex<Vec<String>>>,
) -> (Arc<dyn ConfigurationListener>, mpsc::Receiver<()>, mpsc::Sender<()>) {
	let (entered_tx, entered_rx) = mpsc::channel();
	let (release_tx, release_rx) = mpsc::channel::<()>();
	let entered_tx = Mutex::new(entered_tx);
	let release_rx = Mutex::new(release_rx);
	let listener = move |event: &ConfigurationEvent| {
		if label(event) == "slow#1" {
			let _ = entered_tx.lock().send(());
			let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
		}
		seen.lock().push(label(event));
	};
	(Arc::new(listener), entered_rx, release_tx)
}

#[test]
fn slow_listener_does_not_block_other_pids() {
	let source = Arc::new(EventSource::new());
	let seen = Arc::new(Mutex::new(Vec::new()));
	let (listener, entered, release) = blocking_listener(Arc::clone(&seen));
	source.subscribe(listener);

	let background = {
		let source = Arc::clone(&source);
		thread::spawn(move || source.publish(updated("slow", 1)))
	};
	entered.recv_timeout(Duration::from_secs(5)).unwrap();

	source.publish(updated("fast", 1));
	assert_eq!(*seen.lock(), vec!["fast#1".to_owned()]);

	// Same pid as the blocked delivery: queued behind it, not delivered here.
	source.publish(updated("slow", 2));
	assert_eq!(*seen.lock(), vec!["fast#1".to_owned()]);

	release.send(()).unwrap();
	background.join().unwrap();
	assert_eq!(
		*seen.lock(),
		vec!["fast#1".to_owned(), "slow#1".to_owned(), "slow#2".to_owned()]
	);
	assert_eq!(source.pending_lanes(), 0);
}

#[test]
fn per_pid_order_is_commit_order() {
	let source = EventSource::new();
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	source.subscribe(Arc::new(move |event: &ConfigurationEvent| sink.lock().push(label(event))));

	source.enqueue(updated("a", 1));
	source.enqueue(updated("b", 1));
	source.enqueue(updated("a", 2));
	source.enqueue(ConfigurationEvent::Deleted {
		identity: ConfigIdentity::singleton("a"),
	});
	source.drain();

	let of = |pid: &str| -> Vec<String> { seen.lock().iter().filter(|l| l.contains(pid)).cloned().collect() };
	assert_eq!(of("a"), vec!["a#1", "a#2", "deleted:a"]);
	assert_eq!(of("b"), vec!["b#1"]);
	assert_eq!(source.pending_lanes(), 0);
}

#[test]
fn panicking_listener_is_isolated() {
	let source = EventSource::new();
	let seen = Arc::new(Mutex::new(Vec::new()));
	source.subscribe(Arc::new(|_: &ConfigurationEvent| panic!("listener exploded")));
	let sink = Arc::clone(&seen);
	let second = source.subscribe(Arc::new(move |event: &ConfigurationEvent| sink.lock().push(label(event))));

	source.publish(updated("a", 1));
	assert_eq!(*seen.lock(), vec!["a#1".to_owned()]);

	assert!(source.unsubscribe(second));
	assert!(!source.unsubscribe(second));
	assert_eq!(source.subscriber_count(), 1);
}
