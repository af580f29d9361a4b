//! End-to-end hot-reload scenarios driven through manual watcher sweeps

mod common;

use ember_bot::domain::entities::{Message, MessageReceivedEvent};

use common::Fixture;

fn run_command(fix: &Fixture, name: &str) -> Option<String> {
    let msg = Message::from_command("chat", name, vec![]);
    fix.commands.handle(&msg).unwrap()
}

#[test]
fn sweep_loads_new_bundle_and_registers() {
    let fix = Fixture::new();
    fix.write_bundle("greeter.so", "name=greeter\nversion=1\ncmd=hello\nreply=hello from v1\n");

    fix.watcher.sweep();

    assert!(fix.host.is_enabled("greeter"));
    assert_eq!(run_command(&fix, "hello").as_deref(), Some("hello from v1"));
    assert_eq!(fix.bus.handlers_for("greeter"), 1);
    assert_eq!(fix.watcher.bound_bundles().len(), 1);
    assert_eq!(fix.staged_files(), 1);
}

#[test]
fn unchanged_bundle_is_not_reloaded() {
    let fix = Fixture::new();
    fix.write_bundle("greeter.so", "name=greeter\ncmd=hello\n");

    fix.watcher.sweep();
    fix.watcher.sweep();
    fix.watcher.sweep();

    assert_eq!(fix.loader.attempts(), 1);
    assert_eq!(fix.loader.counters_for("greeter").enables(), 1);
    assert_eq!(fix.staged_files(), 1);
}

#[test]
fn change_while_enabled_queues_update_and_keeps_old_code() {
    let fix = Fixture::new();
    fix.write_bundle("greeter.so", "name=greeter\nversion=1\ncmd=hello\nreply=v1\n");
    fix.watcher.sweep();

    fix.write_bundle("greeter.so", "name=greeter\nversion=2\ncmd=hello\nreply=v2\n");
    fix.watcher.sweep();

    // Old code keeps serving; the new content is staged for later.
    assert_eq!(run_command(&fix, "hello").as_deref(), Some("v1"));
    let pending = fix.host.pending_updates();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].extension_name, "greeter");
    assert_eq!(fix.staged_files(), 2);

    // Repeated sweeps do not re-queue or re-stage the same hash.
    fix.watcher.sweep();
    assert_eq!(fix.host.pending_updates().len(), 1);
    assert_eq!(fix.staged_files(), 2);
    assert_eq!(fix.loader.attempts(), 1);
}

#[test]
fn disabling_applies_the_pending_update() {
    let fix = Fixture::new();
    fix.write_bundle("greeter.so", "name=greeter\nversion=1\ncmd=hello\nreply=v1\n");
    fix.watcher.sweep();

    fix.write_bundle("greeter.so", "name=greeter\nversion=2\ncmd=hello\nreply=v2\n");
    fix.watcher.sweep();
    assert_eq!(run_command(&fix, "hello").as_deref(), Some("v1"));

    fix.host.disable("greeter").unwrap();

    // The new code is live, the queue is empty, and only the new staged
    // copy remains.
    assert!(fix.host.is_enabled("greeter"));
    assert_eq!(run_command(&fix, "hello").as_deref(), Some("v2"));
    assert!(fix.host.pending_updates().is_empty());
    assert_eq!(fix.staged_files(), 1);

    let counters = fix.loader.counters_for("greeter");
    assert_eq!(counters.enables(), 2);
    assert_eq!(counters.disables(), 1);

    // The watcher settles on the applied hash without re-queueing it.
    fix.watcher.sweep();
    assert!(fix.host.pending_updates().is_empty());
}

#[test]
fn newer_change_supersedes_a_queued_update() {
    let fix = Fixture::new();
    fix.write_bundle("greeter.so", "name=greeter\ncmd=hello\nreply=v1\n");
    fix.watcher.sweep();

    fix.write_bundle("greeter.so", "name=greeter\ncmd=hello\nreply=v2\n");
    fix.watcher.sweep();
    fix.write_bundle("greeter.so", "name=greeter\ncmd=hello\nreply=v3\n");
    fix.watcher.sweep();

    // One pending entry, one staged copy for it; the v2 copy is gone.
    assert_eq!(fix.host.pending_updates().len(), 1);
    assert_eq!(fix.staged_files(), 2);

    fix.host.disable("greeter").unwrap();
    assert_eq!(run_command(&fix, "hello").as_deref(), Some("v3"));
}

#[test]
fn reverting_content_drops_the_queued_update() {
    let fix = Fixture::new();
    let v1 = "name=greeter\ncmd=hello\nreply=v1\n";
    fix.write_bundle("greeter.so", v1);
    fix.watcher.sweep();

    fix.write_bundle("greeter.so", "name=greeter\ncmd=hello\nreply=v2\n");
    fix.watcher.sweep();
    assert_eq!(fix.host.pending_updates().len(), 1);

    fix.write_bundle("greeter.so", v1);
    fix.watcher.sweep();

    assert!(fix.host.pending_updates().is_empty());
    assert_eq!(fix.staged_files(), 1);
    assert_eq!(run_command(&fix, "hello").as_deref(), Some("v1"));
}

#[test]
fn change_while_disabled_reloads_immediately() {
    let fix = Fixture::new();
    fix.write_bundle("greeter.so", "name=greeter\ncmd=hello\nreply=v1\n");
    fix.watcher.sweep();

    fix.host.disable("greeter").unwrap();
    assert!(fix.commands.is_empty());

    fix.write_bundle("greeter.so", "name=greeter\ncmd=hello\nreply=v2\n");
    fix.watcher.sweep();

    // Reload implies enable; the old staged copy is gone.
    assert!(fix.host.is_enabled("greeter"));
    assert_eq!(run_command(&fix, "hello").as_deref(), Some("v2"));
    assert_eq!(fix.staged_files(), 1);
    assert!(fix.host.pending_updates().is_empty());
}

#[test]
fn failed_enable_leaves_no_trace() {
    let fix = Fixture::new();
    fix.write_bundle("broken.so", "name=broken\ncmd=oops\nfail=enable\n");

    fix.watcher.sweep();

    // All-or-nothing: the partial registrations made before the failure
    // are rolled back and the staged copy is deleted.
    assert!(fix.host.get("broken").is_none());
    assert!(fix.commands.is_empty());
    assert_eq!(fix.bus.handler_count(), 0);
    assert_eq!(fix.staged_files(), 0);

    let failed = fix.watcher.failed_bundles();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].reason.contains("scripted enable failure"));
}

#[test]
fn failed_bundle_retries_only_on_hash_change() {
    let fix = Fixture::new();
    fix.write_bundle("broken.so", "name=broken\nfail=constructor\n");

    fix.watcher.sweep();
    assert_eq!(fix.loader.attempts(), 1);

    // Same content, no retry.
    fix.watcher.sweep();
    fix.watcher.sweep();
    assert_eq!(fix.loader.attempts(), 1);

    // Changed but still broken: exactly one more attempt.
    fix.write_bundle("broken.so", "name=broken\nfail=constructor\nnote=edited\n");
    fix.watcher.sweep();
    assert_eq!(fix.loader.attempts(), 2);
    assert_eq!(fix.watcher.failed_bundles().len(), 1);

    // Fixed: loads on the next sweep.
    fix.write_bundle("broken.so", "name=broken\ncmd=fixed\n");
    fix.watcher.sweep();
    assert!(fix.host.is_enabled("broken"));
    assert!(fix.watcher.failed_bundles().is_empty());
}

#[test]
fn unload_purges_every_registration() {
    let fix = Fixture::new();
    fix.write_bundle("greeter.so", "name=greeter\ncmd=hello\n");
    fix.watcher.sweep();

    let counters = fix.loader.counters_for("greeter");
    let mut event = MessageReceivedEvent::new(Message::from_text("chat", "hi"));
    fix.bus.dispatch(&mut event);
    assert_eq!(counters.events(), 1);

    fix.host.unload("greeter").unwrap();

    assert!(fix.host.get("greeter").is_none());
    assert!(fix.commands.is_empty());
    assert_eq!(fix.bus.handler_count(), 0);
    assert_eq!(counters.disables(), 1);
    assert_eq!(fix.staged_files(), 0);

    // Nothing reaches the unloaded extension.
    let mut event = MessageReceivedEvent::new(Message::from_text("chat", "hi again"));
    fix.bus.dispatch(&mut event);
    assert_eq!(counters.events(), 1);
}

#[test]
fn removing_the_file_keeps_the_instance_loaded() {
    let fix = Fixture::new();
    fix.write_bundle("greeter.so", "name=greeter\ncmd=hello\nreply=still here\n");
    fix.watcher.sweep();

    fix.remove_bundle("greeter.so");
    fix.watcher.sweep();

    assert!(fix.host.is_enabled("greeter"));
    assert_eq!(run_command(&fix, "hello").as_deref(), Some("still here"));
    assert!(fix.watcher.bound_bundles().is_empty());

    // Dropping the file back in while the same content is loaded rebinds
    // instead of recording a failure.
    fix.write_bundle("greeter.so", "name=greeter\ncmd=hello\nreply=still here\n");
    fix.watcher.sweep();
    assert_eq!(fix.watcher.failed_bundles().len(), 0);
    assert_eq!(fix.host.names().len(), 1);
}

#[test]
fn disable_then_enable_round_trip() {
    let fix = Fixture::new();
    fix.write_bundle("greeter.so", "name=greeter\ncmd=hello\nreply=hi\n");
    fix.watcher.sweep();

    fix.host.disable("greeter").unwrap();
    assert!(!fix.host.is_enabled("greeter"));
    assert!(fix.commands.is_empty());
    assert_eq!(fix.bus.handler_count(), 0);

    fix.host.enable("greeter").unwrap();
    assert!(fix.host.is_enabled("greeter"));
    assert_eq!(run_command(&fix, "hello").as_deref(), Some("hi"));

    let counters = fix.loader.counters_for("greeter");
    assert_eq!(counters.enables(), 2);
    assert_eq!(counters.disables(), 1);
}

#[test]
fn second_bundle_with_same_name_is_rejected() {
    let fix = Fixture::new();
    fix.write_bundle("greeter-a.so", "name=greeter\ncmd=hello\nprovenance=a\n");
    fix.write_bundle("greeter-b.so", "name=greeter\ncmd=hello\nprovenance=b\n");

    fix.watcher.sweep();

    // Directory order decides the winner; the loser is recorded as failed
    // and its staged copy is cleaned up.
    assert_eq!(fix.host.names().len(), 1);
    assert_eq!(fix.watcher.bound_bundles().len(), 1);
    assert_eq!(fix.watcher.failed_bundles().len(), 1);
    assert_eq!(fix.staged_files(), 1);
}

#[test]
fn shutdown_is_idempotent() {
    let fix = Fixture::new();
    fix.write_bundle("alpha.so", "name=alpha\ncmd=a\n");
    fix.write_bundle("beta.so", "name=beta\ncmd=b\n");
    fix.watcher.sweep();
    assert_eq!(fix.host.names().len(), 2);

    fix.watcher.shutdown();
    fix.watcher.shutdown();

    assert_eq!(fix.loader.counters_for("alpha").disables(), 1);
    assert_eq!(fix.loader.counters_for("beta").disables(), 1);
    assert!(fix.host.names().is_empty());
    assert!(fix.commands.is_empty());
    assert_eq!(fix.bus.handler_count(), 0);
    assert!(!fix.host.staging_dir().exists());
    assert!(fix.watcher.bound_bundles().is_empty());

    // Sweeps after shutdown are inert.
    fix.write_bundle("gamma.so", "name=gamma\ncmd=c\n");
    fix.watcher.sweep();
    assert!(fix.host.names().is_empty());
}
