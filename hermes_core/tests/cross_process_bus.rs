//! Cross-process integration tests.
//!
//! These verify that two independent OS processes sharing a bus name really
//! exchange
//! messages through the named kernel objects. The child process is this
//! same test binary re-invoked with env-var flags; it prints a parseable
//! summary on stdout for the parent to assert against.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use hermes_core::{BusConfig, MappedRegion, MessageBus};

/// Env var that marks a child process invocation.
const CHILD_ENV: &str = "HERMES_IPC_CHILD";
/// Env var carrying the bus name to the child.
const BUS_NAME_ENV: &str = "HERMES_IPC_BUS";
/// Env var carrying the message count to the child.
const MSG_COUNT_ENV: &str = "HERMES_IPC_COUNT";
/// Payload marking end of stream.
const SENTINEL: &[u8] = b"__end__";
/// Payload the child publishes once it is subscribed.
const READY: &[u8] = b"__ready__";

fn is_child() -> bool {
    std::env::var(CHILD_ENV).is_ok()
}

fn unique_bus_name(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{}_{}_{}", prefix, std::process::id(), nanos)
}

fn patient_config(name: &str) -> BusConfig {
    let mut config = BusConfig::new(name);
    config.min_message_age_ms = 60_000;
    config
}

fn spawn_child(test_name: &str, bus_name: &str, msg_count: usize) -> std::process::Child {
    let exe = std::env::current_exe().expect("current_exe");
    Command::new(exe)
        .args([test_name, "--exact", "--nocapture"])
        .env(CHILD_ENV, "1")
        .env(BUS_NAME_ENV, bus_name)
        .env(MSG_COUNT_ENV, msg_count.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn child process")
}

fn parse_child_output(stdout: &str) -> (usize, Vec<String>) {
    let mut count = 0;
    let mut values = Vec::new();
    for line in stdout.lines() {
        if let Some(n) = line.strip_prefix("RECEIVED:") {
            count = n.parse().unwrap_or(0);
        } else if let Some(v) = line.strip_prefix("V:") {
            values.push(v.to_string());
        }
    }
    (count, values)
}

// ============================================================================
// Test 1: parent publishes, child subscribes
// ============================================================================

/// Child entry: join the bus, announce readiness, receive until the
/// sentinel, print a summary.
fn child_subscriber() {
    let bus_name = std::env::var(BUS_NAME_ENV).expect("HERMES_IPC_BUS not set");
    let expected: usize = std::env::var(MSG_COUNT_ENV)
        .expect("HERMES_IPC_COUNT not set")
        .parse()
        .expect("invalid count");

    let bus = MessageBus::new(&patient_config(&bus_name)).expect("child: bus");
    let sub = bus.subscribe().expect("child: subscribe");

    // The parent holds its stream until this arrives, so nothing can be
    // published before the child's cursor snapshot.
    bus.publish(READY.to_vec())
        .expect("child: ready")
        .wait()
        .expect("child: ready wait");

    let mut received = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(15);
    while Instant::now() < deadline {
        match sub.recv_timeout(Duration::from_millis(200)) {
            Some(message) if message == SENTINEL => break,
            Some(message) => received.push(String::from_utf8_lossy(&message).into_owned()),
            None => {}
        }
    }

    assert!(
        received.len() <= expected,
        "child: received more than published"
    );

    println!("RECEIVED:{}", received.len());
    for v in &received {
        println!("V:{}", v);
    }
}

#[test]
fn cross_process_parent_to_child() {
    if is_child() {
        child_subscriber();
        return;
    }

    let bus_name = unique_bus_name("hermes_xproc_p2c");
    let msg_count = 100usize;

    // Parent joins first so the kernel objects exist before the child races
    // in; the child may still create them first, either order works.
    let bus = MessageBus::new(&patient_config(&bus_name)).expect("parent: bus");
    let sub = bus.subscribe().expect("parent: subscribe");

    let child = spawn_child("cross_process_parent_to_child", &bus_name, msg_count);

    // Wait for the child's ready marker: messages published before its
    // cursor snapshot would (correctly) never reach it.
    let ready = sub.recv_timeout(Duration::from_secs(10));
    assert_eq!(ready.as_deref(), Some(READY), "child never became ready");

    for i in 0..msg_count {
        bus.publish(format!("m{}", i).into_bytes())
            .expect("parent: publish")
            .wait()
            .expect("parent: publish wait");
    }
    bus.publish(SENTINEL.to_vec())
        .expect("parent: sentinel")
        .wait()
        .expect("parent: sentinel wait");

    let output = child.wait_with_output().expect("child wait failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "child failed (exit {:?}):\nstdout: {}\nstderr: {}",
        output.status.code(),
        stdout,
        stderr
    );

    let (received_count, values) = parse_child_output(&stdout);
    assert_eq!(
        received_count, msg_count,
        "child missed messages.\nstdout: {}\nstderr: {}",
        stdout, stderr
    );

    // Delivery preserves publish order.
    for (i, v) in values.iter().enumerate() {
        assert_eq!(v, &format!("m{}", i), "out-of-order delivery at {}", i);
    }

    assert_eq!(bus.messages_published() as usize, msg_count + 1);
    // The parent saw exactly the child's ready marker, never its own
    // traffic back.
    assert_eq!(bus.messages_received(), 1);

    drop(bus);
    MappedRegion::clear_storage(&bus_name);
}

// ============================================================================
// Test 2: child publishes, parent subscribes
// ============================================================================

/// Child entry: join the bus and publish a numbered stream.
fn child_publisher() {
    let bus_name = std::env::var(BUS_NAME_ENV).expect("HERMES_IPC_BUS not set");
    let count: usize = std::env::var(MSG_COUNT_ENV)
        .expect("HERMES_IPC_COUNT not set")
        .parse()
        .expect("invalid count");

    let bus = MessageBus::new(&patient_config(&bus_name)).expect("child: bus");

    let batch: Vec<Vec<u8>> = (0..count)
        .map(|i| format!("c{}", i).into_bytes())
        .collect();
    bus.publish_batch(batch)
        .expect("child: publish")
        .wait()
        .expect("child: publish wait");

    println!("PUBLISHED:{}", bus.messages_published());
}

#[test]
fn cross_process_child_to_parent() {
    if is_child() {
        child_publisher();
        return;
    }

    let bus_name = unique_bus_name("hermes_xproc_c2p");
    let msg_count = 64usize;

    let bus = MessageBus::new(&patient_config(&bus_name)).expect("parent: bus");
    let sub = bus.subscribe().expect("parent: subscribe");

    let child = spawn_child("cross_process_child_to_parent", &bus_name, msg_count);

    let mut received = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(15);
    while received.len() < msg_count && Instant::now() < deadline {
        if let Some(message) = sub.recv_timeout(Duration::from_millis(200)) {
            received.push(String::from_utf8_lossy(&message).into_owned());
        }
    }

    let output = child.wait_with_output().expect("child wait failed");
    assert!(
        output.status.success(),
        "child failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    assert_eq!(received.len(), msg_count, "parent missed messages");
    for (i, v) in received.iter().enumerate() {
        assert_eq!(v, &format!("c{}", i), "out-of-order delivery at {}", i);
    }
    assert_eq!(bus.messages_received() as usize, msg_count);

    drop(bus);
    MappedRegion::clear_storage(&bus_name);
}
