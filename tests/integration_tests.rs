//! Integration tests for portward
//!
//! These tests drive the real operation layer end-to-end - store
//! persistence, locking, reconciliation, schedule - against the actual
//! iptables backend, with the system binaries replaced by the mock script
//! in `tests/mock_iptables.sh` so no privileges (and no live firewall) are
//! required.

use std::path::PathBuf;
use std::sync::{Mutex, Once};

use tempfile::TempDir;

use portward::core::iptables::IptablesFilter;
use portward::core::ruleset::{Family, FirewallStore, Protocol, ProtocolSelection, ADMIN_PORT};
use portward::core::store::Store;
use portward::core::{ops, schedule};
use portward::{validators, Error};

static MOCK_INIT: Once = Once::new();

/// Serializes every test that spawns mock commands: the command log path
/// travels through a process-global environment variable, so concurrent
/// spawns would interleave their records.
static TEST_MUTEX: Mutex<()> = Mutex::new(());

fn mock_script_path() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("mock_iptables.sh");
    path
}

/// Points every system binary portward drives at the mock script.
fn setup_mock_commands() {
    MOCK_INIT.call_once(|| {
        let mock = mock_script_path();
        // SAFETY: called once before any test spawns a command; the values
        // never change afterwards.
        unsafe {
            std::env::set_var("PORTWARD_IPTABLES_COMMAND", &mock);
            std::env::set_var("PORTWARD_IP6TABLES_COMMAND", &mock);
            std::env::set_var("PORTWARD_SERVICE_COMMAND", &mock);
        }
    });
}

#[test]
fn allow_then_disallow_round_trips_through_the_store() {
    setup_mock_commands();
    let _guard = TEST_MUTEX.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let mut filter = IptablesFilter::with_ipv6(false);

    ops::allow(
        dir.path(),
        ProtocolSelection::Tcp,
        8080,
        Family::V4,
        false,
        &mut filter,
        None,
    )
    .unwrap();

    let store = ops::list(dir.path()).unwrap();
    assert!(store.ipv4.tcp.contains(&8080));

    ops::disallow(
        dir.path(),
        ProtocolSelection::Tcp,
        8080,
        Family::V4,
        false,
        &mut filter,
        None,
    )
    .unwrap();

    let store = ops::list(dir.path()).unwrap();
    assert!(!store.ipv4.tcp.contains(&8080));
}

#[test]
fn allow_both_gains_tcp_and_udp_sorted() {
    setup_mock_commands();
    let _guard = TEST_MUTEX.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let mut filter = IptablesFilter::with_ipv6(false);

    ops::allow(
        dir.path(),
        ProtocolSelection::Both,
        443,
        Family::V4,
        false,
        &mut filter,
        None,
    )
    .unwrap();
    ops::allow(
        dir.path(),
        ProtocolSelection::Tcp,
        80,
        Family::V4,
        false,
        &mut filter,
        None,
    )
    .unwrap();

    let store = ops::list(dir.path()).unwrap();
    assert_eq!(store.ipv4.tcp, vec![22, 80, 443]);
    assert_eq!(store.ipv4.udp, vec![443]);
}

#[test]
fn out_of_range_port_fails_before_the_store_is_touched() {
    setup_mock_commands();
    let _guard = TEST_MUTEX.lock().unwrap();
    let dir = TempDir::new().unwrap();

    let err = validators::validate_port(70000).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));

    // Nothing was created for the rejected call
    assert!(!dir.path().join("firewall.json").exists());
}

#[test]
fn double_allow_is_a_conflict() {
    setup_mock_commands();
    let _guard = TEST_MUTEX.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let mut filter = IptablesFilter::with_ipv6(false);

    ops::allow(
        dir.path(),
        ProtocolSelection::Udp,
        5353,
        Family::V4,
        false,
        &mut filter,
        None,
    )
    .unwrap();
    let err = ops::allow(
        dir.path(),
        ProtocolSelection::Udp,
        5353,
        Family::V4,
        false,
        &mut filter,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[test]
fn reload_is_idempotent_against_the_persisted_store() {
    setup_mock_commands();
    let _guard = TEST_MUTEX.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let mut filter = IptablesFilter::with_ipv6(true);

    ops::allow(
        dir.path(),
        ProtocolSelection::Tcp,
        8080,
        Family::V4,
        false,
        &mut filter,
        None,
    )
    .unwrap();

    let first = ops::reload(dir.path(), &mut filter, None).unwrap();
    let store_after_first = ops::list(dir.path()).unwrap();
    let second = ops::reload(dir.path(), &mut filter, None).unwrap();
    let store_after_second = ops::list(dir.path()).unwrap();

    assert_eq!(first.rules_applied, second.rules_applied);
    assert!(first.failures.is_empty() && second.failures.is_empty());
    assert_eq!(store_after_first, store_after_second);
}

#[test]
fn reload_issues_the_expected_filter_commands() {
    setup_mock_commands();
    let _guard = TEST_MUTEX.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("commands.log");

    // SAFETY: guarded by TEST_MUTEX; removed before the guard drops.
    unsafe {
        std::env::set_var("MOCK_IPTABLES_LOG", &log_path);
    }

    let mut filter = IptablesFilter::with_ipv6(false);
    let outcome = ops::reload(dir.path(), &mut filter, None).unwrap();

    unsafe {
        std::env::remove_var("MOCK_IPTABLES_LOG");
    }

    assert!(outcome.failures.is_empty());
    let log = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = log.lines().collect();

    assert_eq!(lines.first(), Some(&"-P INPUT ACCEPT"));
    assert!(lines.contains(&"-A INPUT -m state --state ESTABLISHED -j ACCEPT"));
    assert!(lines.contains(&"-A INPUT -p tcp --dport 22 -j ACCEPT"));
    assert!(lines.contains(&"-A INPUT -i lo -j ACCEPT"));
    assert!(lines.contains(&"-A INPUT -p icmp -j ACCEPT"));
    assert!(lines.contains(&"-P INPUT DROP"));
    assert_eq!(lines.last(), Some(&"fail2ban restart"));

    // Policy is opened before any flush and dropped only after the rules
    let accept_idx = lines.iter().position(|l| *l == "-P INPUT ACCEPT").unwrap();
    let flush_idx = lines.iter().position(|l| *l == "-F").unwrap();
    let drop_idx = lines.iter().position(|l| *l == "-P INPUT DROP").unwrap();
    assert!(accept_idx < flush_idx && flush_idx < drop_idx);
}

#[test]
fn admin_port_is_restored_on_reload() {
    setup_mock_commands();
    let _guard = TEST_MUTEX.lock().unwrap();
    let dir = TempDir::new().unwrap();

    // Persist a store without the admin port
    {
        let store_file = Store::open(dir.path()).unwrap();
        let mut store = FirewallStore::default();
        store.ipv4.tcp.clear();
        store.ipv6.tcp.clear();
        store_file.save(&store).unwrap();
    }

    let mut filter = IptablesFilter::with_ipv6(true);
    ops::reload(dir.path(), &mut filter, None).unwrap();

    let store = ops::list(dir.path()).unwrap();
    assert!(store.ipv4.tcp.contains(&ADMIN_PORT));
    assert!(store.ipv6.tcp.contains(&ADMIN_PORT));
}

#[test]
fn upnp_registration_follows_the_open_port() {
    setup_mock_commands();
    let _guard = TEST_MUTEX.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let mut filter = IptablesFilter::with_ipv6(false);

    // No gateway in the test environment: mutation succeeds, the sync pass
    // degrades to a recorded failure.
    let outcome = ops::allow(
        dir.path(),
        ProtocolSelection::Tcp,
        8080,
        Family::V4,
        true,
        &mut filter,
        None,
    )
    .unwrap();
    assert!(outcome.failures.is_empty());

    let store = ops::list(dir.path()).unwrap();
    assert!(store.ipv4.tcp.contains(&8080));
    assert!(store.upnp.ports.tcp.contains(&8080));

    // Closing the port drops the registration with it
    ops::disallow(
        dir.path(),
        ProtocolSelection::Tcp,
        8080,
        Family::V4,
        false,
        &mut filter,
        None,
    )
    .unwrap();
    let store = ops::list(dir.path()).unwrap();
    assert!(!store.upnp.ports.tcp.contains(&8080));
}

#[test]
fn schedule_lifecycle_matches_the_store_flag() {
    setup_mock_commands();
    let _guard = TEST_MUTEX.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let cron = dir.path().join("cron-entry");

    assert!(matches!(
        schedule::check(dir.path()),
        Err(Error::NotConfigured(_))
    ));

    schedule::install(dir.path(), &cron).unwrap();
    assert!(schedule::check(dir.path()).is_ok());
    assert!(ops::list(dir.path()).unwrap().upnp.cron);

    schedule::remove(dir.path(), &cron).unwrap();
    assert!(matches!(
        schedule::check(dir.path()),
        Err(Error::NotConfigured(_))
    ));
}

#[test]
fn stop_flushes_and_unschedules() {
    setup_mock_commands();
    let _guard = TEST_MUTEX.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let cron = dir.path().join("cron-entry");
    schedule::install(dir.path(), &cron).unwrap();

    let mut filter = IptablesFilter::with_ipv6(false);
    let outcome = ops::stop(dir.path(), &cron, &mut filter).unwrap();

    assert!(outcome.failures.is_empty());
    assert!(!cron.exists());
    assert!(!ops::list(dir.path()).unwrap().upnp.cron);
}

#[test]
fn store_backup_tracks_the_previous_version() {
    setup_mock_commands();
    let _guard = TEST_MUTEX.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let mut filter = IptablesFilter::with_ipv6(false);

    ops::allow(
        dir.path(),
        ProtocolSelection::Tcp,
        8080,
        Family::V4,
        false,
        &mut filter,
        None,
    )
    .unwrap();
    ops::allow(
        dir.path(),
        ProtocolSelection::Tcp,
        9090,
        Family::V4,
        false,
        &mut filter,
        None,
    )
    .unwrap();

    let backup: FirewallStore = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("firewall.json.old")).unwrap(),
    )
    .unwrap();
    assert!(backup.ipv4.tcp.contains(&8080));
    assert!(!backup.ipv4.tcp.contains(&9090));
}

#[test]
fn filter_protocol_strings_reach_the_engine() {
    setup_mock_commands();
    let _guard = TEST_MUTEX.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("commands.log");

    let mut filter = IptablesFilter::with_ipv6(false);
    ops::allow(
        dir.path(),
        ProtocolSelection::Both,
        5000,
        Family::V4,
        false,
        &mut filter,
        None,
    )
    .unwrap();

    // SAFETY: guarded by TEST_MUTEX; removed before the guard drops.
    unsafe {
        std::env::set_var("MOCK_IPTABLES_LOG", &log_path);
    }
    ops::reload(dir.path(), &mut filter, None).unwrap();
    unsafe {
        std::env::remove_var("MOCK_IPTABLES_LOG");
    }

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("-A INPUT -p tcp --dport 5000 -j ACCEPT"));
    assert!(log.contains("-A INPUT -p udp --dport 5000 -j ACCEPT"));
}

#[test]
fn protocol_names_parse_case_sensitively_in_the_store() {
    // The persisted document uses upper-case protocol keys
    let json = r#"{"ipv4": {"TCP": [22], "UDP": []}, "ipv6": {"TCP": [22], "UDP": []}, "UPNP": {"ports": {"TCP": [], "UDP": []}, "cron": false}}"#;
    let store: FirewallStore = serde_json::from_str(json).unwrap();
    assert_eq!(store.ipv4.ports(Protocol::Tcp), &[22]);
}
