// tests/allocation_and_launch.rs

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use simplequeue::agent::identity::resolve_engine_id_with_env;
use simplequeue::driver::allocation::{count_slots, discover_with_env, AllocationSource};
use simplequeue::driver::launcher::{advertised_address, build_command_line};
use simplequeue::errors::SqError;

fn no_env(_: &str) -> Option<PathBuf> {
    None
}

#[test]
fn count_slots_ignores_blanks_and_comments() {
    let contents = "node1\nnode1\n\n# header\n  node2  \n";
    assert_eq!(count_slots(contents), 3);
    assert_eq!(count_slots(""), 0);
}

#[test]
fn explicit_workers_win() {
    let allocation = discover_with_env(Some(4), Some(Path::new("/does/not/exist")), no_env).unwrap();
    assert_eq!(allocation.workers, 4);
    assert_eq!(allocation.source, AllocationSource::Explicit);
}

#[test]
fn node_file_is_read_from_the_environment() {
    let dir = tempfile::tempdir().unwrap();
    let nodes = dir.path().join("nodes");
    std::fs::write(&nodes, "a\nb\nc\n").unwrap();

    let env_path = nodes.clone();
    let allocation = discover_with_env(None, None, move |name| {
        (name == "LSB_DJOB_HOSTFILE").then(|| env_path.clone())
    })
    .unwrap();

    assert_eq!(allocation.workers, 3);
    assert_eq!(allocation.source, AllocationSource::NodeFile(nodes));
}

#[test]
fn missing_allocation_is_fatal() {
    let result = discover_with_env(None, None, no_env);
    assert!(matches!(result, Err(SqError::ConfigError(_))));

    let result = discover_with_env(None, Some(Path::new("/does/not/exist")), no_env);
    assert!(matches!(result, Err(SqError::ConfigError(_))));
}

#[test]
fn empty_allocation_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let nodes = dir.path().join("nodes");
    std::fs::write(&nodes, "# nobody\n\n").unwrap();

    let result = discover_with_env(None, Some(&nodes), no_env);
    assert!(matches!(result, Err(SqError::ConfigError(_))));
    assert!(matches!(
        discover_with_env(Some(0), None, no_env),
        Err(SqError::ConfigError(_))
    ));
}

#[test]
fn launcher_command_line_substitutes_workers_and_appends_agent() {
    let launcher = vec!["mpirun".to_string(), "-n".to_string(), "{workers}".to_string()];
    let argv = build_command_line(
        &launcher,
        12,
        Path::new("/opt/bin/simplequeue"),
        "head:8765",
        Path::new("/scratch/logs"),
    );

    assert_eq!(
        argv,
        vec![
            "mpirun",
            "-n",
            "12",
            "/opt/bin/simplequeue",
            "agent",
            "--connect",
            "head:8765",
            "--log-dir",
            "/scratch/logs",
        ]
    );
}

#[test]
fn advertised_address_replaces_unspecified_ip() {
    let any: SocketAddr = "0.0.0.0:8765".parse().unwrap();
    assert_eq!(advertised_address(any, "head01"), "head01:8765");

    let fixed: SocketAddr = "10.0.0.5:9000".parse().unwrap();
    assert_eq!(advertised_address(fixed, "head01"), "10.0.0.5:9000");
}

#[test]
fn engine_id_resolution_order() {
    let env = |name: &str| match name {
        "OMPI_COMM_WORLD_RANK" => Some("5".to_string()),
        "PMI_RANK" => Some("9".to_string()),
        _ => None,
    };

    assert_eq!(resolve_engine_id_with_env(Some("explicit"), env).unwrap(), "explicit");
    assert_eq!(resolve_engine_id_with_env(None, env).unwrap(), "5");
    assert_eq!(resolve_engine_id_with_env(Some("  "), env).unwrap(), "5");
    assert!(matches!(
        resolve_engine_id_with_env(None, |_: &str| None),
        Err(SqError::ConfigError(_))
    ));
}
