//! CLI integration tests

use std::process::{Command, Output};

fn fleetctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fleetctl"))
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("HOSTS")
        .env_remove("PODS")
        .env_remove("LBS")
        .output()
        .expect("Failed to execute fleetctl")
}

const HOSTS: &str = r#"[{"name":"h1","loadCapacity":100,"podNames":["p1"],"agentAddress":"127.0.0.1:9988"}]"#;
const PODS: &str = r#"[{"name":"p1","ipAddress":"10.0.0.1","hostName":"h1","lbName":"lb1","uid":"uid1"}]"#;
const LBS: &str = r#"[{"name":"lb1","ipAddress":"10.0.1.1:3000","podNames":["p1"]}]"#;

#[test]
fn test_cli_help() {
    let output = fleetctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("agent"), "Should show agent command");
    assert!(stdout.contains("report"), "Should show report command");
    assert!(stdout.contains("lb"), "Should show lb command");
    assert!(stdout.contains("topology"), "Should show topology command");
}

#[test]
fn test_cli_version() {
    let output = fleetctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("fleetctl"), "Should show binary name");
}

#[test]
fn test_topology_check_accepts_consistent_topology() {
    let output = fleetctl(&["topology", "check", "--hosts", HOSTS, "--pods", PODS, "--lbs", LBS]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stdout: {}", stdout);
    assert!(stdout.contains("1 hosts, 1 pods, 1 load balancers"));
    assert!(stdout.contains("127.0.0.1:9988"));
}

#[test]
fn test_topology_check_reports_dangling_pod() {
    let lbs = r#"[{"name":"lb1","ipAddress":"10.0.1.1:3000","podNames":["p1","ghost"]}]"#;
    let output = fleetctl(&["topology", "check", "--hosts", HOSTS, "--pods", PODS, "--lbs", lbs]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(!output.status.success());
    assert!(stdout.contains("ghost"));
}

#[test]
fn test_update_pods_rejects_malformed_entry() {
    let output = fleetctl(&["agent", "update-pods", "--addr", "127.0.0.1:1", "pod1-uid1"]);
    assert!(!output.status.success());
}

#[test]
fn test_unreachable_agent_fails() {
    let output = fleetctl(&["agent", "utils", "--addr", "127.0.0.1:1"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("Failed to connect to node agent"));
}

#[tokio::test]
async fn test_lb_set_endpoints() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .match_query(mockito::Matcher::UrlEncoded(
            "endpoints".into(),
            "10.0.0.1,10.0.0.2".into(),
        ))
        .with_status(200)
        .with_body("Endpoints updated: 10.0.0.1:3000,10.0.0.2:3000")
        .create_async()
        .await;

    let url = server.url();
    let output = tokio::task::spawn_blocking(move || {
        fleetctl(&["lb", "set-endpoints", "--lb", &url, "10.0.0.1", "10.0.0.2"])
    })
    .await
    .unwrap();

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Endpoints updated"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_report_retries_then_gives_up() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .match_query(mockito::Matcher::Any)
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let url = server.url();
    let output = tokio::task::spawn_blocking(move || {
        fleetctl(&["report", "--controller", &url, "--pod", "p1", "--count", "4", "--k", "7"])
    })
    .await
    .unwrap();

    assert!(!output.status.success());
    mock.assert_async().await;
}
