//! Agent tests against a mock cgroup tree and a real TCP listener

use super::*;
use crate::error::{BalancerError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::fs;
use tokio::sync::broadcast;

/// One cgroup directory per uid with cpu.shares and cpuacct.usage
async fn create_mock_cgroup(temp_dir: &TempDir, uids: &[&str]) -> PathBuf {
    let root = temp_dir.path().to_path_buf();
    for uid in uids {
        let dir = root.join(uid);
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(dir.join(CPU_SHARES_FILE), "1024\n").await.unwrap();
        fs::write(dir.join(CPU_USAGE_FILE), "5000000000\n").await.unwrap();
    }
    root
}

async fn read_shares(root: &Path, uid: &str) -> String {
    fs::read_to_string(root.join(uid).join(CPU_SHARES_FILE))
        .await
        .unwrap()
}

fn session(root: &Path) -> AgentSession {
    AgentSession::new(
        "test",
        Arc::new(CgroupCpuController::new(root)),
        Duration::from_millis(10),
    )
}

/// Usage counter that advances by 100_000 ns between samples
struct SteppingController {
    usage: AtomicU64,
}

#[async_trait]
impl CpuController for SteppingController {
    async fn write_shares(&self, _pod: &str, _uid: &str, _shares: i64) -> Result<()> {
        Ok(())
    }

    async fn read_usage(&self, pod_name: &str, uid: &str) -> Result<u64> {
        if uid == "broken" {
            return Err(BalancerError::UsageRead {
                path: pod_name.to_string(),
                reason: "missing".into(),
            });
        }
        Ok(self.usage.fetch_add(100_000, Ordering::SeqCst))
    }
}

#[tokio::test]
async fn test_update_then_apply_writes_cgroup_files() {
    let temp = TempDir::new().unwrap();
    let root = create_mock_cgroup(&temp, &["uid1", "uid2"]).await;
    let mut session = session(&root);

    assert_eq!(
        session.handle("updatePods pod1:uid1 pod2:uid2").await,
        Response::Success
    );
    assert_eq!(
        session.handle("applyCPUShares pod1:512.7 pod2:256").await,
        Response::Success
    );

    assert_eq!(read_shares(&root, "uid1").await, "512");
    assert_eq!(read_shares(&root, "uid2").await, "256");
}

#[tokio::test]
async fn test_non_numeric_share_fails_before_any_write() {
    let temp = TempDir::new().unwrap();
    let root = create_mock_cgroup(&temp, &["uid1", "uid2"]).await;
    let mut session = session(&root);
    session.handle("updatePods pod1:uid1 pod2:uid2").await;

    assert_eq!(
        session.handle("applyCPUShares pod1:50 pod2:notanumber").await,
        Response::Failure
    );
    assert_eq!(read_shares(&root, "uid1").await, "1024\n");
}

#[tokio::test]
async fn test_unknown_pod_fails_closed() {
    let temp = TempDir::new().unwrap();
    let root = create_mock_cgroup(&temp, &["uid1"]).await;
    let mut session = session(&root);
    session.handle("updatePods pod1:uid1").await;

    assert_eq!(
        session.handle("applyCPUShares pod1:10 ghost:10").await,
        Response::Failure
    );
    assert_eq!(read_shares(&root, "uid1").await, "1024\n");
}

#[tokio::test]
async fn test_write_failure_keeps_earlier_writes() {
    let temp = TempDir::new().unwrap();
    let root = create_mock_cgroup(&temp, &["uid1"]).await;
    let mut session = session(&root);
    session.handle("updatePods pod1:uid1 pod2:missing").await;

    assert_eq!(
        session.handle("applyCPUShares pod1:300 pod2:300").await,
        Response::Failure
    );
    assert_eq!(read_shares(&root, "uid1").await, "300");
}

#[tokio::test]
async fn test_traversal_uid_is_rejected_on_apply() {
    let temp = TempDir::new().unwrap();
    let root = create_mock_cgroup(&temp, &["uid1"]).await;
    let mut session = session(&root);

    assert_eq!(session.handle("updatePods evil:..").await, Response::Success);
    assert_eq!(session.handle("applyCPUShares evil:5").await, Response::Failure);
}

#[tokio::test]
async fn test_malformed_update_keeps_registry() {
    let temp = TempDir::new().unwrap();
    let root = create_mock_cgroup(&temp, &["uid1"]).await;
    let mut session = session(&root);
    session.handle("updatePods pod1:uid1").await;

    assert_eq!(
        session.handle("updatePods pod2:uid2 pod3").await,
        Response::Failure
    );
    assert_eq!(session.registry().uid("pod1"), Some("uid1"));
    assert_eq!(session.registry().len(), 1);
}

#[tokio::test]
async fn test_unknown_message_type() {
    let temp = TempDir::new().unwrap();
    let mut session = session(temp.path());
    assert_eq!(session.handle("reboot now").await, Response::UnknownMessage);
}

#[tokio::test]
async fn test_utilizations_from_cgroup_files_are_name_ordered() {
    let temp = TempDir::new().unwrap();
    let root = create_mock_cgroup(&temp, &["uid-b", "uid-a"]).await;
    let mut session = session(&root);
    session
        .handle("updatePods zeta:uid-b alpha:uid-a gone:uid-x")
        .await;

    let Response::Utilizations(utils) = session.handle("getCPUUtilizations").await else {
        panic!("expected utilizations");
    };

    let names: Vec<&str> = utils.iter().map(|u| u.pod_name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "gone", "zeta"]);
    // Static counters give zero usage; the missing cgroup gives the sentinel
    assert_eq!(utils[0].percent, 0.0);
    assert!(utils[1].is_sentinel());
    assert_eq!(utils[2].percent, 0.0);
}

#[tokio::test]
async fn test_sampled_percent_over_100ms() {
    let controller = SteppingController {
        usage: AtomicU64::new(1_000_000),
    };

    let utils = sample_utilizations(
        &controller,
        [("pod1", "uid1"), ("pod2", "broken")],
        DEFAULT_SAMPLE_INTERVAL,
    )
    .await;

    // 100_000 ns over slightly more than 100 ms of wall time
    assert!(utils[0].percent > 0.05 && utils[0].percent <= 0.1, "{}", utils[0].percent);
    assert_eq!(
        Response::Utilizations(vec![utils[1].clone()]).to_string(),
        "utils: pod2:-1.000000"
    );
}

async fn start_agent(root: &Path) -> (String, broadcast::Sender<()>) {
    let listener = AgentServer::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server = AgentServer::new(
        Arc::new(CgroupCpuController::new(root)),
        Duration::from_millis(10),
    );
    tokio::spawn(async move { server.serve(listener, shutdown_rx).await });
    (addr, shutdown_tx)
}

#[tokio::test]
async fn test_client_round_trip_over_tcp() {
    let temp = TempDir::new().unwrap();
    let root = create_mock_cgroup(&temp, &["uid1"]).await;
    let (addr, _shutdown) = start_agent(&root).await;

    let mut client = NodeAgentClient::new(&addr);
    assert!(!client.is_connected());

    assert!(client
        .update_pods(&[("pod1".into(), "uid1".into())])
        .await
        .unwrap());
    assert!(client.is_connected());

    assert!(client
        .apply_cpu_shares(&[("pod1".into(), 733.25)])
        .await
        .unwrap());
    assert_eq!(read_shares(&root, "uid1").await, "733");

    assert!(!client
        .apply_cpu_shares(&[("ghost".into(), 1.0)])
        .await
        .unwrap());

    let utils = client.get_cpu_utilizations().await.unwrap();
    assert_eq!(utils.len(), 1);
    assert_eq!(utils[0].pod_name, "pod1");
}

#[tokio::test]
async fn test_registry_is_per_connection() {
    let temp = TempDir::new().unwrap();
    let root = create_mock_cgroup(&temp, &["uid1"]).await;
    let (addr, _shutdown) = start_agent(&root).await;

    let mut first = NodeAgentClient::new(&addr);
    let mut second = NodeAgentClient::new(&addr);
    assert!(first
        .update_pods(&[("pod1".into(), "uid1".into())])
        .await
        .unwrap());

    assert!(second.get_cpu_utilizations().await.unwrap().is_empty());
    assert!(!second
        .apply_cpu_shares(&[("pod1".into(), 10.0)])
        .await
        .unwrap());
}

#[tokio::test]
async fn test_unknown_message_keeps_connection_open() {
    let temp = TempDir::new().unwrap();
    let (addr, _shutdown) = start_agent(temp.path()).await;

    let mut client = NodeAgentClient::new(&addr);
    assert_eq!(client.exchange("hello").await.unwrap(), Response::UnknownMessage);
    assert!(client.update_pods(&[]).await.unwrap());
}

#[tokio::test]
async fn test_unreachable_agent_is_peer_error() {
    let mut client = NodeAgentClient::new("127.0.0.1:1");
    let err = client.get_cpu_utilizations().await.unwrap_err();
    assert!(matches!(err, BalancerError::PeerUnavailable { .. }));
    assert!(!err.is_fatal());
    assert!(!client.is_connected());
}

async fn read_reply(reader: &mut tokio::io::BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
    use tokio::io::AsyncBufReadExt;
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("agent did not reply")
        .unwrap();
    line
}

#[tokio::test]
async fn test_invalid_utf8_is_answered_and_session_survives() {
    use tokio::io::AsyncWriteExt;
    let temp = TempDir::new().unwrap();
    let root = create_mock_cgroup(&temp, &["uid1"]).await;
    let (addr, _shutdown) = start_agent(&root).await;

    let stream = tokio::net::TcpStream::connect(&addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = tokio::io::BufReader::new(read_half);

    write_half.write_all(b"updatePods p\xff:uid\n").await.unwrap();
    let first = read_reply(&mut reader).await;
    assert!(first.ends_with('\n'));
    assert!(
        first == "Success\n" || first == "Failure\n",
        "unexpected reply {:?}",
        first
    );

    write_half.write_all(b"updatePods pod1:uid1\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "Success\n");

    write_half.write_all(b"getCPUUtilizations\n").await.unwrap();
    assert!(read_reply(&mut reader).await.starts_with("utils: pod1:"));
}

#[tokio::test]
async fn test_oversized_line_fails_and_session_survives() {
    use tokio::io::AsyncWriteExt;
    let temp = TempDir::new().unwrap();
    let (addr, _shutdown) = start_agent(temp.path()).await;

    let stream = tokio::net::TcpStream::connect(&addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = tokio::io::BufReader::new(read_half);

    let mut line = vec![b'a'; MAX_LINE_BYTES * 8];
    line.push(b'\n');
    write_half.write_all(&line).await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "Failure\n");

    write_half.write_all(b"updatePods\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "Success\n");
}
