//! Controller side of the node agent protocol

use super::protocol::{Response, APPLY_CPU_SHARES, GET_CPU_UTILIZATIONS, UPDATE_PODS};
use crate::error::{BalancerError, Result};
use crate::models::PodUtilization;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// Persistent connection to one node agent
///
/// The connection is dialed on first use and dropped after any transport
/// error, so the next exchange re-dials. The agent keeps its pod registry
/// per connection: after a re-dial the pods must be registered again.
pub struct NodeAgentClient {
    addr: String,
    conn: Option<BufReader<TcpStream>>,
}

impl NodeAgentClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub async fn connect(&mut self) -> Result<()> {
        if self.conn.is_none() {
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| BalancerError::peer(&self.addr, e))?;
            debug!(addr = %self.addr, "Connected to node agent");
            self.conn = Some(BufReader::new(stream));
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.conn = None;
    }

    /// Register pods; `Ok(false)` when the agent answers `Failure`
    pub async fn update_pods(&mut self, pods: &[(String, String)]) -> Result<bool> {
        let line = command_line(UPDATE_PODS, pods.iter().map(|(p, u)| format!("{}:{}", p, u)));
        self.expect_ack(&line).await
    }

    /// Apply shares; `Ok(false)` when the agent answers `Failure`
    pub async fn apply_cpu_shares(&mut self, shares: &[(String, f64)]) -> Result<bool> {
        let line = command_line(
            APPLY_CPU_SHARES,
            shares.iter().map(|(p, s)| format!("{}:{:.6}", p, s)),
        );
        self.expect_ack(&line).await
    }

    pub async fn get_cpu_utilizations(&mut self) -> Result<Vec<PodUtilization>> {
        match self.exchange(GET_CPU_UTILIZATIONS).await? {
            Response::Utilizations(utils) => Ok(utils),
            other => Err(BalancerError::MalformedInput(format!(
                "expected utilizations from {}, got {}",
                self.addr, other
            ))),
        }
    }

    async fn expect_ack(&mut self, line: &str) -> Result<bool> {
        match self.exchange(line).await? {
            Response::Success => Ok(true),
            Response::Failure => Ok(false),
            other => Err(BalancerError::MalformedInput(format!(
                "expected Success or Failure from {}, got {}",
                self.addr, other
            ))),
        }
    }

    /// One request line out, one response line back
    pub async fn exchange(&mut self, line: &str) -> Result<Response> {
        self.connect().await?;
        let result = self.round_trip(line).await;
        if result.is_err() {
            self.disconnect();
        }
        Response::parse(&result?)
    }

    async fn round_trip(&mut self, line: &str) -> Result<String> {
        let addr = self.addr.clone();
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| BalancerError::PeerClosed(addr.clone()))?;

        let mut out = String::with_capacity(line.len() + 1);
        out.push_str(line);
        out.push('\n');
        conn.get_mut()
            .write_all(out.as_bytes())
            .await
            .map_err(|e| BalancerError::peer(&addr, e))?;

        let mut reply = String::new();
        let read = conn
            .read_line(&mut reply)
            .await
            .map_err(|e| BalancerError::peer(&addr, e))?;
        if read == 0 {
            return Err(BalancerError::PeerClosed(addr));
        }
        Ok(reply)
    }
}

fn command_line(command: &str, args: impl Iterator<Item = String>) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg);
    }
    line
}
