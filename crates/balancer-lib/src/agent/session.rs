//! One controller connection to the node agent

use super::cgroup::{sample_utilizations, CpuController};
use super::protocol::{
    parse_pod_shares, Request, Response, APPLY_CPU_SHARES, GET_CPU_UTILIZATIONS, UPDATE_PODS,
};
use super::registry::PodRegistry;
use crate::error::{BalancerError, Result};
use crate::observability::BalancerMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tracing::{debug, info, warn};

/// Longest request line the agent buffers; longer lines are answered with `Failure`
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// One framed read from the peer
#[derive(Debug, PartialEq)]
enum Frame {
    Line(String),
    TooLong,
    Closed,
}

/// Read one newline-terminated line, decoding invalid UTF-8 lossily
///
/// A line longer than [`MAX_LINE_BYTES`] is skipped through its newline.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES as u64)
        .read_until(b'\n', buf)
        .await?;
    if read == 0 {
        return Ok(Frame::Closed);
    }

    if buf.last() == Some(&b'\n') || read < MAX_LINE_BYTES {
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        return Ok(Frame::Line(String::from_utf8_lossy(buf).into_owned()));
    }

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        let newline = available.iter().position(|b| *b == b'\n');
        let len = available.len();
        match newline {
            Some(pos) => {
                reader.consume(pos + 1);
                break;
            }
            None => reader.consume(len),
        }
    }
    Ok(Frame::TooLong)
}

/// Protocol state for a single connection; the registry dies with it
pub struct AgentSession {
    peer: String,
    controller: Arc<dyn CpuController>,
    registry: PodRegistry,
    sample_interval: Duration,
    metrics: BalancerMetrics,
}

impl AgentSession {
    pub fn new(
        peer: impl Into<String>,
        controller: Arc<dyn CpuController>,
        sample_interval: Duration,
    ) -> Self {
        Self {
            peer: peer.into(),
            controller,
            registry: PodRegistry::new(),
            sample_interval,
            metrics: BalancerMetrics::new(),
        }
    }

    pub fn registry(&self) -> &PodRegistry {
        &self.registry
    }

    /// Answer one request line
    pub async fn handle(&mut self, line: &str) -> Response {
        match Request::parse(line) {
            Request::UpdatePods(entries) => {
                let result = self.registry.replace(&entries);
                self.finish(UPDATE_PODS, result)
            }
            Request::ApplyCpuShares(entries) => {
                let result = self.apply_cpu_shares(&entries).await;
                self.finish(APPLY_CPU_SHARES, result)
            }
            Request::GetCpuUtilizations => {
                let utils = sample_utilizations(
                    self.controller.as_ref(),
                    self.registry.iter(),
                    self.sample_interval,
                )
                .await;
                self.metrics.inc_agent_commands(GET_CPU_UTILIZATIONS, true);
                Response::Utilizations(utils)
            }
            Request::Unknown(raw) => {
                debug!(peer = %self.peer, message = %raw, "Unknown message type");
                Response::UnknownMessage
            }
        }
    }

    fn finish(&self, command: &str, result: Result<()>) -> Response {
        self.metrics.inc_agent_commands(command, result.is_ok());
        match result {
            Ok(()) => Response::Success,
            Err(e) => {
                warn!(peer = %self.peer, command, error = %e, "Command failed");
                Response::Failure
            }
        }
    }

    /// Parse and resolve every entry, then write in order
    ///
    /// A write failure stops the batch; files already written stay written.
    async fn apply_cpu_shares(&self, entries: &[String]) -> Result<()> {
        let shares = parse_pod_shares(entries)?;

        let resolved = shares
            .iter()
            .map(|(pod, share)| {
                let uid = self
                    .registry
                    .uid(pod)
                    .ok_or_else(|| BalancerError::UnknownPod(pod.clone()))?;
                Ok((pod.as_str(), uid, *share))
            })
            .collect::<Result<Vec<_>>>()?;

        for (pod, uid, share) in resolved {
            self.controller.write_shares(pod, uid, share).await?;
        }
        Ok(())
    }

    /// Serve lines until the peer closes or a read/write fails
    pub async fn run<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            let response = match read_frame(&mut reader, &mut buf).await {
                Ok(Frame::Line(line)) => self.handle(&line).await,
                Ok(Frame::TooLong) => {
                    warn!(peer = %self.peer, max = MAX_LINE_BYTES, "Request line too long");
                    Response::Failure
                }
                Ok(Frame::Closed) => {
                    info!(peer = %self.peer, "Peer closed connection");
                    break;
                }
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "Read failed, closing session");
                    break;
                }
            };

            let mut out = response.to_string();
            out.push('\n');

            if let Err(e) = writer.write_all(out.as_bytes()).await {
                warn!(peer = %self.peer, error = %e, "Write failed, closing session");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn frames(input: Vec<u8>) -> Vec<Frame> {
        let (mut client, server) = tokio::io::duplex(MAX_LINE_BYTES * 4);
        let writer = tokio::spawn(async move {
            client.write_all(&input).await.unwrap();
        });
        let mut reader = BufReader::new(server);
        let mut buf = Vec::new();
        let mut out = Vec::new();
        loop {
            let frame = read_frame(&mut reader, &mut buf).await.unwrap();
            if frame == Frame::Closed {
                break;
            }
            out.push(frame);
        }
        writer.await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_lines_are_split_and_trimmed() {
        let got = frames(b"updatePods a:1\r\ngetCPUUtilizations\ntail".to_vec()).await;
        assert_eq!(
            got,
            vec![
                Frame::Line("updatePods a:1".into()),
                Frame::Line("getCPUUtilizations".into()),
                Frame::Line("tail".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_decoded_lossily() {
        let got = frames(b"updatePods p\xff:uid\n".to_vec()).await;
        assert_eq!(got, vec![Frame::Line("updatePods p\u{FFFD}:uid".into())]);
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped_through_newline() {
        let mut input = vec![b'a'; MAX_LINE_BYTES * 2 + 17];
        input.extend_from_slice(b"\ngetCPUUtilizations\n");
        let got = frames(input).await;
        assert_eq!(
            got,
            vec![Frame::TooLong, Frame::Line("getCPUUtilizations".into())]
        );
    }
}
