//! One proxied client/upstream pair.
//!
//! Each pair runs two tasks, one per direction, inside a `JoinSet` owned by
//! the pair. When either direction finishes the other is aborted, which drops
//! the remaining socket halves and closes both connections. Aborting the pair
//! itself (on proxy shutdown) drops the `JoinSet` and has the same effect.

use super::UpstreamTarget;
use crate::error::CodecError;
use crate::protocol::{Frame, MySqlCodec, MAX_PAYLOAD_LEN};
use crate::rewrite::SqlRewriter;
use crate::rules::RuleStore;
use crate::state::metrics::{RewriteTimer, CLIENT_TO_SERVER, SERVER_TO_CLIENT};
use crate::state::Metrics;
use arc_swap::ArcSwap;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};

/// Everything a pair needs, shared by all pairs of one listener.
pub(crate) struct SessionContext {
    pub target: Arc<ArcSwap<UpstreamTarget>>,
    pub rules: Arc<RuleStore>,
    pub rewriter: Arc<SqlRewriter>,
    pub metrics: Arc<Metrics>,
    pub max_frame_size: usize,
}

impl SessionContext {
    /// Replace a COM_QUERY frame with its masked version when rules apply.
    /// The original frame is consumed either way.
    fn mask(&self, frame: Frame, peer: SocketAddr) -> Frame {
        let Some(sql) = frame.query_text() else {
            return frame;
        };

        let timer = RewriteTimer::new(self.metrics.clone());
        let outcome = self.rewriter.rewrite_with_store(sql, &self.rules);
        timer.finish(outcome.is_masked());

        if !outcome.is_masked() {
            return frame;
        }

        tracing::debug!(
            peer = %peer,
            table = ?outcome.table,
            rules_applied = outcome.rules_applied,
            "Forwarding masked query"
        );
        Frame::query(frame.sequence_id, &outcome.sql)
    }
}

/// Decrements the active connection gauge however the pair ends.
struct ActivePair {
    metrics: Arc<Metrics>,
}

impl ActivePair {
    fn new(metrics: Arc<Metrics>) -> Self {
        metrics.increment_active_connections();
        Self { metrics }
    }
}

impl Drop for ActivePair {
    fn drop(&mut self) {
        self.metrics.decrement_active_connections();
    }
}

/// Pair `client` with a fresh upstream connection and relay until either
/// side closes. An unreachable upstream closes the client immediately.
pub(crate) async fn handle_client(client: TcpStream, peer: SocketAddr, ctx: Arc<SessionContext>) {
    let target = ctx.target.load_full();
    let upstream = match TcpStream::connect(target.address()).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(
                peer = %peer,
                target = %target,
                error = %e,
                "Upstream connection failed, closing client"
            );
            ctx.metrics.record_upstream_failure();
            return;
        }
    };

    if let Err(e) = client.set_nodelay(true).and(upstream.set_nodelay(true)) {
        tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    tracing::debug!(peer = %peer, target = %target, "Paired client with upstream");
    let _active = ActivePair::new(ctx.metrics.clone());

    let (client_read, client_write) = client.into_split();
    let (server_read, server_write) = upstream.into_split();

    let mut directions = JoinSet::new();
    directions.spawn(relay_client_to_server(
        FramedRead::new(
            client_read,
            MySqlCodec::with_max_frame_size(ctx.max_frame_size),
        ),
        FramedWrite::new(server_write, MySqlCodec::new()),
        ctx.clone(),
        peer,
    ));
    directions.spawn(relay_server_to_client(
        FramedRead::new(server_read, MySqlCodec::new()),
        FramedWrite::new(client_write, MySqlCodec::new()),
        ctx.metrics.clone(),
        peer,
    ));

    match directions.join_next().await {
        Some(Ok(direction)) => {
            tracing::debug!(peer = %peer, direction, "Direction finished, closing pair")
        }
        Some(Err(e)) if e.is_panic() => {
            tracing::error!(peer = %peer, "Relay task panicked: {}", e)
        }
        _ => {}
    }
    directions.shutdown().await;

    tracing::debug!(peer = %peer, "Connection pair closed");
}

/// Outcome of handing one frame to a writer.
enum Forward {
    Sent,
    Dropped,
    Closed,
}

async fn forward<W>(
    writer: &mut FramedWrite<W, MySqlCodec>,
    frame: Frame,
    direction: &'static str,
    metrics: &Metrics,
    peer: SocketAddr,
) -> Forward
where
    W: AsyncWrite + Unpin,
{
    match writer.send(frame).await {
        Ok(()) => {
            metrics.record_frame_forwarded(direction);
            Forward::Sent
        }
        Err(CodecError::PayloadTooLarge(size)) => {
            tracing::error!(peer = %peer, direction, size, "Dropping frame that cannot be encoded");
            metrics.record_frame_dropped(direction);
            Forward::Dropped
        }
        Err(e) => {
            tracing::debug!(peer = %peer, direction, error = %e, "Write failed");
            metrics.record_frame_dropped(direction);
            Forward::Closed
        }
    }
}

async fn relay_client_to_server<R, W>(
    mut reader: FramedRead<R, MySqlCodec>,
    mut writer: FramedWrite<W, MySqlCodec>,
    ctx: Arc<SessionContext>,
    peer: SocketAddr,
) -> &'static str
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let direction = CLIENT_TO_SERVER;
    // A max-size packet is followed by continuation packets of the same
    // command; those are raw bytes and must not be classified.
    let mut in_continuation = false;

    while let Some(next) = reader.next().await {
        let frame = match next {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(peer = %peer, direction, error = %e, "Closing client after decode error");
                break;
            }
        };
        ctx.metrics.record_frame_received(direction);

        let continues = frame.payload.len() == MAX_PAYLOAD_LEN;
        let frame = if in_continuation || continues {
            frame
        } else {
            ctx.mask(frame, peer)
        };
        in_continuation = continues;

        if let Forward::Closed = forward(&mut writer, frame, direction, &ctx.metrics, peer).await {
            break;
        }
    }

    // Half-close upstream so the server sees EOF before the pair is torn down.
    let _ = writer.close().await;
    direction
}

async fn relay_server_to_client<R, W>(
    mut reader: FramedRead<R, MySqlCodec>,
    mut writer: FramedWrite<W, MySqlCodec>,
    metrics: Arc<Metrics>,
    peer: SocketAddr,
) -> &'static str
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let direction = SERVER_TO_CLIENT;

    while let Some(next) = reader.next().await {
        let frame = match next {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(peer = %peer, direction, error = %e, "Closing pair after decode error");
                break;
            }
        };
        metrics.record_frame_received(direction);

        if let Forward::Closed = forward(&mut writer, frame, direction, &metrics, peer).await {
            break;
        }
    }

    let _ = writer.close().await;
    direction
}
