//! TCP listener that pairs every client with its own upstream connection and
//! masks COM_QUERY statements on the way through.

use crate::config::ProxyConfig;
use crate::error::{Result, ServerError};
use crate::rewrite::SqlRewriter;
use crate::rules::RuleStore;
use crate::state::{Metrics, ProxyState};
use arc_swap::{ArcSwap, ArcSwapOption};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

mod session;

use session::SessionContext;

/// Upstream MySQL endpoint every new pair connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamTarget {
    pub host: String,
    pub port: u16,
}

impl UpstreamTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` suitable for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

struct RunningListener {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

pub struct ProxyServer {
    config: ProxyConfig,
    target: Arc<ArcSwap<UpstreamTarget>>,
    rules: Arc<RuleStore>,
    rewriter: Arc<SqlRewriter>,
    metrics: Arc<Metrics>,
    // Serializes start/stop; holds the listener while running.
    lifecycle: Mutex<Option<RunningListener>>,
    state_tx: watch::Sender<ProxyState>,
    local_addr: ArcSwapOption<SocketAddr>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig, target: UpstreamTarget, rules: Arc<RuleStore>) -> Self {
        let (state_tx, _) = watch::channel(ProxyState::Stopped);
        Self {
            config,
            target: Arc::new(ArcSwap::from_pointee(target)),
            rules,
            rewriter: Arc::new(SqlRewriter::new()),
            metrics: Arc::new(Metrics::new()),
            lifecycle: Mutex::new(None),
            state_tx,
            local_addr: ArcSwapOption::empty(),
        }
    }

    pub fn state(&self) -> ProxyState {
        *self.state_tx.borrow()
    }

    /// Receiver that observes every lifecycle transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ProxyState> {
        self.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Bound address while running. Useful when configured with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.load_full().map(|addr| *addr)
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn target(&self) -> Arc<UpstreamTarget> {
        self.target.load_full()
    }

    /// Point new pairs at `target`. Established pairs keep their upstream.
    pub fn retarget(&self, target: UpstreamTarget) {
        tracing::info!("Upstream target changed to {}", target);
        self.target.store(Arc::new(target));
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    pub fn rewriter(&self) -> &Arc<SqlRewriter> {
        &self.rewriter
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    fn transition(&self, next: ProxyState) -> Result<()> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(ServerError::InvalidStateTransition(format!("{} -> {}", current, next)).into());
        }
        self.state_tx.send_replace(next);
        tracing::debug!("Proxy state {} -> {}", current, next);
        Ok(())
    }

    /// Bind the listener and start accepting. Starting a running proxy is a
    /// no-op that returns the existing address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(running) = lifecycle.as_ref() {
            tracing::debug!("Proxy already listening on {}", running.local_addr);
            return Ok(running.local_addr);
        }

        self.transition(ProxyState::Starting)?;

        let bind_addr = self.config.listen_address();
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.transition(ProxyState::Stopped)?;
                tracing::error!("Failed to bind proxy listener on {}: {}", bind_addr, e);
                return Err(ServerError::StartFailed(format!("bind {}: {}", bind_addr, e)).into());
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.transition(ProxyState::Stopped)?;
                return Err(ServerError::StartFailed(e.to_string()).into());
            }
        };

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let ctx = Arc::new(SessionContext {
            target: self.target.clone(),
            rules: self.rules.clone(),
            rewriter: self.rewriter.clone(),
            metrics: self.metrics.clone(),
            max_frame_size: self.config.max_frame_size,
        });
        let limit = match self.config.max_connections {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        let accept_task = tokio::spawn(accept_loop(listener, ctx, limit, shutdown_rx));

        *lifecycle = Some(RunningListener {
            local_addr,
            shutdown_tx,
            accept_task,
        });
        self.local_addr.store(Some(Arc::new(local_addr)));
        self.transition(ProxyState::Running)?;

        tracing::info!(
            "SQL masking proxy listening on {} -> {}",
            local_addr,
            self.target.load_full()
        );
        Ok(local_addr)
    }

    /// Stop accepting and close every open pair. Stopping a stopped proxy is
    /// a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running) = lifecycle.take() else {
            return Ok(());
        };

        self.transition(ProxyState::Stopping)?;
        tracing::info!("Stopping proxy on {}", running.local_addr);

        let _ = running.shutdown_tx.send(());
        if let Err(e) = running.accept_task.await {
            tracing::error!("Accept loop ended abnormally: {}", e);
        }

        self.local_addr.store(None);
        self.transition(ProxyState::Stopped)?;
        tracing::info!("Proxy stopped");
        Ok(())
    }
}

/// Pause before accepting again so persistent errors (EMFILE) do not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

async fn backoff_after_accept_error(error: &std::io::Error) {
    tracing::warn!("Accept failed: {}", error);
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    limit: Option<Arc<Semaphore>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::debug!("Accept loop received shutdown");
                break;
            }
            Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        tracing::error!("Connection task panicked: {}", e);
                    }
                }
            }
            accepted = listener.accept() => {
                let (client, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        backoff_after_accept_error(&e).await;
                        continue;
                    }
                };

                let permit = match &limit {
                    Some(semaphore) => match semaphore.clone().try_acquire_owned() {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            tracing::warn!(peer = %peer, "Connection limit reached, rejecting client");
                            ctx.metrics.record_rejected();
                            continue;
                        }
                    },
                    None => None,
                };

                ctx.metrics.record_accept();
                tracing::debug!(peer = %peer, "Accepted client connection");

                let ctx = ctx.clone();
                sessions.spawn(async move {
                    session::handle_client(client, peer, ctx).await;
                    drop(permit);
                });
            }
        }
    }

    drop(listener);
    let open = sessions.len();
    if open > 0 {
        tracing::info!("Closing {} open connection pair(s)", open);
    }
    sessions.shutdown().await;
}
