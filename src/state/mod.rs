use serde::Serialize;
use std::fmt;

pub mod metrics;

pub use metrics::Metrics;

/// Lifecycle of the proxy listener.
///
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`; a failed bind
/// returns from `Starting` straight to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProxyState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ProxyState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_transition_to(&self, next: ProxyState) -> bool {
        matches!(
            (self, next),
            (Self::Stopped, Self::Starting)
                | (Self::Starting, Self::Running)
                | (Self::Starting, Self::Stopped)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}
