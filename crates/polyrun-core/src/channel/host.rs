//! The boundary between a channel and its isolated host.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::language::LanguageId;
use crate::protocol::CorrelationToken;

/// What a launcher needs to start one host.
#[derive(Debug, Clone)]
pub struct HostSpec {
    pub language: LanguageId,
    pub prefix: &'static str,
    pub token: CorrelationToken,
}

/// Bidirectional line link to a host.
///
/// Dropping the link detaches the listener: the channel stops seeing frames
/// and the host's stdin is closed.
pub struct HostLink {
    /// Protocol lines to the host.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Protocol lines from the host. Closed when the host goes away.
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Exclusive ownership of a running host.
pub trait HostHandle: Send {
    /// OS process id, when the host is a process.
    fn id(&self) -> Option<u32> {
        None
    }

    /// Tear the host down. Called at most once by the owning channel.
    fn terminate(&mut self);
}

/// A freshly created host.
pub struct HostSession {
    pub link: HostLink,
    pub handle: Box<dyn HostHandle>,
}

/// Creates isolated hosts.
#[async_trait]
pub trait HostLauncher: Send + Sync {
    /// Create a host for one run.
    ///
    /// Errors are reported to the caller as initialization failures.
    async fn launch(&self, spec: &HostSpec) -> Result<HostSession>;

    /// Check that hosts for `language` can be created at all.
    async fn check_available(&self, _language: LanguageId) -> Result<()> {
        Ok(())
    }
}
