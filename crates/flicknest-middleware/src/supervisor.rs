//! [`ReconnectSupervisor`] – keeps the device link alive.
//!
//! On a fixed interval the supervisor checks the link state of a
//! [`Reconnectable`] transport and, when it reports
//! [`ConnectionState::Disconnected`], asks it to reconnect. A failed request
//! is logged and retried on the next tick; the loop only ends when the
//! shutdown token fires.

use std::sync::Arc;
use std::time::Duration;

use flicknest_types::HubError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::ConnectionState;

/// A transport whose link can be re-established on request.
pub trait Reconnectable: Send + Sync {
    fn link_state(&self) -> ConnectionState;

    /// Start a reconnect attempt. Must not block.
    fn reconnect(&self) -> Result<(), HubError>;
}

pub struct ReconnectSupervisor<T: Reconnectable + ?Sized> {
    link: Arc<T>,
    interval: Duration,
}

impl<T: Reconnectable + ?Sized> ReconnectSupervisor<T> {
    pub fn new(link: Arc<T>, interval: Duration) -> Self {
        Self { link, interval }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// The first check happens one interval after start so a link that is
    /// still on its initial connect attempt is not disturbed.
    pub async fn run(self, shutdown: CancellationToken) {
        let period = self.interval.max(Duration::from_millis(10));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = period.as_secs(), "reconnect supervisor started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.check(),
            }
        }
        info!("reconnect supervisor stopped");
    }

    fn check(&self) {
        match self.link.link_state() {
            ConnectionState::Disconnected => {
                info!("device link down, attempting reconnect");
                if let Err(e) = self.link.reconnect() {
                    warn!(error = %e, "reconnect attempt failed");
                }
            }
            state => debug!(state = %state, "device link check"),
        }
    }
}
