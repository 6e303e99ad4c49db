use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::Multiplexer;

/// Shortest period the sweeper will tick at.
pub const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(1);

/// Run [`Multiplexer::sweep_expired`] every `period` until `shutdown` fires.
///
/// Periods below [`MIN_SWEEP_PERIOD`], including zero, are raised to it.
pub fn spawn_timeout_sweeper<T>(
    mux: Arc<Multiplexer<T>>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
{
    let period = period.max(MIN_SWEEP_PERIOD);

    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("timeout sweeper stopped");
                    break;
                }
                _ = interval.tick() => {
                    let expired = mux.sweep_expired(Instant::now());
                    if !expired.is_empty() {
                        trace!(?expired, "swept expired stream ids");
                    }
                }
            }
        }
    })
}
