//! Per-channel waveform loops.
//!
//! The device plays pulses from a finite queue, so a looping waveform is
//! kept alive by resubmitting the same sequence slightly faster than it
//! plays back. At most one loop runs per channel; starting another replaces
//! it.

use std::time::Duration;

use coyote_core::{Channel, PulseOperation, SessionIdentity};
use tokio_util::sync::CancellationToken;

use crate::error::ControlError;
use crate::manager::{SessionManager, TaskHandle, parse_channel, submit_pulses};
use crate::transport::{DeviceClient, DeviceTransport};

/// Estimated playback time of one pulse operation on the device.
const PULSE_PLAYBACK: Duration = Duration::from_millis(100);
const MIN_PERIOD: Duration = Duration::from_millis(100);
/// Share of one playback pass after which the queue is refilled.
const REFILL_RATIO: f64 = 0.8;

/// Resubmission period for a sequence of `pulse_count` operations.
pub fn loop_period(pulse_count: usize) -> Duration {
    let count = u32::try_from(pulse_count.max(1)).unwrap_or(u32::MAX);
    (PULSE_PLAYBACK * count).mul_f64(REFILL_RATIO).max(MIN_PERIOD)
}

impl<T: DeviceTransport> SessionManager<T> {
    /// Submit `pulses` once right away, then keep resubmitting them on
    /// `channel` until the loop is cleared, replaced or the session closes.
    pub async fn start_loop(
        &self,
        identity: &SessionIdentity,
        channel: &str,
        pulses: Vec<PulseOperation>,
        bind_timeout: Option<Duration>,
        heartbeat: Option<Duration>,
    ) -> Result<String, ControlError> {
        self.transport()?;
        let channel = parse_channel(channel)?;
        if pulses.is_empty() {
            return Err(ControlError::InvalidPulseData(
                "waveform has no pulse operations".to_string(),
            ));
        }

        let client = self.ensure_ready_for_control(identity, None, heartbeat).await?;
        submit_pulses(&client, channel, &pulses).await?;

        let mut slot = self.shared.slot.lock().await;
        let session = slot
            .as_mut()
            .filter(|s| s.identity == *identity)
            .ok_or_else(|| ControlError::SessionClosed(identity.uri()))?;

        if let Some(previous) = session.loops.remove(&channel) {
            previous.stop().await;
            tracing::debug!(channel = %channel, "previous waveform loop replaced");
        }

        let count = pulses.len();
        let period = loop_period(count);
        let task = {
            let manager = self.clone();
            let identity = identity.clone();
            TaskHandle::spawn(move |cancel| {
                run_loop(manager, identity, channel, pulses, period, bind_timeout, heartbeat, cancel)
            })
        };
        session.loops.insert(channel, task);

        tracing::info!(channel = %channel, pulses = count, period_ms = period.as_millis() as u64, "waveform loop started");
        Ok(format!("waveform loop started on channel {channel}"))
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop<T: DeviceTransport>(
    manager: SessionManager<T>,
    identity: SessionIdentity,
    channel: Channel,
    pulses: Vec<PulseOperation>,
    period: Duration,
    bind_timeout: Option<Duration>,
    heartbeat: Option<Duration>,
    cancel: CancellationToken,
) {
    // The first pass was submitted by `start_loop`.
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(period) => {}
    }

    loop {
        let ready = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            ready = manager.ensure_ready_for_control(&identity, bind_timeout, heartbeat) => ready,
        };
        let client = match ready {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "waveform loop stopped: device not ready");
                return;
            }
        };

        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = client.add_pulses(channel, &pulses) => result,
        };
        if let Err(e) = submitted {
            tracing::warn!(channel = %channel, error = %e, "waveform loop stopped: resubmission failed");
            return;
        }
        tracing::trace!(channel = %channel, count = pulses.len(), "waveform resubmitted");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(period) => {}
        }
    }
}
