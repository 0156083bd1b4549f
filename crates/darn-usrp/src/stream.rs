//! # Receive Helpers
//!
//! One receive is a `NumSampsAndDone` stream command followed by as many
//! `recv` calls as it takes to deliver the requested samples. A call that
//! reports an error code delivers nothing: the samples it returned are not
//! counted and the receive stops there. Retrying is up to the caller.
//!
//! The RX stream is `Send`, so it normally lives on its own thread:
//!
//! ```text
//!  control thread                     "rx" thread
//!  ──────────────                     ───────────
//!  ReceiveRequest ──── mpsc ────────► receive_samples()
//!                 ◄─── mpsc ───────── UsrpResult<ReceiveOutcome>
//! ```

use crate::error::{StreamError, UsrpError, UsrpResult};
use crate::hal::{RxStream, StreamCommand};
use crate::metadata::{RxErrorCode, RxMetadata};
use darn_core::{IQBuffer, IQSample, TimeSpec};
use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Samples to capture, starting at a device time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceiveRequest {
    pub start: TimeSpec,
    pub num_samps: usize,
}

/// Requested vs delivered sample count of one receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveProgress {
    requested: usize,
    delivered: usize,
}

impl ReceiveProgress {
    pub fn new(requested: usize) -> Self {
        Self {
            requested,
            delivered: 0,
        }
    }

    /// Count the samples of one `recv` call.
    ///
    /// Nothing is counted when the call reported an error code.
    pub fn record(
        &mut self,
        metadata: &RxMetadata,
        num_samps: usize,
    ) -> Result<usize, StreamError> {
        let code = metadata.error_code();
        if code.is_error() {
            return Err(StreamError::Receive(code));
        }
        self.delivered += num_samps.min(self.remaining());
        Ok(self.delivered)
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn remaining(&self) -> usize {
        self.requested - self.delivered
    }

    pub fn is_complete(&self) -> bool {
        self.delivered == self.requested
    }
}

/// Result of one receive.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveOutcome {
    /// One buffer per channel, truncated to the delivered count
    pub samples: Vec<IQBuffer>,
    pub progress: ReceiveProgress,
    /// Device time of the first sample
    pub time: Option<TimeSpec>,
    /// Error that stopped the receive early
    pub error: Option<StreamError>,
}

impl ReceiveOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.progress.is_complete()
    }
}

/// Capture `request.num_samps` samples per channel starting at `request.start`.
///
/// Device-reported errors end the receive and are returned in the outcome.
/// `Err` is reserved for calls the stream rejected outright.
pub fn receive_samples(
    stream: &mut dyn RxStream,
    request: &ReceiveRequest,
    timeout: Duration,
) -> UsrpResult<ReceiveOutcome> {
    stream.issue_stream_cmd(&StreamCommand::NumSampsAndDone {
        num_samps: request.num_samps,
        time: Some(request.start),
    })?;

    let mut samples =
        vec![vec![IQSample::new(0.0, 0.0); request.num_samps]; stream.num_channels()];
    let mut progress = ReceiveProgress::new(request.num_samps);
    let mut metadata = RxMetadata::new();
    let mut time = None;
    let mut error = None;

    while !progress.is_complete() {
        let offset = progress.delivered();
        let mut buffs: Vec<&mut [IQSample]> =
            samples.iter_mut().map(|b| &mut b[offset..]).collect();
        let received = stream.recv(&mut buffs, &mut metadata, timeout)?;

        match progress.record(&metadata, received) {
            Ok(_) if received == 0 => {
                error = Some(StreamError::Receive(RxErrorCode::Timeout));
                break;
            }
            Ok(_) => {
                if time.is_none() {
                    time = metadata.time_spec();
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    delivered = progress.delivered(),
                    requested = progress.requested(),
                    "Receive stopped"
                );
                error = Some(e);
                break;
            }
        }
    }

    for buffer in &mut samples {
        buffer.truncate(progress.delivered());
    }
    debug!(delivered = progress.delivered(), requested = progress.requested(), "Receive finished");
    Ok(ReceiveOutcome {
        samples,
        progress,
        time,
        error,
    })
}

/// Run receives on a dedicated thread until the request channel closes.
pub fn spawn_rx_worker(
    mut stream: Box<dyn RxStream>,
    requests: Receiver<ReceiveRequest>,
    outcomes: Sender<UsrpResult<ReceiveOutcome>>,
    timeout: Duration,
) -> UsrpResult<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("rx".to_string())
        .spawn(move || {
            for request in requests {
                let outcome = receive_samples(stream.as_mut(), &request, timeout);
                if outcomes.send(outcome).is_err() {
                    break;
                }
            }
            debug!("RX worker exiting");
        })
        .map_err(|e| UsrpError::hardware(format!("failed to spawn RX worker: {}", e)))
}
