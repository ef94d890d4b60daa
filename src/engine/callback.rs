use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use image::RgbImage;

use super::{InferenceCompletion, InferenceRequest, ResultSlot, SegmentationEngine, Submission};
use crate::config::CompletionMode;
use crate::error::{MatteError, Result};
use crate::frame::Extent;
use crate::segmentation::SegmentationModel;

/// Commands sent to the engine worker
enum WorkerCommand {
    /// Run one request, clearing model state first when `reset` is set
    Segment {
        request: InferenceRequest,
        reset: bool,
    },
    Shutdown,
}

/// Runs the model on an engine-owned worker thread
///
/// Requests travel over a bounded channel; completions come back through
/// a [`ResultSlot`]. The coordinator keeps at most one request in flight,
/// and `submit` rejects rather than blocks if the queue is ever full
/// Resets never touch the queue; they ride along with the next request
pub struct CallbackEngine {
    commands: Sender<WorkerCommand>,
    slot: Arc<ResultSlot>,
    worker: Option<JoinHandle<()>>,
    outstanding: Option<u64>,
    reset_pending: bool,
    name: String,
}

impl CallbackEngine {
    /// Move `model` onto a new worker thread
    pub fn spawn<M>(model: M) -> Result<Self>
    where
        M: SegmentationModel + 'static,
    {
        let name = model.name().to_string();
        // Room for one request plus the shutdown command
        let (commands, inbox) = bounded(2);
        let slot = Arc::new(ResultSlot::new());

        let worker_slot = Arc::clone(&slot);
        let worker = thread::Builder::new()
            .name("segmentation-worker".into())
            .spawn(move || run_worker(model, inbox, worker_slot))
            .map_err(|e| MatteError::unavailable(format!("failed to spawn worker: {}", e)))?;

        tracing::info!("Callback engine using {} on a worker thread", name);

        Ok(Self {
            commands,
            slot,
            worker: Some(worker),
            outstanding: None,
            reset_pending: false,
            name,
        })
    }

    fn worker_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

fn run_worker<M: SegmentationModel>(
    mut model: M,
    inbox: Receiver<WorkerCommand>,
    slot: Arc<ResultSlot>,
) {
    tracing::debug!("Segmentation worker started");
    for command in inbox.iter() {
        match command {
            WorkerCommand::Segment { request, reset } => {
                let _span = tracing::debug_span!("callback_inference", id = request.id).entered();
                if reset {
                    model.reset_state();
                }
                let result = model.segment(&request.image, request.tier);
                slot.publish(request.complete(result));
            }
            WorkerCommand::Shutdown => break,
        }
    }
    tracing::debug!("Segmentation worker stopped");
}

impl SegmentationEngine for CallbackEngine {
    fn mode(&self) -> CompletionMode {
        CompletionMode::Callback
    }

    fn submit(&mut self, request: InferenceRequest) -> Submission {
        let id = request.id;
        let reset = std::mem::take(&mut self.reset_pending);
        let command = WorkerCommand::Segment { request, reset };
        let (command, reason) = match self.commands.try_send(command) {
            Ok(()) => {
                self.outstanding = Some(id);
                return Submission::Pending;
            }
            Err(TrySendError::Full(command)) => (command, "worker queue is full"),
            Err(TrySendError::Disconnected(command)) => (command, "worker has stopped"),
        };

        // Keep the reset for whichever request gets through next
        self.reset_pending |= reset;
        match command {
            WorkerCommand::Segment { request, .. } => Submission::Rejected {
                request,
                reason: MatteError::unavailable(reason),
            },
            WorkerCommand::Shutdown => unreachable!("only segment commands are sent here"),
        }
    }

    fn poll(&mut self) -> Option<InferenceCompletion> {
        if let Some(completion) = self.slot.take() {
            if self.outstanding == Some(completion.id) {
                self.outstanding = None;
            }
            return Some(completion);
        }

        // A worker that died mid-request will never publish; fail the
        // request so the coordinator does not wait on it forever.
        if self.worker_finished() {
            if let Some(id) = self.outstanding.take() {
                tracing::error!("Segmentation worker exited with request {} outstanding", id);
                return Some(InferenceCompletion {
                    id,
                    extent: Extent::new(0, 0),
                    result: Err(MatteError::unavailable("worker exited")),
                    image: RgbImage::new(0, 0),
                });
            }
        }
        None
    }

    fn wait(&self, timeout: Duration) -> bool {
        self.slot.wait(timeout)
    }

    fn reset(&mut self) {
        tracing::debug!("Model reset deferred to the next request");
        self.reset_pending = true;
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CallbackEngine {
    fn drop(&mut self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Segmentation worker panicked");
            }
        }
    }
}
