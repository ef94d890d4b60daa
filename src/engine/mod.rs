//! Segmentation engine bindings.
//!
//! A [`SegmentationModel`](crate::segmentation::SegmentationModel) computes
//! probability maps; an engine decides *where* that happens and how the
//! result gets back to the pipeline coordinator:
//!
//! - [`BlockingEngine`] runs the model on the caller's thread and returns
//!   the completion from `submit`.
//! - [`CallbackEngine`] owns a worker thread. `submit` returns at once and
//!   the worker publishes the completion into a single-slot [`ResultSlot`]
//!   that the coordinator drains with `poll`.
//!
//! Both are long-lived and configured once; no per-request closures.

mod blocking;
mod callback;
mod slot;

pub use blocking::BlockingEngine;
pub use callback::CallbackEngine;
pub use slot::ResultSlot;

use std::time::Duration;

use image::RgbImage;

use crate::config::{CompletionMode, QualityTier};
use crate::error::{MatteError, Result};
use crate::frame::Extent;
use crate::segmentation::ProbabilityMap;

/// One inference request, owning the converted frame for its duration
#[derive(Debug)]
pub struct InferenceRequest {
    pub id: u64,
    /// Extent of the host frame the request was built from
    pub extent: Extent,
    pub tier: QualityTier,
    pub image: RgbImage,
}

/// Outcome of an inference request
///
/// The input image travels back with the result so its bytes can be
/// returned to the buffer pool
#[derive(Debug)]
pub struct InferenceCompletion {
    pub id: u64,
    pub extent: Extent,
    pub result: Result<ProbabilityMap>,
    pub image: RgbImage,
}

impl InferenceRequest {
    /// Finish the request with `result`
    pub fn complete(self, result: Result<ProbabilityMap>) -> InferenceCompletion {
        InferenceCompletion {
            id: self.id,
            extent: self.extent,
            result,
            image: self.image,
        }
    }
}

/// What happened to a submitted request
#[derive(Debug)]
pub enum Submission {
    /// Inference ran inside `submit`
    Completed(InferenceCompletion),
    /// Inference is running elsewhere; the completion arrives via `poll`
    Pending,
    /// The engine could not take the request
    Rejected {
        request: InferenceRequest,
        reason: MatteError,
    },
}

/// Completion discipline around a segmentation model
pub trait SegmentationEngine: Send {
    fn mode(&self) -> CompletionMode;

    fn submit(&mut self, request: InferenceRequest) -> Submission;

    /// Take the completion of the outstanding request, if it has finished
    fn poll(&mut self) -> Option<InferenceCompletion>;

    /// Block up to `timeout` for the outstanding request to finish
    ///
    /// Returns `true` if a completion is ready to be polled
    fn wait(&self, timeout: Duration) -> bool;

    /// Drop model state tied to the previous stream geometry
    fn reset(&mut self);

    fn name(&self) -> &str;
}
