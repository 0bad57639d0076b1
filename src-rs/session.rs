//! Segmentation session: one photo from capture through annotation, mask fetch and crop.
//!
//! ```text
//! Idle --capture--> Annotating --get_mask--> FetchingMask --ok--> MaskReady --crop--> Cropped
//!                       ^                         |
//!                       +------- (edit) ------ Failed
//! any --reject--> Idle
//! ```
//!
//! All methods take `&self`; share a session behind an `Arc` to annotate from one
//! task while a fetch is pending on another. At most one fetch is in flight, and a
//! generation counter drops responses that arrive after [`reject`](SegmentationSession::reject).

use crate::annotations::{AddedPoint, AnnotationStore, PointSet, Polarity};
use crate::capture::CapturedImage;
use crate::client::MaskService;
use crate::codec::encode_mask_request;
use crate::crop::{crop_garment, CroppedGarment, MaskImage};
use crate::error::{AnnotationError, CropError, SessionError, SessionResult};
use crate::geometry::{BoundingBox, DisplayPoint, DisplayRect, ImageDims, Point};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Annotating,
    FetchingMask,
    MaskReady,
    Cropped,
    Failed,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Annotating => "annotating",
            SessionState::FetchingMask => "fetching_mask",
            SessionState::MaskReady => "mask_ready",
            SessionState::Cropped => "cropped",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the UI layer renders: published on every transition or annotation change.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub generation: u64,
    pub display_dims: Option<ImageDims>,
    pub points: PointSet,
    pub bbox: Option<BoundingBox>,
    pub display_positive: Vec<DisplayPoint>,
    pub display_negative: Vec<DisplayPoint>,
    pub display_box: Option<DisplayRect>,
    pub mask: Option<Arc<MaskImage>>,
    pub cropped: Option<Arc<CroppedGarment>>,
    pub last_error: Option<String>,
}

struct Inner {
    state: SessionState,
    generation: u64,
    image: Option<Arc<CapturedImage>>,
    annotations: Option<AnnotationStore>,
    mask: Option<Arc<MaskImage>>,
    cropped: Option<Arc<CroppedGarment>>,
    last_error: Option<String>,
}

impl Inner {
    fn idle(generation: u64) -> Self {
        Self {
            state: SessionState::Idle,
            generation,
            image: None,
            annotations: None,
            mask: None,
            cropped: None,
            last_error: None,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let store = self.annotations.as_ref();
        SessionSnapshot {
            state: self.state,
            generation: self.generation,
            display_dims: store.map(AnnotationStore::image),
            points: store.map(|s| s.points().clone()).unwrap_or_default(),
            bbox: store.and_then(AnnotationStore::bounding_box),
            display_positive: store
                .map(|s| s.display_points(Polarity::Positive).to_vec())
                .unwrap_or_default(),
            display_negative: store
                .map(|s| s.display_points(Polarity::Negative).to_vec())
                .unwrap_or_default(),
            display_box: store.and_then(AnnotationStore::display_box),
            mask: self.mask.clone(),
            cropped: self.cropped.clone(),
            last_error: self.last_error.clone(),
        }
    }

    fn transition(&mut self, to: SessionState) {
        if self.state != to {
            tracing::info!(from = %self.state, to = %to, generation = self.generation, "session transition");
            self.state = to;
        }
    }
}

pub struct SegmentationSession {
    inner: Mutex<Inner>,
    service: Arc<dyn MaskService>,
    jpeg_quality: u8,
    events: watch::Sender<SessionSnapshot>,
}

impl SegmentationSession {
    pub fn new(service: Arc<dyn MaskService>, jpeg_quality: u8) -> Self {
        let inner = Inner::idle(0);
        let (events, _) = watch::channel(inner.snapshot());
        Self {
            inner: Mutex::new(inner),
            service,
            jpeg_quality,
            events,
        }
    }

    /// Receives a snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn captured_image(&self) -> Option<Arc<CapturedImage>> {
        self.inner.lock().image.clone()
    }

    fn publish(&self, inner: &Inner) {
        self.events.send_replace(inner.snapshot());
    }

    /// Starts the session on a freshly captured photo.
    pub fn capture(&self, image: CapturedImage) -> SessionResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Idle {
            return Err(SessionError::InvalidState {
                operation: "capture",
                state: inner.state.name(),
            });
        }
        let dims = image.display_dims();
        tracing::debug!(
            width = dims.width,
            height = dims.height,
            orientation = image.orientation().exif_tag(),
            "captured photo"
        );
        inner.annotations = Some(AnnotationStore::new(dims));
        inner.image = Some(Arc::new(image));
        inner.transition(SessionState::Annotating);
        self.publish(&inner);
        Ok(())
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut AnnotationStore) -> Result<T, AnnotationError>,
    ) -> SessionResult<T> {
        let mut inner = self.inner.lock();
        let store = inner.annotations.as_mut().ok_or(SessionError::NoImage)?;
        let out = f(store)?;
        if matches!(
            inner.state,
            SessionState::MaskReady | SessionState::Cropped | SessionState::Failed
        ) {
            inner.last_error = None;
            inner.transition(SessionState::Annotating);
        }
        self.publish(&inner);
        Ok(out)
    }

    pub fn add_point(
        &self,
        display: DisplayPoint,
        viewport_width: f64,
        polarity: Polarity,
    ) -> SessionResult<AddedPoint> {
        self.mutate(|s| s.add_point(display, viewport_width, polarity))
    }

    pub fn remove_point(&self, index: usize, polarity: Polarity) -> SessionResult<Point> {
        self.mutate(|s| s.remove_point(index, polarity))
    }

    pub fn set_box(
        &self,
        start: DisplayPoint,
        end: DisplayPoint,
        viewport_width: f64,
    ) -> SessionResult<BoundingBox> {
        self.mutate(|s| s.set_box(start, end, viewport_width))
    }

    pub fn clear_box(&self) -> SessionResult<()> {
        self.mutate(AnnotationStore::clear_box)
    }

    pub fn set_polarity(&self, polarity: Polarity) -> SessionResult<()> {
        let mut inner = self.inner.lock();
        let store = inner.annotations.as_mut().ok_or(SessionError::NoImage)?;
        store.set_polarity(polarity);
        Ok(())
    }

    /// Sends the current annotations and working image, storing the returned mask.
    ///
    /// Rejected with [`SessionError::RequestInFlight`] while another fetch is pending.
    pub async fn get_mask(&self) -> SessionResult<Arc<MaskImage>> {
        let (generation, image, payload) = {
            let mut inner = self.inner.lock();
            match inner.state {
                SessionState::Idle => return Err(SessionError::NoImage),
                SessionState::FetchingMask => return Err(SessionError::RequestInFlight),
                _ => {}
            }
            let image = inner.image.clone().ok_or(SessionError::NoImage)?;
            let store = inner.annotations.as_mut().ok_or(SessionError::NoImage)?;
            let payload = store.payload();
            payload.validate()?;
            store.freeze();

            inner.last_error = None;
            inner.transition(SessionState::FetchingMask);
            self.publish(&inner);
            (inner.generation, image, payload)
        };

        let mut pending = PendingFetch {
            session: self,
            generation,
            armed: true,
        };
        let quality = self.jpeg_quality;
        let service = Arc::clone(&self.service);
        let outcome = async move {
            let jpeg = tokio::task::spawn_blocking(move || image.working_jpeg(quality))
                .await
                .map_err(|e| SessionError::Task(e.to_string()))??;
            let body = encode_mask_request(&payload, &jpeg)?;
            Ok::<_, SessionError>(service.fetch_mask(body).await?)
        }
        .await;
        pending.armed = false;

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            tracing::warn!(
                request_generation = generation,
                current_generation = inner.generation,
                "dropping mask response for a discarded session"
            );
            return Err(SessionError::Discarded);
        }
        if let Some(store) = inner.annotations.as_mut() {
            store.thaw();
        }
        let result = match outcome {
            Ok(mask) => {
                let mask = Arc::new(mask);
                inner.mask = Some(Arc::clone(&mask));
                inner.cropped = None;
                inner.transition(SessionState::MaskReady);
                Ok(mask)
            }
            Err(err) => {
                tracing::warn!(error = %err, "mask fetch failed");
                inner.last_error = Some(err.to_string());
                inner.transition(SessionState::Failed);
                Err(err)
            }
        };
        self.publish(&inner);
        result
    }

    /// Cuts the garment out of the full-resolution photo using the current mask.
    /// A failed crop leaves the session in `MaskReady`.
    pub async fn crop(&self) -> SessionResult<Arc<CroppedGarment>> {
        let (generation, image, mask) = {
            let inner = self.inner.lock();
            match inner.state {
                SessionState::Idle => return Err(SessionError::NoImage),
                SessionState::FetchingMask => return Err(SessionError::RequestInFlight),
                _ => {}
            }
            let mask = inner
                .mask
                .clone()
                .ok_or(SessionError::Crop(CropError::NoMask))?;
            if !matches!(inner.state, SessionState::MaskReady | SessionState::Cropped) {
                return Err(SessionError::InvalidState {
                    operation: "crop",
                    state: inner.state.name(),
                });
            }
            let image = inner.image.clone().ok_or(SessionError::NoImage)?;
            (inner.generation, image, mask)
        };

        let crop_mask = Arc::clone(&mask);
        let outcome = tokio::task::spawn_blocking(move || {
            crop_garment(&image, Some(crop_mask.as_ref()))
        })
        .await
        .map_err(|e| SessionError::Task(e.to_string()))?;
        self.finish_crop(generation, &mask, outcome)
    }

    /// Stores a crop result only if it was made from the mask the session still shows.
    fn finish_crop(
        &self,
        generation: u64,
        mask: &Arc<MaskImage>,
        outcome: Result<CroppedGarment, CropError>,
    ) -> SessionResult<Arc<CroppedGarment>> {
        let mut inner = self.inner.lock();
        let same_mask = inner.mask.as_ref().is_some_and(|m| Arc::ptr_eq(m, mask));
        if inner.generation != generation
            || !same_mask
            || !matches!(inner.state, SessionState::MaskReady | SessionState::Cropped)
        {
            tracing::warn!(state = %inner.state, "dropping crop result for a replaced mask");
            return Err(SessionError::Discarded);
        }
        let result = match outcome {
            Ok(cropped) => {
                let cropped = Arc::new(cropped);
                inner.cropped = Some(Arc::clone(&cropped));
                inner.last_error = None;
                inner.transition(SessionState::Cropped);
                Ok(cropped)
            }
            Err(err) => {
                tracing::warn!(error = %err, "crop failed");
                inner.last_error = Some(err.to_string());
                Err(SessionError::Crop(err))
            }
        };
        self.publish(&inner);
        result
    }

    /// Discards the photo and everything derived from it. Any in-flight response is dropped.
    pub fn reject(&self) {
        let mut inner = self.inner.lock();
        let next = inner.generation.wrapping_add(1);
        tracing::info!(from = %inner.state, generation = next, "session rejected");
        *inner = Inner::idle(next);
        self.publish(&inner);
    }
}

/// Armed while `get_mask` awaits; if the future is dropped there, the session
/// leaves `FetchingMask` for `Failed` so the user can edit and retry.
struct PendingFetch<'a> {
    session: &'a SegmentationSession,
    generation: u64,
    armed: bool,
}

impl Drop for PendingFetch<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.session.inner.lock();
        if inner.generation != self.generation || inner.state != SessionState::FetchingMask {
            return;
        }
        if let Some(store) = inner.annotations.as_mut() {
            store.thaw();
        }
        tracing::warn!(generation = self.generation, "mask request cancelled by caller");
        inner.last_error = Some("mask request was cancelled".to_string());
        inner.transition(SessionState::Failed);
        self.session.publish(&inner);
    }
}
