//! Interactive garment segmentation.
//!
//! A photo is captured, annotated with positive/negative taps and an optional box,
//! sent to an inference server that answers with a mask, and the mask is applied
//! to the full-resolution photo to cut the garment out.

pub mod annotations;
pub mod capture;
pub mod client;
pub mod codec;
pub mod config;
pub mod crop;
pub mod error;
pub mod geometry;
pub mod overlay;
pub mod session;
pub mod standardize;

pub use annotations::{AddedPoint, AnnotationStore, PointSet, Polarity};
pub use capture::{CapturedImage, Orientation};
pub use client::{HttpMaskClient, MaskService};
pub use codec::{decode_mask_response, encode_mask_request, AnnotationPayload, MultipartBody};
pub use config::{CalibrationSettings, SegmenterConfig};
pub use crop::{apply_mask, crop_garment, CroppedGarment, MaskImage};
pub use error::{
    AnnotationError, CaptureError, ConfigError, CropError, MaskFetchError, SessionError, SessionResult,
};
pub use geometry::{BoundingBox, CoordinateMapper, DisplayPoint, DisplayRect, ImageDims, Point};
pub use overlay::{render_overlay, OverlayStyle};
pub use session::{SegmentationSession, SessionSnapshot, SessionState};
pub use standardize::{resize_factor, standardize_item, PoseKeypoints};
