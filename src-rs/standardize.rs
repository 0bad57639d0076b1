//! Scales a cropped garment to a common pixels-per-centimetre using body keypoints.
//!
//! Keypoints come from an external pose detector and are addressed by name
//! (`left_eye`, `right_eye`, ...), in the cropped image's pixel space.

use crate::config::CalibrationSettings;
use crate::crop::CroppedGarment;
use crate::error::CropError;
use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LEFT_EYE: &str = "left_eye";
pub const RIGHT_EYE: &str = "right_eye";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
}

/// Named keypoints produced by a pose detector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoseKeypoints(pub BTreeMap<String, Keypoint>);

impl PoseKeypoints {
    pub fn get(&self, name: &str) -> Option<Keypoint> {
        self.0.get(name).copied()
    }

    pub fn insert(&mut self, name: impl Into<String>, x: f64, y: f64) {
        self.0.insert(name.into(), Keypoint { x, y });
    }

    /// Pixel distance between the eyes, when both are detected and distinct.
    pub fn eye_distance_px(&self) -> Option<f64> {
        let l = self.get(LEFT_EYE)?;
        let r = self.get(RIGHT_EYE)?;
        let d = (l.x - r.x).hypot(l.y - r.y);
        (d.is_finite() && d > 0.0).then_some(d)
    }
}

/// Factor that maps the photo's measured scale onto the calibrated target scale.
/// Falls back to 1.0 when the eyes were not both found.
pub fn resize_factor(keypoints: &PoseKeypoints, calibration: &CalibrationSettings) -> f64 {
    match keypoints.eye_distance_px() {
        Some(px) => {
            let measured_px_per_cm = px / calibration.eye_distance_cm;
            calibration.target_pixels_per_cm / measured_px_per_cm
        }
        None => 1.0,
    }
}

pub fn standardize_item(item: &CroppedGarment, factor: f64) -> Result<CroppedGarment, CropError> {
    if !(factor.is_finite() && factor > 0.0) {
        return Err(CropError::Resize(format!("invalid scale factor {factor}")));
    }
    let (w, h) = item.dimensions();
    let new_w = (f64::from(w) * factor).round();
    let new_h = (f64::from(h) * factor).round();
    if new_w < 1.0 || new_h < 1.0 || new_w > f64::from(u32::MAX) || new_h > f64::from(u32::MAX) {
        return Err(CropError::Resize(format!(
            "scaled size {new_w}x{new_h} is out of range"
        )));
    }
    let (new_w, new_h) = (new_w as u32, new_h as u32);
    if (new_w, new_h) == (w, h) {
        return Ok(item.clone());
    }
    let resized = DynamicImage::ImageRgba8(item.image.clone())
        .resize_exact(new_w, new_h, FilterType::Lanczos3)
        .to_rgba8();
    tracing::debug!(factor, width = new_w, height = new_h, "standardized garment");
    Ok(CroppedGarment { image: resized })
}
