//! Captured photo handed over by the camera layer, plus orientation handling.

use crate::error::CaptureError;
use crate::geometry::ImageDims;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// EXIF-style source orientation (tags 1 through 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Up,
    UpMirrored,
    Down,
    DownMirrored,
    LeftMirrored,
    Right,
    RightMirrored,
    Left,
}

impl Orientation {
    pub fn from_exif(tag: u32) -> Result<Self, CaptureError> {
        Ok(match tag {
            1 => Orientation::Up,
            2 => Orientation::UpMirrored,
            3 => Orientation::Down,
            4 => Orientation::DownMirrored,
            5 => Orientation::LeftMirrored,
            6 => Orientation::Right,
            7 => Orientation::RightMirrored,
            8 => Orientation::Left,
            other => return Err(CaptureError::Orientation(other)),
        })
    }

    pub fn exif_tag(self) -> u32 {
        match self {
            Orientation::Up => 1,
            Orientation::UpMirrored => 2,
            Orientation::Down => 3,
            Orientation::DownMirrored => 4,
            Orientation::LeftMirrored => 5,
            Orientation::Right => 6,
            Orientation::RightMirrored => 7,
            Orientation::Left => 8,
        }
    }

    /// True when displaying the buffer rotates it by a quarter turn.
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Orientation::LeftMirrored
                | Orientation::Right
                | Orientation::RightMirrored
                | Orientation::Left
        )
    }

    /// Size of a stored buffer once shown in this orientation.
    pub fn displayed_dims(self, stored: ImageDims) -> ImageDims {
        if self.swaps_axes() {
            stored.transposed()
        } else {
            stored
        }
    }

    /// Rewrites the pixel buffer so it reads upright; the result is orientation `Up`.
    pub fn apply(self, image: DynamicImage) -> DynamicImage {
        match self {
            Orientation::Up => image,
            Orientation::UpMirrored => image.fliph(),
            Orientation::Down => image.rotate180(),
            Orientation::DownMirrored => image.flipv(),
            Orientation::LeftMirrored => image.rotate90().fliph(),
            Orientation::Right => image.rotate90(),
            Orientation::RightMirrored => image.rotate270().fliph(),
            Orientation::Left => image.rotate270(),
        }
    }
}

/// One photo capture: full-resolution and thumbnail encodings with their stored sizes.
///
/// Immutable once built; sessions share it read-only behind an `Arc`.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    full: Vec<u8>,
    full_dims: ImageDims,
    thumbnail: Vec<u8>,
    thumbnail_dims: ImageDims,
    orientation: Orientation,
}

impl CapturedImage {
    pub fn new(
        full: Vec<u8>,
        full_dims: ImageDims,
        thumbnail: Vec<u8>,
        thumbnail_dims: ImageDims,
        orientation: Orientation,
    ) -> Result<Self, CaptureError> {
        if full.is_empty() || full_dims.is_empty() {
            return Err(CaptureError::Decode {
                what: "full image",
                reason: "empty image".to_string(),
            });
        }
        if thumbnail.is_empty() || thumbnail_dims.is_empty() {
            return Err(CaptureError::Decode {
                what: "thumbnail",
                reason: "empty image".to_string(),
            });
        }
        Ok(Self {
            full,
            full_dims,
            thumbnail,
            thumbnail_dims,
            orientation,
        })
    }

    /// Builds a capture from encoded bytes, reading sizes by decoding both images.
    pub fn from_encoded(
        full: Vec<u8>,
        thumbnail: Vec<u8>,
        orientation: Orientation,
    ) -> Result<Self, CaptureError> {
        let full_dims = dims_of(decode(&full, "full image")?);
        let thumbnail_dims = dims_of(decode(&thumbnail, "thumbnail")?);
        Self::new(full, full_dims, thumbnail, thumbnail_dims, orientation)
    }

    pub fn full_bytes(&self) -> &[u8] {
        &self.full
    }

    pub fn full_dims(&self) -> ImageDims {
        self.full_dims
    }

    pub fn thumbnail_bytes(&self) -> &[u8] {
        &self.thumbnail
    }

    pub fn thumbnail_dims(&self) -> ImageDims {
        self.thumbnail_dims
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Thumbnail size as the user sees it; gestures are mapped against this.
    pub fn display_dims(&self) -> ImageDims {
        self.orientation.displayed_dims(self.thumbnail_dims)
    }

    /// Full-resolution image rewritten to orientation `Up`.
    pub fn normalized_full(&self) -> Result<DynamicImage, CaptureError> {
        Ok(self.orientation.apply(decode(&self.full, "full image")?))
    }

    /// Thumbnail in its displayed orientation.
    pub fn working_image(&self) -> Result<DynamicImage, CaptureError> {
        Ok(self.orientation.apply(decode(&self.thumbnail, "thumbnail")?))
    }

    /// JPEG bytes of the displayed thumbnail, as uploaded with a mask request.
    pub fn working_jpeg(&self, quality: u8) -> Result<Vec<u8>, CaptureError> {
        encode_jpeg(&self.working_image()?, quality)
    }
}

pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let rgb = image.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(out)
}

fn decode(bytes: &[u8], what: &'static str) -> Result<DynamicImage, CaptureError> {
    image::load_from_memory(bytes).map_err(|e| CaptureError::Decode {
        what,
        reason: e.to_string(),
    })
}

fn dims_of(image: DynamicImage) -> ImageDims {
    ImageDims::new(image.width(), image.height())
}
