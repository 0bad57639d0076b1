//! Image-space and display-space geometry, and the gesture-to-image coordinate mapper.

use crate::error::AnnotationError;
use serde::{Deserialize, Serialize};

/// Integer pixel coordinate in image space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in image space. `point1` is top-left, `point2` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub point1: Point,
    pub point2: Point,
}

impl BoundingBox {
    /// Builds a box from two arbitrary corners, normalizing to top-left/bottom-right.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            point1: Point::new(a.x.min(b.x), a.y.min(b.y)),
            point2: Point::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    pub fn width(&self) -> i32 {
        self.point2.x - self.point1.x
    }

    pub fn height(&self) -> i32 {
        self.point2.y - self.point1.y
    }
}

/// Gesture coordinate in the rendered viewport (device points).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayPoint {
    pub x: f64,
    pub y: f64,
}

impl DisplayPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Drag rectangle as rendered, start/end in display space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayRect {
    pub start: DisplayPoint,
    pub end: DisplayPoint,
}

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageDims {
    pub width: u32,
    pub height: u32,
}

impl ImageDims {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// height / width
    pub fn aspect_ratio(&self) -> f64 {
        f64::from(self.height) / f64::from(self.width)
    }

    pub fn transposed(&self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Maps viewport gestures onto the displayed image's pixel grid.
///
/// The image is assumed to be rendered at the full viewport width with its
/// aspect ratio preserved, anchored at the viewport's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    image: ImageDims,
    viewport_width: f64,
}

impl CoordinateMapper {
    pub fn new(image: ImageDims, viewport_width: f64) -> Result<Self, AnnotationError> {
        if !viewport_width.is_finite() || viewport_width <= 0.0 {
            return Err(AnnotationError::InvalidViewport(viewport_width));
        }
        Ok(Self {
            image,
            viewport_width,
        })
    }

    pub fn image(&self) -> ImageDims {
        self.image
    }

    pub fn viewport_width(&self) -> f64 {
        self.viewport_width
    }

    /// Height of the image as rendered in the viewport.
    pub fn rendered_height(&self) -> f64 {
        self.image.aspect_ratio() * self.viewport_width
    }

    /// Converts a display coordinate into an image-space point clamped to the image bounds.
    pub fn to_image(&self, point: DisplayPoint) -> Point {
        let width = f64::from(self.image.width);
        let height = f64::from(self.image.height);

        let image_x = point.x * (width / self.viewport_width);
        let image_y = point.y * height / (self.image.aspect_ratio() * self.viewport_width);

        Point::new(clamp_axis(image_x, width), clamp_axis(image_y, height))
    }

    /// Clamps a display point's y to the rendered image height.
    pub fn bound_display(&self, point: DisplayPoint) -> DisplayPoint {
        let max_y = self.rendered_height();
        if point.y > max_y {
            DisplayPoint::new(point.x, max_y)
        } else {
            point
        }
    }
}

fn clamp_axis(value: f64, max: f64) -> i32 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, max) as i32
}
