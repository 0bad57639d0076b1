//! Evolving point/box annotations for one in-progress segmentation request.

use crate::codec::AnnotationPayload;
use crate::error::AnnotationError;
use crate::geometry::{BoundingBox, CoordinateMapper, DisplayPoint, DisplayRect, ImageDims, Point};
use serde::{Deserialize, Serialize};

/// Whether a point marks foreground (garment) or background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    #[default]
    Positive,
    Negative,
}

impl Polarity {
    pub fn label(self) -> &'static str {
        match self {
            Polarity::Positive => "POS",
            Polarity::Negative => "NEG",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Polarity::Positive => Polarity::Negative,
            Polarity::Negative => Polarity::Positive,
        }
    }
}

/// Image-space points in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointSet {
    #[serde(rename = "pos_points")]
    pub positive: Vec<Point>,
    #[serde(rename = "neg_points")]
    pub negative: Vec<Point>,
}

impl PointSet {
    pub fn is_empty(&self) -> bool {
        self.positive.is_empty() && self.negative.is_empty()
    }

    pub fn get(&self, polarity: Polarity) -> &[Point] {
        match polarity {
            Polarity::Positive => &self.positive,
            Polarity::Negative => &self.negative,
        }
    }
}

/// Result of adding a point: where it landed and its index in its polarity list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddedPoint {
    pub index: usize,
    pub point: Point,
}

/// Holds the positive/negative points and optional box for one photo.
///
/// Every image-space list has a display-space twin of equal length used for
/// overlay markers; both are always mutated together so indices line up.
#[derive(Debug, Clone)]
pub struct AnnotationStore {
    image: ImageDims,
    points: PointSet,
    display_positive: Vec<DisplayPoint>,
    display_negative: Vec<DisplayPoint>,
    bbox: Option<BoundingBox>,
    display_box: Option<DisplayRect>,
    polarity: Polarity,
    frozen: bool,
}

impl AnnotationStore {
    /// `image` is the displayed (orientation-applied) size of the working image.
    pub fn new(image: ImageDims) -> Self {
        Self {
            image,
            points: PointSet::default(),
            display_positive: Vec::new(),
            display_negative: Vec::new(),
            bbox: None,
            display_box: None,
            polarity: Polarity::Positive,
            frozen: false,
        }
    }

    pub fn image(&self) -> ImageDims {
        self.image
    }

    pub fn points(&self) -> &PointSet {
        &self.points
    }

    pub fn display_points(&self, polarity: Polarity) -> &[DisplayPoint] {
        match polarity {
            Polarity::Positive => &self.display_positive,
            Polarity::Negative => &self.display_negative,
        }
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.bbox
    }

    pub fn display_box(&self) -> Option<DisplayRect> {
        self.display_box
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    pub fn set_polarity(&mut self, polarity: Polarity) {
        self.polarity = polarity;
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.bbox.is_none()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    pub(crate) fn thaw(&mut self) {
        self.frozen = false;
    }

    fn ensure_mutable(&self) -> Result<(), AnnotationError> {
        if self.frozen {
            return Err(AnnotationError::Frozen);
        }
        Ok(())
    }

    /// Maps a tap into image space and appends it to the list for `polarity`.
    pub fn add_point(
        &mut self,
        display: DisplayPoint,
        viewport_width: f64,
        polarity: Polarity,
    ) -> Result<AddedPoint, AnnotationError> {
        self.ensure_mutable()?;
        let mapper = CoordinateMapper::new(self.image, viewport_width)?;
        let point = mapper.to_image(display);

        let (image_list, display_list) = match polarity {
            Polarity::Positive => (&mut self.points.positive, &mut self.display_positive),
            Polarity::Negative => (&mut self.points.negative, &mut self.display_negative),
        };
        image_list.push(point);
        display_list.push(display);
        let index = image_list.len() - 1;

        tracing::debug!(
            polarity = polarity.label(),
            index,
            x = point.x,
            y = point.y,
            "added image point"
        );
        Ok(AddedPoint { index, point })
    }

    /// Same as [`add_point`](Self::add_point) using the store's current polarity.
    pub fn add_point_with_current(
        &mut self,
        display: DisplayPoint,
        viewport_width: f64,
    ) -> Result<AddedPoint, AnnotationError> {
        self.add_point(display, viewport_width, self.polarity)
    }

    /// Removes the point at `index` from both the image and display lists.
    pub fn remove_point(&mut self, index: usize, polarity: Polarity) -> Result<Point, AnnotationError> {
        self.ensure_mutable()?;
        let (image_list, display_list) = match polarity {
            Polarity::Positive => (&mut self.points.positive, &mut self.display_positive),
            Polarity::Negative => (&mut self.points.negative, &mut self.display_negative),
        };
        if index >= image_list.len() {
            return Err(AnnotationError::IndexOutOfRange {
                index,
                len: image_list.len(),
            });
        }
        let point = image_list.remove(index);
        display_list.remove(index);

        tracing::debug!(polarity = polarity.label(), index, x = point.x, y = point.y, "removed point");
        Ok(point)
    }

    /// Replaces the box with the one spanned by a drag gesture.
    pub fn set_box(
        &mut self,
        start: DisplayPoint,
        end: DisplayPoint,
        viewport_width: f64,
    ) -> Result<BoundingBox, AnnotationError> {
        self.ensure_mutable()?;
        let mapper = CoordinateMapper::new(self.image, viewport_width)?;
        let bbox = BoundingBox::from_corners(mapper.to_image(start), mapper.to_image(end));

        self.bbox = Some(bbox);
        self.display_box = Some(DisplayRect {
            start,
            end: mapper.bound_display(end),
        });

        tracing::debug!(
            x1 = bbox.point1.x,
            y1 = bbox.point1.y,
            x2 = bbox.point2.x,
            y2 = bbox.point2.y,
            "set image box"
        );
        Ok(bbox)
    }

    pub fn clear_box(&mut self) -> Result<(), AnnotationError> {
        self.ensure_mutable()?;
        self.bbox = None;
        self.display_box = None;
        Ok(())
    }

    /// Drops every point and the box.
    pub fn clear(&mut self) -> Result<(), AnnotationError> {
        self.ensure_mutable()?;
        self.points = PointSet::default();
        self.display_positive.clear();
        self.display_negative.clear();
        self.bbox = None;
        self.display_box = None;
        Ok(())
    }

    /// Snapshot of what would be sent with a mask request.
    pub fn payload(&self) -> AnnotationPayload {
        AnnotationPayload::new(self.points.clone(), self.bbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AnnotationStore {
        AnnotationStore::new(ImageDims::new(1000, 1500))
    }

    #[test]
    fn add_keeps_display_and_image_lists_aligned() {
        let mut s = store();
        s.add_point(DisplayPoint::new(10.0, 10.0), 300.0, Polarity::Positive)
            .unwrap();
        s.add_point(DisplayPoint::new(20.0, 30.0), 300.0, Polarity::Negative)
            .unwrap();
        let added = s
            .add_point(DisplayPoint::new(150.0, 225.0), 300.0, Polarity::Positive)
            .unwrap();

        assert_eq!(added.index, 1);
        assert_eq!(added.point, Point::new(500, 750));
        assert_eq!(s.points().positive.len(), s.display_points(Polarity::Positive).len());
        assert_eq!(s.points().negative.len(), s.display_points(Polarity::Negative).len());
        assert_eq!(s.display_points(Polarity::Positive)[1], DisplayPoint::new(150.0, 225.0));
    }

    #[test]
    fn remove_after_add_restores_previous_state() {
        let mut s = store();
        s.add_point(DisplayPoint::new(1.0, 2.0), 300.0, Polarity::Positive)
            .unwrap();
        let before = s.points().clone();
        let before_display = s.display_points(Polarity::Positive).to_vec();

        let added = s
            .add_point(DisplayPoint::new(77.0, 88.0), 300.0, Polarity::Positive)
            .unwrap();
        let removed = s.remove_point(added.index, Polarity::Positive).unwrap();

        assert_eq!(removed, added.point);
        assert_eq!(s.points(), &before);
        assert_eq!(s.display_points(Polarity::Positive), before_display.as_slice());
    }

    #[test]
    fn remove_out_of_range_is_reported() {
        let mut s = store();
        s.add_point(DisplayPoint::new(1.0, 2.0), 300.0, Polarity::Negative)
            .unwrap();
        assert_eq!(
            s.remove_point(3, Polarity::Negative),
            Err(AnnotationError::IndexOutOfRange { index: 3, len: 1 })
        );
        assert_eq!(
            s.remove_point(0, Polarity::Positive),
            Err(AnnotationError::IndexOutOfRange { index: 0, len: 0 })
        );
        assert_eq!(s.points().negative.len(), 1);
    }

    #[test]
    fn box_is_normalized_regardless_of_drag_direction() {
        let mut s = store();
        let b = s
            .set_box(DisplayPoint::new(10.0, 10.0), DisplayPoint::new(5.0, 5.0), 300.0)
            .unwrap();
        assert_eq!(b.point1, Point::new(16, 16));
        assert_eq!(b.point2, Point::new(33, 33));

        let drags = [
            ((0.0, 300.0), (200.0, 12.0)),
            ((250.0, 1.0), (3.0, 440.0)),
            ((299.0, 449.0), (0.0, 0.0)),
        ];
        for ((sx, sy), (ex, ey)) in drags {
            let b = s
                .set_box(DisplayPoint::new(sx, sy), DisplayPoint::new(ex, ey), 300.0)
                .unwrap();
            assert!(b.point1.x <= b.point2.x);
            assert!(b.point1.y <= b.point2.y);
        }
    }

    #[test]
    fn new_box_replaces_old_and_display_end_is_bounded() {
        let mut s = store();
        s.set_box(DisplayPoint::new(0.0, 0.0), DisplayPoint::new(10.0, 10.0), 300.0)
            .unwrap();
        s.set_box(DisplayPoint::new(20.0, 20.0), DisplayPoint::new(100.0, 900.0), 300.0)
            .unwrap();

        let b = s.bounding_box().unwrap();
        assert_eq!(b.point1, Point::new(66, 66));
        assert_eq!(b.point2, Point::new(333, 1500));

        let rect = s.display_box().unwrap();
        assert_eq!(rect.start, DisplayPoint::new(20.0, 20.0));
        assert_eq!(rect.end, DisplayPoint::new(100.0, 450.0));
    }

    #[test]
    fn frozen_store_rejects_mutation() {
        let mut s = store();
        s.add_point(DisplayPoint::new(1.0, 1.0), 300.0, Polarity::Positive)
            .unwrap();
        s.freeze();

        assert_eq!(
            s.add_point(DisplayPoint::new(2.0, 2.0), 300.0, Polarity::Positive),
            Err(AnnotationError::Frozen)
        );
        assert_eq!(s.remove_point(0, Polarity::Positive), Err(AnnotationError::Frozen));
        assert!(s
            .set_box(DisplayPoint::new(0.0, 0.0), DisplayPoint::new(1.0, 1.0), 300.0)
            .is_err());
        assert_eq!(s.points().positive.len(), 1);

        s.thaw();
        assert!(s.remove_point(0, Polarity::Positive).is_ok());
    }

    #[test]
    fn current_polarity_routes_taps() {
        let mut s = store();
        s.set_polarity(s.polarity().toggled());
        s.add_point_with_current(DisplayPoint::new(3.0, 3.0), 300.0)
            .unwrap();
        assert!(s.points().positive.is_empty());
        assert_eq!(s.points().negative.len(), 1);
    }

    #[test]
    fn clear_box_leaves_points() {
        let mut s = store();
        s.add_point(DisplayPoint::new(1.0, 1.0), 300.0, Polarity::Positive)
            .unwrap();
        s.set_box(DisplayPoint::new(0.0, 0.0), DisplayPoint::new(1.0, 1.0), 300.0)
            .unwrap();
        s.clear_box().unwrap();
        assert!(s.bounding_box().is_none());
        assert!(s.display_box().is_none());
        assert!(!s.is_empty());
        s.clear().unwrap();
        assert!(s.is_empty());
    }
}
