//! Wire format for the inference server: multipart mask requests and JSON mask responses.

use crate::annotations::PointSet;
use crate::crop::MaskImage;
use crate::error::{AnnotationError, MaskFetchError};
use crate::geometry::BoundingBox;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

const JSON_PART_NAME: &str = "json";
const JSON_PART_FILENAME: &str = "json_data_from_ios_client.json";
const IMAGE_PART_NAME: &str = "image";
const IMAGE_PART_FILENAME: &str = "image_from_ios_client.jpg";

/// Points and box sent alongside the image. Empty point lists are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<PointSet>,
    #[serde(rename = "box", skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

impl AnnotationPayload {
    pub fn new(points: PointSet, bbox: Option<BoundingBox>) -> Self {
        Self {
            points: if points.is_empty() { None } else { Some(points) },
            bbox,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_none() && self.bbox.is_none()
    }

    pub fn validate(&self) -> Result<(), AnnotationError> {
        if self.is_empty() {
            return Err(AnnotationError::Empty);
        }
        Ok(())
    }

    /// Serializes the `json` part body. Fails when there is nothing to send.
    pub fn to_json(&self) -> Result<String, AnnotationError> {
        self.validate()?;
        serde_json::to_string(self).map_err(|e| AnnotationError::Encode(e.to_string()))
    }
}

/// A fully framed `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartBody {
    boundary: String,
    bytes: Vec<u8>,
}

impl MultipartBody {
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Fresh boundary token for one request.
pub fn random_boundary() -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    format!("Boundary-{token}")
}

/// Builds the two-part mask request body with a random boundary.
pub fn encode_mask_request(
    payload: &AnnotationPayload,
    jpeg: &[u8],
) -> Result<MultipartBody, AnnotationError> {
    encode_mask_request_with_boundary(payload, jpeg, random_boundary())
}

pub fn encode_mask_request_with_boundary(
    payload: &AnnotationPayload,
    jpeg: &[u8],
    boundary: String,
) -> Result<MultipartBody, AnnotationError> {
    let json = payload.to_json()?;

    let mut bytes = Vec::with_capacity(json.len() + jpeg.len() + 512);
    write_part(
        &mut bytes,
        &boundary,
        JSON_PART_NAME,
        JSON_PART_FILENAME,
        "application/json",
        json.as_bytes(),
    );
    write_part(
        &mut bytes,
        &boundary,
        IMAGE_PART_NAME,
        IMAGE_PART_FILENAME,
        "image/jpeg",
        jpeg,
    );
    bytes.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    tracing::debug!(json = %json, image_bytes = jpeg.len(), body_bytes = bytes.len(), "encoded mask request");
    Ok(MultipartBody { boundary, bytes })
}

fn write_part(
    out: &mut Vec<u8>,
    boundary: &str,
    name: &str,
    filename: &str,
    content_type: &str,
    body: &[u8],
) {
    out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    out.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    out.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(b"\r\n");
}

#[derive(Debug, Deserialize)]
struct MaskResponse {
    image_data: String,
}

/// Parses the server's JSON reply and decodes the base64 mask image it carries.
pub fn decode_mask_response(body: &[u8]) -> Result<MaskImage, MaskFetchError> {
    let response: MaskResponse = serde_json::from_slice(body)
        .map_err(|e| MaskFetchError::MalformedResponse(format!("invalid JSON body: {e}")))?;
    let raw = STANDARD
        .decode(response.image_data.trim())
        .map_err(|e| MaskFetchError::MalformedResponse(format!("invalid base64 in image_data: {e}")))?;
    let image = image::load_from_memory(&raw)
        .map_err(|e| MaskFetchError::MalformedResponse(format!("image_data is not an image: {e}")))?;
    Ok(MaskImage::new(image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use serde_json::{json, Value};
    use std::io::Cursor;

    fn one_point() -> PointSet {
        PointSet {
            positive: vec![Point::new(500, 750)],
            negative: vec![],
        }
    }

    fn png_fixture(w: u32, h: u32) -> Vec<u8> {
        let mask = GrayImage::from_fn(w, h, |x, _| if x < w / 2 { Luma([255]) } else { Luma([0]) });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(mask)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn points_only_payload_omits_box() {
        let json = AnnotationPayload::new(one_point(), None).to_json().unwrap();
        assert_eq!(
            json,
            r#"{"points":{"pos_points":[{"x":500,"y":750}],"neg_points":[]}}"#
        );
    }

    #[test]
    fn box_only_payload_omits_points() {
        let bbox = BoundingBox::from_corners(Point::new(33, 33), Point::new(16, 16));
        let value: Value =
            serde_json::from_str(&AnnotationPayload::new(PointSet::default(), Some(bbox)).to_json().unwrap())
                .unwrap();
        assert_eq!(
            value,
            json!({"box": {"point1": {"x": 16, "y": 16}, "point2": {"x": 33, "y": 33}}})
        );
    }

    #[test]
    fn payload_with_both_has_both_keys() {
        let bbox = BoundingBox::from_corners(Point::new(0, 0), Point::new(10, 10));
        let value: Value =
            serde_json::from_str(&AnnotationPayload::new(one_point(), Some(bbox)).to_json().unwrap()).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("points"));
        assert!(obj.contains_key("box"));
    }

    #[test]
    fn json_part_matches_serde_output() {
        let bbox = BoundingBox::from_corners(Point::new(4, 9), Point::new(1, 2));
        let payload = AnnotationPayload::new(one_point(), Some(bbox));
        assert_eq!(payload.to_json().unwrap(), serde_json::to_string(&payload).unwrap());
        assert_eq!(
            AnnotationError::Encode("boom".into()).to_string(),
            "failed to encode annotation JSON: boom"
        );
    }

    #[test]
    fn empty_payload_is_rejected() {
        let payload = AnnotationPayload::new(PointSet::default(), None);
        assert_eq!(payload.to_json(), Err(AnnotationError::Empty));
        assert!(encode_mask_request(&payload, b"jpeg").is_err());
    }

    #[test]
    fn multipart_body_has_two_parts_and_closing_boundary() {
        let payload = AnnotationPayload::new(one_point(), None);
        let body =
            encode_mask_request_with_boundary(&payload, b"\xff\xd8JPEG", "Boundary-test".to_string())
                .unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(b"--Boundary-test\r\n");
        expected.extend_from_slice(
            b"Content-Disposition: form-data; name=\"json\"; filename=\"json_data_from_ios_client.json\"\r\n",
        );
        expected.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
        expected.extend_from_slice(br#"{"points":{"pos_points":[{"x":500,"y":750}],"neg_points":[]}}"#);
        expected.extend_from_slice(b"\r\n--Boundary-test\r\n");
        expected.extend_from_slice(
            b"Content-Disposition: form-data; name=\"image\"; filename=\"image_from_ios_client.jpg\"\r\n",
        );
        expected.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
        expected.extend_from_slice(b"\xff\xd8JPEG");
        expected.extend_from_slice(b"\r\n--Boundary-test--\r\n");

        assert_eq!(body.bytes(), expected.as_slice());
        assert_eq!(
            body.content_type(),
            "multipart/form-data; boundary=Boundary-test"
        );
    }

    #[test]
    fn random_boundaries_differ() {
        let a = random_boundary();
        let b = random_boundary();
        assert!(a.starts_with("Boundary-"));
        assert_eq!(a.len(), "Boundary-".len() + 32);
        assert_ne!(a, b);
    }

    #[test]
    fn decodes_base64_mask_fixture() {
        let encoded = STANDARD.encode(png_fixture(40, 60));
        let body = serde_json::to_vec(&json!({ "image_data": encoded })).unwrap();
        let mask = decode_mask_response(&body).unwrap();
        assert_eq!(mask.dimensions(), (40, 60));
    }

    #[test]
    fn malformed_responses_are_classified() {
        let missing = decode_mask_response(br#"{"other": 1}"#).unwrap_err();
        assert!(matches!(missing, MaskFetchError::MalformedResponse(_)));

        let bad_b64 = decode_mask_response(br#"{"image_data": "@@not base64@@"}"#).unwrap_err();
        assert!(matches!(bad_b64, MaskFetchError::MalformedResponse(_)));

        let not_image = serde_json::to_vec(&json!({ "image_data": STANDARD.encode(b"hello") })).unwrap();
        let err = decode_mask_response(&not_image).unwrap_err();
        assert!(matches!(err, MaskFetchError::MalformedResponse(_)));
        assert!(!err.is_transport());

        let not_json = decode_mask_response(b"<html>").unwrap_err();
        assert!(matches!(not_json, MaskFetchError::MalformedResponse(_)));
    }
}
