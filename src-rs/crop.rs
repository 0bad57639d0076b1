//! Applies a server mask to the full-resolution photo to cut out the garment.

use crate::capture::CapturedImage;
use crate::error::{CaptureError, CropError};
use crate::geometry::ImageDims;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgba, RgbaImage};
use std::io::Cursor;

/// Decoded mask returned by the inference server. White/opaque marks the garment.
#[derive(Debug, Clone)]
pub struct MaskImage {
    image: DynamicImage,
}

impl MaskImage {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    /// Per-pixel coverage in 0..=255: luminance scaled by the mask's own alpha.
    pub fn coverage(&self) -> GrayImage {
        let la = self.image.to_luma_alpha8();
        GrayImage::from_fn(la.width(), la.height(), |x, y| {
            let p = la.get_pixel(x, y);
            Luma([((u16::from(p[0]) * u16::from(p[1]) + 127) / 255) as u8])
        })
    }
}

/// The cut-out garment, straight (non-premultiplied) RGBA, orientation up.
#[derive(Debug, Clone, PartialEq)]
pub struct CroppedGarment {
    pub image: RgbaImage,
}

impl CroppedGarment {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn to_png(&self) -> Result<Vec<u8>, CropError> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(self.image.clone())
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| CropError::Composite(format!("failed to encode PNG: {e}")))?;
        Ok(out.into_inner())
    }
}

/// Resizes mask coverage to exactly `target`, scaling width and height independently.
pub fn resize_mask(mask: &MaskImage, target: ImageDims) -> Result<GrayImage, CropError> {
    if target.is_empty() {
        return Err(CropError::Resize(format!(
            "degenerate target size {}x{}",
            target.width, target.height
        )));
    }
    let (w, h) = mask.dimensions();
    if w == 0 || h == 0 {
        return Err(CropError::Resize(format!("degenerate mask size {w}x{h}")));
    }
    let coverage = DynamicImage::ImageLuma8(mask.coverage());
    if (w, h) == (target.width, target.height) {
        return Ok(coverage.to_luma8());
    }
    Ok(coverage
        .resize_exact(target.width, target.height, FilterType::Lanczos3)
        .to_luma8())
}

/// Keeps source pixels where the mask is white, transparent where it is black.
pub fn composite(image: &DynamicImage, mask: &GrayImage) -> Result<RgbaImage, CropError> {
    let source = image.to_rgba8();
    if source.dimensions() != mask.dimensions() {
        let (sw, sh) = source.dimensions();
        let (mw, mh) = mask.dimensions();
        return Err(CropError::Composite(format!(
            "mask is {mw}x{mh} but image is {sw}x{sh}"
        )));
    }

    let mut out = RgbaImage::new(source.width(), source.height());
    for (x, y, pixel) in source.enumerate_pixels() {
        let m = u16::from(mask.get_pixel(x, y)[0]);
        let alpha = ((u16::from(pixel[3]) * m + 127) / 255) as u8;
        if alpha > 0 {
            out.put_pixel(x, y, Rgba([pixel[0], pixel[1], pixel[2], alpha]));
        } else {
            out.put_pixel(x, y, Rgba([0, 0, 0, 0]));
        }
    }
    Ok(out)
}

/// Full crop pipeline: upright full image, mask resized to match, composite.
pub fn crop_garment(
    captured: &CapturedImage,
    mask: Option<&MaskImage>,
) -> Result<CroppedGarment, CropError> {
    let mask = mask.ok_or(CropError::NoMask)?;
    let upright = captured.normalized_full().map_err(|e| match e {
        CaptureError::Decode { reason, .. } => CropError::Decode(reason),
        other => CropError::Decode(other.to_string()),
    })?;
    apply_mask(&upright, mask)
}

/// Crop stage on an already-upright image.
pub fn apply_mask(upright: &DynamicImage, mask: &MaskImage) -> Result<CroppedGarment, CropError> {
    let target = ImageDims::new(upright.width(), upright.height());
    let resized = resize_mask(mask, target)?;
    let image = composite(upright, &resized)?;
    tracing::debug!(
        width = target.width,
        height = target.height,
        mask_width = mask.dimensions().0,
        mask_height = mask.dimensions().1,
        "cropped image to garment"
    );
    Ok(CroppedGarment { image })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Orientation;
    use image::{GrayAlphaImage, LumaA, Rgb, RgbImage};

    fn half_mask(w: u32, h: u32) -> MaskImage {
        MaskImage::new(DynamicImage::ImageLuma8(GrayImage::from_fn(w, h, |x, _| {
            if x < w / 2 {
                Luma([255])
            } else {
                Luma([0])
            }
        })))
    }

    fn png(img: DynamicImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn composite_keeps_white_and_clears_black() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 2, Rgb([200, 100, 50])));
        let mask = half_mask(4, 2).coverage();
        let out = composite(&image, &mask).unwrap();

        assert_eq!(*out.get_pixel(0, 0), Rgba([200, 100, 50, 255]));
        assert_eq!(*out.get_pixel(1, 1), Rgba([200, 100, 50, 255]));
        assert_eq!(*out.get_pixel(2, 0), Rgba([0, 0, 0, 0]));
        assert_eq!(*out.get_pixel(3, 1), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn gray_mask_values_become_partial_alpha() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([9, 9, 9])));
        let mask = GrayImage::from_pixel(1, 1, Luma([128]));
        let out = composite(&image, &mask).unwrap();
        assert_eq!(out.get_pixel(0, 0)[3], 128);
    }

    #[test]
    fn transparent_mask_pixels_count_as_background() {
        let mask = MaskImage::new(DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(
            2,
            2,
            LumaA([255, 0]),
        )));
        assert!(mask.coverage().pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn resize_matches_target_exactly() {
        let resized = resize_mask(&half_mask(10, 15), ImageDims::new(100, 150)).unwrap();
        assert_eq!(resized.dimensions(), (100, 150));
        assert!(resized.get_pixel(5, 70)[0] > 200);
        assert!(resized.get_pixel(95, 70)[0] < 50);
    }

    #[test]
    fn resize_rejects_degenerate_target() {
        let err = resize_mask(&half_mask(4, 4), ImageDims::new(0, 10)).unwrap_err();
        assert!(matches!(err, CropError::Resize(_)));
    }

    #[test]
    fn composite_rejects_size_mismatch() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(3, 3));
        let err = composite(&image, &GrayImage::new(2, 3)).unwrap_err();
        assert!(matches!(err, CropError::Composite(_)));
    }

    #[test]
    fn crop_without_mask_fails() {
        let bytes = png(DynamicImage::ImageRgb8(RgbImage::new(4, 4)));
        let captured = CapturedImage::from_encoded(bytes.clone(), bytes, Orientation::Up).unwrap();
        assert!(matches!(crop_garment(&captured, None), Err(CropError::NoMask)));
    }

    #[test]
    fn crop_uses_upright_full_resolution_image() {
        // Stored 40x20 landscape, displayed as 20x40 portrait.
        let full = png(DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 20, Rgb([1, 2, 3]))));
        let thumb = png(DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 4, Rgb([1, 2, 3]))));
        let captured = CapturedImage::from_encoded(full, thumb, Orientation::Right).unwrap();

        // Mask computed against the displayed thumbnail (4x8).
        let cropped = crop_garment(&captured, Some(&half_mask(4, 8))).unwrap();
        assert_eq!(cropped.dimensions(), (20, 40));
        assert_eq!(cropped.image.get_pixel(2, 20)[3], 255);
        assert_eq!(cropped.image.get_pixel(18, 20)[3], 0);

        let png_bytes = cropped.to_png().unwrap();
        let decoded = image::load_from_memory(&png_bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 40));
    }
}
