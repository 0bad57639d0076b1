//! Preview rendering: annotations and the current mask drawn over the working image.

use crate::annotations::PointSet;
use crate::crop::{resize_mask, MaskImage};
use crate::error::CropError;
use crate::geometry::{BoundingBox, ImageDims, Point};
use image::{DynamicImage, Rgba, RgbaImage};

const POSITIVE_COLOR: Rgba<u8> = Rgba([52, 199, 89, 230]);
const NEGATIVE_COLOR: Rgba<u8> = Rgba([255, 59, 48, 230]);
const BOX_COLOR: Rgba<u8> = Rgba([10, 132, 255, 255]);
const MASK_TINT: [u8; 3] = [10, 132, 255];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    /// Opacity of the mask tint where the mask is fully white.
    pub mask_opacity: f64,
    /// Marker radius in pixels; `None` scales with the image.
    pub point_radius: Option<f64>,
    pub box_thickness: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            mask_opacity: 0.5,
            point_radius: None,
            box_thickness: 3,
        }
    }
}

pub fn render_overlay(
    working: &DynamicImage,
    points: &PointSet,
    bbox: Option<BoundingBox>,
    mask: Option<&MaskImage>,
    style: &OverlayStyle,
) -> Result<RgbaImage, CropError> {
    let mut out = working.to_rgba8();
    let (w, h) = out.dimensions();
    if w == 0 || h == 0 {
        return Ok(out);
    }

    if let Some(mask) = mask {
        let coverage = resize_mask(mask, ImageDims::new(w, h))?;
        let opacity = style.mask_opacity.clamp(0.0, 1.0);
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            let a = opacity * f64::from(coverage.get_pixel(x, y)[0]) / 255.0;
            if a <= 0.0 {
                continue;
            }
            let tint = Rgba([MASK_TINT[0], MASK_TINT[1], MASK_TINT[2], (a * 255.0).round() as u8]);
            *pixel = blend_pixel(*pixel, tint);
        }
    }

    if let Some(bbox) = bbox {
        draw_box_outline(&mut out, bbox, BOX_COLOR, style.box_thickness);
    }

    let radius = style
        .point_radius
        .unwrap_or_else(|| (f64::from(w.min(h)) / 60.0).max(3.0));
    for p in &points.positive {
        draw_marker(&mut out, *p, radius, POSITIVE_COLOR);
    }
    for p in &points.negative {
        draw_marker(&mut out, *p, radius, NEGATIVE_COLOR);
    }
    Ok(out)
}

fn draw_marker(img: &mut RgbaImage, p: Point, radius: f64, color: Rgba<u8>) {
    draw_disc(img, f64::from(p.x), f64::from(p.y), radius + 1.5, Rgba([255, 255, 255, 220]));
    draw_disc(img, f64::from(p.x), f64::from(p.y), radius, color);
}

fn clamp_i32(value: i32, min_value: i32, max_value: i32) -> i32 {
    value.max(min_value).min(max_value)
}

fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    if a <= 0.0 {
        return dst;
    }
    let inv = 1.0 - a;
    let mix = |d: u8, s: u8| (f64::from(d) * inv + f64::from(s) * a).round().clamp(0.0, 255.0) as u8;
    let out_a = (f64::from(dst[3]) + f64::from(src[3]) * inv)
        .round()
        .clamp(0.0, 255.0) as u8;
    Rgba([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2]), out_a])
}

fn draw_disc(img: &mut RgbaImage, cx: f64, cy: f64, radius: f64, color: Rgba<u8>) {
    let min_x = clamp_i32((cx - radius).floor() as i32, 0, img.width() as i32 - 1);
    let max_x = clamp_i32((cx + radius).ceil() as i32, 0, img.width() as i32 - 1);
    let min_y = clamp_i32((cy - radius).floor() as i32, 0, img.height() as i32 - 1);
    let max_y = clamp_i32((cy + radius).ceil() as i32, 0, img.height() as i32 - 1);
    let r2 = radius * radius;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dx = f64::from(x) - cx;
            let dy = f64::from(y) - cy;
            if dx * dx + dy * dy <= r2 {
                let dst = *img.get_pixel(x as u32, y as u32);
                img.put_pixel(x as u32, y as u32, blend_pixel(dst, color));
            }
        }
    }
}

fn draw_box_outline(img: &mut RgbaImage, bbox: BoundingBox, color: Rgba<u8>, thickness: u32) {
    let max_x = img.width() as i32 - 1;
    let max_y = img.height() as i32 - 1;
    let x0 = clamp_i32(bbox.point1.x, 0, max_x) as u32;
    let y0 = clamp_i32(bbox.point1.y, 0, max_y) as u32;
    let x1 = clamp_i32(bbox.point2.x, 0, max_x) as u32;
    let y1 = clamp_i32(bbox.point2.y, 0, max_y) as u32;

    for t in 0..thickness.max(1) {
        let tx0 = x0.saturating_sub(t);
        let ty0 = y0.saturating_sub(t);
        let tx1 = (x1 + t).min(max_x as u32);
        let ty1 = (y1 + t).min(max_y as u32);

        for xx in tx0..=tx1 {
            img.put_pixel(xx, ty0, color);
            img.put_pixel(xx, ty1, color);
        }
        for yy in ty0..=ty1 {
            img.put_pixel(tx0, yy, color);
            img.put_pixel(tx1, yy, color);
        }
    }
}
