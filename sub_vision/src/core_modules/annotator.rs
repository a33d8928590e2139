// THEORY:
// The annotator is the only stage that draws. It marks confirmed detections on
// the upright RGB frame that is later published for operators:
//
// - `Rotation` style (elongated objects): a dot at the center plus a line from
//   the center half-way along the long axis, so the heading is readable.
// - `Radius` style (round objects): a circle whose radius is the mean of the
//   half-width and half-height.
//
// Both styles add a "Confidence: x" caption when a font was loaded. Without a
// font, shapes are still drawn and the caption is skipped.
//
// It also renders a class's label grid as a grayscale mask for the optional
// threshold-mask sink.

use crate::core_modules::classifier::Label;
use crate::core_modules::grid_manager::{Cell, LabelGrid};
use crate::core_modules::smart_blob::ShapeAnalysis;
use crate::error::{Result, VisionError};
use ab_glyph::{FontVec, PxScale};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_circle_mut, draw_line_segment_mut, draw_text_mut,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

const CAPTION_SCALE: f32 = 24.0;
const CAPTION_OFFSET: i32 = 5;
const CENTER_DOT_RADIUS: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationStyle {
    #[default]
    Rotation,
    Radius,
}

/// Draws detections onto frames.
#[derive(Default)]
pub struct Annotator {
    font: Option<FontVec>,
}

impl std::fmt::Debug for Annotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("has_font", &self.font.is_some())
            .finish()
    }
}

impl Annotator {
    /// An annotator that only draws shapes.
    pub fn without_font() -> Self {
        Self { font: None }
    }

    /// Loads the caption font from `path`, if one is configured.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::without_font());
        };
        let bytes = std::fs::read(path)?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| VisionError::Config(format!("font {}: {e}", path.display())))?;
        info!(path = %path.display(), "Loaded annotation font");
        Ok(Self { font: Some(font) })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Marks one detection on `image`. Coordinates are upright-frame pixels.
    pub fn annotate(
        &self,
        image: &mut RgbImage,
        style: AnnotationStyle,
        color: [u8; 3],
        shape: &ShapeAnalysis,
        confidence: f64,
    ) {
        let color = Rgb(color);
        let (cx, cy) = (shape.center_x, shape.center_y);
        let center = (cx.round() as i32, cy.round() as i32);

        match style {
            AnnotationStyle::Rotation => {
                let reach = shape.height / 2.0;
                let tip = (
                    (cx + reach * shape.rotation.cos()) as f32,
                    (cy + reach * shape.rotation.sin()) as f32,
                );
                draw_filled_circle_mut(image, center, CENTER_DOT_RADIUS, color);
                draw_line_segment_mut(image, (cx as f32, cy as f32), tip, color);
            }
            AnnotationStyle::Radius => {
                let radius = ((shape.width + shape.height) / 4.0) as i32;
                // two rings for a thicker outline
                draw_hollow_circle_mut(image, center, radius, color);
                draw_hollow_circle_mut(image, center, radius + 1, color);
            }
        }

        if let Some(font) = &self.font {
            draw_text_mut(
                image,
                Rgb([255, 255, 255]),
                center.0 + CAPTION_OFFSET,
                center.1 + CAPTION_OFFSET,
                PxScale::from(CAPTION_SCALE),
                font,
                &format!("Confidence: {confidence:.2}"),
            );
        }
    }
}

/// Gray level a class id is rendered with in threshold masks.
pub fn mask_level(class_id: u8) -> u8 {
    (class_id as u32 * 10 + 200).min(u8::MAX as u32) as u8
}

/// Renders `grid` as a grayscale image: labeled samples light up by class,
/// everything else stays black.
pub fn render_threshold_mask(grid: &LabelGrid) -> GrayImage {
    let mut mask = GrayImage::new(grid.width(), grid.height());
    for (x, y, pixel) in mask.enumerate_pixels_mut() {
        if let Cell::Sampled(Label::Object(id)) = grid.get(x, y) {
            *pixel = Luma([mask_level(id)]);
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(rotation: f64) -> ShapeAnalysis {
        ShapeAnalysis {
            center_x: 20.0,
            center_y: 20.0,
            width: 8.0,
            height: 20.0,
            rotation,
            point_count: 10,
        }
    }

    #[test]
    fn rotation_style_draws_along_long_axis() {
        let mut image = RgbImage::new(40, 40);
        Annotator::without_font().annotate(
            &mut image,
            AnnotationStyle::Rotation,
            [255, 0, 0],
            &shape(0.0),
            0.9,
        );
        assert_eq!(image.get_pixel(20, 20), &Rgb([255, 0, 0]));
        // the line reaches half the height to the right
        assert_eq!(image.get_pixel(29, 20), &Rgb([255, 0, 0]));
        assert_eq!(image.get_pixel(20, 29), &Rgb([0, 0, 0]));
    }

    #[test]
    fn radius_style_draws_a_ring() {
        let mut image = RgbImage::new(40, 40);
        Annotator::without_font().annotate(
            &mut image,
            AnnotationStyle::Radius,
            [0, 255, 0],
            &shape(0.0),
            0.9,
        );
        // (8 + 20) / 4 = 7
        assert_eq!(image.get_pixel(27, 20), &Rgb([0, 255, 0]));
        assert_eq!(image.get_pixel(20, 20), &Rgb([0, 0, 0]));
    }

    #[test]
    fn missing_font_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Annotator::load(Some(&dir.path().join("none.ttf"))).is_err());

        let junk = dir.path().join("junk.ttf");
        std::fs::write(&junk, b"not a font").unwrap();
        assert!(matches!(
            Annotator::load(Some(&junk)),
            Err(VisionError::Config(_))
        ));
        assert!(!Annotator::load(None).unwrap().has_font());
    }

    #[test]
    fn mask_encodes_class_ids() {
        let mut grid = LabelGrid::new(4, 4);
        grid.set(0, 0, Cell::Sampled(Label::Object(3)));
        grid.set(1, 0, Cell::Sampled(Label::Nothing));
        grid.set(2, 0, Cell::Claimed);
        let mask = render_threshold_mask(&grid);
        assert_eq!(mask.get_pixel(0, 0), &Luma([230]));
        assert_eq!(mask.get_pixel(1, 0), &Luma([0]));
        assert_eq!(mask.get_pixel(2, 0), &Luma([0]));
        assert_eq!(mask_level(9), 255);
    }
}
