// THEORY:
// A `Blob` is a connected cluster of same-label sample points found in a single
// frame. It is a transient container: once its shape has been summarized into a
// `ShapeAnalysis` it is dropped.
//
// The shape analyzer fits the minimum-area rotated rectangle around the blob's
// points (convex hull + rotating calipers) and reports it in one convention:
//
// - `height` is always the long side, `width <= height`.
// - `rotation` is the direction of the long axis in radians, folded into
//   [-pi/2, pi/2) since an axis has no head or tail. Image y points down.
//
// The raw fit measures `width` along a hull edge and `rotation` as that edge's
// direction. When the raw width is the longer side the dimensions are swapped
// and the rotation already points down the long axis; otherwise the rotation is
// turned back by a quarter turn onto the height side.

use imageproc::geometry::convex_hull;
use imageproc::point::Point as HullPoint;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

/// A sampled grid coordinate in upright-frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// Same-label sample points discovered in one frame, in discovery order.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub class_id: u8,
    pub points: Vec<Point>,
}

impl Blob {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Geometric model used to summarize a blob.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ShapeModel {
    #[default]
    Rectangle,
    Unknown(String),
}

impl From<String> for ShapeModel {
    fn from(id: String) -> Self {
        match id.as_str() {
            "rectangle" => ShapeModel::Rectangle,
            _ => ShapeModel::Unknown(id),
        }
    }
}

impl From<ShapeModel> for String {
    fn from(model: ShapeModel) -> Self {
        match model {
            ShapeModel::Rectangle => "rectangle".to_string(),
            ShapeModel::Unknown(id) => id,
        }
    }
}

/// Normalized summary of a blob's shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShapeAnalysis {
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
    /// Long-axis direction in radians, in [-pi/2, pi/2).
    pub rotation: f64,
    pub point_count: usize,
}

/// A raw rotated rectangle: `width` runs along `angle`, `height` across it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    pub center: (f64, f64),
    pub width: f64,
    pub height: f64,
    pub angle: f64,
}

/// Summarizes `blob` with `model`. Unknown models never reach here after config
/// validation, but yield `None` rather than a bogus shape.
pub fn analyze_blob(model: &ShapeModel, blob: &Blob) -> Option<ShapeAnalysis> {
    match model {
        ShapeModel::Rectangle => Some(normalize_rect(min_area_rect(&blob.points), blob.len())),
        ShapeModel::Unknown(_) => None,
    }
}

/// Applies the long-axis convention to a raw fit.
pub fn normalize_rect(rect: RotatedRect, point_count: usize) -> ShapeAnalysis {
    let (mut width, mut height, mut rotation) = (rect.width, rect.height, rect.angle);
    if height < width {
        std::mem::swap(&mut width, &mut height);
    } else {
        rotation -= FRAC_PI_2;
    }

    ShapeAnalysis {
        center_x: rect.center.0,
        center_y: rect.center.1,
        width,
        height,
        rotation: fold_axis_angle(rotation),
        point_count,
    }
}

/// Folds an axis direction into [-pi/2, pi/2).
pub fn fold_axis_angle(angle: f64) -> f64 {
    let folded = (angle + FRAC_PI_2).rem_euclid(PI) - FRAC_PI_2;
    // rem_euclid can round up to exactly PI for tiny negative inputs
    if folded >= FRAC_PI_2 { folded - PI } else { folded }
}

/// Minimum-area rectangle enclosing `points`.
///
/// Hull edges only propose orientations; extents are measured over every point
/// so the result always encloses the whole blob.
pub fn min_area_rect(points: &[Point]) -> RotatedRect {
    let input: Vec<HullPoint<i32>> = points
        .iter()
        .map(|p| HullPoint::new(p.x as i32, p.y as i32))
        .collect();
    let hull: Vec<HullPoint<i32>> = convex_hull(input.as_slice());
    let hull: Vec<(f64, f64)> = hull.iter().map(|p| (p.x as f64, p.y as f64)).collect();
    let all: Vec<(f64, f64)> = points.iter().map(|p| (p.x as f64, p.y as f64)).collect();

    let Some(&first) = all.first() else {
        return RotatedRect {
            center: (0.0, 0.0),
            width: 0.0,
            height: 0.0,
            angle: 0.0,
        };
    };

    let mut best: Option<(f64, RotatedRect)> = None;
    for (index, &start) in hull.iter().enumerate() {
        let end = hull[(index + 1) % hull.len()];
        let (dx, dy) = (end.0 - start.0, end.1 - start.1);
        let length = dx.hypot(dy);
        if length < 1e-9 {
            continue;
        }
        // unit vector along the edge and its normal
        let (ux, uy) = (dx / length, dy / length);
        let (nx, ny) = (-uy, ux);

        let (mut min_u, mut max_u, mut min_n, mut max_n) =
            (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
        for &(px, py) in &all {
            let along = px * ux + py * uy;
            let across = px * nx + py * ny;
            min_u = min_u.min(along);
            max_u = max_u.max(along);
            min_n = min_n.min(across);
            max_n = max_n.max(across);
        }

        let (width, height) = (max_u - min_u, max_n - min_n);
        let area = width * height;
        if best.as_ref().is_none_or(|(best_area, _)| area < *best_area - 1e-9) {
            let mid_u = (min_u + max_u) / 2.0;
            let mid_n = (min_n + max_n) / 2.0;
            best = Some((
                area,
                RotatedRect {
                    center: (mid_u * ux + mid_n * nx, mid_u * uy + mid_n * ny),
                    width,
                    height,
                    angle: uy.atan2(ux),
                },
            ));
        }
    }

    match best {
        Some((_, rect)) => rect,
        // every hull point coincides
        None => RotatedRect {
            center: first,
            width: 0.0,
            height: 0.0,
            angle: 0.0,
        },
    }
}
