use float_ord::FloatOrd;
use geo::Coord;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::{
    contours::find_contours,
    distance_transform::Norm,
    edges::canny,
    geometry::{approximate_polygon_dp, arc_length},
    morphology::dilate_mut,
};
use tracing::instrument;

use crate::{
    config::DetectionConfig,
    util::{distance, resize_gray, scale_normalized, to_coords},
    BoundaryQuad, Detection, MissReason,
};

const FRAME_WIDTH: u32 = 8;

#[instrument(level = "debug", skip(image, config), fields(width = image.width(), height = image.height()))]
pub fn detect_boundary(image: &DynamicImage, config: &DetectionConfig) -> Detection<BoundaryQuad> {
    let gray = image.to_luma8();
    let scale = scale_normalized(gray.width(), gray.height(), config.max_side_len);
    let gray = resize_gray(&gray, scale);

    let detection = match find_quad(&gray, config, 0) {
        Detection::NotFound(reason) => {
            log::debug!("No boundary in plain pass ({reason:?}), retrying with a frame");
            find_quad(&add_frame(&gray), config, FRAME_WIDTH)
        }
        found => found,
    };

    match detection {
        Detection::Found(quad) => {
            log::debug!("Boundary found: {:?}", quad.points());
            Detection::Found(quad.scale(scale.factor_x, scale.factor_y))
        }
        miss => miss,
    }
}

#[instrument(level = "trace", skip(gray, config))]
fn find_quad(gray: &GrayImage, config: &DetectionConfig, offset: u32) -> Detection<BoundaryQuad> {
    let width = (gray.width() - 2 * offset) as f32;
    let height = (gray.height() - 2 * offset) as f32;
    let min_area = width * height * config.area_fraction;

    let mut edges = canny(gray, config.canny_low, config.canny_high);
    // Close single-pixel gaps so outlines trace as one contour.
    dilate_mut(&mut edges, Norm::LInf, 1);

    let contours = find_contours::<i32>(&edges);
    if contours.is_empty() {
        return Detection::NotFound(MissReason::NoContours);
    }
    log::trace!("{} contours in edge map", contours.len());

    let shift = offset as f32;
    contours
        .iter()
        .filter(|it| it.points.len() > 3)
        .filter_map(|contour| {
            let length = arc_length(&contour.points, true);
            // No closed curve of this length can enclose `min_area`.
            if length * length / (4.0 * std::f64::consts::PI) < min_area as f64 {
                return None;
            }
            let epsilon = (config.approx_epsilon * length).max(1.0);
            let approx = approximate_polygon_dp(&contour.points, epsilon, true);
            let polygon = drop_collinear(to_coords(&approx), epsilon as f32);
            if polygon.len() != 4 {
                return None;
            }
            let polygon = snap_corners(&polygon, &to_coords(&contour.points), 2.0 * epsilon as f32);
            let corners: [Coord<f32>; 4] = polygon
                .into_iter()
                .map(|p| Coord {
                    x: (p.x - shift).clamp(0.0, width),
                    y: (p.y - shift).clamp(0.0, height),
                })
                .collect::<Vec<_>>()
                .try_into()
                .ok()?;
            BoundaryQuad::from_corners(corners)
        })
        .filter(|quad| quad.area() >= min_area)
        .max_by_key(|quad| FloatOrd(quad.area()))
        .map_or(
            Detection::NotFound(MissReason::NoQuadrilateral),
            Detection::Found,
        )
}

fn drop_collinear(mut points: Vec<Coord<f32>>, epsilon: f32) -> Vec<Coord<f32>> {
    points.dedup();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    loop {
        let n = points.len();
        if n <= 3 {
            return points;
        }
        let flattest = (0..n)
            .map(|i| {
                let prev = points[(i + n - 1) % n];
                let next = points[(i + 1) % n];
                (i, point_line_distance(points[i], prev, next))
            })
            .min_by_key(|(_, d)| FloatOrd(*d));
        match flattest {
            Some((i, d)) if d < epsilon => {
                points.remove(i);
            }
            _ => return points,
        }
    }
}

/// Polygon approximation cuts corners by up to `epsilon`. Moves each corner to
/// the contour point within `radius` that lies farthest out from the centre.
fn snap_corners(corners: &[Coord<f32>], contour: &[Coord<f32>], radius: f32) -> Vec<Coord<f32>> {
    let n = corners.len() as f32;
    let center = Coord {
        x: corners.iter().map(|p| p.x).sum::<f32>() / n,
        y: corners.iter().map(|p| p.y).sum::<f32>() / n,
    };
    corners
        .iter()
        .map(|&corner| {
            let (dx, dy) = (corner.x - center.x, corner.y - center.y);
            contour
                .iter()
                .copied()
                .filter(|p| distance(*p, corner) <= radius)
                .max_by_key(|p| FloatOrd((p.x - center.x) * dx + (p.y - center.y) * dy))
                .unwrap_or(corner)
        })
        .collect()
}

fn point_line_distance(p: Coord<f32>, a: Coord<f32>, b: Coord<f32>) -> f32 {
    let length = distance(a, b);
    if length == 0.0 {
        return distance(p, a);
    }
    ((b.x - a.x) * (a.y - p.y) - (a.x - p.x) * (b.y - a.y)).abs() / length
}

fn add_frame(gray: &GrayImage) -> GrayImage {
    let mut framed = GrayImage::from_pixel(
        gray.width() + 2 * FRAME_WIDTH,
        gray.height() + 2 * FRAME_WIDTH,
        Luma([0]),
    );
    image::imageops::replace(&mut framed, gray, FRAME_WIDTH as i64, FRAME_WIDTH as i64);
    framed
}
