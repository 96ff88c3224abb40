use geo::Coord;
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::{SMatrix, SVector};
use tracing::instrument;

use crate::{
    config::RectifyConfig, util::distance, BoundaryQuad, Detection, MissReason, RawImage,
    RectifiedImage,
};

#[instrument(level = "debug", skip_all)]
pub fn rectify(
    raw: RawImage,
    quad: Detection<BoundaryQuad>,
    config: &RectifyConfig,
    interpolation: Interpolation,
) -> RectifiedImage {
    let Detection::Found(quad) = quad else {
        return RectifiedImage::identity(raw.image);
    };
    match warp_quad(&raw.image, &quad, config, interpolation) {
        Detection::Found(image) => RectifiedImage {
            image,
            rectified: true,
        },
        Detection::NotFound(reason) => {
            log::debug!("Rectification fell back to identity: {reason:?}");
            RectifiedImage::identity(raw.image)
        }
    }
}

pub fn target_size(quad: &BoundaryQuad, config: &RectifyConfig) -> Option<(u32, u32)> {
    let width = distance(quad.top_left(), quad.top_right())
        .max(distance(quad.bottom_left(), quad.bottom_right()));
    let height = distance(quad.top_left(), quad.bottom_left())
        .max(distance(quad.top_right(), quad.bottom_right()));
    if !(width.is_finite() && height.is_finite())
        || width < config.min_side as f32
        || height < config.min_side as f32
    {
        return None;
    }
    let cap = config.max_output_side.max(config.min_side) as f32;
    let ratio = (cap / width.max(height)).min(1.0);
    Some((
        (width * ratio).round().max(1.0) as u32,
        (height * ratio).round().max(1.0) as u32,
    ))
}

fn warp_quad(
    image: &DynamicImage,
    quad: &BoundaryQuad,
    config: &RectifyConfig,
    interpolation: Interpolation,
) -> Detection<DynamicImage> {
    let Some((width, height)) = target_size(quad, config) else {
        return Detection::NotFound(MissReason::Degenerate);
    };
    let (w, h) = (width as f32, height as f32);
    let target = [
        Coord { x: 0.0, y: 0.0 },
        Coord { x: w, y: 0.0 },
        Coord { x: w, y: h },
        Coord { x: 0.0, y: h },
    ];
    let Some(projection) = solve_homography(&quad.points(), &target).and_then(Projection::from_matrix)
    else {
        return Detection::NotFound(MissReason::Degenerate);
    };

    let source = image.to_rgba8();
    let mut output = RgbaImage::new(width, height);
    warp_into(
        &source,
        &projection,
        interpolation,
        Rgba([255, 255, 255, 255]),
        &mut output,
    );
    log::debug!(
        "Rectified {}x{} photo to {width}x{height}",
        image.width(),
        image.height()
    );
    Detection::Found(DynamicImage::ImageRgba8(output))
}

/// Solves the 3x3 projective transform (row-major, `h33 = 1`) that maps each
/// `from` point onto the matching `to` point.
pub fn solve_homography(from: &[Coord<f32>; 4], to: &[Coord<f32>; 4]) -> Option<[f32; 9]> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (i, (src, dst)) in from.iter().zip(to).enumerate() {
        let (x, y) = (src.x as f64, src.y as f64);
        let (u, v) = (dst.x as f64, dst.y as f64);
        let r = 2 * i;
        a.row_mut(r)
            .copy_from_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y]);
        a.row_mut(r + 1)
            .copy_from_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y]);
        b[r] = u;
        b[r + 1] = v;
    }
    let h = a.lu().solve(&b)?;
    if h.iter().any(|it| !it.is_finite()) {
        return None;
    }
    Some([
        h[0] as f32,
        h[1] as f32,
        h[2] as f32,
        h[3] as f32,
        h[4] as f32,
        h[5] as f32,
        h[6] as f32,
        h[7] as f32,
        1.0,
    ])
}
