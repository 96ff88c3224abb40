use geo::{Coord, EuclideanLength, Line};
use image::{imageops::FilterType, GrayImage};
use imageproc::point::Point;

pub(crate) fn to_coords(points: &[Point<i32>]) -> Vec<Coord<f32>> {
    points
        .iter()
        .map(|point| Coord {
            x: point.x as f32,
            y: point.y as f32,
        })
        .collect()
}

pub(crate) fn distance(a: Coord<f32>, b: Coord<f32>) -> f32 {
    Line::new(a, b).euclidean_length()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub factor_x: f32,
    pub factor_y: f32,
    pub target_width: u32,
    pub target_height: u32,
}

impl Scale {
    pub fn is_identity(&self) -> bool {
        self.factor_x == 1.0 && self.factor_y == 1.0
    }
}

pub fn scale_normalized(width: u32, height: u32, target_size: u32) -> Scale {
    let longest = width.max(height);
    if longest <= target_size || target_size == 0 {
        return Scale {
            factor_x: 1.0,
            factor_y: 1.0,
            target_width: width,
            target_height: height,
        };
    }
    let ratio = target_size as f32 / longest as f32;
    let target_width = ((width as f32 * ratio).round() as u32).max(1);
    let target_height = ((height as f32 * ratio).round() as u32).max(1);
    let scale = Scale {
        factor_x: width as f32 / target_width as f32,
        factor_y: height as f32 / target_height as f32,
        target_width,
        target_height,
    };
    log::debug!(
        "Downscaling {width}x{height} to {target_width}x{target_height} for detection (factors {}, {})",
        scale.factor_x,
        scale.factor_y
    );
    scale
}

pub(crate) fn resize_gray(image: &GrayImage, scale: Scale) -> GrayImage {
    if scale.is_identity() {
        return image.clone();
    }
    image::imageops::resize(
        image,
        scale.target_width,
        scale.target_height,
        FilterType::Triangle,
    )
}
