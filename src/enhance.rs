use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;
use tracing::instrument;

use crate::{config::EnhanceConfig, EnhancedImage, RectifiedImage};

#[instrument(level = "debug", skip(rectified, config), fields(width = rectified.image.width(), height = rectified.image.height()))]
pub fn enhance(rectified: &RectifiedImage, config: &EnhanceConfig, skip_sharpen: bool) -> EnhancedImage {
    let mut image = rectified.image.to_luma8();
    stretch_contrast(&mut image, config.clip_percent);
    if !skip_sharpen && config.sharpen_amount > 0.0 && config.sharpen_sigma > 0.0 {
        image = unsharp_mask(&image, config.sharpen_sigma, config.sharpen_amount);
    }
    EnhancedImage { image }
}

pub fn stretch_contrast(image: &mut GrayImage, clip_percent: f32) {
    let total = image.len() as u64;
    if total == 0 {
        return;
    }
    let mut histogram = [0u64; 256];
    for pixel in image.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }

    let clip = (total as f64 * f64::from(clip_percent.clamp(0.0, 49.0)) / 100.0) as u64;
    let low = percentile_index(histogram.iter(), clip);
    let high = 255 - percentile_index(histogram.iter().rev(), clip);
    if high <= low {
        log::debug!("Flat histogram ({low}..{high}), skipping contrast stretch");
        return;
    }

    let span = (high - low) as f32;
    let lut: Vec<u8> = (0..=255u16)
        .map(|v| {
            let scaled = (f32::from(v) - low as f32) * 255.0 / span;
            scaled.round().clamp(0.0, 255.0) as u8
        })
        .collect();
    for pixel in image.pixels_mut() {
        pixel.0[0] = lut[pixel.0[0] as usize];
    }
}

fn percentile_index<'a>(buckets: impl Iterator<Item = &'a u64>, clip: u64) -> usize {
    let mut seen = 0;
    for (i, count) in buckets.enumerate() {
        seen += count;
        if seen > clip {
            return i;
        }
    }
    255
}

pub fn unsharp_mask(image: &GrayImage, sigma: f32, amount: f32) -> GrayImage {
    let blurred = gaussian_blur_f32(image, sigma);
    let mut output = image.clone();
    for (out, (orig, blur)) in output
        .pixels_mut()
        .zip(image.pixels().zip(blurred.pixels()))
    {
        let orig = f32::from(orig.0[0]);
        let detail = orig - f32::from(blur.0[0]);
        out.0[0] = (orig + amount * detail).round().clamp(0.0, 255.0) as u8;
    }
    output
}
