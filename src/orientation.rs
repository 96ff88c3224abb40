use std::io::Cursor;

use image::DynamicImage;
use tracing::instrument;

use crate::{Orientation, RawImage};

pub fn read_exif_orientation(bytes: &[u8]) -> Option<Orientation> {
    let mut cursor = Cursor::new(bytes);
    let reader = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let value = reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))?;
    let orientation = Orientation::from_exif(value);
    if orientation.is_none() {
        log::debug!("Ignoring out of range EXIF orientation {value}");
    }
    orientation
}

#[instrument(level = "debug", skip(raw), fields(orientation = ?raw.orientation))]
pub fn normalize_orientation(raw: RawImage) -> RawImage {
    let Some(orientation) = raw.orientation else {
        return raw;
    };
    RawImage {
        image: apply_orientation(raw.image, orientation),
        orientation: None,
    }
}

pub(crate) fn apply_orientation(image: DynamicImage, orientation: Orientation) -> DynamicImage {
    match orientation {
        Orientation::Normal => image,
        Orientation::MirrorHorizontal => image.fliph(),
        Orientation::Rotate180 => image.rotate180(),
        Orientation::MirrorVertical => image.flipv(),
        Orientation::MirrorHorizontalRotate270 => image.rotate90().fliph(),
        Orientation::Rotate90 => image.rotate90(),
        Orientation::MirrorHorizontalRotate90 => image.rotate270().fliph(),
        Orientation::Rotate270 => image.rotate270(),
    }
}
