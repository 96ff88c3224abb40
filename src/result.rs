use std::collections::BTreeSet;

use geo::{Area, Coord, IsConvex, LineString, Polygon};
use image::{DynamicImage, GrayImage};
use serde::Serialize;

/// EXIF orientation tag (0x0112) values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Normal,
    MirrorHorizontal,
    Rotate180,
    MirrorVertical,
    MirrorHorizontalRotate270,
    Rotate90,
    MirrorHorizontalRotate90,
    Rotate270,
}

impl Orientation {
    pub fn from_exif(value: u32) -> Option<Self> {
        Some(match value {
            1 => Self::Normal,
            2 => Self::MirrorHorizontal,
            3 => Self::Rotate180,
            4 => Self::MirrorVertical,
            5 => Self::MirrorHorizontalRotate270,
            6 => Self::Rotate90,
            7 => Self::MirrorHorizontalRotate90,
            8 => Self::Rotate270,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RawImage {
    pub image: DynamicImage,
    pub orientation: Option<Orientation>,
}

impl RawImage {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            orientation: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Outline of the ticket, corners ordered top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryQuad {
    points: [Coord<f32>; 4],
}

impl BoundaryQuad {
    /// Orders four corners by coordinate sums and differences. Returns `None` if
    /// two roles land on the same corner or the ordered outline is not convex.
    pub fn from_corners(corners: [Coord<f32>; 4]) -> Option<Self> {
        let by = |key: fn(&Coord<f32>) -> f32, max: bool| {
            let mut best = 0;
            for (i, point) in corners.iter().enumerate() {
                let better = if max {
                    key(point) > key(&corners[best])
                } else {
                    key(point) < key(&corners[best])
                };
                if better {
                    best = i;
                }
            }
            best
        };
        let top_left = by(|p| p.x + p.y, false);
        let bottom_right = by(|p| p.x + p.y, true);
        let top_right = by(|p| p.y - p.x, false);
        let bottom_left = by(|p| p.y - p.x, true);

        let mut order = [top_left, top_right, bottom_right, bottom_left];
        let indices = order;
        order.sort_unstable();
        if order.windows(2).any(|pair| pair[0] == pair[1]) {
            return None;
        }

        let quad = Self {
            points: indices.map(|i| corners[i]),
        };
        if quad.to_polygon().exterior().is_convex() && quad.area() > 0.0 {
            Some(quad)
        } else {
            None
        }
    }

    pub fn points(&self) -> [Coord<f32>; 4] {
        self.points
    }

    pub fn top_left(&self) -> Coord<f32> {
        self.points[0]
    }

    pub fn top_right(&self) -> Coord<f32> {
        self.points[1]
    }

    pub fn bottom_right(&self) -> Coord<f32> {
        self.points[2]
    }

    pub fn bottom_left(&self) -> Coord<f32> {
        self.points[3]
    }

    pub fn area(&self) -> f32 {
        self.to_polygon().unsigned_area()
    }

    pub fn scale(&self, factor_x: f32, factor_y: f32) -> Self {
        Self {
            points: self.points.map(|p| Coord {
                x: p.x * factor_x,
                y: p.y * factor_y,
            }),
        }
    }

    pub(crate) fn to_polygon(&self) -> Polygon<f32> {
        Polygon::new(LineString::from(self.points.to_vec()), vec![])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Detection<T> {
    Found(T),
    NotFound(MissReason),
}

impl<T> Detection<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Detection::Found(value) => Some(value),
            Detection::NotFound(_) => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Detection::Found(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    NoContours,
    NoQuadrilateral,
    Degenerate,
}

#[derive(Debug, Clone)]
pub struct RectifiedImage {
    pub image: DynamicImage,
    pub rectified: bool,
}

impl RectifiedImage {
    pub fn identity(image: DynamicImage) -> Self {
        Self {
            image,
            rectified: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnhancedImage {
    pub image: GrayImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }

    pub fn is_finite(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|it| it.is_finite())
            && self.width >= 0.0
            && self.height >= 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextToken {
    pub text: String,
    pub bounds: BoundingBox,
    pub confidence: f32,
}

impl TextToken {
    pub fn new(text: impl Into<String>, bounds: BoundingBox, confidence: f32) -> Self {
        Self {
            text: text.into(),
            bounds,
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedTicket {
    pub front_numbers: BTreeSet<u8>,
    pub back_numbers: BTreeSet<u8>,
    pub period_number: Option<String>,
    pub period_count: u8,
    pub warnings: Vec<String>,
}

impl Default for ParsedTicket {
    fn default() -> Self {
        Self {
            front_numbers: BTreeSet::new(),
            back_numbers: BTreeSet::new(),
            period_number: None,
            period_count: 1,
            warnings: Vec::new(),
        }
    }
}

impl ParsedTicket {
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn front_display(&self) -> String {
        join_padded(&self.front_numbers)
    }

    pub fn back_display(&self) -> String {
        join_padded(&self.back_numbers)
    }

    pub fn period_range(&self) -> Option<(u32, u32)> {
        let start = self.period_number.as_deref()?.parse::<u32>().ok()?;
        Some((start, start + u32::from(self.period_count.max(1)) - 1))
    }
}

fn join_padded(numbers: &BTreeSet<u8>) -> String {
    numbers
        .iter()
        .map(|n| format!("{n:02}"))
        .collect::<Vec<_>>()
        .join(",")
}
