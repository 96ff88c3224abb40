use std::sync::Arc;

mod boundary;
pub mod config;
mod enhance;
pub mod error;
mod extract;
mod orientation;
pub mod parser;
mod pool;
mod rectify;
mod result;
pub mod util;

use imageproc::geometric_transformations::Interpolation;
use tracing::instrument;

pub use boundary::detect_boundary;
pub use config::ScanConfig;
pub use enhance::{enhance, stretch_contrast, unsharp_mask};
pub use error::{BuildError, CapabilityError, ConfigError, EngineError, ParseError, ScanError};
pub use extract::{parse_engine_output, CommandEngine, OcrEngine, RawBounds, RawRecognition, TextExtractor};
pub use orientation::{normalize_orientation, read_exif_orientation};
pub use parser::TicketParser;
pub use pool::ScanPool;
pub use rectify::{rectify, solve_homography, target_size};
pub use result::*;

pub struct TicketScannerBuilder {
    config: ScanConfig,
    engine: Option<Arc<dyn OcrEngine>>,
}

impl TicketScannerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn low_power(mut self, low_power: bool) -> Self {
        self.config.performance.low_power = low_power;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.performance.workers = workers;
        self
    }

    #[instrument(level = "debug", skip(self))]
    pub fn build(self) -> Result<TicketScanner, BuildError> {
        let engine = self.engine.ok_or(BuildError::MissingEngine)?;
        Ok(TicketScanner {
            extractor: TextExtractor::new(engine, self.config.ocr.timeout()),
            parser: TicketParser::new(self.config.parser.clone()),
            config: self.config,
        })
    }
}

impl Default for TicketScannerBuilder {
    fn default() -> Self {
        Self {
            config: ScanConfig::default(),
            engine: None,
        }
    }
}

pub struct TicketScanner {
    config: ScanConfig,
    extractor: TextExtractor,
    parser: TicketParser,
}

impl TicketScanner {
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Decodes and scans an encoded photo. An explicit `orientation` wins over
    /// the EXIF tag embedded in `bytes`.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub fn scan(&self, bytes: &[u8], orientation: Option<Orientation>) -> Result<ParsedTicket, ScanError> {
        let image = image::load_from_memory(bytes)?;
        let mut raw = RawImage::new(image);
        raw.orientation = orientation.or_else(|| read_exif_orientation(bytes));
        self.scan_image(raw)
    }

    #[instrument(skip(self, raw), fields(width = raw.width(), height = raw.height()))]
    pub fn scan_image(&self, raw: RawImage) -> Result<ParsedTicket, ScanError> {
        let low_power = self.config.performance.low_power;
        let raw = normalize_orientation(raw);

        let quad = detect_boundary(&raw.image, &self.config.detection);
        if let Detection::NotFound(reason) = &quad {
            log::debug!("No ticket boundary ({reason:?}), using the whole photo");
        }
        let interpolation = if low_power {
            Interpolation::Nearest
        } else {
            Interpolation::Bilinear
        };
        let rectified = rectify(raw, quad, &self.config.rectify, interpolation);
        let enhanced = enhance(&rectified, &self.config.enhance, low_power);

        let tokens = self.extractor.extract(&enhanced)?;
        let ticket = self.parser.parse(&tokens)?;
        if !ticket.warnings.is_empty() {
            log::info!("Ticket needs review: {:?}", ticket.warnings);
        }
        Ok(ticket)
    }

    pub fn shutdown(&self) {
        self.extractor.engine().shutdown();
    }
}
