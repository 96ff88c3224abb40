use std::{
    io::{Read, Write},
    path::PathBuf,
    process::{Command, Stdio},
    sync::Arc,
    thread,
    time::Duration,
};

use crossbeam_channel::{bounded, RecvTimeoutError};
use geo::{BoundingRect, Coord, LineString};
use image::{DynamicImage, ImageFormat};
use serde::Deserialize;
use tracing::instrument;

use crate::{
    error::{CapabilityError, EngineError},
    BoundingBox, EnhancedImage, TextToken,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawBounds {
    /// `[x, y, width, height]`
    Rect([f32; 4]),
    Polygon(Vec<[f32; 2]>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawRecognition {
    pub text: String,
    #[serde(alias = "box", alias = "polygon")]
    pub bounds: RawBounds,
    #[serde(alias = "score")]
    pub confidence: f32,
}

pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &DynamicImage) -> Result<Vec<RawRecognition>, EngineError>;

    fn shutdown(&self) {}
}

pub struct TextExtractor {
    engine: Arc<dyn OcrEngine>,
    timeout: Duration,
}

impl TextExtractor {
    /// A zero `timeout` waits indefinitely.
    pub fn new(engine: Arc<dyn OcrEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    pub fn engine(&self) -> &Arc<dyn OcrEngine> {
        &self.engine
    }

    #[instrument(level = "debug", skip_all, fields(width = image.image.width(), height = image.image.height()))]
    pub fn extract(&self, image: &EnhancedImage) -> Result<Vec<TextToken>, CapabilityError> {
        let (width, height) = image.image.dimensions();
        let input = DynamicImage::ImageLuma8(image.image.clone());
        let recognitions = self.call_engine(input)?;
        let tokens = recognitions
            .into_iter()
            .enumerate()
            .filter_map(|(index, raw)| to_token(index, raw, width as f32, height as f32).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!("Engine returned {} tokens", tokens.len());
        Ok(tokens)
    }

    fn call_engine(&self, input: DynamicImage) -> Result<Vec<RawRecognition>, CapabilityError> {
        let (sender, receiver) = bounded(1);
        let engine = Arc::clone(&self.engine);
        thread::Builder::new()
            .name("ocr-call".into())
            .spawn(move || {
                let _ = sender.send(engine.recognize(&input));
            })
            .map_err(|err| CapabilityError::Crashed(format!("failed to start OCR call: {err}")))?;

        let result = if self.timeout.is_zero() {
            receiver.recv().map_err(|_| RecvTimeoutError::Disconnected)
        } else {
            receiver.recv_timeout(self.timeout)
        };
        match result {
            Ok(result) => result.map_err(|err| {
                log::warn!("OCR engine failed: {err}");
                CapabilityError::from(err)
            }),
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("OCR engine timed out after {:?}", self.timeout);
                Err(CapabilityError::Timeout(self.timeout))
            }
            // The sender only disappears without sending if the engine panicked.
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("OCR engine panicked");
                Err(CapabilityError::Crashed("engine panicked".into()))
            }
        }
    }
}

fn to_token(
    index: usize,
    raw: RawRecognition,
    width: f32,
    height: f32,
) -> Result<Option<TextToken>, CapabilityError> {
    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        return Err(CapabilityError::Malformed(format!(
            "recognition {index} has confidence {} outside [0, 1]",
            raw.confidence
        )));
    }
    let (min, max) = match raw.bounds {
        RawBounds::Rect([x, y, w, h]) => (Coord { x, y }, Coord { x: x + w, y: y + h }),
        RawBounds::Polygon(points) => {
            let line: LineString<f32> = points.into_iter().map(|[x, y]| Coord { x, y }).collect();
            let rect = line.bounding_rect().ok_or_else(|| {
                CapabilityError::Malformed(format!("recognition {index} has an empty polygon"))
            })?;
            (rect.min(), rect.max())
        }
    };
    if ![min.x, min.y, max.x, max.y].iter().all(|it| it.is_finite()) || max.x < min.x || max.y < min.y {
        return Err(CapabilityError::Malformed(format!(
            "recognition {index} has an invalid box"
        )));
    }

    let x0 = min.x.clamp(0.0, width);
    let y0 = min.y.clamp(0.0, height);
    let x1 = max.x.clamp(0.0, width);
    let y1 = max.y.clamp(0.0, height);
    if x1 <= x0 || y1 <= y0 {
        log::debug!("Dropping recognition {index} outside the image: {:?}", raw.text);
        return Ok(None);
    }
    Ok(Some(TextToken {
        text: raw.text,
        bounds: BoundingBox::new(x0, y0, x1 - x0, y1 - y0),
        confidence: raw.confidence,
    }))
}

#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::ZERO,
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Zero lets the program run as long as it likes.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl OcrEngine for CommandEngine {
    #[instrument(level = "debug", skip(self, image), fields(program = %self.program.display()))]
    fn recognize(&self, image: &DynamicImage) -> Result<Vec<RawRecognition>, EngineError> {
        let mut png = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|err| EngineError::Failed(format!("failed to encode image: {err}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| EngineError::Failed(format!("failed to start {}: {err}", self.program.display())))?;

        // Pipes are serviced on their own threads so a stuck program can still be killed.
        if let Some(mut stdin) = child.stdin.take() {
            thread::spawn(move || {
                if let Err(err) = stdin.write_all(&png) {
                    log::debug!("OCR program stopped reading its input: {err}");
                }
            });
        }
        let stderr = child.stderr.take();
        let stderr = thread::spawn(move || read_pipe(stderr));
        let (sender, receiver) = bounded(1);
        let stdout = child.stdout.take();
        thread::spawn(move || {
            let _ = sender.send(read_pipe(stdout));
        });

        let stdout = if self.timeout.is_zero() {
            receiver.recv().ok()
        } else {
            receiver.recv_timeout(self.timeout).ok()
        };
        let Some(stdout) = stdout else {
            log::warn!("Killing {} after {:?}", self.program.display(), self.timeout);
            if let Err(err) = child.kill() {
                log::debug!("Failed to kill OCR program: {err}");
            }
            let _ = child.wait();
            return Err(EngineError::Timeout(self.timeout));
        };

        let status = child
            .wait()
            .map_err(|err| EngineError::Failed(format!("failed to wait for engine: {err}")))?;
        if !status.success() {
            let stderr = stderr.join().unwrap_or_default();
            return Err(EngineError::Failed(format!(
                "{} exited with {status}: {}",
                self.program.display(),
                String::from_utf8_lossy(&stderr).trim()
            )));
        }
        parse_engine_output(&stdout)
    }
}

fn read_pipe(pipe: Option<impl Read>) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(err) = pipe.read_to_end(&mut buffer) {
            log::debug!("Failed to read OCR program output: {err}");
        }
    }
    buffer
}

pub fn parse_engine_output(stdout: &[u8]) -> Result<Vec<RawRecognition>, EngineError> {
    serde_json::from_slice(stdout).map_err(|err| EngineError::Malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use image::GrayImage;

    use super::*;

    struct Fixed(Vec<RawRecognition>);

    impl OcrEngine for Fixed {
        fn recognize(&self, _: &DynamicImage) -> Result<Vec<RawRecognition>, EngineError> {
            Ok(self.0.clone())
        }
    }

    struct Slow;

    impl OcrEngine for Slow {
        fn recognize(&self, _: &DynamicImage) -> Result<Vec<RawRecognition>, EngineError> {
            thread::sleep(Duration::from_millis(500));
            Ok(vec![])
        }
    }

    struct Panics;

    impl OcrEngine for Panics {
        fn recognize(&self, _: &DynamicImage) -> Result<Vec<RawRecognition>, EngineError> {
            panic!("model exploded")
        }
    }

    struct Broken(AtomicBool);

    impl OcrEngine for Broken {
        fn recognize(&self, _: &DynamicImage) -> Result<Vec<RawRecognition>, EngineError> {
            self.0.store(true, Ordering::SeqCst);
            Err(EngineError::Malformed("garbage".into()))
        }
    }

    fn image() -> EnhancedImage {
        EnhancedImage {
            image: GrayImage::new(100, 50),
        }
    }

    fn raw(text: &str, bounds: RawBounds, confidence: f32) -> RawRecognition {
        RawRecognition {
            text: text.into(),
            bounds,
            confidence,
        }
    }

    fn extractor(engine: impl OcrEngine + 'static) -> TextExtractor {
        TextExtractor::new(Arc::new(engine), Duration::from_millis(200))
    }

    #[test]
    fn converts_and_clips_boxes() {
        let tokens = extractor(Fixed(vec![
            raw("03", RawBounds::Rect([90.0, 10.0, 20.0, 10.0]), 0.9),
            raw(
                "期",
                RawBounds::Polygon(vec![[10.0, 5.0], [30.0, 4.0], [31.0, 15.0], [9.0, 16.0]]),
                0.8,
            ),
            raw("ghost", RawBounds::Rect([200.0, 200.0, 5.0, 5.0]), 0.9),
        ]))
        .extract(&image())
        .expect("tokens");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].text, "03");
        assert_eq!(tokens[0].bounds, BoundingBox::new(90.0, 10.0, 10.0, 10.0));
        assert_eq!(tokens[1].bounds, BoundingBox::new(9.0, 4.0, 22.0, 12.0));
    }

    #[test]
    fn zero_tokens_is_not_a_failure() {
        let tokens = extractor(Fixed(vec![])).extract(&image()).expect("empty ok");
        assert!(tokens.is_empty());
    }

    #[test]
    fn out_of_range_confidence_is_malformed() {
        let err = extractor(Fixed(vec![raw("1", RawBounds::Rect([0.0, 0.0, 5.0, 5.0]), 1.5)]))
            .extract(&image())
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed(_)));
    }

    #[test]
    fn slow_engine_times_out() {
        let err = extractor(Slow).extract(&image()).unwrap_err();
        assert!(matches!(err, CapabilityError::Timeout(_)));
    }

    #[test]
    fn panicking_engine_is_a_crash() {
        let err = extractor(Panics).extract(&image()).unwrap_err();
        assert!(matches!(err, CapabilityError::Crashed(_)));
    }

    #[test]
    fn engine_errors_are_classified() {
        let engine = Arc::new(Broken(AtomicBool::new(false)));
        let err = TextExtractor::new(engine.clone(), Duration::ZERO)
            .extract(&image())
            .unwrap_err();
        assert!(engine.0.load(Ordering::SeqCst));
        assert!(matches!(err, CapabilityError::Malformed(_)));
    }

    #[test]
    fn parses_engine_json() {
        let json = r#"[
            {"text": "25102", "box": [1, 2, 30, 10], "confidence": 0.97},
            {"text": "前区", "polygon": [[0, 0], [10, 0], [10, 8], [0, 8]], "score": 0.9}
        ]"#;
        let parsed = parse_engine_output(json.as_bytes()).expect("valid json");
        assert_eq!(parsed[1].text, "前区");
        assert_eq!(parsed[0].bounds, RawBounds::Rect([1.0, 2.0, 30.0, 10.0]));
        assert!(matches!(parsed[1].bounds, RawBounds::Polygon(ref p) if p.len() == 4));
        assert!(matches!(
            parse_engine_output(b"{not json"),
            Err(EngineError::Malformed(_))
        ));
    }

    #[test]
    fn missing_program_is_a_failure() {
        let engine = CommandEngine::new("/nonexistent/ocr-engine");
        let err = engine
            .recognize(&DynamicImage::ImageLuma8(GrayImage::new(4, 4)))
            .unwrap_err();
        assert!(matches!(err, EngineError::Failed(_)));
    }

    #[cfg(unix)]
    fn shell(script: &str) -> CommandEngine {
        CommandEngine::new("/bin/sh").args(["-c", script])
    }

    #[cfg(unix)]
    #[test]
    fn command_engine_reads_json_from_stdout() {
        let engine = shell(r#"cat >/dev/null; echo '[{"text": "03", "box": [0, 0, 5, 5], "confidence": 0.9}]'"#)
            .timeout(Duration::from_secs(10));
        let parsed = engine
            .recognize(&DynamicImage::ImageLuma8(GrayImage::new(4, 4)))
            .expect("recognitions");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].text, "03");
    }

    #[cfg(unix)]
    #[test]
    fn command_engine_reports_exit_status() {
        let err = shell("cat >/dev/null; echo broken >&2; exit 3")
            .recognize(&DynamicImage::ImageLuma8(GrayImage::new(4, 4)))
            .unwrap_err();
        assert!(matches!(err, EngineError::Failed(ref msg) if msg.contains("broken")), "{err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn timed_out_program_is_killed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let marker = dir.path().join("finished");
        let engine = shell(&format!(
            "cat >/dev/null; sleep 2; touch '{}'; echo '[]'",
            marker.display()
        ))
        .timeout(Duration::from_millis(200));

        let start = std::time::Instant::now();
        let err = engine
            .recognize(&DynamicImage::ImageLuma8(GrayImage::new(4, 4)))
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)), "{err:?}");
        assert!(start.elapsed() < Duration::from_millis(1500));

        thread::sleep(Duration::from_millis(2500));
        assert!(!marker.exists(), "program kept running after the timeout");
    }
}
