//! The attendance session: frames in, at-most-once marks out.
//!
//! Each identity is either unseen or seen. The first accepted match moves it
//! to seen and writes one record; later matches are silent. The loop is
//! single-threaded and checks the stop signal only between frames.

use crate::ledger::{AttendanceLog, LogError};
use crate::roster::Roster;
use crate::types::{BoundingBox, Matcher};
use crate::vision::{CaptureError, FaceVision, VideoSource, VisionError};
use chrono::NaiveDateTime;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Frames are shrunk by this factor per side before detection.
pub const DEFAULT_DOWNSCALE: u32 = 4;
pub const DEFAULT_MAX_CONSECUTIVE_VISION_ERRORS: usize = 10;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error("vision failed on {count} consecutive frames, last error: {last}")]
    VisionFailing {
        count: usize,
        #[source]
        last: VisionError,
    },
}

/// Wall-clock source for mark timestamps.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Cooperative stop request, polled once per loop iteration.
pub trait StopSignal {
    fn stop_requested(&mut self) -> bool;
}

impl<F: FnMut() -> bool> StopSignal for F {
    fn stop_requested(&mut self) -> bool {
        self()
    }
}

/// Shareable stop flag (e.g. set from a signal handler).
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl StopSignal for StopFlag {
    fn stop_requested(&mut self) -> bool {
        self.is_set()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Per-side shrink factor applied before detection (1 = full resolution).
    pub downscale: u32,
    /// Consecutive per-frame vision failures tolerated before the session aborts.
    pub max_consecutive_vision_errors: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            downscale: DEFAULT_DOWNSCALE,
            max_consecutive_vision_errors: DEFAULT_MAX_CONSECUTIVE_VISION_ERRORS,
        }
    }
}

/// One face seen in a frame.
#[derive(Debug, Clone)]
pub struct RecognizedFace {
    /// Region in full-resolution frame coordinates.
    pub region: BoundingBox,
    /// Display name of the matched identity, if any.
    pub name: Option<String>,
    pub distance: Option<f32>,
    /// True only on the frame that first marked this identity.
    pub newly_marked: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub faces: Vec<RecognizedFace>,
}

impl FrameReport {
    pub fn newly_marked(&self) -> impl Iterator<Item = &str> {
        self.faces
            .iter()
            .filter(|f| f.newly_marked)
            .filter_map(|f| f.name.as_deref())
    }
}

/// Why the loop ended.
#[derive(Debug)]
pub enum SessionEnd {
    Stopped,
    CaptureFailed(CaptureError),
}

#[derive(Debug)]
pub struct SessionSummary {
    pub frames: u64,
    pub faces: u64,
    pub marked: usize,
    pub log_path: PathBuf,
    pub end: SessionEnd,
}

/// Owns the roster, the seen set and the attendance log for one run.
pub struct AttendanceSession<V, C = SystemClock> {
    roster: Roster,
    vision: V,
    matcher: Box<dyn Matcher>,
    clock: C,
    log: AttendanceLog,
    options: SessionOptions,
    seen: HashSet<String>,
    frames: u64,
    faces: u64,
}

impl<V: FaceVision, C: Clock> AttendanceSession<V, C> {
    pub fn new(
        roster: Roster,
        vision: V,
        matcher: Box<dyn Matcher>,
        log: AttendanceLog,
        clock: C,
        options: SessionOptions,
    ) -> Self {
        Self {
            roster,
            vision,
            matcher,
            clock,
            log,
            options: SessionOptions {
                downscale: options.downscale.max(1),
                ..options
            },
            seen: HashSet::new(),
            frames: 0,
            faces: 0,
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn log(&self) -> &AttendanceLog {
        &self.log
    }

    pub fn is_seen(&self, display_name: &str) -> bool {
        self.seen.contains(display_name)
    }

    /// Detect, match and mark for a single frame.
    ///
    /// Marks are persisted before this returns. A vision error leaves the
    /// seen set and log untouched.
    pub fn process_frame(&mut self, frame: &RgbImage) -> Result<FrameReport, SessionError> {
        self.frames += 1;

        let factor = self.options.downscale;
        let small;
        let detect_on = if factor > 1 {
            small = downscale(frame, factor);
            &small
        } else {
            frame
        };

        let detections = self.vision.detect_and_embed(detect_on)?;
        self.faces += detections.len() as u64;

        let mut report = FrameReport::default();
        for (region, embedding) in detections {
            let result = self
                .matcher
                .best_match(self.roster.identities(), &embedding);

            let region = region.scaled(factor as f32);
            let Some(identity) = result.index.and_then(|i| self.roster.get(i)) else {
                tracing::trace!(distance = ?result.distance, "face did not match roster");
                report.faces.push(RecognizedFace {
                    region,
                    name: None,
                    distance: result.distance,
                    newly_marked: false,
                });
                continue;
            };

            let name = identity.display_name();
            let newly_marked = if self.seen.contains(&name) {
                false
            } else {
                self.log.mark(&name, self.clock.now())?;
                self.seen.insert(name.clone());
                true
            };

            tracing::debug!(
                name = %name,
                distance = ?result.distance,
                newly_marked,
                "face matched"
            );
            report.faces.push(RecognizedFace {
                region,
                name: Some(name),
                distance: result.distance,
                newly_marked,
            });
        }

        Ok(report)
    }

    /// Run until the stop signal fires or the source fails.
    ///
    /// Takes ownership of the source and drops it (releasing the device)
    /// before returning. There is no timeout on frame reads or vision calls.
    pub fn run<S, T>(&mut self, mut source: S, stop: &mut T) -> Result<SessionSummary, SessionError>
    where
        S: VideoSource,
        T: StopSignal + ?Sized,
    {
        if self.roster.is_empty() {
            tracing::warn!("roster is empty; nobody can be marked this session");
        }
        tracing::info!(
            roster = self.roster.len(),
            log = %self.log.path().display(),
            downscale = self.options.downscale,
            "attendance session started"
        );

        let mut consecutive_failures = 0usize;
        let end = loop {
            if stop.stop_requested() {
                tracing::info!("stop requested");
                break SessionEnd::Stopped;
            }

            let frame = match source.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(error = %e, "failed to capture frame");
                    break SessionEnd::CaptureFailed(e);
                }
            };

            match self.process_frame(&frame) {
                Ok(report) => {
                    consecutive_failures = 0;
                    for face in &report.faces {
                        tracing::trace!(region = ?face.region, name = ?face.name, "face");
                    }
                }
                Err(SessionError::Vision(e)) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        error = %e,
                        consecutive = consecutive_failures,
                        "vision failed on frame; skipping"
                    );
                    if consecutive_failures >= self.options.max_consecutive_vision_errors {
                        drop(source);
                        return Err(SessionError::VisionFailing {
                            count: consecutive_failures,
                            last: e,
                        });
                    }
                }
                Err(e) => {
                    drop(source);
                    return Err(e);
                }
            }
        };

        drop(source);
        tracing::info!(
            frames = self.frames,
            faces = self.faces,
            marked = self.log.len(),
            "attendance session ended; capture released"
        );

        Ok(SessionSummary {
            frames: self.frames,
            faces: self.faces,
            marked: self.log.len(),
            log_path: self.log.path().to_path_buf(),
            end,
        })
    }
}

fn downscale(frame: &RgbImage, factor: u32) -> RgbImage {
    let width = (frame.width() / factor).max(1);
    let height = (frame.height() / factor).max(1);
    imageops::resize(frame, width, height, FilterType::Triangle)
}
