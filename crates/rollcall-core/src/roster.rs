//! Roster encoding: turn (name, image) enrollment entries into identities.
//!
//! Every failure is local to its entry. A bad entry is logged and skipped;
//! the rest of the roster still enrolls.

use crate::types::Identity;
use crate::vision::{FaceVision, VisionError};
use image::{DynamicImage, ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Enrollment images must carry one of these extensions (case-insensitive).
const ACCEPTED_EXTENSIONS: [&str; 2] = ["jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("name is empty")]
    EmptyName,
    #[error("{0} is not in JPEG format")]
    UnsupportedFormat(PathBuf),
    #[error("image not found at {0}")]
    NotFound(PathBuf),
    #[error("failed to load {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported color layout: {0}")]
    UnsupportedColor(String),
    #[error("no face found")]
    NoFace,
    #[error("vision: {0}")]
    Vision(#[from] VisionError),
}

/// One enrollment entry as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub image: PathBuf,
}

impl RosterEntry {
    pub fn new(name: impl Into<String>, image: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
        }
    }
}

/// The enrolled identities for one session. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    identities: Vec<Identity>,
}

impl Roster {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn get(&self, index: usize) -> Option<&Identity> {
        self.identities.get(index)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// An entry that could not be enrolled, and why.
#[derive(Debug)]
pub struct SkippedEntry {
    pub entry: RosterEntry,
    pub reason: EnrollmentError,
}

/// Result of encoding a roster: the usable identities plus the skipped entries.
#[derive(Debug, Default)]
pub struct RosterReport {
    pub roster: Roster,
    pub skipped: Vec<SkippedEntry>,
}

/// Encode every entry, skipping (and logging) the ones that fail.
pub fn encode_roster<V: FaceVision + ?Sized>(
    entries: &[RosterEntry],
    vision: &mut V,
) -> RosterReport {
    let mut identities = Vec::with_capacity(entries.len());
    let mut skipped = Vec::new();

    for entry in entries {
        tracing::info!(
            name = %entry.name,
            image = %entry.image.display(),
            "loading enrollment image"
        );
        match encode_entry(entry, vision) {
            Ok(identity) => {
                tracing::info!(
                    name = %entry.name,
                    dim = identity.reference.dim(),
                    "enrolled"
                );
                identities.push(identity);
            }
            Err(reason) => {
                tracing::warn!(
                    name = %entry.name,
                    image = %entry.image.display(),
                    error = %reason,
                    "skipping roster entry"
                );
                skipped.push(SkippedEntry {
                    entry: entry.clone(),
                    reason,
                });
            }
        }
    }

    tracing::info!(
        enrolled = identities.len(),
        skipped = skipped.len(),
        "roster encoded"
    );

    RosterReport {
        roster: Roster::new(identities),
        skipped,
    }
}

fn encode_entry<V: FaceVision + ?Sized>(
    entry: &RosterEntry,
    vision: &mut V,
) -> Result<Identity, EnrollmentError> {
    if entry.name.trim().is_empty() {
        return Err(EnrollmentError::EmptyName);
    }

    let image = load_rgb(&entry.image)?;

    // First detected face wins; no ranking beyond the capability's own order.
    let (_, embedding) = vision
        .detect_and_embed(&image)?
        .into_iter()
        .next()
        .ok_or(EnrollmentError::NoFace)?;

    Ok(Identity::new(entry.name.trim(), embedding))
}

/// Load a JPEG enrollment image as 8-bit RGB.
pub fn load_rgb(path: &Path) -> Result<RgbImage, EnrollmentError> {
    if !has_accepted_extension(path) {
        return Err(EnrollmentError::UnsupportedFormat(path.to_path_buf()));
    }
    if !path.exists() {
        return Err(EnrollmentError::NotFound(path.to_path_buf()));
    }

    let decoded = ImageReader::open(path)
        .map_err(|source| EnrollmentError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .with_guessed_format()
        .map_err(|source| EnrollmentError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .decode()
        .map_err(|source| EnrollmentError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

    normalize_color(decoded)
}

fn has_accepted_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ACCEPTED_EXTENSIONS
                .iter()
                .any(|accepted| ext.eq_ignore_ascii_case(accepted))
        })
        .unwrap_or(false)
}

/// Normalize a decoded image to 3-channel 8-bit RGB.
///
/// Alpha is dropped, deeper pixel formats are rescaled to 8 bits, and luma is
/// expanded to three channels.
pub fn normalize_color(image: DynamicImage) -> Result<RgbImage, EnrollmentError> {
    let color = image.color();
    match image {
        DynamicImage::ImageRgb8(rgb) => Ok(rgb),
        DynamicImage::ImageRgba8(_)
        | DynamicImage::ImageRgba16(_)
        | DynamicImage::ImageRgba32F(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageLumaA16(_) => {
            tracing::debug!(?color, "dropping alpha channel");
            Ok(image.to_rgb8())
        }
        DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgb32F(_) => {
            tracing::debug!(?color, "rescaling to 8-bit");
            Ok(image.to_rgb8())
        }
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => {
            tracing::debug!(?color, "expanding luma to RGB");
            Ok(image.to_rgb8())
        }
        _ => Err(EnrollmentError::UnsupportedColor(format!("{color:?}"))),
    }
}
