//! Collaborator seams: the face-vision capability and the frame source.

use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("face detection failed: {0}")]
    Detection(String),
    #[error("face embedding failed: {0}")]
    Embedding(String),
    #[error("expected {expected} embeddings (one per face), got {actual}")]
    CountMismatch { expected: usize, actual: usize },
}

/// Face detection and embedding, consumed as an opaque service.
pub trait FaceVision {
    /// Locate zero or more faces in an RGB image.
    fn locate_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, VisionError>;

    /// Embed each face region, returning one embedding per region in the same order.
    fn embed_faces(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, VisionError>;

    /// Locate then embed, checking the one-embedding-per-face contract.
    fn detect_and_embed(
        &mut self,
        image: &RgbImage,
    ) -> Result<Vec<(BoundingBox, Embedding)>, VisionError> {
        let faces = self.locate_faces(image)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.embed_faces(image, &faces)?;
        if embeddings.len() != faces.len() {
            return Err(VisionError::CountMismatch {
                expected: faces.len(),
                actual: embeddings.len(),
            });
        }
        Ok(faces.into_iter().zip(embeddings).collect())
    }
}

impl<T: FaceVision + ?Sized> FaceVision for &mut T {
    fn locate_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, VisionError> {
        (**self).locate_faces(image)
    }

    fn embed_faces(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, VisionError> {
        (**self).embed_faces(image, faces)
    }
}

impl<T: FaceVision + ?Sized> FaceVision for Box<T> {
    fn locate_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, VisionError> {
        (**self).locate_faces(image)
    }

    fn embed_faces(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, VisionError> {
        (**self).embed_faces(image, faces)
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture failed: {0}")]
    Failed(String),
    #[error("video source exhausted")]
    Exhausted,
}

/// A stream of RGB frames, polled until it fails or runs dry.
///
/// The underlying device is acquired when the source is built and released
/// when it is dropped.
pub trait VideoSource {
    fn read_frame(&mut self) -> Result<RgbImage, CaptureError>;
}

impl<S: VideoSource + ?Sized> VideoSource for &mut S {
    fn read_frame(&mut self) -> Result<RgbImage, CaptureError> {
        (**self).read_frame()
    }
}
