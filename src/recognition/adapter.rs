use super::gallery::KnownGallery;
use super::types::{FaceEvent, FaceSubject};
use crate::collaborators::FaceDirectory;
use crate::error::ClassifierError;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace, warn};

/// Turns face-library output for one frame into typed face events
pub struct RecognitionAdapter {
    directory: Arc<dyn FaceDirectory>,
    match_threshold: f32,
    resize_factor: f32,
}

impl RecognitionAdapter {
    pub fn new(directory: Arc<dyn FaceDirectory>, match_threshold: f32, resize_factor: f32) -> Self {
        Self {
            directory,
            match_threshold,
            resize_factor,
        }
    }

    pub fn directory(&self) -> Arc<dyn FaceDirectory> {
        Arc::clone(&self.directory)
    }

    /// Locate faces on a downscaled copy, then identify each one on its
    /// full-resolution crop
    pub fn detect(
        &self,
        camera_id: &str,
        frame: &RgbImage,
        gallery: &KnownGallery,
    ) -> Result<Vec<FaceEvent>, ClassifierError> {
        let detected_at = SystemTime::now();
        let (width, height) = frame.dimensions();

        let boxes = if self.resize_factor < 1.0 {
            let small_width = ((width as f32 * self.resize_factor) as u32).max(1);
            let small_height = ((height as f32 * self.resize_factor) as u32).max(1);
            let small = imageops::resize(frame, small_width, small_height, FilterType::Triangle);
            self.directory.locate(&small)?
        } else {
            self.directory.locate(frame)?
        };
        trace!("Camera {}: {} face(s) located", camera_id, boxes.len());

        let mut events = Vec::with_capacity(boxes.len());
        for face_box in boxes {
            let Some(full) = face_box.rescale(self.resize_factor).clamp(width, height) else {
                debug!("Camera {}: face box {:?} outside frame", camera_id, face_box);
                continue;
            };

            let crop =
                imageops::crop_imm(frame, full.left, full.top, full.width(), full.height())
                    .to_image();

            let embedding = match self.directory.encode(&crop) {
                Ok(Some(embedding)) => embedding,
                Ok(None) => {
                    debug!("Camera {}: no embedding for face at {:?}", camera_id, full);
                    continue;
                }
                Err(e) => {
                    warn!("Camera {}: face encoding failed: {}", camera_id, e);
                    continue;
                }
            };

            let subject =
                match self
                    .directory
                    .best_match(gallery, &embedding, self.match_threshold)
                {
                    Some(found) => FaceSubject::Known {
                        member_id: found.member_id,
                        name: found.name,
                        distance: found.distance,
                        embedding,
                        image: crop,
                    },
                    None => FaceSubject::Unknown {
                        embedding,
                        image: crop,
                    },
                };

            events.push(FaceEvent {
                camera_id: camera_id.to_string(),
                subject,
                detected_at,
            });
        }

        Ok(events)
    }
}
