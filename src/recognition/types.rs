use image::RgbImage;
use std::time::SystemTime;

/// Fixed-length face descriptor compared by Euclidean distance
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Euclidean distance; vectors of different length never match
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.0.len() != other.0.len() {
            return f32::INFINITY;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Face bounding box in pixel coordinates, ordered as face libraries report it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceBox {
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    /// Map a box found on a frame downscaled by `factor` back to full resolution
    pub fn rescale(&self, factor: f32) -> Self {
        let inverse = 1.0 / factor;
        let scale = |v: u32| (v as f32 * inverse) as u32;
        Self {
            top: scale(self.top),
            right: scale(self.right),
            bottom: scale(self.bottom),
            left: scale(self.left),
        }
    }

    /// Clamp to an image of `width` x `height`; `None` when nothing is left
    pub fn clamp(&self, width: u32, height: u32) -> Option<Self> {
        let left = self.left.min(width);
        let right = self.right.min(width);
        let top = self.top.min(height);
        let bottom = self.bottom.min(height);
        if right <= left || bottom <= top {
            return None;
        }
        Some(Self {
            top,
            right,
            bottom,
            left,
        })
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// Result of matching an embedding against the known gallery
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub member_id: String,
    pub name: String,
    pub distance: f32,
}

/// Who a detected face belongs to
#[derive(Debug, Clone)]
pub enum FaceSubject {
    Known {
        member_id: String,
        name: String,
        distance: f32,
        embedding: Embedding,
        image: RgbImage,
    },
    Unknown {
        embedding: Embedding,
        image: RgbImage,
    },
}

/// One recognized or unrecognized face on one camera
#[derive(Debug, Clone)]
pub struct FaceEvent {
    pub camera_id: String,
    pub subject: FaceSubject,
    pub detected_at: SystemTime,
}

impl FaceEvent {
    pub fn is_known(&self) -> bool {
        matches!(self.subject, FaceSubject::Known { .. })
    }

    pub fn embedding(&self) -> &Embedding {
        match &self.subject {
            FaceSubject::Known { embedding, .. } | FaceSubject::Unknown { embedding, .. } => {
                embedding
            }
        }
    }
}
