//! Face recognition: typed face events from a face library, the known
//! gallery they are matched against, and the per-camera pipelines that
//! route them to access control and alerting.

mod adapter;
mod gallery;
mod pipeline;
mod roster;
mod types;


pub use adapter::RecognitionAdapter;
pub use gallery::{load_known_gallery, GalleryHandle, KnownEntry, KnownGallery};
pub use pipeline::{FrameSampler, PipelineStats, RecognitionPipeline, RecognitionService};
pub use roster::RosterWatcher;
pub use types::{Embedding, FaceBox, FaceEvent, FaceMatch, FaceSubject};
