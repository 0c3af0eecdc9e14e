pub mod nms;
pub mod post;

pub use nms::{Nms, NmsMode, iou, non_max_suppression};
pub use post::{Candidate, PostProcessor, PostprocessConfig, PostprocessError};
