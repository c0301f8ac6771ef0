//! Floor plan gateway: the pure coordinate transform and the per-floor view
//! built on top of it.

mod transform;
mod view;

pub use transform::{
    marker_size, polyline, Calibration, DrawBox, Edge, Pixel, Size, CAL_EPSILON,
};
pub use view::{FloorLayout, MapView, NodeMarker, RenderFrame, DEFAULT_IMAGE_SIZE, DEFAULT_STEP};
