//! Post-operative CT auto-fit: corridor detection of hyperdense contacts and alignment
//! of the detections with an electrode model.

pub mod align;
pub mod corridor;
pub mod detect;
pub mod fit;
pub mod volume;

pub use align::{Alignment, ContactMatch, PatternAligner};
pub use corridor::{Corridor, VoxelBox};
pub use detect::{detect_candidates, Detection, DetectionConfig, DetectionReport, Threshold};
pub use fit::{autofit_trajectory, fit_all, fit_points, AutoFitConfig, ContactResidual, FitResult};
pub use volume::{DenseVolume, IntensityVolume};
