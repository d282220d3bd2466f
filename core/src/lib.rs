//! Geometry and data engine for ROSA stereotactic case exports.
//!
//! Parses `.ros` case files, composes display registration chains into a common root
//! frame, places electrode contacts from a model library, fits contacts to post-operative
//! CT and reports planned-versus-final QC. Every operation works on caller-owned values;
//! the crate keeps no process-wide state.

pub mod autofit;
pub mod case;
pub mod electrode;
pub mod export;
pub mod math;
pub mod prelude;
pub mod qc;
pub mod ros;
pub mod telemetry;
pub mod transform;

pub use prelude::{CoreError, CoreResult, ItemOutcome};
pub use ros::{parse_ros_file, RosFile, Trajectory};
pub use transform::TransformChain;
