pub mod line;
pub mod matrix;
pub mod stats;

pub use line::{angle_between_deg, fit_line_pca, ransac_line, Line3, LineRansacOptions, LineRansacResult};
pub use matrix::MatrixHelper;
pub use stats::StatsHelper;
