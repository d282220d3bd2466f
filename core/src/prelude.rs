use nalgebra::{Point3, Vector3};

/// Plain `[x, y, z]` triple used in serialized records (millimetres).
pub type Vec3 = [f64; 3];

/// Lengths below this are treated as zero (degenerate axes, coincident points).
pub const LENGTH_EPSILON: f64 = 1e-9;

#[inline]
pub fn to_point(v: &Vec3) -> Point3<f64> {
    Point3::new(v[0], v[1], v[2])
}

#[inline]
pub fn from_point(p: &Point3<f64>) -> Vec3 {
    [p.x, p.y, p.z]
}

#[inline]
pub fn from_vector(v: &Vector3<f64>) -> Vec3 {
    [v.x, v.y, v.z]
}

/// Common error type for the engine.
///
/// Structural variants (`MalformedRosFile`, `CyclicTransformChain`) abort a whole load;
/// the rest describe a single volume or trajectory and are collected by batch calls.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("malformed .ros file in [{section}]: {reason}")]
    MalformedRosFile { section: String, reason: String },
    #[error("cyclic IMAGERY_3DREF chain at display index {index}")]
    CyclicTransformChain { index: usize },
    #[error("no Analyze image found for volume '{volume}'")]
    UnresolvedVolumeReference { volume: String },
    #[error(
        "electrode {model_id} on {trajectory}: laid-out length {laid_out_mm:.2} mm exceeds {limit_mm:.2} mm"
    )]
    ElectrodeGeometryOverflow {
        trajectory: String,
        model_id: String,
        laid_out_mm: f64,
        limit_mm: f64,
    },
    #[error("low fit confidence on {trajectory}: {matched}/{expected} contacts matched")]
    FitConfidenceLow {
        trajectory: String,
        matched: usize,
        expected: usize,
    },
    #[error("no electrode model within tolerance of {trajectory} ({length_mm:.2} mm)")]
    NoConfidentModelSuggestion { trajectory: String, length_mm: f64 },
    #[error("invalid electrode library: {0}")]
    InvalidElectrodeLibrary(String),
    #[error("unknown electrode model '{0}'")]
    UnknownModel(String),
    #[error("unknown trajectory '{0}'")]
    UnknownTrajectory(String),
    #[error("volume '{name}' not found; available: {available}")]
    UnknownVolume { name: String, available: String },
    #[error("trajectory '{0}' has zero length")]
    DegenerateTrajectory(String),
    #[error("matrix is singular and cannot be inverted")]
    SingularMatrix,
    #[error("{trajectory}: {found} candidate points, need at least {required}")]
    InsufficientCandidates {
        trajectory: String,
        found: usize,
        required: usize,
    },
    #[error("fit rejected for {trajectory}: {reason}")]
    FitRejected { trajectory: String, reason: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn malformed(section: &str, reason: impl Into<String>) -> Self {
        CoreError::MalformedRosFile {
            section: section.to_string(),
            reason: reason.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Outcome of one item in a partial-failure tolerant batch, keyed by entity name.
pub type ItemOutcome<T> = (String, CoreResult<T>);
