//! 3D line fitting: total least squares (PCA) and a seeded RANSAC wrapper.
//!
//! RANSAC keeps the pair sampling independent of the coordinates, so a rigidly moved
//! point set yields a rigidly moved line.

use nalgebra::{Matrix3, Point3, SymmetricEigen, Unit, Vector3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::prelude::LENGTH_EPSILON;

/// Infinite line through `point` along a unit `direction`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line3 {
    pub point: Point3<f64>,
    pub direction: Unit<Vector3<f64>>,
}

impl Line3 {
    pub fn through(a: &Point3<f64>, b: &Point3<f64>) -> Option<Self> {
        let d = b - a;
        if d.norm() <= LENGTH_EPSILON {
            return None;
        }
        Some(Self {
            point: *a,
            direction: Unit::new_normalize(d),
        })
    }

    /// Signed position of the orthogonal projection of `p` along the line.
    pub fn project(&self, p: &Point3<f64>) -> f64 {
        (p - self.point).dot(&self.direction)
    }

    pub fn at(&self, t: f64) -> Point3<f64> {
        self.point + self.direction.into_inner() * t
    }

    /// Perpendicular distance from `p` to the line.
    pub fn distance(&self, p: &Point3<f64>) -> f64 {
        (p - self.at(self.project(p))).norm()
    }

    /// Flips the direction, if needed, so it points the same way as `reference`.
    pub fn oriented_along(self, reference: &Vector3<f64>) -> Self {
        if self.direction.dot(reference) < 0.0 {
            Self {
                point: self.point,
                direction: -self.direction,
            }
        } else {
            self
        }
    }
}

/// Unsigned angle between two directions in degrees; exactly zero for parallel inputs.
pub fn angle_between_deg(u: &Vector3<f64>, v: &Vector3<f64>) -> f64 {
    u.cross(v).norm().atan2(u.dot(v)).to_degrees()
}

/// Fits the principal axis of a point cloud through its centroid.
///
/// Returns `None` for fewer than two points or when all points coincide.
pub fn fit_line_pca(points: &[Point3<f64>]) -> Option<Line3> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let centroid = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords)
        / n;

    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p.coords - centroid;
        cov += d * d.transpose();
    }
    cov /= n;

    let eigen = SymmetricEigen::new(cov);
    let (best, largest) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        });
    if largest <= LENGTH_EPSILON * LENGTH_EPSILON {
        return None;
    }
    let axis = eigen.eigenvectors.column(best).into_owned();
    Some(Line3 {
        point: Point3::from(centroid),
        direction: Unit::new_normalize(axis),
    })
}

/// Configuration for [`ransac_line`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LineRansacOptions {
    pub max_iters: usize,
    pub inlier_threshold_mm: f64,
    pub min_inliers: usize,
    pub seed: u64,
}

impl Default for LineRansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 220,
            inlier_threshold_mm: 0.9,
            min_inliers: 3,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LineRansacResult {
    pub line: Line3,
    pub inliers: Vec<usize>,
    pub inlier_rms: f64,
    /// `false` when no consensus was found and the line is a PCA fit over every point.
    pub consensus: bool,
}

/// RANSAC line fit followed by a PCA refit on the consensus set.
pub fn ransac_line(points: &[Point3<f64>], opts: &LineRansacOptions) -> Option<LineRansacResult> {
    let n = points.len();
    if n < 2 {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut best: Option<(Vec<usize>, f64)> = None;

    for _ in 0..opts.max_iters.max(1) {
        let i = rng.gen_range(0..n);
        let mut j = rng.gen_range(0..n - 1);
        if j >= i {
            j += 1;
        }
        let Some(candidate) = Line3::through(&points[i], &points[j]) else {
            continue;
        };

        let mut inliers = Vec::new();
        let mut dist_sum = 0.0;
        for (k, p) in points.iter().enumerate() {
            let d = candidate.distance(p);
            if d <= opts.inlier_threshold_mm {
                inliers.push(k);
                dist_sum += d;
            }
        }
        if inliers.is_empty() {
            continue;
        }
        let score = dist_sum / inliers.len() as f64;
        let better = match &best {
            None => true,
            Some((best_inliers, best_score)) => {
                inliers.len() > best_inliers.len()
                    || (inliers.len() == best_inliers.len() && score < *best_score)
            }
        };
        if better {
            best = Some((inliers, score));
        }
    }

    match best {
        Some((inliers, _)) if inliers.len() >= opts.min_inliers.max(2) => {
            let subset: Vec<Point3<f64>> = inliers.iter().map(|&k| points[k]).collect();
            let line = fit_line_pca(&subset)?;
            let residuals: Vec<f64> = subset.iter().map(|p| line.distance(p)).collect();
            Some(LineRansacResult {
                line,
                inliers,
                inlier_rms: crate::math::StatsHelper::rms(&residuals),
                consensus: true,
            })
        }
        _ => {
            let line = fit_line_pca(points)?;
            Some(LineRansacResult {
                line,
                inliers: (0..n).collect(),
                inlier_rms: 0.0,
                consensus: false,
            })
        }
    }
}
