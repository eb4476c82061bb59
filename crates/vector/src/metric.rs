//! Distance functions.
//!
//! Every function returns a *distance*: lower is closer. Inner product is
//! negated to keep that convention uniform, so callers can sort one way
//! regardless of metric. Vectors are used as-is, no implicit normalization;
//! Jensen-Shannon treats its inputs as unnormalized non-negative
//! distributions and normalizes internally.

use axon_core::DistanceMetric;

/// Compute the distance between two equal-length vectors.
pub fn distance(a: &[f32], b: &[f32], metric: DistanceMetric) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    match metric {
        DistanceMetric::L2 => l2(a, b),
        DistanceMetric::InnerProduct => -dot(a, b),
        DistanceMetric::L1 => l1(a, b),
        DistanceMetric::Lp => lp(a, b, 3.0),
        DistanceMetric::Canberra => canberra(a, b),
        DistanceMetric::BrayCurtis => bray_curtis(a, b),
        DistanceMetric::JensenShannon => jensen_shannon(a, b),
        DistanceMetric::Linf => linf(a, b),
    }
}

/// Dot product
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean distance
pub fn l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn l1(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

fn lp(a: &[f32], b: &[f32], p: f32) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs().powf(p))
        .sum::<f32>()
        .powf(1.0 / p)
}

fn canberra(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let denom = x.abs() + y.abs();
            if denom == 0.0 {
                0.0
            } else {
                (x - y).abs() / denom
            }
        })
        .sum()
}

fn bray_curtis(a: &[f32], b: &[f32]) -> f32 {
    let num: f32 = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum();
    let denom: f32 = a.iter().zip(b).map(|(x, y)| (x + y).abs()).sum();
    if denom == 0.0 {
        0.0
    } else {
        num / denom
    }
}

/// Jensen-Shannon distance (square root of the divergence).
///
/// Negative components are clamped to zero; a zero-mass input yields 0.
fn jensen_shannon(a: &[f32], b: &[f32]) -> f32 {
    let mass_a: f32 = a.iter().map(|x| x.max(0.0)).sum();
    let mass_b: f32 = b.iter().map(|x| x.max(0.0)).sum();
    if mass_a == 0.0 || mass_b == 0.0 {
        return 0.0;
    }
    let mut divergence = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        let p = x.max(0.0) / mass_a;
        let q = y.max(0.0) / mass_b;
        let m = 0.5 * (p + q);
        if p > 0.0 && m > 0.0 {
            divergence += 0.5 * p * (p / m).ln();
        }
        if q > 0.0 && m > 0.0 {
            divergence += 0.5 * q * (q / m).ln();
        }
    }
    divergence.max(0.0).sqrt()
}

fn linf(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}
