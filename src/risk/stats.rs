//! Descriptive statistics over return series.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::utils::error::{Error, Result};

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

/// Sample standard deviation (n − 1); 0 for fewer than two points.
pub fn std_dev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

fn central_moment(xs: &[f64], k: i32) -> f64 {
    let m = mean(xs);
    xs.iter().map(|x| (x - m).powi(k)).sum::<f64>() / xs.len() as f64
}

/// Moment skewness `m3 / m2^1.5`; 0 for a flat or short series.
pub fn skewness(xs: &[f64]) -> f64 {
    if xs.len() < 3 {
        return 0.0;
    }
    let m2 = central_moment(xs, 2);
    if m2 <= f64::EPSILON {
        return 0.0;
    }
    central_moment(xs, 3) / m2.powf(1.5)
}

/// Excess kurtosis `m4 / m2² − 3`; 0 for a flat or short series.
pub fn excess_kurtosis(xs: &[f64]) -> f64 {
    if xs.len() < 4 {
        return 0.0;
    }
    let m2 = central_moment(xs, 2);
    if m2 <= f64::EPSILON {
        return 0.0;
    }
    central_moment(xs, 4) / (m2 * m2) - 3.0
}

/// Pearson correlation over the common tail of two series. 0 when either
/// side is flat or the overlap is shorter than two points.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va <= f64::EPSILON || vb <= f64::EPSILON {
        return 0.0;
    }
    (cov / (va.sqrt() * vb.sqrt())).clamp(-1.0, 1.0)
}

/// Index of the lower-tail `confidence` quantile in an ascending sample of
/// length `n`: `⌊(1 − c)·n⌋`, kept inside the slice.
pub fn lower_tail_index(n: usize, confidence: f64) -> usize {
    let idx = ((1.0 - confidence) * n as f64).floor() as usize;
    idx.min(n.saturating_sub(1))
}

/// Standard normal quantile at the lower tail `1 − confidence` (negative for c > 0.5).
pub fn z_score(confidence: f64) -> Result<f64> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(Error::ValidationError(format!(
            "confidence level {} must be in (0, 1)",
            confidence
        )));
    }
    let normal = Normal::new(0.0, 1.0).map_err(|e| Error::Other(e.to_string()))?;
    Ok(normal.inverse_cdf(1.0 - confidence))
}

pub fn sorted(xs: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = xs.iter().copied().filter(|x| x.is_finite()).collect();
    v.sort_by(f64::total_cmp);
    v
}
