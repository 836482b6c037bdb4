//! Numerical primitives over 1-D signals.

use ndarray::{Array1, ArrayView1};

/// Index of the largest value; the first one on ties. `None` for empty input.
pub fn argmax(x: ArrayView1<'_, f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in x.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Rescale to [0, 1]. `None` when the signal is empty or flat.
pub fn normalize_unit(x: ArrayView1<'_, f64>) -> Option<Array1<f64>> {
    let min = x.iter().copied().fold(f64::INFINITY, f64::min);
    let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !(range > 0.0) || !range.is_finite() {
        return None;
    }
    Some(x.mapv(|v| (v - min) / range))
}

/// Peak selection criteria. Unset fields do not filter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeakParams {
    /// Minimum peak value.
    pub height: Option<f64>,
    /// Minimum topographic prominence.
    pub prominence: Option<f64>,
    /// Minimum index spacing between kept peaks. Higher peaks win.
    pub distance: Option<usize>,
}

/// Indices of local maxima of `x` that satisfy `params`, ascending.
///
/// A flat-topped maximum is reported once, at the middle of its plateau.
/// Filters apply in order: height, distance, prominence.
pub fn find_peaks(x: ArrayView1<'_, f64>, params: &PeakParams) -> Vec<usize> {
    let mut peaks = local_maxima(x);

    if let Some(height) = params.height {
        peaks.retain(|&p| x[p] >= height);
    }
    if let Some(distance) = params.distance {
        if distance > 1 {
            peaks = select_by_distance(x, &peaks, distance);
        }
    }
    if let Some(min_prominence) = params.prominence {
        peaks.retain(|&p| prominence(x, p) >= min_prominence);
    }

    peaks
}

fn local_maxima(x: ArrayView1<'_, f64>) -> Vec<usize> {
    let n = x.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }

    let mut i = 1;
    while i < n - 1 {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < n - 1 && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

fn select_by_distance(x: ArrayView1<'_, f64>, peaks: &[usize], distance: usize) -> Vec<usize> {
    let mut keep = vec![true; peaks.len()];
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]));

    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }

    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, kept)| kept.then_some(p))
        .collect()
}

/// Topographic prominence of the sample at `peak`.
///
/// Each side is scanned outward until a strictly higher sample or the border;
/// the higher of the two side minima is the reference level.
pub fn prominence(x: ArrayView1<'_, f64>, peak: usize) -> f64 {
    let top = x[peak];

    let mut left_min = top;
    let mut i = peak;
    while i > 0 && x[i - 1] <= top {
        i -= 1;
        left_min = left_min.min(x[i]);
    }

    let mut right_min = top;
    let mut i = peak;
    while i + 1 < x.len() && x[i + 1] <= top {
        i += 1;
        right_min = right_min.min(x[i]);
    }

    top - left_min.max(right_min)
}

/// Full discrete cross-correlation, `c[k] = Σₙ a[n + k − (m − 1)] · v[n]`.
///
/// The output has `a.len() + v.len() − 1` entries; entry `v.len() − 1` is
/// zero lag.
pub fn correlate_full(a: ArrayView1<'_, f64>, v: ArrayView1<'_, f64>) -> Array1<f64> {
    let (n, m) = (a.len(), v.len());
    if n == 0 || m == 0 {
        return Array1::zeros(0);
    }

    Array1::from_shape_fn(n + m - 1, |k| {
        let lag = k as isize - (m as isize - 1);
        let lo = (-lag).max(0) as usize;
        let hi = (n as isize - lag).min(m as isize) as usize;
        (lo..hi)
            .map(|i| a[(i as isize + lag) as usize] * v[i])
            .sum::<f64>()
    })
}

/// Square wave of `period` samples over `len` samples, high (1) for the
/// first half of each period and low (0) for the second.
pub fn square_wave(len: usize, period: f64) -> Array1<f64> {
    Array1::from_shape_fn(len, |t| {
        let phase = (t as f64 / period).rem_euclid(1.0);
        if phase < 0.5 {
            1.0
        } else {
            0.0
        }
    })
}
