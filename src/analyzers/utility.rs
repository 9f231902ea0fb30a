/// Arithmetic mean, or `None` for empty input.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// `part` as a percentage of `total`; 0 when `total` is 0.
pub fn pct(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Key with the largest value; the first key wins ties. NaN values are skipped.
pub fn arg_max<K: Clone>(pairs: impl IntoIterator<Item = (K, f64)>) -> Option<(K, f64)> {
    let mut best: Option<(K, f64)> = None;
    for (key, value) in pairs {
        if value.is_nan() {
            continue;
        }
        match &best {
            Some((_, current)) if value <= *current => {}
            _ => best = Some((key, value)),
        }
    }
    best
}
