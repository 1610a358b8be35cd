use std::f64::consts::PI;

/// Regularizer added to the expansion when dividing its derivative by it.
pub const SCORE_DENOMINATOR_EPS: f64 = 1e-4;

// Series terms whose Gaussian weight is below e^-60 are dropped.
const MAX_EXPONENT: f64 = 60.0;

#[inline]
fn term_weight(l: f64, sigma: f64) -> f64 {
    (2.0 * l + 1.0) * (-l * (l + 1.0) * sigma * sigma / 2.0).exp()
}

/// Number of series terms that contribute at this noise level, capped at `max_terms`.
pub fn effective_terms(sigma: f64, max_terms: usize) -> usize {
    let needed = ((2.0 * MAX_EXPONENT).sqrt() / sigma).ceil();
    if needed.is_finite() && needed < max_terms as f64 {
        needed as usize + 1
    } else {
        max_terms
    }
}

/// Truncated series of the IGSO(3) density in the rotation angle `omega`, up to normalization.
pub fn expansion(omega: f64, sigma: f64, max_terms: usize) -> f64 {
    let lo = (omega / 2.0).sin();
    (0..effective_terms(sigma, max_terms))
        .map(|l| {
            let l = l as f64;
            term_weight(l, sigma) * ((l + 0.5) * omega).sin() / lo
        })
        .sum()
}

/// Density of the rotation angle, i.e. the expansion times the Haar measure on angles.
pub fn marginal_density(expansion: f64, omega: f64) -> f64 {
    expansion * (1.0 - omega.cos()) / PI
}

/// `d/dω log f(ω)` of the expansion, evaluated from the series and its value.
pub fn score(expansion: f64, omega: f64, sigma: f64, max_terms: usize) -> f64 {
    let lo = (omega / 2.0).sin();
    let dlo = 0.5 * (omega / 2.0).cos();
    let derivative: f64 = (0..effective_terms(sigma, max_terms))
        .map(|l| {
            let l = l as f64;
            let hi = ((l + 0.5) * omega).sin();
            let dhi = (l + 0.5) * ((l + 0.5) * omega).cos();
            term_weight(l, sigma) * (lo * dhi - hi * dlo) / (lo * lo)
        })
        .sum();
    derivative / (expansion + SCORE_DENOMINATOR_EPS)
}
