//! Probabilities in the natural-log domain.
//! `LOGZERO` stands for log(0). It absorbs products and is the identity of sums,
//! so none of the functions below ever produce NaN from it.

/// log(0).
pub const LOGZERO: f64 = f64::NEG_INFINITY;

/// Number of values folded into one log-sum-exp in [elnsum].
const BATCH: usize = 1024;

/// Natural logarithm. Zero (and anything below it) maps to [LOGZERO].
pub fn eln(x: f64) -> f64 {
    if 0f64 < x {
        x.ln()
    } else {
        LOGZERO
    }
}

/// Inverse of [eln].
pub fn eexp(x: f64) -> f64 {
    if is_logzero(x) {
        0f64
    } else {
        x.exp()
    }
}

pub fn is_logzero(x: f64) -> bool {
    x == LOGZERO
}

/// log(exp(x) * exp(y)).
pub fn elnproduct(x: f64, y: f64) -> f64 {
    if is_logzero(x) || is_logzero(y) {
        LOGZERO
    } else {
        x + y
    }
}

/// Product of any number of log values.
pub fn elnproducts(xs: &[f64]) -> f64 {
    xs.iter().fold(0f64, |acc, &x| elnproduct(acc, x))
}

/// log(exp(x) + exp(y)), stable for any magnitude.
pub fn elnsum2(x: f64, y: f64) -> f64 {
    if is_logzero(x) {
        y
    } else if is_logzero(y) {
        x
    } else if x > y {
        x + (y - x).exp().ln_1p()
    } else {
        y + (x - y).exp().ln_1p()
    }
}

/// log(exp(x) / exp(y)). Dividing log(0) stays log(0).
pub fn elndivision(x: f64, y: f64) -> f64 {
    if is_logzero(x) {
        LOGZERO
    } else {
        x - y
    }
}

/// Log-sum-exp of a slice, folded in batches of a fixed size so that
/// a long stream is never shifted by a single distant maximum.
pub fn elnsum(xs: &[f64]) -> f64 {
    xs.chunks(BATCH)
        .map(logsumexp)
        .fold(LOGZERO, elnsum2)
}

fn logsumexp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(LOGZERO, f64::max);
    if is_logzero(max) {
        return LOGZERO;
    }
    xs.iter().map(|x| (x - max).exp()).sum::<f64>().ln() + max
}

/// Normalize `row` in place so that it exponentiates to a distribution.
/// Returns the log of the previous total. A row without mass is left untouched.
pub fn normalize(row: &mut [f64]) -> f64 {
    let total = elnsum(row);
    if !is_logzero(total) {
        row.iter_mut().for_each(|x| *x = elndivision(*x, total));
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;
    #[test]
    fn exp_ln_inverse() {
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(4392);
        for _ in 0..1000 {
            let x: f64 = rng.gen_range(f64::MIN_POSITIVE..=1f64);
            assert!((eexp(eln(x)) - x).abs() < 1e-12 * x.max(1e-300), "{}", x);
        }
        assert_eq!(eexp(eln(1f64)), 1f64);
        assert_eq!(eexp(eln(0f64)), 0f64);
    }
    #[test]
    fn sentinel_rules() {
        for &x in &[-1000f64, -3.2, 0f64, 1.5] {
            assert_eq!(elnsum2(LOGZERO, x), x);
            assert_eq!(elnsum2(x, LOGZERO), x);
            assert!(is_logzero(elnproduct(LOGZERO, x)));
            assert!(is_logzero(elnproduct(x, LOGZERO)));
        }
        assert!(is_logzero(elnsum2(LOGZERO, LOGZERO)));
        assert!(is_logzero(elndivision(LOGZERO, -2f64)));
    }
    #[test]
    fn sum_is_commutative_and_stable() {
        let (x, y) = (eln(0.3), eln(0.2));
        assert_eq!(elnsum2(x, y), elnsum2(y, x));
        assert!((eexp(elnsum2(x, y)) - 0.5).abs() < 1e-12);
        // Far below f64 underflow in the linear domain.
        let (x, y) = (-800f64, -800f64);
        assert!((elnsum2(x, y) - (-800f64 + 2f64.ln())).abs() < 1e-9);
        assert!((elnproducts(&[-400f64, -400f64, -400f64]) + 1200f64).abs() < 1e-9);
    }
    #[test]
    fn batched_sum() {
        let xs = vec![eln(1e-3); 3000];
        let total = elnsum(&xs);
        assert!((eexp(total) - 3f64).abs() < 1e-9);
        assert!(is_logzero(elnsum(&[])));
        assert!(is_logzero(elnsum(&[LOGZERO, LOGZERO])));
    }
    #[test]
    fn normalize_row() {
        let mut row = vec![eln(2f64), eln(6f64), LOGZERO];
        normalize(&mut row);
        let probs: Vec<_> = row.iter().map(|&x| eexp(x)).collect();
        assert!((probs[0] - 0.25).abs() < 1e-12);
        assert!((probs[1] - 0.75).abs() < 1e-12);
        assert_eq!(probs[2], 0f64);
        let mut empty = vec![LOGZERO; 3];
        normalize(&mut empty);
        assert!(empty.iter().all(|&x| is_logzero(x)));
    }
}
