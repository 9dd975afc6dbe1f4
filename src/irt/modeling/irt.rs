//! 3PL scoring primitives.
//!
//! P(θ) = c + (1 - c) / (1 + e^(-D·a·(θ - b))), D = 1.702
//!
//! D rescales the logistic curve onto the normal ogive. It and the 0.25
//! multiple-choice guessing floor stay fixed until recalibrated against data.

use crate::irt::types::ItemParams;

pub const LOGISTIC_SCALE: f64 = 1.702;
const EPSILON: f64 = 1e-12;

pub fn probability(theta: f64, a: f64, b: f64, c: f64) -> f64 {
    let z = LOGISTIC_SCALE * a * (theta - b);
    c + (1.0 - c) / (1.0 + (-z).exp())
}

/// Item information at θ for the 3PL curve:
/// I(θ) = D²a² · (Q/P) · ((P - c) / (1 - c))²
pub fn fisher_information(theta: f64, a: f64, b: f64, c: f64) -> f64 {
    let p = probability(theta, a, b, c);
    if p <= EPSILON || (1.0 - c) <= EPSILON {
        return 0.0;
    }
    let q = 1.0 - p;
    let ratio = (p - c) / (1.0 - c);
    (LOGISTIC_SCALE * a).powi(2) * (q / p) * ratio * ratio
}

pub fn item_probability(theta: f64, item: &ItemParams) -> f64 {
    probability(
        theta,
        item.discrimination,
        item.difficulty,
        item.resolved_guessing(),
    )
}

pub fn item_information(theta: f64, item: &ItemParams) -> f64 {
    fisher_information(
        theta,
        item.discrimination,
        item.difficulty,
        item.resolved_guessing(),
    )
}

/// Mean probability of a correct answer over a set of items.
pub fn expected_score<'a>(theta: f64, items: impl IntoIterator<Item = &'a ItemParams>) -> Option<f64> {
    let mut total = 0.0;
    let mut count = 0usize;
    for item in items {
        total += item_probability(theta, item);
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(total / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probability_range() {
        for theta in [-3.0, -1.0, 0.0, 1.0, 3.0] {
            for b in [-3.0, -1.0, 0.0, 1.0, 3.0] {
                for a in [0.5, 1.0, 2.5] {
                    for c in [0.0, 0.25] {
                        let p = probability(theta, a, b, c);
                        assert!(p >= c && p <= 1.0, "p={p} theta={theta} a={a} b={b} c={c}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_probability_at_difficulty_is_midpoint() {
        let p = probability(0.7, 1.3, 0.7, 0.25);
        assert!((p - 0.625).abs() < 1e-12);
        let p_free = probability(-1.0, 2.0, -1.0, 0.0);
        assert!((p_free - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_higher_ability_higher_probability() {
        let p1 = probability(0.0, 1.0, 0.0, 0.25);
        let p2 = probability(1.0, 1.0, 0.0, 0.25);
        assert!(p2 > p1);
    }

    #[test]
    fn test_information_peaks_near_difficulty() {
        let near = fisher_information(0.1, 1.5, 0.0, 0.0);
        let far = fisher_information(2.5, 1.5, 0.0, 0.0);
        assert!(near > far);
        assert!(far >= 0.0);
    }

    #[test]
    fn test_information_grows_with_discrimination() {
        let low = fisher_information(0.0, 0.5, 0.0, 0.25);
        let high = fisher_information(0.0, 2.0, 0.0, 0.25);
        assert!(high > low);
    }

    #[test]
    fn test_two_pl_information_matches_closed_form() {
        let (theta, a, b) = (0.4, 1.2, -0.3);
        let p = probability(theta, a, b, 0.0);
        let expected = (LOGISTIC_SCALE * a).powi(2) * p * (1.0 - p);
        assert!((fisher_information(theta, a, b, 0.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_expected_score_empty() {
        assert_eq!(expected_score(0.0, std::iter::empty()), None);
        let items = [ItemParams::new(1.0, -2.0, 0.25), ItemParams::new(1.0, 2.0, 0.25)];
        let score = expected_score(0.0, items.iter()).unwrap();
        assert!(score > 0.25 && score < 1.0);
    }
}
