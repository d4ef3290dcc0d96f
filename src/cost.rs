use serde::{Deserialize, Serialize};
use std::fmt;

/// Element kind a cost specification can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Gen,
    Sgen,
    ExtGrid,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Gen => write!(f, "gen"),
            ElementKind::Sgen => write!(f, "sgen"),
            ElementKind::ExtGrid => write!(f, "ext_grid"),
        }
    }
}

/// Polynomial cost specification for one controllable element.
///
/// Coefficient index is the power of the dispatch value, so
/// `p_coeffs = [c0, c1, c2]` means `c0 + c1*P + c2*P^2`. Any degree is
/// accepted; P and Q costs are independent polynomials. Costs are evaluated
/// on the signed dispatch value, never its magnitude.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolyCost {
    pub element: ElementKind,
    pub element_index: usize,
    pub p_coeffs: Vec<f64>,
    pub q_coeffs: Vec<f64>,
}

impl fmt::Display for PolyCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PolyCost {:>8} {:>3}  cp={:?}  cq={:?}",
            self.element, self.element_index, self.p_coeffs, self.q_coeffs
        )
    }
}

impl PolyCost {
    pub fn p_cost(&self, p: f64) -> f64 {
        poly_eval(&self.p_coeffs, p)
    }

    pub fn q_cost(&self, q: f64) -> f64 {
        poly_eval(&self.q_coeffs, q)
    }
}

/// Evaluate `c0 + c1*v + c2*v^2 + ...` (Horner form). Empty list is zero.
pub fn poly_eval(coeffs: &[f64], v: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * v + c)
}

/// First derivative `c1 + 2*c2*v + 3*c3*v^2 + ...` (marginal cost).
pub fn poly_deriv(coeffs: &[f64], v: f64) -> f64 {
    coeffs
        .iter()
        .enumerate()
        .skip(1)
        .rev()
        .fold(0.0, |acc, (k, c)| acc * v + k as f64 * c)
}

/// Second derivative `2*c2 + 6*c3*v + ...` (cost curvature).
pub fn poly_deriv2(coeffs: &[f64], v: f64) -> f64 {
    coeffs
        .iter()
        .enumerate()
        .skip(2)
        .rev()
        .fold(0.0, |acc, (k, c)| acc * v + (k * (k - 1)) as f64 * c)
}

/// Cost entry resolved for one decision element. Elements without a cost
/// specification get empty coefficient lists and contribute zero.
#[derive(Debug, Clone, Default)]
pub struct ElementCost {
    pub p_coeffs: Vec<f64>,
    pub q_coeffs: Vec<f64>,
}

impl ElementCost {
    pub fn value(&self, p: f64, q: f64) -> f64 {
        poly_eval(&self.p_coeffs, p) + poly_eval(&self.q_coeffs, q)
    }

    pub fn p_marginal(&self, p: f64) -> f64 {
        poly_deriv(&self.p_coeffs, p)
    }

    pub fn q_marginal(&self, q: f64) -> f64 {
        poly_deriv(&self.q_coeffs, q)
    }

    pub fn p_curvature(&self, p: f64) -> f64 {
        poly_deriv2(&self.p_coeffs, p)
    }

    pub fn q_curvature(&self, q: f64) -> f64 {
        poly_deriv2(&self.q_coeffs, q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_polynomial_is_zero() {
        assert_eq!(poly_eval(&[], 17.0), 0.0);
        assert_eq!(poly_deriv(&[], 17.0), 0.0);
        assert_eq!(poly_deriv2(&[5.0], 17.0), 0.0);
    }

    #[test]
    fn quadratic_evaluation() {
        // 2 + 3P + 0.5P^2 at P = 4
        let c = [2.0, 3.0, 0.5];
        assert!((poly_eval(&c, 4.0) - 22.0).abs() < 1e-12);
        assert!((poly_deriv(&c, 4.0) - 7.0).abs() < 1e-12);
        assert!((poly_deriv2(&c, 4.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cubic_evaluation_is_generic() {
        // degree above 2 must work without special handling
        let c = [0.0, 0.0, 0.0, 2.0];
        assert!((poly_eval(&c, 3.0) - 54.0).abs() < 1e-12);
        assert!((poly_deriv(&c, 3.0) - 54.0).abs() < 1e-12);
        assert!((poly_deriv2(&c, 3.0) - 36.0).abs() < 1e-12);
    }

    #[test]
    fn signed_dispatch_matters() {
        // linear term flips sign with the dispatch direction,
        // quadratic term does not
        let lin = [0.0, 2.0];
        let quad = [0.0, 0.0, 2.0];
        assert_eq!(poly_eval(&lin, -5.0), -10.0);
        assert_eq!(poly_eval(&quad, -5.0), 50.0);
        assert_eq!(poly_eval(&quad, 5.0), 50.0);
    }

    #[test]
    fn element_cost_sums_p_and_q() {
        let cost = ElementCost {
            p_coeffs: vec![0.0, 1.0],
            q_coeffs: vec![0.0, 0.0, 1.0],
        };
        assert!((cost.value(10.0, -3.0) - 19.0).abs() < 1e-12);
    }
}
