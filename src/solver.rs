use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::case::Network;
use crate::constraints::OpfProblem;
use crate::error::OpfError;
use crate::results::{self, OpfSolution};

/// Knobs for one solve. Verbosity only changes what gets logged.
#[derive(Debug, Clone)]
pub struct SolveOptions {
    pub tolerance: f64,
    pub max_iterations: usize,
    pub verbose: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            max_iterations: 100,
            verbose: false,
        }
    }
}

/// Lifecycle of a solve. Every run starts in `Initialized` and ends in
/// exactly one of the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolverState {
    Initialized,
    Iterating,
    Converged,
    Diverged,
}

/// Why the iteration stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    Converged,
    IterationLimit,
    NumericalFailure,
}

pub(crate) struct SolveOutcome {
    pub x: DVector<f64>,
    pub termination: Termination,
    pub iterations: usize,
}

const MU_INITIAL: f64 = 1.0e3;
const MU_GROWTH: f64 = 10.0;
const PENALTY_STAGES: usize = 8;
const ARMIJO_C: f64 = 1.0e-4;
const MAX_BACKTRACKS: usize = 12;

// Levenberg-Marquardt damping, relative to the Hessian diagonal scale
const LAMBDA_INITIAL: f64 = 1.0e-3;
const LAMBDA_MIN: f64 = 1.0e-10;
const LAMBDA_MAX: f64 = 1.0e10;
const LAMBDA_GROWTH: f64 = 10.0;
const LAMBDA_SHRINK: f64 = 0.25;

/// Solve the OPF for a network: assemble, iterate, evaluate.
///
/// Model inconsistencies return `Err` before any iteration. Non-convergence
/// is not an error; it comes back as an `OpfSolution` with the convergence
/// flag down and no cost or result records.
pub fn run_opf(net: &Network, opts: &SolveOptions) -> Result<OpfSolution, OpfError> {
    let problem = OpfProblem::from_network(net)?;
    let outcome = solve(&problem, opts);
    Ok(results::evaluate(&problem, &outcome))
}

fn solve(problem: &OpfProblem, opts: &SolveOptions) -> SolveOutcome {
    let mut state = SolverState::Initialized;
    let mut x = problem.initial_point();
    let mut iterations = 0usize;
    info!(
        "solver {state:?}: {} variables, {} equality rows, tol {:.1e}",
        problem.n_var(),
        problem.n_eq(),
        opts.tolerance
    );

    let mut mu = MU_INITIAL;
    for stage in 0..PENALTY_STAGES {
        state = SolverState::Iterating;
        let mut lambda = LAMBDA_INITIAL;
        debug!("penalty stage {stage}: mu = {mu:.1e}");

        loop {
            if iterations >= opts.max_iterations {
                state = SolverState::Diverged;
                info!("iteration limit {} reached ({state:?})", opts.max_iterations);
                return SolveOutcome {
                    x,
                    termination: Termination::IterationLimit,
                    iterations,
                };
            }
            iterations += 1;

            let residual = problem.equality_constraints(&x);
            let jac = problem.equality_jacobian(&x);
            let grad = penalty_gradient(problem, &x, &residual, &jac, mu);
            let phi = penalty_value(problem, &x, &residual, mu);

            if !phi.is_finite() {
                state = SolverState::Diverged;
                info!("non-finite penalty value at iteration {iterations} ({state:?})");
                return SolveOutcome {
                    x,
                    termination: Termination::NumericalFailure,
                    iterations,
                };
            }

            // Gauss-Newton model of the penalized objective. A linear cost
            // leaves the objective without curvature, so the model is
            // singular along the constraint null space; the LM damping term
            // carries the step size there and adapts to the local scale.
            let base: DMatrix<f64> = (2.0 * mu) * (jac.transpose() * &jac);
            let curv = problem.objective_curvature(&x);
            let mut scale = 1.0f64;
            for k in 0..problem.n_var() {
                scale = scale.max(base[(k, k)] + curv[k].max(0.0));
            }

            let mut accepted = None;
            let mut solved_once = false;
            while lambda <= LAMBDA_MAX {
                let mut hess = base.clone();
                for k in 0..problem.n_var() {
                    hess[(k, k)] += curv[k].max(0.0) + lambda * scale;
                }
                let step = match hess.lu().solve(&(-&grad)) {
                    Some(d) if d.iter().all(|v| v.is_finite()) => d,
                    _ => {
                        lambda *= LAMBDA_GROWTH;
                        continue;
                    }
                };
                solved_once = true;

                // backtracking line search on the projected step
                let slope = grad.dot(&step);
                let mut alpha = 1.0;
                for _ in 0..MAX_BACKTRACKS {
                    let trial = project_onto_bounds(problem, &x + alpha * &step);
                    let trial_res = problem.equality_constraints(&trial);
                    let trial_phi = penalty_value(problem, &trial, &trial_res, mu);
                    if trial_phi.is_finite()
                        && trial_phi <= phi + ARMIJO_C * alpha * slope.min(0.0)
                    {
                        accepted = Some((trial, trial_phi));
                        break;
                    }
                    alpha *= 0.5;
                }
                if accepted.is_some() {
                    lambda = (lambda * LAMBDA_SHRINK).max(LAMBDA_MIN);
                    break;
                }
                lambda *= LAMBDA_GROWTH;
            }

            if !solved_once {
                state = SolverState::Diverged;
                info!("linear system singular at every damping level, iteration {iterations} ({state:?})");
                return SolveOutcome {
                    x,
                    termination: Termination::NumericalFailure,
                    iterations,
                };
            }

            let Some((next, next_phi)) = accepted else {
                debug!("no acceptable step at stage {stage}, escalating penalty");
                break;
            };

            let step_norm = (&next - &x).norm();
            if opts.verbose {
                debug!(
                    "iter {iterations}: phi {phi:.6e} -> {next_phi:.6e}, step {step_norm:.3e}"
                );
            }
            x = next;

            if step_norm < 1e-10 {
                break;
            }
        }

        let residual = problem.equality_constraints(&x);
        let infeasibility = residual
            .iter()
            .fold(0.0f64, |acc, r| acc.max(r.abs()))
            .max(problem.max_thermal_violation(&x));
        debug!("stage {stage} done: infeasibility {infeasibility:.3e}");
        if infeasibility <= opts.tolerance {
            state = SolverState::Converged;
            info!("converged after {iterations} iterations (state {state:?})");
            return SolveOutcome {
                x,
                termination: Termination::Converged,
                iterations,
            };
        }
        mu *= MU_GROWTH;
    }

    info!("penalty schedule exhausted without reaching tolerance ({state:?})");
    SolveOutcome {
        x,
        termination: Termination::IterationLimit,
        iterations,
    }
}

/// Penalized objective: cost plus quadratic penalties on the power-balance
/// residuals and on apparent-power overloads at both branch ends.
fn penalty_value(problem: &OpfProblem, x: &DVector<f64>, residual: &DVector<f64>, mu: f64) -> f64 {
    problem.objective(x) + mu * residual.norm_squared() + mu * thermal_penalty(problem, x)
}

fn thermal_penalty(problem: &OpfProblem, x: &DVector<f64>) -> f64 {
    let mut total = 0.0;
    for br in &problem.branches {
        if br.s_max_pu <= 0.0 {
            continue;
        }
        let cap = br.s_max_pu * br.s_max_pu;
        let over_f = (problem.branch_flow_from(x, br).norm_sqr() - cap).max(0.0);
        let over_t = (problem.branch_flow_to(x, br).norm_sqr() - cap).max(0.0);
        total += over_f * over_f + over_t * over_t;
    }
    total
}

fn penalty_gradient(
    problem: &OpfProblem,
    x: &DVector<f64>,
    residual: &DVector<f64>,
    jac: &DMatrix<f64>,
    mu: f64,
) -> DVector<f64> {
    let mut grad = problem.objective_gradient(x) + (2.0 * mu) * (jac.transpose() * residual);

    // overload penalty touches only the voltage state at the branch ends;
    // differentiate those four coordinates numerically per violated branch
    let h = 1e-7;
    for br in &problem.branches {
        if br.s_max_pu <= 0.0 {
            continue;
        }
        let cap = br.s_max_pu * br.s_max_pu;
        let active = problem.branch_flow_from(x, br).norm_sqr() > cap
            || problem.branch_flow_to(x, br).norm_sqr() > cap;
        if !active {
            continue;
        }
        let coords = [
            br.from,
            br.to,
            problem.th_off + br.from,
            problem.th_off + br.to,
        ];
        let mut xp = x.clone();
        for k in coords {
            let orig = xp[k];
            xp[k] = orig + h;
            let fwd = branch_penalty(problem, &xp, br, cap);
            xp[k] = orig - h;
            let bwd = branch_penalty(problem, &xp, br, cap);
            xp[k] = orig;
            grad[k] += mu * (fwd - bwd) / (2.0 * h);
        }
    }
    grad
}

fn branch_penalty(
    problem: &OpfProblem,
    x: &DVector<f64>,
    br: &crate::constraints::OpfBranch,
    cap: f64,
) -> f64 {
    let over_f = (problem.branch_flow_from(x, br).norm_sqr() - cap).max(0.0);
    let over_t = (problem.branch_flow_to(x, br).norm_sqr() - cap).max(0.0);
    over_f * over_f + over_t * over_t
}

fn project_onto_bounds(problem: &OpfProblem, mut x: DVector<f64>) -> DVector<f64> {
    for k in 0..x.len() {
        x[k] = x[k].clamp(problem.lb[k], problem.ub[k]);
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::Network;
    use crate::cost::ElementKind;

    fn two_bus_net() -> Network {
        let mut net = Network::new("solver test".to_string(), 100.0, 50.0);
        net.add_bus("slack", 110.0, 0.95, 1.05);
        net.add_bus("gen", 110.0, 0.95, 1.05);
        net.add_line(0, 1, 0.01, 0.05, 0.0);
        net.add_ext_grid(0);
        net.add_generator(1, (5.0, 150.0), (-50.0, 50.0));
        net.add_load(1, 20.0, 0.0);
        net
    }

    #[test]
    fn converges_on_two_bus_case() {
        let mut net = two_bus_net();
        net.add_poly_cost(ElementKind::Gen, 0, vec![0.0, 1.0], vec![]);
        let sol = run_opf(&net, &SolveOptions::default()).unwrap();
        assert!(sol.converged);
        assert_eq!(sol.termination, Termination::Converged);
        assert!(sol.iterations > 0);
    }

    #[test]
    fn zero_curvature_objective_still_converges() {
        // no cost specs at all: the objective contributes nothing to the
        // Hessian, and the damping has to carry the step size
        let net = two_bus_net();
        let sol = run_opf(&net, &SolveOptions::default()).unwrap();
        assert!(sol.converged);
        assert_eq!(sol.total_cost, Some(0.0));
    }

    #[test]
    fn projection_keeps_dispatch_inside_bounds() {
        let net = two_bus_net();
        let problem = OpfProblem::from_network(&net).unwrap();
        let mut x = problem.initial_point();
        x[problem.p_off] = 1.0e9;
        x[0] = 0.0;
        let projected = project_onto_bounds(&problem, x);
        assert!(projected[problem.p_off] <= problem.ub[problem.p_off]);
        assert!((projected[0] - 0.95).abs() < 1e-12);
    }

    #[test]
    fn tiny_iteration_budget_diverges() {
        let mut net = two_bus_net();
        net.add_poly_cost(ElementKind::Gen, 0, vec![0.0, 1.0], vec![]);
        let opts = SolveOptions {
            tolerance: 1e-12,
            max_iterations: 2,
            verbose: false,
        };
        let sol = run_opf(&net, &opts).unwrap();
        assert!(!sol.converged);
        assert_eq!(sol.termination, Termination::IterationLimit);
    }

    #[test]
    fn repeated_solves_are_deterministic() {
        let mut net = two_bus_net();
        net.add_poly_cost(ElementKind::Gen, 0, vec![0.0, 1.0], vec![]);
        let a = run_opf(&net, &SolveOptions::default()).unwrap();
        let b = run_opf(&net, &SolveOptions::default()).unwrap();
        assert_eq!(a.total_cost, b.total_cost);
        assert_eq!(a.iterations, b.iterations);
    }
}
