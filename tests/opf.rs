//! End-to-end OPF scenarios on a two-bus case: slack at bus 0, dispatchable
//! units and a 20 MW load at bus 1.

use hornet::solver::Termination;
use hornet::{run_opf, ElementKind, Network, OpfError, SolveOptions};

fn two_bus_net() -> Network {
    let mut net = Network::new("two bus".to_string(), 100.0, 50.0);
    net.add_bus("slack", 110.0, 0.95, 1.05);
    net.add_bus("plant", 110.0, 0.95, 1.05);
    net.add_line(0, 1, 0.01, 0.05, 0.0);
    net.add_ext_grid(0);
    net.add_load(1, 20.0, 0.0);
    net
}

#[test]
fn linear_p_cost_equals_dispatch() {
    let mut net = two_bus_net();
    let generator = net.add_generator(1, (5.0, 150.0), (-50.0, 50.0));
    net.add_poly_cost(ElementKind::Gen, generator, vec![0.0, 1.0], vec![]);

    let sol = run_opf(&net, &SolveOptions::default()).unwrap();
    assert!(sol.converged);

    let (p, _) = sol.dispatch(ElementKind::Gen, generator).unwrap();
    // the slack is free, so the costed unit rides its lower bound
    assert!((p - 5.0).abs() < 0.5, "p = {p}");
    assert!((sol.total_cost.unwrap() - p).abs() < 1e-9);
}

#[test]
fn quadratic_p_cost_equals_squared_dispatch() {
    let mut net = two_bus_net();
    let generator = net.add_generator(1, (5.0, 150.0), (-50.0, 50.0));
    net.add_poly_cost(ElementKind::Gen, generator, vec![0.0, 0.0, 1.0], vec![]);

    let sol = run_opf(&net, &SolveOptions::default()).unwrap();
    assert!(sol.converged);

    let (p, _) = sol.dispatch(ElementKind::Gen, generator).unwrap();
    assert!((p - 5.0).abs() < 0.5, "p = {p}");
    assert!((sol.total_cost.unwrap() - p * p).abs() < 1e-9);
}

#[test]
fn coefficient_update_between_solves_is_honored() {
    let mut net = two_bus_net();
    let generator = net.add_generator(1, (5.0, 150.0), (-50.0, 50.0));
    let spec = net.add_poly_cost(ElementKind::Gen, generator, vec![0.0, 1.0], vec![]);

    let first = run_opf(&net, &SolveOptions::default()).unwrap();
    let (p1, _) = first.dispatch(ElementKind::Gen, generator).unwrap();
    assert!((first.total_cost.unwrap() - p1).abs() < 1e-9);

    net.poly_costs[spec].p_coeffs = vec![0.0, 0.0, 1.0];
    let second = run_opf(&net, &SolveOptions::default()).unwrap();
    let (p2, _) = second.dispatch(ElementKind::Gen, generator).unwrap();
    assert!((second.total_cost.unwrap() - p2 * p2).abs() < 1e-9);
}

#[test]
fn two_costed_units_superpose() {
    let mut net = two_bus_net();
    let generator = net.add_generator(1, (5.0, 150.0), (-50.0, 50.0));
    let sgen = net.add_static_generator(1, (2.0, 80.0), (-30.0, 30.0));
    net.add_poly_cost(ElementKind::Gen, generator, vec![0.0, 1.0], vec![]);
    net.add_poly_cost(ElementKind::Sgen, sgen, vec![0.0, 1.0], vec![]);

    let sol = run_opf(&net, &SolveOptions::default()).unwrap();
    assert!(sol.converged);

    let (p_gen, _) = sol.dispatch(ElementKind::Gen, generator).unwrap();
    let (p_sgen, _) = sol.dispatch(ElementKind::Sgen, sgen).unwrap();
    assert!((sol.total_cost.unwrap() - (p_gen + p_sgen)).abs() < 1e-9);
}

#[test]
fn reactive_cost_is_sign_sensitive() {
    let mut net = two_bus_net();
    let sgen = net.add_static_generator(1, (0.0, 0.0), (-50.0, -10.0));
    net.add_poly_cost(ElementKind::Sgen, sgen, vec![], vec![0.0, 0.0, 1.0]);

    let sol = run_opf(&net, &SolveOptions::default()).unwrap();
    assert!(sol.converged);

    // the unit must absorb at least 10 MVAr; the quadratic cost drives it
    // to the smallest magnitude, and the cost of negative Q stays positive
    let (_, q) = sol.dispatch(ElementKind::Sgen, sgen).unwrap();
    assert!((q + 10.0).abs() < 0.5, "q = {q}");
    let cost = sol.total_cost.unwrap();
    assert!(cost > 0.0);
    assert!((cost - q * q).abs() < 1e-9);
}

#[test]
fn evaluation_is_idempotent() {
    let mut net = two_bus_net();
    let generator = net.add_generator(1, (5.0, 150.0), (-50.0, 50.0));
    net.add_poly_cost(ElementKind::Gen, generator, vec![0.0, 1.0], vec![]);

    let a = run_opf(&net, &SolveOptions::default()).unwrap();
    let b = run_opf(&net, &SolveOptions::default()).unwrap();
    assert_eq!(a.total_cost, b.total_cost);
    assert_eq!(
        a.dispatch(ElementKind::Gen, generator),
        b.dispatch(ElementKind::Gen, generator)
    );
}

#[test]
fn interior_optimum_is_found() {
    let mut net = two_bus_net();
    let generator = net.add_generator(1, (5.0, 150.0), (-50.0, 50.0));
    // marginal cost 2p - 60 vanishes at 30 MW, inside the bounds
    net.add_poly_cost(ElementKind::Gen, generator, vec![0.0, -60.0, 1.0], vec![]);

    let sol = run_opf(&net, &SolveOptions::default()).unwrap();
    assert!(sol.converged);

    let (p, _) = sol.dispatch(ElementKind::Gen, generator).unwrap();
    assert!((p - 30.0).abs() < 1.0, "p = {p}");
    assert!((sol.total_cost.unwrap() - (p * p - 60.0 * p)).abs() < 1e-9);
}

#[test]
fn dispatch_clamps_to_upper_bound() {
    let mut net = two_bus_net();
    // same cost as the interior case, but the 30 MW optimum is now outside
    let generator = net.add_generator(1, (5.0, 20.0), (-50.0, 50.0));
    net.add_poly_cost(ElementKind::Gen, generator, vec![0.0, -60.0, 1.0], vec![]);

    let sol = run_opf(&net, &SolveOptions::default()).unwrap();
    assert!(sol.converged);

    let (p, _) = sol.dispatch(ElementKind::Gen, generator).unwrap();
    assert!((p - 20.0).abs() < 0.5, "p = {p}");
    assert!(p <= 20.0 + 1e-9);
}

#[test]
fn solved_voltages_respect_bus_bands() {
    let mut net = two_bus_net();
    let generator = net.add_generator(1, (5.0, 150.0), (-50.0, 50.0));
    net.add_poly_cost(ElementKind::Gen, generator, vec![0.0, 1.0], vec![]);

    let sol = run_opf(&net, &SolveOptions::default()).unwrap();
    assert!(sol.converged);

    for bus in &sol.buses {
        assert!(bus.vm_pu >= 0.95 - 1e-9 && bus.vm_pu <= 1.05 + 1e-9);
    }
    // slack plus generator cover the load and the losses
    let injected: f64 = sol.elements.iter().map(|e| e.p_mw).sum();
    assert!(injected >= 20.0 - 0.1);
    assert!(injected <= 21.0);
}

#[test]
fn uncosted_unit_contributes_zero() {
    let mut net = two_bus_net();
    let generator = net.add_generator(1, (5.0, 150.0), (-50.0, 50.0));
    let sgen = net.add_static_generator(1, (2.0, 80.0), (-30.0, 30.0));
    net.add_poly_cost(ElementKind::Sgen, sgen, vec![0.0, 1.0], vec![]);

    let sol = run_opf(&net, &SolveOptions::default()).unwrap();
    assert!(sol.converged);

    // only the sgen carries a cost; the gen dispatches for free
    let (p_sgen, _) = sol.dispatch(ElementKind::Sgen, sgen).unwrap();
    assert!((sol.total_cost.unwrap() - p_sgen).abs() < 1e-9);
    assert!(sol.dispatch(ElementKind::Gen, generator).is_some());
}

#[test]
fn rated_branch_reports_loading_within_limit() {
    let mut net = two_bus_net();
    let generator = net.add_generator(1, (5.0, 150.0), (-50.0, 50.0));
    net.add_poly_cost(ElementKind::Gen, generator, vec![0.0, 1.0], vec![]);
    net.branches[0].rating_mva = 100.0;

    let sol = run_opf(&net, &SolveOptions::default()).unwrap();
    assert!(sol.converged);

    assert_eq!(sol.branches.len(), 1);
    let br = &sol.branches[0];
    // ~15 MW flows from the slack to cover the load remainder
    assert!(br.loading_percent > 1.0);
    assert!(br.loading_percent < 100.0);
    assert!(br.p_from_mw > 10.0);
}

#[test]
fn binding_thermal_limit_forces_redispatch() {
    let mut net = two_bus_net();
    let generator = net.add_generator(1, (0.0, 150.0), (-50.0, 50.0));
    net.add_poly_cost(ElementKind::Gen, generator, vec![0.0, 1.0], vec![]);
    // without the rating the costed unit would sit at zero and the slack
    // would push all 20 MW across the line
    net.branches[0].rating_mva = 10.0;

    let opts = SolveOptions {
        tolerance: 1e-5,
        max_iterations: 400,
        verbose: false,
    };
    let sol = run_opf(&net, &opts).unwrap();
    assert!(sol.converged);

    let (p, _) = sol.dispatch(ElementKind::Gen, generator).unwrap();
    assert!(p > 8.5, "p = {p}");
    assert!(p < 13.0, "p = {p}");

    let br = &sol.branches[0];
    assert!(br.loading_percent > 90.0, "loading = {}", br.loading_percent);
    assert!(br.loading_percent < 110.0, "loading = {}", br.loading_percent);
    assert!((sol.total_cost.unwrap() - p).abs() < 1e-9);
}

#[test]
fn exhausted_budget_reports_divergence_without_results() {
    let mut net = two_bus_net();
    let generator = net.add_generator(1, (5.0, 150.0), (-50.0, 50.0));
    net.add_poly_cost(ElementKind::Gen, generator, vec![0.0, 1.0], vec![]);

    let opts = SolveOptions {
        tolerance: 1e-12,
        max_iterations: 3,
        verbose: false,
    };
    let sol = run_opf(&net, &opts).unwrap();
    assert!(!sol.converged);
    assert_eq!(sol.termination, Termination::IterationLimit);
    assert!(sol.total_cost.is_none());
    assert!(sol.elements.is_empty());
    assert!(sol.buses.is_empty());
}

#[test]
fn model_errors_surface_before_iteration() {
    // dangling cost specification
    let mut net = two_bus_net();
    net.add_generator(1, (5.0, 150.0), (-50.0, 50.0));
    net.add_poly_cost(ElementKind::Gen, 7, vec![0.0, 1.0], vec![]);
    assert!(matches!(
        run_opf(&net, &SolveOptions::default()),
        Err(OpfError::DanglingCost { .. })
    ));

    // inverted dispatch bounds
    let mut net = two_bus_net();
    net.add_generator(1, (150.0, 5.0), (-50.0, 50.0));
    assert!(matches!(
        run_opf(&net, &SolveOptions::default()),
        Err(OpfError::InvalidDispatchBounds { .. })
    ));

    // no external grid at all
    let mut net = two_bus_net();
    net.add_generator(1, (5.0, 150.0), (-50.0, 50.0));
    net.ext_grids.clear();
    assert!(matches!(
        run_opf(&net, &SolveOptions::default()),
        Err(OpfError::NoExtGrid)
    ));
}
