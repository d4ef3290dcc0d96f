use serde::Serialize;
use std::fmt;

use crate::constraints::OpfProblem;
use crate::cost::ElementKind;
use crate::solver::{SolveOutcome, Termination};

/// Solved dispatch of one decision element, MW/MVAr.
#[derive(Debug, Clone, Serialize)]
pub struct ElementResult {
    pub element: ElementKind,
    pub index: usize,
    pub bus_id: usize,
    pub p_mw: f64,
    pub q_mvar: f64,
}

impl fmt::Display for ElementResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>8} {:>3}  Bus {:>3}  P={:>10.4} MW  Q={:>10.4} MVAR",
            self.element, self.index, self.bus_id, self.p_mw, self.q_mvar
        )
    }
}

/// Solved voltage at one bus.
#[derive(Debug, Clone, Serialize)]
pub struct BusResult {
    pub bus_id: usize,
    pub vm_pu: f64,
    pub va_degree: f64,
}

impl fmt::Display for BusResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bus {:>3}  Vm={:>7.4} pu  Va={:>8.3} deg",
            self.bus_id, self.vm_pu, self.va_degree
        )
    }
}

/// Power flow on one branch. `loading_percent` is apparent power at the
/// heavier end relative to the thermal bound, zero for unrated branches.
#[derive(Debug, Clone, Serialize)]
pub struct BranchResult {
    pub branch_id: usize,
    pub p_from_mw: f64,
    pub q_from_mvar: f64,
    pub p_to_mw: f64,
    pub q_to_mvar: f64,
    pub loading_percent: f64,
}

impl fmt::Display for BranchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Branch {:>3}  Pf={:>10.4} MW  Qf={:>10.4} MVAR  Pt={:>10.4} MW  Qt={:>10.4} MVAR  {:>6.1} %",
            self.branch_id,
            self.p_from_mw,
            self.q_from_mvar,
            self.p_to_mw,
            self.q_to_mvar,
            self.loading_percent
        )
    }
}

/// Outcome of one solve. Result tables and the total cost are only present
/// when the solver converged; an unconverged run carries just the failure
/// signal.
#[derive(Debug, Clone, Serialize)]
pub struct OpfSolution {
    pub converged: bool,
    pub termination: Termination,
    pub iterations: usize,
    pub total_cost: Option<f64>,
    pub elements: Vec<ElementResult>,
    pub buses: Vec<BusResult>,
    pub branches: Vec<BranchResult>,
}

impl OpfSolution {
    /// Dispatch of one element as `(p_mw, q_mvar)`, if solved.
    pub fn dispatch(&self, kind: ElementKind, index: usize) -> Option<(f64, f64)> {
        self.elements
            .iter()
            .find(|e| e.element == kind && e.index == index)
            .map(|e| (e.p_mw, e.q_mvar))
    }
}

impl fmt::Display for OpfSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "OPF {:?} after {} iterations",
            self.termination, self.iterations
        )?;
        if let Some(cost) = self.total_cost {
            writeln!(f, "Total cost: {cost:.6}")?;
        }
        if !self.elements.is_empty() {
            writeln!(f, "\n=== Dispatch ===")?;
            for elem in &self.elements {
                writeln!(f, "  {}", elem)?;
            }
        }
        if !self.buses.is_empty() {
            writeln!(f, "\n=== Bus Voltages ===")?;
            for bus in &self.buses {
                writeln!(f, "  {}", bus)?;
            }
        }
        if !self.branches.is_empty() {
            writeln!(f, "\n=== Branch Flows ===")?;
            for branch in &self.branches {
                writeln!(f, "  {}", branch)?;
            }
        }
        Ok(())
    }
}

/// Map a solve outcome back onto the network: dispatch records in MW, bus
/// voltages in p.u./degrees, branch flows, and the total cost recomputed
/// from the dispatch through the same cost entries the objective used.
pub(crate) fn evaluate(problem: &OpfProblem, outcome: &SolveOutcome) -> OpfSolution {
    let converged = outcome.termination == Termination::Converged;
    if !converged {
        return OpfSolution {
            converged,
            termination: outcome.termination,
            iterations: outcome.iterations,
            total_cost: None,
            elements: Vec::new(),
            buses: Vec::new(),
            branches: Vec::new(),
        };
    }

    let x = &outcome.x;
    let sb = problem.s_base;

    let elements: Vec<ElementResult> = problem
        .elements
        .iter()
        .enumerate()
        .map(|(e, elem)| ElementResult {
            element: elem.kind,
            index: elem.index,
            bus_id: elem.bus_id,
            p_mw: x[problem.p_off + e] * sb,
            q_mvar: x[problem.q_off + e] * sb,
        })
        .collect();

    let total_cost = problem
        .elements
        .iter()
        .zip(&elements)
        .map(|(elem, rec)| elem.cost.value(rec.p_mw, rec.q_mvar))
        .sum();

    let buses = (0..problem.n_bus)
        .map(|i| BusResult {
            bus_id: problem.bus_ids[i],
            vm_pu: x[i],
            va_degree: x[problem.th_off + i].to_degrees(),
        })
        .collect();

    let branches = problem
        .branches
        .iter()
        .map(|br| {
            let sf = problem.branch_flow_from(x, br);
            let st = problem.branch_flow_to(x, br);
            let loading = if br.s_max_pu > 0.0 {
                100.0 * sf.norm().max(st.norm()) / br.s_max_pu
            } else {
                0.0
            };
            BranchResult {
                branch_id: br.id,
                p_from_mw: sf.re * sb,
                q_from_mvar: sf.im * sb,
                p_to_mw: st.re * sb,
                q_to_mvar: st.im * sb,
                loading_percent: loading,
            }
        })
        .collect();

    OpfSolution {
        converged,
        termination: outcome.termination,
        iterations: outcome.iterations,
        total_cost: Some(total_cost),
        elements,
        buses,
        branches,
    }
}
