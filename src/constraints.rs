use log::debug;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use std::collections::{HashMap, HashSet};

use crate::case::Network;
use crate::cost::{ElementCost, ElementKind};
use crate::error::OpfError;
use crate::ybus::YBus;

/// One controllable unit in the decision set. Bounds are in p.u. on the
/// system base; `bus` is the matrix index of the attachment bus.
#[derive(Debug, Clone)]
pub struct DecisionElement {
    pub kind: ElementKind,
    pub index: usize,
    pub bus: usize,
    pub bus_id: usize,
    pub p_min: f64,
    pub p_max: f64,
    pub q_min: f64,
    pub q_max: f64,
    pub cost: ElementCost,
}

/// In-service branch prepared for flow evaluation: the four pi-model
/// admittance blocks plus the apparent-power bound (zero = unlimited).
#[derive(Debug, Clone)]
pub struct OpfBranch {
    pub id: usize,
    pub from: usize,
    pub to: usize,
    pub y_ff: Complex<f64>,
    pub y_ft: Complex<f64>,
    pub y_tf: Complex<f64>,
    pub y_tt: Complex<f64>,
    pub s_max_pu: f64,
}

/// The assembled nonlinear program.
///
/// Decision vector layout: `[V | theta | P | Q]` with `n_bus` voltage
/// magnitudes, `n_bus` angles, then one P and one Q column per decision
/// element, everything in p.u. Equality rows: `n_bus` real balances,
/// `n_bus` reactive balances, one reference-angle row.
#[derive(Debug, Clone)]
pub struct OpfProblem {
    pub n_bus: usize,
    pub n_elem: usize,
    pub s_base: f64,
    pub ref_bus: usize,

    pub th_off: usize,
    pub p_off: usize,
    pub q_off: usize,

    pub ybus: YBus,
    pub elements: Vec<DecisionElement>,
    pub branches: Vec<OpfBranch>,
    pub bus_ids: Vec<usize>,

    // net fixed withdrawal per bus, p.u. (loads minus uncontrolled injection)
    pub p_fixed: Vec<f64>,
    pub q_fixed: Vec<f64>,

    pub lb: DVector<f64>,
    pub ub: DVector<f64>,
}

impl OpfProblem {
    pub fn from_network(net: &Network) -> Result<Self, OpfError> {
        // matrix rows cover the energized buses only
        let mut bus_index: HashMap<usize, usize> = HashMap::new();
        let mut bus_ids = Vec::new();
        for bus in net.buses.iter().filter(|b| b.bus_status) {
            if bus.vm_min <= 0.0 || bus.vm_min > bus.vm_max {
                return Err(OpfError::InvalidVoltageBounds {
                    bus_id: bus.bus_id,
                    vm_min: bus.vm_min,
                    vm_max: bus.vm_max,
                });
            }
            bus_index.insert(bus.bus_id, bus_ids.len());
            bus_ids.push(bus.bus_id);
        }
        if bus_ids.is_empty() {
            return Err(OpfError::EmptyNetwork);
        }
        let n = bus_ids.len();

        // `None` means the bus exists but is out of service; anything
        // attached to it drops out of the problem
        let locate = |element: String, bus_id: usize| -> Result<Option<usize>, OpfError> {
            if let Some(&row) = bus_index.get(&bus_id) {
                return Ok(Some(row));
            }
            if net.bus_map.contains_key(&bus_id) {
                Ok(None)
            } else {
                Err(OpfError::UnknownBus { element, bus_id })
            }
        };

        let sb = net.s_base;
        let mut elements = Vec::new();
        let mut p_fixed = vec![0.0; n];
        let mut q_fixed = vec![0.0; n];

        // decision set: ext grids first, then generators, then static
        // generators; uncontrolled units fold into the fixed injection
        for ext in &net.ext_grids {
            if !ext.ext_status {
                continue;
            }
            let Some(bus) = locate(format!("ext grid {}", ext.ext_id), ext.bus_id)? else {
                continue;
            };
            check_bounds(ElementKind::ExtGrid, ext.ext_id, ext.p_min, ext.p_max)?;
            check_bounds(ElementKind::ExtGrid, ext.ext_id, ext.q_min, ext.q_max)?;
            elements.push(DecisionElement {
                kind: ElementKind::ExtGrid,
                index: ext.ext_id,
                bus,
                bus_id: ext.bus_id,
                p_min: ext.p_min / sb,
                p_max: ext.p_max / sb,
                q_min: ext.q_min / sb,
                q_max: ext.q_max / sb,
                cost: ElementCost::default(),
            });
        }
        let ref_bus = match elements.first() {
            Some(slack) => slack.bus,
            None => return Err(OpfError::NoExtGrid),
        };

        for generator in &net.generators {
            if !generator.gen_status {
                continue;
            }
            let Some(bus) = locate(format!("gen {}", generator.gen_id), generator.bus_id)? else {
                continue;
            };
            if !generator.controllable {
                p_fixed[bus] -= generator.p_mw / sb;
                q_fixed[bus] -= generator.q_mvar / sb;
                continue;
            }
            check_bounds(ElementKind::Gen, generator.gen_id, generator.p_min, generator.p_max)?;
            check_bounds(ElementKind::Gen, generator.gen_id, generator.q_min, generator.q_max)?;
            elements.push(DecisionElement {
                kind: ElementKind::Gen,
                index: generator.gen_id,
                bus,
                bus_id: generator.bus_id,
                p_min: generator.p_min / sb,
                p_max: generator.p_max / sb,
                q_min: generator.q_min / sb,
                q_max: generator.q_max / sb,
                cost: ElementCost::default(),
            });
        }

        for sgen in &net.static_generators {
            if !sgen.sgen_status {
                continue;
            }
            let Some(bus) = locate(format!("sgen {}", sgen.sgen_id), sgen.bus_id)? else {
                continue;
            };
            if !sgen.controllable {
                p_fixed[bus] -= sgen.p_mw / sb;
                q_fixed[bus] -= sgen.q_mvar / sb;
                continue;
            }
            check_bounds(ElementKind::Sgen, sgen.sgen_id, sgen.p_min, sgen.p_max)?;
            check_bounds(ElementKind::Sgen, sgen.sgen_id, sgen.q_min, sgen.q_max)?;
            elements.push(DecisionElement {
                kind: ElementKind::Sgen,
                index: sgen.sgen_id,
                bus,
                bus_id: sgen.bus_id,
                p_min: sgen.p_min / sb,
                p_max: sgen.p_max / sb,
                q_min: sgen.q_min / sb,
                q_max: sgen.q_max / sb,
                cost: ElementCost::default(),
            });
        }

        for load in &net.loads {
            let Some(bus) = locate(format!("load {}", load.load_id), load.bus_id)? else {
                continue;
            };
            p_fixed[bus] += load.p_mw / sb;
            q_fixed[bus] += load.q_mvar / sb;
        }

        // resolve cost specifications onto the decision set, rejecting
        // duplicate and dangling keys
        let mut seen = HashSet::new();
        for spec in &net.poly_costs {
            let key = (spec.element, spec.element_index);
            if !seen.insert(key) {
                return Err(OpfError::DuplicateCost {
                    kind: spec.element,
                    index: spec.element_index,
                });
            }
            let slot = elements
                .iter_mut()
                .find(|e| e.kind == spec.element && e.index == spec.element_index);
            match slot {
                Some(element) => {
                    element.cost = ElementCost {
                        p_coeffs: spec.p_coeffs.clone(),
                        q_coeffs: spec.q_coeffs.clone(),
                    };
                }
                None => {
                    // a cost on a unit outside the decision set (uncontrolled
                    // or on a dead bus) is inert; a cost on a unit the
                    // network has never seen is an error
                    let exists = match spec.element {
                        ElementKind::Gen => spec.element_index < net.generators.len(),
                        ElementKind::Sgen => spec.element_index < net.static_generators.len(),
                        ElementKind::ExtGrid => spec.element_index < net.ext_grids.len(),
                    };
                    if !exists {
                        return Err(OpfError::DanglingCost {
                            kind: spec.element,
                            index: spec.element_index,
                        });
                    }
                }
            }
        }

        let ybus = YBus::build(net, &bus_index)?;

        let branches = net
            .branches
            .iter()
            .filter(|br| {
                br.branch_status
                    && bus_index.contains_key(&br.from_bus)
                    && bus_index.contains_key(&br.to_bus)
            })
            .map(|br| {
                let ys = Complex::new(1.0, 0.0) / Complex::new(br.resistance, br.reactance);
                let ysh = Complex::new(0.0, br.charging_b / 2.0);
                let tap = Complex::from_polar(br.tap_ratio, br.phase_shift);
                OpfBranch {
                    id: br.id,
                    from: bus_index[&br.from_bus],
                    to: bus_index[&br.to_bus],
                    y_ff: (ys + ysh) / (tap * tap.conj()),
                    y_ft: -ys / tap.conj(),
                    y_tf: -ys / tap,
                    y_tt: ys + ysh,
                    s_max_pu: br.thermal_bound_mva() / sb,
                }
            })
            .collect::<Vec<_>>();

        let m = elements.len();
        let n_var = 2 * n + 2 * m;
        let mut lb = DVector::from_element(n_var, f64::NEG_INFINITY);
        let mut ub = DVector::from_element(n_var, f64::INFINITY);
        for (i, bus) in net.buses.iter().filter(|b| b.bus_status).enumerate() {
            lb[i] = bus.vm_min;
            ub[i] = bus.vm_max;
            lb[n + i] = -std::f64::consts::FRAC_PI_2;
            ub[n + i] = std::f64::consts::FRAC_PI_2;
        }
        for (e, elem) in elements.iter().enumerate() {
            lb[2 * n + e] = elem.p_min;
            ub[2 * n + e] = elem.p_max;
            lb[2 * n + m + e] = elem.q_min;
            ub[2 * n + m + e] = elem.q_max;
        }

        debug!(
            "assembled problem: {} buses, {} decision elements, {} variables",
            n, m, n_var
        );

        Ok(Self {
            n_bus: n,
            n_elem: m,
            s_base: sb,
            ref_bus,
            th_off: n,
            p_off: 2 * n,
            q_off: 2 * n + m,
            ybus,
            elements,
            branches,
            bus_ids,
            p_fixed,
            q_fixed,
            lb,
            ub,
        })
    }

    pub fn n_var(&self) -> usize {
        2 * self.n_bus + 2 * self.n_elem
    }

    pub fn n_eq(&self) -> usize {
        2 * self.n_bus + 1
    }

    /// Flat start: unity voltage clamped into the bus band, zero angles,
    /// dispatch at the bound midpoint.
    pub fn initial_point(&self) -> DVector<f64> {
        let mut x = DVector::zeros(self.n_var());
        for i in 0..self.n_bus {
            x[i] = 1.0_f64.clamp(self.lb[i], self.ub[i]);
        }
        for e in 0..self.n_elem {
            x[self.p_off + e] = 0.5 * (self.lb[self.p_off + e] + self.ub[self.p_off + e]);
            x[self.q_off + e] = 0.5 * (self.lb[self.q_off + e] + self.ub[self.q_off + e]);
        }
        x
    }

    /// Total cost in currency units, dispatch converted to MW/MVAr since
    /// cost coefficients live in the MW domain.
    pub fn objective(&self, x: &DVector<f64>) -> f64 {
        self.elements
            .iter()
            .enumerate()
            .map(|(e, elem)| {
                elem.cost.value(
                    x[self.p_off + e] * self.s_base,
                    x[self.q_off + e] * self.s_base,
                )
            })
            .sum()
    }

    pub fn objective_gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut grad = DVector::zeros(self.n_var());
        for (e, elem) in self.elements.iter().enumerate() {
            grad[self.p_off + e] =
                elem.cost.p_marginal(x[self.p_off + e] * self.s_base) * self.s_base;
            grad[self.q_off + e] =
                elem.cost.q_marginal(x[self.q_off + e] * self.s_base) * self.s_base;
        }
        grad
    }

    /// Diagonal of the objective Hessian (the cost separates per variable).
    pub fn objective_curvature(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut curv = DVector::zeros(self.n_var());
        let sb2 = self.s_base * self.s_base;
        for (e, elem) in self.elements.iter().enumerate() {
            curv[self.p_off + e] = elem.cost.p_curvature(x[self.p_off + e] * self.s_base) * sb2;
            curv[self.q_off + e] = elem.cost.q_curvature(x[self.q_off + e] * self.s_base) * sb2;
        }
        curv
    }

    /// Complex power flowing into the network at bus `i` for the voltage
    /// state in `x`, p.u.
    pub fn power_injection(&self, x: &DVector<f64>, i: usize) -> (f64, f64) {
        let n = self.n_bus;
        let vi = x[i];
        let thi = x[n + i];
        let mut p = 0.0;
        let mut q = 0.0;
        for j in 0..n {
            let g = self.ybus.g(i, j);
            let b = self.ybus.b(i, j);
            if g == 0.0 && b == 0.0 {
                continue;
            }
            let dth = thi - x[n + j];
            let (sin, cos) = dth.sin_cos();
            p += vi * x[j] * (g * cos + b * sin);
            q += vi * x[j] * (g * sin - b * cos);
        }
        (p, q)
    }

    /// Residuals of the power balance equations plus the reference-angle row.
    /// A zero vector means the voltage state and the dispatch agree at every
    /// bus.
    pub fn equality_constraints(&self, x: &DVector<f64>) -> DVector<f64> {
        let n = self.n_bus;
        let mut r = DVector::zeros(self.n_eq());
        for i in 0..n {
            let (p, q) = self.power_injection(x, i);
            r[i] = p + self.p_fixed[i];
            r[n + i] = q + self.q_fixed[i];
        }
        for (e, elem) in self.elements.iter().enumerate() {
            r[elem.bus] -= x[self.p_off + e];
            r[n + elem.bus] -= x[self.q_off + e];
        }
        r[2 * n] = x[self.th_off + self.ref_bus];
        r
    }

    /// Analytic Jacobian of `equality_constraints`, dense.
    pub fn equality_jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let n = self.n_bus;
        let mut jac = DMatrix::zeros(self.n_eq(), self.n_var());

        for i in 0..n {
            let (p_i, q_i) = self.power_injection(x, i);
            let vi = x[i];
            let thi = x[n + i];
            for j in 0..n {
                let g = self.ybus.g(i, j);
                let b = self.ybus.b(i, j);
                if i == j {
                    jac[(i, n + i)] = -q_i - b * vi * vi;
                    jac[(i, i)] = (p_i + g * vi * vi) / vi;
                    jac[(n + i, n + i)] = p_i - g * vi * vi;
                    jac[(n + i, i)] = (q_i - b * vi * vi) / vi;
                } else {
                    if g == 0.0 && b == 0.0 {
                        continue;
                    }
                    let vj = x[j];
                    let dth = thi - x[n + j];
                    let (sin, cos) = dth.sin_cos();
                    jac[(i, n + j)] = vi * vj * (g * sin - b * cos);
                    jac[(i, j)] = vi * (g * cos + b * sin);
                    jac[(n + i, n + j)] = -vi * vj * (g * cos + b * sin);
                    jac[(n + i, j)] = vi * (g * sin - b * cos);
                }
            }
        }

        for (e, elem) in self.elements.iter().enumerate() {
            jac[(elem.bus, self.p_off + e)] = -1.0;
            jac[(n + elem.bus, self.q_off + e)] = -1.0;
        }
        jac[(2 * n, self.th_off + self.ref_bus)] = 1.0;
        jac
    }

    fn bus_voltage(&self, x: &DVector<f64>, i: usize) -> Complex<f64> {
        Complex::from_polar(x[i], x[self.th_off + i])
    }

    /// Complex power entering the branch at the from end, p.u.
    pub fn branch_flow_from(&self, x: &DVector<f64>, br: &OpfBranch) -> Complex<f64> {
        let vf = self.bus_voltage(x, br.from);
        let vt = self.bus_voltage(x, br.to);
        vf * (br.y_ff * vf + br.y_ft * vt).conj()
    }

    /// Complex power entering the branch at the to end, p.u.
    pub fn branch_flow_to(&self, x: &DVector<f64>, br: &OpfBranch) -> Complex<f64> {
        let vf = self.bus_voltage(x, br.from);
        let vt = self.bus_voltage(x, br.to);
        vt * (br.y_tf * vf + br.y_tt * vt).conj()
    }

    /// Worst apparent-power overload across rated branches, p.u. (zero when
    /// every rated branch is within its bound).
    pub fn max_thermal_violation(&self, x: &DVector<f64>) -> f64 {
        let mut worst: f64 = 0.0;
        for br in &self.branches {
            if br.s_max_pu <= 0.0 {
                continue;
            }
            let sf = self.branch_flow_from(x, br).norm();
            let st = self.branch_flow_to(x, br).norm();
            worst = worst.max(sf - br.s_max_pu).max(st - br.s_max_pu);
        }
        worst
    }
}

fn check_bounds(kind: ElementKind, index: usize, min: f64, max: f64) -> Result<(), OpfError> {
    if min > max {
        return Err(OpfError::InvalidDispatchBounds {
            kind,
            index,
            min,
            max,
        });
    }
    Ok(())
}
