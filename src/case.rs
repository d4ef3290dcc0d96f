use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::cost::{ElementKind, PolyCost};

/// Network bus (electrical node).
///
/// Voltage magnitude and angle are solved by the OPF engine and reported in
/// the solution; the bus itself only carries the operating band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bus {
    // Identifiers
    pub bus_id: usize,
    pub bus_name: String,
    pub nom_voltage: f64, // kV
    pub bus_status: bool,

    // Fixed shunt, p.u. on system base
    pub shunt_gs: f64,
    pub shunt_bs: f64,

    // Voltage magnitude limits, p.u.
    pub vm_min: f64,
    pub vm_max: f64,
}

impl Bus {
    pub fn new(bus_id: usize, bus_name: String, nom_voltage: f64) -> Self {
        Self {
            bus_id,
            bus_name,
            nom_voltage,
            bus_status: true,
            shunt_gs: 0.0,
            shunt_bs: 0.0,
            vm_min: 0.9,
            vm_max: 1.05,
        }
    }
}

impl fmt::Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bus {:>3} {:<14} {:>8.2} kV  Vm=[{:.3}, {:.3}]",
            self.bus_id, self.bus_name, self.nom_voltage, self.vm_min, self.vm_max
        )
    }
}

/// Fixed load (withdrawal) at a bus. Never a decision variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Load {
    pub load_id: usize,
    pub bus_id: usize,
    pub load_name: String,

    pub p_mw: f64,
    pub q_mvar: f64,
}

impl Load {
    pub fn new(load_id: usize, bus_id: usize, load_name: String, p_mw: f64, q_mvar: f64) -> Self {
        Self {
            load_id,
            bus_id,
            load_name,
            p_mw,
            q_mvar,
        }
    }
}

impl fmt::Display for Load {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Load {:>3} {:<14} Bus {:>3}  P={:>9.3} MW  Q={:>9.3} MVAR",
            self.load_id, self.load_name, self.bus_id, self.p_mw, self.q_mvar
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BranchKind {
    Line,
    TwoWinding,
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchKind::Line => write!(f, "Line"),
            BranchKind::TwoWinding => write!(f, "Xfmr"),
        }
    }
}

/// Series branch (line or two-winding transformer), pi-model.
///
/// Impedances are in p.u. on the system base; `charging_b` is the total line
/// charging susceptance, split evenly between the two ends. A `rating_mva`
/// of zero means the branch carries no thermal limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    // Identifiers
    pub kind: BranchKind,
    pub id: usize,
    pub from_bus: usize,
    pub to_bus: usize,
    pub branch_name: String,
    pub branch_status: bool,

    // Impedance data, p.u.
    pub resistance: f64,
    pub reactance: f64,
    pub charging_b: f64,

    // Transformer data
    pub tap_ratio: f64,
    pub phase_shift: f64,

    // Thermal limit
    pub rating_mva: f64,
    pub max_loading_percent: f64,
}

impl Branch {
    pub fn new(
        id: usize,
        from_bus: usize,
        to_bus: usize,
        kind: BranchKind,
        resistance: f64,
        reactance: f64,
    ) -> Self {
        Self {
            id,
            from_bus,
            to_bus,
            kind,
            branch_name: String::new(),
            branch_status: true,
            resistance,
            reactance,
            charging_b: 0.0,
            tap_ratio: 1.0,
            phase_shift: 0.0,
            rating_mva: 0.0,
            max_loading_percent: 100.0,
        }
    }

    /// Apparent-power bound in MVA, or zero if the branch is unrated.
    pub fn thermal_bound_mva(&self) -> f64 {
        if self.rating_mva > 0.0 {
            self.rating_mva * self.max_loading_percent / 100.0
        } else {
            0.0
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Type: {:<4} Id: {:>3} From->To: {:>3} -> {:<3}  R={:>10.6}  X={:>10.6}  Tap={:.4}  Rate={:>7.1} MVA",
            self.kind,
            self.id,
            self.from_bus,
            self.to_bus,
            self.resistance,
            self.reactance,
            self.tap_ratio,
            self.rating_mva,
        )
    }
}

/// Rotating generator. When `controllable` the OPF dispatches P and Q inside
/// the bounds; otherwise the setpoint is folded into the fixed bus injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generator {
    // Identifiers
    pub gen_id: usize,
    pub bus_id: usize,
    pub gen_name: String,
    pub gen_status: bool,
    pub controllable: bool,

    // Setpoints (fixed injection when not controllable), positive = generation
    pub p_mw: f64,
    pub q_mvar: f64,

    // Dispatch limits
    pub p_min: f64,
    pub p_max: f64,
    pub q_min: f64,
    pub q_max: f64,
}

impl Generator {
    pub fn new(gen_id: usize, bus_id: usize, gen_name: String) -> Self {
        Self {
            gen_id,
            bus_id,
            gen_name,
            gen_status: true,
            controllable: true,
            p_mw: 0.0,
            q_mvar: 0.0,
            p_min: 0.0,
            p_max: 0.0,
            q_min: 0.0,
            q_max: 0.0,
        }
    }
}

impl fmt::Display for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Gen {:>3} {:<14} Bus {:>3}  P=[{:>8.2}, {:>8.2}] MW  Q=[{:>8.2}, {:>8.2}] MVAR  {}",
            self.gen_id,
            self.gen_name,
            self.bus_id,
            self.p_min,
            self.p_max,
            self.q_min,
            self.q_max,
            if self.controllable { "ctrl" } else { "fixed" },
        )
    }
}

/// Static generator (converter-interfaced unit). Same dispatch contract as
/// `Generator`; kept as a separate table so cost specifications can key on
/// the element kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticGenerator {
    pub sgen_id: usize,
    pub bus_id: usize,
    pub sgen_name: String,
    pub sgen_status: bool,
    pub controllable: bool,

    pub p_mw: f64,
    pub q_mvar: f64,

    pub p_min: f64,
    pub p_max: f64,
    pub q_min: f64,
    pub q_max: f64,
}

impl StaticGenerator {
    pub fn new(sgen_id: usize, bus_id: usize, sgen_name: String) -> Self {
        Self {
            sgen_id,
            bus_id,
            sgen_name,
            sgen_status: true,
            controllable: true,
            p_mw: 0.0,
            q_mvar: 0.0,
            p_min: 0.0,
            p_max: 0.0,
            q_min: 0.0,
            q_max: 0.0,
        }
    }
}

impl fmt::Display for StaticGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sgen {:>3} {:<14} Bus {:>3}  P=[{:>8.2}, {:>8.2}] MW  Q=[{:>8.2}, {:>8.2}] MVAR  {}",
            self.sgen_id,
            self.sgen_name,
            self.bus_id,
            self.p_min,
            self.p_max,
            self.q_min,
            self.q_max,
            if self.controllable { "ctrl" } else { "fixed" },
        )
    }
}

/// External grid connection. Always a decision element; the first in-service
/// external grid fixes the angle reference of the solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtGrid {
    pub ext_id: usize,
    pub bus_id: usize,
    pub ext_name: String,
    pub ext_status: bool,

    pub p_min: f64,
    pub p_max: f64,
    pub q_min: f64,
    pub q_max: f64,
}

impl ExtGrid {
    pub fn new(ext_id: usize, bus_id: usize, ext_name: String) -> Self {
        Self {
            ext_id,
            bus_id,
            ext_name,
            ext_status: true,
            p_min: -1.0e6,
            p_max: 1.0e6,
            q_min: -1.0e6,
            q_max: 1.0e6,
        }
    }
}

impl fmt::Display for ExtGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExtGrid {:>3} {:<14} Bus {:>3}",
            self.ext_id, self.ext_name, self.bus_id
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub case_name: String,
    pub s_base: f64, // MVA
    pub frequency: f64,

    pub buses: Vec<Bus>,
    pub branches: Vec<Branch>,
    pub loads: Vec<Load>,
    pub generators: Vec<Generator>,
    pub static_generators: Vec<StaticGenerator>,
    pub ext_grids: Vec<ExtGrid>,
    pub poly_costs: Vec<PolyCost>,
    #[serde(skip)]
    pub bus_map: HashMap<usize, usize>, // bus_id -> matrix index
}

impl Network {
    pub fn new(case_name: String, s_base: f64, frequency: f64) -> Self {
        Self {
            case_name,
            s_base,
            frequency,
            buses: Vec::new(),
            branches: Vec::new(),
            loads: Vec::new(),
            generators: Vec::new(),
            static_generators: Vec::new(),
            ext_grids: Vec::new(),
            poly_costs: Vec::new(),
            bus_map: HashMap::new(),
        }
    }

    /// Rebuild bus_map from the current bus list (must be called after any
    /// bus change; the `add_*` helpers do this automatically).
    pub fn rebuild_bus_map(&mut self) {
        self.bus_map.clear();
        for (matrix_idx, bus) in self.buses.iter().enumerate() {
            self.bus_map.insert(bus.bus_id, matrix_idx);
        }
    }

    pub fn add_bus(&mut self, name: &str, nom_voltage: f64, vm_min: f64, vm_max: f64) -> usize {
        let bus_id = self.buses.len();
        let mut bus = Bus::new(bus_id, name.to_string(), nom_voltage);
        bus.vm_min = vm_min;
        bus.vm_max = vm_max;
        self.buses.push(bus);
        self.rebuild_bus_map();
        bus_id
    }

    pub fn add_line(&mut self, from_bus: usize, to_bus: usize, r: f64, x: f64, b: f64) -> usize {
        let id = self.branches.len();
        let mut branch = Branch::new(id, from_bus, to_bus, BranchKind::Line, r, x);
        branch.charging_b = b;
        self.branches.push(branch);
        id
    }

    pub fn add_transformer(
        &mut self,
        from_bus: usize,
        to_bus: usize,
        r: f64,
        x: f64,
        tap_ratio: f64,
        phase_shift: f64,
    ) -> usize {
        let id = self.branches.len();
        let mut branch = Branch::new(id, from_bus, to_bus, BranchKind::TwoWinding, r, x);
        branch.tap_ratio = tap_ratio;
        branch.phase_shift = phase_shift;
        self.branches.push(branch);
        id
    }

    pub fn add_load(&mut self, bus_id: usize, p_mw: f64, q_mvar: f64) -> usize {
        let id = self.loads.len();
        self.loads
            .push(Load::new(id, bus_id, format!("load {id}"), p_mw, q_mvar));
        id
    }

    pub fn add_generator(
        &mut self,
        bus_id: usize,
        p_bounds: (f64, f64),
        q_bounds: (f64, f64),
    ) -> usize {
        let id = self.generators.len();
        let mut generator = Generator::new(id, bus_id, format!("gen {id}"));
        (generator.p_min, generator.p_max) = p_bounds;
        (generator.q_min, generator.q_max) = q_bounds;
        self.generators.push(generator);
        id
    }

    pub fn add_static_generator(
        &mut self,
        bus_id: usize,
        p_bounds: (f64, f64),
        q_bounds: (f64, f64),
    ) -> usize {
        let id = self.static_generators.len();
        let mut sgen = StaticGenerator::new(id, bus_id, format!("sgen {id}"));
        (sgen.p_min, sgen.p_max) = p_bounds;
        (sgen.q_min, sgen.q_max) = q_bounds;
        self.static_generators.push(sgen);
        id
    }

    pub fn add_ext_grid(&mut self, bus_id: usize) -> usize {
        let id = self.ext_grids.len();
        self.ext_grids
            .push(ExtGrid::new(id, bus_id, format!("ext grid {id}")));
        id
    }

    /// Attach a polynomial cost specification to one controllable element.
    /// Coefficient index is the power: `[c0, c1, c2, ...]`.
    pub fn add_poly_cost(
        &mut self,
        element: ElementKind,
        element_index: usize,
        p_coeffs: Vec<f64>,
        q_coeffs: Vec<f64>,
    ) -> usize {
        let id = self.poly_costs.len();
        self.poly_costs.push(PolyCost {
            element,
            element_index,
            p_coeffs,
            q_coeffs,
        });
        id
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Case: {}  Sbase: {} MVA  Frequency: {} Hz",
            self.case_name, self.s_base, self.frequency
        )?;
        writeln!(
            f,
            "{} buses, {} loads, {} generators, {} static generators, {} ext grids, {} branches, {} cost specs\n",
            self.buses.len(),
            self.loads.len(),
            self.generators.len(),
            self.static_generators.len(),
            self.ext_grids.len(),
            self.branches.len(),
            self.poly_costs.len(),
        )?;

        writeln!(f, "=== Buses ===")?;
        for bus in &self.buses {
            writeln!(f, "  {}", bus)?;
        }

        writeln!(f, "\n=== Loads ===")?;
        for load in &self.loads {
            writeln!(f, "  {}", load)?;
        }

        writeln!(f, "\n=== Generators ===")?;
        for generator in &self.generators {
            writeln!(f, "  {}", generator)?;
        }

        if !self.static_generators.is_empty() {
            writeln!(f, "\n=== Static Generators ===")?;
            for sgen in &self.static_generators {
                writeln!(f, "  {}", sgen)?;
            }
        }

        writeln!(f, "\n=== External Grids ===")?;
        for ext in &self.ext_grids {
            writeln!(f, "  {}", ext)?;
        }

        writeln!(f, "\n=== Branches ===")?;
        for branch in &self.branches {
            writeln!(f, "  {}", branch)?;
        }

        if !self.poly_costs.is_empty() {
            writeln!(f, "\n=== Cost Specifications ===")?;
            for cost in &self.poly_costs {
                writeln!(f, "  {}", cost)?;
            }
        }

        Ok(())
    }
}
