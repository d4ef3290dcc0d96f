use log::debug;
use num_complex::Complex;
use rsparse::data::Trpl;
use std::collections::HashMap;

use crate::case::Network;
use crate::error::OpfError;

/// Nodal admittance matrix, dense conductance/susceptance parts.
///
/// Built once per solve from the in-service branches and bus shunts; must be
/// rebuilt after any topology change. Indices are matrix positions, not bus
/// ids (translate through the network's `bus_map`).
#[derive(Debug, Clone)]
pub struct YBus {
    n: usize,
    g: Vec<Vec<f64>>,
    b: Vec<Vec<f64>>,
}

impl YBus {
    /// Assemble the admittance matrix with pi-model branch stamps:
    /// `ys = 1/(r + jx)`, charging split evenly between the two ends, tap
    /// ratio and phase shift on the from side.
    ///
    /// `bus_index` maps the energized buses to matrix rows. A branch whose
    /// endpoint bus is absent from the map but known to the network is
    /// de-energized and skipped; a reference to a bus the network has never
    /// seen is an error.
    pub fn build(net: &Network, bus_index: &HashMap<usize, usize>) -> Result<Self, OpfError> {
        let n = bus_index.len();
        debug!("Assembling {n}x{n} admittance matrix");

        let mut g = Trpl::<f64>::new();
        g.m = n;
        g.n = n;
        let mut b = Trpl::<f64>::new();
        b.m = n;
        b.n = n;

        let mut stamp = |i: usize, j: usize, y: Complex<f64>| {
            g.append(i, j, y.re);
            b.append(i, j, y.im);
        };

        for branch in &net.branches {
            if !branch.branch_status {
                continue;
            }
            if branch.resistance == 0.0 && branch.reactance == 0.0 {
                return Err(OpfError::ZeroImpedance {
                    branch_id: branch.id,
                });
            }

            let locate = |bus_id: usize| -> Result<Option<usize>, OpfError> {
                if let Some(&row) = bus_index.get(&bus_id) {
                    return Ok(Some(row));
                }
                if net.bus_map.contains_key(&bus_id) {
                    Ok(None)
                } else {
                    Err(OpfError::UnknownBus {
                        element: format!("branch {}", branch.id),
                        bus_id,
                    })
                }
            };
            let (i, j) = match (locate(branch.from_bus)?, locate(branch.to_bus)?) {
                (Some(i), Some(j)) => (i, j),
                // an endpoint bus is out of service, the branch carries nothing
                _ => continue,
            };

            let ys = Complex::new(1.0, 0.0) / Complex::new(branch.resistance, branch.reactance);
            let ysh = Complex::new(0.0, branch.charging_b / 2.0);
            let tap = Complex::from_polar(branch.tap_ratio, branch.phase_shift);

            debug!(
                "branch {} stamps {} -> {}  ys={:.6}",
                branch.id, branch.from_bus, branch.to_bus, ys
            );

            stamp(i, i, (ys + ysh) / (tap * tap.conj()));
            stamp(j, j, ys + ysh);
            stamp(i, j, -ys / tap.conj());
            stamp(j, i, -ys / tap);
        }

        // fixed bus shunts land on the diagonal
        for bus in &net.buses {
            if !bus.bus_status || (bus.shunt_gs == 0.0 && bus.shunt_bs == 0.0) {
                continue;
            }
            if let Some(&i) = bus_index.get(&bus.bus_id) {
                stamp(i, i, Complex::new(bus.shunt_gs, bus.shunt_bs));
            }
        }

        g.sum_dupl();
        b.sum_dupl();
        let g = g.to_sprs().to_dense();
        let b = b.to_sprs().to_dense();
        debug!("G=\n{:?}", g);
        debug!("B=\n{:?}", b);

        Ok(Self { n, g, b })
    }

    pub fn n_bus(&self) -> usize {
        self.n
    }

    pub fn g(&self, i: usize, j: usize) -> f64 {
        self.g[i][j]
    }

    pub fn b(&self, i: usize, j: usize) -> f64 {
        self.b[i][j]
    }

    pub fn get(&self, i: usize, j: usize) -> Complex<f64> {
        Complex::new(self.g[i][j], self.b[i][j])
    }
}
