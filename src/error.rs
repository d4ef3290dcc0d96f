use crate::cost::ElementKind;
use thiserror::Error;

/// Model inconsistencies caught before any iteration starts.
///
/// Numerical trouble inside the solve (singular system, iteration limit) is
/// not an error; it is reported as an unconverged solution.
#[derive(Debug, Error)]
pub enum OpfError {
    #[error("network has no buses")]
    EmptyNetwork,

    #[error("network has no in-service external grid")]
    NoExtGrid,

    #[error("{element} references unknown bus {bus_id}")]
    UnknownBus { element: String, bus_id: usize },

    #[error("bus {bus_id} has inverted voltage bounds [{vm_min}, {vm_max}]")]
    InvalidVoltageBounds {
        bus_id: usize,
        vm_min: f64,
        vm_max: f64,
    },

    #[error("{kind} {index} has inverted dispatch bounds [{min}, {max}]")]
    InvalidDispatchBounds {
        kind: ElementKind,
        index: usize,
        min: f64,
        max: f64,
    },

    #[error("in-service branch {branch_id} has zero series impedance")]
    ZeroImpedance { branch_id: usize },

    #[error("duplicate cost specification for {kind} {index}")]
    DuplicateCost { kind: ElementKind, index: usize },

    #[error("cost specification references nonexistent {kind} {index}")]
    DanglingCost { kind: ElementKind, index: usize },
}
