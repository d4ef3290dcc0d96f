//! hornet — nonlinear AC optimal power flow.
//!
//! Build a [`Network`] with the `add_*` helpers, attach polynomial cost
//! specifications to the controllable elements, then call [`run_opf`] to get
//! a minimum-cost feasible dispatch with bus voltages and branch flows.

pub mod case;
pub mod constraints;
pub mod cost;
pub mod error;
pub mod results;
pub mod solver;
pub mod ybus;

pub use case::Network;
pub use cost::ElementKind;
pub use error::OpfError;
pub use results::OpfSolution;
pub use solver::{run_opf, SolveOptions, SolverState, Termination};
