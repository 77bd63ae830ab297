pub mod solver_options;
pub mod ocp_linearizer;
pub mod line_search;
pub mod ocp_solver;
pub mod parnmpc_solver;

use crate::constraints::Constraints;
use crate::error::SolverError;
use crate::impulse::impulse_split_ocp::ImpulseSplitOcp;
use crate::ocp::split_ocp::SplitOcp;
use crate::ocp::terminal_ocp::TerminalOcp;
use crate::robot::RobotModel;

pub use self::ocp_solver::OcpSolver;
pub use self::parnmpc_solver::ParnmpcSolver;
pub use self::solver_options::SolverOptions;

/// Per-sub-interval work units of the whole horizon; slot layout mirrors the
/// data containers.
pub struct OcpStages<R: RobotModel> {
    pub stages: Vec<SplitOcp<R>>,
    pub terminal: TerminalOcp<R>,
    pub impulse: Vec<ImpulseSplitOcp<R>>,
    pub aux: Vec<SplitOcp<R>>,
    pub lift: Vec<SplitOcp<R>>,
}

impl<R: RobotModel> OcpStages<R> {
    pub fn new(
        robot: &R,
        constraints: &Constraints,
        baumgarte_time_step: f64,
        n: usize,
        max_num_impulse: usize,
    ) -> Result<Self, SolverError> {
        let mut stages = Vec::with_capacity(n);
        for _ in 0..n {
            stages.push(SplitOcp::new(robot, constraints, baumgarte_time_step)?);
        }
        let mut aux = Vec::with_capacity(max_num_impulse);
        let mut lift = Vec::with_capacity(max_num_impulse);
        let mut impulse = Vec::with_capacity(max_num_impulse);
        for _ in 0..max_num_impulse {
            aux.push(SplitOcp::new(robot, constraints, baumgarte_time_step)?);
            lift.push(SplitOcp::new(robot, constraints, baumgarte_time_step)?);
            impulse.push(ImpulseSplitOcp::new(robot, constraints));
        }
        Ok(Self {
            stages,
            terminal: TerminalOcp::new(robot),
            impulse,
            aux,
            lift,
        })
    }
}
