pub mod split_kkt_matrix;
pub mod split_kkt_residual;
pub mod split_solution;
pub mod split_direction;
pub mod state_equation;
pub mod contact_dynamics;
pub mod unconstrained_dynamics;
pub mod split_ocp;
pub mod terminal_ocp;

use crate::impulse::impulse_split_direction::ImpulseSplitDirection;
use crate::impulse::impulse_split_kkt::{ImpulseSplitKktMatrix, ImpulseSplitKktResidual};
use crate::impulse::impulse_split_solution::ImpulseSplitSolution;
use crate::robot::RobotModel;

pub use self::split_direction::SplitDirection;
pub use self::split_kkt_matrix::SplitKktMatrix;
pub use self::split_kkt_residual::SplitKktResidual;
pub use self::split_solution::SplitSolution;

/// Hybrid container over the whole horizon: `N+1` ordinary slots plus
/// `max_num_impulse`-sized impulse/aux/lift slot vectors. All buffers are
/// allocated at construction; event edits only change which slots are used.
#[derive(Debug, Clone)]
pub struct Solution {
    pub stages: Vec<SplitSolution>,
    pub impulse: Vec<ImpulseSplitSolution>,
    pub aux: Vec<SplitSolution>,
    pub lift: Vec<SplitSolution>,
}

impl Solution {
    pub fn new<R: RobotModel>(robot: &R, n: usize, max_num_impulse: usize) -> Self {
        Self {
            stages: (0..=n).map(|_| SplitSolution::new(robot)).collect(),
            impulse: (0..max_num_impulse)
                .map(|_| ImpulseSplitSolution::new(robot))
                .collect(),
            aux: (0..max_num_impulse).map(|_| SplitSolution::new(robot)).collect(),
            lift: (0..max_num_impulse).map(|_| SplitSolution::new(robot)).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Direction {
    pub stages: Vec<SplitDirection>,
    pub impulse: Vec<ImpulseSplitDirection>,
    pub aux: Vec<SplitDirection>,
    pub lift: Vec<SplitDirection>,
}

impl Direction {
    pub fn new<R: RobotModel>(robot: &R, n: usize, max_num_impulse: usize) -> Self {
        let dims = robot.dims();
        Self {
            stages: (0..=n).map(|_| SplitDirection::new(dims)).collect(),
            impulse: (0..max_num_impulse)
                .map(|_| ImpulseSplitDirection::new(dims))
                .collect(),
            aux: (0..max_num_impulse).map(|_| SplitDirection::new(dims)).collect(),
            lift: (0..max_num_impulse).map(|_| SplitDirection::new(dims)).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KktMatrix {
    pub stages: Vec<SplitKktMatrix>,
    pub impulse: Vec<ImpulseSplitKktMatrix>,
    pub aux: Vec<SplitKktMatrix>,
    pub lift: Vec<SplitKktMatrix>,
}

impl KktMatrix {
    pub fn new<R: RobotModel>(robot: &R, n: usize, max_num_impulse: usize) -> Self {
        let dims = robot.dims();
        Self {
            stages: (0..=n).map(|_| SplitKktMatrix::new(dims)).collect(),
            impulse: (0..max_num_impulse)
                .map(|_| ImpulseSplitKktMatrix::new(dims))
                .collect(),
            aux: (0..max_num_impulse).map(|_| SplitKktMatrix::new(dims)).collect(),
            lift: (0..max_num_impulse).map(|_| SplitKktMatrix::new(dims)).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KktResidual {
    pub stages: Vec<SplitKktResidual>,
    pub impulse: Vec<ImpulseSplitKktResidual>,
    pub aux: Vec<SplitKktResidual>,
    pub lift: Vec<SplitKktResidual>,
}

impl KktResidual {
    pub fn new<R: RobotModel>(robot: &R, n: usize, max_num_impulse: usize) -> Self {
        let dims = robot.dims();
        Self {
            stages: (0..=n).map(|_| SplitKktResidual::new(dims)).collect(),
            impulse: (0..max_num_impulse)
                .map(|_| ImpulseSplitKktResidual::new(dims))
                .collect(),
            aux: (0..max_num_impulse).map(|_| SplitKktResidual::new(dims)).collect(),
            lift: (0..max_num_impulse).map(|_| SplitKktResidual::new(dims)).collect(),
        }
    }
}
