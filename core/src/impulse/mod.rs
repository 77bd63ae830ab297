pub mod impulse_split_solution;
pub mod impulse_split_direction;
pub mod impulse_split_kkt;
pub mod impulse_state_equation;
pub mod impulse_dynamics;
pub mod impulse_split_ocp;

pub use self::impulse_split_direction::ImpulseSplitDirection;
pub use self::impulse_split_kkt::{ImpulseSplitKktMatrix, ImpulseSplitKktResidual};
pub use self::impulse_split_solution::ImpulseSplitSolution;
