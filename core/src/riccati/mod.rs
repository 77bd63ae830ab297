pub mod split_riccati_factorization;
pub mod riccati_factorizer;
pub mod impulse_riccati_factorizer;
pub mod riccati_recursion;
pub mod state_constraint_factorization;
pub mod state_constraint_factorizer;

use crate::robot::RobotModel;

pub use self::split_riccati_factorization::SplitRiccatiFactorization;

/// Riccati factors over the whole hybrid horizon; same slot layout as the
/// other hybrid containers.
#[derive(Debug, Clone)]
pub struct RiccatiFactorization {
    pub stages: Vec<SplitRiccatiFactorization>,
    pub impulse: Vec<SplitRiccatiFactorization>,
    pub aux: Vec<SplitRiccatiFactorization>,
    pub lift: Vec<SplitRiccatiFactorization>,
}

impl RiccatiFactorization {
    pub fn new<R: RobotModel>(robot: &R, n: usize, max_num_impulse: usize) -> Self {
        let dims = robot.dims();
        Self {
            stages: (0..=n).map(|_| SplitRiccatiFactorization::new(dims)).collect(),
            impulse: (0..max_num_impulse)
                .map(|_| SplitRiccatiFactorization::new(dims))
                .collect(),
            aux: (0..max_num_impulse)
                .map(|_| SplitRiccatiFactorization::new(dims))
                .collect(),
            lift: (0..max_num_impulse)
                .map(|_| SplitRiccatiFactorization::new(dims))
                .collect(),
        }
    }
}
