use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::cost::{CostFunction, CostFunctionData};
use crate::ocp::split_kkt_matrix::SplitKktMatrix;
use crate::ocp::split_solution::SplitSolution;
use crate::robot::{RobotDims, RobotModel};

/// Driver of the ParNMPC correction sweeps. The per-stage inversions are
/// parallel; the backward sweep serializes only the costate propagation and
/// the forward sweep only the state propagation, both cheap matrix-vector
/// products through the stored stage inverses.
pub struct BackwardCorrection {
    pub corrections: Vec<super::SplitBackwardCorrection>,
    aux_mat: DMatrix<f64>,
    aux_initialized: bool,
    n: usize,
}

impl BackwardCorrection {
    pub fn new(dims: &RobotDims, n: usize) -> Self {
        Self {
            corrections: (0..n).map(|_| super::SplitBackwardCorrection::new(dims)).collect(),
            aux_mat: DMatrix::zeros(dims.dimx(), dims.dimx()),
            aux_initialized: false,
            n,
        }
    }

    pub fn aux_mat(&self) -> Option<&DMatrix<f64>> {
        if self.aux_initialized { Some(&self.aux_mat) } else { None }
    }

    pub fn reset_aux_mat(&mut self) {
        self.aux_initialized = false;
    }

    /// Seed the auxiliary matrix with the terminal-cost Hessian at the
    /// current terminal iterate (the Deng–Ohtsuka cost-to-go surrogate).
    pub fn init_aux_mat<R: RobotModel>(
        &mut self,
        robot: &R,
        cost: &CostFunction,
        t_terminal: f64,
        s_terminal: &SplitSolution,
    ) {
        let mut data = CostFunctionData::new(robot.dims());
        let mut scratch = SplitKktMatrix::new(robot.dims());
        cost.eval_terminal_cost_hessian(robot, &mut data, t_terminal, s_terminal, &mut scratch);
        self.aux_mat.copy_from(&scratch.qxx);
        self.aux_initialized = true;
    }

    /// Backward correction: serial costate sweep from the last stage, then
    /// the parallel state/input completion.
    pub fn backward_correction<R: RobotModel>(
        &mut self,
        pool: &rayon::ThreadPool,
        robot: &R,
        s: &[SplitSolution],
        s_new: &mut [SplitSolution],
    ) {
        let n = self.n;
        debug_assert_eq!(s.len(), n);
        debug_assert_eq!(s_new.len(), n);
        for i in (0..n - 1).rev() {
            let (left, right) = s_new.split_at_mut(i + 1);
            self.corrections[i].backward_correction_serial(&s[i + 1], &right[0], &mut left[i]);
        }
        pool.install(|| {
            self.corrections[..n - 1]
                .par_iter()
                .zip(s_new[..n - 1].par_iter_mut())
                .for_each(|(corr, s_i)| corr.backward_correction_parallel(robot, s_i));
        });
    }

    /// Forward correction: serial state sweep from the initial stage, then
    /// the parallel costate/input completion.
    pub fn forward_correction<R: RobotModel>(
        &mut self,
        pool: &rayon::ThreadPool,
        robot: &R,
        s: &[SplitSolution],
        s_new: &mut [SplitSolution],
    ) {
        let n = self.n;
        for i in 1..n {
            let (left, right) = s_new.split_at_mut(i);
            self.corrections[i].forward_correction_serial(robot, &s[i - 1], &left[i - 1], &mut right[0]);
        }
        pool.install(|| {
            self.corrections[1..n]
                .par_iter()
                .zip(s_new[1..n].par_iter_mut())
                .for_each(|(corr, s_i)| corr.forward_correction_parallel(s_i));
        });
    }

    /// Euclidean norm of the coarse-update mismatch, a cheap progress probe.
    pub fn correction_norm(&self, s: &[SplitSolution], s_new: &[SplitSolution]) -> f64 {
        let mut sum = 0.0;
        for (a, b) in s.iter().zip(s_new.iter()) {
            sum += (&b.v - &a.v).norm_squared();
            sum += (&b.u - &a.u).norm_squared();
        }
        sum.sqrt()
    }
}
