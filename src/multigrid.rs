//! Geometric multigrid for `L phi = b` on a tiled, distributed domain.
//!
//! The solver works in residual-correction form: the initial guess is kept,
//! and every level of the hierarchy solves for a correction with homogeneous
//! boundary conditions, so boundary values never have to be carried between
//! levels. Levels are indexed from 0 (finest); each coarser level halves the
//! resolution on every axis.
//!
//! Grid transfers come in two pairs, selected by `mg.interpolation`:
//!
//! - **constant**: piecewise constant interpolation, with restriction by the
//!   average over the 2^D children of a coarse cell
//! - **linear**: multi-linear interpolation from the nearest 2^D coarse
//!   cells, with the full-weighting restriction that is its adjoint
//!
//! Away from the domain boundary both restrictions conserve the integral of
//! the residual. The linear pair keeps the cycle count independent of depth
//! in one dimension, where the constant pair does not.
//!
//! The default is the linear pair, so the default cycle does not restrict by
//! the plain 2^D-child average. That average is only used under `constant`.
//! Linear interpolation combined with the plain average needs about 32
//! cycles to reduce the residual of a 64-cell 1-D Poisson problem by 1e-10,
//! against fewer than 12 with full weighting.

use log::{debug, info, warn};
use crate::bottom::{conjugate_gradient, BottomStatus};
use crate::config::{self, Interpolation, MultigridConfig};
use crate::error::Result;
use crate::index_space::IndexSpace;
use crate::linop::{BcMode, LinOp};
use crate::patch_array::PatchArray;




/**
 * How a solve ended.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    /// The residual met the tolerance, possibly before the first cycle.
    Converged,
    /// All `maxiter` cycles ran without meeting the tolerance.
    MaxIterExceeded,
    /// Exactly `maxiter` cycles ran with no convergence test.
    FixedIterations,
}




/**
 * Summary of a solve. Residuals are in the operator's norm.
 */
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolveReport {
    pub status: SolveStatus,
    pub iterations: usize,
    pub initial_residual: f64,
    pub final_residual: f64,
}




struct LevelData<const DIM: usize> {
    x: PatchArray<DIM>,
    b: PatchArray<DIM>,
    r: PatchArray<DIM>,
}




/**
 * A multigrid solver bound to an operator. The level hierarchy is sized on
 * construction and built on the first solve.
 */
pub struct Multigrid<'a, const DIM: usize, L: LinOp<DIM>> {
    op: &'a mut L,
    config: MultigridConfig,
    num_levels: usize,
    num_iterations: usize,
    levels: Vec<LevelData<DIM>>,
}




// ============================================================================
impl<'a, const DIM: usize, L: LinOp<DIM>> Multigrid<'a, DIM, L> {


    /**
     * Create a solver. The number of levels is the largest for which every
     * finest tile still coarsens exactly by 2 on every axis, capped by
     * `max_levels` and by what the operator supports.
     */
    pub fn new(op: &'a mut L, config: MultigridConfig) -> Self {
        let ba = op.make_array(0).box_array().clone();
        let cap = config.max_levels.min(op.num_levels()).max(1);
        let num_levels = ba.iter().map(|tile| hierarchy_depth(*tile, cap)).min().unwrap_or(1);

        debug!("mg: {} levels", num_levels);

        Self {
            op,
            config,
            num_levels,
            num_iterations: 0,
            levels: Vec::new(),
        }
    }


    /**
     * Create a solver configured from the process-wide inputs.
     */
    pub fn with_global_config(op: &'a mut L) -> Self {
        Self::new(op, config::global().mg.clone())
    }


    pub fn num_levels(&self) -> usize {
        self.num_levels
    }


    /**
     * Return the number of cycles run by the last solve.
     */
    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }


    pub fn config(&self) -> &MultigridConfig {
        &self.config
    }


    /**
     * Solve `L phi = b` to `|b - L phi| <= max(rel_tol bnorm, abs_tol)`,
     * where `bnorm` is `|b|`, plus `|L| |phi|` if `use_operator_norm` is
     * set. On entry `phi` is the initial guess; on return it is the last
     * iterate, whether or not the tolerance was met. Collective.
     */
    pub fn solve(
        &mut self,
        phi: &mut PatchArray<DIM>,
        b: &PatchArray<DIM>,
        rel_tol: f64,
        abs_tol: f64,
        bc: BcMode) -> Result<SolveReport>
    {
        self.prepare()?;
        self.num_iterations = 0;

        let mut phi0 = self.op.make_array(0);
        let mut r = self.op.make_array(0);
        phi0.copy_valid(phi);

        self.op.residual(0, &mut r, phi, b, bc)?;
        let bnorm = self.op.norm(0, b)?;
        let rnorm0 = self.op.norm(0, &r)?;
        let mut rnorm = rnorm0;

        if self.config.verbose > 0 {
            info!("mg: initial residual {:e}, rhs norm {:e}", rnorm0, bnorm);
        }

        if !self.config.fixed_iter && rnorm0 <= self.target(phi, bnorm, rel_tol, abs_tol)? {
            return Ok(self.report(SolveStatus::Converged, rnorm0, rnorm0));
        }

        self.levels[0].x.set_val(0.0);
        self.levels[0].b.copy_valid(&r);

        for iter in 1..=self.config.maxiter {
            self.relax(0)?;
            phi.lin_comb(1.0, &phi0, 1.0, &self.levels[0].x);
            self.op.residual(0, &mut r, phi, b, bc)?;
            rnorm = self.op.norm(0, &r)?;
            self.num_iterations = iter;

            if self.config.verbose > 1 {
                info!("mg: iteration {} residual {:e} ({:e} relative)", iter, rnorm, rnorm / rnorm0);
            }
            if !self.config.fixed_iter && rnorm <= self.target(phi, bnorm, rel_tol, abs_tol)? {
                if self.config.verbose > 0 {
                    info!("mg: converged in {} iterations to residual {:e}", iter, rnorm);
                }
                return Ok(self.report(SolveStatus::Converged, rnorm0, rnorm));
            }
        }

        if self.config.fixed_iter {
            Ok(self.report(SolveStatus::FixedIterations, rnorm0, rnorm))
        } else {
            warn!("mg: failed to converge in {} iterations (residual {:e})", self.config.maxiter, rnorm);
            Ok(self.report(SolveStatus::MaxIterExceeded, rnorm0, rnorm))
        }
    }


    fn report(&self, status: SolveStatus, initial_residual: f64, final_residual: f64) -> SolveReport {
        SolveReport {
            status,
            iterations: self.num_iterations,
            initial_residual,
            final_residual,
        }
    }


    fn target(&self, phi: &PatchArray<DIM>, bnorm: f64, rel_tol: f64, abs_tol: f64) -> Result<f64> {
        let scale = if self.config.use_operator_norm {
            bnorm + self.op.operator_norm(0) * self.op.norm(0, phi)?
        } else {
            bnorm
        };
        Ok(f64::max(rel_tol * scale, abs_tol))
    }


    fn prepare(&mut self) -> Result<()> {
        while self.levels.len() < self.num_levels {
            let level = self.levels.len();

            if level > 0 {
                self.op.prepare_level(level)?;
            }
            self.levels.push(LevelData {
                x: self.op.make_array(level),
                b: self.op.make_array(level),
                r: self.op.make_array(level),
            });
        }
        Ok(())
    }


    fn relax(&mut self, level: usize) -> Result<()> {
        let bc = BcMode::Homogeneous;

        if level == self.num_levels - 1 {
            return self.coarsest_smooth(level);
        }

        for _ in 0..self.config.nu_1 {
            let data = &mut self.levels[level];
            self.op.smooth(level, &mut data.x, &data.b, bc)?;
        }
        {
            let data = &mut self.levels[level];
            self.op.residual(level, &mut data.r, &mut data.x, &data.b, bc)?;
            self.op.fill_ghosts(level, &mut data.r, bc)?;
        }
        {
            let (fine, coarse) = self.levels.split_at_mut(level + 1);
            restrict(&fine[level].r, &mut coarse[0].b, self.config.interpolation);
            coarse[0].x.set_val(0.0);
        }

        for _ in 0..self.config.nu_0 {
            self.relax(level + 1)?;
        }
        {
            let (fine, coarse) = self.levels.split_at_mut(level + 1);
            self.op.fill_ghosts(level + 1, &mut coarse[0].x, bc)?;
            interpolate_add(&coarse[0].x, &mut fine[level].x, self.config.interpolation);
        }

        for _ in 0..self.config.nu_2 {
            let data = &mut self.levels[level];
            self.op.smooth(level, &mut data.x, &data.b, bc)?;
        }
        Ok(())
    }


    fn coarsest_smooth(&mut self, level: usize) -> Result<()> {
        let bc = BcMode::Homogeneous;
        let config = &self.config;
        let data = &mut self.levels[level];

        if config.usecg {
            let (status, iterations) = conjugate_gradient(
                &*self.op,
                level,
                &mut data.x,
                &data.b,
                config.rtol_b,
                config.atol_b,
                config.maxiter_b)?;

            match status {
                BottomStatus::Converged => {
                    debug!("mg: bottom solve converged in {} iterations", iterations);
                }
                BottomStatus::MaxIterExceeded => {
                    debug!("mg: bottom solve stopped at {} iterations", iterations);
                }
                BottomStatus::Unstable => {
                    warn!("mg: bottom solve went unstable at iteration {}", iterations);

                    if config.smooth_on_cg_unstable {
                        for _ in 0..config.nu_f {
                            self.op.smooth(level, &mut data.x, &data.b, bc)?;
                        }
                    }
                }
            }
        } else {
            for _ in 0..config.nu_f {
                self.op.smooth(level, &mut data.x, &data.b, bc)?;
            }
        }

        for _ in 0..config.nu_b {
            self.op.smooth(level, &mut data.x, &data.b, bc)?;
        }
        Ok(())
    }
}




/**
 * Restrict a fine residual onto the coarse right-hand side, tile by tile.
 * Coarse tile `n` is fine tile `n` coarsened by two, so no data moves
 * between ranks. The linear restriction reads one guard cell of the fine
 * residual.
 */
fn restrict<const DIM: usize>(fine: &PatchArray<DIM>, coarse: &mut PatchArray<DIM>, kind: Interpolation) {
    const WEIGHTS: [f64; 4] = [0.25, 0.75, 0.75, 0.25];
    let stencil = IndexSpace::new([-1; DIM], [2; DIM]);
    let norm = 0.5f64.powi(DIM as i32);

    for (n, c) in coarse.patches_mut() {
        let f = fine.patch(n);

        for ic in c.valid().iter() {
            c[ic] = match kind {
                Interpolation::Constant => {
                    f.average_over(&IndexSpace::new(ic, ic).refine(2))
                }
                Interpolation::Linear => {
                    let mut sum = 0.0;

                    for a in stencil.iter() {
                        let mut w = norm;
                        let mut index = ic;

                        for d in 0..DIM {
                            w *= WEIGHTS[(a[d] + 1) as usize];
                            index[d] = 2 * ic[d] + a[d];
                        }
                        sum += w * f[index];
                    }
                    sum
                }
            }
        }
    }
}




/**
 * Interpolate a coarse correction and add it to the fine one. The linear
 * interpolation reads one guard cell of the coarse correction.
 */
fn interpolate_add<const DIM: usize>(coarse: &PatchArray<DIM>, fine: &mut PatchArray<DIM>, kind: Interpolation) {
    let corners = IndexSpace::new([0; DIM], [1; DIM]);

    for (n, f) in fine.patches_mut() {
        let c = coarse.patch(n);

        for i in f.valid().iter() {
            let parent = i.map(|k| k.div_euclid(2));

            f[i] += match kind {
                Interpolation::Constant => c[parent],
                Interpolation::Linear => {
                    let mut sum = 0.0;

                    for m in corners.iter() {
                        let mut w = 1.0;
                        let mut index = parent;

                        for d in 0..DIM {
                            let side = if i[d] == 2 * parent[d] { -1 } else { 1 };
                            w *= if m[d] == 1 { 0.25 } else { 0.75 };
                            index[d] += m[d] * side;
                        }
                        sum += w * c[index];
                    }
                    sum
                }
            }
        }
    }
}




/**
 * Count the levels a single tile supports: coarsen by 2 until the result no
 * longer refines back to the tile, or the tile is down to a single cell.
 */
fn hierarchy_depth<const DIM: usize>(mut tile: IndexSpace<DIM>, cap: usize) -> usize {
    let mut depth = 1;

    while depth < cap && tile.num_points() > 1 {
        let coarse = tile.coarsen(2);

        if coarse.refine(2) != tile {
            break;
        }
        tile = coarse;
        depth += 1;
    }
    depth
}




// ============================================================================
#[cfg(test)]
mod test {

    use std::sync::Arc;
    use std::thread;
    use super::{interpolate_add, restrict, Multigrid, SolveStatus};
    use crate::box_array::BoxArray;
    use crate::config::{Interpolation, MultigridConfig, PlannerConfig};
    use crate::context::Context;
    use crate::distribution_map::DistributionMap;
    use crate::index_space::{ibox, IndexSpace};
    use crate::linop::{BcMode, LinOp};
    use crate::message::LocalCommunicator;
    use crate::patch_array::PatchArray;
    use crate::poisson::PoissonOp;

    fn poisson<const DIM: usize>(
        context: Arc<Context<DIM>>,
        domain: IndexSpace<DIM>,
        max_size: usize) -> PoissonOp<DIM>
    {
        let ba = BoxArray::decompose(domain, max_size);
        let dm = DistributionMap::round_robin(ba.len(), context.size());
        let dx = domain.shape().map(|n| 1.0 / n as f64);
        PoissonOp::new(context, ba, dm, domain, dx)
    }

    fn serial<const DIM: usize>() -> Arc<Context<DIM>> {
        Context::new(LocalCommunicator::serial(), PlannerConfig::default())
    }

    /**
     * Solve -u'' = 1 on [0, 1] with u = 0 at both ends on 64 cells, and
     * return the report with the largest deviation from x (1 - x) / 2.
     */
    fn solve_parabola(context: Arc<Context<1>>, max_size: usize, config: MultigridConfig) -> (super::SolveReport, f64) {
        let mut op = poisson(context, ibox([0], [63]), max_size);
        let mut phi = op.make_array(0);
        let mut b = op.make_array(0);
        b.set_val(1.0);

        let mut mg = Multigrid::new(&mut op, config);
        let report = mg.solve(&mut phi, &b, 1e-10, 0.0, BcMode::Inhomogeneous).unwrap();
        assert_eq!(report.iterations, mg.num_iterations());

        let mut error: f64 = 0.0;

        for (_, p) in phi.patches() {
            for [i] in p.valid().iter() {
                let x = (i as f64 + 0.5) / 64.0;
                error = error.max((p[[i]] - 0.5 * x * (1.0 - x)).abs());
            }
        }
        (report, error)
    }

    #[test]
    fn one_dimensional_poisson_converges_quickly() {
        let (report, error) = solve_parabola(serial(), 64, MultigridConfig::default());
        assert_eq!(report.status, SolveStatus::Converged);
        assert!(report.iterations <= 12, "took {} iterations", report.iterations);
        assert!(report.final_residual <= 1e-10 * report.initial_residual);
        assert!(error < 1e-3);
    }

    #[test]
    fn one_dimensional_poisson_converges_on_two_ranks() {
        let handles: Vec<_> = LocalCommunicator::group(2)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let context = Context::new(comm, PlannerConfig::default());
                    let result = solve_parabola(context.clone(), 16, MultigridConfig::default());
                    context.finalize().unwrap();
                    result
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for (report, error) in &results {
            assert_eq!(report.status, SolveStatus::Converged);
            assert!(report.iterations <= 12);
            assert!(*error < 1e-3);
        }
        assert_eq!(results[0].0, results[1].0);
    }

    #[test]
    fn fixed_iterations_run_exactly_maxiter_cycles() {
        let config = MultigridConfig { fixed_iter: true, maxiter: 5, ..Default::default() };
        let (report, _) = solve_parabola(serial(), 64, config);
        assert_eq!(report.status, SolveStatus::FixedIterations);
        assert_eq!(report.iterations, 5);
    }

    #[test]
    fn too_few_cycles_is_reported_not_fatal() {
        let config = MultigridConfig { maxiter: 2, ..Default::default() };
        let (report, _) = solve_parabola(serial(), 64, config);
        assert_eq!(report.status, SolveStatus::MaxIterExceeded);
        assert_eq!(report.iterations, 2);
        assert!(report.final_residual < report.initial_residual);
    }

    #[test]
    fn zero_rhs_with_zero_guess_needs_no_cycles() {
        let mut op = poisson(serial::<1>(), ibox([0], [63]), 16);
        let mut phi = op.make_array(0);
        let b = op.make_array(0);

        let report = Multigrid::new(&mut op, MultigridConfig::default())
            .solve(&mut phi, &b, 1e-10, 0.0, BcMode::Homogeneous)
            .unwrap();

        assert_eq!(report.status, SolveStatus::Converged);
        assert_eq!(report.iterations, 0);
        assert_eq!(report.initial_residual, 0.0);
    }

    #[test]
    fn hierarchy_depth_follows_tile_size() {
        let mut op = poisson(serial::<1>(), ibox([0], [63]), 64);
        assert_eq!(Multigrid::new(&mut op, MultigridConfig::default()).num_levels(), 7);

        let mut op = poisson(serial::<1>(), ibox([0], [63]), 16);
        assert_eq!(Multigrid::new(&mut op, MultigridConfig::default()).num_levels(), 5);

        let config = MultigridConfig { max_levels: 2, ..Default::default() };
        assert_eq!(Multigrid::new(&mut op, config).num_levels(), 2);
    }

    #[test]
    fn anisotropic_tile_coarsens_until_its_short_axis_is_one_cell() {
        // 16x4 -> 8x2 -> 4x1, and a single row no longer coarsens exactly
        let mut op = poisson(serial::<2>(), ibox([0, 0], [15, 3]), 16);
        assert_eq!(op.num_levels(), 3);
        assert_eq!(Multigrid::new(&mut op, MultigridConfig::default()).num_levels(), 3);
    }

    #[test]
    fn two_dimensional_poisson_converges_with_every_variant() {
        let variants = [
            MultigridConfig::default(),
            MultigridConfig { interpolation: Interpolation::Constant, ..Default::default() },
            MultigridConfig { nu_0: 2, ..Default::default() },
            MultigridConfig { usecg: false, nu_f: 40, ..Default::default() },
            MultigridConfig { use_operator_norm: true, ..Default::default() },
        ];

        for config in variants {
            let mut op = poisson(serial::<2>(), ibox([0, 0], [31, 31]), 8);
            let mut phi = op.make_array(0);
            let mut b = op.make_array(0);
            b.set_from_function(|[i, j]| if (i - 16).abs() < 4 && (j - 16).abs() < 4 { 1.0 } else { 0.0 });

            let mut mg = Multigrid::new(&mut op, config.clone());
            assert_eq!(mg.num_levels(), 4);

            let report = mg.solve(&mut phi, &b, 1e-8, 0.0, BcMode::Homogeneous).unwrap();
            assert_eq!(report.status, SolveStatus::Converged, "{:?}", config);
            assert!(report.iterations <= 20, "{:?} took {} iterations", config, report.iterations);
        }
    }

    fn transfer_op() -> PoissonOp<2> {
        let domain = ibox([0, 0], [7, 7]);
        let ba = BoxArray::decompose(domain, 4);
        let dm = DistributionMap::new(vec![0; ba.len()]);
        let mut op = PoissonOp::new(serial(), ba, dm, domain, [0.125; 2]);
        op.prepare_level(1).unwrap();
        op
    }

    #[test]
    fn interior_restriction_of_a_linear_field_is_the_child_average() {
        let op = transfer_op();
        let interior = IndexSpace::new([1, 1], [2, 2]);

        for kind in [Interpolation::Constant, Interpolation::Linear] {
            let mut fine = op.make_array(0);
            let mut coarse = op.make_array(1);

            fine.set_from_function(|[i, j]| (i + 8 * j) as f64);
            op.fill_ghosts(0, &mut fine, BcMode::Homogeneous).unwrap();
            restrict(&fine, &mut coarse, kind);

            for (_, c) in coarse.patches() {
                for [i, j] in c.valid().iter().filter(|&ic| interior.contains(ic)) {
                    let expected = (2 * i) as f64 + 0.5 + 8.0 * ((2 * j) as f64 + 0.5);
                    assert!((c[[i, j]] - expected).abs() < 1e-12, "{:?} at {:?}", kind, [i, j]);
                }
            }
        }
    }

    #[test]
    fn interpolation_reproduces_a_constant_correction() {
        let op = transfer_op();
        let interior = IndexSpace::new([1, 1], [6, 6]);

        for kind in [Interpolation::Constant, Interpolation::Linear] {
            let mut coarse = op.make_array(1);
            let mut fine: PatchArray<2> = op.make_array(0);
            fine.set_val(1.0);
            coarse.set_val(2.0);
            op.fill_ghosts(1, &mut coarse, BcMode::Homogeneous).unwrap();
            interpolate_add(&coarse, &mut fine, kind);

            for (_, f) in fine.patches() {
                for i in f.valid().iter().filter(|&i| interior.contains(i)) {
                    assert_eq!(f[i], 3.0, "{:?} at {:?}", kind, i);
                }
            }
        }
    }
}
