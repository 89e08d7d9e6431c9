use std::sync::Arc;
use crate::box_array::BoxArray;
use crate::context::Context;
use crate::distribution_map::DistributionMap;
use crate::error::Result;
use crate::index_space::IndexSpace;
use crate::linop::{BcMode, LinOp};
use crate::patch_array::PatchArray;




struct Level<const DIM: usize> {
    ba: BoxArray<DIM>,
    domain: IndexSpace<DIM>,
    dx: [f64; DIM],
}




/**
 * The cell-centred negative Laplacian, `-(sum over axes of d2/dx2)`, with
 * Dirichlet conditions on the faces of a rectangular domain. The boundary
 * value sits on the domain face, half a cell from the first cell centre, and
 * enters through a guard cell set to `2 value - interior`.
 *
 * The smoother is red-black Gauss-Seidel, with the colour of a cell given by
 * the parity of the sum of its indexes, so the result does not depend on how
 * the domain is tiled.
 */
pub struct PoissonOp<const DIM: usize> {
    context: Arc<Context<DIM>>,
    dm: DistributionMap,
    levels: Vec<Level<DIM>>,
    max_levels: usize,
    boundary_value: f64,
}




// ============================================================================
impl<const DIM: usize> PoissonOp<DIM> {


    /**
     * Create the operator on the finest layout. The tiles must lie within
     * the domain, and `dx` is the cell width on each axis.
     */
    pub fn new(
        context: Arc<Context<DIM>>,
        ba: BoxArray<DIM>,
        dm: DistributionMap,
        domain: IndexSpace<DIM>,
        dx: [f64; DIM]) -> Self
    {
        assert_eq!(ba.len(), dm.len(), "box array and distribution map differ in length");
        assert!(ba.iter().all(|b| domain.contains_space(b)), "tiles must lie within the domain");
        assert!(dx.iter().all(|&h| h > 0.0), "cell widths must be positive");

        let mut max_levels = 1;

        while ba.coarsenable(1 << max_levels, 1) && domain.coarsenable(1 << max_levels, 1) {
            max_levels += 1
        }

        Self {
            context,
            dm,
            levels: vec![Level { ba, domain, dx }],
            max_levels,
            boundary_value: 0.0,
        }
    }


    /**
     * Set the Dirichlet value applied under inhomogeneous conditions.
     */
    pub fn with_boundary_value(mut self, value: f64) -> Self {
        self.boundary_value = value;
        self
    }


    pub fn box_array(&self, level: usize) -> &BoxArray<DIM> {
        &self.level(level).ba
    }


    pub fn domain(&self, level: usize) -> IndexSpace<DIM> {
        self.level(level).domain
    }


    pub fn dx(&self, level: usize) -> [f64; DIM] {
        self.level(level).dx
    }


    fn level(&self, level: usize) -> &Level<DIM> {
        self.levels.get(level).unwrap_or_else(|| panic!("level {} has not been prepared", level))
    }


    /**
     * Fill guard zones from neighbours (face slabs only, unless `corners`)
     * and then from the boundary conditions, one axis at a time so that
     * later axes overwrite the corners.
     */
    fn fill(&self, level: usize, x: &mut PatchArray<DIM>, bc: BcMode, corners: bool) -> Result<()> {
        x.fill_boundary(!corners)?;

        let domain = self.level(level).domain;
        let value = match bc {
            BcMode::Homogeneous => 0.0,
            BcMode::Inhomogeneous => self.boundary_value,
        };

        for (_, patch) in x.patches_mut() {
            let valid = patch.valid();
            let grown = patch.grown();
            let g = patch.n_grow();

            for d in 0..DIM {
                if valid.lo()[d] == domain.lo()[d] && g > 0 {
                    let face = domain.lo()[d];

                    for index in grown.set_big(d, face - 1).iter() {
                        let mut mirror = index;
                        mirror[d] = 2 * face - 1 - index[d];
                        patch[index] = 2.0 * value - patch[mirror];
                    }
                }
                if valid.hi()[d] == domain.hi()[d] && g > 0 {
                    let face = domain.hi()[d];

                    for index in grown.set_small(d, face + 1).iter() {
                        let mut mirror = index;
                        mirror[d] = 2 * face + 1 - index[d];
                        patch[index] = 2.0 * value - patch[mirror];
                    }
                }
            }
        }
        Ok(())
    }
}




// ============================================================================
impl<const DIM: usize> LinOp<DIM> for PoissonOp<DIM> {


    fn num_levels(&self) -> usize {
        self.max_levels
    }


    fn prepare_level(&mut self, level: usize) -> Result<()> {
        assert!(level < self.max_levels, "level {} is beyond the coarsest level {}", level, self.max_levels - 1);

        while self.levels.len() <= level {
            let fine = &self.levels[self.levels.len() - 1];
            let mut dx = fine.dx;
            dx.iter_mut().for_each(|h| *h *= 2.0);

            let coarse = Level {
                ba: fine.ba.coarsen(2),
                domain: fine.domain.coarsen(2),
                dx,
            };
            self.levels.push(coarse);
        }
        Ok(())
    }


    fn make_array(&self, level: usize) -> PatchArray<DIM> {
        PatchArray::new(self.context.clone(), self.level(level).ba.clone(), self.dm.clone(), 1)
    }


    fn fill_ghosts(&self, level: usize, x: &mut PatchArray<DIM>, bc: BcMode) -> Result<()> {
        self.fill(level, x, bc, true)
    }


    fn apply(&self, level: usize, out: &mut PatchArray<DIM>, x: &mut PatchArray<DIM>, bc: BcMode) -> Result<()> {
        self.fill(level, x, bc, false)?;
        let idx2 = self.level(level).dx.map(|h| 1.0 / (h * h));

        for (n, y) in out.patches_mut() {
            let x = x.patch(n);

            for index in y.valid().iter() {
                let mut sum = 0.0;

                for d in 0..DIM {
                    let mut l = index;
                    let mut r = index;
                    l[d] -= 1;
                    r[d] += 1;
                    sum += (2.0 * x[index] - x[l] - x[r]) * idx2[d];
                }
                y[index] = sum;
            }
        }
        Ok(())
    }


    fn smooth(&self, level: usize, x: &mut PatchArray<DIM>, b: &PatchArray<DIM>, bc: BcMode) -> Result<()> {
        let idx2 = self.level(level).dx.map(|h| 1.0 / (h * h));
        let diag: f64 = idx2.iter().map(|c| 2.0 * c).sum();

        for colour in 0..2 {
            self.fill(level, x, bc, false)?;

            for (n, p) in x.patches_mut() {
                let b = b.patch(n);

                for index in p.valid().iter() {
                    if index.iter().sum::<i64>().rem_euclid(2) != colour {
                        continue;
                    }
                    let mut off = 0.0;

                    for d in 0..DIM {
                        let mut l = index;
                        let mut r = index;
                        l[d] -= 1;
                        r[d] += 1;
                        off += (p[l] + p[r]) * idx2[d];
                    }
                    p[index] = (b[index] + off) / diag;
                }
            }
        }
        Ok(())
    }


    fn operator_norm(&self, level: usize) -> f64 {
        self.level(level).dx.iter().map(|h| 4.0 / (h * h)).sum()
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::PoissonOp;
    use crate::box_array::BoxArray;
    use crate::context::Context;
    use crate::config::PlannerConfig;
    use crate::distribution_map::DistributionMap;
    use crate::index_space::ibox;
    use crate::linop::{BcMode, LinOp};
    use crate::message::LocalCommunicator;

    fn op_2d(max_size: usize) -> PoissonOp<2> {
        let context = Context::new(LocalCommunicator::serial(), PlannerConfig::default());
        let domain = ibox([0, 0], [15, 15]);
        let ba = BoxArray::decompose(domain, max_size);
        let dm = DistributionMap::new(vec![0; ba.len()]);
        PoissonOp::new(context, ba, dm, domain, [1.0 / 16.0; 2])
    }

    #[test]
    fn levels_coarsen_until_tiles_are_one_cell() {
        let mut op = op_2d(4);
        assert_eq!(op.num_levels(), 3);
        op.prepare_level(2).unwrap();
        assert_eq!(op.domain(2), ibox([0, 0], [3, 3]));
        assert_eq!(op.dx(2), [0.25, 0.25]);
        assert_eq!(op.box_array(2).len(), 16);
        assert_eq!(op.operator_norm(2), 128.0);
    }

    #[test]
    fn laplacian_of_a_quadratic_is_constant() {
        let op = op_2d(8);
        let h = 1.0 / 16.0;
        let mut x = op.make_array(0);
        let mut y = op.make_array(0);

        // x = (i h)^2, so -d2x/dx2 = -2 away from the boundary
        x.set_from_function(|[i, _]| (i as f64 * h).powi(2));
        op.apply(0, &mut y, &mut x, BcMode::Homogeneous).unwrap();

        for (_, p) in y.patches() {
            for index in p.valid().iter().filter(|i| i.iter().all(|&k| k > 0 && k < 15)) {
                assert!((p[index] + 2.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn homogeneous_guard_cells_are_odd_reflections() {
        let op = op_2d(8).with_boundary_value(3.0);
        let mut x = op.make_array(0);
        x.set_val(1.0);
        op.fill_ghosts(0, &mut x, BcMode::Homogeneous).unwrap();
        assert_eq!(x.patch(0)[[-1, 4]], -1.0);
        assert_eq!(x.patch(0)[[8, 4]], 1.0);

        op.fill_ghosts(0, &mut x, BcMode::Inhomogeneous).unwrap();
        assert_eq!(x.patch(3)[[16, 12]], 5.0);
    }

    #[test]
    fn smoothing_damps_an_oscillatory_error() {
        let op = op_2d(8);
        let b = op.make_array(0);
        let mut x = op.make_array(0);
        let mut r = op.make_array(0);
        x.set_from_function(|[i, j]| if (i + j).rem_euclid(2) == 0 { 1.0 } else { -1.0 });

        op.residual(0, &mut r, &mut x, &b, BcMode::Homogeneous).unwrap();
        let before = op.norm(0, &r).unwrap();

        for _ in 0..4 {
            op.smooth(0, &mut x, &b, BcMode::Homogeneous).unwrap();
        }
        op.residual(0, &mut r, &mut x, &b, BcMode::Homogeneous).unwrap();
        assert!(op.norm(0, &r).unwrap() < 0.5 * before);
        assert!(x.norm_inf().unwrap() <= 1.0);
    }

    #[test]
    fn smoothing_does_not_depend_on_tiling() {
        let ops = [op_2d(16), op_2d(4)];
        let mut out = Vec::new();

        for op in &ops {
            let mut b = op.make_array(0);
            let mut x = op.make_array(0);
            b.set_from_function(|[i, j]| (i * j) as f64);

            for _ in 0..3 {
                op.smooth(0, &mut x, &b, BcMode::Homogeneous).unwrap();
            }
            out.push((x.sum().unwrap(), x.norm_inf().unwrap()));
        }
        assert!((out[0].0 - out[1].0).abs() < 1e-9 * out[0].0.abs());
        assert_eq!(out[0].1, out[1].1);
    }
}
