use crate::error::Result;
use crate::patch_array::PatchArray;




/**
 * Whether boundary conditions are applied with their actual values or with
 * the values zeroed. Corrections in the multigrid hierarchy always use
 * homogeneous conditions.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BcMode {
    Homogeneous,
    Inhomogeneous,
}




/**
 * A linear operator defined on a hierarchy of levels, where level 0 is the
 * finest and each coarser level halves the resolution on every axis. Level
 * 0 is ready on construction; coarser levels are made ready by
 * `prepare_level` before first use.
 *
 * The arrays passed in at a level must come from `make_array` at that
 * level. Operations that take `x` mutably fill its guard zones.
 */
pub trait LinOp<const DIM: usize> {

    /// Upper bound on the number of levels the operator can provide.
    fn num_levels(&self) -> usize;

    /// Build the data for a coarse level, from the level above it.
    fn prepare_level(&mut self, level: usize) -> Result<()>;

    /// Create a zeroed array on the layout of a level, with the guard zones
    /// the operator needs.
    fn make_array(&self, level: usize) -> PatchArray<DIM>;

    /// Fill the guard zones of `x` from neighbouring tiles and from the
    /// boundary conditions.
    fn fill_ghosts(&self, level: usize, x: &mut PatchArray<DIM>, bc: BcMode) -> Result<()>;

    /// Compute `out = L x` on the valid cells.
    fn apply(&self, level: usize, out: &mut PatchArray<DIM>, x: &mut PatchArray<DIM>, bc: BcMode) -> Result<()>;

    /// One smoothing pass on `L x = b`.
    fn smooth(&self, level: usize, x: &mut PatchArray<DIM>, b: &PatchArray<DIM>, bc: BcMode) -> Result<()>;

    /// Compute `r = b - L x` on the valid cells.
    fn residual(
        &self,
        level: usize,
        r: &mut PatchArray<DIM>,
        x: &mut PatchArray<DIM>,
        b: &PatchArray<DIM>,
        bc: BcMode) -> Result<()>
    {
        self.apply(level, r, x, bc)?;
        r.scale(-1.0);
        r.saxpy(1.0, b);
        Ok(())
    }

    /// The norm in which convergence is measured at a level.
    fn norm(&self, _level: usize, x: &PatchArray<DIM>) -> Result<f64> {
        x.norm_inf()
    }

    /// An estimate of the operator norm at a level, consistent with `norm`.
    fn operator_norm(&self, level: usize) -> f64;
}
