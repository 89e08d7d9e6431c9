use log::debug;
use crate::error::Result;
use crate::linop::{BcMode, LinOp};
use crate::patch_array::PatchArray;




/**
 * Outcome of a bottom solve.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BottomStatus {
    Converged,
    /// The search direction lost positive curvature, so the operator is not
    /// positive definite on this level or round-off has taken over.
    Unstable,
    MaxIterExceeded,
}




/**
 * Solve `L x = b` at a level with homogeneous boundary conditions by
 * conjugate gradients, starting from the given `x`. Stops when the residual
 * norm falls to `max(rtol |r0|, atol)`; a negative tolerance is ignored.
 */
pub fn conjugate_gradient<const DIM: usize, L: LinOp<DIM> + ?Sized>(
    op: &L,
    level: usize,
    x: &mut PatchArray<DIM>,
    b: &PatchArray<DIM>,
    rtol: f64,
    atol: f64,
    max_iter: usize) -> Result<(BottomStatus, usize)>
{
    let bc = BcMode::Homogeneous;
    let mut r = op.make_array(level);
    let mut p = op.make_array(level);
    let mut ap = op.make_array(level);

    op.residual(level, &mut r, x, b, bc)?;
    p.copy_valid(&r);

    let rnorm0 = op.norm(level, &r)?;
    let target = f64::max(if rtol >= 0.0 { rtol * rnorm0 } else { 0.0 }, atol);

    if rnorm0 == 0.0 || rnorm0 <= target {
        return Ok((BottomStatus::Converged, 0));
    }
    let mut rho = r.dot(&r)?;

    for iter in 1..=max_iter {
        op.apply(level, &mut ap, &mut p, bc)?;
        let pap = p.dot(&ap)?;

        if !(pap > 0.0) {
            debug!("cg: lost positive curvature at iteration {} (pAp = {:e})", iter, pap);
            return Ok((BottomStatus::Unstable, iter));
        }
        let alpha = rho / pap;
        x.saxpy(alpha, &p);
        r.saxpy(-alpha, &ap);

        let rnorm = op.norm(level, &r)?;
        debug!("cg: iteration {} residual {:e}", iter, rnorm);

        if rnorm <= target {
            return Ok((BottomStatus::Converged, iter));
        }
        let rho_new = r.dot(&r)?;

        if rho_new == 0.0 {
            return Ok((BottomStatus::Converged, iter));
        }
        p.scale(rho_new / rho);
        p.saxpy(1.0, &r);
        rho = rho_new;
    }
    Ok((BottomStatus::MaxIterExceeded, max_iter))
}
