/**
 * Identifier for a Cartesian axis, as an index into `[0, DIM)`.
 */
pub type Axis = usize;




#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]


/**
 * Represents a rectangular region in a discrete, DIM-dimensional index
 * space. Both corners are inclusive: a box with `lo == hi` holds one cell.
 * A box with `hi[d] == lo[d] - 1` on some axis is empty, which is the only
 * kind of negative extent permitted.
 */
pub struct IndexSpace<const DIM: usize> {
    lo: [i64; DIM],
    hi: [i64; DIM],
}




/**
 * Describes a rectangular index space. The index type is signed 64-bit integer.
 */
impl<const DIM: usize> IndexSpace<DIM> {


    pub fn new(lo: [i64; DIM], hi: [i64; DIM]) -> Self {

        assert!(
            (0..DIM).all(|d| lo[d] <= hi[d] + 1),
            "index space has negative volume");

        Self { lo, hi }
    }


    /**
     * Return the minimum index (inclusive).
     */
    pub fn lo(&self) -> [i64; DIM] {
        self.lo
    }


    /**
     * Return the maximum index (inclusive).
     */
    pub fn hi(&self) -> [i64; DIM] {
        self.hi
    }


    /**
     * Return the number of indexes on each axis.
     */
    pub fn shape(&self) -> [usize; DIM] {
        let mut shape = [0; DIM];

        for (d, n) in shape.iter_mut().enumerate() {
            *n = (self.hi[d] - self.lo[d] + 1) as usize;
        }
        shape
    }


    /**
     * Return the number of indexes along a single axis.
     */
    pub fn length(&self, axis: Axis) -> usize {
        (self.hi[axis] - self.lo[axis] + 1) as usize
    }


    /**
     * Return the number of elements in this index space.
     */
    pub fn num_points(&self) -> usize {
        self.shape().iter().product()
    }


    pub fn is_empty(&self) -> bool {
        (0..DIM).any(|d| self.hi[d] < self.lo[d])
    }


    /**
     * Determine whether this index space contains the given index.
     */
    pub fn contains(&self, index: [i64; DIM]) -> bool {
        (0..DIM).all(|d| self.lo[d] <= index[d] && index[d] <= self.hi[d])
    }


    /**
     * Determine whether another index space is a subset of this one. The
     * empty space is a subset of everything.
     */
    pub fn contains_space(&self, other: &Self) -> bool {
        other.is_empty() || (0..DIM).all(|d| other.lo[d] >= self.lo[d] && other.hi[d] <= self.hi[d])
    }


    /**
     * Expand this index space by the given number of elements on each axis.
     * A negative delta shrinks the space.
     */
    pub fn grow(&self, delta: i64) -> Self {
        let mut result = *self;

        for d in 0..DIM {
            result.lo[d] -= delta;
            result.hi[d] += delta;
        }
        Self::new(result.lo, result.hi)
    }


    /**
     * Expand this index space on one axis only, on both sides.
     */
    pub fn grow_axis(&self, axis: Axis, delta: i64) -> Self {
        self.grow_lo(axis, delta).grow_hi(axis, delta)
    }


    /**
     * Move the lower face of the given axis outward by `delta`.
     */
    pub fn grow_lo(&self, axis: Axis, delta: i64) -> Self {
        self.set_small(axis, self.lo[axis] - delta)
    }


    /**
     * Move the upper face of the given axis outward by `delta`.
     */
    pub fn grow_hi(&self, axis: Axis, delta: i64) -> Self {
        self.set_big(axis, self.hi[axis] + delta)
    }


    /**
     * Trim this index space by the given number of elements on each axis.
     */
    pub fn trim_all(&self, delta: i64) -> Self {
        self.grow(-delta)
    }


    /**
     * Return a copy of this space with the lower bound on one axis replaced.
     */
    pub fn set_small(&self, axis: Axis, value: i64) -> Self {
        let mut lo = self.lo;
        lo[axis] = value;
        Self::new(lo, self.hi)
    }


    /**
     * Return a copy of this space with the upper bound on one axis replaced.
     */
    pub fn set_big(&self, axis: Axis, value: i64) -> Self {
        let mut hi = self.hi;
        hi[axis] = value;
        Self::new(self.lo, hi)
    }


    /**
     * Return the overlap of two index spaces, or `None` if they are
     * disjoint. Spaces that only touch along a face do not overlap.
     */
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let mut lo = [0; DIM];
        let mut hi = [0; DIM];

        for d in 0..DIM {
            lo[d] = self.lo[d].max(other.lo[d]);
            hi[d] = self.hi[d].min(other.hi[d]);

            if lo[d] > hi[d] {
                return None;
            }
        }
        Some(Self { lo, hi })
    }


    pub fn intersects(&self, other: &Self) -> bool {
        (0..DIM).all(|d| self.lo[d].max(other.lo[d]) <= self.hi[d].min(other.hi[d]))
    }


    /**
     * Return the coarse index space that covers this one when every `ratio`
     * indexes are merged into one. Negative indexes round toward negative
     * infinity.
     */
    pub fn coarsen(&self, ratio: i64) -> Self {
        assert!(ratio > 0, "coarsening ratio must be positive");
        let mut result = *self;

        for d in 0..DIM {
            result.lo[d] = self.lo[d].div_euclid(ratio);
            result.hi[d] = self.hi[d].div_euclid(ratio);
        }
        result
    }


    /**
     * Increase the size of this index space by the given factor.
     */
    pub fn refine(&self, ratio: i64) -> Self {
        assert!(ratio > 0, "refinement ratio must be positive");
        let mut result = *self;

        for d in 0..DIM {
            result.lo[d] = self.lo[d] * ratio;
            result.hi[d] = (self.hi[d] + 1) * ratio - 1;
        }
        result
    }


    /**
     * Determine whether coarsening by `ratio` is exact (refining the result
     * gives back this space), and leaves at least `min_width` indexes on
     * every axis.
     */
    pub fn coarsenable(&self, ratio: i64, min_width: usize) -> bool {
        !self.is_empty()
            && self.coarsen(ratio).refine(ratio) == *self
            && self.coarsen(ratio).shape().iter().all(|&n| n >= min_width)
    }


    /**
     * Return the linear offset for the given index, in a row-major memory
     * buffer aligned with the start of this index space.
     */
    pub fn row_major_offset(&self, index: [i64; DIM]) -> usize {
        let shape = self.shape();
        let mut offset = 0;

        for d in 0..DIM {
            offset = offset * shape[d] + (index[d] - self.lo[d]) as usize;
        }
        offset
    }


    /**
     * Inverse of `row_major_offset`: recover the index at a given linear
     * offset. In 3D this is `k = n % nk; j = (n / nk) % nj; i = n / (nj nk)`
     * for a buffer of shape `(ni, nj, nk)`.
     */
    pub fn index_at(&self, offset: usize) -> [i64; DIM] {
        let shape = self.shape();
        let mut index = [0; DIM];
        let mut rest = offset;

        for d in (0..DIM).rev() {
            index[d] = self.lo[d] + (rest % shape[d]) as i64;
            rest /= shape[d];
        }
        index
    }


    /**
     * Return an iterator which traverses the index space in row-major order
     * (C-like; the final index increases fastest).
     */
    pub fn iter(&self) -> impl Iterator<Item = [i64; DIM]> + '_ {
        let n = if self.is_empty() { 0 } else { self.num_points() };
        (0..n).map(move |offset| self.index_at(offset))
    }
}




// ============================================================================
impl<const DIM: usize> std::fmt::Display for IndexSpace<DIM> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:?} {:?})", self.lo, self.hi)
    }
}




/**
 * Less imposing factory function to construct an IndexSpace object.
 */
pub fn ibox<const DIM: usize>(lo: [i64; DIM], hi: [i64; DIM]) -> IndexSpace<DIM> {
    IndexSpace::new(lo, hi)
}
