use std::ops::{Index, IndexMut};
use crate::index_space::IndexSpace;




/**
 * A patch holds the field values on one tile: its valid region plus a guard
 * zone of `n_grow` cells on every side. The data is a row-major array over
 * the grown region, and is addressed by global index.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct Patch<const DIM: usize> {
    valid: IndexSpace<DIM>,
    n_grow: i64,
    data: Vec<f64>,
}




// ============================================================================
impl<const DIM: usize> Patch<DIM> {


    /**
     * Generate a zero-filled patch over the given valid region.
     */
    pub fn new(valid: IndexSpace<DIM>, n_grow: i64) -> Self {
        assert!(n_grow >= 0, "patch requested with negative grow {}", n_grow);

        Self {
            valid,
            n_grow,
            data: vec![0.0; valid.grow(n_grow).num_points()],
        }
    }


    /**
     * Generate a patch with values on the whole grown region defined from a
     * closure of the global index.
     */
    pub fn from_function<F>(valid: IndexSpace<DIM>, n_grow: i64, f: F) -> Self
    where
        F: Fn([i64; DIM]) -> f64
    {
        let mut patch = Self::new(valid, n_grow);
        let grown = patch.grown();

        for (x, index) in patch.data.iter_mut().zip(grown.iter()) {
            *x = f(index)
        }
        patch
    }


    pub fn valid(&self) -> IndexSpace<DIM> {
        self.valid
    }


    /**
     * Return the region covered by the backing array.
     */
    pub fn grown(&self) -> IndexSpace<DIM> {
        self.valid.grow(self.n_grow)
    }


    pub fn n_grow(&self) -> i64 {
        self.n_grow
    }


    pub fn data(&self) -> &[f64] {
        &self.data
    }


    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|x| *x = value)
    }


    /**
     * Copy the values in a region out to a buffer, in row-major order of the
     * region.
     */
    pub fn pack(&self, region: &IndexSpace<DIM>) -> Vec<f64> {
        self.validate_region(region);
        region.iter().map(|index| self[index]).collect()
    }


    /**
     * Extend a buffer with the values in a region, in row-major order.
     */
    pub fn pack_into(&self, region: &IndexSpace<DIM>, buffer: &mut Vec<f64>) {
        self.validate_region(region);
        buffer.extend(region.iter().map(|index| self[index]))
    }


    /**
     * Write the values of a region from a buffer in row-major order, and
     * return the number consumed.
     */
    pub fn unpack(&mut self, region: &IndexSpace<DIM>, buffer: &[f64]) -> usize {
        self.validate_region(region);
        let n = region.num_points();

        assert!(buffer.len() >= n, "buffer of {} values is too short for region {}", buffer.len(), region);

        for (index, &x) in region.iter().zip(buffer) {
            self[index] = x
        }
        n
    }


    /**
     * Copy a region from another patch, which must cover it too.
     */
    pub fn copy_region(&mut self, src: &Self, region: &IndexSpace<DIM>) {
        src.validate_region(region);
        self.validate_region(region);

        for index in region.iter() {
            self[index] = src[index]
        }
    }


    /**
     * Return the mean over a region. This is how a coarse cell samples the
     * fine cells it covers.
     */
    pub fn average_over(&self, region: &IndexSpace<DIM>) -> f64 {
        self.validate_region(region);
        region.iter().map(|index| self[index]).sum::<f64>() / region.num_points() as f64
    }


    fn offset(&self, index: [i64; DIM]) -> usize {
        let grown = self.grown();

        if !grown.contains(index) {
            panic!("index {:?} out of range on patch {}", index, grown);
        }
        grown.row_major_offset(index)
    }


    fn validate_region(&self, region: &IndexSpace<DIM>) {
        if !self.grown().contains_space(region) {
            panic!("region {} out of range on patch {}", region, self.grown());
        }
    }
}




// ============================================================================
impl<const DIM: usize> Index<[i64; DIM]> for Patch<DIM> {
    type Output = f64;

    fn index(&self, index: [i64; DIM]) -> &f64 {
        &self.data[self.offset(index)]
    }
}

impl<const DIM: usize> IndexMut<[i64; DIM]> for Patch<DIM> {
    fn index_mut(&mut self, index: [i64; DIM]) -> &mut f64 {
        let offset = self.offset(index);
        &mut self.data[offset]
    }
}
