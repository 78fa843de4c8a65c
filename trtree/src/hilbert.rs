//! Hilbert curve keys used to order entries before bulk construction.
//!
//! The Hilbert curve is a continuous space-filling curve that maps grid cells
//! to positions along a line while keeping neighbouring cells close to each
//! other. Packing entries in Hilbert order keeps the leaves built by
//! [`RTree::bulk_construct`](crate::RTree::bulk_construct) spatially compact.
//!
//! Keys are computed for any number of axes with Skilling's transpose
//! algorithm ("Programming the Hilbert curve", 2004).

use crate::bounding_box::BoundingBox;

/// Upper bound on the grid resolution of a single axis.
pub const MAX_BITS_PER_AXIS: u32 = 16;

/// Number of grid bits per axis so that a `D`-axis key fits in a `u128`.
pub const fn bits_per_axis(dims: usize) -> u32 {
    let fit = if dims == 0 { MAX_BITS_PER_AXIS } else { (128 / dims) as u32 };
    if fit < MAX_BITS_PER_AXIS {
        fit
    } else {
        MAX_BITS_PER_AXIS
    }
}

/// Encodes a grid cell to its distance along the Hilbert curve.
///
/// Every coordinate is masked to its lowest `bits` bits; `bits * D` must not
/// exceed 128.
pub fn hilbert_index<const D: usize>(coords: [u32; D], bits: u32) -> u128 {
    debug_assert!(D > 0, "at least one axis is required");
    debug_assert!(bits >= 1 && bits <= 32, "bits must be 1-32");
    debug_assert!(bits as usize * D <= 128, "key does not fit in u128");

    let mask = if bits == 32 { u32::MAX } else { (1u32 << bits) - 1 };
    let mut x = coords.map(|c| c & mask);
    let top = 1u32 << (bits - 1);

    // inverse undo of the excess work
    let mut q = top;
    while q > 1 {
        let p = q - 1;
        for i in 0..D {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }

    // gray encode
    for i in 1..D {
        x[i] ^= x[i - 1];
    }
    let mut t = 0u32;
    let mut q = top;
    while q > 1 {
        if x[D - 1] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for v in x.iter_mut() {
        *v ^= t;
    }

    // interleave the transposed bits, most significant first
    let mut index = 0u128;
    for bit in (0..bits).rev() {
        for v in &x {
            index = (index << 1) | ((v >> bit) & 1) as u128;
        }
    }
    index
}

/// Hilbert key of the center of `bbox`, placed on a grid spanning `bounds`.
///
/// Axes where `bounds` has no extent map to the middle of the grid.
pub fn hilbert_key<const D: usize>(bbox: &BoundingBox<D>, bounds: &BoundingBox<D>, bits: u32) -> u128 {
    let cells = ((1u64 << bits) - 1) as f64;
    let mut coords = [0u32; D];
    for (axis, coord) in coords.iter_mut().enumerate() {
        let range = bounds.extent(axis);
        let norm = if range > 0.0 {
            ((bbox.center(axis) - bounds.min[axis]) / range).clamp(0.0, 1.0)
        } else {
            0.5
        };
        *coord = (norm * cells).round() as u32;
    }
    hilbert_index(coords, bits)
}
