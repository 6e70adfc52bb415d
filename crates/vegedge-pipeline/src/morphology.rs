//! Binary mask morphology built on `imageproc`.

use image::Luma;
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::types::{Dimensions, MASK_SET, Mask};

/// Returns `true` if the mask pixel at `(x, y)` is set.
#[must_use]
pub fn is_set(mask: &Mask, x: u32, y: u32) -> bool {
    mask.get_pixel(x, y)[0] != 0
}

/// Number of set pixels.
#[must_use]
pub fn count_set(mask: &Mask) -> usize {
    mask.as_raw().iter().filter(|&&v| v != 0).count()
}

/// Build a mask by evaluating `f(x, y)` at every pixel.
#[must_use]
pub fn mask_from_fn(dims: Dimensions, mut f: impl FnMut(u32, u32) -> bool) -> Mask {
    Mask::from_fn(dims.width, dims.height, |x, y| {
        Luma([if f(x, y) { MASK_SET } else { 0 }])
    })
}

/// Dilate with a disk of the given radius (every pixel within Euclidean
/// distance `radius` of a set pixel becomes set).
#[must_use]
pub fn dilate_disk(mask: &Mask, radius: u8) -> Mask {
    imageproc::morphology::dilate(mask, Norm::L2, radius)
}

/// Clear every 8-connected component with fewer than `min_size` pixels.
#[must_use]
pub fn remove_small_objects(mask: &Mask, min_size: usize) -> Mask {
    if min_size <= 1 {
        return mask.clone();
    }
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let mut sizes: Vec<usize> = Vec::new();
    for p in labels.pixels() {
        let label = p[0] as usize;
        if label == 0 {
            continue;
        }
        if sizes.len() <= label {
            sizes.resize(label + 1, 0);
        }
        sizes[label] += 1;
    }
    Mask::from_fn(mask.width(), mask.height(), |x, y| {
        let label = labels.get_pixel(x, y)[0] as usize;
        let keep = label != 0 && sizes[label] >= min_size;
        Luma([if keep { MASK_SET } else { 0 }])
    })
}
