//! Patch extraction as an explicit index mapping.
//!
//! For every output location the map records, for each `(row, col)` of the
//! window, the offset of the input element it reads inside one channel plane,
//! or `None` when the element lies outside the input. Patch elements are in
//! `(channel, row, col)` order; channel `dc` reads the same taps shifted by
//! `dc * rows * cols`. The forward pass gathers through the map; both
//! gradients scatter-add through the same map, so the two directions cannot
//! disagree.

use simnets_core::Float;

use crate::geometry::Geometry;

#[derive(Debug, Clone)]
pub struct PatchMap {
    channels: usize,
    plane: usize,
    window: usize,
    locations: usize,
    taps: Vec<Option<usize>>,
}

impl PatchMap {
    pub fn new(geometry: &Geometry) -> Self {
        let g = geometry;
        let window = g.filter_rows * g.filter_cols;
        let locations = g.locations();
        let mut taps = Vec::with_capacity(window * locations);

        for i in 0..g.out_rows {
            for j in 0..g.out_cols {
                let row0 = (i * g.stride_rows) as isize - g.pad_rows as isize;
                let col0 = (j * g.stride_cols) as isize - g.pad_cols as isize;
                for di in 0..g.filter_rows {
                    let row = row0 + di as isize;
                    for dj in 0..g.filter_cols {
                        let col = col0 + dj as isize;
                        let inside = row >= 0
                            && (row as usize) < g.in_rows
                            && col >= 0
                            && (col as usize) < g.in_cols;
                        taps.push(if inside {
                            Some(row as usize * g.in_cols + col as usize)
                        } else {
                            None
                        });
                    }
                }
            }
        }

        PatchMap {
            channels: g.channels,
            plane: g.in_rows * g.in_cols,
            window,
            locations,
            taps,
        }
    }

    /// Elements in one patch: `channels * filter_rows * filter_cols`.
    pub fn patch_len(&self) -> usize {
        self.channels * self.window
    }

    /// Number of output locations, `out_rows * out_cols`.
    pub fn locations(&self) -> usize {
        self.locations
    }

    /// In-plane source offsets of the window at output location
    /// `loc = i * out_cols + j`, in `(row, col)` order.
    pub fn taps(&self, loc: usize) -> &[Option<usize>] {
        &self.taps[loc * self.window..(loc + 1) * self.window]
    }

    /// Copy the patch at `loc` out of `image`, substituting `fill` for
    /// out-of-bounds elements.
    pub fn gather<T: Float>(&self, image: &[T], loc: usize, fill: T, patch: &mut [T]) {
        let taps = self.taps(loc);
        for (dc, dst) in patch.chunks_mut(self.window).take(self.channels).enumerate() {
            let plane = &image[dc * self.plane..(dc + 1) * self.plane];
            for (d, tap) in dst.iter_mut().zip(taps) {
                *d = match *tap {
                    Some(offset) => plane[offset],
                    None => fill,
                };
            }
        }
    }

    /// Add `contributions` (one per patch element) into `image_grad` at the
    /// source offsets of `loc`. Out-of-bounds contributions are dropped.
    pub fn scatter_add<T: Float>(&self, loc: usize, contributions: &[T], image_grad: &mut [T]) {
        let taps = self.taps(loc);
        for (dc, src) in contributions.chunks(self.window).take(self.channels).enumerate() {
            let plane = &mut image_grad[dc * self.plane..(dc + 1) * self.plane];
            for (&value, tap) in src.iter().zip(taps) {
                if let Some(offset) = *tap {
                    plane[offset] += value;
                }
            }
        }
    }
}
