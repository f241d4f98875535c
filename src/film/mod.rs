//! Image accumulation buffer.
//!
//! A [`Film`] owns one dense row-major buffer of 4-channel radiance values
//! and a pixel traversal order shared by all producer threads. Workers fold
//! radiance samples in concurrently; a display layer reads eventually
//! consistent snapshots without locking.
//!
//! Atomic scheme: each channel is stored as the bit pattern of an `f32`
//! inside an `AtomicU32`. [`Film::atomic_add`] updates a channel with a
//! compare-exchange-weak retry loop, so concurrent adds to the same pixel
//! never lose a contribution. All accesses use relaxed ordering; readers may
//! observe a pixel mid-update but never a torn channel or a value nobody
//! wrote. [`Film::accumulate`] is a plain read-modify-write for the
//! single-producer-per-pixel refinement path and must not race with itself
//! on one pixel.

use crate::util::{UVec2, Vec2, Vec4};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Where a sample lands on the film.
///
/// Integer coordinates address a pixel directly and are dropped when out of
/// range. Normalized device coordinates cover [-1, 1] on both axes (+y up)
/// and clamp to the nearest edge pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilmCoord {
    Pixel(UVec2),
    Ndc(Vec2),
}

impl From<UVec2> for FilmCoord {
    #[inline]
    fn from(p: UVec2) -> Self {
        Self::Pixel(p)
    }
}

impl From<Vec2> for FilmCoord {
    #[inline]
    fn from(ndc: Vec2) -> Self {
        Self::Ndc(ndc)
    }
}

/// Progressive accumulation buffer.
///
/// Deliberately not `Clone`: duplicating an in-flight accumulation buffer is
/// never meaningful, and producers hold references to exactly one instance.
pub struct Film {
    dimensions: UVec2,
    thread_count: u32,
    /// One `[r, g, b, a]` of f32 bit patterns per pixel, row-major.
    buffer: Vec<[AtomicU32; 4]>,
    /// Permutation of pixel indices deciding traversal/update order.
    sequence: Vec<u32>,
    /// `thread_count + 1` offsets into `sequence`, one contiguous run per
    /// producer thread.
    partitions: Vec<u32>,
    /// Write generation for display-snapshot invalidation.
    version: AtomicU64,
}

impl Default for Film {
    fn default() -> Self {
        Self::new()
    }
}

impl Film {
    /// Creates an empty film; size it with [`Film::resize`].
    pub fn new() -> Self {
        Self {
            dimensions: UVec2::ZERO,
            thread_count: 1,
            buffer: Vec::new(),
            sequence: Vec::new(),
            partitions: vec![0, 0],
            version: AtomicU64::new(0),
        }
    }

    /// Reallocates storage for `dim` and rebuilds the traversal order for
    /// `thread_count` producers. Content is cleared. Must not overlap with
    /// accumulation calls; the `&mut` receiver enforces that within safe
    /// code.
    pub fn resize(&mut self, dim: UVec2, thread_count: u32) {
        let count = (dim.x as usize) * (dim.y as usize);
        let threads = thread_count.max(1);

        self.dimensions = dim;
        self.thread_count = threads;

        self.buffer = Vec::new();
        self.buffer.resize_with(count, Default::default);

        // Pixel p lands in partition p % threads, so simultaneous workers
        // touch interleaved pixels and previews fill the frame evenly. Each
        // partition is a contiguous run of `sequence`, shuffled so updates
        // inside a run do not crawl in scanline order.
        self.sequence = Vec::with_capacity(count);
        self.partitions = Vec::with_capacity(threads as usize + 1);
        self.partitions.push(0);
        for part in 0..threads as usize {
            let run_start = self.sequence.len();
            let mut i = part;
            while i < count {
                self.sequence.push(i as u32);
                i += threads as usize;
            }
            shuffle(&mut self.sequence[run_start..], 0x9E37_79B9 ^ part as u64);
            self.partitions.push(self.sequence.len() as u32);
        }

        self.version.fetch_add(1, Ordering::Relaxed);
    }

    /// Width and height in pixels.
    #[inline]
    pub fn dimensions(&self) -> UVec2 {
        self.dimensions
    }

    /// Total pixel count.
    #[inline]
    pub fn count(&self) -> usize {
        self.buffer.len()
    }

    /// Number of producer threads the traversal order is partitioned for.
    #[inline]
    pub fn thread_count(&self) -> u32 {
        self.thread_count
    }

    /// The `i`-th pixel index in traversal order. `i < count()`.
    #[inline]
    pub fn pixel_at(&self, i: usize) -> u32 {
        self.sequence[i]
    }

    /// The contiguous range of traversal slots owned by one producer thread.
    /// Out-of-range `thread_id` yields an empty range.
    pub fn thread_range(&self, thread_id: u32) -> std::ops::Range<usize> {
        if thread_id >= self.thread_count {
            return 0..0;
        }
        let i = thread_id as usize;
        self.partitions[i] as usize..self.partitions[i + 1] as usize
    }

    /// Write generation. Moves on `resize`/`clear`/`flush_to`/`mark_dirty`;
    /// per-sample calls leave it alone, producers mark once per finished
    /// pass.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Records that accumulated content changed since the last snapshot.
    #[inline]
    pub fn mark_dirty(&self) {
        self.version.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds `value` to one pixel. Safe from any number of threads targeting
    /// the same or different pixels; no contribution is ever lost.
    /// `thread_id` only hints which traversal partition the caller works
    /// from; correctness never depends on it.
    pub fn atomic_add(&self, value: Vec4, coord: impl Into<FilmCoord>, thread_id: u32) {
        let _ = thread_id;
        let Some(index) = self.resolve(coord.into()) else {
            return;
        };
        let pixel = &self.buffer[index];
        for (channel, add) in pixel.iter().zip(value.to_array()) {
            atomic_add_f32(channel, add);
        }
    }

    /// Folds a new estimate into one pixel with the running mean rule
    /// `stored = stored*(1-t) + value*t`. With `t = 1/n` for the n-th
    /// estimate the pixel converges to the arithmetic mean of all estimates.
    ///
    /// Plain load/store: the caller owns this pixel exclusively while the
    /// call runs. Concurrent same-pixel contributions belong in
    /// [`Film::atomic_add`].
    pub fn accumulate(&self, value: Vec4, coord: impl Into<FilmCoord>, t: f32) {
        let Some(index) = self.resolve(coord.into()) else {
            return;
        };
        let pixel = &self.buffer[index];
        for (channel, new) in pixel.iter().zip(value.to_array()) {
            let old = f32::from_bits(channel.load(Ordering::Relaxed));
            let merged = old * (1.0 - t) + new * t;
            channel.store(merged.to_bits(), Ordering::Relaxed);
        }
    }

    /// Blends every pixel of this film into `other` with the running mean
    /// rule, treating this film's content as one more weighted sample of
    /// `other`. Assumes both films are quiescent. Mismatched dimensions are
    /// a no-op.
    pub fn flush_to(&self, other: &Film, t: f32) {
        if self.dimensions != other.dimensions {
            tracing::debug!(
                from = ?self.dimensions, to = ?other.dimensions,
                "flush_to dimension mismatch, skipped"
            );
            return;
        }
        for (src, dst) in self.buffer.iter().zip(other.buffer.iter()) {
            for (s, d) in src.iter().zip(dst.iter()) {
                let value = f32::from_bits(s.load(Ordering::Relaxed));
                let old = f32::from_bits(d.load(Ordering::Relaxed));
                let merged = old * (1.0 - t) + value * t;
                d.store(merged.to_bits(), Ordering::Relaxed);
            }
        }
        other.version.fetch_add(1, Ordering::Relaxed);
    }

    /// Zeroes the buffer in place; dimensions and traversal order are kept.
    /// Assumes quiescent producers.
    pub fn clear(&self) {
        for pixel in &self.buffer {
            for channel in pixel {
                channel.store(0, Ordering::Relaxed);
            }
        }
        self.version.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the whole buffer. Eventually consistent under concurrent
    /// producers.
    pub fn data(&self) -> Vec<Vec4> {
        let mut out = Vec::new();
        self.copy_into(&mut out);
        out
    }

    /// Snapshot into a caller-owned vector, reusing its allocation.
    pub fn copy_into(&self, out: &mut Vec<Vec4>) {
        out.clear();
        out.reserve(self.buffer.len());
        out.extend(self.buffer.iter().map(|pixel| {
            Vec4::new(
                f32::from_bits(pixel[0].load(Ordering::Relaxed)),
                f32::from_bits(pixel[1].load(Ordering::Relaxed)),
                f32::from_bits(pixel[2].load(Ordering::Relaxed)),
                f32::from_bits(pixel[3].load(Ordering::Relaxed)),
            )
        }));
    }

    /// Single-pixel snapshot by buffer index; `None` when out of range.
    pub fn value_at(&self, index: usize) -> Option<Vec4> {
        let pixel = self.buffer.get(index)?;
        Some(Vec4::new(
            f32::from_bits(pixel[0].load(Ordering::Relaxed)),
            f32::from_bits(pixel[1].load(Ordering::Relaxed)),
            f32::from_bits(pixel[2].load(Ordering::Relaxed)),
            f32::from_bits(pixel[3].load(Ordering::Relaxed)),
        ))
    }

    /// Maps a coordinate to a buffer index, dropping invalid targets.
    fn resolve(&self, coord: FilmCoord) -> Option<usize> {
        if self.buffer.is_empty() {
            return None;
        }
        let (w, h) = (self.dimensions.x, self.dimensions.y);
        match coord {
            FilmCoord::Pixel(p) => {
                if p.x >= w || p.y >= h {
                    return None;
                }
                Some((p.y as usize) * (w as usize) + p.x as usize)
            }
            FilmCoord::Ndc(ndc) => {
                if !(ndc.x.is_finite() && ndc.y.is_finite()) {
                    return None;
                }
                // [-1, 1] with +y up, row 0 at the top; clamp to the nearest
                // in-range pixel.
                let fx = (ndc.x * 0.5 + 0.5) * w as f32;
                let fy = (0.5 - ndc.y * 0.5) * h as f32;
                let x = (fx as i64).clamp(0, w as i64 - 1) as usize;
                let y = (fy as i64).clamp(0, h as i64 - 1) as usize;
                Some(y * w as usize + x)
            }
        }
    }
}

/// Lock-free `f32` add over a bit-pattern slot.
fn atomic_add_f32(slot: &AtomicU32, add: f32) {
    let mut current = slot.load(Ordering::Relaxed);
    loop {
        let next = (f32::from_bits(current) + add).to_bits();
        match slot.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

/// Fisher-Yates with a fixed-seed LCG; deterministic across runs.
fn shuffle(run: &mut [u32], seed: u64) {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        (state >> 32) as u32
    };
    for i in (1..run.len()).rev() {
        let j = next() as usize % (i + 1);
        run.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_a_partitioned_permutation() {
        let mut film = Film::new();
        film.resize(UVec2::new(37, 23), 4);
        let count = film.count();
        assert_eq!(count, 37 * 23);

        let mut seen = vec![false; count];
        for i in 0..count {
            let p = film.pixel_at(i) as usize;
            assert!(p < count);
            assert!(!seen[p], "pixel {} listed twice", p);
            seen[p] = true;
        }
        assert!(seen.iter().all(|&s| s));

        // Partition t holds exactly the pixels congruent to t mod 4, and the
        // per-thread ranges tile the sequence.
        let mut covered = 0;
        for t in 0..4 {
            let range = film.thread_range(t);
            assert_eq!(range.start, covered);
            for i in range.clone() {
                assert_eq!(film.pixel_at(i) % 4, t);
            }
            covered = range.end;
        }
        assert_eq!(covered, count);
        assert_eq!(film.thread_range(4), 0..0);
    }

    #[test]
    fn test_resize_is_deterministic() {
        let mut a = Film::new();
        let mut b = Film::new();
        a.resize(UVec2::new(64, 64), 8);
        b.resize(UVec2::new(64, 64), 8);
        let order_a: Vec<u32> = (0..a.count()).map(|i| a.pixel_at(i)).collect();
        let order_b: Vec<u32> = (0..b.count()).map(|i| b.pixel_at(i)).collect();
        assert_eq!(order_a, order_b);
    }

    #[test]
    fn test_ndc_mapping_clamps_to_edges() {
        let mut film = Film::new();
        film.resize(UVec2::new(4, 4), 1);

        // Center of NDC space lands inside the image.
        film.atomic_add(Vec4::ONE, Vec2::ZERO, 0);
        // Far outside clamps to corners instead of wrapping or dropping.
        film.atomic_add(Vec4::ONE, Vec2::new(-9.0, 9.0), 0);
        film.atomic_add(Vec4::ONE, Vec2::new(9.0, -9.0), 0);

        let data = film.data();
        assert_eq!(data[0], Vec4::ONE, "(-1, +1) is the top-left pixel");
        assert_eq!(data[15], Vec4::ONE, "(+1, -1) is the bottom-right pixel");
        let total: f32 = data.iter().map(|v| v.x).sum();
        assert_eq!(total, 3.0);
    }

    #[test]
    fn test_out_of_range_pixel_is_dropped() {
        let mut film = Film::new();
        film.resize(UVec2::new(2, 2), 1);
        film.atomic_add(Vec4::ONE, UVec2::new(2, 0), 0);
        film.atomic_add(Vec4::ONE, UVec2::new(0, 2), 0);
        film.accumulate(Vec4::ONE, UVec2::new(5, 5), 1.0);
        assert!(film.data().iter().all(|v| *v == Vec4::ZERO));
    }

    #[test]
    fn test_zero_sized_film_is_inert() {
        let mut film = Film::new();
        film.resize(UVec2::ZERO, 4);
        assert_eq!(film.count(), 0);
        film.atomic_add(Vec4::ONE, Vec2::ZERO, 0);
        film.accumulate(Vec4::ONE, UVec2::ZERO, 0.5);
        film.clear();
        assert!(film.data().is_empty());
        assert_eq!(film.thread_range(0), 0..0);
    }

    #[test]
    fn test_version_moves_on_structural_changes() {
        let mut film = Film::new();
        let v0 = film.version();
        film.resize(UVec2::new(2, 2), 1);
        let v1 = film.version();
        assert!(v1 > v0);
        film.clear();
        assert!(film.version() > v1);
        let v2 = film.version();
        film.mark_dirty();
        assert!(film.version() > v2);
    }
}
