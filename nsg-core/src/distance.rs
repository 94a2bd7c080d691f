//! Distance metrics and SIMD kernels.
//!
//! # Kernels
//!
//! Both kernels (`l2_squared`, `inner_product`) use 4-way accumulator
//! unrolling so consecutive FMAs do not wait on each other:
//! - x86_64 with AVX2+FMA: 32 floats per iteration (runtime detection)
//! - aarch64: NEON, 16 floats per iteration
//! - everything else: portable scalar loop
//!
//! # Metric Dispatch
//!
//! `Metric` is a closed enum. Call sites resolve the variant once per
//! comparison with a `match`; there are no trait objects on the hot path.

/// Distance metric, fixed when an index is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Metric {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// Negative inner product (smaller is closer).
    InnerProduct,
    /// Squared Euclidean distance expanded as `|a|^2 + |b|^2 - 2<a,b>`
    /// with the norms precomputed once per stored point and per query.
    FastL2,
}

impl Metric {
    /// Distance between two raw vectors.
    ///
    /// `FastL2` has no norms available here and falls back to the exact
    /// squared L2 kernel.
    #[inline]
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 | Metric::FastL2 => l2_squared(a, b),
            Metric::InnerProduct => -inner_product(a, b),
        }
    }

    /// Distance between two vectors whose squared norms are already known.
    ///
    /// Only `FastL2` reads the norms; the other metrics ignore them.
    #[inline]
    #[must_use]
    pub fn distance_with_norms(self, a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
        match self {
            Metric::L2 => l2_squared(a, b),
            Metric::InnerProduct => -inner_product(a, b),
            Metric::FastL2 => a_norm + b_norm - 2.0 * inner_product(a, b),
        }
    }

    /// Stable numeric code used by the C bindings.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Metric::L2 => 0,
            Metric::InnerProduct => 1,
            Metric::FastL2 => 2,
        }
    }

    /// Inverse of [`Metric::code`].
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Metric::L2),
            1 => Some(Metric::InnerProduct),
            2 => Some(Metric::FastL2),
            _ => None,
        }
    }
}

/// A query prepared for repeated scoring against stored points.
///
/// Both search modes score through this type so that they compute
/// bit-identical distances.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueryScorer<'q> {
    metric: Metric,
    query: &'q [f32],
    norm: f32,
}

impl<'q> QueryScorer<'q> {
    pub(crate) fn new(metric: Metric, query: &'q [f32]) -> Self {
        let norm = match metric {
            Metric::FastL2 => squared_norm(query),
            Metric::L2 | Metric::InnerProduct => 0.0,
        };
        Self { metric, query, norm }
    }

    #[inline]
    pub(crate) fn score(&self, vector: &[f32], vector_norm: f32) -> f32 {
        self.metric.distance_with_norms(self.query, self.norm, vector, vector_norm)
    }
}

/// Squared L2 norm of a vector.
#[inline]
#[must_use]
pub fn squared_norm(a: &[f32]) -> f32 {
    inner_product(a, a)
}

/// Squared Euclidean distance with SIMD acceleration.
#[inline]
#[must_use]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return unsafe { l2_squared_avx2(a, b) };
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { l2_squared_neon(a, b) };
    }

    l2_squared_scalar(a, b)
}

/// Inner product with SIMD acceleration.
#[inline]
#[must_use]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return unsafe { inner_product_avx2(a, b) };
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { inner_product_neon(a, b) };
    }

    inner_product_scalar(a, b)
}

/// Portable squared L2.
#[inline]
#[must_use]
pub fn l2_squared_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Portable inner product.
#[inline]
#[must_use]
pub fn inner_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn hsum256(v: std::arch::x86_64::__m256) -> f32 {
    use std::arch::x86_64::*;

    unsafe {
        let high = _mm256_extractf128_ps(v, 1);
        let low = _mm256_castps256_ps128(v);
        let sum128 = _mm_add_ps(low, high);
        let sum64 = _mm_add_ps(sum128, _mm_movehl_ps(sum128, sum128));
        let sum32 = _mm_add_ss(sum64, _mm_shuffle_ps(sum64, sum64, 0x55));
        _mm_cvtss_f32(sum32)
    }
}

/// AVX2 squared L2: main loop 32 floats (4 accumulators × 8 lanes), then
/// 8-float chunks, then a scalar tail.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn l2_squared_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let len = a.len();
    let pa = a.as_ptr();
    let pb = b.as_ptr();
    let mut i = 0;

    let mut acc = [_mm256_setzero_ps(); 4];

    while i + 32 <= len {
        for (lane, sum) in acc.iter_mut().enumerate() {
            let off = i + lane * 8;
            let diff = unsafe { _mm256_sub_ps(_mm256_loadu_ps(pa.add(off)), _mm256_loadu_ps(pb.add(off))) };
            *sum = _mm256_fmadd_ps(diff, diff, *sum);
        }
        i += 32;
    }

    while i + 8 <= len {
        let diff = unsafe { _mm256_sub_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i))) };
        acc[0] = _mm256_fmadd_ps(diff, diff, acc[0]);
        i += 8;
    }

    let combined = _mm256_add_ps(_mm256_add_ps(acc[0], acc[1]), _mm256_add_ps(acc[2], acc[3]));
    let mut total = unsafe { hsum256(combined) };

    while i < len {
        let diff = unsafe { *pa.add(i) - *pb.add(i) };
        total += diff * diff;
        i += 1;
    }

    total
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn inner_product_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let len = a.len();
    let pa = a.as_ptr();
    let pb = b.as_ptr();
    let mut i = 0;

    let mut acc = [_mm256_setzero_ps(); 4];

    while i + 32 <= len {
        for (lane, sum) in acc.iter_mut().enumerate() {
            let off = i + lane * 8;
            let (va, vb) = unsafe { (_mm256_loadu_ps(pa.add(off)), _mm256_loadu_ps(pb.add(off))) };
            *sum = _mm256_fmadd_ps(va, vb, *sum);
        }
        i += 32;
    }

    while i + 8 <= len {
        let (va, vb) = unsafe { (_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i))) };
        acc[0] = _mm256_fmadd_ps(va, vb, acc[0]);
        i += 8;
    }

    let combined = _mm256_add_ps(_mm256_add_ps(acc[0], acc[1]), _mm256_add_ps(acc[2], acc[3]));
    let mut total = unsafe { hsum256(combined) };

    while i < len {
        total += unsafe { *pa.add(i) * *pb.add(i) };
        i += 1;
    }

    total
}

/// NEON squared L2: 16 floats per iteration (4 accumulators × 4 lanes).
#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn l2_squared_neon(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::aarch64::*;

    let len = a.len();
    let pa = a.as_ptr();
    let pb = b.as_ptr();
    let mut i = 0;

    let mut acc = [vdupq_n_f32(0.0); 4];

    while i + 16 <= len {
        for (lane, sum) in acc.iter_mut().enumerate() {
            let off = i + lane * 4;
            let diff = unsafe { vsubq_f32(vld1q_f32(pa.add(off)), vld1q_f32(pb.add(off))) };
            *sum = vfmaq_f32(*sum, diff, diff);
        }
        i += 16;
    }

    while i + 4 <= len {
        let diff = unsafe { vsubq_f32(vld1q_f32(pa.add(i)), vld1q_f32(pb.add(i))) };
        acc[0] = vfmaq_f32(acc[0], diff, diff);
        i += 4;
    }

    let mut total = vaddvq_f32(vaddq_f32(vaddq_f32(acc[0], acc[1]), vaddq_f32(acc[2], acc[3])));

    while i < len {
        let diff = unsafe { *pa.add(i) - *pb.add(i) };
        total += diff * diff;
        i += 1;
    }

    total
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn inner_product_neon(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::aarch64::*;

    let len = a.len();
    let pa = a.as_ptr();
    let pb = b.as_ptr();
    let mut i = 0;

    let mut acc = [vdupq_n_f32(0.0); 4];

    while i + 16 <= len {
        for (lane, sum) in acc.iter_mut().enumerate() {
            let off = i + lane * 4;
            let (va, vb) = unsafe { (vld1q_f32(pa.add(off)), vld1q_f32(pb.add(off))) };
            *sum = vfmaq_f32(*sum, va, vb);
        }
        i += 16;
    }

    while i + 4 <= len {
        let (va, vb) = unsafe { (vld1q_f32(pa.add(i)), vld1q_f32(pb.add(i))) };
        acc[0] = vfmaq_f32(acc[0], va, vb);
        i += 4;
    }

    let mut total = vaddvq_f32(vaddq_f32(vaddq_f32(acc[0], acc[1]), vaddq_f32(acc[2], acc[3])));

    while i < len {
        total += unsafe { *pa.add(i) * *pb.add(i) };
        i += 1;
    }

    total
}
