//! Common Utilities
//!
//! Numeric helpers shared by the synchronizer and the subframe processor

use num_complex::Complex32;
use tracing::trace;

/// Smallest FFT size accepted by the synchronizer
pub const FFT_SIZE_MIN: usize = 64;

/// Largest FFT size accepted by the synchronizer
pub const FFT_SIZE_MAX: usize = 2048;

/// Normal CP length of the first symbol of a slot, in 2048-point samples
pub const CP_NORM_0_LEN: usize = 160;

/// Normal CP length of the remaining symbols of a slot
pub const CP_NORM_LEN: usize = 144;

/// Extended CP length
pub const CP_EXT_LEN: usize = 512;

/// Exponential moving average
///
/// `alpha * value + (1 - alpha) * average`
pub fn ema(value: f32, average: f32, alpha: f32) -> f32 {
    alpha * value + (1.0 - alpha) * average
}

/// FFT sizes the PSS/SSS processing supports
pub fn fft_size_is_valid(fft_size: usize) -> bool {
    (FFT_SIZE_MIN..=FFT_SIZE_MAX).contains(&fft_size) && fft_size % 64 == 0
}

/// Scale a 2048-point CP length to the given FFT size
pub fn cp_len(fft_size: usize, len_2048: usize) -> usize {
    len_2048 * fft_size / 2048
}

/// Normal CP length for symbol `symbol` of a slot
pub fn cp_len_norm(symbol: usize, fft_size: usize) -> usize {
    if symbol == 0 {
        cp_len(fft_size, CP_NORM_0_LEN)
    } else {
        cp_len(fft_size, CP_NORM_LEN)
    }
}

/// Extended CP length
pub fn cp_len_ext(fft_size: usize) -> usize {
    cp_len(fft_size, CP_EXT_LEN)
}

/// Samples in one 1 ms subframe
pub fn sf_len(fft_size: usize) -> usize {
    15 * fft_size
}

/// FFT size used for a given number of PRBs
pub fn symbol_size(nof_prb: u32) -> Option<usize> {
    let size = match nof_prb {
        0 => return None,
        1..=6 => 128,
        7..=15 => 256,
        16..=25 => 512,
        26..=50 => 1024,
        51..=75 => 1536,
        76..=110 => 2048,
        _ => return None,
    };

    trace!("Symbol size {} for {} PRBs", size, nof_prb);
    Some(size)
}

/// Round up to next power of 2
pub fn next_power_of_2(n: u32) -> u32 {
    if n == 0 {
        return 1;
    }

    let mut v = n;
    v -= 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v + 1
}

/// `sum(a[i] * conj(b[i]))`
pub fn dot_prod_conj(a: &[Complex32], b: &[Complex32]) -> Complex32 {
    a.iter().zip(b).map(|(x, y)| x * y.conj()).sum()
}

/// Mean of `|x|^2`
pub fn avg_power(x: &[Complex32]) -> f32 {
    if x.is_empty() {
        return 0.0;
    }
    x.iter().map(|s| s.norm_sqr()).sum::<f32>() / x.len() as f32
}

/// Index of the largest value, first one on ties
pub fn max_index(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}
