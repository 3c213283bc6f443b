// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Iterative radix-2 FFT, real input.
//!
//! Sized for the periodogram's needs: power-of-two lengths up to a few
//! thousand points, single precision throughout.

use num::complex::Complex32;

/// Computes the magnitude spectrum of `input` into `mag`. `input.len()`
/// must be a power of two and `mag` half as long (bins `0..N/2`).
pub fn rfft_mag(input: &[f32], mag: &mut [f32]) {
    let n = input.len();
    debug_assert!(n.is_power_of_two());
    debug_assert_eq!(mag.len(), n / 2);

    let mut buf: Vec<Complex32> =
        input.iter().map(|&x| Complex32::new(x, 0.0)).collect();
    fft_in_place(&mut buf);
    for (k, out) in mag.iter_mut().enumerate() {
        *out = buf[k].norm_sqr().sqrt();
    }
}

fn fft_in_place(buf: &mut [Complex32]) {
    let n = buf.len();

    // Bit-reversal permutation.
    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            buf.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let ang = -2.0 * core::f32::consts::PI / len as f32;
        let wlen = Complex32::new(ang.cos(), ang.sin());
        for base in (0..n).step_by(len) {
            let mut w = Complex32::new(1.0, 0.0);
            for k in 0..len / 2 {
                let u = buf[base + k];
                let v = buf[base + k + len / 2] * w;
                buf[base + k] = u + v;
                buf[base + k + len / 2] = u - v;
                w *= wlen;
            }
        }
        len <<= 1;
    }
}
