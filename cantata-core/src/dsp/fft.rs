// Cantata
// Copyright (c) 2022-2025 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `fft` module implements the Fast Fourier Transform (FFT).
//!
//! The complex (I)FFT in this module supports sizes up-to 65536. The FFT is implemented using the
//! radix-2 Cooley-Tukey algorithm. All twiddle factors and the bit-reversal permutation table are
//! held by the `Fft` instance.

use std::f64;

use super::complex::Complex;

/// The complex Fast Fourier Transform (FFT).
pub struct Fft {
    perm: Box<[u16]>,
    twiddle: Box<[Complex]>,
}

impl Fft {
    /// The maximum FFT size.
    pub const MAX_SIZE: usize = 1 << 16;

    /// Instantiate a N-point FFT. The value of `n` must be a power-of-2 and less-than or equal to
    /// `Fft::MAX_SIZE`.
    pub fn new(n: usize) -> Self {
        // The FFT size must be a power of two.
        assert!(n.is_power_of_two());
        // The permutation table uses 16-bit indicies, limiting the maximum FFT size to 2^16.
        assert!(n <= Fft::MAX_SIZE);

        // Calculate the bit-reversal permutation table.
        let shift = (n as u32).leading_zeros() + 1;
        let perm = (0..n as u32).map(|i| (i.reverse_bits() >> shift) as u16).collect();

        // Pre-compute the twiddle factors, w[k] = exp(-j*2*pi*k/N) for k < N/2. Sub-transforms of
        // size M < N use every (N/M)-th factor.
        let theta = 2.0 * f64::consts::PI / n as f64;

        let twiddle = (0..n >> 1)
            .map(|k| {
                let angle = theta * k as f64;
                Complex::new(angle.cos() as f32, -angle.sin() as f32)
            })
            .collect();

        Self { perm, twiddle }
    }

    /// Get the size of the FFT.
    pub fn size(&self) -> usize {
        self.perm.len()
    }

    /// Calculate the FFT.
    pub fn fft(&self, x: &[Complex], y: &mut [Complex]) {
        let n = x.len();
        assert_eq!(n, y.len());
        assert_eq!(n, self.perm.len());

        // Bit reversal using the pre-computed permutation table.
        for (x, y) in self.perm.iter().map(|&i| x[usize::from(i)]).zip(y.iter_mut()) {
            *y = x;
        }

        Self::transform(y, &self.twiddle, 1);
    }

    /// Calculate the FFT in-place.
    pub fn fft_inplace(&self, x: &mut [Complex]) {
        let n = x.len();
        assert_eq!(n, self.perm.len());

        for (i, &j) in self.perm.iter().enumerate() {
            let j = usize::from(j);

            if i < j {
                x.swap(i, j);
            }
        }

        Self::transform(x, &self.twiddle, 1);
    }

    /// Calculate the inverse FFT.
    pub fn ifft(&self, x: &[Complex], y: &mut [Complex]) {
        let n = x.len();
        assert_eq!(n, y.len());
        assert_eq!(n, self.perm.len());

        // Bit reversal using the pre-computed permutation table, swapping the real and imaginary
        // components so that the forward transform computes the inverse.
        for (x, y) in self.perm.iter().map(|&i| x[usize::from(i)]).zip(y.iter_mut()) {
            *y = Complex { re: x.im, im: x.re };
        }

        Self::transform(y, &self.twiddle, 1);

        // Output scale.
        let c = 1.0 / n as f32;

        for y in y.iter_mut() {
            *y = Complex { re: c * y.im, im: c * y.re };
        }
    }

    /// Calculate the inverse FFT in-place.
    pub fn ifft_inplace(&self, x: &mut [Complex]) {
        let n = x.len();
        assert_eq!(n, self.perm.len());

        for (i, &j) in self.perm.iter().enumerate() {
            let j = usize::from(j);

            if i <= j {
                // Swap real and imaginary components while swapping for bit-reversal.
                let xi = x[i];
                let xj = x[j];
                x[i] = Complex::new(xj.im, xj.re);
                x[j] = Complex::new(xi.im, xi.re);
            }
        }

        Self::transform(x, &self.twiddle, 1);

        // Output scale.
        let c = 1.0 / n as f32;

        for x in x.iter_mut() {
            *x = Complex { re: c * x.im, im: c * x.re };
        }
    }

    /// The recursive FFT butterfly over bit-reversed input. The `stride` selects the twiddle
    /// factors of the current sub-transform size.
    fn transform(x: &mut [Complex], twiddle: &[Complex], stride: usize) {
        let n = x.len();

        match n {
            0 | 1 => (),
            2 => fft2(x),
            4 => fft4(x),
            _ => {
                let n_half = n >> 1;

                let (even, odd) = x.split_at_mut(n_half);

                Self::transform(even, twiddle, stride << 1);
                Self::transform(odd, twiddle, stride << 1);

                for (i, (e, o)) in even.iter_mut().zip(odd.iter_mut()).enumerate() {
                    let w = twiddle[i * stride];

                    let p = *e;
                    let q = *o * w;

                    *e = p + q;
                    *o = p - q;
                }
            }
        }
    }
}

#[inline(always)]
fn fft4(x: &mut [Complex]) {
    let x0 = [x[0] + x[1], x[0] - x[1]];
    let x1 = [x[2] + x[3], x[2] - x[3]];

    let x1p1 = Complex::new(x1[1].im, -x1[1].re);

    x[0] = x0[0] + x1[0];
    x[1] = x0[1] + x1p1;

    x[2] = x0[0] - x1[0];
    x[3] = x0[1] - x1p1;
}

#[inline(always)]
fn fft2(x: &mut [Complex]) {
    let x0 = x[0];
    x[0] = x0 + x[1];
    x[1] = x0 - x[1];
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64;

    /// Compute a naive DFT.
    fn dft_naive(x: &[Complex], y: &mut [Complex]) {
        assert_eq!(x.len(), y.len());

        let n = x.len() as u64;

        let theta = 2.0 * f64::consts::PI / (x.len() as f64);

        for (i, y) in y.iter_mut().enumerate() {
            let mut re = 0f64;
            let mut im = 0f64;

            for (j, &x) in x.iter().enumerate() {
                let xre = f64::from(x.re);
                let xim = f64::from(x.im);

                let ij = ((i as u64) * (j as u64)) & (n - 1);

                let wre = (theta * ij as f64).cos();
                let wim = -(theta * ij as f64).sin();

                re += (xre * wre) - (xim * wim);
                im += (xre * wim) + (xim * wre);
            }

            *y = Complex { re: re as f32, im: im as f32 };
        }
    }

    /// Compute a naive IDFT.
    fn idft_naive(x: &[Complex], y: &mut [Complex]) {
        let n = x.len() as u64;

        let z = x.iter().map(|x| Complex { re: x.im, im: x.re }).collect::<Vec<Complex>>();

        dft_naive(&z, y);

        let c = 1.0 / n as f32;

        for y in y.iter_mut() {
            *y = Complex { re: c * y.im, im: c * y.re };
        }
    }

    /// Returns true if both real and imaginary complex number components deviate by less than
    /// `epsilon` between the left-hand side and right-hand side.
    fn check_complex(lhs: Complex, rhs: Complex, epsilon: f32) -> bool {
        (lhs.re - rhs.re).abs() < epsilon && (lhs.im - rhs.im).abs() < epsilon
    }

    /// Generate a deterministic pseudo-random test vector.
    fn generate_test_vector(len: usize) -> Vec<Complex> {
        let mut lcg: u32 = 0x5d18_f35c;

        let mut rand = || {
            lcg = lcg.wrapping_mul(1664525).wrapping_add(1013904223);
            ((lcg >> 8) as f32 / (1 << 24) as f32) * 4.0 - 2.0
        };

        (0..len).map(|_| Complex::new(rand(), rand())).collect()
    }

    #[test]
    fn verify_fft() {
        for &size in &[2usize, 4, 8, 16, 64, 256, 2048] {
            let input = generate_test_vector(size);

            let mut actual = vec![Complex::default(); size];
            let mut expected = vec![Complex::default(); size];

            dft_naive(&input, &mut expected);

            Fft::new(size).fft(&input, &mut actual);

            for (&a, &e) in actual.iter().zip(expected.iter()) {
                assert!(check_complex(a, e, 0.001));
            }
        }
    }

    #[test]
    fn verify_fft_inplace() {
        let input = generate_test_vector(64);

        let mut actual = input.clone();
        let mut expected = vec![Complex::default(); 64];

        dft_naive(&input, &mut expected);

        Fft::new(64).fft_inplace(&mut actual);

        for (&a, &e) in actual.iter().zip(expected.iter()) {
            assert!(check_complex(a, e, 0.0001));
        }
    }

    #[test]
    fn verify_ifft() {
        let input = generate_test_vector(64);

        let mut actual = vec![Complex::default(); 64];
        let mut expected = vec![Complex::default(); 64];

        idft_naive(&input, &mut expected);

        Fft::new(64).ifft(&input, &mut actual);

        for (&a, &e) in actual.iter().zip(expected.iter()) {
            assert!(check_complex(a, e, 0.0001));
        }
    }

    #[test]
    fn verify_fft_reversible() {
        let input = generate_test_vector(256);

        let mut fft_out = vec![Complex::default(); 256];
        let mut ifft_out = vec![Complex::default(); 256];

        let fft = Fft::new(256);
        fft.fft(&input, &mut fft_out);
        fft.ifft(&fft_out, &mut ifft_out);

        for (&a, &e) in ifft_out.iter().zip(input.iter()) {
            assert!(check_complex(a, e, 0.0001));
        }
    }
}
