// Cantata
// Copyright (c) 2022-2025 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::f64::consts;

/// For a given window size, generates the curve of the left-half of the window.
fn generate_win_curve(bs: usize) -> Vec<f32> {
    let len = bs / 2;
    let denom = f64::from(len as u32);

    let mut slope = vec![0.0; len];

    for (i, s) in slope.iter_mut().enumerate() {
        let num = f64::from(i as u32) + 0.5;
        let frac = consts::FRAC_PI_2 * (num / denom);
        *s = (consts::FRAC_PI_2 * frac.sin().powi(2)).sin() as f32
    }

    slope
}

pub struct Windows {
    /// Short block window left-half curve.
    pub short: Vec<f32>,
    /// Long block window left-half curve.
    pub long: Vec<f32>,
}

impl Windows {
    pub fn new(blocksize0: usize, blocksize1: usize) -> Self {
        let short = generate_win_curve(blocksize0);
        let long = generate_win_curve(blocksize1);
        Windows { short, long }
    }
}

#[cfg(test)]
mod tests {
    use super::generate_win_curve;

    #[test]
    fn verify_win_curve() {
        let curve = generate_win_curve(64);

        assert_eq!(curve.len(), 32);

        // The curve is monotonically increasing from (almost) 0 to (almost) 1.
        for w in curve.windows(2) {
            assert!(w[1] > w[0]);
        }

        assert!(curve[0] > 0.0);
        assert!(curve[0] < 0.01);
        assert!(curve[31] > 0.99);
        assert!(curve[31] < 1.0);

        // The window is power-complementary with its time-reversal at the overlap mid-point:
        // w[i]^2 + w[len-1-i]^2 = 1.
        for i in 0..32 {
            let sum = curve[i] * curve[i] + curve[31 - i] * curve[31 - i];
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }
}
