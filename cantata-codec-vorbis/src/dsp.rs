// Cantata
// Copyright (c) 2022-2025 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cantata_core::dsp::mdct::Imdct;

use super::residue::ResidueScratch;
use super::window::Windows;

/// The lapping state between two consecutive audio packets.
pub struct LappingState {
    /// The block flag of the previous audio packet.
    pub prev_block_flag: bool,
}

pub struct Dsp {
    /// DSP channels (max. 256 per the specification, but limited to 26 here).
    pub channels: Vec<DspChannel>,
    /// Residue scratch-pad.
    pub residue_scratch: ResidueScratch,
    /// IMDCT for short-blocks.
    pub imdct_short: Imdct,
    /// IMDCT for long-blocks.
    pub imdct_long: Imdct,
    /// Windows for overlap-add.
    pub windows: Windows,
    /// Lapping state.
    pub lapping_state: Option<LappingState>,
}

impl Dsp {
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }

        self.lapping_state = None;
    }
}

pub struct DspChannel {
    /// The channel floor buffer.
    pub floor: Vec<f32>,
    /// The channel residue buffer.
    pub residue: Vec<f32>,
    /// Do not decode!
    pub do_not_decode: bool,
    /// The IMDCT scratch buffer.
    imdct: Vec<f32>,
    /// The right-half of the IMDCT output of the previous block, saved for overlap-add with the
    /// current block.
    overlap: Vec<f32>,
}

impl DspChannel {
    pub fn new(bs1_exp: u8) -> Self {
        DspChannel {
            floor: vec![0.0; (1 << bs1_exp) >> 1],
            residue: vec![0.0; (1 << bs1_exp) >> 1],
            imdct: vec![0.0; 1 << bs1_exp],
            overlap: vec![0.0; (1 << bs1_exp) >> 1],
            do_not_decode: false,
        }
    }

    /// Synthesize the final audio samples for this channel and the current block.
    ///
    /// The spectrum of the current block is taken from the floor buffer. The output buffer,
    /// `buf`, must be exactly `(prev_block_size + block_size) / 4` samples long, or empty if
    /// there is no previous block.
    pub fn synth(
        &mut self,
        block_size: usize,
        prev_block_size: Option<usize>,
        windows: &Windows,
        imdct: &mut Imdct,
        buf: &mut [f32],
    ) {
        let n = block_size;
        let n2 = n >> 1;

        // Inverse transform the spectrum to produce a full block of time-domain samples.
        imdct.imdct(&self.floor[..n2], &mut self.imdct[..n]);

        if let Some(pn) = prev_block_size {
            let pn2 = pn >> 1;

            debug_assert!(buf.len() == (pn + n) >> 2);

            // The overlap region between two blocks spans half of the smaller block. The window
            // slope is likewise that of the smaller block.
            let win = if pn <= n { half_window(windows, pn2) } else { half_window(windows, n2) };

            if pn == n {
                // Equal sized blocks overlap in their entirety.
                overlap_add(buf, &self.overlap[..n2], &self.imdct[..n2], win);
            }
            else if pn > n {
                // A short block following a long block. The start of the output is unlapped
                // samples of the previous block.
                let lead = (pn - n) >> 2;

                buf[..lead].copy_from_slice(&self.overlap[..lead]);

                overlap_add(
                    &mut buf[lead..],
                    &self.overlap[lead..lead + n2],
                    &self.imdct[..n2],
                    win,
                );

                // The remainder of the previous block's right-half lies outside the lapped
                // region. Those samples carry no signal since the previous block was shaped for a
                // short overlap.
            }
            else {
                // A long block following a short block. The overlap region is offset into the
                // current block's left-half, and the tail of the output is unlapped samples of
                // the current block.
                let lead = (n - pn) >> 2;

                overlap_add(
                    &mut buf[..pn2],
                    &self.overlap[..pn2],
                    &self.imdct[lead..lead + pn2],
                    win,
                );

                buf[pn2..].copy_from_slice(&self.imdct[lead + pn2..n2]);
            }

            // Clamp the output samples.
            for s in buf.iter_mut() {
                *s = s.clamp(-1.0, 1.0);
            }
        }

        // Save the right-half of the IMDCT output for the next block.
        self.overlap[..n2].copy_from_slice(&self.imdct[n2..n]);
    }

    pub fn reset(&mut self) {
        // Clear the overlap buffer. Nothing else is used across packets.
        self.overlap.fill(0.0);
        self.do_not_decode = false;
    }
}

/// Select the half-window curve of length `len`.
#[inline(always)]
fn half_window(windows: &Windows, len: usize) -> &[f32] {
    if windows.short.len() == len {
        &windows.short
    }
    else {
        debug_assert!(windows.long.len() == len);
        &windows.long
    }
}

/// Overlap-add the previous block's trailing samples, `prev`, with the current block's leading
/// samples, `cur`, using the half-window curve `win`. The previous block fades out along the
/// time-reversed window while the current block fades in.
#[inline]
fn overlap_add(out: &mut [f32], prev: &[f32], cur: &[f32], win: &[f32]) {
    debug_assert!(out.len() == prev.len());
    debug_assert!(out.len() == cur.len());
    debug_assert!(out.len() == win.len());

    let len = win.len();

    for (i, ((o, &p), &c)) in out.iter_mut().zip(prev).zip(cur).enumerate() {
        *o = p * win[len - 1 - i] + c * win[i];
    }
}

#[cfg(test)]
mod tests {
    use cantata_core::dsp::mdct::Imdct;

    use super::super::window::Windows;
    use super::DspChannel;

    /// Run a spectrum through synthesis with the given block size.
    fn synth_block(
        channel: &mut DspChannel,
        imdct: &mut Imdct,
        windows: &Windows,
        n: usize,
        prev_n: Option<usize>,
        spectrum: &[f32],
    ) -> Vec<f32> {
        channel.floor[..n >> 1].copy_from_slice(spectrum);

        let mut buf = match prev_n {
            Some(pn) => vec![0.0; (pn + n) >> 2],
            None => Vec::new(),
        };

        channel.synth(n, prev_n, windows, imdct, &mut buf);

        buf
    }

    #[test]
    fn verify_synth_output_len() {
        // Block sizes 64 (short) and 256 (long).
        let windows = Windows::new(64, 256);
        let mut imdct_short = Imdct::new(32);
        let mut imdct_long = Imdct::new(128);

        let mut channel = DspChannel::new(8);

        let short_spec = vec![0.1; 32];
        let long_spec = vec![0.1; 128];

        // The first block produces no output.
        let buf = synth_block(&mut channel, &mut imdct_short, &windows, 64, None, &short_spec);
        assert_eq!(buf.len(), 0);

        // Short-to-short yields 32 frames.
        let buf = synth_block(&mut channel, &mut imdct_short, &windows, 64, Some(64), &short_spec);
        assert_eq!(buf.len(), 32);

        // Short-to-long yields 80 frames.
        let buf = synth_block(&mut channel, &mut imdct_long, &windows, 256, Some(64), &long_spec);
        assert_eq!(buf.len(), 80);

        // Long-to-long yields 128 frames.
        let buf = synth_block(&mut channel, &mut imdct_long, &windows, 256, Some(256), &long_spec);
        assert_eq!(buf.len(), 128);

        // Long-to-short yields 80 frames.
        let buf = synth_block(&mut channel, &mut imdct_short, &windows, 64, Some(256), &short_spec);
        assert_eq!(buf.len(), 80);
    }

    #[test]
    fn verify_synth_reconstruction() {
        // Overlap-adding two equal sized blocks with a power-complementary window must
        // reconstruct a constant signal in the lapped region when the input spectra encode that
        // signal. Use a pure DC spectrum and verify the lapped region is continuous (no seam).
        let windows = Windows::new(64, 64);
        let mut imdct = Imdct::new(32);

        let mut channel = DspChannel::new(6);

        let spec = vec![0.5; 32];

        synth_block(&mut channel, &mut imdct, &windows, 64, None, &spec);
        let buf0 = synth_block(&mut channel, &mut imdct, &windows, 64, Some(64), &spec);
        let buf1 = synth_block(&mut channel, &mut imdct, &windows, 64, Some(64), &spec);

        // With identical input blocks the output of consecutive lapped regions must be identical.
        for (a, b) in buf0.iter().zip(buf1.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn verify_synth_clamps() {
        let windows = Windows::new(64, 64);
        let mut imdct = Imdct::new(32);

        let mut channel = DspChannel::new(6);

        // A very hot spectrum will exceed the [-1.0, 1.0] range before clamping.
        let spec = vec![100.0; 32];

        synth_block(&mut channel, &mut imdct, &windows, 64, None, &spec);
        let buf = synth_block(&mut channel, &mut imdct, &windows, 64, Some(64), &spec);

        for s in buf {
            assert!(s >= -1.0 && s <= 1.0);
        }
    }
}
