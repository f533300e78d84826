// Cantata
// Copyright (c) 2022-2025 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `audio` module provides primitives for working with multi-channel audio buffers of varying
//! sample formats.

use std::borrow::Cow;
use std::fmt;

use arrayvec::ArrayVec;
use bitflags::bitflags;

use crate::conv::{ConvertibleSample, IntoSample};
use crate::sample::Sample;
use crate::units::Duration;

bitflags! {
    /// Channels is a bit mask of all channels contained in a signal.
    #[derive(Default)]
    pub struct Channels: u32 {
        /// Front-left (left) or the Mono channel.
        const FRONT_LEFT         = 0x0000_0001;
        /// Front-right (right) channel.
        const FRONT_RIGHT        = 0x0000_0002;
        /// Front-centre (centre) channel.
        const FRONT_CENTRE       = 0x0000_0004;
        /// Rear-left (surround rear left) channel.
        const REAR_LEFT          = 0x0000_0008;
        /// Rear-centre (surround rear centre) channel.
        const REAR_CENTRE        = 0x0000_0010;
        /// Rear-right (surround rear right) channel.
        const REAR_RIGHT         = 0x0000_0020;
        /// Low frequency channel 1.
        const LFE1               = 0x0000_0040;
        /// Front left-of-centre (left center) channel.
        const FRONT_LEFT_CENTRE  = 0x0000_0080;
        /// Front right-of-centre (right center) channel.
        const FRONT_RIGHT_CENTRE = 0x0000_0100;
        /// Rear left-of-centre channel.
        const REAR_LEFT_CENTRE   = 0x0000_0200;
        /// Rear right-of-centre channel.
        const REAR_RIGHT_CENTRE  = 0x0000_0400;
        /// Front left-wide channel.
        const FRONT_LEFT_WIDE    = 0x0000_0800;
        /// Front right-wide channel.
        const FRONT_RIGHT_WIDE   = 0x0000_1000;
        /// Front left-high channel.
        const FRONT_LEFT_HIGH    = 0x0000_2000;
        /// Front centre-high channel.
        const FRONT_CENTRE_HIGH  = 0x0000_4000;
        /// Front right-high channel.
        const FRONT_RIGHT_HIGH   = 0x0000_8000;
        /// Low frequency channel 2.
        const LFE2               = 0x0001_0000;
        /// Side left (surround left) channel.
        const SIDE_LEFT          = 0x0002_0000;
        /// Side right (surround right) channel.
        const SIDE_RIGHT         = 0x0004_0000;
        /// Top centre channel.
        const TOP_CENTRE         = 0x0008_0000;
        /// Top front-left channel.
        const TOP_FRONT_LEFT     = 0x0010_0000;
        /// Top centre channel.
        const TOP_FRONT_CENTRE   = 0x0020_0000;
        /// Top front-right channel.
        const TOP_FRONT_RIGHT    = 0x0040_0000;
        /// Top rear-left channel.
        const TOP_REAR_LEFT      = 0x0080_0000;
        /// Top rear-centre channel.
        const TOP_REAR_CENTRE    = 0x0100_0000;
        /// Top rear-right channel.
        const TOP_REAR_RIGHT     = 0x0200_0000;
    }
}

impl Channels {
    /// Gets the number of channels.
    pub fn count(self) -> usize {
        self.bits.count_ones() as usize
    }
}

impl fmt::Display for Channels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#032b}", self.bits)
    }
}

/// `SignalSpec` describes the characteristics of a Signal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SignalSpec {
    /// The signal sampling rate in hertz (Hz).
    pub rate: u32,

    /// The channel assignments of the signal. The order of the channels in the vector is the
    /// order in which each channel sample is stored in a frame.
    pub channels: Channels,
}

impl SignalSpec {
    pub fn new(rate: u32, channels: Channels) -> Self {
        SignalSpec { rate, channels }
    }
}

/// The maximum number of audio planes.
const AUDIO_PLANES_MAX: usize = 32;

/// `AudioPlanes` provides immutable slices to each audio channel (plane) contained in a signal.
pub struct AudioPlanes<'a, S: 'a + Sample> {
    planes: ArrayVec<&'a [S], AUDIO_PLANES_MAX>,
}

impl<'a, S: Sample> AudioPlanes<'a, S> {
    fn new() -> Self {
        AudioPlanes { planes: ArrayVec::new() }
    }

    /// Gets all the audio planes.
    pub fn planes(&self) -> &[&'a [S]] {
        &self.planes
    }
}

/// `AudioPlanesMut` provides mutable slices to each audio channel (plane) contained in a signal.
pub struct AudioPlanesMut<'a, S: 'a + Sample> {
    planes: ArrayVec<&'a mut [S], AUDIO_PLANES_MAX>,
}

impl<'a, S: Sample> AudioPlanesMut<'a, S> {
    fn new() -> Self {
        AudioPlanesMut { planes: ArrayVec::new() }
    }

    /// Gets all the audio planes.
    pub fn planes(&mut self) -> &mut [&'a mut [S]] {
        &mut self.planes
    }
}

/// `AudioBuffer` is a container for multi-channel planar audio sample data. An `AudioBuffer` is
/// characterized by the duration (capacity), and audio specification (channels and sample rate).
/// The capacity of an `AudioBuffer` is the maximum number of samples the buffer may store per
/// channel. Manipulation of samples is accomplished through the `Signal` trait or direct buffer
/// manipulation.
#[derive(Clone)]
pub struct AudioBuffer<S: Sample> {
    buf: Vec<S>,
    spec: SignalSpec,
    n_frames: usize,
    n_capacity: usize,
}

impl<S: Sample> AudioBuffer<S> {
    /// Instantiate a new `AudioBuffer` using the specified signal specification and of the given
    /// duration.
    pub fn new(duration: Duration, spec: SignalSpec) -> Self {
        let n_sample_capacity = duration * spec.channels.count() as u64;

        // Practically speaking, it is not possible to allocate more than usize samples.
        assert!(n_sample_capacity <= usize::MAX as u64);

        // Allocate memory for the sample data and default initialize the sample to silence.
        let buf = vec![S::default(); n_sample_capacity as usize];

        AudioBuffer { buf, spec, n_frames: 0, n_capacity: duration as usize }
    }

    /// Instantiates an unused `AudioBuffer`. An unused `AudioBuffer` will not allocate any memory,
    /// has a sample rate of 0, and no audio channels.
    pub fn unused() -> Self {
        AudioBuffer {
            buf: Vec::with_capacity(0),
            spec: SignalSpec::new(0, Channels::empty()),
            n_frames: 0,
            n_capacity: 0,
        }
    }

    /// Returns `true` if the `AudioBuffer` is unused.
    pub fn is_unused(&self) -> bool {
        self.n_capacity == 0
    }

    /// Gets the signal specification for the buffer.
    pub fn spec(&self) -> &SignalSpec {
        &self.spec
    }

    /// Gets the total capacity of the buffer. The capacity is the maximum number of frames a
    /// buffer can store.
    pub fn capacity(&self) -> usize {
        self.n_capacity
    }

    /// Gets immutable references to all audio planes (channels) within the audio buffer.
    ///
    /// Note: This is not a cheap operation. It is advisable that this call is only used when
    /// operating on batches of frames. Generally speaking, it is almost always better to use
    /// `chan()` to selectively choose the plane to read.
    pub fn planes(&self) -> AudioPlanes<'_, S> {
        // Fill the audio planes structure with references to the written portion of each audio
        // plane.
        let mut planes = AudioPlanes::new();

        for channel in self.buf.chunks_exact(self.n_capacity) {
            planes.planes.push(&channel[..self.n_frames]);
        }

        planes
    }

    /// Gets mutable references to all audio planes (channels) within the buffer.
    ///
    /// Note: This is not a cheap operation. It is advisable that this call is only used when
    /// mutating batches of frames. Generally speaking, it is almost always better to use
    /// `render()`, `fill()`, `chan_mut()`, and `chan_pair_mut()` to mutate the buffer.
    pub fn planes_mut(&mut self) -> AudioPlanesMut<'_, S> {
        // Fill the audio planes structure with references to the written portion of each audio
        // plane.
        let mut planes = AudioPlanesMut::new();

        for channel in self.buf.chunks_exact_mut(self.n_capacity) {
            planes.planes.push(&mut channel[..self.n_frames]);
        }

        planes
    }

    /// Trims samples from the start and end of the buffer.
    pub fn trim(&mut self, start: usize, end: usize) {
        // The number of frames to trim off the start and end of the buffer cannot exceed the
        // total number of rendered frames.
        if start + end > self.n_frames {
            self.n_frames = 0;
            return;
        }

        let num_frames = self.n_frames - start - end;

        if start > 0 {
            // Shift the retained region of each plane down to the start of the plane.
            for plane in self.buf.chunks_exact_mut(self.n_capacity) {
                plane.copy_within(start..start + num_frames, 0);
            }
        }

        self.n_frames = num_frames;
    }

    /// Converts the contents of an AudioBuffer into an equivalent destination AudioBuffer of a
    /// different type. If the types are the same then this is a copy operation.
    pub fn convert<T: Sample>(&self, dest: &mut AudioBuffer<T>)
    where
        S: IntoSample<T>,
    {
        assert!(dest.n_frames == self.n_frames);
        assert!(dest.n_capacity == self.n_capacity);
        assert!(dest.spec == self.spec);

        for c in 0..self.spec.channels.count() {
            let begin = c * self.n_capacity;
            let end = begin + self.n_frames;

            for (d, s) in dest.buf[begin..end].iter_mut().zip(&self.buf[begin..end]) {
                *d = (*s).into_sample();
            }
        }
    }

    /// Makes an equivalent AudioBuffer of a different type.
    pub fn make_equivalent<E: Sample>(&self) -> AudioBuffer<E> {
        AudioBuffer::<E>::new(self.n_capacity as Duration, self.spec)
    }
}

/// `AudioBufferRef` is a copy-on-write reference to an `AudioBuffer` of any type.
pub enum AudioBufferRef<'a> {
    F32(Cow<'a, AudioBuffer<f32>>),
    S32(Cow<'a, AudioBuffer<i32>>),
}

impl<'a> AudioBufferRef<'a> {
    pub fn spec(&self) -> &SignalSpec {
        match self {
            AudioBufferRef::F32(buf) => buf.spec(),
            AudioBufferRef::S32(buf) => buf.spec(),
        }
    }

    pub fn frames(&self) -> usize {
        match self {
            AudioBufferRef::F32(buf) => buf.frames(),
            AudioBufferRef::S32(buf) => buf.frames(),
        }
    }

    pub fn capacity(&self) -> usize {
        match self {
            AudioBufferRef::F32(buf) => buf.capacity(),
            AudioBufferRef::S32(buf) => buf.capacity(),
        }
    }
}

/// `AsAudioBufferRef` is a trait implemented for `AudioBuffer`s that may be referenced in an
/// `AudioBufferRef`.
pub trait AsAudioBufferRef {
    fn as_audio_buffer_ref(&self) -> AudioBufferRef<'_>;
}

impl AsAudioBufferRef for AudioBuffer<f32> {
    fn as_audio_buffer_ref(&self) -> AudioBufferRef<'_> {
        AudioBufferRef::F32(Cow::Borrowed(self))
    }
}

impl AsAudioBufferRef for AudioBuffer<i32> {
    fn as_audio_buffer_ref(&self) -> AudioBufferRef<'_> {
        AudioBufferRef::S32(Cow::Borrowed(self))
    }
}

/// The `Signal` trait provides methods for rendering and transforming contiguous buffers of audio
/// data.
pub trait Signal<S: Sample> {
    /// Gets the number of actual frames written to the buffer. Conversely, this also is the number
    /// of written samples in any one channel.
    fn frames(&self) -> usize;

    /// Clears all written frames from the buffer. This is a cheap operation and does not zero the
    /// underlying audio data.
    fn clear(&mut self);

    /// Gets an immutable reference to all the written samples in the specified channel.
    fn chan(&self, channel: usize) -> &[S];

    /// Gets a mutable reference to all the written samples in the specified channel.
    fn chan_mut(&mut self, channel: usize) -> &mut [S];

    /// Gets two mutable references to two different channels.
    fn chan_pair_mut(&mut self, first: usize, second: usize) -> (&mut [S], &mut [S]);

    /// Renders a reserved number of frames. This is a cheap operation and simply advances the
    /// frame counter. The underlying audio data is not modified and should be overwritten through
    /// other means.
    ///
    /// If `n_frames` is `None`, the remaining number of samples will be used. If `n_frames` is
    /// too large, this function will assert.
    fn render_reserved(&mut self, n_frames: Option<usize>);

    /// Transforms every written sample in the signal using the transformation function provided.
    /// This function does not guarantee an order in which the samples are transformed.
    fn transform<F>(&mut self, f: F)
    where
        F: Fn(S) -> S;
}

impl<S: Sample> Signal<S> for AudioBuffer<S> {
    fn clear(&mut self) {
        self.n_frames = 0;
    }

    fn frames(&self) -> usize {
        self.n_frames
    }

    fn chan(&self, channel: usize) -> &[S] {
        let start = channel * self.n_capacity;
        let end = start + self.n_frames;

        // Do not exceed the audio buffer.
        assert!(end <= self.buf.len());

        &self.buf[start..end]
    }

    fn chan_mut(&mut self, channel: usize) -> &mut [S] {
        let start = channel * self.n_capacity;
        let end = start + self.n_frames;

        // Do not exceed the audio buffer.
        assert!(end <= self.buf.len());

        &mut self.buf[start..end]
    }

    fn chan_pair_mut(&mut self, first: usize, second: usize) -> (&mut [S], &mut [S]) {
        // Both channels in the pair must be unique.
        assert!(first != second);

        let first_idx = self.n_capacity * first;
        let second_idx = self.n_capacity * second;

        if first_idx < second_idx {
            let (a, b) = self.buf.split_at_mut(second_idx);

            (&mut a[first_idx..first_idx + self.n_frames], &mut b[..self.n_frames])
        }
        else {
            let (a, b) = self.buf.split_at_mut(first_idx);

            (&mut b[..self.n_frames], &mut a[second_idx..second_idx + self.n_frames])
        }
    }

    fn render_reserved(&mut self, n_frames: Option<usize>) {
        let n_reserved_frames = n_frames.unwrap_or(self.n_capacity - self.n_frames);
        // Do not render past the end of the audio buffer.
        assert!(self.n_frames + n_reserved_frames <= self.n_capacity);
        self.n_frames += n_reserved_frames;
    }

    fn transform<F>(&mut self, f: F)
    where
        F: Fn(S) -> S,
    {
        debug_assert!(self.n_frames <= self.n_capacity);

        // Apply the transformation function over each sample in each plane.
        for plane in self.buf.chunks_mut(self.n_capacity) {
            for sample in &mut plane[0..self.n_frames] {
                *sample = f(*sample);
            }
        }
    }
}

/// A `SampleBuffer`, is a sample oriented buffer. It is agnostic to the ordering/layout of samples
/// within the buffer. `SampleBuffer` is meant for safely importing and exporting sample data to
/// and from Cantata using the sample's in-memory data-type.
pub struct SampleBuffer<S: Sample> {
    buf: Vec<S>,
    n_written: usize,
}

impl<S: Sample> SampleBuffer<S> {
    /// Instantiate a new `SampleBuffer` using the specified signal specification and of the given
    /// duration.
    pub fn new(duration: Duration, spec: SignalSpec) -> SampleBuffer<S> {
        let n_samples = duration * spec.channels.count() as u64;

        // Practically speaking, it is not possible to allocate more than usize samples.
        assert!(n_samples <= usize::MAX as u64);

        SampleBuffer { buf: vec![S::MID; n_samples as usize], n_written: 0 }
    }

    /// Gets the number of written samples.
    pub fn len(&self) -> usize {
        self.n_written
    }

    /// Returns `true` if the buffer contains no written samples.
    pub fn is_empty(&self) -> bool {
        self.n_written == 0
    }

    /// Gets an immutable slice of all written samples.
    pub fn samples(&self) -> &[S] {
        &self.buf[..self.n_written]
    }

    /// Gets the maximum number of samples the `SampleBuffer` may store.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Copies all audio data from the source `AudioBufferRef` in planar channel order into the
    /// `SampleBuffer`. The two buffers must be equivalent.
    pub fn copy_planar_ref(&mut self, src: AudioBufferRef<'_>)
    where
        S: ConvertibleSample,
    {
        match src {
            AudioBufferRef::F32(buf) => self.copy_planar_typed(&buf),
            AudioBufferRef::S32(buf) => self.copy_planar_typed(&buf),
        }
    }

    /// Copies all audio data from a source `AudioBuffer` into the `SampleBuffer` in planar
    /// channel order. The two buffers must be equivalent.
    pub fn copy_planar_typed<F>(&mut self, src: &AudioBuffer<F>)
    where
        F: Sample + IntoSample<S>,
    {
        let n_frames = src.frames();
        let n_channels = src.spec.channels.count();
        let n_samples = n_frames * n_channels;

        // Ensure that the capacity of the sample buffer is greater than or equal to the number
        // of samples that will be copied from the source buffer.
        assert!(self.capacity() >= n_samples);

        for ch in 0..n_channels {
            let ch_slice = src.chan(ch);

            for (dst, src) in self.buf[ch * n_frames..].iter_mut().zip(ch_slice) {
                *dst = (*src).into_sample();
            }
        }

        // Commit the written samples.
        self.n_written = n_samples;
    }

    /// Copies all audio data from the source `AudioBufferRef` in interleaved channel order into
    /// the `SampleBuffer`. The two buffers must be equivalent.
    pub fn copy_interleaved_ref(&mut self, src: AudioBufferRef<'_>)
    where
        S: ConvertibleSample,
    {
        match src {
            AudioBufferRef::F32(buf) => self.copy_interleaved_typed(&buf),
            AudioBufferRef::S32(buf) => self.copy_interleaved_typed(&buf),
        }
    }

    /// Copies all audio samples from a source `AudioBuffer` into the `SampleBuffer` in
    /// interleaved channel order. The two buffers must be equivalent.
    pub fn copy_interleaved_typed<F>(&mut self, src: &AudioBuffer<F>)
    where
        F: Sample + IntoSample<S>,
    {
        let n_channels = src.spec.channels.count();
        let n_samples = src.frames() * n_channels;

        // Ensure that the capacity of the sample buffer is greater than or equal to the number
        // of samples that will be copied from the source buffer.
        assert!(self.capacity() >= n_samples);

        // Interleave the source buffer channels into the sample buffer.
        for ch in 0..n_channels {
            let ch_slice = src.chan(ch);

            for (dst, src) in self.buf[ch..].iter_mut().step_by(n_channels).zip(ch_slice) {
                *dst = (*src).into_sample();
            }
        }

        // Commit the written samples.
        self.n_written = n_samples;
    }
}

#[cfg(test)]
mod tests {
    use super::{AudioBuffer, SampleBuffer, Signal, SignalSpec};
    use crate::audio::Channels;

    fn make_stereo_buffer(duration: u64) -> AudioBuffer<f32> {
        let spec = SignalSpec::new(44_100, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        AudioBuffer::new(duration, spec)
    }

    #[test]
    fn verify_render_and_chan() {
        let mut buf = make_stereo_buffer(16);

        assert_eq!(buf.frames(), 0);

        buf.render_reserved(Some(8));
        assert_eq!(buf.frames(), 8);

        for (i, s) in buf.chan_mut(0).iter_mut().enumerate() {
            *s = i as f32;
        }
        for (i, s) in buf.chan_mut(1).iter_mut().enumerate() {
            *s = -(i as f32);
        }

        assert_eq!(buf.chan(0)[7], 7.0);
        assert_eq!(buf.chan(1)[7], -7.0);

        let (c0, c1) = buf.chan_pair_mut(0, 1);
        assert_eq!(c0.len(), 8);
        assert_eq!(c1.len(), 8);

        buf.clear();
        assert_eq!(buf.frames(), 0);
    }

    #[test]
    fn verify_trim() {
        let mut buf = make_stereo_buffer(16);

        buf.render_reserved(Some(10));

        for (i, s) in buf.chan_mut(0).iter_mut().enumerate() {
            *s = i as f32;
        }

        buf.trim(2, 3);

        assert_eq!(buf.frames(), 5);
        assert_eq!(buf.chan(0), &[2.0, 3.0, 4.0, 5.0, 6.0]);

        // Over-trim clears the buffer.
        buf.trim(4, 4);
        assert_eq!(buf.frames(), 0);
    }

    #[test]
    fn verify_sample_buffer_interleaved() {
        let mut buf = make_stereo_buffer(4);

        buf.render_reserved(Some(2));
        buf.chan_mut(0).copy_from_slice(&[0.25, 0.5]);
        buf.chan_mut(1).copy_from_slice(&[-0.25, -0.5]);

        let mut samples = SampleBuffer::<f32>::new(4, *buf.spec());
        samples.copy_interleaved_typed(&buf);

        assert_eq!(samples.samples(), &[0.25, -0.25, 0.5, -0.5]);
    }
}
