//! Lookahead stereo peak limiter for the mixed output.
//!
//! The signal is delayed by the attack window while a sliding maximum of
//! the incoming peak level runs ahead of it, so gain reduction starts
//! before a peak reaches the output. Reduction is held for the hold window
//! and then released exponentially. A final clamp enforces the bound
//! exactly; with the lookahead ramp it only ever shaves fractions of the
//! smoothing error, not audible program material.

use std::collections::VecDeque;

use crate::audio::Sample;
use crate::time::{Nanos, ns_to_samples};

pub struct Limiter {
    output_limit: f32,
    /// Delayed frames; always holds exactly `lookahead` entries between
    /// calls, so output lags input by the attack window.
    delay: VecDeque<Sample>,
    lookahead: usize,
    /// `(frame index, peak)` entries with strictly decreasing peaks; the
    /// front is the maximum over the delay line and the current frame.
    window: VecDeque<(u64, f32)>,
    frames_in: u64,
    frames_out: u64,
    hold: u32,
    hold_left: u32,
    gain: f32,
    attack_coeff: f32,
    release_coeff: f32,
}

impl Limiter {
    pub fn new(
        sampling_rate: u32,
        attack: Nanos,
        hold: Nanos,
        release: Nanos,
        output_limit: f32,
    ) -> Self {
        let lookahead = ns_to_samples(attack, sampling_rate).max(1) as usize;
        let hold = ns_to_samples(hold, sampling_rate).max(1) as u32;
        let release_samples = ns_to_samples(release, sampling_rate).max(1) as f32;

        let mut delay = VecDeque::with_capacity(lookahead + 1);
        delay.extend(std::iter::repeat_n(Sample::default(), lookahead));

        Self {
            output_limit,
            delay,
            lookahead,
            window: VecDeque::new(),
            frames_in: lookahead as u64,
            frames_out: 0,
            hold,
            hold_left: 0,
            gain: 1.0,
            attack_coeff: 1.0 - (-1.0 / lookahead as f32).exp(),
            release_coeff: 1.0 - (-1.0 / release_samples).exp(),
        }
    }

    /// Processes one stereo frame, returning the delayed, limited frame.
    pub fn process(&mut self, input: Sample) -> Sample {
        let peak = input.left.abs().max(input.right.abs());
        while self.window.back().is_some_and(|&(_, p)| p <= peak) {
            self.window.pop_back();
        }
        self.window.push_back((self.frames_in, peak));
        self.frames_in += 1;

        self.delay.push_back(input);
        let frame = self.delay.pop_front().unwrap_or_default();
        while self.window.front().is_some_and(|&(i, _)| i < self.frames_out) {
            self.window.pop_front();
        }
        self.frames_out += 1;

        let window_peak = self.window.front().map_or(0.0, |&(_, p)| p);
        let target = if window_peak > self.output_limit {
            self.output_limit / window_peak
        } else {
            1.0
        };

        if target < self.gain {
            self.gain += (target - self.gain) * self.attack_coeff;
            self.hold_left = self.hold;
        } else if self.hold_left > 0 {
            self.hold_left -= 1;
        } else {
            self.gain += (target - self.gain) * self.release_coeff;
        }

        let limit = self.output_limit;
        Sample {
            left: (frame.left * self.gain).clamp(-limit, limit),
            right: (frame.right * self.gain).clamp(-limit, limit),
        }
    }

    /// Internal delay in frames; equals the attack window.
    pub fn delay_frames(&self) -> usize {
        self.lookahead
    }
}
