//! Generator registry and the realtime mix loop.
//!
//! The mixer owns the one audio device. Each device buffer is produced by
//! summing every registered generator frame by frame and passing the sum
//! through the limiter. The generator set sits behind a single mutex;
//! taking it in the callback is acceptable because registration only
//! happens during startup, shutdown, and song loads, so steady-state
//! playback acquires an uncontended lock.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::audio::device::{AudioDevice, AudioError};
use crate::audio::limiter::Limiter;
use crate::audio::{Generator, Sample};
use crate::time::{NANOS_PER_MS, Nanos};

/// Extra latency on top of the device buffer, covering the limiter
/// lookahead.
const LIMITER_PAD: Nanos = NANOS_PER_MS;

const LIMITER_ATTACK: Nanos = NANOS_PER_MS;
const LIMITER_HOLD: Nanos = 10 * NANOS_PER_MS;
const LIMITER_RELEASE: Nanos = 100 * NANOS_PER_MS;

/// How generators are shared between their owner and the mixer. Identity
/// is the `Arc` allocation.
pub type SharedGenerator = Arc<Mutex<dyn Generator>>;

/// Everything the audio callback touches, behind one lock.
struct MixerCore {
    generators: Vec<SharedGenerator>,
    /// Built once the device reports its sampling rate; the callback can
    /// fire before that and emits silence.
    limiter: Option<Limiter>,
}

impl MixerCore {
    fn mix(&mut self, buffer: &mut [Sample]) {
        buffer.fill(Sample::default());
        let Some(limiter) = &mut self.limiter else {
            return;
        };
        if self.generators.is_empty() {
            return;
        }

        // Hold every generator for the whole buffer. This is what
        // serializes control-thread access to a generator's owner at
        // buffer granularity.
        let mut guards: Vec<MutexGuard<'_, dyn Generator>> = self
            .generators
            .iter()
            .map(|generator| generator.lock().unwrap_or_else(|e| e.into_inner()))
            .collect();

        for generator in guards.iter_mut() {
            generator.begin_buffer();
        }
        for dest in buffer.iter_mut() {
            let mut next = Sample::default();
            for generator in guards.iter_mut() {
                let sample = generator.next_sample();
                next.left += sample.left;
                next.right += sample.right;
            }
            *dest = limiter.process(next);
        }
    }
}

/// A panic anywhere in the mix must not unwind into the device driver:
/// the buffer becomes silence instead.
fn mix_guarded(core: &mut MixerCore, buffer: &mut [Sample]) {
    if panic::catch_unwind(AssertUnwindSafe(|| core.mix(buffer))).is_err() {
        buffer.fill(Sample::default());
        log::error!("MIXER: Audio callback panicked, emitting silence");
    }
}

/// Owner of the audio device; sums registered generators into each device
/// buffer under a hard limiter.
pub struct Mixer {
    core: Arc<Mutex<MixerCore>>,
    device: AudioDevice,
}

impl Mixer {
    /// Opens the default audio device and starts mixing. Buffers are
    /// silence until a generator registers.
    pub fn new() -> Result<Self, AudioError> {
        let core = Arc::new(Mutex::new(MixerCore {
            generators: Vec::new(),
            limiter: None,
        }));

        // The stream can invoke this before construction finishes; the
        // missing limiter makes those early buffers silent.
        let callback_core = Arc::clone(&core);
        let device = AudioDevice::open(move |buffer| {
            let mut core = callback_core.lock().unwrap_or_else(|e| e.into_inner());
            mix_guarded(&mut core, buffer);
        })?;

        core.lock().unwrap_or_else(|e| e.into_inner()).limiter = Some(Limiter::new(
            device.sampling_rate(),
            LIMITER_ATTACK,
            LIMITER_HOLD,
            LIMITER_RELEASE,
            1.0,
        ));

        Ok(Self { core, device })
    }

    /// Registers an audio generator. Re-registering the same generator is
    /// a no-op.
    pub fn add_generator(&self, generator: SharedGenerator) {
        let mut core = self.lock_core();
        if core
            .generators
            .iter()
            .any(|registered| Arc::ptr_eq(registered, &generator))
        {
            return;
        }
        core.generators.push(generator);
        log::debug!("MIXER: Generator registered ({} active)", core.generators.len());
    }

    /// Unregisters an audio generator. Taking the callback's lock here is
    /// what lets the caller destroy the generator afterwards: the current
    /// buffer has drained by the time this returns.
    pub fn remove_generator(&self, generator: &SharedGenerator) {
        let mut core = self.lock_core();
        core.generators
            .retain(|registered| !Arc::ptr_eq(registered, generator));
        log::debug!("MIXER: Generator removed ({} active)", core.generators.len());
    }

    /// Current mixer latency: device latency plus the limiter lookahead
    /// pad.
    pub fn latency(&self) -> Nanos {
        self.device.latency() + LIMITER_PAD
    }

    pub fn sampling_rate(&self) -> u32 {
        self.device.sampling_rate()
    }

    fn lock_core(&self) -> MutexGuard<'_, MixerCore> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 48000;

    fn core_with(generators: Vec<SharedGenerator>) -> MixerCore {
        MixerCore {
            generators,
            limiter: Some(Limiter::new(
                RATE,
                LIMITER_ATTACK,
                LIMITER_HOLD,
                LIMITER_RELEASE,
                1.0,
            )),
        }
    }

    struct Constant(f32);

    impl Generator for Constant {
        fn begin_buffer(&mut self) {}
        fn next_sample(&mut self) -> Sample {
            Sample {
                left: self.0,
                right: self.0,
            }
        }
    }

    struct Counting {
        buffers: usize,
        samples: usize,
    }

    impl Generator for Counting {
        fn begin_buffer(&mut self) {
            self.buffers += 1;
        }
        fn next_sample(&mut self) -> Sample {
            self.samples += 1;
            Sample::default()
        }
    }

    struct Panicking;

    impl Generator for Panicking {
        fn begin_buffer(&mut self) {}
        fn next_sample(&mut self) -> Sample {
            panic!("generator failure");
        }
    }

    #[test]
    fn no_generators_means_silence() {
        let mut core = core_with(Vec::new());
        let mut buffer = vec![Sample { left: 0.7, right: 0.7 }; 256];
        core.mix(&mut buffer);
        assert!(buffer.iter().all(|s| *s == Sample::default()));
    }

    #[test]
    fn generators_are_summed() {
        let mut core = core_with(vec![
            Arc::new(Mutex::new(Constant(0.2))),
            Arc::new(Mutex::new(Constant(0.3))),
        ]);
        let mut buffer = vec![Sample::default(); 4096];
        core.mix(&mut buffer);
        // Skip the limiter's lookahead delay, then expect the plain sum.
        let settled = &buffer[1024..];
        assert!(settled.iter().all(|s| (s.left - 0.5).abs() < 1e-3));
    }

    #[test]
    fn begin_buffer_once_next_sample_per_frame() {
        let counting: Arc<Mutex<Counting>> = Arc::new(Mutex::new(Counting {
            buffers: 0,
            samples: 0,
        }));
        let mut core = core_with(vec![counting.clone()]);
        let mut buffer = vec![Sample::default(); 128];
        core.mix(&mut buffer);
        core.mix(&mut buffer);
        let counts = counting.lock().unwrap();
        assert_eq!(counts.buffers, 2);
        assert_eq!(counts.samples, 256);
    }

    #[test]
    fn output_is_limited() {
        let mut core = core_with(vec![
            Arc::new(Mutex::new(Constant(1.5))),
            Arc::new(Mutex::new(Constant(1.5))),
        ]);
        let mut buffer = vec![Sample::default(); 8192];
        core.mix(&mut buffer);
        assert!(buffer.iter().all(|s| s.left.abs() <= 1.0 && s.right.abs() <= 1.0));
    }

    #[test]
    fn missing_limiter_emits_silence() {
        let mut core = MixerCore {
            generators: vec![Arc::new(Mutex::new(Constant(0.5)))],
            limiter: None,
        };
        let mut buffer = vec![Sample { left: 1.0, right: 1.0 }; 64];
        core.mix(&mut buffer);
        assert!(buffer.iter().all(|s| *s == Sample::default()));
    }

    #[test]
    fn panicking_generator_yields_silence() {
        let mut core = core_with(vec![Arc::new(Mutex::new(Panicking))]);
        let mut buffer = vec![Sample { left: 0.4, right: 0.4 }; 64];
        mix_guarded(&mut core, &mut buffer);
        assert!(buffer.iter().all(|s| *s == Sample::default()));
    }
}
