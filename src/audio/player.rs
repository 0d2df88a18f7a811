//! Multiplexer of chart cursors, driven by the audio device.
//!
//! The player is the mixer's primary generator. Each sample it selects
//! the inputs due at that instant, translates them through each cursor's
//! mapper, advances the cursors, and mixes the keysound voices they
//! trigger. Input timestamps live on the wall clock; `timer_slop` anchors
//! the sample counter to that clock and is nudged at every buffer
//! boundary to absorb drift.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::audio::{Generator, Sample, lufs_to_gain};
use crate::chart::ChartHash;
use crate::chart::WavSlot;
use crate::chart::cursor::{ChannelId, Cursor, LaneInput};
use crate::input::Mapper;
use crate::input::events::UserInput;
use crate::models::settings::GameplaySettings;
use crate::time::{Clock, NANOS_PER_MS, Nanos, ns_to_samples, samples_to_ns};

/// How far a timer or input may lag before we log it.
const LATE_WARNING: Nanos = 5 * NANOS_PER_MS;

struct PlayableCursor {
    cursor: Cursor,
    mapper: Mapper,
    /// Loudness-normalizing gain applied to this cursor's voices.
    gain: f32,
    /// Sample count at the time the cursor was attached.
    sample_offset: u64,
}

/// One playing keysound voice.
struct ActiveSound {
    chart: ChartHash,
    channel: ChannelId,
    pcm: WavSlot,
    position: usize,
    gain: f32,
}

/// Drives one or more cursors from the audio clock and emits their mixed
/// keysound stream.
pub struct Player {
    cursors: Vec<PlayableCursor>,
    active_sounds: Vec<ActiveSound>,
    input_tx: Sender<UserInput>,
    input_rx: Receiver<UserInput>,
    /// Inputs shifted into the future, waiting for the sample clock to
    /// reach them. Ordered only by timestamp; stable for equal stamps.
    pending_inputs: Vec<UserInput>,
    /// Wall-clock instant corresponding to `samples_processed == 0`,
    /// continuously corrected to track the device clock.
    timer_slop: Nanos,
    samples_processed: u64,
    paused: bool,
    sampling_rate: u32,
    latency: Nanos,
    note_offset: Nanos,
    clock: Arc<dyn Clock>,
    // Scratch buffers reused every sample to keep the audio path free of
    // allocation.
    scratch_inputs: Vec<UserInput>,
    scratch_lanes: Vec<LaneInput>,
}

impl Player {
    /// `latency` is the full output latency (the mixer's device buffer
    /// plus effect padding); inputs are stamped that far into the future.
    pub fn new(
        sampling_rate: u32,
        latency: Nanos,
        gameplay: &GameplaySettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (input_tx, input_rx) = unbounded();
        let timer_slop = clock.now();
        Self {
            cursors: Vec::new(),
            active_sounds: Vec::new(),
            input_tx,
            input_rx,
            pending_inputs: Vec::new(),
            timer_slop,
            samples_processed: 0,
            paused: false,
            sampling_rate,
            latency,
            note_offset: gameplay.note_offset_ns(),
            clock,
            scratch_inputs: Vec::new(),
            scratch_lanes: Vec::new(),
        }
    }

    /// Handle for the input thread to push events into.
    pub fn input_queue(&self) -> Sender<UserInput> {
        self.input_tx.clone()
    }

    /// Registers a cursor; from now on it is driven by the audio device
    /// and user inputs. The chart must already be resampled to the
    /// device rate.
    pub fn add_cursor(&mut self, cursor: Cursor, mapper: Mapper) {
        assert_eq!(
            cursor.chart().media.sampling_rate,
            self.sampling_rate,
            "chart sampling rate differs from the device rate"
        );
        let gain = lufs_to_gain(cursor.chart().metadata.loudness);
        {
            let metadata = &cursor.chart().metadata;
            log::info!(
                "PLAYER: Attached \"{}\" ({:?}, {} notes, gain {:.3})",
                metadata.title,
                metadata.playstyle,
                metadata.note_count,
                gain
            );
        }
        self.cursors.push(PlayableCursor {
            cursor,
            mapper,
            gain,
            sample_offset: self.samples_processed,
        });
    }

    /// Detaches the cursor playing `chart` and drops its voices. No-op
    /// when the chart was never attached.
    pub fn remove_cursor(&mut self, chart: &ChartHash) {
        self.active_sounds.retain(|sound| sound.chart != *chart);
        if let Some(index) = self
            .cursors
            .iter()
            .position(|pc| pc.cursor.chart().hash == *chart)
        {
            let removed = self.cursors.remove(index);
            log::info!(
                "PLAYER: Detached {} after {} samples",
                chart,
                self.samples_processed - removed.sample_offset
            );
        }
    }

    /// A copy of the registered cursor advanced to the sample playing
    /// from the speakers right now. Best-guess estimate from the time
    /// elapsed since the last audio buffer.
    ///
    /// # Panics
    ///
    /// Panics when the chart is not registered.
    pub fn audio_cursor(&self, chart: &ChartHash) -> Cursor {
        let playable = self
            .cursors
            .iter()
            .find(|pc| pc.cursor.chart().hash == *chart)
            .expect("audio_cursor: chart is not registered");

        let progress_ns = samples_to_ns(self.samples_processed, self.sampling_rate);
        let buffer_start_progress = (progress_ns - self.latency).max(0);
        let last_buffer_start = self.timer_slop + buffer_start_progress;
        let elapsed = self.clock.now() - last_buffer_start;
        let elapsed_samples = ns_to_samples(elapsed, self.sampling_rate);
        let latency_samples = ns_to_samples(self.latency, self.sampling_rate);

        let mut copy = playable.cursor.clone();
        copy.seek_relative(elapsed_samples.clamp(0, latency_samples));
        copy
    }

    /// Idempotent. While paused the generator emits silence and the
    /// wall-clock anchor slides forward, so resuming never jumps.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            log::info!("PLAYER: Paused");
        }
    }

    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            log::info!("PLAYER: Resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl Generator for Player {
    fn begin_buffer(&mut self) {
        // Retrieve new inputs, shifted into the future so the sample
        // clock is always catching up to them, never past them.
        while let Ok(mut input) = self.input_rx.try_recv() {
            input.shift_timestamp(self.latency + self.note_offset);
            self.pending_inputs.push(input);
        }

        if self.paused {
            return;
        }

        // Correct the wall-clock anchor.
        let estimated = self.timer_slop + samples_to_ns(self.samples_processed, self.sampling_rate);
        let now = self.clock.now();
        let difference = now - estimated;
        self.timer_slop += difference;
        if difference > LATE_WARNING {
            log::warn!("PLAYER: Audio timer late by {} ms", difference / NANOS_PER_MS);
        } else if difference < -LATE_WARNING {
            log::warn!("PLAYER: Audio timer early by {} ms", -difference / NANOS_PER_MS);
        }
    }

    fn next_sample(&mut self) -> Sample {
        if self.paused {
            self.timer_slop += samples_to_ns(1, self.sampling_rate);
            return Sample::default();
        }

        // Inputs due at this exact sample.
        let sample_timestamp =
            self.timer_slop + samples_to_ns(self.samples_processed, self.sampling_rate);
        self.samples_processed += 1;
        let due = &mut self.scratch_inputs;
        due.clear();
        self.pending_inputs.retain(|input| {
            if input.timestamp() <= sample_timestamp {
                if sample_timestamp - input.timestamp() > LATE_WARNING {
                    log::warn!("PLAYER: Input event timestamp more than 5 ms in the past");
                }
                due.push(*input);
                false
            } else {
                true
            }
        });

        // Advance every cursor with its own translation of the inputs.
        let cursors = &mut self.cursors;
        let active_sounds = &mut self.active_sounds;
        let lane_inputs = &mut self.scratch_lanes;
        for pc in cursors.iter_mut() {
            let playstyle = pc.cursor.chart().metadata.playstyle;
            lane_inputs.clear();
            for input in due.iter() {
                match input {
                    UserInput::Key(key) => {
                        if let Some(lane) = pc.mapper.from_key(key, playstyle) {
                            lane_inputs.push(lane);
                        }
                    }
                    UserInput::Button(button) => {
                        if let Some(lane) = pc.mapper.from_button(button, playstyle) {
                            lane_inputs.push(lane);
                        }
                    }
                    UserInput::Axis(axis) => {
                        lane_inputs.extend(pc.mapper.submit_axis_input(axis, playstyle));
                    }
                }
            }
            lane_inputs.extend(pc.mapper.from_axis_state(playstyle, sample_timestamp));

            let gain = pc.gain;
            pc.cursor.advance_one_sample(
                &mut |trigger| {
                    // One voice per (chart, channel): a retrigger rewinds
                    // instead of stacking.
                    match active_sounds
                        .iter_mut()
                        .find(|s| s.chart == trigger.chart && s.channel == trigger.channel)
                    {
                        Some(voice) => voice.position = 0,
                        None => active_sounds.push(ActiveSound {
                            chart: trigger.chart,
                            channel: trigger.channel,
                            pcm: trigger.pcm,
                            position: 0,
                            gain,
                        }),
                    }
                },
                lane_inputs,
            );
        }

        // Mix the active voices, swap-erasing the exhausted ones.
        let mut sample_mix = Sample::default();
        let mut i = 0;
        while i < active_sounds.len() {
            let voice = &mut active_sounds[i];
            let frame = voice.pcm[voice.position];
            sample_mix.left += frame.left * voice.gain;
            sample_mix.right += frame.right * voice.gain;
            voice.position += 1;
            if voice.position >= voice.pcm.len() {
                active_sounds.swap_remove(i);
            } else {
                i += 1;
            }
        }
        sample_mix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::TARGET_LUFS;
    use crate::chart::cursor::{JudgmentEvent, JudgmentEventKind};
    use crate::chart::score::{JudgmentType, Score, Timing};
    use crate::chart::{
        BpmChange, BpmRange, Chart, Lane, LaneKind, Media, Metadata, Note, NoteKind, Timeline,
    };
    use crate::input::events::KeyInput;
    use crate::models::settings::Settings;
    use crate::time::TestClock;
    use winit::keyboard::KeyCode;

    const RATE: u32 = 48000;
    const LATENCY: Nanos = 30 * NANOS_PER_MS;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn pcm(frames: usize, level: f32) -> WavSlot {
        Arc::from(vec![
            Sample {
                left: level,
                right: level
            };
            frames
        ])
    }

    fn chart(playable: Vec<Note>, bgm: Vec<Note>, note_count: u32) -> Arc<Chart> {
        chart_with(playable, bgm, note_count, 64)
    }

    fn chart_with(
        playable: Vec<Note>,
        bgm: Vec<Note>,
        note_count: u32,
        slot_frames: usize,
    ) -> Arc<Chart> {
        let mut timeline = Timeline::default();
        timeline.lanes[LaneKind::P1Key1.index()] = Lane {
            notes: playable,
            playable: true,
            visible: true,
            audible: true,
        };
        timeline.lanes[LaneKind::Bgm.index()] = Lane {
            notes: bgm,
            playable: false,
            visible: false,
            audible: true,
        };
        timeline.bpm_sections = vec![BpmChange {
            position: 0,
            bpm: 130.0,
            y_pos: 0.0,
            scroll_speed: 1.0,
        }];
        Arc::new(Chart {
            hash: ChartHash::of_source(b"player test"),
            metadata: Metadata {
                title: "player test".into(),
                note_count,
                // Unity gain keeps expected sample values exact.
                loudness: TARGET_LUFS,
                bpm_range: BpmRange {
                    initial: 130.0,
                    min: 130.0,
                    max: 130.0,
                    main: 130.0,
                },
                ..Metadata::default()
            },
            timeline,
            media: Media {
                wav_slots: vec![pcm(slot_frames, 0.5)],
                sampling_rate: RATE,
            },
        })
    }

    fn simple(at_ms: Nanos) -> Note {
        Note {
            kind: NoteKind::Simple,
            timestamp: at_ms * NANOS_PER_MS,
            y_pos: 0.0,
            wav_slot: 0,
        }
    }

    fn long(at_ms: Nanos, length_ms: Nanos) -> Note {
        Note {
            kind: NoteKind::Long {
                length: length_ms * NANOS_PER_MS,
                height: 1.0,
            },
            timestamp: at_ms * NANOS_PER_MS,
            y_pos: 0.0,
            wav_slot: 0,
        }
    }

    fn player(clock: &Arc<TestClock>) -> Player {
        let shared: Arc<dyn Clock> = clock.clone();
        Player::new(RATE, LATENCY, &GameplaySettings::default(), shared)
    }

    fn mapper() -> Mapper {
        Mapper::new(&Settings::default()).unwrap()
    }

    fn key_press(at_ms: Nanos, pressed: bool) -> UserInput {
        // KeyZ is P1 key 1 in the default 7K layout.
        UserInput::Key(KeyInput {
            timestamp: at_ms * NANOS_PER_MS,
            code: KeyCode::KeyZ,
            pressed,
        })
    }

    /// Runs whole buffers, keeping the test clock in lockstep with the
    /// sample counter.
    fn run_buffers(
        player: &mut Player,
        clock: &TestClock,
        buffers: usize,
        frames: usize,
    ) -> Vec<Sample> {
        let mut output = Vec::with_capacity(buffers * frames);
        for _ in 0..buffers {
            // Wall time tracks the sample clock through the anchor, so
            // buffer-boundary corrections are exact in both play and
            // pause.
            clock.set(player.timer_slop + samples_to_ns(player.samples_processed, RATE));
            player.begin_buffer();
            for _ in 0..frames {
                output.push(player.next_sample());
            }
        }
        output
    }

    fn events_of(handle: &crate::chart::cursor::JudgmentEvents) -> Vec<JudgmentEvent> {
        handle.pending().collect()
    }

    /// S1: one note at 1.000 s; a press timed for each window produces
    /// the expected judgment.
    #[test]
    fn judgment_windows_end_to_end() {
        init_logs();
        let cases: [(Option<Nanos>, JudgmentType, i64, Timing); 5] = [
            (Some(999), JudgmentType::PGreat, 2, Timing::OnTime),
            (Some(970), JudgmentType::Great, 1, Timing::Early),
            (Some(930), JudgmentType::Good, 0, Timing::Early),
            (Some(800), JudgmentType::Bad, 0, Timing::Early),
            (None, JudgmentType::Poor, 0, Timing::None),
        ];
        for (press_ms, expected, expected_score, expected_timing) in cases {
            let clock = Arc::new(TestClock::new(0));
            let mut player = player(&clock);
            let chart = chart(vec![simple(1000)], vec![], 1);
            let cursor = Cursor::new(chart.clone(), false);
            let handle = cursor.judgment_events();
            let mut score = Score::new(&chart);
            player.add_cursor(cursor, mapper());

            if let Some(at) = press_ms {
                // Stamp so the latency shift lands the press on target.
                player.input_queue().send(key_press(at - 30, true)).unwrap();
            }

            // 1.5 s of audio in 128-frame buffers.
            run_buffers(&mut player, &clock, 600, 128);

            let events = events_of(&handle);
            assert_eq!(events.len(), 1, "case {press_ms:?}");
            for event in &events {
                score.submit(event);
            }
            assert_eq!(score.judged_notes(), 1);
            assert_eq!(score.judge_totals().of_type(expected), 1, "case {press_ms:?}");
            assert_eq!(score.score(), expected_score, "case {press_ms:?}");
            assert_eq!(
                score.judge_totals().of_timing(expected_timing),
                1,
                "case {press_ms:?}"
            );
        }
    }

    /// S6: the cursor never observes an input earlier than one device
    /// latency after its wall-clock origin.
    #[test]
    fn inputs_are_latency_shifted() {
        let clock = Arc::new(TestClock::new(0));
        let mut player = player(&clock);
        // Note placed exactly at wall time + latency.
        let chart = chart(vec![simple(1030)], vec![], 1);
        let cursor = Cursor::new(chart.clone(), false);
        let handle = cursor.judgment_events();
        player.add_cursor(cursor, mapper());

        player.input_queue().send(key_press(1000, true)).unwrap();
        run_buffers(&mut player, &clock, 500, 128);

        let events = events_of(&handle);
        assert_eq!(events.len(), 1);
        // The press arrived at 1.000 s + 30 ms, on the note.
        let timing = events[0].timing.unwrap();
        assert!(timing.abs() <= NANOS_PER_MS, "timing {timing}");
    }

    /// S4 from the player's side: one voice per channel, retrigger
    /// rewinds.
    #[test]
    fn keysound_retrigger_reuses_the_voice() {
        let clock = Arc::new(TestClock::new(0));
        let mut player = player(&clock);
        // 100 ms of PCM so the first voice is still alive at the second
        // trigger.
        let chart = chart_with(vec![simple(100), simple(110)], vec![], 2, 4800);
        player.add_cursor(Cursor::new(chart, true), mapper());

        // Up to just past the second note; both triggers have fired.
        run_buffers(&mut player, &clock, 43, 128);
        assert_eq!(player.active_sounds.len(), 1, "retrigger must not stack");
        // The rewind happened: the voice restarted at the second note.
        assert!(player.active_sounds[0].position < 480);
    }

    #[test]
    fn voices_mix_and_expire() {
        let clock = Arc::new(TestClock::new(0));
        let mut player = player(&clock);
        let chart = chart(vec![], vec![simple(0)], 0);
        player.add_cursor(Cursor::new(chart, false), mapper());

        let output = run_buffers(&mut player, &clock, 2, 128);
        // The voice starts on the first sample (note at t=0) and lasts 64
        // frames at level 0.5 under unity gain.
        assert!((output[0].left - 0.5).abs() < 1e-6);
        assert!((output[63].left - 0.5).abs() < 1e-6);
        assert_eq!(output[64], Sample::default());
        assert!(player.active_sounds.is_empty());
    }

    #[test]
    fn remove_cursor_drops_voices() {
        let clock = Arc::new(TestClock::new(0));
        let mut player = player(&clock);
        let chart = chart(vec![], vec![simple(0)], 0);
        let hash = chart.hash;
        player.add_cursor(Cursor::new(chart, false), mapper());
        run_buffers(&mut player, &clock, 1, 16);
        assert_eq!(player.active_sounds.len(), 1);

        player.remove_cursor(&hash);
        assert!(player.cursors.is_empty());
        assert!(player.active_sounds.is_empty());
        // Removing twice is a no-op.
        player.remove_cursor(&hash);
    }

    #[test]
    fn pause_freezes_progress_and_slides_the_anchor() {
        init_logs();
        let clock = Arc::new(TestClock::new(0));
        let mut player = player(&clock);
        let chart = chart(vec![simple(1000)], vec![], 1);
        let cursor = Cursor::new(chart.clone(), false);
        let handle = cursor.judgment_events();
        player.add_cursor(cursor, mapper());

        run_buffers(&mut player, &clock, 10, 128);
        let progress = player.samples_processed;
        let slop = player.timer_slop;

        player.pause();
        let paused_output = run_buffers(&mut player, &clock, 10, 128);
        assert!(paused_output.iter().all(|s| *s == Sample::default()));
        assert_eq!(player.samples_processed, progress, "no progress while paused");
        assert_eq!(
            player.timer_slop,
            slop + samples_to_ns(1, RATE) * 10 * 128,
            "anchor slides one sample per call"
        );

        player.resume();
        // Long after the original note window on the wall clock, yet the
        // chart still judges it: pausing shifted the anchor.
        run_buffers(&mut player, &clock, 600, 128);
        let events = events_of(&handle);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timing, None);
    }

    /// Invariant 1: the judgment stream and sample stream do not depend
    /// on the device buffer size.
    #[test]
    fn playback_is_buffer_size_invariant() {
        let run = |frames: usize, buffers: usize| {
            let clock = Arc::new(TestClock::new(0));
            let mut player = player(&clock);
            let chart = chart(vec![simple(300), long(600, 200), simple(1100)], vec![simple(50)], 3);
            let cursor = Cursor::new(chart.clone(), false);
            let handle = cursor.judgment_events();
            player.add_cursor(cursor, mapper());

            let queue = player.input_queue();
            // Press, hold over the LN, release late; timestamps aligned
            // to sample boundaries.
            queue.send(key_press(300 - 30, true)).unwrap();
            queue.send(key_press(400 - 30, false)).unwrap();
            queue.send(key_press(600 - 30, true)).unwrap();
            queue.send(key_press(790 - 30, false)).unwrap();

            let output = run_buffers(&mut player, &clock, buffers, frames);
            let events: Vec<(JudgmentEventKind, Option<Nanos>, Option<Nanos>)> = events_of(&handle)
                .into_iter()
                .map(|e| (e.kind, e.timing, e.release_timing))
                .collect();
            (output, events)
        };

        let (output_small, events_small) = run(64, 1500);
        let (output_large, events_large) = run(256, 375);
        assert_eq!(events_small, events_large);
        assert_eq!(output_small, output_large);
    }

    /// Invariant 5: after replaying to completion every playable note is
    /// accounted for.
    #[test]
    fn judgment_totals_are_conserved() {
        let clock = Arc::new(TestClock::new(0));
        let mut player = player(&clock);
        let chart = chart(
            vec![simple(100), long(300, 200), simple(700), simple(900)],
            vec![],
            4,
        );
        let cursor = Cursor::new(chart.clone(), false);
        let handle = cursor.judgment_events();
        let mut score = Score::new(&chart);
        player.add_cursor(cursor, mapper());

        run_buffers(&mut player, &clock, 600, 128);
        for event in events_of(&handle) {
            score.submit(&event);
        }
        let total: i64 = score.judge_totals().types.iter().sum();
        assert_eq!(total, chart.metadata.note_count as i64);
    }

    #[test]
    fn audio_cursor_tracks_between_buffers() {
        let clock = Arc::new(TestClock::new(0));
        let mut player = player(&clock);
        let chart = chart(vec![], vec![], 0);
        let hash = chart.hash;
        player.add_cursor(Cursor::new(chart, false), mapper());

        run_buffers(&mut player, &clock, 100, 128);
        let buffered = player.audio_cursor(&hash).progress();

        // Halfway into the next buffer on the wall clock.
        clock.advance(64 * samples_to_ns(1, RATE));
        let advanced = player.audio_cursor(&hash).progress();
        assert!(advanced > buffered);
        // Never further than the latency allows.
        let cap = ns_to_samples(LATENCY, RATE) as u64;
        assert!(advanced - buffered <= cap + 64);

        // The snapshot is a copy: the player's own cursor is untouched.
        assert_eq!(player.cursors[0].cursor.progress(), player.samples_processed);
    }

    #[test]
    #[should_panic(expected = "audio_cursor")]
    fn audio_cursor_panics_for_unknown_chart() {
        let clock = Arc::new(TestClock::new(0));
        let player = player(&clock);
        player.audio_cursor(&ChartHash::default());
    }

    #[test]
    #[should_panic(expected = "sampling rate")]
    fn add_cursor_rejects_rate_mismatch() {
        let clock = Arc::new(TestClock::new(0));
        let mut player = player(&clock);
        let mut mismatched = (*chart(vec![], vec![], 0)).clone();
        mismatched.media.sampling_rate = 44100;
        player.add_cursor(Cursor::new(Arc::new(mismatched), false), mapper());
    }
}
