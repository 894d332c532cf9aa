//! Audio-locked playback of a decoded instruction stream.
//!
//! The [`Scheduler`] owns the framebuffer and the renderer. The host drives it
//! cooperatively: it calls [`Scheduler::tick`] from its timer or frame
//! callback and [`Scheduler::sync`] whenever the audio element reports a new
//! position. Between syncs the position is extrapolated from wall-clock time.

use std::{
    cell::Cell,
    fmt,
    rc::Rc,
    time::{Duration, Instant},
};

use crate::{
    config::PlayerConfig,
    framebuffer::FrameBuffer,
    packet::{self, Diagnostic, Instruction, ParseOutput},
    render::Renderer,
};

/// Wall-clock source in milliseconds.
pub trait TimeSource {
    fn now_ms(&self) -> f64;
}

/// Monotonic host clock measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTime {
    origin: Instant,
}

impl MonotonicTime {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Hand-driven clock. Clones share the same reading.
#[derive(Debug, Clone, Default)]
pub struct ManualTime {
    now: Rc<Cell<f64>>,
}

impl ManualTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ms: f64) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: f64) {
        self.now.set(self.now.get() + ms);
    }
}

impl TimeSource for ManualTime {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SyncPin {
    position_ms: f64,
    timestamp: f64,
}

/// Virtual playback position, advanced by wall-clock deltas or pinned to an
/// externally reported position.
#[derive(Debug, Default, Clone)]
pub struct PlaybackClock {
    position_ms: f64,
    last_timestamp: Option<f64>,
    pin: Option<SyncPin>,
}

impl PlaybackClock {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn position_ms(&self) -> f64 {
        self.position_ms
    }

    pub fn is_pinned(&self) -> bool {
        self.pin.is_some()
    }

    /// Marks `now` as the reference point for the next advance.
    pub fn start(&mut self, now: f64) {
        self.last_timestamp = Some(now);
    }

    /// Declares that playback is at `position_ms` at wall-clock time `now`.
    pub fn sync(&mut self, position_ms: f64, now: f64) {
        self.pin = Some(SyncPin {
            position_ms,
            timestamp: now,
        });
        self.last_timestamp = Some(now);
    }

    pub fn unpin(&mut self) {
        self.pin = None;
    }

    /// Moves the position to wall-clock time `now` and returns it.
    pub fn advance(&mut self, now: f64) -> f64 {
        let last = self.last_timestamp.unwrap_or(now);
        let position = match self.pin {
            Some(pin) => pin.position_ms + (now - pin.timestamp),
            None => self.position_ms + (now - last),
        };
        self.position_ms = position.max(0.0);
        self.last_timestamp = Some(now);
        self.position_ms
    }
}

/// Token for the currently scheduled repeating tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickHandle(u64);

/// Coarse lifecycle of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// Nothing loaded yet.
    Idle,
    /// Loaded or reset; the next instruction is the first one.
    Loaded,
    Running,
    Paused,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickOutcome {
    pub position_ms: f64,
    pub executed: usize,
    pub rewound: bool,
    pub rendered: bool,
    /// Whether the host should schedule another tick.
    pub reschedule: bool,
}

/// Read-only view handed to render observers.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub rgba: &'a [u8],
    pub frame: &'a FrameBuffer,
    pub pc: usize,
    pub position_ms: f64,
}

type RenderObserver = Box<dyn FnMut(&FrameView<'_>)>;

pub struct Scheduler {
    config: PlayerConfig,
    time: Box<dyn TimeSource>,
    instructions: Vec<Instruction>,
    diagnostics: Vec<Diagnostic>,
    frame: FrameBuffer,
    renderer: Renderer,
    observers: Vec<RenderObserver>,
    pc: Option<usize>,
    clock: PlaybackClock,
    tick: Option<TickHandle>,
    next_tick: u64,
    started: bool,
}

impl Scheduler {
    pub fn new(config: PlayerConfig, renderer: Renderer, time: Box<dyn TimeSource>) -> Self {
        Self {
            config,
            time,
            instructions: Vec::new(),
            diagnostics: Vec::new(),
            frame: FrameBuffer::new(),
            renderer,
            observers: Vec::new(),
            pc: None,
            clock: PlaybackClock::default(),
            tick: None,
            next_tick: 0,
            started: false,
        }
    }

    /// Headless scheduler on the monotonic host clock with default timing.
    pub fn headless() -> Self {
        Self::new(
            PlayerConfig::default(),
            Renderer::headless(),
            Box::new(MonotonicTime::new()),
        )
    }

    /// Parses `bytes`, keeps the instructions and resets playback.
    pub fn load(&mut self, bytes: &[u8]) {
        self.load_parsed(packet::parse(bytes));
    }

    /// Installs an already parsed stream and resets playback.
    pub fn load_parsed(&mut self, parsed: ParseOutput) {
        tracing::debug!(
            instructions = parsed.instructions.len(),
            diagnostics = parsed.diagnostics.len(),
            "loading instruction stream"
        );
        self.instructions = parsed.instructions;
        self.diagnostics = parsed.diagnostics;
        self.reset();
    }

    /// Cancels the tick, rewinds to the first instruction and renders the
    /// blank state.
    pub fn reset(&mut self) {
        self.stop();
        self.pc = Some(0);
        self.clock.reset();
        self.started = false;
        self.frame.reset();
        self.render();
    }

    /// Schedules the repeating tick. Calling it while running does nothing.
    pub fn play(&mut self) -> Option<TickHandle> {
        if self.pc.is_none() {
            tracing::debug!("play requested before a stream was loaded");
            return None;
        }
        if let Some(handle) = self.tick {
            return Some(handle);
        }

        let handle = TickHandle(self.next_tick);
        self.next_tick += 1;
        self.tick = Some(handle);
        self.started = true;
        self.clock.start(self.time.now_ms());
        Some(handle)
    }

    /// Cancels the scheduled tick and drops any sync pin. Idempotent.
    pub fn stop(&mut self) {
        self.tick = None;
        self.clock.unpin();
    }

    /// Pins the playback position reported by the audio element to the
    /// current wall-clock time.
    pub fn sync(&mut self, position_ms: f64) {
        let now = self.time.now_ms();
        self.clock.sync(position_ms, now);
    }

    /// Runs one tick at the current reading of the time source.
    pub fn pump(&mut self) -> TickOutcome {
        let now = self.time.now_ms();
        self.tick(now)
    }

    /// Runs one tick at wall-clock time `timestamp`.
    pub fn tick(&mut self, timestamp: f64) -> TickOutcome {
        let Some(mut pc) = self.pc.filter(|_| self.tick.is_some()) else {
            return TickOutcome {
                position_ms: self.clock.position_ms(),
                ..TickOutcome::default()
            };
        };

        let position_ms = self.clock.advance(timestamp);
        let target = self.target_pc(position_ms);

        let rewound = target < pc;
        if rewound {
            tracing::debug!(from = pc, to = target, "rewinding for backward seek");
            self.frame.reset();
            pc = 0;
        }

        for instruction in &self.instructions[pc..target] {
            instruction.apply(&mut self.frame);
        }
        let executed = target - pc;
        self.pc = Some(target);

        let rendered = executed > 0 || rewound;
        if rendered {
            tracing::trace!(pc = target, executed, position_ms, "rendering frame");
            self.render();
        }

        TickOutcome {
            position_ms,
            executed,
            rewound,
            rendered,
            reschedule: self.tick.is_some(),
        }
    }

    /// Registers a callback invoked after every render.
    pub fn on_render(&mut self, observer: impl FnMut(&FrameView<'_>) + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn state(&self) -> PlayerState {
        match (self.pc, self.tick, self.started) {
            (None, _, _) => PlayerState::Idle,
            (Some(_), Some(_), _) => PlayerState::Running,
            (Some(_), None, true) => PlayerState::Paused,
            (Some(_), None, false) => PlayerState::Loaded,
        }
    }

    pub fn is_running(&self) -> bool {
        self.tick.is_some()
    }

    /// Index of the next instruction; `None` before anything was loaded.
    pub fn pc(&self) -> Option<usize> {
        self.pc
    }

    pub fn position_ms(&self) -> f64 {
        self.clock.position_ms()
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    /// The most recently rendered RGBA frame.
    pub fn image(&self) -> &[u8] {
        self.renderer.image()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    fn target_pc(&self, position_ms: f64) -> usize {
        let rate = self.config.packet_rate() as f64;
        let target = (rate * position_ms / 1000.0).floor() as usize;
        target.min(self.instructions.len())
    }

    fn render(&mut self) {
        self.renderer.render(&self.frame);
        let view = FrameView {
            rgba: self.renderer.image(),
            frame: &self.frame,
            pc: self.pc.unwrap_or(0),
            position_ms: self.clock.position_ms(),
        };
        for observer in &mut self.observers {
            observer(&view);
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("instructions", &self.instructions.len())
            .field("diagnostics", &self.diagnostics.len())
            .field("observers", &self.observers.len())
            .field("pc", &self.pc)
            .field("clock", &self.clock)
            .field("tick", &self.tick)
            .finish()
    }
}

/// Totals from a [`run_for`] session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: usize,
    pub executed: usize,
    pub renders: usize,
}

/// Drives the tick loop on the calling thread for `duration`, sleeping
/// `tick_interval_ms` between ticks. Returns early once the scheduler stops.
pub fn run_for(scheduler: &mut Scheduler, duration: Duration) -> RunSummary {
    let interval = Duration::from_millis(scheduler.config().tick_interval_ms);
    let started = Instant::now();
    let mut summary = RunSummary::default();

    while started.elapsed() < duration {
        let outcome = scheduler.pump();
        if !outcome.reschedule {
            break;
        }
        summary.ticks += 1;
        summary.executed += outcome.executed;
        summary.renders += usize::from(outcome.rendered);
        std::thread::sleep(interval);
    }
    summary
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::framebuffer::{Scroll, ScrollShift, TileBlock};
    use proptest::prelude::*;

    /// `count` packets of XOR tiles interleaved with a scroll every 50th packet.
    fn stream(count: usize) -> Vec<u8> {
        let mut bytes = Instruction::MemoryPreset { color: 1 }.encode().to_vec();
        for i in 1..count {
            let instruction = if i % 50 == 0 {
                Instruction::Scroll(Scroll {
                    fill_color: (i % 16) as u8,
                    horizontal: ScrollShift::from_command((i / 50 % 3) as u8),
                    h_offset: (i % 8) as u8,
                    vertical: ScrollShift::Positive,
                    v_offset: 0,
                    copy: i % 100 == 0,
                })
            } else {
                Instruction::Tile(TileBlock {
                    row: (i % 18) as u8,
                    column: (i % 50) as u8,
                    colors: [(i % 16) as u8, ((i * 3) % 16) as u8],
                    rows: [(i % 64) as u8; 12],
                    xor: i % 3 == 0,
                })
            };
            bytes.extend_from_slice(&instruction.encode());
        }
        bytes
    }

    fn scheduler(time: &ManualTime) -> Scheduler {
        Scheduler::new(
            PlayerConfig::default(),
            Renderer::headless(),
            Box::new(time.clone()),
        )
    }

    fn loaded(time: &ManualTime, count: usize) -> Scheduler {
        let mut scheduler = scheduler(time);
        scheduler.load(&stream(count));
        scheduler
    }

    #[test]
    fn starts_idle_and_ignores_play() {
        let time = ManualTime::new();
        let mut scheduler = scheduler(&time);

        assert_eq!(scheduler.state(), PlayerState::Idle);
        assert_eq!(scheduler.pc(), None);
        assert_eq!(scheduler.play(), None);
        assert!(!scheduler.tick(100.0).reschedule);
    }

    #[test]
    fn reset_renders_a_blank_frame() {
        let time = ManualTime::new();
        let mut scheduler = loaded(&time, 600);
        scheduler.play();
        scheduler.tick(1000.0);
        assert!(scheduler.pc().unwrap() > 0);

        scheduler.reset();

        assert_eq!(scheduler.pc(), Some(0));
        assert_eq!(scheduler.state(), PlayerState::Loaded);
        assert!(scheduler.frame().pixels().iter().all(|&p| p == 0));
        assert!(scheduler
            .image()
            .chunks_exact(4)
            .all(|pixel| pixel == [0, 0, 0, 255]));
    }

    #[test]
    fn play_and_stop_are_idempotent() {
        let time = ManualTime::new();
        let mut scheduler = loaded(&time, 10);

        let first = scheduler.play();
        assert_eq!(scheduler.play(), first);
        assert_eq!(scheduler.state(), PlayerState::Running);

        scheduler.stop();
        scheduler.stop();
        assert_eq!(scheduler.state(), PlayerState::Paused);

        let outcome = scheduler.tick(10_000.0);
        assert_eq!(outcome.executed, 0);
        assert!(!outcome.reschedule);
    }

    #[test]
    fn advances_at_three_hundred_packets_per_second() {
        let time = ManualTime::new();
        let mut scheduler = loaded(&time, 600);
        scheduler.play();

        let outcome = scheduler.tick(100.0);
        assert_eq!(outcome.executed, 30);
        assert_eq!(scheduler.pc(), Some(30));
        assert!(outcome.rendered);
        assert!(outcome.reschedule);
    }

    #[test]
    fn renders_once_per_tick_and_only_on_change() {
        let time = ManualTime::new();
        let mut scheduler = loaded(&time, 600);
        let renders = Rc::new(Cell::new(0));
        let counter = renders.clone();
        scheduler.on_render(move |_| counter.set(counter.get() + 1));

        scheduler.play();
        scheduler.tick(1500.0);
        assert_eq!(renders.get(), 1);

        scheduler.tick(1501.0);
        assert_eq!(renders.get(), 1);
    }

    #[test]
    fn sync_extrapolates_from_the_pinned_position() {
        let time = ManualTime::new();
        let mut scheduler = loaded(&time, 600);
        scheduler.play();

        time.set(200.0);
        scheduler.sync(1000.0);
        let outcome = scheduler.tick(250.0);
        assert_eq!(outcome.position_ms, 1050.0);
        assert_eq!(scheduler.pc(), Some(315));

        let outcome = scheduler.tick(300.0);
        assert_eq!(outcome.position_ms, 1100.0);
        assert_eq!(scheduler.pc(), Some(330));
    }

    #[test]
    fn stop_drops_the_pin_so_resume_continues_from_pause() {
        let time = ManualTime::new();
        let mut scheduler = loaded(&time, 600);
        scheduler.play();
        scheduler.sync(500.0);
        scheduler.tick(100.0);
        assert_eq!(scheduler.position_ms(), 600.0);

        scheduler.stop();
        time.set(1100.0);
        scheduler.play();
        scheduler.tick(1200.0);
        assert_eq!(scheduler.position_ms(), 700.0);
    }

    #[test]
    fn clamps_to_the_end_of_the_stream_and_can_still_rewind() {
        let time = ManualTime::new();
        let mut scheduler = loaded(&time, 60);
        scheduler.play();

        let outcome = scheduler.tick(5000.0);
        assert_eq!(outcome.executed, 60);
        assert!(outcome.reschedule);
        assert_eq!(scheduler.tick(6000.0).executed, 0);

        time.set(6000.0);
        scheduler.sync(100.0);
        let outcome = scheduler.tick(6000.0);
        assert!(outcome.rewound);
        assert_eq!(outcome.executed, 30);
    }

    #[test]
    fn backward_sync_replays_to_an_identical_frame() {
        let time = ManualTime::new();
        let mut forward = loaded(&time, 900);
        forward.play();
        forward.tick(1500.0);

        let rewind_time = ManualTime::new();
        let mut rewound = loaded(&rewind_time, 900);
        rewound.play();
        rewound.tick(2800.0);
        rewind_time.set(2800.0);
        rewound.sync(1500.0);
        let outcome = rewound.tick(2800.0);

        assert!(outcome.rewound);
        assert_eq!(rewound.pc(), forward.pc());
        assert_eq!(rewound.frame().pixels(), forward.frame().pixels());
        assert_eq!(rewound.image(), forward.image());
    }

    #[test]
    fn observers_see_the_rendered_position() {
        let time = ManualTime::new();
        let mut scheduler = loaded(&time, 600);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        scheduler.on_render(move |view| sink.borrow_mut().push((view.pc, view.rgba.len())));

        scheduler.play();
        scheduler.tick(200.0);

        assert_eq!(seen.borrow().as_slice(), &[(60, crate::render::FRAME_BYTES)]);
    }

    #[test]
    fn empty_streams_stay_blank() {
        let time = ManualTime::new();
        let mut scheduler = scheduler(&time);
        scheduler.load(&[]);
        scheduler.play();

        let outcome = scheduler.tick(1000.0);
        assert_eq!(outcome.executed, 0);
        assert!(!outcome.rendered);
        assert_eq!(scheduler.pc(), Some(0));
    }

    #[test]
    fn oversized_packet_rates_saturate_at_the_end_of_the_stream() {
        let time = ManualTime::new();
        let config = PlayerConfig {
            packets_per_sector: 100_000,
            sectors_per_second: 100_000,
            tick_interval_ms: 4,
        };
        let mut scheduler = Scheduler::new(config, Renderer::headless(), Box::new(time.clone()));
        scheduler.load(&stream(50));
        scheduler.play();

        let outcome = scheduler.tick(10.0);
        assert_eq!(outcome.executed, 50);
        assert_eq!(scheduler.pc(), Some(50));
    }

    #[test]
    fn run_for_stops_when_the_scheduler_is_stopped() {
        let mut scheduler = Scheduler::headless();
        scheduler.load(&stream(10));

        let summary = run_for(&mut scheduler, Duration::from_millis(50));
        assert_eq!(summary, RunSummary::default());
    }

    proptest! {
        #[test]
        fn prop_execution_count_is_independent_of_tick_batching(
            steps in proptest::collection::vec(1u32..200, 1..20),
        ) {
            let total: u32 = steps.iter().sum();

            let time = ManualTime::new();
            let mut batched = loaded(&time, 2000);
            batched.play();
            let batched_executed = batched.tick(f64::from(total)).executed;

            let mut stepped = loaded(&time, 2000);
            stepped.play();
            let mut now = 0u32;
            let mut stepped_executed = 0;
            for step in &steps {
                now += step;
                stepped_executed += stepped.tick(f64::from(now)).executed;
            }

            prop_assert_eq!(batched_executed, stepped_executed);
            prop_assert_eq!(batched.pc(), stepped.pc());
            prop_assert_eq!(batched.frame().pixels(), stepped.frame().pixels());
        }
    }
}
