//! A simulated plotter that runs in virtual time.
//!
//! Motors move at a fixed maximum speed and never overshoot, which is enough
//! to check that the control loops terminate and to see what they draw. All
//! the handles share state, so tests can poke at a motor while the plotter
//! owns another handle to it.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use ropeplot_geom::{Config, MotorAngles, Point};

use crate::{
    axis::{
        Acknowledge, AxisId, ChalkHardware, MotorAxis, PidGains, Polarity, PowerSupply, Rig,
        StopAction, TouchSensor,
    },
    clock::Clock,
};

// Longest stretch of virtual time that is integrated in one go.
const MAX_STEP: Duration = Duration::from_millis(4);

#[derive(Clone, Copy, Debug, PartialEq)]
enum Mode {
    Stopped,
    Regulating,
    Forever(f64),
    Direct(f64),
    ToAbs { target: f64, speed: f64 },
}

#[derive(Debug)]
struct AxisState {
    // Shaft position in the motor's normal direction. The reported position is
    // `raw + offset`, or `offset - raw` under inversed polarity.
    raw: f64,
    offset: f64,
    sp: i32,
    mode: Mode,
    max_speed: f64,
    limits: Option<(f64, f64)>,
    stalled: bool,
    jammed: bool,
    gains: PidGains,
    stop_action: StopAction,
    polarity: Polarity,
    // -1 for a motor mounted the other way round, so the shaft turns against
    // the rope.
    mount: f64,
    writes: usize,
}

impl AxisState {
    fn sign(&self) -> f64 {
        match self.polarity {
            Polarity::Normal => 1.0,
            Polarity::Inversed => -1.0,
        }
    }

    fn reported(&self, raw: f64) -> f64 {
        self.sign() * raw + self.offset
    }

    fn position(&self) -> i32 {
        self.reported(self.raw).round() as i32
    }

    // Raw position of a reported one.
    fn raw_of(&self, position: f64) -> f64 {
        self.sign() * (position - self.offset)
    }

    fn step(&mut self, dt: f64) {
        let toward = |raw: f64, target: f64, speed: f64| {
            let max = speed.abs() * dt;
            raw + (target - raw).clamp(-max, max)
        };
        let next = match self.mode {
            Mode::Stopped => return,
            Mode::Regulating => toward(self.raw, self.raw_of(self.sp as f64), self.max_speed),
            Mode::Forever(speed) => {
                self.raw + self.sign() * speed.clamp(-self.max_speed, self.max_speed) * dt
            }
            Mode::Direct(duty) => {
                self.raw + self.sign() * duty.clamp(-100.0, 100.0) / 100.0 * self.max_speed * dt
            }
            Mode::ToAbs { target, speed } => {
                let next = toward(self.raw, self.raw_of(target), speed.min(self.max_speed));
                if (self.reported(next) - target).abs() < 1e-6 {
                    self.mode = Mode::Stopped;
                }
                next
            }
        };

        if self.jammed {
            self.stalled = true;
            return;
        }
        let clamped = match self.limits {
            Some((lo, hi)) => next.clamp(lo, hi),
            None => next,
        };
        self.stalled = clamped != next;
        self.raw = clamped;
        if self.stalled {
            if let Mode::ToAbs { .. } = self.mode {
                self.mode = Mode::Stopped;
            }
        }
    }
}

/// A handle to one simulated motor.
#[derive(Clone, Debug)]
pub struct SimAxis {
    id: AxisId,
    state: Rc<RefCell<AxisState>>,
}

impl SimAxis {
    fn new(id: AxisId, max_speed: f64) -> Self {
        SimAxis {
            id,
            state: Rc::new(RefCell::new(AxisState {
                raw: 0.0,
                offset: 0.0,
                sp: 0,
                mode: Mode::Stopped,
                max_speed,
                limits: None,
                stalled: false,
                jammed: false,
                gains: PidGains::DRIVE,
                stop_action: StopAction::Coast,
                polarity: Polarity::Normal,
                mount: 1.0,
                writes: 0,
            })),
        }
    }

    /// Mechanical end stops, in the motor's raw (uncalibrated) units.
    pub fn with_limits(self, lo: f64, hi: f64) -> Self {
        self.set_limits(Some((lo, hi)));
        self
    }

    pub fn set_limits(&self, limits: Option<(f64, f64)>) {
        self.state.borrow_mut().limits = limits;
    }

    /// Mounts the motor the other way round. It then needs inversed polarity
    /// to move its rope the way the controller expects.
    pub fn mirrored(self) -> Self {
        self.state.borrow_mut().mount = -1.0;
        self
    }

    /// How far the rope has been reeled out since the motor was zeroed, in
    /// angle units. Matches [`MotorAxis::position`] on a correctly
    /// configured motor.
    pub fn rope_position(&self) -> i32 {
        let s = self.state.borrow();
        let zero = s.raw_of(0.0);
        (s.mount * (s.raw - zero)).round() as i32
    }

    /// Moves the motor by hand, as if someone turned it.
    pub fn displace(&self, amount: f64) {
        self.state.borrow_mut().raw += amount;
    }

    /// Stops the motor from moving at all. A jammed motor reports a stall
    /// whenever it's asked to move.
    pub fn jam(&self) {
        self.state.borrow_mut().jammed = true;
    }

    pub fn unjam(&self) {
        self.state.borrow_mut().jammed = false;
    }

    /// How many commands or settings have been sent to the motor.
    pub fn writes(&self) -> usize {
        self.state.borrow().writes
    }

    pub fn gains(&self) -> PidGains {
        self.state.borrow().gains
    }

    pub fn stop_action(&self) -> StopAction {
        self.state.borrow().stop_action
    }

    pub fn polarity(&self) -> Polarity {
        self.state.borrow().polarity
    }

    fn write(&mut self, f: impl FnOnce(&mut AxisState)) {
        let mut state = self.state.borrow_mut();
        state.writes += 1;
        f(&mut state);
    }

    fn step(&self, dt: f64) {
        self.state.borrow_mut().step(dt);
    }
}

impl MotorAxis for SimAxis {
    fn position(&self) -> i32 {
        self.state.borrow().position()
    }

    fn set_position(&mut self, position: i32) {
        self.write(|s| s.offset = position as f64 - s.sign() * s.raw);
    }

    fn position_sp(&self) -> i32 {
        self.state.borrow().sp
    }

    fn set_position_sp(&mut self, sp: i32) {
        self.write(|s| s.sp = sp);
    }

    fn run(&mut self) {
        self.write(|s| s.mode = Mode::Regulating);
    }

    fn run_forever(&mut self, speed: i32) {
        self.write(|s| s.mode = Mode::Forever(speed as f64));
    }

    fn run_direct(&mut self, duty: i32) {
        self.write(|s| s.mode = Mode::Direct(duty as f64));
    }

    fn run_to_abs_pos(&mut self, position: i32, speed: i32) {
        self.write(|s| {
            s.sp = position;
            s.mode = Mode::ToAbs {
                target: position as f64,
                speed: speed as f64,
            };
        });
    }

    fn stop(&mut self) {
        self.write(|s| {
            s.mode = Mode::Stopped;
            s.stalled = false;
        });
    }

    fn set_stop_action(&mut self, action: StopAction) {
        self.write(|s| s.stop_action = action);
    }

    fn target_reached(&self) -> bool {
        let s = self.state.borrow();
        (s.position() - s.sp).abs() <= s.gains.precision
    }

    fn is_running(&self) -> bool {
        self.state.borrow().mode != Mode::Stopped
    }

    fn is_stalled(&self) -> bool {
        self.state.borrow().stalled
    }

    fn set_polarity(&mut self, polarity: Polarity) {
        self.write(|s| s.polarity = polarity);
    }

    fn set_gains(&mut self, gains: PidGains) {
        self.write(|s| s.gains = gains);
    }
}

/// A touch sensor or button.
#[derive(Clone, Debug, Default)]
pub struct SimSwitch {
    pressed: Rc<Cell<bool>>,
    polls: Rc<Cell<usize>>,
    press_at: Rc<Cell<Option<usize>>>,
}

impl SimSwitch {
    fn poll(&self) -> bool {
        let polls = self.polls.get() + 1;
        self.polls.set(polls);
        if self.press_at.get().is_some_and(|at| polls > at) {
            self.press_at.set(None);
            self.pressed.set(true);
        }
        self.pressed.get()
    }

    /// Presses the switch once it has been checked `polls` more times.
    pub fn press_after(&self, polls: usize) {
        self.press_at.set(Some(self.polls.get() + polls));
    }

    pub fn press(&self) {
        self.pressed.set(true);
    }

    pub fn release(&self) {
        self.pressed.set(false);
    }

    pub fn polls(&self) -> usize {
        self.polls.get()
    }
}

impl TouchSensor for SimSwitch {
    fn is_pressed(&self) -> bool {
        self.poll()
    }
}

impl Acknowledge for SimSwitch {
    /// A confirmation is consumed by reading it, like a button release.
    fn is_confirmed(&mut self) -> bool {
        self.poll() && self.pressed.replace(false)
    }
}

#[derive(Clone, Debug)]
pub struct SimBattery {
    volts: Rc<Cell<f64>>,
}

impl SimBattery {
    pub fn set(&self, volts: f64) {
        self.volts.set(volts);
    }
}

impl PowerSupply for SimBattery {
    fn voltage(&self) -> f64 {
        self.volts.get()
    }
}

/// Where the pen touched the canvas, in doorframe coordinates.
#[derive(Clone, Debug, Default)]
pub struct PenTrace {
    pub strokes: Vec<Vec<Point>>,
}

impl PenTrace {
    pub fn points(&self) -> impl Iterator<Item = &Point> {
        self.strokes.iter().flatten()
    }
}

struct Recorder {
    geometry: Config,
    down_below: i32,
    pen_was_down: bool,
    trace: PenTrace,
}

#[derive(Default)]
struct WorldState {
    now: Duration,
    axes: Vec<SimAxis>,
    recorder: Option<Recorder>,
}

/// The virtual time shared by every simulated device.
#[derive(Clone, Default)]
pub struct SimWorld {
    inner: Rc<RefCell<WorldState>>,
}

impl SimWorld {
    pub fn new() -> Self {
        SimWorld::default()
    }

    pub fn axis(&self, id: AxisId, max_speed: f64) -> SimAxis {
        let axis = SimAxis::new(id, max_speed);
        self.inner.borrow_mut().axes.push(axis.clone());
        axis
    }

    pub fn clock(&self) -> SimClock {
        SimClock {
            world: self.clone(),
        }
    }

    pub fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    /// Starts recording the pen's path. The pen counts as touching the canvas
    /// when its position is at or below `down_below`.
    pub fn record(&self, geometry: Config, down_below: i32) {
        self.inner.borrow_mut().recorder = Some(Recorder {
            geometry,
            down_below,
            pen_was_down: false,
            trace: PenTrace::default(),
        });
    }

    pub fn pen_trace(&self) -> PenTrace {
        self.inner
            .borrow()
            .recorder
            .as_ref()
            .map(|r| r.trace.clone())
            .unwrap_or_default()
    }

    pub fn advance(&self, mut duration: Duration) {
        let mut world = self.inner.borrow_mut();
        while !duration.is_zero() {
            let dt = duration.min(MAX_STEP);
            duration -= dt;
            world.now += dt;
            for axis in &world.axes {
                axis.step(dt.as_secs_f64());
            }
            let WorldState { axes, recorder, .. } = &mut *world;
            if let Some(rec) = recorder.as_mut() {
                rec.observe(axes);
            }
        }
    }
}

impl Recorder {
    fn observe(&mut self, axes: &[SimAxis]) {
        let find = |id| axes.iter().find(|a| a.id == id);
        let (Some(left), Some(right), Some(pen)) =
            (find(AxisId::Left), find(AxisId::Right), find(AxisId::Pen))
        else {
            return;
        };

        let down = pen.position() <= self.down_below;
        if down {
            let ropes = MotorAngles::new(left.rope_position(), right.rope_position());
            let p = self.geometry.point_from_motor_positions(&ropes);
            if !self.pen_was_down {
                self.trace.strokes.push(Vec::new());
            }
            if let Some(stroke) = self.trace.strokes.last_mut() {
                if stroke.last() != Some(&p) {
                    stroke.push(p);
                }
            }
        }
        self.pen_was_down = down;
    }
}

pub struct SimClock {
    world: SimWorld,
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        self.world.now()
    }

    fn sleep(&mut self, duration: Duration) {
        self.world.advance(duration);
    }
}

/// Speeds of the simulated motors, in angle units per second.
#[derive(Clone, Copy, Debug)]
pub struct SimSettings {
    pub drive_speed: f64,
    pub pen_speed: f64,
    pub extruder_speed: f64,
    /// Whether to fit a chalk extruder.
    pub chalk: bool,
    /// Raw extruder position at power-on; the end stop is at zero.
    pub extruder_start: f64,
    /// Pen positions at or below this count as drawing.
    pub pen_down_below: i32,
    /// Whether the right motor is mounted mirrored, as on a frame where both
    /// motors face the middle.
    pub mirror_right: bool,
}

impl Default for SimSettings {
    fn default() -> Self {
        SimSettings {
            drive_speed: 1000.0,
            pen_speed: 600.0,
            extruder_speed: 1000.0,
            chalk: false,
            extruder_start: 2000.0,
            pen_down_below: -45,
            mirror_right: false,
        }
    }
}

/// A complete simulated plotter, with handles for inspecting it.
pub struct SimRig {
    pub world: SimWorld,
    pub left: SimAxis,
    pub right: SimAxis,
    pub pen: SimAxis,
    pub extruder: Option<SimAxis>,
    pub chalk_sensor: SimSwitch,
    pub button: SimSwitch,
    pub battery: SimBattery,
}

impl SimRig {
    pub fn new(geometry: Config, settings: SimSettings) -> Self {
        let world = SimWorld::new();
        let left = world.axis(AxisId::Left, settings.drive_speed);
        let mut right = world.axis(AxisId::Right, settings.drive_speed);
        if settings.mirror_right {
            right = right.mirrored();
        }
        let pen = world.axis(AxisId::Pen, settings.pen_speed);
        let extruder = settings.chalk.then(|| {
            let axis = world
                .axis(AxisId::Chalk, settings.extruder_speed)
                .with_limits(0.0, 30000.0);
            axis.state.borrow_mut().raw = settings.extruder_start;
            axis
        });
        world.record(geometry, settings.pen_down_below);

        SimRig {
            world,
            left,
            right,
            pen,
            extruder,
            chalk_sensor: SimSwitch::default(),
            button: SimSwitch::default(),
            battery: SimBattery {
                volts: Rc::new(Cell::new(7.8)),
            },
        }
    }

    /// The hardware bundle to hand to a plotter. Every call returns new
    /// handles to the same devices.
    pub fn rig(&self) -> Rig {
        Rig {
            left: Box::new(self.left.clone()),
            right: Box::new(self.right.clone()),
            pen: Box::new(self.pen.clone()),
            chalk: self.extruder.as_ref().map(|extruder| ChalkHardware {
                extruder: Box::new(extruder.clone()),
                sensor: Box::new(self.chalk_sensor.clone()),
            }),
            button: Box::new(self.button.clone()),
            battery: Some(Box::new(self.battery.clone())),
            clock: Box::new(self.world.clock()),
        }
    }

    pub fn axes(&self) -> impl Iterator<Item = &SimAxis> {
        [&self.left, &self.right, &self.pen]
            .into_iter()
            .chain(self.extruder.as_ref())
    }

    pub fn total_writes(&self) -> usize {
        self.axes().map(SimAxis::writes).sum()
    }

    pub fn any_running(&self) -> bool {
        self.axes().any(|a| a.is_running())
    }

    pub fn drive_positions(&self) -> MotorAngles {
        MotorAngles::new(self.left.position(), self.right.position())
    }
}
