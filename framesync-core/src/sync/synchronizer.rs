//! Drift correction
//!
//! Reconciles the local playback position with the master's broadcasts in
//! three tiers. Drift within one frame is left alone. Moderate drift gets
//! a one-step speed bias. Large drift gets a discontinuous fix: pause to
//! lose time or seek to gain it.
//!
//! The synchronizer decides, the node runtime acts: every decision comes
//! back as a list of [`PlayerCommand`]s to hand to the player.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::{LogicalClock, Timestamp};

/// Fine-tune threshold in frame intervals
const FINE_TUNE_FRAMES: f64 = 10.0;

/// Drift thresholds derived from the target frame rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    /// Drift at or below this is in sync (one frame interval), seconds
    pub frame: f64,
    /// Drift below this is corrected by speed bias, seconds
    pub fine_tune: f64,
}

impl Tolerances {
    pub fn from_fps(fps: f64) -> Self {
        let frame = 1.0 / fps;
        Self {
            frame,
            fine_tune: FINE_TUNE_FRAMES * frame,
        }
    }
}

/// Last good reading of the local player
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    /// Playback position in seconds
    pub seconds: f64,
    /// Logical-clock time the position was read at
    pub sample_time: Timestamp,
    pub valid: bool,
}

impl Default for PositionSample {
    fn default() -> Self {
        Self {
            seconds: -1.0,
            sample_time: Timestamp::UNIX_EPOCH,
            valid: false,
        }
    }
}

/// Why a position reading was thrown away
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleRejected {
    /// Position beyond the reported duration, a known spurious read
    PastDuration { seconds: f64, duration: f64 },
    Negative { seconds: f64 },
}

/// Commands for the player actuator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerCommand {
    Play,
    /// Pause to let the master catch up `lead` seconds. The outcome must be
    /// reported back through [`PlaybackSynchronizer::pause_completed`].
    Pause { lead: f64, issued_at: Timestamp },
    Seek(f64),
    StepFaster,
    StepSlower,
}

/// Correction tier chosen for one master broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    InSync,
    FineTune,
    Jump,
}

/// What `synchronize` decided
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub tier: Tier,
    /// Local minus master position in seconds, positive when ahead
    pub delta: f64,
    /// Master position projected to the decision instant
    pub master_position: f64,
    pub commands: Vec<PlayerCommand>,
}

/// Drift-correction controller for the local player
#[derive(Debug)]
pub struct PlaybackSynchronizer {
    tolerances: Tolerances,
    sample: PositionSample,
    /// Speed steps relative to normal speed
    speed: i32,
    /// Set while a pause-then-resume correction is running
    correction_in_flight: bool,
}

impl PlaybackSynchronizer {
    pub fn new(tolerances: Tolerances) -> Self {
        Self {
            tolerances,
            sample: PositionSample::default(),
            speed: 0,
            correction_in_flight: false,
        }
    }

    pub fn sample(&self) -> PositionSample {
        self.sample
    }

    pub fn speed(&self) -> i32 {
        self.speed
    }

    pub fn is_correction_in_flight(&self) -> bool {
        self.correction_in_flight
    }

    pub fn is_ready_for_sync(&self) -> bool {
        self.sample.valid && self.sample.seconds >= 0.0
    }

    /// Store a fresh poll result taken at `sample_time`
    pub fn record_sample(
        &mut self,
        seconds: f64,
        duration: f64,
        sample_time: Timestamp,
    ) -> Result<PositionSample, SampleRejected> {
        if seconds > duration {
            return Err(SampleRejected::PastDuration { seconds, duration });
        }
        if seconds < 0.0 {
            return Err(SampleRejected::Negative { seconds });
        }

        self.sample = PositionSample {
            seconds,
            sample_time,
            valid: true,
        };
        Ok(self.sample)
    }

    /// Compare the local sample with a master broadcast and decide on a
    /// correction. Returns `None` when no decision can be made yet.
    pub fn synchronize(
        &mut self,
        clock: &mut LogicalClock,
        master_seconds: f64,
        master_time: Timestamp,
    ) -> Option<Correction> {
        if self.correction_in_flight || !self.is_ready_for_sync() || master_seconds < 0.0 {
            return None;
        }

        if !clock.is_synchronized() {
            info!("Synchronizing clock to master time");
        }
        clock.sync(master_time);

        let now = clock.now();
        let master_position = master_seconds + now.seconds_since(master_time);
        let local_position = self.sample.seconds + now.seconds_since(self.sample.sample_time);
        let delta = local_position - master_position;
        let abs_delta = delta.abs();

        if abs_delta <= self.tolerances.frame {
            return Some(Correction {
                tier: Tier::InSync,
                delta,
                master_position,
                commands: self.reset(),
            });
        }

        // Force a fresh poll before the next decision
        self.sample.valid = false;

        if abs_delta < self.tolerances.fine_tune {
            debug!("Sync fine-tune {:+.3}s (speed {})", delta, self.speed);
            let mut commands = Vec::new();
            // Known gap: behind while already sped up (delta < 0, speed > 0)
            // falls through both branches and issues nothing.
            if delta > 0.0 && self.speed >= 0 {
                self.step_slower(&mut commands);
            } else if self.speed <= 0 {
                self.step_faster(&mut commands);
            }
            return Some(Correction {
                tier: Tier::FineTune,
                delta,
                master_position,
                commands,
            });
        }

        info!("Sync jump {:+.3}s", delta);
        let command = if delta > 0.0 {
            self.correction_in_flight = true;
            PlayerCommand::Pause {
                lead: delta,
                issued_at: now,
            }
        } else {
            PlayerCommand::Seek(master_position)
        };

        Some(Correction {
            tier: Tier::Jump,
            delta,
            master_position,
            commands: vec![command],
        })
    }

    /// Outcome of a `Pause` issued by a jump correction. On success returns
    /// how long to stay paused, given the time the pause call itself took.
    ///
    /// A failed pause leaves the correction latch set, which blocks further
    /// jump corrections; nothing clears it short of a successful resume.
    pub fn pause_completed(
        &mut self,
        succeeded: bool,
        lead: f64,
        issued_at: Timestamp,
        now: Timestamp,
    ) -> Option<Duration> {
        if !succeeded {
            warn!("Pause for jump correction failed, corrections stay blocked");
            self.correction_in_flight = true;
            return None;
        }

        let remaining = lead - now.seconds_since(issued_at);
        Some(Duration::from_secs_f64(remaining.max(0.0)))
    }

    /// The pause of a jump correction is over: resume and unlatch
    pub fn resume(&mut self) -> Vec<PlayerCommand> {
        self.correction_in_flight = false;
        vec![PlayerCommand::Play]
    }

    /// Make sure the player runs at normal speed, undoing accumulated
    /// speed steps one at a time
    pub fn reset(&mut self) -> Vec<PlayerCommand> {
        let mut commands = vec![PlayerCommand::Play];
        while self.speed < 0 {
            self.step_faster(&mut commands);
        }
        while self.speed > 0 {
            self.step_slower(&mut commands);
        }
        commands
    }

    fn step_faster(&mut self, commands: &mut Vec<PlayerCommand>) {
        self.speed += 1;
        commands.push(PlayerCommand::StepFaster);
    }

    fn step_slower(&mut self, commands: &mut Vec<PlayerCommand>) {
        self.speed -= 1;
        commands.push(PlayerCommand::StepSlower);
    }
}
