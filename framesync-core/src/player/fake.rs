//! In-memory player for tests

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Player, PlayerError};

/// A call the fake player received
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect,
    Open(PathBuf, bool),
    Play,
    Pause,
    SetPosition(f64),
    StepFaster,
    StepSlower,
    Stop,
}

#[derive(Debug)]
struct State {
    position: f64,
    duration: f64,
    fail_connect: bool,
    fail_open: bool,
    fail_pause: bool,
    calls: Vec<Call>,
}

/// Records every command and reports a fixed position
#[derive(Debug)]
pub struct FakePlayer {
    state: Mutex<State>,
}

impl FakePlayer {
    pub fn new(position: f64, duration: f64) -> Self {
        Self {
            state: Mutex::new(State {
                position,
                duration,
                fail_connect: false,
                fail_open: false,
                fail_pause: false,
                calls: Vec::new(),
            }),
        }
    }

    pub fn failing_connect(self) -> Self {
        self.state.lock().unwrap().fail_connect = true;
        self
    }

    pub fn failing_open(self) -> Self {
        self.state.lock().unwrap().fail_open = true;
        self
    }

    pub fn failing_pause(self) -> Self {
        self.state.lock().unwrap().fail_pause = true;
        self
    }

    /// Commands received so far, excluding position/duration queries
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl Player for FakePlayer {
    async fn connect(&self) -> Result<(), PlayerError> {
        self.record(Call::Connect);
        if self.state.lock().unwrap().fail_connect {
            return Err(PlayerError::NotReachable);
        }
        Ok(())
    }

    async fn open(&self, media: &Path, looping: bool) -> Result<(), PlayerError> {
        self.record(Call::Open(media.to_path_buf(), looping));
        if self.state.lock().unwrap().fail_open {
            return Err(PlayerError::Api("no such media".to_string()));
        }
        Ok(())
    }

    async fn play(&self) -> Result<(), PlayerError> {
        self.record(Call::Play);
        Ok(())
    }

    async fn pause(&self) -> Result<(), PlayerError> {
        self.record(Call::Pause);
        if self.state.lock().unwrap().fail_pause {
            return Err(PlayerError::Api("pause rejected".to_string()));
        }
        Ok(())
    }

    async fn position(&self) -> Result<f64, PlayerError> {
        Ok(self.state.lock().unwrap().position)
    }

    async fn duration(&self) -> Result<f64, PlayerError> {
        Ok(self.state.lock().unwrap().duration)
    }

    async fn set_position(&self, seconds: f64) -> Result<(), PlayerError> {
        self.record(Call::SetPosition(seconds));
        Ok(())
    }

    async fn step_faster(&self) {
        self.record(Call::StepFaster);
    }

    async fn step_slower(&self) {
        self.record(Call::StepSlower);
    }

    async fn stop(&self) -> Result<(), PlayerError> {
        self.record(Call::Stop);
        Ok(())
    }
}
