//! Node event loop

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::actuator::Actuator;
use super::handlers::{self, Effect, NodeState};
use super::{NodeCommand, NodeError, NodeEvent, NodeHandle};
use crate::clock::{LogicalClock, Timestamp};
use crate::config::NodeConfig;
use crate::dispatcher::Dispatcher;
use crate::election::{Action, ElectionConfig, ElectionNode, ElectionTimer, NodeId};
use crate::network::{NetworkError, NetworkHandle};
use crate::player::{Player, PlayerError};
use crate::sync::{Bundle, ElectAnnouncement, Message, Packet, PlaybackSynchronizer, PositionBroadcast, Tolerances};
use crate::timers::{Expired, Timers};

/// Results of work done off the loop
#[derive(Debug)]
pub(crate) enum Input {
    PlayerReady,
    PlayerFailed(PlayerError),
    Sampled {
        time: Timestamp,
        result: Result<(f64, f64), PlayerError>,
    },
    PauseCompleted {
        succeeded: bool,
        lead: f64,
        issued_at: Timestamp,
    },
    BundleDue(Bundle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NodeTimer {
    Election(ElectionTimer),
    /// End of a jump-correction pause
    Resume,
}

/// A playback-sync node, ready to be started
pub struct SyncNode {
    id: NodeId,
    clock: LogicalClock,
    tolerances: Tolerances,
    election: ElectionConfig,
    poll_interval: Duration,
    media: Option<PathBuf>,
    looping: bool,
    player: Arc<dyn Player>,
    network: NetworkHandle,
    inbound: mpsc::UnboundedReceiver<Packet>,
}

impl SyncNode {
    pub fn new(
        config: &NodeConfig,
        player: Arc<dyn Player>,
        network: NetworkHandle,
        inbound: mpsc::UnboundedReceiver<Packet>,
    ) -> Self {
        Self {
            id: NodeId::random(),
            clock: LogicalClock::new(),
            tolerances: config.tolerances(),
            election: config.election.clone(),
            poll_interval: config.poll_interval(),
            media: config.player.media.clone(),
            looping: config.player.looping,
            player,
            network,
            inbound,
        }
    }

    /// Use a clock other than the system clock
    pub fn with_clock(mut self, clock: LogicalClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_node_id(mut self, id: NodeId) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Spawn the event loop. The task ends after shutdown, or with an error
    /// if the player cannot be reached or the network goes away.
    pub fn start(
        self,
    ) -> (
        NodeHandle,
        mpsc::UnboundedReceiver<NodeEvent>,
        JoinHandle<Result<(), NodeError>>,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (timers, expired_rx) = Timers::new();

        info!("Starting node {}", self.id);

        let mut dispatcher = Dispatcher::new();
        handlers::register(&mut dispatcher);

        let state = NodeState::new(
            self.clock,
            ElectionNode::new(self.id, self.election),
            PlaybackSynchronizer::new(self.tolerances),
        );

        let runtime = Runtime {
            state,
            dispatcher,
            timers,
            actuator: Actuator::spawn(self.player.clone(), input_tx.clone()),
            player: self.player,
            network: self.network,
            events: event_tx,
            inputs: input_tx,
            poll_interval: self.poll_interval,
            media: self.media,
            looping: self.looping,
            ready: false,
            poll_in_flight: false,
        };

        let task = tokio::spawn(runtime.run(self.inbound, input_rx, expired_rx, command_rx));
        (NodeHandle { command_tx }, event_rx, task)
    }
}

struct Runtime {
    state: NodeState,
    dispatcher: Dispatcher<NodeState>,
    timers: Timers<NodeTimer>,
    actuator: Actuator,
    player: Arc<dyn Player>,
    network: NetworkHandle,
    events: mpsc::UnboundedSender<NodeEvent>,
    inputs: mpsc::UnboundedSender<Input>,
    poll_interval: Duration,
    media: Option<PathBuf>,
    looping: bool,
    ready: bool,
    poll_in_flight: bool,
}

impl Runtime {
    async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<Packet>,
        mut input_rx: mpsc::UnboundedReceiver<Input>,
        mut expired_rx: mpsc::UnboundedReceiver<Expired<NodeTimer>>,
        mut command_rx: mpsc::UnboundedReceiver<NodeCommand>,
    ) -> Result<(), NodeError> {
        let actions = self.state.election.heartbeat();
        self.state.election_actions(actions);
        self.apply_effects()?;
        self.spawn_bootstrap();

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                packet = inbound.recv() => {
                    let packet = packet.ok_or(NetworkError::Closed)?;
                    self.dispatch(packet);
                }
                Some(input) = input_rx.recv() => {
                    self.handle_input(input)?;
                }
                Some(expired) = expired_rx.recv() => {
                    self.handle_timer(expired);
                }
                _ = poll.tick(), if self.ready && !self.poll_in_flight => {
                    self.spawn_poll();
                }
                Some(cmd) = command_rx.recv() => {
                    match cmd {
                        NodeCommand::Shutdown => {
                            info!("Node shutting down");
                            break;
                        }
                    }
                }
            }
            self.apply_effects()?;
        }

        if let Err(e) = self.player.stop().await {
            warn!("Failed to stop player: {}", e);
        }
        self.network.shutdown();
        let _ = self.events.send(NodeEvent::Stopped);
        Ok(())
    }

    fn dispatch(&mut self, packet: Packet) {
        let now = self.state.clock.now();
        for deferred in self.dispatcher.dispatch(&mut self.state, packet, now) {
            let inputs = self.inputs.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deferred.delay).await;
                let _ = inputs.send(Input::BundleDue(deferred.bundle));
            });
        }
    }

    fn handle_input(&mut self, input: Input) -> Result<(), NodeError> {
        match input {
            Input::PlayerReady => {
                info!("Player ready, polling every {:?}", self.poll_interval);
                self.ready = true;
                let _ = self.events.send(NodeEvent::Ready);
            }
            Input::PlayerFailed(e) => {
                warn!("Giving up on player: {}", e);
                return Err(NodeError::Player(e));
            }
            Input::Sampled { time, result } => {
                self.poll_in_flight = false;
                self.handle_sample(time, result)?;
            }
            Input::PauseCompleted {
                succeeded,
                lead,
                issued_at,
            } => {
                let now = self.state.clock.now();
                if let Some(wait) = self
                    .state
                    .synchronizer
                    .pause_completed(succeeded, lead, issued_at, now)
                {
                    debug!("Resuming in {:?}", wait);
                    self.state.schedule_resume(wait);
                }
            }
            Input::BundleDue(bundle) => self.dispatch(Packet::Bundle(bundle)),
        }
        Ok(())
    }

    fn handle_sample(
        &mut self,
        time: Timestamp,
        result: Result<(f64, f64), PlayerError>,
    ) -> Result<(), NodeError> {
        let (seconds, duration) = match result {
            Ok(reading) => reading,
            Err(e) => {
                debug!("Position poll failed: {}", e);
                return Ok(());
            }
        };

        match self.state.synchronizer.record_sample(seconds, duration, time) {
            Ok(sample) => {
                if self.state.election.is_master() {
                    let broadcast = PositionBroadcast {
                        seconds: sample.seconds,
                        time: sample.sample_time,
                    };
                    self.network.broadcast(Message::from(broadcast))?;
                }
            }
            Err(rejected) => debug!("Discarding position read: {:?}", rejected),
        }
        Ok(())
    }

    fn handle_timer(&mut self, expired: Expired<NodeTimer>) {
        if !self.timers.accept(&expired) {
            debug!("Dropping stale {:?} expiry", expired.key);
            return;
        }

        match expired.key {
            NodeTimer::Election(timer) => {
                let actions = self.state.election.on_timer(timer);
                self.state.election_actions(actions);
            }
            NodeTimer::Resume => {
                let commands = self.state.synchronizer.resume();
                self.state.player_commands(commands);
            }
        }
    }

    fn apply_effects(&mut self) -> Result<(), NodeError> {
        for effect in self.state.take_effects() {
            match effect {
                Effect::Election(Action::Announce(id)) => {
                    debug!("Sending elect {}", id);
                    self.network.broadcast(Message::from(ElectAnnouncement { id }))?;
                }
                Effect::Election(Action::Arm(timer, after)) => {
                    self.timers.arm(NodeTimer::Election(timer), after)
                }
                Effect::Election(Action::Cancel(timer)) => {
                    self.timers.cancel(NodeTimer::Election(timer))
                }
                Effect::Election(Action::RoleChanged(role)) => {
                    let _ = self.events.send(NodeEvent::RoleChanged(role));
                }
                Effect::Player(command) => self.actuator.send(command),
                Effect::Corrected(correction) => {
                    let _ = self.events.send(NodeEvent::Corrected {
                        tier: correction.tier,
                        delta: correction.delta,
                    });
                }
                Effect::ScheduleResume(after) => self.timers.arm(NodeTimer::Resume, after),
            }
        }
        Ok(())
    }

    /// Connect to the player, then open the configured media
    fn spawn_bootstrap(&self) {
        let player = self.player.clone();
        let inputs = self.inputs.clone();
        let media = self.media.clone();
        let looping = self.looping;
        tokio::spawn(async move {
            let result = async {
                player.connect().await?;
                if let Some(media) = &media {
                    player.open(media, looping).await?;
                }
                Ok::<_, PlayerError>(())
            }
            .await;
            let input = match result {
                Ok(()) => Input::PlayerReady,
                Err(e) => Input::PlayerFailed(e),
            };
            let _ = inputs.send(input);
        });
    }

    fn spawn_poll(&mut self) {
        self.poll_in_flight = true;
        let time = self.state.clock.now();
        let player = self.player.clone();
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            let result = async {
                let position = player.position().await?;
                let duration = player.duration().await?;
                Ok::<_, PlayerError>((position, duration))
            }
            .await;
            let _ = inputs.send(Input::Sampled { time, result });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TimeSource;
    use crate::election::Role;
    use crate::network::NetworkCommand;
    use crate::player::fake::{Call, FakePlayer};
    use crate::sync::Tier;

    /// Wall time that follows tokio's (possibly paused) clock
    struct TokioTimeSource {
        origin: tokio::time::Instant,
        base: Timestamp,
    }

    impl TimeSource for TokioTimeSource {
        fn now(&self) -> Timestamp {
            self.base + self.origin.elapsed()
        }
    }

    fn tokio_clock() -> LogicalClock {
        LogicalClock::with_source(TokioTimeSource {
            origin: tokio::time::Instant::now(),
            base: Timestamp::from_millis(1_700_000_000_000),
        })
    }

    /// In-process broadcast bus: every packet reaches every node, sender
    /// included
    fn bus(nodes: usize) -> Vec<(NetworkHandle, mpsc::UnboundedReceiver<Packet>)> {
        let (fanout_tx, mut fanout_rx) = mpsc::unbounded_channel::<Packet>();
        let mut endpoints = Vec::new();
        let mut inbound_txs = Vec::new();

        for _ in 0..nodes {
            let (handle, mut command_rx) = NetworkHandle::channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            inbound_txs.push(inbound_tx);
            endpoints.push((handle, inbound_rx));

            let fanout_tx = fanout_tx.clone();
            tokio::spawn(async move {
                while let Some(NetworkCommand::Broadcast(packet)) = command_rx.recv().await {
                    let _ = fanout_tx.send(packet);
                }
            });
        }

        tokio::spawn(async move {
            while let Some(packet) = fanout_rx.recv().await {
                for tx in &inbound_txs {
                    let _ = tx.send(packet.clone());
                }
            }
        });

        endpoints
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<NodeEvent>) -> Vec<NodeEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_nodes_elect_highest_id() {
        let config = NodeConfig::default();
        let mut endpoints = bus(2).into_iter();
        let players = [
            Arc::new(FakePlayer::new(10.0, 100.0)),
            Arc::new(FakePlayer::new(10.0, 100.0)),
        ];

        let mut nodes = Vec::new();
        for (id, player) in [(0xbbu128, &players[0]), (0xaau128, &players[1])] {
            let (handle, inbound) = endpoints.next().unwrap();
            let node = SyncNode::new(&config, player.clone(), handle, inbound)
                .with_clock(tokio_clock())
                .with_node_id(NodeId::from_u128(id));
            nodes.push(node.start());
        }

        tokio::time::sleep(Duration::from_secs(3)).await;

        let mut events = Vec::new();
        for (handle, mut event_rx, task) in nodes {
            handle.shutdown();
            task.await.unwrap().unwrap();
            events.push(drain(&mut event_rx));
        }

        let (high, low) = (&events[0], &events[1]);
        assert_eq!(high[0], NodeEvent::Ready);
        assert!(high.contains(&NodeEvent::RoleChanged(Role::Master)));
        assert!(!high.iter().any(|e| matches!(e, NodeEvent::Corrected { .. })));

        let low_roles: Vec<_> = low
            .iter()
            .filter_map(|e| match e {
                NodeEvent::RoleChanged(role) => Some(*role),
                _ => None,
            })
            .collect();
        assert_eq!(low_roles, vec![Role::Slave]);
        assert!(low.iter().any(|e| matches!(e, NodeEvent::Corrected { .. })));

        for node_events in &events {
            assert_eq!(node_events.last(), Some(&NodeEvent::Stopped));
        }
        // The master's player was reset to normal playback on election
        assert!(players[0].calls().contains(&Call::Play));
        assert_eq!(players[0].calls().last(), Some(&Call::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_failure_ends_node() {
        let (handle, _commands) = NetworkHandle::channel();
        let (_inbound_tx, inbound) = mpsc::unbounded_channel();
        let player = Arc::new(FakePlayer::new(0.0, 10.0).failing_connect());

        let (_node, mut events, task) =
            SyncNode::new(&NodeConfig::default(), player, handle, inbound).start();

        assert!(matches!(task.await.unwrap(), Err(NodeError::Player(_))));
        assert!(!drain(&mut events).contains(&NodeEvent::Ready));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jump_ahead_pauses_then_plays() {
        let (handle, _commands) = NetworkHandle::channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let player = Arc::new(FakePlayer::new(12.0, 100.0));
        let clock_source = TokioTimeSource {
            origin: tokio::time::Instant::now(),
            base: Timestamp::from_millis(1_700_000_000_000),
        };
        let master_time = clock_source.now();

        // Keep the election out of the way
        let mut config = NodeConfig::default();
        config.election.heartbeat_timeout_ms = 60_000;

        let (node, mut events, task) =
            SyncNode::new(&config, player.clone(), handle, inbound)
                .with_clock(LogicalClock::with_source(clock_source))
                .with_node_id(NodeId::from_u128(1))
                .start();

        // Let the node connect and take its first sample at t=0
        tokio::time::sleep(Duration::from_millis(1)).await;
        let broadcast = PositionBroadcast {
            seconds: 10.0,
            time: master_time,
        };
        inbound_tx.send(Message::from(broadcast).into()).unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(player.calls().contains(&Call::Pause));
        assert!(!player.calls().contains(&Call::Play));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let calls = player.calls();
        let pause = calls.iter().position(|c| *c == Call::Pause).unwrap();
        assert_eq!(calls[pause + 1], Call::Play);

        node.shutdown();
        task.await.unwrap().unwrap();
        assert!(drain(&mut events).iter().any(|e| matches!(
            e,
            NodeEvent::Corrected {
                tier: Tier::Jump,
                ..
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_media_opens_before_ready() {
        let (handle, _commands) = NetworkHandle::channel();
        let (_inbound_tx, inbound) = mpsc::unbounded_channel();
        let player = Arc::new(FakePlayer::new(0.0, 10.0));
        let mut config = NodeConfig::default();
        config.player.media = Some(PathBuf::from("/media/loop.mp4"));

        let (node, mut events, task) =
            SyncNode::new(&config, player.clone(), handle, inbound).start();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            player.calls()[..2],
            [Call::Connect, Call::Open(PathBuf::from("/media/loop.mp4"), true)]
        );
        assert_eq!(drain(&mut events).first(), Some(&NodeEvent::Ready));

        node.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_open_failure_ends_node() {
        let (handle, _commands) = NetworkHandle::channel();
        let (_inbound_tx, inbound) = mpsc::unbounded_channel();
        let player = Arc::new(FakePlayer::new(0.0, 10.0).failing_open());
        let mut config = NodeConfig::default();
        config.player.media = Some(PathBuf::from("/media/missing.mp4"));

        let (_node, mut events, task) = SyncNode::new(&config, player, handle, inbound).start();

        assert!(matches!(task.await.unwrap(), Err(NodeError::Player(_))));
        assert!(!drain(&mut events).contains(&NodeEvent::Ready));
    }

    #[tokio::test(start_paused = true)]
    async fn test_future_bundle_is_delivered_at_its_time() {
        let (handle, _commands) = NetworkHandle::channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let player = Arc::new(FakePlayer::new(12.0, 100.0));
        let clock_source = TokioTimeSource {
            origin: tokio::time::Instant::now(),
            base: Timestamp::from_millis(1_700_000_000_000),
        };
        let due = clock_source.now() + Duration::from_millis(500);

        let mut config = NodeConfig::default();
        config.election.heartbeat_timeout_ms = 60_000;

        let (node, _events, task) = SyncNode::new(&config, player.clone(), handle, inbound)
            .with_clock(LogicalClock::with_source(clock_source))
            .with_node_id(NodeId::from_u128(1))
            .start();

        tokio::time::sleep(Duration::from_millis(1)).await;
        let broadcast = PositionBroadcast {
            seconds: 10.0,
            time: due,
        };
        let bundle = Bundle {
            time: due,
            packets: vec![Message::from(broadcast).into()],
        };
        inbound_tx.send(bundle.into()).unwrap();

        // Held back until the bundle's time tag
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!player.calls().contains(&Call::Pause));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(player.calls().contains(&Call::Pause));

        node.shutdown();
        task.await.unwrap().unwrap();
    }
}
