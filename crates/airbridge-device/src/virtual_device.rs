//! The virtual device: one command task running the transport state
//! machine.
//!
//! The device is the only executor of commands and the only publisher of
//! state events. Commands for its device id arrive through a bus
//! subscription and are processed strictly in publish order; pipeline
//! progress arrives on a side channel tagged with the session id, so
//! reports from superseded sessions are ignored.

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use airbridge_core::bus::EventBus;
use airbridge_core::device::{
    DeviceId, DeviceKind, DeviceSnapshot, PcmFormat, TrackMetadata, TransportState,
};
use airbridge_core::dsp::DspConfig;
use airbridge_core::events::{Event, EventPayload, EventType, StateError};
use airbridge_dsp::DspChain;
use airbridge_sink::Sink;

use crate::pipeline::{
    PipelineEvent, PipelineEventKind, PipelineSettings, SessionPipeline, SharedDsp, SharedSink,
};
use crate::registry::SharedSnapshot;

/// Everything needed to bring a device up.
pub struct DeviceSpec {
    pub id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
    pub sample_rate: u32,
    pub channels: u16,
    pub pipeline: PipelineSettings,
}

/// Handle held by the device manager.
pub struct DeviceHandle {
    pub id: DeviceId,
    pub snapshot: SharedSnapshot,
    shutdown: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl DeviceHandle {
    /// Stop the device: tear down any running session, close the sink,
    /// and end the command task.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.task.await;
    }
}

/// The command task state.
pub struct VirtualDevice {
    spec: DeviceSpec,
    bus: Arc<EventBus>,
    snapshot: SharedSnapshot,
    sink: SharedSink,
    dsp: SharedDsp,

    pipeline: Option<SessionPipeline>,
    session_id: u64,
    /// Elapsed seconds at the last play/seek/pause boundary.
    elapsed_base: f64,
    playing_since: Option<Instant>,

    pipeline_tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl VirtualDevice {
    /// Spawn the device task. The returned handle owns it.
    pub fn spawn(spec: DeviceSpec, bus: Arc<EventBus>, sink: Box<dyn Sink>) -> DeviceHandle {
        let snapshot: SharedSnapshot = Arc::new(RwLock::new(DeviceSnapshot::new(
            spec.id.clone(),
            spec.name.clone(),
            spec.kind,
        )));
        {
            let mut snap = snapshot.write().unwrap();
            snap.pcm = PcmFormat::new(spec.sample_rate, spec.channels, sink.preferred_format());
            snap.connected = true;
        }

        let dsp: SharedDsp = Arc::new(Mutex::new(DspChain::new(spec.sample_rate, spec.channels)));
        let sink: SharedSink = Arc::new(Mutex::new(sink));
        let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let id = spec.id.clone();
        // Subscribe before the task starts so commands published right
        // after creation (persisted-settings replay) are never missed.
        let commands = bus.subscribe(EventType::COMMANDS, Some(id.clone()));
        let device = VirtualDevice {
            spec,
            bus: Arc::clone(&bus),
            snapshot: Arc::clone(&snapshot),
            sink,
            dsp,
            pipeline: None,
            session_id: 0,
            elapsed_base: 0.0,
            playing_since: None,
            pipeline_tx,
        };

        let task = tokio::spawn(device.run(commands, pipeline_rx, shutdown_rx));
        DeviceHandle {
            id,
            snapshot,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(
        mut self,
        mut commands: airbridge_core::bus::Subscription,
        mut pipeline_rx: mpsc::UnboundedReceiver<PipelineEvent>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(device = %self.spec.id, name = %self.spec.name, "device task started");
        loop {
            tokio::select! {
                // Commands outrank pipeline progress so a superseding
                // Play is handled before a stale session's report.
                biased;
                _ = shutdown_rx.recv() => break,
                command = commands.recv() => match command {
                    Some(event) => self.handle_command(event.payload).await,
                    None => break,
                },
                Some(event) = pipeline_rx.recv() => self.handle_pipeline_event(event),
                _ = ticker.tick() => self.tick(),
            }
        }

        self.teardown_session().await;
        info!(device = %self.spec.id, "device task stopped");
    }

    // ===== snapshot and event helpers =====

    fn state(&self) -> TransportState {
        self.snapshot.read().unwrap().transport_state
    }

    fn elapsed(&self) -> f64 {
        match self.playing_since {
            Some(since) => self.elapsed_base + since.elapsed().as_secs_f64(),
            None => self.elapsed_base,
        }
    }

    fn update_snapshot(&self, update: impl FnOnce(&mut DeviceSnapshot)) {
        let mut snap = self.snapshot.write().unwrap();
        update(&mut snap);
    }

    fn publish(&self, payload: EventPayload) {
        self.bus.publish(Event::new(self.spec.id.clone(), payload));
    }

    fn enter_state(&mut self, state: TransportState, error: Option<StateError>) {
        let elapsed = self.elapsed();
        let uri;
        {
            let mut snap = self.snapshot.write().unwrap();
            snap.transport_state = state;
            snap.elapsed_s = elapsed;
            snap.session_id = self.session_id;
            uri = snap.uri.clone();
        }
        self.publish(EventPayload::StateChanged {
            state,
            uri,
            session_id: self.session_id,
            elapsed_s: elapsed,
            error,
        });
    }

    // ===== command handling =====

    async fn handle_command(&mut self, payload: EventPayload) {
        match payload {
            EventPayload::SetUri { uri, metadata } => self.cmd_set_uri(uri, metadata),
            EventPayload::Play {
                uri,
                position_s,
                metadata,
            } => self.cmd_play(uri, position_s, metadata).await,
            EventPayload::Stop => self.cmd_stop().await,
            EventPayload::Pause => self.cmd_pause(),
            EventPayload::Seek { position_s } => self.cmd_seek(position_s).await,
            EventPayload::SetVolume { volume } => self.cmd_set_volume(volume),
            EventPayload::SetMute { muted } => self.cmd_set_mute(muted),
            EventPayload::SetDsp { enabled, config } => self.cmd_set_dsp(enabled, config),
            EventPayload::ResetDsp => self.cmd_reset_dsp(),
            other => debug!(device = %self.spec.id, ?other, "ignoring non-command payload"),
        }
    }

    fn cmd_set_uri(&mut self, uri: String, metadata: Option<TrackMetadata>) {
        info!(device = %self.spec.id, %uri, "set uri");
        let metadata = metadata.unwrap_or_default();
        let idle = matches!(
            self.state(),
            TransportState::NoMediaPresent | TransportState::Stopped
        );
        if idle {
            self.elapsed_base = 0.0;
            self.playing_since = None;
        }
        self.update_snapshot(|snap| {
            snap.uri = uri;
            if metadata.duration_s > 0.0 || idle {
                snap.duration_s = metadata.duration_s;
            }
            snap.metadata = metadata.clone();
            if idle {
                snap.elapsed_s = 0.0;
            }
        });
        if !metadata.is_empty() {
            self.publish(EventPayload::MetadataUpdated { metadata });
        }
        // URI replaced mid-track transitions on the Play that follows.
        if idle {
            self.enter_state(TransportState::Stopped, None);
        }
    }

    async fn cmd_play(
        &mut self,
        uri: Option<String>,
        position_s: f64,
        metadata: Option<TrackMetadata>,
    ) {
        let current_uri = self.snapshot.read().unwrap().uri.clone();
        let target_uri = match uri.clone().filter(|u| !u.is_empty()) {
            Some(uri) => uri,
            None if !current_uri.is_empty() => current_uri.clone(),
            None => {
                warn!(device = %self.spec.id, "play without a uri");
                return;
            }
        };

        if let Some(metadata) = metadata {
            self.update_snapshot(|snap| {
                if metadata.duration_s > 0.0 {
                    snap.duration_s = metadata.duration_s;
                }
                snap.metadata = metadata.clone();
            });
            self.publish(EventPayload::MetadataUpdated { metadata });
        }

        // Resume from pause: same track, pipeline still alive.
        if self.state() == TransportState::PausedPlayback
            && target_uri == current_uri
            && self.pipeline.is_some()
        {
            info!(device = %self.spec.id, "resume");
            if let Some(pipeline) = &self.pipeline {
                pipeline.set_paused(false);
            }
            self.playing_since = Some(Instant::now());
            self.enter_state(TransportState::Playing, None);
            return;
        }

        // New session: supersede whatever is running (including a prior
        // Play still in TRANSITIONING).
        self.start_session(target_uri, position_s).await;
    }

    async fn start_session(&mut self, uri: String, position_s: f64) {
        self.teardown_session().await;
        self.session_id += 1;
        info!(device = %self.spec.id, session = self.session_id, %uri, pos = position_s, "play");

        self.elapsed_base = position_s;
        self.playing_since = None;
        self.update_snapshot(|snap| {
            snap.uri = uri.clone();
            snap.elapsed_s = position_s;
        });
        self.enter_state(TransportState::Transitioning, None);

        {
            let mut dsp = self.dsp.lock().unwrap();
            dsp.reset_state();
        }

        let format = self.snapshot.read().unwrap().pcm;
        self.pipeline = Some(SessionPipeline::spawn(
            self.session_id,
            self.spec.id.as_str(),
            uri,
            position_s,
            format,
            self.spec.pipeline.clone(),
            Arc::clone(&self.sink),
            Arc::clone(&self.dsp),
            self.pipeline_tx.clone(),
        ));
    }

    async fn cmd_stop(&mut self) {
        info!(device = %self.spec.id, "stop");
        self.teardown_session().await;
        self.session_id += 1;
        self.elapsed_base = 0.0;
        self.playing_since = None;
        self.update_snapshot(|snap| {
            snap.uri.clear();
            snap.metadata = TrackMetadata::default();
            snap.duration_s = 0.0;
            snap.elapsed_s = 0.0;
        });
        self.enter_state(TransportState::Stopped, None);
    }

    fn cmd_pause(&mut self) {
        if self.state() != TransportState::Playing {
            debug!(device = %self.spec.id, "pause ignored outside PLAYING");
            return;
        }
        info!(device = %self.spec.id, "pause");
        self.elapsed_base = self.elapsed();
        self.playing_since = None;
        if let Some(pipeline) = &self.pipeline {
            pipeline.set_paused(true);
        }
        self.enter_state(TransportState::PausedPlayback, None);
    }

    async fn cmd_seek(&mut self, position_s: f64) {
        match self.state() {
            TransportState::Playing | TransportState::PausedPlayback => {}
            state => {
                debug!(device = %self.spec.id, ?state, "seek ignored in this state");
                return;
            }
        }
        let uri = self.snapshot.read().unwrap().uri.clone();
        if uri.is_empty() {
            return;
        }
        info!(device = %self.spec.id, position_s, "seek");
        self.start_session(uri, position_s.max(0.0)).await;
    }

    fn cmd_set_volume(&mut self, volume: u8) {
        let volume = volume.min(100);
        let muted = self.snapshot.read().unwrap().muted;
        {
            let mut sink = self.sink.lock().unwrap();
            if let Err(err) = sink.set_volume(volume) {
                warn!(device = %self.spec.id, %err, "sink set_volume failed");
            }
        }
        self.update_snapshot(|snap| snap.volume = volume);
        debug!(device = %self.spec.id, volume, "volume");
        self.publish(EventPayload::VolumeChanged { volume, muted });
    }

    fn cmd_set_mute(&mut self, muted: bool) {
        let volume = self.snapshot.read().unwrap().volume;
        {
            let mut sink = self.sink.lock().unwrap();
            if let Err(err) = sink.set_mute(muted) {
                warn!(device = %self.spec.id, %err, "sink set_mute failed");
            }
        }
        self.update_snapshot(|snap| snap.muted = muted);
        debug!(device = %self.spec.id, muted, "mute");
        self.publish(EventPayload::VolumeChanged { volume, muted });
    }

    fn cmd_set_dsp(&mut self, enabled: bool, config: Option<DspConfig>) {
        let mut dsp = self.dsp.lock().unwrap();
        if let Some(config) = &config {
            if let Err(err) = dsp.apply_config(config) {
                warn!(device = %self.spec.id, %err, "rejected dsp config");
                return;
            }
        }
        dsp.set_enabled(enabled);
        let applied = dsp.config().clone();
        drop(dsp);

        info!(device = %self.spec.id, enabled, "dsp configured");
        self.update_snapshot(|snap| {
            snap.dsp_enabled = enabled;
            snap.dsp_config = applied.clone();
        });
        self.publish(EventPayload::DspChanged {
            enabled,
            config: applied,
        });
    }

    fn cmd_reset_dsp(&mut self) {
        let mut dsp = self.dsp.lock().unwrap();
        dsp.reset_to_defaults();
        let config = dsp.config().clone();
        drop(dsp);

        info!(device = %self.spec.id, "dsp reset");
        self.update_snapshot(|snap| {
            snap.dsp_enabled = false;
            snap.dsp_config = config.clone();
        });
        self.publish(EventPayload::DspChanged {
            enabled: false,
            config,
        });
    }

    // ===== pipeline events =====

    fn handle_pipeline_event(&mut self, event: PipelineEvent) {
        if event.session_id != self.session_id {
            debug!(
                device = %self.spec.id,
                stale = event.session_id,
                current = self.session_id,
                "ignoring event from superseded session"
            );
            return;
        }
        match event.kind {
            PipelineEventKind::Started => {
                if self.state() == TransportState::Transitioning {
                    self.playing_since = Some(Instant::now());
                    self.enter_state(TransportState::Playing, None);
                }
            }
            PipelineEventKind::Finished => {
                info!(device = %self.spec.id, session = self.session_id, "end of track");
                self.pipeline = None;
                self.elapsed_base = 0.0;
                self.playing_since = None;
                self.update_snapshot(|snap| snap.elapsed_s = 0.0);
                self.enter_state(TransportState::Stopped, None);
            }
            PipelineEventKind::Failed(error) => {
                warn!(device = %self.spec.id, session = self.session_id, code = error.as_str(), "session failed");
                self.pipeline = None;
                self.elapsed_base = 0.0;
                self.playing_since = None;
                self.update_snapshot(|snap| snap.elapsed_s = 0.0);
                self.enter_state(TransportState::Stopped, Some(error));
            }
        }
    }

    fn tick(&mut self) {
        if self.state() != TransportState::Playing {
            return;
        }
        let elapsed = self.elapsed();
        let duration = {
            let mut snap = self.snapshot.write().unwrap();
            snap.elapsed_s = elapsed;
            snap.duration_s
        };
        self.publish(EventPayload::PositionUpdated {
            position_s: elapsed,
            duration_s: duration,
        });
    }

    /// Tear down the current session completely before returning; the
    /// blocking join runs off the async executor.
    async fn teardown_session(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            debug!(device = %self.spec.id, session = pipeline.session_id(), "tearing down session");
            let _ = tokio::task::spawn_blocking(move || pipeline.teardown()).await;
        }
    }
}
