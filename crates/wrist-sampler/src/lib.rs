//! Wearable-side capture loop.
//!
//! A [`Sampler`] owns the motion source and the peer channel on a single
//! task. Each motion reading becomes a [`MotionSample`] that is handed to the
//! peer channel when the peer is reachable and dropped otherwise.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use wrist_link::{LivenessTracker, PeerChannel, PeerEvent, Role};
use wrist_motion::{wall_clock_micros, MotionReading, MotionSample, MotionSource};

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    /// Producer tag stamped on every sample.
    pub source_tag: String,
    /// Motion update cadence.
    pub interval: Duration,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            source_tag: "WATCH".into(),
            interval: Duration::from_millis(10),
        }
    }
}

/// Externally observable sampler state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStatus {
    pub is_recording: bool,
    pub peer_reachable: bool,
    /// Samples captured in the current session, delivered or not.
    pub sample_count: u64,
}

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("Device motion not available")]
    SensingUnavailable,
    #[error("Failed to start motion updates: {0}")]
    StartFailed(String),
}

enum SamplerCommand {
    Start,
    Stop,
    Shutdown,
}

/// Handle to the capture task.
pub struct Sampler {
    command_tx: mpsc::UnboundedSender<SamplerCommand>,
    status_rx: watch::Receiver<SamplerStatus>,
    task: tokio::task::JoinHandle<SamplerStatus>,
}

impl Sampler {
    /// Spawn the capture task. It takes ownership of the motion source and the
    /// peer channel for the rest of the process.
    pub fn spawn<S, P>(
        settings: SamplerSettings,
        source: S,
        peer: P,
        peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> Self
    where
        S: MotionSource + 'static,
        P: PeerChannel + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SamplerStatus::default());

        let recorder = Recorder {
            settings,
            source,
            peer,
            liveness: LivenessTracker::new(Role::Wearable),
            readings: None,
            session_start: None,
            sample_count: 0,
            status_tx,
        };
        let task = tokio::spawn(recorder.run(command_rx, peer_events));

        Self {
            command_tx,
            status_rx,
            task,
        }
    }

    /// Begin recording. No-op if already recording.
    pub fn start_recording(&self) {
        let _ = self.command_tx.send(SamplerCommand::Start);
    }

    /// Stop recording. No-op if not recording.
    pub fn stop_recording(&self) {
        let _ = self.command_tx.send(SamplerCommand::Stop);
    }

    /// Latest status snapshot.
    pub fn status(&self) -> SamplerStatus {
        *self.status_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SamplerStatus> {
        self.status_rx.clone()
    }

    /// Stop recording, tear down the peer channel, and wait for the task.
    pub async fn shutdown(self) -> SamplerStatus {
        let _ = self.command_tx.send(SamplerCommand::Shutdown);
        match self.task.await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(?e, "Sampler task failed");
                *self.status_rx.borrow()
            }
        }
    }
}

struct Recorder<S, P> {
    settings: SamplerSettings,
    source: S,
    peer: P,
    liveness: LivenessTracker,
    /// Present while recording.
    readings: Option<mpsc::UnboundedReceiver<MotionReading>>,
    session_start: Option<Instant>,
    sample_count: u64,
    status_tx: watch::Sender<SamplerStatus>,
}

impl<S: MotionSource, P: PeerChannel> Recorder<S, P> {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<SamplerCommand>,
        mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> SamplerStatus {
        let mut peer_open = true;

        loop {
            tokio::select! {
                reading = next_reading(&mut self.readings) => match reading {
                    Some(reading) => self.capture(reading),
                    None => {
                        tracing::warn!("Motion update stream ended");
                        self.stop_recording();
                    }
                },
                cmd = command_rx.recv() => match cmd {
                    Some(SamplerCommand::Start) => {
                        if let Err(e) = self.start_recording() {
                            tracing::warn!(%e, "Recording not started");
                        }
                    }
                    Some(SamplerCommand::Stop) => self.stop_recording(),
                    Some(SamplerCommand::Shutdown) | None => break,
                },
                event = peer_events.recv(), if peer_open => match event {
                    Some(event) => self.on_peer_event(event),
                    None => {
                        tracing::warn!("Peer event stream closed");
                        peer_open = false;
                    }
                },
            }
            self.publish();
        }

        self.stop_recording();
        self.peer.shutdown();
        self.publish();
        self.status()
    }

    fn start_recording(&mut self) -> Result<(), SamplerError> {
        if self.readings.is_some() {
            tracing::debug!("Already recording");
            return Ok(());
        }
        if !self.source.is_available() {
            return Err(SamplerError::SensingUnavailable);
        }

        let readings = self
            .source
            .start_updates(self.settings.interval)
            .map_err(|e| SamplerError::StartFailed(e.to_string()))?;

        self.session_start = Some(Instant::now());
        self.sample_count = 0;
        self.readings = Some(readings);
        tracing::info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            "Started recording motion data"
        );
        Ok(())
    }

    fn stop_recording(&mut self) {
        if self.readings.take().is_none() {
            return;
        }
        self.source.stop_updates();
        tracing::info!(
            samples = self.sample_count,
            "Stopped recording motion data"
        );
    }

    fn capture(&mut self, reading: MotionReading) {
        self.sample_count += 1;

        let seconds_elapsed = self
            .session_start
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let sample = MotionSample::from_reading(
            self.settings.source_tag.as_str(),
            &reading,
            wall_clock_micros(),
            seconds_elapsed,
        );

        if self.liveness.peer_reachable() {
            self.peer.send(sample.to_payload());
        } else {
            tracing::trace!(sample = self.sample_count, "Peer unreachable, dropping sample");
        }

        if self.sample_count % 1000 == 0 {
            tracing::debug!(sample_count = self.sample_count, "Motion samples captured");
        }
    }

    fn on_peer_event(&mut self, event: PeerEvent) {
        match &event {
            PeerEvent::SendFailed(e) => {
                tracing::warn!(error = %e, "Error sending motion data");
            }
            PeerEvent::MessageReceived(message) => {
                tracing::debug!(?message, "Received message from companion");
            }
            _ => {}
        }
        self.liveness.apply(&event);
    }

    fn status(&self) -> SamplerStatus {
        SamplerStatus {
            is_recording: self.readings.is_some(),
            peer_reachable: self.liveness.peer_reachable(),
            sample_count: self.sample_count,
        }
    }

    fn publish(&self) {
        let status = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

async fn next_reading(
    readings: &mut Option<mpsc::UnboundedReceiver<MotionReading>>,
) -> Option<MotionReading> {
    match readings {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;
    use std::sync::{Arc, Mutex};
    use wrist_link::PeerPayload;
    use wrist_motion::Attitude;

    #[derive(Default)]
    struct ScriptState {
        unavailable: bool,
        starts: usize,
        stops: usize,
        tx: Option<mpsc::UnboundedSender<MotionReading>>,
    }

    /// Motion source driven by the test.
    #[derive(Clone, Default)]
    struct ScriptedMotion(Arc<Mutex<ScriptState>>);

    impl ScriptedMotion {
        fn unavailable() -> Self {
            let source = Self::default();
            source.0.lock().unwrap().unavailable = true;
            source
        }

        fn emit(&self, reading: MotionReading) {
            let state = self.0.lock().unwrap();
            state.tx.as_ref().expect("not started").send(reading).unwrap();
        }

        fn starts(&self) -> usize {
            self.0.lock().unwrap().starts
        }

        fn stops(&self) -> usize {
            self.0.lock().unwrap().stops
        }
    }

    impl MotionSource for ScriptedMotion {
        fn is_available(&self) -> bool {
            !self.0.lock().unwrap().unavailable
        }

        fn start_updates(
            &mut self,
            _interval: Duration,
        ) -> anyhow::Result<mpsc::UnboundedReceiver<MotionReading>> {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut state = self.0.lock().unwrap();
            state.starts += 1;
            state.tx = Some(tx);
            Ok(rx)
        }

        fn stop_updates(&mut self) {
            let mut state = self.0.lock().unwrap();
            state.stops += 1;
            state.tx = None;
        }
    }

    /// Peer channel that records what it was asked to send.
    #[derive(Clone, Default)]
    struct RecordingPeer {
        sent: Arc<Mutex<Vec<PeerPayload>>>,
        shut_down: Arc<Mutex<bool>>,
    }

    impl RecordingPeer {
        fn sent(&self) -> Vec<PeerPayload> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl PeerChannel for RecordingPeer {
        fn send(&self, payload: PeerPayload) {
            self.sent.lock().unwrap().push(payload);
        }

        fn activate(&self) {}

        fn shutdown(&self) {
            *self.shut_down.lock().unwrap() = true;
        }
    }

    struct Harness {
        sampler: Sampler,
        source: ScriptedMotion,
        peer: RecordingPeer,
        peer_tx: mpsc::UnboundedSender<PeerEvent>,
    }

    fn harness(source: ScriptedMotion) -> Harness {
        let peer = RecordingPeer::default();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let settings = SamplerSettings::default();
        let sampler = Sampler::spawn(settings, source.clone(), peer.clone(), peer_rx);
        Harness {
            sampler,
            source,
            peer,
            peer_tx,
        }
    }

    async fn wait_status(sampler: &Sampler, pred: impl Fn(&SamplerStatus) -> bool) -> SamplerStatus {
        let mut rx = sampler.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = *rx.borrow_and_update();
                if pred(&status) {
                    return status;
                }
                rx.changed().await.expect("sampler stopped");
            }
        })
        .await
        .expect("timed out waiting for sampler status")
    }

    fn reading(x: f64) -> MotionReading {
        MotionReading {
            rotation_rate: DVec3::new(x, 0.0, 0.0),
            attitude: Attitude::default(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn drops_samples_while_peer_unreachable() {
        let h = harness(ScriptedMotion::default());
        h.sampler.start_recording();
        wait_status(&h.sampler, |s| s.is_recording).await;

        for i in 0..5 {
            h.source.emit(reading(i as f64));
        }
        wait_status(&h.sampler, |s| s.sample_count == 5).await;
        assert!(h.peer.sent().is_empty());

        h.peer_tx
            .send(PeerEvent::ReachabilityChanged { reachable: true })
            .unwrap();
        wait_status(&h.sampler, |s| s.peer_reachable).await;

        for i in 5..8 {
            h.source.emit(reading(i as f64));
        }
        wait_status(&h.sampler, |s| s.sample_count == 8).await;

        let sent = h.peer.sent();
        assert_eq!(sent.len(), 3);
        let xs: Vec<f64> = sent
            .iter()
            .map(|p| p["rotationRateX"].as_f64().unwrap())
            .collect();
        assert_eq!(xs, vec![5.0, 6.0, 7.0]);
        for payload in &sent {
            assert_eq!(payload["source"], serde_json::json!("WATCH"));
            assert!(payload["seconds_elapsed"].as_f64().unwrap() >= 0.0);
            assert!(payload["timestamp"].as_i64().unwrap() > 0);
        }

        h.sampler.shutdown().await;
    }

    #[tokio::test]
    async fn unreachable_again_resumes_dropping() {
        let h = harness(ScriptedMotion::default());
        h.peer_tx
            .send(PeerEvent::ActivationCompleted {
                activated: true,
                reachable: true,
                error: None,
            })
            .unwrap();
        h.sampler.start_recording();
        wait_status(&h.sampler, |s| s.is_recording && s.peer_reachable).await;

        h.source.emit(reading(1.0));
        wait_status(&h.sampler, |s| s.sample_count == 1).await;

        h.peer_tx
            .send(PeerEvent::ReachabilityChanged { reachable: false })
            .unwrap();
        wait_status(&h.sampler, |s| !s.peer_reachable).await;

        h.source.emit(reading(2.0));
        wait_status(&h.sampler, |s| s.sample_count == 2).await;

        assert_eq!(h.peer.sent().len(), 1);
        h.sampler.shutdown().await;
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let h = harness(ScriptedMotion::default());
        h.sampler.start_recording();
        wait_status(&h.sampler, |s| s.is_recording).await;

        h.source.emit(reading(0.0));
        h.source.emit(reading(0.0));
        wait_status(&h.sampler, |s| s.sample_count == 2).await;

        h.sampler.start_recording();
        h.source.emit(reading(0.0));
        wait_status(&h.sampler, |s| s.sample_count == 3).await;

        let source = h.source.clone();
        let status = h.sampler.shutdown().await;
        assert_eq!(status.sample_count, 3);
        assert_eq!(source.starts(), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let h = harness(ScriptedMotion::default());
        h.sampler.stop_recording();
        h.sampler.start_recording();
        wait_status(&h.sampler, |s| s.is_recording).await;

        h.sampler.stop_recording();
        h.sampler.stop_recording();
        wait_status(&h.sampler, |s| !s.is_recording).await;

        let source = h.source.clone();
        h.sampler.shutdown().await;
        assert_eq!(source.stops(), 1);
    }

    #[tokio::test]
    async fn restart_resets_sample_count() {
        let h = harness(ScriptedMotion::default());
        h.sampler.start_recording();
        wait_status(&h.sampler, |s| s.is_recording).await;
        h.source.emit(reading(0.0));
        h.source.emit(reading(0.0));
        wait_status(&h.sampler, |s| s.sample_count == 2).await;

        h.sampler.stop_recording();
        let stopped = wait_status(&h.sampler, |s| !s.is_recording).await;
        assert_eq!(stopped.sample_count, 2);

        h.sampler.start_recording();
        let restarted = wait_status(&h.sampler, |s| s.is_recording).await;
        assert_eq!(restarted.sample_count, 0);

        h.source.emit(reading(0.0));
        wait_status(&h.sampler, |s| s.sample_count == 1).await;
        h.sampler.shutdown().await;
    }

    #[tokio::test]
    async fn unavailable_sensing_never_records() {
        let h = harness(ScriptedMotion::unavailable());
        h.sampler.start_recording();

        let source = h.source.clone();
        let peer = h.peer.clone();
        let status = h.sampler.shutdown().await;

        assert!(!status.is_recording);
        assert_eq!(status.sample_count, 0);
        assert_eq!(source.starts(), 0);
        assert!(*peer.shut_down.lock().unwrap());
    }
}
