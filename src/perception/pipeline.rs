//! The perception loop: frames in, gateway commands out

use super::source::{Classifier, FrameSource};
use crate::gateway::CommandGateway;
use anyhow::Context;
use gesture_flight_shared::{
    ControlError, GestureLabel, GestureMap, VoteAggregator, VoteError,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerceptionStats {
    pub frames: u64,
    pub detections: u64,
    pub decisions: u64,
    pub enqueued: u64,
    pub invalid_labels: u64,
}

/// Classify, vote, map and enqueue until the source ends
pub struct PerceptionLoop<S, C> {
    source: S,
    classifier: C,
    aggregator: VoteAggregator,
    gestures: GestureMap,
    gateway: CommandGateway,
    window_updates: Option<watch::Receiver<usize>>,
    stats: PerceptionStats,
}

impl<S, C> PerceptionLoop<S, C>
where
    S: FrameSource,
    C: Classifier<S::Frame>,
{
    pub fn new(
        source: S,
        classifier: C,
        aggregator: VoteAggregator,
        gestures: GestureMap,
        gateway: CommandGateway,
    ) -> Self {
        Self {
            source,
            classifier,
            aggregator,
            gestures,
            gateway,
            window_updates: None,
            stats: PerceptionStats::default(),
        }
    }

    /// Follow window size changes published on `updates`
    pub fn with_window_updates(mut self, updates: watch::Receiver<usize>) -> Self {
        self.window_updates = Some(updates);
        self
    }

    pub fn stats(&self) -> PerceptionStats {
        self.stats
    }

    /// Resize the vote window; pending votes are discarded
    pub fn set_window_size(&mut self, window_size: usize) -> Result<(), VoteError> {
        self.aggregator.set_window_size(window_size)
    }

    /// Feed one detected label. Returns the request id when a command was queued.
    pub fn process_label(&mut self, label: GestureLabel) -> Result<Option<u64>, ControlError> {
        let decision = match self.aggregator.observe(label) {
            Ok(Some(decision)) => decision,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.stats.invalid_labels += 1;
                return Err(e.into());
            }
        };
        self.stats.decisions += 1;

        let Some(kind) = self.gestures.command_for(&decision.label) else {
            debug!(
                "[PERCEPTION] '{}' ({}/{}) holds position",
                decision.label, decision.votes, decision.window
            );
            return Ok(None);
        };

        let id = self.gateway.enqueue(kind)?;
        self.stats.enqueued += 1;
        info!(
            "[PERCEPTION] '{}' ({}/{}) -> {} #{}",
            decision.label, decision.votes, decision.window, kind, id
        );
        Ok(Some(id))
    }

    /// Run until end of stream or until the gateway closes
    pub async fn run(mut self) -> anyhow::Result<PerceptionStats> {
        info!(
            "[PERCEPTION] Started (window {})",
            self.aggregator.window_size()
        );

        loop {
            let frame = self
                .source
                .next_frame()
                .await
                .context("Frame source failed")?;
            let Some(frame) = frame else {
                info!("[PERCEPTION] End of frame stream");
                break;
            };
            self.stats.frames += 1;
            self.apply_window_update();

            let Some(label) = self.classifier.classify(&frame) else {
                continue;
            };
            self.stats.detections += 1;

            match self.process_label(label) {
                Ok(_) => {}
                Err(ControlError::GatewayClosed) => {
                    info!("[PERCEPTION] Gateway closed, stopping");
                    break;
                }
                Err(e) => warn!("[PERCEPTION] {}", e),
            }
        }

        info!("[PERCEPTION] Stopped: {:?}", self.stats);
        Ok(self.stats())
    }

    fn apply_window_update(&mut self) {
        let Some(updates) = self.window_updates.as_mut() else {
            return;
        };
        if !updates.has_changed().unwrap_or(false) {
            return;
        }

        let size = *updates.borrow_and_update();
        match self.set_window_size(size) {
            Ok(()) => info!("[PERCEPTION] Vote window now {} frames", size),
            Err(e) => warn!("[PERCEPTION] Window size {} refused: {}", size, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::worker::GatewayWorker;
    use crate::gateway::{GatewayConfig, GatewayEvent};
    use crate::perception::{LabelClassifier, LineSource};
    use crate::session::{FlightSession, SessionConfig};
    use crate::vehicle::sim::SimLink;
    use async_trait::async_trait;
    use gesture_flight_shared::{Bounds, CommandKind, Vocabulary};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    type TextLoop = PerceptionLoop<LineSource<&'static [u8]>, LabelClassifier>;

    fn text_loop(input: &'static str, window: usize) -> (TextLoop, CommandGateway, GatewayWorker) {
        let (gateway, worker) = CommandGateway::new(GatewayConfig::default());
        let aggregator = VoteAggregator::new(Vocabulary::default(), window).unwrap();
        let perception = PerceptionLoop::new(
            LineSource::new(input.as_bytes()),
            LabelClassifier,
            aggregator,
            GestureMap::default(),
            gateway.clone(),
        );
        (perception, gateway, worker)
    }

    #[tokio::test]
    async fn test_votes_become_commands() {
        let input = "up\nup\ndown\nnone\n\nleft\nleft\nleft\nstop\nstop\nstop\n";
        let (perception, _gateway, _worker) = text_loop(input, 3);

        let stats = perception.run().await.unwrap();
        assert_eq!(
            stats,
            PerceptionStats {
                frames: 11,
                detections: 9,
                decisions: 3,
                enqueued: 2,
                invalid_labels: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_process_label_returns_request_id() {
        let (mut perception, _gateway, _worker) = text_loop("", 2);
        assert_eq!(perception.process_label(GestureLabel::new("right")), Ok(None));
        assert_eq!(perception.process_label(GestureLabel::new("right")), Ok(Some(1)));
        assert_eq!(perception.process_label(GestureLabel::new("stop")), Ok(None));
        assert_eq!(perception.process_label(GestureLabel::new("stop")), Ok(None));
        assert_eq!(perception.stats().decisions, 2);
        assert_eq!(perception.stats().enqueued, 1);
    }

    #[tokio::test]
    async fn test_invalid_labels_are_skipped() {
        let (perception, _gateway, _worker) = text_loop("up\nwave\nup\n", 2);

        let stats = perception.run().await.unwrap();
        assert_eq!(stats.invalid_labels, 1);
        assert_eq!(stats.decisions, 1);
        assert_eq!(stats.enqueued, 1);
    }

    #[tokio::test]
    async fn test_closed_gateway_stops_loop() {
        let (perception, gateway, _worker) = text_loop("up\ndown\nleft\nright\n", 1);
        gateway.shutdown();

        let stats = perception.run().await.unwrap();
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.enqueued, 0);
    }

    #[tokio::test]
    async fn test_window_resize_discards_pending() {
        let (mut perception, _gateway, _worker) = text_loop("", 3);
        perception.process_label(GestureLabel::new("up")).unwrap();
        perception.set_window_size(1).unwrap();
        assert_eq!(perception.process_label(GestureLabel::new("down")), Ok(Some(1)));
        assert!(perception.set_window_size(0).is_err());
    }

    #[tokio::test]
    async fn test_window_follows_updates() {
        let (window_tx, window_rx) = watch::channel(3);
        let (perception, _gateway, _worker) = text_loop("up\nup\nright\nleft\n", 3);
        let perception = perception.with_window_updates(window_rx);

        // Applied before the first frame is voted on
        window_tx.send_replace(1);
        let stats = perception.run().await.unwrap();
        assert_eq!(stats.decisions, 4);
        assert_eq!(stats.enqueued, 4);
    }

    struct BrokenSource;

    #[async_trait]
    impl FrameSource for BrokenSource {
        type Frame = String;

        async fn next_frame(&mut self) -> anyhow::Result<Option<String>> {
            anyhow::bail!("camera unplugged")
        }
    }

    #[tokio::test]
    async fn test_source_failure_ends_loop() {
        let (gateway, _worker) = CommandGateway::new(GatewayConfig::default());
        let perception = PerceptionLoop::new(
            BrokenSource,
            LabelClassifier,
            VoteAggregator::default(),
            GestureMap::default(),
            gateway,
        );

        let err = perception.run().await.unwrap_err();
        assert!(format!("{:#}", err).contains("camera unplugged"));
    }

    #[tokio::test]
    async fn test_enqueued_kinds_follow_gesture_map() {
        let (gateway, worker) = CommandGateway::new(GatewayConfig::default());
        let gestures = GestureMap::new().with("up", Some(CommandKind::TakeOff));
        let perception = PerceptionLoop::new(
            LineSource::new(&b"up\ndown\n"[..]),
            LabelClassifier,
            VoteAggregator::new(Vocabulary::default(), 1).unwrap(),
            gestures,
            gateway.clone(),
        );

        let stats = perception.run().await.unwrap();
        assert_eq!(stats.enqueued, 1);
        gateway.shutdown();

        let link = SimLink::new();
        let session =
            FlightSession::new(SessionConfig::default(), Bounds::default(), Arc::new(link)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        worker.run(session, tx).await;

        let kinds: Vec<CommandKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|event| match event {
                GatewayEvent::Rejected { request, .. } => Some(request.kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![CommandKind::TakeOff]);
    }
}
