use crate::{
    latch::{CommandOutcome, Latch, OutcomeCell},
    protocol::{Asdu, Cause, SessionEvent},
};
use std::sync::Arc;
use tokio::{
    select,
    sync::{broadcast, mpsc},
};
use tokio_util::sync::CancellationToken;

/// Interprets link-layer and application-layer events delivered by the
/// session and records them in the confirmation latches. The classifier is
/// the only writer of either latch; the command flow only reads them.
pub struct EventClassifier {
    dt_confirmed: Arc<Latch>,
    command_outcome: Arc<OutcomeCell>,
}

impl EventClassifier {
    pub fn new(dt_confirmed: Arc<Latch>, command_outcome: Arc<OutcomeCell>) -> Self {
        Self {
            dt_confirmed,
            command_outcome,
        }
    }

    pub fn on_session_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Opened => tracing::info!("connection established"),
            SessionEvent::Closed => tracing::info!("connection closed"),
            SessionEvent::StartDtConfirmed => {
                self.dt_confirmed.set();
                tracing::info!("STARTDT confirmation received");
            }
            SessionEvent::StopDtConfirmed => tracing::info!("STOPDT confirmation received"),
            other => tracing::debug!(event = ?other, "unhandled session event"),
        }
    }

    /// Classify an inbound ASDU by its cause of transmission. Activation
    /// confirmation and unknown-IOA rejection both resolve the command
    /// outcome; every other cause is outside this client's interest and is
    /// ignored. Always acknowledges the delivery.
    pub fn on_asdu(&self, asdu: Asdu) -> bool {
        let mut cot = asdu.identifier.cot;
        match cot.cause().get() {
            Cause::ActivationCon => {
                self.command_outcome.set(CommandOutcome::Confirmed);
                tracing::info!("control command confirmed by RTU");
            }
            Cause::UnknownIOA => {
                self.command_outcome.set(CommandOutcome::Rejected);
                for addr in asdu.info_obj_addrs() {
                    tracing::error!(ioa = addr, "control command error: unknown IOA");
                }
            }
            _ => {}
        }
        true
    }

    /// Consume both event streams until cancelled or the session goes away.
    pub async fn run(
        self,
        mut events: broadcast::Receiver<SessionEvent>,
        mut asdus: mpsc::Receiver<Asdu>,
        cancel: CancellationToken,
    ) {
        loop {
            select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => {
                    match event {
                        Ok(event) => self.on_session_event(&event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, "session event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                maybe_asdu = asdus.recv() => {
                    match maybe_asdu {
                        Some(asdu) => {
                            let _ = self.on_asdu(asdu);
                        }
                        None => break,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        frame::cproc::{single_cmd, SingleCommandInfo},
        CauseOfTransmission, TypeID,
    };

    fn classifier() -> (EventClassifier, Arc<Latch>, Arc<OutcomeCell>) {
        let dt = Arc::new(Latch::new());
        let outcome = Arc::new(OutcomeCell::new());
        (
            EventClassifier::new(Arc::clone(&dt), Arc::clone(&outcome)),
            dt,
            outcome,
        )
    }

    fn command_mirror(cause: Cause) -> Asdu {
        let cmd = SingleCommandInfo::new(100, true, false);
        let asdu = single_cmd(
            TypeID::C_SC_NA_1,
            CauseOfTransmission::new(false, false, Cause::Activation),
            100,
            cmd,
        )
        .unwrap();
        asdu.mirror(cause)
    }

    #[test]
    fn dt_latch_set_only_by_startdt_confirmation() {
        let (classifier, dt, _) = classifier();
        assert!(!dt.is_set());

        classifier.on_session_event(&SessionEvent::Opened);
        classifier.on_session_event(&SessionEvent::StopDtConfirmed);
        classifier.on_session_event(&SessionEvent::Failed("boom".into()));
        assert!(!dt.is_set());

        classifier.on_session_event(&SessionEvent::StartDtConfirmed);
        assert!(dt.is_set());
    }

    #[test]
    fn activation_confirmation_resolves_confirmed() {
        let (classifier, _, outcome) = classifier();
        assert!(classifier.on_asdu(command_mirror(Cause::ActivationCon)));
        assert_eq!(outcome.get(), Some(CommandOutcome::Confirmed));
    }

    #[test]
    fn unknown_ioa_resolves_rejected() {
        let (classifier, _, outcome) = classifier();
        let asdu = command_mirror(Cause::UnknownIOA);
        assert_eq!(asdu.info_obj_addrs(), vec![100]);
        assert!(classifier.on_asdu(asdu));
        assert_eq!(outcome.get(), Some(CommandOutcome::Rejected));
    }

    #[test]
    fn unrelated_causes_leave_outcome_unset() {
        let (classifier, _, outcome) = classifier();
        assert!(classifier.on_asdu(command_mirror(Cause::ActivationTerm)));
        assert!(classifier.on_asdu(command_mirror(Cause::Deactivation)));
        assert_eq!(outcome.get(), None);
    }

    #[tokio::test]
    async fn run_consumes_both_streams() {
        let (classifier, dt, outcome) = classifier();
        let (events_tx, events_rx) = broadcast::channel(8);
        let (asdu_tx, asdu_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(classifier.run(events_rx, asdu_rx, cancel.clone()));

        events_tx.send(SessionEvent::StartDtConfirmed).unwrap();
        asdu_tx
            .send(command_mirror(Cause::ActivationCon))
            .await
            .unwrap();

        assert!(
            dt.wait_for(
                std::time::Duration::from_millis(500),
                std::time::Duration::from_millis(5)
            )
            .await
        );
        assert_eq!(
            outcome
                .wait_for(
                    std::time::Duration::from_millis(500),
                    std::time::Duration::from_millis(5)
                )
                .await,
            Some(CommandOutcome::Confirmed)
        );

        cancel.cancel();
        task.await.unwrap();
    }
}
