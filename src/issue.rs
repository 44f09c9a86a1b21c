use crate::{
    classifier::EventClassifier,
    config::IssueConfig,
    latch::{CommandOutcome, Latch, OutcomeCell},
    protocol::{
        Cause, CauseOfTransmission, ClientBuilder, DoubleCommandInfo, Error as ProtocolError,
        Session, SingleCommandInfo, TypeID,
    },
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;

/// Command family selected on the command line. The raw selector values match
/// the protocol's own type identifiers (45 = single, 46 = double).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Single,
    Double,
}

impl CommandKind {
    pub fn classify(type_code: u8) -> Option<Self> {
        match type_code {
            45 => Some(CommandKind::Single),
            46 => Some(CommandKind::Double),
            _ => None,
        }
    }
}

/// One supervisory control operation, built from caller input and consumed
/// once.
#[derive(Debug, Clone, Copy)]
pub struct CommandRequest {
    /// Target information object address
    pub ioa: u16,
    /// Raw ASDU type selector; anything outside {45, 46} is carried through
    /// and reported at issue time rather than rejected upfront
    pub type_code: u8,
    /// Commanded value (0 or 1)
    pub value: u8,
    /// ASDU common address override
    pub common_addr: Option<u16>,
}

impl CommandRequest {
    pub fn kind(&self) -> Option<CommandKind> {
        CommandKind::classify(self.type_code)
    }

    /// Effective common address: the override when given, otherwise the IOA
    /// value (the original tool's call convention).
    pub fn common_addr(&self) -> u16 {
        self.common_addr.unwrap_or(self.ioa)
    }
}

/// Progress marker of the issuance sequence. Strictly linear; `DoneFail` is
/// reachable from `Connecting`, `DtPending` and `CommandPending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuePhase {
    Init,
    Connecting,
    Connected,
    DtPending,
    DtConfirmed,
    CommandSent,
    CommandPending,
    DoneOk,
    DoneFail,
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("failed to connect to RTU at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: ProtocolError,
    },
    #[error(transparent)]
    Transport(#[from] ProtocolError),
    #[error("timeout waiting for STARTDT confirmation")]
    DtConfirmTimeout,
    #[error("timeout waiting for command confirmation")]
    CommandConfirmTimeout,
    #[error("interrupted")]
    Cancelled,
}

/// Single-pass, non-reentrant driver of one command issuance. Terminal on
/// first failure; no retries anywhere.
pub struct CommandIssuer {
    config: IssueConfig,
    cancel: CancellationToken,
}

impl CommandIssuer {
    pub fn new(config: IssueConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    /// Run the full sequence against the RTU at `addr`. Resolves with the
    /// RTU's recorded outcome, or with the first terminal failure. The
    /// session and its background tasks are released on every path.
    pub async fn run(
        &self,
        addr: SocketAddr,
        request: CommandRequest,
    ) -> Result<CommandOutcome, IssueError> {
        let dt_confirmed = Arc::new(Latch::new());
        let command_outcome = Arc::new(OutcomeCell::new());

        tracing::debug!(phase = ?IssuePhase::Connecting, %addr, "connecting");
        let client = ClientBuilder::new()
            .socket_addr(addr)
            .connect_timeout(self.config.connect_timeout_ms)
            .build();
        let (session, event_loop) = match client.connect().await {
            Ok(pair) => pair,
            Err(source) => {
                tracing::error!(%addr, error = %source, "failed to connect to RTU");
                // let any half-open transport tear down before reporting
                sleep(Duration::from_millis(self.config.teardown_grace_ms)).await;
                tracing::debug!(phase = ?IssuePhase::DoneFail, "command issuance finished");
                return Err(IssueError::Connect { addr, source });
            }
        };
        tracing::info!(%addr, "connected to RTU");
        tracing::debug!(phase = ?IssuePhase::Connected, "transport established");

        // Register both consumers before the I/O loop runs, so no event can
        // slip past the classifier.
        let events_rx = session.subscribe_events();
        let Some(asdu_rx) = session.take_asdu_receiver().await else {
            return Err(IssueError::Transport(ProtocolError::ErrUseClosedConnection));
        };

        let loop_cancel = event_loop.cancellation_token();
        let io = event_loop.spawn();

        let classifier =
            EventClassifier::new(Arc::clone(&dt_confirmed), Arc::clone(&command_outcome));
        let classifier_cancel = self.cancel.child_token();
        let classifier_task =
            tokio::spawn(classifier.run(events_rx, asdu_rx, classifier_cancel.clone()));

        let result = self
            .drive(&session, &request, &dt_confirmed, &command_outcome)
            .await;

        // Release on every path: stop the I/O driver and classifier, then
        // wait them out so the transport handle is gone before exiting.
        loop_cancel.cancel();
        classifier_cancel.cancel();
        let _ = io.await;
        let _ = classifier_task.await;

        let phase = if result.is_ok() {
            IssuePhase::DoneOk
        } else {
            IssuePhase::DoneFail
        };
        tracing::debug!(phase = ?phase, "command issuance finished");
        result
    }

    /// Steps 4-10 of the sequence, on an established session. Split out so
    /// the caller can release the session uniformly whatever happens here.
    async fn drive(
        &self,
        session: &Arc<Session>,
        request: &CommandRequest,
        dt_confirmed: &Latch,
        command_outcome: &OutcomeCell,
    ) -> Result<CommandOutcome, IssueError> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        // the I/O driver installs the request sender asynchronously; don't
        // race it with the handshake
        if !session.wait_for_connection().await {
            tracing::warn!("session terminated before the handshake could start");
        }

        tracing::debug!(phase = ?IssuePhase::DtPending, "requesting data transfer");
        if let Err(e) = session.send_start_dt().await {
            tracing::warn!(error = %e, "failed to send STARTDT");
        }

        let dt_ok = select! {
            _ = self.cancel.cancelled() => return Err(IssueError::Cancelled),
            ok = dt_confirmed.wait_for(
                Duration::from_millis(self.config.dt_confirm_timeout_ms),
                poll,
            ) => ok,
        };
        if !dt_ok {
            tracing::error!(
                timeout_ms = self.config.dt_confirm_timeout_ms,
                "timeout waiting for STARTDT confirmation"
            );
            return Err(IssueError::DtConfirmTimeout);
        }
        tracing::debug!(phase = ?IssuePhase::DtConfirmed, "data transfer active");

        let cot = CauseOfTransmission::new(false, false, Cause::Activation);
        let ca = request.common_addr();
        match request.kind() {
            Some(CommandKind::Single) => {
                let cmd = SingleCommandInfo::new(request.ioa, request.value != 0, false);
                if let Err(e) = session.single_cmd(TypeID::C_SC_NA_1, cot, ca, cmd).await {
                    tracing::error!(error = %e, "failed to send single command");
                }
                tracing::debug!(phase = ?IssuePhase::CommandSent, ioa = request.ioa, "single command dispatched");
            }
            Some(CommandKind::Double) => {
                // DCS 2 is the protocol's ON code, 1 is OFF; the
                // indeterminate codes 0/3 are never produced here
                let dcs = if request.value == 1 { 2 } else { 1 };
                let cmd = DoubleCommandInfo::new(request.ioa, dcs, false);
                if let Err(e) = session.double_cmd(TypeID::C_DC_NA_1, cot, ca, cmd).await {
                    tracing::error!(error = %e, "failed to send double command");
                }
                tracing::debug!(phase = ?IssuePhase::CommandSent, ioa = request.ioa, "double command dispatched");
            }
            None => {
                tracing::error!(
                    type_code = request.type_code,
                    "invalid ASDU type selector; use 45 for single command, 46 for double command"
                );
            }
        }

        tracing::debug!(phase = ?IssuePhase::CommandPending, "awaiting command confirmation");
        let outcome = select! {
            _ = self.cancel.cancelled() => return Err(IssueError::Cancelled),
            outcome = command_outcome.wait_for(
                Duration::from_millis(self.config.command_confirm_timeout_ms),
                poll,
            ) => outcome,
        };
        match outcome {
            Some(outcome) => Ok(outcome),
            None => {
                tracing::error!(
                    timeout_ms = self.config.command_confirm_timeout_ms,
                    "timeout waiting for command confirmation"
                );
                Err(IssueError::CommandConfirmTimeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_selectors_follow_protocol_type_ids() {
        assert_eq!(CommandKind::classify(45), Some(CommandKind::Single));
        assert_eq!(CommandKind::classify(46), Some(CommandKind::Double));
        assert_eq!(CommandKind::classify(0), None);
        assert_eq!(CommandKind::classify(47), None);
        assert_eq!(CommandKind::classify(100), None);
    }

    #[test]
    fn common_addr_defaults_to_ioa() {
        let request = CommandRequest {
            ioa: 100,
            type_code: 45,
            value: 1,
            common_addr: None,
        };
        assert_eq!(request.common_addr(), 100);

        let overridden = CommandRequest {
            common_addr: Some(7),
            ..request
        };
        assert_eq!(overridden.common_addr(), 7);
    }
}
