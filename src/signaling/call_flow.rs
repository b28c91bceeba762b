use serde::{Deserialize, Serialize};

use crate::models::Role;

/// Negotiation message kinds relayed between the two parties.
///
/// Payloads are opaque; only the kind participates in flow gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    ConnectivityCandidate,
    ConnectionEstablished,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::ConnectivityCandidate => "connectivity-candidate",
            SignalKind::ConnectionEstablished => "connection-established",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Macro state of one room's call negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallFlowState {
    Idle,
    Offered,
    Answered,
    Connected,
}

/// Why a negotiation message was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowViolation {
    #[error("only a doctor may send an offer, got {0}")]
    OfferByNonInitiator(Role),
    #[error("only a patient may send an answer, got {0}")]
    AnswerByNonResponder(Role),
    #[error("{kind} not valid in state {state:?}")]
    OutOfTurn {
        kind: SignalKind,
        state: CallFlowState,
    },
}

/// An accepted signal: the transition it caused (or confirmed) and
/// whether the payload should be relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub previous: CallFlowState,
    pub next: CallFlowState,
}

/// Per-room call negotiation state between the initiating doctor and
/// the answering patient.
///
/// `apply` is the whole decision procedure: it performs no I/O, so
/// the gating rules are testable without a transport. The caller
/// relays the payload only when `apply` returns `Ok`.
#[derive(Debug, Clone)]
pub struct CallFlow {
    state: CallFlowState,
    initiator_id: Option<String>,
    responder_id: Option<String>,
}

impl Default for CallFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl CallFlow {
    pub fn new() -> Self {
        Self {
            state: CallFlowState::Idle,
            initiator_id: None,
            responder_id: None,
        }
    }

    pub fn state(&self) -> CallFlowState {
        self.state
    }

    pub fn initiator_id(&self) -> Option<&str> {
        self.initiator_id.as_deref()
    }

    pub fn responder_id(&self) -> Option<&str> {
        self.responder_id.as_deref()
    }

    /// Apply one negotiation signal. On rejection nothing is mutated.
    pub fn apply(
        &mut self,
        kind: SignalKind,
        sender_role: Role,
        sender_id: &str,
    ) -> Result<Accepted, FlowViolation> {
        let previous = self.state;

        let next = match kind {
            SignalKind::Offer => {
                if !sender_role.is_initiator() {
                    return Err(FlowViolation::OfferByNonInitiator(sender_role));
                }
                if previous != CallFlowState::Idle {
                    return Err(FlowViolation::OutOfTurn {
                        kind,
                        state: previous,
                    });
                }
                self.initiator_id = Some(sender_id.to_string());
                CallFlowState::Offered
            }
            SignalKind::Answer => {
                if !sender_role.is_responder() {
                    return Err(FlowViolation::AnswerByNonResponder(sender_role));
                }
                if previous != CallFlowState::Offered {
                    return Err(FlowViolation::OutOfTurn {
                        kind,
                        state: previous,
                    });
                }
                self.responder_id = Some(sender_id.to_string());
                CallFlowState::Answered
            }
            // Candidates may arrive in any order and any quantity
            // once negotiation has started; they never move the
            // macro state and are not deduplicated.
            SignalKind::ConnectivityCandidate => {
                if previous == CallFlowState::Idle {
                    return Err(FlowViolation::OutOfTurn {
                        kind,
                        state: previous,
                    });
                }
                previous
            }
            SignalKind::ConnectionEstablished => {
                if previous != CallFlowState::Answered {
                    return Err(FlowViolation::OutOfTurn {
                        kind,
                        state: previous,
                    });
                }
                CallFlowState::Connected
            }
        };

        self.state = next;
        Ok(Accepted { previous, next })
    }

    /// Discard negotiation state when a negotiating party leaves.
    ///
    /// Returns true if the flow was reset. Participants that never
    /// took part in the negotiation do not reset it.
    pub fn reset_if_party(&mut self, identity_id: &str) -> bool {
        let is_party = self.initiator_id.as_deref() == Some(identity_id)
            || self.responder_id.as_deref() == Some(identity_id);
        if is_party {
            *self = CallFlow::new();
        }
        is_party
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn offer_by_patient_is_rejected_without_mutation() {
        let mut flow = CallFlow::new();

        let err = flow
            .apply(SignalKind::Offer, Role::Patient, "p1")
            .unwrap_err();

        assert_eq!(err, FlowViolation::OfferByNonInitiator(Role::Patient));
        assert_eq!(flow.state(), CallFlowState::Idle);
        assert_eq!(flow.initiator_id(), None);
    }

    #[test]
    fn observer_cannot_offer_or_answer() {
        let mut flow = CallFlow::new();
        assert!(flow.apply(SignalKind::Offer, Role::Observer, "o1").is_err());

        flow.apply(SignalKind::Offer, Role::Doctor, "d1").unwrap();
        assert!(flow
            .apply(SignalKind::Answer, Role::Observer, "o1")
            .is_err());
        assert_eq!(flow.state(), CallFlowState::Offered);
    }

    #[test]
    fn happy_path_offer_answer_connect() {
        let mut flow = CallFlow::new();

        let accepted = flow.apply(SignalKind::Offer, Role::Doctor, "d1").unwrap();
        assert_eq!(accepted.previous, CallFlowState::Idle);
        assert_eq!(accepted.next, CallFlowState::Offered);

        let accepted = flow.apply(SignalKind::Answer, Role::Patient, "p1").unwrap();
        assert_eq!(accepted.next, CallFlowState::Answered);

        let accepted = flow
            .apply(SignalKind::ConnectionEstablished, Role::Patient, "p1")
            .unwrap();
        assert_eq!(accepted.next, CallFlowState::Connected);

        assert_eq!(flow.initiator_id(), Some("d1"));
        assert_eq!(flow.responder_id(), Some("p1"));
    }

    #[test]
    fn candidates_flow_freely_after_offer() {
        let mut flow = CallFlow::new();
        flow.apply(SignalKind::Offer, Role::Doctor, "d1").unwrap();

        for _ in 0..10 {
            let accepted = flow
                .apply(SignalKind::ConnectivityCandidate, Role::Doctor, "d1")
                .unwrap();
            assert_eq!(accepted.next, CallFlowState::Offered);
            let accepted = flow
                .apply(SignalKind::ConnectivityCandidate, Role::Patient, "p1")
                .unwrap();
            assert_eq!(accepted.next, CallFlowState::Offered);
        }
    }

    #[test]
    fn candidate_before_offer_is_out_of_turn() {
        let mut flow = CallFlow::new();
        let err = flow
            .apply(SignalKind::ConnectivityCandidate, Role::Doctor, "d1")
            .unwrap_err();
        assert_eq!(
            err,
            FlowViolation::OutOfTurn {
                kind: SignalKind::ConnectivityCandidate,
                state: CallFlowState::Idle,
            }
        );
    }

    #[test]
    fn second_offer_after_answer_is_rejected() {
        let mut flow = CallFlow::new();
        flow.apply(SignalKind::Offer, Role::Doctor, "d1").unwrap();
        flow.apply(SignalKind::Answer, Role::Patient, "p1").unwrap();

        // Patient tries to start a new negotiation mid-call
        let err = flow
            .apply(SignalKind::Offer, Role::Patient, "p1")
            .unwrap_err();
        assert_eq!(err, FlowViolation::OfferByNonInitiator(Role::Patient));

        // So does the doctor, out of turn
        let err = flow
            .apply(SignalKind::Offer, Role::Doctor, "d1")
            .unwrap_err();
        assert_eq!(
            err,
            FlowViolation::OutOfTurn {
                kind: SignalKind::Offer,
                state: CallFlowState::Answered,
            }
        );
        assert_eq!(flow.state(), CallFlowState::Answered);
    }

    #[test]
    fn answer_before_offer_is_rejected() {
        let mut flow = CallFlow::new();
        let err = flow
            .apply(SignalKind::Answer, Role::Patient, "p1")
            .unwrap_err();
        assert_eq!(
            err,
            FlowViolation::OutOfTurn {
                kind: SignalKind::Answer,
                state: CallFlowState::Idle,
            }
        );
    }

    #[test]
    fn leave_of_party_resets_to_idle() {
        let mut flow = CallFlow::new();
        flow.apply(SignalKind::Offer, Role::Doctor, "d1").unwrap();
        flow.apply(SignalKind::Answer, Role::Patient, "p1").unwrap();

        assert!(flow.reset_if_party("p1"));
        assert_eq!(flow.state(), CallFlowState::Idle);
        assert_eq!(flow.initiator_id(), None);
        assert_eq!(flow.responder_id(), None);
    }

    #[test]
    fn leave_of_bystander_does_not_reset() {
        let mut flow = CallFlow::new();
        flow.apply(SignalKind::Offer, Role::Doctor, "d1").unwrap();

        assert!(!flow.reset_if_party("observer-1"));
        assert_eq!(flow.state(), CallFlowState::Offered);
    }

    #[test]
    fn signal_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&SignalKind::ConnectivityCandidate).unwrap(),
            "\"connectivity-candidate\""
        );
        let kind: SignalKind = serde_json::from_str("\"offer\"").unwrap();
        assert_eq!(kind, SignalKind::Offer);
    }
}
