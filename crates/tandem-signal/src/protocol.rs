//! Signaling wire protocol.
//!
//! JSON text frames tagged on `type`. The `offer`, `answer` and
//! `ice-candidate` bodies belong to the two peers; the server only moves
//! them across and adds `from`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tandem_common::SessionId;

/// Body of a relayed signaling message, minus its `type`.
pub type Payload = Map<String, Value>;

/// The three message kinds the server forwards between partners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    #[serde(rename = "offer")]
    Offer,

    #[serde(rename = "answer")]
    Answer,

    #[serde(rename = "ice-candidate")]
    IceCandidate,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
        }
    }
}

/// A signaling message received from one side of a pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub payload: Payload,
}

impl Signal {
    pub fn new(kind: SignalKind, payload: Payload) -> Self {
        Self { kind, payload }
    }
}

/// Messages received from clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "offer")]
    Offer(Payload),

    #[serde(rename = "answer")]
    Answer(Payload),

    #[serde(rename = "ice-candidate")]
    IceCandidate(Payload),

    #[serde(rename = "next")]
    Next,

    /// Any other `type`. Frames that are not JSON objects with a string
    /// `type` are mapped here by [`ClientMessage::parse`] as well.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Unparseable client message");
                ClientMessage::Unknown
            }
        }
    }

    /// Split out the relayable part, if this is a signaling message.
    pub fn into_signal(self) -> Option<Signal> {
        match self {
            ClientMessage::Offer(payload) => Some(Signal::new(SignalKind::Offer, payload)),
            ClientMessage::Answer(payload) => Some(Signal::new(SignalKind::Answer, payload)),
            ClientMessage::IceCandidate(payload) => {
                Some(Signal::new(SignalKind::IceCandidate, payload))
            }
            ClientMessage::Next | ClientMessage::Unknown => None,
        }
    }
}

/// A signal as delivered to the partner: original fields plus `from`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayedSignal {
    #[serde(flatten)]
    pub payload: Payload,
    pub from: SessionId,
}

/// Messages the server sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected {
        user_id: SessionId,
        online_count: usize,
    },

    #[serde(rename = "waiting", rename_all = "camelCase")]
    Waiting { online_count: usize },

    #[serde(rename = "matched", rename_all = "camelCase")]
    Matched {
        partner_id: SessionId,
        should_create_offer: bool,
        online_count: usize,
    },

    #[serde(rename = "partner-disconnected", rename_all = "camelCase")]
    PartnerDisconnected { online_count: usize },

    #[serde(rename = "partner-next", rename_all = "camelCase")]
    PartnerNext { online_count: usize },

    #[serde(rename = "offer")]
    Offer(RelayedSignal),

    #[serde(rename = "answer")]
    Answer(RelayedSignal),

    #[serde(rename = "ice-candidate")]
    IceCandidate(RelayedSignal),
}

impl ServerMessage {
    /// Wrap a signal for delivery to the sender's partner.
    ///
    /// `type` and `from` keys inside the payload are replaced: the tag comes
    /// from `signal.kind` and `from` is always the real sender.
    pub fn relayed(from: &SessionId, signal: Signal) -> Self {
        let Signal { kind, mut payload } = signal;
        payload.remove("type");
        payload.remove("from");
        let relayed = RelayedSignal {
            payload,
            from: from.clone(),
        };
        match kind {
            SignalKind::Offer => ServerMessage::Offer(relayed),
            SignalKind::Answer => ServerMessage::Answer(relayed),
            SignalKind::IceCandidate => ServerMessage::IceCandidate(relayed),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::Waiting { .. } => "waiting",
            ServerMessage::Matched { .. } => "matched",
            ServerMessage::PartnerDisconnected { .. } => "partner-disconnected",
            ServerMessage::PartnerNext { .. } => "partner-next",
            ServerMessage::Offer(_) => SignalKind::Offer.as_str(),
            ServerMessage::Answer(_) => SignalKind::Answer.as_str(),
            ServerMessage::IceCandidate(_) => SignalKind::IceCandidate.as_str(),
        }
    }

    pub fn to_text(&self) -> tandem_common::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
