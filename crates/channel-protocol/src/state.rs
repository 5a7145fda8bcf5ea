//! Channel lifecycle

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, ProtocolResult};

/// Channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    /// Opening the raw transport
    Connecting,
    /// Exchanging public keys
    Handshaking,
    /// Both pipelines running
    Open,
    /// One side failed or was shut down, teardown pending
    Closing,
    /// Pipelines stopped and transport released
    Closed,
}

impl ChannelState {
    /// Whether moving from `self` to `next` is a legal step
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;

        matches!(
            (self, next),
            (Connecting, Handshaking)
                | (Connecting, Closed)
                | (Handshaking, Open)
                | (Handshaking, Closed)
                | (Open, Closing)
                | (Open, Closed)
                | (Closing, Closed)
        )
    }

    /// Move to `next`, rejecting illegal steps
    pub fn transition(self, next: ChannelState) -> ProtocolResult<ChannelState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ProtocolError::InvalidStateTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_closed(self) -> bool {
        self == ChannelState::Closed
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChannelState::Connecting => "connecting",
            ChannelState::Handshaking => "handshaking",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Closed => "closed",
        };
        f.write_str(name)
    }
}
