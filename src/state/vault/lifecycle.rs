//! In-memory lifecycle state of the secret backend connection.
//!
//! Only the coordinator mutates it; everyone else reads snapshots.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::encryption::Passphrase;

/// where a connection stands
///
/// ```text
/// Disconnected → Probing → NeedsInit ⇄ NeedsUnseal → Unsealing → Connected
///       ↑__________________________ any failure _____________________|
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Probing,
    NeedsInit,
    NeedsUnseal,
    Unsealing,
    Connected,
}

impl ConnectionState {
    /// the transition table
    ///
    /// `Connected` can only be entered from `Unsealing`, i.e. after a complete
    /// init or unseal sequence.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Probing)
                | (Probing, NeedsInit | NeedsUnseal)
                | (NeedsInit, NeedsUnseal)
                | (NeedsUnseal, NeedsInit)
                | (NeedsInit | NeedsUnseal, Unsealing)
                | (Unsealing, Connected | NeedsInit | NeedsUnseal)
        )
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// states in which the coordinator waits for a passphrase
    pub fn awaits_passphrase(self) -> bool {
        matches!(self, Self::NeedsInit | Self::NeedsUnseal)
    }
}

/// an attempted transition that the table forbids
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal lifecycle transition from {from} to {to}")]
pub struct TransitionError {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// where a candidate passphrase came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PassphraseSource {
    /// submitted by the operator through the bus or REST surface
    Interactive,
    /// the auto-unseal environment variable
    Environment,
    /// kept in memory after an earlier successful open
    LastAccepted,
}

#[derive(Debug)]
pub struct LifecycleState {
    connection_state: ConnectionState,
    changed_at: DateTime<Utc>,

    last_accepted_passphrase: Option<Passphrase>,
    initialization_in_flight: bool,
    interactive_passphrase_accepted: bool,
    auto_init_attempted: bool,
    env_passphrase_rejected: bool,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self {
            connection_state: ConnectionState::Disconnected,
            changed_at: Utc::now(),
            last_accepted_passphrase: None,
            initialization_in_flight: false,
            interactive_passphrase_accepted: false,
            auto_init_attempted: false,
            env_passphrase_rejected: false,
        }
    }
}

/// copyable view of [LifecycleState] without secrets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleSnapshot {
    pub state: ConnectionState,
    pub changed_at: DateTime<Utc>,
    pub initialization_in_flight: bool,
}

impl LifecycleState {
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            state: self.connection_state,
            changed_at: self.changed_at,
            initialization_in_flight: self.initialization_in_flight,
        }
    }

    /// Move to `next`.
    ///
    /// Returns `Ok(false)` if already in `next`.
    pub fn transition(&mut self, next: ConnectionState) -> Result<bool, TransitionError> {
        let from = self.connection_state;
        if from == next {
            return Ok(false);
        }
        if !from.can_transition_to(next) {
            return Err(TransitionError { from, to: next });
        }

        self.connection_state = next;
        self.changed_at = Utc::now();
        Ok(true)
    }

    pub fn initialization_in_flight(&self) -> bool {
        self.initialization_in_flight
    }

    /// claims the initialization slot; false if it is taken
    pub fn try_begin_initialization(&mut self) -> bool {
        if self.initialization_in_flight {
            return false;
        }
        self.initialization_in_flight = true;
        true
    }

    pub fn end_initialization(&mut self) {
        self.initialization_in_flight = false;
    }

    /// the environment credential may drive at most one automatic init
    pub fn try_claim_auto_init(&mut self) -> bool {
        if self.auto_init_attempted || self.initialization_in_flight {
            return false;
        }
        self.auto_init_attempted = true;
        true
    }

    /// Pick the passphrase for an automatic unseal.
    ///
    /// The last accepted passphrase wins. The environment credential is only
    /// offered while no interactive passphrase was ever accepted and it has
    /// not already failed integrity.
    pub fn unseal_candidate(
        &self,
        env_passphrase: Option<&Passphrase>,
    ) -> Option<(Passphrase, PassphraseSource)> {
        if let Some(last) = &self.last_accepted_passphrase {
            return Some((last.clone(), PassphraseSource::LastAccepted));
        }
        if self.interactive_passphrase_accepted || self.env_passphrase_rejected {
            return None;
        }
        env_passphrase.map(|p| (p.clone(), PassphraseSource::Environment))
    }

    pub fn accept_passphrase(&mut self, passphrase: Passphrase, source: PassphraseSource) {
        if source == PassphraseSource::Interactive {
            self.interactive_passphrase_accepted = true;
        }
        self.last_accepted_passphrase = Some(passphrase);
    }

    /// forget a passphrase that failed the envelope integrity check
    pub fn reject_passphrase(&mut self, source: PassphraseSource) {
        match source {
            PassphraseSource::Environment => self.env_passphrase_rejected = true,
            PassphraseSource::LastAccepted => self.last_accepted_passphrase = None,
            PassphraseSource::Interactive => {}
        }
    }

    pub fn clear_accepted_passphrase(&mut self) {
        self.last_accepted_passphrase = None;
    }

    pub fn has_accepted_passphrase(&self) -> bool {
        self.last_accepted_passphrase.is_some()
    }
}
