//! Connection state machine for paired robots
//!
//! Pure and synchronous: `ConnectionMachine::apply(input)` either moves to
//! the next status or reports an illegal input. No IO, no locking. The
//! orchestrator drives it around host calls.

use std::fmt;

use robodock_protocol::ConnectionStatus;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionInput {
    /// Pair/connect request issued
    Connect,
    /// Activity start request issued
    Start,
    /// Activity stop request issued
    Stop,
    /// Disconnect request issued
    Disconnect,
    /// Host acknowledged the pending request
    Ack,
    /// Pending request failed
    Fail,
}

impl fmt::Display for ConnectionInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionInput::Connect => "connect",
            ConnectionInput::Start => "start",
            ConnectionInput::Stop => "stop",
            ConnectionInput::Disconnect => "disconnect",
            ConnectionInput::Ack => "ack",
            ConnectionInput::Fail => "fail",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {input} while {from}")]
    Illegal {
        from: ConnectionStatus,
        input: ConnectionInput,
    },
}

// ---------------------------------------------------------------------------
// ConnectionMachine
// ---------------------------------------------------------------------------

/// Current status plus the last known-good status to fall back to if the
/// pending request fails. Transient statuses are never terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionMachine {
    status: ConnectionStatus,
    rollback: ConnectionStatus,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::None,
            rollback: ConnectionStatus::None,
        }
    }
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a machine from a stored status. Transient statuses fall back
    /// to the state they were entered from in the normal flow.
    pub fn from_status(status: ConnectionStatus) -> Self {
        let rollback = match status {
            ConnectionStatus::Connecting => ConnectionStatus::None,
            ConnectionStatus::Starting => ConnectionStatus::Connected,
            ConnectionStatus::Stopping => ConnectionStatus::Started,
            ConnectionStatus::Disconnecting => ConnectionStatus::Connected,
            stable => stable,
        };
        Self { status, rollback }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Where a failure in the current status lands
    pub fn rollback_target(&self) -> ConnectionStatus {
        self.rollback
    }

    /// Apply one input. On error the machine is left untouched.
    pub fn apply(&mut self, input: ConnectionInput) -> Result<ConnectionStatus, TransitionError> {
        use ConnectionInput as I;
        use ConnectionStatus as S;

        let next = match (self.status, input) {
            (S::None, I::Connect) => S::Connecting,
            (S::Connected, I::Start) => S::Starting,
            (S::Started, I::Stop) => S::Stopping,
            (S::Connected | S::Started, I::Disconnect) => S::Disconnecting,

            (S::Connecting, I::Ack) => S::Connected,
            (S::Starting, I::Ack) => S::Started,
            (S::Stopping, I::Ack) => S::Connected,
            (S::Disconnecting, I::Ack) => S::None,

            (transient, I::Fail) if transient.is_transient() => self.rollback,

            (from, input) => return Err(TransitionError::Illegal { from, input }),
        };

        if next.is_transient() {
            // Entering a transient status: remember where we came from.
            self.rollback = self.status;
        } else {
            self.rollback = next;
        }
        self.status = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionInput as I;
    use ConnectionStatus as S;

    fn run(inputs: &[ConnectionInput]) -> ConnectionMachine {
        let mut machine = ConnectionMachine::new();
        for input in inputs {
            machine.apply(*input).unwrap();
        }
        machine
    }

    #[test]
    fn full_lifecycle() {
        let mut machine = ConnectionMachine::new();
        let steps = [
            (I::Connect, S::Connecting),
            (I::Ack, S::Connected),
            (I::Start, S::Starting),
            (I::Ack, S::Started),
            (I::Stop, S::Stopping),
            (I::Ack, S::Connected),
            (I::Disconnect, S::Disconnecting),
            (I::Ack, S::None),
        ];
        for (input, expected) in steps {
            assert_eq!(machine.apply(input), Ok(expected), "after {input}");
        }
    }

    #[test]
    fn failures_roll_back_to_last_good_state() {
        let mut connecting = run(&[I::Connect]);
        assert_eq!(connecting.apply(I::Fail), Ok(S::None));

        let mut starting = run(&[I::Connect, I::Ack, I::Start]);
        assert_eq!(starting.apply(I::Fail), Ok(S::Connected));

        let mut stopping = run(&[I::Connect, I::Ack, I::Start, I::Ack, I::Stop]);
        assert_eq!(stopping.apply(I::Fail), Ok(S::Started));
    }

    #[test]
    fn disconnect_failure_returns_to_origin() {
        let mut from_started = run(&[I::Connect, I::Ack, I::Start, I::Ack, I::Disconnect]);
        assert_eq!(from_started.rollback_target(), S::Started);
        assert_eq!(from_started.apply(I::Fail), Ok(S::Started));

        let mut from_connected = run(&[I::Connect, I::Ack, I::Disconnect]);
        assert_eq!(from_connected.apply(I::Fail), Ok(S::Connected));
    }

    #[test]
    fn activity_requires_connection() {
        let mut machine = ConnectionMachine::new();
        assert_eq!(
            machine.apply(I::Start),
            Err(TransitionError::Illegal {
                from: S::None,
                input: I::Start,
            })
        );
        assert_eq!(machine.status(), S::None);

        let mut connecting = run(&[I::Connect]);
        assert!(connecting.apply(I::Start).is_err());
        assert_eq!(connecting.status(), S::Connecting);
    }

    #[test]
    fn stable_states_ignore_stray_acks_and_failures() {
        let mut connected = run(&[I::Connect, I::Ack]);
        assert!(connected.apply(I::Ack).is_err());
        assert!(connected.apply(I::Fail).is_err());
        assert_eq!(connected.status(), S::Connected);
    }

    #[test]
    fn restored_transient_states_are_not_stuck() {
        for (status, target) in [
            (S::Connecting, S::None),
            (S::Starting, S::Connected),
            (S::Stopping, S::Started),
            (S::Disconnecting, S::Connected),
        ] {
            let mut machine = ConnectionMachine::from_status(status);
            assert_eq!(machine.apply(I::Fail), Ok(target), "from {status}");
        }
    }
}
