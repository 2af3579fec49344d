//! Connection state machine for a table client.
//!
//! This module provides a pure, side-effect-free state machine for managing
//! connection lifecycle. The state machine takes events as input and produces
//! a new state plus a list of actions to execute.
//!
//! The actual I/O (connecting, sending hellos) is performed by the client
//! node, not by this module. This enables instant unit testing without
//! network mocks.

use std::time::Duration;

/// Connection state machine. No I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected to a server.
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected, hello exchange in progress.
    Handshaking,
    /// Fully connected, entries flowing.
    Connected,
    /// Disconnected, waiting to reconnect.
    Reconnecting {
        /// Number of reconnection attempts so far.
        attempt: u32,
    },
}

impl ConnectionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function. The caller (the client node) is responsible
    /// for executing the returned actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Disconnected
            (Self::Disconnected, Event::ConnectRequested) => {
                (Self::Connecting, vec![Action::Connect])
            }

            // From Connecting
            (Self::Connecting, Event::ConnectSucceeded) => {
                (Self::Handshaking, vec![Action::SendHello])
            }
            (Self::Connecting, Event::ConnectFailed { error }) => (
                Self::Reconnecting { attempt: 1 },
                vec![
                    Action::EmitEvent(LinkEvent::ConnectionFailed { error }),
                    Action::StartReconnectTimer { attempt: 1 },
                ],
            ),

            // From Handshaking
            (Self::Handshaking, Event::HelloAccepted) => (
                Self::Connected,
                vec![Action::EmitEvent(LinkEvent::Connected)],
            ),
            (Self::Handshaking, Event::HelloRejected { error }) => (
                Self::Reconnecting { attempt: 1 },
                vec![
                    Action::Disconnect,
                    Action::EmitEvent(LinkEvent::ConnectionFailed { error }),
                    Action::StartReconnectTimer { attempt: 1 },
                ],
            ),

            // Close requested while a connect or handshake is in flight.
            (Self::Connecting | Self::Handshaking, Event::DisconnectRequested) => {
                (Self::Disconnected, vec![Action::Disconnect])
            }

            // From Connected
            (Self::Connected, Event::ConnectionLost { reason }) => (
                Self::Reconnecting { attempt: 1 },
                vec![
                    Action::EmitEvent(LinkEvent::Disconnected { reason }),
                    Action::StartReconnectTimer { attempt: 1 },
                ],
            ),
            (Self::Connected, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::Disconnect,
                    Action::EmitEvent(LinkEvent::Disconnected {
                        reason: "user requested".into(),
                    }),
                ],
            ),

            // From Reconnecting
            (Self::Reconnecting { attempt: _ }, Event::ReconnectTimer) => {
                (Self::Connecting, vec![Action::Connect])
            }
            (Self::Reconnecting { attempt: _ }, Event::ConnectSucceeded) => {
                (Self::Handshaking, vec![Action::SendHello])
            }
            (Self::Reconnecting { attempt }, Event::ConnectFailed { error }) => {
                let next_attempt = attempt.saturating_add(1);
                (
                    Self::Reconnecting {
                        attempt: next_attempt,
                    },
                    vec![
                        Action::EmitEvent(LinkEvent::ReconnectFailed {
                            attempt: next_attempt,
                            error,
                        }),
                        Action::StartReconnectTimer {
                            attempt: next_attempt,
                        },
                    ],
                )
            }
            (Self::Reconnecting { .. }, Event::DisconnectRequested) => {
                (Self::Disconnected, vec![Action::CancelReconnect])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Handshaking | Self::Reconnecting { .. }
        )
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// User requested connection.
    ConnectRequested,
    /// Transport connection succeeded.
    ConnectSucceeded,
    /// Transport connection failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// The server accepted our hello.
    HelloAccepted,
    /// The server rejected our hello (version mismatch, bad reply).
    HelloRejected {
        /// Error message describing the rejection.
        error: String,
    },
    /// Connection was lost.
    ConnectionLost {
        /// Reason for disconnection.
        reason: String,
    },
    /// User requested disconnect.
    DisconnectRequested,
    /// Reconnect timer fired.
    ReconnectTimer,
}

/// Actions to be executed by the client node.
///
/// These are instructions, not side effects. The node interprets these and
/// performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Initiate transport connection.
    Connect,
    /// Disconnect the transport.
    Disconnect,
    /// Send the client hello to start the handshake.
    SendHello,
    /// Start a timer for the given reconnection attempt. The node computes
    /// the delay from its backoff policy via [`calculate_backoff`].
    StartReconnectTimer {
        /// Which reconnection attempt the timer is for.
        attempt: u32,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Emit an event to the application.
    EmitEvent(LinkEvent),
}

/// Events emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Successfully connected and synchronized.
    Connected,
    /// Connection failed.
    ConnectionFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Disconnected from the server.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// Reconnection attempt failed.
    ReconnectFailed {
        /// Which reconnection attempt this was.
        attempt: u32,
        /// Error message describing the failure.
        error: String,
    },
}

/// Calculate reconnection backoff with jitter.
///
/// Uses exponential backoff with random jitter to prevent thundering herd
/// when many clients reconnect simultaneously after a server restart.
///
/// Formula: min(max, 2^attempt seconds) + random(0..5000ms), where `max`
/// is the node's configured backoff ceiling.
pub fn calculate_backoff(attempt: u32, max: Duration) -> Duration {
    let base = Duration::from_secs(2u64.pow(attempt.min(5))).min(max);

    // Jitter: 0-5000ms random
    let jitter_ms = random_jitter_ms();
    let jitter = Duration::from_millis(jitter_ms);

    base + jitter
}

/// Generate random jitter between 0 and 5000 milliseconds.
fn random_jitter_ms() -> u64 {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");
    let random = u64::from_le_bytes(bytes);
    random % 5001 // 0..5000 inclusive
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let state = ConnectionState::new();
        assert!(matches!(state, ConnectionState::Disconnected));
    }

    #[test]
    fn connect_request_transitions_to_connecting() {
        let state = ConnectionState::Disconnected;
        let (new_state, actions) = state.on_event(Event::ConnectRequested);

        assert!(matches!(new_state, ConnectionState::Connecting));
        assert!(actions.iter().any(|a| matches!(a, Action::Connect)));
    }

    #[test]
    fn connect_success_transitions_to_handshaking() {
        let state = ConnectionState::Connecting;
        let (new_state, actions) = state.on_event(Event::ConnectSucceeded);

        assert!(matches!(new_state, ConnectionState::Handshaking));
        assert!(actions.iter().any(|a| matches!(a, Action::SendHello)));
    }

    #[test]
    fn hello_accepted_transitions_to_connected() {
        let state = ConnectionState::Handshaking;
        let (new_state, actions) = state.on_event(Event::HelloAccepted);

        assert!(matches!(new_state, ConnectionState::Connected));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::EmitEvent(LinkEvent::Connected))));
    }

    #[test]
    fn hello_rejected_triggers_reconnect() {
        let state = ConnectionState::Handshaking;
        let (new_state, actions) = state.on_event(Event::HelloRejected {
            error: "unsupported protocol version 9".into(),
        });

        assert!(matches!(
            new_state,
            ConnectionState::Reconnecting { attempt: 1 }
        ));
        assert!(actions.iter().any(|a| matches!(a, Action::Disconnect)));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::StartReconnectTimer { .. })));
    }

    #[test]
    fn connect_failure_triggers_reconnect() {
        let state = ConnectionState::Connecting;
        let (new_state, actions) = state.on_event(Event::ConnectFailed {
            error: "timeout".into(),
        });

        assert!(matches!(
            new_state,
            ConnectionState::Reconnecting { attempt: 1 }
        ));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::StartReconnectTimer { .. })));
    }

    #[test]
    fn reconnect_timer_transitions_to_connecting() {
        let state = ConnectionState::Reconnecting { attempt: 1 };
        let (new_state, actions) = state.on_event(Event::ReconnectTimer);

        assert!(matches!(new_state, ConnectionState::Connecting));
        assert!(actions.iter().any(|a| matches!(a, Action::Connect)));
    }

    #[test]
    fn reconnect_failure_increments_attempt() {
        let state = ConnectionState::Reconnecting { attempt: 2 };
        let (new_state, actions) = state.on_event(Event::ConnectFailed {
            error: "timeout".into(),
        });

        assert!(matches!(
            new_state,
            ConnectionState::Reconnecting { attempt: 3 }
        ));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::StartReconnectTimer { .. })));
    }

    #[test]
    fn reconnect_backoff_increases_with_attempt() {
        // Attempt 1: base = 2s, attempt 3: base = 8s. Jitter adds up to 5s
        // on top, so only the lower bounds are stable.
        let max = Duration::from_secs(30);
        let delay1 = calculate_backoff(1, max);
        let delay3 = calculate_backoff(3, max);

        assert!(delay1 >= Duration::from_secs(2));
        assert!(delay3 >= Duration::from_secs(8));
    }

    #[test]
    fn reconnect_jitter_creates_variance() {
        let mut delays: Vec<Duration> = Vec::new();
        for _ in 0..20 {
            delays.push(calculate_backoff(3, Duration::from_secs(30)));
        }

        // Probabilistic: 20 samples over 5001 possible jitter values.
        let min = delays.iter().min().unwrap();
        let max = delays.iter().max().unwrap();
        assert!(
            max.as_millis() - min.as_millis() >= 100,
            "Expected jitter variance, got min={:?} max={:?}",
            min,
            max
        );
    }

    #[test]
    fn reconnect_delay_capped_at_max_plus_jitter() {
        let delay = calculate_backoff(10, Duration::from_secs(30));
        assert!(
            delay <= Duration::from_secs(35),
            "Reconnect delay must be capped at ~35s (30s base + 5s jitter), got {:?}",
            delay
        );
    }

    #[test]
    fn backoff_ceiling_is_configurable() {
        let delay = calculate_backoff(10, Duration::from_secs(2));
        assert!(delay >= Duration::from_secs(2));
        assert!(
            delay <= Duration::from_secs(7),
            "Base must be clamped to the 2s ceiling (plus 5s jitter), got {:?}",
            delay
        );
    }

    #[test]
    fn successful_connect_from_reconnecting_works() {
        let state = ConnectionState::Reconnecting { attempt: 5 };
        let (new_state, _) = state.on_event(Event::ConnectSucceeded);

        assert!(matches!(new_state, ConnectionState::Handshaking));
    }

    #[test]
    fn full_reconnection_flow() {
        let state = ConnectionState::Reconnecting { attempt: 3 };

        // Timer fires -> Connecting
        let (state, _) = state.on_event(Event::ReconnectTimer);
        assert!(matches!(state, ConnectionState::Connecting));

        // Connect succeeds -> Handshaking
        let (state, _) = state.on_event(Event::ConnectSucceeded);
        assert!(matches!(state, ConnectionState::Handshaking));

        // Hello accepted -> Connected
        let (state, _) = state.on_event(Event::HelloAccepted);
        assert!(matches!(state, ConnectionState::Connected));
    }

    #[test]
    fn disconnect_request_from_connected() {
        let state = ConnectionState::Connected;
        let (new_state, actions) = state.on_event(Event::DisconnectRequested);

        assert!(matches!(new_state, ConnectionState::Disconnected));
        assert!(actions.iter().any(|a| matches!(a, Action::Disconnect)));
    }

    #[test]
    fn disconnect_request_mid_connect_goes_disconnected() {
        for state in [ConnectionState::Connecting, ConnectionState::Handshaking] {
            let (new_state, actions) = state.on_event(Event::DisconnectRequested);
            assert!(matches!(new_state, ConnectionState::Disconnected));
            assert!(actions.iter().any(|a| matches!(a, Action::Disconnect)));
        }
    }

    #[test]
    fn reconnect_timer_action_carries_the_attempt() {
        let state = ConnectionState::Reconnecting { attempt: 2 };
        let (_, actions) = state.on_event(Event::ConnectFailed {
            error: "timeout".into(),
        });

        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::StartReconnectTimer { attempt: 3 })));
    }

    #[test]
    fn disconnect_request_from_reconnecting_cancels() {
        let state = ConnectionState::Reconnecting { attempt: 2 };
        let (new_state, actions) = state.on_event(Event::DisconnectRequested);

        assert!(matches!(new_state, ConnectionState::Disconnected));
        assert!(actions.iter().any(|a| matches!(a, Action::CancelReconnect)));
    }

    #[test]
    fn unexpected_disconnect_triggers_reconnect() {
        let state = ConnectionState::Connected;
        let (new_state, actions) = state.on_event(Event::ConnectionLost {
            reason: "connection lost".into(),
        });

        assert!(matches!(
            new_state,
            ConnectionState::Reconnecting { attempt: 1 }
        ));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::EmitEvent(LinkEvent::Disconnected { .. })
        )));
    }

    #[test]
    fn is_connected_helper() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Handshaking.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Reconnecting { attempt: 1 }.is_connected());
    }

    #[test]
    fn is_connecting_helper() {
        assert!(!ConnectionState::Disconnected.is_connecting());
        assert!(ConnectionState::Connecting.is_connecting());
        assert!(ConnectionState::Handshaking.is_connecting());
        assert!(!ConnectionState::Connected.is_connecting());
        assert!(ConnectionState::Reconnecting { attempt: 1 }.is_connecting());
    }

    #[test]
    fn events_while_disconnected_are_ignored() {
        let state = ConnectionState::Disconnected;
        let (new_state, actions) = state.on_event(Event::ReconnectTimer);
        assert!(matches!(new_state, ConnectionState::Disconnected));
        assert!(actions.is_empty());
    }
}
