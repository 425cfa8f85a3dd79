//! Progress events and the single-consumer publisher that carries them
//!
//! The publisher sits on a bounded channel sized to what the transport needs
//! (one event by default), so a slow observer stalls the orchestrator instead
//! of letting it race ahead of delivery.

use duet_core::{Agent, DuetError, Result, SandboxResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// What an agent is doing when it starts a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Planning,
    Coding,
    Running,
    Reviewing,
    Diagnosing,
}

/// One entry of a run's audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    AgentStart {
        agent: Agent,
        action: Activity,
    },
    /// Short progress note, zero or more per step
    AgentThinking {
        agent: Agent,
        text: String,
    },
    /// Full text of a completed model turn
    AgentMessage {
        agent: Agent,
        text: String,
    },
    Round {
        number: u32,
    },
    /// Either artifact changed
    CodeUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tests: Option<String>,
    },
    TestRun {
        result: SandboxResult,
    },
    /// Terminal event; nothing may follow it
    Complete {
        #[serde(rename = "finalCode")]
        final_code: String,
        #[serde(
            rename = "finalTests",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        final_tests: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan: Option<String>,
    },
    Error {
        text: String,
    },
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Complete { .. })
    }

    /// Wire name of the variant, as used in the `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::AgentStart { .. } => "agent_start",
            AgentEvent::AgentThinking { .. } => "agent_thinking",
            AgentEvent::AgentMessage { .. } => "agent_message",
            AgentEvent::Round { .. } => "round",
            AgentEvent::CodeUpdate { .. } => "code_update",
            AgentEvent::TestRun { .. } => "test_run",
            AgentEvent::Complete { .. } => "complete",
            AgentEvent::Error { .. } => "error",
        }
    }
}

/// Sending half of a run's event stream
pub struct EventPublisher {
    tx: mpsc::Sender<AgentEvent>,
    finished: AtomicBool,
}

/// Receiving half of a run's event stream; there is exactly one per run
pub struct EventStream {
    rx: mpsc::Receiver<AgentEvent>,
}

impl EventPublisher {
    /// Create a connected publisher/stream pair.
    ///
    /// `buffer` is clamped to at least 1, the smallest capacity a bounded
    /// channel supports.
    pub fn channel(buffer: usize) -> (EventPublisher, EventStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            EventPublisher {
                tx,
                finished: AtomicBool::new(false),
            },
            EventStream { rx },
        )
    }

    /// Deliver one event, waiting for room in the transport.
    ///
    /// Fails with `RunFinished` once a terminal event went out, and with
    /// `ObserverGone` when the stream was dropped.
    pub async fn emit(&self, event: AgentEvent) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(DuetError::RunFinished);
        }
        let terminal = event.is_terminal();
        debug!(kind = event.kind(), "emit");
        self.tx
            .send(event)
            .await
            .map_err(|_| DuetError::ObserverGone)?;
        if terminal {
            self.finished.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Deliver without waiting; returns whether the event was accepted.
    pub fn try_emit(&self, event: AgentEvent) -> bool {
        if self.finished.load(Ordering::SeqCst) {
            return false;
        }
        let terminal = event.is_terminal();
        let sent = self.tx.try_send(event).is_ok();
        if sent && terminal {
            self.finished.store(true, Ordering::SeqCst);
        }
        sent
    }

    /// Resolves once the observer has dropped its stream
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// True once the terminal event was delivered
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

impl EventStream {
    /// Next event, or `None` once the publisher is gone
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        self.rx.recv().await
    }

    /// Drain every remaining event until the publisher is dropped
    pub async fn collect(mut self) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }

    pub fn into_stream(self) -> ReceiverStream<AgentEvent> {
        ReceiverStream::new(self.rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(code: &str) -> AgentEvent {
        AgentEvent::Complete {
            final_code: code.to_string(),
            final_tests: None,
            plan: None,
        }
    }

    #[test]
    fn test_wire_format() {
        let event = AgentEvent::AgentStart {
            agent: Agent::Boss,
            action: Activity::Planning,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "agent_start", "agent": "boss", "action": "planning"})
        );

        let json = serde_json::to_value(AgentEvent::Complete {
            final_code: "x = 1".to_string(),
            final_tests: Some("assert x == 1".to_string()),
            plan: None,
        })
        .unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["finalCode"], "x = 1");
        assert_eq!(json["finalTests"], "assert x == 1");
        assert!(json.get("plan").is_none());

        let json = serde_json::to_value(AgentEvent::CodeUpdate {
            code: None,
            tests: Some("t".to_string()),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "code_update", "tests": "t"}));
    }

    #[test]
    fn test_kind_matches_tag() {
        let events = [
            AgentEvent::Round { number: 1 },
            AgentEvent::Error {
                text: "x".to_string(),
            },
            AgentEvent::TestRun {
                result: SandboxResult::from_counts(1, 0, ""),
            },
            complete(""),
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.kind());
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (publisher, stream) = EventPublisher::channel(4);
        let producer = tokio::spawn(async move {
            for number in 1..=3 {
                publisher.emit(AgentEvent::Round { number }).await.unwrap();
            }
            publisher.emit(complete("done")).await.unwrap();
        });

        let events = stream.collect().await;
        producer.await.unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], AgentEvent::Round { number: 1 });
        assert_eq!(events[2], AgentEvent::Round { number: 3 });
        assert!(events[3].is_terminal());
    }

    #[tokio::test]
    async fn test_nothing_follows_complete() {
        let (publisher, mut stream) = EventPublisher::channel(4);
        publisher.emit(complete("")).await.unwrap();
        assert!(publisher.is_finished());

        let err = publisher
            .emit(AgentEvent::Error {
                text: "late".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DuetError::RunFinished));
        assert!(!publisher.try_emit(AgentEvent::Round { number: 1 }));

        drop(publisher);
        assert!(stream.recv().await.unwrap().is_terminal());
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_observer_is_reported() {
        let (publisher, stream) = EventPublisher::channel(1);
        drop(stream);
        assert!(publisher.is_closed());
        publisher.closed().await;

        let err = publisher
            .emit(AgentEvent::Round { number: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, DuetError::ObserverGone));
    }

    #[tokio::test]
    async fn test_backpressure_stalls_emit() {
        let (publisher, mut stream) = EventPublisher::channel(1);
        publisher.emit(AgentEvent::Round { number: 1 }).await.unwrap();

        // Buffer is full until the observer reads
        let stalled = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            publisher.emit(AgentEvent::Round { number: 2 }),
        )
        .await;
        assert!(stalled.is_err());

        assert_eq!(stream.recv().await, Some(AgentEvent::Round { number: 1 }));
        publisher.emit(AgentEvent::Round { number: 2 }).await.unwrap();
        assert_eq!(stream.recv().await, Some(AgentEvent::Round { number: 2 }));
    }
}
