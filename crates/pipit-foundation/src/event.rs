use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;

/// Structured diagnostics surfaced to the control layer. The core never
/// writes to a terminal or log file itself; these events travel over an
/// asynchronous message channel and the control layer decides how to
/// render them (typically as JSON on the command socket).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DiagnosticEvent {
    /// A recoverable device problem (descriptor query, buffer commit, ...).
    DeviceProblem { device: String, detail: String },
    /// The device went quiet for too long and was stopped.
    DeviceStalled { device: String, detail: String },
}

impl DiagnosticEvent {
    pub fn device(&self) -> &str {
        match self {
            DiagnosticEvent::DeviceProblem { device, .. } => device,
            DiagnosticEvent::DeviceStalled { device, .. } => device,
        }
    }
}

/// Sending half of the diagnostic channel. Cheap to clone; emission never
/// blocks and never fails the caller, even with the receiver gone.
#[derive(Debug, Clone)]
pub struct DiagnosticSender {
    tx: Sender<DiagnosticEvent>,
}

impl DiagnosticSender {
    pub fn emit(&self, event: DiagnosticEvent) {
        tracing::debug!(?event, "diagnostic event");
        if self.tx.send(event).is_err() {
            tracing::warn!("diagnostic channel closed; event dropped");
        }
    }
}

/// Create the diagnostic channel. The receiver belongs to the control
/// layer; the sender is cloned into every minder and runner.
pub fn diagnostic_channel() -> (DiagnosticSender, Receiver<DiagnosticEvent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (DiagnosticSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_round_trip_the_channel() {
        let (tx, rx) = diagnostic_channel();
        tx.emit(DiagnosticEvent::DeviceStalled {
            device: "fcd0".into(),
            detail: "no data received for 11.0 s".into(),
        });
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.device(), "fcd0");
    }

    #[test]
    fn emit_survives_a_dropped_receiver() {
        let (tx, rx) = diagnostic_channel();
        drop(rx);
        tx.emit(DiagnosticEvent::DeviceProblem {
            device: "fcd0".into(),
            detail: "commit failed".into(),
        });
    }

    #[test]
    fn serializes_with_event_tag() {
        let ev = DiagnosticEvent::DeviceProblem {
            device: "fcd0".into(),
            detail: "descriptor query failed".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "deviceProblem");
        assert_eq!(json["device"], "fcd0");
    }
}
