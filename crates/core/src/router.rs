//! Classifies inbound transport frames.

use bytes::Bytes;
use medvoice_protocol::ServerEvent;
use tracing::{debug, warn};

/// One frame as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Binary(Bytes),
    Text(String),
}

/// A frame the conversation state machine has to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedEvent {
    AgentAudio(Bytes),
    Server(ServerEvent),
}

/// Turns raw frames into [`RoutedEvent`]s. Binary frames are agent audio;
/// text frames are JSON control events. Malformed text is logged and
/// dropped, unknown event kinds are skipped.
#[derive(Debug, Default)]
pub struct ProtocolEventRouter {
    malformed: u64,
    ignored: u64,
}

impl ProtocolEventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&mut self, frame: InboundFrame) -> Option<RoutedEvent> {
        match frame {
            InboundFrame::Binary(audio) => Some(RoutedEvent::AgentAudio(audio)),
            InboundFrame::Text(text) => match ServerEvent::parse(&text) {
                Ok(Some(event)) => Some(RoutedEvent::Server(event)),
                Ok(None) => {
                    self.ignored += 1;
                    debug!(frame = %text, "Ignoring unrecognized control event");
                    None
                }
                Err(e) => {
                    self.malformed += 1;
                    warn!(error = %e, frame = %text, "Dropping malformed control frame");
                    None
                }
            },
        }
    }

    /// Text frames dropped because they could not be parsed.
    pub fn malformed_frames(&self) -> u64 {
        self.malformed
    }

    /// Well-formed frames of an event kind this client does not handle.
    pub fn ignored_frames(&self) -> u64 {
        self.ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_frames_are_audio() {
        let mut router = ProtocolEventRouter::new();
        let audio = Bytes::from_static(&[1, 2, 3, 4]);
        assert_eq!(
            router.route(InboundFrame::Binary(audio.clone())),
            Some(RoutedEvent::AgentAudio(audio))
        );
    }

    #[test]
    fn test_text_frames_are_events() {
        let mut router = ProtocolEventRouter::new();
        assert_eq!(
            router.route(InboundFrame::Text(r#"{"type":"AgentAudioDone"}"#.to_string())),
            Some(RoutedEvent::Server(ServerEvent::AgentAudioDone))
        );
    }

    #[test]
    fn test_function_call_without_name_is_still_routed() {
        let mut router = ProtocolEventRouter::new();
        let routed = router.route(InboundFrame::Text(
            r#"{"type":"FunctionCallRequest","function_call_id":"fc-1","input":{}}"#.to_string(),
        ));
        match routed {
            Some(RoutedEvent::Server(ServerEvent::InvalidFunctionCall(call))) => {
                assert_eq!(call.function_call_id, "fc-1");
            }
            other => panic!("Expected InvalidFunctionCall, got {:?}", other),
        }
        assert_eq!(router.malformed_frames(), 0);
    }

    #[test]
    fn test_malformed_and_unknown_frames_are_dropped() {
        let mut router = ProtocolEventRouter::new();
        assert_eq!(router.route(InboundFrame::Text("{oops".to_string())), None);
        assert_eq!(router.route(InboundFrame::Text("[1,2]".to_string())), None);
        assert_eq!(
            router.route(InboundFrame::Text(r#"{"type":"History"}"#.to_string())),
            None
        );
        assert_eq!(router.malformed_frames(), 2);
        assert_eq!(router.ignored_frames(), 1);
    }
}
