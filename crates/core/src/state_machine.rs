//! The single source of truth for what the voice bot is doing.
//!
//! Transitions are plain functions over owned state. [`handle`] interprets
//! one routed protocol event and returns the side effects the session has
//! to carry out, so the whole transition table is testable without a
//! transport or an audio device.
//!
//! [`handle`]: ConversationStateMachine::handle

use crate::router::RoutedEvent;
use crate::transcript::{BehindTheScenesEvent, ConversationMessage, LatencyMetrics, TranscriptEntry};
use bytes::Bytes;
use medvoice_protocol::{
    AgentStartedSpeaking, ConversationText, FunctionCallRequest, InvalidFunctionCall, Role, ServerEvent,
};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceBotStatus {
    /// Not connected yet.
    #[default]
    None,
    Sleeping,
    Listening,
    Speaking,
}

impl std::fmt::Display for VoiceBotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            VoiceBotStatus::None => "none",
            VoiceBotStatus::Sleeping => "sleeping",
            VoiceBotStatus::Listening => "listening",
            VoiceBotStatus::Speaking => "speaking",
        };
        f.write_str(label)
    }
}

/// Work the session must do as a result of a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Schedule this agent audio frame.
    PlayAudio(Bytes),
    /// Stop all scheduled agent audio.
    CancelPlayback,
    /// Send exactly one correlated response for this request.
    AnswerFunctionCall(FunctionCallRequest),
    /// Answer a request that could not be typed with an error outcome.
    RejectFunctionCall(InvalidFunctionCall),
}

#[derive(Debug, Default)]
pub struct ConversationStateMachine {
    status: VoiceBotStatus,
    waiting_for_user_voice: bool,
    transcript: Vec<ConversationMessage>,
}

impl ConversationStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> VoiceBotStatus {
        self.status
    }

    /// Set when the bot is put to sleep; cleared only when the user speaks again.
    pub fn is_waiting_for_user_voice(&self) -> bool {
        self.waiting_for_user_voice
    }

    pub fn transcript(&self) -> &[ConversationMessage] {
        &self.transcript
    }

    /// Agent audio is dropped while asleep and until the user speaks after a sleep.
    pub fn accepts_agent_audio(&self) -> bool {
        self.status != VoiceBotStatus::Sleeping && !self.waiting_for_user_voice
    }

    /// Moves to Listening unless asleep. Returns whether the status changed.
    pub fn start_listening(&mut self) -> bool {
        self.transition_unless_sleeping(VoiceBotStatus::Listening)
    }

    /// Moves to Speaking unless asleep. Returns whether the status changed.
    pub fn start_speaking(&mut self) -> bool {
        self.transition_unless_sleeping(VoiceBotStatus::Speaking)
    }

    fn transition_unless_sleeping(&mut self, next: VoiceBotStatus) -> bool {
        if self.status == VoiceBotStatus::Sleeping || self.status == next {
            return false;
        }
        debug!(from = %self.status, to = %next, "Status transition");
        self.status = next;
        true
    }

    /// The user toggled sleep. A bot that was never connected has nothing
    /// to pause, so `None` stays `None`.
    pub fn toggle_sleep(&mut self) -> Vec<Effect> {
        match self.status {
            VoiceBotStatus::None => Vec::new(),
            VoiceBotStatus::Sleeping => {
                info!("Waking up");
                self.status = VoiceBotStatus::Listening;
                Vec::new()
            }
            VoiceBotStatus::Listening | VoiceBotStatus::Speaking => {
                info!("Going to sleep");
                self.status = VoiceBotStatus::Sleeping;
                self.waiting_for_user_voice = true;
                vec![Effect::CancelPlayback]
            }
        }
    }

    /// The first successful connection leaves `None`. When the settings
    /// replay a greeting the agent is about to speak, otherwise it listens.
    pub fn on_connected(&mut self, agent_speaks_first: bool) {
        if self.status != VoiceBotStatus::None {
            return;
        }
        if agent_speaks_first {
            self.status = VoiceBotStatus::Speaking;
            self.waiting_for_user_voice = false;
        } else {
            self.status = VoiceBotStatus::Listening;
        }
        info!(status = %self.status, "Conversation started");
    }

    /// Applies one routed event and returns the effects to carry out.
    pub fn handle(&mut self, event: RoutedEvent) -> Vec<Effect> {
        match event {
            RoutedEvent::AgentAudio(audio) => {
                if self.accepts_agent_audio() {
                    vec![Effect::PlayAudio(audio)]
                } else {
                    debug!(bytes = audio.len(), status = %self.status, "Dropping agent audio");
                    Vec::new()
                }
            }
            RoutedEvent::Server(event) => self.handle_server_event(event),
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent) -> Vec<Effect> {
        match event {
            ServerEvent::ConversationText(text) => {
                self.on_conversation_text(text);
                Vec::new()
            }
            ServerEvent::UserStartedSpeaking => {
                if self.status == VoiceBotStatus::Speaking {
                    self.tag(BehindTheScenesEvent::Interruption);
                }
                self.tag(BehindTheScenesEvent::UserStartedSpeaking);
                self.waiting_for_user_voice = false;
                self.start_listening();
                vec![Effect::CancelPlayback]
            }
            ServerEvent::AgentAudioDone => {
                // All agent audio has arrived; the tail may still be playing.
                self.start_listening();
                Vec::new()
            }
            ServerEvent::AgentStartedSpeaking(latency) => {
                self.tag(BehindTheScenesEvent::AgentStartedSpeaking);
                self.on_agent_started_speaking(latency);
                Vec::new()
            }
            ServerEvent::SettingsApplied => {
                self.tag(BehindTheScenesEvent::SettingsApplied);
                Vec::new()
            }
            ServerEvent::EndOfThought => {
                self.tag(BehindTheScenesEvent::EndOfThought);
                Vec::new()
            }
            ServerEvent::FunctionCallRequest(request) => vec![Effect::AnswerFunctionCall(request)],
            ServerEvent::InvalidFunctionCall(call) => {
                warn!(call_id = %call.function_call_id, reason = %call.reason, "Malformed function call");
                vec![Effect::RejectFunctionCall(call)]
            }
            ServerEvent::Welcome | ServerEvent::AgentThinking => {
                debug!(?event, "Agent notice");
                Vec::new()
            }
            ServerEvent::Error(error) => {
                warn!(message = %error.message, code = ?error.code, "Agent reported an error");
                Vec::new()
            }
        }
    }

    fn on_conversation_text(&mut self, text: ConversationText) {
        if text.role == Role::User && self.status == VoiceBotStatus::Speaking {
            self.tag(BehindTheScenesEvent::Interruption);
        }
        self.tag(BehindTheScenesEvent::ConversationText {
            role: text.role,
            content: text.content.clone(),
        });

        match text.role {
            Role::User => {
                self.start_listening();
                if self.status != VoiceBotStatus::Sleeping {
                    self.append(TranscriptEntry::Conversation {
                        role: Role::User,
                        content: text.content,
                    });
                }
            }
            Role::Assistant => {
                if self.accepts_agent_audio() {
                    self.start_speaking();
                    self.append(TranscriptEntry::Conversation {
                        role: Role::Assistant,
                        content: text.content,
                    });
                }
            }
        }
    }

    fn on_agent_started_speaking(&mut self, latency: AgentStartedSpeaking) {
        let (Some(tts), Some(ttt)) = (latency.tts_latency, latency.ttt_latency) else {
            return;
        };
        if tts == 0.0 || ttt == 0.0 {
            return;
        }
        self.append(TranscriptEntry::Latency(LatencyMetrics {
            tts_latency: tts,
            ttt_latency: ttt,
            total_latency: latency.total_latency,
        }));
    }

    fn tag(&mut self, event: BehindTheScenesEvent) {
        self.append(TranscriptEntry::BehindTheScenes(event));
    }

    fn append(&mut self, entry: TranscriptEntry) {
        self.transcript.push(ConversationMessage::now(entry));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server(text: &str) -> RoutedEvent {
        RoutedEvent::Server(ServerEvent::parse(text).unwrap().unwrap())
    }

    fn in_status(status: VoiceBotStatus) -> ConversationStateMachine {
        let mut machine = ConversationStateMachine::new();
        machine.on_connected(false);
        match status {
            VoiceBotStatus::None => return ConversationStateMachine::new(),
            VoiceBotStatus::Listening => {}
            VoiceBotStatus::Speaking => {
                machine.start_speaking();
            }
            VoiceBotStatus::Sleeping => {
                machine.toggle_sleep();
            }
        }
        assert_eq!(machine.status(), status);
        machine
    }

    fn entries(machine: &ConversationStateMachine) -> Vec<TranscriptEntry> {
        machine.transcript().iter().map(|m| m.entry.clone()).collect()
    }

    fn audio() -> RoutedEvent {
        RoutedEvent::AgentAudio(Bytes::from_static(&[0, 0, 0, 0]))
    }

    #[test]
    fn test_on_connected_leaves_none_once() {
        let mut machine = ConversationStateMachine::new();
        assert_eq!(machine.status(), VoiceBotStatus::None);
        machine.on_connected(true);
        assert_eq!(machine.status(), VoiceBotStatus::Speaking);

        machine.start_listening();
        machine.on_connected(true);
        assert_eq!(machine.status(), VoiceBotStatus::Listening);

        let mut listener = ConversationStateMachine::new();
        listener.on_connected(false);
        assert_eq!(listener.status(), VoiceBotStatus::Listening);
    }

    #[test]
    fn test_toggle_sleep_cycle() {
        let mut machine = ConversationStateMachine::new();
        assert!(machine.toggle_sleep().is_empty());
        assert_eq!(machine.status(), VoiceBotStatus::None);

        let mut machine = in_status(VoiceBotStatus::Speaking);
        assert_eq!(machine.toggle_sleep(), vec![Effect::CancelPlayback]);
        assert_eq!(machine.status(), VoiceBotStatus::Sleeping);
        assert!(machine.is_waiting_for_user_voice());

        assert!(machine.toggle_sleep().is_empty());
        assert_eq!(machine.status(), VoiceBotStatus::Listening);
        // Still waiting until the user actually speaks.
        assert!(machine.is_waiting_for_user_voice());
        assert!(!machine.accepts_agent_audio());
    }

    #[test]
    fn test_sleeping_suppresses_audio_driven_transitions() {
        let mut machine = in_status(VoiceBotStatus::Sleeping);
        assert!(!machine.start_listening());
        assert!(!machine.start_speaking());
        machine.handle(server(r#"{"type":"AgentAudioDone"}"#));
        machine.handle(server(r#"{"role":"assistant","content":"hi"}"#));
        assert_eq!(machine.status(), VoiceBotStatus::Sleeping);
    }

    #[test]
    fn test_agent_audio_gated_by_sleep_and_waiting_flag() {
        let mut machine = in_status(VoiceBotStatus::Listening);
        assert!(matches!(machine.handle(audio()).as_slice(), [Effect::PlayAudio(_)]));

        machine.toggle_sleep();
        assert!(machine.handle(audio()).is_empty());

        machine.toggle_sleep();
        assert_eq!(machine.status(), VoiceBotStatus::Listening);
        assert!(machine.handle(audio()).is_empty());

        machine.handle(server(r#"{"type":"UserStartedSpeaking"}"#));
        assert!(!machine.is_waiting_for_user_voice());
        assert_eq!(machine.handle(audio()).len(), 1);
    }

    #[test]
    fn test_barge_in_while_speaking() {
        let mut machine = in_status(VoiceBotStatus::Speaking);
        let effects = machine.handle(server(r#"{"type":"UserStartedSpeaking"}"#));

        assert_eq!(effects, vec![Effect::CancelPlayback]);
        assert_eq!(machine.status(), VoiceBotStatus::Listening);
        assert_eq!(
            entries(&machine),
            vec![
                TranscriptEntry::BehindTheScenes(BehindTheScenesEvent::Interruption),
                TranscriptEntry::BehindTheScenes(BehindTheScenesEvent::UserStartedSpeaking),
            ]
        );
    }

    #[test]
    fn test_user_started_speaking_while_listening_has_no_interruption() {
        let mut machine = in_status(VoiceBotStatus::Listening);
        let effects = machine.handle(server(r#"{"type":"UserStartedSpeaking"}"#));
        assert_eq!(effects, vec![Effect::CancelPlayback]);
        assert_eq!(
            entries(&machine),
            vec![TranscriptEntry::BehindTheScenes(BehindTheScenesEvent::UserStartedSpeaking)]
        );
    }

    #[test]
    fn test_user_text_while_speaking() {
        let mut machine = in_status(VoiceBotStatus::Speaking);
        machine.handle(server(r#"{"role":"user","content":"hello"}"#));

        assert_eq!(machine.status(), VoiceBotStatus::Listening);
        let entries = entries(&machine);
        assert!(entries.contains(&TranscriptEntry::BehindTheScenes(BehindTheScenesEvent::Interruption)));
        assert_eq!(
            entries.last(),
            Some(&TranscriptEntry::Conversation {
                role: Role::User,
                content: "hello".to_string(),
            })
        );
    }

    #[test]
    fn test_user_text_while_sleeping_is_tagged_but_not_appended() {
        let mut machine = in_status(VoiceBotStatus::Sleeping);
        machine.handle(server(r#"{"type":"ConversationText","role":"user","content":"psst"}"#));
        assert_eq!(machine.status(), VoiceBotStatus::Sleeping);
        assert_eq!(
            entries(&machine),
            vec![TranscriptEntry::BehindTheScenes(BehindTheScenesEvent::ConversationText {
                role: Role::User,
                content: "psst".to_string(),
            })]
        );
    }

    #[test]
    fn test_assistant_text() {
        let mut machine = in_status(VoiceBotStatus::Listening);
        machine.handle(server(r#"{"role":"assistant","content":"Hello there"}"#));
        assert_eq!(machine.status(), VoiceBotStatus::Speaking);
        assert_eq!(
            entries(&machine).last(),
            Some(&TranscriptEntry::Conversation {
                role: Role::Assistant,
                content: "Hello there".to_string(),
            })
        );

        // After a sleep, assistant text is ignored until the user speaks.
        machine.toggle_sleep();
        machine.toggle_sleep();
        let before = machine.transcript().len();
        machine.handle(server(r#"{"role":"assistant","content":"ignored"}"#));
        assert_eq!(machine.status(), VoiceBotStatus::Listening);
        assert_eq!(machine.transcript().len(), before + 1);
    }

    #[test]
    fn test_agent_audio_done_listens() {
        for status in [VoiceBotStatus::Speaking, VoiceBotStatus::Listening] {
            let mut machine = in_status(status);
            assert!(machine.handle(server(r#"{"type":"AgentAudioDone"}"#)).is_empty());
            assert_eq!(machine.status(), VoiceBotStatus::Listening);
        }
    }

    #[test]
    fn test_latency_message() {
        let mut machine = in_status(VoiceBotStatus::Listening);
        machine.handle(server(
            r#"{"type":"AgentStartedSpeaking","tts_latency":0.3,"ttt_latency":0.9,"total_latency":1.2}"#,
        ));
        assert_eq!(
            entries(&machine),
            vec![
                TranscriptEntry::BehindTheScenes(BehindTheScenesEvent::AgentStartedSpeaking),
                TranscriptEntry::Latency(LatencyMetrics {
                    tts_latency: 0.3,
                    ttt_latency: 0.9,
                    total_latency: Some(1.2),
                }),
            ]
        );

        let mut machine = in_status(VoiceBotStatus::Listening);
        machine.handle(server(r#"{"type":"AgentStartedSpeaking","tts_latency":0.3}"#));
        machine.handle(server(r#"{"type":"AgentStartedSpeaking","tts_latency":0,"ttt_latency":0.4}"#));
        assert!(
            entries(&machine)
                .iter()
                .all(|e| !matches!(e, TranscriptEntry::Latency(_)))
        );
    }

    #[test]
    fn test_tag_only_events() {
        let mut machine = in_status(VoiceBotStatus::Speaking);
        machine.handle(server(r#"{"type":"SettingsApplied"}"#));
        machine.handle(server(r#"{"type":"EndOfThought"}"#));
        machine.handle(server(r#"{"type":"Welcome"}"#));
        machine.handle(server(r#"{"type":"Error","message":"boom"}"#));
        assert_eq!(machine.status(), VoiceBotStatus::Speaking);
        assert_eq!(
            entries(&machine),
            vec![
                TranscriptEntry::BehindTheScenes(BehindTheScenesEvent::SettingsApplied),
                TranscriptEntry::BehindTheScenes(BehindTheScenesEvent::EndOfThought),
            ]
        );
    }

    #[test]
    fn test_function_call_request_becomes_effect() {
        let mut machine = in_status(VoiceBotStatus::Listening);
        let request = json!({
            "type": "FunctionCallRequest",
            "function_name": "save_note",
            "function_call_id": "fc-9",
            "input": {}
        });
        let effects = machine.handle(RoutedEvent::Server(
            ServerEvent::from_value(request).unwrap().unwrap(),
        ));
        match effects.as_slice() {
            [Effect::AnswerFunctionCall(call)] => assert_eq!(call.function_call_id, "fc-9"),
            other => panic!("Expected one AnswerFunctionCall, got {:?}", other),
        }
        assert_eq!(machine.status(), VoiceBotStatus::Listening);
    }

    #[test]
    fn test_untyped_function_call_is_rejected() {
        let mut machine = in_status(VoiceBotStatus::Speaking);
        let request = json!({ "type": "FunctionCallRequest", "function_call_id": "fc-10" });
        let effects = machine.handle(RoutedEvent::Server(
            ServerEvent::from_value(request).unwrap().unwrap(),
        ));
        match effects.as_slice() {
            [Effect::RejectFunctionCall(call)] => assert_eq!(call.function_call_id, "fc-10"),
            other => panic!("Expected one RejectFunctionCall, got {:?}", other),
        }
        assert_eq!(machine.status(), VoiceBotStatus::Speaking);
    }
}
