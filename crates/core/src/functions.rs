//! Agent function calls and the guarantee that each one is answered once.

use async_trait::async_trait;
use medvoice_protocol::{ClientMessage, FunctionCallRequest, FunctionDefinition, FunctionOutput};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

/// A feature module that executes the functions the agent may call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FunctionCallHandler: Send + Sync {
    /// Functions declared to the agent in the session settings.
    fn definitions(&self) -> Vec<FunctionDefinition>;

    /// Runs `name` with `input`. Unknown names must yield [`FunctionOutput::Error`].
    async fn call(&self, name: &str, input: &Value) -> FunctionOutput;
}

/// A handler that declares nothing and rejects every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFunctions;

#[async_trait]
impl FunctionCallHandler for NoFunctions {
    fn definitions(&self) -> Vec<FunctionDefinition> {
        Vec::new()
    }

    async fn call(&self, _name: &str, _input: &Value) -> FunctionOutput {
        FunctionOutput::Error
    }
}

/// Remembers the outcome of every call id answered on the current connection.
///
/// The agent may redeliver a request; replaying the recorded outcome keeps
/// one id from producing two different answers or running the handler twice.
#[derive(Debug, Default)]
pub struct FunctionCallLedger {
    answered: HashMap<String, FunctionOutput>,
}

impl FunctionCallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `request` and builds its correlated response.
    pub async fn answer(
        &mut self,
        request: &FunctionCallRequest,
        handler: &dyn FunctionCallHandler,
    ) -> ClientMessage {
        let output = match self.answered.get(&request.function_call_id) {
            Some(output) => {
                warn!(
                    call_id = %request.function_call_id,
                    function = %request.function_name,
                    "Repeated function call, replaying recorded outcome"
                );
                *output
            }
            None => {
                let output = handler
                    .call(&request.function_name, &request.input)
                    .await;
                info!(
                    call_id = %request.function_call_id,
                    function = %request.function_name,
                    ?output,
                    "Function call resolved"
                );
                self.answered
                    .insert(request.function_call_id.clone(), output);
                output
            }
        };
        ClientMessage::FunctionCallResponse {
            function_call_id: request.function_call_id.clone(),
            output,
        }
    }

    /// Answers a request that could not be typed. It gets an error outcome,
    /// or the recorded one if the id was already answered.
    pub fn reject(&mut self, function_call_id: &str) -> ClientMessage {
        let output = *self
            .answered
            .entry(function_call_id.to_string())
            .or_insert(FunctionOutput::Error);
        ClientMessage::FunctionCallResponse {
            function_call_id: function_call_id.to_string(),
            output,
        }
    }

    /// Records an outcome decided outside any handler, e.g. by the user.
    /// Returns the response to send, or `None` if the id was already answered.
    pub fn record(&mut self, function_call_id: &str, output: FunctionOutput) -> Option<ClientMessage> {
        if let Some(recorded) = self.answered.get(function_call_id) {
            warn!(
                call_id = %function_call_id,
                ?recorded,
                "Function call already answered, dropping external outcome"
            );
            return None;
        }
        self.answered.insert(function_call_id.to_string(), output);
        Some(ClientMessage::FunctionCallResponse {
            function_call_id: function_call_id.to_string(),
            output,
        })
    }

    pub fn answered(&self) -> usize {
        self.answered.len()
    }

    /// Forgets recorded outcomes. Call ids are only unique per connection.
    pub fn clear(&mut self) {
        self.answered.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use serde_json::json;

    fn request(name: &str, id: &str) -> FunctionCallRequest {
        FunctionCallRequest {
            function_name: name.to_string(),
            function_call_id: id.to_string(),
            input: json!({ "name": "Ada" }),
        }
    }

    #[tokio::test]
    async fn test_answer_correlates_call_id() {
        let mut handler = MockFunctionCallHandler::new();
        handler
            .expect_call()
            .with(eq("set_patient_name"), eq(json!({ "name": "Ada" })))
            .times(1)
            .return_const(FunctionOutput::Success);

        let mut ledger = FunctionCallLedger::new();
        let response = ledger.answer(&request("set_patient_name", "fc-1"), &handler).await;
        assert_eq!(
            response,
            ClientMessage::FunctionCallResponse {
                function_call_id: "fc-1".to_string(),
                output: FunctionOutput::Success,
            }
        );
    }

    #[tokio::test]
    async fn test_repeated_id_is_answered_from_ledger() {
        let mut handler = MockFunctionCallHandler::new();
        handler
            .expect_call()
            .times(1)
            .return_const(FunctionOutput::Error);

        let mut ledger = FunctionCallLedger::new();
        let first = ledger.answer(&request("unknown_fn", "fc-2"), &handler).await;
        let second = ledger.answer(&request("unknown_fn", "fc-2"), &handler).await;
        assert_eq!(first, second);
        assert_eq!(ledger.answered(), 1);

        ledger.clear();
        assert_eq!(ledger.answered(), 0);
    }

    #[tokio::test]
    async fn test_external_outcome_only_for_unanswered_ids() {
        let mut handler = MockFunctionCallHandler::new();
        handler
            .expect_call()
            .times(1)
            .return_const(FunctionOutput::Success);

        let mut ledger = FunctionCallLedger::new();
        ledger.answer(&request("set_patient_name", "fc-4"), &handler).await;
        assert_eq!(ledger.record("fc-4", FunctionOutput::Error), None);

        assert_eq!(
            ledger.record("fc-5", FunctionOutput::Error),
            Some(ClientMessage::FunctionCallResponse {
                function_call_id: "fc-5".to_string(),
                output: FunctionOutput::Error,
            })
        );
        // A later agent redelivery replays what was recorded.
        let replay = ledger.answer(&request("set_patient_name", "fc-5"), &handler).await;
        assert_eq!(
            replay,
            ClientMessage::FunctionCallResponse {
                function_call_id: "fc-5".to_string(),
                output: FunctionOutput::Error,
            }
        );
    }

    #[tokio::test]
    async fn test_reject_answers_error_once_per_id() {
        let mut handler = MockFunctionCallHandler::new();
        handler
            .expect_call()
            .times(1)
            .return_const(FunctionOutput::Success);

        let mut ledger = FunctionCallLedger::new();
        let rejected = ClientMessage::FunctionCallResponse {
            function_call_id: "fc-6".to_string(),
            output: FunctionOutput::Error,
        };
        assert_eq!(ledger.reject("fc-6"), rejected);
        // A well-formed redelivery does not run the handler for that id.
        assert_eq!(ledger.answer(&request("set_patient_name", "fc-6"), &handler).await, rejected);

        ledger.answer(&request("set_patient_name", "fc-7"), &handler).await;
        assert_eq!(
            ledger.reject("fc-7"),
            ClientMessage::FunctionCallResponse {
                function_call_id: "fc-7".to_string(),
                output: FunctionOutput::Success,
            }
        );
        assert_eq!(ledger.answered(), 2);
    }

    #[tokio::test]
    async fn test_no_functions_rejects_everything() {
        let mut ledger = FunctionCallLedger::new();
        assert!(NoFunctions.definitions().is_empty());
        let response = ledger.answer(&request("save_note", "fc-3"), &NoFunctions).await;
        assert_eq!(
            response,
            ClientMessage::FunctionCallResponse {
                function_call_id: "fc-3".to_string(),
                output: FunctionOutput::Error,
            }
        );
    }
}
