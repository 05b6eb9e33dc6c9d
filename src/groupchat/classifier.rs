//! Decision classifiers: the narrow LLM-backed functions that turn free-form
//! model output into deterministic turn-taking decisions.
//!
//! The same machinery is instantiated twice per session:
//!
//! - **Selection** — which participant speaks next, judged over the entire
//!   shared history.
//! - **Termination** — whether the loop should yield to the human, judged
//!   over the single most recent message only (older context is irrelevant
//!   to that call, so it is explicitly truncated away).
//!
//! Both calls pin `seed = 42` and `temperature = 0` (when the backend
//! accepts one) and request JSON output, because the loop's correctness
//! depends on the classifier being *consistent*, not merely plausible.
//!
//! Normalization is deliberately asymmetric. An out-of-vocabulary selection
//! verdict silently resolves to the facilitator — a hallucinated name must
//! never stall the loop. A termination verdict outside `"yes"`/`"no"` is a
//! contract violation and propagates as an error, because guessing there
//! risks either an infinite loop or a premature yield.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::groupchat::client_wrapper::{ClientWrapper, Message, Role, SamplingOptions};
use crate::groupchat::history::{ChatHistory, ChatMessage};
use crate::groupchat::participant::{Participant, ParticipantRegistry};

/// Structured output of a classifier call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// A participant name (selection) or `"yes"`/`"no"` (termination).
    pub verdict: String,
    /// The model's full reasoning, kept for logging and audits.
    pub reasoning: String,
}

/// Errors raised by classifier calls and their normalization.
#[derive(Debug, Clone)]
pub enum ClassifierError {
    /// The model output could not be coerced into the [`Verdict`] shape.
    /// Fatal for the turn; silently defaulting here would mask upstream
    /// classifier drift.
    Parse(String),
    /// A termination verdict outside `"yes"`/`"no"`.
    TerminationContractViolation(String),
    /// The underlying model call failed.
    Backend(String),
}

impl fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierError::Parse(msg) => write!(f, "Unparseable classifier output: {}", msg),
            ClassifierError::TerminationContractViolation(verdict) => {
                write!(f, "Termination verdict must be \"yes\" or \"no\", got: {}", verdict)
            }
            ClassifierError::Backend(msg) => write!(f, "Classifier backend error: {}", msg),
        }
    }
}

impl Error for ClassifierError {}

/// A pluggable decision function: prompt in, [`Verdict`] out.
///
/// Production uses [`LlmClassifier`]; tests use deterministic fakes.
#[async_trait]
pub trait DecisionClassifier: Send + Sync {
    async fn classify(&self, prompt: &str) -> Result<Verdict, ClassifierError>;
}

/// LLM-backed [`DecisionClassifier`] with deterministic sampling settings.
pub struct LlmClassifier {
    client: Arc<dyn ClientWrapper>,
    options: SamplingOptions,
}

impl LlmClassifier {
    /// `supports_temperature` comes from the explicit
    /// [`ModelConfig`](crate::config::ModelConfig), never from the
    /// environment.
    pub fn new(client: Arc<dyn ClientWrapper>, supports_temperature: bool) -> Self {
        LlmClassifier {
            client,
            options: SamplingOptions::deterministic(supports_temperature),
        }
    }
}

#[async_trait]
impl DecisionClassifier for LlmClassifier {
    async fn classify(&self, prompt: &str) -> Result<Verdict, ClassifierError> {
        let messages = [Message {
            role: Role::User,
            content: prompt.to_string(),
        }];

        let response = self
            .client
            .send_message(&messages, Some(self.options.clone()))
            .await
            .map_err(|err| ClassifierError::Backend(err.to_string()))?;

        let verdict = parse_verdict(&response.content)?;
        log::info!(
            "Classifier verdict from {}: {:?}",
            self.client.model_name(),
            verdict.verdict
        );
        Ok(verdict)
    }
}

/// Coerce raw model text into a [`Verdict`].
///
/// Accepts either a bare JSON object or one embedded in surrounding prose
/// (models occasionally wrap their JSON in commentary or code fences).
pub fn parse_verdict(raw: &str) -> Result<Verdict, ClassifierError> {
    if let Ok(verdict) = serde_json::from_str::<Verdict>(raw.trim()) {
        return Ok(verdict);
    }

    if let Some(json) = extract_json_object(raw) {
        if let Ok(verdict) = serde_json::from_str::<Verdict>(json) {
            return Ok(verdict);
        }
    }

    Err(ClassifierError::Parse(truncate_for_log(raw)))
}

/// Find the first balanced `{ ... }` block in the text.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate_for_log(raw: &str) -> String {
    const LIMIT: usize = 200;
    if raw.len() <= LIMIT {
        raw.to_string()
    } else {
        let mut end = LIMIT;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &raw[..end])
    }
}

/// Resolve a selection verdict to a participant.
///
/// Exact name match wins; anything else — an unknown name, hallucinated
/// casing, empty output — falls back to the facilitator. The fallback is
/// logged but never raised. Pure function of its inputs, so calling it twice
/// on the same verdict yields the same participant.
pub fn resolve_selection<'a>(
    verdict: &Verdict,
    registry: &'a ParticipantRegistry,
) -> &'a Participant {
    match registry.get(verdict.verdict.trim()) {
        Some(participant) => participant,
        None => {
            let facilitator = registry.facilitator();
            log::warn!(
                "Selection verdict '{}' matches no participant; falling back to facilitator '{}'",
                verdict.verdict,
                facilitator.name
            );
            facilitator
        }
    }
}

/// Resolve a termination verdict to a stop decision.
///
/// Case-insensitive `"yes"` stops, `"no"` continues; anything else is a
/// [`ClassifierError::TerminationContractViolation`].
pub fn resolve_termination(verdict: &Verdict) -> Result<bool, ClassifierError> {
    let normalized = verdict.verdict.trim();
    if normalized.eq_ignore_ascii_case("yes") {
        Ok(true)
    } else if normalized.eq_ignore_ascii_case("no") {
        Ok(false)
    } else {
        Err(ClassifierError::TerminationContractViolation(
            verdict.verdict.clone(),
        ))
    }
}

/// Build the selection prompt over the full shared history.
pub fn selection_prompt(registry: &ParticipantRegistry, history: &ChatHistory) -> String {
    let facilitator = &registry.facilitator().name;
    let participant_lines = registry
        .names()
        .iter()
        .map(|name| format!("    - {}", name))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are overseeing a group chat between several AI agents and a human user.\n\
         Determine which participant takes the next turn in a conversation based on the most recent participant. Follow these guidelines:\n\
         \n\
         1. **Participants**: Choose only from these participants:\n\
         {participants}\n\
         \n\
         2. **General Rules**:\n\
         \x20   - **{facilitator} Always Starts**: {facilitator} always goes first to formulate a plan. If the only message is from the user, {facilitator} goes next.\n\
         \x20   - **Interactions between agents**: Agents may talk among themselves. If an agent requires information from another agent, that agent should go next.\n\
         \x20       EXAMPLE:\n\
         \x20           \"*agent_name*, please provide ...\" then agent_name goes next.\n\
         \x20   - **\"back to you *agent_name*\"**: If an agent says \"back to you\", that agent goes next.\n\
         \x20       EXAMPLE:\n\
         \x20           \"back to you *agent_name*\" then output agent_name goes next.\n\
         \x20   - **Once per turn**: Each participant can only speak once per turn.\n\
         \x20   - **Default to {facilitator}**: Always default to {facilitator}. If no other participant is specified, {facilitator} goes next.\n\
         \x20   - **Use best judgment**: If the rules are unclear, use your best judgment to determine who should go next, for the natural flow of the conversation.\n\
         \n\
         **Output**: Give the full reasoning for your choice and the verdict. The reasoning should include careful evaluation of each rule with an explanation. The verdict should be the name of the participant who should go next.\n\
         Respond with a JSON object with \"verdict\" and \"reasoning\" fields.\n\
         \n\
         History:\n\
         {history}",
        participants = participant_lines,
        facilitator = facilitator,
        history = history.render(),
    )
}

/// Build the termination prompt over the most recent message only.
pub fn termination_prompt(registry: &ParticipantRegistry, last_message: &ChatMessage) -> String {
    let agent_names = registry.names().join(",");

    format!(
        "Determine if the conversation should end based on the most recent message.\n\
         You only have access to the last message in the conversation.\n\
         \n\
         Reply by giving your full reasoning, and the verdict. The verdict should be either \"yes\" or \"no\".\n\
         Respond with a JSON object with \"verdict\" and \"reasoning\" fields.\n\
         \n\
         You are part of a group chat with several AI agents and a user.\n\
         The agents names are:\n\
         \x20   {agents}\n\
         \n\
         If the most recent message is a question addressed to the user, return \"yes\".\n\
         If the question is addressed to \"we\" or \"us\", return \"yes\". For example, if the question is \"Should we proceed?\", return \"yes\".\n\
         If the question is addressed to another agent, return \"no\".\n\
         If it is a statement addressed to another agent, return \"no\".\n\
         Commands addressed to a specific agent should result in 'no' if there is clear identification of the agent.\n\
         Commands addressed to \"you\" or \"User\" should result in 'yes'.\n\
         If you are not certain, return \"yes\".\n\
         \n\
         EXAMPLES:\n\
         \x20   - \"User, can you confirm the correct patient ID?\" => \"yes\"\n\
         \x20   - \"*ReportCreation*: Please compile the patient timeline. Let's proceed with *ReportCreation*.\" => \"no\" (ReportCreation is an agent)\n\
         \x20   - \"*ReportCreation*, please proceed ...\" => \"no\" (ReportCreation is an agent)\n\
         \x20   - \"If you have any further questions or need assistance, feel free to ask.\" => \"yes\"\n\
         \x20   - \"Let's proceed with Radiology.\" => \"no\" (Radiology is an agent)\n\
         \x20   - \"*PatientStatus*, please use ...\" => \"no\" (PatientStatus is an agent)\n\
         History:\n\
         {author}: {content}\n",
        agents = agent_names,
        author = last_message.author,
        content = last_message.content,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groupchat::config::{AgentConfig, AgentKind};

    fn registry() -> ParticipantRegistry {
        let configs = vec![
            AgentConfig {
                name: "Facilitator".to_string(),
                description: "Coordinates the conversation".to_string(),
                facilitator: true,
                kind: AgentKind::Interactive,
                special_agent: false,
                instructions: None,
                temperature: None,
                tools: Vec::new(),
            },
            AgentConfig {
                name: "Radiology".to_string(),
                description: "Reads imaging studies".to_string(),
                facilitator: false,
                kind: AgentKind::Interactive,
                special_agent: false,
                instructions: None,
                temperature: None,
                tools: Vec::new(),
            },
        ];
        ParticipantRegistry::from_configs(&configs).unwrap()
    }

    #[test]
    fn parses_a_bare_json_verdict() {
        let verdict =
            parse_verdict(r#"{"verdict": "Radiology", "reasoning": "hand-off detected"}"#).unwrap();
        assert_eq!(verdict.verdict, "Radiology");
    }

    #[test]
    fn parses_a_verdict_embedded_in_prose() {
        let raw = "Here is my analysis:\n```json\n{\"verdict\": \"yes\", \"reasoning\": \"closing remark\"}\n```\nDone.";
        let verdict = parse_verdict(raw).unwrap();
        assert_eq!(verdict.verdict, "yes");
    }

    #[test]
    fn rejects_non_json_output() {
        assert!(matches!(
            parse_verdict("Radiology should go next."),
            Err(ClassifierError::Parse(_))
        ));
    }

    #[test]
    fn rejects_json_missing_fields() {
        assert!(matches!(
            parse_verdict(r#"{"speaker": "Radiology"}"#),
            Err(ClassifierError::Parse(_))
        ));
    }

    #[test]
    fn selection_resolves_exact_name() {
        let registry = registry();
        let verdict = Verdict {
            verdict: "Radiology".to_string(),
            reasoning: String::new(),
        };
        assert_eq!(resolve_selection(&verdict, &registry).name, "Radiology");
    }

    #[test]
    fn selection_falls_back_to_facilitator() {
        let registry = registry();
        for bad in ["Dr. Smith", "radiology", "", "RADIOLOGY "] {
            let verdict = Verdict {
                verdict: bad.to_string(),
                reasoning: String::new(),
            };
            assert_eq!(resolve_selection(&verdict, &registry).name, "Facilitator");
        }
    }

    #[test]
    fn selection_resolution_is_idempotent() {
        let registry = registry();
        let verdict = Verdict {
            verdict: "SomeoneElse".to_string(),
            reasoning: String::new(),
        };
        let first = resolve_selection(&verdict, &registry).name.clone();
        let second = resolve_selection(&verdict, &registry).name.clone();
        assert_eq!(first, second);
    }

    #[test]
    fn termination_is_case_insensitive() {
        for (raw, expected) in [("yes", true), ("Yes", true), ("NO", false), (" no ", false)] {
            let verdict = Verdict {
                verdict: raw.to_string(),
                reasoning: String::new(),
            };
            assert_eq!(resolve_termination(&verdict).unwrap(), expected);
        }
    }

    #[test]
    fn termination_rejects_anything_else() {
        for bad in ["maybe", "yess", "", "continue"] {
            let verdict = Verdict {
                verdict: bad.to_string(),
                reasoning: String::new(),
            };
            assert!(matches!(
                resolve_termination(&verdict),
                Err(ClassifierError::TerminationContractViolation(_))
            ));
        }
    }

    #[test]
    fn selection_prompt_lists_participants_and_facilitator() {
        let registry = registry();
        let mut history = ChatHistory::new();
        history.append("user", "What's the diagnosis?");

        let prompt = selection_prompt(&registry, &history);
        assert!(prompt.contains("- Facilitator"));
        assert!(prompt.contains("- Radiology"));
        assert!(prompt.contains("Facilitator Always Starts"));
        assert!(prompt.contains("user: What's the diagnosis?"));
    }

    #[test]
    fn termination_prompt_sees_only_the_last_message() {
        let registry = registry();
        let mut history = ChatHistory::new();
        history.append("user", "older context that must not leak");
        history.append("Facilitator", "Anything else I can help with?");

        let prompt = termination_prompt(&registry, history.last().unwrap());
        assert!(prompt.contains("Facilitator: Anything else I can help with?"));
        assert!(!prompt.contains("older context"));
    }
}
