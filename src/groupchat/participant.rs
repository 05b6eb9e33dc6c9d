//! The participant registry: the ordered set of agents taking part in one
//! session's turn-taking protocol.
//!
//! Built once from configuration at session setup and immutable afterwards.
//! Background agent records are dropped here — they participate in execution
//! elsewhere but never hold the floor.

use crate::groupchat::config::{AgentConfig, AgentKind, ConfigurationError};

/// An agent as the turn controller sees it: a name the classifiers can emit,
/// a description for the selection roster, and the facilitator flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Unique within the session.
    pub name: String,
    pub description: String,
    /// Opens every round and holds sole termination authority.
    pub is_facilitator: bool,
    /// Addressed through a host-supplied adapter instead of the default
    /// LLM-backed agent.
    pub is_special_agent: bool,
}

/// Ordered, validated set of [`Participant`]s for one session.
#[derive(Debug)]
pub struct ParticipantRegistry {
    participants: Vec<Participant>,
    facilitator_index: usize,
}

impl ParticipantRegistry {
    /// Build the registry from agent configuration records, in order.
    ///
    /// Background records are skipped. Fails if nothing interactive remains
    /// or if two records share a name. When several records claim the
    /// facilitator role the first one wins (logged, since it usually points
    /// at a configuration mistake); when none do, the first participant is
    /// the facilitator.
    pub fn from_configs(configs: &[AgentConfig]) -> Result<Self, ConfigurationError> {
        let mut participants: Vec<Participant> = Vec::new();

        for config in configs {
            if config.kind == AgentKind::Background {
                log::info!(
                    "Excluding background agent '{}' from the turn-taking protocol",
                    config.name
                );
                continue;
            }
            if participants.iter().any(|p| p.name == config.name) {
                return Err(ConfigurationError::DuplicateName(config.name.clone()));
            }
            participants.push(Participant {
                name: config.name.clone(),
                description: config.description.clone(),
                is_facilitator: config.facilitator,
                is_special_agent: config.special_agent,
            });
        }

        if participants.is_empty() {
            return Err(ConfigurationError::NoParticipants);
        }

        let flagged: Vec<usize> = participants
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_facilitator)
            .map(|(i, _)| i)
            .collect();

        let facilitator_index = match flagged.as_slice() {
            [] => 0,
            [first] => *first,
            [first, rest @ ..] => {
                log::warn!(
                    "{} agents claim the facilitator role; keeping '{}' and ignoring {:?}",
                    flagged.len(),
                    participants[*first].name,
                    rest.iter()
                        .map(|i| participants[*i].name.as_str())
                        .collect::<Vec<_>>()
                );
                *first
            }
        };

        for (index, participant) in participants.iter_mut().enumerate() {
            participant.is_facilitator = index == facilitator_index;
        }

        Ok(ParticipantRegistry {
            participants,
            facilitator_index,
        })
    }

    /// The participant with termination authority.
    pub fn facilitator(&self) -> &Participant {
        &self.participants[self.facilitator_index]
    }

    pub fn get(&self, name: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.participants.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Participant> {
        self.participants.iter()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// `- name: description` lines, one per participant, used to fill the
    /// facilitator's `{{aiAgents}}` roster and the selection prompt.
    pub fn roster(&self) -> String {
        self.participants
            .iter()
            .map(|p| format!("- {}: {}", p.name, p.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
