//! First-message auto-trigger.
//!
//! A conversation created together with its first message has nobody to
//! ask for the assistant's reply. The view arms this machine when it
//! navigates there, and the machine fires exactly once when the loaded
//! conversation is in the right shape.

use std::fmt;

use tracing::debug;

/// Navigation state carried into a conversation view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NavigationIntent {
    pub auto_trigger: bool,
}

impl NavigationIntent {
    pub fn auto_trigger() -> Self {
        Self { auto_trigger: true }
    }

    /// Read the intent and clear it, so a later reload does not re-fire.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.auto_trigger)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    AwaitingTrigger { conversation_id: String },
    Triggered { conversation_id: String },
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerState::Idle => write!(f, "idle"),
            TriggerState::AwaitingTrigger { conversation_id } => {
                write!(f, "awaiting-trigger({conversation_id})")
            }
            TriggerState::Triggered { conversation_id } => {
                write!(f, "triggered({conversation_id})")
            }
        }
    }
}

/// What the session looked like when the machine was evaluated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TriggerConditions {
    pub conversation_id: Option<String>,
    pub loaded: bool,
    pub message_count: usize,
    pub first_is_user: bool,
    pub ready: bool,
}

impl TriggerConditions {
    fn satisfied_for(&self, conversation_id: &str) -> bool {
        self.conversation_id.as_deref() == Some(conversation_id)
            && self.loaded
            && self.message_count == 1
            && self.first_is_user
            && self.ready
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerEvent {
    Armed(String),
    Evaluated(TriggerConditions),
    ConversationChanged(Option<String>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub event: TriggerEvent,
    pub from: TriggerState,
    pub to: TriggerState,
}

pub const LOG_LIMIT: usize = 64;

#[derive(Clone, Debug)]
pub struct AutoTrigger {
    state: TriggerState,
    log: Vec<Transition>,
}

impl Default for AutoTrigger {
    fn default() -> Self {
        Self {
            state: TriggerState::Idle,
            log: Vec::new(),
        }
    }
}

impl AutoTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TriggerState {
        &self.state
    }

    /// Events dispatched since the current conversation was entered, with
    /// the states they moved between. Holds at most `LOG_LIMIT` entries.
    pub fn log(&self) -> &[Transition] {
        &self.log
    }

    pub fn arm(&mut self, conversation_id: impl Into<String>) {
        self.dispatch(TriggerEvent::Armed(conversation_id.into()));
    }

    /// Returns true only on the evaluation that fires the trigger.
    pub fn evaluate(&mut self, conditions: TriggerConditions) -> bool {
        self.dispatch(TriggerEvent::Evaluated(conditions))
    }

    pub fn conversation_changed(&mut self, conversation_id: Option<&str>) {
        self.dispatch(TriggerEvent::ConversationChanged(
            conversation_id.map(str::to_string),
        ));
    }

    /// Apply one event. Returns true when it moved the machine into
    /// `Triggered`.
    pub fn dispatch(&mut self, event: TriggerEvent) -> bool {
        let from = self.state.clone();
        let to = next_state(&from, &event);
        let fired = matches!(
            (&from, &to),
            (TriggerState::AwaitingTrigger { .. }, TriggerState::Triggered { .. })
        );

        if from != to {
            debug!(%from, %to, "auto-trigger transition");
        }
        // Leaving a conversation starts a fresh history.
        if matches!(event, TriggerEvent::ConversationChanged(_)) && to == TriggerState::Idle {
            self.log.clear();
        }
        self.state = to.clone();
        self.log.push(Transition { event, from, to });
        if self.log.len() > LOG_LIMIT {
            let excess = self.log.len() - LOG_LIMIT;
            self.log.drain(..excess);
        }
        fired
    }
}

fn next_state(state: &TriggerState, event: &TriggerEvent) -> TriggerState {
    use TriggerState::*;

    match (state, event) {
        // Re-arming the instance that already fired is ignored.
        (Triggered { conversation_id }, TriggerEvent::Armed(id)) if conversation_id == id => {
            state.clone()
        }
        (_, TriggerEvent::Armed(id)) => AwaitingTrigger {
            conversation_id: id.clone(),
        },

        (AwaitingTrigger { conversation_id }, TriggerEvent::Evaluated(conditions))
            if conditions.satisfied_for(conversation_id) =>
        {
            Triggered {
                conversation_id: conversation_id.clone(),
            }
        }
        (_, TriggerEvent::Evaluated(_)) => state.clone(),

        (
            AwaitingTrigger { conversation_id } | Triggered { conversation_id },
            TriggerEvent::ConversationChanged(Some(id)),
        ) if conversation_id == id => state.clone(),
        (_, TriggerEvent::ConversationChanged(_)) => Idle,
    }
}
