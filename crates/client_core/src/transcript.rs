//! Logical message slots of the visible transcript.
//!
//! Slots are addressed by [`SlotId`], never by position, so the presentation
//! layer can keep its own handle per slot and patch it in place.

use std::{collections::HashMap, fmt};

use shared::{
    domain::{Role, SequenceId},
    protocol::TranscriptEntry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotId {
    /// Slot created by an accepted submission in this session.
    Live { role: Role, sequence_id: SequenceId },
    /// Slot rebuilt from server history; `index` is the pair position.
    History { role: Role, index: usize },
}

impl SlotId {
    pub fn user(sequence_id: SequenceId) -> Self {
        Self::Live {
            role: Role::User,
            sequence_id,
        }
    }

    pub fn bot(sequence_id: SequenceId) -> Self {
        Self::Live {
            role: Role::Bot,
            sequence_id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            SlotId::Live { role, .. } | SlotId::History { role, .. } => *role,
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotId::Live { role, sequence_id } => write!(f, "{}-{}", role.as_str(), sequence_id),
            SlotId::History { role, index } => write!(f, "history-{}-{}", role.as_str(), index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Final,
    /// Bot placeholder shown while the answer is outstanding.
    Typing,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSlot {
    pub id: SlotId,
    pub content: String,
    pub state: SlotState,
}

impl MessageSlot {
    pub fn role(&self) -> Role {
        self.id.role()
    }

    pub fn is_typing(&self) -> bool {
        self.state == SlotState::Typing
    }
}

#[derive(Debug, Default, Clone)]
pub struct Transcript {
    slots: Vec<MessageSlot>,
    index: HashMap<SlotId, usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slots(&self) -> &[MessageSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: &SlotId) -> Option<&MessageSlot> {
        self.index.get(id).map(|&pos| &self.slots[pos])
    }

    pub(crate) fn push(&mut self, slot: MessageSlot) {
        self.index.insert(slot.id, self.slots.len());
        self.slots.push(slot);
    }

    /// Mutates an existing slot in place. Returns the updated slot, or `None`
    /// when the slot is not part of this transcript.
    pub(crate) fn update(
        &mut self,
        id: &SlotId,
        content: impl Into<String>,
        state: SlotState,
    ) -> Option<&MessageSlot> {
        let pos = *self.index.get(id)?;
        let slot = &mut self.slots[pos];
        slot.content = content.into();
        slot.state = state;
        Some(slot)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }

    pub(crate) fn replace_with_history(&mut self, entries: &[TranscriptEntry]) {
        self.clear();
        for (index, entry) in entries.iter().enumerate() {
            self.push(MessageSlot {
                id: SlotId::History {
                    role: Role::User,
                    index,
                },
                content: entry.question.clone(),
                state: SlotState::Final,
            });
            self.push(MessageSlot {
                id: SlotId::History {
                    role: Role::Bot,
                    index,
                },
                content: entry.answer.clone(),
                state: SlotState::Final,
            });
        }
    }
}
