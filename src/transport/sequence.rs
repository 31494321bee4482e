//! Inbound message-id tracking
//!
//! Each unit channel remembers the last message id it processed:
//! - an id at or below it is a replay and is ignored
//! - the next id is accepted
//! - anything further is a gap; the message is rejected and the channel
//!   asks the agent to resynchronize

/// Result of checking an inbound message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundCheck {
    /// Next expected id.
    Accepted,
    /// Already processed.
    Duplicate,
    /// Ids were skipped.
    Gap { expected: u64, received: u64 },
}

impl InboundCheck {
    pub fn evaluate(last_processed: u64, received: u64) -> Self {
        let expected = last_processed.saturating_add(1);
        if received < expected {
            InboundCheck::Duplicate
        } else if received > expected {
            InboundCheck::Gap { expected, received }
        } else {
            InboundCheck::Accepted
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, InboundCheck::Accepted)
    }

    pub fn is_gap(&self) -> bool {
        matches!(self, InboundCheck::Gap { .. })
    }
}
