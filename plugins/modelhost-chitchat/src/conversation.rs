//! Speaker-segmented model input for multi-turn conversations
//!
//! The context is laid out as
//!
//! ```text
//! [CLS] [speaker1] h0 ... [speaker2] h1 ... [speakerX] utterance ... [speakerY]
//! ```
//!
//! with a parallel token-type sequence in which every position of a segment,
//! role marker included, carries that segment's role id. The trailing empty
//! segment opens the reply turn.

use crate::sampling::SpecialTokens;

/// Token ids and role ids fed to the language model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationInput {
    pub input_ids: Vec<u32>,
    pub token_type_ids: Vec<u32>,
}

impl ConversationInput {
    /// Lay out `history` followed by `utterance` and an empty reply segment
    pub fn build(utterance: &[u32], history: &[Vec<u32>], special: &SpecialTokens) -> Self {
        let mut input_ids = vec![special.bos];
        let mut token_type_ids = vec![special.bos];

        let reply: &[u32] = &[];
        let segments = history
            .iter()
            .map(Vec::as_slice)
            .chain([utterance, reply]);

        for (index, segment) in segments.enumerate() {
            let role = special.speaker(index);
            input_ids.push(role);
            input_ids.extend_from_slice(segment);
            token_type_ids.extend(std::iter::repeat(role).take(segment.len() + 1));
        }

        Self {
            input_ids,
            token_type_ids,
        }
    }

    /// Role id of the reply segment, used for every generated token
    pub fn persona(&self) -> u32 {
        self.token_type_ids.last().copied().unwrap_or_default()
    }

    /// Append a generated token
    pub fn push(&mut self, token: u32, role: u32) {
        self.input_ids.push(token);
        self.token_type_ids.push(role);
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}
