//! Conversational processor plugin for ModelHost.
//!
//! Generates chit-chat replies with a GPT-2 language model (CDial-GPT
//! layout) run through candle. Register [`ChitchatPlugin`] in the host's
//! `PluginTable`; plugin manifests select it with `processor: chitchat`.
//!
//! ```yaml
//! processor: chitchat
//! conf:
//!   model_chkpt: model
//!   top_p: 0.9
//!   temperature: 0.7
//! ```

pub mod conversation;
pub mod gpt2;
pub mod processor;
pub mod sampling;
pub mod tokenizer;

pub use conversation::ConversationInput;
pub use gpt2::{Gpt2Config, Gpt2LmHeadModel};
pub use processor::{ChitchatConfig, ChitchatPlugin, ChitchatProcessor, KIND};
pub use sampling::{
    argmax, softmax, top_filtering, Generation, LanguageModel, SamplingEngine, SamplingOptions,
    SpecialTokens, StopReason,
};
pub use tokenizer::ChatTokenizer;
