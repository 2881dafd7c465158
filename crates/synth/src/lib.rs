//! Epic synthesis.
//!
//! Each cluster gets one [`EpicRecord`](epic_protocol::EpicRecord). When a
//! [`TextGenerator`] is configured it drafts the title, body and labels from a
//! delimited `<TITLE>: <BODY>: <LABELS>:` reply; otherwise, or when the call or
//! the reply fails, a deterministic template takes over. Both variants end with
//! the member checklist and carry an `epic` label.

mod colors;
mod error;
mod fallback;
mod generator;
mod openai;
mod parse;
mod prompt;
mod synthesizer;
#[cfg(test)]
mod test_support;

pub use colors::resolve_label;
pub use error::{Result, SynthesisError};
pub use fallback::{checklist, fallback_epic};
pub use generator::TextGenerator;
pub use openai::{
    ChatCompletionsGenerator, ChatConfig, RetryPolicy, DEFAULT_BASE_URL, DEFAULT_MODEL,
    DEFAULT_RETRY_DELAY,
};
pub use parse::{default_title, parse_response, EpicDraft};
pub use prompt::build_prompt;
pub use synthesizer::EpicSynthesizer;
