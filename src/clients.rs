pub mod anthropic;
pub mod gemini;
pub mod summarizer;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use summarizer::{ProviderKind, ProviderSummarizer, SummarizeError, Summarizer};
