pub mod gemini;

pub use gemini::{GeminiChatModel, GeminiConfig, GeminiEmbedder};
