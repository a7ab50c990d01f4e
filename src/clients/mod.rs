pub mod openai;
pub mod traits;

pub use openai::{OpenAiClient, StreamChunkParser};
pub use traits::{
    ChatDelta, ChatMessage, ChatModel, ChatStream, FunctionCall, LanguageModel, LlmError,
    ToolCall, ToolCallDelta, ToolSpec,
};
