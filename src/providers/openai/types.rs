// Chat Completions 请求/响应直接复用 async-openai 的类型
pub use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest as ChatCompletionRequest,
    CreateChatCompletionRequestArgs as ChatCompletionRequestArgs,
    CreateChatCompletionResponse as ChatCompletionResponse,
};
