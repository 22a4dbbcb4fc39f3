pub mod images;
pub mod mock;
pub mod openai;
pub mod retry;

pub use images::OpenAiImageGenerator;
pub use mock::{MockImageGenerator, MockProvider, MockResponse};
pub use openai::{OpenAiConfig, OpenAiProvider};
pub use retry::RetryingProvider;
