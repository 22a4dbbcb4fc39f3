pub mod console;
pub mod error;
pub mod pipeline;
pub mod platform_thread;
pub mod seeder;
pub mod strategy;

#[cfg(test)]
mod testing;

pub use console::{ConsolePlatform, Outbound};
pub use error::{PipelineError, ResolveError};
pub use pipeline::{BotContext, Outcome};
pub use platform_thread::PlatformResolver;
pub use seeder::ContextSeeder;
pub use strategy::ThreadStrategy;
