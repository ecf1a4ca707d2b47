mod engineer;
mod strategies;

pub use engineer::{OptimizedPrompt, PromptEngineer};
pub use strategies::{Strategy, StrategyDb};
