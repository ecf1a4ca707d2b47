use super::{Strategy, StrategyDb};
use crate::backends::{Backend, ChatMessage, ChatRequest};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of one optimization pass. Optimization is best-effort: on a
/// missing strategy or a backend failure the original prompt comes back
/// unchanged and `strategy_used` records which path was taken.
#[derive(Debug, Clone)]
pub struct OptimizedPrompt {
    pub original: String,
    pub optimized: String,
    pub role: String,
    pub strategy_used: String,
    pub optimization_time: Duration,
}

/// Rewrites the final user turn according to the role's strategy, using a
/// designated fast backend as the rewriting engine.
pub struct PromptEngineer {
    fast_backend: Arc<dyn Backend>,
    strategies: StrategyDb,
}

impl PromptEngineer {
    pub fn new(fast_backend: Arc<dyn Backend>, strategies: StrategyDb) -> Self {
        Self {
            fast_backend,
            strategies,
        }
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    /// Optimize a user prompt for a role. Never fails; failures degrade to
    /// the unmodified prompt.
    pub async fn optimize(&self, user_prompt: &str, role: &str) -> OptimizedPrompt {
        let started = Instant::now();

        let Some(strategy) = self.strategies.strategy(role) else {
            warn!(role, "no prompt strategy for role");
            return OptimizedPrompt {
                original: user_prompt.to_string(),
                optimized: user_prompt.to_string(),
                role: role.to_string(),
                strategy_used: "none".to_string(),
                optimization_time: started.elapsed(),
            };
        };

        let request = ChatRequest {
            // The fast backend picks its own quick model.
            model: "auto".to_string(),
            messages: vec![
                ChatMessage::new("system", strategy.system_prompt.clone()),
                ChatMessage::new("user", build_optimization_prompt(user_prompt, strategy)),
            ],
            temperature: Some(0.3),
            max_tokens: Some(1000),
            ..Default::default()
        };

        match self.fast_backend.chat_completion(&request).await {
            Ok(response) => {
                let optimized = response
                    .choices
                    .first()
                    .map(|c| c.message.content.clone())
                    .unwrap_or_default();
                debug!(role, strategy = %strategy.name, "prompt optimized");
                OptimizedPrompt {
                    original: user_prompt.to_string(),
                    optimized,
                    role: role.to_string(),
                    strategy_used: strategy.name.clone(),
                    optimization_time: started.elapsed(),
                }
            }
            Err(err) => {
                warn!(role, error = %err, "prompt optimization failed, using original");
                OptimizedPrompt {
                    original: user_prompt.to_string(),
                    optimized: user_prompt.to_string(),
                    role: role.to_string(),
                    strategy_used: "error".to_string(),
                    optimization_time: started.elapsed(),
                }
            }
        }
    }
}

/// Meta-prompt fed to the fast backend.
fn build_optimization_prompt(user_prompt: &str, strategy: &Strategy) -> String {
    let mut prompt = format!(
        "You are a prompt engineering expert. Optimize the following user prompt for a {} role.\n\n\
         User's original prompt:\n{}\n\n\
         Apply these techniques:\n",
        strategy.name, user_prompt
    );
    for technique in &strategy.techniques {
        let _ = writeln!(prompt, "- {technique}");
    }

    prompt.push_str("\nFollow these constraints:\n");
    for constraint in &strategy.constraints {
        let _ = writeln!(prompt, "- {constraint}");
    }

    prompt.push_str("\nOutput ONLY the optimized prompt, without any explanation or meta-commentary.\n");

    if !strategy.examples.is_empty() {
        prompt.push_str("\nExamples of good prompts for this role:\n");
        for (i, example) in strategy.examples.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {example}", i + 1);
        }
    }

    prompt
}
