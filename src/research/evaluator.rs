use super::ModelBenchmark;
use std::collections::HashMap;

/// A model with its role-weighted score.
#[derive(Debug, Clone)]
pub struct RankedModel {
    pub name: String,
    pub score: f64,
    pub reason: String,
    pub benchmarks: HashMap<String, f64>,
}

/// Ranks models for specific roles using role-weighted benchmark averages.
pub struct ModelEvaluator {
    role_weights: HashMap<&'static str, Vec<(&'static str, f64)>>,
}

impl Default for ModelEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelEvaluator {
    pub fn new() -> Self {
        Self {
            role_weights: role_weights(),
        }
    }

    /// Score and rank models for a role, best first. The sort is stable, so
    /// equal scores keep their insertion order.
    pub fn rank_models_for_role(&self, models: &[ModelBenchmark], role: &str) -> Vec<RankedModel> {
        let default_weights = vec![
            ("reasoning", 1.0),
            ("coding", 1.0),
            ("math", 1.0),
            ("language", 1.0),
        ];
        let weights = self.role_weights.get(role).unwrap_or(&default_weights);

        let mut ranked: Vec<RankedModel> = models
            .iter()
            .map(|model| RankedModel {
                name: model.name.clone(),
                score: weighted_score(&model.benchmarks, weights),
                reason: generate_reason(model),
                benchmarks: model.benchmarks.clone(),
            })
            .collect();

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }
}

/// Weighted average over the metrics the model actually has. A missing
/// metric drops out of both the numerator and the denominator instead of
/// counting as zero.
fn weighted_score(benchmarks: &HashMap<String, f64>, weights: &[(&str, f64)]) -> f64 {
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    for (metric, weight) in weights {
        if let Some(value) = benchmarks.get(*metric) {
            weighted_sum += value * weight;
            total_weight += weight;
        }
    }

    if total_weight == 0.0 {
        return 0.0;
    }
    weighted_sum / total_weight
}

/// Human-readable justification from the model's strongest metric. Display
/// only, never consulted by selection logic.
fn generate_reason(model: &ModelBenchmark) -> String {
    let strongest = model
        .benchmarks
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));

    let Some((metric, _)) = strongest else {
        return "Good overall performance".to_string();
    };

    match metric.as_str() {
        "reasoning" => "reasoning capabilities",
        "coding" => "coding performance",
        "math" => "mathematical reasoning",
        "language" => "language understanding",
        "speed" => "response speed",
        "context" => "context window",
        other => other,
    }
    .to_string()
}

fn role_weights() -> HashMap<&'static str, Vec<(&'static str, f64)>> {
    HashMap::from([
        (
            "architect",
            vec![
                ("reasoning", 3.0),
                ("coding", 1.5),
                ("math", 1.0),
                ("language", 1.0),
            ],
        ),
        (
            "implementation",
            vec![
                ("coding", 3.0),
                ("reasoning", 1.5),
                ("math", 1.0),
                ("language", 0.5),
            ],
        ),
        (
            "code_review",
            vec![("reasoning", 2.5), ("coding", 2.5), ("language", 1.0)],
        ),
        (
            "debugging",
            vec![("reasoning", 3.0), ("coding", 2.0), ("math", 1.0)],
        ),
        (
            "testing",
            vec![("reasoning", 2.0), ("coding", 2.5), ("language", 1.0)],
        ),
        (
            "documentation",
            vec![("language", 3.0), ("reasoning", 1.0), ("speed", 2.0)],
        ),
        (
            "research",
            vec![("reasoning", 2.5), ("language", 2.0), ("context", 3.0)],
        ),
        (
            "general",
            vec![
                ("reasoning", 1.5),
                ("coding", 1.0),
                ("language", 2.0),
                ("speed", 1.5),
            ],
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn benchmark(name: &str, metrics: &[(&str, f64)]) -> ModelBenchmark {
        ModelBenchmark {
            name: name.to_string(),
            provider: "test".to_string(),
            benchmarks: metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            updated: Utc::now(),
        }
    }

    #[test]
    fn architect_weighting_prefers_reasoning() {
        let evaluator = ModelEvaluator::new();
        let models = vec![
            benchmark("coder", &[("reasoning", 70.0), ("coding", 95.0)]),
            benchmark("thinker", &[("reasoning", 95.0), ("coding", 70.0)]),
        ];

        let ranked = evaluator.rank_models_for_role(&models, "architect");
        assert_eq!(ranked[0].name, "thinker");

        let ranked = evaluator.rank_models_for_role(&models, "implementation");
        assert_eq!(ranked[0].name, "coder");
    }

    #[test]
    fn missing_metric_is_excluded_not_zeroed() {
        let evaluator = ModelEvaluator::new();
        // Only coding is reported; the score must equal it, not be dragged
        // down by absent metrics.
        let models = vec![benchmark("specialist", &[("coding", 90.0)])];

        let ranked = evaluator.rank_models_for_role(&models, "implementation");
        assert!((ranked[0].score - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn no_weighted_metrics_scores_zero() {
        let evaluator = ModelEvaluator::new();
        let models = vec![benchmark("oddball", &[("speed", 99.0)])];

        let ranked = evaluator.rank_models_for_role(&models, "debugging");
        assert_eq!(ranked[0].score, 0.0);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let evaluator = ModelEvaluator::new();
        let models = vec![
            benchmark("first", &[("reasoning", 80.0)]),
            benchmark("second", &[("reasoning", 80.0)]),
        ];

        let ranked = evaluator.rank_models_for_role(&models, "architect");
        assert_eq!(ranked[0].name, "first");
        assert_eq!(ranked[1].name, "second");
    }

    #[test]
    fn reason_names_strongest_metric() {
        let evaluator = ModelEvaluator::new();
        let models = vec![benchmark("m", &[("coding", 92.0), ("reasoning", 85.0)])];

        let ranked = evaluator.rank_models_for_role(&models, "general");
        assert_eq!(ranked[0].reason, "coding performance");
    }

    #[test]
    fn unknown_role_uses_equal_weights() {
        let evaluator = ModelEvaluator::new();
        let models = vec![benchmark("m", &[("reasoning", 80.0), ("coding", 60.0)])];

        let ranked = evaluator.rank_models_for_role(&models, "mystery-role");
        assert!((ranked[0].score - 70.0).abs() < f64::EPSILON);
    }
}
