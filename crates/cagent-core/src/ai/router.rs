//! Rule-based model routing.
//!
//! A [`ModelConfig`] may carry routing rules, each a list of example phrases
//! pointing at another model reference. The router indexes every phrase in
//! memory and, for each user message, picks the rule whose best phrase scores
//! highest; no hits fall back to the config's own provider/model. Selected
//! targets may themselves be routed configs, so resolution walks the model
//! map with a depth bound.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;

use crate::ai::adapter::{AdapterError, CallOptions, ModelAdapter, ProviderKind};

const MAX_ROUTING_DEPTH: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingRule {
    /// Model reference this rule dispatches to.
    pub model: String,
    /// Example phrases that should land on this rule.
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub gateway_url: Option<String>,
    /// Environment variable holding the API key for this provider.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub thinking_budget: Option<crate::ai::adapter::ThinkingBudget>,
    #[serde(default)]
    pub routing: Vec<RoutingRule>,
}

impl ModelConfig {
    pub fn provider_kind(&self) -> ProviderKind {
        ProviderKind::parse(&self.provider)
    }

    fn base_options(&self) -> CallOptions {
        CallOptions {
            gateway_url: self.gateway_url.clone(),
            max_output_tokens: self.max_output_tokens,
            thinking_budget: self.thinking_budget,
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown model reference: {0}")]
    UnknownModel(String),

    #[error("routing depth exceeded resolving {0} (cycle in model map?)")]
    RoutingDepth(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// In-memory full-text index over one config's routing rules.
pub struct Router {
    /// rule index per phrase.
    phrase_rule: Vec<usize>,
    /// token -> phrase ids containing it.
    postings: HashMap<String, Vec<usize>>,
    /// token -> idf weight.
    weights: HashMap<String, f32>,
    targets: Vec<String>,
}

impl Router {
    /// Returns `None` when the config has no routing rules.
    pub fn from_config(config: &ModelConfig) -> Option<Self> {
        if config.routing.is_empty() {
            return None;
        }

        let mut phrase_rule = Vec::new();
        let mut postings: HashMap<String, Vec<usize>> = HashMap::new();
        let targets = config.routing.iter().map(|r| r.model.clone()).collect();

        for (rule_idx, rule) in config.routing.iter().enumerate() {
            for phrase in &rule.examples {
                let phrase_id = phrase_rule.len();
                phrase_rule.push(rule_idx);
                let mut seen = std::collections::HashSet::new();
                for token in tokenize(phrase) {
                    if seen.insert(token.clone()) {
                        postings.entry(token).or_default().push(phrase_id);
                    }
                }
            }
        }

        let phrase_count = phrase_rule.len().max(1) as f32;
        let weights = postings
            .iter()
            .map(|(token, ids)| {
                let idf = (1.0 + phrase_count / ids.len() as f32).ln();
                (token.clone(), idf)
            })
            .collect();

        Some(Self {
            phrase_rule,
            postings,
            weights,
            targets,
        })
    }

    /// Best-scoring rule's target for the query, or `None` when no phrase
    /// matched (the caller falls back to the config's own model).
    pub fn select(&self, query: &str) -> Option<&str> {
        let mut phrase_scores: HashMap<usize, f32> = HashMap::new();
        let mut seen = std::collections::HashSet::new();

        for token in tokenize(query) {
            if !seen.insert(token.clone()) {
                continue;
            }
            let (Some(ids), Some(weight)) = (self.postings.get(&token), self.weights.get(&token)) else {
                continue;
            };
            for id in ids {
                *phrase_scores.entry(*id).or_default() += weight;
            }
        }

        // Aggregate hits per rule by max phrase score.
        let mut rule_scores: HashMap<usize, f32> = HashMap::new();
        for (phrase_id, score) in phrase_scores {
            let rule = self.phrase_rule[phrase_id];
            let entry = rule_scores.entry(rule).or_default();
            if score > *entry {
                *entry = score;
            }
        }

        rule_scores
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(rule, _)| self.targets[rule].as_str())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Builds adapters for resolved model configs.
pub trait AdapterSource: Send + Sync {
    fn adapter(&self, key: &str, config: &ModelConfig) -> Result<Arc<dyn ModelAdapter>, AdapterError>;
}

/// A model reference resolved to a concrete adapter plus call options.
#[derive(Clone)]
pub struct ResolvedModel {
    pub adapter: Arc<dyn ModelAdapter>,
    pub options: CallOptions,
    pub provider: ProviderKind,
}

/// The session's model map: named configs, their routers, and adapter cache.
pub struct ModelCatalog {
    configs: HashMap<String, ModelConfig>,
    routers: HashMap<String, Router>,
    source: Box<dyn AdapterSource>,
    cache: RwLock<HashMap<String, Arc<dyn ModelAdapter>>>,
}

impl ModelCatalog {
    pub fn new(configs: HashMap<String, ModelConfig>, source: Box<dyn AdapterSource>) -> Self {
        let routers = configs
            .iter()
            .filter_map(|(key, cfg)| Router::from_config(cfg).map(|r| (key.clone(), r)))
            .collect();
        Self {
            configs,
            routers,
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self, key: &str) -> Option<&ModelConfig> {
        self.configs.get(key)
    }

    /// Resolve a model reference for one query, following routing hops.
    pub fn resolve(&self, model_ref: &str, query: &str) -> Result<ResolvedModel, CatalogError> {
        let mut key = model_ref;
        let mut options: Option<CallOptions> = None;

        for _ in 0..MAX_ROUTING_DEPTH {
            let config = self
                .configs
                .get(key)
                .ok_or_else(|| CatalogError::UnknownModel(key.to_string()))?;

            // Parent options survive a hop minus the output-token cap; the
            // child's own settings take precedence.
            let mut opts = match options.take() {
                Some(parent) => parent.for_routing_child(),
                None => CallOptions::default(),
            };
            let own = config.base_options();
            if own.gateway_url.is_some() {
                opts.gateway_url = own.gateway_url;
            }
            if own.max_output_tokens.is_some() {
                opts.max_output_tokens = own.max_output_tokens;
            }
            if own.thinking_budget.is_some() {
                opts.thinking_budget = own.thinking_budget;
            }

            match self.routers.get(key).and_then(|r| r.select(query)) {
                Some(target) => {
                    options = Some(opts);
                    key = target;
                }
                None => {
                    let adapter = self.adapter_for(key, config)?;
                    return Ok(ResolvedModel {
                        adapter,
                        options: opts,
                        provider: config.provider_kind(),
                    });
                }
            }
        }

        Err(CatalogError::RoutingDepth(model_ref.to_string()))
    }

    fn adapter_for(&self, key: &str, config: &ModelConfig) -> Result<Arc<dyn ModelAdapter>, CatalogError> {
        if let Some(adapter) = self.cache.read().get(key) {
            return Ok(adapter.clone());
        }
        let adapter = self.source.adapter(key, config)?;
        self.cache.write().insert(key.to_string(), adapter.clone());
        Ok(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routed_config() -> ModelConfig {
        ModelConfig {
            provider: "openai".into(),
            model: "gpt-large".into(),
            gateway_url: None,
            api_key_env: None,
            max_output_tokens: Some(4096),
            thinking_budget: None,
            routing: vec![
                RoutingRule {
                    model: "coder".into(),
                    examples: vec![
                        "write a rust function".into(),
                        "fix this compile error".into(),
                        "refactor the parser module".into(),
                    ],
                },
                RoutingRule {
                    model: "writer".into(),
                    examples: vec![
                        "draft a blog post".into(),
                        "summarize this meeting".into(),
                    ],
                },
            ],
        }
    }

    #[test]
    fn selects_best_matching_rule() {
        let router = Router::from_config(&routed_config()).unwrap();
        assert_eq!(router.select("please fix the compile error in main.rs"), Some("coder"));
        assert_eq!(router.select("summarize the meeting notes"), Some("writer"));
    }

    #[test]
    fn no_hits_falls_back() {
        let router = Router::from_config(&routed_config()).unwrap();
        assert_eq!(router.select("¿qué hora es?"), None);
    }

    #[test]
    fn unrouted_config_has_no_router() {
        let config = ModelConfig {
            routing: Vec::new(),
            ..routed_config()
        };
        assert!(Router::from_config(&config).is_none());
    }
}
