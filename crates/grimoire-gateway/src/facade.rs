//! The two-tool façade (§4.7): `resolve_intent` and `activate_spell`.
//! This is the only surface an upstream agent ever calls directly; every
//! other tool name is routed through C6 to the owning spell.

use std::sync::Arc;

use serde_json::{json, Value};

use grimoire_domain::error::{Error, Result};
use grimoire_domain::tool::ToolDescriptor;
use grimoire_resolver::{MatchType, ResolvedMatch};

use crate::bootstrap::AppState;

const TOP_N: usize = 5;
const MIN_CONFIDENCE: f32 = 0.3;
const TIER1_THRESHOLD: f32 = 0.85;
const TIER2_THRESHOLD: f32 = 0.5;

pub struct GatewayFacade {
    state: Arc<AppState>,
}

impl GatewayFacade {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// `resolve_intent({query})`. Never raises — a blank query or a
    /// resolution failure both degrade to a `not_found`-shaped response.
    pub async fn resolve_intent(&self, query: &str) -> Value {
        let matches = match self
            .state
            .resolver
            .resolve_top_n(query, TOP_N, MIN_CONFIDENCE, &self.state.embedder)
        {
            Ok(matches) => matches,
            Err(Error::EmptyQuery) => {
                return json!({ "status": "not_found", "message": "query must be a non-empty string" });
            }
            Err(err) => {
                return json!({ "status": "not_found", "message": err.to_string() });
            }
        };

        let Some(top) = matches.first() else {
            return self.not_found_response();
        };

        if top.confidence >= TIER1_THRESHOLD {
            let name = top.name.clone();
            return match self.activate_spell(&name).await {
                Ok(activated) => activated,
                Err(err) => json!({ "status": "not_found", "message": err.to_string() }),
            };
        }

        if top.confidence >= TIER2_THRESHOLD {
            return json!({
                "status": "multiple_matches",
                "matches": matches.iter().take(3).map(match_json).collect::<Vec<_>>(),
            });
        }

        json!({
            "status": "weak_matches",
            "matches": matches.iter().take(5).map(match_json).collect::<Vec<_>>(),
        })
    }

    /// `activate_spell({name})`. Fails with `SpellNotFound` for an
    /// unknown name; returns cached tools if the spell is already active.
    pub async fn activate_spell(&self, name: &str) -> Result<Value> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("name must be a non-empty string".into()));
        }
        let config = self
            .state
            .resolver
            .get_config(trimmed)
            .ok_or_else(|| Error::SpellNotFound(trimmed.to_string()))?;

        let tools = self.state.lifecycle.spawn(&config).await?;
        self.state.router.register_tools(&config.name, tools.clone());
        self.state.lifecycle.increment_turn();
        self.state.lifecycle.mark_used(&config.name);

        let steered: Vec<ToolDescriptor> = tools
            .iter()
            .map(|tool| tool.with_steering(config.steering.as_deref()))
            .collect();

        Ok(json!({
            "status": "activated",
            "spell": { "name": config.name },
            "tools": steered,
        }))
    }

    fn not_found_response(&self) -> Value {
        let available: Vec<Value> = self
            .state
            .resolver
            .indexed_names()
            .into_iter()
            .filter_map(|name| self.state.resolver.get_config(&name))
            .map(|config| json!({ "name": config.name, "description": config.description }))
            .collect();
        json!({ "status": "not_found", "availableSpells": available })
    }

    /// The façade's own tool surface: `resolve_intent` always;
    /// `activate_spell` only once at least one spell is known, per §4.7.
    pub fn facade_tool_descriptors(&self) -> Vec<ToolDescriptor> {
        let mut tools = vec![ToolDescriptor {
            name: "resolve_intent".into(),
            description: "Resolve a free-form query to the spell best suited to handle it.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"],
            }),
        }];

        let names = self.state.resolver.indexed_names();
        if !names.is_empty() {
            tools.push(ToolDescriptor {
                name: "activate_spell".into(),
                description: "Activate a named spell directly, bypassing intent resolution.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "name": { "type": "string", "enum": names } },
                    "required": ["name"],
                }),
            });
        }

        tools
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }
}

fn match_json(m: &ResolvedMatch) -> Value {
    json!({
        "name": m.name,
        "confidence": m.confidence,
        "matchType": match m.match_type {
            MatchType::Keyword => "keyword",
            MatchType::Semantic => "semantic",
            MatchType::Hybrid => "hybrid",
        },
    })
}
