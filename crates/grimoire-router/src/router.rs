//! Maps tool names to the spell that serves them, and back.
//!
//! Registration is last-writer-wins: if two spells declare a tool with
//! the same name, whichever registers second owns it. This mirrors how
//! the spell directory itself works (spell names are unique by
//! filename, but nothing stops two spell files from exposing an
//! identically named tool) and is preserved rather than "fixed" with a
//! rejection, since silently overriding is what the upstream MCP
//! clients these spells were built against already do.

use std::collections::HashMap;

use parking_lot::RwLock;

use grimoire_domain::tool::ToolDescriptor;

#[derive(Default)]
struct RouterState {
    tool_to_spell: HashMap<String, String>,
    spell_to_tools: HashMap<String, Vec<ToolDescriptor>>,
}

/// Registry of which active spell serves which tool name.
#[derive(Default)]
pub struct ToolRouter {
    state: RwLock<RouterState>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every tool in `tools` as served by `spell_name`,
    /// overwriting any prior owner of the same tool name.
    pub fn register_tools(&self, spell_name: &str, tools: Vec<ToolDescriptor>) {
        let mut state = self.state.write();
        for tool in &tools {
            if let Some(previous) = state.tool_to_spell.insert(tool.name.clone(), spell_name.to_string()) {
                if previous != spell_name {
                    tracing::warn!(
                        tool = tool.name,
                        previous_spell = previous,
                        new_spell = spell_name,
                        "tool name collision, last registration wins"
                    );
                }
            }
        }
        state.spell_to_tools.insert(spell_name.to_string(), tools);
    }

    /// Removes every tool `spell_name` owns. A tool whose current owner
    /// is a *different* spell (the collision case above) is left alone.
    pub fn unregister_tools(&self, spell_name: &str) {
        let mut state = self.state.write();
        if let Some(tools) = state.spell_to_tools.remove(spell_name) {
            for tool in tools {
                if state.tool_to_spell.get(&tool.name).map(String::as_str) == Some(spell_name) {
                    state.tool_to_spell.remove(&tool.name);
                }
            }
        }
    }

    pub fn find_spell_for_tool(&self, tool_name: &str) -> Option<String> {
        self.state.read().tool_to_spell.get(tool_name).cloned()
    }

    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.state.read().tool_to_spell.contains_key(tool_name)
    }

    pub fn get_tools_for_spell(&self, spell_name: &str) -> Option<Vec<ToolDescriptor>> {
        self.state.read().spell_to_tools.get(spell_name).cloned()
    }

    pub fn get_active_spell_names(&self) -> Vec<String> {
        self.state.read().spell_to_tools.keys().cloned().collect()
    }

    pub fn all_tools(&self) -> Vec<ToolDescriptor> {
        self.state.read().spell_to_tools.values().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: String::new(),
            input_schema: serde_json::json!({}),
        }
    }

    #[test]
    fn register_and_find() {
        let router = ToolRouter::new();
        router.register_tools("weather", vec![tool("get_forecast")]);
        assert_eq!(router.find_spell_for_tool("get_forecast").as_deref(), Some("weather"));
        assert!(router.has_tool("get_forecast"));
    }

    #[test]
    fn later_registration_wins_on_collision() {
        let router = ToolRouter::new();
        router.register_tools("weather", vec![tool("search")]);
        router.register_tools("web", vec![tool("search")]);
        assert_eq!(router.find_spell_for_tool("search").as_deref(), Some("web"));
    }

    #[test]
    fn unregister_removes_owned_tools_only() {
        let router = ToolRouter::new();
        router.register_tools("weather", vec![tool("search")]);
        router.register_tools("web", vec![tool("search")]);
        router.unregister_tools("weather");
        // "weather" no longer owns "search" (it lost the collision), so
        // unregistering it must not clobber "web"'s ownership.
        assert_eq!(router.find_spell_for_tool("search").as_deref(), Some("web"));
    }

    #[test]
    fn unregister_drops_uncontested_tool() {
        let router = ToolRouter::new();
        router.register_tools("weather", vec![tool("get_forecast")]);
        router.unregister_tools("weather");
        assert!(!router.has_tool("get_forecast"));
        assert!(router.get_tools_for_spell("weather").is_none());
    }

    #[test]
    fn get_active_spell_names_reflects_registrations() {
        let router = ToolRouter::new();
        router.register_tools("weather", vec![tool("get_forecast")]);
        router.register_tools("web", vec![tool("search")]);
        let mut names = router.get_active_spell_names();
        names.sort();
        assert_eq!(names, vec!["weather".to_string(), "web".to_string()]);
    }
}
