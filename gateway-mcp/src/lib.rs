//! Renders the capability catalog as MCP-style agent-tool descriptors.
//!
//! `GET /mcp` exposes the same catalog as `GET /capabilities`, reshaped
//! into the `name`/`description`/`inputSchema` triple an MCP client
//! expects per tool, following the `CallToolParams` naming convention
//! without any on-chain payment-wrapper machinery — this endpoint only
//! describes tools, it never invokes one.

use gateway_core::capability::{Capability, ParamType};
use serde_json::{Value, json};

/// One MCP-style tool descriptor for a single capability.
#[must_use]
pub fn tool_descriptor(capability: &Capability) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for (name, spec) in &capability.input_schema {
        properties.insert(
            name.clone(),
            json!({
                "type": json_schema_type(spec.param_type),
                "description": spec.description,
            }),
        );
        if spec.required {
            required.push(name.clone());
        }
    }

    json!({
        "name": capability.id,
        "description": capability.description,
        "inputSchema": {
            "type": "object",
            "properties": Value::Object(properties),
            "required": required,
        },
        "annotations": {
            "cost": gateway_core::money::format_dollars(capability.cost),
            "source": capability.source,
        },
    })
}

/// Renders the full matchable catalog as an MCP `tools` listing.
#[must_use]
pub fn render_catalog(capabilities: &[Capability]) -> Value {
    let tools: Vec<Value> = capabilities.iter().map(tool_descriptor).collect();
    json!({ "tools": tools })
}

fn json_schema_type(param_type: ParamType) -> &'static str {
    match param_type {
        ParamType::String => "string",
        ParamType::Number => "number",
        ParamType::Boolean => "boolean",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use gateway_core::capability::{BackendMethod, ContentClass, ParamSpec, RawCapability, SourceTier};

    use super::*;

    fn sample_capability() -> Capability {
        let mut schema = HashMap::new();
        schema.insert(
            "url".to_owned(),
            ParamSpec { param_type: ParamType::String, required: true, default: None, description: "page url".to_owned() },
        );
        RawCapability {
            id: "screenshot".to_owned(),
            name: "Screenshot".to_owned(),
            description: "captures a page screenshot".to_owned(),
            cost: "$0.01".to_owned(),
            keywords: vec!["screenshot".to_owned()],
            endpoint: "https://backend.internal/screenshot".to_owned(),
            method: BackendMethod::Post,
            input_schema: schema,
            output_type: ContentClass::Image,
            source: SourceTier::Native,
            provider: None,
            revenue_split: None,
        }
        .resolve()
        .unwrap()
    }

    #[test]
    fn descriptor_marks_required_field() {
        let descriptor = tool_descriptor(&sample_capability());
        let required = descriptor["inputSchema"]["required"].as_array().unwrap();
        assert_eq!(required[0], "url");
    }

    #[test]
    fn catalog_wraps_every_tool() {
        let catalog = render_catalog(&[sample_capability()]);
        assert_eq!(catalog["tools"].as_array().unwrap().len(), 1);
    }
}
