//! The callable tool declared to the assistant and the code answering it.

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::client::{KpiBackend, KpiQuery, ToolCall, ToolOutput};
use crate::error::Result;

pub const KPI_TOOL_NAME: &str = "compute_kpi_by_machine_id";

/// Strict function schema for [`KPI_TOOL_NAME`].
pub fn kpi_tool_definition() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": KPI_TOOL_NAME,
            "description": "Computes KPI for a specific machine based on provided parameters",
            "strict": true,
            "parameters": {
                "type": "object",
                "properties": {
                    "machine_id": {"type": "string", "description": "Machine ID"},
                    "kpi_id": {"type": "string", "description": "KPI ID"},
                    "start_date": {"type": "string", "description": "Start date (YYYY-MM-DD HH:MM:SS)"},
                    "end_date": {"type": "string", "description": "End date (YYYY-MM-DD HH:MM:SS)"},
                    "granularity_op": {"type": "string", "description": "Granularity operation (e.g., 'avg')"}
                },
                "additionalProperties": false,
                "required": ["machine_id", "kpi_id", "start_date", "end_date", "granularity_op"]
            }
        }
    })
}

/// Every tool the assistant is registered with.
pub fn assistant_tools() -> Vec<Value> {
    vec![json!({"type": "file_search"}), kpi_tool_definition()]
}

/// Answer one tool call.
///
/// Calls to [`KPI_TOOL_NAME`] hit the backend; malformed arguments and
/// backend failures propagate. Any other tool gets an error payload so the
/// run is not left waiting on it.
pub async fn answer_tool_call<B>(backend: &B, call: &ToolCall) -> Result<ToolOutput>
where
    B: KpiBackend + ?Sized,
{
    if call.kind != "function" || call.function.name != KPI_TOOL_NAME {
        warn!(
            name: "tool.unknown",
            call_id = %call.id,
            tool = %call.function.name,
            "Assistant requested an unregistered tool"
        );
        let output = json!({ "error": format!("unknown tool `{}`", call.function.name) });
        return Ok(ToolOutput {
            tool_call_id: call.id.clone(),
            output: output.to_string(),
        });
    }

    let query: KpiQuery = serde_json::from_str(&call.function.arguments)?;
    debug!(name: "tool.kpi.call", call_id = %call.id, ?query, "Calling compute_kpi_by_machine_id");

    let result = backend.compute_kpi(&query).await?;
    debug!(name: "tool.kpi.result", call_id = %call.id, %result, "Computed KPI");

    Ok(ToolOutput {
        tool_call_id: call.id.clone(),
        output: serde_json::to_string(&result)?,
    })
}
