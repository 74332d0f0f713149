//! Plan assembly from model output: structured tool calls and JSON embedded
//! in free-form content.

use serde_json::Value;

use ag_domain::plan::{Elicitation, Plan, Step};
use ag_domain::stream::Choice;

/// Append the choice's tool calls that are not yet in the plan (tracked by
/// op id). Returns the newly appended steps in arrival order.
pub fn extend_plan_from_choice(plan: &mut Plan, choice: &Choice) -> Vec<Step> {
    let mut appended = Vec::new();
    for call in &choice.tool_calls {
        let exists = plan.steps.iter().any(|s| s.id == call.op_id);
        if exists {
            continue;
        }
        let op_id = if call.op_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            call.op_id.clone()
        };
        let step = Step::tool(op_id, call.name.clone(), call.arguments.clone());
        plan.steps.push(step.clone());
        appended.push(step);
    }
    appended
}

/// Extract the JSON block embedded in model content: markdown fences are
/// stripped, then the outermost `{...}` or `[...]` is taken.
pub fn extract_json_block(content: &str) -> Option<&str> {
    let trimmed = content.trim();
    let unfenced = strip_fences(trimmed);
    let start = unfenced.find(['{', '['])?;
    let open = unfenced.as_bytes()[start] as char;
    let close = if open == '{' { '}' } else { ']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in unfenced[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&unfenced[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_fences(content: &str) -> &str {
    let mut inner = content;
    for prefix in ["```json", "```"] {
        if let Some(rest) = inner.strip_prefix(prefix) {
            inner = rest;
            break;
        }
    }
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Parse tool-flavored or elicitation-flavored JSON out of content and fold
/// it into the plan. Empty elicitations are skipped; an elicitation without
/// an id gets a fresh UUID.
pub fn extend_plan_from_content(plan: &mut Plan, content: &str) {
    let Some(block) = extract_json_block(content) else {
        return;
    };
    let Ok(parsed) = serde_json::from_str::<Value>(block) else {
        return;
    };

    if parsed.get("steps").is_some() || parsed.is_array() {
        let steps_value = if parsed.is_array() {
            parsed.clone()
        } else {
            parsed["steps"].clone()
        };
        if let Ok(mut steps) = serde_json::from_value::<Vec<Step>>(steps_value) {
            for step in &mut steps {
                if step.id.is_empty() {
                    step.id = uuid::Uuid::new_v4().to_string();
                }
            }
            plan.steps.extend(steps);
        }
        if let Some(elicitation) = parsed.get("elicitation") {
            fold_elicitation(plan, elicitation);
        }
        return;
    }

    if let Some(elicitation) = parsed.get("elicitation") {
        fold_elicitation(plan, elicitation);
        return;
    }
    if parsed.get("prompt").is_some() && parsed.get("schema").is_some() {
        fold_elicitation(plan, &parsed);
    }
}

fn fold_elicitation(plan: &mut Plan, value: &Value) {
    let Ok(mut elicitation) = serde_json::from_value::<Elicitation>(value.clone()) else {
        return;
    };
    if elicitation.is_empty() {
        return;
    }
    if elicitation.id.is_empty() {
        elicitation.id = uuid::Uuid::new_v4().to_string();
    }
    plan.elicitation = Some(elicitation);
}
