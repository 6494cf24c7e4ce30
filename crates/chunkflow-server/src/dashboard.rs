//! Minimal server-rendered dashboard: the attention queue on top, the full
//! work-unit grid below. Forms post form-encoded bodies to the answer and
//! resolve endpoints; a small script reloads the page on WebSocket pushes.

use chunkflow_state::{AttentionItem, WorkUnit};

const PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Chunkflow Orchestrator</title>
<style>
  body { font-family: system-ui, sans-serif; margin: 2rem; color: #1a1a1a; }
  h1 { font-size: 1.4rem; }
  h2 { font-size: 1.1rem; margin-top: 2rem; }
  table { border-collapse: collapse; width: 100%; }
  th, td { text-align: left; padding: 0.4rem 0.8rem; border-bottom: 1px solid #ddd; }
  .status-READY { color: #2563eb; }
  .status-RUNNING { color: #16a34a; }
  .status-BLOCKED { color: #a16207; }
  .status-NEEDS_ATTENTION { color: #dc2626; font-weight: 600; }
  .status-DONE { color: #6b7280; }
  form { display: inline; }
  input[type=text] { width: 14rem; }
  .empty { color: #6b7280; font-style: italic; }
</style>
</head>
<body>
<h1>Chunkflow Orchestrator</h1>
<h2>Attention queue</h2>
{{ATTENTION}}
<h2>Work units</h2>
{{WORK_UNITS}}
<script>
  const ws = new WebSocket(`ws://${location.host}/ws`);
  let scheduled = false;
  ws.onmessage = () => {
    if (scheduled) return;
    scheduled = true;
    setTimeout(() => location.reload(), 500);
  };
</script>
</body>
</html>
"#;

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn attention_table(items: &[AttentionItem]) -> String {
    if items.is_empty() {
        return "<p class=\"empty\">Nothing needs attention.</p>".to_string();
    }
    let mut rows = String::new();
    for item in items {
        let chunk = escape(&item.unit.chunk);
        let reason = escape(item.unit.attention_reason.as_deref().unwrap_or(""));
        let summary = escape(item.goal_summary.as_deref().unwrap_or(""));
        let is_question = item
            .unit
            .attention_reason
            .as_deref()
            .map(|r| r.starts_with("Question:"))
            .unwrap_or(false);
        let action = if is_question {
            format!(
                "<form method=\"post\" action=\"/work-units/{chunk}/answer\">\
                 <input type=\"text\" name=\"answer\" placeholder=\"answer\">\
                 <button type=\"submit\">Answer</button></form>"
            )
        } else if reason.to_lowercase().contains("merge to base failed") {
            format!(
                "<form method=\"post\" action=\"/work-units/{chunk}/retry-merge\">\
                 <button type=\"submit\">Retry merge</button></form>"
            )
        } else {
            String::new()
        };
        rows.push_str(&format!(
            "<tr><td>{chunk}</td><td>{}</td><td>{reason}</td><td>{}</td>\
             <td>{:.0}s</td><td>{summary}</td><td>{action}</td></tr>\n",
            item.unit.phase, item.blocks_count, item.time_waiting,
        ));
    }
    format!(
        "<table><tr><th>Chunk</th><th>Phase</th><th>Reason</th><th>Blocks</th>\
         <th>Waiting</th><th>Goal</th><th>Action</th></tr>\n{rows}</table>"
    )
}

fn work_unit_table(units: &[WorkUnit]) -> String {
    if units.is_empty() {
        return "<p class=\"empty\">No work units.</p>".to_string();
    }
    let mut rows = String::new();
    for unit in units {
        let blocked_by = escape(&unit.blocked_by.join(", "));
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td>\
             <td class=\"status-{}\">{}</td><td>{}</td><td>{blocked_by}</td></tr>\n",
            escape(&unit.chunk),
            unit.phase,
            unit.status,
            unit.status,
            unit.priority,
        ));
    }
    format!(
        "<table><tr><th>Chunk</th><th>Phase</th><th>Status</th><th>Priority</th>\
         <th>Blocked by</th></tr>\n{rows}</table>"
    )
}

/// Render the dashboard page.
pub fn render(attention: &[AttentionItem], units: &[WorkUnit]) -> String {
    PAGE.replace("{{ATTENTION}}", &attention_table(attention))
        .replace("{{WORK_UNITS}}", &work_unit_table(units))
}
