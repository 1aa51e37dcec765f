use serde_json::json;

use crate::cli::{Action, OutputFormat};
use crate::controller::{Decision, InstanceState, Outcome};
use crate::error::ControlError;

pub fn print(outcome: &Outcome, format: OutputFormat) -> Result<(), ControlError> {
    let out = match format {
        OutputFormat::Text => render_text(outcome)?,
        OutputFormat::Json => serde_json::to_string_pretty(outcome)
            .map_err(|e| ControlError::Render(e.to_string()))?,
    };
    println!("{out}");
    Ok(())
}

pub fn render_text(outcome: &Outcome) -> Result<String, ControlError> {
    let params = serde_json::to_string_pretty(&json!({
        "serviceStopped": outcome.service_stopped,
        "requestedOperation": outcome.requested_operation,
    }))
    .map_err(|e| ControlError::Render(e.to_string()))?;

    let mut lines = vec![
        "Instance parameters:".to_string(),
        params,
        format!("Instance '{}' state: {}", outcome.instance_name, outcome.state),
    ];

    match &outcome.decision {
        Decision::Report => {}
        Decision::Skip { operation } => {
            lines.push(format!("Instance has ongoing operation: {operation}"));
            lines.push("Skipping action to avoid 422 error".to_string());
        }
        Decision::AlreadyInState { state } => lines.push(already_line(outcome.action, *state)),
        Decision::Patch { service_stopped } => {
            let verb = if *service_stopped { "Stopping" } else { "Starting" };
            if outcome.dry_run {
                lines.push(format!(
                    "Dry run: would be {} HANA Cloud instance {}",
                    verb.to_lowercase(),
                    outcome.instance_id
                ));
            } else {
                lines.push(format!("{verb} HANA Cloud instance {}...", outcome.instance_id));
                if outcome.applied {
                    lines.push(format!("{verb} request accepted"));
                }
            }
        }
    }

    if let Some(state) = outcome.final_state {
        lines.push(format!("Instance '{}' reached {state}", outcome.instance_name));
    }

    Ok(lines.join("\n"))
}

fn already_line(action: Action, state: InstanceState) -> String {
    match (action, state) {
        (Action::Autostart, _) => "Instance already running (autostart skipped)".to_string(),
        (_, InstanceState::Stopped) => "Instance already stopped".to_string(),
        _ => "Instance already running".to_string(),
    }
}
