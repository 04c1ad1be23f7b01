//! Human-readable error descriptions and structured JSON error formatting.

use brew_core::error::{BrewError, BuildError, FaultCategory, FaultRecord};

use crate::brew::{Interrupted, TookTooLong};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(fault) = err.downcast_ref::<FaultRecord>() {
        let causes = match fault.category {
            FaultCategory::Scale => {
                "Scale out of Bluetooth range, asleep, or out of battery."
            }
            FaultCategory::Timeseries => "Time-series store stopped, full, or unreachable.",
            FaultCategory::Hardware | FaultCategory::Valve => {
                "Valve jammed, motor driver unpowered, or wiring fault."
            }
            _ => "See logs.",
        };
        return format!(
            "What happened: The brew stopped with a {:?} fault: {}.\nLikely causes: {causes}\nHow to fix: {}",
            fault.category, fault.message, fault.recovery_suggestion
        );
    }

    if err.downcast_ref::<Interrupted>().is_some() {
        return "What happened: The brew was killed from the keyboard.\nLikely causes: Ctrl-C.\nHow to fix: Start a new brew when ready.".to_string();
    }

    if let Some(TookTooLong(elapsed)) = err.downcast_ref::<TookTooLong>() {
        return format!(
            "What happened: The brew had not reached its target weight after {}.\nLikely causes: Target weight beyond what the brewer holds, a clogged filter, or an empty tower.\nHow to fix: Check the tower and the filter, or raise --max-hours.",
            crate::brew::hms(*elapsed)
        );
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingScale => {
                "What happened: No scale was provided to the brew engine.\nLikely causes: The scale failed to initialize or was not wired into the builder.\nHow to fix: Ensure a scale is created successfully and passed via with_scale(...).".to_string()
            }
            BuildError::MissingValve => {
                "What happened: No valve was provided to the brew engine.\nLikely causes: The valve driver failed to initialize or was not wired into the builder.\nHow to fix: Ensure the valve is created successfully and passed via with_valve(...).".to_string()
            }
            BuildError::MissingStore => {
                "What happened: No time-series store was provided to the brew engine.\nLikely causes: The store failed to initialize or was not wired into the builder.\nHow to fix: Ensure a store is created successfully and passed via with_store(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid engine configuration ({msg}).\nLikely causes: Out-of-range values in [sampling] or [store].\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(be) = err.downcast_ref::<BrewError>() {
        return match be {
            BrewError::Config(msg) => format!(
                "What happened: Invalid brew settings ({msg}).\nLikely causes: Missing or out-of-range values in [brew] or [strategy.params].\nHow to fix: Edit the config file, then rerun. `coldbrew strategies` lists the parameters of each strategy."
            ),
            BrewError::Conflict(id) => format!(
                "What happened: Brew {id} is still running.\nLikely causes: A previous brew was not killed.\nHow to fix: Kill the running brew first."
            ),
            BrewError::Disconnected | BrewError::Timeout => {
                "What happened: The scale did not answer.\nLikely causes: Scale asleep, out of range, or out of battery.\nHow to fix: Wake the scale, move it closer, or replace its battery.".to_string()
            }
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from config loading
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("trace csv must have headers") {
        return "Invalid headers in trace CSV. Expected 'seconds,weight'.".to_string();
    }

    if lower.contains("parse config") || lower.contains("invalid configuration") {
        let cause = err
            .chain()
            .nth(1)
            .map(|c| format!(" ({c})"))
            .unwrap_or_default();
        return format!(
            "What happened: Configuration is invalid{cause}.\nLikely causes: Unknown keys, wrong types, or out-of-range values.\nHow to fix: Edit the TOML config and try again."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.chain().nth(1) {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: brew faults by category, 2 for bad configuration,
/// 130 for Ctrl-C and 1 for everything else.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(fault) = err.downcast_ref::<FaultRecord>() {
        return match fault.category {
            FaultCategory::Scale => 3,
            FaultCategory::Timeseries => 4,
            FaultCategory::Hardware | FaultCategory::Valve => 5,
            _ => 1,
        };
    }
    if err.downcast_ref::<Interrupted>().is_some() {
        return 130;
    }
    if err.downcast_ref::<TookTooLong>().is_some() {
        return 6;
    }
    if matches!(err.downcast_ref::<BrewError>(), Some(BrewError::Config(_)))
        || matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::InvalidConfig(_))
        )
    {
        return 2;
    }
    let lower = err.to_string().to_ascii_lowercase();
    if lower.contains("parse config") || lower.contains("invalid configuration") {
        return 2;
    }
    1
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    if let Some(fault) = err.downcast_ref::<FaultRecord>() {
        return json!({ "reason": "Fault", "fault": fault, "message": humanize(err) }).to_string();
    }
    let reason = if err.downcast_ref::<Interrupted>().is_some() {
        "Interrupted"
    } else if err.downcast_ref::<TookTooLong>().is_some() {
        "TookTooLong"
    } else if exit_code_for_error(err) == 2 {
        "Config"
    } else {
        "Error"
    };
    json!({ "reason": reason, "message": humanize(err) }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn faults_map_to_stable_codes() {
        let e = BrewError::Disconnected;
        let scale = eyre::Report::new(FaultRecord::scale_lost(3, &e, Utc::now()));
        assert_eq!(exit_code_for_error(&scale), 3);
        assert!(humanize(&scale).contains("power cycling"));

        let valve = eyre::Report::new(FaultRecord::valve_failed(&e, Utc::now()));
        assert_eq!(exit_code_for_error(&valve), 5);

        let cfg = eyre::Report::new(BrewError::Config("brew.epsilon".into()));
        assert_eq!(exit_code_for_error(&cfg), 2);
        assert_eq!(exit_code_for_error(&eyre::Report::new(Interrupted)), 130);
    }

    #[test]
    fn fault_json_carries_the_record() {
        let e = BrewError::Store("down".into());
        let err = eyre::Report::new(FaultRecord::store_failing(5, &e, Utc::now()));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "Fault");
        assert_eq!(v["fault"]["category"], "timeseries");
        assert_eq!(v["fault"]["retryable"], true);
    }
}
