use crate::domain::model::{DeploymentRun, HealthState, UnitStatus};
use std::fmt::Write;

fn unit_marker(status: UnitStatus) -> &'static str {
    match status {
        UnitStatus::Ready => "✅",
        UnitStatus::Failed => "❌",
        UnitStatus::Skipped => "⏭️",
        _ => "⏳",
    }
}

/// Human-readable summary: every unit in application order, then probes,
/// the load test, and every error with the stage it happened in.
pub fn render_report(run: &DeploymentRun) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Run {} ({})", run.id(), run.graph());
    let _ = writeln!(out, "State: {}", run.state());
    if let Some(finished) = run.finished_at() {
        let secs = (finished - run.started_at()).num_milliseconds() as f64 / 1000.0;
        let _ = writeln!(out, "Duration: {:.1}s", secs);
    }

    let _ = writeln!(out, "\nUnits:");
    for (index, unit) in run.units().iter().enumerate() {
        let _ = write!(
            out,
            "  {}. {} {:<12} {}",
            index + 1,
            unit_marker(unit.status),
            unit.id,
            unit.status
        );
        if let Some(ms) = unit.ready_after_ms {
            let _ = write!(out, " in {:.1}s", ms as f64 / 1000.0);
        }
        if unit.attempts > 1 {
            let _ = write!(out, " after {} attempts", unit.attempts);
        }
        if let Some(note) = &unit.note {
            let _ = write!(out, " ({})", note);
        }
        out.push('\n');
    }

    if !run.probes().is_empty() {
        let _ = writeln!(out, "\nObservability:");
        for probe in run.probes() {
            let marker = match probe.health {
                HealthState::Healthy => "💚",
                _ => "💔",
            };
            let _ = writeln!(
                out,
                "  {} {} [{}] {}{}",
                marker,
                probe.endpoint,
                probe.kind,
                probe.health,
                if probe.required { "" } else { " (optional)" }
            );
        }
    }

    if let Some(load) = run.load_test() {
        let _ = writeln!(out, "\nLoad test against {}:", load.target_url());
        let _ = writeln!(
            out,
            "  {} requests, {} failures ({:.2}%), {:.1} rps",
            load.total_requests(),
            load.total_failures(),
            load.error_rate() * 100.0,
            load.rps()
        );
        let _ = writeln!(
            out,
            "  p50 {:.0}ms / p95 {:.0}ms / p99 {:.0}ms across {} worker(s)",
            load.p50_ms(),
            load.p95_ms(),
            load.p99_ms(),
            load.worker_users().len()
        );
    }

    if run.is_degraded() {
        let _ = writeln!(out, "\nDegraded:");
        for reason in run.degraded_reasons() {
            let _ = writeln!(out, "  - {}", reason);
        }
    }

    if !run.errors().is_empty() {
        let _ = writeln!(out, "\nErrors:");
        for error in run.errors() {
            match &error.unit {
                Some(unit) => {
                    let _ = writeln!(out, "  [{}] {} {}: {}", error.stage, unit, error.kind, error.message);
                }
                None => {
                    let _ = writeln!(out, "  [{}] {}: {}", error.stage, error.kind, error.message);
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::RunState;
    use crate::utils::error::OrchestratorError;

    #[test]
    fn test_report_lists_units_and_errors() {
        let mut run = DeploymentRun::new("run_20261016_120000_abcd1234", "voting-app");
        run.set_order(vec!["redis".into(), "worker".into(), "result".into()]);
        run.transition(RunState::Deploying).unwrap();
        run.update_unit("redis", |u| {
            u.set_status(UnitStatus::Ready);
            u.ready_after_ms = Some(4200);
        });
        run.update_unit("worker", |u| {
            u.set_status(UnitStatus::Failed);
            u.attempts = 5;
        });
        run.update_unit("result", |u| u.set_status(UnitStatus::Skipped));
        run.record_error(
            RunState::Deploying,
            Some("worker"),
            &OrchestratorError::TransientApplyError {
                manifest: "k8s/worker.yaml".into(),
                message: "503".into(),
            },
        );
        run.transition(RunState::Failed).unwrap();

        let report = render_report(&run);
        assert!(report.contains("State: Failed"));
        assert!(report.contains("redis"));
        assert!(report.contains("in 4.2s"));
        assert!(report.contains("after 5 attempts"));
        assert!(report.contains("[Deploying] worker TransientApplyError"));

        let redis = report.find("redis").unwrap();
        let worker = report.find("worker").unwrap();
        let result = report.find("result").unwrap();
        assert!(redis < worker && worker < result);
    }
}
