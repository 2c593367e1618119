//! `mnemo doctor`: database diagnostics.

use anyhow::{Context, Result};

use mnemo::config::MnemoConfig;
use mnemo::db::{self, HealthReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    Warn,
    Fail,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Status::Ok => " ok ",
            Status::Warn => "warn",
            Status::Fail => "FAIL",
        }
    }
}

struct Check {
    status: Status,
    name: &'static str,
    detail: String,
}

fn check(status: Status, name: &'static str, detail: impl Into<String>) -> Check {
    Check {
        status,
        name,
        detail: detail.into(),
    }
}

/// Evaluate a health report against the active configuration.
fn evaluate(report: &HealthReport, config: &MnemoConfig) -> Vec<Check> {
    let mut checks = Vec::new();

    checks.push(if report.integrity_ok {
        check(Status::Ok, "integrity", "PRAGMA integrity_check passed")
    } else {
        check(Status::Fail, "integrity", report.integrity_details.clone())
    });

    let expected = db::migrations::CURRENT_SCHEMA_VERSION;
    checks.push(if report.schema_version == expected {
        check(Status::Ok, "schema", format!("version {expected}"))
    } else {
        check(
            Status::Fail,
            "schema",
            format!("version {} (binary expects {expected})", report.schema_version),
        )
    });

    checks.push(check(
        Status::Ok,
        "sqlite-vec",
        report.sqlite_vec_version.clone(),
    ));

    let provider = config.embedding.provider.as_str();
    checks.push(match (provider, report.embedding_model.as_deref()) {
        ("none", _) => check(
            Status::Warn,
            "embedding",
            "provider 'none': recall runs on keyword overlap only",
        ),
        (_, None) => check(
            Status::Ok,
            "embedding",
            format!("{provider}/{} (recorded on first serve)", config.embedding.model),
        ),
        (_, Some(stored)) if stored == config.embedding.model => {
            check(Status::Ok, "embedding", format!("{provider}/{stored}"))
        }
        (_, Some(stored)) => check(
            Status::Warn,
            "embedding",
            format!(
                "configured '{}' but concepts were embedded with '{stored}'",
                config.embedding.model
            ),
        ),
    });

    checks.push(if config.decay.enabled {
        check(
            Status::Ok,
            "decay",
            format!(
                "rate {} every {} recalls",
                config.decay.rate, config.decay.interval
            ),
        )
    } else {
        check(Status::Warn, "decay", "disabled; factors are frozen")
    });

    checks
}

/// Run database diagnostics and print a health report.
pub fn doctor(config: &MnemoConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    if !db_path.exists() {
        println!("No database at {}", db_path.display());
        println!("It is created on the first `mnemo serve`, `mnemo recall` or `mnemo stats`.");
        return Ok(());
    }

    let size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
    let conn = db::open_database(&db_path).context("failed to open database")?;
    let report = db::check_database_health(&conn).context("health check failed")?;

    println!("{} ({})", db_path.display(), super::format_bytes(size));
    println!();
    let checks = evaluate(&report, config);
    for c in &checks {
        println!("[{}] {:<11} {}", c.status.label(), c.name, c.detail);
    }
    println!();
    println!(
        "{} concepts, {} relations, {} episodes, {} entities, {} audit rows",
        report.concept_count,
        report.relation_count,
        report.episode_count,
        report.entity_count,
        report.log_count
    );

    if checks.iter().any(|c| c.status == Status::Fail) {
        println!();
        println!("Stop every process using the database, then restore it from a backup.");
    }
    Ok(())
}
