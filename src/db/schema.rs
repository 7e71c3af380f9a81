use anyhow::{Context, Result};
use rusqlite::Connection;

use super::StorageLocation;

struct Migration {
    version: &'static str,
    name: &'static str,
    sql: &'static str,
}

/// Migration SQL uses `{features}` and `{gates}` placeholders for the
/// configured table names.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "001",
        name: "initial",
        sql: include_str!("migrations/001_initial.sql"),
    },
    Migration {
        version: "002",
        name: "unique_gate_values",
        sql: include_str!("migrations/002_unique_gate_values.sql"),
    },
    Migration {
        version: "003",
        name: "unique_feature_keys",
        sql: include_str!("migrations/003_unique_feature_keys.sql"),
    },
];

fn render(sql: &str, location: &StorageLocation) -> String {
    sql.replace("{features}", location.features_table())
        .replace("{gates}", location.gates_table())
}

/// Migrations are tracked per location so two locations can share a file.
fn tracking_table(location: &StorageLocation) -> String {
    format!("{}_schema_migrations", location.features_table())
}

pub fn run_migrations(conn: &Connection, location: &StorageLocation) -> Result<()> {
    let tracking = tracking_table(location);

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            version TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        tracking
    ))
    .with_context(|| format!("Failed to create {} table", tracking))?;

    // Tables created by another tool before version tracking existed
    let needs_baseline = check_needs_baseline(conn, location)?;
    if needs_baseline {
        mark_migration_applied(conn, location, "001", "initial")?;
        tracing::info!(
            "Detected existing {} and {} tables, marked migration 001 as applied",
            location.features_table(),
            location.gates_table()
        );
    }

    let applied = get_applied_migrations(conn, location)?;

    for migration in MIGRATIONS {
        if !applied.contains(&migration.version.to_string()) {
            apply_migration(conn, location, migration)?;
        }
    }

    Ok(())
}

fn check_needs_baseline(conn: &Connection, location: &StorageLocation) -> Result<bool> {
    let migration_count: i32 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", tracking_table(location)),
        [],
        |row| row.get(0),
    )?;

    if migration_count > 0 {
        return Ok(false);
    }

    // 001 only creates missing tables, so a partial layout runs it instead
    let tables_exist: i32 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN (?1, ?2)",
        [location.features_table(), location.gates_table()],
        |row| row.get(0),
    )?;

    Ok(tables_exist == 2)
}

fn get_applied_migrations(conn: &Connection, location: &StorageLocation) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT version FROM {} ORDER BY version",
        tracking_table(location)
    ))?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(versions)
}

fn mark_migration_applied(
    conn: &Connection,
    location: &StorageLocation,
    version: &str,
    name: &str,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        &format!(
            "INSERT INTO {} (version, name, applied_at) VALUES (?, ?, ?)",
            tracking_table(location)
        ),
        (version, name, &now),
    )?;
    Ok(())
}

fn apply_migration(
    conn: &Connection,
    location: &StorageLocation,
    migration: &Migration,
) -> Result<()> {
    tracing::info!(
        "Applying migration {}: {} ({})",
        migration.version,
        migration.name,
        location.features_table()
    );

    conn.execute_batch(&format!(
        "BEGIN TRANSACTION; {} COMMIT;",
        render(migration.sql, location)
    ))
    .with_context(|| {
        format!(
            "Failed to apply migration {}: {}",
            migration.version, migration.name
        )
    })?;

    mark_migration_applied(conn, location, migration.version, migration.name)?;

    tracing::info!("Migration {} applied successfully", migration.version);
    Ok(())
}
