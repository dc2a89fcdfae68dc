use colored::*;
use sea_orm::DatabaseConnection;
use sea_orm_migration::prelude::*;
use sea_orm_migration::MigrationStatus;
use std::io::{self, Write};
use std::time::Instant;

const STATUS_COLUMN: usize = 72;

async fn connect(url: &str) -> DatabaseConnection {
    sea_orm::Database::connect(url)
        .await
        .expect("DB connection failed")
}

/// Applies pending migrations one at a time, printing a progress line for each.
pub async fn migrate<M: MigratorTrait>(url: &str) {
    let db = connect(url).await;
    let pending = match M::get_pending_migrations(&db).await {
        Ok(pending) => pending,
        Err(err) => {
            println!("{} {}", "could not read migration table:".red(), err);
            std::process::exit(1);
        }
    };

    if pending.is_empty() {
        println!("{}", "Schema is up to date".dimmed());
        return;
    }

    println!("Applying {} migration(s)...", pending.len());
    for migration in pending {
        let name = migration.name();
        let dots = ".".repeat(STATUS_COLUMN.saturating_sub(name.len() + 2));
        print!("  {}{} ", name.bold(), dots);
        let _ = io::stdout().flush();

        let start = Instant::now();
        match M::up(&db, Some(1)).await {
            Ok(()) => {
                let time_str = format!("({:.2?})", start.elapsed()).dimmed();
                println!("{} {}", "done".green(), time_str);
            }
            Err(err) => {
                println!("{} {}", "failed".red(), err);
                std::process::exit(1);
            }
        }
    }
}

/// Lists every known migration with whether it has been applied.
pub async fn status<M: MigratorTrait>(url: &str) {
    let db = connect(url).await;
    let migrations = match M::get_migration_with_status(&db).await {
        Ok(migrations) => migrations,
        Err(err) => {
            println!("{} {}", "could not read migration table:".red(), err);
            std::process::exit(1);
        }
    };

    for migration in migrations {
        let state = match migration.status() {
            MigrationStatus::Applied => "applied".green(),
            MigrationStatus::Pending => "pending".yellow(),
        };
        println!("{:<width$} {}", migration.name(), state, width = STATUS_COLUMN);
    }
}
