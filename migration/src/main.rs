use migration::Migrator;
use std::{env, fs, path::Path};

mod runner;

const USAGE: &str = "usage: migration [up|status|fresh|clean]";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let db_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "data/attendance.db".into());
    let url = format!("sqlite://{}?mode=rwc", db_path);
    let command = env::args().nth(1);

    match command.as_deref() {
        None | Some("up") => {
            ensure_parent_dir(&db_path);
            runner::migrate::<Migrator>(&url).await;
        }
        Some("status") => {
            ensure_parent_dir(&db_path);
            runner::status::<Migrator>(&url).await;
        }
        Some("fresh") => {
            delete_database(&db_path);
            ensure_parent_dir(&db_path);
            runner::migrate::<Migrator>(&url).await;
        }
        Some("clean") => delete_database(&db_path),
        Some(other) => {
            eprintln!("unknown command '{other}'\n{USAGE}");
            std::process::exit(2);
        }
    }
}

/// Removes the SQLite file along with its WAL and shared-memory siblings.
fn delete_database(path: &str) {
    let mut removed = false;
    for suffix in ["", "-wal", "-shm"] {
        let file = format!("{path}{suffix}");
        if Path::new(&file).exists() {
            fs::remove_file(&file).expect("Failed to delete database file");
            removed = true;
        }
    }
    if removed {
        println!("Deleted database {}", path);
    } else {
        println!("No database at {}", path);
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent).expect("Failed to create database directory");
    }
}
