use std::env;

use anyhow::{Context, Result};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;

use shift_scheduler::{
    auth::password::hash_password,
    config::AppConfig,
    db,
    scheduling::shifts::{ensure_default_shift, mismatched_assignments, positions_without_shifts},
};

const USAGE: &str = "Usage: maintenance <ensure-default-shifts | audit | hash-password <password>>";

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("ensure-default-shifts") => ensure_default_shifts()?,
        Some("audit") => audit()?,
        Some("hash-password") => {
            let password = args.next().context(USAGE)?;
            println!("{}", hash_password(&password)?);
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<db::PgPool> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        "loaded configuration"
    );
    db::init_pool_with_size(&config.database_url, config.database_max_pool_size)
}

fn ensure_default_shifts() -> Result<()> {
    let pool = connect()?;
    let mut pooled = pool.get().context("failed to get database connection")?;
    let conn: &mut PgConnection = &mut pooled;

    let missing = positions_without_shifts(conn).context("failed to load positions")?;
    if missing.is_empty() {
        println!("Every active position already has a shift.");
        return Ok(());
    }

    println!("Adding an All Day shift to {} positions…", missing.len());
    let mut created = 0usize;
    for position in &missing {
        let shift = conn
            .transaction(|conn| ensure_default_shift(conn, position.id))
            .with_context(|| format!("failed to add shift to position {}", position.id))?;
        if shift.is_some() {
            created += 1;
            tracing::info!(
                event_id = %position.event_id,
                position_id = %position.id,
                position_number = position.position_number,
                "added default shift"
            );
        }
    }

    println!("Created {created} shifts.");
    Ok(())
}

fn audit() -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let missing = positions_without_shifts(&mut conn).context("failed to load positions")?;
    println!("Active positions without shifts: {}", missing.len());
    for position in &missing {
        println!(
            "  event {} position {} ({})",
            position.event_id, position.position_number, position.name
        );
    }

    let mismatched = mismatched_assignments(&mut conn).context("failed to load assignments")?;
    println!("Assignments whose shift belongs to another position: {}", mismatched.len());
    for (assignment_id, position_id, shift_position_id) in &mismatched {
        println!(
            "  assignment {assignment_id}: position {position_id}, shift on {shift_position_id}"
        );
    }

    if !mismatched.is_empty() {
        std::process::exit(2);
    }
    Ok(())
}
