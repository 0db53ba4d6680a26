//! Opening SQLite connections and bringing their schema up to date.
use anyhow::Result;
use itertools::Itertools;
use log::*;

use crate::schema::{render_migrations, ATTACHMENTS, COMMENTS, MIGRATIONS_TABLE_SQL, RECORDS, RECORD_LINKS};
use crate::StoreConfig;

/// SQL that we run as part of opening a connection.
///
/// - Enables the busy timeout.
/// - Raises the default cache size, which SQLite keeps small so that it works on phones.
/// - Enables foreign key enforcement (though we don't expect foreign keys to be used).
fn initial_sql(config: &StoreConfig) -> String {
    format!(
        r#"
PRAGMA busy_timeout = {};
PRAGMA cache_size = -{};
PRAGMA foreign_keys = 1;
"#,
        config.busy_timeout_ms, config.cache_size_kib
    )
}

/// Only meaningful for files.  The WAL is checkpointed on open because it can grow quite large if a process dies
/// without getting to do so.
const WAL_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA wal_autocheckpoint = 10000;
PRAGMA wal_checkpoint(full);
"#;

/// Run the migrations, creating the migrations table if necessary.
///
/// Note that the migrations table is, in effect, the only thing we can't migrate without a lot of work.
fn run_migrations(conn: &mut rusqlite::Connection) -> Result<()> {
    let transaction = conn.transaction()?;
    transaction.execute(MIGRATIONS_TABLE_SQL, [])?;

    for (name, sql) in render_migrations()? {
        let had_migration = transaction
            .prepare("SELECT * FROM migrations WHERE name = ?")?
            .exists(rusqlite::params![name])?;
        if had_migration {
            continue;
        }

        let ran_at = (std::time::SystemTime::now().duration_since(std::time::SystemTime::UNIX_EPOCH)?)
            .as_secs_f64();
        let start_time = std::time::Instant::now();
        transaction.execute_batch(&sql)?;
        let duration = start_time.elapsed().as_secs_f64();
        info!("Ran migration {} in {:.3}s", name, duration);

        transaction.execute(
            "INSERT INTO migrations(name, sql, ran_at, duration) VALUES(?, ?, ?, ?)",
            rusqlite::params![name, sql.as_str(), ran_at, duration],
        )?;
    }

    transaction.commit()?;
    Ok(())
}

/// Open a connection as described by the config, with its schema migrated.
pub(crate) fn open_connection(config: &StoreConfig) -> Result<rusqlite::Connection> {
    info!("Opening SQLite database at {}", config.describe_path());
    info!(
        "{} has the following tables: {}",
        config.describe_path(),
        [RECORDS, RECORD_LINKS, COMMENTS, ATTACHMENTS].iter().join(", ")
    );

    let mut conn = match config.path.as_ref() {
        Some(p) => rusqlite::Connection::open(p)?,
        None => rusqlite::Connection::open_in_memory()?,
    };

    crate::sqlite::register_functions(&conn)?;
    conn.execute_batch(&initial_sql(config))?;
    if config.path.is_some() {
        conn.execute_batch(WAL_SQL)?;
    }
    run_migrations(&mut conn)?;
    Ok(conn)
}
