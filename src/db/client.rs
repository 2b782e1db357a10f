//! Warehouse connection wrapper

use anyhow::{Context, Result};
use postgres::{Client, NoTls};
use tracing::debug;

use crate::config::DatabaseConfig;

/// Minimal SQL execution surface the staging pipeline depends on
///
/// The connection runs in manual-commit mode; transaction boundaries are
/// issued explicitly through the helpers below.
pub trait SqlExecutor {
    fn exec(&mut self, sql: &str) -> Result<()>;

    fn begin(&mut self) -> Result<()> {
        self.exec("BEGIN;")
    }

    fn commit(&mut self) -> Result<()> {
        self.exec("COMMIT;")
    }

    fn rollback(&mut self) -> Result<()> {
        self.exec("ROLLBACK;")
    }
}

/// A live warehouse connection
pub struct DbClient {
    client: Client,
}

impl DbClient {
    /// Open a fresh connection to the warehouse database
    pub fn connect(cfg: &DatabaseConfig, nossl: bool) -> Result<DbClient> {
        let mut pg = postgres::Config::new();
        pg.host(&cfg.host)
            .port(cfg.port)
            .dbname(&cfg.database_name)
            .user(&cfg.admin_user)
            .password(&cfg.admin_password);
        if nossl {
            pg.ssl_mode(postgres::config::SslMode::Disable);
        }
        let client = pg.connect(NoTls).with_context(|| {
            format!(
                "connecting to database {} at {}:{}",
                cfg.database_name, cfg.host, cfg.port
            )
        })?;
        Ok(DbClient { client })
    }
}

impl SqlExecutor for DbClient {
    fn exec(&mut self, sql: &str) -> Result<()> {
        debug!(sql, "executing");
        self.client
            .batch_execute(sql)
            .with_context(|| "executing SQL statement")?;
        Ok(())
    }
}
