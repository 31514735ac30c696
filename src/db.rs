use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::errors::PersistenceError;
use crate::mode::Mode;
use crate::models::{ApplicationRecord, Opportunity, OpportunityStatus, ScoringResult, Source};

type DbResult<T> = std::result::Result<T, PersistenceError>;

const OPPORTUNITY_COLUMNS: &str = "id, title, company, location, description, requirements, \
     technologies, salary_range, url, source, discovered_at, status, score";

const APPLICATION_COLUMNS: &str = "opportunity_id, job_title, company, mode, sophistication_score, \
     personalization_depth, parallel_efficiency, generated_at, follow_up_at, package_json";

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(&Self::default_path())
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn default_path() -> PathBuf {
        match directories::ProjectDirs::from("", "", "commander") {
            Some(dirs) => dirs.data_dir().join("commander.db"),
            None => PathBuf::from("commander.db"),
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS opportunities (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                location TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                requirements TEXT NOT NULL DEFAULT '[]',
                technologies TEXT NOT NULL DEFAULT '[]',
                salary_range TEXT,
                url TEXT,
                source TEXT NOT NULL,
                discovered_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'discovered'
                    CHECK (status IN ('discovered', 'queued', 'generated', 'submitted', 'rejected')),
                score REAL NOT NULL DEFAULT 0,
                scoring_json TEXT,
                dedup_key TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS applications (
                opportunity_id TEXT PRIMARY KEY REFERENCES opportunities(id),
                job_title TEXT NOT NULL,
                company TEXT NOT NULL,
                mode TEXT NOT NULL,
                sophistication_score REAL NOT NULL,
                personalization_depth REAL NOT NULL,
                parallel_efficiency REAL NOT NULL,
                generated_at TEXT NOT NULL,
                follow_up_at TEXT NOT NULL,
                package_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_opportunities_status ON opportunities(status);
            CREATE INDEX IF NOT EXISTS idx_opportunities_score ON opportunities(score);
            CREATE INDEX IF NOT EXISTS idx_opportunities_dedup ON opportunities(dedup_key);
            CREATE INDEX IF NOT EXISTS idx_applications_generated ON applications(generated_at);
            CREATE INDEX IF NOT EXISTS idx_applications_follow_up ON applications(follow_up_at);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='opportunities'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!(
                "Database not initialized. Run 'commander init' first."
            ));
        }
        Ok(())
    }

    // --- Opportunity operations ---

    /// Insert-or-update by id. Never moves a stored status backwards and never
    /// drops a stored score in favor of an unscored copy.
    pub fn save_opportunity(&self, opp: &Opportunity) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        let stored: Option<String> = tx
            .query_row(
                "SELECT status FROM opportunities WHERE id = ?1",
                [&opp.id],
                |row| row.get(0),
            )
            .optional()?;
        let status = match stored.and_then(|s| s.parse::<OpportunityStatus>().ok()) {
            Some(current) if !current.can_advance_to(opp.status) => current,
            _ => opp.status,
        };

        tx.execute(
            "INSERT INTO opportunities
                (id, title, company, location, description, requirements, technologies,
                 salary_range, url, source, discovered_at, status, score, dedup_key)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                company = excluded.company,
                location = excluded.location,
                description = excluded.description,
                requirements = excluded.requirements,
                technologies = excluded.technologies,
                salary_range = excluded.salary_range,
                url = excluded.url,
                source = excluded.source,
                status = excluded.status,
                score = CASE WHEN excluded.score > 0 THEN excluded.score ELSE opportunities.score END,
                dedup_key = excluded.dedup_key,
                updated_at = datetime('now')",
            params![
                opp.id,
                opp.title,
                opp.company,
                opp.location,
                opp.description,
                serde_json::to_string(&opp.requirements)?,
                serde_json::to_string(&opp.technologies)?,
                opp.salary_range,
                opp.url,
                opp.source.as_str(),
                opp.discovered_at,
                status.as_str(),
                opp.relevance_score,
                opp.dedup_key(),
            ],
        )?;

        tx.commit()?;
        debug!(id = %opp.id, %status, "Saved opportunity");
        Ok(())
    }

    /// `save_opportunity` for callers that only need to know whether it worked.
    pub fn save(&self, opp: &Opportunity) -> bool {
        match self.save_opportunity(opp) {
            Ok(()) => true,
            Err(e) => {
                error!(id = %opp.id, error = %e, "Failed to save opportunity");
                false
            }
        }
    }

    pub fn get_opportunity(&self, id: &str) -> DbResult<Option<Opportunity>> {
        let sql = format!("SELECT {} FROM opportunities WHERE id = ?1", OPPORTUNITY_COLUMNS);
        let result = self.conn.query_row(&sql, [id], Self::row_to_opportunity);
        match result {
            Ok(opp) => Ok(Some(opp)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// A stored posting with the same normalized title and company but a
    /// different id.
    pub fn find_duplicate(&self, opp: &Opportunity) -> DbResult<Option<Opportunity>> {
        let sql = format!(
            "SELECT {} FROM opportunities WHERE dedup_key = ?1 AND id != ?2
             ORDER BY discovered_at ASC LIMIT 1",
            OPPORTUNITY_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![opp.dedup_key(), opp.id], Self::row_to_opportunity)
            .optional()?)
    }

    /// Removes a posting along with any application generated for it.
    pub fn delete_opportunity(&self, id: &str) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM applications WHERE opportunity_id = ?1", [id])?;
        let deleted = tx.execute("DELETE FROM opportunities WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(PersistenceError::NotFound(id.to_string()));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn query_by_status(
        &self,
        status: OpportunityStatus,
        limit: usize,
    ) -> DbResult<Vec<Opportunity>> {
        let sql = format!(
            "SELECT {} FROM opportunities WHERE status = ?1
             ORDER BY score DESC, discovered_at ASC LIMIT ?2",
            OPPORTUNITY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![status.as_str(), limit as i64], Self::row_to_opportunity)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_top_opportunities(&self, limit: usize) -> DbResult<Vec<Opportunity>> {
        let sql = format!(
            "SELECT {} FROM opportunities WHERE status = 'discovered' AND score > 0
             ORDER BY score DESC, discovered_at DESC LIMIT ?1",
            OPPORTUNITY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([limit as i64], Self::row_to_opportunity)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_opportunities(&self, limit: usize) -> DbResult<Vec<Opportunity>> {
        let sql = format!(
            "SELECT {} FROM opportunities ORDER BY score DESC, discovered_at ASC LIMIT ?1",
            OPPORTUNITY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([limit as i64], Self::row_to_opportunity)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn update_status(&self, id: &str, status: OpportunityStatus) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let current: Option<String> = tx
            .query_row("SELECT status FROM opportunities WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        let current = current
            .ok_or_else(|| PersistenceError::NotFound(id.to_string()))?
            .parse::<OpportunityStatus>()
            .map_err(|e| conversion_error(0, e))?;

        if !current.can_advance_to(status) {
            return Err(PersistenceError::StatusRegression {
                id: id.to_string(),
                from: current,
                to: status,
            });
        }
        tx.execute(
            "UPDATE opportunities SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        tx.commit()?;
        debug!(id, from = %current, to = %status, "Status updated");
        Ok(())
    }

    /// The one way back: returns an opportunity to `discovered`.
    pub fn reset_status(&self, id: &str) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE opportunities SET status = 'discovered', updated_at = datetime('now') WHERE id = ?1",
            [id],
        )?;
        if changed == 0 {
            return Err(PersistenceError::NotFound(id.to_string()));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn attach_score(&self, id: &str, result: &ScoringResult) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE opportunities SET score = ?1, scoring_json = ?2, updated_at = datetime('now')
             WHERE id = ?3",
            params![result.overall_score, serde_json::to_string(result)?, id],
        )?;
        if changed == 0 {
            return Err(PersistenceError::NotFound(id.to_string()));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_score(&self, id: &str) -> DbResult<Option<ScoringResult>> {
        let raw: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT scoring_json FROM opportunities WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        match raw.flatten() {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn count_with_status(&self, status: OpportunityStatus) -> DbResult<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM opportunities WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn count_by_status(&self) -> DbResult<Vec<(OpportunityStatus, i64)>> {
        let mut counts = Vec::new();
        for status in OpportunityStatus::ALL {
            counts.push((status, self.count_with_status(status)? as i64));
        }
        Ok(counts)
    }

    fn row_to_opportunity(row: &rusqlite::Row) -> rusqlite::Result<Opportunity> {
        let source: String = row.get(9)?;
        let status: String = row.get(11)?;
        Ok(Opportunity {
            id: row.get(0)?,
            title: row.get(1)?,
            company: row.get(2)?,
            location: row.get(3)?,
            description: row.get(4)?,
            requirements: json_column(row, 5)?,
            technologies: json_column(row, 6)?,
            salary_range: row.get(7)?,
            url: row.get(8)?,
            source: Source::from(source),
            discovered_at: row.get(10)?,
            status: status
                .parse::<OpportunityStatus>()
                .map_err(|e| conversion_error(11, e))?,
            relevance_score: row.get(12)?,
        })
    }

    // --- Application operations ---

    pub fn save_application(&self, record: &ApplicationRecord) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO applications
                (opportunity_id, job_title, company, mode, sophistication_score,
                 personalization_depth, parallel_efficiency, generated_at, follow_up_at, package_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.opportunity_id,
                record.job_title,
                record.company,
                record.mode.as_str(),
                record.sophistication_score,
                record.personalization_depth,
                record.parallel_efficiency,
                record.generated_at,
                record.follow_up_at,
                serde_json::to_string(&record.package)?,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_applications(&self) -> DbResult<Vec<ApplicationRecord>> {
        let sql = format!(
            "SELECT {} FROM applications ORDER BY generated_at DESC",
            APPLICATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_application)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_applications_since(&self, since: DateTime<Utc>) -> DbResult<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM applications WHERE generated_at >= ?1",
            [since],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Applications whose follow-up date has arrived, oldest first.
    pub fn due_follow_ups(&self, now: DateTime<Utc>) -> DbResult<Vec<ApplicationRecord>> {
        let sql = format!(
            "SELECT {} FROM applications a
             JOIN opportunities o ON o.id = a.opportunity_id
             WHERE a.follow_up_at <= ?1 AND o.status != 'rejected'
             ORDER BY a.follow_up_at ASC",
            APPLICATION_COLUMNS
                .split(", ")
                .map(|c| format!("a.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([now], Self::row_to_application)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<ApplicationRecord> {
        let mode: String = row.get(3)?;
        Ok(ApplicationRecord {
            opportunity_id: row.get(0)?,
            job_title: row.get(1)?,
            company: row.get(2)?,
            mode: mode.parse::<Mode>().map_err(|e| conversion_error(3, e))?,
            sophistication_score: row.get(4)?,
            personalization_depth: row.get(5)?,
            parallel_efficiency: row.get(6)?,
            generated_at: row.get(7)?,
            follow_up_at: row.get(8)?,
            package: json_column(row, 9)?,
        })
    }
}

fn json_column<T: DeserializeOwned>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn conversion_error(idx: usize, message: impl Into<String>) -> rusqlite::Error {
    let message: String = message.into();
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}
