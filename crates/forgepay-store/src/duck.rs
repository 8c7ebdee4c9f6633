//! DuckDB relational store for organizations, projects, milestones, and evidences.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use duckdb::{Connection, Row, params};
use forgepay_core::ordering::{parse_timestamp_key, timestamp_key};
use forgepay_core::{
    AccountId, Evidence, Milestone, MilestoneStatus, Organization, OrganizationType, Project,
    ProjectStatus,
};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::{SettlementStore, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS organizations (
    id              VARCHAR PRIMARY KEY,
    legal_name      VARCHAR NOT NULL,
    tax_id          VARCHAR,
    address         VARCHAR,
    business_type   VARCHAR,
    industry_type   VARCHAR,
    org_type        VARCHAR NOT NULL,
    wallet_address  VARCHAR,
    created_at      VARCHAR NOT NULL,
    deleted_at      VARCHAR
);
CREATE TABLE IF NOT EXISTS projects (
    id                      VARCHAR PRIMARY KEY,
    engagement_id           VARCHAR NOT NULL UNIQUE,
    title                   VARCHAR NOT NULL,
    description             VARCHAR NOT NULL,
    total_amount            DECIMAL(38, 7) NOT NULL,
    expected_delivery_date  DATE NOT NULL,
    status                  VARCHAR NOT NULL,
    contract_id             VARCHAR UNIQUE,
    contractor_id           VARCHAR NOT NULL,
    freelancer_id           VARCHAR NOT NULL,
    created_at              VARCHAR NOT NULL
);
CREATE TABLE IF NOT EXISTS milestones (
    id              VARCHAR PRIMARY KEY,
    project_id      VARCHAR NOT NULL,
    title           VARCHAR NOT NULL,
    description     VARCHAR NOT NULL,
    percentage      INTEGER NOT NULL CHECK (percentage BETWEEN 0 AND 100),
    status          VARCHAR NOT NULL,
    contract_index  INTEGER,
    created_at      VARCHAR NOT NULL
);
CREATE TABLE IF NOT EXISTS evidences (
    id              VARCHAR PRIMARY KEY,
    milestone_id    VARCHAR NOT NULL,
    file_url        VARCHAR NOT NULL,
    description     VARCHAR,
    created_at      VARCHAR NOT NULL
);
";

const TABLES: &[&str] = &["organizations", "projects", "milestones", "evidences"];

const ORGANIZATION_COLUMNS: &str = "id, legal_name, tax_id, address, business_type, \
    industry_type, org_type, wallet_address, created_at, deleted_at";

const PROJECT_COLUMNS: &str = "id, engagement_id, title, description, \
    CAST(total_amount AS VARCHAR), CAST(expected_delivery_date AS VARCHAR), status, \
    contract_id, contractor_id, freelancer_id, created_at";

const PROJECT_INSERT_COLUMNS: &str = "id, engagement_id, title, description, total_amount, \
    expected_delivery_date, status, contract_id, contractor_id, freelancer_id, created_at";

const MILESTONE_COLUMNS: &str =
    "id, project_id, title, description, percentage, status, contract_index, created_at";

/// DuckDB store for the settlement tables.
///
/// Timestamps are stored as fixed-width UTC strings (see
/// [`forgepay_core::ordering`]) so `ORDER BY created_at` is chronological.
/// Amounts are `DECIMAL(38, 7)`, matching the ledger's seven decimal places.
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes.
/// Use [`open`](Self::open) for in-memory and [`open_persistent`](Self::open_persistent)
/// for file-backed storage that survives across process restarts.
pub struct DuckStore {
    conn: Mutex<Connection>,
}

impl DuckStore {
    /// Open an in-memory database with the schema created.
    pub fn open() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open or create a persistent database at the given path.
    ///
    /// The schema is created if missing; existing rows are left untouched.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.init_schema()?;
        info!(path = %path.display(), "opened settlement store");
        Ok(store)
    }

    /// Create all tables if they do not exist yet.
    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Check whether every settlement table exists.
    pub fn has_tables(&self) -> bool {
        let Ok(conn) = self.conn() else {
            return false;
        };
        let names = TABLES
            .iter()
            .map(|t| format!("'{t}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT count(*)::BIGINT FROM information_schema.tables WHERE table_name IN ({names})"
        );
        conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
            .is_ok_and(|n| n as usize == TABLES.len())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Other("connection lock poisoned".into()))
    }

    // ── Counts ──

    /// Number of rows in the `projects` table.
    pub fn project_count(&self) -> Result<usize, StoreError> {
        self.count_table("projects")
    }

    /// Number of rows in the `milestones` table.
    pub fn milestone_count(&self) -> Result<usize, StoreError> {
        self.count_table("milestones")
    }

    fn count_table(&self, table: &str) -> Result<usize, StoreError> {
        let sql = format!("SELECT count(*)::BIGINT AS cnt FROM {table}");
        let count: i64 = self.conn()?.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ── Organizations ──

    pub fn insert_organization(&self, org: &Organization) -> Result<(), StoreError> {
        self.conn()?.execute(
            &format!(
                "INSERT INTO organizations ({ORGANIZATION_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                org.id,
                org.legal_name,
                org.tax_id,
                org.address,
                org.business_type,
                org.industry_type,
                org.org_type.as_str(),
                org.wallet_address.as_ref().map(AccountId::as_str),
                timestamp_key(org.created_at),
                org.deleted_at.map(timestamp_key),
            ],
        )?;
        info!(org_id = %org.id, org_type = org.org_type.as_str(), "inserted organization");
        Ok(())
    }

    /// Mark an organization deleted. Deleting twice is a no-op.
    pub fn soft_delete_organization(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE organizations SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
            params![timestamp_key(Utc::now()), id],
        )?;
        if changed == 0 && !row_exists(&conn, "organizations", id)? {
            return Err(StoreError::NotFound {
                entity: "organization",
                id: id.to_string(),
            });
        }
        info!(org_id = %id, "soft-deleted organization");
        Ok(())
    }

    /// Organizations that have not been soft-deleted, by legal name.
    pub fn active_organizations(&self) -> Result<Vec<Organization>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations \
             WHERE deleted_at IS NULL ORDER BY legal_name, id"
        ))?;
        let rows = stmt
            .query_map([], OrganizationRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(OrganizationRow::into_organization).collect()
    }

    // ── Evidences ──

    pub fn add_evidence(&self, evidence: &Evidence) -> Result<(), StoreError> {
        let conn = self.conn()?;
        if !row_exists(&conn, "milestones", &evidence.milestone_id)? {
            return Err(StoreError::NotFound {
                entity: "milestone",
                id: evidence.milestone_id.clone(),
            });
        }
        conn.execute(
            "INSERT INTO evidences (id, milestone_id, file_url, description, created_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                evidence.id,
                evidence.milestone_id,
                evidence.file_url,
                evidence.description,
                timestamp_key(evidence.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn evidences_for_milestone(&self, milestone_id: &str) -> Result<Vec<Evidence>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, milestone_id, file_url, description, created_at FROM evidences \
             WHERE milestone_id = ? ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(params![milestone_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, milestone_id, file_url, description, created_at)| {
                Ok(Evidence {
                    id,
                    milestone_id,
                    file_url,
                    description,
                    created_at: parse_ts("evidence", &created_at)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SettlementStore for DuckStore {
    async fn get_organization(&self, id: &str) -> Result<Organization, StoreError> {
        let row = self.conn()?.query_row(
            &format!("SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = ?"),
            params![id],
            OrganizationRow::read,
        );
        not_found_as("organization", id, row)?.into_organization()
    }

    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        self.conn()?.execute(
            &format!(
                "INSERT INTO projects ({PROJECT_INSERT_COLUMNS}) VALUES \
                 (?, ?, ?, ?, CAST(? AS DECIMAL(38, 7)), CAST(? AS DATE), ?, ?, ?, ?, ?)"
            ),
            params![
                project.id,
                project.engagement_id,
                project.title,
                project.description,
                project.total_amount.to_string(),
                project.expected_delivery_date.to_string(),
                project.status.as_str(),
                project.contract_id,
                project.contractor_id,
                project.freelancer_id,
                timestamp_key(project.created_at),
            ],
        )?;
        info!(
            project_id = %project.id,
            contract_id = project.contract_id.as_deref().unwrap_or("-"),
            "inserted project"
        );
        Ok(())
    }

    async fn get_project(&self, id: &str) -> Result<Project, StoreError> {
        let row = self.conn()?.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"),
            params![id],
            ProjectRow::read,
        );
        not_found_as("project", id, row)?.into_project()
    }

    async fn find_project_by_engagement(
        &self,
        engagement_id: &str,
    ) -> Result<Option<Project>, StoreError> {
        let row = self.conn()?.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE engagement_id = ?"),
            params![engagement_id],
            ProjectRow::read,
        );
        match row {
            Ok(row) => row.into_project().map(Some),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_project_status(
        &self,
        id: &str,
        from: ProjectStatus,
        to: ProjectStatus,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        compare_and_set_status(&conn, "projects", "project", id, from.as_str(), to.as_str())
    }

    async fn insert_milestones(&self, milestones: &[Milestone]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for m in milestones {
            tx.execute(
                &format!(
                    "INSERT INTO milestones ({MILESTONE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    m.id,
                    m.project_id,
                    m.title,
                    m.description,
                    m.percentage as i32,
                    m.status.as_str(),
                    m.contract_index.map(|i| i as i32),
                    timestamp_key(m.created_at),
                ],
            )?;
        }
        tx.commit()?;
        debug!(count = milestones.len(), "inserted milestones");
        Ok(())
    }

    async fn get_milestone(&self, id: &str) -> Result<Milestone, StoreError> {
        let row = self.conn()?.query_row(
            &format!("SELECT {MILESTONE_COLUMNS} FROM milestones WHERE id = ?"),
            params![id],
            MilestoneRow::read,
        );
        not_found_as("milestone", id, row)?.into_milestone()
    }

    async fn milestones_for_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<Milestone>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MILESTONE_COLUMNS} FROM milestones \
             WHERE project_id = ? ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params![project_id], MilestoneRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(MilestoneRow::into_milestone).collect()
    }

    async fn update_milestone_status(
        &self,
        id: &str,
        from: MilestoneStatus,
        to: MilestoneStatus,
    ) -> Result<(), StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::Other(format!(
                "milestone {id}: illegal status transition {from} -> {to}"
            )));
        }
        let conn = self.conn()?;
        compare_and_set_status(&conn, "milestones", "milestone", id, from.as_str(), to.as_str())
    }
}

// ── Helpers ──

fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, StoreError> {
    let sql = format!("SELECT count(*)::BIGINT FROM {table} WHERE id = ?");
    let n: i64 = conn.query_row(&sql, params![id], |row| row.get(0))?;
    Ok(n > 0)
}

fn compare_and_set_status(
    conn: &Connection,
    table: &str,
    entity: &'static str,
    id: &str,
    from: &str,
    to: &str,
) -> Result<(), StoreError> {
    let sql = format!("UPDATE {table} SET status = ? WHERE id = ? AND status = ?");
    let changed = conn.execute(&sql, params![to, id, from])?;
    if changed == 1 {
        info!(entity, id, from, to, "status updated");
        return Ok(());
    }
    if row_exists(conn, table, id)? {
        Err(StoreError::StaleStatus {
            entity,
            id: id.to_string(),
            expected: from.to_string(),
        })
    } else {
        Err(StoreError::NotFound {
            entity,
            id: id.to_string(),
        })
    }
}

fn not_found_as<T>(
    entity: &'static str,
    id: &str,
    result: duckdb::Result<T>,
) -> Result<T, StoreError> {
    match result {
        Ok(v) => Ok(v),
        Err(duckdb::Error::QueryReturnedNoRows) => Err(StoreError::NotFound {
            entity,
            id: id.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

fn corrupt(entity: &'static str, detail: impl ToString) -> StoreError {
    StoreError::Corrupt {
        entity,
        detail: detail.to_string(),
    }
}

fn parse_ts(entity: &'static str, s: &str) -> Result<DateTime<Utc>, StoreError> {
    parse_timestamp_key(s).map_err(|e| corrupt(entity, format!("timestamp {s:?}: {e}")))
}

fn parse_field<T: FromStr>(entity: &'static str, s: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    s.parse().map_err(|e: T::Err| corrupt(entity, format!("{s:?}: {e}")))
}

// ── Row mapping ──

struct OrganizationRow {
    id: String,
    legal_name: String,
    tax_id: Option<String>,
    address: Option<String>,
    business_type: Option<String>,
    industry_type: Option<String>,
    org_type: String,
    wallet_address: Option<String>,
    created_at: String,
    deleted_at: Option<String>,
}

impl OrganizationRow {
    fn read(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            legal_name: row.get(1)?,
            tax_id: row.get(2)?,
            address: row.get(3)?,
            business_type: row.get(4)?,
            industry_type: row.get(5)?,
            org_type: row.get(6)?,
            wallet_address: row.get(7)?,
            created_at: row.get(8)?,
            deleted_at: row.get(9)?,
        })
    }

    fn into_organization(self) -> Result<Organization, StoreError> {
        const E: &str = "organization";
        Ok(Organization {
            org_type: parse_field::<OrganizationType>(E, &self.org_type)?,
            wallet_address: self
                .wallet_address
                .as_deref()
                .map(|w| parse_field::<AccountId>(E, w))
                .transpose()?,
            created_at: parse_ts(E, &self.created_at)?,
            deleted_at: self.deleted_at.as_deref().map(|d| parse_ts(E, d)).transpose()?,
            id: self.id,
            legal_name: self.legal_name,
            tax_id: self.tax_id,
            address: self.address,
            business_type: self.business_type,
            industry_type: self.industry_type,
        })
    }
}

struct ProjectRow {
    id: String,
    engagement_id: String,
    title: String,
    description: String,
    total_amount: String,
    expected_delivery_date: String,
    status: String,
    contract_id: Option<String>,
    contractor_id: String,
    freelancer_id: String,
    created_at: String,
}

impl ProjectRow {
    fn read(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            engagement_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            total_amount: row.get(4)?,
            expected_delivery_date: row.get(5)?,
            status: row.get(6)?,
            contract_id: row.get(7)?,
            contractor_id: row.get(8)?,
            freelancer_id: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_project(self) -> Result<Project, StoreError> {
        const E: &str = "project";
        Ok(Project {
            total_amount: parse_field::<Decimal>(E, &self.total_amount)?.normalize(),
            expected_delivery_date: parse_field::<NaiveDate>(E, &self.expected_delivery_date)?,
            status: parse_field::<ProjectStatus>(E, &self.status)?,
            created_at: parse_ts(E, &self.created_at)?,
            id: self.id,
            engagement_id: self.engagement_id,
            title: self.title,
            description: self.description,
            contract_id: self.contract_id,
            contractor_id: self.contractor_id,
            freelancer_id: self.freelancer_id,
        })
    }
}

struct MilestoneRow {
    id: String,
    project_id: String,
    title: String,
    description: String,
    percentage: i32,
    status: String,
    contract_index: Option<i32>,
    created_at: String,
}

impl MilestoneRow {
    fn read(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            percentage: row.get(4)?,
            status: row.get(5)?,
            contract_index: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_milestone(self) -> Result<Milestone, StoreError> {
        const E: &str = "milestone";
        Ok(Milestone {
            percentage: u8::try_from(self.percentage)
                .map_err(|_| corrupt(E, format!("percentage {}", self.percentage)))?,
            status: parse_field::<MilestoneStatus>(E, &self.status)?,
            contract_index: self
                .contract_index
                .map(|i| u32::try_from(i).map_err(|_| corrupt(E, format!("contract index {i}"))))
                .transpose()?,
            created_at: parse_ts(E, &self.created_at)?,
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            description: self.description,
        })
    }
}
