//! SQLite state storage

use crate::models::*;
use crate::{Error, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

const HOST_COLUMNS: &str = "id, name, endpoint, max_nodes, metadata, created_at";
const NODE_COLUMNS: &str = "id, name, image, node_id, staking_port, status, host_id, container_id, error_message, created_at, updated_at";
const L1_COLUMNS: &str = "id, node_id, network_id, metadata, created_at";
const EVENT_COLUMNS: &str = "id, timestamp, node_id, kind, detail";

/// Row counts per table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub hosts: u64,
    pub nodes: u64,
    pub l1s: u64,
    pub events: u64,
}

/// What happens to the cached container id in a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerRef {
    Keep,
    Set(String),
    Clear,
}

/// Compare-and-set of a node status, applied with its audit event in one transaction
#[derive(Debug, Clone)]
pub struct Transition {
    pub node: i64,
    pub from: NodeStatus,
    pub to: NodeStatus,
    pub container: ContainerRef,
    /// Stored while the node is in error, cleared by any other transition
    pub error_message: Option<String>,
    pub event: Option<(EventKind, String)>,
    pub drop_l1_bindings: bool,
}

impl Transition {
    pub fn new(node: i64, from: NodeStatus, to: NodeStatus) -> Self {
        Self {
            node,
            from,
            to,
            container: ContainerRef::Keep,
            error_message: None,
            event: None,
            drop_l1_bindings: false,
        }
    }

    pub fn set_container(mut self, id: impl Into<String>) -> Self {
        self.container = ContainerRef::Set(id.into());
        self
    }

    pub fn clear_container(mut self) -> Self {
        self.container = ContainerRef::Clear;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_event(mut self, kind: EventKind, detail: impl Into<String>) -> Self {
        self.event = Some((kind, detail.into()));
        self
    }

    pub fn dropping_l1_bindings(mut self) -> Self {
        self.drop_l1_bindings = true;
        self
    }
}

/// Node registration, inserted together with its L1 bindings and `created` event
#[derive(Debug, Clone)]
pub struct NewNode {
    pub name: String,
    pub image: String,
    pub staking_port: u16,
    pub host_id: i64,
    pub l1s: Vec<L1Request>,
}

impl ToSql for NodeStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for NodeStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for EventKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EventKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// JSON metadata is stored as text; unreadable text reads back as null
fn metadata_column(row: &Row, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default())
}

fn sql_limit(limit: EventLimit) -> i64 {
    i64::try_from(limit.get()).unwrap_or(i64::MAX)
}

/// Persistent store for hosts, nodes, L1 bindings and events
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS hosts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                endpoint TEXT NOT NULL,
                max_nodes INTEGER,
                metadata TEXT NOT NULL DEFAULT 'null',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                image TEXT NOT NULL,
                node_id TEXT,
                staking_port INTEGER NOT NULL,
                status TEXT NOT NULL CHECK (status IN
                    ('created', 'starting', 'running', 'stopping', 'stopped', 'deleting', 'deleted', 'error')),
                host_id INTEGER REFERENCES hosts(id) ON DELETE SET NULL,
                container_id TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK ((container_id IS NOT NULL) = (status IN ('starting', 'running', 'stopping', 'stopped')))
            );

            CREATE TABLE IF NOT EXISTS l1s (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
                network_id TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT 'null',
                created_at TEXT NOT NULL,
                UNIQUE (node_id, network_id)
            );

            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                node_id INTEGER REFERENCES nodes(id),
                kind TEXT NOT NULL,
                detail TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_active_name
                ON nodes(name) WHERE status != 'deleted';
            CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_active_port
                ON nodes(host_id, staking_port) WHERE status != 'deleted';
            CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(status);
            CREATE INDEX IF NOT EXISTS idx_events_node ON events(node_id);
            "#,
        )?;
        Ok(())
    }

    // ===== Hosts =====

    pub fn insert_host(&self, host: &NewHost) -> Result<Host> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO hosts (name, endpoint, max_nodes, metadata, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                host.name,
                host.endpoint,
                host.max_nodes,
                serde_json::to_string(&host.metadata)?,
                Utc::now()
            ],
        )?;
        let id = conn.last_insert_rowid();
        Self::query_host(&conn, id)?.ok_or_else(|| Error::host_not_found(id))
    }

    pub fn get_host(&self, id: i64) -> Result<Option<Host>> {
        let conn = self.conn.lock();
        Self::query_host(&conn, id)
    }

    pub fn get_host_by_name(&self, name: &str) -> Result<Option<Host>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM hosts WHERE name = ?1", HOST_COLUMNS),
            params![name],
            Self::row_to_host,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_hosts(&self) -> Result<Vec<Host>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM hosts ORDER BY id", HOST_COLUMNS))?;
        let hosts = stmt
            .query_map([], Self::row_to_host)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(hosts)
    }

    /// Delete a host no active node references. Returns false if it did not exist.
    pub fn delete_host(&self, id: i64) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let active = Self::count_active_on_host(&tx, id)?;
        if active > 0 {
            return Err(Error::Validation(format!(
                "host {} still has {} active node(s)",
                id, active
            )));
        }
        let rows = tx.execute("DELETE FROM hosts WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    pub fn count_active_nodes_on_host(&self, host_id: i64) -> Result<u64> {
        let conn = self.conn.lock();
        Self::count_active_on_host(&conn, host_id)
    }

    fn count_active_on_host(conn: &Connection, host_id: i64) -> Result<u64> {
        let n: i64 = conn.query_row(
            "SELECT count(*) FROM nodes WHERE host_id = ?1 AND status != 'deleted'",
            params![host_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    fn query_host(conn: &Connection, id: i64) -> Result<Option<Host>> {
        conn.query_row(
            &format!("SELECT {} FROM hosts WHERE id = ?1", HOST_COLUMNS),
            params![id],
            Self::row_to_host,
        )
        .optional()
        .map_err(Into::into)
    }

    fn row_to_host(row: &Row) -> rusqlite::Result<Host> {
        Ok(Host {
            id: row.get(0)?,
            name: row.get(1)?,
            endpoint: row.get(2)?,
            max_nodes: row.get(3)?,
            metadata: metadata_column(row, 4)?,
            created_at: row.get(5)?,
        })
    }

    // ===== Nodes =====

    /// Insert a node in `created` status with its bindings and `created` event
    pub fn insert_node(&self, node: &NewNode) -> Result<Node> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();
        tx.execute(
            r#"INSERT INTO nodes (name, image, node_id, staking_port, status, host_id, container_id, error_message, created_at, updated_at)
               VALUES (?1, ?2, NULL, ?3, ?4, ?5, NULL, NULL, ?6, ?6)"#,
            params![
                node.name,
                node.image,
                node.staking_port,
                NodeStatus::Created,
                node.host_id,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();
        for l1 in &node.l1s {
            Self::insert_l1_row(&tx, id, l1)?;
        }
        Self::insert_event_row(
            &tx,
            &NewEvent::node(
                id,
                EventKind::Created,
                format!("node {} created from image {}", node.name, node.image),
            ),
        )?;
        let created = Self::query_node(&tx, id)?.ok_or_else(|| Error::node_not_found(id))?;
        tx.commit()?;
        Ok(created)
    }

    pub fn get_node(&self, id: i64) -> Result<Option<Node>> {
        let conn = self.conn.lock();
        Self::query_node(&conn, id)
    }

    /// Active (not deleted) node with this name
    pub fn get_active_node_by_name(&self, name: &str) -> Result<Option<Node>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM nodes WHERE name = ?1 AND status != 'deleted'",
                NODE_COLUMNS
            ),
            params![name],
            Self::row_to_node,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_nodes(&self, include_deleted: bool) -> Result<Vec<Node>> {
        let conn = self.conn.lock();
        let sql = if include_deleted {
            format!("SELECT {} FROM nodes ORDER BY id", NODE_COLUMNS)
        } else {
            format!(
                "SELECT {} FROM nodes WHERE status != 'deleted' ORDER BY id",
                NODE_COLUMNS
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let nodes = stmt
            .query_map([], Self::row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    pub fn list_nodes_with_status(&self, statuses: &[NodeStatus]) -> Result<Vec<Node>> {
        let nodes = self.list_nodes(true)?;
        Ok(nodes
            .into_iter()
            .filter(|n| statuses.contains(&n.status))
            .collect())
    }

    /// Whether an active node on the host already publishes this port
    pub fn port_in_use(&self, host_id: i64, staking_port: u16) -> Result<bool> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT count(*) FROM nodes WHERE host_id = ?1 AND staking_port = ?2 AND status != 'deleted'",
            params![host_id, staking_port],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Apply a status transition if the node is still in `from`
    pub fn transition(&self, t: &Transition) -> Result<Node> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let (current, container_id): (NodeStatus, Option<String>) = tx
            .query_row(
                "SELECT status, container_id FROM nodes WHERE id = ?1",
                params![t.node],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| Error::node_not_found(t.node))?;

        if current != t.from {
            return Err(Error::Store(format!(
                "node {} changed status concurrently: expected {}, found {}",
                t.node, t.from, current
            )));
        }

        let container_id = match &t.container {
            ContainerRef::Keep => container_id,
            ContainerRef::Set(id) => Some(id.clone()),
            ContainerRef::Clear => None,
        };

        tx.execute(
            "UPDATE nodes SET status = ?1, container_id = ?2, error_message = ?3, updated_at = ?4 WHERE id = ?5 AND status = ?6",
            params![t.to, container_id, t.error_message, Utc::now(), t.node, t.from],
        )?;

        if t.drop_l1_bindings {
            tx.execute("DELETE FROM l1s WHERE node_id = ?1", params![t.node])?;
        }

        if let Some((kind, detail)) = &t.event {
            Self::insert_event_row(&tx, &NewEvent::node(t.node, *kind, detail.clone()))?;
        }

        let node = Self::query_node(&tx, t.node)?.ok_or_else(|| Error::node_not_found(t.node))?;
        tx.commit()?;
        Ok(node)
    }

    pub fn set_node_identity(&self, id: i64, node_id: &str) -> Result<Node> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "UPDATE nodes SET node_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![node_id, Utc::now(), id],
        )?;
        if rows == 0 {
            return Err(Error::node_not_found(id));
        }
        Self::query_node(&conn, id)?.ok_or_else(|| Error::node_not_found(id))
    }

    fn query_node(conn: &Connection, id: i64) -> Result<Option<Node>> {
        conn.query_row(
            &format!("SELECT {} FROM nodes WHERE id = ?1", NODE_COLUMNS),
            params![id],
            Self::row_to_node,
        )
        .optional()
        .map_err(Into::into)
    }

    fn row_to_node(row: &Row) -> rusqlite::Result<Node> {
        Ok(Node {
            id: row.get(0)?,
            name: row.get(1)?,
            image: row.get(2)?,
            node_id: row.get(3)?,
            staking_port: row.get(4)?,
            status: row.get(5)?,
            host_id: row.get(6)?,
            container_id: row.get(7)?,
            error_message: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    // ===== L1 bindings =====

    pub fn insert_l1(&self, node_id: i64, l1: &L1Request) -> Result<L1Binding> {
        let conn = self.conn.lock();
        Self::insert_l1_row(&conn, node_id, l1)
    }

    pub fn list_l1_bindings(&self, node_id: i64) -> Result<Vec<L1Binding>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM l1s WHERE node_id = ?1 ORDER BY id",
            L1_COLUMNS
        ))?;
        let bindings = stmt
            .query_map(params![node_id], Self::row_to_l1)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(bindings)
    }

    fn insert_l1_row(conn: &Connection, node_id: i64, l1: &L1Request) -> Result<L1Binding> {
        conn.execute(
            "INSERT INTO l1s (node_id, network_id, metadata, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                node_id,
                l1.network_id,
                serde_json::to_string(&l1.metadata)?,
                Utc::now()
            ],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {} FROM l1s WHERE id = ?1", L1_COLUMNS),
            params![id],
            Self::row_to_l1,
        )
        .map_err(Into::into)
    }

    fn row_to_l1(row: &Row) -> rusqlite::Result<L1Binding> {
        Ok(L1Binding {
            id: row.get(0)?,
            node_id: row.get(1)?,
            network_id: row.get(2)?,
            metadata: metadata_column(row, 3)?,
            created_at: row.get(4)?,
        })
    }

    // ===== Events =====

    pub fn append_event(&self, event: &NewEvent) -> Result<Event> {
        let conn = self.conn.lock();
        Self::insert_event_row(&conn, event)
    }

    /// Newest first
    pub fn list_events(&self, limit: EventLimit) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events ORDER BY id DESC LIMIT ?1",
            EVENT_COLUMNS
        ))?;
        let events = stmt
            .query_map(params![sql_limit(limit)], Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Newest first, for one node
    pub fn list_node_events(&self, node_id: i64, limit: EventLimit) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events WHERE node_id = ?1 ORDER BY id DESC LIMIT ?2",
            EVENT_COLUMNS
        ))?;
        let events = stmt
            .query_map(params![node_id, sql_limit(limit)], Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn insert_event_row(conn: &Connection, event: &NewEvent) -> Result<Event> {
        conn.execute(
            "INSERT INTO events (timestamp, node_id, kind, detail) VALUES (?1, ?2, ?3, ?4)",
            params![Utc::now(), event.node_id, event.kind, event.detail],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLUMNS),
            params![id],
            Self::row_to_event,
        )
        .map_err(Into::into)
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
        Ok(Event {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            node_id: row.get(2)?,
            kind: row.get(3)?,
            detail: row.get(4)?,
        })
    }

    // ===== Status =====

    pub fn counts(&self) -> Result<TableCounts> {
        let conn = self.conn.lock();
        // Table names are constants, not input
        let count = |table: &str| -> Result<u64> {
            let n: i64 = conn.query_row(&format!("SELECT count(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
            Ok(n as u64)
        };
        Ok(TableCounts {
            hosts: count("hosts")?,
            nodes: count("nodes")?,
            l1s: count("l1s")?,
            events: count("events")?,
        })
    }
}
