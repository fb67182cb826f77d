//! DDL for the three catalog namespaces of §3. Each namespace lives in its
//! own SQLite file (§4.A `create_schema`/`drop_schema`); `source` additionally
//! carries the run-coordination entities (`process`, `summary`, `sentinel`,
//! `timeline_history`) since those are scoped to a single migration run
//! rather than to a database side.

use super::CatalogKind;

pub fn ddl_for(kind: CatalogKind) -> &'static str {
    match kind {
        CatalogKind::Source => SOURCE_DDL,
        CatalogKind::Filter => FILTER_DDL,
        CatalogKind::Target => TARGET_DDL,
    }
}

pub fn drop_ddl_for(kind: CatalogKind) -> &'static str {
    match kind {
        CatalogKind::Source => SOURCE_DROP,
        CatalogKind::Filter => FILTER_DROP,
        CatalogKind::Target => TARGET_DROP,
    }
}

const SOURCE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS setup (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    source_dsn TEXT NOT NULL,
    target_dsn TEXT NOT NULL,
    snapshot_id TEXT,
    split_threshold_bytes INTEGER NOT NULL,
    split_max_parts INTEGER NOT NULL,
    filter_spec_json TEXT NOT NULL,
    plugin_name TEXT,
    slot_name TEXT
);

CREATE TABLE IF NOT EXISTS section (
    name TEXT PRIMARY KEY,
    fetched INTEGER NOT NULL DEFAULT 0,
    start_epoch INTEGER,
    done_epoch INTEGER,
    duration_ms INTEGER
);

CREATE TABLE IF NOT EXISTS s_table (
    oid INTEGER PRIMARY KEY,
    qname TEXT NOT NULL UNIQUE,
    nspname TEXT NOT NULL,
    relname TEXT NOT NULL,
    relkind TEXT NOT NULL,
    restore_list_name TEXT,
    est_pages INTEGER NOT NULL DEFAULT 0,
    est_tuples INTEGER NOT NULL DEFAULT 0,
    exclude_data INTEGER NOT NULL DEFAULT 0,
    part_key_column TEXT,
    bytes INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS s_attribute (
    table_oid INTEGER NOT NULL REFERENCES s_table(oid),
    position INTEGER NOT NULL,
    type_oid INTEGER NOT NULL,
    name TEXT NOT NULL,
    is_pkey_member INTEGER NOT NULL DEFAULT 0,
    is_generated INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (table_oid, position)
);

CREATE TABLE IF NOT EXISTS s_table_part (
    table_oid INTEGER NOT NULL REFERENCES s_table(oid),
    partnum INTEGER NOT NULL,
    partcount INTEGER NOT NULL,
    min TEXT,
    max TEXT,
    upper_bound_inclusive INTEGER NOT NULL DEFAULT 0,
    row_count INTEGER,
    PRIMARY KEY (table_oid, partnum)
);

CREATE TABLE IF NOT EXISTS s_table_checksum (
    table_oid INTEGER PRIMARY KEY REFERENCES s_table(oid),
    source_row_count INTEGER,
    source_checksum TEXT,
    target_row_count INTEGER,
    target_checksum TEXT
);

CREATE TABLE IF NOT EXISTS s_index (
    oid INTEGER PRIMARY KEY,
    qname TEXT NOT NULL UNIQUE,
    table_oid INTEGER NOT NULL REFERENCES s_table(oid),
    is_primary INTEGER NOT NULL DEFAULT 0,
    is_unique INTEGER NOT NULL DEFAULT 0,
    columns_json TEXT NOT NULL,
    definition TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS s_constraint (
    oid INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    index_oid INTEGER REFERENCES s_index(oid),
    table_oid INTEGER NOT NULL REFERENCES s_table(oid),
    is_deferrable INTEGER NOT NULL DEFAULT 0,
    initially_deferred INTEGER NOT NULL DEFAULT 0,
    definition TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS s_sequence (
    oid INTEGER PRIMARY KEY,
    qname TEXT NOT NULL UNIQUE,
    owning_table_oid INTEGER REFERENCES s_table(oid),
    owning_column TEXT,
    owning_attribute_oid INTEGER,
    last_value INTEGER NOT NULL DEFAULT 1,
    is_called INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS s_depend (
    nspname TEXT NOT NULL,
    relname TEXT NOT NULL,
    refclassid INTEGER NOT NULL,
    refobjid INTEGER NOT NULL,
    classid INTEGER NOT NULL,
    objid INTEGER NOT NULL,
    deptype TEXT NOT NULL,
    type TEXT NOT NULL,
    identity TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS process (
    pid INTEGER PRIMARY KEY,
    role TEXT NOT NULL,
    title TEXT NOT NULL,
    table_oid INTEGER,
    partnum INTEGER,
    index_oid INTEGER
);

CREATE UNIQUE INDEX IF NOT EXISTS process_partition_uq
    ON process(table_oid, partnum) WHERE index_oid IS NULL;

CREATE UNIQUE INDEX IF NOT EXISTS process_index_uq
    ON process(index_oid) WHERE index_oid IS NOT NULL;

CREATE TABLE IF NOT EXISTS summary (
    table_oid INTEGER,
    partnum INTEGER,
    index_oid INTEGER,
    pid INTEGER NOT NULL,
    start_epoch INTEGER NOT NULL,
    done_epoch INTEGER,
    duration_ms INTEGER,
    bytes INTEGER,
    command TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS summary_table_part_uq
    ON summary(table_oid, partnum) WHERE index_oid IS NULL;

CREATE TABLE IF NOT EXISTS sentinel (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    startpos TEXT NOT NULL DEFAULT '0/0',
    endpos TEXT NOT NULL DEFAULT '0/0',
    apply INTEGER NOT NULL DEFAULT 0,
    write_lsn TEXT NOT NULL DEFAULT '0/0',
    flush_lsn TEXT NOT NULL DEFAULT '0/0',
    replay_lsn TEXT NOT NULL DEFAULT '0/0'
);

CREATE TABLE IF NOT EXISTS timeline_history (
    tli INTEGER PRIMARY KEY,
    start_lsn TEXT NOT NULL,
    end_lsn TEXT
);
"#;

const SOURCE_DROP: &str = r#"
DROP TABLE IF EXISTS timeline_history;
DROP TABLE IF EXISTS sentinel;
DROP TABLE IF EXISTS summary;
DROP TABLE IF EXISTS process;
DROP TABLE IF EXISTS s_depend;
DROP TABLE IF EXISTS s_sequence;
DROP TABLE IF EXISTS s_constraint;
DROP TABLE IF EXISTS s_index;
DROP TABLE IF EXISTS s_table_checksum;
DROP TABLE IF EXISTS s_table_part;
DROP TABLE IF EXISTS s_attribute;
DROP TABLE IF EXISTS s_table;
DROP TABLE IF EXISTS section;
DROP TABLE IF EXISTS setup;
"#;

const FILTER_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS filter_entry (
    oid INTEGER,
    restore_list_name TEXT,
    kind TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS filter_entry_oid_uq
    ON filter_entry(oid) WHERE oid IS NOT NULL AND oid > 0;
"#;

const FILTER_DROP: &str = "DROP TABLE IF EXISTS filter_entry;";

const TARGET_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS s_table (
    oid INTEGER PRIMARY KEY,
    qname TEXT NOT NULL UNIQUE,
    nspname TEXT NOT NULL,
    relname TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS s_index (
    oid INTEGER PRIMARY KEY,
    qname TEXT NOT NULL UNIQUE,
    table_oid INTEGER NOT NULL REFERENCES s_table(oid)
);

CREATE TABLE IF NOT EXISTS s_sequence (
    oid INTEGER PRIMARY KEY,
    qname TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS s_constraint (
    oid INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    table_oid INTEGER NOT NULL REFERENCES s_table(oid)
);
"#;

const TARGET_DROP: &str = r#"
DROP TABLE IF EXISTS s_constraint;
DROP TABLE IF EXISTS s_sequence;
DROP TABLE IF EXISTS s_index;
DROP TABLE IF EXISTS s_table;
"#;
