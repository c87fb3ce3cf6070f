//! Catalog SQL for the virtual metadata views.
//!
//! Each constant projects a stable set of lowercase column names so filter
//! predicates and consumers never depend on backend catalog spellings.
//! Identifier columns are cast to text to keep decoding uniform.

pub const SCHEMAS: &str = r#"
    SELECT
        n.nspname::text AS schema_name,
        pg_catalog.pg_get_userbyid(n.nspowner)::text AS schema_owner
    FROM pg_catalog.pg_namespace n
    WHERE n.nspname NOT LIKE 'pg\_%'
    AND n.nspname <> 'information_schema'
    "#;

pub const TABLES: &str = r#"
    SELECT
        t.table_schema::text AS schema_name,
        t.table_name::text AS table_name,
        t.table_type::text AS table_type
    FROM information_schema.tables t
    WHERE t.table_type = 'BASE TABLE'
    AND t.table_schema NOT IN ('pg_catalog', 'information_schema')
    "#;

pub const COLUMNS: &str = r#"
    SELECT
        c.table_schema::text AS schema_name,
        c.table_name::text AS table_name,
        c.column_name::text AS column_name,
        c.data_type::text AS data_type,
        (c.is_nullable = 'YES') AS is_nullable,
        c.column_default::text AS column_default,
        c.character_maximum_length::int4 AS character_maximum_length,
        c.ordinal_position::int4 AS ordinal_position
    FROM information_schema.columns c
    WHERE c.table_schema NOT IN ('pg_catalog', 'information_schema')
    "#;

pub const PRIMARY_KEYS: &str = r#"
    SELECT
        tc.table_schema::text AS schema_name,
        tc.table_name::text AS table_name,
        tc.constraint_name::text AS constraint_name,
        string_agg(kcu.column_name::text, ',' ORDER BY kcu.ordinal_position) AS column_names
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
        ON tc.constraint_name = kcu.constraint_name
        AND tc.table_schema = kcu.table_schema
    WHERE tc.constraint_type = 'PRIMARY KEY'
    GROUP BY tc.table_schema, tc.table_name, tc.constraint_name
    "#;

pub const FOREIGN_KEYS: &str = r#"
    SELECT
        tc.table_schema::text AS schema_name,
        tc.table_name::text AS table_name,
        tc.constraint_name::text AS constraint_name,
        kcu.column_name::text AS column_name,
        ccu.table_name::text AS foreign_table_name,
        ccu.column_name::text AS foreign_column_name,
        rc.update_rule::text AS update_rule,
        rc.delete_rule::text AS delete_rule
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
        ON tc.constraint_name = kcu.constraint_name
        AND tc.table_schema = kcu.table_schema
    JOIN information_schema.constraint_column_usage ccu
        ON ccu.constraint_name = tc.constraint_name
        AND ccu.table_schema = tc.table_schema
    JOIN information_schema.referential_constraints rc
        ON rc.constraint_name = tc.constraint_name
        AND rc.constraint_schema = tc.table_schema
    WHERE tc.constraint_type = 'FOREIGN KEY'
    "#;
