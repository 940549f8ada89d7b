// Database schema definitions and migrations
// Statements are idempotent and safe to run on every startup.

pub const AUDIT_EVENTS_SCHEMA: &str = include_str!("../../migrations/001_audit_events.sql");

pub const MIGRATIONS: &[(&str, &str)] = &[("001_audit_events", AUDIT_EVENTS_SCHEMA)];
