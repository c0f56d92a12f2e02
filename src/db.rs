use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS rooms (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS invites (
        id INTEGER PRIMARY KEY,
        invite TEXT NOT NULL UNIQUE,
        chatroom TEXT NOT NULL,
        expires INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS memberships (
        user_id TEXT NOT NULL,
        chatroom TEXT NOT NULL,
        PRIMARY KEY (user_id, chatroom)
    )",
    "CREATE TABLE IF NOT EXISTS current_rooms (
        user_id TEXT PRIMARY KEY,
        chatroom TEXT NOT NULL
    )",
    // partition = chatroom_name, clustering = message_id newest first
    "CREATE TABLE IF NOT EXISTS messages (
        chatroom_name TEXT NOT NULL,
        user_id TEXT NOT NULL,
        content TEXT NOT NULL,
        message_id INTEGER NOT NULL,
        PRIMARY KEY (chatroom_name, message_id DESC)
    ) WITHOUT ROWID",
];

pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    init_schema(&db_pool).await?;
    Ok(db_pool)
}

/// A private in-memory database. One connection, since every SQLite
/// in-memory connection is its own database.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&db_pool).await?;
    Ok(db_pool)
}

pub async fn init_schema(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(db_pool).await?;
    }
    tracing::debug!("database schema ready");
    Ok(())
}
