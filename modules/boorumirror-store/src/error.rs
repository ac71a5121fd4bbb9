/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt row: {0}")]
    Decode(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("No unit of work is open")]
    NoOpenUnit,

    #[error("A unit of work is already open")]
    UnitAlreadyOpen,
}
