use rocket_db_pools::{Database, sqlx};

#[derive(Database)]
#[database("focus_db")]
pub struct FocusDb(sqlx::PgPool);
