pub mod manager;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod queryset;

pub use manager::{Database, DatabaseError, DatabaseManager, Row, Transaction};
pub use memory::MemoryDatabase;
pub use model::{row_id, Link, ModelDef, Ownership, SYSTEM_COLUMNS};
pub use postgres::PgDatabase;
pub use queryset::{timestamp_now, Manager, QuerySet};
