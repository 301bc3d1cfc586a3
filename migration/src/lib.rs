pub use sea_orm_migration::prelude::*;

mod m20251016_000001_create_tables;
mod m20251016_000002_seed_roles;
mod m20251017_000003_unique_registered_email;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251016_000001_create_tables::Migration),
            Box::new(m20251016_000002_seed_roles::Migration),
            Box::new(m20251017_000003_unique_registered_email::Migration),
        ]
    }
}
