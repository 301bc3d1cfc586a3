use sea_orm_migration::prelude::*;

use crate::m20251016_000001_create_tables::Roles;

const ROLE_NAMES: [&str; 3] = ["Admin", "Cashier", "User"];

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let mut insert = Query::insert();
        insert.into_table(Roles::Table).columns([Roles::Name]);
        for name in ROLE_NAMES {
            insert.values_panic([name.into()]);
        }
        manager.exec_stmt(insert).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .exec_stmt(
                Query::delete()
                    .from_table(Roles::Table)
                    .and_where(Expr::col(Roles::Name).is_in(ROLE_NAMES))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}
