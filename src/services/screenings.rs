use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait, sea_query::Expr,
};
use tracing::info;

use crate::{
    entities::{movie, screening, ticket},
    error::{AppError, AppResult},
    models::{ScreeningDto, ScreeningInput, ScreeningUpdate},
    services::now_sec,
};

#[derive(Clone)]
pub struct ScreeningService {
    db: DatabaseConnection,
}

impl ScreeningService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn list(&self) -> AppResult<Vec<ScreeningDto>> {
        self.list_from(None).await
    }

    /// Screenings that have not started yet, soonest first.
    pub async fn list_upcoming(&self) -> AppResult<Vec<ScreeningDto>> {
        self.list_from(Some(now_sec())).await
    }

    async fn list_from(&self, after: Option<i64>) -> AppResult<Vec<ScreeningDto>> {
        let mut query = screening::Entity::find()
            .find_also_related(movie::Entity)
            .order_by_asc(screening::Column::StartTime);
        if let Some(after) = after {
            query = query.filter(screening::Column::StartTime.gt(after));
        }

        query
            .all(&self.db)
            .await?
            .into_iter()
            .map(|(s, m)| ScreeningDto::new(s, m.map(|m| m.name).unwrap_or_default()))
            .collect()
    }

    pub async fn get(&self, id: i32) -> AppResult<ScreeningDto> {
        let (screening, movie) = screening::Entity::find_by_id(id)
            .find_also_related(movie::Entity)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::not_found("Screening not found."))?;
        ScreeningDto::new(screening, movie.map(|m| m.name).unwrap_or_default())
    }

    pub async fn add(&self, input: ScreeningInput) -> AppResult<ScreeningDto> {
        input.validate()?;
        let movie = movie::Entity::find_by_id(input.movie_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::not_found("Movie not found."))?;

        let model = screening::ActiveModel {
            movie_id: Set(movie.id),
            start_time: Set(input.start_time.as_second()),
            room: Set(input.room),
            capacity: Set(input.capacity),
            price: Set(input.price),
            seats_sold: Set(0),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        info!(
            screening_id = model.id,
            movie_id = movie.id,
            start = %input.start_time,
            "screening added"
        );
        ScreeningDto::new(model, movie.name)
    }

    /// Capacity may not drop below the seats already sold; the check rides on
    /// the update itself so a concurrent purchase cannot slip in between.
    pub async fn update(&self, id: i32, input: ScreeningUpdate) -> AppResult<ScreeningDto> {
        input.validate()?;
        let existing = screening::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::not_found("Screening not found."))?;

        let result = screening::Entity::update_many()
            .col_expr(screening::Column::StartTime, Expr::value(input.start_time.as_second()))
            .col_expr(screening::Column::Capacity, Expr::value(input.capacity))
            .col_expr(screening::Column::Price, Expr::value(input.price))
            .col_expr(screening::Column::Room, Expr::value(input.room))
            .filter(screening::Column::Id.eq(existing.id))
            .filter(screening::Column::SeatsSold.lte(input.capacity))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::conflict(format!(
                "Capacity cannot be lower than the {} seats already sold.",
                existing.seats_sold
            )));
        }

        info!(screening_id = id, "screening updated");
        self.get(id).await
    }

    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let txn = self.db.begin().await?;

        let screening = screening::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::not_found("Screening not found."))?;

        if screening.start_time <= now_sec() {
            return Err(AppError::conflict("Screening has already started."));
        }

        let sold = ticket::Entity::find()
            .filter(ticket::Column::ScreeningId.eq(id))
            .count(&txn)
            .await?;
        if sold > 0 {
            return Err(AppError::conflict(format!(
                "Screening has {sold} ticket(s) sold and cannot be deleted."
            )));
        }

        screening::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;

        info!(screening_id = id, "screening deleted");
        Ok(())
    }
}
