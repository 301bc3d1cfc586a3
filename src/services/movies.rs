use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::info;

use crate::{
    entities::{movie, screening},
    error::{AppError, AppResult},
    models::{MovieDto, MovieInput},
    services::now_sec,
};

#[derive(Clone)]
pub struct MovieService {
    db: DatabaseConnection,
}

impl MovieService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn list(&self) -> AppResult<Vec<MovieDto>> {
        let movies = movie::Entity::find().order_by_asc(movie::Column::Name).all(&self.db).await?;
        Ok(movies.into_iter().map(MovieDto::from).collect())
    }

    pub async fn get(&self, id: i32) -> AppResult<MovieDto> {
        let movie = movie::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::not_found("Movie not found."))?;
        Ok(movie.into())
    }

    pub async fn add(&self, input: MovieInput) -> AppResult<MovieDto> {
        input.validate()?;
        let model = movie::ActiveModel {
            name: Set(input.name.trim().to_string()),
            length: Set(input.length),
            genre: Set(input.genre.trim().to_string()),
            age_limit: Set(input.age_limit),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        info!(movie_id = model.id, name = %model.name, "movie added");
        Ok(model.into())
    }

    pub async fn update(&self, id: i32, input: MovieInput) -> AppResult<MovieDto> {
        input.validate()?;
        let existing = movie::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::not_found("Movie not found."))?;

        let mut model: movie::ActiveModel = existing.into();
        model.name = Set(input.name.trim().to_string());
        model.length = Set(input.length);
        model.genre = Set(input.genre.trim().to_string());
        model.age_limit = Set(input.age_limit);
        let model = model.update(&self.db).await?;

        info!(movie_id = id, "movie updated");
        Ok(model.into())
    }

    /// Past screenings and their tickets go with the movie; future ones block it.
    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let txn = self.db.begin().await?;

        movie::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::not_found("Movie not found."))?;

        let upcoming = screening::Entity::find()
            .filter(screening::Column::MovieId.eq(id))
            .filter(screening::Column::StartTime.gt(now_sec()))
            .count(&txn)
            .await?;
        if upcoming > 0 {
            return Err(AppError::conflict(format!(
                "Movie has {upcoming} upcoming screening(s) and cannot be deleted."
            )));
        }

        movie::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;

        info!(movie_id = id, "movie deleted");
        Ok(())
    }
}
