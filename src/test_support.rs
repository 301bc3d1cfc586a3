use std::sync::Arc;

use jiff::tz::TimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, Set, sea_query::Expr,
};

use crate::{
    AppState,
    auth::Role,
    config::Config,
    db,
    entities::{movie, role, screening, ticket, user, user_role},
    services::now_sec,
};

pub const GUEST_EMAIL: &str = "walk-in@example.com";

pub fn config() -> Config {
    Config {
        addr: "127.0.0.1:0".parse().unwrap(),
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: "test-secret-test-secret-test-secret!".to_string(),
        jwt_issuer: "cinebook".to_string(),
        jwt_audience: "cinebook-clients".to_string(),
        jwt_expire_days: 7,
        bcrypt_cost: 4,
        login_rps: 1_000,
        timezone: TimeZone::UTC,
        admin: None,
    }
}

/// Fresh in-memory database with the schema and roles applied. One pooled
/// connection, so everything inside a transaction must go through it.
pub async fn db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    db::connect_and_migrate(options).await.unwrap()
}

pub fn state(db: &DatabaseConnection) -> Arc<AppState> {
    Arc::new(AppState::new(config(), db.clone()))
}

pub async fn movie(db: &DatabaseConnection, length: i32) -> movie::Model {
    movie::ActiveModel {
        name: Set(format!("Feature {length}")),
        length: Set(length),
        genre: Set("Drama".to_string()),
        age_limit: Set(12),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

/// A screening starting `starts_in` seconds from now (negative for the past).
pub async fn screening(
    db: &DatabaseConnection,
    movie_id: i32,
    starts_in: i64,
    capacity: i32,
) -> screening::Model {
    screening::ActiveModel {
        movie_id: Set(movie_id),
        start_time: Set(now_sec() + starts_in),
        room: Set(1),
        capacity: Set(capacity),
        price: Set(2_000),
        seats_sold: Set(0),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

/// Inserts a ticket directly, keeping the seat counter in step.
pub async fn ticket(db: &DatabaseConnection, screening_id: i32, user_id: i32) -> ticket::Model {
    let ticket = ticket::ActiveModel {
        screening_id: Set(screening_id),
        user_id: Set(user_id),
        email: Set(None),
        phone_number: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap();
    screening::Entity::update_many()
        .col_expr(screening::Column::SeatsSold, Expr::col(screening::Column::SeatsSold).add(1))
        .filter(screening::Column::Id.eq(screening_id))
        .exec(db)
        .await
        .unwrap();
    ticket
}

pub async fn guest(db: &DatabaseConnection) -> user::Model {
    user::ActiveModel {
        email: Set(GUEST_EMAIL.to_string()),
        password_hash: Set(String::new()),
        phone_number: Set("+36 1 000 0000".to_string()),
        is_registered: Set(false),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn member(db: &DatabaseConnection, email: &str) -> user::Model {
    account(db, email, Role::User).await
}

/// Registered account holding `role`, with the password `password1`.
pub async fn account(db: &DatabaseConnection, email: &str, role: Role) -> user::Model {
    let user = user::ActiveModel {
        email: Set(email.to_string()),
        password_hash: Set(bcrypt::hash("password1", 4).unwrap()),
        phone_number: Set("+36 30 123 4567".to_string()),
        is_registered: Set(true),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap();

    let role = role::Entity::find()
        .filter(role::Column::Name.eq(role.as_str()))
        .one(db)
        .await
        .unwrap()
        .unwrap();
    user_role::Entity::insert(user_role::ActiveModel {
        user_id: Set(user.id),
        role_id: Set(role.id),
    })
    .exec_without_returning(db)
    .await
    .unwrap();
    user
}

pub async fn token(state: &AppState, db: &DatabaseConnection, user: &user::Model) -> String {
    let roles = user.find_related(role::Entity).all(db).await.unwrap();
    state.tokens.issue(user, &roles).unwrap()
}
