use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    ModelTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use tracing::info;

use crate::{
    auth::{self, Role},
    config::AdminBootstrap,
    entities::{role, user, user_role},
    error::{AppError, AppResult},
    models::{RegisterRequest, RoleDto, UpdateUserRequest, UserDto},
};

#[derive(Clone)]
pub struct UserService {
    db: DatabaseConnection,
    bcrypt_cost: u32,
}

impl UserService {
    pub fn new(db: DatabaseConnection, bcrypt_cost: u32) -> Self {
        Self { db, bcrypt_cost }
    }

    pub async fn list(&self) -> AppResult<Vec<UserDto>> {
        let users = user::Entity::find()
            .find_with_related(role::Entity)
            .order_by_asc(user::Column::Id)
            .all(&self.db)
            .await?;
        Ok(users.into_iter().map(|(u, roles)| UserDto::new(u, roles)).collect())
    }

    pub async fn roles(&self) -> AppResult<Vec<RoleDto>> {
        let roles = role::Entity::find().order_by_asc(role::Column::Id).all(&self.db).await?;
        Ok(roles.into_iter().map(RoleDto::from).collect())
    }

    /// Creates a registered account. Without explicit role ids (or when none
    /// of them exist) the account gets the default `User` role.
    pub async fn register(&self, req: RegisterRequest) -> AppResult<UserDto> {
        req.validate()?;
        let email = req.email.trim().to_string();

        if self.find_registered(&email).await?.is_some() {
            return Err(email_taken());
        }

        let password_hash =
            auth::hash_password(req.password.trim().to_string(), self.bcrypt_cost).await?;

        let txn = self.db.begin().await?;
        let user = user::ActiveModel {
            email: Set(email),
            password_hash: Set(password_hash),
            phone_number: Set(req.phone_number.trim().to_string()),
            is_registered: Set(true),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(duplicate_email)?;

        let mut roles = resolve_roles(&txn, &req.role_ids).await?;
        if roles.is_empty() {
            roles = resolve_default_role(&txn).await?;
        }
        assign_roles(&txn, user.id, &roles).await?;
        txn.commit().await?;

        let role_names: Vec<_> = roles.iter().map(|r| r.name.as_str()).collect();
        info!(user_id = user.id, roles = ?role_names, "user registered");
        Ok(UserDto::new(user, roles))
    }

    /// Returns the account and its roles when the password matches.
    pub async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> AppResult<(user::Model, Vec<role::Model>)> {
        let invalid = || AppError::unauthorized("Invalid credentials.");

        let user = self.find_registered(email.trim()).await?.ok_or_else(invalid)?;
        let ok =
            auth::verify_password(password.trim().to_string(), user.password_hash.clone()).await?;
        if !ok {
            info!(user_id = user.id, "login failed");
            return Err(invalid());
        }

        let roles = user.find_related(role::Entity).all(&self.db).await?;
        Ok((user, roles))
    }

    /// Updates contact details; roles are replaced only when `replace_roles`
    /// is set and role ids are given.
    pub async fn update(
        &self,
        id: i32,
        req: UpdateUserRequest,
        replace_roles: bool,
    ) -> AppResult<UserDto> {
        req.validate()?;
        let email = req.email.trim().to_string();

        let txn = self.db.begin().await?;
        let existing = user::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::not_found("User not found."))?;

        if existing.is_registered && existing.email != email {
            let taken = user::Entity::find()
                .filter(user::Column::Email.eq(&email))
                .filter(user::Column::IsRegistered.eq(true))
                .filter(user::Column::Id.ne(id))
                .one(&txn)
                .await?;
            if taken.is_some() {
                return Err(email_taken());
            }
        }

        let mut model: user::ActiveModel = existing.into();
        model.email = Set(email);
        model.phone_number = Set(req.phone_number.trim().to_string());
        let user = model.update(&txn).await.map_err(duplicate_email)?;

        if replace_roles && !req.role_ids.is_empty() {
            let roles = resolve_roles(&txn, &req.role_ids).await?;
            user_role::Entity::delete_many()
                .filter(user_role::Column::UserId.eq(id))
                .exec(&txn)
                .await?;
            assign_roles(&txn, id, &roles).await?;
            info!(user_id = id, "user roles replaced");
        }

        let roles = user.find_related(role::Entity).all(&txn).await?;
        txn.commit().await?;

        info!(user_id = id, "user updated");
        Ok(UserDto::new(user, roles))
    }

    /// Creates the configured administrator unless a registered account with
    /// that email already exists.
    pub async fn ensure_admin(&self, admin: &AdminBootstrap) -> AppResult<()> {
        if self.find_registered(admin.email.trim()).await?.is_some() {
            return Ok(());
        }

        let admin_role = role::Entity::find()
            .filter(role::Column::Name.eq(Role::Admin.as_str()))
            .one(&self.db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Admin role is missing, migrations not applied?"))?;

        let user = self
            .register(RegisterRequest {
                email: admin.email.clone(),
                password: admin.password.clone(),
                phone_number: admin.phone_number.clone(),
                role_ids: vec![admin_role.id],
            })
            .await?;
        info!(user_id = user.id, email = %user.email, "administrator account created");
        Ok(())
    }

    async fn find_registered(&self, email: &str) -> AppResult<Option<user::Model>> {
        Ok(user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .filter(user::Column::IsRegistered.eq(true))
            .one(&self.db)
            .await?)
    }
}

fn email_taken() -> AppError {
    AppError::conflict("Email is already registered.")
}

/// A concurrent writer can claim the email between the lookup and the write;
/// the unique index on registered emails reports it here.
fn duplicate_email(err: DbErr) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => email_taken(),
        _ => err.into(),
    }
}

/// Unknown ids are skipped.
async fn resolve_roles<C: ConnectionTrait>(
    db: &C,
    role_ids: &[i32],
) -> AppResult<Vec<role::Model>> {
    if role_ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(role::Entity::find()
        .filter(role::Column::Id.is_in(role_ids.iter().copied()))
        .order_by_asc(role::Column::Id)
        .all(db)
        .await?)
}

async fn resolve_default_role<C: ConnectionTrait>(db: &C) -> AppResult<Vec<role::Model>> {
    Ok(role::Entity::find()
        .filter(role::Column::Name.eq(Role::User.as_str()))
        .all(db)
        .await?)
}

async fn assign_roles<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    roles: &[role::Model],
) -> AppResult<()> {
    if roles.is_empty() {
        return Ok(());
    }
    let links = roles.iter().map(|r| user_role::ActiveModel {
        user_id: Set(user_id),
        role_id: Set(r.id),
    });
    user_role::Entity::insert_many(links).exec_without_returning(db).await?;
    Ok(())
}
