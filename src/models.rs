use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::{
    entities::{movie, role, screening, user},
    error::{AppError, AppResult},
};

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieDto {
    pub id: i32,
    pub name: String,
    pub length: i32,
    pub genre: String,
    pub age_limit: i32,
}

impl From<movie::Model> for MovieDto {
    fn from(m: movie::Model) -> Self {
        Self { id: m.id, name: m.name, length: m.length, genre: m.genre, age_limit: m.age_limit }
    }
}

/// Body of add-movie and update-movie.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieInput {
    pub name: String,
    pub length: i32,
    pub genre: String,
    pub age_limit: i32,
}

impl MovieInput {
    pub fn validate(&self) -> AppResult<()> {
        require_text("name", &self.name)?;
        require_text("genre", &self.genre)?;
        require_range("length", self.length, 1, 500)?;
        require_range("ageLimit", self.age_limit, 0, 18)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningDto {
    pub id: i32,
    pub movie_id: i32,
    pub movie_name: String,
    pub start_time: Timestamp,
    pub room: i32,
    pub capacity: i32,
    pub price: i32,
    pub seats_sold: i32,
    pub seats_left: i32,
}

impl ScreeningDto {
    pub fn new(s: screening::Model, movie_name: String) -> AppResult<Self> {
        Ok(Self {
            id: s.id,
            movie_id: s.movie_id,
            movie_name,
            start_time: Timestamp::from_second(s.start_time)?,
            room: s.room,
            capacity: s.capacity,
            price: s.price,
            seats_sold: s.seats_sold,
            seats_left: s.seats_left(),
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningInput {
    pub movie_id: i32,
    pub start_time: Timestamp,
    pub capacity: i32,
    pub price: i32,
    pub room: i32,
}

impl ScreeningInput {
    pub fn validate(&self) -> AppResult<()> {
        validate_screening_fields(self.capacity, self.price, self.room)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningUpdate {
    pub start_time: Timestamp,
    pub capacity: i32,
    pub price: i32,
    pub room: i32,
}

impl ScreeningUpdate {
    pub fn validate(&self) -> AppResult<()> {
        validate_screening_fields(self.capacity, self.price, self.room)
    }
}

fn validate_screening_fields(capacity: i32, price: i32, room: i32) -> AppResult<()> {
    require_range("capacity", capacity, 1, 500)?;
    require_range("price", price, 1, 100_000)?;
    require_range("room", room, 1, 20)?;
    Ok(())
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDto {
    pub id: i32,
    pub screening_id: i32,
    pub user_id: i32,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub movie_name: String,
    pub start_time: Timestamp,
    pub room: i32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub screening_id: i32,
    #[serde(default)]
    pub user_id: Option<i32>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

/// Contact details of a guest buyer, present only when no account is given.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuestContact {
    pub email: String,
    pub phone_number: String,
}

impl PurchaseRequest {
    /// Checks the request shape and returns the guest contact when the
    /// purchase is not bound to an existing user.
    pub fn validate(&self) -> AppResult<Option<GuestContact>> {
        if self.quantity < 1 {
            return Err(AppError::validation("quantity must be at least 1"));
        }
        if self.user_id.is_some() {
            return Ok(None);
        }

        let email = self.email.as_deref().map(str::trim).unwrap_or_default();
        let phone = self.phone_number.as_deref().map(str::trim).unwrap_or_default();
        if email.is_empty() || phone.is_empty() {
            return Err(AppError::validation(
                "email and phone number are required for non-registered users",
            ));
        }
        validate_email(email)?;
        validate_phone(phone)?;

        Ok(Some(GuestContact { email: email.to_string(), phone_number: phone.to_string() }))
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDto {
    pub id: i32,
    pub name: String,
}

impl From<role::Model> for RoleDto {
    fn from(r: role::Model) -> Self {
        Self { id: r.id, name: r.name }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: i32,
    pub email: String,
    pub phone_number: String,
    pub is_registered: bool,
    pub roles: Vec<RoleDto>,
}

impl UserDto {
    pub fn new(u: user::Model, roles: Vec<role::Model>) -> Self {
        Self {
            id: u.id,
            email: u.email,
            phone_number: u.phone_number,
            is_registered: u.is_registered,
            roles: roles.into_iter().map(RoleDto::from).collect(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub phone_number: String,
    #[serde(default)]
    pub role_ids: Vec<i32>,
}

impl RegisterRequest {
    pub fn validate(&self) -> AppResult<()> {
        validate_email(self.email.trim())?;
        validate_phone(self.phone_number.trim())?;
        if self.password.trim().chars().count() < 6 {
            return Err(AppError::validation("password must be at least 6 characters"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub email: String,
    pub phone_number: String,
    #[serde(default)]
    pub role_ids: Vec<i32>,
}

impl UpdateUserRequest {
    pub fn validate(&self) -> AppResult<()> {
        validate_email(self.email.trim())?;
        validate_phone(self.phone_number.trim())?;
        Ok(())
    }
}

fn require_text(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    Ok(())
}

fn require_range(field: &str, value: i32, min: i32, max: i32) -> AppResult<()> {
    if !(min..=max).contains(&value) {
        return Err(AppError::validation(format!("{field} must be between {min} and {max}")));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> AppResult<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.split('.').count() >= 2
                && domain.split('.').all(|part| !part.is_empty())
                && !email.chars().any(char::is_whitespace)
        },
        None => false,
    };
    if !valid {
        return Err(AppError::validation(format!("invalid email address: {email}")));
    }
    Ok(())
}

pub fn validate_phone(phone: &str) -> AppResult<()> {
    let allowed = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' '));
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    if !allowed || digits < 6 {
        return Err(AppError::validation(format!("invalid phone number: {phone}")));
    }
    Ok(())
}
