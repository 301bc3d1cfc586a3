use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequest, Path, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, post, put},
};

use crate::{
    AppState,
    auth::{self, Capability, MaybePrincipal, Principal},
    error::{AppError, AppResult},
    models::{
        LoginRequest, LoginResponse, MovieDto, MovieInput, PurchaseRequest, RegisterRequest,
        RoleDto, ScreeningDto, ScreeningInput, ScreeningUpdate, TicketDto, UpdateUserRequest,
        UserDto,
    },
    services::TicketScope,
};

type AppRouter = Router<Arc<AppState>>;

/// `Json` with body errors reported in the API error format.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

pub fn router() -> AppRouter {
    let public = Router::new()
        .route("/api/Movie/list", get(list_movies))
        .route("/api/Movie/get-movie/{id}", get(get_movie))
        .route("/api/Screening/list", get(list_screenings))
        .route("/api/Screening/get-screening/{id}", get(get_screening))
        .route("/api/Ticket/list", get(list_tickets))
        .route("/api/Ticket/purchase-ticket", post(purchase_ticket))
        .route("/api/Ticket/delete-ticket/{id}", delete(delete_ticket))
        .route("/api/User/register", post(register))
        .route("/api/User/login", post(login))
        .route("/api/User/update-user/{id}", put(update_user));

    let catalog = Router::new()
        .route("/api/Movie/add-movie", post(add_movie))
        .route("/api/Movie/update-movie/{id}", put(update_movie))
        .route("/api/Movie/delete-movie/{id}", delete(delete_movie))
        .route("/api/Screening/add-screening", post(add_screening))
        .route("/api/Screening/update-screening/{id}", put(update_screening))
        .route("/api/Screening/delete-screening/{id}", delete(delete_screening))
        .route_layer(middleware::from_fn_with_state(
            Capability::ManageCatalog,
            auth::require_capability,
        ));

    let sales = Router::new()
        .route("/api/Ticket/sell-ticket", post(sell_ticket))
        .route_layer(middleware::from_fn_with_state(
            Capability::SellTickets,
            auth::require_capability,
        ));

    let admin = Router::new()
        .route("/api/User/list", get(list_users))
        .route("/api/User/roles", get(list_roles))
        .route_layer(middleware::from_fn_with_state(
            Capability::ManageUsers,
            auth::require_capability,
        ));

    public.merge(catalog).merge(sales).merge(admin)
}

async fn list_movies(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<MovieDto>>> {
    Ok(Json(state.movies.list().await?))
}

async fn get_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<MovieDto>> {
    Ok(Json(state.movies.get(id).await?))
}

async fn add_movie(
    State(state): State<Arc<AppState>>,
    ApiJson(input): ApiJson<MovieInput>,
) -> AppResult<(StatusCode, Json<MovieDto>)> {
    Ok((StatusCode::CREATED, Json(state.movies.add(input).await?)))
}

async fn update_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    ApiJson(input): ApiJson<MovieInput>,
) -> AppResult<Json<MovieDto>> {
    Ok(Json(state.movies.update(id, input).await?))
}

async fn delete_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    state.movies.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_screenings(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Vec<ScreeningDto>>> {
    Ok(Json(state.screenings.list().await?))
}

async fn get_screening(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ScreeningDto>> {
    Ok(Json(state.screenings.get(id).await?))
}

async fn add_screening(
    State(state): State<Arc<AppState>>,
    ApiJson(input): ApiJson<ScreeningInput>,
) -> AppResult<(StatusCode, Json<ScreeningDto>)> {
    Ok((StatusCode::CREATED, Json(state.screenings.add(input).await?)))
}

async fn update_screening(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    ApiJson(input): ApiJson<ScreeningUpdate>,
) -> AppResult<Json<ScreeningDto>> {
    Ok(Json(state.screenings.update(id, input).await?))
}

async fn delete_screening(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    state.screenings.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) fn ticket_scope(principal: &Principal) -> TicketScope {
    if principal.can(Capability::ManageTickets) {
        TicketScope::All
    } else {
        TicketScope::Owner(principal.user_id)
    }
}

async fn list_tickets(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> AppResult<Json<Vec<TicketDto>>> {
    Ok(Json(state.tickets.list(ticket_scope(&principal)).await?))
}

/// Binds a self-service purchase to the caller: guests may not name an
/// account, members may only name their own.
pub(super) fn bind_buyer(
    caller: Option<&Principal>,
    mut req: PurchaseRequest,
) -> AppResult<PurchaseRequest> {
    match (caller, req.user_id) {
        (None, Some(_)) => {
            return Err(AppError::unauthorized("log in to purchase on an account"));
        },
        (None, None) => {},
        (Some(p), Some(id)) if id != p.user_id => {
            return Err(AppError::forbidden("tickets can only be bought for your own account"));
        },
        (Some(p), _) => req.user_id = Some(p.user_id),
    }
    Ok(req)
}

async fn purchase_ticket(
    State(state): State<Arc<AppState>>,
    MaybePrincipal(caller): MaybePrincipal,
    ApiJson(req): ApiJson<PurchaseRequest>,
) -> AppResult<(StatusCode, Json<Vec<TicketDto>>)> {
    let req = bind_buyer(caller.as_ref(), req)?;
    Ok((StatusCode::CREATED, Json(state.tickets.purchase(req).await?)))
}

async fn sell_ticket(
    State(state): State<Arc<AppState>>,
    seller: Principal,
    ApiJson(req): ApiJson<PurchaseRequest>,
) -> AppResult<(StatusCode, Json<Vec<TicketDto>>)> {
    tracing::info!(seller_id = seller.user_id, screening_id = req.screening_id, "in-person sale");
    Ok((StatusCode::CREATED, Json(state.tickets.purchase(req).await?)))
}

async fn delete_ticket(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    state.tickets.refund(id, ticket_scope(&principal)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn register(
    State(state): State<Arc<AppState>>,
    MaybePrincipal(caller): MaybePrincipal,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserDto>)> {
    let may_assign = caller.is_some_and(|p| p.can(Capability::ManageUsers));
    if !req.role_ids.is_empty() && !may_assign {
        return Err(AppError::forbidden("only administrators can assign roles"));
    }
    Ok((StatusCode::CREATED, Json(state.users.register(req).await?)))
}

async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    super::check_login_rate(&state)?;
    let (user, roles) = state.users.verify_credentials(&req.email, &req.password).await?;
    let token = state.tokens.issue(&user, &roles)?;
    tracing::info!(user_id = user.id, "login");
    Ok(Json(LoginResponse { token }))
}

async fn update_user(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<i32>,
    ApiJson(req): ApiJson<UpdateUserRequest>,
) -> AppResult<Json<UserDto>> {
    let is_admin = principal.can(Capability::ManageUsers);
    if principal.user_id != id && !is_admin {
        return Err(AppError::forbidden("you can only update your own account"));
    }
    if !req.role_ids.is_empty() && !is_admin {
        return Err(AppError::forbidden("only administrators can assign roles"));
    }
    Ok(Json(state.users.update(id, req, is_admin).await?))
}

async fn list_users(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<UserDto>>> {
    Ok(Json(state.users.list().await?))
}

async fn list_roles(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<RoleDto>>> {
    Ok(Json(state.users.roles().await?))
}
