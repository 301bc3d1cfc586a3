use std::sync::Arc;

use axum::{
    Form, Router,
    extract::{FromRequest, Path, Query, State, rejection::FormRejection},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use cookie::{Cookie, SameSite};
use jiff::civil::DateTime;
use serde::Deserialize;

use super::api::{bind_buyer, ticket_scope};
use crate::{
    AppState,
    auth::{Capability, MaybePrincipal, Principal, TOKEN_COOKIE},
    error::AppError,
    models::{MovieInput, PurchaseRequest, RegisterRequest, ScreeningInput},
    templates,
};

/// An [`AppError`] rendered as the HTML error page.
pub struct PageError(AppError);

impl From<AppError> for PageError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<FormRejection> for PageError {
    fn from(rejection: FormRejection) -> Self {
        Self(AppError::validation(rejection.body_text()))
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        self.0.log();
        (self.0.status_code(), Html(templates::error_page(self.0.to_string()))).into_response()
    }
}

type PageResult<T = Response> = Result<T, PageError>;

/// `Form` whose rejections render the error page.
#[derive(FromRequest)]
#[from_request(via(Form), rejection(PageError))]
pub struct PageForm<T>(pub T);

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index))
        .route("/movies", get(movies))
        .route("/purchase", post(purchase))
        .route("/login", get(login_form).post(login))
        .route("/register", get(register_form).post(register))
        .route("/logout", post(logout))
        .route("/tickets", get(tickets))
        .route("/tickets/{id}/refund", post(refund))
        .route("/admin", get(admin))
        .route("/admin/movies", post(add_movie))
        .route("/admin/movies/{id}/delete", post(delete_movie))
        .route("/admin/screenings", post(add_screening))
        .route("/admin/screenings/{id}/delete", post(delete_screening))
}

/// Sends anonymous visitors to the login form, coming back to `path`.
fn login_redirect(path: &str) -> Response {
    Redirect::to(&format!("/login?next={}", urlencoding::encode(path))).into_response()
}

fn require(viewer: Option<&Principal>, capability: Capability) -> PageResult<()> {
    match viewer {
        None => Err(AppError::unauthorized("log in to continue").into()),
        Some(p) if !p.can(capability) => {
            Err(AppError::forbidden("insufficient permissions").into())
        },
        Some(_) => Ok(()),
    }
}

async fn index(
    State(state): State<Arc<AppState>>,
    MaybePrincipal(viewer): MaybePrincipal,
) -> PageResult<Html<String>> {
    let screenings = state.screenings.list_upcoming().await?;
    Ok(Html(templates::index_page(viewer.as_ref(), &screenings, &state.config.timezone)))
}

async fn movies(
    State(state): State<Arc<AppState>>,
    MaybePrincipal(viewer): MaybePrincipal,
) -> PageResult<Html<String>> {
    let movies = state.movies.list().await?;
    Ok(Html(templates::movies_page(viewer.as_ref(), &movies)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseForm {
    screening_id: i32,
    quantity: i32,
    #[serde(default)]
    email: String,
    #[serde(default)]
    phone_number: String,
}

fn non_blank(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

async fn purchase(
    State(state): State<Arc<AppState>>,
    MaybePrincipal(viewer): MaybePrincipal,
    PageForm(form): PageForm<PurchaseForm>,
) -> PageResult<Html<String>> {
    let req = bind_buyer(
        viewer.as_ref(),
        PurchaseRequest {
            screening_id: form.screening_id,
            user_id: None,
            email: non_blank(form.email),
            phone_number: non_blank(form.phone_number),
            quantity: form.quantity,
        },
    )?;
    let tickets = state.tickets.purchase(req).await?;
    Ok(Html(templates::purchase_page(viewer.as_ref(), &tickets, &state.config.timezone)))
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    next: Option<String>,
}

/// Only same-site paths are followed after login.
fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path,
        _ => "/",
    }
}

async fn login_form(Query(q): Query<LoginQuery>) -> Html<String> {
    Html(templates::login_page(safe_next(q.next.as_deref())))
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    email: String,
    password: String,
    next: Option<String>,
}

fn session_cookie(token: String, ttl_seconds: i64) -> Cookie<'static> {
    Cookie::build((TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(ttl_seconds))
        .build()
}

async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    PageForm(form): PageForm<LoginForm>,
) -> PageResult<(CookieJar, Redirect)> {
    super::check_login_rate(&state)?;
    let (user, roles) = state.users.verify_credentials(&form.email, &form.password).await?;
    let token = state.tokens.issue(&user, &roles)?;
    tracing::info!(user_id = user.id, "browser login");

    let jar = jar.add(session_cookie(token, state.tokens.ttl_seconds()));
    Ok((jar, Redirect::to(safe_next(form.next.as_deref()))))
}

async fn register_form() -> Html<String> {
    Html(templates::register_page())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterForm {
    email: String,
    password: String,
    phone_number: String,
}

/// Registers a plain user account and logs it in.
async fn register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    PageForm(form): PageForm<RegisterForm>,
) -> PageResult<(CookieJar, Redirect)> {
    let password = form.password.clone();
    let created = state
        .users
        .register(RegisterRequest {
            email: form.email,
            password: form.password,
            phone_number: form.phone_number,
            role_ids: Vec::new(),
        })
        .await?;

    let (user, roles) = state.users.verify_credentials(&created.email, &password).await?;
    let token = state.tokens.issue(&user, &roles)?;
    let jar = jar.add(session_cookie(token, state.tokens.ttl_seconds()));
    Ok((jar, Redirect::to("/")))
}

async fn logout(jar: CookieJar) -> (CookieJar, Redirect) {
    (jar.remove(Cookie::build(TOKEN_COOKIE).path("/")), Redirect::to("/"))
}

async fn tickets(
    State(state): State<Arc<AppState>>,
    MaybePrincipal(viewer): MaybePrincipal,
) -> PageResult {
    let Some(principal) = viewer else {
        return Ok(login_redirect("/tickets"));
    };
    let tickets = state.tickets.list(ticket_scope(&principal)).await?;
    let html = templates::tickets_page(Some(&principal), &tickets, &state.config.timezone);
    Ok(Html(html).into_response())
}

async fn refund(
    State(state): State<Arc<AppState>>,
    MaybePrincipal(viewer): MaybePrincipal,
    Path(id): Path<i32>,
) -> PageResult {
    let Some(principal) = viewer else {
        return Ok(login_redirect("/tickets"));
    };
    state.tickets.refund(id, ticket_scope(&principal)).await?;
    Ok(Redirect::to("/tickets").into_response())
}

async fn admin(
    State(state): State<Arc<AppState>>,
    MaybePrincipal(viewer): MaybePrincipal,
) -> PageResult {
    let Some(principal) = viewer else {
        return Ok(login_redirect("/admin"));
    };
    require(Some(&principal), Capability::ManageCatalog)?;

    let movies = state.movies.list().await?;
    let screenings = state.screenings.list().await?;
    let html =
        templates::admin_page(Some(&principal), &movies, &screenings, &state.config.timezone);
    Ok(Html(html).into_response())
}

async fn add_movie(
    State(state): State<Arc<AppState>>,
    MaybePrincipal(viewer): MaybePrincipal,
    PageForm(input): PageForm<MovieInput>,
) -> PageResult<Redirect> {
    require(viewer.as_ref(), Capability::ManageCatalog)?;
    state.movies.add(input).await?;
    Ok(Redirect::to("/admin"))
}

async fn delete_movie(
    State(state): State<Arc<AppState>>,
    MaybePrincipal(viewer): MaybePrincipal,
    Path(id): Path<i32>,
) -> PageResult<Redirect> {
    require(viewer.as_ref(), Capability::ManageCatalog)?;
    state.movies.delete(id).await?;
    Ok(Redirect::to("/admin"))
}

/// The start time comes from a `datetime-local` input, read in the
/// configured time zone.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningForm {
    movie_id: i32,
    start_time: String,
    room: i32,
    capacity: i32,
    price: i32,
}

async fn add_screening(
    State(state): State<Arc<AppState>>,
    MaybePrincipal(viewer): MaybePrincipal,
    PageForm(form): PageForm<ScreeningForm>,
) -> PageResult<Redirect> {
    require(viewer.as_ref(), Capability::ManageCatalog)?;

    let local: DateTime = form.start_time.trim().parse().map_err(AppError::from)?;
    let start_time = local.to_zoned(state.config.timezone.clone()).map_err(AppError::from)?;
    state
        .screenings
        .add(ScreeningInput {
            movie_id: form.movie_id,
            start_time: start_time.timestamp(),
            capacity: form.capacity,
            price: form.price,
            room: form.room,
        })
        .await?;
    Ok(Redirect::to("/admin"))
}

async fn delete_screening(
    State(state): State<Arc<AppState>>,
    MaybePrincipal(viewer): MaybePrincipal,
    Path(id): Path<i32>,
) -> PageResult<Redirect> {
    require(viewer.as_ref(), Capability::ManageCatalog)?;
    state.screenings.delete(id).await?;
    Ok(Redirect::to("/admin"))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use sea_orm::EntityTrait;
    use tower::ServiceExt;

    use super::*;
    use crate::{auth::Role, entities::screening, routes, test_support};

    fn form(uri: &str, body: &str, cookie: Option<&str>) -> Request<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(token) = cookie {
            req = req.header(header::COOKIE, format!("{TOKEN_COOKIE}={token}"));
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    fn page(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut req = Request::builder().uri(uri);
        if let Some(token) = cookie {
            req = req.header(header::COOKIE, format!("{TOKEN_COOKIE}={token}"));
        }
        req.body(Body::empty()).unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn index_lists_upcoming_screenings() {
        let db = test_support::db().await;
        let movie = test_support::movie(&db, 95).await;
        test_support::screening(&db, movie.id, 86_400, 40).await;
        let app = routes::router(test_support::state(&db));

        let resp = app.oneshot(page("/", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let html = body_text(resp).await;
        assert!(html.contains(&movie.name));
        assert!(html.contains("40 seats left"));
        assert!(html.contains("name=\"phoneNumber\""));
    }

    #[tokio::test]
    async fn guest_buys_through_the_form() {
        let db = test_support::db().await;
        let movie = test_support::movie(&db, 95).await;
        let s = test_support::screening(&db, movie.id, 86_400, 40).await;
        let app = routes::router(test_support::state(&db));

        let body = format!(
            "screeningId={}&quantity=2&email=guest%40example.com&phoneNumber=%2B36+30+123+4567",
            s.id
        );
        let resp = app.clone().oneshot(form("/purchase", &body, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("2 ticket(s) purchased."));

        let body = format!("screeningId={}&quantity=1&email=&phoneNumber=", s.id);
        let resp = app.oneshot(form("/purchase", &body, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(resp).await.contains("Error"));
    }

    #[tokio::test]
    async fn malformed_forms_render_the_error_page() {
        let db = test_support::db().await;
        let movie = test_support::movie(&db, 95).await;
        let s = test_support::screening(&db, movie.id, 86_400, 40).await;
        let app = routes::router(test_support::state(&db));

        let body = format!("screeningId={}&quantity=lots", s.id);
        let resp = app.clone().oneshot(form("/purchase", &body, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(resp.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
        assert!(body_text(resp).await.contains("<h1"));

        let resp = app.oneshot(form("/login", "email=jane%40example.com", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(resp).await.contains("Error"));

        let sold = screening::Entity::find_by_id(s.id).one(&db).await.unwrap().unwrap();
        assert_eq!(sold.seats_sold, 0);
    }

    #[tokio::test]
    async fn login_sets_session_cookie() {
        let db = test_support::db().await;
        test_support::member(&db, "jane@example.com").await;
        let app = routes::router(test_support::state(&db));

        let body = "email=jane%40example.com&password=password1&next=%2Ftickets";
        let resp = app.clone().oneshot(form("/login", body, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], "/tickets");
        let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("token="));
        assert!(cookie.contains("HttpOnly"));

        let token = cookie.trim_start_matches("token=").split(';').next().unwrap();
        let resp = app.oneshot(page("/tickets", Some(token))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("My tickets"));
    }

    #[tokio::test]
    async fn anonymous_tickets_redirects_to_login() {
        let db = test_support::db().await;
        let app = routes::router(test_support::state(&db));

        let resp = app.oneshot(page("/tickets", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], "/login?next=%2Ftickets");
    }

    #[tokio::test]
    async fn admin_pages_need_catalog_rights() {
        let db = test_support::db().await;
        let state = test_support::state(&db);
        let app = routes::router(state.clone());
        let user = test_support::member(&db, "user@example.com").await;
        let admin = test_support::account(&db, "admin@example.com", Role::Admin).await;
        let user_token = test_support::token(&state, &db, &user).await;
        let admin_token = test_support::token(&state, &db, &admin).await;

        let resp = app.clone().oneshot(page("/admin", Some(&user_token))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let movie_form = "name=Heat&genre=Crime&length=170&ageLimit=16";
        let req = form("/admin/movies", movie_form, Some(&admin_token));
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let movie = state.movies.list().await.unwrap().remove(0);

        let body = format!(
            "movieId={}&startTime=2099-01-02T19%3A30&room=4&capacity=80&price=3200",
            movie.id
        );
        let req = form("/admin/screenings", &body, Some(&admin_token));
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        let saved = screening::Entity::find().one(&db).await.unwrap().unwrap();
        let expected = jiff::civil::date(2099, 1, 2)
            .at(19, 30, 0, 0)
            .to_zoned(jiff::tz::TimeZone::UTC)
            .unwrap()
            .timestamp()
            .as_second();
        assert_eq!(saved.start_time, expected);

        let resp = app.oneshot(page("/admin", Some(&admin_token))).await.unwrap();
        assert!(body_text(resp).await.contains("Heat"));
    }
}
