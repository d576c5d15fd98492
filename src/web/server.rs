//! HTTP server implementation for the task board.
//!
//! Serves HTML pages, form posts with redirect-and-flash responses, the Google
//! sign-in round trip and a small JSON API.

use axum::{
    Router,
    extract::{Form, Path, Query, State},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::templates::{self, flash_html, google_button, html_escape, options_html, render_page};
use crate::auth::session::{
    clear_session_cookie, current_caller, session_cookie, start_session,
};
use crate::auth::{self, Caller, IdentityProvider, Registration, password};
use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, ErrorCode};
use crate::tasks::{TaskForm, TaskService};
use crate::types::{AccountId, StatusCounts, Task, TaskFilter, TaskPage, TaskStatus};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    db: Arc<Database>,
    config: Arc<Config>,
    provider: Option<Arc<dyn IdentityProvider>>,
}

impl AppState {
    pub fn new(
        db: Arc<Database>,
        config: Arc<Config>,
        provider: Option<Arc<dyn IdentityProvider>>,
    ) -> Self {
        Self {
            db,
            config,
            provider,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn provider(&self) -> Option<&dyn IdentityProvider> {
        self.provider.as_deref()
    }

    fn tasks(&self) -> TaskService<'_> {
        TaskService::new(&self.db, self.config.tasks.page_size)
    }
}

/// Health check response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

fn status_of(err: &AppError) -> StatusCode {
    StatusCode::from_u16(err.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_of(&self);
        let message = if status.is_server_error() {
            error!(code = ?self.code, details = ?self.details, "{}", self.message);
            "Something went wrong. Please try again.".to_string()
        } else {
            self.message
        };
        let content = format!(
            r#"<div class="card"><h1>{}</h1><p>{}</p><p><a href="/tasks">Back to tasks</a></p></div>"#,
            status.canonical_reason().unwrap_or("Error"),
            html_escape(&message)
        );
        (status, Html(render_page("Error", None, "", &content))).into_response()
    }
}

/// JSON error body for API routes.
struct ApiError(AppError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        if status.is_server_error() {
            error!(code = ?self.0.code, "{}", self.0.message);
        }
        (status, Json(self.0)).into_response()
    }
}

/// Redirect with a `?msg=` flash.
fn redirect_with(path: &str, kind: &str, text: &str) -> Response {
    let msg = urlencoding::encode(&format!("{}:{}", kind, text)).into_owned();
    Redirect::to(&format!("{}?msg={}", path, msg)).into_response()
}

/// Start a session and redirect with the cookie set.
fn sign_in(state: &AppState, account_id: AccountId, to: &str) -> Response {
    let ttl = state.config().auth.session_ttl_secs();
    let cookie = start_session(state.db(), account_id, ttl)
        .and_then(|token| session_cookie(&token, ttl, state.config().auth.cookie_secure));
    match cookie {
        Ok(cookie) => ([(SET_COOKIE, cookie)], Redirect::to(to)).into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct FlashQuery {
    msg: Option<String>,
}

/// Landing page; signed-in users go straight to their tasks.
async fn root(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match current_caller(state.db(), &headers) {
        Ok(Some(_)) => Redirect::to("/tasks").into_response(),
        Ok(None) => Html(render_page(
            "Welcome",
            None,
            "",
            templates::WELCOME_TEMPLATE,
        ))
        .into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

async fn dashboard(_caller: Caller) -> Redirect {
    Redirect::to("/tasks")
}

// ---------------------------------------------------------------------------
// Password login and registration
// ---------------------------------------------------------------------------

fn login_page(state: &AppState, email: &str, message: &str) -> String {
    let content = templates::LOGIN_TEMPLATE
        .replace("{{email}}", &html_escape(email))
        .replace("{{google}}", google_button(state.provider().is_some()));
    render_page("Log in", None, message, &content)
}

async fn login_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FlashQuery>,
) -> Response {
    if let Ok(Some(_)) = current_caller(state.db(), &headers) {
        return Redirect::to("/tasks").into_response();
    }
    Html(login_page(&state, "", &flash_html(query.msg.as_deref()))).into_response()
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

async fn login_submit(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    match auth::authenticate(state.db(), &form.email, &form.password) {
        Ok(account) => {
            info!(account_id = %account.id, "Password login");
            sign_in(&state, account.id, "/tasks")
        }
        Err(e) => {
            let message = flash_html(Some(&format!("error:{}", e.message)));
            (status_of(&e), Html(login_page(&state, &form.email, &message))).into_response()
        }
    }
}

fn register_page(state: &AppState, name: &str, email: &str, message: &str) -> String {
    let content = templates::REGISTER_TEMPLATE
        .replace("{{name}}", &html_escape(name))
        .replace("{{email}}", &html_escape(email))
        .replace(
            "{{min_password_length}}",
            &state.config().auth.min_password_length.to_string(),
        )
        .replace("{{google}}", google_button(state.provider().is_some()));
    render_page("Register", None, message, &content)
}

async fn register_form(State(state): State<AppState>, Query(query): Query<FlashQuery>) -> Html<String> {
    Html(register_page(&state, "", "", &flash_html(query.msg.as_deref())))
}

async fn register_submit(
    State(state): State<AppState>,
    Form(form): Form<Registration>,
) -> Response {
    match auth::register(state.db(), &form, state.config().auth.min_password_length) {
        Ok(account) => sign_in(&state, account.id, "/tasks?msg=success%3AWelcome%20to%20Taskboard"),
        Err(e) => {
            let message = flash_html(Some(&format!("error:{}", e.message)));
            (
                status_of(&e),
                Html(register_page(&state, &form.name, &form.email, &message)),
            )
                .into_response()
        }
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match current_caller(state.db(), &headers) {
        Ok(Some(caller)) => match state.db().delete_session(&caller.session_token) {
            Ok(()) => info!(account_id = %caller.id(), "Logged out"),
            Err(e) => error!("Failed to delete session: {}", e),
        },
        Ok(None) => {}
        Err(e) => error!("Failed to load session on logout: {}", e),
    }
    (
        [(SET_COOKIE, clear_session_cookie(state.config().auth.cookie_secure))],
        Redirect::to("/"),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Google sign-in
// ---------------------------------------------------------------------------

const GOOGLE_DISABLED: &str = "Google sign-in is not configured.";

async fn google_redirect(State(state): State<AppState>) -> Response {
    let Some(provider) = state.provider() else {
        return redirect_with("/login", "error", GOOGLE_DISABLED);
    };

    let oauth_state = match password::random_token(32) {
        Ok(token) => token,
        Err(e) => return AppError::from(e).into_response(),
    };
    if let Err(e) = state.db().insert_oauth_state(&oauth_state) {
        return AppError::from(e).into_response();
    }

    Redirect::to(&provider.authorization_url(&oauth_state)).into_response()
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn google_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some(provider) = state.provider() else {
        return redirect_with("/login", "error", GOOGLE_DISABLED);
    };

    if let Some(reason) = query.error {
        warn!(reason = %reason, "Google sign-in was cancelled or refused");
        if let Some(oauth_state) = query.state.as_deref()
            && let Err(e) = state
                .db()
                .consume_oauth_state(oauth_state, state.config().auth.oauth_state_ttl_ms())
        {
            error!("Failed to discard OAuth state: {}", e);
        }
        return redirect_with("/login", "error", "Google sign-in was cancelled.");
    }

    let result = auth::login_with_provider(
        state.db(),
        provider,
        query.code.as_deref().unwrap_or_default(),
        query.state.as_deref().unwrap_or_default(),
        state.config().auth.oauth_state_ttl_ms(),
    )
    .await;

    match result {
        Ok(resolution) => sign_in(&state, resolution.account.id, "/tasks"),
        Err(e) => {
            let err = AppError::from(e);
            redirect_with("/login", "error", &err.message)
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct TaskListParams {
    type_filter: Option<String>,
    status_filter: Option<String>,
    page: Option<i64>,
    msg: Option<String>,
}

fn status_badge(status: TaskStatus) -> String {
    format!(
        r#"<span class="badge badge-{}">{}</span>"#,
        status.as_str(),
        status.label()
    )
}

fn status_choices() -> impl Iterator<Item = (&'static str, &'static str)> {
    TaskStatus::ALL.into_iter().map(|s| (s.as_str(), s.label()))
}

fn task_rows(page: &TaskPage) -> String {
    if page.tasks.is_empty() {
        return r#"<p class="muted">No tasks found.</p>"#.to_string();
    }

    let mut html = String::from(
        "<table><thead><tr><th>Title</th><th>Type</th><th>Status</th><th>Due</th><th></th></tr></thead><tbody>",
    );
    for task in &page.tasks {
        let description = task
            .description
            .as_deref()
            .map(|d| format!(r#"<div class="muted">{}</div>"#, html_escape(d)))
            .unwrap_or_default();
        html.push_str(&format!(
            r#"<tr>
                <td>{title}{description}</td>
                <td>{task_type}</td>
                <td>{badge}</td>
                <td>{due}</td>
                <td class="actions">
                    <a class="button secondary" href="/tasks/{id}/edit">Edit</a>
                    <form method="post" action="/tasks/{id}/delete"><button class="danger" type="submit">Delete</button></form>
                </td>
            </tr>"#,
            id = task.id,
            title = html_escape(&task.title),
            description = description,
            task_type = html_escape(task.task_type.as_deref().unwrap_or("")),
            badge = status_badge(task.status),
            due = task
                .due_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        ));
    }
    html.push_str("</tbody></table>");
    html
}

fn pagination(page: &TaskPage, filter: &TaskFilter) -> String {
    if page.total_pages <= 1 {
        return String::new();
    }

    let mut query = String::new();
    if let Some(ref t) = filter.task_type {
        query.push_str(&format!("&type_filter={}", urlencoding::encode(t)));
    }
    if let Some(s) = filter.status {
        query.push_str(&format!("&status_filter={}", s.as_str()));
    }

    let link = |n: i64, label: &str| {
        format!(
            r#"<a class="button secondary" href="/tasks?page={}{}">{}</a>"#,
            n, query, label
        )
    };

    let mut html = String::from(r#"<div class="pagination">"#);
    if page.page > 1 {
        html.push_str(&link(page.page - 1, "Previous"));
    }
    html.push_str(&format!(
        r#"<span class="muted">Page {} of {}</span>"#,
        page.page, page.total_pages
    ));
    if page.page < page.total_pages {
        html.push_str(&link(page.page + 1, "Next"));
    }
    html.push_str("</div>");
    html
}

fn parse_filter(params: &TaskListParams) -> Result<TaskFilter, AppError> {
    let task_type = params
        .type_filter
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let status = params
        .status_filter
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(|e| AppError::invalid_value("status_filter", e))?;
    Ok(TaskFilter { task_type, status })
}

async fn tasks_page(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<TaskListParams>,
) -> Result<Html<String>, AppError> {
    let filter = parse_filter(&params)?;
    let service = state.tasks();
    let page = service.list(&caller, &filter, params.page.unwrap_or(1))?;
    let types = service.task_types(&caller)?;
    let counts: StatusCounts = service.stats_by_status(&caller)?;

    let mut content = templates::TASKS_TEMPLATE.to_string();
    for status in TaskStatus::ALL {
        content = content.replace(
            &format!("{{{{{}_count}}}}", status.as_str()),
            &counts.get(status).to_string(),
        );
    }
    let content = content
        .replace(
            "{{type_options}}",
            &options_html(
                types.iter().map(|t| (t.as_str(), t.as_str())),
                filter.task_type.as_deref(),
            ),
        )
        .replace(
            "{{status_options}}",
            &options_html(status_choices(), filter.status.map(|s| s.as_str())),
        )
        .replace("{{task_table}}", &task_rows(&page))
        .replace("{{pagination}}", &pagination(&page, &filter));

    Ok(Html(render_page(
        "Tasks",
        Some(&caller),
        &flash_html(params.msg.as_deref()),
        &content,
    )))
}

/// Which form is being rendered.
enum FormMode {
    Create,
    Edit(i64),
}

fn task_form_page(
    caller: &Caller,
    mode: FormMode,
    values: &TaskForm,
    types: &[String],
    message: &str,
) -> String {
    let (heading, action, submit) = match mode {
        FormMode::Create => ("New task", "/tasks".to_string(), "Create task"),
        FormMode::Edit(id) => ("Edit task", format!("/tasks/{}", id), "Save changes"),
    };
    let status = values
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(TaskStatus::default().as_str());

    let content = templates::TASK_FORM_TEMPLATE
        .replace("{{heading}}", heading)
        .replace("{{action}}", &action)
        .replace("{{submit_label}}", submit)
        .replace("{{title}}", &html_escape(values.title.as_deref().unwrap_or("")))
        .replace(
            "{{description}}",
            &html_escape(values.description.as_deref().unwrap_or("")),
        )
        .replace("{{type}}", &html_escape(values.task_type.as_deref().unwrap_or("")))
        .replace(
            "{{type_options}}",
            &options_html(types.iter().map(|t| (t.as_str(), t.as_str())), None),
        )
        .replace("{{status_options}}", &options_html(status_choices(), Some(status)))
        .replace("{{due_date}}", &html_escape(values.due_date.as_deref().unwrap_or("")));

    render_page(heading, Some(caller), message, &content)
}

fn form_values(task: &Task) -> TaskForm {
    TaskForm {
        title: Some(task.title.clone()),
        description: task.description.clone(),
        task_type: task.task_type.clone(),
        status: Some(task.status.as_str().to_string()),
        due_date: task.due_date.map(|d| d.format("%Y-%m-%d").to_string()),
    }
}

/// Re-render a form after a validation failure; anything else is an error page.
fn form_error(
    state: &AppState,
    caller: &Caller,
    mode: FormMode,
    form: &TaskForm,
    err: AppError,
) -> Response {
    if err.code != ErrorCode::ValidationFailed {
        return err.into_response();
    }
    let types = state.tasks().task_types(caller).unwrap_or_default();
    let message = flash_html(Some(&format!("error:{}", err.message)));
    (
        status_of(&err),
        Html(task_form_page(caller, mode, form, &types, &message)),
    )
        .into_response()
}

async fn task_create_form(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Html<String>, AppError> {
    let types = state.tasks().task_types(&caller)?;
    Ok(Html(task_form_page(
        &caller,
        FormMode::Create,
        &TaskForm::default(),
        &types,
        "",
    )))
}

async fn task_store(
    State(state): State<AppState>,
    caller: Caller,
    Form(form): Form<TaskForm>,
) -> Response {
    match state.tasks().create(&caller, &form) {
        Ok(_) => redirect_with("/tasks", "success", "Task created successfully."),
        Err(e) => form_error(&state, &caller, FormMode::Create, &form, e),
    }
}

async fn task_edit_form(
    State(state): State<AppState>,
    caller: Caller,
    Path(task_id): Path<i64>,
    Query(query): Query<FlashQuery>,
) -> Result<Html<String>, AppError> {
    let service = state.tasks();
    let task = service.get_for_edit(&caller, task_id)?;
    let types = service.task_types(&caller)?;
    Ok(Html(task_form_page(
        &caller,
        FormMode::Edit(task.id),
        &form_values(&task),
        &types,
        &flash_html(query.msg.as_deref()),
    )))
}

async fn task_update(
    State(state): State<AppState>,
    caller: Caller,
    Path(task_id): Path<i64>,
    Form(form): Form<TaskForm>,
) -> Response {
    match state.tasks().update(&caller, task_id, &form) {
        Ok(_) => redirect_with("/tasks", "success", "Task updated successfully."),
        Err(e) => form_error(&state, &caller, FormMode::Edit(task_id), &form, e),
    }
}

async fn task_delete(
    State(state): State<AppState>,
    caller: Caller,
    Path(task_id): Path<i64>,
) -> Result<Response, AppError> {
    state.tasks().delete(&caller, task_id)?;
    Ok(redirect_with("/tasks", "success", "Task deleted successfully."))
}

/// Per-status counts of the caller's tasks.
async fn task_stats(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<StatusCounts>, ApiError> {
    state
        .tasks()
        .stats_by_status(&caller)
        .map(Json)
        .map_err(ApiError)
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

fn password_page(state: &AppState, caller: &Caller, message: &str) -> String {
    let content = templates::PASSWORD_TEMPLATE
        .replace("{{email}}", &html_escape(&caller.account.email))
        .replace(
            "{{min_password_length}}",
            &state.config().auth.min_password_length.to_string(),
        );
    render_page("Set password", Some(caller), message, &content)
}

async fn password_form(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<FlashQuery>,
) -> Html<String> {
    Html(password_page(&state, &caller, &flash_html(query.msg.as_deref())))
}

#[derive(Debug, Deserialize)]
struct PasswordForm {
    #[serde(default)]
    password: String,
    #[serde(default)]
    password_confirmation: String,
}

async fn password_submit(
    State(state): State<AppState>,
    caller: Caller,
    Form(form): Form<PasswordForm>,
) -> Response {
    match auth::set_password(
        state.db(),
        caller.id(),
        &form.password,
        &form.password_confirmation,
        state.config().auth.min_password_length,
    ) {
        Ok(()) => redirect_with("/tasks", "success", "Password updated."),
        Err(e) if e.code == ErrorCode::ValidationFailed => {
            let message = flash_html(Some(&format!("error:{}", e.message)));
            (status_of(&e), Html(password_page(&state, &caller, &message))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Health check endpoint.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Pages
        .route("/", get(root))
        .route("/dashboard", get(dashboard))
        .route("/login", get(login_form).post(login_submit))
        .route("/register", get(register_form).post(register_submit))
        .route("/logout", post(logout))
        // Google sign-in
        .route("/auth/google", get(google_redirect))
        .route("/auth/google/callback", get(google_callback))
        // Tasks
        .route("/tasks", get(tasks_page).post(task_store))
        .route("/tasks/create", get(task_create_form))
        .route("/tasks/{task_id}/edit", get(task_edit_form))
        .route(
            "/tasks/{task_id}",
            post(task_update).put(task_update).delete(task_delete),
        )
        .route("/tasks/{task_id}/delete", post(task_delete))
        .route("/dashboard/task-stats", get(task_stats))
        // Settings
        .route("/settings/password", get(password_form).post(password_submit))
        // API
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A running server.
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!("Server task failed: {}", e);
        }
    }
}

/// Bind and start serving in the background.
pub async fn start_server(state: AppState) -> anyhow::Result<ServerHandle> {
    let host = state.config().server.host.clone();
    let port = state.config().server.port;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    let addr = listener.local_addr()?;

    info!("Taskboard listening on http://{}", addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("Taskboard server shutting down");
            })
            .await
        {
            error!("Server error: {}", e);
        }
    });

    Ok(ServerHandle {
        addr,
        shutdown_tx,
        task,
    })
}
