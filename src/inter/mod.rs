/*!
Interoperation between the client (user) and server.

(Not the application and the database; that's covered by `auth` and `store`.)
*/
use std::{
    fmt::Debug,
    path::Path,
    sync::Arc,
};

use axum::{
    extract::{Extension, Form},
    http::{Request, StatusCode},
    http::header::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{Html, IntoResponse, Response},
    Json,
};
use handlebars::Handlebars;
use once_cell::sync::OnceCell;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

use crate::auth::{AuthError, AuthResult};
use crate::config::{Glob, GlobError};
use crate::user::User;

pub mod admin;
pub mod student;
pub mod teacher;

static TEMPLATES: OnceCell<Handlebars> = OnceCell::new();

static HTML_500: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>OJT Portal | Error</title>
<link rel="stylesheet" href="/static/ojt.css">
</head>
<body>
<h1>Internal Server Error</h1>
<p>(Error 500)</p>
<p>Something went wrong on our end. No further or more
helpful information is available about the problem.</p>
</body>
</html>"#;

static TEXT_500: &str = "An internal error occurred; an appropriate response was inconstructable.";

trait AddHeaders: IntoResponse + Sized {
    fn add_headers(self, mut new_headers: Vec<(HeaderName, HeaderValue)>) -> Response {
        let mut r = self.into_response();
        let r_headers = r.headers_mut();
        for (name, value) in new_headers.drain(..) {
            r_headers.insert(name, value);
        }

        r
    }
}

impl<T: IntoResponse + Sized> AddHeaders for T {}

/// Data type to read the form data from a front-page login request.
#[derive(Deserialize)]
pub struct LoginData {
    pub uname: String,
    pub password: String,
}

impl Debug for LoginData {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("LoginData")
            .field("uname", &self.uname)
            .finish_non_exhaustive()
    }
}

/// Body of a `change-password` request.
#[derive(Deserialize)]
struct PasswordChange {
    old: String,
    new: String,
}

/**
Initializes the resources used in this module. This function should be called
before any functionality of this module or any of its submodules is used.

Currently the only thing that happens here is loading the templates used by
`serve_template()`, which will respond with an error page unless `init()`
has been called first.

The argument is the path to the directory where the templates used by
`serve_template()` can be found.
*/
pub fn init<P: AsRef<Path>>(template_dir: P) -> Result<(), String> {
    if TEMPLATES.get().is_some() {
        log::warn!("Templates directory already initialized; ignoring.");
        return Ok(())
    }

    let template_dir = template_dir.as_ref();

    let mut h = Handlebars::new();
    #[cfg(debug_assertions)]
    h.set_dev_mode(true);
    h.register_templates_directory(".html", template_dir)
        .map_err(|e| format!(
            "Error registering templates directory {}: {}",
            template_dir.display(), &e
        ))?;

    TEMPLATES.set(h)
        .map_err(|old_h| {
            let mut estr = String::from("Templates directory already registered w/templates:");
            for template_name in old_h.get_templates().keys() {
                estr.push('\n');
                estr.push_str(template_name.as_str());
            }
            estr
        })?;

    Ok(())
}

/**
Return an HTML response in the case of an unrecoverable* error.

(*"Unrecoverable" from the perspective of fielding the current request,
not from the perspective of the program crashing.)
*/
pub fn html_500() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(HTML_500)
    ).into_response()
}

pub fn text_500(text: Option<String>) -> Response {
    match text {
        Some(text) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            text
        ).into_response(),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            TEXT_500.to_owned()
        ).into_response()
    }
}

pub fn serve_template<S>(
    code: StatusCode,
    template_name: &str,
    data: &S,
    addl_headers: Vec<(HeaderName, HeaderValue)>
) -> Response
where
    S: Serialize + Debug
{
    log::trace!("serve_template( {}, {:?}, ... ) called.", &code, template_name);

    let templates = match TEMPLATES.get() {
        Some(h) => h,
        None => {
            log::error!("serve_template() called before inter::init().");
            return html_500();
        },
    };

    match templates.render(template_name, data) {
        Ok(response_body) => (
            code,
            Html(response_body)
        ).add_headers(addl_headers),
        Err(e) => {
            log::error!(
                "Error rendering template {:?} with data {:?}:\n{}",
                template_name, data, &e
            );
            html_500()
        },
    }
}

/// Successful JSON response to an API request, labeled with the action
/// that produced it.
pub fn action_response<S: Serialize>(action: &'static str, data: &S) -> Response {
    (
        StatusCode::OK,
        [(
            HeaderName::from_static("x-ojt-action"),
            HeaderValue::from_static(action),
        )],
        Json(data),
    ).into_response()
}

pub fn respond_bad_password() -> Response {
    log::trace!("respond_bad_password() called.");

    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error_message": "Invalid username/password combination."
        })),
    ).into_response()
}

pub fn respond_bad_key() -> Response {
    log::trace!("respond_bad_key() called.");

    (
        StatusCode::UNAUTHORIZED,
        "Invalid authorization key.".to_owned(),
    ).into_response()
}

pub fn respond_forbidden(msg: String) -> Response {
    log::trace!("respond_forbidden( {:?} ) called.", &msg);

    (
        StatusCode::FORBIDDEN,
        msg
    ).into_response()
}

pub fn respond_bad_request(msg: String) -> Response {
    log::trace!("respond_bad_request( {:?} ) called.", &msg);

    (
        StatusCode::BAD_REQUEST,
        msg
    ).into_response()
}

/// 400 for the client's mistakes, 403 for overreach, and 500 (logged) for
/// database trouble.
pub fn respond_glob_error(e: GlobError) -> Response {
    match e {
        GlobError::Invalid(msg) => respond_bad_request(msg),
        GlobError::Forbidden(msg) => respond_forbidden(msg),
        GlobError::Internal(msg) => {
            log::error!("{}", &msg);
            text_500(Some(msg))
        },
    }
}

/// Value of header `name`, or a 400 response explaining why there isn't one.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, Response> {
    match headers.get(name) {
        Some(val) => val.to_str().map_err(|e| {
            log::error!("Failed converting {} value {:?} to &str: {}", name, val, &e);
            respond_bad_request(format!("{} header unrecognizable.", name))
        }),
        None => Err(respond_bad_request(
            format!("Request must have an {} header.", name)
        )),
    }
}

pub fn request_action(headers: &HeaderMap) -> Result<&str, Response> {
    header_str(headers, "x-ojt-action")
}

/// The `User` making an (already key-authenticated) request.
pub fn request_user(headers: &HeaderMap, glob: &Glob) -> Result<User, Response> {
    let uname = header_str(headers, "x-ojt-uname")?;
    match glob.users.get(uname) {
        Some(u) => Ok(u.clone()),
        None => {
            log::error!("Authenticated uname {:?} has no user record.", uname);
            Err(text_500(None))
        },
    }
}

pub fn require_body(body: Option<String>, what: &str) -> Result<String, Response> {
    match body {
        Some(body) if !body.trim().is_empty() => Ok(body),
        _ => Err(respond_bad_request(format!("Request requires a {} body.", what))),
    }
}

/// Deserialize a JSON request body as a `T`.
pub fn json_body<T: DeserializeOwned>(body: Option<String>) -> Result<T, Response> {
    let body = require_body(body, "JSON")?;
    serde_json::from_str(&body).map_err(|e| {
        log::error!(
            "Error deserializing JSON {:?} as {}: {}",
            &body, std::any::type_name::<T>(), &e
        );
        respond_bad_request(format!("Unable to deserialize request body: {}", &e))
    })
}

/// Middleware function to ensure `x-ojt-request-id` header is
/// maintained between request and response.
pub async fn request_identity<B>(
    req: Request<B>,
    next: Next<B>
) -> Response {
    let id_header = match req.headers().get("x-ojt-request-id") {
        Some(id) => id.to_owned(),
        None => {
            return respond_bad_request(
                "Request must have an x-ojt-request-id header.".to_owned()
            );
        },
    };

    let mut response = next.run(req).await;
    response.headers_mut().insert("x-ojt-request-id", id_header);
    response
}

pub async fn key_authenticate<B>(
    req: Request<B>,
    next: Next<B>,
) -> Response {
    let glob: Arc<RwLock<Glob>> = match req.extensions().get::<Arc<RwLock<Glob>>>() {
        Some(glob) => glob.clone(),
        None => {
            log::error!("Global state missing from request extensions.");
            return text_500(None);
        },
    };

    let (uname, key) = {
        let headers = req.headers();
        let key = match header_str(headers, "x-ojt-key") {
            Ok(k) => k.to_owned(),
            Err(r) => { return r; },
        };
        let uname = match header_str(headers, "x-ojt-uname") {
            Ok(u) => u.to_owned(),
            Err(r) => { return r; },
        };
        (uname, key)
    };

    // Bind the result so the locks release before matching.
    let res = glob.read().await.auth().read().await.check_key(
        &uname, &key
    ).await;

    match res {
        Err(e) => {
            log::error!(
                "auth::Db::check_key( {:?}, [ key ] ) returned error: {}",
                &uname, &e
            );

            return text_500(None);
        },
        Ok(AuthResult::InvalidKey) => {
            return respond_bad_key();
        },
        Ok(AuthResult::Ok) => {},
        Ok(x) => {
            log::warn!(
                "auth::Db::check_key() returned {:?}, which should never happen.",
                &x
            );
            return text_500(None);
        },
    }

    next.run(req).await
}

/// What a freshly-logged-in client needs to know about its user.
fn login_data(glob: &Glob, u: &User, key: &str) -> serde_json::Value {
    match u {
        User::Admin(_) => json!({
            "uname": u.email(),
            "key": key,
            "user": u,
        }),
        User::Teacher(t) => json!({
            "uname": u.email(),
            "key": key,
            "user": u,
            "subjects": glob.subjects_taught_by(t.base.id),
        }),
        User::Student(s) => {
            let department = s.department.and_then(|d| glob.departments.get(&d));
            let mut subjects: Vec<_> = s.subjects.iter()
                .filter_map(|id| glob.subjects.get(id))
                .collect();
            subjects.sort_by(|a, b| a.name.cmp(&b.name));
            json!({
                "uname": u.email(),
                "key": key,
                "user": u,
                "department": department,
                "subjects": subjects,
            })
        },
    }
}

pub async fn login(
    Form(form): Form<LoginData>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("login( {:?}, [ global state ] ) called.", &form);

    let u = match glob.read().await.users.get(&form.uname) {
        Some(u) => u.clone(),
        None => { return respond_bad_password(); },
    };

    let auth_response = {
        glob.read().await.auth().read().await.check_password_and_issue_key(
            &form.uname,
            &form.password,
        ).await
    };

    let auth_key = match auth_response {
        Err(e) => {
            log::error!(
                "auth::Db::check_password_and_issue_key( {:?}, [ password ] ): {}",
                &form.uname, &e
            );
            return text_500(None);
        },
        Ok(AuthResult::Key(k)) => k,
        Ok(AuthResult::BadPassword) | Ok(AuthResult::NoSuchUser) => {
            return respond_bad_password();
        },
        Ok(x) => {
            log::warn!(
                "auth::Db::check_password_and_issue_key( {:?}, [ password ] ) returned {:?}, which shouldn't happen.",
                &form.uname, &x
            );
            return respond_bad_password();
        },
    };

    log::info!("{} {:?} logged in.", &u.role(), u.email());

    let data = login_data(&*glob.read().await, &u, &auth_key);
    action_response("login", &data)
}

/// Anything but `AuthResult::Ok` from `set_password` means the new password
/// didn't take, so no key should be issued for it.
fn password_was_set(
    uname: &str,
    res: Result<AuthResult, AuthError>,
) -> Result<(), Response> {
    match res {
        Ok(AuthResult::Ok) => Ok(()),
        Ok(x) => {
            log::error!("set_password( {:?} ) returned {:?}.", uname, &x);
            Err(text_500(Some("Unable to set new password.".to_owned())))
        },
        Err(e) => {
            log::error!("Error setting password for {:?}: {}", uname, &e);
            Err(text_500(Some("Unable to set new password.".to_owned())))
        },
    }
}

/**
Change the requesting user's own password.

Changing a password invalidates the user's outstanding keys, so a new one
is issued and returned.
*/
async fn change_password(
    u: &User,
    body: Option<String>,
    glob: Arc<RwLock<Glob>>,
) -> Response {
    log::trace!("change_password( {:?}, ... ) called.", u.email());

    let pc: PasswordChange = match json_body(body) {
        Ok(pc) => pc,
        Err(r) => { return r; },
    };
    if pc.new.is_empty() {
        return respond_bad_request("New password must not be blank.".to_owned());
    }

    let glob = glob.read().await;
    let auth = glob.auth();
    let auth = auth.read().await;

    match auth.check_password(u.email(), &pc.old).await {
        Ok(AuthResult::Ok) => {},
        Ok(AuthResult::BadPassword) => { return respond_bad_password(); },
        Ok(x) => {
            log::error!("check_password( {:?} ) returned {:?}.", u.email(), &x);
            return text_500(None);
        },
        Err(e) => {
            log::error!("Error checking password for {:?}: {}", u.email(), &e);
            return text_500(None);
        },
    }

    let res = auth.set_password(u.email(), &pc.new).await;
    if let Err(r) = password_was_set(u.email(), res) {
        return r;
    }

    match auth.check_password_and_issue_key(u.email(), &pc.new).await {
        Ok(AuthResult::Key(k)) => action_response(
            "change-password",
            &json!({ "uname": u.email(), "key": k }),
        ),
        Ok(x) => {
            log::error!("Issuing key after password change returned {:?}.", &x);
            text_500(None)
        },
        Err(e) => {
            log::error!("Error issuing key after password change: {}", &e);
            text_500(Some("Password changed; please log in again.".to_owned()))
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::sample_glob;

    pub fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs.iter() {
            h.insert(*k, HeaderValue::from_static(*v));
        }
        h
    }

    #[test]
    fn action_header() {
        let r = action_response("populate-users", &Vec::<i64>::new());
        assert_eq!(r.status(), StatusCode::OK);
        assert_eq!(r.headers()["x-ojt-action"], "populate-users");
    }

    #[test]
    fn missing_headers() {
        let h = headers(&[("x-ojt-uname", "asha@example.org")]);
        let r = request_action(&h).unwrap_err();
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);

        let glob = sample_glob();
        let u = request_user(&h, &glob).unwrap();
        assert_eq!(u.id(), 200);

        let h = headers(&[("x-ojt-uname", "nobody@example.org")]);
        let r = request_user(&h, &glob).unwrap_err();
        assert_eq!(r.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn bodies() {
        assert_eq!(
            require_body(None, "CSV").unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
        assert!(require_body(Some("  \n".to_owned()), "CSV").is_err());

        let n: Result<i64, _> = json_body(Some("17".to_owned()));
        assert_eq!(n.unwrap(), 17);
        let n: Result<i64, _> = json_body(Some("seventeen".to_owned()));
        assert_eq!(n.unwrap_err().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn login_payloads() {
        let glob = sample_glob();

        let teacher = glob.users["berro@example.org"].clone();
        let v = login_data(&glob, &teacher, "k");
        assert_eq!(v["key"], "k");
        assert_eq!(v["subjects"].as_array().unwrap().len(), 2);

        let student = glob.users["asha@example.org"].clone();
        let v = login_data(&glob, &student, "k");
        assert_eq!(v["department"]["name"], "Electrical");
        assert_eq!(v["subjects"][0]["name"], "Circuits");
    }

    #[tokio::test]
    async fn request_id_required_and_echoed() {
        use axum::{body::Body, middleware, routing::post, Router};
        use tower::ServiceExt;

        let app = Router::new()
            .route("/x", post(|| async { "ok" }))
            .route_layer(middleware::from_fn(request_identity));

        let req = Request::builder()
            .method("POST")
            .uri("/x")
            .body(Body::empty())
            .unwrap();
        let r = app.clone().oneshot(req).await.unwrap();
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);

        let req = Request::builder()
            .method("POST")
            .uri("/x")
            .header("x-ojt-request-id", "17")
            .body(Body::empty())
            .unwrap();
        let r = app.oneshot(req).await.unwrap();
        assert_eq!(r.status(), StatusCode::OK);
        assert_eq!(r.headers()["x-ojt-request-id"], "17");
    }

    #[test]
    fn password_change_needs_existing_credentials() {
        assert!(password_was_set("asha@example.org", Ok(AuthResult::Ok)).is_ok());

        let r = password_was_set("asha@example.org", Ok(AuthResult::NoSuchUser)).unwrap_err();
        assert_eq!(r.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
