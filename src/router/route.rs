//! Route targets.
//!
//! A [`Route`] pairs a method with what should happen when it is selected: a
//! handler closure, a nested [`Router`], a static folder or a single file.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use tracing::error;

use super::{files, RouteError, Router};
use crate::context::Extensions;
use crate::http::{Method, Request, Response, StatusCode};

/// Error type handlers may return; the client receives a `500`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = Result<(), HandlerError>;

/// Type-erased synchronous handler.
///
/// Receives the request, the response to fill in and the parameters attached
/// to the route at registration.
pub type Handler =
    Box<dyn Fn(&Request, &mut Response, &Extensions) -> HandlerResult + Send + Sync + 'static>;

enum Action {
    Handler(Handler),
    Router(Router),
    Static(PathBuf),
    File {
        path: PathBuf,
        default: Option<String>,
    },
}

/// A method bound to an action, plus the parameters the action is called with.
///
/// # Examples
///
/// ```
/// use spindle::http::{Method, StatusCode};
/// use spindle::router::{Route, Router};
///
/// struct Motd(&'static str);
///
/// let route = Route::new(Method::Get, |_req, res, params| {
///     let motd = params.get::<Motd>().map_or("", |m| m.0);
///     res.text(motd);
///     Ok(())
/// })
/// .with_param(Motd("welcome"));
///
/// let mut router = Router::new();
/// router.add_route("motd", route).unwrap();
/// ```
pub struct Route {
    method: Method,
    action: Action,
    params: Extensions,
}

impl Route {
    /// Creates a route that calls `handler`.
    pub fn new<F>(method: Method, handler: F) -> Self
    where
        F: Fn(&Request, &mut Response, &Extensions) -> HandlerResult + Send + Sync + 'static,
    {
        Self::with_action(method, Action::Handler(Box::new(handler)))
    }

    /// Creates a route, for every method, that hands the request to `router`.
    pub fn router(router: Router) -> Self {
        Self::with_action(Method::All, Action::Router(router))
    }

    /// Creates a `GET` route that serves files below `folder`.
    ///
    /// # Errors
    ///
    /// [`RouteError::FolderNotFound`] when `folder` is not a directory.
    pub fn static_dir(folder: impl Into<PathBuf>) -> Result<Self, RouteError> {
        let folder = folder.into();
        if !folder.is_dir() {
            return Err(RouteError::FolderNotFound(folder));
        }
        Ok(Self::with_action(Method::Get, Action::Static(folder)))
    }

    /// Creates a `GET` route that serves `file`, or `default` when the file is
    /// gone at request time.
    ///
    /// # Errors
    ///
    /// [`RouteError::FileNotFound`] when `file` does not exist and there is no default.
    pub fn file(file: impl Into<PathBuf>, default: Option<String>) -> Result<Self, RouteError> {
        let path = file.into();
        if default.is_none() && !path.is_file() {
            return Err(RouteError::FileNotFound(path));
        }
        Ok(Self::with_action(Method::Get, Action::File { path, default }))
    }

    fn with_action(method: Method, action: Action) -> Self {
        Self {
            method,
            action,
            params: Extensions::new(),
        }
    }

    /// Attaches a value the handler can look up by type.
    #[must_use]
    pub fn with_param<T>(mut self, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.params.insert(value);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn params(&self) -> &Extensions {
        &self.params
    }

    /// Runs the action. A failing or panicking handler turns the response
    /// into a `500` that closes the connection.
    pub(crate) fn handle(&self, request: &mut Request, response: &mut Response) {
        match &self.action {
            Action::Handler(handler) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    handler(request, response, &self.params)
                }));
                let failure = match outcome {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => e.to_string(),
                    Err(payload) => panic_message(payload.as_ref()),
                };
                error!(
                    method = %request.method(),
                    path = request.path(),
                    route = request.route_path(),
                    error = %failure,
                    "handler failed"
                );
                response.fail(StatusCode::InternalServerError);
            }
            Action::Router(router) => router.handle_request(request, response),
            Action::Static(folder) => files::serve_static(folder, request, response),
            Action::File { path, default } => files::serve_file(path, default.as_deref(), response),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_owned()
    }
}
