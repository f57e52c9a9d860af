//! Route table: exact (method, path) pairs plus the `/v1/models/<id>` and `/api/traces/<id>`
//! prefixes. `OPTIONS` matches every path. A known path with the wrong method is a plain 404.

use super::http::Method;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    Models,
    Model(String),
    Tools,
    ChatCompletions,
    Process,
    Traces,
    Trace(String),
    Preflight,
    NotFound,
}

impl Route {
    /// Short label used in logs and trace metadata.
    pub fn label(&self) -> &'static str {
        match self {
            Route::Health => "health",
            Route::Models | Route::Model(_) => "models",
            Route::Tools => "tools",
            Route::ChatCompletions => "chat",
            Route::Process => "process",
            Route::Traces | Route::Trace(_) => "traces",
            Route::Preflight => "preflight",
            Route::NotFound => "not_found",
        }
    }
}

fn tail_segment<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix)
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
}

pub fn route(method: &Method, path: &str) -> Route {
    if *method == Method::Options {
        return Route::Preflight;
    }
    match (method, path) {
        (Method::Get, "/api/health") => Route::Health,
        (Method::Get, "/v1/models" | "/models") => Route::Models,
        (Method::Get, "/v1/tools") => Route::Tools,
        (Method::Post, "/v1/chat/completions" | "/chat/completions") => Route::ChatCompletions,
        (Method::Post, "/api/consciousness/process") => Route::Process,
        (Method::Get, "/api/traces") => Route::Traces,
        (Method::Get, p) => {
            if let Some(id) = tail_segment(p, "/v1/models/").or_else(|| tail_segment(p, "/models/")) {
                Route::Model(id.to_string())
            } else if let Some(id) = tail_segment(p, "/api/traces/") {
                Route::Trace(id.to_string())
            } else {
                Route::NotFound
            }
        }
        _ => Route::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_routes() {
        assert_eq!(route(&Method::Get, "/api/health"), Route::Health);
        assert_eq!(route(&Method::Get, "/models"), Route::Models);
        assert_eq!(route(&Method::Get, "/v1/models"), Route::Models);
        assert_eq!(route(&Method::Get, "/v1/tools"), Route::Tools);
        assert_eq!(route(&Method::Post, "/chat/completions"), Route::ChatCompletions);
        assert_eq!(route(&Method::Post, "/v1/chat/completions"), Route::ChatCompletions);
        assert_eq!(route(&Method::Post, "/api/consciousness/process"), Route::Process);
    }

    #[test]
    fn test_prefix_routes() {
        assert_eq!(
            route(&Method::Get, "/v1/models/aifo-gateway"),
            Route::Model("aifo-gateway".into())
        );
        assert_eq!(route(&Method::Get, "/v1/models/"), Route::NotFound);
        assert_eq!(route(&Method::Get, "/v1/models/a/b"), Route::NotFound);
        assert_eq!(route(&Method::Get, "/api/traces/abc"), Route::Trace("abc".into()));
    }

    #[test]
    fn test_options_and_fallthrough() {
        assert_eq!(route(&Method::Options, "/whatever/here"), Route::Preflight);
        assert_eq!(route(&Method::Get, "/nope"), Route::NotFound);
        assert_eq!(route(&Method::Get, "/v1/chat/completions"), Route::NotFound);
        assert_eq!(route(&Method::Post, "/api/health"), Route::NotFound);
        assert_eq!(
            route(&Method::Other("DELETE".into()), "/v1/models"),
            Route::NotFound
        );
    }
}
