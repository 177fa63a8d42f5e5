//! Test doubles shared by the unit tests

use crate::domain::ports::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

enum Reply {
    Status(u16, String),
    Unreachable,
}

struct Route {
    method: HttpMethod,
    prefix: String,
    /// Replies are consumed in order; the last one repeats
    replies: VecDeque<Reply>,
}

/// `HttpTransport` that answers from a script and records every request.
///
/// Requests are matched by method and the longest URL prefix. Anything
/// unmatched behaves like an unreachable host.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn push(self, method: HttpMethod, prefix: &str, reply: Reply) -> Self {
        {
            let mut routes = self.routes.lock();
            match routes
                .iter_mut()
                .find(|r| r.method == method && r.prefix == prefix)
            {
                Some(route) => route.replies.push_back(reply),
                None => routes.push(Route {
                    method,
                    prefix: prefix.to_string(),
                    replies: VecDeque::from([reply]),
                }),
            }
        }
        self
    }

    pub(crate) fn on(self, method: HttpMethod, prefix: &str, status: u16, body: &str) -> Self {
        self.push(method, prefix, Reply::Status(status, body.to_string()))
    }

    pub(crate) fn on_get(self, prefix: &str, status: u16, body: &str) -> Self {
        self.on(HttpMethod::Get, prefix, status, body)
    }

    pub(crate) fn unreachable(self, method: HttpMethod, prefix: &str) -> Self {
        self.push(method, prefix, Reply::Unreachable)
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn count(&self, method: HttpMethod, prefix: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.url.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().push(request.clone());

        let mut routes = self.routes.lock();
        let route = routes
            .iter_mut()
            .filter(|r| r.method == request.method && request.url.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.len());

        let reply = match route {
            Some(route) if route.replies.len() > 1 => route.replies.pop_front(),
            Some(route) => route.replies.front().map(|reply| match reply {
                Reply::Status(status, body) => Reply::Status(*status, body.clone()),
                Reply::Unreachable => Reply::Unreachable,
            }),
            None => None,
        };

        match reply {
            Some(Reply::Status(status, body)) => Ok(HttpResponse { status, body }),
            _ => Err(Error::BackendCall {
                backend: "test".into(),
                operation: request.url,
                reason: "connection refused".into(),
            }),
        }
    }
}
