#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use prochat_api::{AppState, AppStateInner, router};
use prochat_db::Database;

pub const SECRET: &str = "test-secret";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

pub fn test_app() -> TestApp {
    let db = Arc::new(Database::open_in_memory().expect("in-memory db"));
    let state = AppStateInner::new(db, SECRET);
    TestApp {
        router: router(state.clone()),
        state,
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Reply {
    /// `token=...` pair from Set-Cookie, ready to send back as a Cookie header.
    pub fn session_cookie(&self) -> String {
        let raw = self.set_cookie();
        raw.split(';').next().unwrap().trim().to_string()
    }

    pub fn set_cookie(&self) -> String {
        self.headers
            .get(header::SET_COOKIE)
            .expect("Set-Cookie header")
            .to_str()
            .unwrap()
            .to_string()
    }
}

impl TestApp {
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };

        Reply {
            status,
            headers,
            body,
        }
    }

    pub async fn register(&self, name: &str, email: &str, handle: Option<&str>) -> Reply {
        let mut body = serde_json::json!({
            "name": name,
            "email": email,
            "password": "correct horse",
        });
        if let Some(handle) = handle {
            body["userId"] = handle.into();
        }
        self.call(Method::POST, "/api/auth/user/register", None, Some(body))
            .await
    }

    /// Register then log in; returns (user id, cookie).
    pub async fn sign_up(&self, name: &str, handle: &str) -> (String, String) {
        let email = format!("{handle}@example.com");
        let reply = self.register(name, &email, Some(handle)).await;
        assert_eq!(reply.status, StatusCode::CREATED, "{:?}", reply.body);
        let login = self.login(&email, "correct horse").await;
        assert_eq!(login.status, StatusCode::OK, "{:?}", login.body);
        (
            login.body["user"]["id"].as_str().unwrap().to_string(),
            login.session_cookie(),
        )
    }

    pub async fn login(&self, email: &str, password: &str) -> Reply {
        self.call(
            Method::POST,
            "/api/auth/user/login",
            None,
            Some(serde_json::json!({ "email": email, "password": password })),
        )
        .await
    }
}
