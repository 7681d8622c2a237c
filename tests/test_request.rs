use switchyard::http::headers::Headers;
use switchyard::http::request::{Method, Request, RequestBuilder};

fn request_with(headers: &[(&str, &str)]) -> Request {
    Request {
        method: Method::GET,
        path: "/".to_string(),
        version: "HTTP/1.1".to_string(),
        headers: headers.iter().copied().collect(),
        body: vec![],
    }
}

#[test]
fn test_request_header_retrieval() {
    let req = request_with(&[("Host", "example.com"), ("Content-Type", "application/json")]);

    assert_eq!(req.header("Host"), Some("example.com"));
    assert_eq!(req.header("content-type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_request_content_length_parsing() {
    let req = request_with(&[("Content-Length", "42")]);
    assert_eq!(req.content_length(), 42);
}

#[test]
fn test_request_content_length_missing() {
    let req = request_with(&[]);
    assert_eq!(req.content_length(), 0);
}

#[test]
fn test_request_content_length_invalid() {
    let req = request_with(&[("Content-Length", "not-a-number")]);
    assert_eq!(req.content_length(), 0);
}

#[test]
fn test_request_keep_alive_http11_default() {
    assert!(request_with(&[]).keep_alive());
}

#[test]
fn test_request_keep_alive_close() {
    assert!(!request_with(&[("Connection", "close")]).keep_alive());
}

#[test]
fn test_request_keep_alive_case_insensitive() {
    assert!(request_with(&[("Connection", "Keep-Alive")]).keep_alive());
}

#[test]
fn test_request_keep_alive_http10_default_closes() {
    let mut req = request_with(&[]);
    req.version = "HTTP/1.0".to_string();
    assert!(!req.keep_alive());

    req.headers.insert("Connection", "keep-alive");
    assert!(req.keep_alive());
}

#[test]
fn test_request_host_strips_port() {
    assert_eq!(request_with(&[("Host", "example.com:8080")]).host(), Some("example.com"));
    assert_eq!(request_with(&[("host", "example.com")]).host(), Some("example.com"));
    assert_eq!(request_with(&[("Host", "[::1]:8080")]).host(), Some("[::1]"));
}

#[test]
fn test_request_host_missing_or_empty() {
    assert_eq!(request_with(&[]).host(), None);
    assert_eq!(request_with(&[("Host", "")]).host(), None);
    assert_eq!(request_with(&[("Host", ":8080")]).host(), None);
}

#[test]
fn test_request_is_upgrade() {
    let ws = request_with(&[("Connection", "keep-alive, Upgrade"), ("Upgrade", "websocket")]);
    assert!(ws.is_upgrade());

    let no_token = request_with(&[("Connection", "keep-alive"), ("Upgrade", "websocket")]);
    assert!(!no_token.is_upgrade());

    let no_protocol = request_with(&[("Connection", "upgrade")]);
    assert!(!no_protocol.is_upgrade());
}

#[test]
fn test_request_method_from_string() {
    assert_eq!(Method::from_str("GET"), Some(Method::GET));
    assert_eq!(Method::from_str("CONNECT"), Some(Method::CONNECT));
    assert_eq!(Method::from_str("INVALID"), None);
    assert_eq!(Method::from_str("get"), None); // Case-sensitive
    assert_eq!(Method::PATCH.as_str(), "PATCH");
}

#[test]
fn test_request_builder_defaults_version() {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .path("/api")
        .header("X-A", "1")
        .header("X-A", "2")
        .body(b"data".to_vec())
        .build()
        .unwrap();

    assert_eq!(req.version, "HTTP/1.1");
    assert_eq!(req.headers.get_all("x-a").count(), 2);
    assert_eq!(req.body, b"data".to_vec());
}

#[test]
fn test_request_builder_requires_method() {
    let result = RequestBuilder::new().path("/").build();
    assert_eq!(result.err(), Some("method missing"));
}

#[test]
fn test_headers_collect_preserves_order() {
    let headers: Headers = [("B", "2"), ("A", "1")].into_iter().collect();
    let names: Vec<_> = headers.iter().map(|(k, _)| k).collect();
    assert_eq!(names, vec!["B", "A"]);
}
