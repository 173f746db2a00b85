mod support;

use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use git_http_hyper::{HttpConnection, HyperConnection};
use support::server;

#[test]
fn execute_happens_at_most_once() {
    let _ = env_logger::try_init();

    let hits = Arc::new(AtomicUsize::new(0));
    let server_hits = hits.clone();
    let server = server::http(move |_req| {
        let hits = server_hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            http::Response::default()
        }
    });

    let url = format!("http://{}/count", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();

    conn.connect().unwrap();
    let first = conn.response_code().unwrap();
    conn.connect().unwrap();
    let second = conn.response_code().unwrap();

    assert_eq!(first, second);
    assert_eq!(conn.response_message().unwrap(), "OK");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn post_body_fixed_length() {
    let _ = env_logger::try_init();

    let server = server::http(move |req| async move {
        assert_eq!(req.method(), "POST");
        assert_eq!(req.headers()[http::header::CONTENT_LENGTH], "5");
        let body = hyper::body::to_bytes(req.into_body()).await.unwrap();
        assert_eq!(&*body, b"hello");
        http::Response::default()
    });

    let url = format!("http://{}/upload", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();
    conn.set_request_method("POST").unwrap();
    conn.set_fixed_length_streaming_mode(5).unwrap();
    conn.output_stream().unwrap().write_all(b"hello").unwrap();

    assert_eq!(conn.response_code().unwrap(), 200);
}

#[test]
fn post_body_chunked() {
    let _ = env_logger::try_init();

    let server = server::http(move |req| async move {
        assert!(req.headers().get(http::header::CONTENT_LENGTH).is_none());
        let body = hyper::body::to_bytes(req.into_body()).await.unwrap();
        assert_eq!(&*body, b"streamed");
        http::Response::default()
    });

    let url = format!("http://{}/upload-pack", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();
    conn.set_request_method("POST").unwrap();
    conn.set_chunked_streaming_mode();
    conn.output_stream().unwrap().write_all(b"streamed").unwrap();

    assert_eq!(conn.response_code().unwrap(), 200);
}

#[test]
fn large_body_spills_and_arrives_whole() {
    let _ = env_logger::try_init();

    // bigger than the spool's in-core limit
    let payload = vec![0x42u8; 3 * 1024 * 1024];
    let expected_len = payload.len();

    let server = server::http(move |req| async move {
        let body = hyper::body::to_bytes(req.into_body()).await.unwrap();
        assert_eq!(body.len(), 3 * 1024 * 1024);
        assert!(body.iter().all(|b| *b == 0x42));
        http::Response::default()
    });

    let url = format!("http://{}/receive-pack", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();
    conn.set_request_method("POST").unwrap();
    conn.set_fixed_length_streaming_mode(expected_len as u64)
        .unwrap();
    conn.output_stream().unwrap().write_all(&payload).unwrap();

    assert_eq!(conn.response_code().unwrap(), 200);
}

#[test]
fn multi_valued_response_headers() {
    let _ = env_logger::try_init();

    let server = server::http(move |_req| async move {
        http::Response::builder()
            .header("x-pack", "a")
            .header("x-pack", "b")
            .header(
                "content-type",
                "application/x-git-upload-pack-advertisement",
            )
            .body(hyper::Body::from("body"))
            .unwrap()
    });

    let url = format!("http://{}/info/refs", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();

    assert_eq!(conn.header_field("x-pack").unwrap().as_deref(), Some("a"));
    assert_eq!(conn.header_fields("x-pack").unwrap(), vec!["a", "b"]);

    let map = conn.header_map().unwrap();
    assert_eq!(map["x-pack"], vec!["a", "b"]);

    assert_eq!(
        conn.content_type().unwrap().as_deref(),
        Some("application/x-git-upload-pack-advertisement")
    );
    assert_eq!(conn.header_field("x-missing").unwrap(), None);
    assert!(conn.header_fields("x-missing").unwrap().is_empty());
}

#[test]
fn content_length_of_chunked_response_is_unknown() {
    let _ = env_logger::try_init();

    let server = server::http(move |_req| async move {
        let (mut tx, body) = hyper::Body::channel();
        tokio::spawn(async move {
            let _ = tx.send_data("x".into()).await;
        });
        http::Response::new(body)
    });

    let url = format!("http://{}/stream", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();

    assert_eq!(conn.content_length().unwrap(), None);

    let mut body = String::new();
    conn.input_stream()
        .unwrap()
        .read_to_string(&mut body)
        .unwrap();
    assert_eq!(body, "x");
}

#[test]
fn content_length_of_sized_response_is_reported() {
    let _ = env_logger::try_init();

    let server =
        server::http(move |_req| async move { http::Response::new(hyper::Body::from("0123")) });

    let url = format!("http://{}/sized", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();
    assert_eq!(conn.content_length().unwrap(), Some(4));
}

#[test]
fn input_stream_can_only_be_taken_once() {
    let _ = env_logger::try_init();

    let server =
        server::http(move |_req| async move { http::Response::new(hyper::Body::from("data")) });

    let url = format!("http://{}/once", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();

    let mut body = String::new();
    conn.input_stream()
        .unwrap()
        .read_to_string(&mut body)
        .unwrap();
    assert_eq!(body, "data");

    let err = conn.input_stream().err().unwrap();
    assert!(err.is_body());
}

#[test]
fn response_message_reports_reason() {
    let _ = env_logger::try_init();

    let server = server::http(move |_req| async move {
        http::Response::builder()
            .status(404)
            .body(hyper::Body::empty())
            .unwrap()
    });

    let url = format!("http://{}/missing", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();

    assert_eq!(conn.response_code().unwrap(), 404);
    assert_eq!(conn.response_message().unwrap(), "Not Found");
}

#[test]
fn head_request_sends_no_body() {
    let _ = env_logger::try_init();

    let server = server::http(move |req| async move {
        assert_eq!(req.method(), "HEAD");
        assert!(req.headers().get(http::header::CONTENT_LENGTH).is_none());
        http::Response::default()
    });

    let url = format!("http://{}/probe", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();
    conn.set_request_method("HEAD").unwrap();
    // a buffer written before a bodyless method is discarded, not sent
    conn.output_stream().unwrap().write_all(b"ignored").unwrap();

    assert_eq!(conn.response_code().unwrap(), 200);
}

#[test]
fn request_headers_accumulate() {
    let _ = env_logger::try_init();

    let server = server::http(move |req| async move {
        let accepts: Vec<_> = req
            .headers()
            .get_all(http::header::ACCEPT)
            .iter()
            .map(|v| v.to_str().unwrap().to_owned())
            .collect();
        assert_eq!(accepts, vec!["application/a", "application/b"]);
        http::Response::default()
    });

    let url = format!("http://{}/accept", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();
    conn.add_request_header("Accept", "application/a").unwrap();
    conn.add_request_header("Accept", "application/b").unwrap();

    assert_eq!(conn.response_code().unwrap(), 200);
}
