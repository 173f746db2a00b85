mod support;

use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use git_http_hyper::{HttpConnection, HyperConnection};
use support::server;

#[test]
fn follows_redirects_by_default() {
    let _ = env_logger::try_init();

    let server = server::http(move |req| async move {
        if req.uri().path() == "/orig" {
            http::Response::builder()
                .status(302)
                .header("location", "/dst")
                .body(hyper::Body::empty())
                .unwrap()
        } else {
            assert_eq!(req.uri().path(), "/dst");
            http::Response::new(hyper::Body::from("ok"))
        }
    });

    let url = format!("http://{}/orig", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();

    assert_eq!(conn.response_code().unwrap(), 200);
    let mut body = String::new();
    conn.input_stream()
        .unwrap()
        .read_to_string(&mut body)
        .unwrap();
    assert_eq!(body, "ok");
}

#[test]
fn redirect_flag_off_surfaces_response() {
    let _ = env_logger::try_init();

    let server = server::http(move |_req| async move {
        http::Response::builder()
            .status(302)
            .header("location", "/dst")
            .body(hyper::Body::empty())
            .unwrap()
    });

    let url = format!("http://{}/orig", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();
    conn.set_follow_redirects(false);

    assert_eq!(conn.response_code().unwrap(), 302);
    assert_eq!(
        conn.header_field("location").unwrap().as_deref(),
        Some("/dst")
    );
}

#[test]
fn see_other_downgrades_post_to_get() {
    let _ = env_logger::try_init();

    let server = server::http(move |req| async move {
        if req.uri().path() == "/post" {
            assert_eq!(req.method(), "POST");
            http::Response::builder()
                .status(303)
                .header("location", "/result")
                .body(hyper::Body::empty())
                .unwrap()
        } else {
            assert_eq!(req.uri().path(), "/result");
            assert_eq!(req.method(), "GET");
            assert!(req.headers().get(http::header::CONTENT_LENGTH).is_none());
            http::Response::new(hyper::Body::from("done"))
        }
    });

    let url = format!("http://{}/post", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();
    conn.set_request_method("POST").unwrap();
    conn.set_fixed_length_streaming_mode(4).unwrap();
    conn.output_stream().unwrap().write_all(b"data").unwrap();

    assert_eq!(conn.response_code().unwrap(), 200);
    let mut body = String::new();
    conn.input_stream()
        .unwrap()
        .read_to_string(&mut body)
        .unwrap();
    assert_eq!(body, "done");
}

#[test]
fn temporary_redirect_with_body_is_not_replayed() {
    let _ = env_logger::try_init();

    let hits = Arc::new(AtomicUsize::new(0));
    let server_hits = hits.clone();
    let server = server::http(move |_req| {
        let hits = server_hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            http::Response::builder()
                .status(307)
                .header("location", "/elsewhere")
                .body(hyper::Body::empty())
                .unwrap()
        }
    });

    let url = format!("http://{}/push", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();
    conn.set_request_method("POST").unwrap();
    conn.output_stream().unwrap().write_all(b"pack").unwrap();

    // the one-shot body cannot be replayed, so the 307 is surfaced
    assert_eq!(conn.response_code().unwrap(), 307);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn redirect_loop_errors_out() {
    let _ = env_logger::try_init();

    let server = server::http(move |_req| async move {
        http::Response::builder()
            .status(302)
            .header("location", "/loop")
            .body(hyper::Body::empty())
            .unwrap()
    });

    let url = format!("http://{}/loop", server.addr());
    let mut conn = HyperConnection::new(&url, Duration::ZERO).unwrap();

    let err = conn.connect().unwrap_err();
    assert!(err.is_redirect());
    assert_eq!(
        err.url().map(|u| u.as_str()),
        Some(format!("http://{}/loop", server.addr()).as_str())
    );
}
