use bytes::Bytes;
use hyper::StatusCode;

use super::Response;


pub(crate) fn ok_empty() -> Response {
    Response::new(Bytes::new().into())
}

pub(crate) fn bad_request(msg: impl Into<Bytes>) -> Response {
    hyper::Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(msg.into().into())
        .unwrap()
}

pub(crate) fn forbidden() -> Response {
    hyper::Response::builder()
        .status(StatusCode::FORBIDDEN)
        .body("403 Forbidden".into())
        .unwrap()
}

pub(crate) fn not_found() -> Response {
    hyper::Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body("Not found".into())
        .unwrap()
}

pub(crate) fn internal_server_error() -> Response {
    hyper::Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body("Internal server error".into())
        .unwrap()
}

pub(crate) fn json(body: Vec<u8>) -> Response {
    hyper::Response::builder()
        .header("Content-Type", "application/json")
        .body(Bytes::from(body).into())
        .unwrap()
}

pub(crate) fn plain_text(body: String) -> Response {
    hyper::Response::builder()
        .header("Content-Type", "text/plain; charset=UTF-8")
        .body(Bytes::from(body).into())
        .unwrap()
}

pub(crate) fn html(body: String) -> Response {
    hyper::Response::builder()
        .header("Content-Type", "text/html; charset=UTF-8")
        .body(Bytes::from(body).into())
        .unwrap()
}
