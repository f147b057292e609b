//! Tests for HTTP error mapping.

use super::*;
use crate::domain::Error;
use actix_web::ResponseError;
use actix_web::body::to_bytes;
use actix_web::http::StatusCode;
use rstest::{fixture, rstest};
use serde_json::json;

const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

#[fixture]
fn expected_trace_id() -> String {
    TRACE_ID.to_owned()
}

#[rstest]
#[case(Error::not_found("missing"), StatusCode::NOT_FOUND)]
#[case(Error::bad_request("bad"), StatusCode::BAD_REQUEST)]
#[case(Error::unprocessable_entity("invalid"), StatusCode::UNPROCESSABLE_ENTITY)]
#[case(Error::unauthorized("no auth"), StatusCode::UNAUTHORIZED)]
#[case(Error::forbidden("denied"), StatusCode::FORBIDDEN)]
#[case(Error::conflict("taken"), StatusCode::CONFLICT)]
#[case(Error::unsupported_media("xml"), StatusCode::UNSUPPORTED_MEDIA_TYPE)]
#[case(Error::too_many_requests("slow down"), StatusCode::TOO_MANY_REQUESTS)]
#[case(Error::upstream_timeout("read timeout"), StatusCode::BAD_GATEWAY)]
#[case(Error::upstream_unavailable("reset"), StatusCode::BAD_GATEWAY)]
#[case(Error::upstream_timeout_explicit("504 downstream"), StatusCode::GATEWAY_TIMEOUT)]
#[case(Error::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR)]
fn status_code_matches_error_kind(#[case] err: Error, #[case] status: StatusCode) {
    assert_eq!(classify(&err).status, status);
    assert_eq!(ResponseError::status_code(&err), status);
}

#[rstest]
#[case(Error::not_found("missing"), true)]
#[case(Error::forbidden("denied"), true)]
#[case(Error::unprocessable_entity("invalid"), true)]
#[case(Error::bad_request("bad"), false)]
#[case(Error::conflict("taken"), false)]
#[case(Error::upstream_unavailable("reset"), false)]
#[case(Error::internal("boom"), false)]
fn only_detail_carrying_kinds_have_bodies(#[case] err: Error, #[case] has_body: bool) {
    assert_eq!(classify(&err).body.is_some(), has_body);
}

#[rstest]
fn classification_is_deterministic(expected_trace_id: String) {
    let err = Error::unprocessable_entity("invalid booking")
        .with_details(json!({ "field": "start" }))
        .with_trace_id(expected_trace_id);
    assert_eq!(classify(&err), classify(&err.clone()));
}

async fn response_parts(error: &Error) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = ResponseError::error_response(error);
    let status = response.status();
    let header = response
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let bytes = to_bytes(response.into_body())
        .await
        .expect("reading response body succeeds");
    (status, header, bytes.to_vec())
}

#[rstest]
#[actix_web::test]
async fn bodies_carry_details_and_trace_id(expected_trace_id: String) {
    let error = Error::unprocessable_entity("invalid booking")
        .with_details(json!({ "field": "start" }))
        .with_trace_id(expected_trace_id.clone());

    let (status, header, bytes) = response_parts(&error).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(header.as_deref(), Some(expected_trace_id.as_str()));

    let body: ErrorBody = serde_json::from_slice(&bytes).expect("error body json");
    assert_eq!(body.code, ErrorKind::UnprocessableEntity);
    assert_eq!(body.message, "invalid booking");
    assert_eq!(body.details, Some(json!({ "field": "start" })));
    assert_eq!(body.trace_id, Some(expected_trace_id));
}

#[rstest]
#[actix_web::test]
async fn internal_errors_are_redacted(expected_trace_id: String) {
    let error = Error::internal("db password rejected")
        .with_details(json!({ "secret": "x" }))
        .with_trace_id(expected_trace_id.clone());

    let (status, header, bytes) = response_parts(&error).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(header.as_deref(), Some(expected_trace_id.as_str()));
    assert!(bytes.is_empty());
}

#[rstest]
#[actix_web::test]
async fn error_without_trace_id_omits_trace_header() {
    let (status, header, bytes) = response_parts(&Error::conflict("taken")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(header.is_none());
    assert!(bytes.is_empty());
}

#[test]
fn from_actix_error_is_redacted_internal_error() {
    use actix_web::error;

    let actix_err = error::ErrorBadRequest("boom");
    let err: Error = actix_err.into();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.message(), "Internal server error");
    assert_eq!(err.trace_id(), None);
    assert_eq!(err.details(), None);
}
