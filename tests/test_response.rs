use conduit::http::response::{Response, ResponseBuilder, StatusCode};

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::NoContent.as_u16(), 204);
    assert_eq!(StatusCode::NotFound.as_u16(), 404);
    assert_eq!(StatusCode::ServiceUnavailable.as_u16(), 503);
    assert_eq!(StatusCode::ConnectorCommunicationError.as_u16(), 1001);
    assert_eq!(StatusCode::Other(418).as_u16(), 418);
}

#[test]
fn test_status_code_from_u16() {
    assert_eq!(StatusCode::from_u16(200), StatusCode::Ok);
    assert_eq!(StatusCode::from_u16(1001), StatusCode::ConnectorCommunicationError);
    assert_eq!(StatusCode::from_u16(299), StatusCode::Other(299));
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(
        StatusCode::InternalServerError.reason_phrase(),
        "Internal Server Error"
    );
    assert_eq!(
        StatusCode::ConnectorCommunicationError.reason_phrase(),
        "Communication Error"
    );
}

#[test]
fn test_status_codes_without_body() {
    assert!(StatusCode::NoContent.forbids_body());
    assert!(StatusCode::NotModified.forbids_body());
    assert!(StatusCode::Other(101).forbids_body());
    assert!(!StatusCode::Ok.forbids_body());
}

#[test]
fn test_response_builder_with_headers() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .header("X-Custom", "value")
        .body("test")
        .build();

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert_eq!(response.header("X-Custom"), Some("value"));
}

#[test]
fn test_response_builder_auto_content_length() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .body("This is the body")
        .build();

    assert_eq!(response.header("Content-Length"), Some("16"));
}

#[test]
fn test_response_builder_preserves_custom_content_length() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("content-length", "999")
        .body("test")
        .build();

    // Should keep the custom value, whatever its case
    assert_eq!(response.headers.len(), 1);
    assert_eq!(response.header("Content-Length"), Some("999"));
}

#[test]
fn test_response_builder_empty_body() {
    let response = ResponseBuilder::new(StatusCode::NoContent).build();

    assert!(response.body.is_empty());
    assert_eq!(response.header("Content-Length"), Some("0"));
}

#[test]
fn test_response_helpers() {
    assert_eq!(&Response::ok("hi").body[..], b"hi");
    assert_eq!(Response::not_found().status, StatusCode::NotFound);
    assert_eq!(Response::internal_error().status, StatusCode::InternalServerError);

    let failed = Response::communication_error("Broken pipe");
    assert_eq!(failed.status, StatusCode::ConnectorCommunicationError);
    assert_eq!(&failed.body[..], b"Broken pipe");
}
