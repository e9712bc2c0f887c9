use rstest::rstest;
use serde_json::{json, Value};
use topicwire::{normalize, parse_payload, NormalizedResponse};
use topicwire_error::FailureCategory;

/// Тест проверяет классификацию конвертов ответа разных сервисов.
#[rstest]
#[case(json!({"status": "success"}), true)]
#[case(json!({"status": true}), true)]
#[case(json!({"code": 200}), true)]
#[case(json!({"status_code": 200}), true)]
#[case(json!({"status": "error", "message": "x"}), false)]
#[case(json!({}), false)]
#[case(json!({"status": "success", "code": 500}), true)]
#[case(json!({"status": false, "status_code": 200}), true)]
fn test_classification(
    #[case] envelope: Value,
    #[case] success: bool,
) {
    assert_eq!(normalize(&envelope, None).is_success(), success, "{envelope}");
}

/// Тест проверяет сообщения неуспешных ответов.
#[test]
fn test_failure_messages() {
    assert_eq!(
        normalize(&json!({"status": "error", "message": "x"}), None),
        NormalizedResponse::Failure {
            code: None,
            message: "x".to_string(),
        }
    );
    assert_eq!(normalize(&json!({}), None).message(), Some("request failed"));
}

/// Тест проверяет разбор сырых ответов сервисов магазина и кошелька.
#[rstest]
#[case(
    br#"{"status":"success","data":{"products":[{"id":1},{"id":2}],"total":2}}"#.as_slice(),
    Some("products"),
    json!([{"id": 1}, {"id": 2}])
)]
#[case(
    br#"{"status":true,"data":[{"tx":"a"}]}"#.as_slice(),
    Some("transactions"),
    json!([{"tx": "a"}])
)]
#[case(
    br#"{"code":200,"data":{"email":"a@b.c","balance":"10.00"}}"#.as_slice(),
    None,
    json!({"email": "a@b.c", "balance": "10.00"})
)]
fn test_payload_to_data(
    #[case] payload: &[u8],
    #[case] wrapper: Option<&str>,
    #[case] expected: Value,
) {
    let value = parse_payload("r", payload).unwrap();
    let data = normalize(&value, wrapper).into_result().unwrap();
    assert_eq!(data, expected);
}

/// Тест проверяет категории отказов для интерфейса.
#[rstest]
#[case(400, FailureCategory::Rejected)]
#[case(404, FailureCategory::NotFound)]
#[case(422, FailureCategory::Invalid)]
#[case(500, FailureCategory::Other)]
fn test_failure_categories(
    #[case] code: i64,
    #[case] category: FailureCategory,
) {
    let resp = normalize(&json!({"code": code, "message": "no"}), None);
    assert_eq!(resp.failure_category(), Some(category));
}
