//! Telegram delivery against a mock Bot API.

use httpmock::Method::POST;
use httpmock::MockServer;
use intel_hub::entity::Notification;
use intel_hub::messenger::DeliveryError;
use intel_hub::messenger::Messenger;
use intel_hub::messenger::TelegramMessenger;
use serde_json::json;

const TOKEN: &str = "123456:TEST";
const OK: &str = r#"{"ok":true,"result":{"message_id":1}}"#;

fn text_only() -> Notification {
    Notification {
        text: "<b>Rust 1.78.0</b> is out".to_string(),
        photo_url: None,
        link_url: Some("https://blog.rust-lang.org/".to_string()),
    }
}

#[tokio::test]
async fn test_send_message_uses_html_and_button() {
    let server = MockServer::start();
    let messenger = TelegramMessenger::new(server.url(""), TOKEN);

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path(format!("/bot{TOKEN}/sendMessage"))
            .json_body_partial(
                json!({
                    "chat_id": 42,
                    "text": "<b>Rust 1.78.0</b> is out",
                    "parse_mode": "HTML",
                    "link_preview_options": { "is_disabled": true },
                })
                .to_string(),
            )
            .body_contains(
                r#""inline_keyboard":[[{"text":"Open","url":"https://blog.rust-lang.org/"}]]"#,
            );
        then.status(200)
            .header("content-type", "application/json")
            .body(OK);
    });

    messenger.deliver(42, &text_only()).await.unwrap();
    mock.assert();
}

#[tokio::test]
async fn test_photo_notification_uses_send_photo() {
    let server = MockServer::start();
    let messenger = TelegramMessenger::new(server.url(""), TOKEN);
    let notification = Notification {
        photo_url: Some("https://i.ytimg.com/vi/abc/hqdefault.jpg".to_string()),
        ..text_only()
    };

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path(format!("/bot{TOKEN}/sendPhoto"))
            .json_body_partial(
                json!({
                    "chat_id": 7,
                    "photo": "https://i.ytimg.com/vi/abc/hqdefault.jpg",
                    "caption": "<b>Rust 1.78.0</b> is out",
                })
                .to_string(),
            );
        then.status(200)
            .header("content-type", "application/json")
            .body(OK);
    });

    messenger.deliver(7, &notification).await.unwrap();
    mock.assert();
}

#[tokio::test]
async fn test_rejected_photo_falls_back_to_text() {
    let server = MockServer::start();
    let messenger = TelegramMessenger::new(server.url(""), TOKEN);
    let notification = Notification {
        photo_url: Some("https://example.com/broken.jpg".to_string()),
        ..text_only()
    };

    let photo = server.mock(|when, then| {
        when.method(POST).path(format!("/bot{TOKEN}/sendPhoto"));
        then.status(400)
            .header("content-type", "application/json")
            .body(r#"{"ok":false,"error_code":400,"description":"Bad Request: wrong file identifier/HTTP URL specified"}"#);
    });
    let text = server.mock(|when, then| {
        when.method(POST).path(format!("/bot{TOKEN}/sendMessage"));
        then.status(200)
            .header("content-type", "application/json")
            .body(OK);
    });

    messenger.deliver(7, &notification).await.unwrap();
    photo.assert();
    text.assert();
}

#[tokio::test]
async fn test_blocked_user_is_rejected() {
    let server = MockServer::start();
    let messenger = TelegramMessenger::new(server.url(""), TOKEN);

    server.mock(|when, then| {
        when.method(POST).path(format!("/bot{TOKEN}/sendMessage"));
        then.status(403)
            .header("content-type", "application/json")
            .body(r#"{"ok":false,"error_code":403,"description":"Forbidden: bot was blocked by the user"}"#);
    });

    let result = messenger.deliver(9, &text_only()).await;
    match result {
        Err(DeliveryError::Rejected {
            recipient,
            description,
        }) => {
            assert_eq!(recipient, 9);
            assert_eq!(description, "Forbidden: bot was blocked by the user");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_non_json_error_reports_status() {
    let server = MockServer::start();
    let messenger = TelegramMessenger::new(server.url(""), TOKEN);

    server.mock(|when, then| {
        when.method(POST).path(format!("/bot{TOKEN}/sendMessage"));
        then.status(502).body("Bad Gateway");
    });

    let result = messenger.deliver(9, &text_only()).await;
    assert!(matches!(
        result,
        Err(DeliveryError::HttpStatus {
            status: 502,
            recipient: 9
        })
    ));
}
