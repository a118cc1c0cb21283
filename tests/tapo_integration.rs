// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the Tapo session and backend using wiremock.

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use plugwatch::config::TapoCredentials;
use plugwatch::{Error, ProtocolError, TapoBackend, TapoSession};
use plugwatch::backend::PlugBackend;

const SESSION_COOKIE: &str = "TP_SESSIONID=ABC123;TIMEOUT=1440";

fn credentials() -> TapoCredentials {
    TapoCredentials::new("user@example.com", "secret")
}

/// Mounts a handshake responder expecting `expected_calls` handshakes.
async fn mount_handshake(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/app"))
        .and(body_partial_json(json!({ "method": "handshake" })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", SESSION_COOKIE)
                .set_body_json(json!({ "error_code": 0, "result": {} })),
        )
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Mounts a login responder expecting `expected_calls` logins.
async fn mount_login(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/app"))
        .and(body_partial_json(json!({ "method": "login_device" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error_code": 0,
            "result": { "token": "tok-1" }
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

// ============================================================================
// TapoSession Tests
// ============================================================================

mod session {
    use super::*;

    #[tokio::test]
    async fn handshake_login_and_query() {
        let server = MockServer::start().await;
        mount_handshake(&server, 1).await;
        mount_login(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/app"))
            .and(query_param("token", "tok-1"))
            .and(body_partial_json(json!({ "method": "get_device_info" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error_code": 0,
                "result": { "device_on": true }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = TapoSession::new(
            server.address().to_string(),
            "user@example.com",
            "secret",
        )
        .unwrap();

        session.handshake().await.unwrap();
        assert!(session.has_session());
        session.login().await.unwrap();

        assert!(session.device_on().await.unwrap());
    }

    #[tokio::test]
    async fn energy_usage_reports_milliwatts() {
        let server = MockServer::start().await;
        mount_handshake(&server, 1).await;
        mount_login(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/app"))
            .and(body_partial_json(json!({ "method": "get_energy_usage" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error_code": 0,
                "result": { "current_power": 2450 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = TapoSession::new(
            server.address().to_string(),
            "user@example.com",
            "secret",
        )
        .unwrap();
        session.handshake().await.unwrap();
        session.login().await.unwrap();

        let usage = session.energy_usage().await.unwrap();
        assert_eq!(usage.current_power, 2450);
    }

    #[tokio::test]
    async fn set_device_on_sends_command_params() {
        let server = MockServer::start().await;
        mount_handshake(&server, 1).await;
        mount_login(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/app"))
            .and(body_partial_json(json!({
                "method": "set_device_info",
                "params": { "device_on": false }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "error_code": 0 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut session = TapoSession::new(
            server.address().to_string(),
            "user@example.com",
            "secret",
        )
        .unwrap();
        session.handshake().await.unwrap();
        session.login().await.unwrap();

        session.set_device_on(false).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_credentials_fail_login() {
        let server = MockServer::start().await;
        mount_handshake(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/app"))
            .and(body_partial_json(json!({ "method": "login_device" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "error_code": -1501 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut session = TapoSession::new(
            server.address().to_string(),
            "user@example.com",
            "wrong",
        )
        .unwrap();
        session.handshake().await.unwrap();

        assert!(matches!(
            session.login().await.unwrap_err(),
            Error::Protocol(ProtocolError::AuthenticationFailed)
        ));
    }
}

// ============================================================================
// TapoBackend Retry Tests
// ============================================================================

mod backend_retry {
    use super::*;

    #[tokio::test]
    async fn first_operation_authenticates_lazily() {
        let server = MockServer::start().await;
        mount_handshake(&server, 1).await;
        mount_login(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/app"))
            .and(body_partial_json(json!({ "method": "get_device_info" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error_code": 0,
                "result": { "device_on": true }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend =
            TapoBackend::new(&server.address().to_string(), &credentials()).unwrap();

        // The fresh session has no token; the first attempt fails locally
        // and the retry path performs exactly one handshake+login pair.
        assert!(backend.status().await.unwrap());
    }

    #[tokio::test]
    async fn expired_session_is_recovered_with_one_retry() {
        let server = MockServer::start().await;
        // Bootstrap plus one recovery.
        mount_handshake(&server, 2).await;
        mount_login(&server, 2).await;

        Mock::given(method("POST"))
            .and(path("/app"))
            .and(body_partial_json(json!({ "method": "get_device_info" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error_code": 0,
                "result": { "device_on": true }
            })))
            .expect(1)
            .mount(&server)
            .await;

        // The device reports an expired session once, then recovers.
        Mock::given(method("POST"))
            .and(path("/app"))
            .and(body_partial_json(json!({ "method": "get_energy_usage" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "error_code": 9999 })),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/app"))
            .and(body_partial_json(json!({ "method": "get_energy_usage" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error_code": 0,
                "result": { "current_power": 2450 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend =
            TapoBackend::new(&server.address().to_string(), &credentials()).unwrap();

        // Establish the session.
        assert!(backend.status().await.unwrap());

        // Expiry on the first attempt, recovered by the single retry.
        let watts = backend.power().await.unwrap();
        assert!((watts - 2.45).abs() < 1e-9);
    }

    #[tokio::test]
    async fn second_failure_propagates_without_further_attempts() {
        let server = MockServer::start().await;
        // Bootstrap plus the one recovery attempt.
        mount_handshake(&server, 2).await;
        mount_login(&server, 2).await;

        Mock::given(method("POST"))
            .and(path("/app"))
            .and(body_partial_json(json!({ "method": "get_device_info" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error_code": 0,
                "result": { "device_on": true }
            })))
            .expect(1)
            .mount(&server)
            .await;

        // Both the attempt and its single retry report expiry.
        Mock::given(method("POST"))
            .and(path("/app"))
            .and(body_partial_json(json!({ "method": "get_energy_usage" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "error_code": 9999 })),
            )
            .expect(2)
            .mount(&server)
            .await;

        let backend =
            TapoBackend::new(&server.address().to_string(), &credentials()).unwrap();

        assert!(backend.status().await.unwrap());

        assert!(matches!(
            backend.power().await.unwrap_err(),
            Error::Protocol(ProtocolError::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn switch_off_round_trips() {
        let server = MockServer::start().await;
        mount_handshake(&server, 1).await;
        mount_login(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/app"))
            .and(body_partial_json(json!({
                "method": "set_device_info",
                "params": { "device_on": false }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "error_code": 0 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend =
            TapoBackend::new(&server.address().to_string(), &credentials()).unwrap();

        backend.set_status(false).await.unwrap();
    }
}
