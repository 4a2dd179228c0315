//! Logout propagation tests

#[cfg(test)]
mod tests {
    use crate::logout::common::*;
    use std::sync::Arc;
    use xavyo_saml_slo::services::binding::{
        decode_redirect, encode_redirect, Binding, EncodedMessage, MessageKind, OutboundMessage,
        SignatureCheck,
    };
    use xavyo_saml_slo::services::status::{
        STATUS_PARTIAL_LOGOUT, STATUS_REQUESTER, STATUS_SUCCESS,
    };
    use xavyo_saml_slo::{LogoutAction, LogoutStatus, SloError};

    fn sp(name: &str) -> TestServiceProvider {
        TestServiceProvider::new(
            &format!("https://{name}.example.com"),
            &format!("https://{name}.example.com/logout"),
        )
    }

    /// Let `sp` answer a dispatched LogoutRequest and feed the answer back.
    async fn answer(
        harness: &Harness,
        sp: &TestServiceProvider,
        dispatched: &OutboundMessage,
        status_code: &str,
    ) -> LogoutAction {
        let request = parse_request(dispatched);
        let reply = sp.logout_response(
            &request.id,
            status_code,
            dispatched.binding,
            dispatched.relay_state.as_deref(),
        );
        harness
            .orchestrator
            .handle(None, deliver(&reply))
            .await
            .unwrap()
    }

    fn location(message: &OutboundMessage) -> &str {
        match &message.encoded {
            EncodedMessage::Redirect { location } => location,
            EncodedMessage::Post { .. } => panic!("expected a Redirect-binding message"),
        }
    }

    // ============================================================
    // SP-initiated logout
    // ============================================================

    #[tokio::test]
    async fn test_initiator_is_only_participant() {
        let harness = Harness::new(default_config()).await;
        let sp_a = sp("sp-a");
        harness.join(&sp_a).await;

        let request = sp_a.logout_request(TEST_USER, Binding::Redirect, Some("123"));
        let request_id = parse_request(&request).id;

        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await
            .unwrap();
        let response = expect_send_response(action);

        assert!(location(&response).starts_with("https://sp-a.example.com/logout?SAMLResponse="));
        let parsed = parse_response(&response);
        assert_eq!(parsed.in_response_to.as_deref(), Some(request_id.as_str()));
        assert_eq!(parsed.issuer.as_deref(), Some(IDP_ISSUER));
        assert_eq!(parsed.status_code, STATUS_SUCCESS);

        let received = deliver(&response);
        assert_eq!(received.relay_state.as_deref(), Some("123"));
        assert_eq!(
            received.check_signature(&harness.idp_certificate_pem).unwrap(),
            SignatureCheck::Verified
        );

        assert!(harness.active_participants().await.is_empty());
        assert!(!harness.idp_sessions.is_active(&harness.principal).await);
        assert!(harness.flows.is_empty().await);
    }

    #[tokio::test]
    async fn test_one_other_participant_success() {
        let harness = Harness::new(default_config()).await;
        let (sp_a, sp_b) = (sp("sp-a"), sp("sp-b"));
        harness.join(&sp_a).await;
        harness.join(&sp_b).await;

        let request = sp_a.logout_request(TEST_USER, Binding::Redirect, None);
        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await
            .unwrap();
        let dispatched = expect_send_request(action);

        assert!(location(&dispatched).starts_with("https://sp-b.example.com/logout?SAMLRequest="));
        let to_b = parse_request(&dispatched);
        assert_eq!(to_b.issuer.as_deref(), Some(IDP_ISSUER));
        assert_eq!(to_b.name_id.as_deref(), Some(TEST_USER));
        assert_eq!(to_b.session_indexes, vec!["_session_1".to_string()]);
        assert_eq!(
            to_b.consent.as_deref(),
            Some("urn:oasis:names:tc:SAML:2.0:consent:unspecified")
        );
        assert_eq!(
            deliver(&dispatched)
                .check_signature(&harness.idp_certificate_pem)
                .unwrap(),
            SignatureCheck::Verified
        );
        assert_eq!(harness.flows.len().await, 1);
        assert!(harness.idp_sessions.is_active(&harness.principal).await);

        let action = answer(&harness, &sp_b, &dispatched, STATUS_SUCCESS).await;
        let response = expect_send_response(action);
        assert!(location(&response).starts_with("https://sp-a.example.com/logout?"));
        assert_eq!(parse_response(&response).status_code, STATUS_SUCCESS);

        assert!(harness.active_participants().await.is_empty());
        assert!(harness.flows.is_empty().await);
        assert!(!harness.idp_sessions.is_active(&harness.principal).await);
    }

    #[tokio::test]
    async fn test_two_participants_both_succeed() {
        let harness = Harness::new(default_config()).await;
        let (sp_a, sp_b, sp_c) = (sp("sp-a"), sp("sp-b"), sp("sp-c"));
        for provider in [&sp_a, &sp_b, &sp_c] {
            harness.join(provider).await;
        }

        let request = sp_a.logout_request(TEST_USER, Binding::Redirect, None);
        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await
            .unwrap();

        let to_b = expect_send_request(action);
        let action = answer(&harness, &sp_b, &to_b, STATUS_SUCCESS).await;
        let to_c = expect_send_request(action);
        assert!(location(&to_c).starts_with("https://sp-c.example.com/logout?"));
        let action = answer(&harness, &sp_c, &to_c, STATUS_SUCCESS).await;

        let response = expect_send_response(action);
        assert_eq!(parse_response(&response).status_code, STATUS_SUCCESS);
    }

    #[tokio::test]
    async fn test_participant_requester_status_yields_partial_logout() {
        let harness = Harness::new(default_config()).await;
        let (sp_a, sp_b, sp_c) = (sp("sp-a"), sp("sp-b"), sp("sp-c"));
        for provider in [&sp_a, &sp_b, &sp_c] {
            harness.join(provider).await;
        }

        let request = sp_a.logout_request(TEST_USER, Binding::Redirect, None);
        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await
            .unwrap();

        let to_b = expect_send_request(action);
        let action = answer(&harness, &sp_b, &to_b, STATUS_REQUESTER).await;
        // A failed participant does not stop propagation
        let to_c = expect_send_request(action);
        let action = answer(&harness, &sp_c, &to_c, STATUS_SUCCESS).await;

        let response = expect_send_response(action);
        assert_eq!(parse_response(&response).status_code, STATUS_PARTIAL_LOGOUT);
        assert!(harness.active_participants().await.is_empty());
    }

    #[tokio::test]
    async fn test_one_request_per_remaining_participant() {
        let harness = Harness::new(default_config()).await;
        let initiator = sp("sp-0");
        harness.join(&initiator).await;
        let others: Vec<_> = (1..=4).map(|i| sp(&format!("sp-{i}"))).collect();
        for provider in &others {
            harness.join(provider).await;
        }

        let request = initiator.logout_request(TEST_USER, Binding::Redirect, None);
        let mut action = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await
            .unwrap();

        let mut destinations = Vec::new();
        while let LogoutAction::SendRequest(dispatched) = action {
            destinations.push(dispatched.destination.clone());
            let target = others
                .iter()
                .find(|p| p.logout_url == dispatched.destination)
                .unwrap();
            action = answer(&harness, target, &dispatched, STATUS_SUCCESS).await;
        }

        let expected: Vec<_> = others.iter().map(|p| p.logout_url.clone()).collect();
        assert_eq!(destinations, expected);
        assert!(matches!(action, LogoutAction::SendResponse(_)));
    }

    #[tokio::test]
    async fn test_idp_session_cleanup_failure_yields_partial_logout() {
        let harness = Harness::with_idp_handler(
            default_config(),
            Arc::new(FailingIdpSessionHandler::default()),
        )
        .await;
        let (sp_a, sp_b) = (sp("sp-a"), sp("sp-b"));
        harness.join(&sp_a).await;
        harness.join(&sp_b).await;

        let request = sp_a.logout_request(TEST_USER, Binding::Redirect, None);
        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await
            .unwrap();
        let to_b = expect_send_request(action);
        let action = answer(&harness, &sp_b, &to_b, STATUS_SUCCESS).await;

        let response = expect_send_response(action);
        assert_eq!(parse_response(&response).status_code, STATUS_PARTIAL_LOGOUT);
    }

    #[tokio::test]
    async fn test_non_url_issuer_routes_to_registered_logout_url() {
        let harness = Harness::new(default_config()).await;
        let initiator = TestServiceProvider::new("an-issuer", "https://example.com/logout");
        harness.join(&initiator).await;

        let request = initiator.logout_request(TEST_USER, Binding::Redirect, Some("123"));
        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await
            .unwrap();
        let response = expect_send_response(action);

        assert_eq!(response.destination, "https://example.com/logout");
        assert!(location(&response).starts_with("https://example.com/logout?SAMLResponse="));
        assert!(location(&response).contains("&RelayState=123&"));
        assert_eq!(deliver(&response).relay_state.as_deref(), Some("123"));
    }

    #[tokio::test]
    async fn test_post_binding_end_to_end() {
        let harness = Harness::new(default_config()).await;
        let (sp_a, sp_b) = (sp("sp-a"), sp("sp-b"));
        harness.join(&sp_a).await;
        harness.join(&sp_b).await;

        let request = sp_a.logout_request(TEST_USER, Binding::Post, Some("state-xyz"));
        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await
            .unwrap();

        let to_b = expect_send_request(action);
        assert_eq!(to_b.binding, Binding::Post);
        assert_eq!(to_b.relay_state.as_deref(), Some("state-xyz"));
        assert_eq!(
            deliver(&to_b)
                .check_signature(&harness.idp_certificate_pem)
                .unwrap(),
            SignatureCheck::Verified
        );

        let action = answer(&harness, &sp_b, &to_b, STATUS_SUCCESS).await;
        let response = expect_send_response(action);
        assert_eq!(response.binding, Binding::Post);
        assert_eq!(response.destination, "https://sp-a.example.com/logout");
        assert_eq!(response.relay_state.as_deref(), Some("state-xyz"));
        assert!(matches!(response.encoded, EncodedMessage::Post { .. }));
        assert_eq!(parse_response(&response).status_code, STATUS_SUCCESS);
        assert_eq!(
            deliver(&response)
                .check_signature(&harness.idp_certificate_pem)
                .unwrap(),
            SignatureCheck::Verified
        );
    }

    #[tokio::test]
    async fn test_unreachable_participant_is_skipped() {
        let harness = Harness::new(default_config()).await;
        let sp_a = sp("sp-a");
        let broken = TestServiceProvider::new("urn:sp:broken", "not-a-url");
        let sp_c = sp("sp-c");
        for provider in [&sp_a, &broken, &sp_c] {
            harness.join(provider).await;
        }

        let request = sp_a.logout_request(TEST_USER, Binding::Redirect, None);
        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await
            .unwrap();

        let to_c = expect_send_request(action);
        assert_eq!(to_c.destination, "https://sp-c.example.com/logout");
        let action = answer(&harness, &sp_c, &to_c, STATUS_SUCCESS).await;

        let response = expect_send_response(action);
        assert_eq!(parse_response(&response).status_code, STATUS_PARTIAL_LOGOUT);
    }

    // ============================================================
    // Correlation and replay
    // ============================================================

    #[tokio::test]
    async fn test_participant_response_consumed_once() {
        let harness = Harness::new(default_config()).await;
        let (sp_a, sp_b) = (sp("sp-a"), sp("sp-b"));
        harness.join(&sp_a).await;
        harness.join(&sp_b).await;

        let request = sp_a.logout_request(TEST_USER, Binding::Redirect, None);
        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await
            .unwrap();
        let to_b = expect_send_request(action);
        let reply = sp_b.logout_response(
            &parse_request(&to_b).id,
            STATUS_SUCCESS,
            Binding::Redirect,
            None,
        );

        let first = harness.orchestrator.handle(None, deliver(&reply)).await;
        assert!(matches!(first, Ok(LogoutAction::SendResponse(_))));

        let replay = harness.orchestrator.handle(None, deliver(&reply)).await;
        assert!(matches!(replay, Err(SloError::UnknownLogoutFlow(_))));
    }

    #[tokio::test]
    async fn test_response_to_unknown_request_rejected() {
        let harness = Harness::new(default_config()).await;
        let sp_b = sp("sp-b");
        harness.join(&sp_b).await;

        let reply =
            sp_b.logout_response("_lr_never_sent", STATUS_SUCCESS, Binding::Redirect, None);
        let result = harness.orchestrator.handle(None, deliver(&reply)).await;

        assert!(matches!(result, Err(SloError::UnknownLogoutFlow(_))));
        assert_eq!(harness.active_participants().await.len(), 1);
    }

    #[tokio::test]
    async fn test_response_to_initiator_id_is_unknown_flow() {
        let harness = Harness::new(default_config()).await;
        let (sp_a, sp_b) = (sp("sp-a"), sp("sp-b"));
        harness.join(&sp_a).await;
        harness.join(&sp_b).await;

        let request = sp_a.logout_request(TEST_USER, Binding::Redirect, None);
        let initiator_id = parse_request(&request).id;
        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await
            .unwrap();
        let to_b = expect_send_request(action);
        assert_ne!(parse_request(&to_b).id, initiator_id);

        let reply = sp_b.logout_response(&initiator_id, STATUS_SUCCESS, Binding::Redirect, None);
        let result = harness.orchestrator.handle(None, deliver(&reply)).await;
        assert!(matches!(result, Err(SloError::UnknownLogoutFlow(_))));
        assert_eq!(harness.flows.len().await, 1);

        let action = answer(&harness, &sp_b, &to_b, STATUS_SUCCESS).await;
        assert_eq!(
            parse_response(&expect_send_response(action)).status_code,
            STATUS_SUCCESS
        );
    }

    #[tokio::test]
    async fn test_response_from_other_issuer_counts_as_failure() {
        let harness = Harness::new(default_config()).await;
        let (sp_a, sp_b) = (sp("sp-a"), sp("sp-b"));
        harness.join(&sp_a).await;
        harness.join(&sp_b).await;
        let intruder = sp("sp-x");

        let request = sp_a.logout_request(TEST_USER, Binding::Redirect, None);
        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await
            .unwrap();
        let to_b = expect_send_request(action);

        let action = answer(&harness, &intruder, &to_b, STATUS_SUCCESS).await;
        let response = expect_send_response(action);
        assert_eq!(parse_response(&response).status_code, STATUS_PARTIAL_LOGOUT);
    }

    #[tokio::test]
    async fn test_request_from_unknown_sp_rejected() {
        let harness = Harness::new(default_config()).await;
        harness.join(&sp("sp-a")).await;
        let stranger = sp("sp-x");

        let request = stranger.logout_request(TEST_USER, Binding::Redirect, None);
        let result = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await;

        assert!(matches!(result, Err(SloError::UnknownServiceProvider(_))));
        assert_eq!(harness.active_participants().await.len(), 1);
        assert!(harness.idp_sessions.is_active(&harness.principal).await);
    }

    #[tokio::test]
    async fn test_request_without_principal_rejected() {
        let harness = Harness::new(default_config()).await;
        let sp_a = sp("sp-a");
        harness.join(&sp_a).await;

        let request = sp_a.logout_request(TEST_USER, Binding::Redirect, None);
        let result = harness.orchestrator.handle(None, deliver(&request)).await;

        assert!(matches!(result, Err(SloError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_failed_dispatch_keeps_participant() {
        let (harness, flaky) = Harness::with_flaky_flows(default_config()).await;
        let sp_b = sp("sp-b");
        harness.join(&sp_b).await;

        flaky.fail_next_stores(1);
        let result = harness
            .orchestrator
            .initiate_idp_logout(&harness.principal, Binding::Redirect, None)
            .await;

        assert!(matches!(result, Err(SloError::SessionError(_))));
        assert_eq!(harness.active_participants().await, vec![sp_b.entity_id.clone()]);
        assert!(harness.idp_sessions.is_active(&harness.principal).await);

        // The retry reaches the participant
        let action = harness
            .orchestrator
            .initiate_idp_logout(&harness.principal, Binding::Redirect, None)
            .await
            .unwrap();
        assert_eq!(expect_send_request(action).destination, sp_b.logout_url);
    }

    #[tokio::test]
    async fn test_failed_hop_restores_consumed_flow() {
        let (harness, flaky) = Harness::with_flaky_flows(default_config()).await;
        let (sp_a, sp_b, sp_c) = (sp("sp-a"), sp("sp-b"), sp("sp-c"));
        for provider in [&sp_a, &sp_b, &sp_c] {
            harness.join(provider).await;
        }

        let request = sp_a.logout_request(TEST_USER, Binding::Redirect, None);
        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await
            .unwrap();
        let to_b = expect_send_request(action);
        let reply = sp_b.logout_response(
            &parse_request(&to_b).id,
            STATUS_SUCCESS,
            Binding::Redirect,
            None,
        );

        // Recording the flow for sp-c fails once
        flaky.fail_next_stores(1);
        let result = harness.orchestrator.handle(None, deliver(&reply)).await;
        assert!(matches!(result, Err(SloError::SessionError(_))));
        assert_eq!(harness.active_participants().await, vec![sp_c.entity_id.clone()]);
        assert_eq!(harness.flows.len().await, 1);

        // Redelivering sp-b's response resumes the flow
        let action = harness
            .orchestrator
            .handle(None, deliver(&reply))
            .await
            .unwrap();
        let to_c = expect_send_request(action);
        assert_eq!(to_c.destination, sp_c.logout_url);
        let action = answer(&harness, &sp_c, &to_c, STATUS_SUCCESS).await;
        assert_eq!(
            parse_response(&expect_send_response(action)).status_code,
            STATUS_SUCCESS
        );
    }

    // ============================================================
    // Signature policy
    // ============================================================

    #[tokio::test]
    async fn test_unsigned_request_rejected_when_signatures_required() {
        let harness = Harness::new(default_config()).await;
        let sp_a = sp("sp-a");
        harness.join(&sp_a).await;

        // Redirect-binding XML carries no signature of its own
        let signed = sp_a.logout_request(TEST_USER, Binding::Redirect, Some("rs"));
        let query = encode_redirect(MessageKind::Request, &signed.xml, Some("rs"), None).unwrap();

        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), decode_redirect(&query).unwrap())
            .await
            .unwrap();
        let response = expect_send_response(action);

        let parsed = parse_response(&response);
        assert_eq!(parsed.status_code, STATUS_REQUESTER);
        assert_eq!(
            parsed.in_response_to.as_deref(),
            Some(parse_request(&signed).id.as_str())
        );
        assert_eq!(response.relay_state.as_deref(), Some("rs"));
        assert_eq!(harness.active_participants().await, vec![sp_a.entity_id.clone()]);
        assert!(harness.idp_sessions.is_active(&harness.principal).await);
    }

    #[tokio::test]
    async fn test_unsigned_request_accepted_when_signatures_optional() {
        let harness = Harness::new(default_config().with_require_signed_messages(false)).await;
        let sp_a = sp("sp-a");
        harness.join(&sp_a).await;

        let signed = sp_a.logout_request(TEST_USER, Binding::Redirect, None);
        let query = encode_redirect(MessageKind::Request, &signed.xml, None, None).unwrap();

        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), decode_redirect(&query).unwrap())
            .await
            .unwrap();

        assert_eq!(
            parse_response(&expect_send_response(action)).status_code,
            STATUS_SUCCESS
        );
        assert!(harness.active_participants().await.is_empty());
    }

    #[tokio::test]
    async fn test_request_signed_by_other_key_rejected() {
        let harness = Harness::new(default_config()).await;
        let sp_a = sp("sp-a");
        harness.join(&sp_a).await;
        // Same entity ID, different key pair
        let impostor = sp("sp-a");

        let request = impostor.logout_request(TEST_USER, Binding::Post, None);
        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await
            .unwrap();

        let response = expect_send_response(action);
        assert_eq!(parse_response(&response).status_code, STATUS_REQUESTER);
        assert_eq!(harness.active_participants().await.len(), 1);
    }

    #[tokio::test]
    async fn test_participant_response_signed_by_other_key_counts_as_failure() {
        let harness = Harness::new(default_config()).await;
        let (sp_a, sp_b) = (sp("sp-a"), sp("sp-b"));
        harness.join(&sp_a).await;
        harness.join(&sp_b).await;
        let impostor = sp("sp-b");

        let request = sp_a.logout_request(TEST_USER, Binding::Redirect, None);
        let action = harness
            .orchestrator
            .handle(Some(&harness.principal), deliver(&request))
            .await
            .unwrap();
        let to_b = expect_send_request(action);

        let action = answer(&harness, &impostor, &to_b, STATUS_SUCCESS).await;
        let response = expect_send_response(action);
        assert_eq!(parse_response(&response).status_code, STATUS_PARTIAL_LOGOUT);
    }

    // ============================================================
    // IdP-initiated logout
    // ============================================================

    #[tokio::test]
    async fn test_idp_initiated_logout_without_participants() {
        let harness = Harness::new(default_config()).await;

        let action = harness
            .orchestrator
            .initiate_idp_logout(&harness.principal, Binding::Redirect, None)
            .await
            .unwrap();

        match action {
            LogoutAction::Completed {
                status,
                relay_state,
            } => {
                assert_eq!(status, LogoutStatus::Success);
                assert!(relay_state.is_none());
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert!(!harness.idp_sessions.is_active(&harness.principal).await);
    }

    #[tokio::test]
    async fn test_idp_initiated_logout_visits_every_participant() {
        let harness = Harness::new(default_config()).await;
        let (sp_a, sp_b) = (sp("sp-a"), sp("sp-b"));
        harness.join(&sp_a).await;
        harness.join(&sp_b).await;

        let action = harness
            .orchestrator
            .initiate_idp_logout(&harness.principal, Binding::Post, Some("home".to_string()))
            .await
            .unwrap();
        let to_a = expect_send_request(action);
        assert_eq!(to_a.destination, sp_a.logout_url);
        assert_eq!(to_a.relay_state.as_deref(), Some("home"));

        let action = answer(&harness, &sp_a, &to_a, STATUS_SUCCESS).await;
        let to_b = expect_send_request(action);
        assert_eq!(to_b.destination, sp_b.logout_url);

        let action = answer(&harness, &sp_b, &to_b, STATUS_REQUESTER).await;
        match action {
            LogoutAction::Completed {
                status,
                relay_state,
            } => {
                assert_eq!(status, LogoutStatus::PartialLogout);
                assert_eq!(relay_state.as_deref(), Some("home"));
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert!(harness.active_participants().await.is_empty());
        assert!(harness.flows.is_empty().await);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_live_flows() {
        let harness = Harness::new(default_config()).await;
        harness.join(&sp("sp-a")).await;

        let action = harness
            .orchestrator
            .initiate_idp_logout(&harness.principal, Binding::Redirect, None)
            .await
            .unwrap();
        assert!(matches!(action, LogoutAction::SendRequest(_)));

        assert_eq!(harness.orchestrator.cleanup_expired_flows().await.unwrap(), 0);
        assert_eq!(harness.flows.len().await, 1);
    }
}
