use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use connector_client::{ClientConfig, ConnectionState, ConnectorClient, EnableOptions};
use connector_protocol::{
    codes, port_pair, AuthInfo, ChannelMessage, ConnectedReply, ConnectorError, PortEnd, Protocol,
    ReturnType, RpcRequest, RpcResponse, RpcReturn,
};
use serde_json::json;

const ORIGIN: &str = "https://dex.example";

async fn expect_rpc(service: &mut PortEnd) -> RpcRequest {
    match service.recv().await {
        Some(ChannelMessage::RpcRequest(req)) => req,
        other => panic!("expected rpc request, got {other:?}"),
    }
}

/// Accept the first connect request on the service end and return it.
async fn accept_connect(service: &mut PortEnd, auth: Option<AuthInfo>) -> Protocol {
    match service.recv().await {
        Some(ChannelMessage::ConnectRequest(req)) => {
            service
                .send(ChannelMessage::Connected(ConnectedReply::accepted(
                    req.protocol,
                    auth,
                )))
                .unwrap();
            req.protocol
        }
        other => panic!("expected connect request, got {other:?}"),
    }
}

#[tokio::test]
async fn test_enable_then_get_balance() -> anyhow::Result<()> {
    let (page, mut service) = port_pair();
    let client = ConnectorClient::new(page, ORIGIN, ClientConfig::default());

    let fake_service = tokio::spawn(async move {
        accept_connect(&mut service, None).await;
        let req = expect_rpc(&mut service).await;
        assert_eq!(req.uid, 0);
        assert_eq!(req.function, "get_balance");
        assert_eq!(req.params, json!(["*"]));
        assert_eq!(req.return_type, ReturnType::Cbor);
        service
            .send(ChannelMessage::RpcResponse(RpcResponse {
                uid: 0,
                result: RpcReturn::Ok(json!("500000")),
            }))
            .unwrap();
        service
    });

    let wallet = client.enable(Protocol::Cardano, EnableOptions::default()).await?;
    assert_eq!(
        client.connection_state(Protocol::Cardano),
        ConnectionState::Connected { auth: None }
    );
    let balance = wallet.get_balance("*").await?;
    assert_eq!(balance, json!("500000"));

    let _service = fake_service.await?;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_enables_send_one_request() -> anyhow::Result<()> {
    let (page, mut service) = port_pair();
    let client = Arc::new(ConnectorClient::new(page, ORIGIN, ClientConfig::default()));

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.enable(Protocol::Ergo, EnableOptions::default()).await })
    };
    let second = {
        let client = client.clone();
        tokio::spawn(async move { client.enable(Protocol::Ergo, EnableOptions::default()).await })
    };

    let protocol = match service.recv().await {
        Some(ChannelMessage::ConnectRequest(req)) => {
            assert_eq!(req.url, ORIGIN);
            req.protocol
        }
        other => panic!("expected connect request, got {other:?}"),
    };
    while client.connection_state(protocol) != ConnectionState::Requesting {
        tokio::task::yield_now().await;
    }
    // let the second enable join before answering
    tokio::task::yield_now().await;
    service.send(ChannelMessage::Connected(ConnectedReply::accepted(protocol, None)))?;

    assert!(first.await?.is_ok());
    assert!(second.await?.is_ok());
    assert!(service.rx.try_recv().is_err(), "no second connect request");
    Ok(())
}

#[tokio::test]
async fn test_auth_calls_refuse_without_identification() -> anyhow::Result<()> {
    let (page, mut service) = port_pair();
    let client = ConnectorClient::new(page, ORIGIN, ClientConfig::default());

    let fake_service = tokio::spawn(async move {
        accept_connect(&mut service, None).await;
        service
    });
    let wallet = client.enable(Protocol::Cardano, EnableOptions::default()).await?;
    let mut service = fake_service.await?;

    assert!(!wallet.auth().is_enabled());
    let err = wallet.auth().sign_hex_payload("deadbeef").await.unwrap_err();
    assert_eq!(err.code(), codes::API_REFUSED);
    assert!(service.rx.try_recv().is_err(), "guard must not reach the wire");
    Ok(())
}

#[tokio::test]
async fn test_auth_calls_pass_with_identification() -> anyhow::Result<()> {
    let (page, mut service) = port_pair();
    let client = ConnectorClient::new(page, ORIGIN, ClientConfig::default());

    let fake_service = tokio::spawn(async move {
        accept_connect(
            &mut service,
            Some(AuthInfo {
                wallet_pubkey: "ab".repeat(32),
            }),
        )
        .await;
        let req = expect_rpc(&mut service).await;
        assert_eq!(req.function, "auth_check_hex_payload");
        service
            .send(ChannelMessage::RpcResponse(RpcResponse {
                uid: req.uid,
                result: RpcReturn::Ok(json!(true)),
            }))
            .unwrap();
        service
    });

    let options = EnableOptions {
        request_identification: true,
        ..Default::default()
    };
    let wallet = client.enable(Protocol::Cardano, options).await?;
    assert_eq!(wallet.auth().wallet_pubkey(), Some("ab".repeat(32).as_str()));
    assert!(wallet.auth().check_hex_payload("00", "11").await?);
    fake_service.await?;
    Ok(())
}

#[tokio::test]
async fn test_return_type_is_snapshotted_per_call() -> anyhow::Result<()> {
    let (page, mut service) = port_pair();
    let client = Arc::new(ConnectorClient::new(page, ORIGIN, ClientConfig::default()));

    let enable = {
        let client = client.clone();
        tokio::spawn(async move { client.enable(Protocol::Cardano, EnableOptions::default()).await })
    };
    accept_connect(&mut service, None).await;
    let wallet = enable.await??;

    let first = {
        let wallet = wallet.clone();
        tokio::spawn(async move { wallet.get_change_address().await })
    };
    let cbor_req = expect_rpc(&mut service).await;
    client.set_return_type(ReturnType::Json);
    let second = {
        let wallet = wallet.clone();
        tokio::spawn(async move { wallet.get_change_address().await })
    };
    let json_req = expect_rpc(&mut service).await;

    assert_eq!(cbor_req.return_type, ReturnType::Cbor);
    assert_eq!(json_req.return_type, ReturnType::Json);

    // answer out of order
    for (req, value) in [(&json_req, "addr_test1json"), (&cbor_req, "01abcd")] {
        service.send(ChannelMessage::RpcResponse(RpcResponse {
            uid: req.uid,
            result: RpcReturn::Ok(json!(value)),
        }))?;
    }
    assert_eq!(first.await??, "01abcd");
    assert_eq!(second.await??, "addr_test1json");
    Ok(())
}

#[tokio::test]
async fn test_disconnect_rejects_pending_and_fires_once() -> anyhow::Result<()> {
    let (page, mut service) = port_pair();
    let client = Arc::new(ConnectorClient::new(page, ORIGIN, ClientConfig::default()));

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    assert!(client.on_disconnect(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let enable = {
        let client = client.clone();
        tokio::spawn(async move { client.enable(Protocol::Cardano, EnableOptions::default()).await })
    };
    accept_connect(&mut service, None).await;
    let wallet = enable.await??;

    let pending = {
        let wallet = wallet.clone();
        tokio::spawn(async move { wallet.get_utxos(None, None).await })
    };
    expect_rpc(&mut service).await;
    drop(service);

    let err = pending.await?.unwrap_err();
    assert_eq!(err, ConnectorError::Disconnected);
    assert_eq!(err.code(), codes::API_INTERNAL_ERROR);

    assert!(client.is_disconnected());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(
        wallet.get_network_id().await.unwrap_err(),
        ConnectorError::Disconnected
    );
    assert_eq!(
        client
            .enable(Protocol::Ergo, EnableOptions::default())
            .await
            .unwrap_err(),
        ConnectorError::Disconnected
    );
    assert!(!client.on_disconnect(|| {}));
    Ok(())
}

#[tokio::test]
async fn test_refused_enable_surfaces_refused_code() -> anyhow::Result<()> {
    let (page, mut service) = port_pair();
    let client = ConnectorClient::new(page, ORIGIN, ClientConfig::default());

    let fake_service = tokio::spawn(async move {
        if let Some(ChannelMessage::ConnectRequest(req)) = service.recv().await {
            assert!(req.only_silent);
            service
                .send(ChannelMessage::Connected(ConnectedReply::refused(
                    req.protocol,
                    connector_protocol::ApiError::refused("site is not whitelisted"),
                )))
                .unwrap();
        }
        service
    });

    let options = EnableOptions {
        only_silent: true,
        ..Default::default()
    };
    let err = client.enable(Protocol::Cardano, options).await.unwrap_err();
    assert_eq!(err.code(), codes::API_REFUSED);
    assert_eq!(
        client.connection_state(Protocol::Cardano),
        ConnectionState::Unconnected
    );
    fake_service.await?;
    Ok(())
}
