//! Page client → relay → wallet service, over real TCP sockets.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use connector_client::{ClientConfig, ConnectorClient, EnableOptions};
use connector_protocol::{codes, ConnectorError, Protocol, ReturnType, SignTxRequest, WalletId};
use connector_relay::Relay;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::time::timeout;

use wallet_service::backend::{Backend, PriceTicker, RawProtocolParameters, StatusResponse};
use wallet_service::connection::approval::ApprovalDecision;
use wallet_service::listener::serve_channel;
use wallet_service::network;
use wallet_service::signer::{CreateTxInput, DataSignature, SignError, Signer};
use wallet_service::store::{Amount, MemoryWalletStore, Utxo, WalletAddress, WalletRecord};
use wallet_service::sync::WalletRefresher;
use wallet_service::whitelist::{Whitelist, WhitelistEntry};
use wallet_service::{ServiceDeps, WalletService};

const ORIGIN: &str = "https://dex.example";
const WAIT: Duration = Duration::from_secs(5);

struct OfflineBackend;

#[async_trait]
impl Backend for OfflineBackend {
    async fn epoch_parameters(&self, _network: &str) -> Result<RawProtocolParameters> {
        anyhow::bail!("offline")
    }

    async fn utxos_for_addresses(&self, _addresses: &[String]) -> Result<Vec<Utxo>> {
        anyhow::bail!("offline")
    }

    async fn submit_signed_tx(&self, _signed_tx_hex: &str) -> Result<String> {
        anyhow::bail!("offline")
    }

    async fn current_price(&self, _ticker: &str) -> Result<PriceTicker> {
        anyhow::bail!("offline")
    }

    async fn server_status(&self) -> Result<StatusResponse> {
        anyhow::bail!("offline")
    }
}

struct StubSigner;

#[async_trait]
impl Signer for StubSigner {
    async fn sign_tx(&self, wallet: WalletId, _request: &SignTxRequest) -> Result<String, SignError> {
        Ok(format!("witness{wallet}"))
    }

    async fn sign_data(
        &self,
        _wallet: WalletId,
        _address: &str,
        payload_hex: &str,
    ) -> Result<DataSignature, SignError> {
        Ok(DataSignature {
            signature: payload_hex.to_string(),
            key: "00".to_string(),
        })
    }

    async fn create_tx(&self, _wallet: WalletId, _input: CreateTxInput<'_>) -> Result<Value, SignError> {
        Ok(Value::Null)
    }

    async fn auth_pubkey(&self, _wallet: WalletId) -> Result<String, SignError> {
        Ok("cd".repeat(32))
    }

    async fn auth_sign(&self, _wallet: WalletId, payload_hex: &str) -> Result<String, SignError> {
        Ok(payload_hex.chars().rev().collect())
    }

    async fn auth_verify(
        &self,
        _wallet: WalletId,
        payload_hex: &str,
        signature_hex: &str,
    ) -> Result<bool, SignError> {
        Ok(payload_hex.chars().rev().collect::<String>() == signature_hex)
    }
}

/// Signer whose `sign_tx` never finishes, like a user who walks away.
#[derive(Default)]
struct StalledSigner {
    signing: AtomicUsize,
}

#[async_trait]
impl Signer for StalledSigner {
    async fn sign_tx(&self, _wallet: WalletId, _request: &SignTxRequest) -> Result<String, SignError> {
        self.signing.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn sign_data(
        &self,
        wallet: WalletId,
        address: &str,
        payload_hex: &str,
    ) -> Result<DataSignature, SignError> {
        StubSigner.sign_data(wallet, address, payload_hex).await
    }

    async fn create_tx(&self, wallet: WalletId, input: CreateTxInput<'_>) -> Result<Value, SignError> {
        StubSigner.create_tx(wallet, input).await
    }

    async fn auth_pubkey(&self, wallet: WalletId) -> Result<String, SignError> {
        StubSigner.auth_pubkey(wallet).await
    }

    async fn auth_sign(&self, wallet: WalletId, payload_hex: &str) -> Result<String, SignError> {
        StubSigner.auth_sign(wallet, payload_hex).await
    }

    async fn auth_verify(
        &self,
        wallet: WalletId,
        payload_hex: &str,
        signature_hex: &str,
    ) -> Result<bool, SignError> {
        StubSigner.auth_verify(wallet, payload_hex, signature_hex).await
    }
}

/// Refresh that blocks until the test opens the gate.
#[derive(Default)]
struct GatedRefresher {
    gate: Notify,
    calls: AtomicUsize,
}

#[async_trait]
impl WalletRefresher for GatedRefresher {
    async fn refresh(&self, _wallet_id: WalletId) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(())
    }
}

fn address(n: u8) -> WalletAddress {
    WalletAddress {
        bech32: format!("addr_test1qz{n:02}"),
        bytes_hex: format!("00{n:02x}"),
    }
}

fn wallet() -> WalletRecord {
    WalletRecord {
        id: 1,
        name: "main".into(),
        protocol: Protocol::Cardano,
        network: "cardano-preprod".into(),
        used_addresses: vec![address(0)],
        unused_addresses: vec![address(1)],
        change_address: address(2),
        reward_addresses: vec![],
        utxos: vec![Utxo {
            tx_hash: "ab".repeat(32),
            index: 0,
            receiver: address(0).bech32,
            amount: Amount {
                coin: "500000".into(),
                assets: vec![],
            },
        }],
    }
}

struct Stack {
    service: Arc<WalletService>,
    relay_addr: SocketAddr,
}

async fn start(refresher: Arc<dyn WalletRefresher>) -> Result<Stack> {
    start_with_signer(refresher, Arc::new(StubSigner)).await
}

async fn start_with_signer(
    refresher: Arc<dyn WalletRefresher>,
    signer: Arc<dyn Signer>,
) -> Result<Stack> {
    let service = WalletService::with_refresher(
        ServiceDeps {
            network: network::by_name("cardano-preprod").unwrap(),
            store: Arc::new(MemoryWalletStore::new(vec![wallet()])),
            backend: Arc::new(OfflineBackend),
            signer,
            whitelist: Arc::new(Whitelist::in_memory()),
            clock: network::system_clock(),
            price_ticker: "ADA".into(),
        },
        refresher,
    );
    service.connections.watch_revocations();

    let channel = TcpListener::bind("127.0.0.1:0").await?;
    let channel_addr = channel.local_addr()?;
    tokio::spawn(serve_channel(service.clone(), channel));

    let relay = TcpListener::bind("127.0.0.1:0").await?;
    let relay_addr = relay.local_addr()?;
    tokio::spawn(Relay::new(channel_addr.to_string()).serve(relay));

    Ok(Stack {
        service,
        relay_addr,
    })
}

impl Stack {
    async fn client(&self, return_type: ReturnType) -> Result<Arc<ConnectorClient>> {
        let config = ClientConfig {
            call_timeout: Some(WAIT),
            return_type,
        };
        Ok(Arc::new(
            ConnectorClient::connect_tcp(self.relay_addr, ORIGIN, config).await?,
        ))
    }

    fn whitelist(&self, auth_enabled: bool) {
        self.service.whitelist.upsert(WhitelistEntry {
            url: ORIGIN.into(),
            protocol: Protocol::Cardano,
            wallet_id: 1,
            auth_enabled,
        });
    }

    async fn wait_for_approvals(&self, count: usize) -> Result<()> {
        timeout(WAIT, async {
            while self.service.approvals.list().len() != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;
        Ok(())
    }

    /// Wait for the single pending approval prompt and answer it.
    async fn answer_prompt(&self, decision: ApprovalDecision) -> Result<()> {
        let id = timeout(WAIT, async {
            loop {
                if let Some((id, request)) = self.service.approvals.list().into_iter().next() {
                    assert_eq!(request.url, ORIGIN);
                    return id;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;
        assert!(self.service.approvals.resolve(id, decision));
        Ok(())
    }
}

#[tokio::test]
async fn test_unknown_site_approval_then_balance() -> Result<()> {
    let stack = start(Arc::new(GatedRefresher::default())).await?;
    let client = stack.client(ReturnType::Json).await?;

    let enabling = tokio::spawn({
        let client = client.clone();
        async move { client.enable(Protocol::Cardano, EnableOptions::default()).await }
    });
    stack
        .answer_prompt(ApprovalDecision::Approved { wallet_id: 1 })
        .await?;
    let wallet = enabling.await??;

    assert_eq!(wallet.get_balance("*").await?, json!("500000"));
    assert_eq!(wallet.get_network_id().await?, 0);
    assert_eq!(wallet.get_change_address().await?, "addr_test1qz02");

    client.set_return_type(ReturnType::Cbor);
    assert_eq!(wallet.get_balance("*").await?, json!("1a0007a120"));

    let entries = stack.service.whitelist.list();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].url, ORIGIN);
    assert!(client.is_enabled(Protocol::Cardano).await?);
    assert!(!client.is_enabled(Protocol::Ergo).await?);
    Ok(())
}

#[tokio::test]
async fn test_rejected_prompt_refuses_enable() -> Result<()> {
    let stack = start(Arc::new(GatedRefresher::default())).await?;
    let client = stack.client(ReturnType::Json).await?;

    let enabling = tokio::spawn({
        let client = client.clone();
        async move { client.enable(Protocol::Cardano, EnableOptions::default()).await }
    });
    stack.answer_prompt(ApprovalDecision::Rejected).await?;

    let err = match enabling.await? {
        Err(e) => e,
        Ok(_) => panic!("rejected connection must not enable"),
    };
    assert_eq!(err.code(), codes::API_REFUSED);
    assert!(stack.service.whitelist.list().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_utxos_readable_while_sync_in_flight() -> Result<()> {
    let refresher = Arc::new(GatedRefresher::default());
    let stack = start(refresher.clone()).await?;
    stack.whitelist(false);

    let client = stack.client(ReturnType::Json).await?;
    let wallet = client
        .enable(
            Protocol::Cardano,
            EnableOptions {
                only_silent: true,
                ..Default::default()
            },
        )
        .await?;

    let sync = stack.service.sync.sync_wallet(1);
    assert!(stack.service.sync.is_syncing(1));

    let utxos = timeout(WAIT, wallet.get_utxos(None, None)).await??;
    assert_eq!(utxos.unwrap().len(), 1);
    assert!(stack.service.sync.is_syncing(1), "read completed before the sync");

    refresher.gate.notify_one();
    assert!(timeout(WAIT, sync).await?);
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_identified_reconnect_is_silent() -> Result<()> {
    let stack = start(Arc::new(GatedRefresher::default())).await?;
    stack.whitelist(true);

    let client = stack.client(ReturnType::Json).await?;
    let wallet = client
        .enable(
            Protocol::Cardano,
            EnableOptions {
                request_identification: true,
                only_silent: true,
            },
        )
        .await?;

    assert!(stack.service.approvals.list().is_empty());
    let auth = wallet.auth();
    assert_eq!(auth.wallet_pubkey(), Some("cd".repeat(32).as_str()));
    let signature = auth.sign_hex_payload("0a0b").await?;
    assert_eq!(signature, "b0a0");
    assert!(auth.check_hex_payload("0a0b", &signature).await?);
    Ok(())
}

#[tokio::test]
async fn test_revocation_disconnects_page_once() -> Result<()> {
    let stack = start(Arc::new(GatedRefresher::default())).await?;
    stack.whitelist(false);

    let client = stack.client(ReturnType::Json).await?;
    let wallet = client
        .enable(Protocol::Cardano, EnableOptions::default())
        .await?;
    assert_eq!(wallet.get_balance("ADA").await?, json!("500000"));

    let fired = Arc::new(AtomicUsize::new(0));
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    let counter = fired.clone();
    assert!(client.on_disconnect(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = closed_tx.send(());
    }));

    assert!(stack.service.whitelist.revoke(ORIGIN, Protocol::Cardano));
    timeout(WAIT, closed_rx).await??;

    assert!(client.is_disconnected());
    assert!(matches!(
        wallet.get_balance("ADA").await,
        Err(ConnectorError::Disconnected)
    ));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!client.on_disconnect(|| {}));
    Ok(())
}

/// Counts disconnect notifications and signals the first one.
fn watch_disconnect(
    client: &ConnectorClient,
) -> (Arc<AtomicUsize>, tokio::sync::oneshot::Receiver<()>) {
    let fired = Arc::new(AtomicUsize::new(0));
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    let counter = fired.clone();
    assert!(client.on_disconnect(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = closed_tx.send(());
    }));
    (fired, closed_rx)
}

#[tokio::test]
async fn test_revocation_with_prompt_open_disconnects_page() -> Result<()> {
    let stack = start(Arc::new(GatedRefresher::default())).await?;
    stack.whitelist(false);

    let client = stack.client(ReturnType::Json).await?;
    let wallet = client
        .enable(Protocol::Cardano, EnableOptions::default())
        .await?;
    let ergo = tokio::spawn({
        let client = client.clone();
        async move { client.enable(Protocol::Ergo, EnableOptions::default()).await }
    });
    stack.wait_for_approvals(1).await?;

    let (fired, closed_rx) = watch_disconnect(&client);
    assert!(stack.service.whitelist.revoke(ORIGIN, Protocol::Cardano));
    timeout(WAIT, closed_rx).await??;

    assert!(timeout(WAIT, ergo).await??.is_err());
    stack.wait_for_approvals(0).await?;
    assert!(matches!(
        timeout(WAIT, wallet.get_balance("ADA")).await?,
        Err(ConnectorError::Disconnected)
    ));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_closed_tab_withdraws_its_prompt() -> Result<()> {
    let stack = start(Arc::new(GatedRefresher::default())).await?;
    let client = stack.client(ReturnType::Json).await?;

    let enabling = tokio::spawn({
        let client = client.clone();
        async move { client.enable(Protocol::Cardano, EnableOptions::default()).await }
    });
    stack.wait_for_approvals(1).await?;

    // the page goes away: its tasks and its connection end
    enabling.abort();
    drop(client);
    stack.wait_for_approvals(0).await?;

    timeout(WAIT, async {
        while stack.service.connections.session_count() != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    assert!(stack.service.whitelist.list().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_revocation_during_slow_call_disconnects_page() -> Result<()> {
    let signer = Arc::new(StalledSigner::default());
    let stack = start_with_signer(Arc::new(GatedRefresher::default()), signer.clone()).await?;
    stack.whitelist(false);

    let client = stack.client(ReturnType::Json).await?;
    let wallet = client
        .enable(Protocol::Cardano, EnableOptions::default())
        .await?;

    let signing = tokio::spawn({
        let wallet = wallet.clone();
        async move {
            wallet
                .sign_tx(SignTxRequest {
                    tx: "84a4".into(),
                    partial_sign: false,
                    return_tx: false,
                })
                .await
        }
    });
    timeout(WAIT, async {
        while signer.signing.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    let (fired, closed_rx) = watch_disconnect(&client);
    assert!(stack.service.whitelist.revoke(ORIGIN, Protocol::Cardano));
    timeout(WAIT, closed_rx).await??;

    assert!(matches!(
        timeout(WAIT, signing).await??,
        Err(ConnectorError::Disconnected)
    ));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    Ok(())
}
