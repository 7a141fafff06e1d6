//! Ethereum JSON-RPC backed signer and wallet, for nodes that manage their
//! own unlocked accounts (hardhat, anvil).

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use shared::{
    domain::{Address, TxHash},
    protocol::{
        CallOutput, ContractCall, ContractInterface, ContractTransaction, ReceiptStatus,
        TransactionReceipt, GREETER_INTERFACE,
    },
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};
use url::Url;

use crate::{
    abi::{self, AbiError},
    ContractSigner, SigningHandle, WalletConnector, WalletNotification, WalletSession,
};

pub const DEFAULT_CONFIRMATION_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("json-rpc transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("unexpected json-rpc result for {method}: {source}")]
    UnexpectedResult {
        method: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Abi(#[from] AbiError),
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    status: Option<String>,
    contract_address: Option<String>,
}

#[derive(Clone)]
pub struct JsonRpcClient {
    http: Client,
    url: Url,
    next_id: Arc<AtomicU64>,
}

impl JsonRpcClient {
    pub fn new(url: Url) -> Self {
        Self {
            http: Client::new(),
            url,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("rpc: request method={method} id={id}");
        let response: RpcResponse = self
            .http
            .post(self.url.clone())
            .json(&RpcRequest {
                jsonrpc: "2.0",
                id,
                method,
                params,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        serde_json::from_value(response.result).map_err(|source| RpcError::UnexpectedResult {
            method: method.to_string(),
            source,
        })
    }

    pub async fn accounts(&self) -> Result<Vec<Address>, RpcError> {
        self.request("eth_accounts", json!([])).await
    }
}

pub struct JsonRpcSigner {
    client: JsonRpcClient,
    account: Address,
    interface: &'static ContractInterface,
    bytecode: Option<Arc<Vec<u8>>>,
    poll_interval: Duration,
}

impl JsonRpcSigner {
    pub fn new(client: JsonRpcClient, account: Address) -> Self {
        Self {
            client,
            account,
            interface: &GREETER_INTERFACE,
            bytecode: None,
            poll_interval: DEFAULT_CONFIRMATION_POLL,
        }
    }

    pub fn with_bytecode(mut self, bytecode: Arc<Vec<u8>>) -> Self {
        self.bytecode = Some(bytecode);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn eth_call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let raw: String = self
            .client
            .request(
                "eth_call",
                json!([{ "from": self.account, "to": to, "data": abi::encode_hex(data) }, "latest"]),
            )
            .await?;
        Ok(abi::decode_hex(&raw)?)
    }
}

/// Prefers the ABI-encoded revert reason carried in `error.data`, if any.
fn revert_message(err: RpcError) -> anyhow::Error {
    let reason = match &err {
        RpcError::Rpc {
            data: Some(Value::String(data)),
            ..
        } => abi::decode_hex(data)
            .ok()
            .and_then(|bytes| abi::decode_revert_reason(&bytes)),
        _ => None,
    };
    match reason {
        Some(reason) => anyhow!("{err}: {reason}"),
        None => anyhow!(err),
    }
}

#[async_trait]
impl ContractSigner for JsonRpcSigner {
    fn account(&self) -> Address {
        self.account.clone()
    }

    async fn sign_message(&self, message: &str) -> anyhow::Result<String> {
        let signature: String = self
            .client
            .request(
                "personal_sign",
                json!([abi::encode_hex(message.as_bytes()), self.account]),
            )
            .await?;
        Ok(signature)
    }

    async fn call(&self, contract: &Address, call: ContractCall) -> anyhow::Result<CallOutput> {
        let data = self
            .eth_call(contract, &abi::encode_call(self.interface, call))
            .await
            .map_err(revert_message)?;
        Ok(match call {
            ContractCall::Greet => CallOutput::Text(abi::decode_string(&data)?),
            ContractCall::Owner => CallOutput::Address(abi::decode_address(&data)?),
        })
    }

    async fn get_balance(&self, address: &Address) -> anyhow::Result<String> {
        let raw: String = self
            .client
            .request("eth_getBalance", json!([address, "latest"]))
            .await?;
        Ok(abi::quantity_to_decimal(&raw)?)
    }

    async fn send_transaction(&self, tx: ContractTransaction) -> anyhow::Result<TxHash> {
        let data = abi::encode_transaction(
            self.interface,
            &tx,
            self.bytecode.as_deref().map(Vec::as_slice),
        )?;
        let mut request = json!({ "from": self.account, "data": abi::encode_hex(&data) });
        match &tx {
            ContractTransaction::Deploy { .. } => {}
            ContractTransaction::SetGreeting {
                contract,
                payment_wei,
                ..
            } => {
                request["to"] = json!(contract);
                request["value"] = json!(abi::quantity(*payment_wei));
            }
            ContractTransaction::Withdraw { contract, .. } => {
                request["to"] = json!(contract);
            }
        }

        let hash: TxHash = self
            .client
            .request("eth_sendTransaction", json!([request]))
            .await
            .map_err(revert_message)?;
        info!("rpc: transaction sent from={} hash={hash}", self.account);
        Ok(hash)
    }

    async fn wait_for_confirmation(&self, tx_hash: &TxHash) -> anyhow::Result<TransactionReceipt> {
        loop {
            let receipt: Option<RawReceipt> = self
                .client
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if let Some(receipt) = receipt {
                let status = match receipt.status.as_deref() {
                    Some("0x0") => ReceiptStatus::Reverted,
                    _ => ReceiptStatus::Success,
                };
                return Ok(TransactionReceipt {
                    tx_hash: TxHash(receipt.transaction_hash),
                    status,
                    contract_address: receipt.contract_address.map(Address),
                    revert_reason: None,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Wallet over a node's unlocked accounts. Account switches are driven
/// locally through [`JsonRpcWallet::switch_account`].
pub struct JsonRpcWallet {
    client: JsonRpcClient,
    preferred_account: Option<Address>,
    bytecode: Option<Arc<Vec<u8>>>,
    poll_interval: Duration,
    notifications: broadcast::Sender<WalletNotification>,
}

impl JsonRpcWallet {
    pub fn new(client: JsonRpcClient) -> Self {
        let (notifications, _) = broadcast::channel(16);
        Self {
            client,
            preferred_account: None,
            bytecode: None,
            poll_interval: DEFAULT_CONFIRMATION_POLL,
            notifications,
        }
    }

    pub fn with_account(mut self, account: Option<Address>) -> Self {
        self.preferred_account = account;
        self
    }

    pub fn with_bytecode(mut self, bytecode: Option<Arc<Vec<u8>>>) -> Self {
        self.bytecode = bytecode;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn session_for(&self, account: Address) -> WalletSession {
        let mut signer = JsonRpcSigner::new(self.client.clone(), account)
            .with_poll_interval(self.poll_interval);
        if let Some(bytecode) = &self.bytecode {
            signer = signer.with_bytecode(Arc::clone(bytecode));
        }
        WalletSession::new(SigningHandle::new(Arc::new(signer)))
    }

    pub async fn switch_account(&self, account: Address) -> anyhow::Result<WalletSession> {
        let accounts = self.client.accounts().await?;
        if !accounts.contains(&account) {
            return Err(anyhow!("account {account} is not managed by the node"));
        }
        let session = self.session_for(account);
        let _ = self
            .notifications
            .send(WalletNotification::AccountChanged(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl WalletConnector for JsonRpcWallet {
    async fn connect(&self) -> anyhow::Result<WalletSession> {
        let accounts = self.client.accounts().await?;
        let account = match &self.preferred_account {
            Some(preferred) if accounts.contains(preferred) => preferred.clone(),
            Some(preferred) => {
                return Err(anyhow!("account {preferred} is not managed by the node"));
            }
            None => accounts
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("node at {} exposes no accounts", self.client.url()))?,
        };
        info!("rpc: wallet connected account={account}");
        Ok(self.session_for(account))
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        let _ = self.notifications.send(WalletNotification::Disconnected);
        Ok(())
    }

    fn subscribe_notifications(&self) -> broadcast::Receiver<WalletNotification> {
        self.notifications.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/rpc_tests.rs"]
mod tests;
