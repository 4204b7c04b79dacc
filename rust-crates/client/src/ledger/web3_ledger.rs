// JSON-RPC ledger backed by the `web3` crate. Reads are folded into Multicall3
// `aggregate3` calls; writes are gas-estimated, signed locally and sent raw.
use super::{
    Ledger,
    LedgerError,
    LogEntry,
    ReadCall,
    ReadResult,
    TxReceipt,
    WriteCall,
};
use pool_abi::functions;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{
    debug,
    info,
};
use web3::{
    Web3,
    ethabi::Token,
    signing::{
        Key,
        SecretKey,
        SecretKeyRef,
    },
    transports::Http,
    types::{
        Address,
        BlockId,
        BlockNumber,
        Bytes,
        CallRequest,
        H256,
        TransactionParameters,
        U64,
        U256,
    },
};

const DEFAULT_RECEIPT_POLL: Duration = Duration::from_secs(2);

pub struct Web3Ledger {
    web3: Web3<Http>,
    contract: Address,
    multicall: Address,
    signer: Option<SecretKey>,
    account: Option<Address>,
    chain_id: Option<u64>,
    receipt_poll: Duration,
    nonce_lock: Mutex<()>,
}

impl Web3Ledger {
    pub fn connect(
        rpc_url: &str,
        contract: Address,
        multicall: Address,
    ) -> Result<Self, LedgerError> {
        let transport = Http::new(rpc_url)?;
        Ok(Self {
            web3: Web3::new(transport),
            contract,
            multicall,
            signer: None,
            account: None,
            chain_id: None,
            receipt_poll: DEFAULT_RECEIPT_POLL,
            nonce_lock: Mutex::new(()),
        })
    }

    /// Sign writes with `key`; the account becomes the key's address.
    pub fn with_signer(mut self, key: SecretKey) -> Self {
        self.account = Some(SecretKeyRef::new(&key).address());
        self.signer = Some(key);
        self
    }

    /// Read-only mode for an address whose key is not available.
    pub fn with_watch_address(mut self, account: Address) -> Self {
        if self.signer.is_none() {
            self.account = Some(account);
        }
        self
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_receipt_poll(mut self, interval: Duration) -> Self {
        self.receipt_poll = interval;
        self
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, LedgerError> {
        let request = CallRequest {
            to: Some(to),
            data: Some(Bytes(data)),
            ..Default::default()
        };
        let output = self.web3.eth().call(request, None).await?;
        Ok(output.0)
    }
}

impl Ledger for Web3Ledger {
    fn account(&self) -> Option<Address> {
        self.account
    }

    fn contract(&self) -> Address {
        self.contract
    }

    async fn pool_count(&self) -> Result<u64, LedgerError> {
        let data = pool_abi::encode_call(functions::POOL_ID_COUNTER, &[])?;
        let output = self.call(self.contract, data).await?;
        let count = pool_abi::decode_output(functions::POOL_ID_COUNTER, &output)?
            .into_iter()
            .next()
            .and_then(Token::into_uint)
            .ok_or_else(|| LedgerError::Decode {
                function: functions::POOL_ID_COUNTER,
                reason: "expected uint256".to_string(),
            })?;
        if count > U256::from(u64::MAX) {
            return Err(LedgerError::Decode {
                function: functions::POOL_ID_COUNTER,
                reason: format!("pool count {count} out of range"),
            });
        }
        Ok(count.low_u64())
    }

    async fn read_batch(&self, calls: &[ReadCall]) -> Result<Vec<ReadResult>, LedgerError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let inner = calls
            .iter()
            .map(|call| Ok((self.contract, call.encode()?)))
            .collect::<Result<Vec<_>, LedgerError>>()?;
        let data = pool_abi::encode_aggregate3(&inner)?;
        let output = self.call(self.multicall, data).await?;
        let results = pool_abi::decode_aggregate3(&output)?;
        if results.len() != calls.len() {
            return Err(LedgerError::CallFailed(format!(
                "aggregate3 returned {} results for {} calls",
                results.len(),
                calls.len()
            )));
        }
        debug!(calls = calls.len(), "batched read completed");
        Ok(calls
            .iter()
            .zip(results)
            .map(|(call, (success, data))| {
                if success {
                    call.decode(&data)
                } else {
                    Err(LedgerError::CallFailed(format!(
                        "{} reverted",
                        call.function_name()
                    )))
                }
            })
            .collect())
    }

    async fn submit_write(&self, call: &WriteCall) -> Result<H256, LedgerError> {
        let key = self.signer.as_ref().ok_or(LedgerError::NoSigner)?;
        let from = SecretKeyRef::new(key).address();
        let data = call.encode()?;

        // Estimation runs the call against pending state, so reverts surface here.
        let estimate = CallRequest {
            from: Some(from),
            to: Some(self.contract),
            value: Some(call.value()),
            data: Some(Bytes(data.clone())),
            ..Default::default()
        };
        let gas = self
            .web3
            .eth()
            .estimate_gas(estimate, None)
            .await
            .map_err(|err| LedgerError::Rejected(err.to_string()))?;

        let _guard = self.nonce_lock.lock().await;
        let nonce = self
            .web3
            .eth()
            .transaction_count(from, Some(BlockNumber::Pending))
            .await?;
        let params = TransactionParameters {
            nonce: Some(nonce),
            to: Some(self.contract),
            gas: gas.saturating_mul(U256::from(12)) / 10,
            value: call.value(),
            data: Bytes(data),
            chain_id: self.chain_id,
            ..Default::default()
        };
        let signed = self.web3.accounts().sign_transaction(params, key).await?;
        let tx_hash = self
            .web3
            .eth()
            .send_raw_transaction(signed.raw_transaction)
            .await
            .map_err(|err| LedgerError::Rejected(err.to_string()))?;
        info!(
            function = call.function_name(),
            pool_id = ?call.pool_id(),
            ?tx_hash,
            "transaction submitted"
        );
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<TxReceipt, LedgerError> {
        loop {
            if let Some(receipt) = self.web3.eth().transaction_receipt(tx_hash).await? {
                return Ok(TxReceipt {
                    tx_hash,
                    succeeded: receipt.status == Some(U64::one()),
                    block_number: receipt.block_number.map(|n| n.as_u64()),
                    logs: receipt
                        .logs
                        .into_iter()
                        .map(|log| LogEntry {
                            address: log.address,
                            topics: log.topics,
                            data: log.data.0,
                        })
                        .collect(),
                });
            }
            tokio::time::sleep(self.receipt_poll).await;
        }
    }

    async fn current_block_height(&self) -> Result<U256, LedgerError> {
        let height = self.web3.eth().block_number().await?;
        Ok(U256::from(height.as_u64()))
    }

    async fn current_block_timestamp(&self) -> Result<U256, LedgerError> {
        let block = self
            .web3
            .eth()
            .block(BlockId::Number(BlockNumber::Latest))
            .await?
            .ok_or_else(|| LedgerError::Rpc("latest block unavailable".to_string()))?;
        Ok(block.timestamp)
    }
}
