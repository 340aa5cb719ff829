use std::thread;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::crypto::payload::{
    recipient_key, BatchEncryptRequest, BatchEncryptResponse, DecryptRequest, DecryptResponse,
    EncryptRequest, EncryptedPayload, PresenceRequest,
};
use crate::core::engine::error::{EngineError, EngineResult};
use crate::core::worker::executor::{TaskAction, TaskExecutor};

/// Имитация криптографии: XOR с потоком ключей из SHA-256.
///
/// Не является шифрованием. Нужна, чтобы движок гонял реальные байты и
/// реальную нагрузку через кэш, батчи и воркеры.
pub struct SimulatedCryptoExecutor {
    secret: Vec<u8>,
    work_cost: Duration,
}

impl SimulatedCryptoExecutor {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            work_cost: Duration::ZERO,
        }
    }

    /// Искусственная задержка на каждую операцию
    pub fn with_work_cost(mut self, work_cost: Duration) -> Self {
        self.work_cost = work_cost;
        self
    }

    fn keystream_xor(&self, key: &str, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for (block_idx, chunk) in data.chunks(32).enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(&self.secret);
            hasher.update(key.as_bytes());
            hasher.update((block_idx as u64).to_le_bytes());
            let block = hasher.finalize();
            out.extend(chunk.iter().zip(block.iter()).map(|(b, k)| b ^ k));
        }
        out
    }

    fn seal(&self, plaintext: &str, recipients: &[String]) -> EncryptedPayload {
        let key = recipient_key(recipients);
        let ciphertext = hex::encode(self.keystream_xor(&key, plaintext.as_bytes()));
        EncryptedPayload { ciphertext, key }
    }

    fn open(&self, request: &DecryptRequest) -> EngineResult<String> {
        let bytes = hex::decode(&request.ciphertext)
            .map_err(|e| EngineError::InvalidPayload(format!("ciphertext is not hex: {}", e)))?;
        let plain = self.keystream_xor(&request.key, &bytes);
        String::from_utf8(plain)
            .map_err(|_| EngineError::TaskExecution("decryption produced invalid UTF-8".into()))
    }

    fn simulate_work(&self, units: usize) {
        if !self.work_cost.is_zero() {
            thread::sleep(self.work_cost * units.max(1) as u32);
        }
    }
}

impl TaskExecutor for SimulatedCryptoExecutor {
    fn execute(&self, action: TaskAction, payload: &Value) -> EngineResult<Value> {
        debug!("🔐 Simulated crypto: {}", action.as_str());

        let result = match action {
            TaskAction::Encrypt => {
                let request: EncryptRequest = serde_json::from_value(payload.clone())?;
                self.simulate_work(1);
                serde_json::to_value(self.seal(&request.content, &request.recipients))?
            }
            TaskAction::BatchEncrypt => {
                let request: BatchEncryptRequest = serde_json::from_value(payload.clone())?;
                // батч дешевле поштучной обработки: одна единица работы на весь набор
                self.simulate_work(1);
                let results = request
                    .items
                    .iter()
                    .map(|item| self.seal(&item.content, &item.recipients))
                    .collect();
                serde_json::to_value(BatchEncryptResponse { results })?
            }
            TaskAction::EncryptPresence => {
                let request: PresenceRequest = serde_json::from_value(payload.clone())?;
                self.simulate_work(1);
                serde_json::to_value(self.seal(&request.status, &request.recipients))?
            }
            TaskAction::Decrypt => {
                let request: DecryptRequest = serde_json::from_value(payload.clone())?;
                self.simulate_work(1);
                serde_json::to_value(DecryptResponse {
                    plaintext: self.open(&request)?,
                })?
            }
        };

        Ok(result)
    }
}
