//! Test utilities for end-to-end gateway tests

use async_trait::async_trait;
use leafbridge_core::{
    ChannelError, ChannelFactory, DeviceChannel, DeviceCredential, GatewayConfig, Message,
    ModuleOutput, RetryConfig,
};
use leafbridge_crypto::{CredentialProvider, SignError};
use leafbridge_identity::{lock_device, DeviceRepository, DeviceStatus, MemoryDeviceRepository};
use leafbridge_router::{ConfirmationCallback, MessageRouter, RegistrationCoordinator};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Module id reported as the source of leaf traffic
pub const SOURCE_MODULE: &str = "opcua-publisher";

/// Gateway configuration with fast retries
pub fn gateway_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.identity.edge_device_id = "edge-gw-01".to_string();
    config.identity.edge_module_id = "IdentityTranslationLite".to_string();
    config.identity.hub_hostname = "contoso.azure-devices.net".to_string();
    config.workload.generation_id = "637412".to_string();
    config.registration.retry = RetryConfig {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
    };
    config
}

/// Leaf-tagged message from `device_id`
pub fn leaf_message(device_id: &str, body: &str) -> Message {
    Message::new(body.as_bytes().to_vec())
        .with_property("leafDeviceId", device_id)
        .with_property("moduleId", SOURCE_MODULE)
}

/// Controller answer for `device_id`
pub fn confirmation(device_id: &str, code: i32) -> ConfirmationCallback {
    ConfirmationCallback {
        device_id: device_id.to_string(),
        result_code: code,
        result_description: Some(format!("result {}", code)),
    }
}

/// Module output recording everything sent on it
#[derive(Default)]
pub struct RecordingOutput {
    sent: Mutex<Vec<(String, Message)>>,
}

impl RecordingOutput {
    pub fn sent(&self) -> Vec<(String, Message)> {
        self.sent.lock().unwrap().clone()
    }

    /// Registration requests seen so far, decoded
    pub fn registration_requests(&self) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter(|(_, m)| m.property("itmtype") == Some("LeafEvent"))
            .map(|(_, m)| serde_json::from_slice(&m.body).unwrap())
            .collect()
    }
}

#[async_trait]
impl ModuleOutput for RecordingOutput {
    async fn send_to_output(&self, output: &str, message: Message) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push((output.to_string(), message));
        Ok(())
    }
}

/// Credential provider deriving a fixed key per device
#[derive(Default)]
pub struct FakeCredentials {
    calls: AtomicU32,
    fail: AtomicBool,
}

impl FakeCredentials {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_always(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn credential_for(&self, device_id: &str) -> Result<DeviceCredential, SignError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SignError::Status {
                status: 503,
                body: "workload unavailable".to_string(),
            });
        }
        Ok(DeviceCredential::new(device_id, "a2V5"))
    }
}

#[derive(Default)]
struct ChannelLog {
    delivered: Mutex<HashMap<String, Vec<Message>>>,
    keys: Mutex<HashMap<String, String>>,
    closed: AtomicU32,
}

/// Channel factory recording deliveries per device
#[derive(Default)]
pub struct FakeChannels {
    log: Arc<ChannelLog>,
    opened: AtomicU32,
}

impl FakeChannels {
    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u32 {
        self.log.closed.load(Ordering::SeqCst)
    }

    /// Messages delivered for `device_id`, in delivery order
    pub fn messages(&self, device_id: &str) -> Vec<Message> {
        self.log
            .delivered
            .lock()
            .unwrap()
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Bodies delivered for `device_id`, as UTF-8
    pub fn delivered(&self, device_id: &str) -> Vec<String> {
        self.messages(device_id)
            .iter()
            .map(|m| String::from_utf8_lossy(&m.body).into_owned())
            .collect()
    }

    /// Key of the credential the device's channel was opened with
    pub fn key_for(&self, device_id: &str) -> Option<String> {
        self.log.keys.lock().unwrap().get(device_id).cloned()
    }
}

struct FakeChannel {
    device_id: String,
    log: Arc<ChannelLog>,
}

impl FakeChannel {
    fn record(&self, messages: Vec<Message>) {
        self.log
            .delivered
            .lock()
            .unwrap()
            .entry(self.device_id.clone())
            .or_default()
            .extend(messages);
    }
}

#[async_trait]
impl DeviceChannel for FakeChannel {
    async fn send(&self, message: Message) -> Result<(), ChannelError> {
        self.record(vec![message]);
        Ok(())
    }

    async fn send_batch(&self, messages: Vec<Message>) -> Result<(), ChannelError> {
        self.record(messages);
        Ok(())
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ChannelFactory for FakeChannels {
    async fn open(
        &self,
        credential: &DeviceCredential,
    ) -> Result<Arc<dyn DeviceChannel>, ChannelError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.log.keys.lock().unwrap().insert(
            credential.device_id().to_string(),
            credential.key().to_string(),
        );
        Ok(Arc::new(FakeChannel {
            device_id: credential.device_id().to_string(),
            log: Arc::clone(&self.log),
        }))
    }
}

/// A gateway wired to in-memory collaborators
pub struct TestGateway {
    pub repository: Arc<MemoryDeviceRepository>,
    pub output: Arc<RecordingOutput>,
    pub channels: Arc<FakeChannels>,
    pub coordinator: Arc<RegistrationCoordinator>,
    pub router: Arc<MessageRouter>,
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with_config(gateway_config())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        Self::with_credentials(config, Arc::new(FakeCredentials::default()))
    }

    pub fn with_credentials(
        config: GatewayConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let repository = Arc::new(MemoryDeviceRepository::new());
        let output = Arc::new(RecordingOutput::default());
        let channels = Arc::new(FakeChannels::default());

        let coordinator = Arc::new(RegistrationCoordinator::new(
            &config,
            repository.clone(),
            output.clone(),
            credentials,
            channels.clone(),
        ));
        let router = Arc::new(MessageRouter::new(
            &config,
            Arc::clone(&coordinator),
            output.clone(),
        ));

        Self {
            repository,
            output,
            channels,
            coordinator,
            router,
        }
    }

    pub fn status(&self, device_id: &str) -> Option<DeviceStatus> {
        self.repository
            .get(device_id)
            .map(|device| lock_device(&device).status())
    }

    pub fn pending(&self, device_id: &str) -> usize {
        self.repository
            .get(device_id)
            .map(|device| lock_device(&device).pending_len())
            .unwrap_or(0)
    }
}

impl Default for TestGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Workload API stub answering every sign request with a fixed digest
#[cfg(unix)]
pub mod workload_stub {
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{UnixListener, UnixStream};
    use tokio::task::JoinHandle;

    /// One request received by the stub
    #[derive(Debug, Clone)]
    pub struct SignCall {
        pub request_line: String,
        pub body: serde_json::Value,
    }

    pub struct WorkloadStub {
        calls: Arc<Mutex<Vec<SignCall>>>,
        task: JoinHandle<()>,
    }

    impl WorkloadStub {
        /// Listen on `socket_path`, answering with `digest` (base64)
        pub fn spawn(socket_path: &Path, digest: &str) -> Self {
            let listener = UnixListener::bind(socket_path).unwrap();
            let calls = Arc::new(Mutex::new(Vec::new()));
            let response_body = serde_json::json!({ "digest": digest }).to_string();

            let recorded = Arc::clone(&calls);
            let task = tokio::spawn(async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    if let Some(call) = read_request(&mut stream).await {
                        recorded.lock().unwrap().push(call);
                    }
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                        response_body.len(),
                        response_body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                }
            });

            Self { calls, task }
        }

        pub fn calls(&self) -> Vec<SignCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Drop for WorkloadStub {
        fn drop(&mut self) {
            self.task.abort();
        }
    }

    async fn read_request(stream: &mut UnixStream) -> Option<SignCall> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);

            let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);

            let body_start = head_end + 4;
            if buf.len() - body_start < content_length {
                continue;
            }
            let body = serde_json::from_slice(&buf[body_start..body_start + content_length])
                .unwrap_or(serde_json::Value::Null);
            let request_line = head.lines().next().unwrap_or_default().to_string();
            return Some(SignCall { request_line, body });
        }
    }
}
