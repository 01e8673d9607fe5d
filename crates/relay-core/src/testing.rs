//! Fake source and auth adapters shared by the unit tests.

use std::{
    collections::HashSet,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ChatRef, Item, MediaKind, MessageId},
    errors::Error,
    ports::{
        AuthHandle, AuthPort, CodeOutcome, DownloadOutcome, SourceClient, UserClientConnector,
    },
    progress::ProgressSample,
    Result,
};

const DOWNLOAD_CHUNKS: u64 = 4;

type FetchHook = Box<dyn Fn(MessageId) + Send + Sync>;

#[derive(Clone, Debug, Default)]
pub(crate) struct SourceBehavior {
    /// Ids that fetch as `Ok(None)`.
    pub missing: HashSet<i32>,
    /// Ids whose fetch fails outright.
    pub broken: HashSet<i32>,
    /// Ids whose first fetch hits a flood wait.
    pub flood_once: HashSet<i32>,
    /// Ids that carry a photo instead of plain text.
    pub media: HashSet<i32>,
    pub fail_download: bool,
}

pub(crate) struct FakeSource {
    behavior: SourceBehavior,
    fetches: Mutex<Vec<MessageId>>,
    downloads: Mutex<Vec<MessageId>>,
    flooded: Mutex<HashSet<i32>>,
    cancel_in_download: Mutex<Option<CancellationToken>>,
    on_fetch: Mutex<Option<FetchHook>>,
}

impl FakeSource {
    pub(crate) fn new(behavior: SourceBehavior) -> Self {
        Self {
            behavior,
            fetches: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
            flooded: Mutex::new(HashSet::new()),
            cancel_in_download: Mutex::new(None),
            on_fetch: Mutex::new(None),
        }
    }

    pub(crate) fn fetches(&self) -> Vec<MessageId> {
        self.fetches.lock().unwrap().clone()
    }

    pub(crate) fn downloads(&self) -> Vec<MessageId> {
        self.downloads.lock().unwrap().clone()
    }

    /// Cancel `token` after the first chunk of the next download.
    pub(crate) fn cancel_during_download(&self, token: CancellationToken) {
        *self.cancel_in_download.lock().unwrap() = Some(token);
    }

    pub(crate) fn on_fetch(&self, hook: impl Fn(MessageId) + Send + Sync + 'static) {
        *self.on_fetch.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    async fn fetch(&self, _chat: &ChatRef, id: MessageId) -> Result<Option<Item>> {
        self.fetches.lock().unwrap().push(id);
        if let Some(hook) = self.on_fetch.lock().unwrap().as_ref() {
            hook(id);
        }

        if self.behavior.flood_once.contains(&id.0) && self.flooded.lock().unwrap().insert(id.0) {
            return Err(Error::RateLimited {
                retry_after: Duration::from_millis(10),
            });
        }
        if self.behavior.broken.contains(&id.0) {
            return Err(Error::External("CHANNEL_PRIVATE".to_string()));
        }
        if self.behavior.missing.contains(&id.0) {
            return Ok(None);
        }

        let media = if self.behavior.media.contains(&id.0) {
            MediaKind::Photo
        } else {
            MediaKind::None
        };
        Ok(Some(Item {
            id,
            html: format!("message <b>{}</b>", id.0),
            media,
            size: Some(4096),
            file_name: None,
        }))
    }

    async fn download(
        &self,
        _chat: &ChatRef,
        item: &Item,
        dest: &Path,
        progress: mpsc::Sender<ProgressSample>,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        self.downloads.lock().unwrap().push(item.id);
        if self.behavior.fail_download {
            return Err(Error::External("FILE_REFERENCE_EXPIRED".to_string()));
        }

        let total = item.size.unwrap_or(4096);
        let chunk = total / DOWNLOAD_CHUNKS;
        let mut body = Vec::new();
        for n in 1..=DOWNLOAD_CHUNKS {
            if cancel.is_cancelled() {
                return Ok(DownloadOutcome::Cancelled);
            }
            body.resize((chunk * n) as usize, 0u8);
            tokio::fs::write(dest, &body).await?;
            let _ = progress
                .send(ProgressSample {
                    done: chunk * n,
                    total,
                })
                .await;
            if let Some(token) = self.cancel_in_download.lock().unwrap().take() {
                token.cancel();
            }
        }
        Ok(DownloadOutcome::Finished)
    }
}

/// How the fake login backend answers.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct AuthScript {
    pub reject_phone: bool,
    pub reject_code: bool,
    pub password_required: bool,
    pub reject_password: bool,
}

#[derive(Default)]
pub(crate) struct AuthCounters {
    pub created: AtomicUsize,
    pub teardowns: AtomicUsize,
}

pub(crate) struct FakeAuth {
    pub script: AuthScript,
    pub counters: Arc<AuthCounters>,
    request_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeAuth {
    pub(crate) fn new(script: AuthScript) -> Self {
        Self {
            script,
            counters: Arc::new(AuthCounters::default()),
            request_gate: Mutex::new(None),
        }
    }

    /// Hold `request_code` of handles created from now on until `gate` is notified.
    pub(crate) fn gate_request_code(&self, gate: Arc<Notify>) {
        *self.request_gate.lock().unwrap() = Some(gate);
    }

    pub(crate) fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub(crate) fn teardowns(&self) -> usize {
        self.counters.teardowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthPort for FakeAuth {
    async fn create_handle(&self) -> Result<Box<dyn AuthHandle>> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeAuthHandle {
            script: self.script,
            counters: self.counters.clone(),
            phone: None,
            gate: self.request_gate.lock().unwrap().clone(),
        }))
    }
}

struct FakeAuthHandle {
    script: AuthScript,
    counters: Arc<AuthCounters>,
    phone: Option<String>,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl AuthHandle for FakeAuthHandle {
    async fn request_code(&mut self, phone: &str) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.script.reject_phone {
            return Err(Error::Auth("PHONE_NUMBER_INVALID".to_string()));
        }
        self.phone = Some(phone.to_string());
        Ok(())
    }

    async fn submit_code(&mut self, code: &str) -> Result<CodeOutcome> {
        if self.script.reject_code || code != "12345" {
            return Err(Error::Auth("PHONE_CODE_INVALID".to_string()));
        }
        if self.script.password_required {
            Ok(CodeOutcome::PasswordRequired)
        } else {
            Ok(CodeOutcome::SignedIn)
        }
    }

    async fn submit_password(&mut self, _password: &str) -> Result<()> {
        if self.script.reject_password {
            return Err(Error::Auth("PASSWORD_HASH_INVALID".to_string()));
        }
        Ok(())
    }

    async fn export_credential(&self) -> Result<String> {
        Ok(format!("session-for-{}", self.phone.as_deref().unwrap_or("?")))
    }

    async fn teardown(self: Box<Self>) {
        self.counters.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct FakeConnector {
    pub credentials: Mutex<Vec<String>>,
}

#[async_trait]
impl UserClientConnector for FakeConnector {
    async fn connect(&self, credential: &str) -> Result<Arc<dyn SourceClient>> {
        self.credentials
            .lock()
            .unwrap()
            .push(credential.to_string());
        Ok(Arc::new(FakeSource::new(SourceBehavior::default())))
    }
}
