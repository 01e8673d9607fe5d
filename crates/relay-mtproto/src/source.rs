use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use grammers_client::{
    client::files::MAX_CHUNK_SIZE,
    session::{
        defs::{PeerAuth, PeerId, PeerRef},
        storages::TlSession,
    },
    types::{Message, Peer},
    Client,
};
use tokio::{io::AsyncWriteExt, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use relay_core::{
    domain::{ChatRef, Item, MessageId},
    errors::Error,
    ports::{DownloadOutcome, SourceClient},
    progress::ProgressSample,
    Result,
};

use crate::{
    call, convert, load_session, map_invocation, start_client, timed, RunnerGuard, CHUNK_TIMEOUT,
};

/// Read access to source chats through one signed-in MTProto identity.
pub struct MtprotoSource {
    client: Client,
    identity: &'static str,
    peers: Mutex<HashMap<ChatRef, Peer>>,
    _runner: RunnerGuard,
}

impl MtprotoSource {
    /// Sign in as the bot (fresh in-memory session each start).
    pub async fn connect_bot(api_id: i32, api_hash: &str, bot_token: &str) -> Result<Self> {
        let session = Arc::new(TlSession::new());
        let (client, runner) = start_client(session, api_id);

        if !timed("is_authorized", client.is_authorized()).await? {
            timed("bot_sign_in", client.bot_sign_in(bot_token, api_hash)).await?;
        }
        info!("mtproto: bot identity connected");
        Ok(Self::new(client, "bot", runner))
    }

    /// Restore a user identity from an exported session string.
    pub async fn connect_user(api_id: i32, credential: &str) -> Result<Self> {
        let session = Arc::new(load_session(credential)?);
        let (client, runner) = start_client(session, api_id);

        if !timed("is_authorized", client.is_authorized()).await? {
            return Err(Error::Auth(
                "session string is not signed in (log in again)".to_string(),
            ));
        }
        info!("mtproto: user identity connected");
        Ok(Self::new(client, "user", runner))
    }

    fn new(client: Client, identity: &'static str, runner: RunnerGuard) -> Self {
        Self {
            client,
            identity,
            peers: Mutex::new(HashMap::new()),
            _runner: runner,
        }
    }

    async fn resolve(&self, chat: &ChatRef) -> Result<Peer> {
        if let Some(peer) = self.peers().get(chat).cloned() {
            return Ok(peer);
        }

        let peer = match chat {
            ChatRef::Username(name) => call("resolve_username", self.client.resolve_username(name))
                .await?
                .ok_or_else(|| Error::External(format!("chat not found: @{name}")))?,
            ChatRef::Id(id) => call("resolve_peer", self.client.resolve_peer(peer_ref(*id))).await?,
        };
        self.peers().insert(chat.clone(), peer.clone());
        Ok(peer)
    }

    fn peers(&self) -> std::sync::MutexGuard<'_, HashMap<ChatRef, Peer>> {
        self.peers.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn message(&self, chat: &ChatRef, id: MessageId) -> Result<Option<Message>> {
        let peer = self.resolve(chat).await?;
        let mut msgs = call(
            "get_messages_by_id",
            self.client.get_messages_by_id(&peer, &[id.0]),
        )
        .await?;
        Ok(msgs.pop().flatten())
    }
}

/// Bot API style dialog id → peer reference with ambient authority.
fn peer_ref(dialog_id: i64) -> PeerRef {
    let id = if dialog_id > 0 {
        PeerId::user(dialog_id)
    } else if dialog_id <= -1_000_000_000_001 {
        PeerId::channel(-dialog_id - 1_000_000_000_000)
    } else {
        PeerId::chat(-dialog_id)
    };
    PeerRef {
        id,
        auth: PeerAuth::default(),
    }
}

#[async_trait]
impl SourceClient for MtprotoSource {
    async fn fetch(&self, chat: &ChatRef, id: MessageId) -> Result<Option<Item>> {
        let Some(msg) = self.message(chat, id).await? else {
            debug!(identity = self.identity, chat = %chat, id = id.0, "message missing");
            return Ok(None);
        };
        Ok(convert::to_item(&msg))
    }

    async fn download(
        &self,
        chat: &ChatRef,
        item: &Item,
        dest: &Path,
        progress: mpsc::Sender<ProgressSample>,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        // File references expire; take the media from a fresh copy of the message.
        let media = self
            .message(chat, item.id)
            .await?
            .and_then(|m| m.media())
            .ok_or_else(|| Error::External(format!("message {} has no media", item.id.0)))?;

        let total = item.size.unwrap_or(0);
        let mut file = tokio::fs::File::create(dest).await?;
        let mut download = self.client.iter_download(&media).chunk_size(MAX_CHUNK_SIZE);
        let mut done = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Ok(DownloadOutcome::Cancelled);
            }
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(DownloadOutcome::Cancelled),
                next = tokio::time::timeout(CHUNK_TIMEOUT, download.next()) => next,
            };
            let chunk = match next {
                Ok(Ok(Some(chunk))) => chunk,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => return Err(map_invocation("download", e)),
                Err(_) => {
                    return Err(Error::External(format!(
                        "download chunk timed out after {}s",
                        CHUNK_TIMEOUT.as_secs()
                    )))
                }
            };
            file.write_all(&chunk).await?;
            done += chunk.len() as u64;
            if total > 0 {
                let _ = progress
                    .send(ProgressSample {
                        done,
                        total: total.max(done),
                    })
                    .await;
            }
        }
        file.flush().await?;

        // Unknown size: a single completion sample.
        if total == 0 {
            let _ = progress.send(ProgressSample { done, total: done }).await;
        }
        Ok(DownloadOutcome::Finished)
    }
}
