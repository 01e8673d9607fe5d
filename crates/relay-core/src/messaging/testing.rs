//! In-memory messenger used by unit tests across the crate.

use std::sync::{
    atomic::{AtomicBool, AtomicI32, Ordering},
    Mutex,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatRef, MessageId, MessageRef},
    errors::Error,
    messaging::{port::MessagingPort, types::MediaUpload},
    Result,
};

#[derive(Default)]
pub(crate) struct FakeMessenger {
    next_id: AtomicI32,
    pub(crate) fail_uploads: AtomicBool,
    sends: Mutex<Vec<(ChatRef, String)>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    deletes: Mutex<Vec<MessageRef>>,
    copies: Mutex<Vec<(ChatRef, MessageId, ChatRef)>>,
    uploads: Mutex<Vec<(ChatRef, MediaUpload, bool)>>,
}

impl FakeMessenger {
    fn alloc(&self, chat: &ChatRef) -> MessageRef {
        MessageRef {
            chat: chat.clone(),
            message_id: MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        }
    }

    pub(crate) fn sent_html(&self) -> Vec<String> {
        self.sends.lock().unwrap().iter().map(|(_, s)| s.clone()).collect()
    }

    pub(crate) fn sends(&self) -> Vec<(ChatRef, String)> {
        self.sends.lock().unwrap().clone()
    }

    pub(crate) fn edits(&self) -> Vec<(MessageRef, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub(crate) fn deletes(&self) -> Vec<MessageRef> {
        self.deletes.lock().unwrap().clone()
    }

    pub(crate) fn copies(&self) -> Vec<(ChatRef, MessageId, ChatRef)> {
        self.copies.lock().unwrap().clone()
    }

    /// Uploads with whether the payload existed on disk at upload time.
    pub(crate) fn uploads(&self) -> Vec<(ChatRef, MediaUpload, bool)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send_html(&self, chat: &ChatRef, html: &str) -> Result<MessageRef> {
        self.sends
            .lock()
            .unwrap()
            .push((chat.clone(), html.to_string()));
        Ok(self.alloc(chat))
    }

    async fn edit_html(&self, msg: &MessageRef, html: &str) -> Result<()> {
        self.edits
            .lock()
            .unwrap()
            .push((msg.clone(), html.to_string()));
        Ok(())
    }

    async fn delete_message(&self, msg: &MessageRef) -> Result<()> {
        self.deletes.lock().unwrap().push(msg.clone());
        Ok(())
    }

    async fn copy_message(
        &self,
        from: &ChatRef,
        message_id: MessageId,
        to: &ChatRef,
    ) -> Result<MessageRef> {
        self.copies
            .lock()
            .unwrap()
            .push((from.clone(), message_id, to.clone()));
        Ok(self.alloc(to))
    }

    async fn send_media(&self, chat: &ChatRef, upload: &MediaUpload) -> Result<MessageRef> {
        let existed = upload.path.exists();
        self.uploads
            .lock()
            .unwrap()
            .push((chat.clone(), upload.clone(), existed));
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(Error::External("upload rejected".to_string()));
        }
        Ok(self.alloc(chat))
    }
}
