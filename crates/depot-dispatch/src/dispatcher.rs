use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use depot_protocol::{Inbound, LineCodec, Outbound};
use depot_queue::UploadQueue;
use depot_status::StatusLedger;
use tracing::{debug, info};

use crate::credentials::CredentialStore;
use crate::error::DispatchResult;

/// Counters for one [`Dispatcher::serve`] run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServeStats {
    pub received: u64,
    pub sent: u64,
}

/// Maps inbound messages onto the queue, the ledger and the credential store.
pub struct Dispatcher {
    queue: Arc<UploadQueue>,
    ledger: Arc<StatusLedger>,
    credentials: Arc<dyn CredentialStore>,
    /// Set once a refill has been asked for; cleared by the next `SaveLogin`.
    refill_requested: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<UploadQueue>,
        ledger: Arc<StatusLedger>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            queue,
            ledger,
            credentials,
            refill_requested: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &UploadQueue {
        &self.queue
    }

    pub fn ledger(&self) -> &StatusLedger {
        &self.ledger
    }

    pub fn credentials(&self) -> &dyn CredentialStore {
        self.credentials.as_ref()
    }

    /// React to one message and collect the replies.
    pub fn react(&self, message: Inbound) -> DispatchResult<Vec<Outbound>> {
        let mut replies = Vec::new();
        self.react_with(message, |reply| {
            replies.push(reply);
            Ok(())
        })?;
        Ok(replies)
    }

    /// React to one message, handing each reply to `send`.
    ///
    /// For `QueueTick`, `send` runs before the delivered upload is removed
    /// from the queue: if it fails, the upload stays queued.
    pub fn react_with<F>(&self, message: Inbound, mut send: F) -> DispatchResult<()>
    where
        F: FnMut(Outbound) -> DispatchResult<()>,
    {
        debug!(kind = message.type_name(), "dispatching");
        match message {
            Inbound::SaveLogin {
                username,
                password_hash,
            } => {
                self.credentials.save_login(&username, &password_hash)?;
                self.refill_requested.store(false, Ordering::SeqCst);
            }
            Inbound::RemoveLogin { username } => {
                self.credentials.remove_login(&username)?;
                let dropped = self.ledger.remove_owner(&username)?;
                info!(user = %username, tracked = dropped.len(), "user removed");
            }
            Inbound::QueueTick => {
                if !self.refill_requested.load(Ordering::SeqCst) && self.credentials.is_empty()? {
                    info!("user database is empty; requesting refill");
                    send(Outbound::AfterDbCleanup)?;
                    self.refill_requested.store(true, Ordering::SeqCst);
                }

                let delivered = self.queue.pop_with_cleanup(|acquired| {
                    let data = acquired.read()?;
                    let request = acquired.request();
                    send(Outbound::Upload {
                        username: request.username.clone(),
                        submission_id: request.submission_id.clone(),
                        b64_data: STANDARD.encode(&data),
                        metadata: request.metadata.clone(),
                    })
                })?;
                if delivered.is_none() {
                    debug!("queue tick: nothing queued");
                }
            }
            Inbound::StatusUpdate(update) => {
                self.ledger.record_update(&update)?;
            }
        }
        Ok(())
    }

    /// Decode and react to one line of input.
    pub fn handle_line(&self, line: &[u8]) -> DispatchResult<Vec<Outbound>> {
        self.react(LineCodec::decode_inbound(line)?)
    }

    /// Read JSON-lines messages until end of input, writing replies as they
    /// are produced. Stops at the first error, including an unknown message
    /// type.
    pub fn serve<R: BufRead, W: Write>(&self, reader: &mut R, writer: &mut W) -> DispatchResult<ServeStats> {
        let mut stats = ServeStats::default();
        while let Some(frame) = LineCodec::read_frame(reader)? {
            let message = LineCodec::decode_inbound(&frame)?;
            stats.received += 1;
            self.react_with(message, |reply| {
                LineCodec::write_frame(writer, &reply)?;
                stats.sent += 1;
                Ok(())
            })?;
        }
        info!(received = stats.received, sent = stats.sent, "input exhausted");
        Ok(stats)
    }
}
