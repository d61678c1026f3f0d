//! Roomcrypt runtime.
//!
//! Tokio "glue" that executes the actions of [`roomcrypt_client`]'s state
//! machines against real collaborators.
//!
//! # Architecture
//!
//! Two workers, each a task owning one state machine:
//!
//! - the encrypting worker owns the [`OutboundSessionManager`]
//! - the decrypting worker owns the [`Decryptor`] (inbound registry, pending
//!   queue, key request tracker)
//!
//! Both read commands from an `mpsc` inbox. Directory lookups and to-device
//! sends run as spawned tasks whose completions are posted back into the
//! owning worker's inbox, so a worker never waits on the network. Callers
//! talk to the workers through a [`CryptoHandle`] and get results on
//! `oneshot` channels. Events decrypted after their key arrives are pushed
//! to the unbounded completion channel returned by [`start`].
//!
//! Workers never wait on each other: a handoff into a full inbox is posted
//! from a spawned task instead.
//!
//! ```text
//!            CryptoHandle
//!            │          │
//!            ▼          ▼
//!   encrypting worker ◄──── reshare requests ───── decrypting worker
//!            │  └──── own sessions, share outcomes ────►  │
//!            ▼                                            ▼
//!   directory / messenger                    messenger / completions
//! ```
//!
//! # Components
//!
//! - [`start`]: load the registry and spawn both workers
//! - [`CryptoHandle`]: async API (`encrypt`, `decrypt`, `receive_to_device`)
//! - [`SystemEnv`]: production environment (real time, crypto RNG)
//! - [`MemoryStore`], [`RedbStore`]: [`Store`] implementations

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod decrypting;
mod delivery;
mod encrypting;
mod handle;
pub mod storage;
mod system_env;

use std::collections::HashMap;

pub use config::RuntimeConfig;
pub use handle::{CryptoHandle, Redecrypted};
use roomcrypt_client::{Decryptor, DeviceIdentity, LogLevel, OutboundSessionManager};
use roomcrypt_core::{
    DeviceDirectory, DeviceMessenger, Environment, RatchetEngine, SessionRegistry, StorageError,
    Store,
};
pub use storage::{MemoryStore, RedbStore};
pub use system_env::SystemEnv;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{decrypting::DecryptingWorker, encrypting::EncryptingWorker};

/// External services the workers call.
#[derive(Clone)]
pub struct Collaborators<D, M, S> {
    /// Device discovery
    pub directory: D,
    /// To-device delivery
    pub messenger: M,
    /// Session persistence
    pub store: S,
}

/// Load persisted sessions and spawn both workers.
///
/// Must be called inside a Tokio runtime. The workers stop once every
/// [`CryptoHandle`] is dropped and their in-flight calls have completed.
///
/// # Errors
///
/// Returns the store's error if persisted sessions cannot be loaded.
pub fn start<E, R, D, M, S>(
    env: E,
    engine: R,
    identity: DeviceIdentity,
    collaborators: Collaborators<D, M, S>,
    config: RuntimeConfig,
) -> Result<(CryptoHandle, mpsc::UnboundedReceiver<Redecrypted>), StorageError>
where
    E: Environment,
    R: RatchetEngine,
    D: DeviceDirectory,
    M: DeviceMessenger,
    S: Store,
{
    let Collaborators { directory, messenger, store } = collaborators;
    let (outbound, inbound) = SessionRegistry::load(&store)?.into_parts();
    tracing::info!(
        "{} loaded {} outbound and {} inbound session(s)",
        identity.device_key(),
        outbound.len(),
        inbound.len()
    );

    let (encrypt_tx, encrypt_rx) = mpsc::channel(config.command_capacity);
    let (decrypt_tx, decrypt_rx) = mpsc::channel(config.command_capacity);
    let (completion_tx, completion_rx) = mpsc::unbounded_channel();

    let manager = OutboundSessionManager::new(
        env.clone(),
        engine.clone(),
        identity.clone(),
        config.encryption,
        outbound,
    );
    let decryptor = Decryptor::new(env, engine, identity, config.decryption, inbound);

    let encrypting = EncryptingWorker {
        manager,
        directory,
        messenger: messenger.clone(),
        store: store.clone(),
        inbox: encrypt_rx,
        loopback: encrypt_tx.downgrade(),
        decryptor: decrypt_tx.downgrade(),
        replies: HashMap::new(),
        next_request_id: 0,
    };
    let decrypting = DecryptingWorker {
        decryptor,
        messenger,
        store,
        inbox: decrypt_rx,
        loopback: decrypt_tx.downgrade(),
        encryptor: encrypt_tx.downgrade(),
        completions: completion_tx,
    };

    tokio::spawn(encrypting.run());
    tokio::spawn(decrypting.run());

    Ok((CryptoHandle::new(encrypt_tx, decrypt_tx), completion_rx))
}

/// Post `command` to a worker through a non-owning sender without waiting.
///
/// If the worker's inbox is full the command is sent from a spawned task.
/// Returns false if the worker is gone.
pub(crate) fn forward<T: Send + 'static>(target: &mpsc::WeakSender<T>, command: T) -> bool {
    let Some(sender) = target.upgrade() else {
        return false;
    };
    match sender.try_send(command) {
        Ok(()) => true,
        Err(TrySendError::Full(command)) => {
            tokio::spawn(async move {
                if sender.send(command).await.is_err() {
                    tracing::debug!("worker stopped before a deferred handoff");
                }
            });
            true
        },
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Emit a state machine log action through `tracing`.
pub(crate) fn log(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => tracing::debug!("{}", message),
        LogLevel::Info => tracing::info!("{}", message),
        LogLevel::Warn => tracing::warn!("{}", message),
        LogLevel::Error => tracing::error!("{}", message),
    }
}
