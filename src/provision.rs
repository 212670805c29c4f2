//! Credential provisioning (registration mode).

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::barrier::CountDownLatch;
use crate::config::ProvisionConfig;
use crate::credentials::{ClientRecord, CredentialWriter};
use crate::error::{Error, Result};
use crate::register::Registrar;

/// Device id for client `index`: current second of the minute followed by
/// the index. Ids from different seconds may collide.
#[must_use]
pub fn device_id(index: usize) -> String {
    let second = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() % 60)
        .unwrap_or(0);
    format!("{}{}", second, index)
}

/// Register one client.
///
/// # Errors
///
/// Any registration failure, including a non-zero service code.
pub async fn provision<R: Registrar>(registrar: &R, index: usize) -> Result<ClientRecord> {
    let device = device_id(index);
    let registration = registrar.register(&device).await?;
    debug!(client = index, device_id = %device, client_id = %registration.client_id, "registered");
    Ok(ClientRecord::new(
        index,
        registration.client_id,
        registration.username,
        registration.password,
    ))
}

/// Register `config.clients` clients concurrently, one task each, writing
/// every record to `writer` as it arrives.
///
/// Returns the records sorted by index. The first failure aborts the
/// remaining tasks.
pub async fn provision_fleet<R: Registrar>(
    registrar: Arc<R>,
    writer: Arc<CredentialWriter>,
    config: &ProvisionConfig,
) -> Result<Vec<ClientRecord>> {
    let registered = Arc::new(CountDownLatch::new(config.clients));
    let mut tasks = JoinSet::new();

    for index in 0..config.clients {
        let registrar = Arc::clone(&registrar);
        let writer = Arc::clone(&writer);
        let registered = Arc::clone(&registered);
        tasks.spawn(async move {
            let record = provision(&*registrar, index).await?;
            writer.write(&record).await?;
            registered.count_down();
            Ok::<_, Error>(record)
        });

        if !config.spawn_pacing.is_zero() {
            tokio::time::sleep(config.spawn_pacing).await;
        }
    }

    let mut records = Vec::with_capacity(config.clients);
    tokio::select! {
        () = registered.wait() => {}
        Some(failure) = first_failure(&mut tasks, &mut records) => return Err(failure),
    }

    while let Some(joined) = tasks.join_next().await {
        records.push(joined??);
    }
    writer.sync().await?;

    records.sort_by_key(|r| r.index);
    info!(clients = records.len(), "all clients registered");
    Ok(records)
}

/// Drain `tasks` until one fails, keeping successful results.
async fn first_failure<T>(
    tasks: &mut JoinSet<Result<T>>,
    done: &mut Vec<T>,
) -> Option<Error>
where
    T: Send + 'static,
{
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(value)) => done.push(value),
            Ok(Err(e)) => return Some(e),
            Err(e) => return Some(e.into()),
        }
    }
    None
}
