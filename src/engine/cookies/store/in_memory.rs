use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use url::Url;

use super::{CookieChanges, CookieStore};
use crate::engine::cookies::{ChangeCause, CookieChange, CookieRecord, CookieWrite, PartitionId, SameSite};
use crate::engine::domain::{clean_domain, domain_matches};
use crate::engine::errors::SyncError;
use crate::engine::DEFAULT_CHANNEL_CAPACITY;

/// In-memory cookie database with one jar per partition.
///
/// Writes follow the browser rules the engine has to cope with: the partition
/// must exist, an explicit domain must cover the URL host, and
/// `SameSite=None` is refused unless the cookie is secure.
pub struct InMemoryCookieStore {
    jars: RwLock<BTreeMap<PartitionId, Vec<CookieRecord>>>,
    writes: Mutex<Vec<CookieWrite>>,
    tx: broadcast::Sender<CookieChange>,
}

impl InMemoryCookieStore {
    /// Creates a store with `normal` as its only partition.
    pub fn new(normal: impl Into<PartitionId>) -> Arc<Self> {
        let (tx, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        let mut jars = BTreeMap::new();
        jars.insert(normal.into(), Vec::new());
        Arc::new(Self {
            jars: RwLock::new(jars),
            writes: Mutex::new(Vec::new()),
            tx,
        })
    }

    pub fn open_partition(&self, id: impl Into<PartitionId>) {
        self.jars
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id.into())
            .or_default();
    }

    /// Drops a partition and all of its cookies, like closing the last private window.
    pub fn close_partition(&self, id: &PartitionId) {
        self.jars.write().unwrap_or_else(|e| e.into_inner()).remove(id);
    }

    /// Stores `cookie` as if a page had set it, and reports the change.
    pub fn set_cookie(&self, partition: impl Into<PartitionId>, cookie: CookieRecord) {
        let partition = partition.into();
        let overwrote = self.insert(&partition, cookie.clone());
        let _ = self.tx.send(CookieChange {
            cookie,
            partition,
            cause: if overwrote { ChangeCause::Overwrite } else { ChangeCause::Explicit },
            removed: false,
        });
    }

    /// Removes a cookie and reports the removal.
    pub fn remove_cookie(&self, partition: &PartitionId, name: &str, domain: &str) -> bool {
        let removed = {
            let mut jars = self.jars.write().unwrap_or_else(|e| e.into_inner());
            let Some(jar) = jars.get_mut(partition) else {
                return false;
            };
            let idx = jar.iter().position(|c| c.name == name && c.domain == domain);
            idx.map(|i| jar.remove(i))
        };

        match removed {
            Some(cookie) => {
                let _ = self.tx.send(CookieChange {
                    cookie,
                    partition: partition.clone(),
                    cause: ChangeCause::Explicit,
                    removed: true,
                });
                true
            }
            None => false,
        }
    }

    /// Current contents of a partition.
    pub fn cookies(&self, partition: &PartitionId) -> Vec<CookieRecord> {
        self.jars
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(partition)
            .cloned()
            .unwrap_or_default()
    }

    /// Every write request received so far, rejected ones included.
    pub fn writes(&self) -> Vec<CookieWrite> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn insert(&self, partition: &PartitionId, cookie: CookieRecord) -> bool {
        let mut jars = self.jars.write().unwrap_or_else(|e| e.into_inner());
        let jar = jars.entry(partition.clone()).or_default();
        match jar
            .iter_mut()
            .find(|c| c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path)
        {
            Some(existing) => {
                *existing = cookie;
                true
            }
            None => {
                jar.push(cookie);
                false
            }
        }
    }

    fn check_write(&self, write: &CookieWrite) -> Result<CookieRecord, SyncError> {
        let url = Url::parse(&write.url)
            .map_err(|e| SyncError::MalformedInput(format!("{}: {e}", write.url)))?;
        let host = url
            .host_str()
            .ok_or_else(|| SyncError::MalformedInput(format!("{} has no host", write.url)))?;

        if write.same_site == Some(SameSite::NoRestriction) && write.secure != Some(true) {
            return Err(SyncError::TransientWrite(format!(
                "{}: SameSite=None requires Secure",
                write.name
            )));
        }

        let domain = match &write.domain {
            Some(d) => {
                if !domain_matches(host, d) || clean_domain(d).len() > host.len() {
                    return Err(SyncError::TransientWrite(format!(
                        "{}: domain {d} does not cover {host}",
                        write.name
                    )));
                }
                format!(".{}", clean_domain(d))
            }
            None => host.to_string(),
        };

        Ok(CookieRecord {
            name: write.name.clone(),
            value: write.value.clone(),
            host_only: write.domain.is_none(),
            domain,
            path: write.path.clone(),
            secure: write.secure.unwrap_or(false),
            http_only: write.http_only.unwrap_or(false),
            same_site: write.same_site.unwrap_or_default(),
            expiration_date: write.expiration_date,
        })
    }
}

#[async_trait]
impl CookieStore for InMemoryCookieStore {
    async fn list_partitions(&self) -> Result<Vec<PartitionId>, SyncError> {
        Ok(self.jars.read().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect())
    }

    async fn list_cookies(&self, domain: &str, partition: &PartitionId) -> Result<Vec<CookieRecord>, SyncError> {
        let jars = self.jars.read().unwrap_or_else(|e| e.into_inner());
        let jar = jars
            .get(partition)
            .ok_or_else(|| SyncError::Host(format!("no such partition: {partition}")))?;

        let domain = clean_domain(domain);
        Ok(jar
            .iter()
            .filter(|c| {
                let cd = c.clean_domain();
                cd == domain || cd.ends_with(&format!(".{domain}"))
            })
            .cloned()
            .collect())
    }

    async fn write_cookie(&self, write: &CookieWrite) -> Result<CookieRecord, SyncError> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).push(write.clone());

        let exists = self
            .jars
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&write.partition);
        if !exists {
            return Err(SyncError::Host(format!("no such partition: {}", write.partition)));
        }

        let record = self.check_write(write)?;
        self.set_cookie(write.partition.clone(), record.clone());
        Ok(record)
    }

    fn subscribe(&self) -> CookieChanges {
        self.tx.subscribe()
    }
}
