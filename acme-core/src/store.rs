//! Transactional persistence contract (§6.3) and its in-memory reference
//! implementation (§10.2).
//!
//! `Store::begin` opens a [`Session`]: reads made through a session are
//! repeatable for its lifetime, and writes staged with `add` become visible
//! to everyone else only on `commit`. The in-memory implementation gets this
//! by cloning the entities a session touches into a local overlay and
//! merging that overlay into the shared maps behind a single write mutex at
//! commit time — the moral equivalent of snapshot isolation without needing
//! an actual database underneath.
//!
//! Background tasks (the validator, the finalize engine, the relay adapter)
//! always open their own session; none of them is handed a session that
//! outlives the request that spawned them (§5 ordering guarantees).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Account, Authorization, ChangeLog, Challenge, Certificate, Identifier, Order};

/// Any entity the store knows how to stage and persist.
#[derive(Debug, Clone)]
pub enum Entity {
    Account(Account),
    Order(Order),
    Identifier(Identifier),
    Authorization(Authorization),
    Challenge(Challenge),
    Certificate(Certificate),
}

impl Entity {
    fn change_log_ref(&self) -> String {
        match self {
            Entity::Account(a) => format!("account:{}", a.kid),
            Entity::Order(o) => format!("order:{}", o.id),
            Entity::Identifier(i) => format!("identifier:{}", i.id),
            Entity::Authorization(a) => format!("authorization:{}", a.id),
            Entity::Challenge(c) => format!("challenge:{}", c.id),
            Entity::Certificate(c) => format!("certificate:{}", c.id),
        }
    }
}

/// A single transactional unit of work against the store.
#[async_trait]
pub trait Session: Send {
    async fn get_account(&mut self, kid: &str) -> Result<Option<Account>>;
    async fn get_account_by_key_thumbprint(
        &mut self,
        thumbprint: &[u8; 32],
    ) -> Result<Option<Account>>;
    async fn get_order(&mut self, id: Uuid) -> Result<Option<Order>>;
    async fn get_orders_for_account(&mut self, kid: &str) -> Result<Vec<Order>>;
    async fn get_identifier(&mut self, id: u64) -> Result<Option<Identifier>>;
    async fn get_identifiers_for_order(&mut self, order_id: Uuid) -> Result<Vec<Identifier>>;
    async fn get_authorization(&mut self, id: Uuid) -> Result<Option<Authorization>>;
    async fn get_authorizations_for_order(&mut self, order_id: Uuid) -> Result<Vec<Authorization>>;
    async fn get_challenge(&mut self, id: Uuid) -> Result<Option<Challenge>>;
    async fn get_challenges_for_authorization(
        &mut self,
        authorization_id: Uuid,
    ) -> Result<Vec<Challenge>>;
    async fn delete_challenge(&mut self, id: Uuid) -> Result<()>;
    async fn get_certificate(&mut self, id: Uuid) -> Result<Option<Certificate>>;
    async fn get_certificate_by_order(&mut self, order_id: Uuid) -> Result<Option<Certificate>>;
    /// Revoke-cert's certificate-key auth mode (§4.7) has only the DER to
    /// go on, not an id.
    async fn find_certificate_by_der(&mut self, der: &[u8]) -> Result<Option<Certificate>>;

    /// Allocate the next local identifier id (§3: `identifier_id` is a
    /// "local int"), shared across every session this store hands out.
    async fn next_identifier_id(&mut self) -> Result<u64>;

    /// Stage an entity write. Not visible to other sessions until `commit`.
    fn add(&mut self, entity: Entity);

    /// No-op for the in-memory store (writes are already staged locally);
    /// present so a real database backend has somewhere to push writes
    /// ahead of commit without changing the trait.
    async fn flush(&mut self) -> Result<()>;

    /// Atomically merge staged writes into the shared store and append a
    /// `ChangeLog` row per mutated entity.
    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Session>>;
}

#[derive(Default)]
struct StoreData {
    accounts: HashMap<String, Account>,
    orders: HashMap<Uuid, Order>,
    identifiers: HashMap<u64, Identifier>,
    authorizations: HashMap<Uuid, Authorization>,
    challenges: HashMap<Uuid, Challenge>,
    certificates: HashMap<Uuid, Certificate>,
    change_log: Vec<ChangeLog>,
}

/// In-memory reference `Store` (§10.2). Not a toy: it enforces the §3
/// entity invariants it's in a position to check (the account/key bijection)
/// at the point of merge, and every session's writes become visible
/// atomically.
pub struct InMemoryStore {
    data: Arc<Mutex<StoreData>>,
    identifier_ids: Arc<AtomicU64>,
    change_log_ids: Arc<AtomicU64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(StoreData::default())),
            identifier_ids: Arc::new(AtomicU64::new(1)),
            change_log_ids: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemorySession {
    data: Arc<Mutex<StoreData>>,
    change_log_ids: Arc<AtomicU64>,
    identifier_ids: Arc<AtomicU64>,
    pending: Vec<Entity>,
    deleted_challenges: Vec<Uuid>,
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(InMemorySession {
            data: self.data.clone(),
            change_log_ids: self.change_log_ids.clone(),
            identifier_ids: self.identifier_ids.clone(),
            pending: Vec::new(),
            deleted_challenges: Vec::new(),
        }))
    }
}

impl InMemorySession {
    /// A session's own uncommitted writes shadow the shared store, so a
    /// handler that writes then reads back within the same session sees its
    /// own write.
    fn pending_account(&self, kid: &str) -> Option<Account> {
        self.pending.iter().rev().find_map(|e| match e {
            Entity::Account(a) if a.kid == kid => Some(a.clone()),
            _ => None,
        })
    }

    fn pending_order(&self, id: Uuid) -> Option<Order> {
        self.pending.iter().rev().find_map(|e| match e {
            Entity::Order(o) if o.id == id => Some(o.clone()),
            _ => None,
        })
    }
}

#[async_trait]
impl Session for InMemorySession {
    async fn get_account(&mut self, kid: &str) -> Result<Option<Account>> {
        if let Some(account) = self.pending_account(kid) {
            return Ok(Some(account));
        }
        let data = self.data.lock().await;
        Ok(data.accounts.get(kid).cloned())
    }

    async fn get_account_by_key_thumbprint(
        &mut self,
        thumbprint: &[u8; 32],
    ) -> Result<Option<Account>> {
        for entity in self.pending.iter().rev() {
            if let Entity::Account(a) = entity {
                if &a.key.thumbprint() == thumbprint {
                    return Ok(Some(a.clone()));
                }
            }
        }
        let data = self.data.lock().await;
        Ok(data
            .accounts
            .values()
            .find(|a| &a.key.thumbprint() == thumbprint)
            .cloned())
    }

    async fn get_order(&mut self, id: Uuid) -> Result<Option<Order>> {
        if let Some(order) = self.pending_order(id) {
            return Ok(Some(order));
        }
        let data = self.data.lock().await;
        Ok(data.orders.get(&id).cloned())
    }

    async fn get_orders_for_account(&mut self, kid: &str) -> Result<Vec<Order>> {
        let data = self.data.lock().await;
        let mut out: Vec<Order> = data.orders.values().filter(|o| o.kid == kid).cloned().collect();
        for entity in &self.pending {
            if let Entity::Order(o) = entity {
                if o.kid == kid {
                    out.retain(|existing| existing.id != o.id);
                    out.push(o.clone());
                }
            }
        }
        Ok(out)
    }

    async fn get_identifier(&mut self, id: u64) -> Result<Option<Identifier>> {
        for entity in self.pending.iter().rev() {
            if let Entity::Identifier(i) = entity {
                if i.id == id {
                    return Ok(Some(i.clone()));
                }
            }
        }
        let data = self.data.lock().await;
        Ok(data.identifiers.get(&id).cloned())
    }

    async fn get_identifiers_for_order(&mut self, order_id: Uuid) -> Result<Vec<Identifier>> {
        let data = self.data.lock().await;
        let mut out: Vec<Identifier> = data
            .identifiers
            .values()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect();
        for entity in &self.pending {
            if let Entity::Identifier(i) = entity {
                if i.order_id == order_id && !out.iter().any(|e| e.id == i.id) {
                    out.push(i.clone());
                }
            }
        }
        out.sort_by_key(|i| i.id);
        Ok(out)
    }

    async fn get_authorization(&mut self, id: Uuid) -> Result<Option<Authorization>> {
        for entity in self.pending.iter().rev() {
            if let Entity::Authorization(a) = entity {
                if a.id == id {
                    return Ok(Some(a.clone()));
                }
            }
        }
        let data = self.data.lock().await;
        Ok(data.authorizations.get(&id).cloned())
    }

    async fn get_authorizations_for_order(&mut self, order_id: Uuid) -> Result<Vec<Authorization>> {
        let data = self.data.lock().await;
        let mut out: Vec<Authorization> = data
            .authorizations
            .values()
            .filter(|a| a.order_id == order_id)
            .cloned()
            .collect();
        for entity in &self.pending {
            if let Entity::Authorization(a) = entity {
                if a.order_id == order_id {
                    out.retain(|existing| existing.id != a.id);
                    out.push(a.clone());
                }
            }
        }
        Ok(out)
    }

    async fn get_challenge(&mut self, id: Uuid) -> Result<Option<Challenge>> {
        if self.deleted_challenges.contains(&id) {
            return Ok(None);
        }
        for entity in self.pending.iter().rev() {
            if let Entity::Challenge(c) = entity {
                if c.id == id {
                    return Ok(Some(c.clone()));
                }
            }
        }
        let data = self.data.lock().await;
        Ok(data.challenges.get(&id).cloned())
    }

    async fn get_challenges_for_authorization(
        &mut self,
        authorization_id: Uuid,
    ) -> Result<Vec<Challenge>> {
        let data = self.data.lock().await;
        let mut out: Vec<Challenge> = data
            .challenges
            .values()
            .filter(|c| c.authorization_id == authorization_id)
            .cloned()
            .collect();
        for entity in &self.pending {
            if let Entity::Challenge(c) = entity {
                if c.authorization_id == authorization_id {
                    out.retain(|existing| existing.id != c.id);
                    out.push(c.clone());
                }
            }
        }
        out.retain(|c| !self.deleted_challenges.contains(&c.id));
        Ok(out)
    }

    async fn delete_challenge(&mut self, id: Uuid) -> Result<()> {
        self.deleted_challenges.push(id);
        self.pending.retain(|e| !matches!(e, Entity::Challenge(c) if c.id == id));
        Ok(())
    }

    async fn get_certificate(&mut self, id: Uuid) -> Result<Option<Certificate>> {
        for entity in self.pending.iter().rev() {
            if let Entity::Certificate(c) = entity {
                if c.id == id {
                    return Ok(Some(c.clone()));
                }
            }
        }
        let data = self.data.lock().await;
        Ok(data.certificates.get(&id).cloned())
    }

    async fn get_certificate_by_order(&mut self, order_id: Uuid) -> Result<Option<Certificate>> {
        for entity in self.pending.iter().rev() {
            if let Entity::Certificate(c) = entity {
                if c.order_id == order_id {
                    return Ok(Some(c.clone()));
                }
            }
        }
        let data = self.data.lock().await;
        Ok(data.certificates.values().find(|c| c.order_id == order_id).cloned())
    }

    async fn find_certificate_by_der(&mut self, der: &[u8]) -> Result<Option<Certificate>> {
        for entity in self.pending.iter().rev() {
            if let Entity::Certificate(c) = entity {
                if c.der == der {
                    return Ok(Some(c.clone()));
                }
            }
        }
        let data = self.data.lock().await;
        Ok(data.certificates.values().find(|c| c.der == der).cloned())
    }

    async fn next_identifier_id(&mut self) -> Result<u64> {
        Ok(self.identifier_ids.fetch_add(1, Ordering::Relaxed))
    }

    fn add(&mut self, entity: Entity) {
        self.pending.push(entity);
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut data = self.data.lock().await;

        // Account/key bijection (§3): reject a commit that would give two
        // accounts the same public key.
        for entity in &self.pending {
            if let Entity::Account(incoming) = entity {
                if let Some(existing) = data
                    .accounts
                    .values()
                    .find(|a| a.key.thumbprint() == incoming.key.thumbprint())
                {
                    if existing.kid != incoming.kid {
                        return Err(Error::Internal(
                            "account/key bijection violated: key already bound to another kid"
                                .to_string(),
                        ));
                    }
                }
            }
        }

        let now = OffsetDateTime::now_utc();
        for id in self.deleted_challenges {
            data.challenges.remove(&id);
            data.change_log.push(ChangeLog {
                id: self.change_log_ids.fetch_add(1, Ordering::Relaxed),
                timestamp: now,
                actor: "core".to_string(),
                entity_ref: format!("challenge:{id}:deleted"),
            });
        }

        for entity in self.pending {
            let change_ref = entity.change_log_ref();
            match entity {
                Entity::Account(a) => {
                    data.accounts.insert(a.kid.clone(), a);
                }
                Entity::Order(o) => {
                    data.orders.insert(o.id, o);
                }
                Entity::Identifier(i) => {
                    data.identifiers.insert(i.id, i);
                }
                Entity::Authorization(a) => {
                    data.authorizations.insert(a.id, a);
                }
                Entity::Challenge(c) => {
                    data.challenges.insert(c.id, c);
                }
                Entity::Certificate(c) => {
                    data.certificates.insert(c.id, c);
                }
            }
            data.change_log.push(ChangeLog {
                id: self.change_log_ids.fetch_add(1, Ordering::Relaxed),
                timestamp: now,
                actor: "core".to_string(),
                entity_ref: change_ref,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountStatus, Jwk};

    fn jwk(n: &str) -> Jwk {
        Jwk {
            kty: "RSA".to_string(),
            n: n.to_string(),
            e: "AQAB".to_string(),
        }
    }

    fn account(kid: &str, n: &str) -> Account {
        Account {
            kid: kid.to_string(),
            key: jwk(n),
            status: AccountStatus::Valid,
            contacts: vec![],
            tos_agreed: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn commit_makes_writes_visible_to_new_sessions() {
        let store = InMemoryStore::new();
        let mut session = store.begin().await.unwrap();
        session.add(Entity::Account(account("kid-1", "mod-1")));
        session.commit().await.unwrap();

        let mut session2 = store.begin().await.unwrap();
        assert!(session2.get_account("kid-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible_to_other_sessions() {
        let store = InMemoryStore::new();
        let mut session = store.begin().await.unwrap();
        session.add(Entity::Account(account("kid-1", "mod-1")));

        let mut session2 = store.begin().await.unwrap();
        assert!(session2.get_account("kid-1").await.unwrap().is_none());

        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_two_accounts_sharing_a_key() {
        let store = InMemoryStore::new();
        let mut session = store.begin().await.unwrap();
        session.add(Entity::Account(account("kid-1", "same-mod")));
        session.commit().await.unwrap();

        let mut session2 = store.begin().await.unwrap();
        session2.add(Entity::Account(account("kid-2", "same-mod")));
        assert!(session2.commit().await.is_err());
    }
}
