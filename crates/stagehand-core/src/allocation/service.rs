//! AllocationService - pool ごとの subnet 割り当て（optimistic concurrency）
//!
//! # フロー（read-compute-write）
//! 1. allocation document を読む
//! 2. 現在の `assigned` から次の値を決める（純粋関数）
//! 3. 読んだ version を期待値に `compare_and_put`
//! 4. version conflict なら ConflictRetry に従って 1 からやり直す
//!
//! 明示的なロックは使わない。並行する allocate は store の version 検査で直列化される。

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::cidr::{Ipv4Cidr, next_free_block};
use super::state::{AllocationRequest, AllocationRequestType, AllocationState, PoolSpec};
use crate::app::ConflictRetry;
use crate::domain::{AllocationError, DocumentLink, StoreError, TaskDocument, TaskStage, TaskType};
use crate::ports::DocumentStore;

pub const TASK_TYPE: &str = "cidr-allocation";
pub const FACTORY_LINK: &str = "/cidr-allocations";
const ACTIVE: &str = "ACTIVE";

pub struct AllocationService {
    store: Arc<dyn DocumentStore>,
    retry: ConflictRetry,
}

impl AllocationService {
    pub fn new(store: Arc<dyn DocumentStore>, retry: ConflictRetry) -> Self {
        Self { store, retry }
    }

    /// Allocation document link for a pool (`/cidr-allocations/{pool link with '-'}`)
    pub fn link_for(pool_link: &str) -> DocumentLink {
        DocumentLink::new(format!(
            "{FACTORY_LINK}/{}",
            pool_link.trim_matches('/').replace('/', "-")
        ))
    }

    /// 作成済みなら何もせずに link を返す
    pub async fn create_pool(&self, spec: PoolSpec) -> Result<DocumentLink, AllocationError> {
        if spec.pool_link.trim_matches('/').is_empty() {
            return Err(AllocationError::Validation("pool link must not be empty".into()));
        }
        let network: Ipv4Cidr = spec.network_cidr.parse()?;
        check_prefix(&network, spec.prefix_length)?;

        let link = Self::link_for(&spec.pool_link);
        let state = AllocationState {
            pool_link: spec.pool_link,
            network_cidr: network.to_string(),
            prefix_length: spec.prefix_length,
            ..Default::default()
        };
        let payload =
            serde_json::to_value(&state).map_err(|e| AllocationError::Codec(e.to_string()))?;
        let mut doc = TaskDocument::new(link.clone(), TaskType::new(TASK_TYPE), ACTIVE, payload);
        doc.stage = TaskStage::Started;

        match self.store.create(doc).await {
            Ok(_) => {
                info!(%link, network = %network, prefix = spec.prefix_length, "Created allocation pool");
                Ok(link)
            }
            Err(StoreError::AlreadyExists(_)) => {
                debug!(%link, "Allocation pool already exists");
                Ok(link)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `{requestType: ALLOCATE|DEALLOCATE, consumerKey}` を処理して現在の state を返す
    pub async fn handle(
        &self,
        link: &DocumentLink,
        request: &AllocationRequest,
    ) -> Result<AllocationState, AllocationError> {
        if request.consumer_key.is_empty() {
            return Err(AllocationError::Validation("consumer key must not be empty".into()));
        }
        match request.request_type {
            AllocationRequestType::Allocate => self.assign(link, &request.consumer_key).await,
            AllocationRequestType::Deallocate => self.release(link, &request.consumer_key).await,
        }
    }

    /// 割り当て済みの key には同じ値を返す（書き込みなし）
    pub async fn allocate(
        &self,
        link: &DocumentLink,
        consumer_key: &str,
    ) -> Result<String, AllocationError> {
        let state = self
            .handle(link, &AllocationRequest::allocate(consumer_key))
            .await?;
        state
            .assigned_to(consumer_key)
            .map(str::to_string)
            .ok_or_else(|| AllocationError::Validation(format!("{consumer_key} was not assigned")))
    }

    /// 未割り当ての key は no-op
    pub async fn deallocate(
        &self,
        link: &DocumentLink,
        consumer_key: &str,
    ) -> Result<AllocationState, AllocationError> {
        self.handle(link, &AllocationRequest::deallocate(consumer_key))
            .await
    }

    /// subnet の prefix を変える。何も割り当てられていないときだけ。
    pub async fn reconfigure(
        &self,
        link: &DocumentLink,
        prefix_length: u8,
    ) -> Result<AllocationState, AllocationError> {
        self.update(link, |state| {
            if state.prefix_length == prefix_length {
                return Ok(false);
            }
            if !state.assigned.is_empty() {
                return Err(AllocationError::Validation(format!(
                    "{} subnets are assigned; prefix length cannot change",
                    state.assigned.len()
                )));
            }
            let network: Ipv4Cidr = state.network_cidr.parse()?;
            check_prefix(&network, prefix_length)?;
            state.prefix_length = prefix_length;
            Ok(true)
        })
        .await
    }

    pub async fn state(&self, link: &DocumentLink) -> Result<AllocationState, AllocationError> {
        let doc = self.document(link).await?;
        decode(&doc)
    }

    async fn assign(
        &self,
        link: &DocumentLink,
        consumer_key: &str,
    ) -> Result<AllocationState, AllocationError> {
        let state = self
            .update(link, |state| {
                if state.assigned.contains_key(consumer_key) {
                    return Ok(false);
                }
                let network: Ipv4Cidr = state.network_cidr.parse()?;
                let block = next_free_block(&network, state.prefix_length, state.assigned.values())
                    .ok_or_else(|| AllocationError::PoolExhausted {
                        link: link.clone(),
                        capacity: network.block_count(state.prefix_length),
                    })?;
                let value = block.to_string();
                state.assigned.insert(consumer_key.to_string(), value.clone());
                state.last_assigned_value = Some(value);
                Ok(true)
            })
            .await?;
        debug!(
            %link,
            consumer_key,
            subnet = ?state.assigned_to(consumer_key),
            "Allocated subnet"
        );
        Ok(state)
    }

    async fn release(
        &self,
        link: &DocumentLink,
        consumer_key: &str,
    ) -> Result<AllocationState, AllocationError> {
        let state = self
            .update(link, |state| Ok(state.assigned.remove(consumer_key).is_some()))
            .await?;
        debug!(%link, consumer_key, "Released subnet");
        Ok(state)
    }

    async fn document(&self, link: &DocumentLink) -> Result<TaskDocument, AllocationError> {
        self.store
            .get(link)
            .await?
            .ok_or_else(|| AllocationError::PoolNotFound(link.clone()))
    }

    /// read-compute-write の CAS loop
    ///
    /// `mutate` が false を返したら書き込まずにその state を返す。
    async fn update<F>(
        &self,
        link: &DocumentLink,
        mut mutate: F,
    ) -> Result<AllocationState, AllocationError>
    where
        F: FnMut(&mut AllocationState) -> Result<bool, AllocationError> + Send,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let current = self.document(link).await?;
            let mut state = decode(&current)?;
            if !mutate(&mut state)? {
                return Ok(state);
            }

            let mut next = current.clone();
            next.payload =
                serde_json::to_value(&state).map_err(|e| AllocationError::Codec(e.to_string()))?;
            match self.store.compare_and_put(next, current.version).await {
                Ok(_) => return Ok(state),
                Err(StoreError::VersionConflict { .. }) if !self.retry.exhausted(attempt) => {
                    let delay = self.retry.next_delay(attempt);
                    debug!(%link, attempt, ?delay, "Allocation conflict, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(StoreError::VersionConflict { .. }) => {
                    warn!(%link, attempts = attempt, "Giving up on allocation after conflicting writes");
                    return Err(AllocationError::ConflictRetriesExhausted {
                        link: link.clone(),
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn check_prefix(network: &Ipv4Cidr, prefix_length: u8) -> Result<(), AllocationError> {
    if network.prefix() == 0 || network.prefix() >= prefix_length || prefix_length >= 32 {
        return Err(AllocationError::Validation(format!(
            "subnet prefix /{prefix_length} does not fit network {network}"
        )));
    }
    Ok(())
}

fn decode(doc: &TaskDocument) -> Result<AllocationState, AllocationError> {
    serde_json::from_value(doc.payload.clone())
        .map_err(|e| AllocationError::Codec(format!("{}: {e}", doc.document_link)))
}
