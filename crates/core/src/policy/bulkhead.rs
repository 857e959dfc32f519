//! Bulkhead tuning per adapter category
//!
//! Stateless fast protocols get many slots and a short acquire wait;
//! pool-bound and bulk-transfer adapters get few slots and a long wait.

use std::sync::Arc;
use std::time::Duration;

use relaygate_common::resilience::{BulkheadConfig, ThreadPoolConfig};
use relaygate_domain::{AdapterCategory, PolicyKey, Result};

use super::{config_error, CategoryTable};

/// Semaphore and thread-pool settings for one adapter category
#[derive(Debug, Clone)]
pub struct BulkheadPolicy {
    category: AdapterCategory,
    semaphore: BulkheadConfig,
    thread_pool: ThreadPoolConfig,
}

impl BulkheadPolicy {
    pub fn category(&self) -> AdapterCategory {
        self.category
    }

    pub fn semaphore(&self) -> &BulkheadConfig {
        &self.semaphore
    }

    pub fn thread_pool(&self) -> &ThreadPoolConfig {
        &self.thread_pool
    }

    /// Pool configuration for one key, with worker threads named after it
    pub fn thread_pool_for(&self, key: &PolicyKey) -> ThreadPoolConfig {
        ThreadPoolConfig {
            thread_name: format!("rg-{}-{}", key.adapter_type(), key.adapter_id()),
            ..self.thread_pool.clone()
        }
    }
}

fn build_policy(category: AdapterCategory) -> Result<BulkheadPolicy> {
    let secs = Duration::from_secs;
    let (max_concurrent, max_wait, core, max, queue, keep_alive) = match category {
        AdapterCategory::Http => (50, secs(2), 10, 20, 100, secs(60)),
        AdapterCategory::Database => (10, secs(10), 5, 10, 50, secs(120)),
        AdapterCategory::Messaging => (30, secs(5), 8, 16, 200, secs(60)),
        AdapterCategory::File => (5, secs(30), 2, 5, 20, secs(300)),
        AdapterCategory::CriticalSystem => (3, secs(60), 1, 3, 10, secs(600)),
        AdapterCategory::Default => (25, secs(5), 4, 8, 50, secs(60)),
    };

    let semaphore = BulkheadConfig::builder()
        .max_concurrent_calls(max_concurrent)
        .max_wait_duration(max_wait)
        .build()
        .map_err(|err| config_error(category, err))?;

    let thread_pool = ThreadPoolConfig {
        core_pool_size: core,
        max_pool_size: max,
        queue_capacity: queue,
        keep_alive,
        thread_name: format!("rg-{category}"),
    };
    thread_pool.validate().map_err(|err| config_error(category, err))?;

    Ok(BulkheadPolicy { category, semaphore, thread_pool })
}

/// Registry of bulkhead policies, one per category
#[derive(Debug, Clone)]
pub struct BulkheadPolicyRegistry {
    policies: CategoryTable<Arc<BulkheadPolicy>>,
}

impl BulkheadPolicyRegistry {
    pub fn new() -> Result<Self> {
        let policies = CategoryTable::try_build(|category| build_policy(category).map(Arc::new))?;
        Ok(Self { policies })
    }

    pub fn resolve(&self, adapter_type: &str) -> Arc<BulkheadPolicy> {
        Arc::clone(self.for_category(AdapterCategory::resolve(adapter_type)))
    }

    pub fn for_category(&self, category: AdapterCategory) -> &Arc<BulkheadPolicy> {
        self.policies.get(category)
    }

    pub fn iter(&self) -> impl Iterator<Item = (AdapterCategory, &Arc<BulkheadPolicy>)> + '_ {
        self.policies.iter()
    }
}
