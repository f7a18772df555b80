//! Server-side statement state.
//!
//! Two handle caches back the dispatcher: prepared-statement contexts and
//! pending ad-hoc statement tickets. Both are bounded by size and idle
//! time; expiry is checked lazily on every access, so no background task
//! is involved. Entries are reference counted, so evicting one that still
//! has a call in flight only removes it from the cache, and the backend
//! resources close when the call releases the last reference.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use crate::backend::PreparedQuery;
use crate::error::ServerError;
use crate::protocol::CommandStatementQuery;

/// Opaque server-generated statement identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StatementHandle(Uuid);

impl StatementHandle {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse handle bytes received from a client. Anything that is not a
    /// handle this server could have issued is simply unknown.
    pub fn try_from_bytes(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.0.as_bytes())
    }
}

impl std::fmt::Display for StatementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounds for a [`HandleCache`].
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub capacity: usize,
    pub idle_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            idle_timeout: Duration::from_secs(600),
        }
    }
}

struct CacheEntry<V> {
    value: Arc<V>,
    last_used: Instant,
}

/// Size- and time-bounded handle store with LRU overflow eviction.
pub struct HandleCache<V> {
    inner: RwLock<HashMap<StatementHandle, CacheEntry<V>>>,
    config: CacheConfig,
}

impl<V> HandleCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Insert a new entry, returning whatever the sweep and the LRU bound
    /// pushed out.
    pub fn insert(&self, handle: StatementHandle, value: V) -> Vec<Arc<V>> {
        let mut inner = self.inner.write().expect("handle cache lock poisoned");
        let mut evicted = sweep_expired(&mut inner, self.config.idle_timeout);

        while inner.len() >= self.config.capacity {
            let oldest = inner
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(handle, _)| handle.clone());
            match oldest {
                Some(handle) => {
                    if let Some(entry) = inner.remove(&handle) {
                        debug!(%handle, "evicting least recently used entry");
                        evicted.push(entry.value);
                    }
                }
                None => break,
            }
        }

        inner.insert(
            handle,
            CacheEntry {
                value: Arc::new(value),
                last_used: Instant::now(),
            },
        );
        evicted
    }

    /// Look up a handle, refreshing its recency. Expired entries are gone.
    pub fn get(&self, handle: &StatementHandle) -> Option<Arc<V>> {
        let mut inner = self.inner.write().expect("handle cache lock poisoned");
        drop(sweep_expired(&mut inner, self.config.idle_timeout));
        let entry = inner.get_mut(handle)?;
        entry.last_used = Instant::now();
        Some(Arc::clone(&entry.value))
    }

    pub fn remove(&self, handle: &StatementHandle) -> Option<Arc<V>> {
        let mut inner = self.inner.write().expect("handle cache lock poisoned");
        inner.remove(handle).map(|entry| entry.value)
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("handle cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sweep_expired<V>(
    inner: &mut HashMap<StatementHandle, CacheEntry<V>>,
    idle_timeout: Duration,
) -> Vec<Arc<V>> {
    let now = Instant::now();
    let expired: Vec<StatementHandle> = inner
        .iter()
        .filter(|(_, entry)| now.duration_since(entry.last_used) > idle_timeout)
        .map(|(handle, _)| handle.clone())
        .collect();
    let mut evicted = Vec::with_capacity(expired.len());
    for handle in expired {
        if let Some(entry) = inner.remove(&handle) {
            debug!(%handle, "evicting idle entry");
            evicted.push(entry.value);
        }
    }
    evicted
}

/// A pending ad-hoc statement: the query recorded at GetFlightInfo time,
/// redeemed once by the replacement ticket.
pub struct StatementEntry {
    pub query: CommandStatementQuery,
    pub schema: SchemaRef,
}

/// Server state for one prepared statement.
pub struct PreparedContext {
    handle: StatementHandle,
    statement: Mutex<Box<dyn PreparedQuery>>,
    parameter_schema: SchemaRef,
    dataset_schema: Option<SchemaRef>,
    parameters: Mutex<Option<RecordBatch>>,
    busy: AtomicBool,
}

impl PreparedContext {
    pub fn new(
        handle: StatementHandle,
        statement: Box<dyn PreparedQuery>,
        parameter_schema: SchemaRef,
        dataset_schema: Option<SchemaRef>,
    ) -> Self {
        Self {
            handle,
            statement: Mutex::new(statement),
            parameter_schema,
            dataset_schema,
            parameters: Mutex::new(None),
            busy: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> &StatementHandle {
        &self.handle
    }

    pub fn parameter_schema(&self) -> &SchemaRef {
        &self.parameter_schema
    }

    pub fn dataset_schema(&self) -> Option<&SchemaRef> {
        self.dataset_schema.as_ref()
    }

    pub fn expects_parameters(&self) -> bool {
        !self.parameter_schema.fields().is_empty()
    }

    /// Store an uploaded parameter batch. Re-binding replaces the previous
    /// batch.
    pub fn bind(&self, batch: RecordBatch) -> Result<(), ServerError> {
        if batch.schema() != self.parameter_schema {
            return Err(ServerError::SchemaMismatch(format!(
                "expected parameter schema {:?}, received {:?}",
                self.parameter_schema.fields(),
                batch.schema().fields()
            )));
        }
        *self.parameters.lock().expect("parameters lock poisoned") = Some(batch);
        Ok(())
    }

    pub fn has_parameters(&self) -> bool {
        self.parameters
            .lock()
            .expect("parameters lock poisoned")
            .is_some()
    }

    /// Consume the current binding.
    pub fn take_parameters(&self) -> Option<RecordBatch> {
        self.parameters
            .lock()
            .expect("parameters lock poisoned")
            .take()
    }

    /// Claim the single execution slot. A second concurrent claim fails
    /// with HandleBusy; the slot frees when the guard drops.
    pub fn begin_execution(self: &Arc<Self>) -> Result<ExecutionGuard, ServerError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ServerError::HandleBusy);
        }
        Ok(ExecutionGuard {
            context: Arc::clone(self),
        })
    }

    /// Run a closure against the backend statement. Callers hold an
    /// [`ExecutionGuard`], so the inner lock is uncontended.
    pub fn with_statement<T>(
        &self,
        f: impl FnOnce(&mut dyn PreparedQuery) -> Result<T, ServerError>,
    ) -> Result<T, ServerError> {
        let mut statement = self.statement.lock().expect("statement lock poisoned");
        f(statement.as_mut())
    }
}

/// Releases a context's execution slot on drop.
pub struct ExecutionGuard {
    context: Arc<PreparedContext>,
}

impl std::fmt::Debug for ExecutionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGuard").finish()
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.context.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use arrow_schema::Schema;

    use crate::backend::{BackendError, QueryResult};

    struct ClosableStatement {
        closed: Arc<AtomicUsize>,
    }

    impl Drop for ClosableStatement {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl PreparedQuery for ClosableStatement {
        fn parameter_schema(&self) -> SchemaRef {
            Arc::new(Schema::empty())
        }

        fn result_schema(&self) -> Option<SchemaRef> {
            None
        }

        fn execute(&mut self, _: Option<RecordBatch>) -> Result<QueryResult, BackendError> {
            Err(BackendError::execution("not a query"))
        }

        fn execute_update(&mut self, _: Option<RecordBatch>) -> Result<i64, BackendError> {
            Ok(0)
        }
    }

    fn context(closed: &Arc<AtomicUsize>) -> PreparedContext {
        PreparedContext::new(
            StatementHandle::generate(),
            Box::new(ClosableStatement {
                closed: Arc::clone(closed),
            }),
            Arc::new(Schema::empty()),
            None,
        )
    }

    #[test]
    fn handle_round_trips_through_bytes() {
        let handle = StatementHandle::generate();
        let parsed = StatementHandle::try_from_bytes(&handle.as_bytes()).unwrap();
        assert_eq!(parsed, handle);
        assert!(StatementHandle::try_from_bytes(b"short").is_none());
    }

    #[test]
    fn lru_overflow_closes_the_oldest_entry() {
        let closed = Arc::new(AtomicUsize::new(0));
        let cache = HandleCache::new(CacheConfig {
            capacity: 2,
            idle_timeout: Duration::from_secs(600),
        });

        let first = StatementHandle::generate();
        cache.insert(first.clone(), context(&closed));
        std::thread::sleep(Duration::from_millis(5));
        cache.insert(StatementHandle::generate(), context(&closed));
        std::thread::sleep(Duration::from_millis(5));
        let evicted = cache.insert(StatementHandle::generate(), context(&closed));

        assert_eq!(evicted.len(), 1);
        assert!(cache.get(&first).is_none());
        drop(evicted);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn idle_entries_expire_lazily() {
        let closed = Arc::new(AtomicUsize::new(0));
        let cache = HandleCache::new(CacheConfig {
            capacity: 10,
            idle_timeout: Duration::from_millis(10),
        });

        let handle = StatementHandle::generate();
        cache.insert(handle.clone(), context(&closed));
        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get(&handle).is_none());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eviction_defers_close_to_the_in_flight_holder() {
        let closed = Arc::new(AtomicUsize::new(0));
        let cache = HandleCache::new(CacheConfig {
            capacity: 10,
            idle_timeout: Duration::from_secs(600),
        });

        let handle = StatementHandle::generate();
        cache.insert(handle.clone(), context(&closed));
        let in_flight = cache.get(&handle).unwrap();
        let removed = cache.remove(&handle).unwrap();
        drop(removed);
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        drop(in_flight);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_concurrent_execution_is_rejected() {
        let closed = Arc::new(AtomicUsize::new(0));
        let context = Arc::new(context(&closed));

        let guard = context.begin_execution().unwrap();
        let err = context.begin_execution().unwrap_err();
        assert!(matches!(err, ServerError::HandleBusy));
        drop(guard);
        assert!(context.begin_execution().is_ok());
    }

    #[test]
    fn rebinding_replaces_parameters() {
        use arrow_array::Int32Array;
        use arrow_schema::{DataType, Field};

        let schema = Arc::new(Schema::new(vec![Field::new("p", DataType::Int32, false)]));
        let context = PreparedContext::new(
            StatementHandle::generate(),
            Box::new(ClosableStatement {
                closed: Arc::new(AtomicUsize::new(0)),
            }),
            schema.clone(),
            None,
        );

        let batch = |v: i32| {
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int32Array::from(vec![v]))])
                .unwrap()
        };
        context.bind(batch(1)).unwrap();
        context.bind(batch(2)).unwrap();
        let bound = context.take_parameters().unwrap();
        let values = bound
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        assert_eq!(values.value(0), 2);
        assert!(context.take_parameters().is_none());

        let wrong = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("q", DataType::Int32, false)])),
            vec![Arc::new(Int32Array::from(vec![1]))],
        )
        .unwrap();
        assert!(matches!(
            context.bind(wrong),
            Err(ServerError::SchemaMismatch(_))
        ));
    }
}
