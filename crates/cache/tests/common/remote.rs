use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use picvault_storage::{RemoteArchive, StorageError, StorageResult};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Failure injected into the next remote call.
#[derive(Clone, Copy, Debug)]
#[allow(dead_code)]
pub enum Fault {
    Transient,
    Fatal,
}

impl Fault {
    fn into_error(self, op: &str, key: &str) -> StorageError {
        match self {
            Fault::Transient => StorageError::Transient(format!("injected {op} failure for {key}")),
            Fault::Fatal => StorageError::Fatal(format!("injected {op} failure for {key}")),
        }
    }
}

/// In-memory remote archive with scripted faults.
#[derive(Default)]
#[allow(dead_code)]
pub struct MockArchive {
    objects: DashMap<String, Bytes>,
    put_faults: Mutex<VecDeque<Fault>>,
    get_faults: Mutex<VecDeque<Fault>>,
    delete_faults: Mutex<VecDeque<Fault>>,
    put_delay: Mutex<Option<Duration>>,
    puts: AtomicUsize,
    gets: AtomicUsize,
}

#[allow(dead_code)]
impl MockArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` uploads with `fault`.
    pub fn fail_puts(&self, fault: Fault, times: usize) {
        let mut faults = self.put_faults.lock().unwrap();
        faults.extend(std::iter::repeat_n(fault, times));
    }

    pub fn fail_gets(&self, fault: Fault, times: usize) {
        let mut faults = self.get_faults.lock().unwrap();
        faults.extend(std::iter::repeat_n(fault, times));
    }

    pub fn fail_deletes(&self, fault: Fault, times: usize) {
        let mut faults = self.delete_faults.lock().unwrap();
        faults.extend(std::iter::repeat_n(fault, times));
    }

    /// Make every upload take at least `delay`.
    pub fn delay_puts(&self, delay: Duration) {
        *self.put_delay.lock().unwrap() = Some(delay);
    }

    /// Replace a stored object's bytes without touching its record.
    pub fn corrupt(&self, key: &str) {
        if let Some(mut object) = self.objects.get_mut(key) {
            let mut data = object.to_vec();
            if let Some(last) = data.last_mut() {
                *last ^= 0xff;
            }
            *object = Bytes::from(data);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.get(key).map(|o| o.clone())
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn next_fault(queue: &Mutex<VecDeque<Fault>>) -> Option<Fault> {
        queue.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl RemoteArchive for MockArchive {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.put_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(fault) = Self::next_fault(&self.put_faults) {
            return Err(fault.into_error("put", key));
        }
        self.objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = Self::next_fault(&self.get_faults) {
            return Err(fault.into_error("get", key));
        }
        self.objects
            .get(key)
            .map(|o| o.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if let Some(fault) = Self::next_fault(&self.delete_faults) {
            return Err(fault.into_error("delete", key));
        }
        self.objects.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.contains_key(key))
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }
}
