// ABOUTME: In-memory sandbox provider for tests and offline development
// ABOUTME: Simulates sandbox death, transport faults and a private filesystem without network access

use crate::providers::{
    ProviderError, RemoteError, Result, RunOutput, SandboxHandle, SandboxProvider,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Files visible inside one in-memory sandbox
pub type SandboxFiles = IndexMap<String, Vec<u8>>;

/// Evaluates a submitted snippet against the sandbox filesystem
pub type Interpreter = dyn Fn(&str, &mut SandboxFiles) -> RunOutput + Send + Sync;

struct TransportFault {
    needle: String,
    remaining: usize,
}

struct ProviderState {
    interpreter: Box<Interpreter>,
    provisions: AtomicUsize,
    fail_provisioning: AtomicBool,
    fail_writes: AtomicBool,
    faults: Mutex<Vec<TransportFault>>,
    sandboxes: Mutex<Vec<Arc<InMemorySandbox>>>,
}

/// Provider whose sandboxes live in process memory
#[derive(Clone)]
pub struct InMemoryProvider {
    state: Arc<ProviderState>,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    /// Provider using [`default_interpreter`]
    pub fn new() -> Self {
        Self::with_interpreter(default_interpreter)
    }

    pub fn with_interpreter<F>(interpreter: F) -> Self
    where
        F: Fn(&str, &mut SandboxFiles) -> RunOutput + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(ProviderState {
                interpreter: Box::new(interpreter),
                provisions: AtomicUsize::new(0),
                fail_provisioning: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
                faults: Mutex::new(Vec::new()),
                sandboxes: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Number of successful and failed provisioning attempts
    pub fn provision_count(&self) -> usize {
        self.state.provisions.load(Ordering::SeqCst)
    }

    pub fn set_fail_provisioning(&self, fail: bool) {
        self.state.fail_provisioning.store(fail, Ordering::SeqCst);
    }

    /// Make every file write fail with a transport error
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The next `times` runs of code containing `needle` fail in transit,
    /// on whichever sandbox they are sent to
    pub fn inject_transport_faults(&self, needle: &str, times: usize) {
        lock(&self.state.faults).push(TransportFault {
            needle: needle.to_string(),
            remaining: times,
        });
    }

    /// Every sandbox provisioned so far, oldest first
    pub fn sandboxes(&self) -> Vec<Arc<InMemorySandbox>> {
        lock(&self.state.sandboxes).clone()
    }

    pub fn latest_sandbox(&self) -> Option<Arc<InMemorySandbox>> {
        lock(&self.state.sandboxes).last().cloned()
    }

    fn take_fault(&self, code: &str) -> bool {
        let mut faults = lock(&self.state.faults);
        for fault in faults.iter_mut() {
            if fault.remaining > 0 && code.contains(&fault.needle) {
                fault.remaining -= 1;
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl SandboxProvider for InMemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn provision(&self, _timeout: Duration) -> Result<Arc<dyn SandboxHandle>> {
        let number = self.state.provisions.fetch_add(1, Ordering::SeqCst) + 1;
        if self.state.fail_provisioning.load(Ordering::SeqCst) {
            return Err(ProviderError::ProvisioningError(
                "in-memory provider is out of capacity".to_string(),
            ));
        }

        let sandbox = Arc::new(InMemorySandbox {
            id: format!("mem-{}", number),
            provider: self.clone(),
            alive: AtomicBool::new(true),
            released: AtomicBool::new(false),
            files: Mutex::new(SandboxFiles::new()),
            runs: Mutex::new(Vec::new()),
        });
        lock(&self.state.sandboxes).push(sandbox.clone());
        Ok(sandbox)
    }
}

pub struct InMemorySandbox {
    id: String,
    provider: InMemoryProvider,
    alive: AtomicBool,
    released: AtomicBool,
    files: Mutex<SandboxFiles>,
    runs: Mutex<Vec<String>>,
}

impl InMemorySandbox {
    /// Simulate the remote sandbox expiring out-of-band
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn files(&self) -> SandboxFiles {
        lock(&self.files).clone()
    }

    /// Every snippet that reached this sandbox, in order
    pub fn runs(&self) -> Vec<String> {
        lock(&self.runs).clone()
    }

    /// Number of runs whose code contains `needle`
    pub fn runs_containing(&self, needle: &str) -> usize {
        lock(&self.runs)
            .iter()
            .filter(|code| code.contains(needle))
            .count()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(ProviderError::TransportError(format!(
                "sandbox {} not found",
                self.id
            )))
        }
    }
}

#[async_trait]
impl SandboxHandle for InMemorySandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_code(&self, code: &str) -> Result<RunOutput> {
        self.ensure_alive()?;
        lock(&self.runs).push(code.to_string());

        if self.provider.take_fault(code) {
            return Err(ProviderError::TransportError(
                "connection reset by peer".to_string(),
            ));
        }

        let mut files = lock(&self.files);
        Ok((self.provider.state.interpreter)(code, &mut files))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        self.ensure_alive()?;
        if self.provider.state.fail_writes.load(Ordering::SeqCst) {
            return Err(ProviderError::TransportError(format!(
                "write to {} timed out",
                path
            )));
        }
        lock(&self.files).insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn release(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Understands just enough to exercise the session manager:
/// `print('<literal>')` echoes the literal, `1/0` raises `ZeroDivisionError`,
/// anything else succeeds silently.
pub fn default_interpreter(code: &str, _files: &mut SandboxFiles) -> RunOutput {
    let stdout = code
        .lines()
        .filter_map(|line| {
            line.trim()
                .strip_prefix("print('")
                .and_then(|rest| rest.strip_suffix("')"))
                .map(|literal| format!("{}\n", literal))
        })
        .collect();

    let error = (code.contains("1/0") || code.contains("1 / 0")).then(|| RemoteError {
        name: "ZeroDivisionError".to_string(),
        value: "division by zero".to_string(),
        traceback: String::new(),
    });

    RunOutput {
        error,
        stdout,
        ..Default::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
