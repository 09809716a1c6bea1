//! One-time, process-wide initialization.
//!
//! The first [`Server`](crate::Server) constructed in a process builds the MIME table, and the
//! first server of every Transport type enables that Transport's multithreading support.
//! Concurrent constructions block until both have happened; later constructions reuse the
//! result.

use std::any::{TypeId, type_name};
use std::sync::{Mutex, PoisonError};

use once_cell::sync::OnceCell;
use tracing::info;

use crate::mime_types::MimeTypes;
use crate::transport::Transport;

static PROCESS: Bootstrap = Bootstrap::new();

/// Read-only state shared by every server of the process.
#[derive(Debug)]
pub struct Process {
    mime_types: MimeTypes,
}

impl Process {
    pub fn mime_types(&self) -> &MimeTypes {
        &self.mime_types
    }
}

pub(crate) struct Bootstrap {
    transports: Mutex<Vec<TypeId>>,
    state: OnceCell<Process>,
}

impl Bootstrap {
    pub(crate) const fn new() -> Self {
        Self { transports: Mutex::new(Vec::new()), state: OnceCell::new() }
    }

    /// Runs `init_transport` unless it already ran for `transport`, then builds the process
    /// state unless that already happened.
    pub(crate) fn get_or_init(&self, transport: TypeId, init_transport: impl FnOnce()) -> &Process {
        {
            let mut transports = self.transports.lock().unwrap_or_else(PoisonError::into_inner);
            if !transports.contains(&transport) {
                init_transport();
                transports.push(transport);
            }
        }

        self.state.get_or_init(|| {
            let mime_types = MimeTypes::new();
            info!(mime_types = mime_types.len(), "process bootstrap finished");
            Process { mime_types }
        })
    }
}

/// Returns the process state, enabling multithreading for transport `T` on its first use.
pub(crate) fn bootstrap<T: Transport>() -> &'static Process {
    PROCESS.get_or_init(TypeId::of::<T>(), || {
        info!(transport = type_name::<T>(), "enabling transport multithreading");
        T::enable_multithreading();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TlsConfig, VerifyMode};
    use crate::error::TransportError;
    use crate::pipeline::Pipeline;
    use crate::transport::LoopbackTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    static IDLE_ENABLED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug)]
    struct IdleTransport;

    impl Transport for IdleTransport {
        fn enable_multithreading() {
            IDLE_ENABLED.fetch_add(1, Ordering::SeqCst);
        }

        fn create_loop(&self) -> Result<(), TransportError> {
            Ok(())
        }

        fn configure_tls(&self, _tls: &TlsConfig, _verify_mode: VerifyMode) -> Result<(), TransportError> {
            Ok(())
        }

        fn bind(&self, _address: &str, _port: u16, _backlog: u32) -> Result<(), TransportError> {
            Ok(())
        }

        fn use_worker_threads(&self, _count: usize) -> Result<(), TransportError> {
            Ok(())
        }

        fn run_loop(&self, _pipeline: Arc<Pipeline>) -> Result<(), TransportError> {
            Ok(())
        }

        fn interrupt_loop(&self) {}

        fn unbind(&self) {}
    }

    #[test]
    fn concurrent_bootstrap_runs_once() {
        let bootstrap = Arc::new(Bootstrap::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (bootstrap, calls, barrier) = (Arc::clone(&bootstrap), Arc::clone(&calls), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    let process = bootstrap.get_or_init(TypeId::of::<u8>(), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                    });
                    process.mime_types().len()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap() > 0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(bootstrap.state.get().is_some());
    }

    #[test]
    fn later_calls_are_no_ops() {
        let bootstrap = Bootstrap::new();
        assert!(bootstrap.state.get().is_none());

        let first: *const Process = bootstrap.get_or_init(TypeId::of::<u8>(), || {});
        let second: *const Process = bootstrap.get_or_init(TypeId::of::<u8>(), || panic!("initialized twice"));
        assert_eq!(first, second);
    }

    #[test]
    fn every_transport_type_is_initialized_once() {
        let bootstrap = Bootstrap::new();
        let calls = AtomicUsize::new(0);
        let count = || {
            calls.fetch_add(1, Ordering::SeqCst);
        };

        let first: *const Process = bootstrap.get_or_init(TypeId::of::<u8>(), count);
        let second: *const Process = bootstrap.get_or_init(TypeId::of::<u16>(), count);
        bootstrap.get_or_init(TypeId::of::<u8>(), count);
        bootstrap.get_or_init(TypeId::of::<u16>(), count);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn second_transport_type_is_enabled_too() {
        let loopback: *const Process = bootstrap::<LoopbackTransport>();
        let idle: *const Process = bootstrap::<IdleTransport>();
        bootstrap::<IdleTransport>();

        assert_eq!(loopback, idle);
        assert_eq!(IDLE_ENABLED.load(Ordering::SeqCst), 1);
        assert_eq!(LoopbackTransport::multithreading_enabled_count(), 1);
    }
}
