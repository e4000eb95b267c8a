//! Cooperative cancellation and wall-clock deadlines.
//!
//! A running guest is interrupted through Wasmtime epochs: the
//! `EpochTicker` bumps the engine epoch every checkpoint interval, and each
//! store's deadline callback evaluates its `Interrupt`. Host calls evaluate
//! the same `Interrupt` on entry, so native contracts observe it as well.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;
use wasmtime::Engine;

use ledgerbox_primitives::ContractError;

/// Stand-in deadline for budgets too large to add to the clock.
const DISTANT: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `budget` from now. Budgets past what `Instant` can hold mean "no limit".
pub fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget)
        .or_else(|| now.checked_add(DISTANT))
        .unwrap_or(now)
}

/// Cancellation flag shared between a contract and whoever may cancel it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The conditions under which an invocation must stop.
///
/// A nested invocation inherits every token of its caller plus its own, and
/// never outlives the caller's deadline.
#[derive(Debug, Clone)]
pub struct Interrupt {
    tokens: Vec<CancellationToken>,
    deadline: Instant,
    budget_ms: u64,
}

impl Interrupt {
    pub fn new(token: CancellationToken, budget: Duration) -> Self {
        Self {
            tokens: vec![token],
            deadline: deadline_after(budget),
            budget_ms: budget.as_millis() as u64,
        }
    }

    /// Interrupt for an invocation started from within this one.
    pub fn nested(&self, token: CancellationToken, budget: Duration) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(token);
        Self {
            tokens,
            deadline: self.deadline.min(deadline_after(budget)),
            budget_ms: self.budget_ms,
        }
    }

    /// Cancellation wins over an elapsed deadline.
    pub fn check(&self) -> Result<(), ContractError> {
        if self.tokens.iter().any(CancellationToken::is_cancelled) {
            return Err(ContractError::cancelled());
        }
        if Instant::now() >= self.deadline {
            return Err(ContractError::timed_out(self.budget_ms));
        }
        Ok(())
    }
}

/// Background thread advancing the engine epoch.
pub struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    pub fn start(engine: Engine, interval: Duration) -> Result<Self, ContractError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("contract-epoch".into())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    engine.increment_epoch();
                }
            })
            .map_err(|e| ContractError::engine_init(format!("cannot start epoch ticker: {}", e)))?;
        debug!(interval_ms = interval.as_millis() as u64, "epoch ticker started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it. Safe to call more than once.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!("epoch ticker stopped");
        }
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerbox_primitives::{ErrorKind, ResourceKind};

    #[test]
    fn test_fresh_interrupt_passes() {
        let interrupt = Interrupt::new(CancellationToken::new(), Duration::from_secs(5));
        assert!(interrupt.check().is_ok());
        assert!(interrupt.deadline > Instant::now() + Duration::from_secs(4));
    }

    #[test]
    fn test_cancel_beats_deadline() {
        let token = CancellationToken::new();
        let interrupt = Interrupt::new(token.clone(), Duration::ZERO);
        assert_eq!(
            interrupt.check().unwrap_err().kind,
            ErrorKind::ResourceExceeded(ResourceKind::TimedOut)
        );
        token.cancel();
        assert_eq!(interrupt.check().unwrap_err().kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_nested_sees_parent_cancel_but_not_reverse() {
        let parent_token = CancellationToken::new();
        let child_token = CancellationToken::new();
        let parent = Interrupt::new(parent_token.clone(), Duration::from_secs(5));
        let child = parent.nested(child_token.clone(), Duration::from_secs(5));

        child_token.cancel();
        assert!(parent.check().is_ok());
        assert_eq!(child.check().unwrap_err().kind, ErrorKind::Cancelled);

        let child = parent.nested(CancellationToken::new(), Duration::from_secs(5));
        parent_token.cancel();
        assert_eq!(child.check().unwrap_err().kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_nested_never_outlives_parent() {
        let parent = Interrupt::new(CancellationToken::new(), Duration::from_millis(50));
        let child = parent.nested(CancellationToken::new(), Duration::from_secs(60));
        assert_eq!(child.deadline, parent.deadline);
    }

    #[test]
    fn test_unbounded_budget_does_not_overflow() {
        let interrupt = Interrupt::new(CancellationToken::new(), Duration::from_millis(u64::MAX));
        assert!(interrupt.check().is_ok());
        let child = interrupt.nested(CancellationToken::new(), Duration::MAX);
        assert!(child.check().is_ok());
        assert!(deadline_after(Duration::MAX) > Instant::now());
    }

    #[test]
    fn test_ticker_advances_and_stops() {
        let mut config = wasmtime::Config::new();
        config.epoch_interruption(true);
        let engine = Engine::new(&config).unwrap();
        let mut ticker = EpochTicker::start(engine, Duration::from_millis(1)).unwrap();
        thread::sleep(Duration::from_millis(5));
        ticker.stop();
        ticker.stop();
    }
}
