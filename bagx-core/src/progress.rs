use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const TICK: Duration = Duration::from_secs(5);

/// Background ticker reporting `done/total` for a named stage.
#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    stage: Arc<Mutex<String>>,
    done: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stage: Arc::new(Mutex::new(String::new())),
            done: Arc::new(AtomicUsize::new(0)),
            total: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_stage(&self, s: &str) {
        if self.enabled {
            *self.stage.lock().unwrap_or_else(|e| e.into_inner()) = s.to_string();
        }
    }

    pub fn set_total(&self, n: usize) {
        self.total.store(n, Ordering::Relaxed);
        self.done.store(0, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn start(&self) {
        if !self.enabled {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let stage = self.stage.clone();
        let done = self.done.clone();
        let total = self.total.clone();
        let running = self.running.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while running.load(Ordering::Relaxed) {
                thread::sleep(TICK);
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let s = stage.lock().unwrap_or_else(|e| e.into_inner()).clone();
                info!(
                    "[{:>4}s] {} {}/{}",
                    t0.elapsed().as_secs(),
                    s,
                    done.load(Ordering::Relaxed),
                    total.load(Ordering::Relaxed)
                );
            }
        });
    }

    pub fn stop(&self) {
        if self.enabled {
            self.running.store(false, Ordering::Relaxed);
        }
    }
}
