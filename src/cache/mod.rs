pub mod store;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::io::Cursor;
use std::rc::Rc;
use std::time::{Duration, Instant};

use murmur3::murmur3_x86_128;
use tracing::{debug, trace};

use crate::AppResult;

pub use store::ModelStore;

/// Pipeline stages whose results are memoized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Reading and validating input files
    Load,
    /// Clustering, term extraction and layout
    Fit,
}

/// How long an entry stays valid after being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    After(Duration),
    Never,
}

/// 128-bit murmur3 digest identifying a stage input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u128);

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Accumulates a canonical byte stream and hashes it.
///
/// Every field is length- or tag-prefixed so distinct inputs cannot collide by
/// concatenation.
#[derive(Debug, Default)]
pub struct Fingerprinter {
    buf: Vec<u8>,
}

impl Fingerprinter {
    pub fn new(domain: &str) -> Self {
        let mut fp = Self::default();
        fp.str(domain);
        fp
    }

    pub fn str(&mut self, value: &str) -> &mut Self {
        self.u64(value.len() as u64);
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn usize(&mut self, value: usize) -> &mut Self {
        self.u64(value as u64)
    }

    pub fn f64(&mut self, value: f64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_bits().to_le_bytes());
        self
    }

    pub fn f64s<'a, I: IntoIterator<Item = &'a f64>>(&mut self, values: I) -> &mut Self {
        for value in values {
            self.f64(*value);
        }
        self
    }

    pub fn finish(&self) -> Fingerprint {
        // Reading from an in-memory cursor cannot fail.
        let hash = murmur3_x86_128(&mut Cursor::new(&self.buf), 0).unwrap_or_default();
        Fingerprint(hash)
    }
}

/// Source of "now" for expiry decisions.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct Entry {
    stored_at: Instant,
    value: Rc<dyn Any>,
}

/// Hit/miss counters, mostly useful in tests and debug logs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoStats {
    pub hits: usize,
    pub misses: usize,
    pub expired: usize,
}

/// Single-threaded memo table from `(Stage, Fingerprint)` to a shared value.
pub struct Memo {
    clock: Box<dyn Clock>,
    expiry: HashMap<Stage, Expiry>,
    entries: RefCell<HashMap<(Stage, Fingerprint), Entry>>,
    stats: Cell<MemoStats>,
}

/// Raw loads expire after a day; fitted models live as long as the memo.
pub const DEFAULT_LOAD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

impl Default for Memo {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

impl Memo {
    pub fn new<C: Clock + 'static>(clock: C) -> Self {
        let expiry = HashMap::from([
            (Stage::Load, Expiry::After(DEFAULT_LOAD_TTL)),
            (Stage::Fit, Expiry::Never),
        ]);
        Self {
            clock: Box::new(clock),
            expiry,
            entries: RefCell::new(HashMap::new()),
            stats: Cell::new(MemoStats::default()),
        }
    }

    pub fn with_expiry(mut self, stage: Stage, expiry: Expiry) -> Self {
        self.expiry.insert(stage, expiry);
        self
    }

    fn is_fresh(&self, stage: Stage, entry: &Entry) -> bool {
        match self.expiry.get(&stage).copied().unwrap_or(Expiry::Never) {
            Expiry::Never => true,
            Expiry::After(ttl) => self.clock.now().duration_since(entry.stored_at) < ttl,
        }
    }

    fn bump(&self, update: impl FnOnce(&mut MemoStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }

    fn lookup<T: 'static>(&self, stage: Stage, fingerprint: Fingerprint) -> Option<Rc<T>> {
        let mut entries = self.entries.borrow_mut();
        let key = (stage, fingerprint);
        let entry = entries.get(&key)?;
        if !self.is_fresh(stage, entry) {
            trace!(?stage, %fingerprint, "Memo entry expired");
            entries.remove(&key);
            self.bump(|s| s.expired += 1);
            return None;
        }
        entry.value.clone().downcast::<T>().ok()
    }

    /// Return the memoized value or compute, store and return it.
    ///
    /// Errors from `compute` are returned as-is and nothing is stored.
    pub fn get_or_try_insert_with<T, F>(
        &self,
        stage: Stage,
        fingerprint: Fingerprint,
        compute: F,
    ) -> AppResult<Rc<T>>
    where
        T: 'static,
        F: FnOnce() -> AppResult<T>,
    {
        if let Some(hit) = self.lookup::<T>(stage, fingerprint) {
            debug!(?stage, %fingerprint, "Reusing memoized result");
            self.bump(|s| s.hits += 1);
            return Ok(hit);
        }
        self.bump(|s| s.misses += 1);

        // No borrow is held while computing; stages may consult the memo themselves.
        let value = Rc::new(compute()?);
        let shared: Rc<dyn Any> = value.clone();
        self.entries.borrow_mut().insert(
            (stage, fingerprint),
            Entry {
                stored_at: self.clock.now(),
                value: shared,
            },
        );
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn stats(&self) -> MemoStats {
        self.stats.get()
    }
}
