pub mod admission;
pub mod fifo;
pub mod lru;
pub(crate) mod lru_list;
pub mod promotion;

pub use fifo::FifoPolicy;
pub use lru::LruPolicy;

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// A trait for implementing eviction strategies over an id type.
///
/// Ids are registered with [`add`](EvictionPolicy::add) and handed back as
/// victims by [`evict`](EvictionPolicy::evict). Accesses go through
/// [`touch`](EvictionPolicy::touch), which returns a [`Handle`] that keeps the
/// id from being chosen as a victim until it is released.
///
/// Every method may be called concurrently from many threads.
pub trait EvictionPolicy<Id>: Send + Sync {
  /// The strategy's bookkeeping for one outstanding handle.
  type Token: Send;

  /// Starts tracking `id` with the given size cost. Returns false if the id
  /// is already tracked or the strategy declines it.
  fn add(&self, id: Id, size: u64) -> bool;

  /// Records an access to `id` and pins it. Returns `None` if the id is not
  /// tracked. Prefer [`touch`](EvictionPolicy::touch), which releases the pin
  /// automatically.
  fn acquire(&self, id: &Id) -> Option<Self::Token>;

  /// Drops the pin taken by `acquire`.
  fn release(&self, token: Self::Token);

  /// Selects up to `count` unpinned victims, appends them to `evicted` and
  /// stops tracking them. Fewer victims is not an error.
  fn evict(&self, count: usize, evicted: &mut Vec<Id>);

  /// Like `evict`, but only considers the bucket `id` maps to. Strategies
  /// without buckets behave exactly like `evict`.
  fn evict_for(&self, id: &Id, count: usize, evicted: &mut Vec<Id>);

  /// Stops tracking `id`. Returns false if it was not tracked.
  fn remove(&self, id: &Id) -> bool;

  /// Stops tracking every id.
  fn clear(&self);

  /// The number of tracked ids.
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Records an access to `id` and returns a handle that pins it until the
  /// handle is released or dropped.
  fn touch(&self, id: &Id) -> Option<Handle<'_, Id, Self>>
  where
    Self: Sized,
  {
    self.acquire(id).map(|token| Handle::new(self, token))
  }
}

/// A pin on one tracked id. Dropping the handle releases the pin.
pub struct Handle<'a, Id, P>
where
  P: EvictionPolicy<Id> + ?Sized,
{
  policy: &'a P,
  token: Option<P::Token>,
  _id: PhantomData<fn(Id)>,
}

impl<'a, Id, P> Handle<'a, Id, P>
where
  P: EvictionPolicy<Id> + ?Sized,
{
  pub fn new(policy: &'a P, token: P::Token) -> Self {
    Self {
      policy,
      token: Some(token),
      _id: PhantomData,
    }
  }

  /// Releases the pin. Later calls, including the one on drop, do nothing.
  pub fn release(&mut self) {
    if let Some(token) = self.token.take() {
      self.policy.release(token);
    }
  }

  pub fn is_released(&self) -> bool {
    self.token.is_none()
  }
}

impl<Id, P> Drop for Handle<'_, Id, P>
where
  P: EvictionPolicy<Id> + ?Sized,
{
  fn drop(&mut self) {
    self.release();
  }
}

impl<Id, P> fmt::Debug for Handle<'_, Id, P>
where
  P: EvictionPolicy<Id> + ?Sized,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Handle")
      .field("released", &self.is_released())
      .finish()
  }
}

/// The eviction strategies a tier can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PolicyKind {
  /// Least recently used, split into independently locked buckets.
  #[default]
  Lru,
  /// First in, first out. A single bucket; accesses do not reorder.
  Fifo,
}

/// A strategy chosen at construction time.
#[derive(Debug)]
pub enum Policy<Id: Eq + Hash + Clone> {
  Lru(LruPolicy<Id>),
  Fifo(FifoPolicy<Id>),
}

#[derive(Debug)]
pub enum PolicyToken {
  Lru(lru::LruToken),
  Fifo(fifo::FifoToken),
}

impl<Id> Policy<Id>
where
  Id: Eq + Hash + Clone + Send + Sync,
{
  /// Builds the strategy for `kind`. `shard_bits` only applies to bucketed
  /// strategies.
  pub fn new(kind: PolicyKind, shard_bits: u32) -> Self {
    match kind {
      PolicyKind::Lru => Policy::Lru(LruPolicy::new(shard_bits)),
      PolicyKind::Fifo => Policy::Fifo(FifoPolicy::new()),
    }
  }

  pub fn kind(&self) -> PolicyKind {
    match self {
      Policy::Lru(_) => PolicyKind::Lru,
      Policy::Fifo(_) => PolicyKind::Fifo,
    }
  }
}

impl<Id> EvictionPolicy<Id> for Policy<Id>
where
  Id: Eq + Hash + Clone + Send + Sync,
{
  type Token = PolicyToken;

  fn add(&self, id: Id, size: u64) -> bool {
    match self {
      Policy::Lru(p) => p.add(id, size),
      Policy::Fifo(p) => p.add(id, size),
    }
  }

  fn acquire(&self, id: &Id) -> Option<PolicyToken> {
    match self {
      Policy::Lru(p) => p.acquire(id).map(PolicyToken::Lru),
      Policy::Fifo(p) => p.acquire(id).map(PolicyToken::Fifo),
    }
  }

  fn release(&self, token: PolicyToken) {
    match (self, token) {
      (Policy::Lru(p), PolicyToken::Lru(t)) => p.release(t),
      (Policy::Fifo(p), PolicyToken::Fifo(t)) => p.release(t),
      // A token is only ever created by the variant it is returned to.
      _ => debug_assert!(false, "policy token released to the wrong strategy"),
    }
  }

  fn evict(&self, count: usize, evicted: &mut Vec<Id>) {
    match self {
      Policy::Lru(p) => p.evict(count, evicted),
      Policy::Fifo(p) => p.evict(count, evicted),
    }
  }

  fn evict_for(&self, id: &Id, count: usize, evicted: &mut Vec<Id>) {
    match self {
      Policy::Lru(p) => p.evict_for(id, count, evicted),
      Policy::Fifo(p) => p.evict_for(id, count, evicted),
    }
  }

  fn remove(&self, id: &Id) -> bool {
    match self {
      Policy::Lru(p) => p.remove(id),
      Policy::Fifo(p) => p.remove(id),
    }
  }

  fn clear(&self) {
    match self {
      Policy::Lru(p) => p.clear(),
      Policy::Fifo(p) => p.clear(),
    }
  }

  fn len(&self) -> usize {
    match self {
      Policy::Lru(p) => p.len(),
      Policy::Fifo(p) => p.len(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn assert_pin_contract(policy: &Policy<u64>) {
    for id in 0..16 {
      assert!(policy.add(id, 1));
    }
    assert!(!policy.add(3, 1), "duplicate add must fail");

    let mut handle = policy.touch(&3).expect("tracked id");
    let mut out = Vec::new();
    policy.evict(usize::MAX, &mut out);
    assert_eq!(out.len(), 15);
    assert!(!out.contains(&3), "pinned id was evicted");
    assert_eq!(policy.len(), 1);

    handle.release();
    handle.release();
    assert!(handle.is_released());
    drop(handle);

    out.clear();
    policy.evict(usize::MAX, &mut out);
    assert_eq!(out, vec![3]);
    assert!(policy.is_empty());
  }

  #[test]
  fn lru_honors_handles() {
    assert_pin_contract(&Policy::new(PolicyKind::Lru, 2));
  }

  #[test]
  fn fifo_honors_handles() {
    assert_pin_contract(&Policy::new(PolicyKind::Fifo, 2));
  }

  #[test]
  fn pins_are_additive() {
    let policy = Policy::new(PolicyKind::Lru, 0);
    policy.add(1u64, 1);
    let first = policy.touch(&1).unwrap();
    let second = policy.touch(&1).unwrap();

    let mut out = Vec::new();
    drop(first);
    policy.evict(1, &mut out);
    assert!(out.is_empty(), "one handle is still outstanding");

    drop(second);
    policy.evict(1, &mut out);
    assert_eq!(out, vec![1]);
  }

  #[test]
  fn touch_on_untracked_id_yields_nothing() {
    let policy = Policy::<u64>::new(PolicyKind::Fifo, 0);
    assert!(policy.touch(&9).is_none());
    policy.add(9, 1);
    assert!(policy.remove(&9));
    assert!(policy.touch(&9).is_none());
    assert!(!policy.remove(&9));
  }

  #[test]
  fn kind_round_trips() {
    assert_eq!(Policy::<u64>::new(PolicyKind::Lru, 1).kind(), PolicyKind::Lru);
    assert_eq!(Policy::<u64>::new(PolicyKind::Fifo, 1).kind(), PolicyKind::Fifo);
    assert_eq!(PolicyKind::default(), PolicyKind::Lru);
  }
}
