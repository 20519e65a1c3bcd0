//! Collective communication between the ranks of a decomposed simulation.
//!
//! Every collective is lock-step: all ranks of a group must enter the same
//! sequence of calls, otherwise the group deadlocks. There are no timeouts and no
//! retries. A rank that fails calls [`Communicator::abort`], after which every
//! pending and future collective of the group returns [`CommError::Aborted`].

use std::any::Any;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use thiserror::Error;

/// Type-erased contribution of one rank to a collective exchange.
pub type Payload = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommError {
    #[error("Rank {rank} contributed a payload of an unexpected type")]
    PayloadMismatch { rank: usize },
    #[error("Rank {rank} did not contribute to the collective exchange")]
    MissingContribution { rank: usize },
    #[error("Communicator state was poisoned by a panicking rank")]
    Poisoned,
    #[error("Collective aborted because another rank failed")]
    Aborted,
}

/// Per-rank handle onto a group of cooperating ranks.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Every rank contributes one payload; every rank receives all payloads
    /// ordered by rank.
    fn exchange(&self, payload: Payload) -> Result<Vec<Payload>, CommError>;

    /// Releases every rank blocked in, or later entering, a collective of this
    /// group with [`CommError::Aborted`].
    fn abort(&self) {}
}

pub fn all_gather<T>(comm: &dyn Communicator, local: T) -> Result<Vec<T>, CommError>
where
    T: Clone + Send + Sync + 'static,
{
    comm.exchange(Arc::new(local))?
        .into_iter()
        .enumerate()
        .map(|(rank, payload)| {
            payload
                .downcast_ref::<T>()
                .cloned()
                .ok_or(CommError::PayloadMismatch { rank })
        })
        .collect()
}

pub fn all_reduce_sum(comm: &dyn Communicator, local: f64) -> Result<f64, CommError> {
    Ok(all_gather(comm, local)?.into_iter().sum())
}

pub fn all_reduce_max(comm: &dyn Communicator, local: f64) -> Result<f64, CommError> {
    Ok(all_gather(comm, local)?
        .into_iter()
        .fold(f64::NEG_INFINITY, f64::max))
}

pub fn all_reduce_count(comm: &dyn Communicator, local: usize) -> Result<usize, CommError> {
    Ok(all_gather(comm, local)?.into_iter().sum())
}

/// Any rank's `true` makes the result `true` everywhere.
pub fn all_reduce_any(comm: &dyn Communicator, local: bool) -> Result<bool, CommError> {
    Ok(all_gather(comm, local)?.into_iter().any(|flag| flag))
}

/// The trivial group of one rank.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn exchange(&self, payload: Payload) -> Result<Vec<Payload>, CommError> {
        Ok(vec![payload])
    }
}

struct RoundState {
    // Two buffers alternate by round: a rank can only start round `g + 2` once
    // every rank has arrived at, and therefore finished reading, round `g`.
    slots: [Vec<Option<Payload>>; 2],
    arrived: usize,
    round: u64,
    aborted: bool,
}

struct Rendezvous {
    state: Mutex<RoundState>,
    released: Condvar,
}

/// In-process group of ranks, one per thread.
///
/// Created with [`ThreadComm::group`]; each handle is moved to the thread that
/// drives its rank. A handle dropped while its thread panics aborts the group.
pub struct ThreadComm {
    rank: usize,
    size: usize,
    shared: Arc<Rendezvous>,
}

impl ThreadComm {
    pub fn group(size: usize) -> Vec<ThreadComm> {
        let shared = Arc::new(Rendezvous {
            state: Mutex::new(RoundState {
                slots: [vec![None; size], vec![None; size]],
                arrived: 0,
                round: 0,
                aborted: false,
            }),
            released: Condvar::new(),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn lock(&self) -> Result<MutexGuard<'_, RoundState>, CommError> {
        self.shared.state.lock().map_err(|_| CommError::Poisoned)
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn exchange(&self, payload: Payload) -> Result<Vec<Payload>, CommError> {
        let mut state = self.lock()?;
        if state.aborted {
            return Err(CommError::Aborted);
        }

        let round = state.round;
        let buffer = (round % 2) as usize;
        state.slots[buffer][self.rank] = Some(payload);
        state.arrived += 1;
        if state.arrived == self.size {
            state.arrived = 0;
            state.round += 1;
            self.shared.released.notify_all();
        } else {
            while state.round == round && !state.aborted {
                state = self
                    .shared
                    .released
                    .wait(state)
                    .map_err(|_| CommError::Poisoned)?;
            }
            if state.round == round {
                return Err(CommError::Aborted);
            }
        }

        state.slots[buffer]
            .iter()
            .enumerate()
            .map(|(rank, slot)| slot.clone().ok_or(CommError::MissingContribution { rank }))
            .collect()
    }

    fn abort(&self) {
        // A poisoned lock still holds usable state; waiters see the flag.
        let mut state = match self.shared.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.aborted = true;
        self.shared.released.notify_all();
    }
}

impl Drop for ThreadComm {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.abort();
        }
    }
}
