use crate::domain::application::LoanApplication;
use crate::domain::ids::BorrowerId;
use crate::error::{LoanError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Caller-held reference to an in-progress application.
///
/// A handle stays valid until the session is submitted, replaced by a newer
/// application from the same borrower, or expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationHandle {
    index: usize,
    generation: u64,
}

struct Session {
    application: LoanApplication,
    touched_at: DateTime<Utc>,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    session: Option<Session>,
}

/// Arena of draft applications, at most one per borrower.
pub struct SessionArena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_borrower: HashMap<BorrowerId, ApplicationHandle>,
    ttl: Duration,
}

impl SessionArena {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_borrower: HashMap::new(),
            ttl,
        }
    }

    /// Stores a new draft, discarding any draft the borrower already had.
    pub fn insert(
        &mut self,
        application: LoanApplication,
        now: DateTime<Utc>,
    ) -> ApplicationHandle {
        if let Some(previous) = self.by_borrower.get(&application.borrower).copied() {
            self.release(previous);
        }
        let index = self.free.pop().unwrap_or_else(|| {
            self.slots.push(Slot::default());
            self.slots.len() - 1
        });
        let slot = &mut self.slots[index];
        let handle = ApplicationHandle {
            index,
            generation: slot.generation,
        };
        self.by_borrower.insert(application.borrower, handle);
        slot.session = Some(Session {
            application,
            touched_at: now,
        });
        handle
    }

    pub fn get(&self, handle: ApplicationHandle, now: DateTime<Utc>) -> Result<&LoanApplication> {
        let session = self
            .slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.session.as_ref())
            .ok_or(LoanError::StaleSession)?;
        if now - session.touched_at >= self.ttl {
            return Err(LoanError::StaleSession);
        }
        Ok(&session.application)
    }

    /// Mutable access; refreshes the session's idle timer.
    pub fn get_mut(
        &mut self,
        handle: ApplicationHandle,
        now: DateTime<Utc>,
    ) -> Result<&mut LoanApplication> {
        self.get(handle, now)?;
        let session = self.slots[handle.index]
            .session
            .as_mut()
            .ok_or(LoanError::StaleSession)?;
        session.touched_at = now;
        Ok(&mut session.application)
    }

    pub fn remove(
        &mut self,
        handle: ApplicationHandle,
        now: DateTime<Utc>,
    ) -> Result<LoanApplication> {
        self.get(handle, now)?;
        self.release(handle).ok_or(LoanError::StaleSession)
    }

    pub fn handle_for(&self, borrower: BorrowerId) -> Option<ApplicationHandle> {
        self.by_borrower.get(&borrower).copied()
    }

    /// Frees every session idle for at least the configured TTL.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<ApplicationHandle> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let session = slot.session.as_ref()?;
                (now - session.touched_at >= self.ttl).then_some(ApplicationHandle {
                    index,
                    generation: slot.generation,
                })
            })
            .collect();
        for handle in &expired {
            self.release(*handle);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.by_borrower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_borrower.is_empty()
    }

    fn release(&mut self, handle: ApplicationHandle) -> Option<LoanApplication> {
        let slot = self
            .slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)?;
        let session = slot.session.take()?;
        slot.generation += 1;
        self.free.push(handle.index);
        if self.by_borrower.get(&session.application.borrower) == Some(&handle) {
            self.by_borrower.remove(&session.application.borrower);
        }
        Some(session.application)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::LoanType;

    fn arena() -> SessionArena {
        SessionArena::new(Duration::hours(1))
    }

    fn draft(now: DateTime<Utc>) -> LoanApplication {
        LoanApplication::new(BorrowerId::new(), LoanType::Credit, now)
    }

    #[test]
    fn test_new_application_replaces_old_one() {
        let mut sessions = arena();
        let now = Utc::now();
        let borrower = BorrowerId::new();
        let first = sessions.insert(LoanApplication::new(borrower, LoanType::Credit, now), now);
        let second = sessions.insert(LoanApplication::new(borrower, LoanType::Mortgage, now), now);

        assert!(matches!(sessions.get(first, now), Err(LoanError::StaleSession)));
        assert_eq!(sessions.get(second, now).unwrap().loan_type, LoanType::Mortgage);
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_reused_slot_rejects_old_generation() {
        let mut sessions = arena();
        let now = Utc::now();
        let a = sessions.insert(draft(now), now);
        sessions.remove(a, now).unwrap();
        let b = sessions.insert(draft(now), now);

        assert_eq!(a.index, b.index);
        assert!(sessions.get(a, now).is_err());
        assert!(sessions.get(b, now).is_ok());
    }

    #[test]
    fn test_sessions_expire_when_idle() {
        let mut sessions = arena();
        let now = Utc::now();
        let handle = sessions.insert(draft(now), now);

        sessions.get_mut(handle, now + Duration::minutes(50)).unwrap();
        assert!(sessions.get(handle, now + Duration::minutes(100)).is_ok());
        assert!(sessions.get(handle, now + Duration::minutes(111)).is_err());

        assert_eq!(sessions.purge_expired(now + Duration::minutes(111)), 1);
        assert!(sessions.is_empty());
    }
}
