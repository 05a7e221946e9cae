//! Registration and deletion sessions.
//!
//! At most one session is open at a time; requesting one cancels the other.
//! The feature worker advances both once per cycle with [`Sessions::tick`],
//! which is what gives the tick limit its wall-clock meaning.

/// Something the user should be told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    RegisterStarted,
    RegisterTimedOut,
    RegisterLimitReached,
    RegisterAlready,
    RegisterSucceeded,
    DeleteStarted,
    DeleteTimedOut,
    DeleteSucceeded,
}

/// Tick counters after a [`Sessions::tick`]. A counter is non-zero only
/// while its session is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionTicks {
    pub registration: u32,
    pub deletion: u32,
}

#[derive(Debug, Default)]
struct Registration {
    pending: bool,
    ticks: u32,
    hits: u32,
}

#[derive(Debug, Default)]
struct Deletion {
    pending: bool,
    ticks: u32,
}

#[derive(Debug)]
pub struct Sessions {
    registration: Registration,
    deletion: Deletion,
    tick_limit: u32,
}

impl Sessions {
    pub fn new(tick_limit: u32) -> Self {
        Self {
            registration: Registration::default(),
            deletion: Deletion::default(),
            tick_limit,
        }
    }

    /// Open a registration session. Ignored while a previous session is
    /// still counting "already registered" hits.
    pub fn request_registration(&mut self) {
        self.deletion.pending = false;
        if self.registration.hits == 0 {
            self.registration.pending = true;
        }
    }

    pub fn request_deletion(&mut self) {
        self.registration.pending = false;
        self.registration.hits = 0;
        self.deletion.pending = true;
    }

    pub fn registration_pending(&self) -> bool {
        self.registration.pending
    }

    pub fn deletion_pending(&self) -> bool {
        self.deletion.pending
    }

    pub fn any_pending(&self) -> bool {
        self.registration.pending || self.deletion.pending
    }

    /// Advance open sessions by one tick, closing those past the limit.
    /// `enrolled` and `capacity` decide whether registration may proceed.
    pub fn tick(&mut self, enrolled: usize, capacity: usize) -> (SessionTicks, Vec<SessionEvent>) {
        let mut events = Vec::new();

        if self.deletion.pending {
            if self.deletion.ticks == 0 {
                events.push(SessionEvent::DeleteStarted);
            }
            self.deletion.ticks += 1;
            if self.deletion.ticks > self.tick_limit {
                self.deletion.pending = false;
                self.deletion.ticks = 0;
                events.push(SessionEvent::DeleteTimedOut);
            }
        } else {
            self.deletion.ticks = 0;
        }

        if self.registration.pending && enrolled < capacity {
            if self.registration.ticks == 0 {
                events.push(SessionEvent::RegisterStarted);
            }
            self.registration.ticks += 1;
            if self.registration.ticks > self.tick_limit {
                self.close_registration();
                events.push(SessionEvent::RegisterTimedOut);
            }
        } else if self.registration.pending {
            self.close_registration();
            events.push(SessionEvent::RegisterLimitReached);
        } else {
            self.registration.ticks = 0;
        }

        let ticks = SessionTicks {
            registration: self.registration.ticks,
            deletion: self.deletion.ticks,
        };
        (ticks, events)
    }

    /// Count a gallery hit seen while registering. Once more than `limit`
    /// hits accumulate the face is taken to be enrolled already.
    pub fn note_registration_hit(&mut self, limit: u32) -> Option<SessionEvent> {
        if !self.registration.pending {
            return None;
        }
        self.registration.hits += 1;
        if self.registration.hits > limit {
            self.close_registration();
            return Some(SessionEvent::RegisterAlready);
        }
        None
    }

    pub fn complete_registration(&mut self) -> SessionEvent {
        self.close_registration();
        SessionEvent::RegisterSucceeded
    }

    pub fn complete_deletion(&mut self) -> SessionEvent {
        self.deletion.pending = false;
        self.deletion.ticks = 0;
        SessionEvent::DeleteSucceeded
    }

    fn close_registration(&mut self) {
        self.registration.pending = false;
        self.registration.ticks = 0;
        self.registration.hits = 0;
    }
}
