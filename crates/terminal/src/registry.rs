//! In-memory bookkeeping of terminals and the sessions that own them.
//!
//! Every mutation goes through [`TerminalRegistry::track`] and
//! [`TerminalRegistry::untrack`], which keep these invariants:
//!
//! - a terminal id is in the record map iff it is in exactly one session's set;
//! - a session's default, if set, is a member of that session's set;
//! - a session with no terminals has no index entry.
//!
//! Title counters are kept apart from the index so a session that momentarily
//! has no terminals still never reuses a title.

use collections::{index_set, FxHashMap, IndexSet};
use settings::constants;

use crate::ids::{SessionId, TerminalId};

/// Terminals of one session.
#[derive(Debug)]
pub struct SessionIndex {
    terminal_ids: IndexSet<TerminalId>,
    default_terminal_id: Option<TerminalId>,
}

impl SessionIndex {
    fn new() -> Self {
        Self {
            terminal_ids: index_set(),
            default_terminal_id: None,
        }
    }

    pub fn terminal_ids(&self) -> impl Iterator<Item = &TerminalId> {
        self.terminal_ids.iter()
    }

    pub fn default_terminal_id(&self) -> Option<&TerminalId> {
        self.default_terminal_id.as_ref()
    }
}

struct Tracked<R> {
    session_id: SessionId,
    record: R,
}

pub struct TerminalRegistry<R> {
    records: FxHashMap<TerminalId, Tracked<R>>,
    sessions: FxHashMap<SessionId, SessionIndex>,
    title_counters: FxHashMap<SessionId, u64>,
}

impl<R> Default for TerminalRegistry<R> {
    fn default() -> Self {
        Self {
            records: FxHashMap::default(),
            sessions: FxHashMap::default(),
            title_counters: FxHashMap::default(),
        }
    }
}

impl<R> TerminalRegistry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a terminal to a session. It becomes the default when `make_default`
    /// is set or the session has none yet.
    pub fn track(
        &mut self,
        session_id: SessionId,
        terminal_id: TerminalId,
        record: R,
        make_default: bool,
    ) {
        if self.records.contains_key(&terminal_id) {
            util::debug_panic!("terminal {terminal_id} tracked twice");
            self.untrack(&terminal_id);
        }

        let index = self
            .sessions
            .entry(session_id.clone())
            .or_insert_with(SessionIndex::new);
        index.terminal_ids.insert(terminal_id.clone());
        if make_default || index.default_terminal_id.is_none() {
            index.default_terminal_id = Some(terminal_id.clone());
        }

        self.records.insert(terminal_id, Tracked { session_id, record });
    }

    /// Remove a terminal everywhere. A removed default is handed to a
    /// remaining member; an emptied session loses its index entry.
    pub fn untrack(&mut self, terminal_id: &TerminalId) -> Option<(SessionId, R)> {
        let Tracked { session_id, record } = self.records.remove(terminal_id)?;

        match self.sessions.get_mut(&session_id) {
            Some(index) => {
                index.terminal_ids.shift_remove(terminal_id);
                if index.default_terminal_id.as_ref() == Some(terminal_id) {
                    index.default_terminal_id = index.terminal_ids.first().cloned();
                }
                if index.terminal_ids.is_empty() {
                    self.sessions.remove(&session_id);
                }
            }
            None => {
                util::debug_panic!("terminal {terminal_id} had no index in session {session_id}");
            }
        }

        Some((session_id, record))
    }

    /// Current default of a session, adopting a remaining member if the
    /// recorded default is stale.
    pub fn resolve_default(&mut self, session_id: &SessionId) -> Option<TerminalId> {
        let index = self.sessions.get_mut(session_id)?;
        if let Some(default) = &index.default_terminal_id {
            if self.records.contains_key(default) && index.terminal_ids.contains(default) {
                return Some(default.clone());
            }
        }
        let fallback = index
            .terminal_ids
            .iter()
            .find(|id| self.records.contains_key(*id))
            .cloned();
        index.default_terminal_id = fallback.clone();
        fallback
    }

    /// Next display title for a session: "Terminal 1", "Terminal 2", ...
    pub fn next_title(&mut self, session_id: &SessionId) -> String {
        let counter = self.title_counters.entry(session_id.clone()).or_insert(0);
        *counter += 1;
        format!("{} {}", constants::terminal::TITLE_PREFIX, counter)
    }

    /// End a session's lifetime: drop its index, its title counter, and any
    /// records still attached to it.
    pub fn forget_session(&mut self, session_id: &SessionId) -> Vec<(TerminalId, R)> {
        self.title_counters.remove(session_id);
        let Some(index) = self.sessions.remove(session_id) else {
            return Vec::new();
        };
        index
            .terminal_ids
            .into_iter()
            .filter_map(|id| {
                let tracked = self.records.remove(&id)?;
                Some((id, tracked.record))
            })
            .collect()
    }

    /// Drop the title counters of sessions that have no terminals left.
    ///
    /// Closing terminals one at a time never forgets the session, so until
    /// this runs a long-lived process keeps one counter per session id it
    /// has seen. Titles within a session are not reused while its counter
    /// lives.
    pub fn forget_idle_sessions(&mut self) {
        let sessions = &self.sessions;
        self.title_counters
            .retain(|session_id, _| sessions.contains_key(session_id));
    }

    pub fn get(&self, terminal_id: &TerminalId) -> Option<&R> {
        self.records.get(terminal_id).map(|tracked| &tracked.record)
    }

    pub fn get_mut(&mut self, terminal_id: &TerminalId) -> Option<&mut R> {
        self.records
            .get_mut(terminal_id)
            .map(|tracked| &mut tracked.record)
    }

    pub fn session_of(&self, terminal_id: &TerminalId) -> Option<&SessionId> {
        self.records
            .get(terminal_id)
            .map(|tracked| &tracked.session_id)
    }

    pub fn contains(&self, terminal_id: &TerminalId) -> bool {
        self.records.contains_key(terminal_id)
    }

    pub fn has_session(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session(&self, session_id: &SessionId) -> Option<&SessionIndex> {
        self.sessions.get(session_id)
    }

    /// Terminals of a session in creation order.
    pub fn terminal_ids(&self, session_id: &SessionId) -> Vec<TerminalId> {
        self.sessions
            .get(session_id)
            .map(|index| index.terminal_ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Records of a session in creation order.
    pub fn records_in_session<'a>(
        &'a self,
        session_id: &SessionId,
    ) -> impl Iterator<Item = &'a R> + 'a {
        self.sessions
            .get(session_id)
            .into_iter()
            .flat_map(|index| index.terminal_ids.iter())
            .filter_map(|id| self.get(id))
    }

    pub fn all_terminal_ids(&self) -> Vec<TerminalId> {
        self.records.keys().cloned().collect()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        let mut seen = 0;
        for (session_id, index) in &self.sessions {
            assert!(
                !index.terminal_ids.is_empty(),
                "session {session_id} has an empty index"
            );
            for id in &index.terminal_ids {
                let tracked = self.records.get(id).expect("indexed terminal has a record");
                assert_eq!(&tracked.session_id, session_id);
                seen += 1;
            }
            if let Some(default) = &index.default_terminal_id {
                assert!(index.terminal_ids.contains(default));
            } else {
                panic!("non-empty session {session_id} has no default");
            }
        }
        assert_eq!(seen, self.records.len());
    }
}
