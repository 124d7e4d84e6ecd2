//! The update-catchup engine: ordered consumption of server deltas and
//! gap recovery through `updates.getDifference`.
//!
//! Four cursors (`pts`, `qts`, `seq`, `date`) mirror the server's idea of
//! what this client has seen. An update either lands exactly on the next
//! cursor value (applied), behind it (already seen, dropped) or past it
//! (a gap — fetch the difference). Channels carry their own `pts` and
//! their own lock.

use std::sync::atomic::Ordering;

use courier_tl::schema::updates::{ChannelDifference, Difference};
use courier_tl::{enums, types, Deserializable, Serializable};

use crate::query::{Query, QueryHandler, QueryPolicy};
use crate::{ExecOption, UserAgent};

/// Batch size for `updates.getChannelDifference`.
const CHANNEL_DIFFERENCE_LIMIT: i32 = 100;

// ─── Cursors ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateState {
    pub pts: i32,
    pub qts: i32,
    pub seq: i32,
    pub date: i32,
}

/// Outcome of checking an incoming `(pts, pts_count)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtsCheck {
    /// In order — apply and advance.
    Apply,
    /// Jumped past the cursor — fetch the difference.
    Gap,
    /// At or behind the cursor — idempotent replay, drop.
    Duplicate,
}

impl UpdateState {
    pub fn from_server(state: &types::UpdatesState) -> Self {
        Self { pts: state.pts, qts: state.qts, seq: state.seq, date: state.date }
    }

    /// Strict check: `new_pts` must equal `pts + pts_count`. Values at or
    /// below the cursor are replays.
    pub fn check_pts(&self, new_pts: i32, pts_count: i32) -> PtsCheck {
        let expected = self.pts + pts_count;
        if new_pts == expected {
            PtsCheck::Apply
        } else if new_pts > expected {
            PtsCheck::Gap
        } else {
            PtsCheck::Duplicate
        }
    }

    pub fn check_qts(&self, new_qts: i32) -> PtsCheck {
        if new_qts == self.qts + 1 {
            PtsCheck::Apply
        } else if new_qts > self.qts + 1 {
            PtsCheck::Gap
        } else {
            PtsCheck::Duplicate
        }
    }

    pub fn advance_pts(&mut self, new_pts: i32) {
        if new_pts > self.pts {
            self.pts = new_pts;
        }
    }

    pub fn advance_qts(&mut self, new_qts: i32) {
        if new_qts > self.qts {
            self.qts = new_qts;
        }
    }
}

/// Per-channel cursor, kept on the channel record.
#[derive(Clone, Debug, Default)]
pub struct ChannelState {
    pub access_hash: i64,
    pub pts: i32,
    pub diff_locked: bool,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

impl UserAgent {
    /// Entry point for an `Updates` frame read off the wire.
    pub(crate) fn process_updates_frame(&self, body: &[u8]) {
        match enums::Updates::from_bytes(body) {
            Ok(updates) => self.process_updates(updates),
            Err(e) => log::debug!("[updates] undecodable frame dropped: {e}"),
        }
    }

    pub(crate) fn process_updates(&self, updates: enums::Updates) {
        match updates {
            enums::Updates::TooLong => {
                log::info!("[updates] server state too old, fetching difference");
                self.get_difference();
            }
            enums::Updates::Short { update, date } => {
                self.set_date(date);
                self.process_single_update(update);
            }
            enums::Updates::Updates { updates, users, chats: _, date, seq }
            | enums::Updates::Combined { updates, users, chats: _, date, seq_start: _, seq } => {
                if seq != 0 {
                    let current = self.update_state().seq;
                    if seq <= current {
                        return;
                    }
                    if seq != current + 1 {
                        log::warn!("[updates] seq gap ({current} -> {seq}), fetching difference");
                        self.get_difference();
                        return;
                    }
                }
                self.hydrate_users(&users);
                for update in updates {
                    self.process_single_update(update);
                }
                self.set_seq_date(seq, date);
            }
        }
    }

    pub(crate) fn process_single_update(&self, update: enums::Update) {
        use enums::Update;
        match update {
            Update::NewMessage { message, pts, pts_count } => {
                match self.check_and_advance_pts(pts, pts_count) {
                    PtsCheck::Apply => self.sink().new_messages(&[message]),
                    PtsCheck::Gap => self.get_difference(),
                    PtsCheck::Duplicate => {}
                }
            }
            Update::NewChannelMessage { message, pts, pts_count } => {
                let channel_id = match &message {
                    enums::Message::Message(m) => match m.peer {
                        enums::Peer::Channel { channel_id } => channel_id,
                        _ => 0,
                    },
                    _ => 0,
                };
                match self.check_channel_pts(channel_id, pts, pts_count) {
                    PtsCheck::Apply => self.sink().new_messages(&[message]),
                    PtsCheck::Gap => self.get_channel_difference(channel_id),
                    PtsCheck::Duplicate => {}
                }
            }
            Update::NewEncryptedMessage { message, qts } => {
                match {
                    let state = self.update_state();
                    state.check_qts(qts)
                } {
                    PtsCheck::Apply => {
                        self.advance_qts(qts);
                        self.process_encrypted_message(message);
                    }
                    PtsCheck::Gap => self.get_difference(),
                    PtsCheck::Duplicate => {}
                }
            }
            Update::Encryption { chat, date: _ } => {
                self.handle_encryption_update(chat);
            }
            Update::ReadHistoryInbox { peer, max_id: _, pts, pts_count } => {
                if let PtsCheck::Apply = self.check_and_advance_pts(pts, pts_count) {
                    self.sink().messages_mark_read_in(peer, pts);
                } else if let PtsCheck::Gap = self.update_state().check_pts(pts, pts_count) {
                    self.get_difference();
                }
            }
            Update::DeleteMessages { messages, pts, pts_count } => {
                match self.check_and_advance_pts(pts, pts_count) {
                    PtsCheck::Apply => {
                        for id in messages {
                            self.sink().message_deleted(id);
                        }
                    }
                    PtsCheck::Gap => self.get_difference(),
                    PtsCheck::Duplicate => {}
                }
            }
            Update::ChannelTooLong { channel_id } => {
                self.get_channel_difference(channel_id);
            }
            Update::UserDeleted { user_id } => {
                self.sink().user_deleted(user_id);
            }
        }
    }

    /// Cursor advance for a `pts`-bearing RPC reply (mark-read and
    /// friends); a gap still triggers a difference fetch.
    pub(crate) fn apply_affected_pts(&self, pts: i32, pts_count: i32) {
        if self.check_and_advance_pts(pts, pts_count) == PtsCheck::Gap {
            self.get_difference();
        }
    }

    fn check_and_advance_pts(&self, pts: i32, pts_count: i32) -> PtsCheck {
        let mut state = self.update_state_mut();
        let check = state.check_pts(pts, pts_count);
        if check == PtsCheck::Apply {
            state.advance_pts(pts);
        }
        check
    }

    // ── difference ─────────────────────────────────────────────────────────

    /// Fetch everything missed since the cursors. At most one difference
    /// query runs at a time.
    pub(crate) fn get_difference(&self) {
        if self.inner().diff_locked.swap(true, Ordering::AcqRel) {
            return;
        }
        self.issue_difference_query();
    }

    fn issue_difference_query(&self) {
        let state = self.update_state();
        if state.pts == 0 {
            // never synchronised: just grab the head state
            self.inner().diff_locked.store(false, Ordering::Release);
            self.sync_update_state();
            return;
        }

        log::info!(
            "[updates] getDifference (pts={}, qts={}, date={})",
            state.pts,
            state.qts,
            state.date
        );
        let request = courier_tl::functions::updates::GetDifference {
            pts: state.pts,
            date: state.date,
            qts: state.qts,
        };
        let query = Query::new(
            "get difference",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(DifferenceHandler),
        );
        let ua = self.clone();
        tokio::spawn(async move {
            let dc = ua.working_dc();
            ua.execute(query, dc, ExecOption::Default).await;
        });
    }

    /// `updates.getState` — adopt the server's head cursors.
    pub(crate) fn sync_update_state(&self) {
        let query = Query::new(
            "get state",
            courier_tl::functions::updates::GetState.to_bytes(),
            QueryPolicy::default(),
            Box::new(StateHandler),
        );
        let ua = self.clone();
        tokio::spawn(async move {
            let dc = ua.working_dc();
            ua.execute(query, dc, ExecOption::Default).await;
        });
    }

    // ── channel difference ─────────────────────────────────────────────────

    pub(crate) fn check_channel_pts(&self, channel_id: i32, pts: i32, pts_count: i32) -> PtsCheck {
        let mut channels = self.channels_mut();
        let entry = channels.entry(channel_id).or_default();
        let expected = entry.pts + pts_count;
        if entry.pts == 0 || pts == expected {
            entry.pts = pts.max(entry.pts);
            PtsCheck::Apply
        } else if pts > expected {
            PtsCheck::Gap
        } else {
            PtsCheck::Duplicate
        }
    }

    pub(crate) fn get_channel_difference(&self, channel_id: i32) {
        let (pts, access_hash) = {
            let mut channels = self.channels_mut();
            let entry = channels.entry(channel_id).or_default();
            if entry.diff_locked {
                return;
            }
            entry.diff_locked = true;
            (entry.pts, entry.access_hash)
        };

        log::info!("[updates] getChannelDifference for channel {channel_id} (pts={pts})");
        let request = courier_tl::functions::updates::GetChannelDifference {
            channel: enums::InputChannel { channel_id, access_hash },
            pts: pts.max(1),
            limit: CHANNEL_DIFFERENCE_LIMIT,
        };
        let query = Query::new(
            "get channel difference",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(ChannelDifferenceHandler { channel_id }),
        );
        let ua = self.clone();
        tokio::spawn(async move {
            let dc = ua.working_dc();
            ua.execute(query, dc, ExecOption::Default).await;
        });
    }

    fn hydrate_users(&self, users: &[enums::User]) {
        for user in users {
            self.sink().new_user(user);
        }
    }

    fn apply_difference_body(&self, data: courier_tl::schema::updates::DifferenceData) {
        self.hydrate_users(&data.users);
        if !data.new_messages.is_empty() {
            self.sink().new_messages(&data.new_messages);
        }
        for encrypted in data.new_encrypted_messages {
            self.process_encrypted_message(encrypted);
        }
        for update in data.other_updates {
            self.process_single_update(update);
        }
        *self.update_state_mut() = UpdateState::from_server(&data.state);
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

struct StateHandler;

impl QueryHandler for StateHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        use courier_tl::schema::updates::State;
        match State::from_bytes(body) {
            Ok(State::State(state)) => {
                *ua.update_state_mut() = UpdateState::from_server(&state);
                log::info!(
                    "[updates] state synced (pts={}, qts={}, seq={})",
                    state.pts,
                    state.qts,
                    state.seq
                );
            }
            Err(e) => log::warn!("[updates] bad getState answer: {e}"),
        }
    }

    fn on_error(&self, _ua: &UserAgent, code: i32, text: &str) {
        log::warn!("[updates] getState failed: {code} {text}");
    }
}

struct DifferenceHandler;

impl QueryHandler for DifferenceHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        match Difference::from_bytes(body) {
            Ok(Difference::Empty { date, seq }) => {
                ua.set_seq_date(seq, date);
                ua.inner().diff_locked.store(false, Ordering::Release);
            }
            Ok(Difference::Difference(data)) => {
                ua.apply_difference_body(data);
                ua.inner().diff_locked.store(false, Ordering::Release);
            }
            Ok(Difference::Slice(data)) => {
                // intermediate state: keep the lock and chase the rest
                ua.apply_difference_body(data);
                ua.issue_difference_query();
            }
            Ok(Difference::TooLong { pts }) => {
                ua.update_state_mut().pts = pts;
                ua.inner().diff_locked.store(false, Ordering::Release);
                ua.sync_update_state();
            }
            Err(e) => {
                log::warn!("[updates] bad difference answer: {e}");
                ua.inner().diff_locked.store(false, Ordering::Release);
            }
        }
    }

    fn on_error(&self, ua: &UserAgent, code: i32, text: &str) {
        log::warn!("[updates] getDifference failed: {code} {text}");
        ua.inner().diff_locked.store(false, Ordering::Release);
    }
}

struct ChannelDifferenceHandler {
    channel_id: i32,
}

impl QueryHandler for ChannelDifferenceHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        let unlock = |ua: &UserAgent| {
            if let Some(entry) = ua.channels_mut().get_mut(&self.channel_id) {
                entry.diff_locked = false;
            }
        };

        match ChannelDifference::from_bytes(body) {
            Ok(ChannelDifference::Empty { is_final: _, pts }) => {
                ua.channels_mut().entry(self.channel_id).or_default().pts = pts;
                unlock(ua);
            }
            Ok(ChannelDifference::TooLong { pts }) => {
                // state is unrecoverably old: adopt the head and go again
                ua.channels_mut().entry(self.channel_id).or_default().pts = pts;
                unlock(ua);
                ua.get_channel_difference(self.channel_id);
            }
            Ok(ChannelDifference::Difference(data)) => {
                ua.channels_mut().entry(self.channel_id).or_default().pts = data.pts;
                for user in &data.users {
                    ua.sink().new_user(user);
                }
                if !data.new_messages.is_empty() {
                    ua.sink().new_messages(&data.new_messages);
                }
                for update in data.other_updates {
                    ua.process_single_update(update);
                }
                unlock(ua);
                if !data.is_final {
                    ua.get_channel_difference(self.channel_id);
                }
            }
            Err(e) => {
                log::warn!("[updates] bad channel difference: {e}");
                unlock(ua);
            }
        }
    }

    fn on_error(&self, ua: &UserAgent, code: i32, text: &str) {
        log::warn!(
            "[updates] getChannelDifference for {} failed: {code} {text}",
            self.channel_id
        );
        if let Some(entry) = ua.channels_mut().get_mut(&self.channel_id) {
            entry.diff_locked = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_check_is_strict() {
        let state = UpdateState { pts: 100, qts: 0, seq: 0, date: 0 };
        assert_eq!(state.check_pts(101, 1), PtsCheck::Apply);
        assert_eq!(state.check_pts(103, 3), PtsCheck::Apply);
        assert_eq!(state.check_pts(105, 1), PtsCheck::Gap);
        assert_eq!(state.check_pts(100, 1), PtsCheck::Duplicate);
        assert_eq!(state.check_pts(99, 0), PtsCheck::Duplicate);
    }

    #[test]
    fn qts_advances_one_at_a_time() {
        let state = UpdateState { pts: 0, qts: 7, seq: 0, date: 0 };
        assert_eq!(state.check_qts(8), PtsCheck::Apply);
        assert_eq!(state.check_qts(10), PtsCheck::Gap);
        assert_eq!(state.check_qts(7), PtsCheck::Duplicate);
    }

    #[test]
    fn advance_never_regresses() {
        let mut state = UpdateState { pts: 50, qts: 3, seq: 0, date: 0 };
        state.advance_pts(49);
        assert_eq!(state.pts, 50);
        state.advance_pts(55);
        assert_eq!(state.pts, 55);
        state.advance_qts(2);
        assert_eq!(state.qts, 3);
    }
}
