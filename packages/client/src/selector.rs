//! Latest-photo preview selection across the devices of a room.
//!
//! [`PhotoBoard`] keeps the newest candidate per device and answers which
//! one is the preview for a given role. [`LatestPhotoSelector`] wraps it with
//! a debounce so the published preview only changes after a quiet period.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle};

use hondacamera_shared::time::Clock;

use crate::{
    photo::PhotoCandidate,
    roster::{Role, RosterSnapshot},
};

/// Per-device latest candidates plus the roster they are judged against
#[derive(Debug, Default, Clone)]
pub struct PhotoBoard {
    latest: HashMap<String, PhotoCandidate>,
    /// When each `(device, sequence)` pair was first observed (millis)
    first_seen: HashMap<(String, i64), i64>,
    roster: RosterSnapshot,
}

impl PhotoBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a candidate observed at `observed_at` (millis).
    ///
    /// The device's entry is replaced only when the sequence strictly exceeds
    /// the stored one. Returns whether the entry changed.
    pub fn ingest(&mut self, candidate: PhotoCandidate, observed_at: i64) -> bool {
        if candidate.image_path.trim().is_empty() {
            return false;
        }

        let stored = self
            .latest
            .get(&candidate.device_id)
            .map(|current| current.sequence);
        if let Some(stored) = stored
            && candidate.sequence < stored
        {
            return false;
        }

        self.first_seen
            .entry((candidate.device_id.clone(), candidate.sequence))
            .or_insert(observed_at);

        match stored {
            Some(stored) if candidate.sequence == stored => false,
            _ => {
                let device_id = candidate.device_id.clone();
                let sequence = candidate.sequence;
                self.first_seen
                    .retain(|(device, seq), _| device != &device_id || *seq >= sequence);
                self.latest.insert(device_id, candidate);
                true
            }
        }
    }

    pub fn set_roster(&mut self, roster: RosterSnapshot) {
        self.roster = roster;
    }

    pub fn roster(&self) -> &RosterSnapshot {
        &self.roster
    }

    pub fn latest_for(&self, device_id: &str) -> Option<&PhotoCandidate> {
        self.latest.get(device_id)
    }

    pub fn first_seen(&self, device_id: &str, sequence: i64) -> Option<i64> {
        self.first_seen
            .get(&(device_id.to_string(), sequence))
            .copied()
    }

    /// The preview for a client with `own_device_id` playing `role`
    pub fn select(&self, own_device_id: &str, role: Role) -> Option<PhotoCandidate> {
        select_preview(
            &self.latest,
            &self.first_seen,
            &self.roster,
            own_device_id,
            role,
        )
    }
}

/// Pick the preview photo.
///
/// Shooters only ever see their own latest photo. Recorders see the newest
/// photo of the room; among devices tied at the newest sequence, roster
/// shooters are preferred, then the pair observed first, then the smaller
/// device id.
pub fn select_preview(
    latest: &HashMap<String, PhotoCandidate>,
    first_seen: &HashMap<(String, i64), i64>,
    roster: &RosterSnapshot,
    own_device_id: &str,
    role: Role,
) -> Option<PhotoCandidate> {
    if role == Role::Shooter {
        return latest.get(own_device_id).cloned();
    }

    let max_sequence = latest.values().map(|c| c.sequence).max()?;
    let ties: Vec<&PhotoCandidate> = latest
        .values()
        .filter(|c| c.sequence == max_sequence)
        .collect();

    let prefer_shooters = ties.iter().any(|c| roster.is_shooter(&c.device_id));

    ties.into_iter()
        .filter(|c| !prefer_shooters || roster.is_shooter(&c.device_id))
        .min_by_key(|c| {
            let seen = first_seen
                .get(&(c.device_id.clone(), c.sequence))
                .copied()
                .unwrap_or(i64::MAX);
            (seen, c.device_id.clone())
        })
        .cloned()
}

struct SelectorState {
    board: PhotoBoard,
    role: Role,
    /// Incremented on every reschedule; only the latest timer may publish
    epoch: u64,
    pending: Option<JoinHandle<()>>,
}

/// Debounced preview selection for one client.
///
/// Every `ingest`/`ingest_roster` restarts the quiet period; when it elapses
/// the winner is recomputed and published to subscribers. Must be used from
/// within a tokio runtime.
pub struct LatestPhotoSelector {
    own_device_id: String,
    debounce: Duration,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<SelectorState>>,
    preview_tx: Arc<watch::Sender<Option<PhotoCandidate>>>,
}

impl LatestPhotoSelector {
    pub fn new(
        own_device_id: impl Into<String>,
        role: Role,
        debounce: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (preview_tx, _) = watch::channel(None);
        Self {
            own_device_id: own_device_id.into(),
            debounce,
            clock,
            state: Arc::new(Mutex::new(SelectorState {
                board: PhotoBoard::new(),
                role,
                epoch: 0,
                pending: None,
            })),
            preview_tx: Arc::new(preview_tx),
        }
    }

    pub fn own_device_id(&self) -> &str {
        &self.own_device_id
    }

    pub fn role(&self) -> Role {
        self.lock().role
    }

    /// Switch the policy, e.g. after the room accepted a join
    pub fn set_role(&self, role: Role) {
        let mut state = self.lock();
        if state.role != role {
            state.role = role;
            self.schedule(&mut state);
        }
    }

    /// Feed a photo candidate. Returns whether the per-device map changed.
    pub fn ingest(&self, candidate: PhotoCandidate) -> bool {
        let observed_at = self.clock.now_millis();
        let mut state = self.lock();
        let changed = state.board.ingest(candidate, observed_at);
        self.schedule(&mut state);
        changed
    }

    /// Replace the roster snapshot
    pub fn ingest_roster(&self, roster: RosterSnapshot) {
        let mut state = self.lock();
        state.board.set_roster(roster);
        self.schedule(&mut state);
    }

    /// Winner according to the current state, ignoring the debounce
    pub fn current(&self) -> Option<PhotoCandidate> {
        let state = self.lock();
        state.board.select(&self.own_device_id, state.role)
    }

    /// Last published preview
    pub fn preview(&self) -> Option<PhotoCandidate> {
        self.preview_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PhotoCandidate>> {
        self.preview_tx.subscribe()
    }

    /// Snapshot of the underlying board
    pub fn board(&self) -> PhotoBoard {
        self.lock().board.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SelectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule(&self, state: &mut SelectorState) {
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        state.epoch = state.epoch.wrapping_add(1);

        let epoch = state.epoch;
        let shared = Arc::clone(&self.state);
        let preview_tx = Arc::clone(&self.preview_tx);
        let own_device_id = self.own_device_id.clone();
        let debounce = self.debounce;

        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;

            let winner = {
                let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                if state.epoch != epoch {
                    return;
                }
                state.pending = None;
                state.board.select(&own_device_id, state.role)
            };

            preview_tx.send_if_modified(|current| {
                if *current == winner {
                    return false;
                }
                tracing::debug!(
                    "Preview changed to {:?}",
                    winner.as_ref().map(|c| (&c.device_id, c.sequence))
                );
                *current = winner;
                true
            });
        }));
    }
}

impl Drop for LatestPhotoSelector {
    fn drop(&mut self) {
        let mut state = self.lock();
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hondacamera_shared::time::{ManualClock, parse_rfc3339_millis};

    fn candidate(device_id: &str, sequence: i64) -> PhotoCandidate {
        PhotoCandidate {
            sequence,
            device_id: device_id.to_string(),
            image_path: format!("/api/pictures/{}-{}/image", device_id, sequence),
            captured_at: None,
            picture_id: None,
        }
    }

    fn roster(shooters: &[&str], recorder: Option<&str>) -> RosterSnapshot {
        RosterSnapshot {
            recorder: recorder.map(str::to_string),
            shooters: shooters.iter().map(|s| s.to_string()).collect(),
            ..RosterSnapshot::default()
        }
    }

    // ========================================
    // PhotoBoard
    // ========================================

    #[test]
    fn test_ingest_never_regresses_sequence() {
        // テスト項目: 端末ごとの保存済み候補は小さい seq に戻らない
        // given (前提条件):
        let mut board = PhotoBoard::new();
        let arrivals = [5, 3, 9, 1, 9, 7, 12, 11];

        // when (操作) / then (期待する結果):
        let mut highest = i64::MIN;
        for (i, seq) in arrivals.into_iter().enumerate() {
            board.ingest(candidate("dev-a", seq), i as i64);
            highest = highest.max(seq);
            assert_eq!(board.latest_for("dev-a").unwrap().sequence, highest);
        }
    }

    #[test]
    fn test_equal_sequence_keeps_first_candidate() {
        // テスト項目: 同じ seq の候補は最初に届いたものが維持される
        // given (前提条件):
        let mut board = PhotoBoard::new();
        let first = candidate("dev-a", 4);
        let mut second = candidate("dev-a", 4);
        second.image_path = "/other".to_string();

        // when (操作):
        let changed_first = board.ingest(first.clone(), 10);
        let changed_second = board.ingest(second, 20);

        // then (期待する結果):
        assert!(changed_first);
        assert!(!changed_second);
        assert_eq!(board.latest_for("dev-a"), Some(&first));
    }

    #[test]
    fn test_duplicate_pair_keeps_first_observed_time() {
        // テスト項目: 同じ (端末, seq) の重複受信では初回観測時刻が変わらない
        // given (前提条件):
        let mut board = PhotoBoard::new();
        board.ingest(candidate("dev-a", 4), 100);

        // when (操作):
        board.ingest(candidate("dev-a", 4), 200);
        board.ingest(candidate("dev-a", 4), 300);

        // then (期待する結果):
        assert_eq!(board.first_seen("dev-a", 4), Some(100));
    }

    #[test]
    fn test_empty_image_path_is_discarded() {
        // テスト項目: 画像パスが空の候補は保存されない
        let mut board = PhotoBoard::new();
        let mut broken = candidate("dev-a", 4);
        broken.image_path = "  ".to_string();

        assert!(!board.ingest(broken, 1));
        assert!(board.latest_for("dev-a").is_none());
        assert_eq!(board.select("rec", Role::Recorder), None);
    }

    #[test]
    fn test_superseded_first_seen_entries_are_pruned() {
        // テスト項目: 古い seq の初回観測記録は新しい候補の到着で削除される
        let mut board = PhotoBoard::new();
        board.ingest(candidate("dev-a", 1), 1);
        board.ingest(candidate("dev-a", 2), 2);

        assert_eq!(board.first_seen("dev-a", 1), None);
        assert_eq!(board.first_seen("dev-a", 2), Some(2));
    }

    #[test]
    fn test_shooter_sees_only_own_photo() {
        // テスト項目: shooter は他端末を無視し自端末の最新写真のみを表示する
        // given (前提条件):
        let mut board = PhotoBoard::new();
        board.ingest(candidate("me", 3), 1);
        board.ingest(candidate("other", 50), 2);

        // when (操作):
        let winner = board.select("me", Role::Shooter);
        let no_photo = board.select("nobody", Role::Shooter);

        // then (期待する結果):
        assert_eq!(winner.unwrap().device_id, "me");
        assert_eq!(no_photo, None);
    }

    #[test]
    fn test_recorder_picks_global_maximum() {
        // テスト項目: recorder は全端末の中で最大 seq の写真を選ぶ
        let mut board = PhotoBoard::new();
        board.ingest(candidate("a", 3), 1);
        board.ingest(candidate("b", 8), 2);
        board.ingest(candidate("c", 5), 3);

        let winner = board.select("rec", Role::Recorder).unwrap();

        assert_eq!(winner.device_id, "b");
        assert_eq!(winner.sequence, 8);
    }

    #[test]
    fn test_recorder_prefers_shooter_on_tie_regardless_of_order() {
        // テスト項目: 同点の場合、到着順に関わらず shooter の写真が選ばれる
        for shooter_first in [true, false] {
            // given (前提条件):
            let mut board = PhotoBoard::new();
            board.set_roster(roster(&["shooter"], Some("rec")));
            let arrivals = if shooter_first {
                [candidate("shooter", 10), candidate("rec", 10)]
            } else {
                [candidate("rec", 10), candidate("shooter", 10)]
            };

            // when (操作):
            for (i, c) in arrivals.into_iter().enumerate() {
                board.ingest(c, i as i64);
            }
            let winner = board.select("rec", Role::Recorder).unwrap();

            // then (期待する結果):
            assert_eq!(winner.device_id, "shooter", "shooter_first={shooter_first}");
        }
    }

    #[test]
    fn test_recorder_tie_between_shooters_uses_first_observed() {
        // テスト項目: shooter 同士の同点は初回観測が早い方が選ばれ、重複再配信で変わらない
        // given (前提条件):
        let mut board = PhotoBoard::new();
        board.set_roster(roster(&["a", "b"], None));
        board.ingest(candidate("b", 10), 100);
        board.ingest(candidate("a", 10), 200);

        // when (操作):
        // "a" is redelivered first in a later duplicate burst
        board.ingest(candidate("a", 10), 300);
        board.ingest(candidate("b", 10), 400);
        let winner = board.select("rec", Role::Recorder).unwrap();

        // then (期待する結果):
        assert_eq!(winner.device_id, "b");
    }

    #[test]
    fn test_recorder_without_shooters_in_tie_keeps_full_tie_set() {
        // テスト項目: 同点に shooter がいない場合は全員が対象で初回観測順に選ばれる
        let mut board = PhotoBoard::new();
        board.set_roster(roster(&["elsewhere"], None));
        board.ingest(candidate("x", 7), 50);
        board.ingest(candidate("y", 7), 10);

        let winner = board.select("rec", Role::Recorder).unwrap();

        assert_eq!(winner.device_id, "y");
    }

    #[test]
    fn test_roster_update_can_flip_winner() {
        // テスト項目: 名簿の更新で既存の同点の勝者が入れ替わる
        // given (前提条件):
        let mut board = PhotoBoard::new();
        board.ingest(candidate("x", 7), 10);
        board.ingest(candidate("y", 7), 20);
        assert_eq!(board.select("rec", Role::Recorder).unwrap().device_id, "x");

        // when (操作):
        board.set_roster(roster(&["y"], None));

        // then (期待する結果):
        assert_eq!(board.select("rec", Role::Recorder).unwrap().device_id, "y");
    }

    #[test]
    fn test_scenario_later_pictured_at_wins_for_recorder() {
        // テスト項目: 撮影時刻が新しい shooter B の写真が recorder のプレビューになる
        // given (前提条件):
        let mut board = PhotoBoard::new();
        board.set_roster(roster(&["A", "B"], Some("rec")));
        let a = parse_rfc3339_millis("2024-01-01T00:00:00Z").unwrap();
        let b = parse_rfc3339_millis("2024-01-01T00:00:01Z").unwrap();

        // when (操作):
        board.ingest(candidate("A", a), 1);
        board.ingest(candidate("B", b), 2);

        // then (期待する結果):
        assert_eq!(board.select("rec", Role::Recorder).unwrap().device_id, "B");
    }

    #[test]
    fn test_scenario_lone_recorder_photo_is_selected() {
        // テスト項目: 候補が recorder 自身の写真のみの場合はそれが選ばれる
        let mut board = PhotoBoard::new();
        board.set_roster(roster(&[], Some("A")));

        board.ingest(candidate("A", 1), 1);

        assert_eq!(board.select("A", Role::Recorder).unwrap().device_id, "A");
    }

    // ========================================
    // LatestPhotoSelector (debounce)
    // ========================================

    fn selector(role: Role, clock: &ManualClock) -> LatestPhotoSelector {
        LatestPhotoSelector::new(
            "rec",
            role,
            Duration::from_millis(1200),
            Arc::new(clock.clone()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_is_published_after_quiet_period() {
        // テスト項目: プレビューは静止期間の経過後に公開される
        // given (前提条件):
        let clock = ManualClock::new(0);
        let selector = selector(Role::Recorder, &clock);

        // when (操作):
        selector.ingest(candidate("a", 1));
        tokio::time::sleep(Duration::from_millis(1000)).await;

        // then (期待する結果):
        assert_eq!(selector.preview(), None);
        assert_eq!(selector.current().unwrap().device_id, "a");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(selector.preview().unwrap().device_id, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_ingest_restarts_debounce() {
        // テスト項目: 新しい入力で静止期間がリセットされる
        // given (前提条件):
        let clock = ManualClock::new(0);
        let selector = selector(Role::Recorder, &clock);
        selector.ingest(candidate("a", 1));
        tokio::time::sleep(Duration::from_millis(1000)).await;

        // when (操作):
        selector.ingest(candidate("b", 2));
        tokio::time::sleep(Duration::from_millis(1000)).await;

        // then (期待する結果):
        assert_eq!(selector.preview(), None);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(selector.preview().unwrap().device_id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_settled_winner_with_first_seen_tie_break() {
        // テスト項目: 購読者には初回観測順で決まった勝者が通知される
        // given (前提条件):
        let clock = ManualClock::new(1_000);
        let selector = selector(Role::Recorder, &clock);
        let mut preview_rx = selector.subscribe();
        selector.ingest_roster(roster(&["a", "b"], Some("rec")));

        // when (操作):
        selector.ingest(candidate("a", 10));
        clock.advance(5);
        selector.ingest(candidate("b", 10));
        clock.advance(5);
        selector.ingest(candidate("b", 10));
        selector.ingest(candidate("a", 10));

        // then (期待する結果):
        preview_rx.changed().await.unwrap();
        assert_eq!(preview_rx.borrow().as_ref().unwrap().device_id, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_roster_only_update_republishes() {
        // テスト項目: 写真の追加なしで名簿更新だけでもプレビューが再計算される
        let clock = ManualClock::new(0);
        let selector = selector(Role::Recorder, &clock);
        selector.ingest(candidate("x", 7));
        clock.advance(1);
        selector.ingest(candidate("y", 7));
        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert_eq!(selector.preview().unwrap().device_id, "x");

        selector.ingest_roster(roster(&["y"], None));
        tokio::time::sleep(Duration::from_millis(1300)).await;

        assert_eq!(selector.preview().unwrap().device_id, "y");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_selector_cancels_pending_publish() {
        // テスト項目: セレクタ破棄後は保留中の公開が行われない
        let clock = ManualClock::new(0);
        let selector = selector(Role::Recorder, &clock);
        let preview_rx = selector.subscribe();
        selector.ingest(candidate("a", 1));

        drop(selector);
        tokio::time::sleep(Duration::from_millis(1300)).await;

        assert_eq!(*preview_rx.borrow(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_role_switches_policy() {
        // テスト項目: ロール変更で選択ポリシーが切り替わる
        let clock = ManualClock::new(0);
        let selector = selector(Role::Recorder, &clock);
        selector.ingest(candidate("rec", 1));
        selector.ingest(candidate("other", 5));
        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert_eq!(selector.preview().unwrap().device_id, "other");

        selector.set_role(Role::Shooter);
        tokio::time::sleep(Duration::from_millis(1300)).await;

        assert_eq!(selector.role(), Role::Shooter);
        assert_eq!(selector.preview().unwrap().device_id, "rec");
    }
}
