//! The ordered iteration list.
//!
//! A doubly-linked list of match handles threaded through the arena. With
//! grouping, every group owns a contiguous run of the list; a new group is
//! spliced in after the nearest group that precedes it in key order.

use crate::arena::{Arena, MatchId};
use crate::group::{Group, GroupId, GroupInfo, GroupPolicy};
use crate::matches::Match;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;

pub(crate) struct MatchList {
    pub(crate) first: Option<MatchId>,
    pub(crate) last: Option<MatchId>,
    /// Number of linked matches.
    pub(crate) count: usize,
    /// Bumped on every insertion and removal.
    pub(crate) match_count: u64,
    pub(crate) groups: BTreeMap<GroupId, Group>,
    pub(crate) descending: bool,
}

impl MatchList {
    pub(crate) fn new(descending: bool) -> Self {
        Self {
            first: None,
            last: None,
            count: 0,
            match_count: 0,
            groups: BTreeMap::new(),
            descending,
        }
    }

    /// Links an unlinked match at the end of its group.
    pub(crate) fn insert(
        &mut self,
        arena: &mut Arena<Match>,
        id: MatchId,
        policy: &mut Option<Box<dyn GroupPolicy>>,
    ) {
        let Some(group_id) = arena.get(id).map(|m| m.group_id) else {
            return;
        };
        debug_assert!(arena.get(id).map(|m| !m.linked).unwrap_or(false));

        let after = match self.groups.get(&group_id) {
            Some(group) => group.last,
            None => {
                let ctx = policy.as_mut().and_then(|p| p.on_create(group_id));
                let after = self.preceding_group(group_id).and_then(|g| g.last);
                tracing::debug!(group = group_id, "group created");
                self.groups.insert(
                    group_id,
                    Group {
                        first: Some(id),
                        last: None,
                        info: GroupInfo {
                            ctx,
                            ..GroupInfo::default()
                        },
                    },
                );
                after
            }
        };

        self.link_after(arena, after, id);

        if let Some(group) = self.groups.get_mut(&group_id) {
            group.last = Some(id);
            group.info.table_count += 1;
            group.info.match_count += 1;
        }
        self.count += 1;
        self.match_count += 1;
    }

    /// Unlinks a match. Deletes its group when it was the group's last match.
    pub(crate) fn remove(
        &mut self,
        arena: &mut Arena<Match>,
        id: MatchId,
        policy: &mut Option<Box<dyn GroupPolicy>>,
    ) {
        let Some(m) = arena.get_mut(id) else {
            return;
        };
        if !m.linked {
            return;
        }
        let (prev, next, group_id) = (m.prev, m.next, m.group_id);
        m.prev = None;
        m.next = None;
        m.linked = false;

        match prev.and_then(|p| arena.get_mut(p)) {
            Some(p) => p.next = next,
            None => self.first = next,
        }
        match next.and_then(|n| arena.get_mut(n)) {
            Some(n) => n.prev = prev,
            None => self.last = prev,
        }
        self.count -= 1;
        self.match_count += 1;

        let Some(group) = self.groups.get_mut(&group_id) else {
            debug_assert!(false, "linked match without a group");
            return;
        };
        group.info.table_count -= 1;
        group.info.match_count += 1;
        if group.first == Some(id) && group.last == Some(id) {
            if let Some(group) = self.groups.remove(&group_id) {
                tracing::debug!(group = group_id, "group deleted");
                if let Some(policy) = policy.as_mut() {
                    policy.on_delete(group_id, group.info.ctx);
                }
            }
        } else if group.first == Some(id) {
            group.first = next;
        } else if group.last == Some(id) {
            group.last = prev;
        }
    }

    /// Returns the group iterated right before `group_id` would be.
    fn preceding_group(&self, group_id: GroupId) -> Option<&Group> {
        if self.descending {
            self.groups
                .range(group_id.saturating_add(1)..)
                .next()
                .filter(|(key, _)| **key > group_id)
                .map(|(_, g)| g)
        } else {
            self.groups.range(..group_id).next_back().map(|(_, g)| g)
        }
    }

    /// Inserts `id` after `after`, or at the head when `after` is None.
    fn link_after(&mut self, arena: &mut Arena<Match>, after: Option<MatchId>, id: MatchId) {
        let next = match after {
            Some(a) => arena.get(a).and_then(|m| m.next),
            None => self.first,
        };
        if let Some(m) = arena.get_mut(id) {
            m.prev = after;
            m.next = next;
            m.linked = true;
        }
        match after.and_then(|a| arena.get_mut(a)) {
            Some(a) => a.next = Some(id),
            None => self.first = Some(id),
        }
        match next.and_then(|n| arena.get_mut(n)) {
            Some(n) => n.prev = Some(id),
            None => self.last = Some(id),
        }
    }

    /// Group keys in iteration order.
    pub(crate) fn group_order(&self) -> impl Iterator<Item = (&GroupId, &Group)> {
        let (fwd, rev) = if self.descending {
            (None, Some(self.groups.iter().rev()))
        } else {
            (Some(self.groups.iter()), None)
        };
        fwd.into_iter().flatten().chain(rev.into_iter().flatten())
    }

    /// Tears down every group, invoking the delete hook.
    pub(crate) fn clear_groups(&mut self, policy: &mut Option<Box<dyn GroupPolicy>>) {
        let groups = core::mem::take(&mut self.groups);
        for (group_id, group) in groups {
            if let Some(policy) = policy.as_mut() {
                policy.on_delete(group_id, group.info.ctx);
            }
        }
        self.first = None;
        self.last = None;
        self.count = 0;
    }
}
