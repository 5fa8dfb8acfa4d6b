//! Family tree and member bookkeeping.
//!
//! Families and members live in two slabs and refer to each other by index.
//! Each family keeps its live members newest first, its parent and children,
//! and CPU carried over from members that exited. A separate catch-all
//! family holds every process that belongs to no tracked family; it is
//! indexed like any other but is not part of the tree.

mod usage;

use std::collections::{HashMap, VecDeque};

use slab::Slab;
use tracing::debug;

use crate::error::FatalError;
use crate::process::{Pid, ProcessRecord};

pub use usage::{FamilyDump, FamilyUsage, ProcessDump};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FamilyId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberId(usize);

/// One live process assigned to a family.
#[derive(Debug)]
pub struct Member {
    record: ProcessRecord,
    family: FamilyId,
    seen: bool,
}

impl Member {
    pub fn record(&self) -> &ProcessRecord {
        &self.record
    }

    pub fn family(&self) -> FamilyId {
        self.family
    }
}

#[derive(Debug)]
pub struct Family {
    root_pid: Pid,
    root_birthday: u64,
    watcher_pid: Pid,
    max_snapshot_interval: Option<u64>,
    parent: Option<FamilyId>,
    children: Vec<FamilyId>,
    members: VecDeque<MemberId>,
    exited_user_time: u64,
    exited_sys_time: u64,
    max_image_size: u64,
    cgroup: Option<String>,
    created_cgroup: bool,
}

impl Family {
    fn new(root_pid: Pid, root_birthday: u64, watcher_pid: Pid, interval: Option<u64>) -> Self {
        Self {
            root_pid,
            root_birthday,
            watcher_pid,
            max_snapshot_interval: interval,
            parent: None,
            children: Vec::new(),
            members: VecDeque::new(),
            exited_user_time: 0,
            exited_sys_time: 0,
            max_image_size: 0,
            cgroup: None,
            created_cgroup: false,
        }
    }

    pub fn root_pid(&self) -> Pid {
        self.root_pid
    }

    pub fn root_birthday(&self) -> u64 {
        self.root_birthday
    }

    /// 0 means the family is not watched.
    pub fn watcher_pid(&self) -> Pid {
        self.watcher_pid
    }

    /// Seconds; `None` is infinite.
    pub fn max_snapshot_interval(&self) -> Option<u64> {
        self.max_snapshot_interval
    }

    pub fn parent(&self) -> Option<FamilyId> {
        self.parent
    }

    pub fn children(&self) -> &[FamilyId] {
        &self.children
    }

    pub fn member_ids(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.members.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn exited_cpu(&self) -> (u64, u64) {
        (self.exited_user_time, self.exited_sys_time)
    }

    pub fn max_image_size(&self) -> u64 {
        self.max_image_size
    }

    pub fn cgroup(&self) -> Option<&str> {
        self.cgroup.as_deref()
    }

    /// True when the daemon created the cgroup and must remove it.
    pub fn created_cgroup(&self) -> bool {
        self.created_cgroup
    }
}

/// Arena owning every family and member plus the pid and root-pid indices.
#[derive(Debug)]
pub struct FamilyArena {
    families: Slab<Family>,
    members: Slab<Member>,
    by_pid: HashMap<Pid, MemberId>,
    by_root: HashMap<Pid, FamilyId>,
    root: FamilyId,
    catch_all: FamilyId,
}

impl FamilyArena {
    /// Creates the arena with its root family and the catch-all.
    pub fn new(root_pid: Pid, root_birthday: u64, watcher_pid: Pid, interval: Option<u64>) -> Self {
        let mut families = Slab::new();
        let root = FamilyId(families.insert(Family::new(
            root_pid,
            root_birthday,
            watcher_pid,
            interval,
        )));
        let catch_all = FamilyId(families.insert(Family::new(0, 0, 0, None)));

        Self {
            families,
            members: Slab::new(),
            by_pid: HashMap::new(),
            by_root: HashMap::from([(root_pid, root)]),
            root,
            catch_all,
        }
    }

    pub fn root(&self) -> FamilyId {
        self.root
    }

    pub fn catch_all(&self) -> FamilyId {
        self.catch_all
    }

    pub fn family(&self, id: FamilyId) -> &Family {
        &self.families[id.0]
    }

    fn family_mut(&mut self, id: FamilyId) -> &mut Family {
        &mut self.families[id.0]
    }

    pub fn member(&self, id: MemberId) -> &Member {
        &self.members[id.0]
    }

    pub fn member_id(&self, pid: Pid) -> Option<MemberId> {
        self.by_pid.get(&pid).copied()
    }

    pub fn member_by_pid(&self, pid: Pid) -> Option<&Member> {
        self.member_id(pid).map(|id| self.member(id))
    }

    /// Family whose root is `root_pid`. The catch-all is never returned.
    pub fn lookup_family(&self, root_pid: Pid) -> Option<FamilyId> {
        self.by_root.get(&root_pid).copied()
    }

    /// Number of families in the tree (the catch-all excluded).
    pub fn family_count(&self) -> usize {
        self.families.len() - 1
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self, family: FamilyId) -> impl Iterator<Item = &Member> + '_ {
        self.family(family)
            .members
            .iter()
            .map(|id| &self.members[id.0])
    }

    /// Creates a child family of `parent`. The caller moves the root member in.
    pub fn create_subfamily(
        &mut self,
        parent: FamilyId,
        root_pid: Pid,
        root_birthday: u64,
        watcher_pid: Pid,
        interval: Option<u64>,
    ) -> FamilyId {
        let mut family = Family::new(root_pid, root_birthday, watcher_pid, interval);
        family.parent = Some(parent);
        let id = FamilyId(self.families.insert(family));
        self.family_mut(parent).children.push(id);
        self.by_root.insert(root_pid, id);
        id
    }

    pub fn set_cgroup(&mut self, family: FamilyId, cgroup: Option<String>, created: bool) {
        let f = self.family_mut(family);
        f.created_cgroup = created && cgroup.is_some();
        f.cgroup = cgroup;
    }

    /// Adds a new member at the head of `family`'s list.
    pub fn add_member(
        &mut self,
        family: FamilyId,
        record: ProcessRecord,
    ) -> Result<MemberId, FatalError> {
        let pid = record.pid;
        if self.by_pid.contains_key(&pid) {
            return Err(FatalError::Invariant(format!(
                "pid {} is already a member",
                pid
            )));
        }
        let id = MemberId(self.members.insert(Member {
            record,
            family,
            seen: false,
        }));
        self.family_mut(family).members.push_front(id);
        self.by_pid.insert(pid, id);
        Ok(id)
    }

    /// Replaces a member's record with the latest snapshot and marks it seen.
    pub fn still_alive(&mut self, member: MemberId, record: ProcessRecord) {
        let member = &mut self.members[member.0];
        member.record = record;
        member.seen = true;
    }

    /// Destroys members not seen since the last call, folding their CPU into
    /// the family's carried-over totals. Returns the pids removed.
    pub fn remove_exited_processes(&mut self, family: FamilyId) -> Vec<Pid> {
        let ids: Vec<MemberId> = self.family(family).members.iter().copied().collect();
        let mut survivors = VecDeque::with_capacity(ids.len());
        let mut exited = Vec::new();
        let (mut user, mut sys) = (0, 0);

        for id in ids {
            let member = &mut self.members[id.0];
            if member.seen {
                member.seen = false;
                survivors.push_back(id);
                continue;
            }
            user += member.record.user_time;
            sys += member.record.sys_time;
            exited.push(member.record.pid);
            self.by_pid.remove(&member.record.pid);
            self.members.remove(id.0);
        }

        let family = self.family_mut(family);
        family.members = survivors;
        family.exited_user_time += user;
        family.exited_sys_time += sys;
        exited
    }

    /// Relinks a member into `new_family`, at the head of its list.
    pub fn move_to_subfamily(&mut self, member: MemberId, new_family: FamilyId) {
        let old = self.members[member.0].family;
        if old == new_family {
            return;
        }
        self.family_mut(old).members.retain(|id| *id != member);
        self.family_mut(new_family).members.push_front(member);
        self.members[member.0].family = new_family;
    }

    /// Dissolves `family` into its parent: live members and carried-over CPU
    /// move up, child families are reparented. Returns the parent.
    pub fn fold_into_parent(&mut self, family: FamilyId) -> Result<FamilyId, FatalError> {
        let Some(parent) = self.family(family).parent else {
            return Err(FatalError::Invariant(format!(
                "family {} has no parent to fold into",
                self.family(family).root_pid
            )));
        };

        let removed = self.families.remove(family.0);
        self.by_root.remove(&removed.root_pid);

        for id in &removed.members {
            self.members[id.0].family = parent;
        }
        for child in &removed.children {
            self.family_mut(*child).parent = Some(parent);
        }

        let target = self.family_mut(parent);
        target.exited_user_time += removed.exited_user_time;
        target.exited_sys_time += removed.exited_sys_time;
        target.children.retain(|c| *c != family);
        target.children.extend(removed.children);
        // our list goes in front of the parent's, order preserved
        for id in removed.members.into_iter().rev() {
            target.members.push_front(id);
        }

        debug!(
            "family {} folded into family {}",
            removed.root_pid, target.root_pid
        );
        Ok(parent)
    }

    /// True if `candidate` is a strict descendant of `ancestor`.
    pub fn is_descendant(&self, candidate: FamilyId, ancestor: FamilyId) -> bool {
        let mut current = self.family(candidate).parent;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.family(id).parent;
        }
        false
    }

    /// Distance from the top of the tree.
    pub fn depth(&self, family: FamilyId) -> usize {
        let mut depth = 0;
        let mut current = self.family(family).parent;
        while let Some(id) = current {
            depth += 1;
            current = self.family(id).parent;
        }
        depth
    }

    /// `family` followed by all its descendants, parents before children.
    pub fn preorder(&self, family: FamilyId) -> Vec<FamilyId> {
        let mut order = Vec::new();
        let mut stack = vec![family];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.family(id).children.iter().rev().copied());
        }
        order
    }

    /// Descendants of `family` and then `family`, children before parents.
    pub fn postorder(&self, family: FamilyId) -> Vec<FamilyId> {
        let mut order = self.preorder(family);
        order.reverse();
        order
    }

    /// Usage of the family's own live members plus carried-over CPU.
    pub fn aggregate_usage(&self, family: FamilyId) -> FamilyUsage {
        let f = self.family(family);
        let mut usage = FamilyUsage {
            user_cpu_time: f.exited_user_time,
            sys_cpu_time: f.exited_sys_time,
            ..Default::default()
        };
        for member in self.members(family) {
            let record = &member.record;
            usage.user_cpu_time += record.user_time;
            usage.sys_cpu_time += record.sys_time;
            usage.percent_cpu += record.percent_cpu;
            usage.total_image_size += record.image_size;
            usage.total_resident_set_size += record.rss;
            usage.num_procs += 1;
        }
        usage
    }

    /// Adds the family's live image sizes to `children_total`, raises the
    /// high-water mark if needed and returns the combined current total.
    pub fn update_max_image_size(&mut self, family: FamilyId, children_total: u64) -> u64 {
        let total = children_total
            + self
                .members(family)
                .map(|m| m.record.image_size)
                .sum::<u64>();
        self.raise_max_image_size(family, total);
        total
    }

    pub fn raise_max_image_size(&mut self, family: FamilyId, value: u64) {
        let f = self.family_mut(family);
        f.max_image_size = f.max_image_size.max(value);
    }

    pub fn dump(&self, family: FamilyId) -> FamilyDump {
        let f = self.family(family);
        FamilyDump {
            parent_root: f.parent.map(|p| self.family(p).root_pid).unwrap_or(0),
            root_pid: f.root_pid,
            watcher_pid: f.watcher_pid,
            max_image_size: f.max_image_size,
            processes: self
                .members(family)
                .map(|m| ProcessDump {
                    pid: m.record.pid,
                    ppid: m.record.ppid,
                    birthday: m.record.birthday,
                    user_time: m.record.user_time,
                    sys_time: m.record.sys_time,
                })
                .collect(),
        }
    }

    /// Tightest maximum snapshot interval over the tree; `None` is infinite.
    pub fn snapshot_interval(&self) -> Option<u64> {
        self.preorder(self.root)
            .into_iter()
            .filter_map(|id| self.family(id).max_snapshot_interval)
            .min()
    }
}
