//! The tracking engine.
//!
//! A [`Monitor`] owns the family tree, the trackers and the snapshot
//! provider. Every reconciliation pass runs the same pipeline:
//!
//! ```text
//! FETCHED -> RECONCILED -> PRUNED -> CLASSIFIED -> GC'D -> max image update
//! ```
//!
//! Known processes are matched by (pid, birthday) and refreshed; members
//! that were not observed are dropped with their CPU carried over; new
//! processes go through the trackers in precedence order and, failing all
//! of them, into the catch-all family. Families whose watcher died are
//! folded into their parents.

mod config;
mod signal;

pub use config::{DEFAULT_BIRTHDAY_TOLERANCE, MonitorConfig};
pub use signal::{KillSignaller, RecordingSignaller, Signaller};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::collector::cgroup::CgroupError;
use crate::collector::{CgroupControl, ProcessSource};
use crate::error::{FatalError, ProcdError};
use crate::family::{FamilyArena, FamilyDump, FamilyId, FamilyUsage};
use crate::marker::MarkerSet;
use crate::process::{Pid, ProcessRecord};
use crate::tracker::{
    CgroupTracker, EnvironmentTracker, GroupTracker, LoginTracker, ParentTracker, PidTracker,
    Tracker,
};

pub struct Monitor<S: ProcessSource> {
    source: S,
    config: MonitorConfig,
    arena: FamilyArena,
    pid_tracker: PidTracker,
    group_tracker: GroupTracker,
    cgroup_tracker: CgroupTracker,
    login_tracker: LoginTracker,
    environment_tracker: EnvironmentTracker,
    parent_tracker: ParentTracker,
    signaller: Box<dyn Signaller>,
    cgroups: Option<Box<dyn CgroupControl>>,
    last_snapshot: Instant,
}

impl<S: ProcessSource> Monitor<S> {
    /// Creates the root family for `config.root_pid` and takes the first
    /// snapshot.
    pub fn new(mut source: S, config: MonitorConfig) -> Result<Self, ProcdError> {
        let root_pid = config.root_pid;
        if root_pid <= 0 {
            return Err(ProcdError::BadRootPid(root_pid));
        }
        let birthday = match config.root_birthday {
            Some(birthday) => birthday,
            None => source
                .list_processes()
                .map_err(FatalError::from)?
                .into_iter()
                .find(|p| p.pid == root_pid)
                .map(|p| p.birthday)
                .ok_or(ProcdError::BadRootPid(root_pid))?,
        };
        let watcher = if config.fatal_root_watcher { root_pid } else { 0 };

        let arena = FamilyArena::new(root_pid, birthday, watcher, config.max_snapshot_interval);
        let mut pid_tracker = PidTracker::new(config.birthday_tolerance);
        pid_tracker.add_mapping(arena.root(), root_pid, birthday);

        let mut monitor = Self {
            source,
            config,
            arena,
            pid_tracker,
            group_tracker: GroupTracker::disabled(),
            cgroup_tracker: CgroupTracker::new(),
            login_tracker: LoginTracker::new(),
            environment_tracker: EnvironmentTracker::new(),
            parent_tracker: ParentTracker,
            signaller: Box::new(KillSignaller),
            cgroups: None,
            last_snapshot: Instant::now(),
        };
        monitor.snapshot()?;
        info!(
            "tracking family of pid {} (birthday {}), {} processes seen",
            root_pid,
            birthday,
            monitor.arena.member_count()
        );
        Ok(monitor)
    }

    pub fn with_signaller(mut self, signaller: impl Signaller + 'static) -> Self {
        self.signaller = Box::new(signaller);
        self
    }

    pub fn with_cgroup_control(mut self, control: impl CgroupControl + 'static) -> Self {
        self.cgroups = Some(Box::new(control));
        self
    }

    /// Allows supplementary-group tracking with gids in `min..=max`.
    pub fn enable_group_tracking(&mut self, min: u32, max: u32, allocating: bool) {
        info!(
            "group tracking enabled for gids {}-{} ({})",
            min,
            max,
            if allocating { "allocating" } else { "caller-assigned" }
        );
        self.group_tracker.enable(min, max, allocating);
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn arena(&self) -> &FamilyArena {
        &self.arena
    }

    /// When the last reconciliation pass completed.
    pub fn last_snapshot(&self) -> Instant {
        self.last_snapshot
    }

    /// Runs one reconciliation pass.
    pub fn snapshot(&mut self) -> Result<(), FatalError> {
        let listed = self.source.list_processes()?;
        let tolerance = self.config.birthday_tolerance;

        let mut unclassified = Vec::with_capacity(listed.len());
        for record in listed.into_iter().filter(|p| p.pid != 0) {
            match self.arena.member_id(record.pid) {
                Some(id)
                    if self.arena.member(id).record().same_process(
                        record.pid,
                        record.birthday,
                        tolerance,
                    ) =>
                {
                    self.arena.still_alive(id, record)
                }
                _ => unclassified.push(record),
            }
        }

        let mut families = self.arena.preorder(self.arena.root());
        families.push(self.arena.catch_all());
        for family in families {
            let exited = self.arena.remove_exited_processes(family);
            if !exited.is_empty() {
                debug!(
                    "family {}: pids {:?} exited",
                    self.arena.family(family).root_pid(),
                    exited
                );
            }
        }

        self.classify(&unclassified)?;
        self.collect_unwatched_families()?;
        self.update_max_image_sizes();
        self.last_snapshot = Instant::now();
        Ok(())
    }

    fn classify(&mut self, records: &[ProcessRecord]) -> Result<(), FatalError> {
        let Self {
            arena,
            cgroups,
            pid_tracker,
            group_tracker,
            cgroup_tracker,
            login_tracker,
            environment_tracker,
            parent_tracker,
            ..
        } = self;
        let cgroups = cgroups.as_deref();

        let trackers: [&dyn Tracker; 5] = [
            &*pid_tracker,
            &*group_tracker,
            &*cgroup_tracker,
            &*login_tracker,
            &*environment_tracker,
        ];
        for tracker in trackers {
            for record in records {
                if let Some(family) = tracker.find_family(record, arena) {
                    add_member_to_family(arena, cgroups, family, record, tracker.name())?;
                }
            }
        }

        // a round either claims a process, moves one into a deeper family,
        // or ends the loop
        loop {
            let mut changed = false;
            for record in records {
                if let Some(family) = parent_tracker.find_family(record, arena) {
                    changed |=
                        add_member_to_family(arena, cgroups, family, record, parent_tracker.name())?;
                }
            }
            if !changed {
                break;
            }
        }

        let catch_all = arena.catch_all();
        for record in records {
            if arena.member_id(record.pid).is_none() {
                arena.add_member(catch_all, record.clone())?;
            }
        }
        Ok(())
    }

    /// Unregisters families whose watcher is gone, children first.
    fn collect_unwatched_families(&mut self) -> Result<(), FatalError> {
        let tolerance = self.config.birthday_tolerance;
        for family in self.arena.postorder(self.arena.root()) {
            let f = self.arena.family(family);
            let watcher = f.watcher_pid();
            if watcher == 0 {
                continue;
            }
            // a younger process with the watcher's pid is a reuse
            let alive = self
                .arena
                .member_by_pid(watcher)
                .is_some_and(|m| m.record().birthday <= f.root_birthday() + tolerance);
            if alive {
                continue;
            }
            if family == self.arena.root() {
                if self.config.fatal_root_watcher {
                    return Err(FatalError::WatcherExited(watcher));
                }
                continue;
            }
            info!(
                "watcher {} of family {} exited, unregistering",
                watcher,
                f.root_pid()
            );
            self.unregister(family)?;
        }
        Ok(())
    }

    fn update_max_image_sizes(&mut self) {
        let mut totals: HashMap<FamilyId, u64> = HashMap::new();
        for family in self.arena.postorder(self.arena.root()) {
            let children = self
                .arena
                .family(family)
                .children()
                .iter()
                .filter_map(|child| totals.get(child))
                .sum();
            let total = self.arena.update_max_image_size(family, children);
            totals.insert(family, total);
        }
    }

    fn unregister(&mut self, family: FamilyId) -> Result<(), FatalError> {
        self.pid_tracker.remove_mapping(family);
        self.group_tracker.remove_mapping(family);
        self.cgroup_tracker.remove_mapping(family);
        self.login_tracker.remove_mapping(family);
        self.environment_tracker.remove_mapping(family);

        self.release_cgroup(family);
        let root_pid = self.arena.family(family).root_pid();
        let parent = self.arena.fold_into_parent(family)?;
        info!(
            "family {} unregistered, members moved to family {}",
            root_pid,
            self.arena.family(parent).root_pid()
        );
        Ok(())
    }

    /// Removes a cgroup the family created, first moving its live members
    /// into the parent family's cgroup when there is one.
    fn release_cgroup(&self, family: FamilyId) {
        let f = self.arena.family(family);
        let (Some(control), Some(group)) = (self.cgroups.as_deref(), f.cgroup()) else {
            return;
        };
        if !f.created_cgroup() {
            return;
        }
        if let Some(target) = f.parent().and_then(|p| self.arena.family(p).cgroup()) {
            for member in self.arena.members(family) {
                let pid = member.record().pid;
                if let Err(e) = control.migrate(pid, target) {
                    warn!("failed to move pid {} into cgroup {}: {}", pid, target, e);
                }
            }
        }
        remove_cgroup(control, group);
    }

    fn lookup(&self, pid: Pid, zero_means_root: bool) -> Result<FamilyId, ProcdError> {
        if pid == 0 && zero_means_root {
            return Ok(self.arena.root());
        }
        self.arena
            .lookup_family(pid)
            .ok_or(ProcdError::FamilyNotFound(pid))
    }

    /// Starts tracking the descendants of `root_pid` as their own family.
    ///
    /// `max_interval` is in seconds, -1 for no limit.
    pub fn register_subfamily(
        &mut self,
        root_pid: Pid,
        watcher_pid: Pid,
        max_interval: i64,
    ) -> Result<(), ProcdError> {
        if root_pid <= 0 {
            return Err(ProcdError::BadRootPid(root_pid));
        }
        if watcher_pid < 0 {
            return Err(ProcdError::BadWatcherPid(watcher_pid));
        }
        if max_interval < -1 {
            return Err(ProcdError::BadSnapshotInterval(max_interval));
        }

        self.snapshot()?;

        let member_id = self
            .arena
            .member_id(root_pid)
            .ok_or(ProcdError::ProcessNotFamily(root_pid))?;
        let member = self.arena.member(member_id);
        if member.family() == self.arena.catch_all() {
            return Err(ProcdError::ProcessNotFamily(root_pid));
        }
        if self.arena.lookup_family(root_pid).is_some() {
            return Err(ProcdError::AlreadyRegistered(root_pid));
        }

        let parent = member.family();
        let birthday = member.record().birthday;
        let interval = u64::try_from(max_interval).ok();
        let family =
            self.arena
                .create_subfamily(parent, root_pid, birthday, watcher_pid, interval);
        self.pid_tracker.add_mapping(family, root_pid, birthday);
        self.arena.move_to_subfamily(member_id, family);

        info!(
            "registered family {} (watcher {}, interval {:?}) under family {}",
            root_pid,
            watcher_pid,
            interval,
            self.arena.family(parent).root_pid()
        );
        Ok(())
    }

    pub fn unregister_subfamily(&mut self, pid: Pid) -> Result<(), ProcdError> {
        let family = self.lookup(pid, false)?;
        if family == self.arena.root() {
            return Err(ProcdError::UnregisterRoot);
        }
        self.unregister(family)?;
        Ok(())
    }

    /// Sends `signal` to the root process of the family. No snapshot is taken.
    pub fn signal_process(&self, pid: Pid, signal: i32) -> Result<(), ProcdError> {
        let family = self.lookup(pid, true)?;
        self.deliver(self.arena.family(family).root_pid(), signal);
        Ok(())
    }

    /// Sends `signal` to every live process of the family and its descendants.
    pub fn signal_family(&mut self, pid: Pid, signal: i32) -> Result<(), ProcdError> {
        self.snapshot()?;
        let family = self.lookup(pid, true)?;
        for id in self.arena.preorder(family) {
            self.spree(id, signal);
        }
        Ok(())
    }

    fn spree(&self, family: FamilyId, signal: i32) {
        if let (Some(control), Some(group)) =
            (self.cgroups.as_deref(), self.arena.family(family).cgroup())
        {
            match self.spree_cgroup(control, group, signal) {
                Ok(()) => return,
                Err(e) => warn!(
                    "signalling cgroup {} failed, signalling members instead: {}",
                    group, e
                ),
            }
        }
        for member in self.arena.members(family) {
            self.deliver(member.record().pid, signal);
        }
    }

    fn spree_cgroup(
        &self,
        control: &dyn CgroupControl,
        group: &str,
        signal: i32,
    ) -> Result<(), CgroupError> {
        control.freeze(group)?;
        let listed = control.list_pids(group);
        if let Ok(pids) = &listed {
            for pid in pids {
                self.deliver(*pid, signal);
            }
        }
        if let Err(e) = control.thaw(group) {
            warn!("failed to thaw cgroup {}: {}", group, e);
        }
        listed.map(|_| ())
    }

    fn deliver(&self, pid: Pid, signal: i32) {
        match self.signaller.send(pid, signal) {
            Ok(()) => debug!("sent signal {} to pid {}", signal, pid),
            Err(e) => warn!("error sending signal {} to pid {}: {}", signal, pid, e),
        }
    }

    /// Usage of the family and all its descendants, after a fresh snapshot.
    pub fn get_family_usage(&mut self, pid: Pid) -> Result<FamilyUsage, ProcdError> {
        self.snapshot()?;
        let family = self.lookup(pid, true)?;
        let mut usage = FamilyUsage::default();
        for id in self.arena.preorder(family) {
            let own = self.family_usage(id);
            usage.accumulate(&own);
        }
        usage.max_image_size = self.arena.family(family).max_image_size();
        Ok(usage)
    }

    /// Usage of one family; cgroup counters win over member sums.
    fn family_usage(&mut self, family: FamilyId) -> FamilyUsage {
        let mut usage = self.arena.aggregate_usage(family);
        let counters = match (self.cgroups.as_deref(), self.arena.family(family).cgroup()) {
            (Some(control), Some(group)) => match control.read_counters(group) {
                Ok(counters) => counters,
                Err(e) => {
                    debug!("cgroup counters unavailable for {}: {}", group, e);
                    return usage;
                }
            },
            _ => return usage,
        };

        usage.user_cpu_time = counters.user_time;
        usage.sys_cpu_time = counters.sys_time;
        usage.total_image_size = counters.image_size;
        usage.total_resident_set_size = counters.rss;
        usage.num_procs = counters.num_procs;
        usage.block_read_bytes = counters.block_read_bytes;
        usage.block_write_bytes = counters.block_write_bytes;
        usage.block_reads = counters.block_reads;
        usage.block_writes = counters.block_writes;
        usage.io_wait = counters.io_wait;
        self.arena.raise_max_image_size(family, counters.image_size);
        usage
    }

    pub fn track_family_via_environment(
        &mut self,
        pid: Pid,
        markers: MarkerSet,
    ) -> Result<(), ProcdError> {
        let family = self.lookup(pid, true)?;
        debug!("family {} tracked by {} marker(s)", pid, markers.len());
        self.environment_tracker.add_mapping(family, markers);
        Ok(())
    }

    /// Unknown logins are ignored.
    pub fn track_family_via_login(&mut self, pid: Pid, login: &str) -> Result<(), ProcdError> {
        let family = self.lookup(pid, true)?;
        match self.source.lookup_uid(login) {
            Some(uid) => {
                debug!("family {} tracked by login {} (uid {})", pid, login, uid);
                self.login_tracker.add_mapping(family, uid);
            }
            None => warn!("unknown login {}, not tracking family {}", login, pid),
        }
        Ok(())
    }

    /// Associates a supplementary gid with the family and returns it.
    pub fn track_family_via_supplementary_group(
        &mut self,
        pid: Pid,
        gid: Option<u32>,
    ) -> Result<u32, ProcdError> {
        if !self.group_tracker.is_enabled() {
            return Err(ProcdError::NoGroupIdAvailable);
        }
        let family = self.lookup(pid, true)?;
        let gid = self
            .group_tracker
            .add_mapping(family, gid)
            .ok_or(ProcdError::NoGroupIdAvailable)?;
        debug!("family {} tracked by gid {}", pid, gid);
        Ok(gid)
    }

    /// Associates a cgroup with the family and moves its live members there.
    /// A missing cgroup is created and removed again with the family.
    pub fn track_family_via_cgroup(&mut self, pid: Pid, group: &str) -> Result<(), ProcdError> {
        let Some(control) = self.cgroups.as_deref() else {
            return Err(ProcdError::NoCgroupIdAvailable);
        };
        let family = self.lookup(pid, true)?;
        let group = format!("/{}", group.trim_matches('/'));
        if group == "/" {
            return Err(ProcdError::BadCgroup(group));
        }
        let previous = self.arena.family(family).cgroup().map(str::to_string);
        if previous.as_deref() == Some(group.as_str()) {
            return Ok(());
        }

        let created = !control.exists(&group);
        if created {
            control.create(&group).map_err(|e| {
                warn!("cannot create cgroup {} for family {}: {}", group, pid, e);
                ProcdError::BadCgroup(group.clone())
            })?;
            info!("created cgroup {} for family {}", group, pid);
        }
        for member in self.arena.members(family) {
            let member_pid = member.record().pid;
            if let Err(e) = control.migrate(member_pid, &group) {
                warn!("failed to move pid {} into cgroup {}: {}", member_pid, group, e);
            }
        }
        if let Some(previous) = previous {
            if self.arena.family(family).created_cgroup() {
                remove_cgroup(control, &previous);
            }
        }
        self.arena.set_cgroup(family, Some(group.clone()), created);
        info!("family {} tracked by cgroup {}", pid, group);
        self.cgroup_tracker.add_mapping(family, group);
        Ok(())
    }

    /// Pre-order view of the family and its descendants.
    pub fn dump(&self, pid: Pid) -> Result<Vec<FamilyDump>, ProcdError> {
        let family = self.lookup(pid, true)?;
        Ok(self
            .arena
            .preorder(family)
            .into_iter()
            .map(|id| self.arena.dump(id))
            .collect())
    }

    /// Longest the caller may wait before the next proactive snapshot.
    pub fn snapshot_interval(&self) -> Option<Duration> {
        self.arena.snapshot_interval().map(Duration::from_secs)
    }
}

/// Assigns `record` to `family`, honoring an existing assignment unless the
/// new family is more specific. Returns whether the assignment changed.
fn add_member_to_family(
    arena: &mut FamilyArena,
    cgroups: Option<&dyn CgroupControl>,
    family: FamilyId,
    record: &ProcessRecord,
    tracker: &str,
) -> Result<bool, FatalError> {
    let Some(id) = arena.member_id(record.pid) else {
        arena.add_member(family, record.clone())?;
        debug!(
            "pid {} claimed by {} tracker for family {}",
            record.pid,
            tracker,
            arena.family(family).root_pid()
        );
        migrate_into_family_cgroup(arena, cgroups, family, record.pid);
        return Ok(true);
    };

    let current = arena.member(id).family();
    if current == family {
        return Ok(false);
    }
    if !arena.is_descendant(family, current) {
        debug!(
            "pid {}: {} tracker claim for family {} is less specific - ignoring",
            record.pid,
            tracker,
            arena.family(family).root_pid()
        );
        return Ok(false);
    }
    arena.move_to_subfamily(id, family);
    debug!(
        "pid {} moved to family {} by {} tracker",
        record.pid,
        arena.family(family).root_pid(),
        tracker
    );
    migrate_into_family_cgroup(arena, cgroups, family, record.pid);
    Ok(true)
}

fn remove_cgroup(control: &dyn CgroupControl, group: &str) {
    match control.remove(group) {
        Ok(()) => info!("removed cgroup {}", group),
        Err(e) => warn!("failed to remove cgroup {}: {}", group, e),
    }
}

fn migrate_into_family_cgroup(
    arena: &FamilyArena,
    cgroups: Option<&dyn CgroupControl>,
    family: FamilyId,
    pid: Pid,
) {
    if let (Some(control), Some(group)) = (cgroups, arena.family(family).cgroup()) {
        if let Err(e) = control.migrate(pid, group) {
            warn!("failed to move pid {} into cgroup {}: {}", pid, group, e);
        }
    }
}
