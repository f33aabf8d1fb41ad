use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use crate::classify::{ClassifiedResource, GroupName, PartitionedResources};

/// Ordered resources of one group plus an identity index kept in sync with
/// the list on every update.
#[derive(Debug, Clone)]
pub struct ResourceGroup {
    name: GroupName,
    resources: Vec<ClassifiedResource>,
    index: HashMap<PathBuf, usize>,
}

impl ResourceGroup {
    pub fn new(name: GroupName) -> Self {
        Self {
            name,
            resources: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn name(&self) -> GroupName {
        self.name
    }

    pub fn resources(&self) -> &[ClassifiedResource] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, identity: &Path) -> Option<&ClassifiedResource> {
        self.index.get(identity).map(|&i| &self.resources[i])
    }

    pub fn contains(&self, identity: &Path) -> bool {
        self.index.contains_key(identity)
    }

    pub fn identities(&self) -> impl Iterator<Item = &Path> {
        self.resources.iter().map(|r| r.identity.as_path())
    }

    /// Replace the whole list. Later duplicates of an identity are dropped.
    pub fn replace_all(&mut self, records: Vec<ClassifiedResource>) {
        self.resources.clear();
        self.index.clear();
        self.union_new(records);
    }

    /// Append records whose identity is not present yet. Existing entries
    /// keep their data and position. Returns how many were added.
    pub fn union_new<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = ClassifiedResource>,
    {
        let before = self.resources.len();
        for mut record in records {
            if self.index.contains_key(&record.identity) {
                continue;
            }
            record.group = self.name;
            self.index
                .insert(record.identity.clone(), self.resources.len());
            self.resources.push(record);
        }
        self.resources.len() - before
    }

    /// Remove entries with the given identities and return them in list order.
    pub fn subtract<'a, I>(&mut self, identities: I) -> Vec<ClassifiedResource>
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let doomed: HashSet<&Path> = identities
            .into_iter()
            .filter(|identity| self.index.contains_key(*identity))
            .collect();
        if doomed.is_empty() {
            return Vec::new();
        }

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.resources)
            .into_iter()
            .partition(|r| doomed.contains(r.identity.as_path()));
        self.resources = kept;
        self.reindex();
        removed
    }

    fn reindex(&mut self) {
        self.index = self
            .resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.identity.clone(), i))
            .collect();
    }
}

/// All five groups as one consistent value.
#[derive(Debug, Clone)]
pub struct GroupSet {
    version: u64,
    groups: [ResourceGroup; 5],
}

impl Default for GroupSet {
    fn default() -> Self {
        Self {
            version: 0,
            groups: GroupName::ALL.map(ResourceGroup::new),
        }
    }
}

impl GroupSet {
    /// Bumped by every commit and transaction; 0 means never loaded.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn group(&self, name: GroupName) -> &ResourceGroup {
        &self.groups[name.index()]
    }

    pub fn group_mut(&mut self, name: GroupName) -> &mut ResourceGroup {
        &mut self.groups[name.index()]
    }

    pub fn find(&self, identity: &Path) -> Option<&ClassifiedResource> {
        self.groups.iter().find_map(|g| g.get(identity))
    }

    /// Like [`ResourceGroup::union_new`], but also skips identities held by
    /// any other group so a path never shows up twice.
    pub fn union_new<I>(&mut self, name: GroupName, records: I) -> usize
    where
        I: IntoIterator<Item = ClassifiedResource>,
    {
        let fresh: Vec<ClassifiedResource> = records
            .into_iter()
            .filter(|r| self.find(&r.identity).is_none())
            .collect();
        self.group_mut(name).union_new(fresh)
    }

    /// Replace one group. Records whose identity another group holds are
    /// dropped. Returns how many were kept.
    pub fn replace_group(&mut self, name: GroupName, records: Vec<ClassifiedResource>) -> usize {
        let kept: Vec<ClassifiedResource> = records
            .into_iter()
            .filter(|r| {
                self.groups
                    .iter()
                    .filter(|g| g.name() != name)
                    .all(|g| !g.contains(&r.identity))
            })
            .collect();
        let group = self.group_mut(name);
        group.replace_all(kept);
        group.len()
    }

    pub fn subtract<'a, I>(&mut self, name: GroupName, identities: I) -> Vec<ClassifiedResource>
    where
        I: IntoIterator<Item = &'a Path>,
    {
        self.group_mut(name).subtract(identities)
    }

    /// Move resources from `from` to the end of `to`. Returns the number moved.
    pub fn move_resources<'a, I>(&mut self, identities: I, from: GroupName, to: GroupName) -> usize
    where
        I: IntoIterator<Item = &'a Path>,
    {
        if from == to {
            return 0;
        }
        let moved = self.group_mut(from).subtract(identities);
        self.group_mut(to).union_new(moved)
    }

    pub fn to_partitions(&self) -> PartitionedResources {
        let mut partitions = PartitionedResources::default();
        for group in &self.groups {
            *partitions.group_mut(group.name()) = group.resources().to_vec();
        }
        partitions
    }

    fn replace(&mut self, partitions: PartitionedResources) {
        let PartitionedResources {
            conflict,
            staging,
            merge,
            working,
            untracked,
        } = partitions;
        for (name, records) in [
            (GroupName::Conflict, conflict),
            (GroupName::Staging, staging),
            (GroupName::Merge, merge),
            (GroupName::Working, working),
            (GroupName::Untracked, untracked),
        ] {
            self.group_mut(name).replace_all(records);
        }
    }
}

/// Shared holder of the current [`GroupSet`].
///
/// Every write replaces or edits all groups under one lock, so readers see
/// either the whole previous state or the whole next one. Overlapping
/// refreshes are not ordered here: whichever commits last wins.
#[derive(Debug, Clone, Default)]
pub struct GroupStore {
    inner: Arc<RwLock<GroupSet>>,
}

impl GroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all five groups at once. Returns the new version.
    pub fn commit(&self, partitions: PartitionedResources) -> u64 {
        self.transaction(|set| set.replace(partitions)).0
    }

    /// Run `f` against the groups under the write lock, as one update.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut GroupSet) -> R) -> (u64, R) {
        let mut set = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let out = f(&mut *set);
        set.version += 1;
        (set.version, out)
    }

    pub fn snapshot(&self) -> GroupSet {
        self.read(GroupSet::clone)
    }

    pub fn version(&self) -> u64 {
        self.read(GroupSet::version)
    }

    pub fn group(&self, name: GroupName) -> Vec<ClassifiedResource> {
        self.read(|set| set.group(name).resources().to_vec())
    }

    pub fn get(&self, name: GroupName, identity: &Path) -> Option<ClassifiedResource> {
        self.read(|set| set.group(name).get(identity).cloned())
    }

    pub fn find(&self, identity: &Path) -> Option<ClassifiedResource> {
        self.read(|set| set.find(identity).cloned())
    }

    pub fn staged_identities(&self) -> HashSet<PathBuf> {
        self.read(|set| {
            set.group(GroupName::Staging)
                .identities()
                .map(Path::to_path_buf)
                .collect()
        })
    }

    /// See [`GroupSet::replace_group`]. Returns the new version.
    pub fn replace_all(&self, name: GroupName, records: Vec<ClassifiedResource>) -> u64 {
        self.transaction(|set| set.replace_group(name, records)).0
    }

    pub fn union_new(&self, name: GroupName, records: Vec<ClassifiedResource>) -> usize {
        self.transaction(|set| set.union_new(name, records)).1
    }

    pub fn subtract(&self, name: GroupName, identities: &[PathBuf]) -> Vec<ClassifiedResource> {
        self.transaction(|set| set.subtract(name, identities.iter().map(PathBuf::as_path)))
            .1
    }

    fn read<R>(&self, f: impl FnOnce(&GroupSet) -> R) -> R {
        let set = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&*set)
    }
}
